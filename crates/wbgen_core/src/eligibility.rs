use crate::entity::EntityDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// The item already links to an article on the target wiki.
    AlreadyLinked,
    /// Link data was not part of the response, so absence is unconfirmed.
    Unconfirmed,
}

pub fn check_eligibility(document: &EntityDocument, db_name: &str) -> Eligibility {
    match &document.sitelinks {
        None => Eligibility::Unconfirmed,
        Some(links) if links.contains(db_name) => Eligibility::AlreadyLinked,
        Some(_) => Eligibility::Eligible,
    }
}

pub fn is_suitable(document: &EntityDocument) -> bool {
    document
        .statements
        .values()
        .any(|claims| !claims.is_empty())
}
