use anyhow::Result;
use tracing::{debug, warn};

use crate::eligibility::{Eligibility, check_eligibility, is_suitable};
use crate::entity::{EntityLookup, ItemRecord};
use crate::mediawiki::RepositoryApi;
use crate::statements::normalize_statements;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Ready(ItemRecord),
    NotEligible,
    /// Eligibility could not be established; the item must be retried later.
    Unconfirmed,
    Unsuitable,
}

#[derive(Debug, Clone)]
pub struct FetchSettings<'a> {
    pub language: &'a str,
    pub db_name: &'a str,
}

/// Loads one item and classifies it; eligibility is decided before suitability.
pub fn fetch_item<A: RepositoryApi>(
    api: &mut A,
    id: &str,
    settings: &FetchSettings<'_>,
) -> Result<FetchOutcome> {
    let document = match api.get_entity(id, settings.language)? {
        EntityLookup::Found(document) => document,
        EntityLookup::Missing => {
            warn!(item = %id, "item is missing from the repository");
            return Ok(FetchOutcome::Unconfirmed);
        }
    };

    match check_eligibility(&document, settings.db_name) {
        Eligibility::Eligible => {}
        Eligibility::AlreadyLinked => {
            debug!(item = %id, db_name = settings.db_name, "item already has an article");
            return Ok(FetchOutcome::NotEligible);
        }
        Eligibility::Unconfirmed => return Ok(FetchOutcome::Unconfirmed),
    }

    if !is_suitable(&document) {
        return Ok(FetchOutcome::Unsuitable);
    }

    if document.label.is_none() {
        warn!(item = %id, language = settings.language, "item has no label");
    }
    let description = match document.description {
        Some(description) => description,
        None => {
            warn!(item = %id, language = settings.language, "item has no description");
            String::new()
        }
    };

    let statements = normalize_statements(api, &document.statements, settings.language)?;
    Ok(FetchOutcome::Ready(ItemRecord {
        id: document.id,
        label: document.label,
        description,
        statements,
    }))
}
