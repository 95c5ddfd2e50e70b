use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::debug;

use crate::mediawiki::RepositoryApi;

/// Identifier → label, total over the identifiers it was resolved for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap(BTreeMap<String, String>);

impl LabelMap {
    /// The resolved label, or the identifier itself when it was never resolved.
    pub fn label_for<'a>(&'a self, id: &'a str) -> &'a str {
        self.0.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl FromIterator<(String, String)> for LabelMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Resolves every identifier in `ids` with a single batched repository lookup.
///
/// Identifiers without a label in `language`, or absent from the response,
/// map to themselves. An empty input issues no request.
pub fn resolve_labels<A: RepositoryApi>(
    api: &mut A,
    ids: &BTreeSet<String>,
    language: &str,
) -> Result<LabelMap> {
    if ids.is_empty() {
        return Ok(LabelMap::default());
    }
    let requested = ids.iter().cloned().collect::<Vec<_>>();
    let mut fetched = api.get_labels(&requested, language)?;

    let mut unlabeled = 0usize;
    let labels = requested
        .into_iter()
        .map(|id| {
            let label = fetched.remove(&id).flatten().unwrap_or_else(|| {
                unlabeled += 1;
                id.clone()
            });
            (id, label)
        })
        .collect::<LabelMap>();
    debug!(
        requested = labels.len(),
        unlabeled, language, "resolved labels"
    );
    Ok(labels)
}
