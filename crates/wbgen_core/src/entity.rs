use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Statements keyed by property id, in the order the repository returned them.
pub type RawStatementSet = IndexMap<String, Vec<Statement>>;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Statement {
    #[serde(default)]
    pub mainsnak: Snak,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Snak {
    pub snaktype: Option<String>,
    pub property: Option<String>,
    pub datavalue: Option<DataValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DataValue {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<Value>,
}

pub const ENTITY_ID_VALUE_TYPE: &str = "wikibase-entityid";

impl DataValue {
    /// The entity id this value points at, when it is entity-typed.
    ///
    /// Prefers the explicit `id` field and falls back to `numeric-id` with a
    /// prefix derived from `entity-type` (items when unspecified).
    pub fn referenced_entity_id(&self) -> Option<String> {
        if self.kind != ENTITY_ID_VALUE_TYPE {
            return None;
        }
        let value = self.value.as_ref()?;
        if let Some(id) = value.get("id").and_then(Value::as_str)
            && !id.trim().is_empty()
        {
            return Some(id.trim().to_string());
        }
        let numeric = value.get("numeric-id").and_then(Value::as_u64)?;
        let prefix = match value.get("entity-type").and_then(Value::as_str) {
            Some("property") => 'P',
            Some("lexeme") => 'L',
            _ => 'Q',
        };
        Some(format!("{prefix}{numeric}"))
    }

    /// The raw value, or an empty string when the value is absent.
    pub fn literal(&self) -> Value {
        match &self.value {
            None | Some(Value::Null) => Value::String(String::new()),
            Some(value) => value.clone(),
        }
    }
}

impl Statement {
    pub fn datavalue(&self) -> Option<&DataValue> {
        self.mainsnak.datavalue.as_ref()
    }
}

/// One entity as returned by the repository, reduced to a single label language.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDocument {
    pub id: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub statements: RawStatementSet,
    /// `None` when the response carried no link data at all.
    pub sitelinks: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityLookup {
    Found(EntityDocument),
    Missing,
}

/// A statement value after label substitution.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ClaimValue {
    Label(String),
    Literal(Value),
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
#[serde(transparent)]
pub struct NormalizedStatementSet(IndexMap<String, Vec<ClaimValue>>);

impl NormalizedStatementSet {
    pub(crate) fn from_map(map: IndexMap<String, Vec<ClaimValue>>) -> Self {
        Self(map)
    }

    pub fn get(&self, label: &str) -> Option<&[ClaimValue]> {
        self.0.get(label).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub label: Option<String>,
    pub description: String,
    pub statements: NormalizedStatementSet,
}

impl ItemRecord {
    /// Label for titles and prompts; the identifier stands in when no label exists.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Maps a repository page title to an item id (`Item:Q42` → `Q42`).
pub fn item_id_from_title(title: &str) -> Option<String> {
    let local = title.rsplit(':').next().unwrap_or(title).trim();
    let digits = local.strip_prefix('Q')?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(local.to_string())
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct EntitiesResponse {
    #[serde(default, deserialize_with = "map_or_empty_array")]
    pub entities: BTreeMap<String, EntityPayload>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct EntityPayload {
    pub id: Option<String>,
    pub missing: Option<Value>,
    #[serde(default, deserialize_with = "map_or_empty_array")]
    pub labels: BTreeMap<String, TermPayload>,
    #[serde(default, deserialize_with = "map_or_empty_array")]
    pub descriptions: BTreeMap<String, TermPayload>,
    #[serde(default, deserialize_with = "map_or_empty_array")]
    pub claims: RawStatementSet,
    #[serde(default, deserialize_with = "optional_map_or_empty_array")]
    pub sitelinks: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct TermPayload {
    #[serde(default)]
    pub value: String,
}

impl EntityPayload {
    pub fn is_missing(&self) -> bool {
        self.missing.is_some()
    }

    pub fn term(terms: &BTreeMap<String, TermPayload>, language: &str) -> Option<String> {
        terms
            .get(language)
            .map(|term| term.value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn into_document(self, fallback_id: &str, language: &str) -> EntityDocument {
        EntityDocument {
            id: self.id.clone().unwrap_or_else(|| fallback_id.to_string()),
            label: Self::term(&self.labels, language),
            description: Self::term(&self.descriptions, language),
            statements: self.claims,
            sitelinks: self
                .sitelinks
                .map(|links| links.into_keys().collect::<BTreeSet<_>>()),
        }
    }
}

// Wikibase serializes empty maps as `[]`.
fn map_or_empty_array<'de, D, M>(deserializer: D) -> Result<M, D::Error>
where
    D: Deserializer<'de>,
    M: DeserializeOwned + Default,
{
    Ok(optional_map_or_empty_array(deserializer)?.unwrap_or_default())
}

fn optional_map_or_empty_array<'de, D, M>(deserializer: D) -> Result<Option<M>, D::Error>
where
    D: Deserializer<'de>,
    M: DeserializeOwned + Default,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) if items.is_empty() => Ok(Some(M::default())),
        Some(other @ Value::Object(_)) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected object or empty array, got {other}"
        ))),
    }
}
