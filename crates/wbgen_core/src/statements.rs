use std::collections::BTreeSet;

use anyhow::Result;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::entity::{ClaimValue, NormalizedStatementSet, RawStatementSet};
use crate::labels::{LabelMap, resolve_labels};
use crate::mediawiki::RepositoryApi;

/// Every identifier a statement set references: its property ids and the
/// targets of entity-typed values.
pub fn referenced_ids(statements: &RawStatementSet) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for (property, claims) in statements {
        ids.insert(property.clone());
        for claim in claims {
            if let Some(target) = claim.datavalue().and_then(|dv| dv.referenced_entity_id()) {
                ids.insert(target);
            }
        }
    }
    ids
}

/// Rewrites `statements` into label-keyed, label-valued form.
///
/// Property and value order are kept. Two properties sharing a label
/// collapse into one key, at the first property's position, holding the
/// values of the property that comes later in the response.
pub fn apply_labels(statements: &RawStatementSet, labels: &LabelMap) -> NormalizedStatementSet {
    let mut readable = IndexMap::new();
    for (property, claims) in statements {
        let values = claims
            .iter()
            .map(|claim| match claim.datavalue() {
                Some(dv) => match dv.referenced_entity_id() {
                    Some(target) => ClaimValue::Label(labels.label_for(&target).to_string()),
                    None => ClaimValue::Literal(dv.literal()),
                },
                None => ClaimValue::Literal(Value::String(String::new())),
            })
            .collect::<Vec<_>>();
        readable.insert(labels.label_for(property).to_string(), values);
    }
    NormalizedStatementSet::from_map(readable)
}

pub fn normalize_statements<A: RepositoryApi>(
    api: &mut A,
    statements: &RawStatementSet,
    language: &str,
) -> Result<NormalizedStatementSet> {
    let ids = referenced_ids(statements);
    let labels = resolve_labels(api, &ids, language)?;
    let normalized = apply_labels(statements, &labels);
    if normalized.len() < statements.len() {
        debug!(
            properties = statements.len(),
            labels = normalized.len(),
            "property labels collided during normalization"
        );
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::entity::Statement;
    use crate::labels::tests::LabelOnlyApi;

    fn raw(value: serde_json::Value) -> RawStatementSet {
        serde_json::from_value(value).expect("raw statements")
    }

    fn entity_claim(numeric_id: u64) -> serde_json::Value {
        json!({"mainsnak": {"snaktype": "value", "datavalue": {
            "type": "wikibase-entityid",
            "value": {"entity-type": "item", "numeric-id": numeric_id}
        }}})
    }

    fn string_claim(value: &str) -> serde_json::Value {
        json!({"mainsnak": {"snaktype": "value", "datavalue": {"type": "string", "value": value}}})
    }

    #[test]
    fn instance_of_human_normalizes_to_labels() {
        let statements = raw(json!({
            "P31": [{"mainsnak": {"datavalue": {"type": "wikibase-entityid", "value": {"numeric-id": 5}}}}]
        }));
        let mut api = LabelOnlyApi::default();
        api.labels.insert("P31".to_string(), "instance of".to_string());
        api.labels.insert("Q5".to_string(), "human".to_string());

        let normalized = normalize_statements(&mut api, &statements, "en").expect("normalize");
        assert_eq!(normalized.to_json(), r#"{"instance of":["human"]}"#);
        assert_eq!(api.label_calls.len(), 1);
    }

    #[test]
    fn referenced_ids_include_properties_and_targets_only() {
        let statements = raw(json!({
            "P31": [entity_claim(5), entity_claim(215627)],
            "P1476": [string_claim("Q99 is not a reference")]
        }));
        let ids = referenced_ids(&statements);
        let expected = ["P1476", "P31", "Q215627", "Q5"]
            .iter()
            .map(ToString::to_string)
            .collect::<BTreeSet<_>>();
        assert_eq!(ids, expected);
    }

    #[test]
    fn value_order_is_preserved_and_no_property_is_dropped() {
        let statements = raw(json!({
            "P31": [entity_claim(3), entity_claim(1), entity_claim(2)],
            "P735": [string_claim("zeta"), string_claim("alpha")],
            "P9": []
        }));
        let labels = ["Q1", "Q2", "Q3"]
            .iter()
            .map(|id| (id.to_string(), format!("label {id}")))
            .collect::<LabelMap>();

        let normalized = apply_labels(&statements, &labels);
        assert_eq!(normalized.len(), 3);
        assert_eq!(
            normalized.get("P31").expect("P31"),
            &[
                ClaimValue::Label("label Q3".to_string()),
                ClaimValue::Label("label Q1".to_string()),
                ClaimValue::Label("label Q2".to_string()),
            ]
        );
        assert_eq!(
            normalized.get("P735").expect("P735"),
            &[
                ClaimValue::Literal(json!("zeta")),
                ClaimValue::Literal(json!("alpha")),
            ]
        );
        assert!(normalized.get("P9").expect("P9").is_empty());
    }

    #[test]
    fn missing_datavalue_becomes_empty_string() {
        let mut statements = RawStatementSet::new();
        statements.insert("P570".to_string(), vec![Statement::default()]);
        let normalized = apply_labels(&statements, &LabelMap::default());
        assert_eq!(
            normalized.get("P570").expect("P570"),
            &[ClaimValue::Literal(json!(""))]
        );
    }

    #[test]
    fn missing_value_inside_datavalue_becomes_empty_string() {
        let statements = raw(json!({"P1": [{"mainsnak": {"datavalue": {"type": "string"}}}]}));
        let normalized = apply_labels(&statements, &LabelMap::default());
        assert_eq!(
            normalized.get("P1").expect("P1"),
            &[ClaimValue::Literal(json!(""))]
        );
        assert_eq!(normalized.to_json(), r#"{"P1":[""]}"#);
    }

    #[test]
    fn structured_primitive_passes_through_unchanged() {
        let time = json!({"time": "+1952-03-11T00:00:00Z", "precision": 11});
        let statements = raw(json!({
            "P569": [{"mainsnak": {"datavalue": {"type": "time", "value": time.clone()}}}]
        }));
        let normalized = apply_labels(&statements, &LabelMap::default());
        assert_eq!(
            normalized.get("P569").expect("P569"),
            &[ClaimValue::Literal(time)]
        );
    }

    #[test]
    fn colliding_property_labels_keep_later_values() {
        let statements = raw(json!({
            "P9": [string_claim("from P9")],
            "P10": [string_claim("from P10")]
        }));
        let labels = [("P9", "name"), ("P10", "name")]
            .iter()
            .map(|(id, label)| (id.to_string(), label.to_string()))
            .collect::<LabelMap>();

        let normalized = apply_labels(&statements, &labels);
        assert_eq!(normalized.len(), 1);
        assert_eq!(
            normalized.get("name").expect("name"),
            &[ClaimValue::Literal(json!("from P10"))]
        );
    }

    #[test]
    fn normalized_json_follows_statement_order() {
        let statements = raw(json!({
            "P31": [entity_claim(5)],
            "P106": [entity_claim(36180)],
            "P19": [string_claim("Cambridge")]
        }));
        let labels = [
            ("P31", "instance of"),
            ("Q5", "human"),
            ("P106", "occupation"),
            ("Q36180", "writer"),
            ("P19", "birthplace"),
        ]
        .iter()
        .map(|(id, label)| (id.to_string(), label.to_string()))
        .collect::<LabelMap>();

        let normalized = apply_labels(&statements, &labels);
        assert_eq!(
            normalized.to_json(),
            r#"{"instance of":["human"],"occupation":["writer"],"birthplace":["Cambridge"]}"#
        );
    }
}
