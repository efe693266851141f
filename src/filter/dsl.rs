use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured filter accepted on the wire. The legacy flat form
/// `{"lang": "ts"}` is still accepted and means a conjunction of equality
/// conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterDsl {
    Structured(FilterSpec),
    Legacy(Map<String, Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub combine: Combine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    #[default]
    And,
    Or,
}

/// Tagged by shape: a range condition carries `range`, a list condition
/// carries `values`, a scalar condition carries `value` (absent for the
/// null checks).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterCondition {
    Range {
        field: String,
        op: String,
        range: RangeBounds,
    },
    List {
        field: String,
        op: String,
        values: Vec<Value>,
    },
    Scalar {
        field: String,
        op: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeBounds {
    pub low: Value,
    pub high: Value,
}

impl FilterDsl {
    /// Normalizes the legacy flat form into the structured one.
    pub fn into_spec(self) -> FilterSpec {
        match self {
            FilterDsl::Structured(spec) => spec,
            FilterDsl::Legacy(map) => FilterSpec {
                conditions: map
                    .into_iter()
                    .map(|(field, value)| FilterCondition::Scalar {
                        field,
                        op: "eq".to_string(),
                        value: Some(value),
                    })
                    .collect(),
                combine: Combine::And,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_structured_form() {
        let dsl: FilterDsl = serde_json::from_value(json!({
            "conditions": [
                {"field": "lang", "op": "eq", "value": "ts"},
                {"field": "docType", "op": "in", "values": ["code", "text"]},
                {"field": "ingestedAt", "op": "between",
                 "range": {"low": "2023-01-01", "high": "2023-12-31"}}
            ],
            "combine": "or"
        }))
        .unwrap();

        let spec = dsl.into_spec();
        assert_eq!(spec.combine, Combine::Or);
        assert_eq!(spec.conditions.len(), 3);
        assert!(matches!(spec.conditions[0], FilterCondition::Scalar { .. }));
        assert!(matches!(spec.conditions[1], FilterCondition::List { .. }));
        assert!(matches!(spec.conditions[2], FilterCondition::Range { .. }));
    }

    #[test]
    fn deserializes_legacy_flat_form() {
        let dsl: FilterDsl =
            serde_json::from_value(json!({"lang": "rs", "docType": "code"})).unwrap();
        let spec = dsl.into_spec();
        assert_eq!(spec.combine, Combine::And);
        assert_eq!(spec.conditions.len(), 2);
        for condition in &spec.conditions {
            match condition {
                FilterCondition::Scalar { op, value, .. } => {
                    assert_eq!(op, "eq");
                    assert!(value.is_some());
                }
                other => panic!("expected scalar, got {other:?}"),
            }
        }
    }

    #[test]
    fn null_check_needs_no_value() {
        let dsl: FilterDsl = serde_json::from_value(json!({
            "conditions": [{"field": "repoId", "op": "isNull"}]
        }))
        .unwrap();
        let spec = dsl.into_spec();
        assert!(matches!(
            &spec.conditions[0],
            FilterCondition::Scalar { value: None, .. }
        ));
    }
}
