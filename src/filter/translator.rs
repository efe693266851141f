use super::dsl::{Combine, FilterCondition, FilterDsl, RangeBounds};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid filter: {0}")]
pub struct FilterValidationError(pub String);

/// SQL fragment produced from a filter. `sql` is either empty or starts
/// with `" AND (...)"` so callers can append it to any WHERE clause;
/// `params` are bound in order starting at `$offset + 1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterFragment {
    pub sql: String,
    pub params: Vec<String>,
}

/// Closed field table. Anything not listed here is rejected, which is what
/// keeps LLM-inferred filters from reaching the database unchecked.
fn column_for(field: &str) -> Result<(&'static str, bool), FilterValidationError> {
    let mapped = match field {
        "docType" => ("c.doc_type", false),
        "repoId" => ("c.repo_id", false),
        "lang" => ("c.lang", false),
        "path" => ("c.path", false),
        "mimeType" => ("d.mime_type", false),
        "ingestedAt" => ("d.ingested_at", true),
        "createdAt" => ("c.created_at", true),
        "updatedAt" => ("c.updated_at", true),
        other => {
            return Err(FilterValidationError(format!("unknown field '{other}'")));
        }
    };
    Ok(mapped)
}

pub fn translate_filter(
    dsl: FilterDsl,
    param_offset: usize,
) -> Result<FilterFragment, FilterValidationError> {
    let spec = dsl.into_spec();
    if spec.conditions.is_empty() {
        return Ok(FilterFragment::default());
    }

    let mut params: Vec<String> = Vec::new();
    let mut pieces: Vec<String> = Vec::new();

    for condition in spec.conditions {
        let piece = match condition {
            FilterCondition::Scalar { field, op, value } => {
                translate_scalar(&field, &op, value, param_offset, &mut params)?
            }
            FilterCondition::List { field, op, values } => {
                translate_list(&field, &op, values, param_offset, &mut params)?
            }
            FilterCondition::Range { field, op, range } => {
                translate_range(&field, &op, range, param_offset, &mut params)?
            }
        };
        pieces.push(piece);
    }

    let joiner = match spec.combine {
        Combine::And => " AND ",
        Combine::Or => " OR ",
    };

    Ok(FilterFragment {
        sql: format!(" AND ({})", pieces.join(joiner)),
        params,
    })
}

fn placeholder(offset: usize, params: &[String], temporal: bool) -> String {
    let n = offset + params.len() + 1;
    if temporal {
        format!("${n}::timestamptz")
    } else {
        format!("${n}")
    }
}

fn push_param(params: &mut Vec<String>, value: Value) -> Result<(), FilterValidationError> {
    let rendered = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return Err(FilterValidationError(format!(
                "unsupported value type: {other}"
            )));
        }
    };
    params.push(rendered);
    Ok(())
}

fn translate_scalar(
    field: &str,
    op: &str,
    value: Option<Value>,
    offset: usize,
    params: &mut Vec<String>,
) -> Result<String, FilterValidationError> {
    let (column, temporal) = column_for(field)?;

    let comparator = match op {
        "eq" => "=",
        "ne" => "<>",
        "gt" => ">",
        "gte" => ">=",
        "lt" => "<",
        "lte" => "<=",
        "isNull" => return Ok(format!("{column} IS NULL")),
        "isNotNull" => return Ok(format!("{column} IS NOT NULL")),
        other => {
            return Err(FilterValidationError(format!(
                "unknown operator '{other}' for field '{field}'"
            )));
        }
    };

    if !temporal && matches!(op, "gt" | "gte" | "lt" | "lte") {
        return Err(FilterValidationError(format!(
            "operator '{op}' is only valid on temporal fields, got '{field}'"
        )));
    }

    let value = value.ok_or_else(|| {
        FilterValidationError(format!("operator '{op}' on '{field}' requires a value"))
    })?;
    let ph = placeholder(offset, params, temporal);
    push_param(params, value)?;
    Ok(format!("{column} {comparator} {ph}"))
}

fn translate_list(
    field: &str,
    op: &str,
    values: Vec<Value>,
    offset: usize,
    params: &mut Vec<String>,
) -> Result<String, FilterValidationError> {
    let (column, temporal) = column_for(field)?;
    let negated = match op {
        "in" => false,
        "notIn" => true,
        other => {
            return Err(FilterValidationError(format!(
                "unknown list operator '{other}' for field '{field}'"
            )));
        }
    };
    if values.is_empty() {
        return Err(FilterValidationError(format!(
            "'{op}' on '{field}' requires at least one value"
        )));
    }

    let mut placeholders = Vec::with_capacity(values.len());
    for value in values {
        placeholders.push(placeholder(offset, params, temporal));
        push_param(params, value)?;
    }

    let keyword = if negated { "NOT IN" } else { "IN" };
    Ok(format!("{column} {keyword} ({})", placeholders.join(", ")))
}

fn translate_range(
    field: &str,
    op: &str,
    range: RangeBounds,
    offset: usize,
    params: &mut Vec<String>,
) -> Result<String, FilterValidationError> {
    let (column, temporal) = column_for(field)?;
    if !temporal {
        return Err(FilterValidationError(format!(
            "range operator '{op}' is only valid on temporal fields, got '{field}'"
        )));
    }

    let low_ph = placeholder(offset, params, temporal);
    push_param(params, range.low)?;
    let high_ph = placeholder(offset, params, temporal);
    push_param(params, range.high)?;

    match op {
        "between" => Ok(format!("{column} >= {low_ph} AND {column} <= {high_ph}")),
        "notBetween" => Ok(format!("({column} < {low_ph} OR {column} > {high_ph})")),
        other => Err(FilterValidationError(format!(
            "unknown range operator '{other}' for field '{field}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dsl(value: serde_json::Value) -> FilterDsl {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parameters_start_after_the_offset() {
        let fragment = translate_filter(
            dsl(json!({"conditions": [
                {"field": "lang", "op": "eq", "value": "ts"},
                {"field": "ingestedAt", "op": "between",
                 "range": {"low": "2023-01-01", "high": "2023-12-31"}}
            ]})),
            4,
        )
        .unwrap();

        assert!(fragment.sql.starts_with(" AND ("));
        assert!(fragment.sql.contains("c.lang = $5"));
        assert!(fragment.sql.contains("d.ingested_at >= $6"));
        assert!(fragment.sql.contains("d.ingested_at <= $7"));
        assert_eq!(
            fragment.params,
            vec!["ts", "2023-01-01", "2023-12-31"]
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = translate_filter(
            dsl(json!({"conditions": [{"field": "owner", "op": "eq", "value": "x"}]})),
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = translate_filter(
            dsl(json!({"conditions": [{"field": "lang", "op": "like", "value": "x"}]})),
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
    }

    #[test]
    fn comparison_on_non_temporal_field_is_rejected() {
        let err = translate_filter(
            dsl(json!({"conditions": [{"field": "lang", "op": "gt", "value": "x"}]})),
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("temporal"));

        let err = translate_filter(
            dsl(json!({"conditions": [{"field": "path", "op": "between",
                "range": {"low": "a", "high": "b"}}]})),
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("temporal"));
    }

    #[test]
    fn list_operators_emit_one_placeholder_per_value() {
        let fragment = translate_filter(
            dsl(json!({"conditions": [
                {"field": "docType", "op": "in", "values": ["code", "email"]}
            ]})),
            2,
        )
        .unwrap();
        assert_eq!(fragment.sql, " AND (c.doc_type IN ($3, $4))");
        assert_eq!(fragment.params, vec!["code", "email"]);
    }

    #[test]
    fn null_checks_emit_no_parameters() {
        let fragment = translate_filter(
            dsl(json!({"conditions": [
                {"field": "repoId", "op": "isNull"},
                {"field": "path", "op": "isNotNull"}
            ], "combine": "or"})),
            0,
        )
        .unwrap();
        assert_eq!(
            fragment.sql,
            " AND (c.repo_id IS NULL OR c.path IS NOT NULL)"
        );
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn legacy_flat_object_means_equality_conjunction() {
        let fragment =
            translate_filter(dsl(json!({"lang": "rs", "docType": "code"})), 0).unwrap();
        assert!(fragment.sql.contains("c.doc_type = $"));
        assert!(fragment.sql.contains("c.lang = $"));
        assert!(fragment.sql.contains(" AND "));
        assert_eq!(fragment.params.len(), 2);
    }

    #[test]
    fn empty_conditions_translate_to_nothing() {
        let fragment = translate_filter(dsl(json!({"conditions": []})), 0).unwrap();
        assert!(fragment.sql.is_empty());
        assert!(fragment.params.is_empty());
    }
}
