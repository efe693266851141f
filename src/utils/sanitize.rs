use serde_json::Value;

/// Postgres text columns reject NUL bytes; strip them from anything headed
/// for a row. Raw payload bytes are stored verbatim and never pass through
/// here.
pub fn strip_null_bytes(s: &str) -> String {
    if s.contains('\u{0000}') {
        s.replace('\u{0000}', "")
    } else {
        s.to_string()
    }
}

pub fn strip_null_bytes_opt(s: Option<&str>) -> Option<String> {
    s.map(strip_null_bytes)
}

/// Recursively strips NUL bytes from every string inside a JSON value.
pub fn sanitize_json(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_null_bytes(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (strip_null_bytes(&k), sanitize_json(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_null_bytes_from_strings() {
        assert_eq!(strip_null_bytes("he\u{0000}llo"), "hello");
        assert_eq!(strip_null_bytes("clean"), "clean");
    }

    #[test]
    fn sanitizes_nested_json() {
        let dirty = json!({"a\u{0000}b": ["x\u{0000}", {"k": "v\u{0000}"}], "n": 42});
        let clean = sanitize_json(dirty);
        assert_eq!(clean, json!({"ab": ["x", {"k": "v"}], "n": 42}));
    }
}
