// ============================================================================
// SQL rendering helpers (PostgreSQL dialect)
// ============================================================================

use crate::core::{DataType, Value};

pub fn sql_escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Double-quotes an identifier; a `schema.table` name is quoted part by part.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Alias-qualified column reference such as `t."name"`.
pub fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote_identifier(column))
}

pub fn quote_identifiers(names: &[String]) -> String {
    names
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn array_element(item: &str) -> String {
    let plain = !item.is_empty()
        && !item.eq_ignore_ascii_case("null")
        && !item
            .chars()
            .any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace());
    if plain {
        item.to_string()
    } else {
        format!("\"{}\"", item.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Renders a value as an untyped SQL literal.
pub fn quote_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_finite() {
                f.to_string()
            } else {
                format!("'{}'", value)
            }
        }
        Value::Text(s) => format!("'{}'", sql_escape_string(s)),
        Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::TextArray(items) => {
            let body = items
                .iter()
                .map(|item| array_element(item))
                .collect::<Vec<_>>()
                .join(",");
            format!("'{{{}}}'", sql_escape_string(&body))
        }
    }
}

/// Literal with an explicit cast, so a `VALUES` table full of NULLs still has column types.
pub fn typed_literal(value: &Value, data_type: DataType) -> String {
    format!("{}::{}", quote_value(value), data_type.sql_type())
}

pub fn row_literal(items: impl IntoIterator<Item = String>) -> String {
    format!("({})", items.into_iter().collect::<Vec<_>>().join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("docs"), "\"docs\"");
        assert_eq!(quote_identifier("public.docs"), "\"public\".\"docs\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value(&Value::Null), "NULL");
        assert_eq!(quote_value(&Value::Integer(-3)), "-3");
        assert_eq!(quote_value(&Value::from("O'Brien")), "'O''Brien'");
        assert_eq!(quote_value(&Value::Boolean(true)), "TRUE");
        assert_eq!(
            quote_value(&Value::TextArray(vec!["name".into(), "atime".into()])),
            "'{name,atime}'"
        );
        assert_eq!(
            quote_value(&Value::TextArray(vec!["a b".into()])),
            "'{\"a b\"}'"
        );
    }

    #[test]
    fn test_typed_literal() {
        assert_eq!(typed_literal(&Value::Null, DataType::Integer), "NULL::bigint");
        assert_eq!(
            typed_literal(&Value::from("100"), DataType::Numeric),
            "'100'::numeric"
        );
    }
}
