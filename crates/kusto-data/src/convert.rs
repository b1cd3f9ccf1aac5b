//! Converts raw JSON cell tokens into typed [`Value`]s (§3, §4.2).
//!
//! `serde_json::Number` already separates integer and float lexical forms internally,
//! so nothing here ever routes an integer token through `f64` on its way to an `int`
//! or `long` column -- the one invariant the whole decoder exists to protect.

use kusto_core::error::{KustoError, Operation, Result};
use kusto_core::value::{KustoDateTime, KustoTimespan};
use kusto_core::{ScalarKind, Value};
use uuid::Uuid;

pub fn convert_cell(op: Operation, kind: ScalarKind, raw: &serde_json::Value) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::null(kind));
    }

    match kind {
        ScalarKind::Bool => raw
            .as_bool()
            .map(Value::bool)
            .ok_or_else(|| decode_err(op, kind, raw)),

        ScalarKind::Int => raw
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Value::int)
            .ok_or_else(|| decode_err(op, kind, raw)),

        ScalarKind::Long => raw.as_i64().map(Value::long).ok_or_else(|| decode_err(op, kind, raw)),

        // `real` accepts both integer and fractional JSON tokens.
        ScalarKind::Real => raw.as_f64().map(Value::real).ok_or_else(|| decode_err(op, kind, raw)),

        // Preserves the lexical form exactly as sent, per §3's decimal invariant.
        ScalarKind::Decimal => match raw {
            serde_json::Value::String(s) => Ok(Value::decimal(s.clone())),
            serde_json::Value::Number(n) => Ok(Value::decimal(n.to_string())),
            _ => Err(decode_err(op, kind, raw)),
        },

        ScalarKind::String => raw
            .as_str()
            .map(Value::string)
            .ok_or_else(|| decode_err(op, kind, raw)),

        ScalarKind::Datetime => raw
            .as_str()
            .and_then(|s| KustoDateTime::parse_rfc3339(s).ok())
            .map(Value::datetime)
            .ok_or_else(|| decode_err(op, kind, raw)),

        ScalarKind::Timespan => raw
            .as_str()
            .and_then(KustoTimespan::parse_kusto_string)
            .map(Value::timespan)
            .ok_or_else(|| decode_err(op, kind, raw)),

        ScalarKind::Guid => raw
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Value::guid)
            .ok_or_else(|| decode_err(op, kind, raw)),

        ScalarKind::Dynamic => Ok(Value::dynamic(raw.clone())),
    }
}

fn decode_err(op: Operation, kind: ScalarKind, raw: &serde_json::Value) -> KustoError {
    KustoError::decode(op, format!("cell {raw} is not a valid {kind}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_never_parses_through_float() {
        let v = convert_cell(Operation::Query, ScalarKind::Int, &json!(2147483647)).unwrap();
        assert_eq!(v.render(), "int(2147483647)");
    }

    #[test]
    fn int_overflow_is_decode_error() {
        let err = convert_cell(Operation::Query, ScalarKind::Int, &json!(9999999999_i64)).unwrap_err();
        assert!(matches!(err, KustoError::Decode { .. }));
    }

    #[test]
    fn null_cell_is_invalid_value_of_kind() {
        let v = convert_cell(Operation::Query, ScalarKind::Long, &serde_json::Value::Null).unwrap();
        assert!(!v.is_valid());
        assert_eq!(v.kind(), ScalarKind::Long);
    }

    #[test]
    fn decimal_preserves_lexical_form_from_string_token() {
        let v = convert_cell(Operation::Query, ScalarKind::Decimal, &json!("10.500")).unwrap();
        assert_eq!(v.render(), "decimal(10.500)");
    }
}
