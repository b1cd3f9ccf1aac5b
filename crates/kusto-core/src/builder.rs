//! Safe query/command text composition (§4.1). Concatenates compile-time literals with
//! runtime values so user data can never be interpreted as query syntax.

use crate::error::{KustoError, Operation, Result};
use crate::value::{render_string_literal, KustoDateTime, KustoTimespan, ScalarKind, Value};
use std::sync::OnceLock;

/// A compile-time-constant fragment of query text. The only way to build one is from a
/// `&'static str`, so a caller can never construct a `Literal` out of runtime data --
/// the type itself is the proof that a fragment was not attacker-controlled.
#[derive(Debug, Clone, Copy)]
pub struct Literal(pub &'static str);

impl Literal {
    pub const fn new(s: &'static str) -> Self {
        Literal(s)
    }
}

impl From<&'static str> for Literal {
    fn from(s: &'static str) -> Self {
        Literal(s)
    }
}

fn valid_parameter_name(name: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()).is_match(name)
}

/// One `name:kind` entry in the `declare query_parameters(...)` prelude.
#[derive(Debug, Clone)]
struct Parameter {
    name: String,
    kind: ScalarKind,
    value: Value,
}

/// Builds query/command text by appending literals and typed values in order (§4.1).
#[derive(Debug, Clone, Default)]
pub struct StatementBuilder {
    body: String,
    parameters: Vec<Parameter>,
}

impl StatementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_literal(&mut self, literal: impl Into<Literal>) -> &mut Self {
        self.body.push_str(literal.into().0);
        self
    }

    /// Appends a named, typed parameter reference and records its declaration.
    ///
    /// The rendered body references the parameter by name (`ParamStr`); the actual
    /// value is carried in the `declare query_parameters(...)` prelude produced by
    /// [`StatementBuilder::build`], never interpolated into the body text.
    pub fn add_value(&mut self, name: impl Into<String>, value: Value) -> Result<&mut Self> {
        let name = name.into();
        if !valid_parameter_name(&name) {
            return Err(KustoError::client_args(
                Operation::Query,
                format!("invalid parameter name {name:?}: must match [A-Za-z_][A-Za-z0-9_]*"),
            ));
        }
        let kind = value.kind();
        self.body.push_str(&name);
        self.parameters.push(Parameter { name, kind, value });
        Ok(self)
    }

    pub fn add_bool(&mut self, name: impl Into<String>, v: bool) -> Result<&mut Self> {
        self.add_value(name, Value::bool(v))
    }
    pub fn add_int(&mut self, name: impl Into<String>, v: i32) -> Result<&mut Self> {
        self.add_value(name, Value::int(v))
    }
    pub fn add_long(&mut self, name: impl Into<String>, v: i64) -> Result<&mut Self> {
        self.add_value(name, Value::long(v))
    }
    pub fn add_real(&mut self, name: impl Into<String>, v: f64) -> Result<&mut Self> {
        self.add_value(name, Value::real(v))
    }
    pub fn add_string(&mut self, name: impl Into<String>, v: impl Into<String>) -> Result<&mut Self> {
        self.add_value(name, Value::string(v))
    }
    pub fn add_datetime(&mut self, name: impl Into<String>, v: KustoDateTime) -> Result<&mut Self> {
        self.add_value(name, Value::datetime(v))
    }
    pub fn add_timespan(&mut self, name: impl Into<String>, v: KustoTimespan) -> Result<&mut Self> {
        self.add_value(name, Value::timespan(v))
    }
    pub fn add_guid(&mut self, name: impl Into<String>, v: uuid::Uuid) -> Result<&mut Self> {
        self.add_value(name, Value::guid(v))
    }
    pub fn add_dynamic(&mut self, name: impl Into<String>, v: serde_json::Value) -> Result<&mut Self> {
        self.add_value(name, Value::dynamic(v))
    }

    /// Escape hatch for text the caller has already verified is safe (§4.1): no
    /// literal-vs-value distinction is enforced past this call.
    pub fn add_unsafe(&mut self, text: &str) -> &mut Self {
        self.body.push_str(text);
        self
    }

    fn add_identifier(&mut self, name: &str) -> &mut Self {
        if is_safe_unquoted_identifier(name) {
            self.body.push_str(name);
        } else {
            self.body.push('[');
            self.body.push_str(&render_string_literal(name));
            self.body.push(']');
        }
        self
    }

    pub fn add_database(&mut self, name: &str) -> &mut Self {
        self.body.push_str("database(");
        self.body.push_str(&render_string_literal(name));
        self.body.push(')');
        self
    }
    pub fn add_table(&mut self, name: &str) -> &mut Self {
        self.add_identifier(name)
    }
    pub fn add_column(&mut self, name: &str) -> &mut Self {
        self.add_identifier(name)
    }
    pub fn add_function(&mut self, name: &str) -> &mut Self {
        self.add_identifier(name)
    }

    /// Renders the final query text: the `declare query_parameters(...)` prelude (when
    /// any parameters were added) followed by the body.
    pub fn build(&self) -> String {
        if self.parameters.is_empty() {
            return self.body.clone();
        }

        let mut out = String::from("declare query_parameters(");
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&p.name);
            out.push(':');
            out.push_str(&p.kind.to_string());
        }
        out.push_str(");\n");
        out.push_str(&self.body);
        out
    }

    /// The `name -> rendered value` mapping sent alongside the query body, so the
    /// parameter's value is never concatenated into the query text itself.
    pub fn parameter_values(&self) -> Vec<(String, String)> {
        self.parameters.iter().map(|p| (p.name.clone(), p.value.render())).collect()
    }
}

fn is_safe_unquoted_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_rendering_scenario() {
        let mut b = StatementBuilder::new();
        b.add_literal("where x == ");
        b.add_string("ParamStr", "foo\"bar").unwrap();

        let text = b.build();
        assert!(text.starts_with("declare query_parameters(ParamStr:string);\n"));
        assert!(text.ends_with("where x == ParamStr"));

        let values = b.parameter_values();
        assert_eq!(values, vec![("ParamStr".to_string(), "\"foo\\\"bar\"".to_string())]);
    }

    #[test]
    fn invalid_parameter_name_fails() {
        let mut b = StatementBuilder::new();
        let err = b.add_string("1bad", "x").unwrap_err();
        assert_eq!(err.operation(), Operation::Query);
    }

    #[test]
    fn identifiers_quote_when_unsafe() {
        let mut b = StatementBuilder::new();
        b.add_table("MyTable");
        assert_eq!(b.build(), "MyTable");

        let mut b = StatementBuilder::new();
        b.add_table("my table");
        assert_eq!(b.build(), "[\"my table\"]");
    }

    #[test]
    fn database_always_renders_as_call() {
        let mut b = StatementBuilder::new();
        b.add_database("MyDb");
        assert_eq!(b.build(), "database(\"MyDb\")");
    }
}
