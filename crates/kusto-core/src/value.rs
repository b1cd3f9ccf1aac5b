//! The closed scalar type system (§3) and its query-text rendering rules (§4.1).

use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// One tick is 100 nanoseconds, the finest precision the wire format carries.
pub const TICKS_PER_SECOND: i64 = 10_000_000;
const TICKS_PER_DAY: i64 = TICKS_PER_SECOND * 86_400;

/// The closed set of scalar kinds (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScalarKind {
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "long")]
    Long,
    #[serde(rename = "real")]
    Real,
    #[serde(rename = "decimal")]
    Decimal,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "datetime")]
    Datetime,
    #[serde(rename = "timespan")]
    Timespan,
    #[serde(rename = "guid")]
    Guid,
    #[serde(rename = "dynamic")]
    Dynamic,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Long => "long",
            ScalarKind::Real => "real",
            ScalarKind::Decimal => "decimal",
            ScalarKind::String => "string",
            ScalarKind::Datetime => "datetime",
            ScalarKind::Timespan => "timespan",
            ScalarKind::Guid => "guid",
            ScalarKind::Dynamic => "dynamic",
        };
        f.write_str(s)
    }
}

/// A UTC instant with 100-ns tick precision (§3). Stored as ticks since the .NET/Kusto
/// epoch (0001-01-01T00:00:00Z) so round-tripping never loses precision through a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KustoDateTime {
    ticks_since_epoch: i64,
}

/// Ticks between `0001-01-01` and the Unix epoch, matching the .NET `DateTime` epoch.
const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

impl KustoDateTime {
    pub fn from_unix_nanos(nanos: i128) -> Self {
        let ticks = (nanos / 100) as i64;
        KustoDateTime { ticks_since_epoch: TICKS_AT_UNIX_EPOCH + ticks }
    }

    pub fn from_offset_date_time(dt: OffsetDateTime) -> Self {
        let dt = dt.to_offset(time::UtcOffset::UTC);
        Self::from_unix_nanos(dt.unix_timestamp_nanos())
    }

    pub fn to_offset_date_time(self) -> OffsetDateTime {
        let unix_nanos = (self.ticks_since_epoch - TICKS_AT_UNIX_EPOCH) as i128 * 100;
        OffsetDateTime::from_unix_timestamp_nanos(unix_nanos)
            .expect("kusto datetime ticks are always representable")
    }

    /// Render as an RFC3339 UTC timestamp with nanosecond-width fractional seconds,
    /// quantized to 100ns ticks (the trailing two digits are always zero).
    pub fn to_rfc3339_nanos(self) -> String {
        let dt = self.to_offset_date_time();
        let nanos = self.ticks_since_epoch.rem_euclid(TICKS_PER_SECOND) * 100;
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
            dt.year(),
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            nanos,
        )
    }

    pub fn parse_rfc3339(s: &str) -> Result<Self, time::error::Parse> {
        let dt = OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)?;
        Ok(Self::from_offset_date_time(dt))
    }
}

/// A signed duration with 100-ns tick precision, range ±10675199 days (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KustoTimespan {
    ticks: i64,
}

impl KustoTimespan {
    pub fn from_ticks(ticks: i64) -> Self {
        KustoTimespan { ticks }
    }

    pub fn ticks(self) -> i64 {
        self.ticks
    }

    /// Marshals per §3/§4.1: `[-]D.HH:MM:SS.fffffff`, 7-digit subsecond precision.
    pub fn to_kusto_string(self) -> String {
        let negative = self.ticks < 0;
        let abs = self.ticks.unsigned_abs() as i64;

        let days = abs / TICKS_PER_DAY;
        let rem = abs % TICKS_PER_DAY;
        let hours = rem / (TICKS_PER_SECOND * 3600);
        let rem = rem % (TICKS_PER_SECOND * 3600);
        let minutes = rem / (TICKS_PER_SECOND * 60);
        let rem = rem % (TICKS_PER_SECOND * 60);
        let seconds = rem / TICKS_PER_SECOND;
        let subsecond_ticks = rem % TICKS_PER_SECOND;

        format!(
            "{}{}.{:02}:{:02}:{:02}.{:07}",
            if negative { "-" } else { "" },
            days,
            hours,
            minutes,
            seconds,
            subsecond_ticks,
        )
    }

    /// Parses the `[-]D.HH:MM:SS.fffffff` form (and the shorter `HH:MM:SS` / `D.HH:MM:SS`
    /// forms the server also accepts on the wire).
    pub fn parse_kusto_string(s: &str) -> Option<Self> {
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (days, rest) = match rest.split_once('.') {
            Some((d, rest)) if !d.contains(':') => (d.parse::<i64>().ok()?, rest),
            _ => (0, rest),
        };

        let (time_part, frac) = match rest.split_once('.') {
            Some((t, f)) => (t, Some(f)),
            None => (rest, None),
        };

        let mut parts = time_part.split(':');
        let hours: i64 = parts.next()?.parse().ok()?;
        let minutes: i64 = parts.next()?.parse().ok()?;
        let seconds: i64 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }

        let subsecond_ticks: i64 = match frac {
            Some(f) => {
                // Right-pad/truncate to exactly 7 digits of 100ns ticks.
                let mut digits = f.to_string();
                digits.truncate(7);
                while digits.len() < 7 {
                    digits.push('0');
                }
                digits.parse().ok()?
            }
            None => 0,
        };

        let total_ticks = days * TICKS_PER_DAY
            + hours * TICKS_PER_SECOND * 3600
            + minutes * TICKS_PER_SECOND * 60
            + seconds * TICKS_PER_SECOND
            + subsecond_ticks;

        Some(KustoTimespan { ticks: if negative { -total_ticks } else { total_ticks } })
    }
}

/// The payload carried by a [`Value`] when it is not `NULL` (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarPayload {
    Bool(bool),
    Int(i32),
    Long(i64),
    Real(f64),
    /// `decimal` preserves its lexical form through round-trips (§3 invariant).
    Decimal(String),
    String(String),
    Datetime(KustoDateTime),
    Timespan(KustoTimespan),
    Guid(Uuid),
    Dynamic(serde_json::Value),
}

impl ScalarPayload {
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarPayload::Bool(_) => ScalarKind::Bool,
            ScalarPayload::Int(_) => ScalarKind::Int,
            ScalarPayload::Long(_) => ScalarKind::Long,
            ScalarPayload::Real(_) => ScalarKind::Real,
            ScalarPayload::Decimal(_) => ScalarKind::Decimal,
            ScalarPayload::String(_) => ScalarKind::String,
            ScalarPayload::Datetime(_) => ScalarKind::Datetime,
            ScalarPayload::Timespan(_) => ScalarKind::Timespan,
            ScalarPayload::Guid(_) => ScalarKind::Guid,
            ScalarPayload::Dynamic(_) => ScalarKind::Dynamic,
        }
    }
}

/// A scalar value of a given kind, possibly `NULL` (§3: "Every scalar carries a `valid`
/// flag; an invalid value represents SQL-style NULL").
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    kind: ScalarKind,
    payload: Option<ScalarPayload>,
}

impl Value {
    pub fn new(payload: ScalarPayload) -> Self {
        Value { kind: payload.kind(), payload: Some(payload) }
    }

    pub fn null(kind: ScalarKind) -> Self {
        Value { kind, payload: None }
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.payload.is_some()
    }

    pub fn payload(&self) -> Option<&ScalarPayload> {
        self.payload.as_ref()
    }

    pub fn bool(v: bool) -> Self {
        Value::new(ScalarPayload::Bool(v))
    }
    pub fn int(v: i32) -> Self {
        Value::new(ScalarPayload::Int(v))
    }
    pub fn long(v: i64) -> Self {
        Value::new(ScalarPayload::Long(v))
    }
    pub fn real(v: f64) -> Self {
        Value::new(ScalarPayload::Real(v))
    }
    pub fn decimal(lexical: impl Into<String>) -> Self {
        Value::new(ScalarPayload::Decimal(lexical.into()))
    }
    pub fn string(v: impl Into<String>) -> Self {
        Value::new(ScalarPayload::String(v.into()))
    }
    pub fn datetime(v: KustoDateTime) -> Self {
        Value::new(ScalarPayload::Datetime(v))
    }
    pub fn timespan(v: KustoTimespan) -> Self {
        Value::new(ScalarPayload::Timespan(v))
    }
    pub fn guid(v: Uuid) -> Self {
        Value::new(ScalarPayload::Guid(v))
    }
    pub fn dynamic(v: serde_json::Value) -> Self {
        Value::new(ScalarPayload::Dynamic(v))
    }

    /// Renders the value as query-language text, per §4.1's rendering rules.
    pub fn render(&self) -> String {
        let Some(payload) = &self.payload else {
            return format!("{}(null)", self.kind);
        };

        match payload {
            ScalarPayload::Bool(b) => format!("bool({b})"),
            ScalarPayload::Int(n) => format!("int({n})"),
            ScalarPayload::Long(n) => format!("long({n})"),
            ScalarPayload::Real(n) => format!("real({n})"),
            ScalarPayload::Decimal(lexical) => format!("decimal({lexical})"),
            ScalarPayload::String(s) => render_string_literal(s),
            ScalarPayload::Datetime(dt) => format!("datetime({})", dt.to_rfc3339_nanos()),
            ScalarPayload::Timespan(ts) => format!("timespan({})", ts.to_kusto_string()),
            ScalarPayload::Guid(g) => format!("guid({g})"),
            ScalarPayload::Dynamic(v) => match serde_json::to_string(v) {
                Ok(compact) => format!("dynamic({compact})"),
                Err(_) => "dynamic(null)".to_string(),
            },
        }
    }
}

/// Double-quotes a string per §4.1's escape table.
pub fn render_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\u{0B}' => out.push_str("\\v"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7E => {
                // Non-printable-ASCII code point: \uXXXX (or a surrogate pair's worth
                // of \uXXXX units for values outside the BMP).
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timespan_boundary_roundtrip() {
        // 364d 23h 59m 59s 9999999 x 100ns
        let ticks = 364 * TICKS_PER_DAY
            + 23 * TICKS_PER_SECOND * 3600
            + 59 * TICKS_PER_SECOND * 60
            + 59 * TICKS_PER_SECOND
            + 9_999_999;
        let ts = KustoTimespan::from_ticks(ticks);
        assert_eq!(ts.to_kusto_string(), "364.23:59:59.9999999");

        let parsed = KustoTimespan::parse_kusto_string(&ts.to_kusto_string()).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn timespan_negative_roundtrip() {
        let ts = KustoTimespan::from_ticks(-(TICKS_PER_DAY + TICKS_PER_SECOND));
        let rendered = ts.to_kusto_string();
        assert_eq!(rendered, "-1.00:00:01.0000000");
        assert_eq!(KustoTimespan::parse_kusto_string(&rendered).unwrap(), ts);
    }

    #[test]
    fn string_escaping() {
        assert_eq!(render_string_literal("foo\"bar"), "\"foo\\\"bar\"");
        assert_eq!(render_string_literal("a\nb\tc"), "\"a\\nb\\tc\"");
    }

    #[test]
    fn invalid_value_renders_null() {
        assert_eq!(Value::null(ScalarKind::Int).render(), "int(null)");
    }

    #[test]
    fn decimal_preserves_lexical_form() {
        let v = Value::decimal("10.500");
        assert_eq!(v.render(), "decimal(10.500)");
    }
}
