//! Literal tokens

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A literal as recognised by the lexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralToken {
    pub value: LiteralValue,
    /// Source text of the literal, kept for retyping numerics during binding
    pub text: String,
}

impl LiteralToken {
    pub fn new(value: LiteralValue, text: impl Into<String>) -> Self {
        Self {
            value,
            text: text.into(),
        }
    }

    pub fn null() -> Self {
        Self::new(LiteralValue::Null, "null")
    }

    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        let text = format!("'{}'", value.replace('\'', "''"));
        Self::new(LiteralValue::String(value), text)
    }
}

impl fmt::Display for LiteralToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Geometric shape named by a spatial literal's WKT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialShape {
    Point,
    LineString,
    Polygon,
    /// Collections and multi-shapes; typed as the abstract base
    Other,
}

impl SpatialShape {
    pub fn from_wkt(wkt: &str) -> Self {
        let upper = wkt.trim_start().to_ascii_uppercase();
        if upper.starts_with("POINT") {
            Self::Point
        } else if upper.starts_with("LINESTRING") {
            Self::LineString
        } else if upper.starts_with("POLYGON") {
            Self::Polygon
        } else {
            Self::Other
        }
    }
}

/// `duration'P1DT2H'`, kept component-wise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationLiteral {
    pub negative: bool,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: Decimal,
}

impl DurationLiteral {
    pub fn to_time_delta(&self) -> Option<TimeDelta> {
        let whole = self.seconds.trunc().to_i64()?;
        let nanos = (self.seconds.fract() * Decimal::from(1_000_000_000)).to_i64()?;
        let delta = TimeDelta::try_days(i64::from(self.days))?
            .checked_add(&TimeDelta::try_hours(i64::from(self.hours))?)?
            .checked_add(&TimeDelta::try_minutes(i64::from(self.minutes))?)?
            .checked_add(&TimeDelta::try_seconds(whole)?)?
            .checked_add(&TimeDelta::nanoseconds(nanos))?;
        Some(if self.negative { -delta } else { delta })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    Double(f64),
    Single(f32),
    String(String),
    Date(NaiveDate),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeOfDay(NaiveTime),
    Duration(DurationLiteral),
    Guid(Uuid),
    Binary(Vec<u8>),
    /// `NS.Color'Red,Blue'`; members are resolved during binding
    Enum { type_name: String, value: String },
    Spatial {
        geography: bool,
        shape: SpatialShape,
        srid: Option<u32>,
        wkt: String,
    },
}

impl LiteralValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32(_) | Self::Int64(_) | Self::Decimal(_) | Self::Double(_) | Self::Single(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Short name of the literal's kind for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::Decimal(_) => "Decimal",
            Self::Double(_) => "Double",
            Self::Single(_) => "Single",
            Self::String(_) => "string",
            Self::Date(_) => "Date",
            Self::DateTimeOffset(_) => "DateTimeOffset",
            Self::TimeOfDay(_) => "TimeOfDay",
            Self::Duration(_) => "Duration",
            Self::Guid(_) => "Guid",
            Self::Binary(_) => "Binary",
            Self::Enum { .. } => "enum",
            Self::Spatial { .. } => "spatial",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("POINT(1 2)", SpatialShape::Point)]
    #[case("  linestring(1 2, 3 4)", SpatialShape::LineString)]
    #[case("Polygon((0 0,1 1,1 0,0 0))", SpatialShape::Polygon)]
    #[case("MultiPoint((1 2))", SpatialShape::Other)]
    fn test_shape_from_wkt(#[case] wkt: &str, #[case] expected: SpatialShape) {
        assert_eq!(SpatialShape::from_wkt(wkt), expected);
    }

    #[test]
    fn test_duration_to_time_delta() {
        let duration = DurationLiteral {
            negative: true,
            days: 1,
            hours: 2,
            minutes: 0,
            seconds: Decimal::new(15, 1),
        };
        let expected = -(TimeDelta::hours(26) + TimeDelta::milliseconds(1500));
        assert_eq!(duration.to_time_delta(), Some(expected));
    }

    #[test]
    fn test_string_token_escapes_quotes() {
        assert_eq!(LiteralToken::string("O'Neil").text, "'O''Neil'");
    }
}
