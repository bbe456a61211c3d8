//! Primitive types and implicit promotion rules
//!
//! Promotion follows the protocol's widening rules:
//! - Byte, SByte -> Int16 -> Int32 -> Int64
//! - any integral -> Single, Double, Decimal
//! - Single -> Double
//! - Date -> DateTimeOffset
//! - a spatial subtype -> its abstract base (GeographyPoint -> Geography)

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of `Edm.*` primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Binary,
    Boolean,
    Byte,
    Date,
    DateTimeOffset,
    Decimal,
    Double,
    Duration,
    Guid,
    Int16,
    Int32,
    Int64,
    SByte,
    Single,
    Stream,
    String,
    TimeOfDay,
    Geography,
    GeographyPoint,
    GeographyLineString,
    GeographyPolygon,
    Geometry,
    GeometryPoint,
    GeometryLineString,
    GeometryPolygon,
}

const ALL_KINDS: [PrimitiveKind; 25] = [
    PrimitiveKind::Binary,
    PrimitiveKind::Boolean,
    PrimitiveKind::Byte,
    PrimitiveKind::Date,
    PrimitiveKind::DateTimeOffset,
    PrimitiveKind::Decimal,
    PrimitiveKind::Double,
    PrimitiveKind::Duration,
    PrimitiveKind::Guid,
    PrimitiveKind::Int16,
    PrimitiveKind::Int32,
    PrimitiveKind::Int64,
    PrimitiveKind::SByte,
    PrimitiveKind::Single,
    PrimitiveKind::Stream,
    PrimitiveKind::String,
    PrimitiveKind::TimeOfDay,
    PrimitiveKind::Geography,
    PrimitiveKind::GeographyPoint,
    PrimitiveKind::GeographyLineString,
    PrimitiveKind::GeographyPolygon,
    PrimitiveKind::Geometry,
    PrimitiveKind::GeometryPoint,
    PrimitiveKind::GeometryLineString,
    PrimitiveKind::GeometryPolygon,
];

impl PrimitiveKind {
    pub fn all() -> &'static [PrimitiveKind] {
        &ALL_KINDS
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Binary => "Binary",
            Self::Boolean => "Boolean",
            Self::Byte => "Byte",
            Self::Date => "Date",
            Self::DateTimeOffset => "DateTimeOffset",
            Self::Decimal => "Decimal",
            Self::Double => "Double",
            Self::Duration => "Duration",
            Self::Guid => "Guid",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::SByte => "SByte",
            Self::Single => "Single",
            Self::Stream => "Stream",
            Self::String => "String",
            Self::TimeOfDay => "TimeOfDay",
            Self::Geography => "Geography",
            Self::GeographyPoint => "GeographyPoint",
            Self::GeographyLineString => "GeographyLineString",
            Self::GeographyPolygon => "GeographyPolygon",
            Self::Geometry => "Geometry",
            Self::GeometryPoint => "GeometryPoint",
            Self::GeometryLineString => "GeometryLineString",
            Self::GeometryPolygon => "GeometryPolygon",
        }
    }

    /// `Edm.`-qualified name
    pub fn qualified_name(&self) -> String {
        format!("Edm.{}", self.name())
    }

    /// Parse an `Edm.`-qualified name such as `Edm.Int32`
    pub fn from_qualified_name(name: &str) -> Option<Self> {
        let simple = name.strip_prefix("Edm.")?;
        ALL_KINDS.iter().copied().find(|k| k.name() == simple)
    }

    pub const fn is_integral(&self) -> bool {
        matches!(
            self,
            Self::Byte | Self::SByte | Self::Int16 | Self::Int32 | Self::Int64
        )
    }

    pub const fn is_numeric(&self) -> bool {
        self.is_integral() || matches!(self, Self::Single | Self::Double | Self::Decimal)
    }

    pub const fn is_temporal(&self) -> bool {
        matches!(
            self,
            Self::Date | Self::DateTimeOffset | Self::TimeOfDay | Self::Duration
        )
    }

    pub const fn is_geography(&self) -> bool {
        matches!(
            self,
            Self::Geography
                | Self::GeographyPoint
                | Self::GeographyLineString
                | Self::GeographyPolygon
        )
    }

    pub const fn is_spatial(&self) -> bool {
        self.is_geography()
            || matches!(
                self,
                Self::Geometry
                    | Self::GeometryPoint
                    | Self::GeometryLineString
                    | Self::GeometryPolygon
            )
    }

    /// Types usable with `lt`/`le`/`gt`/`ge` and in `$orderby`
    pub const fn is_orderable(&self) -> bool {
        self.is_numeric()
            || self.is_temporal()
            || matches!(self, Self::String | Self::Guid | Self::Boolean | Self::Binary)
    }

    /// Types usable with `eq`/`ne`
    pub const fn is_equatable(&self) -> bool {
        !matches!(self, Self::Stream) && !self.is_spatial()
    }

    /// Abstract spatial base of a concrete spatial kind
    pub const fn spatial_base(&self) -> Option<Self> {
        match self {
            Self::GeographyPoint | Self::GeographyLineString | Self::GeographyPolygon => {
                Some(Self::Geography)
            }
            Self::GeometryPoint | Self::GeometryLineString | Self::GeometryPolygon => {
                Some(Self::Geometry)
            }
            _ => None,
        }
    }

    /// Rank inside the numeric widening chain; `None` for non-numerics
    const fn numeric_rank(&self) -> Option<u8> {
        match self {
            Self::Byte | Self::SByte => Some(0),
            Self::Int16 => Some(1),
            Self::Int32 => Some(2),
            Self::Int64 => Some(3),
            Self::Single => Some(4),
            Self::Double => Some(5),
            Self::Decimal => Some(6),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edm.{}", self.name())
    }
}

/// Whether a value of `from` may be used where `to` is expected without an explicit cast
pub fn can_promote(from: PrimitiveKind, to: PrimitiveKind) -> bool {
    use PrimitiveKind::*;

    if from == to {
        return true;
    }
    if from.spatial_base() == Some(to) {
        return true;
    }
    match (from, to) {
        (Date, DateTimeOffset) => true,
        // Decimal sits outside the floating chain: integrals widen into it, floats never do
        (_, Decimal) => from.is_integral(),
        (Decimal, _) => false,
        (Byte, SByte) | (SByte, Byte) => false,
        _ => match (from.numeric_rank(), to.numeric_rank()) {
            (Some(f), Some(t)) => f < t,
            _ => false,
        },
    }
}

/// Smallest type both operands promote to, if any
pub fn common_promotion(left: PrimitiveKind, right: PrimitiveKind) -> Option<PrimitiveKind> {
    if can_promote(left, right) {
        return Some(right);
    }
    if can_promote(right, left) {
        return Some(left);
    }
    [
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::Single,
        PrimitiveKind::Double,
        PrimitiveKind::Decimal,
    ]
    .into_iter()
    .find(|candidate| can_promote(left, *candidate) && can_promote(right, *candidate))
}

/// Operand type arithmetic is performed in; narrow integrals widen to Int32
pub fn arithmetic_operand_type(kind: PrimitiveKind) -> PrimitiveKind {
    match kind {
        PrimitiveKind::Byte | PrimitiveKind::SByte | PrimitiveKind::Int16 => PrimitiveKind::Int32,
        other => other,
    }
}
