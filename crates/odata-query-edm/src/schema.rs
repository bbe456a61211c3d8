//! Schema type definitions stored in the model arena

use crate::primitive::PrimitiveKind;
use crate::types::{SchemaTypeId, TypeRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Entity or complex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructuredKind {
    Entity,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralProperty {
    pub name: String,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    pub target: SchemaTypeId,
    pub is_collection: bool,
    pub nullable: bool,
    pub contains_target: bool,
    pub partner: Option<String>,
}

impl NavigationProperty {
    /// Single-valued navigation to `target`
    pub fn single(name: impl Into<String>, target: SchemaTypeId) -> Self {
        Self {
            name: name.into(),
            target,
            is_collection: false,
            nullable: true,
            contains_target: false,
            partner: None,
        }
    }

    /// Collection-valued navigation to `target`
    pub fn collection(name: impl Into<String>, target: SchemaTypeId) -> Self {
        Self {
            is_collection: true,
            nullable: false,
            ..Self::single(name, target)
        }
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }

    pub fn contained(mut self) -> Self {
        self.contains_target = true;
        self
    }

    /// Type of the value produced by following this navigation
    pub fn type_ref(&self) -> TypeRef {
        let entity = TypeRef::entity(self.target, self.nullable);
        if self.is_collection {
            TypeRef::collection(entity.with_nullable(false))
        } else {
            entity
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Property {
    Structural(StructuralProperty),
    Navigation(NavigationProperty),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Self::Structural(p) => &p.name,
            Self::Navigation(p) => &p.name,
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        match self {
            Self::Structural(p) => p.type_ref.clone(),
            Self::Navigation(p) => p.type_ref(),
        }
    }

    pub fn as_navigation(&self) -> Option<&NavigationProperty> {
        match self {
            Self::Navigation(p) => Some(p),
            Self::Structural(_) => None,
        }
    }
}

/// Entity or complex type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredType {
    pub namespace: String,
    pub name: String,
    pub kind: StructuredKind,
    pub base_type: Option<SchemaTypeId>,
    pub is_abstract: bool,
    pub is_open: bool,
    /// Declared (not inherited) properties in declaration order
    pub properties: IndexMap<String, Property>,
    /// Declared key property names; empty on derived entity types
    pub key: Vec<String>,
}

impl StructuredType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn declared_property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub namespace: String,
    pub name: String,
    pub underlying: PrimitiveKind,
    pub is_flags: bool,
    pub members: IndexMap<String, i64>,
}

impl EnumType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Parse a member list such as `Red` or (for flags) `Red,Blue`, or a numeric value
    pub fn parse_value(&self, text: &str) -> Option<i64> {
        if let Ok(numeric) = text.trim().parse::<i64>() {
            return Some(numeric);
        }
        if self.is_flags {
            text.split(',')
                .map(|member| self.members.get(member.trim()).copied())
                .try_fold(0i64, |acc, value| value.map(|v| acc | v))
        } else {
            self.members.get(text.trim()).copied()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaType {
    Structured(StructuredType),
    Enum(EnumType),
}

impl SchemaType {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Structured(t) => &t.namespace,
            Self::Enum(t) => &t.namespace,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Structured(t) => &t.name,
            Self::Enum(t) => &t.name,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace(), self.name())
    }

    pub fn as_structured(&self) -> Option<&StructuredType> {
        match self {
            Self::Structured(t) => Some(t),
            Self::Enum(_) => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match self {
            Self::Enum(t) => Some(t),
            Self::Structured(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> EnumType {
        let mut members = IndexMap::new();
        members.insert("Red".to_string(), 1);
        members.insert("Green".to_string(), 2);
        members.insert("Blue".to_string(), 4);
        EnumType {
            namespace: "NS".into(),
            name: "Color".into(),
            underlying: PrimitiveKind::Int32,
            is_flags: true,
            members,
        }
    }

    #[test]
    fn test_flags_enum_value_parsing() {
        let color = color();
        assert_eq!(color.parse_value("Red"), Some(1));
        assert_eq!(color.parse_value("Red,Blue"), Some(5));
        assert_eq!(color.parse_value("6"), Some(6));
        assert_eq!(color.parse_value("Red,Purple"), None);
    }

    #[test]
    fn test_non_flags_enum_rejects_member_lists() {
        let color = EnumType {
            is_flags: false,
            ..color()
        };
        assert_eq!(color.parse_value("Green"), Some(2));
        assert_eq!(color.parse_value("Red,Blue"), None);
    }
}
