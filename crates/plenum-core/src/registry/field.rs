//! Field descriptors: scalar types, relation targets and constraints.

use regex::Regex;
use serde_json::Value;
use std::fmt;

/// Scalar value kinds a field (or an array field's elements) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Bounded string (256 characters unless `maxLength` says otherwise).
    String,
    /// Unbounded string.
    Text,
    /// Integer.
    Number,
    /// Any JSON number.
    Float,
    /// Decimal literal kept as a string, six fractional digits.
    Decimal,
    Boolean,
    /// Seconds since the Unix epoch.
    Timestamp,
    /// `#rrggbb`, lowercase hex.
    Color,
    HtmlStrict,
    HtmlPermissive,
    Json,
}

impl ScalarType {
    /// Default maximum length of a [`ScalarType::String`] value.
    pub const STRING_MAX_LENGTH: usize = 256;

    /// The type name used in `models.yml`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Number => "number",
            Self::Float => "float",
            Self::Decimal => "decimal(6)",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Color => "color",
            Self::HtmlStrict => "HTMLStrict",
            Self::HtmlPermissive => "HTMLPermissive",
            Self::Json => "JSON",
        }
    }

    /// Parse a scalar type name as written in `models.yml`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let scalar = match raw {
            "string" => Self::String,
            "text" => Self::Text,
            "number" => Self::Number,
            "float" => Self::Float,
            "decimal" | "decimal(6)" => Self::Decimal,
            "boolean" => Self::Boolean,
            "timestamp" => Self::Timestamp,
            "color" => Self::Color,
            "HTMLStrict" => Self::HtmlStrict,
            "HTMLPermissive" => Self::HtmlPermissive,
            "JSON" => Self::Json,
            _ => return None,
        };
        Some(scalar)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a relation: the collection on the other end and the field
/// there that points back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationTarget {
    pub collection: String,
    pub field: String,
}

impl RelationTarget {
    #[must_use]
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for RelationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.field)
    }
}

/// The declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarType),
    /// Ordered sequence of one scalar kind (`string[]`, `number[]`).
    Array(ScalarType),
    Relation(RelationTarget),
    RelationList(RelationTarget),
    /// Points to one model of one of several collections; value is an fqid.
    GenericRelation(Vec<RelationTarget>),
    GenericRelationList(Vec<RelationTarget>),
}

impl FieldType {
    /// Type name used in error messages, matching `models.yml`.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Scalar(scalar) => scalar.as_str().to_string(),
            Self::Array(scalar) => format!("{}[]", scalar.as_str()),
            Self::Relation(_) => "relation".to_string(),
            Self::RelationList(_) => "relation-list".to_string(),
            Self::GenericRelation(_) => "generic-relation".to_string(),
            Self::GenericRelationList(_) => "generic-relation-list".to_string(),
        }
    }

    #[must_use]
    pub const fn is_relation(&self) -> bool {
        !matches!(self, Self::Scalar(_) | Self::Array(_))
    }

    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(
            self,
            Self::Array(_) | Self::RelationList(_) | Self::GenericRelationList(_)
        )
    }

    #[must_use]
    pub const fn is_generic(&self) -> bool {
        matches!(self, Self::GenericRelation(_) | Self::GenericRelationList(_))
    }

    /// All relation targets declared by this field (empty for scalars).
    #[must_use]
    pub fn targets(&self) -> &[RelationTarget] {
        match self {
            Self::Scalar(_) | Self::Array(_) => &[],
            Self::Relation(target) | Self::RelationList(target) => std::slice::from_ref(target),
            Self::GenericRelation(targets) | Self::GenericRelationList(targets) => targets,
        }
    }

    /// The target for `collection`, if this relation may point there.
    #[must_use]
    pub fn target_for(&self, collection: &str) -> Option<&RelationTarget> {
        self.targets().iter().find(|t| t.collection == collection)
    }
}

/// What happens to referencing models when the referenced model is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    #[default]
    SetNull,
    Cascade,
    Protect,
}

impl OnDelete {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SET_NULL" => Some(Self::SetNull),
            "CASCADE" => Some(Self::Cascade),
            "PROTECT" => Some(Self::Protect),
            _ => None,
        }
    }
}

/// Value constraints beyond the scalar type.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    /// Allowed values; for array fields each element must be allowed.
    pub enum_values: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

impl Constraints {
    #[must_use]
    pub fn allows_enum_value(&self, value: &Value) -> bool {
        self.enum_values
            .as_ref()
            .is_none_or(|allowed| allowed.contains(value))
    }
}

/// A field declared on a collection.
#[derive(Debug, Clone)]
pub struct Field {
    pub collection: String,
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub constraints: Constraints,
    pub on_delete: OnDelete,
    /// Fields whose values must coincide on both ends of the relation.
    pub equal_fields: Vec<String>,
    /// Value is derived from other fields and recomputed by the checker.
    pub calculated: bool,
}

impl Field {
    /// `collection/field`, used in registry diagnostics.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.collection, self.name)
    }

    /// Required fields and fields with a default must be present in every
    /// instance.
    #[must_use]
    pub const fn must_be_present(&self) -> bool {
        self.required || self.default.is_some()
    }
}
