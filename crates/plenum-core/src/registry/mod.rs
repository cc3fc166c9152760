//! The model registry: collections, their fields and the relations between
//! them.
//!
//! The registry is built once at process start (usually from the embedded
//! `models.yml` via [`ModelRegistry::builtin`]) and is immutable afterwards.
//! The checker and the migration engine receive it by reference.
//!
//! ```
//! use plenum_core::registry::ModelRegistry;
//!
//! let registry = ModelRegistry::builtin().unwrap();
//! let field = registry.field("motion", "state_id").unwrap();
//! assert!(field.required);
//! assert_eq!(field.field_type.targets()[0].collection, "motion_state");
//! ```

pub mod field;
mod loader;

pub use field::{Constraints, Field, FieldType, OnDelete, RelationTarget, ScalarType};

use std::collections::{BTreeMap, HashMap};

use crate::error::ErrorCode;

/// The `models.yml` shipped with this crate, describing the schema at
/// [`crate::migration::LATEST_MIGRATION_INDEX`].
pub const BUILTIN_MODELS: &str = include_str!("models.yml");

/// Collections that belong to a meeting export without carrying a
/// `meeting_id` of their own.
const MEETING_BOUNDARY_EXTRAS: [&str; 3] = ["meeting", "user", "mediafile"];

/// Errors raised while loading or querying the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("unknown field '{collection}/{field}'")]
    UnknownField { collection: String, field: String },

    #[error("models document is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("models document is malformed: {0}")]
    Malformed(String),

    #[error("{collection}/{field}: unknown option '{key}'")]
    UnknownOption {
        collection: String,
        field: String,
        key: String,
    },

    #[error("{collection}/{field}: unknown type '{type_name}'")]
    UnknownType {
        collection: String,
        field: String,
        type_name: String,
    },

    #[error("{collection}/{field}: invalid option '{key}': {reason}")]
    InvalidOption {
        collection: String,
        field: String,
        key: String,
        reason: String,
    },

    #[error("{field}: relation to {target} is not mirrored: {reason}")]
    ReverseMismatch {
        field: String,
        target: String,
        reason: String,
    },
}

impl RegistryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ModelRegistryInvalid
    }
}

/// A collection and its ordered fields.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl Collection {
    pub(crate) fn new(name: String, fields: Vec<Field>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            name,
            fields,
            index,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

/// Immutable declaration of every collection known to the backend.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    collections: BTreeMap<String, Collection>,
}

impl ModelRegistry {
    /// Load the registry from the embedded `models.yml`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the embedded document is inconsistent.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_yaml(BUILTIN_MODELS)
    }

    /// Load a registry from a `models.yml` document.
    ///
    /// Relation symmetry, option keys, type names and defaults are validated
    /// before the registry is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistryError`] found in the document.
    pub fn from_yaml(source: &str) -> Result<Self, RegistryError> {
        let collections = loader::parse_document(source)?;
        let registry = Self {
            collections: collections
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        };
        loader::verify_relations(&registry)?;
        tracing::debug!(
            collections = registry.collections.len(),
            "model registry loaded"
        );
        Ok(registry)
    }

    /// Names of all known collections, sorted.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCollection`] for undeclared names.
    pub fn collection(&self, name: &str) -> Result<&Collection, RegistryError> {
        self.collections
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCollection(name.to_string()))
    }

    /// Ordered field descriptors of `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCollection`] for undeclared names.
    pub fn fields(&self, collection: &str) -> Result<&[Field], RegistryError> {
        self.collection(collection).map(Collection::fields)
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCollection`] or
    /// [`RegistryError::UnknownField`].
    pub fn field(&self, collection: &str, name: &str) -> Result<&Field, RegistryError> {
        self.collection(collection)?
            .field(name)
            .ok_or_else(|| RegistryError::UnknownField {
                collection: collection.to_string(),
                field: name.to_string(),
            })
    }

    /// Whether models of `collection` belong inside a meeting export.
    #[must_use]
    pub fn is_meeting_scoped(&self, collection: &str) -> bool {
        if MEETING_BOUNDARY_EXTRAS.contains(&collection) {
            return true;
        }
        self.collections
            .get(collection)
            .and_then(|c| c.field("meeting_id"))
            .is_some_and(|f| {
                matches!(&f.field_type, FieldType::Relation(t) if t.collection == "meeting")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> ModelRegistry {
        ModelRegistry::builtin().expect("builtin models must load")
    }

    #[test]
    fn builtin_models_load() {
        let registry = builtin();
        let names: Vec<&str> = registry.collections().collect();
        for expected in ["organization", "theme", "meeting", "motion", "meeting_mediafile"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert!(names.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn fields_keep_declaration_order() {
        let registry = builtin();
        let fields = registry.fields("theme").unwrap();
        assert_eq!(fields[0].name, "id");
        assert_eq!(fields[1].name, "name");
        assert_eq!(fields.last().unwrap().name, "theme_for_organization_id");
    }

    #[test]
    fn unknown_lookups_error() {
        let registry = builtin();
        assert!(matches!(
            registry.fields("nope"),
            Err(RegistryError::UnknownCollection(name)) if name == "nope"
        ));
        assert!(matches!(
            registry.field("motion", "nope"),
            Err(RegistryError::UnknownField { .. })
        ));
    }

    #[test]
    fn generic_relation_targets() {
        let registry = builtin();
        let field = registry.field("projection", "content_object_id").unwrap();
        assert!(field.field_type.is_generic());
        let target = field.field_type.target_for("motion").unwrap();
        assert_eq!(target.field, "projection_ids");
        assert!(field.field_type.target_for("user").is_none());
    }

    #[test]
    fn meeting_scope() {
        let registry = builtin();
        assert!(registry.is_meeting_scoped("motion"));
        assert!(registry.is_meeting_scoped("meeting"));
        assert!(registry.is_meeting_scoped("user"));
        assert!(!registry.is_meeting_scoped("committee"));
        assert!(!registry.is_meeting_scoped("organization"));
    }

    #[test]
    fn calculated_and_default_flags() {
        let registry = builtin();
        assert!(registry.field("meeting_mediafile", "is_public").unwrap().calculated);
        let language = registry.field("meeting", "language").unwrap();
        assert_eq!(language.default, Some(serde_json::json!("en")));
        assert!(language.must_be_present());
    }
}
