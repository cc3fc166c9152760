//! Consistency checker: validates a whole snapshot against the registry.
//!
//! Every problem is collected as a `<collection>/<id>[/<field>]: <message>`
//! line; the checker never stops at the first error. With `repair` set the
//! snapshot is first fixed in place (defaults filled, nominated fields
//! removed), which does not suppress any other error class.

pub mod calculated;
mod relations;
mod special;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ErrorCode;
use crate::fqid::Fqid;
use crate::migration::LATEST_MIGRATION_INDEX;
use crate::registry::{Collection, Field, ModelRegistry};
use crate::snapshot::{Instance, MIGRATION_INDEX_KEY, Snapshot};
use crate::validate::{check_constraints, check_type, is_empty};

use relations::RelationCheck;

/// Meeting fields filled in by the import flow after id reservation; they
/// may be empty in meeting modes.
const MEETING_MODE_EXCEPTIONS: [(&str, &str); 2] = [
    ("meeting", "committee_id"),
    ("meeting", "is_active_in_organization_id"),
];

/// Which part of the dataset the snapshot represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A meeting export from this organization; relations leaving the
    /// meeting are trusted.
    #[default]
    Internal,
    /// A meeting import from elsewhere; relations leaving the meeting are
    /// errors.
    External,
    /// The whole dataset.
    All,
}

impl Mode {
    #[must_use]
    pub const fn is_meeting_mode(self) -> bool {
        matches!(self, Self::Internal | Self::External)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::All => "all",
        })
    }
}

/// How the snapshot's migration index is compared with the backend's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// The index must equal the backend index.
    #[default]
    Strict,
    /// Any index up to the backend index is accepted.
    Permissive,
}

/// Checker options, usually read from the `[checker]` config section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub mode: Mode,
    pub migration_mode: MigrationMode,
    pub repair: bool,
    /// Collection name to fields removed before validation when repairing.
    pub fields_to_remove: BTreeMap<String, Vec<String>>,
}

impl CheckerConfig {
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Every problem found in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .errors.join("\n\t"))]
pub struct CheckFailure {
    pub errors: Vec<String>,
}

impl CheckFailure {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::SnapshotInconsistent
    }
}

/// Schema-driven snapshot validator.
#[derive(Debug, Clone)]
pub struct Checker<'a> {
    registry: &'a ModelRegistry,
    config: CheckerConfig,
    backend_migration_index: u64,
}

impl<'a> Checker<'a> {
    #[must_use]
    pub const fn new(registry: &'a ModelRegistry, config: CheckerConfig) -> Self {
        Self {
            registry,
            config,
            backend_migration_index: LATEST_MIGRATION_INDEX,
        }
    }

    /// Override the backend migration index the snapshot is compared with.
    #[must_use]
    pub const fn with_backend_migration_index(mut self, migration_index: u64) -> Self {
        self.backend_migration_index = migration_index;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Parse a JSON document and check it, reporting structural and
    /// consistency errors together.
    ///
    /// # Errors
    ///
    /// Returns [`CheckFailure`] with every problem found.
    pub fn check_json(&self, value: Value) -> Result<Snapshot, CheckFailure> {
        let (mut snapshot, mut errors) = Snapshot::parse(value);
        if let Err(failure) = self.run(&mut snapshot) {
            errors.extend(failure.errors);
        }
        if errors.is_empty() {
            Ok(snapshot)
        } else {
            Err(CheckFailure { errors })
        }
    }

    /// Check a parsed snapshot, repairing it in place first if configured.
    ///
    /// # Errors
    ///
    /// Returns [`CheckFailure`] with every problem found.
    pub fn run(&self, snapshot: &mut Snapshot) -> Result<(), CheckFailure> {
        tracing::debug!(
            mode = %self.config.mode,
            repair = self.config.repair,
            instances = snapshot.len(),
            "checking snapshot"
        );
        if self.config.repair {
            self.repair(snapshot);
        }
        let snapshot: &Snapshot = snapshot;

        let mut errors = Vec::new();
        self.check_migration_index(snapshot, &mut errors);

        let relations = RelationCheck {
            registry: self.registry,
            snapshot,
            mode: self.config.mode,
        };
        for name in snapshot.collection_names() {
            let Ok(collection) = self.registry.collection(name) else {
                errors.push(format!("{name}: Unknown collection"));
                continue;
            };
            if self.config.mode.is_meeting_mode() && !self.registry.is_meeting_scoped(name) {
                errors.push(format!(
                    "{name}: Collection is not allowed in mode {}",
                    self.config.mode
                ));
                continue;
            }
            for (id, instance) in snapshot.collection(name).into_iter().flatten() {
                let origin = Fqid::new(name, *id);
                self.check_instance(snapshot, &relations, collection, &origin, instance, &mut errors);
            }
        }

        if errors.is_empty() {
            tracing::debug!("snapshot is consistent");
            Ok(())
        } else {
            tracing::debug!(errors = errors.len(), "snapshot is inconsistent");
            Err(CheckFailure { errors })
        }
    }

    fn repair(&self, snapshot: &mut Snapshot) {
        let names: Vec<String> = snapshot.collection_names().map(str::to_string).collect();
        for name in names {
            let Ok(collection) = self.registry.collection(&name) else {
                continue;
            };
            let remove = self.config.fields_to_remove.get(&name);
            let Some(instances) = snapshot.collection_mut(&name) else {
                continue;
            };
            for instance in instances.values_mut() {
                for field in remove.into_iter().flatten() {
                    instance.remove(field);
                }
                for field in collection.fields() {
                    if let Some(default) = &field.default
                        && !instance.contains_key(&field.name)
                    {
                        instance.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }
    }

    fn check_migration_index(&self, snapshot: &Snapshot, errors: &mut Vec<String>) {
        let backend = self.backend_migration_index;
        match (snapshot.migration_index(), self.config.migration_mode) {
            (None, _) => errors.push(format!("{MIGRATION_INDEX_KEY}: Missing migration index")),
            (Some(mi), MigrationMode::Strict) if mi != backend => errors.push(format!(
                "{MIGRATION_INDEX_KEY}: Datastore has not the correct migration index: {mi} instead of {backend}"
            )),
            (Some(mi), MigrationMode::Permissive) if mi > backend => errors.push(format!(
                "{MIGRATION_INDEX_KEY}: Datastore has a higher migration index than the backend: {mi} > {backend}"
            )),
            _ => {}
        }
    }

    fn is_exempt(&self, collection: &str, field: &str) -> bool {
        self.config.mode.is_meeting_mode() && MEETING_MODE_EXCEPTIONS.contains(&(collection, field))
    }

    fn check_instance(
        &self,
        snapshot: &Snapshot,
        relations: &RelationCheck<'_>,
        collection: &Collection,
        origin: &Fqid,
        instance: &Instance,
        errors: &mut Vec<String>,
    ) {
        let missing: Vec<&str> = collection
            .fields()
            .iter()
            .filter(|f| f.must_be_present() && !instance.contains_key(&f.name))
            .filter(|f| !self.is_exempt(collection.name(), &f.name))
            .map(|f| f.name.as_str())
            .collect();
        if !missing.is_empty() {
            errors.push(format!("{origin}: Missing fields: {}", missing.join(", ")));
        }

        // Orphaned structured fields (`foo_$42_bar`) are tolerated.
        let unknown: Vec<&str> = instance
            .keys()
            .filter(|name| !collection.has_field(name) && !name.contains('$'))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            errors.push(format!("{origin}: Invalid fields: {}", unknown.join(", ")));
        }

        for field in collection.fields() {
            if let Some(value) = instance.get(&field.name) {
                self.check_field(relations, origin, instance, field, value, errors);
            }
        }

        match collection.name() {
            "motion" => special::check_motion(snapshot, origin, instance, errors),
            "meeting_mediafile" => {
                for (field, message) in calculated::verify(snapshot, instance) {
                    errors.push(format!("{}: {message}", origin.fqfield(field)));
                }
            }
            _ => {}
        }
    }

    fn check_field(
        &self,
        relations: &RelationCheck<'_>,
        origin: &Fqid,
        instance: &Instance,
        field: &Field,
        value: &Value,
        errors: &mut Vec<String>,
    ) {
        let fqfield = origin.fqfield(&field.name);
        let exempt = self.is_exempt(&origin.collection, &field.name);

        if is_empty(value) && field.required && !exempt {
            errors.push(format!("{fqfield}: Field required but empty."));
        }
        if value.is_null() {
            return;
        }
        if let Err(err) = check_type(&field.field_type, value) {
            errors.push(format!("{fqfield}: {err}"));
            return;
        }
        if let Err(err) = check_constraints(field, value) {
            errors.push(format!("{fqfield}: {err}"));
        }
        if field.field_type.is_relation() && !exempt {
            relations.check(origin, instance, field, value, errors);
        }
    }
}
