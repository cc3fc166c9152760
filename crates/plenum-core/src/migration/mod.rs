//! Forward migrations of the event log.
//!
//! Every step declares the migration index it produces; the registered steps
//! form a gapless chain starting at [`FIRST_MIGRATION_INDEX`]. Two step
//! shapes exist:
//!
//! - [`EventMigration`] rewrites the log event by event, position by
//!   position, with a [`History`] of the already migrated earlier positions.
//! - [`ModelMigration`] inspects the fully replayed state once and returns
//!   [`RewriteRequest`]s, committed as one new position.
//!
//! [`Migrator`] runs pending steps on an in-memory copy and writes the log
//! once at the end.

mod engine;
pub mod steps;

pub use engine::{DEFAULT_LOCK_TIMEOUT, MigrationReport, Migrator};

use crate::checker::CheckFailure;
use crate::error::ErrorCode;
use crate::event::Event;
use crate::fqid::Fqid;
use crate::history::{History, HistoryError};
use crate::registry::ModelRegistry;
use crate::snapshot::Instance;
use crate::store::StoreError;

/// Migration index of a dataset no step has touched.
pub const FIRST_MIGRATION_INDEX: u64 = 1;

/// Migration index the registry and checker describe.
pub const LATEST_MIGRATION_INDEX: u64 = 4;

/// A step could not rewrite its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("{fqid}: {message}")]
    Invalid { fqid: Fqid, message: String },

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl StepError {
    pub fn invalid(fqid: &Fqid, message: impl Into<String>) -> Self {
        Self::Invalid {
            fqid: fqid.clone(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("a migration to index {0} is already registered")]
    DuplicateTarget(u64),

    #[error("migration to index {found} leaves a gap, expected target {expected}")]
    Gap { expected: u64, found: u64 },

    #[error("cannot migrate to {target}: dataset is already at {current}")]
    TargetBelowCurrent { current: u64, target: u64 },

    #[error("cannot migrate to {target}: latest known migration index is {latest}")]
    TargetBeyondLatest { target: u64, latest: u64 },

    #[error("dataset migration index {current} is unknown to this backend (latest {latest})")]
    UnknownIndex { current: u64, latest: u64 },

    #[error("migration {name} (index {target}) failed: {source}")]
    Step {
        target: u64,
        name: &'static str,
        #[source]
        source: StepError,
    },

    #[error("event log cannot be replayed: {0}")]
    Replay(#[from] HistoryError),

    #[error("migrated data is not consistent:\n\t{0}")]
    Verification(#[from] CheckFailure),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MigrationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateTarget(_) | Self::Gap { .. } => ErrorCode::MigrationChainBroken,
            Self::TargetBelowCurrent { .. }
            | Self::TargetBeyondLatest { .. }
            | Self::UnknownIndex { .. } => ErrorCode::MigrationIndexMismatch,
            Self::Step { .. } => ErrorCode::MigrationStepFailed,
            Self::Replay(_) => ErrorCode::EventReplayFailed,
            Self::Verification(_) => ErrorCode::MigrationVerificationFailed,
            Self::Store(err) => err.code(),
        }
    }
}

/// A step that rewrites individual events.
pub trait EventMigration: Send {
    fn target_migration_index(&self) -> u64;

    fn name(&self) -> &'static str;

    /// Called once before the first position, with the registry the result
    /// is checked against.
    fn prepare(&mut self, _registry: &ModelRegistry) {}

    /// Called before the events of each position.
    fn position_init(&mut self, _history: &History) {}

    /// `Ok(None)` keeps the event; `Ok(Some(events))` replaces it with
    /// `events` (possibly none).
    ///
    /// # Errors
    ///
    /// Returns [`StepError`] to abort the whole migration.
    fn migrate_event(
        &mut self,
        event: &Event,
        history: &History,
    ) -> Result<Option<Vec<Event>>, StepError>;

    /// Events appended after the migrated events of the current position.
    ///
    /// # Errors
    ///
    /// Returns [`StepError`] to abort the whole migration.
    fn additional_events(&mut self, _history: &History) -> Result<Vec<Event>, StepError> {
        Ok(Vec::new())
    }
}

/// A step expressed over the final model state.
pub trait ModelMigration: Send {
    fn target_migration_index(&self) -> u64;

    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// Returns [`StepError`] to abort the whole migration.
    fn migrate_models(&mut self, history: &History) -> Result<Vec<RewriteRequest>, StepError>;
}

/// Coarse-grained write produced by a [`ModelMigration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteRequest {
    Create { fqid: Fqid, fields: Instance },
    /// Set the given fields; `null` removes a field.
    Update { fqid: Fqid, fields: Instance },
    Delete { fqid: Fqid },
    Restore { fqid: Fqid },
}

impl RewriteRequest {
    #[must_use]
    pub fn into_event(self) -> Event {
        match self {
            Self::Create { fqid, fields } => Event::Create { fqid, fields },
            Self::Update { fqid, fields } => Event::Update { fqid, fields },
            Self::Delete { fqid } => Event::Delete { fqid },
            Self::Restore { fqid } => Event::Restore { fqid },
        }
    }
}

/// A registered step of either shape.
pub enum MigrationStep {
    Event(Box<dyn EventMigration>),
    Model(Box<dyn ModelMigration>),
}

impl MigrationStep {
    #[must_use]
    pub fn target_migration_index(&self) -> u64 {
        match self {
            Self::Event(step) => step.target_migration_index(),
            Self::Model(step) => step.target_migration_index(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Event(step) => step.name(),
            Self::Model(step) => step.name(),
        }
    }
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::Event(_) => "event",
            Self::Model(_) => "model",
        };
        f.debug_struct("MigrationStep")
            .field("target", &self.target_migration_index())
            .field("name", &self.name())
            .field("shape", &shape)
            .finish()
    }
}

/// Ordered, gapless chain of steps.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The steps shipped with this crate, up to [`LATEST_MIGRATION_INDEX`].
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] if the built-in chain is broken.
    pub fn builtin() -> Result<Self, MigrationError> {
        let mut registry = Self::new();
        for step in steps::all() {
            registry.register(step)?;
        }
        Ok(registry)
    }

    /// Append a step. Its target must be exactly one above the latest
    /// registered target.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::DuplicateTarget`] or [`MigrationError::Gap`].
    pub fn register(&mut self, step: MigrationStep) -> Result<(), MigrationError> {
        let target = step.target_migration_index();
        if self
            .steps
            .iter()
            .any(|s| s.target_migration_index() == target)
        {
            return Err(MigrationError::DuplicateTarget(target));
        }
        let expected = self.latest() + 1;
        if target != expected {
            return Err(MigrationError::Gap {
                expected,
                found: target,
            });
        }
        tracing::debug!(target, name = step.name(), "migration registered");
        self.steps.push(step);
        Ok(())
    }

    /// Highest target registered, or [`FIRST_MIGRATION_INDEX`] when empty.
    #[must_use]
    pub fn latest(&self) -> u64 {
        self.steps
            .last()
            .map_or(FIRST_MIGRATION_INDEX, MigrationStep::target_migration_index)
    }

    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter()
    }

    /// Steps with `current < target <= until`, in order.
    pub(crate) fn pending_mut(
        &mut self,
        current: u64,
        until: u64,
    ) -> impl Iterator<Item = &mut MigrationStep> {
        self.steps.iter_mut().filter(move |step| {
            let target = step.target_migration_index();
            target > current && target <= until
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(u64);

    impl EventMigration for Noop {
        fn target_migration_index(&self) -> u64 {
            self.0
        }

        fn name(&self) -> &'static str {
            "noop"
        }

        fn migrate_event(
            &mut self,
            _event: &Event,
            _history: &History,
        ) -> Result<Option<Vec<Event>>, StepError> {
            Ok(None)
        }
    }

    fn noop(target: u64) -> MigrationStep {
        MigrationStep::Event(Box::new(Noop(target)))
    }

    #[test]
    fn builtin_chain_reaches_latest() {
        let registry = MigrationRegistry::builtin().unwrap();
        assert_eq!(registry.latest(), LATEST_MIGRATION_INDEX);
        let targets: Vec<u64> = registry
            .steps()
            .map(MigrationStep::target_migration_index)
            .collect();
        assert_eq!(targets, vec![2, 3, 4]);
    }

    #[test]
    fn rejects_duplicate_targets() {
        let mut registry = MigrationRegistry::new();
        registry.register(noop(2)).unwrap();
        let err = registry.register(noop(2)).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateTarget(2)));
        assert_eq!(err.code(), ErrorCode::MigrationChainBroken);
    }

    #[test]
    fn rejects_gaps() {
        let mut registry = MigrationRegistry::new();
        assert!(matches!(
            registry.register(noop(3)),
            Err(MigrationError::Gap {
                expected: 2,
                found: 3
            })
        ));
        registry.register(noop(2)).unwrap();
        registry.register(noop(3)).unwrap();
        assert_eq!(registry.latest(), 3);
    }

    #[test]
    fn rewrite_requests_become_events() {
        let fqid = Fqid::new("topic", 1);
        assert_eq!(
            RewriteRequest::Delete { fqid: fqid.clone() }.into_event(),
            Event::Delete { fqid }
        );
    }
}
