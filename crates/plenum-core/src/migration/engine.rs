use serde::Serialize;
use std::time::Duration;

use super::{
    EventMigration, MigrationError, MigrationRegistry, MigrationStep, ModelMigration,
    RewriteRequest, StepError,
};
use crate::checker::{Checker, CheckerConfig, Mode};
use crate::event::{Event, Position};
use crate::history::History;
use crate::registry::ModelRegistry;
use crate::snapshot::Snapshot;
use crate::store::{EventLog, EventStore};
use crate::timing::timed;

/// Default time to wait for the event log writer lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: u64,
    pub to: u64,
    /// Names of the applied steps, in order.
    pub applied: Vec<&'static str>,
    /// Number of positions in the resulting log.
    pub positions: usize,
    /// Whether the result passed the consistency check.
    pub verified: bool,
}

impl MigrationReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Runs registered migrations against an event store.
#[derive(Debug)]
pub struct Migrator<'a> {
    registry: &'a ModelRegistry,
    migrations: MigrationRegistry,
    lock_timeout: Duration,
}

impl<'a> Migrator<'a> {
    #[must_use]
    pub const fn new(registry: &'a ModelRegistry, migrations: MigrationRegistry) -> Self {
        Self {
            registry,
            migrations,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// The backend migration index: the latest registered target.
    #[must_use]
    pub fn latest(&self) -> u64 {
        self.migrations.latest()
    }

    /// Apply every pending step up to `target`.
    ///
    /// All steps run on an in-memory copy of the log. The store is written
    /// once, after the last step and, when `target` is the backend index,
    /// after the consistency check passed. Any failure leaves the store
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] for invalid targets, failing steps, a
    /// failing consistency check and store errors.
    pub fn migrate_to(
        &mut self,
        store: &mut dyn EventStore,
        target: u64,
    ) -> Result<MigrationReport, MigrationError> {
        let _lock = store.lock_exclusive(self.lock_timeout)?;
        let log = store.load()?;
        let current = log.migration_index;
        let latest = self.latest();

        if current > latest {
            return Err(MigrationError::UnknownIndex { current, latest });
        }
        if target < current {
            return Err(MigrationError::TargetBelowCurrent { current, target });
        }
        if target > latest {
            return Err(MigrationError::TargetBeyondLatest { target, latest });
        }

        let registry = self.registry;
        let mut positions = log.positions;
        let mut applied = Vec::new();
        for step in self.migrations.pending_mut(current, target) {
            let index = step.target_migration_index();
            let name = step.name();
            let _span = tracing::info_span!("migration", index, name).entered();

            positions = timed(&format!("migration.{name}"), || match step {
                MigrationStep::Event(step) => run_event_step(step.as_mut(), registry, positions),
                MigrationStep::Model(step) => run_model_step(step.as_mut(), positions),
            })
            .map_err(|source| MigrationError::Step {
                target: index,
                name,
                source,
            })?;

            tracing::info!(positions = positions.len(), "migration applied");
            applied.push(name);
        }

        let verified = target == latest;
        if verified {
            self.verify(&positions, latest)?;
        }
        if !applied.is_empty() {
            store.replace(&EventLog {
                migration_index: target,
                positions: positions.clone(),
            })?;
        }

        Ok(MigrationReport {
            from: current,
            to: target,
            applied,
            positions: positions.len(),
            verified,
        })
    }

    /// Migrate to the backend index and check the whole dataset.
    ///
    /// # Errors
    ///
    /// See [`Migrator::migrate_to`].
    pub fn finalize(&mut self, store: &mut dyn EventStore) -> Result<MigrationReport, MigrationError> {
        let latest = self.latest();
        self.migrate_to(store, latest)
    }

    /// Replay the store into a snapshot and check it with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Replay`] if the log cannot be replayed and
    /// [`MigrationError::Verification`] if the snapshot is inconsistent.
    pub fn export(
        &self,
        store: &dyn EventStore,
        config: CheckerConfig,
    ) -> Result<Snapshot, MigrationError> {
        let _lock = store.lock_shared(self.lock_timeout)?;
        let log = store.load()?;
        let mut snapshot = timed("export.replay", || History::replay(&log.positions))?
            .to_snapshot(log.migration_index);
        Checker::new(self.registry, config)
            .with_backend_migration_index(self.latest())
            .run(&mut snapshot)?;
        Ok(snapshot)
    }

    fn verify(&self, positions: &[Position], migration_index: u64) -> Result<(), MigrationError> {
        let mut snapshot = History::replay(positions)?.to_snapshot(migration_index);
        let config = CheckerConfig::default().with_mode(Mode::All);
        timed("migration.verify", || {
            Checker::new(self.registry, config)
                .with_backend_migration_index(migration_index)
                .run(&mut snapshot)
        })?;
        tracing::debug!(instances = snapshot.len(), "migrated data verified");
        Ok(())
    }
}

/// Migrate position by position; each position sees the migrated state of
/// all earlier positions. Positions left without events are dropped.
fn run_event_step(
    step: &mut dyn EventMigration,
    registry: &ModelRegistry,
    positions: Vec<Position>,
) -> Result<Vec<Position>, StepError> {
    step.prepare(registry);
    let mut history = History::new();
    let mut migrated = Vec::with_capacity(positions.len());

    for position in positions {
        step.position_init(&history);
        let mut events = Vec::with_capacity(position.events.len());
        for event in &position.events {
            match step.migrate_event(event, &history)? {
                None => events.push(event.clone()),
                Some(replacement) => events.extend(replacement),
            }
        }
        events.extend(step.additional_events(&history)?);
        history.apply_all(&events)?;

        if events.is_empty() {
            tracing::debug!(position = position.position, "position elided");
            continue;
        }
        migrated.push(Position { events, ..position });
    }
    Ok(migrated)
}

/// Append the step's rewrite requests as one new position.
fn run_model_step(
    step: &mut dyn ModelMigration,
    mut positions: Vec<Position>,
) -> Result<Vec<Position>, StepError> {
    let mut history = History::replay(&positions)?;
    let requests = step.migrate_models(&history)?;
    if requests.is_empty() {
        return Ok(positions);
    }

    let events: Vec<Event> = requests
        .into_iter()
        .map(RewriteRequest::into_event)
        .collect();
    history.apply_all(&events)?;

    let next = positions.last().map_or(1, |p| p.position + 1);
    positions.push(Position::now(next, events));
    Ok(positions)
}
