//! Laws of the migration engine over the built-in chain.
//!
//! Each test starts from the same legacy event log (migration index 1) and
//! checks one property of `Migrator`: stepwise and direct migration agree,
//! no step is skipped, the store is written atomically, and the result of a
//! full migration is consistent.

mod common;

use plenum_core::checker::{CheckerConfig, Mode};
use plenum_core::event::{Event, Position};
use plenum_core::fqid::Fqid;
use plenum_core::history::History;
use plenum_core::lock::LogLock;
use plenum_core::migration::{
    EventMigration, MigrationError, MigrationRegistry, MigrationStep, Migrator, StepError,
};
use plenum_core::registry::ModelRegistry;
use plenum_core::snapshot::Snapshot;
use plenum_core::store::{
    EventLog, EventStore, FileEventStore, LOCK_FILE, MemoryEventStore, StoreError,
};
use plenum_core::LATEST_MIGRATION_INDEX;
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn registry() -> ModelRegistry {
    ModelRegistry::builtin().expect("built-in models load")
}

fn builtin() -> MigrationRegistry {
    MigrationRegistry::builtin().expect("built-in chain is gapless")
}

fn legacy_store() -> MemoryEventStore {
    MemoryEventStore::new(1, common::legacy_log())
}

fn replayed(log: &EventLog) -> Snapshot {
    History::replay(&log.positions)
        .expect("migrated log replays")
        .to_snapshot(log.migration_index)
}

#[test]
fn stepwise_migration_equals_direct_migration() {
    let registry = registry();

    let mut stepwise = legacy_store();
    for target in 2..=LATEST_MIGRATION_INDEX {
        let report = Migrator::new(&registry, builtin())
            .migrate_to(&mut stepwise, target)
            .expect("single step succeeds");
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.to, target);
    }

    let mut direct = legacy_store();
    let report = Migrator::new(&registry, builtin())
        .finalize(&mut direct)
        .expect("finalize succeeds");
    assert_eq!(report.from, 1);
    assert!(report.verified);
    assert_eq!(direct.writes(), 1);

    assert_eq!(stepwise.log().migration_index, direct.log().migration_index);
    assert_eq!(replayed(stepwise.log()), replayed(direct.log()));
}

#[test]
fn intermediate_target_applies_every_step_below_it() {
    let registry = registry();
    let mut store = legacy_store();
    let report = Migrator::new(&registry, builtin())
        .migrate_to(&mut store, 3)
        .expect("migration to 3 succeeds");

    assert_eq!(
        report.applied,
        vec!["user_committee_management", "color_normalization"]
    );
    assert!(!report.verified);
    assert_eq!(store.log().migration_index, 3);

    let snapshot = replayed(store.log());
    let theme = snapshot.instance("theme", 1).expect("theme exists");
    assert_eq!(theme["accent_500"], json!("#00aaff"));
    assert_eq!(theme["headbar"], json!("#abcdef"));
    let user = snapshot.instance("user", 1).expect("user exists");
    assert_eq!(user["committee_management_ids"], json!([1]));
}

#[test]
fn legacy_management_levels_are_rewritten_into_relations() {
    let registry = registry();
    let mut store = legacy_store();
    Migrator::new(&registry, builtin())
        .migrate_to(&mut store, 2)
        .expect("migration to 2 succeeds");

    let positions = &store.log().positions;
    assert_eq!(positions.len(), 4);
    assert_eq!(
        positions[2].events,
        vec![
            common::create(
                "user",
                1,
                json!({
                    "username": "admin",
                    "is_active": true,
                    "default_vote_weight": "1.000000",
                    "committee_management_ids": [1]
                }),
            ),
            Event::list_add(Fqid::new("committee", 1), "manager_ids", vec![json!(1)]),
        ]
    );
    assert_eq!(positions[2].timestamp, common::legacy_log()[2].timestamp);
}

#[test]
fn finalized_log_exports_as_consistent_snapshot() {
    let registry = registry();
    let mut store = legacy_store();
    let mut migrator = Migrator::new(&registry, builtin());
    migrator.finalize(&mut store).expect("finalize succeeds");

    let snapshot = migrator
        .export(&store, CheckerConfig::default().with_mode(Mode::All))
        .expect("export is consistent");
    assert_eq!(snapshot.migration_index(), Some(LATEST_MIGRATION_INDEX));

    let child = snapshot
        .instance("meeting_mediafile", 11)
        .expect("meeting_mediafile/11 exists");
    assert_eq!(child["is_public"], json!(false));
    assert_eq!(child["inherited_access_group_ids"], json!([2]));
    let group = snapshot.instance("group", 2).expect("group/2 exists");
    assert_eq!(group["meeting_mediafile_inherited_access_group_ids"], json!([11]));
    let committee = snapshot.instance("committee", 1).expect("committee/1 exists");
    assert_eq!(committee["manager_ids"], json!([1]));
}

#[test]
fn finalize_twice_is_a_noop() {
    let registry = registry();
    let mut store = legacy_store();
    Migrator::new(&registry, builtin())
        .finalize(&mut store)
        .expect("first finalize succeeds");
    let before = store.log().clone();

    let report = Migrator::new(&registry, builtin())
        .finalize(&mut store)
        .expect("second finalize succeeds");
    assert!(report.is_noop());
    assert!(report.verified);
    assert_eq!(store.writes(), 1);
    assert_eq!(store.log(), &before);
}

#[test]
fn inconsistent_result_is_not_written() {
    let registry = registry();
    let mut positions = common::legacy_log();
    positions.push(common::position(
        5,
        vec![common::update("organization", 1, json!({"theme_ids": null}))],
    ));
    let mut store = MemoryEventStore::new(1, positions);
    let original = store.log().clone();

    let err = Migrator::new(&registry, builtin())
        .finalize(&mut store)
        .expect_err("broken reverse relation");
    let MigrationError::Verification(failure) = err else {
        panic!("expected a verification failure, got {err}");
    };
    assert!(failure
        .errors
        .iter()
        .any(|e| e.contains("organization/1/theme_ids")));
    assert_eq!(store.writes(), 0);
    assert_eq!(store.log(), &original);

    Migrator::new(&registry, builtin())
        .migrate_to(&mut store, 3)
        .expect("intermediate targets are not verified");
    assert_eq!(store.writes(), 1);
}

fn legacy_log_with(extra: Vec<Position>) -> MemoryEventStore {
    let mut positions = common::legacy_log();
    positions.extend(extra);
    MemoryEventStore::new(1, positions)
}

#[test]
fn deleted_manager_leaves_committee_managers() {
    let registry = registry();
    let mut store = legacy_log_with(vec![common::position(
        5,
        vec![Event::Delete {
            fqid: Fqid::new("user", 1),
        }],
    )]);

    let mut migrator = Migrator::new(&registry, builtin());
    let report = migrator.finalize(&mut store).expect("finalize succeeds");
    assert!(report.verified);

    let snapshot = replayed(store.log());
    assert!(snapshot.instance("user", 1).is_none());
    let committee = snapshot.instance("committee", 1).expect("committee/1 exists");
    assert_eq!(committee["manager_ids"], json!([]));
}

#[test]
fn restored_manager_is_listed_again() {
    let registry = registry();
    let mut store = legacy_log_with(vec![
        common::position(
            5,
            vec![Event::Delete {
                fqid: Fqid::new("user", 1),
            }],
        ),
        common::position(
            6,
            vec![Event::Restore {
                fqid: Fqid::new("user", 1),
            }],
        ),
    ]);

    let mut migrator = Migrator::new(&registry, builtin());
    migrator.finalize(&mut store).expect("finalize succeeds");
    let snapshot = migrator
        .export(&store, CheckerConfig::default().with_mode(Mode::All))
        .expect("export is consistent");
    let committee = snapshot.instance("committee", 1).expect("committee/1 exists");
    assert_eq!(committee["manager_ids"], json!([1]));
    let user = snapshot.instance("user", 1).expect("user/1 is restored");
    assert_eq!(user["committee_management_ids"], json!([1]));
}

#[test]
fn color_step_leaves_non_color_fields_alone() {
    let registry = registry();
    let mut store = legacy_log_with(vec![common::position(
        5,
        vec![common::update("theme", 1, json!({"name": "#ABCDEF"}))],
    )]);
    Migrator::new(&registry, builtin())
        .finalize(&mut store)
        .expect("finalize succeeds");

    let snapshot = replayed(store.log());
    let theme = snapshot.instance("theme", 1).expect("theme exists");
    assert_eq!(theme["name"], json!("#ABCDEF"));
    assert_eq!(theme["headbar"], json!("#abcdef"));
}

#[test]
fn invalid_targets_are_rejected() {
    let registry = registry();
    let mut store = MemoryEventStore::new(3, common::legacy_log());
    let mut migrator = Migrator::new(&registry, builtin());

    assert!(matches!(
        migrator.migrate_to(&mut store, 2),
        Err(MigrationError::TargetBelowCurrent { current: 3, target: 2 })
    ));
    assert!(matches!(
        migrator.migrate_to(&mut store, LATEST_MIGRATION_INDEX + 1),
        Err(MigrationError::TargetBeyondLatest { .. })
    ));

    let mut future = MemoryEventStore::new(LATEST_MIGRATION_INDEX + 1, common::legacy_log());
    assert!(matches!(
        migrator.finalize(&mut future),
        Err(MigrationError::UnknownIndex { .. })
    ));
    assert_eq!(store.writes() + future.writes(), 0);
}

#[test]
fn file_store_is_migrated_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = EventLog {
        migration_index: 1,
        positions: common::legacy_log(),
    };
    FileEventStore::create(dir.path(), &log).expect("create log");

    let registry = registry();
    let mut store = FileEventStore::open(dir.path()).expect("open log");
    let report = Migrator::new(&registry, builtin())
        .finalize(&mut store)
        .expect("finalize succeeds");
    assert_eq!(report.to, LATEST_MIGRATION_INDEX);

    let reopened = FileEventStore::open(dir.path()).expect("reopen log");
    assert_eq!(
        reopened.migration_index().expect("readable"),
        LATEST_MIGRATION_INDEX
    );
    assert_eq!(reopened.positions().expect("readable").len(), 5);
}

#[test]
fn held_writer_lock_blocks_migration_and_export() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = EventLog {
        migration_index: 1,
        positions: common::legacy_log(),
    };
    let mut store = FileEventStore::create(dir.path(), &log).expect("create log");
    let _held = LogLock::write(&dir.path().join(LOCK_FILE), Duration::from_millis(50))
        .expect("first writer gets the lock");

    let registry = registry();
    let mut migrator =
        Migrator::new(&registry, builtin()).with_lock_timeout(Duration::from_millis(20));
    let err = migrator
        .finalize(&mut store)
        .expect_err("lock is held elsewhere");
    assert!(matches!(err, MigrationError::Store(StoreError::Lock(_))), "{err}");

    let err = migrator
        .export(&store, CheckerConfig::default().with_mode(Mode::All))
        .expect_err("reader waits for the writer");
    assert!(matches!(err, MigrationError::Store(StoreError::Lock(_))), "{err}");
    assert_eq!(store.migration_index().expect("readable"), 1);
}

/// Keeps every event until the `fail_at`-th one, which fails.
struct FailAt {
    fail_at: usize,
    seen: usize,
}

impl EventMigration for FailAt {
    fn target_migration_index(&self) -> u64 {
        2
    }

    fn name(&self) -> &'static str {
        "fail_at"
    }

    fn migrate_event(
        &mut self,
        event: &Event,
        _history: &History,
    ) -> Result<Option<Vec<Event>>, StepError> {
        self.seen += 1;
        if self.seen == self.fail_at {
            return Err(StepError::invalid(event.fqid(), "refusing to migrate"));
        }
        Ok(Some(vec![event.clone()]))
    }
}

fn topic_log(len: usize) -> Vec<Position> {
    (1..=len as u64)
        .map(|id| {
            common::position(
                id,
                vec![common::create("topic", id, json!({"title": format!("t{id}")}))],
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn failing_step_leaves_store_untouched(
        (len, fail_at) in (1_usize..12).prop_flat_map(|len| (Just(len), 1..=len)),
    ) {
        let registry = registry();
        let mut migrations = MigrationRegistry::new();
        migrations
            .register(MigrationStep::Event(Box::new(FailAt { fail_at, seen: 0 })))
            .expect("first step targets index 2");

        let mut store = MemoryEventStore::new(1, topic_log(len));
        let original = store.log().clone();

        let err = Migrator::new(&registry, migrations)
            .migrate_to(&mut store, 2)
            .expect_err("step fails");
        let is_step_failure = matches!(err, MigrationError::Step { target: 2, name: "fail_at", .. });
        prop_assert!(is_step_failure);
        prop_assert_eq!(store.writes(), 0);
        prop_assert_eq!(store.log(), &original);
    }
}
