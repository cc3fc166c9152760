//! Shared fixtures: a small organization with one meeting, as an event log
//! at migration index 1 and as consistent snapshots at the latest index.

#![allow(dead_code)]

use plenum_core::event::{Event, Position};
use plenum_core::fqid::Fqid;
use plenum_core::snapshot::Instance;
use serde_json::{Value, json};

pub const BASE_TS: i64 = 1_708_012_200;

pub fn fields(value: Value) -> Instance {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture fields must be an object, got {other}"),
    }
}

pub fn create(collection: &str, id: u64, value: Value) -> Event {
    Event::Create {
        fqid: Fqid::new(collection, id),
        fields: fields(value),
    }
}

pub fn update(collection: &str, id: u64, value: Value) -> Event {
    Event::Update {
        fqid: Fqid::new(collection, id),
        fields: fields(value),
    }
}

pub fn position(number: u64, events: Vec<Event>) -> Position {
    Position {
        position: number,
        timestamp: BASE_TS + i64::try_from(number).unwrap_or_default(),
        user_id: Some(1),
        events,
    }
}

/// Organization, theme and committee.
pub fn organization_events() -> Vec<Event> {
    vec![
        create(
            "organization",
            1,
            json!({"name": "Org", "theme_id": 1, "theme_ids": [1], "committee_ids": [1]}),
        ),
        create(
            "theme",
            1,
            json!({
                "name": "Default",
                "accent_500": "#00AAFF", "primary_500": "#000000", "warn_500": "#FF0000",
                "organization_id": 1, "theme_for_organization_id": 1
            }),
        ),
        create(
            "committee",
            1,
            json!({"name": "Board", "organization_id": 1, "meeting_ids": [1]}),
        ),
    ]
}

/// One meeting with a public directory holding a file restricted to group 2.
/// The stored visibility of the file is stale.
pub fn meeting_events() -> Vec<Event> {
    vec![
        create(
            "meeting",
            1,
            json!({
                "name": "Assembly", "language": "en", "committee_id": 1,
                "default_group_id": 2, "group_ids": [2],
                "mediafile_ids": [1, 2], "meeting_mediafile_ids": [10, 11]
            }),
        ),
        create(
            "group",
            2,
            json!({
                "name": "Delegates", "meeting_id": 1, "default_group_for_meeting_id": 1,
                "meeting_mediafile_access_group_ids": [11]
            }),
        ),
        create(
            "mediafile",
            1,
            json!({
                "title": "Documents", "is_directory": true, "child_ids": [2],
                "owner_id": "meeting/1", "meeting_mediafile_ids": [10]
            }),
        ),
        create(
            "mediafile",
            2,
            json!({
                "title": "Agenda.pdf", "parent_id": 1,
                "owner_id": "meeting/1", "meeting_mediafile_ids": [11]
            }),
        ),
        create(
            "meeting_mediafile",
            10,
            json!({"meeting_id": 1, "mediafile_id": 1, "is_public": true}),
        ),
        create(
            "meeting_mediafile",
            11,
            json!({"meeting_id": 1, "mediafile_id": 2, "access_group_ids": [2], "is_public": true}),
        ),
    ]
}

/// A user managing committee 1 through the legacy template fields.
pub fn legacy_manager_event() -> Event {
    create(
        "user",
        1,
        json!({
            "username": "admin",
            "is_active": true,
            "default_vote_weight": "1.000000",
            "committee_$_management_level": ["can_manage"],
            "committee_$1_management_level": "can_manage"
        }),
    )
}

/// The whole dataset at migration index 1.
pub fn legacy_log() -> Vec<Position> {
    vec![
        position(1, organization_events()),
        position(2, meeting_events()),
        position(3, vec![legacy_manager_event()]),
        position(4, vec![update("theme", 1, json!({"headbar": "#ABCDEF"}))]),
    ]
}

/// One meeting as a snapshot at `migration_index`, with correct visibility
/// unless `child_public` says otherwise.
pub fn meeting_snapshot(migration_index: u64, child_public: bool) -> Value {
    json!({
        "_migration_index": migration_index,
        "meeting": {"1": {
            "id": 1, "name": "Assembly", "language": "en", "committee_id": 1,
            "default_group_id": 2, "group_ids": [2],
            "mediafile_ids": [1, 2], "meeting_mediafile_ids": [10, 11]
        }},
        "group": {"2": {
            "id": 2, "name": "Delegates", "meeting_id": 1, "default_group_for_meeting_id": 1,
            "meeting_mediafile_access_group_ids": [11],
            "meeting_mediafile_inherited_access_group_ids": [11]
        }},
        "mediafile": {
            "1": {
                "id": 1, "title": "Documents", "is_directory": true, "child_ids": [2],
                "owner_id": "meeting/1", "meeting_mediafile_ids": [10]
            },
            "2": {
                "id": 2, "title": "Agenda.pdf", "parent_id": 1,
                "owner_id": "meeting/1", "meeting_mediafile_ids": [11]
            }
        },
        "meeting_mediafile": {
            "10": {"id": 10, "meeting_id": 1, "mediafile_id": 1, "is_public": true},
            "11": {
                "id": 11, "meeting_id": 1, "mediafile_id": 2, "access_group_ids": [2],
                "is_public": child_public, "inherited_access_group_ids": [2]
            }
        }
    })
}

/// The minimal organization-wide snapshot.
pub fn organization_snapshot(migration_index: u64) -> Value {
    json!({
        "_migration_index": migration_index,
        "organization": {"1": {"id": 1, "theme_id": 1, "theme_ids": [1]}},
        "theme": {"1": {
            "id": 1, "name": "T",
            "accent_500": "#000000", "primary_500": "#000000", "warn_500": "#000000",
            "organization_id": 1, "theme_for_organization_id": 1
        }}
    })
}
