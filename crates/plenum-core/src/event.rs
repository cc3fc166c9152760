//! Datastore events and positions.
//!
//! Wire forms:
//!
//! ```text
//! { "type": "create",  "fqid": "motion/1", "fields": { ... } }
//! { "type": "update",  "fqid": "motion/1", "fields": { ... } }
//! { "type": "update",  "fqid": "motion/1", "list_fields": { "add": {...}, "remove": {...} } }
//! { "type": "delete",  "fqid": "motion/1" }
//! { "type": "restore", "fqid": "motion/1" }
//! ```
//!
//! A `null` field value in a create or update removes the field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::fqid::Fqid;
use crate::snapshot::Instance;

/// List field name to the values added or removed.
pub type ListChanges = BTreeMap<String, Vec<Value>>;

/// One change to one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create { fqid: Fqid, fields: Instance },
    Update { fqid: Fqid, fields: Instance },
    ListUpdate {
        fqid: Fqid,
        add: ListChanges,
        remove: ListChanges,
    },
    Delete { fqid: Fqid },
    Restore { fqid: Fqid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EventKind {
    Create,
    Update,
    Delete,
    Restore,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ListFieldsRaw {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    add: ListChanges,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    remove: ListChanges,
}

/// Wire shape shared by all event kinds.
#[derive(Debug, Serialize, Deserialize)]
struct EventRaw {
    #[serde(rename = "type")]
    kind: EventKind,
    fqid: Fqid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<Instance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_fields: Option<ListFieldsRaw>,
}

impl Event {
    #[must_use]
    pub const fn fqid(&self) -> &Fqid {
        match self {
            Self::Create { fqid, .. }
            | Self::Update { fqid, .. }
            | Self::ListUpdate { fqid, .. }
            | Self::Delete { fqid }
            | Self::Restore { fqid } => fqid,
        }
    }

    /// Name of the event kind as written on the wire (`list_update` for
    /// list updates).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::ListUpdate { .. } => "list_update",
            Self::Delete { .. } => "delete",
            Self::Restore { .. } => "restore",
        }
    }

    /// A list update adding `values` to `field`.
    #[must_use]
    pub fn list_add(fqid: Fqid, field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::ListUpdate {
            fqid,
            add: BTreeMap::from([(field.into(), values)]),
            remove: ListChanges::new(),
        }
    }

    /// A list update removing `values` from `field`.
    #[must_use]
    pub fn list_remove(fqid: Fqid, field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::ListUpdate {
            fqid,
            add: ListChanges::new(),
            remove: BTreeMap::from([(field.into(), values)]),
        }
    }

    /// Field values carried by a create or update.
    #[must_use]
    pub const fn fields(&self) -> Option<&Instance> {
        match self {
            Self::Create { fields, .. } | Self::Update { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

impl Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = match self.clone() {
            Self::Create { fqid, fields } => EventRaw {
                kind: EventKind::Create,
                fqid,
                fields: Some(fields),
                list_fields: None,
            },
            Self::Update { fqid, fields } => EventRaw {
                kind: EventKind::Update,
                fqid,
                fields: Some(fields),
                list_fields: None,
            },
            Self::ListUpdate { fqid, add, remove } => EventRaw {
                kind: EventKind::Update,
                fqid,
                fields: None,
                list_fields: Some(ListFieldsRaw { add, remove }),
            },
            Self::Delete { fqid } => EventRaw {
                kind: EventKind::Delete,
                fqid,
                fields: None,
                list_fields: None,
            },
            Self::Restore { fqid } => EventRaw {
                kind: EventKind::Restore,
                fqid,
                fields: None,
                list_fields: None,
            },
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = EventRaw::deserialize(deserializer)?;
        let fqid = raw.fqid;
        match (raw.kind, raw.fields, raw.list_fields) {
            (EventKind::Create, fields, None) => Ok(Self::Create {
                fqid,
                fields: fields.unwrap_or_default(),
            }),
            (EventKind::Update, Some(fields), None) => Ok(Self::Update { fqid, fields }),
            (EventKind::Update, None, Some(list)) => Ok(Self::ListUpdate {
                fqid,
                add: list.add,
                remove: list.remove,
            }),
            (EventKind::Update, None, None) => Err(D::Error::custom(format!(
                "update of {fqid} carries neither fields nor list_fields"
            ))),
            (EventKind::Update, Some(_), Some(_)) => Err(D::Error::custom(format!(
                "update of {fqid} carries both fields and list_fields"
            ))),
            (EventKind::Delete, None, None) => Ok(Self::Delete { fqid }),
            (EventKind::Restore, None, None) => Ok(Self::Restore { fqid }),
            (kind, _, _) => Err(D::Error::custom(format!(
                "unexpected payload on {kind:?} event for {fqid}"
            ))),
        }
    }
}

/// All events written in one datastore transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub position: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    pub events: Vec<Event>,
}

impl Position {
    /// A position stamped with the current time and no acting user.
    #[must_use]
    pub fn now(position: u64, events: Vec<Event>) -> Self {
        Self {
            position,
            timestamp: chrono::Utc::now().timestamp(),
            user_id: None,
            events,
        }
    }
}
