//! Replayed model state over an event stream.
//!
//! Migration steps read the dataset through a [`History`]. The engine applies
//! a position's migrated events only after the whole position was migrated,
//! so every read inside a step observes the state before that position.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ErrorCode;
use crate::event::{Event, Position};
use crate::fqid::Fqid;
use crate::snapshot::{Instance, Snapshot};

/// An event that cannot be applied to the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("cannot create {0}: model already exists")]
    AlreadyExists(Fqid),

    #[error("cannot {action} {fqid}: model does not exist")]
    NotFound { action: &'static str, fqid: Fqid },

    #[error("cannot restore {0}: model is not deleted")]
    NotDeleted(Fqid),

    #[error("cannot update list field {field} of {fqid}: current value is not a list")]
    NotAList { fqid: Fqid, field: String },
}

impl HistoryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::EventReplayFailed
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Model {
    fields: Instance,
    deleted: bool,
}

/// Current state of every model ever created, including soft-deleted ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    models: BTreeMap<Fqid, Model>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay positions in order from an empty state.
    ///
    /// # Errors
    ///
    /// Returns the first event that cannot be applied.
    pub fn replay<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Result<Self, HistoryError> {
        let mut history = Self::new();
        for position in positions {
            history.apply_all(&position.events)?;
        }
        Ok(history)
    }

    /// # Errors
    ///
    /// Returns the first event that cannot be applied; earlier events of the
    /// batch stay applied.
    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> Result<(), HistoryError> {
        events.into_iter().try_for_each(|event| self.apply(event))
    }

    /// Apply one event with datastore semantics.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] for creates of existing models, writes to
    /// missing or deleted models, restores of live models and list updates
    /// of non-list fields.
    pub fn apply(&mut self, event: &Event) -> Result<(), HistoryError> {
        match event {
            Event::Create { fqid, fields } => {
                if self.models.contains_key(fqid) {
                    return Err(HistoryError::AlreadyExists(fqid.clone()));
                }
                let mut instance = Instance::new();
                instance.insert("id".to_string(), Value::from(fqid.id));
                merge(&mut instance, fields);
                self.models.insert(
                    fqid.clone(),
                    Model {
                        fields: instance,
                        deleted: false,
                    },
                );
            }
            Event::Update { fqid, fields } => {
                merge(self.live_mut(fqid, "update")?, fields);
            }
            Event::ListUpdate { fqid, add, remove } => {
                let instance = self.live_mut(fqid, "update")?;
                for (field, values) in add {
                    let list = list_mut(instance, fqid, field)?;
                    for value in values {
                        if !list.contains(value) {
                            list.push(value.clone());
                        }
                    }
                }
                for (field, values) in remove {
                    if instance.contains_key(field) {
                        list_mut(instance, fqid, field)?.retain(|v| !values.contains(v));
                    }
                }
            }
            Event::Delete { fqid } => {
                self.live_model_mut(fqid, "delete")?.deleted = true;
            }
            Event::Restore { fqid } => {
                let model = self
                    .models
                    .get_mut(fqid)
                    .ok_or_else(|| HistoryError::NotFound {
                        action: "restore",
                        fqid: fqid.clone(),
                    })?;
                if !model.deleted {
                    return Err(HistoryError::NotDeleted(fqid.clone()));
                }
                model.deleted = false;
            }
        }
        Ok(())
    }

    fn live_model_mut(&mut self, fqid: &Fqid, action: &'static str) -> Result<&mut Model, HistoryError> {
        self.models
            .get_mut(fqid)
            .filter(|model| !model.deleted)
            .ok_or_else(|| HistoryError::NotFound {
                action,
                fqid: fqid.clone(),
            })
    }

    fn live_mut(&mut self, fqid: &Fqid, action: &'static str) -> Result<&mut Instance, HistoryError> {
        self.live_model_mut(fqid, action).map(|model| &mut model.fields)
    }

    /// The model as of now, ignoring deleted models.
    #[must_use]
    pub fn get(&self, fqid: &Fqid) -> Option<&Instance> {
        self.models
            .get(fqid)
            .filter(|model| !model.deleted)
            .map(|model| &model.fields)
    }

    /// The model as of now, including soft-deleted models.
    #[must_use]
    pub fn get_including_deleted(&self, fqid: &Fqid) -> Option<&Instance> {
        self.models.get(fqid).map(|model| &model.fields)
    }

    /// Whether a live (not deleted) model exists.
    #[must_use]
    pub fn exists(&self, fqid: &Fqid) -> bool {
        self.get(fqid).is_some()
    }

    #[must_use]
    pub fn is_deleted(&self, fqid: &Fqid) -> bool {
        self.models.get(fqid).is_some_and(|model| model.deleted)
    }

    /// Live models of `collection` in id order.
    pub fn collection<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = (u64, &'a Instance)> + 'a {
        self.models
            .range(Fqid::new(collection, 0)..)
            .take_while(move |(fqid, _)| fqid.collection == collection)
            .filter(|(_, model)| !model.deleted)
            .map(|(fqid, model)| (fqid.id, &model.fields))
    }

    /// Highest id ever used in `collection`, deleted models included.
    #[must_use]
    pub fn max_id(&self, collection: &str) -> u64 {
        self.models
            .range(Fqid::new(collection, 0)..)
            .take_while(|(fqid, _)| fqid.collection == collection)
            .map(|(fqid, _)| fqid.id)
            .last()
            .unwrap_or(0)
    }

    /// Snapshot of all live models tagged with `migration_index`.
    #[must_use]
    pub fn to_snapshot(&self, migration_index: u64) -> Snapshot {
        let mut snapshot = Snapshot::new(migration_index);
        for (fqid, model) in &self.models {
            if !model.deleted {
                snapshot.insert(&fqid.collection, fqid.id, model.fields.clone());
            }
        }
        snapshot
    }
}

fn merge(instance: &mut Instance, fields: &Instance) {
    for (name, value) in fields {
        if name == "id" {
            continue;
        }
        if value.is_null() {
            instance.remove(name);
        } else {
            instance.insert(name.clone(), value.clone());
        }
    }
}

fn list_mut<'a>(
    instance: &'a mut Instance,
    fqid: &Fqid,
    field: &str,
) -> Result<&'a mut Vec<Value>, HistoryError> {
    instance
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| HistoryError::NotAList {
            fqid: fqid.clone(),
            field: field.to_string(),
        })
}
