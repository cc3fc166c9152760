//! Dataset snapshots: the on-wire JSON image of a whole dataset.
//!
//! ```json
//! {
//!   "_migration_index": 4,
//!   "motion": { "1": { "id": 1, "title": "..." } }
//! }
//! ```
//!
//! Top-level keys beginning with `_` are reserved metadata. Collection maps
//! are keyed by the decimal id, which must equal the instance's `id` field.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ErrorCode;
use crate::fqid::{Fqid, parse_id};

/// Reserved top-level key holding the dataset's migration index.
pub const MIGRATION_INDEX_KEY: &str = "_migration_index";

/// One model: field name to value, including `id`.
pub type Instance = Map<String, Value>;

/// Errors raised when a JSON document is not a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot is malformed:\n\t{}", .0.join("\n\t"))]
    Malformed(Vec<String>),
}

impl SnapshotError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::SnapshotMalformed
    }
}

/// A parsed snapshot. Collections and instances iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    migration_index: Option<u64>,
    collections: BTreeMap<String, BTreeMap<u64, Instance>>,
}

impl Snapshot {
    #[must_use]
    pub fn new(migration_index: u64) -> Self {
        Self {
            migration_index: Some(migration_index),
            collections: BTreeMap::new(),
        }
    }

    /// Parse a snapshot, rejecting it if any structural error is found.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Malformed`] listing every structural problem.
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        let (snapshot, errors) = Self::parse(value);
        if errors.is_empty() {
            Ok(snapshot)
        } else {
            Err(SnapshotError::Malformed(errors))
        }
    }

    /// # Errors
    ///
    /// Returns [`SnapshotError`] for invalid JSON or a malformed shape.
    pub fn from_json_str(source: &str) -> Result<Self, SnapshotError> {
        Self::from_value(serde_json::from_str(source)?)
    }

    /// Parse leniently: keep everything that has the right shape and report
    /// the rest as `<collection>/<id>[/<field>]: <message>` lines.
    #[must_use]
    pub fn parse(value: Value) -> (Self, Vec<String>) {
        let mut errors = Vec::new();
        let mut snapshot = Self::default();

        let Value::Object(top) = value else {
            errors.push("Snapshot must be a JSON object".to_string());
            return (snapshot, errors);
        };

        for (key, value) in top {
            if key == MIGRATION_INDEX_KEY {
                match value.as_u64() {
                    Some(mi) => snapshot.migration_index = Some(mi),
                    None => errors.push(format!(
                        "{MIGRATION_INDEX_KEY}: must be a non-negative integer, got {value}"
                    )),
                }
                continue;
            }
            if key.starts_with('_') {
                continue;
            }
            let Value::Object(models) = value else {
                errors.push(format!("{key}: Collection must map ids to instances"));
                continue;
            };

            let collection = snapshot.collections.entry(key.clone()).or_default();
            for (raw_id, model) in models {
                let Some(id) = parse_id(&raw_id) else {
                    errors.push(format!("{key}/{raw_id}: Invalid id key"));
                    continue;
                };
                let Value::Object(instance) = model else {
                    errors.push(format!("{key}/{id}: Instance must be an object"));
                    continue;
                };
                if let Some(inner) = instance.get("id")
                    && inner.as_u64() != Some(id)
                {
                    errors.push(format!(
                        "{key}/{id}/id: Id {inner} does not match the key {id}"
                    ));
                }
                collection.insert(id, instance);
            }
        }
        (snapshot, errors)
    }

    /// Render back to the wire shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut top = Map::new();
        if let Some(mi) = self.migration_index {
            top.insert(MIGRATION_INDEX_KEY.to_string(), Value::from(mi));
        }
        for (name, models) in &self.collections {
            let models: Map<String, Value> = models
                .iter()
                .map(|(id, instance)| (id.to_string(), Value::Object(instance.clone())))
                .collect();
            top.insert(name.clone(), Value::Object(models));
        }
        Value::Object(top)
    }

    #[must_use]
    pub const fn migration_index(&self) -> Option<u64> {
        self.migration_index
    }

    pub const fn set_migration_index(&mut self, migration_index: u64) {
        self.migration_index = Some(migration_index);
    }

    /// Collection names present in the snapshot, sorted.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Instances of `collection`; `None` when the collection is absent.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&BTreeMap<u64, Instance>> {
        self.collections.get(name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut BTreeMap<u64, Instance>> {
        self.collections.get_mut(name)
    }

    #[must_use]
    pub fn instance(&self, collection: &str, id: u64) -> Option<&Instance> {
        self.collections.get(collection)?.get(&id)
    }

    #[must_use]
    pub fn get(&self, fqid: &Fqid) -> Option<&Instance> {
        self.instance(&fqid.collection, fqid.id)
    }

    /// Insert or replace an instance. The `id` field is set from `id`.
    pub fn insert(&mut self, collection: &str, id: u64, mut instance: Instance) {
        instance.insert("id".to_string(), Value::from(id));
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, instance);
    }

    /// Total number of instances across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_shape() {
        let snapshot = Snapshot::from_value(json!({
            "_migration_index": 4,
            "_meta": {"ignored": true},
            "motion": {"2": {"id": 2, "title": "b"}, "10": {"id": 10, "title": "c"}},
        }))
        .unwrap();
        assert_eq!(snapshot.migration_index(), Some(4));
        let ids: Vec<u64> = snapshot.collection("motion").unwrap().keys().copied().collect();
        assert_eq!(ids, vec![2, 10]);
        assert_eq!(snapshot.collection_names().collect::<Vec<_>>(), vec!["motion"]);
        assert_eq!(
            snapshot.get(&Fqid::new("motion", 10)).unwrap()["title"],
            json!("c")
        );
    }

    #[test]
    fn collects_every_structural_error() {
        let (_, errors) = Snapshot::parse(json!({
            "_migration_index": "four",
            "motion": {"x": {}, "1": [], "2": {"id": 3}},
            "topic": [],
        }));
        assert_eq!(
            errors,
            vec![
                "_migration_index: must be a non-negative integer, got \"four\"",
                "motion/1: Instance must be an object",
                "motion/2/id: Id 3 does not match the key 2",
                "motion/x: Invalid id key",
                "topic: Collection must map ids to instances",
            ]
        );
    }

    #[test]
    fn missing_migration_index_is_not_structural() {
        let snapshot = Snapshot::from_value(json!({"motion": {}})).unwrap();
        assert_eq!(snapshot.migration_index(), None);
        assert!(snapshot.collection("motion").unwrap().is_empty());
    }

    #[test]
    fn non_object_is_rejected() {
        let err = Snapshot::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn to_value_round_trips() {
        let source = json!({
            "_migration_index": 2,
            "theme": {"1": {"id": 1, "name": "T"}},
        });
        let snapshot = Snapshot::from_value(source.clone()).unwrap();
        assert_eq!(snapshot.to_value(), source);
    }

    #[test]
    fn insert_sets_id() {
        let mut snapshot = Snapshot::new(1);
        snapshot.insert("topic", 5, Map::new());
        assert_eq!(snapshot.instance("topic", 5).unwrap()["id"], json!(5));
        assert_eq!(snapshot.len(), 1);
    }
}
