//! Recompute the calculated visibility of every meeting_mediafile.
//!
//! Older data stored `is_public` and `inherited_access_group_ids` computed
//! from stale parent values. The step walks each meeting's mediafile tree
//! from the roots down, writes corrected values and patches
//! `group.meeting_mediafile_inherited_access_group_ids` to match.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::checker::calculated::{Visibility, compute, ids};
use crate::fqid::Fqid;
use crate::history::History;
use crate::migration::{ModelMigration, RewriteRequest, StepError};
use crate::snapshot::Instance;

const COLLECTION: &str = "meeting_mediafile";
const GROUP_REVERSE_FIELD: &str = "meeting_mediafile_inherited_access_group_ids";

#[derive(Debug, Clone, Copy, Default)]
pub struct MeetingMediafileInheritance;

struct Tree<'h> {
    nodes: BTreeMap<u64, &'h Instance>,
    parents: BTreeMap<u64, u64>,
}

impl<'h> Tree<'h> {
    fn build(history: &'h History) -> Self {
        let nodes: BTreeMap<u64, &Instance> = history.collection(COLLECTION).collect();
        let by_mediafile: BTreeMap<(u64, u64), u64> = nodes
            .iter()
            .filter_map(|(id, node)| Some((placement(node)?, *id)))
            .collect();

        let mut parents = BTreeMap::new();
        for (id, node) in &nodes {
            let parent = placement(node).and_then(|(meeting_id, mediafile_id)| {
                let mediafile = history.get(&Fqid::new("mediafile", mediafile_id))?;
                let parent_mediafile = field_id(mediafile, "parent_id")?;
                by_mediafile.get(&(meeting_id, parent_mediafile)).copied()
            });
            if let Some(parent) = parent {
                parents.insert(*id, parent);
            }
        }
        Self { nodes, parents }
    }

    /// Visibility of `id`, computing its ancestors first.
    fn resolve(
        &self,
        id: u64,
        resolved: &mut BTreeMap<u64, Visibility>,
        path: &mut BTreeSet<u64>,
    ) -> Result<Visibility, StepError> {
        if let Some(visibility) = resolved.get(&id) {
            return Ok(visibility.clone());
        }
        if !path.insert(id) {
            return Err(StepError::invalid(
                &Fqid::new(COLLECTION, id),
                "mediafile tree contains a cycle",
            ));
        }
        let parent = match self.parents.get(&id) {
            Some(parent) => self.resolve(*parent, resolved, path)?,
            None => Visibility::root(),
        };
        let access = self
            .nodes
            .get(&id)
            .map(|node| ids(node.get("access_group_ids")))
            .unwrap_or_default();
        let visibility = compute(&access, &parent);
        path.remove(&id);
        resolved.insert(id, visibility.clone());
        Ok(visibility)
    }
}

fn field_id(instance: &Instance, field: &str) -> Option<u64> {
    instance.get(field).and_then(Value::as_u64)
}

/// `(meeting_id, mediafile_id)` of a meeting_mediafile.
fn placement(instance: &Instance) -> Option<(u64, u64)> {
    Some((
        field_id(instance, "meeting_id")?,
        field_id(instance, "mediafile_id")?,
    ))
}

impl ModelMigration for MeetingMediafileInheritance {
    fn target_migration_index(&self) -> u64 {
        4
    }

    fn name(&self) -> &'static str {
        "meeting_mediafile_inheritance"
    }

    fn migrate_models(&mut self, history: &History) -> Result<Vec<RewriteRequest>, StepError> {
        let tree = Tree::build(history);
        let mut resolved = BTreeMap::new();
        let mut requests = Vec::new();
        // group id to meeting_mediafile id to whether it now inherits the group
        let mut group_changes: BTreeMap<u64, BTreeMap<u64, bool>> = BTreeMap::new();

        for (id, node) in &tree.nodes {
            let expected = tree.resolve(*id, &mut resolved, &mut BTreeSet::new())?;
            let mut fields = Instance::new();

            if node.get("is_public").and_then(Value::as_bool) != Some(expected.is_public) {
                fields.insert("is_public".to_string(), Value::Bool(expected.is_public));
            }

            let stored: BTreeSet<u64> = ids(node.get("inherited_access_group_ids"))
                .into_iter()
                .collect();
            let wanted: BTreeSet<u64> = expected.inherited_access_group_ids.iter().copied().collect();
            if stored != wanted {
                fields.insert(
                    "inherited_access_group_ids".to_string(),
                    expected
                        .inherited_access_group_ids
                        .iter()
                        .copied()
                        .map(Value::from)
                        .collect(),
                );
                for group in stored.symmetric_difference(&wanted) {
                    group_changes
                        .entry(*group)
                        .or_default()
                        .insert(*id, wanted.contains(group));
                }
            }

            if !fields.is_empty() {
                tracing::debug!(id, ?fields, "meeting_mediafile visibility corrected");
                requests.push(RewriteRequest::Update {
                    fqid: Fqid::new(COLLECTION, *id),
                    fields,
                });
            }
        }

        for (group, changes) in group_changes {
            let fqid = Fqid::new("group", group);
            let Some(instance) = history.get(&fqid) else {
                tracing::warn!(%fqid, "inherited access group does not exist");
                continue;
            };
            let mut back_refs = ids(instance.get(GROUP_REVERSE_FIELD));
            for (mediafile, inherits) in changes {
                if inherits {
                    if !back_refs.contains(&mediafile) {
                        back_refs.push(mediafile);
                    }
                } else {
                    back_refs.retain(|id| *id != mediafile);
                }
            }
            let mut fields = Instance::new();
            fields.insert(
                GROUP_REVERSE_FIELD.to_string(),
                back_refs.into_iter().map(Value::from).collect(),
            );
            requests.push(RewriteRequest::Update { fqid, fields });
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use serde_json::json;

    fn create(collection: &str, id: u64, value: Value) -> Event {
        let Value::Object(fields) = value else {
            unreachable!()
        };
        Event::Create {
            fqid: Fqid::new(collection, id),
            fields,
        }
    }

    fn history(child_public: bool) -> History {
        let mut history = History::new();
        history
            .apply_all(&[
                create("group", 2, json!({"meeting_id": 1, "meeting_mediafile_access_group_ids": [2]})),
                create("mediafile", 1, json!({"is_directory": true, "child_ids": [2]})),
                create("mediafile", 2, json!({"parent_id": 1})),
                create("meeting_mediafile", 10, json!({"meeting_id": 1, "mediafile_id": 1, "is_public": true})),
                create(
                    "meeting_mediafile",
                    11,
                    json!({"meeting_id": 1, "mediafile_id": 2, "access_group_ids": [2], "is_public": child_public}),
                ),
            ])
            .unwrap();
        history
    }

    #[test]
    fn corrects_child_and_patches_group() {
        let requests = MeetingMediafileInheritance
            .migrate_models(&history(true))
            .unwrap();
        assert_eq!(
            requests,
            vec![
                RewriteRequest::Update {
                    fqid: Fqid::new("meeting_mediafile", 11),
                    fields: serde_json::from_value(
                        json!({"is_public": false, "inherited_access_group_ids": [2]})
                    )
                    .unwrap(),
                },
                RewriteRequest::Update {
                    fqid: Fqid::new("group", 2),
                    fields: serde_json::from_value(
                        json!({"meeting_mediafile_inherited_access_group_ids": [11]})
                    )
                    .unwrap(),
                },
            ]
        );
    }

    #[test]
    fn consistent_tree_needs_no_requests() {
        let mut history = history(false);
        for event in [
            Event::Update {
                fqid: Fqid::new("meeting_mediafile", 11),
                fields: serde_json::from_value(json!({"inherited_access_group_ids": [2]})).unwrap(),
            },
            Event::list_add(
                Fqid::new("group", 2),
                GROUP_REVERSE_FIELD,
                vec![json!(11)],
            ),
        ] {
            history.apply(&event).unwrap();
        }
        assert!(
            MeetingMediafileInheritance
                .migrate_models(&history)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn cycles_are_reported() {
        let mut history = History::new();
        history
            .apply_all(&[
                create("mediafile", 1, json!({"parent_id": 2})),
                create("mediafile", 2, json!({"parent_id": 1})),
                create("meeting_mediafile", 1, json!({"meeting_id": 1, "mediafile_id": 1})),
                create("meeting_mediafile", 2, json!({"meeting_id": 1, "mediafile_id": 2})),
            ])
            .unwrap();
        let err = MeetingMediafileInheritance
            .migrate_models(&history)
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
