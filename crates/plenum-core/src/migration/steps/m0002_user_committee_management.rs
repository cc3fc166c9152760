//! Users stop carrying per-committee management levels.
//!
//! Before: `committee_$_management_level` lists the template keys in use and
//! `committee_$<id>_management_level` holds the level for committee `<id>`.
//! `can_manage` is the only level. After: `user.committee_management_ids`
//! lists the managed committees and `committee.manager_ids` lists the
//! managers.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::checker::calculated::ids;
use crate::event::{Event, ListChanges};
use crate::fqid::Fqid;
use crate::history::History;
use crate::migration::{EventMigration, StepError};
use crate::snapshot::Instance;

const INDEX_FIELD: &str = "committee_$_management_level";
const MANAGED_FIELD: &str = "committee_management_ids";
const MANAGERS_FIELD: &str = "manager_ids";
const CAN_MANAGE: &str = "can_manage";

static LEVEL_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^committee_\$(\d+)_management_level$").expect("management level pattern compiles")
});

#[derive(Debug, Default)]
pub struct UserCommitteeManagement {
    /// Managed committees of users written in the current position.
    managed: BTreeMap<u64, BTreeSet<u64>>,
    /// Committee id to user id to whether the user manages it afterwards.
    managers: BTreeMap<u64, BTreeMap<u64, bool>>,
    /// Committees created in the current position.
    created_committees: BTreeSet<u64>,
}

impl UserCommitteeManagement {
    fn managed_before(&self, user: &Fqid, history: &History) -> BTreeSet<u64> {
        self.managed.get(&user.id).cloned().unwrap_or_else(|| {
            history
                .get(user)
                .map(|instance| ids(instance.get(MANAGED_FIELD)))
                .unwrap_or_default()
                .into_iter()
                .collect()
        })
    }

    /// Rewritten fields, or `None` if `fields` carry no template field.
    fn migrate_user(
        &mut self,
        user: &Fqid,
        fields: &Instance,
        is_create: bool,
        history: &History,
    ) -> Result<Option<Instance>, StepError> {
        let mut levels = Vec::new();
        let mut rewritten = Instance::new();
        let mut touched = false;
        for (name, value) in fields {
            if name == INDEX_FIELD {
                touched = true;
            } else if let Some(captures) = LEVEL_FIELD_RE.captures(name) {
                touched = true;
                let committee: u64 = captures[1].parse().map_err(|_| {
                    StepError::invalid(user, format!("{name}: invalid committee id"))
                })?;
                let manages = match value {
                    Value::Null => false,
                    Value::String(level) if level == CAN_MANAGE => true,
                    other => {
                        return Err(StepError::invalid(
                            user,
                            format!("{name}: unknown management level {other}"),
                        ));
                    }
                };
                levels.push((committee, manages));
            } else {
                rewritten.insert(name.clone(), value.clone());
            }
        }
        if !touched {
            return Ok(None);
        }
        if levels.is_empty() {
            return Ok(Some(rewritten));
        }

        let before: BTreeSet<u64> = if is_create {
            ids(fields.get(MANAGED_FIELD)).into_iter().collect()
        } else {
            self.managed_before(user, history)
        };
        let mut after = before.clone();
        for (committee, manages) in levels {
            if manages {
                after.insert(committee);
            } else {
                after.remove(&committee);
            }
        }

        for committee in after.symmetric_difference(&before) {
            self.managers
                .entry(*committee)
                .or_default()
                .insert(user.id, after.contains(committee));
        }

        if after.is_empty() {
            if is_create {
                rewritten.remove(MANAGED_FIELD);
            } else {
                rewritten.insert(MANAGED_FIELD.to_string(), Value::Null);
            }
        } else {
            rewritten.insert(
                MANAGED_FIELD.to_string(),
                after.iter().copied().map(Value::from).collect(),
            );
        }
        self.managed.insert(user.id, after);
        Ok(Some(rewritten))
    }

    /// Queue `manager_ids` changes for every committee `user` manages.
    fn set_manager(&mut self, user: &Fqid, managed: &BTreeSet<u64>, manages: bool) {
        for committee in managed {
            self.managers
                .entry(*committee)
                .or_default()
                .insert(user.id, manages);
        }
    }
}

fn is_template_field(name: &str) -> bool {
    name == INDEX_FIELD || LEVEL_FIELD_RE.is_match(name)
}

/// Drop template fields from a list update, or `None` if it has none.
fn strip_list_update(
    fqid: &Fqid,
    add: &ListChanges,
    remove: &ListChanges,
) -> Option<Vec<Event>> {
    if !add.keys().chain(remove.keys()).any(|name| is_template_field(name)) {
        return None;
    }
    let keep = |changes: &ListChanges| -> ListChanges {
        changes
            .iter()
            .filter(|(name, _)| !is_template_field(name))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    };
    let (add, remove) = (keep(add), keep(remove));
    if add.is_empty() && remove.is_empty() {
        return Some(Vec::new());
    }
    Some(vec![Event::ListUpdate {
        fqid: fqid.clone(),
        add,
        remove,
    }])
}

impl EventMigration for UserCommitteeManagement {
    fn target_migration_index(&self) -> u64 {
        2
    }

    fn name(&self) -> &'static str {
        "user_committee_management"
    }

    fn position_init(&mut self, _history: &History) {
        self.managed.clear();
        self.managers.clear();
        self.created_committees.clear();
    }

    fn migrate_event(
        &mut self,
        event: &Event,
        history: &History,
    ) -> Result<Option<Vec<Event>>, StepError> {
        let fqid = event.fqid();
        match (event, fqid.collection.as_str()) {
            (Event::Create { .. }, "committee") => {
                self.created_committees.insert(fqid.id);
                Ok(None)
            }
            (Event::Create { fields, .. }, "user") => Ok(self
                .migrate_user(fqid, fields, true, history)?
                .map(|fields| {
                    vec![Event::Create {
                        fqid: fqid.clone(),
                        fields,
                    }]
                })),
            (Event::Update { fields, .. }, "user") => Ok(self
                .migrate_user(fqid, fields, false, history)?
                .map(|fields| {
                    if fields.is_empty() {
                        Vec::new()
                    } else {
                        vec![Event::Update {
                            fqid: fqid.clone(),
                            fields,
                        }]
                    }
                })),
            (Event::ListUpdate { add, remove, .. }, "user") => {
                Ok(strip_list_update(fqid, add, remove))
            }
            (Event::Delete { .. }, "user") => {
                let managed = self.managed_before(fqid, history);
                self.set_manager(fqid, &managed, false);
                Ok(None)
            }
            (Event::Restore { .. }, "user") => {
                let managed = self.managed.get(&fqid.id).cloned().unwrap_or_else(|| {
                    history
                        .get_including_deleted(fqid)
                        .map(|instance| ids(instance.get(MANAGED_FIELD)))
                        .unwrap_or_default()
                        .into_iter()
                        .collect()
                });
                self.set_manager(fqid, &managed, true);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn additional_events(&mut self, history: &History) -> Result<Vec<Event>, StepError> {
        let mut events = Vec::new();
        for (committee, users) in std::mem::take(&mut self.managers) {
            let fqid = Fqid::new("committee", committee);
            if !history.exists(&fqid) && !self.created_committees.contains(&committee) {
                tracing::warn!(%fqid, "managed committee does not exist, manager_ids not updated");
                continue;
            }
            let mut add = ListChanges::new();
            let mut remove = ListChanges::new();
            for (user, manages) in users {
                let side = if manages { &mut add } else { &mut remove };
                side.entry(MANAGERS_FIELD.to_string())
                    .or_default()
                    .push(Value::from(user));
            }
            events.push(Event::ListUpdate { fqid, add, remove });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Instance {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn history_with_committees(ids: &[u64]) -> History {
        let mut history = History::new();
        for id in ids {
            history
                .apply(&Event::Create {
                    fqid: Fqid::new("committee", *id),
                    fields: fields(json!({"name": "c"})),
                })
                .unwrap();
        }
        history
    }

    /// Run one position through the step the way the engine does.
    fn migrate_position(
        step: &mut UserCommitteeManagement,
        history: &mut History,
        events: &[Event],
    ) -> Vec<Event> {
        step.position_init(history);
        let mut out = Vec::new();
        for event in events {
            match step.migrate_event(event, history).unwrap() {
                None => out.push(event.clone()),
                Some(replacement) => out.extend(replacement),
            }
        }
        out.extend(step.additional_events(history).unwrap());
        history.apply_all(&out).unwrap();
        out
    }

    #[test]
    fn rewrites_user_create_and_adds_manager() {
        let mut history = history_with_committees(&[1]);
        let mut step = UserCommitteeManagement::default();
        let events = migrate_position(
            &mut step,
            &mut history,
            &[Event::Create {
                fqid: Fqid::new("user", 1),
                fields: fields(json!({
                    "username": "u",
                    "committee_$_management_level": ["can_manage"],
                    "committee_$1_management_level": "can_manage",
                })),
            }],
        );

        assert_eq!(
            events,
            vec![
                Event::Create {
                    fqid: Fqid::new("user", 1),
                    fields: fields(json!({"username": "u", "committee_management_ids": [1]})),
                },
                Event::list_add(Fqid::new("committee", 1), "manager_ids", vec![json!(1)]),
            ]
        );
        assert_eq!(
            history.get(&Fqid::new("committee", 1)).unwrap()["manager_ids"],
            json!([1])
        );
    }

    #[test]
    fn updates_remove_management_across_positions() {
        let mut history = history_with_committees(&[1, 2]);
        let mut step = UserCommitteeManagement::default();
        migrate_position(
            &mut step,
            &mut history,
            &[Event::Create {
                fqid: Fqid::new("user", 5),
                fields: fields(json!({
                    "username": "u",
                    "committee_$1_management_level": "can_manage",
                    "committee_$2_management_level": "can_manage",
                })),
            }],
        );
        let events = migrate_position(
            &mut step,
            &mut history,
            &[Event::Update {
                fqid: Fqid::new("user", 5),
                fields: fields(json!({
                    "committee_$_management_level": ["can_manage"],
                    "committee_$1_management_level": null,
                })),
            }],
        );

        assert_eq!(
            events[0],
            Event::Update {
                fqid: Fqid::new("user", 5),
                fields: fields(json!({"committee_management_ids": [2]})),
            }
        );
        assert_eq!(
            events[1],
            Event::list_remove(Fqid::new("committee", 1), "manager_ids", vec![json!(5)])
        );
        assert_eq!(
            history.get(&Fqid::new("committee", 1)).unwrap()["manager_ids"],
            json!([])
        );
        assert_eq!(
            history.get(&Fqid::new("user", 5)).unwrap()["committee_management_ids"],
            json!([2])
        );
    }

    #[test]
    fn committee_created_in_same_position_gets_managers() {
        let mut history = History::new();
        let mut step = UserCommitteeManagement::default();
        let events = migrate_position(
            &mut step,
            &mut history,
            &[
                Event::Create {
                    fqid: Fqid::new("committee", 3),
                    fields: Instance::new(),
                },
                Event::Create {
                    fqid: Fqid::new("user", 1),
                    fields: fields(json!({"committee_$3_management_level": "can_manage"})),
                },
            ],
        );
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn missing_committee_is_skipped_and_index_only_update_dropped() {
        let mut history = History::new();
        history
            .apply(&Event::Create {
                fqid: Fqid::new("user", 1),
                fields: Instance::new(),
            })
            .unwrap();
        let mut step = UserCommitteeManagement::default();
        let events = migrate_position(
            &mut step,
            &mut history,
            &[
                Event::Update {
                    fqid: Fqid::new("user", 1),
                    fields: fields(json!({"committee_$_management_level": []})),
                },
                Event::Update {
                    fqid: Fqid::new("user", 1),
                    fields: fields(json!({"committee_$9_management_level": "can_manage"})),
                },
            ],
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Update { .. }));
    }

    #[test]
    fn deleting_a_manager_removes_it_and_restoring_adds_it_back() {
        let mut history = history_with_committees(&[1]);
        let mut step = UserCommitteeManagement::default();
        let user = Fqid::new("user", 4);
        migrate_position(
            &mut step,
            &mut history,
            &[Event::Create {
                fqid: user.clone(),
                fields: fields(json!({"committee_$1_management_level": "can_manage"})),
            }],
        );

        let deleted = migrate_position(
            &mut step,
            &mut history,
            &[Event::Delete { fqid: user.clone() }],
        );
        assert_eq!(
            deleted,
            vec![
                Event::Delete { fqid: user.clone() },
                Event::list_remove(Fqid::new("committee", 1), "manager_ids", vec![json!(4)]),
            ]
        );
        assert_eq!(
            history.get(&Fqid::new("committee", 1)).unwrap()["manager_ids"],
            json!([])
        );

        let restored = migrate_position(
            &mut step,
            &mut history,
            &[Event::Restore { fqid: user.clone() }],
        );
        assert_eq!(
            restored[1],
            Event::list_add(Fqid::new("committee", 1), "manager_ids", vec![json!(4)])
        );
        assert_eq!(
            history.get(&Fqid::new("committee", 1)).unwrap()["manager_ids"],
            json!([4])
        );
    }

    #[test]
    fn deleting_a_user_managing_nothing_adds_no_events() {
        let mut history = History::new();
        let mut step = UserCommitteeManagement::default();
        migrate_position(
            &mut step,
            &mut history,
            &[Event::Create {
                fqid: Fqid::new("user", 2),
                fields: fields(json!({"username": "u"})),
            }],
        );
        let events = migrate_position(
            &mut step,
            &mut history,
            &[Event::Delete {
                fqid: Fqid::new("user", 2),
            }],
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn template_list_updates_are_dropped() {
        let mut history = History::new();
        history
            .apply(&Event::Create {
                fqid: Fqid::new("user", 1),
                fields: fields(json!({"organization_management_level": "superadmin"})),
            })
            .unwrap();
        let mut step = UserCommitteeManagement::default();
        let events = migrate_position(
            &mut step,
            &mut history,
            &[
                Event::list_add(
                    Fqid::new("user", 1),
                    "committee_$_management_level",
                    vec![json!("can_manage")],
                ),
                Event::ListUpdate {
                    fqid: Fqid::new("user", 1),
                    add: ListChanges::from([
                        ("committee_$_management_level".to_string(), vec![json!("can_manage")]),
                        ("meeting_ids".to_string(), vec![json!(3)]),
                    ]),
                    remove: ListChanges::new(),
                },
            ],
        );
        assert_eq!(
            events,
            vec![Event::list_add(Fqid::new("user", 1), "meeting_ids", vec![json!(3)])]
        );
        assert!(!history
            .get(&Fqid::new("user", 1))
            .unwrap()
            .contains_key("committee_$_management_level"));
    }

    #[test]
    fn unknown_level_fails() {
        let mut step = UserCommitteeManagement::default();
        let err = step
            .migrate_event(
                &Event::Create {
                    fqid: Fqid::new("user", 1),
                    fields: fields(json!({"committee_$1_management_level": "can_see"})),
                },
                &History::new(),
            )
            .unwrap_err();
        assert!(err.to_string().starts_with("user/1: committee_$1_management_level"));
    }
}
