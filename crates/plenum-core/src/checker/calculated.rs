//! Calculated meeting_mediafile visibility fields.
//!
//! `is_public` and `inherited_access_group_ids` of a meeting_mediafile are a
//! function of its own `access_group_ids` and of the stored values of its
//! parent, which is the meeting_mediafile of the same meeting whose
//! mediafile is the parent of this one's mediafile.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::snapshot::{Instance, Snapshot};

/// Visibility of one meeting_mediafile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visibility {
    pub is_public: bool,
    pub inherited_access_group_ids: Vec<u64>,
}

impl Visibility {
    /// Visibility assumed for the parent of a root node.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            is_public: true,
            inherited_access_group_ids: Vec::new(),
        }
    }

    /// Read the stored values of an instance. Absent fields count as public
    /// and empty.
    #[must_use]
    pub fn stored(instance: &Instance) -> Self {
        Self {
            is_public: instance
                .get("is_public")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            inherited_access_group_ids: ids(instance.get("inherited_access_group_ids")),
        }
    }
}

/// Derive a node's visibility from its access groups and its parent.
///
/// The inherited groups keep the order of `access_group_ids` when both sides
/// restrict access.
#[must_use]
pub fn compute(access_group_ids: &[u64], parent: &Visibility) -> Visibility {
    let parent_groups = &parent.inherited_access_group_ids;
    let inherited = if !parent_groups.is_empty() && !access_group_ids.is_empty() {
        access_group_ids
            .iter()
            .copied()
            .filter(|id| parent_groups.contains(id))
            .collect()
    } else if !access_group_ids.is_empty() {
        access_group_ids.to_vec()
    } else if !parent_groups.is_empty() {
        parent_groups.clone()
    } else {
        return Visibility {
            is_public: parent.is_public,
            inherited_access_group_ids: Vec::new(),
        };
    };
    Visibility {
        is_public: false,
        inherited_access_group_ids: inherited,
    }
}

/// The meeting_mediafile acting as parent of `instance`, if any.
#[must_use]
pub fn parent_of<'a>(snapshot: &'a Snapshot, instance: &Instance) -> Option<&'a Instance> {
    let meeting_id = instance.get("meeting_id")?.as_u64()?;
    let mediafile_id = instance.get("mediafile_id")?.as_u64()?;
    let parent_mediafile_id = snapshot
        .instance("mediafile", mediafile_id)?
        .get("parent_id")?
        .as_u64()?;
    snapshot
        .collection("meeting_mediafile")?
        .values()
        .find(|candidate| {
            candidate.get("meeting_id").and_then(Value::as_u64) == Some(meeting_id)
                && candidate.get("mediafile_id").and_then(Value::as_u64)
                    == Some(parent_mediafile_id)
        })
}

/// Compare stored and derived visibility of one meeting_mediafile.
///
/// Returns `(field, message)` pairs for every calculated field that is off.
#[must_use]
pub fn verify(snapshot: &Snapshot, instance: &Instance) -> Vec<(&'static str, String)> {
    let parent = parent_of(snapshot, instance).map_or_else(Visibility::root, Visibility::stored);
    let access = ids(instance.get("access_group_ids"));
    let expected = compute(&access, &parent);
    let mut problems = Vec::new();

    if let Some(stored) = instance.get("is_public").and_then(Value::as_bool)
        && stored != expected.is_public
    {
        problems.push((
            "is_public",
            format!(
                "is_public is wrong: expected {}, found {stored}",
                expected.is_public
            ),
        ));
    }

    let stored_groups: BTreeSet<u64> = ids(instance.get("inherited_access_group_ids"))
        .into_iter()
        .collect();
    let expected_groups: BTreeSet<u64> =
        expected.inherited_access_group_ids.iter().copied().collect();
    if stored_groups != expected_groups {
        problems.push((
            "inherited_access_group_ids",
            format!(
                "inherited_access_group_ids is wrong: expected {expected_groups:?}, found {stored_groups:?}"
            ),
        ));
    }
    problems
}

pub(crate) fn ids(value: Option<&Value>) -> Vec<u64> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visibility(is_public: bool, groups: &[u64]) -> Visibility {
        Visibility {
            is_public,
            inherited_access_group_ids: groups.to_vec(),
        }
    }

    #[test]
    fn intersects_with_restricted_parent() {
        let parent = visibility(false, &[1, 2, 3]);
        assert_eq!(compute(&[3, 4, 2], &parent), visibility(false, &[3, 2]));
    }

    #[test]
    fn own_groups_under_public_parent() {
        assert_eq!(compute(&[2], &Visibility::root()), visibility(false, &[2]));
    }

    #[test]
    fn inherits_parent_groups() {
        let parent = visibility(false, &[5]);
        assert_eq!(compute(&[], &parent), visibility(false, &[5]));
    }

    #[test]
    fn unrestricted_follows_parent_publicity() {
        assert_eq!(compute(&[], &Visibility::root()), visibility(true, &[]));
        assert_eq!(compute(&[], &visibility(false, &[])), visibility(false, &[]));
    }

    #[test]
    fn disjoint_groups_hide_the_node() {
        let parent = visibility(false, &[1]);
        assert_eq!(compute(&[2], &parent), visibility(false, &[]));
    }
}
