//! Relation checks: target lookup, meeting boundary, reverse links and
//! equal fields.

use serde_json::Value;

use super::Mode;
use crate::fqid::Fqid;
use crate::registry::{Field, FieldType, ModelRegistry, RelationTarget};
use crate::snapshot::{Instance, Snapshot};

pub(super) struct RelationCheck<'a> {
    pub registry: &'a ModelRegistry,
    pub snapshot: &'a Snapshot,
    pub mode: Mode,
}

impl RelationCheck<'_> {
    /// Check every reference held by `value` (already type-checked).
    pub fn check(
        &self,
        origin: &Fqid,
        instance: &Instance,
        field: &Field,
        value: &Value,
        errors: &mut Vec<String>,
    ) {
        let fqfield = origin.fqfield(&field.name);
        for target in resolve_targets(&field.field_type, value) {
            let (fqid, declared) = match target {
                Ok(resolved) => resolved,
                Err(collection) => {
                    let allowed: Vec<&str> = field
                        .field_type
                        .targets()
                        .iter()
                        .map(|t| t.collection.as_str())
                        .collect();
                    errors.push(format!(
                        "{fqfield}: Relation Error: collection {collection} is not allowed, expected one of [{}]",
                        allowed.join(", ")
                    ));
                    continue;
                }
            };

            if self.mode.is_meeting_mode() && !self.registry.is_meeting_scoped(&fqid.collection) {
                if self.mode == Mode::External {
                    errors.push(format!(
                        "{fqfield}: Relation Error: points to {fqid}, which is outside of the meeting"
                    ));
                }
                continue;
            }

            let Some(other) = self.snapshot.get(&fqid) else {
                errors.push(format!(
                    "{fqfield}: Relation Error: points to {fqid}, but the model was not found"
                ));
                continue;
            };

            if let Ok(reverse) = self.registry.field(&declared.collection, &declared.field)
                && !points_back(&reverse.field_type, other.get(&declared.field), origin)
            {
                errors.push(format!(
                    "{fqfield}: Relation Error: points to {}, but the reverse relation for it is corrupt",
                    fqid.fqfield(&declared.field)
                ));
            }

            for equal in &field.equal_fields {
                let ours = instance.get(equal);
                let theirs = other.get(equal);
                if ours != theirs {
                    errors.push(format!(
                        "{fqfield}: Relation Error: {equal} differs from {fqid}: {} != {}",
                        render(ours),
                        render(theirs)
                    ));
                }
            }
        }
    }
}

/// Referenced fqids with their declared target, or the disallowed collection
/// name for generic references outside the allow-list.
fn resolve_targets<'f>(
    field_type: &'f FieldType,
    value: &Value,
) -> Vec<Result<(Fqid, &'f RelationTarget), String>> {
    let resolve_generic = |raw: &Value| {
        let fqid: Fqid = raw.as_str()?.parse().ok()?;
        Some(
            field_type
                .target_for(&fqid.collection)
                .map(|target| (fqid.clone(), target))
                .ok_or(fqid.collection),
        )
    };
    match field_type {
        FieldType::Relation(target) => value
            .as_u64()
            .map(|id| Ok((Fqid::new(&target.collection, id), target)))
            .into_iter()
            .collect(),
        FieldType::RelationList(target) => value
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_u64)
            .map(|id| Ok((Fqid::new(&target.collection, id), target)))
            .collect(),
        FieldType::GenericRelation(_) => resolve_generic(value).into_iter().collect(),
        FieldType::GenericRelationList(_) => value
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(resolve_generic)
            .collect(),
        FieldType::Scalar(_) | FieldType::Array(_) => Vec::new(),
    }
}

/// Whether the reverse field value references `origin`.
pub(crate) fn points_back(reverse: &FieldType, value: Option<&Value>, origin: &Fqid) -> bool {
    let Some(value) = value else {
        return false;
    };
    let fqid = origin.to_string();
    match reverse {
        FieldType::Relation(_) => value.as_u64() == Some(origin.id),
        FieldType::RelationList(_) => value
            .as_array()
            .is_some_and(|items| items.iter().any(|v| v.as_u64() == Some(origin.id))),
        FieldType::GenericRelation(_) => value.as_str() == Some(fqid.as_str()),
        FieldType::GenericRelationList(_) => value
            .as_array()
            .is_some_and(|items| items.iter().any(|v| v.as_str() == Some(fqid.as_str()))),
        FieldType::Scalar(_) | FieldType::Array(_) => false,
    }
}

fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| "None".to_string(), Value::to_string)
}
