//! `models.yml` parsing and load-time consistency checks.

use regex::Regex;
use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};

use super::field::{Constraints, Field, FieldType, OnDelete, RelationTarget, ScalarType};
use super::{Collection, ModelRegistry, RegistryError};
use crate::fqid::is_collection_name;
use crate::validate;

/// Option keys carried for code generation and the database layer; they do
/// not influence validation.
const STRUCTURAL_KEYS: [&str; 9] = [
    "reference",
    "sql",
    "deferred",
    "unique",
    "items",
    "restriction_mode",
    "description",
    "read_only",
    "constant",
];

pub(super) fn parse_document(source: &str) -> Result<Vec<Collection>, RegistryError> {
    let document: Yaml = serde_yaml::from_str(source)?;
    let Yaml::Mapping(top) = document else {
        return Err(RegistryError::Malformed(
            "top level must map collection names to field declarations".into(),
        ));
    };

    let mut collections = Vec::with_capacity(top.len());
    for (key, value) in &top {
        let name = key
            .as_str()
            .ok_or_else(|| RegistryError::Malformed(format!("non-string collection key {key:?}")))?;
        if name.starts_with('_') {
            continue;
        }
        if !is_collection_name(name) {
            return Err(RegistryError::Malformed(format!(
                "invalid collection name '{name}'"
            )));
        }
        let Yaml::Mapping(declarations) = value else {
            return Err(RegistryError::Malformed(format!(
                "collection '{name}' must map field names to declarations"
            )));
        };

        let mut fields = Vec::with_capacity(declarations.len());
        for (field_key, declaration) in declarations {
            let field_name = field_key.as_str().ok_or_else(|| {
                RegistryError::Malformed(format!("non-string field key in '{name}'"))
            })?;
            fields.push(parse_field(name, field_name, declaration)?);
        }

        if !fields.iter().any(|f| f.name == "id") {
            return Err(RegistryError::Malformed(format!(
                "collection '{name}' declares no id field"
            )));
        }
        collections.push(Collection::new(name.to_string(), fields));
    }
    Ok(collections)
}

struct FieldContext<'a> {
    collection: &'a str,
    field: &'a str,
}

impl FieldContext<'_> {
    fn invalid(&self, key: &str, reason: impl Into<String>) -> RegistryError {
        RegistryError::InvalidOption {
            collection: self.collection.to_string(),
            field: self.field.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[allow(clippy::too_many_lines)]
fn parse_field(collection: &str, name: &str, declaration: &Yaml) -> Result<Field, RegistryError> {
    let ctx = FieldContext {
        collection,
        field: name,
    };
    let Yaml::Mapping(options) = declaration else {
        return Err(ctx.invalid("type", "field declaration must be a mapping"));
    };

    let mut type_name = None;
    let mut to = None;
    let mut required = false;
    let mut default = None;
    let mut constraints = Constraints::default();
    let mut on_delete = OnDelete::default();
    let mut equal_fields = Vec::new();
    let mut calculated = false;

    for (key, value) in options {
        let key = key
            .as_str()
            .ok_or_else(|| ctx.invalid("?", "option keys must be strings"))?;
        match key {
            "type" => {
                type_name = Some(
                    value
                        .as_str()
                        .ok_or_else(|| ctx.invalid(key, "expected a string"))?
                        .to_string(),
                );
            }
            "to" => to = Some(value),
            "required" => required = as_bool(&ctx, key, value)?,
            "calculated" => calculated = as_bool(&ctx, key, value)?,
            "default" => default = Some(to_json(&ctx, key, value)?),
            "enum" => {
                let Yaml::Sequence(items) = value else {
                    return Err(ctx.invalid(key, "expected a list of values"));
                };
                let values = items
                    .iter()
                    .map(|item| to_json(&ctx, key, item))
                    .collect::<Result<Vec<_>, _>>()?;
                constraints.enum_values = Some(values);
            }
            "on_delete" => {
                on_delete = value
                    .as_str()
                    .and_then(OnDelete::parse)
                    .ok_or_else(|| ctx.invalid(key, "expected CASCADE, PROTECT or SET_NULL"))?;
            }
            "equal_fields" => {
                equal_fields = match value {
                    Yaml::String(single) => vec![single.clone()],
                    Yaml::Sequence(items) => items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| ctx.invalid(key, "expected field names"))
                        })
                        .collect::<Result<_, _>>()?,
                    _ => return Err(ctx.invalid(key, "expected a field name or a list")),
                };
            }
            "minimum" => constraints.minimum = Some(as_number(&ctx, key, value)?),
            "maximum" => constraints.maximum = Some(as_number(&ctx, key, value)?),
            "minLength" => constraints.min_length = Some(as_length(&ctx, key, value)?),
            "maxLength" => constraints.max_length = Some(as_length(&ctx, key, value)?),
            "pattern" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| ctx.invalid(key, "expected a regular expression"))?;
                let regex = Regex::new(raw).map_err(|e| ctx.invalid(key, e.to_string()))?;
                constraints.pattern = Some(regex);
            }
            structural if STRUCTURAL_KEYS.contains(&structural) => {}
            unknown => {
                return Err(RegistryError::UnknownOption {
                    collection: collection.to_string(),
                    field: name.to_string(),
                    key: unknown.to_string(),
                });
            }
        }
    }

    let type_name = type_name.ok_or_else(|| ctx.invalid("type", "missing"))?;
    let field_type = parse_type(&ctx, &type_name, to)?;

    let field = Field {
        collection: collection.to_string(),
        name: name.to_string(),
        field_type,
        required,
        default,
        constraints,
        on_delete,
        equal_fields,
        calculated,
    };

    if let Some(default) = &field.default {
        validate::validate(&field, default)
            .map_err(|e| ctx.invalid("default", format!("{default} is not valid: {e}")))?;
    }
    Ok(field)
}

fn parse_type(
    ctx: &FieldContext<'_>,
    type_name: &str,
    to: Option<&Yaml>,
) -> Result<FieldType, RegistryError> {
    let unknown = || RegistryError::UnknownType {
        collection: ctx.collection.to_string(),
        field: ctx.field.to_string(),
        type_name: type_name.to_string(),
    };

    let relational = matches!(
        type_name,
        "relation" | "relation-list" | "generic-relation" | "generic-relation-list"
    );
    if !relational {
        if to.is_some() {
            return Err(ctx.invalid("to", format!("not allowed on {type_name} fields")));
        }
        if let Some(inner) = type_name.strip_suffix("[]") {
            return ScalarType::parse(inner)
                .map(FieldType::Array)
                .ok_or_else(unknown);
        }
        return ScalarType::parse(type_name)
            .map(FieldType::Scalar)
            .ok_or_else(unknown);
    }

    let to = to.ok_or_else(|| ctx.invalid("to", "relation fields need a target"))?;
    let mut targets = parse_targets(to).map_err(|reason| ctx.invalid("to", reason))?;
    match type_name {
        "generic-relation" | "generic-relation-list" => {
            if targets.is_empty() {
                return Err(ctx.invalid("to", "generic relations need at least one target"));
            }
            if type_name == "generic-relation" {
                Ok(FieldType::GenericRelation(targets))
            } else {
                Ok(FieldType::GenericRelationList(targets))
            }
        }
        _ => {
            if targets.len() != 1 {
                return Err(ctx.invalid("to", "use a generic relation for multiple targets"));
            }
            let target = targets.remove(0);
            if type_name == "relation" {
                Ok(FieldType::Relation(target))
            } else {
                Ok(FieldType::RelationList(target))
            }
        }
    }
}

/// Accepts `"collection/field"`, a list of those,
/// `{collection: c, field: f | {name: f, type: t}}` and
/// `{collections: [a, b], field: f}`.
fn parse_targets(to: &Yaml) -> Result<Vec<RelationTarget>, String> {
    match to {
        Yaml::String(raw) => parse_target_str(raw).map(|t| vec![t]),
        Yaml::Sequence(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| "list entries must be 'collection/field' strings".to_string())
                    .and_then(parse_target_str)
            })
            .collect(),
        Yaml::Mapping(map) => {
            let field = reverse_field_name(map)?;
            if let Some(collections) = map.get("collections") {
                let Yaml::Sequence(items) = collections else {
                    return Err("'collections' must be a list".into());
                };
                items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(|c| RelationTarget::new(c, field.clone()))
                            .ok_or_else(|| "collection names must be strings".to_string())
                    })
                    .collect()
            } else {
                let collection = map
                    .get("collection")
                    .and_then(Yaml::as_str)
                    .ok_or_else(|| "expected 'collection' or 'collections'".to_string())?;
                Ok(vec![RelationTarget::new(collection, field)])
            }
        }
        _ => Err("unsupported target declaration".into()),
    }
}

fn reverse_field_name(map: &Mapping) -> Result<String, String> {
    match map.get("field") {
        Some(Yaml::String(name)) => Ok(name.clone()),
        Some(Yaml::Mapping(inline)) => inline
            .get("name")
            .and_then(Yaml::as_str)
            .map(str::to_string)
            .ok_or_else(|| "inline reverse field needs a 'name'".to_string()),
        _ => Err("missing reverse 'field'".into()),
    }
}

fn parse_target_str(raw: &str) -> Result<RelationTarget, String> {
    raw.split_once('/')
        .filter(|(c, f)| is_collection_name(c) && !f.is_empty())
        .map(|(c, f)| RelationTarget::new(c, f))
        .ok_or_else(|| format!("'{raw}' is not of the form 'collection/field'"))
}

fn as_bool(ctx: &FieldContext<'_>, key: &str, value: &Yaml) -> Result<bool, RegistryError> {
    value
        .as_bool()
        .ok_or_else(|| ctx.invalid(key, "expected true or false"))
}

fn as_number(ctx: &FieldContext<'_>, key: &str, value: &Yaml) -> Result<f64, RegistryError> {
    match value {
        Yaml::Number(n) => n.as_f64(),
        Yaml::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ctx.invalid(key, "expected a number"))
}

fn as_length(ctx: &FieldContext<'_>, key: &str, value: &Yaml) -> Result<usize, RegistryError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ctx.invalid(key, "expected a non-negative integer"))
}

fn to_json(ctx: &FieldContext<'_>, key: &str, value: &Yaml) -> Result<Value, RegistryError> {
    serde_json::to_value(value).map_err(|e| ctx.invalid(key, e.to_string()))
}

/// Every relation must be mirrored by its reverse field, and equal-fields
/// must exist on both ends.
pub(super) fn verify_relations(registry: &ModelRegistry) -> Result<(), RegistryError> {
    for collection in registry.collections.values() {
        for field in collection.fields() {
            for target in field.field_type.targets() {
                let mismatch = |reason: String| RegistryError::ReverseMismatch {
                    field: field.qualified_name(),
                    target: target.to_string(),
                    reason,
                };

                let other = registry
                    .collections
                    .get(&target.collection)
                    .ok_or_else(|| mismatch("collection is not declared".into()))?;
                let reverse = other
                    .field(&target.field)
                    .ok_or_else(|| mismatch("reverse field is not declared".into()))?;
                if !reverse.field_type.is_relation() {
                    return Err(mismatch(format!(
                        "reverse field has non-relational type {}",
                        reverse.field_type.type_name()
                    )));
                }
                let back = RelationTarget::new(collection.name(), field.name.clone());
                if !reverse.field_type.targets().contains(&back) {
                    let declared: Vec<String> = reverse
                        .field_type
                        .targets()
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    return Err(mismatch(format!(
                        "reverse field points to {}",
                        declared.join(", ")
                    )));
                }
                for equal in &field.equal_fields {
                    if !collection.has_field(equal) || !other.has_field(equal) {
                        return Err(mismatch(format!(
                            "equal field '{equal}' is missing on one side"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}
