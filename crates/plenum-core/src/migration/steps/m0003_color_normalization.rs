//! Color fields are stored as lowercase `#rrggbb`.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::event::Event;
use crate::history::History;
use crate::migration::{EventMigration, StepError};
use crate::registry::{FieldType, ModelRegistry, ScalarType};

static ANY_CASE_COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("color pattern compiles"));

#[derive(Debug, Clone, Default)]
pub struct ColorNormalization {
    /// Collection name to the names of its `color` fields.
    color_fields: BTreeMap<String, BTreeSet<String>>,
}

impl ColorNormalization {
    fn is_color(&self, collection: &str, field: &str) -> bool {
        self.color_fields
            .get(collection)
            .is_some_and(|fields| fields.contains(field))
    }
}

impl EventMigration for ColorNormalization {
    fn target_migration_index(&self) -> u64 {
        3
    }

    fn name(&self) -> &'static str {
        "color_normalization"
    }

    fn prepare(&mut self, registry: &ModelRegistry) {
        self.color_fields.clear();
        for collection in registry.collections() {
            let Ok(fields) = registry.fields(collection) else {
                continue;
            };
            let colors: BTreeSet<String> = fields
                .iter()
                .filter(|field| field.field_type == FieldType::Scalar(ScalarType::Color))
                .map(|field| field.name.clone())
                .collect();
            if !colors.is_empty() {
                self.color_fields.insert(collection.to_string(), colors);
            }
        }
        tracing::debug!(collections = self.color_fields.len(), "color fields collected");
    }

    fn migrate_event(
        &mut self,
        event: &Event,
        _history: &History,
    ) -> Result<Option<Vec<Event>>, StepError> {
        let collection = event.fqid().collection.as_str();
        if !self.color_fields.contains_key(collection) {
            return Ok(None);
        }
        let Some(fields) = event.fields() else {
            return Ok(None);
        };

        let mut normalized = fields.clone();
        let mut changed = false;
        for (name, value) in &mut normalized {
            if !self.is_color(collection, name) {
                continue;
            }
            if let Value::String(color) = value
                && ANY_CASE_COLOR_RE.is_match(color)
                && color.chars().any(|c| c.is_ascii_uppercase())
            {
                color.make_ascii_lowercase();
                changed = true;
            }
        }
        if !changed {
            return Ok(None);
        }

        let fqid = event.fqid().clone();
        let rewritten = match event {
            Event::Create { .. } => Event::Create {
                fqid,
                fields: normalized,
            },
            _ => Event::Update {
                fqid,
                fields: normalized,
            },
        };
        Ok(Some(vec![rewritten]))
    }
}
