use anyhow::Result;
use clap::Args;
use plenum_core::registry::{Field, ModelRegistry};
use serde::Serialize;
use std::io::Write;

use crate::output::{OutputMode, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ModelsArgs {
    /// Show the fields of this collection instead of the collection list.
    #[arg(value_name = "COLLECTION")]
    pub collection: Option<String>,
}

#[derive(Debug, Serialize)]
struct CollectionRow {
    name: String,
    fields: usize,
    meeting_scoped: bool,
}

#[derive(Debug, Serialize)]
struct FieldRow {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    required: bool,
    calculated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    to: Vec<String>,
}

impl From<&Field> for FieldRow {
    fn from(field: &Field) -> Self {
        Self {
            name: field.name.clone(),
            type_name: field.field_type.type_name(),
            required: field.required,
            calculated: field.calculated,
            to: field
                .field_type
                .targets()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

pub fn run_models(args: &ModelsArgs, registry: &ModelRegistry, output: OutputMode) -> Result<()> {
    let Some(name) = &args.collection else {
        let rows: Vec<CollectionRow> = registry
            .collections()
            .filter_map(|name| {
                let collection = registry.collection(name).ok()?;
                Some(CollectionRow {
                    name: name.to_string(),
                    fields: collection.fields().len(),
                    meeting_scoped: registry.is_meeting_scoped(name),
                })
            })
            .collect();
        return render_mode(
            output,
            &rows,
            |rows, w| {
                for row in rows {
                    writeln!(w, "{}\t{}\t{}", row.name, row.fields, row.meeting_scoped)?;
                }
                Ok(())
            },
            |rows, w| {
                pretty_section(w, "Collections")?;
                for row in rows {
                    let scope = if row.meeting_scoped { "meeting" } else { "organization" };
                    writeln!(w, "{:<24} {:>3} fields  {scope}", row.name, row.fields)?;
                }
                Ok(())
            },
        );
    };

    let rows: Vec<FieldRow> = registry
        .fields(name)?
        .iter()
        .map(FieldRow::from)
        .collect();
    render_mode(
        output,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}",
                    row.name,
                    row.type_name,
                    row.required,
                    row.to.join(",")
                )?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, name)?;
            for row in rows {
                let mut flags = Vec::new();
                if row.required {
                    flags.push("required");
                }
                if row.calculated {
                    flags.push("calculated");
                }
                write!(w, "{:<40} {:<22}", row.name, row.type_name)?;
                if !row.to.is_empty() {
                    write!(w, " -> {}", row.to.join(" | "))?;
                }
                if !flags.is_empty() {
                    write!(w, " [{}]", flags.join(", "))?;
                }
                writeln!(w)?;
            }
            Ok(())
        },
    )
}
