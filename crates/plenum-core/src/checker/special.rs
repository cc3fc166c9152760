//! Motion fields whose content carries structure the registry cannot
//! declare.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::fqid::Fqid;
use crate::snapshot::{Instance, Snapshot};
use crate::validate::{HtmlPolicy, is_sanitized};

/// Motion references embedded in extension texts, e.g. `see [motion/12]`.
static EXTENSION_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([a-z_]+/\d+)\]").expect("reference pattern compiles"));

const EXTENSION_FIELDS: [&str; 2] = ["recommendation_extension", "state_extension"];

pub(super) fn check_motion(
    snapshot: &Snapshot,
    origin: &Fqid,
    instance: &Instance,
    errors: &mut Vec<String>,
) {
    if let Some(paragraphs) = instance.get("amendment_paragraphs") {
        check_amendment_paragraphs(&origin.fqfield("amendment_paragraphs"), paragraphs, errors);
    }
    for field in EXTENSION_FIELDS {
        if let Some(Value::String(text)) = instance.get(field) {
            check_extension(snapshot, &origin.fqfield(field), text, errors);
        }
    }
}

fn check_amendment_paragraphs(fqfield: &str, value: &Value, errors: &mut Vec<String>) {
    let paragraphs = match value {
        Value::Null => return,
        Value::Object(paragraphs) => paragraphs,
        _ => {
            errors.push(format!(
                "{fqfield}: Type error: Can't parse to a paragraph mapping"
            ));
            return;
        }
    };
    for (key, html) in paragraphs {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
            errors.push(format!("{fqfield}: Invalid paragraph key '{key}'"));
            continue;
        }
        match html {
            Value::String(html) if is_sanitized(html, HtmlPolicy::Strict) => {}
            Value::String(_) => {
                errors.push(format!("{fqfield}: Invalid html in paragraph {key}"));
            }
            _ => errors.push(format!("{fqfield}: Paragraph {key} must be a string")),
        }
    }
}

fn check_extension(snapshot: &Snapshot, fqfield: &str, text: &str, errors: &mut Vec<String>) {
    for capture in EXTENSION_REFERENCE.captures_iter(text) {
        let raw = &capture[1];
        let Ok(fqid) = raw.parse::<Fqid>() else {
            errors.push(format!("{fqfield}: Invalid reference [{raw}]"));
            continue;
        };
        if fqid.collection != "motion" {
            errors.push(format!(
                "{fqfield}: Relation Error: {fqid} is not a motion"
            ));
        } else if snapshot.get(&fqid).is_none() {
            errors.push(format!(
                "{fqfield}: Relation Error: points to {fqid}, but the model was not found"
            ));
        }
    }
}
