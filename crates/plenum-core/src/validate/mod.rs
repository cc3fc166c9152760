//! Field validation: scalar type predicates and constraint evaluation.
//!
//! [`validate`] is the single entry point used by the registry loader (to
//! check declared defaults), the checker and the migration steps. The checker
//! also calls [`check_type`] and [`check_constraints`] separately so that it
//! can report type errors and constraint errors with different messages.

pub mod html;

pub use html::{HtmlError, HtmlPolicy, is_sanitized, sanitize};

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::fqid::Fqid;
use crate::registry::{Field, FieldType, ScalarType};

static DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(\d|[1-9]\d+)\.\d{6}$").expect("decimal pattern compiles"));

static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^#[0-9a-f]{6}$").expect("color pattern compiles"));

/// A value that does not satisfy its field declaration.
///
/// The `Display` text is the message part of a checker error line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("Type error: Can't parse to {expected}")]
    Type { expected: String },

    #[error("Value error: Value {value} is not a valid enum value")]
    Enum { value: String },

    #[error("Value error: {value} is smaller than the minimum {minimum}")]
    BelowMinimum { value: String, minimum: String },

    #[error("Value error: {value} is greater than the maximum {maximum}")]
    AboveMaximum { value: String, maximum: String },

    #[error("Value error: length {length} is shorter than {min_length}")]
    TooShort { length: usize, min_length: usize },

    #[error("Value error: length {length} exceeds {max_length}")]
    TooLong { length: usize, max_length: usize },

    #[error("Value error: '{value}' does not match {pattern}")]
    Pattern { value: String, pattern: String },

    #[error("Field required but empty.")]
    RequiredEmpty,

    #[error("Invalid html: {0}")]
    Html(#[from] HtmlError),

    #[error("Invalid html: value is not sanitized for {0}")]
    Unsanitized(HtmlPolicy),
}

/// Validate `value` against `field`: null handling, type, then constraints.
///
/// # Errors
///
/// Returns the first [`FieldError`] found.
pub fn validate(field: &Field, value: &Value) -> Result<(), FieldError> {
    if value.is_null() {
        return if field.required {
            Err(FieldError::RequiredEmpty)
        } else {
            Ok(())
        };
    }
    check_type(&field.field_type, value)?;
    check_constraints(field, value)
}

/// Check the raw value category against the declared type.
///
/// # Errors
///
/// Returns [`FieldError::Type`] naming the declared type.
pub fn check_type(field_type: &FieldType, value: &Value) -> Result<(), FieldError> {
    let ok = match field_type {
        FieldType::Scalar(scalar) => accepts(*scalar, value),
        FieldType::Array(scalar) => value
            .as_array()
            .is_some_and(|items| items.iter().all(|item| accepts(*scalar, item))),
        FieldType::Relation(_) => is_id(value),
        FieldType::RelationList(_) => value
            .as_array()
            .is_some_and(|items| items.iter().all(is_id)),
        FieldType::GenericRelation(_) => is_fqid(value),
        FieldType::GenericRelationList(_) => value
            .as_array()
            .is_some_and(|items| items.iter().all(is_fqid)),
    };
    if ok {
        Ok(())
    } else {
        Err(FieldError::Type {
            expected: field_type.type_name(),
        })
    }
}

/// Scalar predicate for one value (never null).
#[must_use]
pub fn accepts(scalar: ScalarType, value: &Value) -> bool {
    match scalar {
        ScalarType::String
        | ScalarType::Text
        | ScalarType::HtmlStrict
        | ScalarType::HtmlPermissive => value.is_string(),
        ScalarType::Number | ScalarType::Timestamp => value.is_i64() || value.is_u64(),
        ScalarType::Float => value.is_number(),
        ScalarType::Decimal => value.as_str().is_some_and(|s| DECIMAL_RE.is_match(s)),
        ScalarType::Boolean => value.is_boolean(),
        ScalarType::Color => value.as_str().is_some_and(|s| COLOR_RE.is_match(s)),
        ScalarType::Json => value.is_array() || value.is_object(),
    }
}

/// Evaluate enum, range, length, pattern and HTML constraints.
///
/// Assumes the value already passed [`check_type`].
///
/// # Errors
///
/// Returns the first violated constraint.
pub fn check_constraints(field: &Field, value: &Value) -> Result<(), FieldError> {
    let constraints = &field.constraints;
    match (&field.field_type, value) {
        (FieldType::Array(_), Value::Array(items)) => {
            if let Some(bad) = items.iter().find(|v| !constraints.allows_enum_value(v)) {
                return Err(enum_error(bad));
            }
            return Ok(());
        }
        (FieldType::Scalar(_), _) if !constraints.allows_enum_value(value) => {
            return Err(enum_error(value));
        }
        (FieldType::Scalar(scalar), _) => check_scalar_constraints(field, *scalar, value)?,
        _ => {}
    }
    Ok(())
}

fn check_scalar_constraints(
    field: &Field,
    scalar: ScalarType,
    value: &Value,
) -> Result<(), FieldError> {
    let constraints = &field.constraints;

    let numeric = match scalar {
        ScalarType::Decimal => value.as_str().and_then(|s| s.parse::<f64>().ok()),
        ScalarType::Number | ScalarType::Float | ScalarType::Timestamp => value.as_f64(),
        _ => None,
    };
    if let Some(n) = numeric {
        if let Some(minimum) = constraints.minimum
            && n < minimum
        {
            return Err(FieldError::BelowMinimum {
                value: display_value(value),
                minimum: minimum.to_string(),
            });
        }
        if let Some(maximum) = constraints.maximum
            && n > maximum
        {
            return Err(FieldError::AboveMaximum {
                value: display_value(value),
                maximum: maximum.to_string(),
            });
        }
    }

    let Some(text) = value.as_str() else {
        return Ok(());
    };

    let length = text.chars().count();
    let max_length = constraints.max_length.or_else(|| {
        (scalar == ScalarType::String).then_some(ScalarType::STRING_MAX_LENGTH)
    });
    if let Some(max_length) = max_length
        && length > max_length
    {
        return Err(FieldError::TooLong { length, max_length });
    }
    if let Some(min_length) = constraints.min_length
        && length < min_length
    {
        return Err(FieldError::TooShort { length, min_length });
    }
    if let Some(pattern) = &constraints.pattern
        && !pattern.is_match(text)
    {
        return Err(FieldError::Pattern {
            value: text.to_string(),
            pattern: pattern.as_str().to_string(),
        });
    }

    let policy = match scalar {
        ScalarType::HtmlStrict => HtmlPolicy::Strict,
        ScalarType::HtmlPermissive => HtmlPolicy::Permissive,
        _ => return Ok(()),
    };
    if sanitize(text, policy)? != text {
        return Err(FieldError::Unsanitized(policy));
    }
    Ok(())
}

/// Null, empty strings and empty lists count as empty for required fields.
#[must_use]
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Render a value for error messages: strings without quotes.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn enum_error(value: &Value) -> FieldError {
    FieldError::Enum {
        value: display_value(value),
    }
}

fn is_id(value: &Value) -> bool {
    value.as_u64().is_some_and(|id| id > 0)
}

fn is_fqid(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.parse::<Fqid>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Constraints, OnDelete, RelationTarget};
    use serde_json::json;

    fn field(field_type: FieldType) -> Field {
        Field {
            collection: "test".into(),
            name: "f".into(),
            field_type,
            required: false,
            default: None,
            constraints: Constraints::default(),
            on_delete: OnDelete::SetNull,
            equal_fields: Vec::new(),
            calculated: false,
        }
    }

    fn scalar(scalar: ScalarType) -> Field {
        field(FieldType::Scalar(scalar))
    }

    #[test]
    fn scalar_predicates() {
        assert!(accepts(ScalarType::Number, &json!(3)));
        assert!(!accepts(ScalarType::Number, &json!(3.5)));
        assert!(accepts(ScalarType::Float, &json!(3.5)));
        assert!(accepts(ScalarType::Timestamp, &json!(1_700_000_000)));
        assert!(accepts(ScalarType::Boolean, &json!(false)));
        assert!(!accepts(ScalarType::Boolean, &json!("true")));
        assert!(accepts(ScalarType::Json, &json!({"a": [1, null]})));
        assert!(!accepts(ScalarType::Json, &json!("x")));
    }

    #[test]
    fn decimal_literals() {
        for ok in ["1.000000", "-0.500000", "12.000001"] {
            assert!(accepts(ScalarType::Decimal, &json!(ok)), "{ok}");
        }
        for bad in ["1.0", "01.000000", "1.0000000", "abc", "1"] {
            assert!(!accepts(ScalarType::Decimal, &json!(bad)), "{bad}");
        }
        assert!(!accepts(ScalarType::Decimal, &json!(1.0)));
    }

    #[test]
    fn colors_are_lowercase_hex() {
        assert!(accepts(ScalarType::Color, &json!("#a1b2c3")));
        assert!(!accepts(ScalarType::Color, &json!("#A1B2C3")));
        assert!(!accepts(ScalarType::Color, &json!("#abc")));
    }

    #[test]
    fn null_only_for_optional_fields() {
        let mut f = scalar(ScalarType::String);
        assert!(validate(&f, &Value::Null).is_ok());
        f.required = true;
        assert_eq!(validate(&f, &Value::Null), Err(FieldError::RequiredEmpty));
    }

    #[test]
    fn relation_values() {
        let target = RelationTarget::new("motion", "x");
        assert!(check_type(&FieldType::Relation(target.clone()), &json!(1)).is_ok());
        assert!(check_type(&FieldType::Relation(target.clone()), &json!(0)).is_err());
        assert!(check_type(&FieldType::RelationList(target.clone()), &json!([1, 2])).is_ok());
        let generic = FieldType::GenericRelation(vec![target]);
        assert!(check_type(&generic, &json!("motion/1")).is_ok());
        let err = check_type(&generic, &json!(1)).unwrap_err();
        assert_eq!(err.to_string(), "Type error: Can't parse to generic-relation");
    }

    #[test]
    fn enum_messages_print_bare_values() {
        let mut f = scalar(ScalarType::String);
        f.constraints.enum_values = Some(vec![json!("en"), json!("de")]);
        let err = validate(&f, &json!("1337")).unwrap_err();
        assert_eq!(err.to_string(), "Value error: Value 1337 is not a valid enum value");
    }

    #[test]
    fn array_enum_checks_each_element() {
        let mut f = field(FieldType::Array(ScalarType::String));
        f.constraints.enum_values = Some(vec![json!("a"), json!("b")]);
        assert!(validate(&f, &json!(["a", "b"])).is_ok());
        assert!(matches!(
            validate(&f, &json!(["a", "c"])),
            Err(FieldError::Enum { value }) if value == "c"
        ));
    }

    #[test]
    fn string_length_defaults_and_overrides() {
        let f = scalar(ScalarType::String);
        assert!(validate(&f, &json!("x".repeat(256))).is_ok());
        assert!(matches!(
            validate(&f, &json!("x".repeat(257))),
            Err(FieldError::TooLong { max_length: 256, .. })
        ));
        assert!(validate(&scalar(ScalarType::Text), &json!("x".repeat(1000))).is_ok());

        let mut short = scalar(ScalarType::String);
        short.constraints.max_length = Some(3);
        short.constraints.min_length = Some(2);
        assert!(validate(&short, &json!("abcd")).is_err());
        assert!(validate(&short, &json!("a")).is_err());
        assert!(validate(&short, &json!("ab")).is_ok());
    }

    #[test]
    fn numeric_ranges_cover_decimals() {
        let mut f = scalar(ScalarType::Decimal);
        f.constraints.minimum = Some(0.000_001);
        assert!(validate(&f, &json!("1.000000")).is_ok());
        assert!(matches!(
            validate(&f, &json!("0.000000")),
            Err(FieldError::BelowMinimum { .. })
        ));

        let mut n = scalar(ScalarType::Number);
        n.constraints.maximum = Some(10.0);
        assert!(matches!(
            validate(&n, &json!(11)),
            Err(FieldError::AboveMaximum { .. })
        ));
    }

    #[test]
    fn pattern_constraint() {
        let mut f = scalar(ScalarType::String);
        f.constraints.pattern = Some(Regex::new("^https?://").unwrap());
        assert!(validate(&f, &json!("https://example.org")).is_ok());
        assert!(matches!(
            validate(&f, &json!("ftp://x")),
            Err(FieldError::Pattern { .. })
        ));
    }

    #[test]
    fn html_must_be_sanitized() {
        let f = scalar(ScalarType::HtmlStrict);
        assert!(validate(&f, &json!("<p>ok</p>")).is_ok());
        assert_eq!(
            validate(&f, &json!("<p>ok</p><script>x</script>")),
            Err(FieldError::Unsanitized(HtmlPolicy::Strict))
        );
        assert!(matches!(
            validate(&f, &json!("<p class=\"x")),
            Err(FieldError::Html(HtmlError::UnterminatedTag(0)))
        ));
    }

    #[test]
    fn emptiness() {
        assert!(is_empty(&json!("")));
        assert!(is_empty(&json!([])));
        assert!(!is_empty(&json!(0)));
        assert!(!is_empty(&json!(false)));
    }
}
