//! Allow-list HTML sanitizer.
//!
//! The sanitizer is a single forward pass over the input:
//!
//! - text is copied unchanged, except that a `<` which does not open a tag
//!   is escaped as `&lt;`;
//! - allowed tags carrying only allowed attributes are copied byte for byte;
//! - allowed tags with disallowed attributes are rebuilt from the allowed
//!   attributes in their original spelling;
//! - other tags and comments are dropped, and for `script`/`style` the
//!   element content is dropped as well.
//!
//! Output never contains anything the next pass would change, so
//! `sanitize(sanitize(x)) == sanitize(x)`. A field value is valid HTML iff it
//! sanitizes to itself.

use std::fmt;

/// Which allow-list to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlPolicy {
    /// Text formatting, lists, tables, links and images.
    Strict,
    /// Additionally embedded media and frames.
    Permissive,
}

/// Markup the sanitizer cannot tokenize.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HtmlError {
    #[error("unterminated tag starting at byte {0}")]
    UnterminatedTag(usize),
    #[error("unterminated comment starting at byte {0}")]
    UnterminatedComment(usize),
}

const STRICT_TAGS: [&str; 38] = [
    "a", "b", "blockquote", "br", "caption", "code", "col", "colgroup", "del", "div", "em", "h1",
    "h2", "h3", "h4", "h5", "h6", "hr", "i", "img", "ins", "li", "ol", "p", "pre", "s", "span",
    "strike", "strong", "sub", "sup", "table", "tbody", "td", "tfoot", "th", "thead", "tr",
];

const PERMISSIVE_EXTRA_TAGS: [&str; 7] = [
    "audio",
    "figcaption",
    "figure",
    "iframe",
    "source",
    "u",
    "video",
];

const GLOBAL_ATTRIBUTES: [&str; 7] = [
    "class",
    "style",
    "title",
    "lang",
    "dir",
    "align",
    "data-line-number",
];

const DROP_CONTENT_TAGS: [&str; 2] = ["script", "style"];

impl HtmlPolicy {
    fn allows_tag(self, tag: &str) -> bool {
        STRICT_TAGS.contains(&tag)
            || (self == Self::Permissive && PERMISSIVE_EXTRA_TAGS.contains(&tag))
    }

    fn allows_attribute(self, tag: &str, attribute: &str) -> bool {
        if GLOBAL_ATTRIBUTES.contains(&attribute) {
            return true;
        }
        let strict = match tag {
            "a" => matches!(attribute, "href" | "target" | "rel" | "name"),
            "img" => matches!(attribute, "src" | "alt" | "width" | "height"),
            "td" | "th" => matches!(attribute, "colspan" | "rowspan"),
            "ol" => matches!(attribute, "start" | "type"),
            "col" | "colgroup" => attribute == "span",
            _ => false,
        };
        strict
            || (self == Self::Permissive
                && match tag {
                    "iframe" => matches!(
                        attribute,
                        "src" | "width" | "height" | "allowfullscreen" | "frameborder"
                    ),
                    "video" | "audio" => {
                        matches!(attribute, "src" | "controls" | "width" | "height" | "poster")
                    }
                    "source" => matches!(attribute, "src" | "type"),
                    _ => false,
                })
    }
}

#[derive(Debug)]
struct Attribute<'a> {
    name: String,
    value: Option<&'a str>,
    raw: &'a str,
}

impl Attribute<'_> {
    fn is_safe(&self) -> bool {
        if !matches!(self.name.as_str(), "href" | "src") {
            return true;
        }
        self.value.is_none_or(|v| {
            let v = v.trim_start().to_ascii_lowercase();
            !(v.starts_with("javascript:") || v.starts_with("vbscript:"))
        })
    }
}

/// Sanitize `input` with the given allow-list.
///
/// # Errors
///
/// Returns [`HtmlError`] for an unterminated tag or comment.
pub fn sanitize(input: &str, policy: HtmlPolicy) -> Result<String, HtmlError> {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(offset) = input[pos..].find('<') {
        let start = pos + offset;
        out.push_str(&input[pos..start]);
        let rest = &input[start..];

        if rest.starts_with("<!--") {
            let end = rest[4..]
                .find("-->")
                .ok_or(HtmlError::UnterminatedComment(start))?;
            pos = start + 4 + end + 3;
            continue;
        }

        let next = bytes.get(start + 1).copied();
        match next {
            Some(b'!' | b'?') => {
                let end = rest.find('>').ok_or(HtmlError::UnterminatedTag(start))?;
                pos = start + end + 1;
            }
            Some(b'/') if bytes.get(start + 2).is_some_and(u8::is_ascii_alphabetic) => {
                let end = rest.find('>').ok_or(HtmlError::UnterminatedTag(start))?;
                let tag = tag_name(&rest[2..end]);
                if policy.allows_tag(&tag) {
                    out.push_str(&rest[..=end]);
                }
                pos = start + end + 1;
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let end = tag_end(rest).ok_or(HtmlError::UnterminatedTag(start))?;
                let body = &rest[1..end];
                let tag = tag_name(body);
                pos = start + end + 1;

                if DROP_CONTENT_TAGS.contains(&tag.as_str()) {
                    pos = skip_element_content(input, pos, &tag);
                } else if policy.allows_tag(&tag) {
                    emit_tag(&mut out, &rest[..=end], body, &tag, policy);
                }
            }
            _ => {
                out.push_str("&lt;");
                pos = start + 1;
            }
        }
    }
    out.push_str(&input[pos..]);
    Ok(out)
}

/// Returns `true` if `input` is unchanged by [`sanitize`].
#[must_use]
pub fn is_sanitized(input: &str, policy: HtmlPolicy) -> bool {
    sanitize(input, policy).is_ok_and(|clean| clean == input)
}

fn tag_name(body: &str) -> String {
    body.chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Index of the `>` closing the tag that starts at `rest[0]`, skipping
/// quoted attribute values.
fn tag_end(rest: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in rest.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

fn skip_element_content(input: &str, from: usize, tag: &str) -> usize {
    let closing = format!("</{tag}");
    let lower = input[from..].to_ascii_lowercase();
    lower.find(&closing).map_or(input.len(), |at| {
        let close_start = from + at;
        input[close_start..]
            .find('>')
            .map_or(input.len(), |end| close_start + end + 1)
    })
}

fn emit_tag(out: &mut String, raw_tag: &str, body: &str, tag: &str, policy: HtmlPolicy) {
    let attributes = parse_attributes(&body[tag.len()..]);
    let all_allowed = attributes
        .iter()
        .all(|a| policy.allows_attribute(tag, &a.name) && a.is_safe());
    if all_allowed {
        out.push_str(raw_tag);
        return;
    }

    out.push('<');
    out.push_str(&body[..tag.len()]);
    for attribute in attributes
        .iter()
        .filter(|a| policy.allows_attribute(tag, &a.name) && a.is_safe())
    {
        out.push(' ');
        out.push_str(attribute.raw);
    }
    if body.trim_end().ends_with('/') {
        out.push_str(" /");
    }
    out.push('>');
}

fn parse_attributes(source: &str) -> Vec<Attribute<'_>> {
    let bytes = source.as_bytes();
    let mut attributes = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() || bytes[i] == b'/' {
            i += 1;
            continue;
        }
        let name_start = i;
        while i < bytes.len() && !matches!(bytes[i], b'=' | b'/') && !bytes[i].is_ascii_whitespace()
        {
            i += 1;
        }
        let name = source[name_start..i].to_ascii_lowercase();

        let mut value = None;
        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'=' {
            j += 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && matches!(bytes[j], b'"' | b'\'') {
                let quote = bytes[j];
                let value_start = j + 1;
                let value_end = source[value_start..]
                    .bytes()
                    .position(|b| b == quote)
                    .map_or(bytes.len(), |p| value_start + p);
                value = Some(&source[value_start..value_end]);
                i = (value_end + 1).min(bytes.len());
            } else {
                let value_start = j;
                while j < bytes.len() && !bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                value = Some(&source[value_start..j]);
                i = j;
            }
        }

        attributes.push(Attribute {
            name,
            value,
            raw: source[name_start..i].trim_end(),
        });
    }
    attributes
}

impl fmt::Display for HtmlPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "HTMLStrict",
            Self::Permissive => "HTMLPermissive",
        })
    }
}
