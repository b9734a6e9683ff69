//! Dotted/indexed path navigation over JSON values.
//!
//! Grammar: segments separated by `.`; each segment is an object key
//! (`body`), an array index (`0`), a keyed index (`items[3]`) or the
//! `length` pseudo-property of an array.

use serde_json::Value;
use std::borrow::Cow;

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Object key lookup.
    Key(&'a str),
    /// Array index.
    Index(usize),
    /// Object key, then an index into the array stored there.
    KeyIndex(&'a str, usize),
}

/// Split a path into segments. Empty segments (`a..b`, a trailing
/// `.`) are skipped.
pub fn parse_segments(path: &str) -> Vec<Segment<'_>> {
    path.split('.')
        .filter(|part| !part.is_empty())
        .map(parse_segment)
        .collect()
}

fn parse_segment(part: &str) -> Segment<'_> {
    if let Some(open) = part.find('[') {
        if let Some(inner) = part[open + 1..].strip_suffix(']') {
            let name = &part[..open];
            if let Ok(idx) = inner.parse::<usize>() {
                if !name.is_empty() && is_identifier(name) {
                    return Segment::KeyIndex(name, idx);
                }
            }
        }
    }
    if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(idx) = part.parse::<usize>() {
            return Segment::Index(idx);
        }
    }
    Segment::Key(part)
}

fn is_identifier(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Resolve `path` against `root`.
///
/// `None` means the path is absent, which is a normal outcome and not
/// an error. The empty path yields `root` itself.
pub fn resolve(root: &Value, path: &str) -> Option<Value> {
    let mut current: Cow<'_, Value> = Cow::Borrowed(root);

    for segment in parse_segments(path) {
        current = match segment {
            Segment::KeyIndex(name, idx) => match current {
                Cow::Borrowed(Value::Object(map)) => match map.get(name)? {
                    Value::Array(items) => Cow::Borrowed(items.get(idx)?),
                    _ => return None,
                },
                _ => return None,
            },
            Segment::Index(idx) => match current {
                Cow::Borrowed(Value::Array(items)) => {
                    Cow::Borrowed(items.get(idx)?)
                }
                _ => return None,
            },
            Segment::Key(name) => match current {
                Cow::Borrowed(Value::Object(map)) => {
                    Cow::Borrowed(map.get(name)?)
                }
                Cow::Borrowed(Value::Array(items)) if name == "length" => {
                    Cow::Owned(Value::from(items.len()))
                }
                _ => return None,
            },
        };
    }

    Some(current.into_owned())
}
