//! Dotted field references embedded in workflow documents.

use once_cell::sync::Lazy;
use regex::Regex;

/// Segment marking a subform ("events") context inside a reference.
pub const EVENTS_SEGMENT: &str = "events";

static CAMEL_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+|[A-Z][^A-Z]*").expect("valid camel-case word regex"));

/// A reference with more than two dotted segments, e.g.
/// `Participant.extensions.events.SCE.user`.
///
/// Two-segment references are core fields and never parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldReference<'a> {
    raw: &'a str,
    segments: Vec<&'a str>,
}

impl<'a> FieldReference<'a> {
    pub fn parse(raw: &'a str) -> Option<Self> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() <= 2 {
            return None;
        }
        Some(Self { raw, segments })
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// Environment-local field code (final segment).
    pub fn code(&self) -> &'a str {
        self.segments[self.segments.len() - 1]
    }

    /// Subform token preceding the code, when the reference sits in an
    /// events context.
    pub fn events_token(&self) -> Option<&'a str> {
        if !self.segments.contains(&EVENTS_SEGMENT) {
            return None;
        }
        Some(self.segments[self.segments.len() - 2])
    }

    /// The reference with `code` appended as a new final segment.
    pub fn appended(&self, code: &str) -> String {
        format!("{}.{code}", self.raw)
    }
}

/// Derives a subform's display name from its camel-case block token:
/// `SpecimenCollectionEvent` becomes `Collection Event`.
pub fn subform_display_name(token: &str) -> String {
    let words: Vec<&str> = CAMEL_WORD_RE.find_iter(token).map(|m| m.as_str()).collect();
    let words = match words.split_first() {
        Some((&"Specimen", rest)) => rest,
        _ => words.as_slice(),
    };
    title_case(&words.join(" "))
}

/// Uppercases the first letter of every alphabetic run, lowercases the rest.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_is_letter = false;
    for c in value.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(c);
            previous_is_letter = false;
        }
    }
    out
}
