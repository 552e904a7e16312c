// src/parser/mod.rs

mod tokenizer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokenizer::{Token, TokenKind, tokenize};

/// One menu line item: tag name to the values seen for it, in encounter
/// order. Values are lists because the same tag may legitimately repeat
/// within one item (e.g. two `num` occurrences), and the order of
/// repeats carries meaning.
pub type MenuItem = BTreeMap<String, Vec<String>>;

/// A flat section (`sub_total`, `total`): tag name to a single value,
/// last occurrence winning.
pub type FlatRecord = BTreeMap<String, String>;

/// Structured result of parsing one model output string.
///
/// A section key is present only when its opening and closing tags were
/// both found; a present section with no recognized fields is an empty
/// value, not an absent one. Serializes to the documented JSON shape
/// with absent sections omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu: Option<Vec<MenuItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_total: Option<FlatRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<FlatRecord>,
}

impl ParsedReceipt {
    /// True when no section was found at all. Callers use this for the
    /// "could not extract data" decision; the parser itself never fails.
    pub fn is_empty(&self) -> bool {
        self.menu.is_none() && self.sub_total.is_none() && self.total.is_none()
    }

    /// How many of the three sections were found.
    pub fn coverage(&self) -> (usize, usize) {
        let total = 3;
        let filled = [
            self.menu.is_some(),
            self.sub_total.is_some(),
            self.total.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }
}

/// Parse the tagged output of the receipt model into a `ParsedReceipt`.
///
/// Pure and infallible: missing sections, unmatched or malformed tags,
/// and empty fragments all resolve to absence in the result, never to an
/// error. The caller is expected to have stripped the model's sentinel
/// tokens and leading task prompt first (see
/// `inference::clean_model_output`); this function does not re-strip.
pub fn parse(output: &str) -> ParsedReceipt {
    let tokens = tokenize(output);
    ParsedReceipt {
        menu: section_window(&tokens, "menu").map(|w| collect_menu(output, w)),
        sub_total: section_window(&tokens, "sub_total").map(|w| collect_flat(output, w)),
        total: section_window(&tokens, "total").map(|w| collect_flat(output, w)),
    }
}

/// Locate a section: the first `<s_NAME>` that has a later `</s_NAME>`
/// anywhere in the stream. Returns the tokens strictly between the pair,
/// or None when no such pair exists. First occurrence wins; the search
/// runs over the whole stream, so a section embedded in another
/// section's content is still found.
fn section_window<'t, 'a>(tokens: &'t [Token<'a>], name: &str) -> Option<&'t [Token<'a>]> {
    let open = tokens
        .iter()
        .position(|t| matches!(t.kind, TokenKind::Open(n) if n == name))?;
    let close_offset = tokens[open + 1..]
        .iter()
        .position(|t| matches!(t.kind, TokenKind::Close(n) if n == name))?;
    Some(&tokens[open + 1..open + 1 + close_offset])
}

/// Collect `(name, value)` fields within a window, left to right,
/// non-overlapping. The value of a field is the raw input slice between
/// its open tag and the nearest later close tag of the same name, so
/// foreign or unbalanced tags in between are captured as value text. An
/// open tag with no matching close in the window is skipped, as is a
/// close with no pending open.
fn collect_fields<'a>(input: &'a str, window: &[Token<'a>]) -> Vec<(&'a str, &'a str)> {
    let mut fields = Vec::new();
    let mut i = 0;
    while i < window.len() {
        let TokenKind::Open(name) = window[i].kind else {
            i += 1;
            continue;
        };
        let close_offset = window[i + 1..]
            .iter()
            .position(|t| matches!(t.kind, TokenKind::Close(n) if n == name));
        match close_offset {
            Some(off) => {
                let close = &window[i + 1 + off];
                fields.push((name, &input[window[i].end..close.start]));
                i += off + 2;
            }
            None => i += 1,
        }
    }
    fields
}

/// Assemble the menu section: `<sep/>` splits the window into fragments,
/// one candidate line item each. Blank fragments and fragments yielding
/// no fields contribute nothing.
fn collect_menu(input: &str, window: &[Token<'_>]) -> Vec<MenuItem> {
    let mut items = Vec::new();

    for fragment in window.split(|t| matches!(t.kind, TokenKind::Sep)) {
        if fragment_is_blank(input, fragment) {
            continue;
        }

        let mut item = MenuItem::new();
        for (name, value) in collect_fields(input, fragment) {
            item.entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }

        if !item.is_empty() {
            items.push(item);
        }
    }

    items
}

/// Assemble a flat section: every field assigned in order, so a repeated
/// tag name keeps its last value.
fn collect_flat(input: &str, window: &[Token<'_>]) -> FlatRecord {
    let mut record = FlatRecord::new();
    for (name, value) in collect_fields(input, window) {
        record.insert(name.to_string(), value.to_string());
    }
    record
}

fn fragment_is_blank(input: &str, fragment: &[Token<'_>]) -> bool {
    fragment.iter().all(|t| {
        matches!(t.kind, TokenKind::Text) && input[t.start..t.end].trim().is_empty()
    })
}
