// src/parser/tokenizer.rs

/// One lexical unit of the model's tagged output.
///
/// Tokens carry byte offsets into the original string so field values can
/// be recovered as raw slices, including any malformed tags embedded in
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    /// Byte offset of the first byte of the token.
    pub start: usize,
    /// Byte offset one past the last byte of the token.
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind<'a> {
    /// `<s_NAME>` with NAME being one or more word characters.
    Open(&'a str),
    /// `</s_NAME>`, same naming rule as `Open`.
    Close(&'a str),
    /// The literal item separator `<sep/>`.
    Sep,
    /// Anything else, including `<` runs that do not form a valid tag.
    Text,
}

/// Split a raw model output string into tokens.
///
/// Only the three tag forms are recognized; a `<` that does not begin one
/// of them is ordinary text. Tag names are case-sensitive and restricted
/// to `[A-Za-z0-9_]+`. Never fails: arbitrary input lexes to some token
/// sequence.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let Some((kind, end)) = match_tag(input, i) else {
            // Not a tag. The '<' stays in the surrounding text run.
            i += 1;
            continue;
        };
        if text_start < i {
            tokens.push(Token {
                kind: TokenKind::Text,
                start: text_start,
                end: i,
            });
        }
        tokens.push(Token { kind, start: i, end });
        i = end;
        text_start = end;
    }

    if text_start < bytes.len() {
        tokens.push(Token {
            kind: TokenKind::Text,
            start: text_start,
            end: bytes.len(),
        });
    }

    tokens
}

/// Try to read one tag starting at byte offset `at` (which holds a `<`).
fn match_tag(input: &str, at: usize) -> Option<(TokenKind<'_>, usize)> {
    let rest = &input[at..];

    if rest.starts_with("<sep/>") {
        return Some((TokenKind::Sep, at + "<sep/>".len()));
    }
    if let Some(after) = rest.strip_prefix("</s_") {
        let name = leading_word(after)?;
        let end = at + "</s_".len() + name.len();
        if input[end..].starts_with('>') {
            return Some((TokenKind::Close(name), end + 1));
        }
        return None;
    }
    if let Some(after) = rest.strip_prefix("<s_") {
        let name = leading_word(after)?;
        let end = at + "<s_".len() + name.len();
        if input[end..].starts_with('>') {
            return Some((TokenKind::Open(name), end + 1));
        }
        return None;
    }
    None
}

/// Longest leading run of word characters, or None if there is none.
fn leading_word(s: &str) -> Option<&str> {
    let len = s
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    if len == 0 { None } else { Some(&s[..len]) }
}
