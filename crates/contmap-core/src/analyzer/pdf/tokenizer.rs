//! Direct byte-scanning PDF tokenizer.
//!
//! PDF tokens are not uniformly whitespace-delimited: names, brackets and
//! dictionary markers may abut their neighbours, literal strings nest
//! parentheses, and stream payloads are opaque binary runs terminated only
//! by the `endstream` keyword. The tokenizer therefore dispatches on the
//! leading byte of every token instead of splitting on whitespace.

use crate::analyzer::find_from;
use std::borrow::Cow;

/// `NUL`, `TAB`, `LF`, `FF`, `CR`, `SPACE`
pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\x00' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

/// Bytes that end a regular token without being part of it
pub fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Token classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    /// `%PDF-x.y`
    Header,
    /// `%` up to the end of the line
    Comment,
    /// `%%EOF`
    Eof,
    /// `xref`
    Xref,
    /// `trailer`
    Trailer,
    /// `startxref`
    StartXref,
    /// `obj`
    Obj,
    /// `endobj`
    EndObj,
    /// `stream`
    Stream,
    /// Opaque stream payload between `stream` and `endstream`
    StreamData,
    /// `endstream`
    EndStream,
    /// `R`
    Reference,
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// `/Name`
    Name,
    /// `( ... )`
    LiteralString,
    /// `< ... >`
    HexString,
    /// `[`
    ArrayOpen,
    /// `]`
    ArrayClose,
    /// `<<`
    DictOpen,
    /// `>>`
    DictClose,
    /// `{` or `}` (PostScript calculator functions)
    Brace,
    /// Any other regular run, e.g. the `n`/`f` flags of xref entries
    Keyword,
}

/// A token and the bytes it was read from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    /// Offset of the first byte within the tokenized data
    pub offset: usize,
    /// The raw token bytes
    pub raw: &'a [u8],
    /// Classification
    pub kind: TokenKind,
}

impl<'a> Token<'a> {
    fn new(data: &'a [u8], start: usize, end: usize, kind: TokenKind) -> Self {
        Self {
            offset: start,
            raw: &data[start..end],
            kind,
        }
    }

    /// Length of the raw token
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true for zero-length tokens (empty stream payloads)
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// End offset (exclusive)
    pub fn end(&self) -> usize {
        self.offset + self.raw.len()
    }

    /// The raw bytes as text
    pub fn text(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.raw)
    }
}

/// Splits PDF data into tokens
pub fn tokenize(data: &[u8]) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    loop {
        pos = skip_whitespace(data, pos);
        if pos >= data.len() {
            break;
        }

        pos = match data[pos] {
            b'%' => read_comment(data, pos, &mut tokens),
            b'(' => {
                let end = literal_string_end(data, pos);
                tokens.push(Token::new(data, pos, end, TokenKind::LiteralString));
                end
            }
            b'<' if data.get(pos + 1) == Some(&b'<') => {
                tokens.push(Token::new(data, pos, pos + 2, TokenKind::DictOpen));
                pos + 2
            }
            b'<' => {
                let end = data[pos..]
                    .iter()
                    .position(|&b| b == b'>')
                    .map_or(data.len(), |i| pos + i + 1);
                tokens.push(Token::new(data, pos, end, TokenKind::HexString));
                end
            }
            b'>' if data.get(pos + 1) == Some(&b'>') => {
                tokens.push(Token::new(data, pos, pos + 2, TokenKind::DictClose));
                pos + 2
            }
            b'[' => {
                tokens.push(Token::new(data, pos, pos + 1, TokenKind::ArrayOpen));
                pos + 1
            }
            b']' => {
                tokens.push(Token::new(data, pos, pos + 1, TokenKind::ArrayClose));
                pos + 1
            }
            b'{' | b'}' => {
                tokens.push(Token::new(data, pos, pos + 1, TokenKind::Brace));
                pos + 1
            }
            b')' | b'>' => {
                // unbalanced closer
                tokens.push(Token::new(data, pos, pos + 1, TokenKind::Keyword));
                pos + 1
            }
            b'/' => {
                let end = regular_end(data, pos + 1);
                tokens.push(Token::new(data, pos, end, TokenKind::Name));
                end
            }
            _ => {
                let end = regular_end(data, pos);
                let raw = &data[pos..end];
                if raw == b"stream" {
                    tokens.push(Token::new(data, pos, end, TokenKind::Stream));
                    read_stream(data, end, &mut tokens)
                } else {
                    tokens.push(Token::new(data, pos, end, classify_regular(raw)));
                    end
                }
            }
        };
    }

    tokens
}

fn skip_whitespace(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() && is_whitespace(data[pos]) {
        pos += 1;
    }
    pos
}

fn regular_end(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() && !is_whitespace(data[pos]) && !is_delimiter(data[pos]) {
        pos += 1;
    }
    pos
}

fn read_comment<'a>(data: &'a [u8], pos: usize, tokens: &mut Vec<Token<'a>>) -> usize {
    let line_end = data[pos..]
        .iter()
        .position(|&b| b == b'\n' || b == b'\r')
        .map_or(data.len(), |i| pos + i);
    let line = &data[pos..line_end];

    if line.starts_with(b"%PDF-") && line.len() >= 8 {
        tokens.push(Token::new(data, pos, pos + 8, TokenKind::Header));
        return pos + 8;
    }
    if line.starts_with(b"%%EOF") {
        tokens.push(Token::new(data, pos, pos + 5, TokenKind::Eof));
        return pos + 5;
    }

    let trimmed = line
        .iter()
        .rposition(|&b| !is_whitespace(b))
        .map_or(pos + 1, |i| pos + i + 1);
    tokens.push(Token::new(data, pos, trimmed, TokenKind::Comment));
    line_end
}

/// Returns the offset just past the `)` balancing the `(` at `pos`
fn literal_string_end(data: &[u8], pos: usize) -> usize {
    let mut depth = 0usize;
    let mut i = pos;
    while i < data.len() {
        match data[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    data.len()
}

/// Emits the opaque payload and `endstream`, returning the resume offset
fn read_stream<'a>(data: &'a [u8], keyword_end: usize, tokens: &mut Vec<Token<'a>>) -> usize {
    let start = skip_whitespace(data, keyword_end);
    match find_from(data, b"endstream", start) {
        Some(end_keyword) => {
            let payload_end = trim_end(data, start, end_keyword);
            tokens.push(Token::new(data, start, payload_end, TokenKind::StreamData));
            tokens.push(Token::new(
                data,
                end_keyword,
                end_keyword + 9,
                TokenKind::EndStream,
            ));
            end_keyword + 9
        }
        None => {
            let payload_end = trim_end(data, start, data.len());
            tokens.push(Token::new(data, start, payload_end, TokenKind::StreamData));
            data.len()
        }
    }
}

fn trim_end(data: &[u8], start: usize, mut end: usize) -> usize {
    while end > start && is_whitespace(data[end - 1]) {
        end -= 1;
    }
    end
}

fn classify_regular(raw: &[u8]) -> TokenKind {
    match raw {
        b"true" => TokenKind::Boolean(true),
        b"false" => TokenKind::Boolean(false),
        b"null" => TokenKind::Null,
        b"obj" => TokenKind::Obj,
        b"endobj" => TokenKind::EndObj,
        b"endstream" => TokenKind::EndStream,
        b"xref" => TokenKind::Xref,
        b"trailer" => TokenKind::Trailer,
        b"startxref" => TokenKind::StartXref,
        b"R" => TokenKind::Reference,
        _ => parse_number(raw).unwrap_or(TokenKind::Keyword),
    }
}

fn parse_number(raw: &[u8]) -> Option<TokenKind> {
    let text = std::str::from_utf8(raw).ok()?;
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    let digits = body.bytes().filter(u8::is_ascii_digit).count();
    let dots = body.bytes().filter(|&b| b == b'.').count();
    if digits == 0 || dots > 1 || digits + dots != body.len() {
        return None;
    }

    if dots == 0 {
        if let Ok(value) = text.parse::<i64>() {
            return Some(TokenKind::Integer(value));
        }
    }
    // PDF allows "-.5" and "4." which Rust's float parser handles
    text.parse::<f64>().ok().map(TokenKind::Real)
}
