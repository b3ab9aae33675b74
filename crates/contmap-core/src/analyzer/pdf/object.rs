//! Recursive-descent parser for PDF objects over a token list.

use super::tokenizer::{Token, TokenKind};
use serde_json::{json, Map, Value};
use tracing::{debug, trace};

/// Nesting limit for arrays and dictionaries
const MAX_NESTING: usize = 256;

/// Location of a stream payload within the analyzed data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpan {
    /// Offset of the first payload byte
    pub offset: usize,
    /// Payload length
    pub length: usize,
}

/// A dictionary with its optional stream payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary {
    entries: Vec<(String, PdfObject)>,
    stream: Option<StreamSpan>,
}

impl Dictionary {
    /// Inserts an entry, a repeated key replaces the earlier value
    pub fn insert(&mut self, key: String, value: PdfObject) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Looks up an entry by name, including the leading slash
    pub fn get(&self, key: &str) -> Option<&PdfObject> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the dictionary has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stream payload following the dictionary, if any
    pub fn stream(&self) -> Option<StreamSpan> {
        self.stream
    }

    /// Returns true if the first `/Filter` is zlib/deflate
    pub fn is_flate_encoded(&self) -> bool {
        let first = match self.get("/Filter") {
            Some(PdfObject::Array(items)) => items.first(),
            other => other,
        };
        matches!(first, Some(PdfObject::Name(name)) if name == "/FlateDecode" || name == "/Fl")
    }
}

/// A parsed PDF object
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    /// `null`, also the placeholder for unparseable values
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Name including its leading slash
    Name(String),
    /// Literal string content without the enclosing parentheses
    LiteralString(String),
    /// Hex string content without the enclosing angle brackets
    HexString(String),
    /// `[ ... ]`
    Array(Vec<PdfObject>),
    /// `<< ... >>`, optionally followed by a stream
    Dictionary(Dictionary),
    /// `n g R`
    Reference {
        /// Referenced object number
        object_number: i64,
        /// Referenced generation number
        generation_number: i64,
    },
    /// `n g obj ... endobj`
    Indirect {
        /// Object number
        object_number: i64,
        /// Generation number
        generation_number: i64,
        /// The wrapped value
        value: Box<PdfObject>,
    },
}

impl PdfObject {
    /// Type name used in JSON output
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) | Self::Real(_) => "numeric",
            Self::Name(_) => "name",
            Self::LiteralString(_) => "literal_str",
            Self::HexString(_) => "hex_str",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dictionary",
            Self::Reference { .. } => "reference",
            Self::Indirect { .. } => "indirect_obj",
        }
    }

    /// JSON rendering for nesting inside other objects
    ///
    /// Scalars render as plain values. References and indirect objects render
    /// as tagged objects, and a dictionary's stream appears under `stream`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(n) => Value::from(*n),
            Self::Real(r) => serde_json::Number::from_f64(*r).map_or(Value::Null, Value::Number),
            Self::Name(s) | Self::LiteralString(s) | Self::HexString(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(PdfObject::to_value).collect()),
            Self::Dictionary(dictionary) => {
                let mut object = Map::new();
                for (key, value) in &dictionary.entries {
                    object.insert(key.clone(), value.to_value());
                }
                if let Some(stream) = dictionary.stream {
                    object.insert(
                        "stream".into(),
                        json!({
                            "type": "stream",
                            "offset": stream.offset,
                            "length": stream.length,
                        }),
                    );
                }
                Value::Object(object)
            }
            Self::Reference { .. } | Self::Indirect { .. } => Value::Object(self.attributes()),
        }
    }

    /// Attributes for a fragment describing this object
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("type".into(), self.type_name().into());
        match self {
            Self::Reference {
                object_number,
                generation_number,
            } => {
                attributes.insert("object_number".into(), (*object_number).into());
                attributes.insert("generation_number".into(), (*generation_number).into());
            }
            Self::Indirect {
                object_number,
                generation_number,
                value,
            } => {
                attributes.insert("object_number".into(), (*object_number).into());
                attributes.insert("generation_number".into(), (*generation_number).into());
                attributes.insert("data".into(), value.to_value());
            }
            other => {
                attributes.insert("data".into(), other.to_value());
            }
        }
        attributes
    }
}

/// A parsed object and the number of tokens it consumed
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    /// The object
    pub object: PdfObject,
    /// Number of consumed tokens, including keywords and delimiters
    pub token_length: usize,
}

impl Parsed {
    fn new(object: PdfObject, token_length: usize) -> Self {
        Self {
            object,
            token_length,
        }
    }
}

/// Parses objects from functional tokens (comments removed)
///
/// Flate-encoded streams encountered along the way are collected and can be
/// taken with [`ObjectParser::take_encoded_streams`].
#[derive(Debug)]
pub struct ObjectParser<'t, 'a> {
    tokens: &'t [Token<'a>],
    encoded_streams: Vec<StreamSpan>,
}

impl<'t, 'a> ObjectParser<'t, 'a> {
    /// Creates a parser over `tokens`
    pub fn new(tokens: &'t [Token<'a>]) -> Self {
        Self {
            tokens,
            encoded_streams: Vec::new(),
        }
    }

    /// Parses the object starting at token `index`
    ///
    /// Returns `None` if the token cannot start an object.
    pub fn parse(&mut self, index: usize) -> Option<Parsed> {
        self.parse_nested(index, 0)
    }

    /// Drains the flate-encoded stream payloads seen so far
    pub fn take_encoded_streams(&mut self) -> Vec<StreamSpan> {
        std::mem::take(&mut self.encoded_streams)
    }

    fn kind(&self, index: usize) -> Option<TokenKind> {
        self.tokens.get(index).map(|t| t.kind)
    }

    fn parse_nested(&mut self, index: usize, depth: usize) -> Option<Parsed> {
        if depth > MAX_NESTING {
            debug!("object nesting exceeds {} levels", MAX_NESTING);
            return None;
        }
        match self.kind(index)? {
            TokenKind::Integer(_) | TokenKind::Real(_) => self.parse_numeric(index, depth),
            TokenKind::DictOpen => Some(self.parse_dictionary(index, depth)),
            TokenKind::ArrayOpen => Some(self.parse_array(index, depth)),
            _ => self.parse_scalar(index),
        }
    }

    /// Integer, reference `n g R`, or indirect object `n g obj ... endobj`
    fn parse_numeric(&mut self, index: usize, depth: usize) -> Option<Parsed> {
        let number = match self.kind(index)? {
            TokenKind::Integer(n) => n,
            TokenKind::Real(r) => return Some(Parsed::new(PdfObject::Real(r), 1)),
            _ => return None,
        };

        let generation = match self.kind(index + 1) {
            Some(TokenKind::Integer(g)) => g,
            _ => return Some(Parsed::new(PdfObject::Integer(number), 1)),
        };

        match self.kind(index + 2) {
            Some(TokenKind::Reference) => Some(Parsed::new(
                PdfObject::Reference {
                    object_number: number,
                    generation_number: generation,
                },
                3,
            )),
            Some(TokenKind::Obj) => {
                let (value, value_length) = match self.parse_nested(index + 3, depth + 1) {
                    Some(parsed) => (parsed.object, parsed.token_length),
                    None => match self.kind(index + 3) {
                        None | Some(TokenKind::EndObj) => (PdfObject::Null, 0),
                        Some(_) => {
                            debug!(
                                "unparseable value in object {} {} at {}",
                                number,
                                generation,
                                self.tokens[index + 3].offset
                            );
                            (PdfObject::Null, 1)
                        }
                    },
                };

                let mut token_length = 3 + value_length;
                if self.kind(index + token_length) == Some(TokenKind::EndObj) {
                    token_length += 1;
                } else {
                    debug!("object {} {} is missing endobj", number, generation);
                }

                Some(Parsed::new(
                    PdfObject::Indirect {
                        object_number: number,
                        generation_number: generation,
                        value: Box::new(value),
                    },
                    token_length,
                ))
            }
            _ => Some(Parsed::new(PdfObject::Integer(number), 1)),
        }
    }

    fn parse_dictionary(&mut self, index: usize, depth: usize) -> Parsed {
        let mut dictionary = Dictionary::default();
        let mut i = index + 1;

        loop {
            match self.tokens.get(i).copied() {
                None => {
                    debug!("unterminated dictionary at {}", self.tokens[index].offset);
                    break;
                }
                Some(token) if token.kind == TokenKind::DictClose => {
                    i += 1;
                    break;
                }
                Some(token) if token.kind == TokenKind::Name => {
                    let key = token.text().into_owned();
                    let (value, consumed) = self.value_or_placeholder(i + 1, depth);
                    dictionary.insert(key, value);
                    i += 1 + consumed;
                }
                Some(token) => {
                    trace!("skipping non-name dictionary key at {}", token.offset);
                    i += 1;
                }
            }
        }

        if self.kind(i) == Some(TokenKind::Stream) && self.kind(i + 1) == Some(TokenKind::StreamData)
        {
            let payload = self.tokens[i + 1];
            let span = StreamSpan {
                offset: payload.offset,
                length: payload.len(),
            };
            dictionary.stream = Some(span);
            if dictionary.is_flate_encoded() && span.length > 0 {
                self.encoded_streams.push(span);
            }
            i += 2;
            if self.kind(i) == Some(TokenKind::EndStream) {
                i += 1;
            }
        }

        Parsed::new(PdfObject::Dictionary(dictionary), i - index)
    }

    fn parse_array(&mut self, index: usize, depth: usize) -> Parsed {
        let mut items = Vec::new();
        let mut i = index + 1;

        loop {
            match self.kind(i) {
                None => {
                    debug!("unterminated array at {}", self.tokens[index].offset);
                    break;
                }
                Some(TokenKind::ArrayClose) => {
                    i += 1;
                    break;
                }
                Some(_) => {
                    let (value, consumed) = self.value_or_placeholder(i, depth);
                    items.push(value);
                    i += consumed;
                }
            }
        }

        Parsed::new(PdfObject::Array(items), i - index)
    }

    /// Parses a container member, substituting `null` for one unparseable token
    fn value_or_placeholder(&mut self, index: usize, depth: usize) -> (PdfObject, usize) {
        match self.parse_nested(index, depth + 1) {
            Some(parsed) => (parsed.object, parsed.token_length),
            None if self.kind(index).is_none() => (PdfObject::Null, 0),
            None => {
                trace!("placeholder for token at {}", self.tokens[index].offset);
                (PdfObject::Null, 1)
            }
        }
    }

    fn parse_scalar(&self, index: usize) -> Option<Parsed> {
        let token = self.tokens.get(index)?;
        let object = match token.kind {
            TokenKind::Null => PdfObject::Null,
            TokenKind::Boolean(b) => PdfObject::Boolean(b),
            TokenKind::Name => PdfObject::Name(token.text().into_owned()),
            TokenKind::LiteralString => PdfObject::LiteralString(inner_text(token, b')')),
            TokenKind::HexString => PdfObject::HexString(inner_text(token, b'>')),
            _ => return None,
        };
        Some(Parsed::new(object, 1))
    }
}

fn inner_text(token: &Token<'_>, closer: u8) -> String {
    let raw = &token.raw[1..];
    let raw = raw.strip_suffix(&[closer]).unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
