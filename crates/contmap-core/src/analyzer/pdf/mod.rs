//! PDF analyzer.
//!
//! A PDF file is walked as a sequence of revisions, each consisting of a
//! body of indirect objects, a cross-reference table, a trailer dictionary,
//! a `startxref` pointer and an `%%EOF` marker. Incremental updates simply
//! repeat the sequence. Every recognized structure becomes a fragment that
//! extends up to the next token, so the whitespace separating tokens is
//! attributed to the structure before it.
//!
//! ## Segments
//!
//! | Key | Contents |
//! |-----|----------|
//! | `header` | `%PDF-x.y` with its `version` |
//! | `body` | indirect objects and bare numbers |
//! | `xref` | the `xref` keyword, subsection headers and entries |
//! | `trailer` | the `trailer` keyword and its dictionary |
//! | `startxref` | `startxref` with its `reference` offset |
//! | `eof` | `%%EOF` markers |
//! | `comments` | every comment |
//! | `whitespaces` | the bytes between tokens |
//!
//! A token that cannot continue the walk (for example the first byte of a
//! file appended after `%%EOF`) ends the section; everything from there on
//! is requested for separate analysis. Flate-encoded stream payloads are
//! requested as well.

pub mod object;
pub mod tokenizer;

use self::object::{ObjectParser, Parsed, StreamSpan};
use self::tokenizer::{tokenize, Token, TokenKind};
use super::{Outcome, StructureAnalyzer};
use crate::coverage;
use crate::model::{Fragment, Section, Segment};
use tracing::{debug, trace, warn};

/// Structure analyzer for `application/pdf`
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfAnalyzer;

impl PdfAnalyzer {
    /// Creates a new analyzer
    pub fn new() -> Self {
        Self
    }
}

impl StructureAnalyzer for PdfAnalyzer {
    fn process(&self, section: Section, data: &[u8]) -> Outcome {
        let tokens = tokenize(data);
        debug!(
            "PDF at {}: {} bytes, {} tokens",
            section.position(),
            data.len(),
            tokens.len()
        );

        let mut walk = Walk::new(data, &tokens);
        walk.run();
        walk.finish(section)
    }
}

/// State of one walk over a token list
struct Walk<'t, 'a> {
    data: &'a [u8],
    tokens: &'t [Token<'a>],
    functional: Vec<Token<'a>>,
    header: Segment,
    body: Segment,
    xref: Segment,
    trailer: Segment,
    startxref: Segment,
    eof: Segment,
    streams: Vec<StreamSpan>,
    restart: Option<usize>,
    stopped: bool,
}

impl<'t, 'a> Walk<'t, 'a> {
    fn new(data: &'a [u8], tokens: &'t [Token<'a>]) -> Self {
        let functional = tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .copied()
            .collect();

        Self {
            data,
            tokens,
            functional,
            header: Segment::new("header"),
            body: Segment::new("body"),
            xref: Segment::new("xref"),
            trailer: Segment::new("trailer"),
            startxref: Segment::new("startxref"),
            eof: Segment::new("eof"),
            streams: Vec::new(),
            restart: None,
            stopped: false,
        }
    }

    fn kind(&self, index: usize) -> Option<TokenKind> {
        self.functional.get(index).map(|t| t.kind)
    }

    /// Start of the token following the one at `offset`, or the data end
    fn fragment_end(&self, offset: usize) -> usize {
        let next = self.tokens.partition_point(|t| t.offset <= offset);
        self.tokens.get(next).map_or(self.data.len(), |t| t.offset)
    }

    /// Fragment from `first` up to the token after `last`
    fn span(&self, first: usize, last: usize) -> Fragment {
        let start = self.functional[first].offset;
        let end = self.fragment_end(self.functional[last].offset);
        Fragment::spanning(start, end)
    }

    fn parse_object(&mut self, index: usize) -> Option<Parsed> {
        let mut parser = ObjectParser::new(&self.functional);
        let parsed = parser.parse(index);
        let streams = parser.take_encoded_streams();
        self.streams.extend(streams);
        parsed
    }

    /// Ends the walk at `offset` and requests the rest for separate analysis
    fn truncate(&mut self, offset: usize) {
        self.stopped = true;
        if offset == 0 {
            warn!("PDF walk cannot start, nothing recognized");
            return;
        }
        debug!("PDF structure ends at {}, requeueing the remainder", offset);
        self.restart = Some(offset);
    }

    fn run(&mut self) {
        let mut i = self.read_header();

        while i < self.functional.len() {
            let start = i;
            i = self.read_body(i);
            if self.stopped {
                break;
            }
            i = self.read_xref(i);
            i = self.read_trailer(i);
            i = self.read_startxref(i);
            i = self.read_eof(i);

            if i == start {
                self.truncate(self.functional[i].offset);
                break;
            }
        }
    }

    fn read_header(&mut self) -> usize {
        let Some(token) = self.functional.first().copied() else {
            return 0;
        };
        if token.kind != TokenKind::Header {
            return 0;
        }

        let mut fragment = self.span(0, 0);
        if let Ok(version) = std::str::from_utf8(&token.raw[5..]) {
            fragment.set("version", version);
        }
        self.header.push(fragment);
        1
    }

    fn read_body(&mut self, mut i: usize) -> usize {
        while let Some(kind) = self.kind(i) {
            match kind {
                TokenKind::Integer(_) | TokenKind::Real(_) => {
                    let Some(parsed) = self.parse_object(i) else {
                        self.truncate(self.functional[i].offset);
                        return i;
                    };
                    let mut fragment = self.span(i, i + parsed.token_length - 1);
                    fragment.extend(parsed.object.attributes());
                    self.body.push(fragment);
                    i += parsed.token_length;
                }
                TokenKind::Xref | TokenKind::Trailer | TokenKind::StartXref | TokenKind::Eof => {
                    return i;
                }
                _ => {
                    self.truncate(self.functional[i].offset);
                    return i;
                }
            }
        }
        i
    }

    fn read_xref(&mut self, mut i: usize) -> usize {
        if self.kind(i) != Some(TokenKind::Xref) {
            return i;
        }
        let marker = self.span(i, i);
        self.xref.push(marker);
        i += 1;

        while let (Some(TokenKind::Integer(first)), Some(TokenKind::Integer(count))) =
            (self.kind(i), self.kind(i + 1))
        {
            let subsection = self
                .span(i, i + 1)
                .with("first_object_number", first)
                .with("entry_count", count);
            self.xref.push(subsection);
            i += 2;

            for n in 0..count.max(0) {
                let Some(object_number) = first.checked_add(n) else {
                    debug!(
                        "xref subsection {} overflows object numbers after {} entries",
                        first, n
                    );
                    break;
                };
                let flag = self.functional.get(i + 2).filter(|t| {
                    t.kind == TokenKind::Keyword && (t.raw == b"n" || t.raw == b"f")
                });
                match (self.kind(i), self.kind(i + 1), flag) {
                    (
                        Some(TokenKind::Integer(byte_offset)),
                        Some(TokenKind::Integer(generation)),
                        Some(flag),
                    ) => {
                        let in_use = flag.raw == b"n";
                        let entry = self
                            .span(i, i + 2)
                            .with("object_number", object_number)
                            .with("byte_offset", byte_offset)
                            .with("generation_number", generation)
                            .with("in_use", in_use);
                        self.xref.push(entry);
                        i += 3;
                    }
                    _ => {
                        debug!(
                            "xref subsection {} ends after {} of {} entries",
                            first, n, count
                        );
                        break;
                    }
                }
            }
        }
        i
    }

    fn read_trailer(&mut self, mut i: usize) -> usize {
        if self.kind(i) != Some(TokenKind::Trailer) {
            return i;
        }
        let marker = self.span(i, i);
        self.trailer.push(marker);
        i += 1;

        if self.kind(i) == Some(TokenKind::DictOpen) {
            if let Some(parsed) = self.parse_object(i) {
                let mut fragment = self.span(i, i + parsed.token_length - 1);
                fragment.extend(parsed.object.attributes());
                self.trailer.push(fragment);
                i += parsed.token_length;
            }
        }
        i
    }

    fn read_startxref(&mut self, mut i: usize) -> usize {
        if self.kind(i) != Some(TokenKind::StartXref) {
            return i;
        }
        let fragment = match self.kind(i + 1) {
            Some(TokenKind::Integer(reference)) => {
                let fragment = self.span(i, i + 1).with("reference", reference);
                i += 2;
                fragment
            }
            _ => {
                trace!("startxref without offset");
                let fragment = self.span(i, i);
                i += 1;
                fragment
            }
        };
        self.startxref.push(fragment);
        i
    }

    fn read_eof(&mut self, i: usize) -> usize {
        if self.kind(i) != Some(TokenKind::Eof) {
            return i;
        }
        let fragment = self.span(i, i);
        self.eof.push(fragment);
        i + 1
    }

    fn finish(self, mut section: Section) -> Outcome {
        let limit = self.restart.unwrap_or(self.data.len());

        let mut comments = Segment::new("comments");
        for token in self.tokens.iter().filter(|t| t.kind == TokenKind::Comment) {
            if token.offset >= limit {
                break;
            }
            let end = self.fragment_end(token.offset).min(limit);
            comments.push(Fragment::spanning(token.offset, end).with("content", token.text()));
        }

        for segment in [
            self.header,
            self.body,
            self.xref,
            self.trailer,
            self.startxref,
            self.eof,
            comments,
        ] {
            if !segment.is_empty() {
                section.add_segment(segment);
            }
        }

        match self.restart {
            Some(offset) => section.set_length(offset),
            None => {
                section.calculate_length();
                if section.length() == Some(0) {
                    section.set_length(self.data.len());
                }
            }
        }
        let length = section.length().unwrap_or(self.data.len());

        let spans: Vec<(usize, usize)> = self
            .tokens
            .iter()
            .take_while(|t| t.offset < length)
            .map(|t| (t.offset, t.len()))
            .collect();
        if let Ok(gaps) = coverage::uncovered(&spans, Some(length)) {
            let mut whitespaces = Segment::new("whitespaces");
            for gap in gaps.fragments() {
                whitespaces.push(gap.clone());
            }
            if !whitespaces.is_empty() {
                section.add_segment(whitespaces);
            }
        }

        let mut outcome = Outcome::new(section);
        for stream in self.streams.iter().filter(|s| s.offset < length) {
            outcome.request(stream.offset, Some(stream.length));
        }
        if let Some(offset) = self.restart {
            outcome.request(offset, None);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalysisRequest;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const MINIMAL: &[u8] = b"%PDF-1.4\n\
%\xE2\xE3\xCF\xD3\n\
1 0 obj\n\
<< /Type /Catalog /Pages 2 0 R >>\n\
endobj\n\
2 0 obj\n\
<< /Type /Pages /Kids [] /Count 0 >>\n\
endobj\n\
xref\n\
0 3\n\
0000000000 65535 f \n\
0000000015 00000 n \n\
0000000070 00000 n \n\
trailer\n\
<< /Size 3 /Root 1 0 R >>\n\
startxref\n\
124\n\
%%EOF\n";

    fn analyze(data: &[u8]) -> (Section, Vec<AnalysisRequest>) {
        PdfAnalyzer::new()
            .process(Section::new(0, "application/pdf", 0), data)
            .into_parts()
    }

    fn find(data: &[u8], needle: &[u8]) -> usize {
        crate::analyzer::find_subsequence(data, needle).unwrap()
    }

    #[test]
    fn test_minimal_document() {
        let (section, requests) = analyze(MINIMAL);

        assert!(requests.is_empty());
        assert_eq!(section.length(), Some(MINIMAL.len()));

        let header = section.segment("header").unwrap().fragments();
        assert_eq!(header[0].get("version"), Some(&json!("1.4")));
        assert_eq!(header[0].length, 9);

        let body = section.segment("body").unwrap().fragments();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].offset, find(MINIMAL, b"1 0 obj"));
        assert_eq!(body[0].get("type"), Some(&json!("indirect_obj")));
        assert_eq!(
            body[0].get("data"),
            Some(&json!({
                "/Type": "/Catalog",
                "/Pages": {"type": "reference", "object_number": 2, "generation_number": 0},
            }))
        );
        assert_eq!(body[1].get("object_number"), Some(&json!(2)));
        assert_eq!(body[0].end(), body[1].offset);

        let xref = section.segment("xref").unwrap().fragments();
        assert_eq!(xref.len(), 5);
        assert_eq!(xref[1].get("entry_count"), Some(&json!(3)));
        assert_eq!(xref[2].get("in_use"), Some(&json!(false)));
        assert_eq!(xref[3].get("byte_offset"), Some(&json!(15)));
        assert_eq!(xref[4].get("object_number"), Some(&json!(2)));

        let trailer = section.segment("trailer").unwrap().fragments();
        assert_eq!(trailer.len(), 2);
        assert_eq!(trailer[1].get("data").unwrap()["/Size"], json!(3));

        let startxref = section.segment("startxref").unwrap().fragments();
        assert_eq!(startxref[0].get("reference"), Some(&json!(124)));

        let eof = section.segment("eof").unwrap().fragments();
        assert_eq!(eof[0].end(), MINIMAL.len());

        assert_eq!(section.segment("comments").unwrap().len(), 1);
    }

    #[test]
    fn test_minimal_document_fully_covered() {
        let (section, _) = analyze(MINIMAL);
        assert!(coverage::for_section(&section).unwrap().is_empty());
    }

    #[test]
    fn test_appended_data_is_requeued() {
        let data = [MINIMAL, b"\xFF\xD8\xFF\xE0 appended"].concat();
        let (section, requests) = analyze(&data);

        assert_eq!(section.length(), Some(MINIMAL.len()));
        assert_eq!(
            requests,
            vec![AnalysisRequest::Range {
                offset: MINIMAL.len(),
                length: None
            }]
        );
        assert!(section.fragments().all(|f| f.end() <= MINIMAL.len()));
    }

    #[test]
    fn test_incremental_update() {
        let update = b"3 0 obj\n(added)\nendobj\nxref\n3 1\n0000000150 00000 n \ntrailer\n<< /Size 4 /Prev 124 >>\nstartxref\n200\n%%EOF\n";
        let data = [MINIMAL, update].concat();
        let (section, requests) = analyze(&data);

        assert!(requests.is_empty());
        assert_eq!(section.length(), Some(data.len()));
        assert_eq!(section.segment("body").unwrap().len(), 3);
        assert_eq!(section.segment("eof").unwrap().len(), 2);
        assert_eq!(section.segment("startxref").unwrap().len(), 2);
    }

    #[test]
    fn test_flate_stream_requested() {
        let data = b"%PDF-1.5\n4 0 obj\n<< /Length 5 /Filter /FlateDecode >>\nstream\nxxxxx\nendstream\nendobj\n%%EOF\n";
        let (section, requests) = analyze(data);

        assert_eq!(
            requests,
            vec![AnalysisRequest::Range {
                offset: find(data, b"xxxxx"),
                length: Some(5)
            }]
        );
        let body = section.segment("body").unwrap().fragments();
        assert_eq!(
            body[0].get("data").unwrap()["stream"],
            json!({"type": "stream", "offset": find(data, b"xxxxx"), "length": 5})
        );
    }

    #[test]
    fn test_whitespace_segment() {
        let (section, _) = analyze(b"%PDF-1.4\n1 0 obj  null   endobj\n");
        let whitespaces = section.segment("whitespaces").unwrap().fragments();
        assert_eq!(
            whitespaces.iter().map(|f| f.length).collect::<Vec<_>>(),
            vec![1, 1, 1, 2, 3, 1]
        );
    }

    #[test]
    fn test_xref_object_number_overflow() {
        let data = b"%PDF-1.4\nxref\n9223372036854775807 2\n\
0000000000 65535 f \n0000000000 65535 f \ntrailer\n<< >>\n%%EOF\n";
        let (section, requests) = analyze(data);

        let numbers: Vec<_> = section
            .segment("xref")
            .unwrap()
            .fragments()
            .iter()
            .filter_map(|f| f.get("object_number"))
            .collect();
        assert_eq!(numbers, vec![&json!(i64::MAX)]);
        assert!(section.length().unwrap() <= data.len());
        assert!(requests.len() <= 1);
    }

    #[test]
    fn test_no_requeue_at_start() {
        let (section, requests) = analyze(b"garbage only");
        assert!(requests.is_empty());
        assert_eq!(section.length(), Some(12));
    }
}
