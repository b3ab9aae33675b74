//! zlib stream analyzer.
//!
//! A zlib stream is a 2-byte CMF/FLG header, raw deflate data and a 4-byte
//! big-endian Adler-32 checksum. The stream is inflated to find where it
//! ends; the plaintext is handed back to the orchestrator as a derived
//! buffer so that its own structure gets mapped too.

use super::{Outcome, StructureAnalyzer};
use crate::model::{Fragment, Section, Segment};
use byteorder::{BigEndian, ByteOrder};
use flate2::{Decompress, FlushDecompress, Status};
use tracing::{debug, warn};

/// Default bound on the inflated size of a single stream
pub const DEFAULT_MAX_OUTPUT: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 2;
const CHECKSUM_LEN: usize = 4;

/// Result of inflating a stream
struct Inflated {
    plaintext: Vec<u8>,
    consumed: usize,
    complete: bool,
    truncated: bool,
}

/// Structure analyzer for `application/zlib`
#[derive(Debug, Clone, Copy)]
pub struct ZlibAnalyzer {
    max_output: usize,
}

impl Default for ZlibAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibAnalyzer {
    /// Creates an analyzer with the default output bound
    pub fn new() -> Self {
        Self {
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }

    /// Sets the maximum number of plaintext bytes kept per stream
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    fn inflate(&self, data: &[u8]) -> Inflated {
        let mut inflater = Decompress::new(true);
        let mut plaintext = Vec::new();
        let mut buf = [0u8; 8192];
        let mut complete = false;
        let mut truncated = false;
        loop {
            let consumed = inflater.total_in() as usize;
            let produced = inflater.total_out();
            let input = data.get(consumed..).unwrap_or_default();
            let status = match inflater.decompress(input, &mut buf, FlushDecompress::None) {
                Ok(status) => status,
                Err(e) => {
                    debug!("inflate stopped after {} bytes: {}", plaintext.len(), e);
                    truncated = true;
                    break;
                }
            };

            let n = (inflater.total_out() - produced) as usize;
            if plaintext.len() + n > self.max_output {
                let remaining = self.max_output.saturating_sub(plaintext.len());
                plaintext.extend_from_slice(&buf[..remaining]);
                truncated = true;
                break;
            }
            plaintext.extend_from_slice(&buf[..n]);

            if status == Status::StreamEnd {
                complete = true;
                break;
            }
            if n == 0 && inflater.total_in() as usize == consumed {
                debug!("zlib input ends inside the stream");
                truncated = true;
                break;
            }
        }
        Inflated {
            plaintext,
            consumed: inflater.total_in() as usize,
            complete,
            truncated,
        }
    }
}

fn header_fragment(data: &[u8]) -> Fragment {
    let cmf = data[0];
    let flg = data[1];
    Fragment::new(0, HEADER_LEN)
        .with("type", "header")
        .with("compression_method", cmf & 0x0F)
        .with("window_size", 1u32 << ((cmf >> 4) + 8))
        .with("compression_level", flg >> 6)
        .with("preset_dictionary", flg & 0x20 != 0)
}

impl StructureAnalyzer for ZlibAnalyzer {
    fn process(&self, mut section: Section, data: &[u8]) -> Outcome {
        if data.len() < HEADER_LEN + CHECKSUM_LEN {
            debug!("{} bytes at {} are too short for zlib", data.len(), section.position());
            section.set_length(data.len());
            return Outcome::new(section);
        }

        let inflated = self.inflate(data);
        if inflated.plaintext.is_empty() && !inflated.complete {
            warn!("zlib stream at {} does not inflate", section.position());
            section.set_length(data.len());
            return Outcome::new(section);
        }

        // A complete stream ends with its checksum; anything else runs to
        // the end of the slice.
        let end = if inflated.complete && inflated.consumed >= HEADER_LEN + CHECKSUM_LEN {
            inflated.consumed.min(data.len())
        } else {
            data.len()
        };

        let mut segment = Segment::new("zlib");
        segment.push(header_fragment(data));
        let mut deflate = if inflated.complete {
            let checksum_start = end - CHECKSUM_LEN;
            segment.push(
                Fragment::new(checksum_start, CHECKSUM_LEN)
                    .with("type", "adler32")
                    .with("checksum", BigEndian::read_u32(&data[checksum_start..end])),
            );
            Fragment::spanning(HEADER_LEN, checksum_start)
        } else {
            Fragment::spanning(HEADER_LEN, end)
        };
        deflate.set("type", "deflate_data");
        deflate.set("decompressed_length", inflated.plaintext.len());
        if inflated.truncated {
            deflate.set("truncated", true);
        }
        segment.push(deflate);
        section.add_segment(segment);
        section.set_length(end);

        debug!(
            "zlib stream at {}: {} compressed, {} inflated",
            section.position(),
            end,
            inflated.plaintext.len()
        );

        let mut outcome = Outcome::new(section);
        if !inflated.plaintext.is_empty() {
            outcome.request_derived(inflated.plaintext);
        }
        if end < data.len() {
            outcome.request(end, None);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalysisRequest;
    use bytes::Bytes;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn compress(plaintext: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(plaintext).unwrap();
        encoder.finish().unwrap()
    }

    fn analyze(analyzer: ZlibAnalyzer, data: &[u8]) -> (Section, Vec<AnalysisRequest>) {
        analyzer
            .process(Section::new(0, "application/zlib", 1), data)
            .into_parts()
    }

    #[test]
    fn test_complete_stream() {
        let plaintext = b"%PDF-1.4\nhello hello hello hello\n".repeat(4);
        let compressed = compress(&plaintext);
        let (section, requests) = analyze(ZlibAnalyzer::new(), &compressed);

        assert_eq!(section.length(), Some(compressed.len()));
        assert_eq!(requests, vec![AnalysisRequest::Derived(Bytes::from(plaintext.clone()))]);

        let fragments = section.segment("zlib").unwrap().fragments();
        assert_eq!(fragments[0].get("window_size"), Some(&json!(32768)));
        assert_eq!(fragments[1].end(), compressed.len());
        assert_eq!(fragments[1].get("type"), Some(&json!("adler32")));
        assert_eq!(fragments[2].offset, 2);
        assert_eq!(fragments[2].end(), compressed.len() - 4);
        assert_eq!(fragments[2].get("decompressed_length"), Some(&json!(plaintext.len())));
    }

    #[test]
    fn test_trailing_bytes_requeued() {
        let compressed = compress(b"payload");
        let data = [compressed.as_slice(), b"\xFF\xD8\xFF\xE0"].concat();
        let (section, requests) = analyze(ZlibAnalyzer::new(), &data);

        assert_eq!(section.length(), Some(compressed.len()));
        assert_eq!(
            requests,
            vec![
                AnalysisRequest::Derived(Bytes::from_static(b"payload")),
                AnalysisRequest::Range { offset: compressed.len(), length: None },
            ]
        );
    }

    #[test]
    fn test_output_bound() {
        let plaintext = vec![b'a'; 100_000];
        let compressed = compress(&plaintext);
        let (section, requests) = analyze(ZlibAnalyzer::new().with_max_output(10), &compressed);

        assert_eq!(section.length(), Some(compressed.len()));
        assert_eq!(requests, vec![AnalysisRequest::Derived(Bytes::from(vec![b'a'; 10]))]);
        let deflate = &section.segment("zlib").unwrap().fragments()[1];
        assert_eq!(deflate.get("truncated"), Some(&json!(true)));
    }

    #[test]
    fn test_cut_stream_keeps_partial_output() {
        let plaintext: Vec<u8> = (0..20_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let compressed = compress(&plaintext);
        let cut = &compressed[..compressed.len() / 2];
        let (section, requests) = analyze(ZlibAnalyzer::new(), cut);

        assert_eq!(section.length(), Some(cut.len()));
        assert_eq!(requests.len(), 1);
        let deflate = &section.segment("zlib").unwrap().fragments()[1];
        assert_eq!(deflate.get("truncated"), Some(&json!(true)));
    }

    #[test]
    fn test_not_inflatable() {
        let (section, requests) = analyze(ZlibAnalyzer::new(), b"\x78\x9c\xff\xff\xff\xff\xff");
        assert!(requests.is_empty());
        assert_eq!(section.length(), Some(7));
        assert!(section.segment("zlib").is_none());

        let (section, _) = analyze(ZlibAnalyzer::new(), b"\x78\x9c");
        assert_eq!(section.length(), Some(2));
    }
}
