//! JPEG analyzer.
//!
//! A JPEG file is a sequence of marker segments. Each marker is `FF` plus an
//! id byte in `C0..=FE`; apart from the standalone markers (SOI, EOI and
//! RST0 to RST7) it is followed by a big-endian length that includes the
//! length field itself. Start Of Scan is followed by entropy-coded data that
//! runs until the End Of Image marker.
//!
//! ## Segments
//!
//! | Key | Contents |
//! |-----|----------|
//! | `jpeg_segments` | one fragment per marker segment |
//! | `exif` | TIFF header, IFDs, entries and values of an EXIF `APP1` payload |
//!
//! Bytes after EOI and an EXIF thumbnail are requested for separate
//! analysis.

pub mod exif;

use super::{find_from, Outcome, StructureAnalyzer};
use crate::model::{Fragment, Section, Segment};
use byteorder::{BigEndian, ByteOrder};
use serde_json::json;
use std::borrow::Cow;
use tracing::{debug, trace};

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP1: u8 = 0xE1;

const EXIF_MAGIC: &[u8] = b"Exif\0\0";

/// Abbreviation and long name of a marker
pub fn marker_name(id: u8) -> (Cow<'static, str>, Cow<'static, str>) {
    let numbered = |prefix: &str, base: u8| Cow::Owned(format!("{}{}", prefix, id - base));
    match id {
        0xC4 => ("DHT".into(), "Define Huffman Table".into()),
        0xC8 => ("JPG".into(), "JPEG extension".into()),
        0xCC => ("DAC".into(), "Define Arithmetic Coding".into()),
        0xC0..=0xCF => (numbered("SOF", 0xC0), "Start Of Frame".into()),
        0xD0..=0xD7 => (
            numbered("RST", 0xD0),
            Cow::Owned(format!("Restart Marker {}", id - 0xD0)),
        ),
        SOI => ("SOI".into(), "Start Of Image".into()),
        EOI => ("EOI".into(), "End Of Image".into()),
        SOS => ("SOS".into(), "Start Of Scan".into()),
        0xDB => ("DQT".into(), "Define Quantization Tables".into()),
        0xDC => ("DNL".into(), "Define Number of Lines".into()),
        0xDD => ("DRI".into(), "Define Restart Interval".into()),
        0xDE => ("DHP".into(), "Define Hierarchical Progression".into()),
        0xDF => ("EXP".into(), "Expand Reference Component".into()),
        0xE0..=0xEF => (
            numbered("APP", 0xE0),
            Cow::Owned(format!("Application Segment {}", id - 0xE0)),
        ),
        0xF0..=0xFD => (
            numbered("JPG", 0xF0),
            Cow::Owned(format!("JPEG Extension {}", id - 0xF0)),
        ),
        0xFE => ("COM".into(), "Comments".into()),
        _ => ("unknown".into(), "(unknown segment)".into()),
    }
}

fn is_standalone(id: u8) -> bool {
    matches!(id, SOI | EOI | 0xD0..=0xD7)
}

/// Structure analyzer for `image/jpeg`
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegAnalyzer;

impl JpegAnalyzer {
    /// Creates a new analyzer
    pub fn new() -> Self {
        Self
    }
}

impl StructureAnalyzer for JpegAnalyzer {
    fn process(&self, mut section: Section, data: &[u8]) -> Outcome {
        let mut segments = Segment::new("jpeg_segments");
        let mut exif_segment = Segment::new("exif");
        let mut requests = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            if data[pos] != 0xFF {
                debug!("no JPEG marker at {}", section.position() + pos);
                break;
            }
            let mut marker = pos;
            while data.get(marker + 1) == Some(&0xFF) {
                marker += 1;
            }
            let Some(&id) = data.get(marker + 1) else {
                break;
            };
            if !(0xC0..=0xFE).contains(&id) {
                debug!("invalid JPEG marker {:#04x} at {}", id, marker);
                break;
            }

            let (name, long_name) = marker_name(id);
            trace!("{} at {}", name, marker);
            let body = marker + 2;

            let mut fragment = if is_standalone(id) {
                Fragment::spanning(pos, body)
            } else if id == SOS {
                let scan_end = find_from(data, &[0xFF, EOI], body).unwrap_or(data.len());
                let mut fragment = Fragment::spanning(pos, scan_end).with(
                    "payload",
                    json!({"offset": body, "length": scan_end - body}),
                );
                if let Some(length) = data.get(body..body + 2) {
                    fragment.set("header_length", BigEndian::read_u16(length));
                }
                fragment
            } else {
                let Some(length) = data.get(body..body + 2).map(BigEndian::read_u16) else {
                    debug!("{} at {} lacks its length field", name, marker);
                    break;
                };
                let declared_end = body + usize::from(length);
                let end = declared_end.min(data.len()).max(body + 2);
                let payload_start = body + 2;
                let mut fragment = Fragment::spanning(pos, end)
                    .with("segment_length", length)
                    .with(
                        "payload",
                        json!({"offset": payload_start, "length": end - payload_start}),
                    );
                if declared_end > data.len() {
                    fragment.set("truncated", true);
                }

                if id == APP1 && data[payload_start..end].starts_with(EXIF_MAGIC) {
                    let tiff_start = payload_start + EXIF_MAGIC.len();
                    if let Some(exif) = exif::decode(data, tiff_start, end) {
                        debug!("EXIF with {} fragments at {}", exif.fragments.len(), tiff_start);
                        for exif_fragment in exif.fragments {
                            exif_segment.push(exif_fragment);
                        }
                        if let Some((offset, length)) = exif.thumbnail {
                            requests.push((offset, Some(length)));
                        }
                    }
                }
                fragment
            };

            fragment.set("id", id);
            fragment.set("name", name.as_ref());
            fragment.set("long_name", long_name.as_ref());
            if marker > pos {
                fragment.set("fill_bytes", marker - pos);
            }

            pos = fragment.end();
            segments.push(fragment);
            if id == EOI {
                break;
            }
        }

        if !segments.is_empty() {
            section.add_segment(segments);
        }
        if !exif_segment.is_empty() {
            section.add_segment(exif_segment);
        }

        if pos == 0 {
            debug!("no JPEG structure recognized at {}", section.position());
            section.set_length(data.len());
        } else if pos < data.len() {
            section.set_length(pos);
            requests.push((pos, None));
        } else {
            section.set_length(data.len());
        }

        let mut outcome = Outcome::new(section);
        for (offset, length) in requests {
            outcome.request(offset, length);
        }
        outcome
    }
}
