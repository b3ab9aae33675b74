//! MPEG audio analyzer.
//!
//! An MPEG audio file is an optional ID3v2 tag, a run of self-describing
//! audio frames and an optional trailing ID3v1 tag. Frames are found by
//! their sync word; each header determines the frame length, so the scan
//! hops from frame to frame until a header fails to decode.
//!
//! ## Segments
//!
//! | Key | Contents |
//! |-----|----------|
//! | `id3v2` | tag header, extended header, frames, padding, footer |
//! | `mpeg_frames` | one fragment per audio frame with `header`, `crc`, `side_info` |
//! | `id3v1` | the 128-byte trailing tag |
//!
//! Embedded ID3v2 pictures and any bytes behind the last recognized
//! structure are requested for separate analysis.

pub mod header;
pub mod id3;
pub mod side_info;

pub use self::header::{ChannelMode, FrameHeader, MpegVersion};
pub use self::side_info::SideInformation;

use super::{Outcome, StructureAnalyzer};
use crate::model::{Fragment, Section, Segment};
use tracing::{debug, trace};

/// Structure analyzer for `audio/mpeg`
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioMpegAnalyzer;

impl AudioMpegAnalyzer {
    /// Creates a new analyzer
    pub fn new() -> Self {
        Self
    }
}

/// Position of the next decodable frame at or after `from`
fn find_frame(data: &[u8], from: usize) -> Option<(usize, FrameHeader)> {
    let mut pos = from;
    while let Some(i) = data.get(pos..)?.iter().position(|&b| b == 0xFF) {
        let candidate = pos + i;
        if let Some(header) = FrameHeader::parse(&data[candidate..]) {
            return Some((candidate, header));
        }
        pos = candidate + 1;
    }
    None
}

/// Builds the fragment for the frame at `pos`, clipped to `data`
fn frame_fragment(data: &[u8], pos: usize, header: &FrameHeader) -> (Fragment, bool) {
    let length = header.frame_length().max(FrameHeader::LEN);
    let end = (pos + length).min(data.len());
    let truncated = pos + length > data.len();

    let mut fragment = Fragment::spanning(pos, end).with("header", header.to_value());

    let mut side_info_start = pos + FrameHeader::LEN;
    if header.crc_protected {
        if let Some(crc) = data.get(side_info_start..side_info_start + 2) {
            fragment.set("crc", u16::from_be_bytes([crc[0], crc[1]]));
        }
        side_info_start += 2;
    }

    let side_info_end = side_info_start + header.side_info_length();
    if header.side_info_length() > 0 && side_info_end <= end {
        match SideInformation::parse(&data[side_info_start..side_info_end], header) {
            Ok(side_info) => fragment.set("side_info", side_info.to_value()),
            Err(e) => trace!("side information at {}: {}", side_info_start, e),
        }
    }

    if truncated {
        fragment.set("truncated", true);
    }
    (fragment, truncated)
}

impl StructureAnalyzer for AudioMpegAnalyzer {
    fn process(&self, mut section: Section, data: &[u8]) -> Outcome {
        let mut offset = 0;
        let mut pictures = Vec::new();

        if let Some(tag) = id3::read_id3v2(data) {
            debug!("ID3v2 tag of {} bytes at {}", tag.length, section.position());
            let mut segment = Segment::new("id3v2");
            for fragment in tag.fragments {
                segment.push(fragment);
            }
            section.add_segment(segment);
            pictures = tag.pictures;
            offset = tag.length;
        }

        // Only the first frame may be preceded by unrecognized bytes;
        // later frames have to follow each other directly.
        let mut frames = Segment::new("mpeg_frames");
        let mut next = find_frame(data, offset);
        while let Some((pos, header)) = next {
            let (fragment, truncated) = frame_fragment(data, pos, &header);
            offset = fragment.end();
            frames.push(fragment);
            if truncated {
                debug!("MPEG frame at {} runs past the end of data", pos);
                break;
            }
            next = FrameHeader::parse(&data[offset..]).map(|h| (offset, h));
        }
        if !frames.is_empty() {
            debug!(
                "{} MPEG frames at {}, scan ends at {}",
                frames.len(),
                section.position(),
                offset
            );
            section.add_segment(frames);
        }

        if let Some(tag) = id3::read_id3v1(data, offset) {
            let mut segment = Segment::new("id3v1");
            offset = tag.end();
            segment.push(tag);
            section.add_segment(segment);
        }

        let mut requests = Vec::new();
        for (picture_offset, picture_length) in pictures {
            requests.push((picture_offset, Some(picture_length)));
        }

        if offset == 0 {
            debug!("no MPEG structure recognized at {}", section.position());
            section.set_length(data.len());
        } else if offset < data.len() {
            section.set_length(offset);
            requests.push((offset, None));
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
