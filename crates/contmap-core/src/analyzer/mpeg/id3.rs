//! ID3 metadata tags.
//!
//! ID3v2 sits in front of the audio frames and is a sequence of typed frames
//! inside a size-prefixed container; ID3v1 is a fixed 128-byte record
//! appended after the audio.

use crate::bits::{decode_be, decode_syncsafe};
use crate::model::Fragment;
use serde_json::json;
use tracing::{debug, trace};

/// Size of an ID3v1 tag
pub const ID3V1_LEN: usize = 128;

const ID3V2_HEADER_LEN: usize = 10;

/// ID3v1 genre names by genre byte; 255 means "None"
const GENRES: [&str; 192] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco",
    "Funk", "Grunge", "Hip-Hop", "Jazz", "Metal",
    "New Age", "Oldies", "Other", "Pop", "R&B",
    "Rap", "Reggae", "Rock", "Techno", "Industrial",
    "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack",
    "Euro-Techno", "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk",
    "Fusion", "Trance", "Classical", "Instrumental", "Acid",
    "House", "Game", "Sound Clip", "Gospel", "Noise",
    "Alternative Rock", "Bass", "Soul", "Punk", "Space",
    "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic",
    "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance",
    "Dream", "Southern Rock", "Comedy", "Cult", "Gangsta Rap",
    "Top 40", "Christian Rap", "Pop/Funk", "Jungle", "Native American",
    "Cabaret", "New Wave", "Psychedelic", "Rave", "Showtunes",
    "Trailer", "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz",
    "Polka", "Retro", "Musical", "Rock & Roll", "Hard Rock",
    "Folk", "Folk/Rock", "National Folk", "Swing", "Fast-Fusion",
    "Bebop", "Latin", "Revival", "Celtic", "Bluegrass",
    "Avantgarde", "Gothic Rock", "Progressive Rock", "Psychedelic Rock", "Symphonic Rock",
    "Slow Rock", "Big Band", "Chorus", "Easy Listening", "Acoustic",
    "Humour", "Speech", "Chanson", "Opera", "Chamber Music",
    "Sonata", "Symphony", "Booty Bass", "Primus", "Porn Groove",
    "Satire", "Slow Jam", "Club", "Tango", "Samba",
    "Folklore", "Ballad", "Power Ballad", "Rhythmic Soul", "Freestyle",
    "Duet", "Punk Rock", "Drum Solo", "A Cappella", "Euro-House",
    "Dance Hall", "Goa", "Drum & Bass", "Club-House", "Hardcore",
    "Terror", "Indie", "BritPop", "Negerpunk", "Polsk Punk",
    "Beat", "Christian Gangsta Rap", "Heavy Metal", "Black Metal", "Crossover",
    "Contemporary Christian", "Christian Rock", "Merengue", "Salsa", "Thrash Metal",
    "Anime", "JPop", "Synthpop", "Christmas", "Art Rock",
    "Baroque", "Bhangra", "Big Beat", "Breakbeat", "Chillout",
    "Downtempo", "Dub", "EBM", "Eclectic", "Electro",
    "Electroclash", "Emo", "Experimental", "Garage", "Global",
    "IDM", "Illbient", "Industro-Goth", "Jam Band", "Krautrock",
    "Leftfield", "Lounge", "Math rock", "New Romantic", "Nu-Breakz",
    "Post-Punk", "Post-Rock", "Psytrance", "Shoegaze", "Space Rock",
    "Trop Rock", "World Music", "Neoclassical", "Audiobook", "Audio Theatre",
    "Neue Deutsche Welle", "Podcast", "Indie-Rock", "G-Funk", "Dubstep",
    "Garage Rock", "Psybient",
];

/// Resolves an ID3v1 genre byte
pub fn genre_name(genre: u8) -> Option<&'static str> {
    match genre {
        255 => Some("None"),
        g => GENRES.get(usize::from(g)).copied(),
    }
}

/// A decoded ID3v2 tag
#[derive(Debug, Clone, PartialEq)]
pub struct Id3v2Tag {
    /// Bytes occupied by the tag, footer included, clipped to the data
    pub length: usize,
    /// Header, extended header, frame, padding and footer fragments
    pub fragments: Vec<Fragment>,
    /// `(offset, length)` of embedded pictures
    pub pictures: Vec<(usize, usize)>,
}

/// Decodes the ID3v2 tag at the start of `data`
///
/// Returns `None` if `data` does not start with a valid tag header.
pub fn read_id3v2(data: &[u8]) -> Option<Id3v2Tag> {
    if data.len() < ID3V2_HEADER_LEN || !data.starts_with(b"ID3") {
        return None;
    }
    let (major, minor, flags) = (data[3], data[4], data[5]);
    if !(2..=4).contains(&major) {
        debug!("unsupported ID3v2 major version {}", major);
        return None;
    }
    let size = decode_syncsafe(&data[6..10]).ok()? as usize;

    let has_footer = major == 4 && flags & 0x10 != 0;
    let declared_end = ID3V2_HEADER_LEN + size;
    let body_end = declared_end.min(data.len());

    let mut fragments = vec![Fragment::new(0, ID3V2_HEADER_LEN)
        .with("type", "header")
        .with("version", format!("2.{}.{}", major, minor))
        .with("unsynchronisation", flags & 0x80 != 0)
        .with("extended_header", major >= 3 && flags & 0x40 != 0)
        .with("experimental", flags & 0x20 != 0)
        .with("footer", has_footer)
        .with("size", size)];
    let mut pictures = Vec::new();

    let mut pos = ID3V2_HEADER_LEN;
    if major >= 3 && flags & 0x40 != 0 && pos + 4 <= body_end {
        let raw = &data[pos..pos + 4];
        let extended = if major == 3 {
            decode_be(raw).map(|n| n as usize + 4)
        } else {
            decode_syncsafe(raw).map(|n| n as usize)
        };
        match extended {
            Ok(length) if length >= 4 => {
                let end = (pos + length).min(body_end);
                fragments.push(Fragment::spanning(pos, end).with("type", "extended_header"));
                pos = end;
            }
            _ => debug!("invalid ID3v2 extended header size"),
        }
    }

    let (id_len, size_len, header_len) = if major == 2 { (3, 3, 6) } else { (4, 4, 10) };
    while pos + header_len <= body_end {
        let id = &data[pos..pos + id_len];
        if id[0] == 0 {
            fragments.push(Fragment::spanning(pos, body_end).with("type", "padding"));
            break;
        }
        if !id.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            debug!("ID3v2 frame walk stops at {} on a non-frame id", pos);
            break;
        }

        let size_bytes = &data[pos + id_len..pos + id_len + size_len];
        let frame_size = if major == 4 {
            // some writers emit plain integers despite the 2.4 syncsafe rule
            decode_syncsafe(size_bytes).or_else(|_| decode_be(size_bytes))
        } else {
            decode_be(size_bytes)
        };
        let Ok(frame_size) = frame_size else {
            break;
        };

        let content_start = pos + header_len;
        let frame_end = content_start + frame_size as usize;
        let end = frame_end.min(body_end);
        let frame_id = String::from_utf8_lossy(id);
        trace!("ID3v2 frame {} at {} ({} bytes)", frame_id, pos, frame_size);

        let mut fragment = Fragment::spanning(pos, end)
            .with("type", "frame")
            .with("frame_id", frame_id.to_string())
            .with("size", frame_size);
        if major >= 3 {
            fragment.set("flags", u16::from_be_bytes([data[pos + 8], data[pos + 9]]));
        }
        if frame_end > body_end {
            fragment.set("truncated", true);
        }
        decode_frame(id, &data[content_start..end], content_start, &mut fragment, &mut pictures);
        fragments.push(fragment);
        pos = end;
    }

    let mut length = body_end;
    if has_footer && declared_end + ID3V2_HEADER_LEN <= data.len() {
        fragments.push(Fragment::new(declared_end, ID3V2_HEADER_LEN).with("type", "footer"));
        length = declared_end + ID3V2_HEADER_LEN;
    }

    Some(Id3v2Tag {
        length,
        fragments,
        pictures,
    })
}

fn decode_frame(
    id: &[u8],
    content: &[u8],
    base: usize,
    fragment: &mut Fragment,
    pictures: &mut Vec<(usize, usize)>,
) {
    let Some((&encoding, rest)) = content.split_first() else {
        return;
    };

    match id {
        b"APIC" | b"PIC" => {
            let (mime_type, rest) = if id == b"PIC" {
                let split = rest.len().min(3);
                (latin1(&rest[..split]), &rest[split..])
            } else {
                let (mime, rest) = split_terminated(0, rest);
                (latin1(mime), rest)
            };
            let Some((&picture_type, rest)) = rest.split_first() else {
                return;
            };
            let (description, picture) = split_terminated(encoding, rest);
            let offset = base + content.len() - picture.len();

            fragment.set(
                "content",
                json!({
                    "mime_type": mime_type,
                    "picture_type": picture_type,
                    "description": decode_text(encoding, description),
                    "picture": {"offset": offset, "length": picture.len()},
                }),
            );
            if !picture.is_empty() {
                pictures.push((offset, picture.len()));
            }
        }
        b"COMM" | b"COM" => {
            if rest.len() < 3 {
                return;
            }
            let (language, rest) = rest.split_at(3);
            let (description, text) = split_terminated(encoding, rest);
            fragment.set(
                "content",
                json!({
                    "language": latin1(language),
                    "description": decode_text(encoding, description),
                    "text": decode_text(encoding, text),
                }),
            );
        }
        b"TXXX" | b"TXX" => {
            let (description, value) = split_terminated(encoding, rest);
            fragment.set(
                "content",
                json!({
                    "description": decode_text(encoding, description),
                    "value": decode_text(encoding, value),
                }),
            );
        }
        _ if id[0] == b'T' => fragment.set("content", decode_text(encoding, rest)),
        _ if id[0] == b'W' => fragment.set("content", latin1(content)),
        _ => {}
    }
}

/// Splits at the encoding-specific string terminator
fn split_terminated(encoding: u8, data: &[u8]) -> (&[u8], &[u8]) {
    if matches!(encoding, 1 | 2) {
        let mut i = 0;
        while i + 1 < data.len() {
            if data[i] == 0 && data[i + 1] == 0 {
                return (&data[..i], &data[i + 2..]);
            }
            i += 2;
        }
        (data, &[])
    } else {
        match data.iter().position(|&b| b == 0) {
            Some(i) => (&data[..i], &data[i + 1..]),
            None => (data, &[]),
        }
    }
}

/// Decodes ID3v2 text: 0 Latin-1, 1 UTF-16 with BOM, 2 UTF-16BE, 3 UTF-8
pub fn decode_text(encoding: u8, data: &[u8]) -> String {
    let text = match encoding {
        1 | 2 => decode_utf16(data, encoding == 2),
        3 => String::from_utf8_lossy(data).into_owned(),
        _ => latin1(data),
    };
    trim(&text).to_string()
}

fn decode_utf16(data: &[u8], mut big_endian: bool) -> String {
    let mut data = data;
    if data.starts_with(&[0xFF, 0xFE]) {
        big_endian = false;
        data = &data[2..];
    } else if data.starts_with(&[0xFE, 0xFF]) {
        big_endian = true;
        data = &data[2..];
    }

    let units = data.chunks_exact(2).map(|pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn latin1(data: &[u8]) -> String {
    trim(&data.iter().map(|&b| char::from(b)).collect::<String>()).to_string()
}

fn trim(text: &str) -> &str {
    text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}

/// Decodes the ID3v1 tag at `offset`
pub fn read_id3v1(data: &[u8], offset: usize) -> Option<Fragment> {
    let tag = data.get(offset..offset + ID3V1_LEN)?;
    if !tag.starts_with(b"TAG") {
        return None;
    }

    let comment = &tag[97..127];
    let genre = tag[127];
    let mut fragment = Fragment::new(offset, ID3V1_LEN)
        .with("type", "tag")
        .with("title", latin1(&tag[3..33]))
        .with("artist", latin1(&tag[33..63]))
        .with("album", latin1(&tag[63..93]))
        .with("year", latin1(&tag[93..97]))
        .with("genre", genre)
        .with("genre_name", genre_name(genre));

    // ID3v1.1 keeps the track number in the last comment byte
    if comment[28] == 0 && comment[29] != 0 {
        fragment.set("comment", latin1(&comment[..28]));
        fragment.set("track", comment[29]);
    } else {
        fragment.set("comment", latin1(comment));
    }
    Some(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id3v23_frame(id: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut frame = id.to_vec();
        frame.extend_from_slice(&(content.len() as u32).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(content);
        frame
    }

    fn syncsafe(size: usize) -> [u8; 4] {
        [
            (size >> 21) as u8 & 0x7F,
            (size >> 14) as u8 & 0x7F,
            (size >> 7) as u8 & 0x7F,
            size as u8 & 0x7F,
        ]
    }

    fn id3v2_tag(major: u8, flags: u8, frames: &[u8], padding: usize) -> Vec<u8> {
        let size = frames.len() + padding;
        let mut tag = vec![b'I', b'D', b'3', major, 0, flags];
        tag.extend_from_slice(&syncsafe(size));
        tag.extend_from_slice(frames);
        tag.extend(std::iter::repeat(0).take(padding));
        tag
    }

    fn id3v23_tag(frames: &[u8], padding: usize) -> Vec<u8> {
        id3v2_tag(3, 0, frames, padding)
    }

    fn id3v24_frame(id: &[u8; 4], size: [u8; 4], content: &[u8]) -> Vec<u8> {
        let mut frame = id.to_vec();
        frame.extend_from_slice(&size);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(content);
        frame
    }

    fn id3v22_frame(id: &[u8; 3], content: &[u8]) -> Vec<u8> {
        let mut frame = id.to_vec();
        frame.extend_from_slice(&(content.len() as u32).to_be_bytes()[1..]);
        frame.extend_from_slice(content);
        frame
    }

    #[test]
    fn test_genre_table() {
        assert_eq!(GENRES.len(), 192);
        assert_eq!(genre_name(17), Some("Rock"));
        assert_eq!(genre_name(191), Some("Psybient"));
        assert_eq!(genre_name(255), Some("None"));
        assert_eq!(genre_name(200), None);
    }

    #[test]
    fn test_text_frames() {
        let mut frames = id3v23_frame(b"TIT2", b"\x00Song title\x00");
        frames.extend(id3v23_frame(b"TPE1", b"\x01\xFF\xFEA\x00b\x00"));
        let tag = id3v23_tag(&frames, 16);
        let decoded = read_id3v2(&tag).unwrap();

        assert_eq!(decoded.length, tag.len());
        assert_eq!(decoded.fragments.len(), 4);
        assert_eq!(decoded.fragments[0].get("version"), Some(&json!("2.3.0")));
        assert_eq!(decoded.fragments[1].get("frame_id"), Some(&json!("TIT2")));
        assert_eq!(decoded.fragments[1].get("content"), Some(&json!("Song title")));
        assert_eq!(decoded.fragments[2].get("content"), Some(&json!("Ab")));
        assert_eq!(decoded.fragments[3].get("type"), Some(&json!("padding")));
        assert_eq!(decoded.fragments[3].length, 16);
        assert!(decoded.pictures.is_empty());
    }

    #[test]
    fn test_attached_picture() {
        let picture = b"\xFF\xD8\xFF\xD9";
        let content = [b"\x00image/jpeg\x00\x03cover\x00".as_slice(), picture].concat();
        let tag = id3v23_tag(&id3v23_frame(b"APIC", &content), 0);
        let decoded = read_id3v2(&tag).unwrap();

        let offset = tag.len() - picture.len();
        assert_eq!(decoded.pictures, vec![(offset, picture.len())]);
        assert_eq!(
            decoded.fragments[1].get("content"),
            Some(&json!({
                "mime_type": "image/jpeg",
                "picture_type": 3,
                "description": "cover",
                "picture": {"offset": offset, "length": 4},
            }))
        );
    }

    #[test]
    fn test_comment_frame() {
        let tag = id3v23_tag(&id3v23_frame(b"COMM", b"\x00engdesc\x00hello"), 0);
        let decoded = read_id3v2(&tag).unwrap();
        assert_eq!(
            decoded.fragments[1].get("content"),
            Some(&json!({"language": "eng", "description": "desc", "text": "hello"}))
        );
    }

    #[test]
    fn test_id3v24_syncsafe_frames_and_footer() {
        // 200 is 0x01 0x48 syncsafe but 0x01 0x48 = 328 as a plain integer
        let content = [b"\x03".as_slice(), [b'a'; 199].as_slice()].concat();
        let frames = id3v24_frame(b"TIT2", syncsafe(200), &content);
        let mut tag = id3v2_tag(4, 0x10, &frames, 0);
        tag.extend_from_slice(b"3DI\x04\x00\x10");
        tag.extend_from_slice(&syncsafe(frames.len()));
        let decoded = read_id3v2(&tag).unwrap();

        assert_eq!(decoded.length, 230);
        assert_eq!(decoded.fragments.len(), 3);
        assert_eq!(decoded.fragments[0].get("version"), Some(&json!("2.4.0")));
        assert_eq!(decoded.fragments[0].get("footer"), Some(&json!(true)));
        assert_eq!(decoded.fragments[1].offset, 10);
        assert_eq!(decoded.fragments[1].length, 210);
        assert_eq!(decoded.fragments[1].get("size"), Some(&json!(200)));
        assert_eq!(decoded.fragments[1].get("truncated"), None);
        assert_eq!(decoded.fragments[2].get("type"), Some(&json!("footer")));
        assert_eq!(decoded.fragments[2].offset, 220);
        assert_eq!(decoded.fragments[2].length, 10);
    }

    #[test]
    fn test_id3v24_plain_frame_size_fallback() {
        let content = [b"\x00".as_slice(), [b'b'; 127].as_slice()].concat();
        let frames = id3v24_frame(b"TALB", 128u32.to_be_bytes(), &content);
        let tag = id3v2_tag(4, 0, &frames, 0);
        let decoded = read_id3v2(&tag).unwrap();

        assert_eq!(decoded.length, tag.len());
        assert_eq!(decoded.fragments.len(), 2);
        assert_eq!(decoded.fragments[1].get("size"), Some(&json!(128)));
        assert_eq!(decoded.fragments[1].end(), tag.len());
        assert_eq!(decoded.fragments[1].get("content"), Some(&json!("b".repeat(127))));
    }

    #[test]
    fn test_id3v22_frames() {
        let mut frames = id3v22_frame(b"TT2", b"\x00Old song");
        frames.extend(id3v22_frame(b"PIC", b"\x00JPG\x03\x00\xFF\xD8\xFF\xD9"));
        let tag = id3v2_tag(2, 0, &frames, 0);
        let decoded = read_id3v2(&tag).unwrap();

        assert_eq!(decoded.length, tag.len());
        assert_eq!(decoded.fragments[0].get("version"), Some(&json!("2.2.0")));
        assert_eq!(decoded.fragments[1].get("frame_id"), Some(&json!("TT2")));
        assert_eq!(decoded.fragments[1].get("content"), Some(&json!("Old song")));
        assert_eq!(decoded.fragments[1].get("flags"), None);
        assert_eq!(decoded.fragments[1].length, 15);

        let picture_offset = tag.len() - 4;
        assert_eq!(decoded.pictures, vec![(picture_offset, 4)]);
        assert_eq!(
            decoded.fragments[2].get("content"),
            Some(&json!({
                "mime_type": "JPG",
                "picture_type": 3,
                "description": "",
                "picture": {"offset": picture_offset, "length": 4},
            }))
        );
    }

    #[test]
    fn test_truncated_frame_is_clipped() {
        let mut tag = id3v23_tag(&id3v23_frame(b"TALB", b"\x00album"), 0);
        tag.truncate(tag.len() - 2);
        let decoded = read_id3v2(&tag).unwrap();
        assert_eq!(decoded.length, tag.len());
        assert_eq!(decoded.fragments[1].get("truncated"), Some(&json!(true)));
        assert_eq!(decoded.fragments[1].end(), tag.len());
    }

    #[test]
    fn test_invalid_headers() {
        assert!(read_id3v2(b"ID3\x03\x00\x00\x00\x80\x00\x00").is_none());
        assert!(read_id3v2(b"ID3\x07\x00\x00\x00\x00\x00\x00").is_none());
        assert!(read_id3v2(b"ID3\x03").is_none());
    }

    #[test]
    fn test_id3v1_with_track() {
        let mut tag = vec![0u8; ID3V1_LEN];
        tag[..3].copy_from_slice(b"TAG");
        tag[3..8].copy_from_slice(b"Title");
        tag[93..97].copy_from_slice(b"1999");
        tag[97..104].copy_from_slice(b"comment");
        tag[126] = 7;
        tag[127] = 17;
        let data = [b"xx".as_slice(), &tag].concat();

        let fragment = read_id3v1(&data, 2).unwrap();
        assert_eq!(fragment.offset, 2);
        assert_eq!(fragment.length, 128);
        assert_eq!(fragment.get("title"), Some(&json!("Title")));
        assert_eq!(fragment.get("artist"), Some(&json!("")));
        assert_eq!(fragment.get("year"), Some(&json!("1999")));
        assert_eq!(fragment.get("comment"), Some(&json!("comment")));
        assert_eq!(fragment.get("track"), Some(&json!(7)));
        assert_eq!(fragment.get("genre_name"), Some(&json!("Rock")));

        assert!(read_id3v1(&data, 3).is_none());
        assert!(read_id3v1(&data[..100], 0).is_none());
    }

    #[test]
    fn test_decode_text_encodings() {
        assert_eq!(decode_text(0, b"caf\xE9\x00"), "café");
        assert_eq!(decode_text(2, b"\x00h\x00i"), "hi");
        assert_eq!(decode_text(1, b"\xFE\xFF\x00o\x00k"), "ok");
        assert_eq!(decode_text(3, "ü ".as_bytes()), "ü");
    }
}
