//! EXIF metadata inside a JPEG `APP1` segment.
//!
//! The payload after `Exif\0\0` is a small TIFF file: an 8-byte header that
//! fixes the byte order, followed by linked Image File Directories. All
//! offsets inside the TIFF structure are relative to the start of its
//! header.

use crate::model::Fragment;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::io::{self, Cursor, Read};
use std::marker::PhantomData;
use tracing::{debug, trace};

/// Values with more components are described but not decoded
const MAX_DECODED_VALUES: u32 = 256;

const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_GPS_IFD: u16 = 0x8825;
const TAG_INTEROP_IFD: u16 = 0xA005;
const TAG_THUMBNAIL_OFFSET: u16 = 0x0201;
const TAG_THUMBNAIL_LENGTH: u16 = 0x0202;

/// IFD entry value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// 8-bit unsigned
    Byte,
    /// NUL-terminated 7-bit text
    Ascii,
    /// 16-bit unsigned
    Short,
    /// 32-bit unsigned
    Long,
    /// Two LONGs, numerator and denominator
    Rational,
    /// 8-bit signed
    SByte,
    /// Opaque bytes
    Undefined,
    /// 16-bit signed
    SShort,
    /// 32-bit signed
    SLong,
    /// Two SLONGs
    SRational,
    /// IEEE single precision
    Float,
    /// IEEE double precision
    Double,
}

impl ValueType {
    /// Maps the on-disk type code
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::Byte,
            2 => Self::Ascii,
            3 => Self::Short,
            4 => Self::Long,
            5 => Self::Rational,
            6 => Self::SByte,
            7 => Self::Undefined,
            8 => Self::SShort,
            9 => Self::SLong,
            10 => Self::SRational,
            11 => Self::Float,
            12 => Self::Double,
            _ => return None,
        })
    }

    /// Size of one component in bytes
    pub fn unit_size(self) -> usize {
        match self {
            Self::Byte | Self::Ascii | Self::SByte | Self::Undefined => 1,
            Self::Short | Self::SShort => 2,
            Self::Long | Self::SLong | Self::Float => 4,
            Self::Rational | Self::SRational | Self::Double => 8,
        }
    }

    /// Type name used in JSON output
    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Ascii => "ascii",
            Self::Short => "short",
            Self::Long => "long",
            Self::Rational => "rational",
            Self::SByte => "sbyte",
            Self::Undefined => "undefined",
            Self::SShort => "sshort",
            Self::SLong => "slong",
            Self::SRational => "srational",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

fn tag_name(ifd: &str, tag: u16) -> Option<&'static str> {
    if ifd == "gps" {
        return Some(match tag {
            0x0000 => "GPSVersionID",
            0x0001 => "GPSLatitudeRef",
            0x0002 => "GPSLatitude",
            0x0003 => "GPSLongitudeRef",
            0x0004 => "GPSLongitude",
            0x0005 => "GPSAltitudeRef",
            0x0006 => "GPSAltitude",
            0x0007 => "GPSTimeStamp",
            0x001D => "GPSDateStamp",
            _ => return None,
        });
    }
    if ifd == "interop" {
        return Some(match tag {
            0x0001 => "InteroperabilityIndex",
            0x0002 => "InteroperabilityVersion",
            _ => return None,
        });
    }
    Some(match tag {
        0x0100 => "ImageWidth",
        0x0101 => "ImageLength",
        0x0103 => "Compression",
        0x010E => "ImageDescription",
        0x010F => "Make",
        0x0110 => "Model",
        0x0112 => "Orientation",
        0x011A => "XResolution",
        0x011B => "YResolution",
        0x0128 => "ResolutionUnit",
        0x0131 => "Software",
        0x0132 => "DateTime",
        0x013B => "Artist",
        TAG_THUMBNAIL_OFFSET => "JPEGInterchangeFormat",
        TAG_THUMBNAIL_LENGTH => "JPEGInterchangeFormatLength",
        0x0213 => "YCbCrPositioning",
        0x8298 => "Copyright",
        0x829A => "ExposureTime",
        0x829D => "FNumber",
        TAG_EXIF_IFD => "ExifIFDPointer",
        0x8822 => "ExposureProgram",
        TAG_GPS_IFD => "GPSInfoIFDPointer",
        0x8827 => "ISOSpeedRatings",
        0x9000 => "ExifVersion",
        0x9003 => "DateTimeOriginal",
        0x9004 => "DateTimeDigitized",
        0x9201 => "ShutterSpeedValue",
        0x9202 => "ApertureValue",
        0x9209 => "Flash",
        0x920A => "FocalLength",
        0x927C => "MakerNote",
        0x9286 => "UserComment",
        0xA000 => "FlashpixVersion",
        0xA001 => "ColorSpace",
        0xA002 => "PixelXDimension",
        0xA003 => "PixelYDimension",
        TAG_INTEROP_IFD => "InteroperabilityIFDPointer",
        _ => return None,
    })
}

/// Decoded EXIF structure
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExifData {
    /// TIFF header, IFD, entry and value fragments
    pub fragments: Vec<Fragment>,
    /// `(offset, length)` of the embedded thumbnail
    pub thumbnail: Option<(usize, usize)>,
}

/// Decodes the TIFF structure in `data[tiff_start..tiff_end]`
///
/// Fragment offsets are relative to `data`. Returns `None` if the TIFF
/// header is not recognized.
pub fn decode(data: &[u8], tiff_start: usize, tiff_end: usize) -> Option<ExifData> {
    let tiff = data.get(tiff_start..tiff_end)?;
    match tiff.get(..4)? {
        b"II*\0" => Some(Decoder::<LittleEndian>::new(tiff, tiff_start).run("little_endian")),
        b"MM\0*" => Some(Decoder::<BigEndian>::new(tiff, tiff_start).run("big_endian")),
        _ => {
            debug!("unknown TIFF byte order at {}", tiff_start);
            None
        }
    }
}

struct Decoder<'a, B> {
    tiff: &'a [u8],
    base: usize,
    fragments: Vec<Fragment>,
    thumbnail_offset: Option<u32>,
    thumbnail_length: Option<u32>,
    visited: HashSet<u32>,
    order: PhantomData<B>,
}

impl<'a, B: ByteOrder> Decoder<'a, B> {
    fn new(tiff: &'a [u8], base: usize) -> Self {
        Self {
            tiff,
            base,
            fragments: Vec::new(),
            thumbnail_offset: None,
            thumbnail_length: None,
            visited: HashSet::new(),
            order: PhantomData,
        }
    }

    fn cursor(&self, offset: usize) -> io::Result<Cursor<&'a [u8]>> {
        self.tiff
            .get(offset..)
            .map(Cursor::new)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
    }

    fn run(mut self, byte_order: &str) -> ExifData {
        let ifd0 = match self.cursor(4).and_then(|mut c| c.read_u32::<B>()) {
            Ok(offset) => offset,
            Err(_) => return ExifData::default(),
        };
        self.fragments.push(
            Fragment::new(self.base, 8)
                .with("type", "tiff_header")
                .with("byte_order", byte_order)
                .with("ifd0_offset", ifd0),
        );

        let mut pending = VecDeque::from([("ifd0", ifd0)]);
        while let Some((name, offset)) = pending.pop_front() {
            if offset == 0 || !self.visited.insert(offset) {
                continue;
            }
            match self.read_ifd(name, offset as usize) {
                Ok(links) => pending.extend(links),
                Err(e) => debug!("EXIF {} at +{} ends early: {}", name, offset, e),
            }
        }

        let thumbnail = match (self.thumbnail_offset, self.thumbnail_length) {
            (Some(offset), Some(length)) => {
                let start = offset as usize;
                let end = start.saturating_add(length as usize).min(self.tiff.len());
                (start < end).then(|| (self.base + start, end - start))
            }
            _ => None,
        };

        ExifData {
            fragments: self.fragments,
            thumbnail,
        }
    }

    /// Reads one IFD and returns the IFDs it links to
    fn read_ifd(&mut self, name: &'static str, offset: usize) -> io::Result<Vec<(&'static str, u32)>> {
        let tiff = self.tiff;
        let mut cursor = self.cursor(offset)?;
        let count = cursor.read_u16::<B>()?;
        self.fragments.push(
            Fragment::new(self.base + offset, 2)
                .with("type", "ifd")
                .with("ifd", name)
                .with("entry_count", count),
        );

        let mut links = Vec::new();
        for i in 0..usize::from(count) {
            let entry_offset = offset + 2 + 12 * i;
            let tag = cursor.read_u16::<B>()?;
            let code = cursor.read_u16::<B>()?;
            let components = cursor.read_u32::<B>()?;
            let mut field = [0u8; 4];
            cursor.read_exact(&mut field)?;

            let mut entry = Fragment::new(self.base + entry_offset, 12)
                .with("type", "ifd_entry")
                .with("ifd", name)
                .with("tag", tag)
                .with("tag_name", tag_name(name, tag))
                .with("count", components);

            let Some(value_type) = ValueType::from_code(code) else {
                trace!("unknown EXIF value type {} for tag {:#06x}", code, tag);
                entry.set("value_type", code);
                self.fragments.push(entry);
                continue;
            };
            entry.set("value_type", value_type.name());

            let size = value_type.unit_size().saturating_mul(components as usize);
            let raw = if size <= 4 {
                Some(&field[..size])
            } else {
                let value_offset = B::read_u32(&field) as usize;
                entry.set("value_offset", value_offset);
                let bytes = value_offset
                    .checked_add(size)
                    .and_then(|end| tiff.get(value_offset..end));
                if bytes.is_some() {
                    self.fragments.push(
                        Fragment::new(self.base + value_offset, size)
                            .with("type", "ifd_value")
                            .with("ifd", name)
                            .with("tag", tag),
                    );
                }
                bytes
            };

            if let Some(raw) = raw {
                if components <= MAX_DECODED_VALUES {
                    entry.set("value", decode_value::<B>(value_type, raw));
                }
                if let Some(pointer) = scalar::<B>(value_type, raw) {
                    match tag {
                        TAG_EXIF_IFD if name == "ifd0" => links.push(("exif", pointer)),
                        TAG_GPS_IFD if name == "ifd0" => links.push(("gps", pointer)),
                        TAG_INTEROP_IFD if name == "exif" => links.push(("interop", pointer)),
                        TAG_THUMBNAIL_OFFSET => self.thumbnail_offset = Some(pointer),
                        TAG_THUMBNAIL_LENGTH => self.thumbnail_length = Some(pointer),
                        _ => {}
                    }
                }
            }
            self.fragments.push(entry);
        }

        let next_offset = offset + 2 + 12 * usize::from(count);
        let next = cursor.read_u32::<B>()?;
        self.fragments.push(
            Fragment::new(self.base + next_offset, 4)
                .with("type", "next_ifd")
                .with("ifd", name)
                .with("next", next),
        );
        if name == "ifd0" && next != 0 {
            links.push(("ifd1", next));
        }
        Ok(links)
    }
}

/// Single unsigned integer value, used for pointer tags
fn scalar<B: ByteOrder>(value_type: ValueType, raw: &[u8]) -> Option<u32> {
    match value_type {
        ValueType::Long if raw.len() == 4 => Some(B::read_u32(raw)),
        ValueType::Short if raw.len() == 2 => Some(u32::from(B::read_u16(raw))),
        _ => None,
    }
}

fn decode_value<B: ByteOrder>(value_type: ValueType, raw: &[u8]) -> Value {
    let float = |f: f64| serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number);

    let values: Vec<Value> = match value_type {
        ValueType::Ascii => {
            let text = String::from_utf8_lossy(raw);
            return Value::from(text.trim_end_matches('\0'));
        }
        ValueType::Byte | ValueType::Undefined => raw.iter().map(|&b| Value::from(b)).collect(),
        ValueType::SByte => raw.iter().map(|&b| Value::from(b as i8)).collect(),
        ValueType::Short => raw.chunks_exact(2).map(|c| Value::from(B::read_u16(c))).collect(),
        ValueType::SShort => raw.chunks_exact(2).map(|c| Value::from(B::read_i16(c))).collect(),
        ValueType::Long => raw.chunks_exact(4).map(|c| Value::from(B::read_u32(c))).collect(),
        ValueType::SLong => raw.chunks_exact(4).map(|c| Value::from(B::read_i32(c))).collect(),
        ValueType::Rational => raw
            .chunks_exact(8)
            .map(|c| Value::from(vec![B::read_u32(&c[..4]), B::read_u32(&c[4..])]))
            .collect(),
        ValueType::SRational => raw
            .chunks_exact(8)
            .map(|c| Value::from(vec![B::read_i32(&c[..4]), B::read_i32(&c[4..])]))
            .collect(),
        ValueType::Float => raw
            .chunks_exact(4)
            .map(|c| float(f64::from(B::read_f32(c))))
            .collect(),
        ValueType::Double => raw.chunks_exact(8).map(|c| float(B::read_f64(c))).collect(),
    };

    match <[Value; 1]>::try_from(values) {
        Ok([single]) => single,
        Err(values) => Value::Array(values),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Big-endian TIFF with IFD0 (Make, ExifIFDPointer), an Exif IFD
    /// (ExposureTime) and IFD1 pointing at a thumbnail.
    pub(crate) fn sample_tiff(thumbnail: &[u8]) -> Vec<u8> {
        let mut tiff = b"MM\0*\0\0\0\x08".to_vec();

        // IFD0 at 8: 2 entries, next IFD at 38
        tiff.extend_from_slice(&[0, 2]);
        tiff.extend_from_slice(&[0x01, 0x0F, 0, 2, 0, 0, 0, 4]);
        tiff.extend_from_slice(b"ACME");
        tiff.extend_from_slice(&[0x87, 0x69, 0, 4, 0, 0, 0, 1, 0, 0, 0, 68]);
        tiff.extend_from_slice(&[0, 0, 0, 38]);
        assert_eq!(tiff.len(), 38);

        // IFD1 at 38: thumbnail offset and length, no next IFD
        let thumbnail_offset = 96u32;
        tiff.extend_from_slice(&[0, 2]);
        tiff.extend_from_slice(&[0x02, 0x01, 0, 4, 0, 0, 0, 1]);
        tiff.extend_from_slice(&thumbnail_offset.to_be_bytes());
        tiff.extend_from_slice(&[0x02, 0x02, 0, 4, 0, 0, 0, 1]);
        tiff.extend_from_slice(&(thumbnail.len() as u32).to_be_bytes());
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(tiff.len(), 68);

        // Exif IFD at 68: ExposureTime rational stored out of line at 86
        tiff.extend_from_slice(&[0, 1]);
        tiff.extend_from_slice(&[0x82, 0x9A, 0, 5, 0, 0, 0, 1, 0, 0, 0, 86]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(tiff.len(), 86);
        tiff.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 125]);

        tiff.resize(thumbnail_offset as usize, 0);
        tiff.extend_from_slice(thumbnail);
        tiff
    }

    #[test]
    fn test_decode_linked_ifds() {
        let thumbnail = b"\xFF\xD8\xFF\xD9";
        let tiff = sample_tiff(thumbnail);
        let data = [b"prefix".as_slice(), &tiff].concat();
        let exif = decode(&data, 6, data.len()).unwrap();

        assert_eq!(exif.thumbnail, Some((6 + 96, 4)));

        let header = &exif.fragments[0];
        assert_eq!(header.get("byte_order"), Some(&json!("big_endian")));
        assert_eq!(header.offset, 6);

        let find = |tag_name: &str| {
            exif.fragments
                .iter()
                .find(|f| f.get("tag_name") == Some(&json!(tag_name)))
                .unwrap()
        };
        assert_eq!(find("Make").get("value"), Some(&json!("ACME")));
        assert_eq!(find("Make").offset, 6 + 10);
        assert_eq!(find("ExposureTime").get("value"), Some(&json!([1, 125])));
        assert_eq!(find("ExposureTime").get("ifd"), Some(&json!("exif")));
        assert_eq!(find("JPEGInterchangeFormatLength").get("value"), Some(&json!(4)));

        let ifds: Vec<_> = exif
            .fragments
            .iter()
            .filter(|f| f.get("type") == Some(&json!("ifd")))
            .map(|f| f.get("ifd").unwrap().clone())
            .collect();
        assert_eq!(ifds, vec![json!("ifd0"), json!("exif"), json!("ifd1")]);

        let values: Vec<_> = exif
            .fragments
            .iter()
            .filter(|f| f.get("type") == Some(&json!("ifd_value")))
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].offset, 6 + 86);
        assert_eq!(values[0].length, 8);
    }

    #[test]
    fn test_gps_and_interop_links() {
        let mut tiff = b"MM\0*\0\0\0\x08".to_vec();

        // IFD0 at 8: Exif pointer to 38, GPS pointer to 56
        tiff.extend_from_slice(&[0, 2]);
        tiff.extend_from_slice(&[0x87, 0x69, 0, 4, 0, 0, 0, 1, 0, 0, 0, 38]);
        tiff.extend_from_slice(&[0x88, 0x25, 0, 4, 0, 0, 0, 1, 0, 0, 0, 56]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(tiff.len(), 38);

        // Exif IFD at 38: Interop pointer to 74
        tiff.extend_from_slice(&[0, 1]);
        tiff.extend_from_slice(&[0xA0, 0x05, 0, 4, 0, 0, 0, 1, 0, 0, 0, 74]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(tiff.len(), 56);

        // GPS IFD at 56: GPSLatitudeRef "N"
        tiff.extend_from_slice(&[0, 1]);
        tiff.extend_from_slice(&[0x00, 0x01, 0, 2, 0, 0, 0, 2, b'N', 0, 0, 0]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(tiff.len(), 74);

        // Interop IFD at 74: InteroperabilityIndex "R98"
        tiff.extend_from_slice(&[0, 1]);
        tiff.extend_from_slice(&[0x00, 0x01, 0, 2, 0, 0, 0, 4, b'R', b'9', b'8', 0]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);

        let exif = decode(&tiff, 0, tiff.len()).unwrap();
        let ifds: Vec<_> = exif
            .fragments
            .iter()
            .filter(|f| f.get("type") == Some(&json!("ifd")))
            .map(|f| (f.get("ifd").unwrap().clone(), f.offset))
            .collect();
        assert_eq!(
            ifds,
            vec![
                (json!("ifd0"), 8),
                (json!("exif"), 38),
                (json!("gps"), 56),
                (json!("interop"), 74),
            ]
        );

        let find = |tag_name: &str| {
            exif.fragments
                .iter()
                .find(|f| f.get("tag_name") == Some(&json!(tag_name)))
                .unwrap()
        };
        assert_eq!(find("GPSInfoIFDPointer").get("value"), Some(&json!(56)));
        assert_eq!(find("GPSLatitudeRef").get("value"), Some(&json!("N")));
        assert_eq!(find("GPSLatitudeRef").get("ifd"), Some(&json!("gps")));
        assert_eq!(find("GPSLatitudeRef").offset, 58);
        assert_eq!(find("InteroperabilityIndex").get("value"), Some(&json!("R98")));
        assert_eq!(find("InteroperabilityIndex").get("ifd"), Some(&json!("interop")));
        assert_eq!(find("InteroperabilityIndex").offset, 76);
    }

    #[test]
    fn test_out_of_bounds_links() {
        // IFD0 at 8: GPS pointer far past the end, Exif pointer at the very end
        let mut tiff = b"MM\0*\0\0\0\x08".to_vec();
        tiff.extend_from_slice(&[0, 2]);
        tiff.extend_from_slice(&[0x87, 0x69, 0, 4, 0, 0, 0, 1, 0, 0, 0, 38]);
        tiff.extend_from_slice(&[0x88, 0x25, 0, 4, 0, 0, 0, 1, 0xFF, 0xFF, 0, 0]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(tiff.len(), 38);

        let exif = decode(&tiff, 0, tiff.len()).unwrap();
        assert_eq!(exif.fragments.len(), 5);
        assert_eq!(
            exif.fragments
                .iter()
                .filter(|f| f.get("type") == Some(&json!("ifd")))
                .count(),
            1
        );
        let gps = exif
            .fragments
            .iter()
            .find(|f| f.get("tag") == Some(&json!(0x8825)))
            .unwrap();
        assert_eq!(gps.get("value"), Some(&json!(0xFFFF_0000u32)));
        assert_eq!(exif.thumbnail, None);
    }

    #[test]
    fn test_little_endian_and_cycles() {
        // IFD0 at 8 with one SHORT entry, next IFD pointing back at itself
        let mut tiff = b"II*\0\x08\0\0\0".to_vec();
        tiff.extend_from_slice(&[1, 0]);
        tiff.extend_from_slice(&[0x12, 0x01, 3, 0, 1, 0, 0, 0, 6, 0, 0, 0]);
        tiff.extend_from_slice(&[8, 0, 0, 0]);

        let exif = decode(&tiff, 0, tiff.len()).unwrap();
        let orientation = exif
            .fragments
            .iter()
            .find(|f| f.get("tag_name") == Some(&json!("Orientation")))
            .unwrap();
        assert_eq!(orientation.get("value"), Some(&json!(6)));
        assert_eq!(orientation.get("value_type"), Some(&json!("short")));
        assert_eq!(
            exif.fragments
                .iter()
                .filter(|f| f.get("type") == Some(&json!("ifd")))
                .count(),
            1
        );
        assert_eq!(exif.thumbnail, None);
    }

    #[test]
    fn test_truncated_ifd() {
        let mut tiff = b"MM\0*\0\0\0\x08".to_vec();
        tiff.extend_from_slice(&[0, 5, 0x01, 0x0F]);
        let exif = decode(&tiff, 0, tiff.len()).unwrap();
        assert_eq!(exif.fragments.len(), 2);
    }

    #[test]
    fn test_unknown_byte_order() {
        assert!(decode(b"XX\0*\0\0\0\x08", 0, 8).is_none());
        assert!(decode(b"MM", 0, 2).is_none());
    }
}
