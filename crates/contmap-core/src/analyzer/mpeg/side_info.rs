//! Layer III side information.

use super::header::FrameHeader;
use crate::bits::BitReader;
use crate::error::Result;
use serde::Serialize;
use serde_json::Value;

/// `(slen1, slen2)` by `scalefac_compress` (MPEG-1)
const SLEN: [(u32, u32); 16] = [
    (0, 0),
    (0, 1),
    (0, 2),
    (0, 3),
    (3, 0),
    (1, 1),
    (1, 2),
    (1, 3),
    (2, 1),
    (2, 2),
    (2, 3),
    (3, 1),
    (3, 2),
    (3, 3),
    (4, 2),
    (4, 3),
];

/// Per-granule, per-channel side information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GranuleChannel {
    /// Bits of main data for scale factors and Huffman data
    pub part2_3_length: u32,
    /// Number of value pairs in the big-values region
    pub big_values: u32,
    /// Quantizer step size
    pub global_gain: u32,
    /// Scale factor bit allocation index
    pub scalefac_compress: u32,
    /// `(slen1, slen2)` resolved from `scalefac_compress`, MPEG-1 only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slen: Option<(u32, u32)>,
    /// Block type other than normal
    pub windows_switching_flag: bool,
    /// Window type
    pub block_type: u32,
    /// Lower subbands use long blocks
    pub mixed_block_flag: bool,
    /// Huffman tables per region
    pub table_select: Vec<u32>,
    /// Gain offsets per short window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subblock_gain: Option<[u32; 3]>,
    /// Size of the first big-values region
    pub region0_count: u32,
    /// Size of the second big-values region
    pub region1_count: u32,
    /// High-frequency amplification, MPEG-1 only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflag: Option<bool>,
    /// Scale factor quantization step
    pub scalefac_scale: bool,
    /// Huffman table for the count1 region
    pub count1table_select: bool,
}

/// Decoded side information of one Layer III frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideInformation {
    /// Negative offset of the main data in the bit reservoir
    pub main_data_begin: u32,
    /// Private bits
    pub private_bits: u32,
    /// Scale factor selection per channel, MPEG-1 only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scfsi: Vec<[bool; 4]>,
    /// `granules[granule][channel]`
    pub granules: Vec<Vec<GranuleChannel>>,
}

impl SideInformation {
    /// Decodes the side information following the header (and CRC)
    ///
    /// MPEG-1 carries two granules with 4-bit `scalefac_compress`; MPEG-2 and
    /// 2.5 carry a single granule with a 9-bit `scalefac_compress` and no
    /// `preflag`.
    pub fn parse(data: &[u8], header: &FrameHeader) -> Result<Self> {
        let lsf = header.version.is_lsf();
        let channels = header.channels();
        let mono = channels == 1;
        let mut reader = BitReader::new(data);

        let main_data_begin = reader.read(if lsf { 8 } else { 9 })?;
        let private_bits = reader.read(match (lsf, mono) {
            (false, true) => 5,
            (false, false) => 3,
            (true, true) => 1,
            (true, false) => 2,
        })?;

        let mut scfsi = Vec::new();
        if !lsf {
            for _ in 0..channels {
                let mut bands = [false; 4];
                for band in &mut bands {
                    *band = reader.read_flag()?;
                }
                scfsi.push(bands);
            }
        }

        let granule_count = if lsf { 1 } else { 2 };
        let mut granules = Vec::with_capacity(granule_count);
        for _ in 0..granule_count {
            let mut granule = Vec::with_capacity(channels);
            for _ in 0..channels {
                granule.push(Self::read_granule_channel(&mut reader, lsf)?);
            }
            granules.push(granule);
        }

        Ok(Self {
            main_data_begin,
            private_bits,
            scfsi,
            granules,
        })
    }

    fn read_granule_channel(reader: &mut BitReader<'_>, lsf: bool) -> Result<GranuleChannel> {
        let part2_3_length = reader.read(12)?;
        let big_values = reader.read(9)?;
        let global_gain = reader.read(8)?;
        let scalefac_compress = reader.read(if lsf { 9 } else { 4 })?;
        let slen = (!lsf).then(|| SLEN[scalefac_compress as usize]);
        let windows_switching_flag = reader.read_flag()?;

        let (block_type, mixed_block_flag, table_select, subblock_gain, region0_count, region1_count);
        if windows_switching_flag {
            block_type = reader.read(2)?;
            mixed_block_flag = reader.read_flag()?;
            table_select = vec![reader.read(5)?, reader.read(5)?];
            subblock_gain = Some([reader.read(3)?, reader.read(3)?, reader.read(3)?]);
            region0_count = if block_type == 2 { 8 } else { 7 };
            region1_count = 20 - region0_count;
        } else {
            block_type = 0;
            mixed_block_flag = false;
            table_select = vec![reader.read(5)?, reader.read(5)?, reader.read(5)?];
            subblock_gain = None;
            region0_count = reader.read(4)?;
            region1_count = reader.read(3)?;
        }

        let preflag = if lsf { None } else { Some(reader.read_flag()?) };

        Ok(GranuleChannel {
            part2_3_length,
            big_values,
            global_gain,
            scalefac_compress,
            slen,
            windows_switching_flag,
            block_type,
            mixed_block_flag,
            table_select,
            subblock_gain,
            region0_count,
            region1_count,
            preflag,
            scalefac_scale: reader.read_flag()?,
            count1table_select: reader.read_flag()?,
        })
    }

    /// JSON rendering for frame fragments
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header(bytes: [u8; 4]) -> FrameHeader {
        FrameHeader::parse(&bytes).unwrap()
    }

    #[test]
    fn test_mpeg1_mono_consumes_17_bytes() {
        let header = header([0xFF, 0xFB, 0x90, 0xC4]);
        assert_eq!(header.side_info_length(), 17);

        // main_data_begin = 0x1FF, everything else zero
        let mut data = [0u8; 17];
        data[0] = 0xFF;
        data[1] = 0x80;
        let side_info = SideInformation::parse(&data, &header).unwrap();

        assert_eq!(side_info.main_data_begin, 0x1FF);
        assert_eq!(side_info.private_bits, 0);
        assert_eq!(side_info.scfsi, vec![[false; 4]]);
        assert_eq!(side_info.granules.len(), 2);
        assert_eq!(side_info.granules[0].len(), 1);
        assert_eq!(side_info.granules[1][0].preflag, Some(false));

        assert!(SideInformation::parse(&data[..16], &header).is_err());
    }

    #[test]
    fn test_mpeg1_stereo_block_switching() {
        let header = header([0xFF, 0xFB, 0x90, 0x04]);
        let mut data = [0u8; 32];
        // 9 + 3 + 8 bits precede the first granule; its window switching
        // flag sits after 12 + 9 + 8 + 4 further bits, at bit 53
        data[53 / 8] |= 0x80 >> (53 % 8);
        // block_type = 2 in the following two bits
        data[54 / 8] |= 0x80 >> (54 % 8);

        let side_info = SideInformation::parse(&data, &header).unwrap();
        let first = &side_info.granules[0][0];
        assert!(first.windows_switching_flag);
        assert_eq!(first.block_type, 2);
        assert_eq!(first.table_select.len(), 2);
        assert_eq!(first.subblock_gain, Some([0, 0, 0]));
        assert_eq!(first.region0_count, 8);
        assert_eq!(first.region1_count, 12);
        assert_eq!(side_info.granules[0][1].table_select.len(), 3);
    }

    #[test]
    fn test_lsf_single_granule() {
        let header = header([0xFF, 0xF3, 0x80, 0xC0]);
        let data = [0u8; 9];
        let side_info = SideInformation::parse(&data, &header).unwrap();
        assert_eq!(side_info.granules.len(), 1);
        assert!(side_info.scfsi.is_empty());
        assert_eq!(side_info.granules[0][0].preflag, None);
        assert_eq!(side_info.granules[0][0].slen, None);

        let value = side_info.to_value();
        assert!(value.get("scfsi").is_none());
        assert_eq!(value["granules"][0][0]["part2_3_length"], 0);
    }
}
