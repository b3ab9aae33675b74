//! MPEG audio frame header decoding.

use serde_json::{json, Value};

/// Bitrates in kbps by table row and bitrate index; 0 is "free format"
const BITRATES: [[u32; 15]; 5] = [
    // MPEG-1 Layer I
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    // MPEG-1 Layer II
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    // MPEG-1 Layer III
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    // MPEG-2/2.5 Layer I
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    // MPEG-2/2.5 Layer II and III
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

/// Audio version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    /// MPEG-1
    V1,
    /// MPEG-2 (LSF)
    V2,
    /// MPEG-2.5 (unofficial extension)
    V25,
}

impl MpegVersion {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::V25),
            2 => Some(Self::V2),
            3 => Some(Self::V1),
            _ => None,
        }
    }

    /// Version as written in the standard, e.g. `"2.5"`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2 => "2",
            Self::V25 => "2.5",
        }
    }

    /// Returns true for the low sampling frequency versions
    pub fn is_lsf(self) -> bool {
        self != Self::V1
    }

    fn sample_rates(self) -> [u32; 3] {
        match self {
            Self::V1 => [44100, 48000, 32000],
            Self::V2 => [22050, 24000, 16000],
            Self::V25 => [11025, 12000, 8000],
        }
    }
}

/// Channel mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Stereo
    Stereo,
    /// Joint stereo
    JointStereo,
    /// Dual channel
    DualChannel,
    /// Single channel
    Mono,
}

impl ChannelMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Stereo,
            1 => Self::JointStereo,
            2 => Self::DualChannel,
            _ => Self::Mono,
        }
    }

    /// Display name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stereo => "Stereo",
            Self::JointStereo => "JointStereo",
            Self::DualChannel => "DualChannel",
            Self::Mono => "Mono",
        }
    }
}

/// Decoded 4-byte frame header
///
/// Every field is the result of a table lookup. Reserved version, layer,
/// bitrate, sample rate and emphasis values make the header invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Audio version
    pub version: MpegVersion,
    /// Layer, 1 to 3
    pub layer: u8,
    /// A 16-bit CRC follows the header
    pub crc_protected: bool,
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Sampling frequency in Hz
    pub frequency: u32,
    /// One padding slot is appended
    pub padding: bool,
    /// Private bit
    pub private: bool,
    /// Channel mode
    pub channel_mode: ChannelMode,
    /// Raw mode extension bits
    pub mode_extension: u8,
    /// Copyright bit
    pub copyright: bool,
    /// Original bit
    pub original: bool,
    /// Raw emphasis bits, never the reserved value 2
    pub emphasis: u8,
}

impl FrameHeader {
    /// Header size in bytes
    pub const LEN: usize = 4;

    /// Decodes the header at the start of `data`
    ///
    /// Returns `None` unless `data` starts with an 11-bit frame sync and every
    /// field holds a valid, non-reserved value.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let [sync, b1, b2, b3, ..] = *data else {
            return None;
        };
        if sync != 0xFF || b1 < 0xE0 {
            return None;
        }

        let version = MpegVersion::from_bits((b1 >> 3) & 0b11)?;
        let layer = match (b1 >> 1) & 0b11 {
            1 => 3,
            2 => 2,
            3 => 1,
            _ => return None,
        };

        let bitrate_index = usize::from(b2 >> 4);
        let row = match (version.is_lsf(), layer) {
            (false, l) => usize::from(l) - 1,
            (true, 1) => 3,
            (true, _) => 4,
        };
        let kbps = match bitrate_index {
            1..=14 => BITRATES[row][bitrate_index],
            _ => return None,
        };

        let frequency = match (b2 >> 2) & 0b11 {
            3 => return None,
            index => version.sample_rates()[usize::from(index)],
        };

        let emphasis = b3 & 0b11;
        if emphasis == 2 {
            return None;
        }

        Some(Self {
            version,
            layer,
            crc_protected: b1 & 1 == 0,
            bitrate: kbps * 1000,
            frequency,
            padding: (b2 >> 1) & 1 == 1,
            private: b2 & 1 == 1,
            channel_mode: ChannelMode::from_bits(b3 >> 6),
            mode_extension: (b3 >> 4) & 0b11,
            copyright: (b3 >> 3) & 1 == 1,
            original: (b3 >> 2) & 1 == 1,
            emphasis,
        })
    }

    /// Samples per frame
    pub fn samples(&self) -> u32 {
        match (self.layer, self.version.is_lsf()) {
            (1, _) => 384,
            (2, _) | (3, false) => 1152,
            _ => 576,
        }
    }

    /// Number of audio channels
    pub fn channels(&self) -> usize {
        if self.channel_mode == ChannelMode::Mono {
            1
        } else {
            2
        }
    }

    /// Frame length in bytes, header included
    pub fn frame_length(&self) -> usize {
        let padding = u64::from(self.padding);
        let bitrate = u64::from(self.bitrate);
        let frequency = u64::from(self.frequency);
        let length = if self.layer == 1 {
            (12 * bitrate / frequency + padding) * 4
        } else {
            u64::from(self.samples()) * bitrate / (8 * frequency) + padding
        };
        length as usize
    }

    /// Size of the Layer III side information, 0 for other layers
    pub fn side_info_length(&self) -> usize {
        match (self.layer, self.version.is_lsf(), self.channels()) {
            (3, false, 1) => 17,
            (3, false, _) => 32,
            (3, true, 1) => 9,
            (3, true, _) => 17,
            _ => 0,
        }
    }

    fn mode_extension_value(&self) -> Value {
        if self.layer == 3 {
            json!({
                "intensity_stereo": self.mode_extension & 0b01 != 0,
                "ms_stereo": self.mode_extension & 0b10 != 0,
            })
        } else {
            let first_band = 4 * (u32::from(self.mode_extension) + 1);
            Value::from(format!("bands {} to 31", first_band))
        }
    }

    fn emphasis_name(&self) -> &'static str {
        match self.emphasis {
            0 => "None",
            1 => "50/15 ms",
            _ => "CCIT J.17",
        }
    }

    /// JSON rendering for frame fragments
    pub fn to_value(&self) -> Value {
        json!({
            "version": self.version.as_str(),
            "layer": self.layer,
            "crc": self.crc_protected,
            "bitrate": self.bitrate,
            "frequency": self.frequency,
            "padding": self.padding,
            "private": self.private,
            "channel_mode": self.channel_mode.as_str(),
            "mode_extension": self.mode_extension_value(),
            "copyright": self.copyright,
            "original": self.original,
            "emphasis": self.emphasis_name(),
            "samples": self.samples(),
        })
    }
}
