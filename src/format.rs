use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte order of a sample as stored in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
    Little,
    Big,
}

/// Sample encoding
///
/// 24-bit formats are stored in the low three bytes of a 32-bit word, so
/// they take four bytes per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Format {
    Invalid = 0,
    S8,
    U8,
    S16LE,
    S16BE,
    U16LE,
    U16BE,
    S24LE,
    S24BE,
    U24LE,
    U24BE,
    S32LE,
    S32BE,
    U32LE,
    U32BE,
    Float32LE,
    Float32BE,
    Float64LE,
    Float64BE,
}

struct FormatInfo {
    name: &'static str,
    bit_depth: u32,
    bytes: usize,
    signed: bool,
    float: bool,
    endian: Endian,
}

const fn info(
    name: &'static str,
    bit_depth: u32,
    bytes: usize,
    signed: bool,
    float: bool,
    endian: Endian,
) -> FormatInfo {
    FormatInfo {
        name,
        bit_depth,
        bytes,
        signed,
        float,
        endian,
    }
}

use self::Endian::{Big, Little};

// Indexed by discriminant.
const FORMAT_TABLE: [FormatInfo; 19] = [
    info("(invalid sample format)", 0, 0, false, false, Little),
    info("signed 8-bit", 8, 1, true, false, Little),
    info("unsigned 8-bit", 8, 1, false, false, Little),
    info("signed 16-bit LE", 16, 2, true, false, Little),
    info("signed 16-bit BE", 16, 2, true, false, Big),
    info("unsigned 16-bit LE", 16, 2, false, false, Little),
    info("unsigned 16-bit BE", 16, 2, false, false, Big),
    info("signed 24-bit LE", 24, 4, true, false, Little),
    info("signed 24-bit BE", 24, 4, true, false, Big),
    info("unsigned 24-bit LE", 24, 4, false, false, Little),
    info("unsigned 24-bit BE", 24, 4, false, false, Big),
    info("signed 32-bit LE", 32, 4, true, false, Little),
    info("signed 32-bit BE", 32, 4, true, false, Big),
    info("unsigned 32-bit LE", 32, 4, false, false, Little),
    info("unsigned 32-bit BE", 32, 4, false, false, Big),
    info("float 32-bit LE", 32, 4, true, true, Little),
    info("float 32-bit BE", 32, 4, true, true, Big),
    info("float 64-bit LE", 64, 8, true, true, Little),
    info("float 64-bit BE", 64, 8, true, true, Big),
];

const ALL_FORMATS: [Format; 18] = [
    Format::S8,
    Format::U8,
    Format::S16LE,
    Format::S16BE,
    Format::U16LE,
    Format::U16BE,
    Format::S24LE,
    Format::S24BE,
    Format::U24LE,
    Format::U24BE,
    Format::S32LE,
    Format::S32BE,
    Format::U32LE,
    Format::U32BE,
    Format::Float32LE,
    Format::Float32BE,
    Format::Float64LE,
    Format::Float64BE,
];

const LITTLE: bool = cfg!(target_endian = "little");

const fn pick(le: Format, be: Format, native: bool) -> Format {
    if LITTLE == native {
        le
    } else {
        be
    }
}

impl Format {
    pub const S16NE: Format = pick(Format::S16LE, Format::S16BE, true);
    pub const U16NE: Format = pick(Format::U16LE, Format::U16BE, true);
    pub const S24NE: Format = pick(Format::S24LE, Format::S24BE, true);
    pub const U24NE: Format = pick(Format::U24LE, Format::U24BE, true);
    pub const S32NE: Format = pick(Format::S32LE, Format::S32BE, true);
    pub const U32NE: Format = pick(Format::U32LE, Format::U32BE, true);
    pub const FLOAT32NE: Format = pick(Format::Float32LE, Format::Float32BE, true);
    pub const FLOAT64NE: Format = pick(Format::Float64LE, Format::Float64BE, true);

    pub const S16FE: Format = pick(Format::S16LE, Format::S16BE, false);
    pub const U16FE: Format = pick(Format::U16LE, Format::U16BE, false);
    pub const S24FE: Format = pick(Format::S24LE, Format::S24BE, false);
    pub const U24FE: Format = pick(Format::U24LE, Format::U24BE, false);
    pub const S32FE: Format = pick(Format::S32LE, Format::S32BE, false);
    pub const U32FE: Format = pick(Format::U32LE, Format::U32BE, false);
    pub const FLOAT32FE: Format = pick(Format::Float32LE, Format::Float32BE, false);
    pub const FLOAT64FE: Format = pick(Format::Float64LE, Format::Float64BE, false);

    /// Every concrete format, excluding `Invalid`
    pub fn all() -> impl Iterator<Item = Format> {
        ALL_FORMATS.into_iter()
    }

    fn info(self) -> &'static FormatInfo {
        &FORMAT_TABLE[self as usize]
    }

    /// Human readable name, e.g. "signed 16-bit LE"
    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn bit_depth(self) -> u32 {
        self.info().bit_depth
    }

    /// Storage size of one sample; 0 for `Invalid`
    pub fn bytes_per_sample(self) -> usize {
        self.info().bytes
    }

    pub fn bytes_per_frame(self, channel_count: usize) -> usize {
        self.bytes_per_sample() * channel_count
    }

    pub fn bytes_per_second(self, channel_count: usize, sample_rate: u32) -> usize {
        self.bytes_per_frame(channel_count) * sample_rate as usize
    }

    pub fn is_signed(self) -> bool {
        self.info().signed
    }

    pub fn is_float(self) -> bool {
        self.info().float
    }

    /// Meaningless for single-byte formats, which report `Little`
    pub fn endian(self) -> Endian {
        self.info().endian
    }

    pub fn is_native_endian(self) -> bool {
        self.bytes_per_sample() <= 1 || (self.endian() == Endian::Little) == LITTLE
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::FLOAT32NE
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
