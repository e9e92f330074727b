//! Conversion between normalized `f64` samples and the raw encodings of
//! every [`Format`].
//!
//! Integer formats map `[-1.0, 1.0)` onto their full range and clamp values
//! outside it. Unsigned formats are offset so that 0.0 lands on the midpoint.
//! Float formats are stored as-is.

use crate::format::{Endian, Format};

const I8_SCALE: f64 = 128.0;
const I16_SCALE: f64 = 32768.0;
const I24_SCALE: f64 = 8388608.0; // 2^23
const I32_SCALE: f64 = 2147483648.0; // 2^31

fn to_int(value: f64, scale: f64) -> i64 {
    (value * scale).clamp(-scale, scale - 1.0) as i64
}

fn store<const N: usize>(out: &mut [u8], le: [u8; N], be: [u8; N], endian: Endian) {
    match endian {
        Endian::Little => out[..N].copy_from_slice(&le),
        Endian::Big => out[..N].copy_from_slice(&be),
    }
}

fn load<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    raw
}

/// Encode one sample into `out`, which must hold at least
/// `format.bytes_per_sample()` bytes. `Invalid` writes nothing.
pub fn encode_sample(format: Format, value: f64, out: &mut [u8]) {
    let endian = format.endian();
    match format {
        Format::Invalid => {}
        Format::S8 => out[0] = to_int(value, I8_SCALE) as i8 as u8,
        Format::U8 => out[0] = (to_int(value, I8_SCALE) + 128) as u8,
        Format::S16LE | Format::S16BE => {
            let s = to_int(value, I16_SCALE) as i16;
            store(out, s.to_le_bytes(), s.to_be_bytes(), endian);
        }
        Format::U16LE | Format::U16BE => {
            let u = (to_int(value, I16_SCALE) + 32768) as u16;
            store(out, u.to_le_bytes(), u.to_be_bytes(), endian);
        }
        Format::S24LE | Format::S24BE => {
            let s = to_int(value, I24_SCALE) as i32;
            store(out, s.to_le_bytes(), s.to_be_bytes(), endian);
        }
        Format::U24LE | Format::U24BE => {
            let u = (to_int(value, I24_SCALE) + 8388608) as u32;
            store(out, u.to_le_bytes(), u.to_be_bytes(), endian);
        }
        Format::S32LE | Format::S32BE => {
            let s = to_int(value, I32_SCALE) as i32;
            store(out, s.to_le_bytes(), s.to_be_bytes(), endian);
        }
        Format::U32LE | Format::U32BE => {
            let u = (to_int(value, I32_SCALE) + 2147483648) as u32;
            store(out, u.to_le_bytes(), u.to_be_bytes(), endian);
        }
        Format::Float32LE | Format::Float32BE => {
            let f = value as f32;
            store(out, f.to_le_bytes(), f.to_be_bytes(), endian);
        }
        Format::Float64LE | Format::Float64BE => {
            store(out, value.to_le_bytes(), value.to_be_bytes(), endian);
        }
    }
}

/// Decode one sample from `bytes`. `Invalid` decodes to silence.
pub fn decode_sample(format: Format, bytes: &[u8]) -> f64 {
    let little = format.endian() == Endian::Little;
    match format {
        Format::Invalid => 0.0,
        Format::S8 => bytes[0] as i8 as f64 / I8_SCALE,
        Format::U8 => (bytes[0] as f64 - 128.0) / I8_SCALE,
        Format::S16LE | Format::S16BE => {
            let raw = load::<2>(bytes);
            let s = if little { i16::from_le_bytes(raw) } else { i16::from_be_bytes(raw) };
            s as f64 / I16_SCALE
        }
        Format::U16LE | Format::U16BE => {
            let raw = load::<2>(bytes);
            let u = if little { u16::from_le_bytes(raw) } else { u16::from_be_bytes(raw) };
            (u as f64 - 32768.0) / I16_SCALE
        }
        Format::S24LE | Format::S24BE => {
            let raw = load::<4>(bytes);
            let word = if little { u32::from_le_bytes(raw) } else { u32::from_be_bytes(raw) };
            // Sign-extend from bit 23
            let s = ((word << 8) as i32) >> 8;
            s as f64 / I24_SCALE
        }
        Format::U24LE | Format::U24BE => {
            let raw = load::<4>(bytes);
            let word = if little { u32::from_le_bytes(raw) } else { u32::from_be_bytes(raw) };
            ((word & 0x00FF_FFFF) as f64 - 8388608.0) / I24_SCALE
        }
        Format::S32LE | Format::S32BE => {
            let raw = load::<4>(bytes);
            let s = if little { i32::from_le_bytes(raw) } else { i32::from_be_bytes(raw) };
            s as f64 / I32_SCALE
        }
        Format::U32LE | Format::U32BE => {
            let raw = load::<4>(bytes);
            let u = if little { u32::from_le_bytes(raw) } else { u32::from_be_bytes(raw) };
            (u as f64 - 2147483648.0) / I32_SCALE
        }
        Format::Float32LE | Format::Float32BE => {
            let raw = load::<4>(bytes);
            let f = if little { f32::from_le_bytes(raw) } else { f32::from_be_bytes(raw) };
            f as f64
        }
        Format::Float64LE | Format::Float64BE => {
            let raw = load::<8>(bytes);
            if little { f64::from_le_bytes(raw) } else { f64::from_be_bytes(raw) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_encodings() {
        let mut buf = [0xAAu8; 8];
        encode_sample(Format::U8, 0.0, &mut buf);
        assert_eq!(buf[0], 128);

        encode_sample(Format::U16BE, 0.0, &mut buf);
        assert_eq!(&buf[..2], &[0x80, 0x00]);

        encode_sample(Format::S16LE, 0.0, &mut buf);
        assert_eq!(&buf[..2], &[0, 0]);
    }

    #[test]
    fn test_clamps_out_of_range() {
        let mut buf = [0u8; 4];
        encode_sample(Format::S16LE, 2.0, &mut buf);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), i16::MAX);
        encode_sample(Format::S16LE, -2.0, &mut buf);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), i16::MIN);
    }

    #[test]
    fn test_24bit_lives_in_low_bytes() {
        let mut buf = [0u8; 4];
        encode_sample(Format::S24LE, -1.0, &mut buf);
        assert_eq!(buf, [0x00, 0x00, 0x80, 0xFF]);
        assert_eq!(decode_sample(Format::S24LE, &buf), -1.0);

        encode_sample(Format::S24BE, 0.5, &mut buf);
        assert_eq!(buf, [0x00, 0x40, 0x00, 0x00]);
        assert_eq!(decode_sample(Format::S24BE, &buf), 0.5);
    }

    #[test]
    fn test_half_scale_in_every_format() {
        let mut buf = [0u8; 8];
        for format in Format::all() {
            encode_sample(format, 0.5, &mut buf);
            let decoded = decode_sample(format, &buf);
            assert!((decoded - 0.5).abs() < 0.01, "{format}: {decoded}");
        }
    }
}
