use crate::channel::MAX_CHANNELS;
use crate::convert::{decode_sample, encode_sample};
use crate::error::{Result, SoundIoError};
use crate::format::Format;

/// Where one channel's samples live inside a granted buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelArea {
    /// Bytes from the start of the buffer to the channel's first sample
    pub offset: usize,
    /// Bytes between consecutive frames of this channel
    pub step: usize,
}

fn interleaved_areas(format: Format, channel_count: usize) -> Vec<ChannelArea> {
    let bps = format.bytes_per_sample();
    let step = format.bytes_per_frame(channel_count);
    (0..channel_count)
        .map(|ch| ChannelArea {
            offset: ch * bps,
            step,
        })
        .collect()
}

fn planar_areas(format: Format, channel_count: usize, frame_count: usize) -> Vec<ChannelArea> {
    let bps = format.bytes_per_sample();
    (0..channel_count)
        .map(|ch| ChannelArea {
            offset: ch * frame_count * bps,
            step: bps,
        })
        .collect()
}

fn validate(
    len: usize,
    format: Format,
    areas: &[ChannelArea],
    frame_count: usize,
) -> Result<[ChannelArea; MAX_CHANNELS]> {
    let bps = format.bytes_per_sample();
    if bps == 0 || areas.is_empty() || areas.len() > MAX_CHANNELS {
        return Err(SoundIoError::Invalid);
    }
    let mut table = [ChannelArea::default(); MAX_CHANNELS];
    for (slot, area) in table.iter_mut().zip(areas) {
        if frame_count > 0 {
            let last = area.offset + (frame_count - 1) * area.step + bps;
            if last > len {
                return Err(SoundIoError::Invalid);
            }
        }
        *slot = *area;
    }
    Ok(table)
}

/// Read-only view of a granted capture buffer.
///
/// The view borrows the backend's memory, so it cannot outlive the
/// `end_read` call that releases it.
#[derive(Debug)]
pub struct ChannelAreas<'a> {
    data: &'a [u8],
    areas: [ChannelArea; MAX_CHANNELS],
    channel_count: usize,
    frame_count: usize,
    format: Format,
}

impl<'a> ChannelAreas<'a> {
    pub fn from_areas(
        data: &'a [u8],
        format: Format,
        areas: &[ChannelArea],
        frame_count: usize,
    ) -> Result<Self> {
        let table = validate(data.len(), format, areas, frame_count)?;
        Ok(Self {
            data,
            areas: table,
            channel_count: areas.len(),
            frame_count,
            format,
        })
    }

    pub fn interleaved(
        data: &'a [u8],
        format: Format,
        channel_count: usize,
        frame_count: usize,
    ) -> Result<Self> {
        Self::from_areas(data, format, &interleaved_areas(format, channel_count), frame_count)
    }

    pub fn planar(
        data: &'a [u8],
        format: Format,
        channel_count: usize,
        frame_count: usize,
    ) -> Result<Self> {
        Self::from_areas(
            data,
            format,
            &planar_areas(format, channel_count, frame_count),
            frame_count,
        )
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn areas(&self) -> &[ChannelArea] {
        &self.areas[..self.channel_count]
    }

    /// `None` past the channel count
    pub fn area(&self, channel: usize) -> Option<ChannelArea> {
        self.areas().get(channel).copied()
    }

    /// Raw bytes of one sample. Panics if `channel` or `frame` is out of range.
    pub fn buffer(&self, channel: usize, frame: usize) -> &[u8] {
        let start = sample_offset(&self.areas[..self.channel_count], channel, frame, self.frame_count);
        &self.data[start..start + self.format.bytes_per_sample()]
    }

    pub fn read_sample(&self, channel: usize, frame: usize) -> f64 {
        decode_sample(self.format, self.buffer(channel, frame))
    }

    /// Copy frames into `out` as tightly interleaved samples
    pub fn copy_interleaved(&self, out: &mut [u8]) -> usize {
        let bps = self.format.bytes_per_sample();
        let mut written = 0;
        for frame in 0..self.frame_count {
            for ch in 0..self.channel_count {
                if written + bps > out.len() {
                    return written;
                }
                out[written..written + bps].copy_from_slice(self.buffer(ch, frame));
                written += bps;
            }
        }
        written
    }
}

/// Writable view of a granted playback buffer.
#[derive(Debug)]
pub struct ChannelAreasMut<'a> {
    data: &'a mut [u8],
    areas: [ChannelArea; MAX_CHANNELS],
    channel_count: usize,
    frame_count: usize,
    format: Format,
}

impl<'a> ChannelAreasMut<'a> {
    pub fn from_areas(
        data: &'a mut [u8],
        format: Format,
        areas: &[ChannelArea],
        frame_count: usize,
    ) -> Result<Self> {
        let table = validate(data.len(), format, areas, frame_count)?;
        Ok(Self {
            data,
            areas: table,
            channel_count: areas.len(),
            frame_count,
            format,
        })
    }

    pub fn interleaved(
        data: &'a mut [u8],
        format: Format,
        channel_count: usize,
        frame_count: usize,
    ) -> Result<Self> {
        let areas = interleaved_areas(format, channel_count);
        Self::from_areas(data, format, &areas, frame_count)
    }

    pub fn planar(
        data: &'a mut [u8],
        format: Format,
        channel_count: usize,
        frame_count: usize,
    ) -> Result<Self> {
        let areas = planar_areas(format, channel_count, frame_count);
        Self::from_areas(data, format, &areas, frame_count)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn areas(&self) -> &[ChannelArea] {
        &self.areas[..self.channel_count]
    }

    /// `None` past the channel count
    pub fn area(&self, channel: usize) -> Option<ChannelArea> {
        self.areas().get(channel).copied()
    }

    pub fn buffer(&self, channel: usize, frame: usize) -> &[u8] {
        let start = sample_offset(&self.areas[..self.channel_count], channel, frame, self.frame_count);
        &self.data[start..start + self.format.bytes_per_sample()]
    }

    /// Raw bytes of one sample. Panics if `channel` or `frame` is out of range.
    pub fn buffer_mut(&mut self, channel: usize, frame: usize) -> &mut [u8] {
        let start = sample_offset(&self.areas[..self.channel_count], channel, frame, self.frame_count);
        let bps = self.format.bytes_per_sample();
        &mut self.data[start..start + bps]
    }

    pub fn read_sample(&self, channel: usize, frame: usize) -> f64 {
        decode_sample(self.format, self.buffer(channel, frame))
    }

    pub fn write_sample(&mut self, channel: usize, frame: usize, value: f64) {
        let format = self.format;
        encode_sample(format, value, self.buffer_mut(channel, frame));
    }

    /// Silence every sample; unsigned formats get their midpoint
    pub fn fill_silence(&mut self) {
        for frame in 0..self.frame_count {
            for ch in 0..self.channel_count {
                self.write_sample(ch, frame, 0.0);
            }
        }
    }

    /// Copy tightly interleaved samples from `src` into the areas,
    /// returning the number of bytes consumed
    pub fn copy_from_interleaved(&mut self, src: &[u8]) -> usize {
        let bps = self.format.bytes_per_sample();
        let mut read = 0;
        for frame in 0..self.frame_count {
            for ch in 0..self.channel_count {
                if read + bps > src.len() {
                    return read;
                }
                self.buffer_mut(ch, frame).copy_from_slice(&src[read..read + bps]);
                read += bps;
            }
        }
        read
    }
}

fn sample_offset(areas: &[ChannelArea], channel: usize, frame: usize, frame_count: usize) -> usize {
    assert!(
        frame < frame_count,
        "frame {} out of range (granted {})",
        frame,
        frame_count
    );
    let area = areas[channel];
    area.offset + frame * area.step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_offsets() {
        let mut data = vec![0u8; 4 * 2 * 3];
        let areas = ChannelAreasMut::interleaved(&mut data, Format::S32LE, 2, 3).unwrap();
        assert_eq!(areas.area(1), Some(ChannelArea { offset: 4, step: 8 }));
        assert_eq!(areas.area(2), None);
    }

    #[test]
    fn test_planar_write_lands_in_channel_block() {
        let mut data = vec![0u8; 2 * 2 * 4];
        {
            let mut areas = ChannelAreasMut::planar(&mut data, Format::S16LE, 2, 4).unwrap();
            areas.write_sample(1, 0, 0.5);
        }
        // Channel 1 starts after four 2-byte samples of channel 0
        assert_eq!(&data[8..10], &16384i16.to_le_bytes());
    }

    #[test]
    fn test_rejects_area_past_end() {
        let data = vec![0u8; 8];
        let areas = [ChannelArea { offset: 4, step: 4 }];
        assert_eq!(
            ChannelAreas::from_areas(&data, Format::S32LE, &areas, 2).unwrap_err(),
            SoundIoError::Invalid
        );
    }

    #[test]
    fn test_empty_grant_is_valid() {
        let mut data: Vec<u8> = Vec::new();
        let areas = ChannelAreasMut::interleaved(&mut data, Format::FLOAT32NE, 2, 0).unwrap();
        assert_eq!(areas.frame_count(), 0);
    }
}
