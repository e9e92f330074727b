use super::{lock_tolerant, StreamCore, StreamParams, StreamState};
use crate::area::ChannelAreasMut;
use crate::backend::{OutStreamDriver, OutputBuffer};
use crate::device::{Device, DeviceAim};
use crate::error::{Result, SoundIoError};
use crate::format::Format;
use crate::layout::ChannelLayout;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

type WriteCallback = Box<dyn FnMut(&mut OutStreamWriter<'_>, usize, usize) + Send>;
type UnderflowCallback = Box<dyn FnMut() + Send>;
type ErrorCallback = Box<dyn FnMut(SoundIoError) + Send>;

#[derive(Default)]
struct OutCallbacks {
    write: Option<WriteCallback>,
    underflow: Option<UnderflowCallback>,
    error: Option<ErrorCallback>,
}

/// Handed to the backend at open; routes backend events to the
/// application's callbacks.
///
/// A callback is taken out of the table while it runs, so it may register
/// a replacement without deadlocking.
#[derive(Clone)]
pub struct OutStreamDispatch {
    callbacks: Arc<Mutex<OutCallbacks>>,
    params: Arc<StreamParams>,
}

impl OutStreamDispatch {
    fn new(callbacks: Arc<Mutex<OutCallbacks>>, params: Arc<StreamParams>) -> Self {
        Self { callbacks, params }
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// One write cycle. The application must write at least
    /// `frame_count_min` frames and may write up to `frame_count_max`.
    pub fn write(
        &self,
        buffer: &mut dyn OutputBuffer,
        frame_count_min: usize,
        frame_count_max: usize,
    ) {
        let taken = lock_tolerant(&self.callbacks).write.take();
        let Some(mut callback) = taken else {
            return;
        };

        let mut writer = OutStreamWriter {
            buffer,
            params: &self.params,
            pending: None,
        };
        callback(&mut writer, frame_count_min, frame_count_max);
        if let Some(frames) = writer.pending {
            warn!(frames, "write callback returned without end_write; frames discarded");
        }

        let mut callbacks = lock_tolerant(&self.callbacks);
        if callbacks.write.is_none() {
            callbacks.write = Some(callback);
        }
    }

    /// The device ran out of frames to play
    pub fn underflow(&self) {
        let taken = lock_tolerant(&self.callbacks).underflow.take();
        if let Some(mut callback) = taken {
            callback();
            let mut callbacks = lock_tolerant(&self.callbacks);
            if callbacks.underflow.is_none() {
                callbacks.underflow = Some(callback);
            }
        }
    }

    /// Unrecoverable stream failure, usually `SoundIoError::Streaming`
    pub fn error(&self, err: SoundIoError) {
        let taken = lock_tolerant(&self.callbacks).error.take();
        match taken {
            Some(mut callback) => {
                callback(err);
                let mut callbacks = lock_tolerant(&self.callbacks);
                if callbacks.error.is_none() {
                    callbacks.error = Some(callback);
                }
            }
            None => error!(stream = %self.params.name, error = %err, "output stream error"),
        }
    }
}

/// Buffer access inside a write callback
pub struct OutStreamWriter<'a> {
    buffer: &'a mut dyn OutputBuffer,
    params: &'a StreamParams,
    pending: Option<usize>,
}

impl<'a> OutStreamWriter<'a> {
    /// Ask for `frame_count` frames to fill.
    ///
    /// On return `frame_count` holds the number granted, which may be
    /// smaller. A request or grant of zero yields `Ok(None)` and needs no
    /// `end_write`. Calling again before `end_write` is `Invalid`.
    pub fn begin_write(&mut self, frame_count: &mut usize) -> Result<Option<ChannelAreasMut<'_>>> {
        if self.pending.is_some() {
            return Err(SoundIoError::Invalid);
        }
        if *frame_count == 0 {
            return Ok(None);
        }
        let areas = self.buffer.begin_write(*frame_count)?;
        *frame_count = areas.frame_count();
        if *frame_count == 0 {
            return Ok(None);
        }
        self.pending = Some(*frame_count);
        Ok(Some(areas))
    }

    /// Commit the frames granted by the last `begin_write`
    pub fn end_write(&mut self) -> Result<()> {
        let frames = self.pending.take().ok_or(SoundIoError::Invalid)?;
        self.buffer.end_write(frames)
    }

    pub fn params(&self) -> &StreamParams {
        self.params
    }

    pub fn format(&self) -> Format {
        self.params.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.params.layout
    }

    pub fn channel_count(&self) -> usize {
        self.params.channel_count()
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.params.bytes_per_frame()
    }

    pub fn software_latency(&self) -> f64 {
        self.params.software_latency
    }
}

/// A playback stream on an output device.
///
/// Configure with the setters, then `open` and `start`. The stream is
/// destroyed when dropped.
pub struct OutStream {
    core: StreamCore<dyn OutStreamDriver>,
    callbacks: Arc<Mutex<OutCallbacks>>,
    volume: f64,
}

impl OutStream {
    pub(crate) fn new(device: Device) -> Self {
        Self {
            core: StreamCore::new(device, DeviceAim::Output, "SoundIoOutStream"),
            callbacks: Arc::new(Mutex::new(OutCallbacks::default())),
            volume: 1.0,
        }
    }

    pub fn set_format(&mut self, format: Format) -> Result<()> {
        self.core.config_mut()?.format = Some(format);
        Ok(())
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        self.core.config_mut()?.sample_rate = Some(sample_rate);
        Ok(())
    }

    pub fn set_layout(&mut self, layout: ChannelLayout) -> Result<()> {
        self.core.config_mut()?.layout = Some(layout);
        Ok(())
    }

    /// Seconds of audio to keep buffered
    pub fn set_software_latency(&mut self, seconds: f64) -> Result<()> {
        self.core.config_mut()?.software_latency = Some(seconds);
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.core.config_mut()?.name = Some(name.into());
        Ok(())
    }

    pub fn set_non_terminal_hint(&mut self, hint: bool) -> Result<()> {
        self.core.config_mut()?.non_terminal_hint = hint;
        Ok(())
    }

    pub fn set_write_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut OutStreamWriter<'_>, usize, usize) + Send + 'static,
    {
        lock_tolerant(&self.callbacks).write = Some(Box::new(callback));
    }

    pub fn set_underflow_callback<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        lock_tolerant(&self.callbacks).underflow = Some(Box::new(callback));
    }

    /// Without an error callback, errors are logged
    pub fn set_error_callback<F>(&mut self, callback: F)
    where
        F: FnMut(SoundIoError) + Send + 'static,
    {
        lock_tolerant(&self.callbacks).error = Some(Box::new(callback));
    }

    pub fn open(&mut self) -> Result<()> {
        let pending = self.core.prepare_open()?;
        let dispatch = OutStreamDispatch::new(self.callbacks.clone(), pending.params.clone());
        let opened = pending
            .connection
            .open_out_stream(&pending.device, &pending.params, dispatch);
        let device_id = pending.device.id().to_string();
        let params = pending.params.clone();
        self.core.finish_open(pending, opened)?;
        info!(
            device = %device_id,
            format = %params.format,
            sample_rate = params.sample_rate,
            channels = params.channel_count(),
            latency = self.core.software_latency().unwrap_or(params.software_latency),
            "output stream opened"
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.core.start()
    }

    /// Pausing an already paused stream, or resuming a running one, is a
    /// no-op
    pub fn pause(&mut self, pause: bool) -> Result<()> {
        self.core.pause(pause)
    }

    pub fn destroy(&mut self) {
        self.core.destroy();
    }

    /// Discard queued frames that have not been played yet
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.core.with_driver(|driver| driver.clear_buffer())
    }

    /// Seconds until a frame written now is heard
    pub fn latency(&self) -> Result<f64> {
        self.core.with_driver(|driver| driver.latency())
    }

    /// Volume in `0.0..=1.0`
    pub fn set_volume(&mut self, volume: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(SoundIoError::Invalid);
        }
        self.core.with_driver(|driver| driver.set_volume(volume))?;
        self.volume = volume;
        Ok(())
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn state(&self) -> StreamState {
        self.core.state()
    }

    /// `None` once destroyed
    pub fn device(&self) -> Option<&Device> {
        self.core.device()
    }

    pub fn params(&self) -> Option<&StreamParams> {
        self.core.params()
    }

    pub fn format(&self) -> Option<Format> {
        self.core.format()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.core.sample_rate()
    }

    pub fn layout(&self) -> Option<&ChannelLayout> {
        self.core.layout()
    }

    pub fn software_latency(&self) -> Option<f64> {
        self.core.software_latency()
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn non_terminal_hint(&self) -> bool {
        self.core.non_terminal_hint()
    }

    /// 0 before `open`
    pub fn bytes_per_frame(&self) -> usize {
        self.core.bytes_per_frame()
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.core.bytes_per_sample()
    }

    /// Set at `open` when the device could not take the requested layout
    pub fn layout_error(&self) -> Option<&SoundIoError> {
        self.core.layout_error()
    }
}

impl Drop for OutStream {
    fn drop(&mut self) {
        self.core.destroy();
    }
}
