use super::{lock_tolerant, StreamCore, StreamParams, StreamState};
use crate::area::ChannelAreas;
use crate::backend::{InputBuffer, StreamDriver};
use crate::device::{Device, DeviceAim};
use crate::error::{Result, SoundIoError};
use crate::format::Format;
use crate::layout::ChannelLayout;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

type ReadCallback = Box<dyn FnMut(&mut InStreamReader<'_>, usize, usize) + Send>;
type OverflowCallback = Box<dyn FnMut() + Send>;
type ErrorCallback = Box<dyn FnMut(SoundIoError) + Send>;

#[derive(Default)]
struct InCallbacks {
    read: Option<ReadCallback>,
    overflow: Option<OverflowCallback>,
    error: Option<ErrorCallback>,
}

/// Backend-facing side of an input stream's callbacks
#[derive(Clone)]
pub struct InStreamDispatch {
    callbacks: Arc<Mutex<InCallbacks>>,
    params: Arc<StreamParams>,
}

impl InStreamDispatch {
    fn new(callbacks: Arc<Mutex<InCallbacks>>, params: Arc<StreamParams>) -> Self {
        Self { callbacks, params }
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// One read cycle. The application must read at least
    /// `frame_count_min` frames and may read up to `frame_count_max`.
    pub fn read(&self, buffer: &mut dyn InputBuffer, frame_count_min: usize, frame_count_max: usize) {
        let taken = lock_tolerant(&self.callbacks).read.take();
        let Some(mut callback) = taken else {
            return;
        };

        let mut reader = InStreamReader {
            buffer,
            params: &self.params,
            pending: None,
        };
        callback(&mut reader, frame_count_min, frame_count_max);
        if let Some(frames) = reader.pending {
            warn!(frames, "read callback returned without end_read; frames kept");
        }

        let mut callbacks = lock_tolerant(&self.callbacks);
        if callbacks.read.is_none() {
            callbacks.read = Some(callback);
        }
    }

    /// Captured frames were dropped because the buffer was full
    pub fn overflow(&self) {
        let taken = lock_tolerant(&self.callbacks).overflow.take();
        if let Some(mut callback) = taken {
            callback();
            let mut callbacks = lock_tolerant(&self.callbacks);
            if callbacks.overflow.is_none() {
                callbacks.overflow = Some(callback);
            }
        }
    }

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
            None => error!(stream = %self.params.name, error = %err, "input stream error"),
        }
    }
}

/// Buffer access inside a read callback
pub struct InStreamReader<'a> {
    buffer: &'a mut dyn InputBuffer,
    params: &'a StreamParams,
    pending: Option<usize>,
}

impl<'a> InStreamReader<'a> {
    /// Ask for `frame_count` captured frames.
    ///
    /// On return `frame_count` holds the number granted. Zero yields
    /// `Ok(None)` without a pending transaction.
    pub fn begin_read(&mut self, frame_count: &mut usize) -> Result<Option<ChannelAreas<'_>>> {
        if self.pending.is_some() {
            return Err(SoundIoError::Invalid);
        }
        if *frame_count == 0 {
            return Ok(None);
        }
        let areas = self.buffer.begin_read(*frame_count)?;
        *frame_count = areas.frame_count();
        if *frame_count == 0 {
            return Ok(None);
        }
        self.pending = Some(*frame_count);
        Ok(Some(areas))
    }

    /// Release the frames granted by the last `begin_read`
    pub fn end_read(&mut self) -> Result<()> {
        let frames = self.pending.take().ok_or(SoundIoError::Invalid)?;
        self.buffer.end_read(frames)
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

/// A capture stream on an input device
pub struct InStream {
    core: StreamCore<dyn StreamDriver>,
    callbacks: Arc<Mutex<InCallbacks>>,
}

impl InStream {
    pub(crate) fn new(device: Device) -> Self {
        Self {
            core: StreamCore::new(device, DeviceAim::Input, "SoundIoInStream"),
            callbacks: Arc::new(Mutex::new(InCallbacks::default())),
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

    pub fn set_read_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut InStreamReader<'_>, usize, usize) + Send + 'static,
    {
        lock_tolerant(&self.callbacks).read = Some(Box::new(callback));
    }

    pub fn set_overflow_callback<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        lock_tolerant(&self.callbacks).overflow = Some(Box::new(callback));
    }

    pub fn set_error_callback<F>(&mut self, callback: F)
    where
        F: FnMut(SoundIoError) + Send + 'static,
    {
        lock_tolerant(&self.callbacks).error = Some(Box::new(callback));
    }

    pub fn open(&mut self) -> Result<()> {
        let pending = self.core.prepare_open()?;
        let dispatch = InStreamDispatch::new(self.callbacks.clone(), pending.params.clone());
        let opened = pending
            .connection
            .open_in_stream(&pending.device, &pending.params, dispatch);
        let device_id = pending.device.id().to_string();
        let params = pending.params.clone();
        self.core.finish_open(pending, opened)?;
        info!(
            device = %device_id,
            format = %params.format,
            sample_rate = params.sample_rate,
            channels = params.channel_count(),
            "input stream opened"
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.core.start()
    }

    pub fn pause(&mut self, pause: bool) -> Result<()> {
        self.core.pause(pause)
    }

    pub fn destroy(&mut self) {
        self.core.destroy();
    }

    /// Seconds since the oldest unread frame was captured
    pub fn latency(&self) -> Result<f64> {
        self.core.with_driver(|driver| driver.latency())
    }

    pub fn state(&self) -> StreamState {
        self.core.state()
    }

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

    pub fn bytes_per_frame(&self) -> usize {
        self.core.bytes_per_frame()
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.core.bytes_per_sample()
    }

    pub fn layout_error(&self) -> Option<&SoundIoError> {
        self.core.layout_error()
    }
}

impl Drop for InStream {
    fn drop(&mut self) {
        self.core.destroy();
    }
}
