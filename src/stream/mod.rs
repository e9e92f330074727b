mod in_stream;
mod out_stream;
mod state;

pub use in_stream::{InStream, InStreamDispatch, InStreamReader};
pub use out_stream::{OutStream, OutStreamDispatch, OutStreamWriter};
pub use state::StreamState;

use crate::backend::StreamDriver;
use crate::channel::MAX_CHANNELS;
use crate::context::Connection;
use crate::device::{Device, DeviceAim};
use crate::error::{Result, SoundIoError};
use crate::format::Format;
use crate::layout::ChannelLayout;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

/// Sample rate picked when the application leaves it unset
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Parameters a stream was opened with, fixed for its lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub format: Format,
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    /// Requested buffer duration in seconds, clamped to the device range
    pub software_latency: f64,
    pub name: String,
    /// Hint that the stream feeds another processing stage rather than a
    /// speaker or file; JACK uses it
    pub non_terminal_hint: bool,
}

impl StreamParams {
    pub fn channel_count(&self) -> usize {
        self.layout.channel_count()
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.format.bytes_per_sample()
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_frame(self.channel_count())
    }

    pub fn bytes_per_second(&self) -> usize {
        self.format.bytes_per_second(self.channel_count(), self.sample_rate)
    }
}

/// What the application asked for before `open`
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamConfig {
    pub format: Option<Format>,
    pub sample_rate: Option<u32>,
    pub layout: Option<ChannelLayout>,
    pub software_latency: Option<f64>,
    pub name: Option<String>,
    pub non_terminal_hint: bool,
}

impl StreamConfig {
    /// Fill in defaults from the device and check everything against its
    /// capabilities. An unsupported layout is not fatal; it comes back as
    /// the second element.
    pub fn resolve(
        &self,
        device: &Device,
        aim: DeviceAim,
        default_name: &str,
    ) -> Result<(StreamParams, Option<SoundIoError>)> {
        if device.aim() != aim {
            return Err(SoundIoError::Invalid);
        }
        if let Some(err) = device.probe_error() {
            return Err(err.clone());
        }

        let format = match self.format {
            Some(Format::Invalid) => return Err(SoundIoError::Invalid),
            Some(format) => format,
            None if device.supports_format(Format::FLOAT32NE) => Format::FLOAT32NE,
            None => *device
                .formats()
                .first()
                .ok_or(SoundIoError::IncompatibleDevice)?,
        };
        if !device.supports_format(format) {
            return Err(SoundIoError::IncompatibleDevice);
        }

        let layout = match &self.layout {
            Some(layout) => layout.clone(),
            None => device.current_layout().clone(),
        };
        if layout.channel_count() == 0 || layout.channel_count() > MAX_CHANNELS {
            return Err(SoundIoError::Invalid);
        }
        let layout_error = if device.supports_layout(&layout) {
            None
        } else {
            Some(SoundIoError::IncompatibleDevice)
        };

        let sample_rate = match self.sample_rate {
            Some(0) => return Err(SoundIoError::Invalid),
            Some(rate) => rate,
            None => device
                .nearest_sample_rate(DEFAULT_SAMPLE_RATE)
                .ok_or(SoundIoError::IncompatibleDevice)?,
        };
        if !device.supports_sample_rate(sample_rate) {
            return Err(SoundIoError::IncompatibleDevice);
        }

        let requested = match self.software_latency {
            Some(latency) if latency.is_nan() || latency < 0.0 => {
                return Err(SoundIoError::Invalid)
            }
            Some(latency) if latency > 0.0 => latency,
            _ if device.software_latency_current() > 0.0 => device.software_latency_current(),
            _ => 1.0,
        };
        let software_latency = if device.software_latency_max() > 0.0 {
            requested
                .max(device.software_latency_min())
                .min(device.software_latency_max())
        } else {
            requested
        };

        let params = StreamParams {
            format,
            sample_rate,
            layout,
            software_latency,
            name: self.name.clone().unwrap_or_else(|| default_name.to_string()),
            non_terminal_hint: self.non_terminal_hint,
        };
        Ok((params, layout_error))
    }
}

pub(crate) fn lock_tolerant<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Something the connection can tear down when the context goes away
pub(crate) trait StreamHandle: Send + Sync {
    fn shutdown(&self);
}

/// Shared home of a stream's backend driver. The stream and the connection
/// both reach it; whoever shuts it down first takes the driver.
pub(crate) struct DriverSlot<D: ?Sized> {
    driver: Mutex<Option<Box<D>>>,
}

impl<D: ?Sized> DriverSlot<D> {
    fn new(driver: Box<D>) -> Self {
        Self {
            driver: Mutex::new(Some(driver)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<D>>> {
        lock_tolerant(&self.driver)
    }
}

impl<D: ?Sized + StreamDriver> StreamHandle for DriverSlot<D> {
    fn shutdown(&self) {
        // Release the lock before destroying; destroy may join a thread.
        let driver = self.lock().take();
        if let Some(mut driver) = driver {
            driver.destroy();
        }
    }
}

/// Everything `open` needs once validation passed
pub(crate) struct PendingOpen {
    pub connection: Arc<Connection>,
    pub device: Device,
    pub params: Arc<StreamParams>,
    pub layout_error: Option<SoundIoError>,
}

/// State machine and driver bookkeeping shared by both stream directions
pub(crate) struct StreamCore<D: ?Sized> {
    aim: DeviceAim,
    default_name: &'static str,
    device: Option<Device>,
    state: StreamState,
    config: StreamConfig,
    params: Option<Arc<StreamParams>>,
    software_latency: Option<f64>,
    layout_error: Option<SoundIoError>,
    slot: Option<Arc<DriverSlot<D>>>,
    registration: Option<(Weak<Connection>, u64)>,
}

impl<D: ?Sized + StreamDriver + 'static> StreamCore<D> {
    pub fn new(device: Device, aim: DeviceAim, default_name: &'static str) -> Self {
        Self {
            aim,
            default_name,
            device: Some(device),
            state: StreamState::Created,
            config: StreamConfig::default(),
            params: None,
            software_latency: None,
            layout_error: None,
            slot: None,
            registration: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, target: StreamState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "illegal stream transition {:?} -> {:?}",
            self.state,
            target
        );
        self.state = target;
    }

    /// Configuration is only writable before `open`
    pub fn config_mut(&mut self) -> Result<&mut StreamConfig> {
        if self.state != StreamState::Created {
            return Err(SoundIoError::Invalid);
        }
        Ok(&mut self.config)
    }

    pub fn prepare_open(&mut self) -> Result<PendingOpen> {
        if self.state != StreamState::Created {
            return Err(SoundIoError::Invalid);
        }
        let pending = self.resolve();
        if pending.is_err() {
            self.transition(StreamState::Failed);
        }
        pending
    }

    fn resolve(&self) -> Result<PendingOpen> {
        let device = self.device.clone().ok_or(SoundIoError::Invalid)?;
        let (params, layout_error) = self.config.resolve(&device, self.aim, self.default_name)?;
        let connection = device.connection()?;
        Ok(PendingOpen {
            connection,
            device,
            params: Arc::new(params),
            layout_error,
        })
    }

    pub fn finish_open(&mut self, pending: PendingOpen, opened: Result<Box<D>>) -> Result<()> {
        let driver = match opened {
            Ok(driver) => driver,
            Err(e) => {
                self.transition(StreamState::Failed);
                return Err(e);
            }
        };
        self.software_latency = Some(driver.software_latency());
        let slot = Arc::new(DriverSlot::new(driver));
        let handle: Arc<dyn StreamHandle> = slot.clone();
        let token = pending.connection.register_stream(Arc::downgrade(&handle));
        self.registration = Some((Arc::downgrade(&pending.connection), token));
        self.slot = Some(slot);
        self.params = Some(pending.params);
        self.layout_error = pending.layout_error;
        self.transition(StreamState::Opened);
        Ok(())
    }

    /// Run `f` against the driver of an opened stream
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> Result<R>) -> Result<R> {
        if !self.state.is_open() {
            return Err(SoundIoError::Invalid);
        }
        let slot = self.slot.as_ref().ok_or(SoundIoError::Invalid)?;
        let mut guard = slot.lock();
        // Empty once the connection tore the stream down
        let driver = guard.as_mut().ok_or(SoundIoError::BackendDisconnected)?;
        f(&mut **driver)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != StreamState::Opened {
            return Err(SoundIoError::Invalid);
        }
        self.with_driver(|driver| driver.start())?;
        self.transition(StreamState::Started);
        Ok(())
    }

    pub fn pause(&mut self, pause: bool) -> Result<()> {
        let target = match (self.state, pause) {
            (StreamState::Started, true) => StreamState::Paused,
            (StreamState::Paused, false) => StreamState::Started,
            (StreamState::Started, false) | (StreamState::Paused, true) => return Ok(()),
            _ => return Err(SoundIoError::Invalid),
        };
        self.with_driver(|driver| driver.pause(pause))?;
        self.transition(target);
        Ok(())
    }

    /// Idempotent. Releases the driver, the registration and the device
    /// reference.
    pub fn destroy(&mut self) {
        if self.state == StreamState::Destroyed {
            return;
        }
        if let Some(slot) = self.slot.take() {
            slot.shutdown();
        }
        if let Some((connection, token)) = self.registration.take() {
            if let Some(connection) = connection.upgrade() {
                connection.unregister_stream(token);
            }
        }
        if let Some(device) = self.device.take() {
            debug!(device = device.id(), state = ?self.state, "stream destroyed");
        }
        self.transition(StreamState::Destroyed);
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn params(&self) -> Option<&StreamParams> {
        self.params.as_deref()
    }

    pub fn format(&self) -> Option<Format> {
        self.params().map(|p| p.format).or(self.config.format)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.params().map(|p| p.sample_rate).or(self.config.sample_rate)
    }

    pub fn layout(&self) -> Option<&ChannelLayout> {
        self.params()
            .map(|p| &p.layout)
            .or(self.config.layout.as_ref())
    }

    /// Actual value once open, the request before
    pub fn software_latency(&self) -> Option<f64> {
        self.software_latency.or(self.config.software_latency)
    }

    pub fn name(&self) -> &str {
        match self.params() {
            Some(params) => &params.name,
            None => self.config.name.as_deref().unwrap_or(self.default_name),
        }
    }

    pub fn non_terminal_hint(&self) -> bool {
        self.config.non_terminal_hint
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.params().map_or(0, |p| p.bytes_per_frame())
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.params().map_or(0, |p| p.bytes_per_sample())
    }

    pub fn layout_error(&self) -> Option<&SoundIoError> {
        self.layout_error.as_ref()
    }
}
