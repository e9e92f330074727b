use crate::area::{ChannelAreas, ChannelAreasMut};
use crate::device::{Device, DeviceList};
use crate::error::Result;
use crate::events::EventSender;
use crate::stream::{InStreamDispatch, OutStreamDispatch, StreamParams};

use super::Backend;

/// Entry point of a backend: knows how to reach its sound server
pub trait BackendDriver: Send + Sync {
    fn backend(&self) -> Backend;

    /// Open a session with the server. `events` stays valid for the
    /// session's lifetime and may be used from any thread.
    fn connect(&self, app_name: &str, events: EventSender) -> Result<Box<dyn BackendSession>>;
}

/// A live connection to a sound server
pub trait BackendSession: Send {
    /// Enumerate devices. Called on the first flush and after every
    /// `devices_changed` notification.
    fn scan(&mut self) -> Result<DeviceList>;

    /// Ask the backend to rescan even without a change notification
    fn force_device_scan(&mut self) {}

    fn open_out_stream(
        &mut self,
        device: &Device,
        params: &StreamParams,
        dispatch: OutStreamDispatch,
    ) -> Result<Box<dyn OutStreamDriver>>;

    fn open_in_stream(
        &mut self,
        device: &Device,
        params: &StreamParams,
        dispatch: InStreamDispatch,
    ) -> Result<Box<dyn StreamDriver>>;

    /// Called once before the session is dropped, after all of its streams
    /// were destroyed
    fn disconnect(&mut self) {}
}

/// Backend half of an open stream
pub trait StreamDriver: Send {
    fn start(&mut self) -> Result<()>;

    /// Backends without pause support return `IncompatibleDevice` or
    /// `IncompatibleBackend`
    fn pause(&mut self, pause: bool) -> Result<()>;

    /// Seconds until a sample written now is heard, or since a sample read
    /// now was captured
    fn latency(&self) -> Result<f64>;

    /// Buffer duration actually in use, which may differ from the request
    fn software_latency(&self) -> f64;

    /// Release everything. Must be idempotent and must not block when
    /// called from the stream's own callback thread.
    fn destroy(&mut self);
}

pub trait OutStreamDriver: StreamDriver {
    fn clear_buffer(&mut self) -> Result<()>;

    fn set_volume(&mut self, volume: f64) -> Result<()>;
}

/// Playback memory offered to a write callback for one cycle.
///
/// `begin_write` may be called again without a matching `end_write`; the
/// previous grant is then abandoned.
pub trait OutputBuffer {
    /// Grant up to `frame_count` frames; the returned areas carry the
    /// granted count, which may be less and may be zero
    fn begin_write(&mut self, frame_count: usize) -> Result<ChannelAreasMut<'_>>;

    /// Commit the first `frame_count` frames of the last grant
    fn end_write(&mut self, frame_count: usize) -> Result<()>;
}

/// Captured memory offered to a read callback for one cycle
pub trait InputBuffer {
    fn begin_read(&mut self, frame_count: usize) -> Result<ChannelAreas<'_>>;

    /// Drop the first `frame_count` frames of the last grant
    fn end_read(&mut self, frame_count: usize) -> Result<()>;
}
