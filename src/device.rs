use crate::context::Connection;
use crate::error::{Result, SoundIoError};
use crate::format::Format;
use crate::layout::{sort_channel_layouts, ChannelLayout};
use crate::stream::{lock_tolerant, InStream, OutStream};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Whether a device captures or plays audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceAim {
    Input,
    Output,
}

/// Inclusive range of supported sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRateRange {
    pub min: u32,
    pub max: u32,
}

impl SampleRateRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn single(rate: u32) -> Self {
        Self::new(rate, rate)
    }

    pub fn contains(&self, rate: u32) -> bool {
        (self.min..=self.max).contains(&rate)
    }
}

/// Capabilities reported by a backend for one device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Opaque, backend-specific identifier; stable across rescans
    pub id: String,
    pub name: String,
    pub aim: DeviceAim,
    /// Raw devices bypass the sound server's mixing and conversion
    pub is_raw: bool,
    pub layouts: Vec<ChannelLayout>,
    pub current_layout: ChannelLayout,
    pub formats: Vec<Format>,
    pub current_format: Format,
    pub sample_rates: Vec<SampleRateRange>,
    /// 0 when unknown
    pub sample_rate_current: u32,
    /// Seconds; 0.0 when unknown
    pub software_latency_min: f64,
    pub software_latency_max: f64,
    pub software_latency_current: f64,
    /// Set when probing failed; the capability lists are then unreliable
    pub probe_error: Option<SoundIoError>,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, aim: DeviceAim) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aim,
            is_raw: false,
            layouts: Vec::new(),
            current_layout: ChannelLayout::default(),
            formats: Vec::new(),
            current_format: Format::Invalid,
            sample_rates: Vec::new(),
            sample_rate_current: 0,
            software_latency_min: 0.0,
            software_latency_max: 0.0,
            software_latency_current: 0.0,
            probe_error: None,
        }
    }
}

struct DeviceInner {
    info: DeviceInfo,
    backend_data: Option<Box<dyn Any + Send + Sync>>,
    /// Connection of the scan that last produced this device
    connection: Mutex<Option<Weak<Connection>>>,
}

/// Reference-counted handle to a device snapshot.
///
/// Cloning adds a reference and dropping releases one; `add_reference` and
/// `remove_reference` spell the same thing out. Backend resources attached
/// to the device are freed when the last reference goes away.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(info: DeviceInfo) -> Self {
        Self::build(info, None)
    }

    /// Attach backend-owned state that lives as long as the device does
    pub fn with_backend_data<T: Any + Send + Sync>(info: DeviceInfo, data: T) -> Self {
        Self::build(info, Some(Box::new(data)))
    }

    fn build(info: DeviceInfo, backend_data: Option<Box<dyn Any + Send + Sync>>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                info,
                backend_data,
                connection: Mutex::new(None),
            }),
        }
    }

    pub fn backend_data<T: Any>(&self) -> Option<&T> {
        self.inner.backend_data.as_ref()?.downcast_ref::<T>()
    }

    /// A backend may hand out the same device from every session, so a
    /// later scan re-points it at the newer connection.
    pub(crate) fn attach(&self, connection: &Arc<Connection>) {
        *lock_tolerant(&self.inner.connection) = Some(Arc::downgrade(connection));
    }

    pub(crate) fn connection(&self) -> Result<Arc<Connection>> {
        let weak = lock_tolerant(&self.inner.connection)
            .clone()
            .ok_or(SoundIoError::Invalid)?;
        match weak.upgrade() {
            Some(connection) if connection.is_alive() => Ok(connection),
            _ => Err(SoundIoError::BackendDisconnected),
        }
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn add_reference(&self) -> Device {
        self.clone()
    }

    pub fn remove_reference(self) {
        drop(self);
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    pub fn id(&self) -> &str {
        &self.inner.info.id
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn aim(&self) -> DeviceAim {
        self.inner.info.aim
    }

    pub fn is_raw(&self) -> bool {
        self.inner.info.is_raw
    }

    pub fn layouts(&self) -> &[ChannelLayout] {
        &self.inner.info.layouts
    }

    pub fn current_layout(&self) -> &ChannelLayout {
        &self.inner.info.current_layout
    }

    pub fn formats(&self) -> &[Format] {
        &self.inner.info.formats
    }

    pub fn current_format(&self) -> Format {
        self.inner.info.current_format
    }

    pub fn sample_rates(&self) -> &[SampleRateRange] {
        &self.inner.info.sample_rates
    }

    pub fn sample_rate_current(&self) -> u32 {
        self.inner.info.sample_rate_current
    }

    pub fn software_latency_min(&self) -> f64 {
        self.inner.info.software_latency_min
    }

    pub fn software_latency_max(&self) -> f64 {
        self.inner.info.software_latency_max
    }

    pub fn software_latency_current(&self) -> f64 {
        self.inner.info.software_latency_current
    }

    pub fn probe_error(&self) -> Option<&SoundIoError> {
        self.inner.info.probe_error.as_ref()
    }

    /// Same physical endpoint: id, rawness and aim all match
    pub fn equal(&self, other: &Device) -> bool {
        self.id() == other.id() && self.is_raw() == other.is_raw() && self.aim() == other.aim()
    }

    /// Layouts ordered from most to fewest channels
    pub fn sorted_layouts(&self) -> Vec<ChannelLayout> {
        let mut layouts = self.layouts().to_vec();
        sort_channel_layouts(&mut layouts);
        layouts
    }

    pub fn supports_format(&self, format: Format) -> bool {
        self.formats().contains(&format)
    }

    pub fn supports_layout(&self, layout: &ChannelLayout) -> bool {
        self.layouts().contains(layout)
    }

    pub fn supports_sample_rate(&self, sample_rate: u32) -> bool {
        self.sample_rates().iter().any(|r| r.contains(sample_rate))
    }

    /// Supported rate closest to `sample_rate`, preferring rates at or
    /// above it. `None` when the device lists no rates.
    pub fn nearest_sample_rate(&self, sample_rate: u32) -> Option<u32> {
        let mut best: Option<u32> = None;
        for range in self.sample_rates() {
            let candidate = sample_rate.clamp(range.min, range.max.max(range.min));
            if candidate == sample_rate {
                return Some(candidate);
            }
            let delta = candidate.abs_diff(sample_rate);
            let replace = match best {
                None => true,
                Some(current) => {
                    let current_too_small = current < sample_rate;
                    let candidate_too_small = candidate < sample_rate;
                    (current_too_small && !candidate_too_small)
                        || ((current_too_small || !candidate_too_small)
                            && delta < current.abs_diff(sample_rate))
                }
            };
            if replace {
                best = Some(candidate);
            }
        }
        best
    }

    pub fn create_out_stream(&self) -> OutStream {
        OutStream::new(self.clone())
    }

    pub fn create_in_stream(&self) -> InStream {
        InStream::new(self.clone())
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("aim", &self.aim())
            .field("is_raw", &self.is_raw())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// One scan's worth of devices
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub inputs: Vec<Device>,
    pub outputs: Vec<Device>,
    pub default_input: Option<usize>,
    pub default_output: Option<usize>,
}
