#![allow(dead_code)]

use soundio::area::{ChannelAreas, ChannelAreasMut};
use soundio::backend::{
    Backend, BackendDriver, BackendSession, InputBuffer, OutStreamDriver, OutputBuffer,
    StreamDriver,
};
use soundio::stream::{InStreamDispatch, OutStreamDispatch};
use soundio::{
    ChannelLayout, ChannelLayoutId, Device, DeviceAim, DeviceInfo, DeviceList, EventSender,
    Format, Result, SampleRateRange, SoundIo, SoundIoError, StreamParams,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Observable side effects of the mock backend
#[derive(Default)]
pub struct MockState {
    pub scans: AtomicUsize,
    pub device_drops: AtomicUsize,
    pub streams_started: AtomicUsize,
    pub streams_destroyed: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail_open: AtomicBool,
    pub output_devices: Mutex<Vec<String>>,
    pub probe_error: Mutex<Option<SoundIoError>>,
    pub events: Mutex<Option<EventSender>>,
    pub out_dispatch: Mutex<Option<OutStreamDispatch>>,
    pub in_dispatch: Mutex<Option<InStreamDispatch>>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        *state.output_devices.lock().unwrap() = vec!["mock-out-0".to_string()];
        Arc::new(state)
    }

    pub fn events(&self) -> EventSender {
        self.events.lock().unwrap().clone().expect("not connected")
    }

    pub fn out_dispatch(&self) -> OutStreamDispatch {
        self.out_dispatch.lock().unwrap().clone().expect("no output stream opened")
    }

    pub fn in_dispatch(&self) -> InStreamDispatch {
        self.in_dispatch.lock().unwrap().clone().expect("no input stream opened")
    }
}

/// Backend resource attached to every mock device
pub struct DropGuard(Arc<MockState>);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.device_drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn mock_device_info(id: &str, aim: DeviceAim) -> DeviceInfo {
    let mut info = DeviceInfo::new(id, format!("Mock {}", id), aim);
    info.layouts = vec![
        ChannelLayout::from_id(ChannelLayoutId::Stereo),
        ChannelLayout::from_id(ChannelLayoutId::Mono),
    ];
    info.current_layout = ChannelLayout::from_id(ChannelLayoutId::Stereo);
    info.formats = vec![Format::S16NE, Format::FLOAT32NE];
    info.current_format = Format::FLOAT32NE;
    info.sample_rates = vec![SampleRateRange::new(44100, 48000)];
    info.sample_rate_current = 48000;
    info.software_latency_min = 0.005;
    info.software_latency_max = 1.0;
    info.software_latency_current = 0.02;
    info
}

pub struct MockDriver {
    backend: Backend,
    state: Arc<MockState>,
    cache: Option<Arc<Mutex<Option<DeviceList>>>>,
}

impl MockDriver {
    pub fn new(backend: Backend, state: Arc<MockState>) -> Self {
        Self {
            backend,
            state,
            cache: None,
        }
    }

    /// Driver whose sessions all hand out the devices of the first scan
    pub fn caching(backend: Backend, state: Arc<MockState>) -> Self {
        Self {
            backend,
            state,
            cache: Some(Arc::new(Mutex::new(None))),
        }
    }
}

impl BackendDriver for MockDriver {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn connect(&self, _app_name: &str, events: EventSender) -> Result<Box<dyn BackendSession>> {
        *self.state.events.lock().unwrap() = Some(events);
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            cache: self.cache.clone(),
        }))
    }
}

/// Driver whose connect always fails
pub struct FailingDriver(pub Backend, pub SoundIoError);

impl BackendDriver for FailingDriver {
    fn backend(&self) -> Backend {
        self.0
    }

    fn connect(&self, _app_name: &str, _events: EventSender) -> Result<Box<dyn BackendSession>> {
        Err(self.1.clone())
    }
}

struct MockSession {
    state: Arc<MockState>,
    cache: Option<Arc<Mutex<Option<DeviceList>>>>,
}

impl MockSession {
    fn device(&self, id: &str, aim: DeviceAim) -> Device {
        let mut info = mock_device_info(id, aim);
        info.probe_error = self.state.probe_error.lock().unwrap().clone();
        Device::with_backend_data(info, DropGuard(self.state.clone()))
    }
}

impl BackendSession for MockSession {
    fn scan(&mut self) -> Result<DeviceList> {
        self.state.scans.fetch_add(1, Ordering::SeqCst);
        if let Some(cache) = &self.cache {
            if let Some(list) = cache.lock().unwrap().as_ref() {
                return Ok(list.clone());
            }
        }
        let ids = self.state.output_devices.lock().unwrap().clone();
        let outputs: Vec<Device> = ids
            .iter()
            .map(|id| self.device(id, DeviceAim::Output))
            .collect();
        let list = DeviceList {
            default_output: if outputs.is_empty() { None } else { Some(0) },
            outputs,
            inputs: vec![self.device("mock-in-0", DeviceAim::Input)],
            default_input: Some(0),
        };
        if let Some(cache) = &self.cache {
            *cache.lock().unwrap() = Some(list.clone());
        }
        Ok(list)
    }

    fn force_device_scan(&mut self) {
        if let Some(events) = self.state.events.lock().unwrap().as_ref() {
            events.devices_changed();
        }
    }

    fn open_out_stream(
        &mut self,
        _device: &Device,
        params: &StreamParams,
        dispatch: OutStreamDispatch,
    ) -> Result<Box<dyn OutStreamDriver>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(SoundIoError::OpeningDevice);
        }
        *self.state.out_dispatch.lock().unwrap() = Some(dispatch);
        Ok(Box::new(MockStream::new(self.state.clone(), params)))
    }

    fn open_in_stream(
        &mut self,
        _device: &Device,
        params: &StreamParams,
        dispatch: InStreamDispatch,
    ) -> Result<Box<dyn StreamDriver>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(SoundIoError::OpeningDevice);
        }
        *self.state.in_dispatch.lock().unwrap() = Some(dispatch);
        Ok(Box::new(MockStream::new(self.state.clone(), params)))
    }

    fn disconnect(&mut self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stream driver that never runs a thread; tests drive callbacks through
/// the stored dispatch
struct MockStream {
    state: Arc<MockState>,
    software_latency: f64,
    destroyed: bool,
}

impl MockStream {
    fn new(state: Arc<MockState>, params: &StreamParams) -> Self {
        Self {
            state,
            software_latency: params.software_latency,
            destroyed: false,
        }
    }
}

impl StreamDriver for MockStream {
    fn start(&mut self) -> Result<()> {
        self.state.streams_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self, _pause: bool) -> Result<()> {
        Err(SoundIoError::IncompatibleBackend)
    }

    fn latency(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn software_latency(&self) -> f64 {
        self.software_latency
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.state.streams_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl OutStreamDriver for MockStream {
    fn clear_buffer(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_volume(&mut self, _volume: f64) -> Result<()> {
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Context that only knows the mock driver, registered as `backend`
pub fn mock_context(backend: Backend) -> (SoundIo, Arc<MockState>) {
    let state = MockState::new();
    let soundio = SoundIo::builder()
        .app_name("mock-test")
        .without_registered_drivers()
        .driver(Arc::new(MockDriver::new(backend, state.clone())))
        .build();
    (soundio, state)
}

/// Connected mock context with a refreshed device list
pub fn connected_mock() -> (SoundIo, Arc<MockState>) {
    let (soundio, state) = mock_context(Backend::Dummy);
    soundio.connect().unwrap();
    soundio.flush_events();
    (soundio, state)
}

/// In-memory playback buffer with room for `capacity` frames
pub struct VecOutputBuffer {
    pub data: Vec<u8>,
    pub format: Format,
    pub channel_count: usize,
    pub capacity: usize,
    pub committed: usize,
    granted: usize,
}

impl VecOutputBuffer {
    pub fn new(format: Format, channel_count: usize, capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity * format.bytes_per_frame(channel_count)],
            format,
            channel_count,
            capacity,
            committed: 0,
            granted: 0,
        }
    }
}

impl OutputBuffer for VecOutputBuffer {
    fn begin_write(&mut self, frame_count: usize) -> Result<ChannelAreasMut<'_>> {
        let bpf = self.format.bytes_per_frame(self.channel_count);
        let frames = frame_count.min(self.capacity - self.committed);
        self.granted = frames;
        let start = self.committed * bpf;
        ChannelAreasMut::interleaved(
            &mut self.data[start..start + frames * bpf],
            self.format,
            self.channel_count,
            frames,
        )
    }

    fn end_write(&mut self, frame_count: usize) -> Result<()> {
        if frame_count > self.granted {
            return Err(SoundIoError::Invalid);
        }
        self.committed += frame_count;
        self.granted = 0;
        Ok(())
    }
}

/// In-memory capture buffer holding `data`
pub struct VecInputBuffer {
    pub data: Vec<u8>,
    pub format: Format,
    pub channel_count: usize,
    pub consumed: usize,
    granted: usize,
}

impl VecInputBuffer {
    pub fn new(format: Format, channel_count: usize, data: Vec<u8>) -> Self {
        Self {
            data,
            format,
            channel_count,
            consumed: 0,
            granted: 0,
        }
    }

    fn frames(&self) -> usize {
        self.data.len() / self.format.bytes_per_frame(self.channel_count)
    }
}

impl InputBuffer for VecInputBuffer {
    fn begin_read(&mut self, frame_count: usize) -> Result<ChannelAreas<'_>> {
        let bpf = self.format.bytes_per_frame(self.channel_count);
        let frames = frame_count.min(self.frames() - self.consumed);
        self.granted = frames;
        let start = self.consumed * bpf;
        ChannelAreas::interleaved(
            &self.data[start..start + frames * bpf],
            self.format,
            self.channel_count,
            frames,
        )
    }

    fn end_read(&mut self, frame_count: usize) -> Result<()> {
        if frame_count > self.granted {
            return Err(SoundIoError::Invalid);
        }
        self.consumed += frame_count;
        self.granted = 0;
        Ok(())
    }
}
