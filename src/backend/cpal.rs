//! Real sound servers reached through cpal.
//!
//! One driver is registered per host available on the target platform.
//! cpal streams are not `Send` everywhere, so each stream lives on a
//! dedicated thread that owns it and takes commands over a channel.

use super::{
    Backend, BackendDriver, BackendSession, DriverRegistration, InputBuffer, OutStreamDriver,
    OutputBuffer, StreamDriver,
};
use crate::area::{ChannelAreas, ChannelAreasMut};
use crate::channel::ChannelId;
use crate::device::{Device, DeviceAim, DeviceInfo, DeviceList, SampleRateRange};
use crate::error::{Result, SoundIoError};
use crate::events::EventSender;
use crate::format::Format;
use crate::layout::ChannelLayout;
use crate::stream::{InStreamDispatch, OutStreamDispatch, StreamParams};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{HostId, SampleFormat, SupportedBufferSize, SupportedStreamConfig, SupportedStreamConfigRange};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, warn};

fn host_id(backend: Backend) -> Option<HostId> {
    match backend {
        #[cfg(any(
            target_os = "linux",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "netbsd"
        ))]
        Backend::Alsa => Some(HostId::Alsa),
        #[cfg(target_os = "macos")]
        Backend::CoreAudio => Some(HostId::CoreAudio),
        #[cfg(target_os = "windows")]
        Backend::Wasapi => Some(HostId::Wasapi),
        _ => None,
    }
}

pub struct CpalDriver {
    backend: Backend,
}

impl CpalDriver {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

impl BackendDriver for CpalDriver {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn connect(&self, app_name: &str, events: EventSender) -> Result<Box<dyn BackendSession>> {
        let host = host_id(self.backend).ok_or(SoundIoError::BackendUnavailable)?;
        cpal::host_from_id(host).map_err(|e| {
            debug!(backend = %self.backend, error = %e, "host unavailable");
            SoundIoError::InitAudioBackend
        })?;
        info!(backend = %self.backend, app = app_name, "cpal host opened");
        Ok(Box::new(CpalSession { host, events }))
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "netbsd"
))]
fn create_alsa_driver() -> Arc<dyn BackendDriver> {
    Arc::new(CpalDriver::new(Backend::Alsa))
}

#[cfg(any(
    target_os = "linux",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "netbsd"
))]
inventory::submit! {
    DriverRegistration {
        backend: Backend::Alsa,
        create: create_alsa_driver,
    }
}

#[cfg(target_os = "macos")]
fn create_coreaudio_driver() -> Arc<dyn BackendDriver> {
    Arc::new(CpalDriver::new(Backend::CoreAudio))
}

#[cfg(target_os = "macos")]
inventory::submit! {
    DriverRegistration {
        backend: Backend::CoreAudio,
        create: create_coreaudio_driver,
    }
}

#[cfg(target_os = "windows")]
fn create_wasapi_driver() -> Arc<dyn BackendDriver> {
    Arc::new(CpalDriver::new(Backend::Wasapi))
}

#[cfg(target_os = "windows")]
inventory::submit! {
    DriverRegistration {
        backend: Backend::Wasapi,
        create: create_wasapi_driver,
    }
}

fn from_cpal_format(format: SampleFormat) -> Option<Format> {
    match format {
        SampleFormat::I8 => Some(Format::S8),
        SampleFormat::U8 => Some(Format::U8),
        SampleFormat::I16 => Some(Format::S16NE),
        SampleFormat::U16 => Some(Format::U16NE),
        SampleFormat::I32 => Some(Format::S32NE),
        SampleFormat::U32 => Some(Format::U32NE),
        SampleFormat::F32 => Some(Format::FLOAT32NE),
        SampleFormat::F64 => Some(Format::FLOAT64NE),
        _ => None,
    }
}

fn to_cpal_format(format: Format) -> Option<SampleFormat> {
    [
        SampleFormat::I8,
        SampleFormat::U8,
        SampleFormat::I16,
        SampleFormat::U16,
        SampleFormat::I32,
        SampleFormat::U32,
        SampleFormat::F32,
        SampleFormat::F64,
    ]
    .into_iter()
    .find(|f| from_cpal_format(*f) == Some(format))
}

/// cpal only reports channel counts; counts without a conventional layout
/// get auxiliary channels
fn layout_for_count(channel_count: usize) -> ChannelLayout {
    ChannelLayout::default_for(channel_count).unwrap_or_else(|| {
        let channels: Vec<ChannelId> = (0..channel_count).filter_map(ChannelId::aux).collect();
        ChannelLayout::from_channels(&channels)
    })
}

/// Enough to find the cpal device again on the stream thread
#[derive(Debug, Clone)]
struct DeviceHandle {
    host: HostId,
    name: String,
    aim: DeviceAim,
}

impl DeviceHandle {
    fn find(&self) -> Result<cpal::Device> {
        let host = cpal::host_from_id(self.host).map_err(|_| SoundIoError::BackendDisconnected)?;
        let matches = |d: &cpal::Device| d.name().map_or(false, |n| n == self.name);
        let found = match self.aim {
            DeviceAim::Output => host
                .output_devices()
                .map_err(|_| SoundIoError::OpeningDevice)?
                .find(matches),
            DeviceAim::Input => host
                .input_devices()
                .map_err(|_| SoundIoError::OpeningDevice)?
                .find(matches),
        };
        found.ok_or(SoundIoError::NoSuchDevice)
    }
}

struct CpalSession {
    host: HostId,
    events: EventSender,
}

impl CpalSession {
    fn probe(&self, device: &cpal::Device, name: String, aim: DeviceAim) -> Device {
        let prefix = match aim {
            DeviceAim::Output => "out",
            DeviceAim::Input => "in",
        };
        let mut info = DeviceInfo::new(format!("{}:{}", prefix, name), name.clone(), aim);
        let (ranges, default) = match aim {
            DeviceAim::Output => (
                device.supported_output_configs().map(|c| c.collect::<Vec<_>>()),
                device.default_output_config().ok(),
            ),
            DeviceAim::Input => (
                device.supported_input_configs().map(|c| c.collect::<Vec<_>>()),
                device.default_input_config().ok(),
            ),
        };
        match ranges {
            Ok(ranges) => fill_capabilities(&mut info, &ranges, default),
            Err(e) => {
                warn!(device = %name, error = %e, "failed to probe device");
                info.probe_error = Some(SoundIoError::OpeningDevice);
            }
        }
        let handle = DeviceHandle {
            host: self.host,
            name,
            aim,
        };
        Device::with_backend_data(info, handle)
    }
}

fn fill_capabilities(
    info: &mut DeviceInfo,
    ranges: &[SupportedStreamConfigRange],
    default: Option<SupportedStreamConfig>,
) {
    let mut counts: Vec<usize> = Vec::new();
    let mut min_frames = u32::MAX;
    let mut max_frames = 0;
    for range in ranges {
        if let Some(format) = from_cpal_format(range.sample_format()) {
            if !info.formats.contains(&format) {
                info.formats.push(format);
            }
        }
        let channels = range.channels() as usize;
        if !counts.contains(&channels) {
            counts.push(channels);
        }
        let rates = SampleRateRange::new(range.min_sample_rate().0, range.max_sample_rate().0);
        if !info.sample_rates.contains(&rates) {
            info.sample_rates.push(rates);
        }
        if let SupportedBufferSize::Range { min, max } = range.buffer_size() {
            min_frames = min_frames.min(*min);
            max_frames = max_frames.max(*max);
        }
    }
    if info.formats.is_empty() || counts.is_empty() {
        info.probe_error = Some(SoundIoError::IncompatibleDevice);
        return;
    }
    info.layouts = counts.iter().map(|&n| layout_for_count(n)).collect();

    match default {
        Some(default) => {
            info.current_format =
                from_cpal_format(default.sample_format()).unwrap_or(info.formats[0]);
            info.current_layout = layout_for_count(default.channels() as usize);
            info.sample_rate_current = default.sample_rate().0;
        }
        None => {
            info.current_format = info.formats[0];
            info.current_layout = info.layouts[0].clone();
            info.sample_rate_current = info.sample_rates[0].max;
        }
    }

    if max_frames > 0 && info.sample_rate_current > 0 {
        let rate = info.sample_rate_current as f64;
        info.software_latency_min = min_frames as f64 / rate;
        info.software_latency_max = max_frames as f64 / rate;
    }
}

impl BackendSession for CpalSession {
    fn scan(&mut self) -> Result<DeviceList> {
        let host = cpal::host_from_id(self.host).map_err(|_| SoundIoError::BackendDisconnected)?;
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let mut list = DeviceList::default();
        let inputs = host
            .input_devices()
            .map_err(|_| SoundIoError::SystemResources)?;
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            if default_input.as_deref() == Some(name.as_str()) {
                list.default_input = Some(list.inputs.len());
            }
            list.inputs.push(self.probe(&device, name, DeviceAim::Input));
        }

        let outputs = host
            .output_devices()
            .map_err(|_| SoundIoError::SystemResources)?;
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            if default_output.as_deref() == Some(name.as_str()) {
                list.default_output = Some(list.outputs.len());
            }
            list.outputs.push(self.probe(&device, name, DeviceAim::Output));
        }
        Ok(list)
    }

    fn force_device_scan(&mut self) {
        // No hotplug notifications from cpal; a rescan is the only way
        self.events.devices_changed();
    }

    fn open_out_stream(
        &mut self,
        device: &Device,
        params: &StreamParams,
        dispatch: OutStreamDispatch,
    ) -> Result<Box<dyn OutStreamDriver>> {
        let handle = device
            .backend_data::<DeviceHandle>()
            .cloned()
            .ok_or(SoundIoError::NoSuchDevice)?;
        let events = self.events.clone();
        let stream = CpalStream::open(
            "soundio-cpal-out",
            params,
            move |config, latency| build_output(&handle, config, dispatch, events, latency),
        )?;
        Ok(Box::new(stream))
    }

    fn open_in_stream(
        &mut self,
        device: &Device,
        params: &StreamParams,
        dispatch: InStreamDispatch,
    ) -> Result<Box<dyn StreamDriver>> {
        let handle = device
            .backend_data::<DeviceHandle>()
            .cloned()
            .ok_or(SoundIoError::NoSuchDevice)?;
        let events = self.events.clone();
        let stream = CpalStream::open(
            "soundio-cpal-in",
            params,
            move |config, latency| build_input(&handle, config, dispatch, events, latency),
        )?;
        Ok(Box::new(stream))
    }
}

/// What the stream thread needs to build a cpal stream
struct StreamSetup {
    config: cpal::StreamConfig,
    sample_format: SampleFormat,
    format: Format,
    channel_count: usize,
    sample_rate: u32,
}

impl StreamSetup {
    fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_frame(self.channel_count)
    }
}

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside a cpal callback while alive.
/// Tearing a stream down from there must not wait for the owner thread,
/// which in turn waits for the callback to return.
struct CallbackScope {
    outer: bool,
}

impl CallbackScope {
    fn enter() -> Self {
        Self {
            outer: IN_CALLBACK.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        IN_CALLBACK.with(|flag| flag.set(self.outer));
    }
}

fn in_callback() -> bool {
    IN_CALLBACK.with(Cell::get)
}

fn stream_error_handler(
    events: EventSender,
    on_error: impl Fn(SoundIoError) + Send + 'static,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        let _scope = CallbackScope::enter();
        warn!(error = %err, "cpal stream error");
        if let cpal::StreamError::DeviceNotAvailable = err {
            events.devices_changed();
        }
        on_error(SoundIoError::Streaming);
    }
}

struct CpalOutputBuffer<'a> {
    data: &'a mut [u8],
    format: Format,
    channel_count: usize,
    written: usize,
    granted: usize,
}

impl CpalOutputBuffer<'_> {
    fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_frame(self.channel_count)
    }

    fn total_frames(&self) -> usize {
        self.data.len() / self.bytes_per_frame()
    }
}

impl OutputBuffer for CpalOutputBuffer<'_> {
    fn begin_write(&mut self, frame_count: usize) -> Result<ChannelAreasMut<'_>> {
        let bpf = self.bytes_per_frame();
        let frames = frame_count.min(self.total_frames() - self.written);
        self.granted = frames;
        let start = self.written * bpf;
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
        self.written += frame_count;
        self.granted = 0;
        Ok(())
    }
}

fn build_output(
    handle: &DeviceHandle,
    setup: &StreamSetup,
    dispatch: OutStreamDispatch,
    events: EventSender,
    latency: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let device = handle.find()?;
    let format = setup.format;
    let channel_count = setup.channel_count;
    let error_dispatch = dispatch.clone();

    device
        .build_output_stream_raw(
            &setup.config,
            setup.sample_format,
            move |data: &mut cpal::Data, info: &cpal::OutputCallbackInfo| {
                let _scope = CallbackScope::enter();
                let stamp = info.timestamp();
                if let Some(ahead) = stamp.playback.duration_since(&stamp.callback) {
                    latency.store(ahead.as_secs_f64().to_bits(), Ordering::Relaxed);
                }

                let mut buffer = CpalOutputBuffer {
                    data: data.bytes_mut(),
                    format,
                    channel_count,
                    written: 0,
                    granted: 0,
                };
                let total = buffer.total_frames();
                dispatch.write(&mut buffer, total, total);

                let missing = total - buffer.written;
                if missing > 0 {
                    let bpf = buffer.bytes_per_frame();
                    let start = buffer.written * bpf;
                    if let Ok(mut rest) = ChannelAreasMut::interleaved(
                        &mut buffer.data[start..],
                        format,
                        channel_count,
                        missing,
                    ) {
                        rest.fill_silence();
                    }
                    dispatch.underflow();
                }
            },
            stream_error_handler(events, move |e| error_dispatch.error(e)),
            None,
        )
        .map_err(|e| {
            warn!(device = %handle.name, error = %e, "failed to build output stream");
            SoundIoError::OpeningDevice
        })
}

struct CpalInputBuffer<'a> {
    data: &'a [u8],
    format: Format,
    channel_count: usize,
    read: usize,
    granted: usize,
}

impl CpalInputBuffer<'_> {
    fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_frame(self.channel_count)
    }

    fn total_frames(&self) -> usize {
        self.data.len() / self.bytes_per_frame()
    }
}

impl InputBuffer for CpalInputBuffer<'_> {
    fn begin_read(&mut self, frame_count: usize) -> Result<ChannelAreas<'_>> {
        let bpf = self.bytes_per_frame();
        let frames = frame_count.min(self.total_frames() - self.read);
        self.granted = frames;
        let start = self.read * bpf;
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
        self.read += frame_count;
        self.granted = 0;
        Ok(())
    }
}

fn build_input(
    handle: &DeviceHandle,
    setup: &StreamSetup,
    dispatch: InStreamDispatch,
    events: EventSender,
    latency: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let device = handle.find()?;
    let format = setup.format;
    let channel_count = setup.channel_count;
    let error_dispatch = dispatch.clone();

    device
        .build_input_stream_raw(
            &setup.config,
            setup.sample_format,
            move |data: &cpal::Data, info: &cpal::InputCallbackInfo| {
                let _scope = CallbackScope::enter();
                let stamp = info.timestamp();
                if let Some(behind) = stamp.callback.duration_since(&stamp.capture) {
                    latency.store(behind.as_secs_f64().to_bits(), Ordering::Relaxed);
                }

                let mut buffer = CpalInputBuffer {
                    data: data.bytes(),
                    format,
                    channel_count,
                    read: 0,
                    granted: 0,
                };
                let total = buffer.total_frames();
                dispatch.read(&mut buffer, total, total);
                // Unread frames are gone once the callback returns
                if buffer.read < total {
                    dispatch.overflow();
                }
            },
            stream_error_handler(events, move |e| error_dispatch.error(e)),
            None,
        )
        .map_err(|e| {
            warn!(device = %handle.name, error = %e, "failed to build input stream");
            SoundIoError::OpeningDevice
        })
}

enum Command {
    Play(Sender<Result<()>>),
    Pause(bool, Sender<Result<()>>),
    Stop,
}

/// Owner of one cpal stream, which never leaves its thread
struct CpalStream {
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
    thread: ThreadId,
    latency: Arc<AtomicU64>,
    software_latency: f64,
}

impl CpalStream {
    fn open<B>(name: &str, params: &StreamParams, build: B) -> Result<Self>
    where
        B: FnOnce(&StreamSetup, Arc<AtomicU64>) -> Result<cpal::Stream> + Send + 'static,
    {
        let sample_format = to_cpal_format(params.format).ok_or(SoundIoError::IncompatibleDevice)?;
        let channel_count = params.channel_count();
        let frames = (params.software_latency * params.sample_rate as f64).round() as u32;
        let buffer_size = if frames > 0 {
            cpal::BufferSize::Fixed(frames)
        } else {
            cpal::BufferSize::Default
        };
        let setup = StreamSetup {
            config: cpal::StreamConfig {
                channels: channel_count as u16,
                sample_rate: cpal::SampleRate(params.sample_rate),
                buffer_size,
            },
            sample_format,
            format: params.format,
            channel_count,
            sample_rate: params.sample_rate,
        };
        debug!(
            bytes_per_frame = setup.bytes_per_frame(),
            frames, "building cpal stream"
        );
        let software_latency = frames as f64 / setup.sample_rate as f64;

        let latency = Arc::new(AtomicU64::new(0f64.to_bits()));
        let (commands, rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let thread_latency = latency.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build(&setup, thread_latency) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_commands(&stream, rx);
            })
            .map_err(|_| SoundIoError::SystemResources)?;

        let thread = handle.thread().id();
        ready_rx
            .recv()
            .map_err(|_| SoundIoError::OpeningDevice)??;
        Ok(Self {
            commands,
            handle: Some(handle),
            thread,
            latency,
            software_latency,
        })
    }

    fn request(&self, command: impl FnOnce(Sender<Result<()>>) -> Command) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.commands
            .send(command(tx))
            .map_err(|_| SoundIoError::Streaming)?;
        rx.recv().map_err(|_| SoundIoError::Streaming)?
    }
}

fn run_commands(stream: &cpal::Stream, commands: Receiver<Command>) {
    for command in commands {
        match command {
            Command::Play(reply) | Command::Pause(false, reply) => {
                let _ = reply.send(stream.play().map_err(|e| {
                    warn!(error = %e, "failed to start cpal stream");
                    SoundIoError::Streaming
                }));
            }
            Command::Pause(true, reply) => {
                let _ = reply.send(stream.pause().map_err(|e| {
                    debug!(error = %e, "cpal stream cannot pause");
                    SoundIoError::IncompatibleDevice
                }));
            }
            Command::Stop => break,
        }
    }
}

impl StreamDriver for CpalStream {
    fn start(&mut self) -> Result<()> {
        self.request(Command::Play)
    }

    fn pause(&mut self, pause: bool) -> Result<()> {
        self.request(|reply| Command::Pause(pause, reply))
    }

    fn latency(&self) -> Result<f64> {
        Ok(f64::from_bits(self.latency.load(Ordering::Relaxed)))
    }

    fn software_latency(&self) -> f64 {
        self.software_latency
    }

    fn destroy(&mut self) {
        let _ = self.commands.send(Command::Stop);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Detach instead of joining from the owner or a callback thread
        if thread::current().id() == self.thread || in_callback() {
            return;
        }
        if handle.join().is_err() {
            warn!("cpal stream thread panicked");
        }
    }
}

impl OutStreamDriver for CpalStream {
    fn clear_buffer(&mut self) -> Result<()> {
        Err(SoundIoError::IncompatibleBackend)
    }

    fn set_volume(&mut self, _volume: f64) -> Result<()> {
        Err(SoundIoError::IncompatibleBackend)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.destroy();
    }
}
