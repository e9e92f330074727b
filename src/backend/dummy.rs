//! Backend with no sound server behind it.
//!
//! Exposes one output and one input device. Streams run on their own
//! thread and are paced by the wall clock: playback drains the buffer at the
//! sample rate, capture fills it with a sine tone.

use super::{
    Backend, BackendDriver, BackendSession, DriverRegistration, InputBuffer, OutStreamDriver,
    OutputBuffer, StreamDriver,
};
use crate::area::{ChannelAreas, ChannelAreasMut};
use crate::convert::encode_sample;
use crate::device::{Device, DeviceAim, DeviceInfo, DeviceList, SampleRateRange};
use crate::error::{Result, SoundIoError};
use crate::events::EventSender;
use crate::format::Format;
use crate::layout::{ChannelLayout, ChannelLayoutId};
use crate::ring_buffer::{Consumer, Producer, RingBuffer};
use crate::stream::{InStreamDispatch, OutStreamDispatch, StreamParams};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub const OUTPUT_DEVICE_ID: &str = "dummy-out";
pub const INPUT_DEVICE_ID: &str = "dummy-in";

const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 5_644_800;
const TONE_FREQUENCY: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.5;

pub struct DummyDriver;

impl BackendDriver for DummyDriver {
    fn backend(&self) -> Backend {
        Backend::Dummy
    }

    fn connect(&self, app_name: &str, events: EventSender) -> Result<Box<dyn BackendSession>> {
        debug!(app = app_name, "dummy backend session opened");
        Ok(Box::new(DummySession::new(events)))
    }
}

fn create_dummy_driver() -> Arc<dyn BackendDriver> {
    Arc::new(DummyDriver)
}

inventory::submit! {
    DriverRegistration {
        backend: Backend::Dummy,
        create: create_dummy_driver,
    }
}

fn dummy_device(id: &str, name: &str, aim: DeviceAim) -> Device {
    let mut info = DeviceInfo::new(id, name, aim);
    info.layouts = ChannelLayout::builtins().collect();
    info.current_layout = ChannelLayout::from_id(ChannelLayoutId::Stereo);
    info.formats = Format::all().collect();
    info.current_format = Format::FLOAT32NE;
    info.sample_rates = vec![SampleRateRange::new(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE)];
    info.sample_rate_current = 48000;
    info.software_latency_min = 0.01;
    info.software_latency_max = 4.0;
    info.software_latency_current = 0.1;
    Device::new(info)
}

struct DummySession {
    events: EventSender,
    output: Device,
    input: Device,
}

impl DummySession {
    fn new(events: EventSender) -> Self {
        Self {
            events,
            output: dummy_device(OUTPUT_DEVICE_ID, "Dummy Output Device", DeviceAim::Output),
            input: dummy_device(INPUT_DEVICE_ID, "Dummy Input Device", DeviceAim::Input),
        }
    }
}

impl BackendSession for DummySession {
    fn scan(&mut self) -> Result<DeviceList> {
        Ok(DeviceList {
            inputs: vec![self.input.clone()],
            outputs: vec![self.output.clone()],
            default_input: Some(0),
            default_output: Some(0),
        })
    }

    fn force_device_scan(&mut self) {
        self.events.devices_changed();
    }

    fn open_out_stream(
        &mut self,
        _device: &Device,
        params: &StreamParams,
        dispatch: OutStreamDispatch,
    ) -> Result<Box<dyn OutStreamDriver>> {
        Ok(Box::new(DummyOutStream::new(params, dispatch)?))
    }

    fn open_in_stream(
        &mut self,
        _device: &Device,
        params: &StreamParams,
        dispatch: InStreamDispatch,
    ) -> Result<Box<dyn StreamDriver>> {
        Ok(Box::new(DummyInStream::new(params, dispatch)?))
    }
}

enum Command {
    Pause(bool),
    Clear,
    Stop,
}

/// Stream thread plus its command channel
struct Worker {
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
    thread: ThreadId,
}

impl Worker {
    fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Receiver<Command>) + Send + 'static,
    {
        let (commands, rx) = unbounded();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(rx))
            .map_err(|_| SoundIoError::SystemResources)?;
        let thread = handle.thread().id();
        Ok(Self {
            commands,
            handle: Some(handle),
            thread,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SoundIoError::Streaming)
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Destroyed from inside a callback: the thread exits on its own
        // once the callback returns.
        if thread::current().id() == self.thread {
            return;
        }
        if handle.join().is_err() {
            warn!("dummy stream thread panicked");
        }
    }
}

/// Converts wall-clock time into whole frames, carrying the remainder
struct Clock {
    rate: f64,
    last: Instant,
    carry: f64,
}

impl Clock {
    fn new(sample_rate: u32) -> Self {
        Self {
            rate: sample_rate as f64,
            last: Instant::now(),
            carry: 0.0,
        }
    }

    fn reset(&mut self) {
        self.last = Instant::now();
    }

    fn elapsed_frames(&mut self) -> usize {
        let now = Instant::now();
        let exact = now.duration_since(self.last).as_secs_f64() * self.rate + self.carry;
        self.last = now;
        let whole = exact.floor();
        self.carry = exact - whole;
        whole as usize
    }
}

/// Frame geometry shared by both directions
#[derive(Clone, Copy)]
struct Geometry {
    format: Format,
    channel_count: usize,
    bytes_per_frame: usize,
    sample_rate: u32,
    buffer_frames: usize,
    period_frames: usize,
}

impl Geometry {
    fn new(params: &StreamParams) -> Self {
        let buffer_frames = ((params.software_latency * params.sample_rate as f64).ceil() as usize).max(2);
        Self {
            format: params.format,
            channel_count: params.channel_count(),
            bytes_per_frame: params.bytes_per_frame(),
            sample_rate: params.sample_rate,
            buffer_frames,
            period_frames: buffer_frames / 2,
        }
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(self.period_frames as f64 / self.sample_rate as f64)
    }

    fn software_latency(&self) -> f64 {
        self.buffer_frames as f64 / self.sample_rate as f64
    }

    fn ring(&self) -> Result<(Producer, Consumer)> {
        Ok(RingBuffer::with_frame_alignment(self.buffer_frames, self.bytes_per_frame)?.split())
    }
}

/// Ring and scratch memory of one stream; moves into the thread on start
struct Buffers {
    producer: Producer,
    consumer: Consumer,
    staging: Vec<u8>,
}

impl Buffers {
    fn new(geometry: &Geometry) -> Result<Self> {
        let (producer, consumer) = geometry.ring()?;
        Ok(Self {
            producer,
            consumer,
            staging: vec![0u8; geometry.buffer_frames * geometry.bytes_per_frame],
        })
    }

    fn fill_frames(&self, geometry: &Geometry) -> usize {
        self.consumer.fill_count() / geometry.bytes_per_frame
    }
}

struct RingOutputBuffer<'a> {
    producer: &'a mut Producer,
    staging: &'a mut [u8],
    geometry: Geometry,
    /// Applied to every committed sample
    gain: f64,
    free: usize,
    granted: usize,
}

impl OutputBuffer for RingOutputBuffer<'_> {
    fn begin_write(&mut self, frame_count: usize) -> Result<ChannelAreasMut<'_>> {
        let frames = frame_count.min(self.free);
        self.granted = frames;
        let bytes = frames * self.geometry.bytes_per_frame;
        ChannelAreasMut::interleaved(
            &mut self.staging[..bytes],
            self.geometry.format,
            self.geometry.channel_count,
            frames,
        )
    }

    fn end_write(&mut self, frame_count: usize) -> Result<()> {
        if frame_count > self.granted {
            return Err(SoundIoError::Invalid);
        }
        let bytes = frame_count * self.geometry.bytes_per_frame;
        if self.gain != 1.0 {
            let mut areas = ChannelAreasMut::interleaved(
                &mut self.staging[..bytes],
                self.geometry.format,
                self.geometry.channel_count,
                frame_count,
            )?;
            for frame in 0..frame_count {
                for ch in 0..self.geometry.channel_count {
                    let sample = areas.read_sample(ch, frame);
                    areas.write_sample(ch, frame, sample * self.gain);
                }
            }
        }
        self.producer.push(&self.staging[..bytes]);
        self.free -= frame_count;
        self.granted = 0;
        Ok(())
    }
}

struct OutputWorker {
    geometry: Geometry,
    buffers: Buffers,
    dispatch: OutStreamDispatch,
    queued: Arc<AtomicUsize>,
    volume: Arc<AtomicU64>,
}

impl OutputWorker {
    fn run(mut self, commands: Receiver<Command>) {
        let mut clock = Clock::new(self.geometry.sample_rate);
        let mut paused = false;
        let period = self.geometry.period();

        self.request();
        loop {
            match commands.recv_timeout(period) {
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Command::Pause(pause)) => {
                    paused = pause;
                    clock.reset();
                    continue;
                }
                Ok(Command::Clear) => {
                    self.buffers.consumer.clear();
                    self.publish();
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if paused {
                continue;
            }
            self.play(clock.elapsed_frames());
            self.request();
        }
        debug!("dummy output thread exiting");
    }

    fn play(&mut self, due: usize) {
        let fill = self.buffers.fill_frames(&self.geometry);
        let played = due.min(fill);
        self.buffers
            .consumer
            .consume(played * self.geometry.bytes_per_frame);
        self.publish();
        if due > fill {
            trace!(missing = due - fill, "dummy output underflow");
            self.dispatch.underflow();
        }
    }

    fn request(&mut self) {
        let fill = self.buffers.fill_frames(&self.geometry);
        let free = self.geometry.buffer_frames.saturating_sub(fill);
        if free == 0 {
            return;
        }
        let min = self.geometry.period_frames.saturating_sub(fill).min(free);
        let mut buffer = RingOutputBuffer {
            producer: &mut self.buffers.producer,
            staging: &mut self.buffers.staging,
            geometry: self.geometry,
            gain: f64::from_bits(self.volume.load(Ordering::Relaxed)),
            free,
            granted: 0,
        };
        self.dispatch.write(&mut buffer, min, free);
        self.publish();
    }

    fn publish(&self) {
        self.queued
            .store(self.buffers.fill_frames(&self.geometry), Ordering::Release);
    }
}

struct DummyOutStream {
    geometry: Geometry,
    dispatch: OutStreamDispatch,
    buffers: Option<Buffers>,
    worker: Option<Worker>,
    queued: Arc<AtomicUsize>,
    /// `f64` bits, read by the worker on every period
    volume: Arc<AtomicU64>,
}

impl DummyOutStream {
    fn new(params: &StreamParams, dispatch: OutStreamDispatch) -> Result<Self> {
        let geometry = Geometry::new(params);
        Ok(Self {
            buffers: Some(Buffers::new(&geometry)?),
            geometry,
            dispatch,
            worker: None,
            queued: Arc::new(AtomicUsize::new(0)),
            volume: Arc::new(AtomicU64::new(1f64.to_bits())),
        })
    }
}

impl StreamDriver for DummyOutStream {
    fn start(&mut self) -> Result<()> {
        let buffers = self.buffers.take().ok_or(SoundIoError::Invalid)?;
        let worker = OutputWorker {
            geometry: self.geometry,
            buffers,
            dispatch: self.dispatch.clone(),
            queued: self.queued.clone(),
            volume: self.volume.clone(),
        };
        self.worker = Some(Worker::spawn("soundio-dummy-out", move |commands| {
            worker.run(commands)
        })?);
        Ok(())
    }

    fn pause(&mut self, pause: bool) -> Result<()> {
        self.worker
            .as_ref()
            .ok_or(SoundIoError::Invalid)?
            .send(Command::Pause(pause))
    }

    fn latency(&self) -> Result<f64> {
        let queued = match &self.buffers {
            Some(buffers) => buffers.fill_frames(&self.geometry),
            None => self.queued.load(Ordering::Acquire),
        };
        Ok(queued as f64 / self.geometry.sample_rate as f64)
    }

    fn software_latency(&self) -> f64 {
        self.geometry.software_latency()
    }

    fn destroy(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.buffers = None;
    }
}

impl OutStreamDriver for DummyOutStream {
    fn clear_buffer(&mut self) -> Result<()> {
        match (&self.worker, &mut self.buffers) {
            (Some(worker), _) => worker.send(Command::Clear),
            (None, Some(buffers)) => {
                buffers.consumer.clear();
                Ok(())
            }
            (None, None) => Err(SoundIoError::Invalid),
        }
    }

    fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for DummyOutStream {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct RingInputBuffer<'a> {
    consumer: &'a mut Consumer,
    staging: &'a mut [u8],
    geometry: Geometry,
    granted: usize,
}

impl InputBuffer for RingInputBuffer<'_> {
    fn begin_read(&mut self, frame_count: usize) -> Result<ChannelAreas<'_>> {
        let available = self.consumer.fill_count() / self.geometry.bytes_per_frame;
        let frames = frame_count.min(available);
        let bytes = frames * self.geometry.bytes_per_frame;
        self.consumer.peek(&mut self.staging[..bytes]);
        self.granted = frames;
        ChannelAreas::interleaved(
            &self.staging[..bytes],
            self.geometry.format,
            self.geometry.channel_count,
            frames,
        )
    }

    fn end_read(&mut self, frame_count: usize) -> Result<()> {
        if frame_count > self.granted {
            return Err(SoundIoError::Invalid);
        }
        self.consumer
            .consume(frame_count * self.geometry.bytes_per_frame);
        self.granted = 0;
        Ok(())
    }
}

struct InputWorker {
    geometry: Geometry,
    buffers: Buffers,
    dispatch: InStreamDispatch,
    queued: Arc<AtomicUsize>,
    phase: f64,
}

impl InputWorker {
    fn run(mut self, commands: Receiver<Command>) {
        let mut clock = Clock::new(self.geometry.sample_rate);
        let mut paused = false;
        let period = self.geometry.period();

        loop {
            match commands.recv_timeout(period) {
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Command::Pause(pause)) => {
                    paused = pause;
                    clock.reset();
                    continue;
                }
                Ok(Command::Clear) => continue,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if paused {
                continue;
            }
            self.capture(clock.elapsed_frames());
            self.deliver();
        }
        debug!("dummy input thread exiting");
    }

    fn capture(&mut self, due: usize) {
        let fill = self.buffers.fill_frames(&self.geometry);
        let free = self.geometry.buffer_frames.saturating_sub(fill);
        let frames = due.min(free);

        let bpf = self.geometry.bytes_per_frame;
        let bps = self.geometry.format.bytes_per_sample();
        let delta = 2.0 * PI * TONE_FREQUENCY / self.geometry.sample_rate as f64;
        for frame in 0..frames {
            let value = TONE_AMPLITUDE * self.phase.sin();
            for ch in 0..self.geometry.channel_count {
                let offset = frame * bpf + ch * bps;
                encode_sample(
                    self.geometry.format,
                    value,
                    &mut self.buffers.staging[offset..offset + bps],
                );
            }
            self.phase += delta;
            if self.phase > 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
        }
        self.buffers.producer.push(&self.buffers.staging[..frames * bpf]);
        self.publish();

        if due > free {
            trace!(dropped = due - free, "dummy input overflow");
            self.dispatch.overflow();
        }
    }

    fn deliver(&mut self) {
        let fill = self.buffers.fill_frames(&self.geometry);
        if fill == 0 {
            return;
        }
        let min = (fill + self.geometry.period_frames)
            .saturating_sub(self.geometry.buffer_frames)
            .min(fill);
        let mut buffer = RingInputBuffer {
            consumer: &mut self.buffers.consumer,
            staging: &mut self.buffers.staging,
            geometry: self.geometry,
            granted: 0,
        };
        self.dispatch.read(&mut buffer, min, fill);
        self.publish();
    }

    fn publish(&self) {
        self.queued
            .store(self.buffers.fill_frames(&self.geometry), Ordering::Release);
    }
}

struct DummyInStream {
    geometry: Geometry,
    dispatch: InStreamDispatch,
    buffers: Option<Buffers>,
    worker: Option<Worker>,
    queued: Arc<AtomicUsize>,
}

impl DummyInStream {
    fn new(params: &StreamParams, dispatch: InStreamDispatch) -> Result<Self> {
        let geometry = Geometry::new(params);
        Ok(Self {
            buffers: Some(Buffers::new(&geometry)?),
            geometry,
            dispatch,
            worker: None,
            queued: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl StreamDriver for DummyInStream {
    fn start(&mut self) -> Result<()> {
        let buffers = self.buffers.take().ok_or(SoundIoError::Invalid)?;
        let worker = InputWorker {
            geometry: self.geometry,
            buffers,
            dispatch: self.dispatch.clone(),
            queued: self.queued.clone(),
            phase: 0.0,
        };
        self.worker = Some(Worker::spawn("soundio-dummy-in", move |commands| {
            worker.run(commands)
        })?);
        Ok(())
    }

    fn pause(&mut self, pause: bool) -> Result<()> {
        self.worker
            .as_ref()
            .ok_or(SoundIoError::Invalid)?
            .send(Command::Pause(pause))
    }

    fn latency(&self) -> Result<f64> {
        let queued = self.queued.load(Ordering::Acquire);
        Ok(queued as f64 / self.geometry.sample_rate as f64)
    }

    fn software_latency(&self) -> f64 {
        self.geometry.software_latency()
    }

    fn destroy(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.buffers = None;
    }
}

impl Drop for DummyInStream {
    fn drop(&mut self) {
        self.destroy();
    }
}
