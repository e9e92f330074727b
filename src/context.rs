use crate::backend::{
    registered_drivers, Backend, BackendDriver, BackendSession, OutStreamDriver, StreamDriver,
};
use crate::config::SoundIoConfig;
use crate::device::{Device, DeviceList};
use crate::error::{Result, SoundIoError};
use crate::events::{Envelope, Event, EventSender, SignalHook, Waker};
use crate::stream::{
    lock_tolerant, InStreamDispatch, OutStreamDispatch, StreamHandle, StreamParams,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};

/// A live backend session plus the streams opened through it
pub(crate) struct Connection {
    backend: Backend,
    generation: u64,
    session: Mutex<Box<dyn BackendSession>>,
    streams: Mutex<HashMap<u64, Weak<dyn StreamHandle>>>,
    next_token: AtomicU64,
    alive: AtomicBool,
}

impl Connection {
    fn new(backend: Backend, generation: u64, session: Box<dyn BackendSession>) -> Self {
        Self {
            backend,
            generation,
            session: Mutex::new(session),
            streams: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn scan(&self) -> Result<DeviceList> {
        lock_tolerant(&self.session).scan()
    }

    pub fn open_out_stream(
        &self,
        device: &Device,
        params: &StreamParams,
        dispatch: OutStreamDispatch,
    ) -> Result<Box<dyn OutStreamDriver>> {
        if !self.is_alive() {
            return Err(SoundIoError::BackendDisconnected);
        }
        lock_tolerant(&self.session).open_out_stream(device, params, dispatch)
    }

    pub fn open_in_stream(
        &self,
        device: &Device,
        params: &StreamParams,
        dispatch: InStreamDispatch,
    ) -> Result<Box<dyn StreamDriver>> {
        if !self.is_alive() {
            return Err(SoundIoError::BackendDisconnected);
        }
        lock_tolerant(&self.session).open_in_stream(device, params, dispatch)
    }

    pub fn register_stream(&self, handle: Weak<dyn StreamHandle>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        lock_tolerant(&self.streams).insert(token, handle);
        token
    }

    pub fn unregister_stream(&self, token: u64) {
        lock_tolerant(&self.streams).remove(&token);
    }

    /// Destroy every stream still registered, then close the session.
    /// Safe to call more than once.
    fn shutdown(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let streams: Vec<_> = lock_tolerant(&self.streams).drain().map(|(_, s)| s).collect();
        let count = streams.len();
        for stream in streams {
            if let Some(stream) = stream.upgrade() {
                stream.shutdown();
            }
        }
        lock_tolerant(&self.session).disconnect();
        info!(backend = %self.backend, streams = count, "backend disconnected");
    }
}

type DevicesChangeCallback = Box<dyn FnMut(&SoundIo) + Send>;
type BackendDisconnectCallback = Box<dyn FnMut(&SoundIo, SoundIoError) + Send>;

#[derive(Default)]
struct ContextCallbacks {
    devices_change: Option<DevicesChangeCallback>,
    backend_disconnect: Option<BackendDisconnectCallback>,
}

#[derive(Default)]
struct ContextState {
    connection: Option<Arc<Connection>>,
    /// `None` until the first flush after connecting
    devices: Option<DeviceList>,
    scan_pending: bool,
    generation: u64,
}

/// Builder for [`SoundIo`]
pub struct SoundIoBuilder {
    app_name: String,
    preferred: Option<Backend>,
    drivers: Vec<Arc<dyn BackendDriver>>,
    use_registered: bool,
    callbacks: ContextCallbacks,
    events_signal: Option<SignalHook>,
}

impl SoundIoBuilder {
    fn new() -> Self {
        Self {
            app_name: "SoundIo".to_string(),
            preferred: None,
            drivers: Vec::new(),
            use_registered: true,
            callbacks: ContextCallbacks::default(),
            events_signal: None,
        }
    }

    /// Name reported to sound servers that show per-client names
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Backend `connect` uses instead of trying each in priority order
    pub fn backend(mut self, backend: Backend) -> Self {
        self.preferred = Some(backend);
        self
    }

    /// Add a driver; it takes precedence over a compiled-in driver for the
    /// same backend
    pub fn driver(mut self, driver: Arc<dyn BackendDriver>) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Only use drivers added with [`driver`](Self::driver)
    pub fn without_registered_drivers(mut self) -> Self {
        self.use_registered = false;
        self
    }

    /// Called from `flush_events` after the device list changed
    pub fn on_devices_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&SoundIo) + Send + 'static,
    {
        self.callbacks.devices_change = Some(Box::new(callback));
        self
    }

    /// Called from `flush_events` when the backend went away. Without it
    /// the error is logged.
    pub fn on_backend_disconnect<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&SoundIo, SoundIoError) + Send + 'static,
    {
        self.callbacks.backend_disconnect = Some(Box::new(callback));
        self
    }

    /// Called on the backend's thread whenever it queues an event. Useful
    /// for integrating with a foreign event loop; keep it short.
    pub fn on_events_signal<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events_signal = Some(Arc::new(callback));
        self
    }

    pub fn config(mut self, config: &SoundIoConfig) -> Self {
        self.app_name = config.app_name.clone();
        self.preferred = config.backend;
        self
    }

    pub fn build(self) -> SoundIo {
        let mut drivers = self.drivers;
        if self.use_registered {
            for driver in registered_drivers() {
                if !drivers.iter().any(|d| d.backend() == driver.backend()) {
                    drivers.push(driver);
                }
            }
        }
        drivers.sort_by_key(|d| d.backend());

        let (events_tx, events_rx) = unbounded();
        SoundIo {
            app_name: self.app_name,
            preferred: self.preferred,
            drivers,
            state: Mutex::new(ContextState::default()),
            callbacks: Mutex::new(self.callbacks),
            events_signal: self.events_signal,
            events_tx,
            events_rx,
            wakeup_pending: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Library context: owns the backend connection and the device registry.
///
/// All methods take `&self` and the context is `Send + Sync`, so it can be
/// shared behind an `Arc` with an [`EventLoop`](crate::events::EventLoop).
pub struct SoundIo {
    app_name: String,
    preferred: Option<Backend>,
    drivers: Vec<Arc<dyn BackendDriver>>,
    state: Mutex<ContextState>,
    callbacks: Mutex<ContextCallbacks>,
    events_signal: Option<SignalHook>,
    events_tx: Sender<Envelope>,
    events_rx: Receiver<Envelope>,
    wakeup_pending: Arc<AtomicBool>,
}

impl SoundIo {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SoundIoBuilder {
        SoundIoBuilder::new()
    }

    pub fn from_config(config: &SoundIoConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ContextState> {
        lock_tolerant(&self.state)
    }

    /// Connect to the preferred backend, or to the first available backend
    /// in priority order. On total failure the last backend's error is
    /// returned.
    pub fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Err(SoundIoError::Invalid);
        }
        if let Some(backend) = self.preferred {
            return self.connect_backend(backend);
        }

        let mut last_err = SoundIoError::BackendUnavailable;
        for driver in &self.drivers {
            match self.attach(driver.as_ref()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(backend = %driver.backend(), error = %e, "backend connect failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Connect to one specific backend
    pub fn connect_backend(&self, backend: Backend) -> Result<()> {
        if self.is_connected() {
            return Err(SoundIoError::Invalid);
        }
        let driver = self
            .drivers
            .iter()
            .find(|d| d.backend() == backend)
            .ok_or(SoundIoError::BackendUnavailable)?;
        self.attach(driver.as_ref())
    }

    fn attach(&self, driver: &dyn BackendDriver) -> Result<()> {
        let generation = self.state().generation + 1;
        let sender = EventSender::new(
            self.events_tx.clone(),
            generation,
            self.events_signal.clone(),
        );
        let session = driver.connect(&self.app_name, sender)?;

        let mut state = self.state();
        state.generation = generation;
        state.connection = Some(Arc::new(Connection::new(
            driver.backend(),
            generation,
            session,
        )));
        state.devices = None;
        state.scan_pending = true;
        info!(backend = %driver.backend(), app = %self.app_name, "connected");
        Ok(())
    }

    /// Tear down every stream and close the backend session. The device
    /// list is forgotten.
    pub fn disconnect(&self) {
        let connection = {
            let mut state = self.state();
            state.devices = None;
            state.scan_pending = false;
            state.connection.take()
        };
        if let Some(connection) = connection {
            connection.shutdown();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connection.is_some()
    }

    pub fn current_backend(&self) -> Option<Backend> {
        self.state().connection.as_ref().map(|c| c.backend)
    }

    /// Backends this context can connect to, in priority order
    pub fn backends(&self) -> Vec<Backend> {
        let mut backends: Vec<Backend> = self.drivers.iter().map(|d| d.backend()).collect();
        backends.dedup();
        backends
    }

    pub fn backend_count(&self) -> usize {
        self.backends().len()
    }

    /// # Panics
    ///
    /// Panics if `index >= backend_count()`.
    pub fn backend(&self, index: usize) -> Backend {
        let backends = self.backends();
        assert!(
            index < backends.len(),
            "backend index {} out of range (count {})",
            index,
            backends.len()
        );
        backends[index]
    }

    pub fn have_backend(&self, backend: Backend) -> bool {
        self.drivers.iter().any(|d| d.backend() == backend)
    }

    /// Process pending backend events without blocking. Rescans devices if
    /// they changed (or were never scanned) and fires the context
    /// callbacks on the calling thread. A pending `wakeup` is left for the
    /// next `wait_events`.
    pub fn flush_events(&self) {
        self.process(None);
    }

    /// Flush, then block until the next event or `wakeup`, then flush
    /// again. Returns at once when not connected, when the flush lost the
    /// connection, or when a wakeup is already pending.
    pub fn wait_events(&self) {
        if !self.is_connected() {
            return;
        }
        self.process(None);
        if self.take_wakeup() || !self.is_connected() {
            return;
        }
        // Cannot fail: `self` holds a sender
        if let Ok(envelope) = self.events_rx.recv() {
            self.process(Some(envelope));
        }
        self.take_wakeup();
    }

    /// Make a blocked or upcoming `wait_events` return. Callable from any
    /// thread.
    pub fn wakeup(&self) {
        self.waker().wakeup();
    }

    pub fn waker(&self) -> Waker {
        Waker::new(self.events_tx.clone(), self.wakeup_pending.clone())
    }

    fn take_wakeup(&self) -> bool {
        self.wakeup_pending.swap(false, Ordering::AcqRel)
    }

    /// Ask the backend to rescan; changes arrive through the next flush
    pub fn force_device_scan(&self) {
        let connection = self.state().connection.clone();
        if let Some(connection) = connection {
            lock_tolerant(&connection.session).force_device_scan();
        }
    }

    /// Drain queued events and apply them. Wakeup envelopes are dropped
    /// here; the request itself lives in `wakeup_pending`.
    fn process(&self, first: Option<Envelope>) {
        let (connection, generation) = {
            let state = self.state();
            (state.connection.clone(), state.generation)
        };

        let mut changed = false;
        let mut lost = None;
        for (event_generation, event) in first.into_iter().chain(self.events_rx.try_iter()) {
            match event {
                Event::Wakeup => {}
                _ if event_generation != generation || connection.is_none() => {
                    debug!(event = ?event, "dropping event from a previous connection");
                }
                Event::DevicesChanged => changed = true,
                Event::BackendDisconnected(err) => lost = Some(err),
            }
        }

        let Some(connection) = connection else {
            return;
        };
        if let Some(err) = lost {
            self.handle_disconnect(&connection, err);
            return;
        }

        let pending = {
            let mut state = self.state();
            let pending = changed || state.scan_pending;
            state.scan_pending = false;
            pending
        };
        if pending {
            self.rescan(&connection);
        }
    }

    fn rescan(&self, connection: &Arc<Connection>) {
        let list = match connection.scan() {
            Ok(list) => list,
            Err(SoundIoError::BackendDisconnected) => {
                self.handle_disconnect(connection, SoundIoError::BackendDisconnected);
                return;
            }
            Err(e) => {
                warn!(backend = %connection.backend, error = %e, "device scan failed");
                return;
            }
        };
        for device in list.inputs.iter().chain(&list.outputs) {
            device.attach(connection);
        }
        debug!(
            inputs = list.inputs.len(),
            outputs = list.outputs.len(),
            "device list refreshed"
        );

        {
            let mut state = self.state();
            // Ignore a scan that raced with a disconnect
            match &state.connection {
                Some(current) if current.generation == connection.generation => {
                    state.devices = Some(list);
                }
                _ => return,
            }
        }

        let taken = lock_tolerant(&self.callbacks).devices_change.take();
        if let Some(mut callback) = taken {
            callback(self);
            let mut callbacks = lock_tolerant(&self.callbacks);
            if callbacks.devices_change.is_none() {
                callbacks.devices_change = Some(callback);
            }
        }
    }

    fn handle_disconnect(&self, connection: &Arc<Connection>, err: SoundIoError) {
        {
            let mut state = self.state();
            match &state.connection {
                Some(current) if Arc::ptr_eq(current, connection) => {
                    state.connection = None;
                    state.devices = None;
                    state.scan_pending = false;
                }
                _ => return,
            }
        }
        connection.shutdown();

        let taken = lock_tolerant(&self.callbacks).backend_disconnect.take();
        match taken {
            Some(mut callback) => {
                callback(self, err);
                let mut callbacks = lock_tolerant(&self.callbacks);
                if callbacks.backend_disconnect.is_none() {
                    callbacks.backend_disconnect = Some(callback);
                }
            }
            None => error!(backend = %connection.backend, error = %err, "backend disconnected"),
        }
    }

    /// `None` until the device list was refreshed by a flush
    pub fn input_device_count(&self) -> Option<usize> {
        self.state().devices.as_ref().map(|d| d.inputs.len())
    }

    pub fn output_device_count(&self) -> Option<usize> {
        self.state().devices.as_ref().map(|d| d.outputs.len())
    }

    /// New reference to an input device of the current snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the device list was never refreshed or `index` is out of
    /// range.
    pub fn input_device(&self, index: usize) -> Device {
        let state = self.state();
        let devices = state
            .devices
            .as_ref()
            .map(|d| d.inputs.as_slice())
            .unwrap_or_default();
        assert!(
            index < devices.len(),
            "input device index {} out of range (count {})",
            index,
            devices.len()
        );
        devices[index].clone()
    }

    /// # Panics
    ///
    /// Panics if the device list was never refreshed or `index` is out of
    /// range.
    pub fn output_device(&self, index: usize) -> Device {
        let state = self.state();
        let devices = state
            .devices
            .as_ref()
            .map(|d| d.outputs.as_slice())
            .unwrap_or_default();
        assert!(
            index < devices.len(),
            "output device index {} out of range (count {})",
            index,
            devices.len()
        );
        devices[index].clone()
    }

    /// `None` when there are no input devices or the list was never
    /// refreshed
    pub fn default_input_device_index(&self) -> Option<usize> {
        self.state().devices.as_ref().and_then(|d| d.default_input)
    }

    pub fn default_output_device_index(&self) -> Option<usize> {
        self.state().devices.as_ref().and_then(|d| d.default_output)
    }

    /// Disconnect and release everything. Same as dropping.
    pub fn destroy(self) {}
}

impl Default for SoundIo {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SoundIo {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Version of this library as "major.minor.patch"
pub fn version_string() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn version_major() -> u32 {
    env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0)
}

pub fn version_minor() -> u32 {
    env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0)
}

pub fn version_patch() -> u32 {
    env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0)
}
