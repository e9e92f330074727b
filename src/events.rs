use crate::context::SoundIo;
use crate::error::SoundIoError;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Notifications a backend raises for the context's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DevicesChanged,
    BackendDisconnected(SoundIoError),
    Wakeup,
}

/// Events are tagged with the connection generation that raised them so a
/// reconnect never sees stale notifications from an earlier session.
pub(crate) type Envelope = (u64, Event);

pub(crate) type SignalHook = Arc<dyn Fn() + Send + Sync>;

/// Handle a backend uses to notify the context. Safe to clone and use from
/// any thread.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Envelope>,
    generation: u64,
    signal: Option<SignalHook>,
}

impl EventSender {
    pub(crate) fn new(tx: Sender<Envelope>, generation: u64, signal: Option<SignalHook>) -> Self {
        Self {
            tx,
            generation,
            signal,
        }
    }

    /// The device list is out of date; the next flush rescans
    pub fn devices_changed(&self) {
        self.send(Event::DevicesChanged);
    }

    /// The sound server went away; every stream of this connection is dead
    pub fn backend_disconnected(&self, err: SoundIoError) {
        self.send(Event::BackendDisconnected(err));
    }

    fn send(&self, event: Event) {
        if self.tx.send((self.generation, event)).is_err() {
            // Context already gone
            return;
        }
        if let Some(signal) = &self.signal {
            signal();
        }
    }
}

/// Cross-thread handle that unblocks `SoundIo::wait_events`.
///
/// The request is latched in `pending` until a `wait_events` consumes it;
/// the queued envelope only unblocks a waiter already parked in `recv`.
#[derive(Clone)]
pub struct Waker {
    tx: Sender<Envelope>,
    pending: Arc<AtomicBool>,
}

impl Waker {
    pub(crate) fn new(tx: Sender<Envelope>, pending: Arc<AtomicBool>) -> Self {
        Self { tx, pending }
    }

    pub fn wakeup(&self) {
        self.pending.store(true, Ordering::Release);
        let _ = self.tx.send((0, Event::Wakeup));
    }
}

/// Runs `SoundIo::wait_events` on a blocking tokio task so device and
/// disconnect callbacks fire without the application polling.
///
/// The loop ends on `shutdown` or when the context loses its connection.
pub struct EventLoop {
    done: Arc<AtomicBool>,
    waker: Waker,
    handle: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Must be called from within a tokio runtime
    pub fn spawn(soundio: Arc<SoundIo>) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let waker = soundio.waker();
        let flag = done.clone();

        let handle = tokio::task::spawn_blocking(move || {
            debug!("event loop started");
            while !flag.load(Ordering::Acquire) {
                if !soundio.is_connected() {
                    warn!("event loop stopping: context not connected");
                    break;
                }
                soundio.wait_events();
            }
            debug!("event loop stopped");
        });

        Self {
            done,
            waker,
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the loop and wait for the blocking task to finish
    pub async fn shutdown(mut self) {
        self.done.store(true, Ordering::Release);
        self.waker.wakeup();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "event loop task failed");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // Detached; the task exits at its next wakeup
        self.done.store(true, Ordering::Release);
        self.waker.wakeup();
    }
}
