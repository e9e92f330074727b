mod common;

use common::{mock_context, MockDriver, MockState};
use soundio::{Backend, EventLoop, SoundIo, SoundIoError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[test]
fn test_wait_events_returns_when_not_connected() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    soundio.wait_events();
}

#[test]
fn test_wakeup_before_wait_is_not_lost() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    soundio.connect().unwrap();
    soundio.wakeup();
    // Returns because of the queued wakeup
    soundio.wait_events();
    assert_eq!(soundio.output_device_count(), Some(1));
}

#[test]
fn test_wakeup_from_another_thread() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    soundio.connect().unwrap();
    soundio.flush_events();

    let waker = soundio.waker();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        waker.wakeup();
    });
    soundio.wait_events();
    handle.join().unwrap();
}

/// Runs `wait_events` on a helper thread; the receiver fires when it
/// returns
fn spawn_wait(soundio: &Arc<SoundIo>) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    let soundio = soundio.clone();
    std::thread::spawn(move || {
        soundio.wait_events();
        let _ = tx.send(());
    });
    rx
}

#[test]
fn test_wait_events_returns_after_queued_disconnect() {
    let state = MockState::new();
    let soundio = Arc::new(
        SoundIo::builder()
            .without_registered_drivers()
            .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
            .on_backend_disconnect(|_, _| {})
            .build(),
    );
    soundio.connect().unwrap();
    soundio.flush_events();

    state
        .events()
        .backend_disconnected(SoundIoError::BackendDisconnected);
    assert!(spawn_wait(&soundio)
        .recv_timeout(Duration::from_secs(2))
        .is_ok());
    assert!(!soundio.is_connected());
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wakeup_survives_flush() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    let soundio = Arc::new(soundio);
    soundio.connect().unwrap();

    soundio.wakeup();
    soundio.flush_events();
    assert!(spawn_wait(&soundio)
        .recv_timeout(Duration::from_secs(2))
        .is_ok());
}

#[test]
fn test_wakeup_is_consumed_by_one_wait() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    let soundio = Arc::new(soundio);
    soundio.connect().unwrap();
    soundio.flush_events();

    soundio.wakeup();
    assert!(spawn_wait(&soundio)
        .recv_timeout(Duration::from_secs(2))
        .is_ok());

    let blocked = spawn_wait(&soundio);
    assert!(blocked.recv_timeout(Duration::from_millis(100)).is_err());
    soundio.wakeup();
    assert!(blocked.recv_timeout(Duration::from_secs(2)).is_ok());
}

#[test]
fn test_wait_events_handles_devices_changed() {
    let state = MockState::new();
    let changes = Arc::new(AtomicUsize::new(0));
    let seen = changes.clone();
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
        .on_devices_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    soundio.connect().unwrap();
    soundio.flush_events();

    let events = state.events();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        events.devices_changed();
    });
    soundio.wait_events();
    handle.join().unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_event_loop_dispatches_device_changes() {
    let state = MockState::new();
    let changes = Arc::new(AtomicUsize::new(0));
    let seen = changes.clone();
    let soundio = Arc::new(
        SoundIo::builder()
            .without_registered_drivers()
            .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
            .on_devices_change(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .build(),
    );
    soundio.connect().unwrap();

    let event_loop = EventLoop::spawn(soundio.clone());
    timeout(Duration::from_secs(2), async {
        while changes.load(Ordering::SeqCst) < 1 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    state.events().devices_changed();
    timeout(Duration::from_secs(2), async {
        while changes.load(Ordering::SeqCst) < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(!event_loop.is_finished());
    timeout(Duration::from_secs(2), event_loop.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_event_loop_stops_on_backend_loss() {
    let state = MockState::new();
    let soundio = Arc::new(
        SoundIo::builder()
            .without_registered_drivers()
            .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
            .on_backend_disconnect(|_, _| {})
            .build(),
    );
    soundio.connect().unwrap();
    let event_loop = EventLoop::spawn(soundio.clone());

    state
        .events()
        .backend_disconnected(SoundIoError::BackendDisconnected);
    timeout(Duration::from_secs(2), async {
        while !event_loop.is_finished() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!soundio.is_connected());
    event_loop.shutdown().await;
}

#[tokio::test]
async fn test_event_loop_exits_immediately_when_disconnected() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    let event_loop = EventLoop::spawn(Arc::new(soundio));
    timeout(Duration::from_secs(2), event_loop.shutdown())
        .await
        .unwrap();
}
