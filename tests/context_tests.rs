mod common;

use common::{connected_mock, mock_context, FailingDriver, MockDriver, MockState};
use soundio::{Backend, SoundIo, SoundIoError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_connect_unavailable_backend_then_connect_succeeds() {
    let soundio = SoundIo::new();
    assert!(!Backend::Jack.have());
    assert_eq!(
        soundio.connect_backend(Backend::Jack),
        Err(SoundIoError::BackendUnavailable)
    );
    assert!(!soundio.is_connected());

    soundio.connect().unwrap();
    assert!(soundio.is_connected());
    assert!(soundio.current_backend().is_some());
}

#[test]
fn test_connect_twice_is_invalid() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    soundio.connect().unwrap();
    assert_eq!(soundio.connect(), Err(SoundIoError::Invalid));
    assert_eq!(
        soundio.connect_backend(Backend::Dummy),
        Err(SoundIoError::Invalid)
    );
}

#[test]
fn test_connect_falls_through_priority_order() {
    let state = MockState::new();
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
        .driver(Arc::new(FailingDriver(
            Backend::PulseAudio,
            SoundIoError::InitAudioBackend,
        )))
        .build();

    assert_eq!(soundio.backends(), vec![Backend::PulseAudio, Backend::Dummy]);
    soundio.connect().unwrap();
    assert_eq!(soundio.current_backend(), Some(Backend::Dummy));
}

#[test]
fn test_connect_reports_last_error() {
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .driver(Arc::new(FailingDriver(Backend::Jack, SoundIoError::InitAudioBackend)))
        .driver(Arc::new(FailingDriver(Backend::Alsa, SoundIoError::SystemResources)))
        .build();
    assert_eq!(soundio.connect(), Err(SoundIoError::SystemResources));
}

#[test]
fn test_connect_without_drivers() {
    let soundio = SoundIo::builder().without_registered_drivers().build();
    assert_eq!(soundio.backend_count(), 0);
    assert_eq!(soundio.connect(), Err(SoundIoError::BackendUnavailable));
}

#[test]
fn test_preferred_backend_is_used() {
    let state = MockState::new();
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .backend(Backend::Dummy)
        .driver(Arc::new(FailingDriver(Backend::Jack, SoundIoError::InitAudioBackend)))
        .driver(Arc::new(MockDriver::new(Backend::Dummy, state)))
        .build();
    soundio.connect().unwrap();
    assert_eq!(soundio.current_backend(), Some(Backend::Dummy));
}

#[test]
fn test_added_driver_replaces_compiled_in_one() {
    let state = MockState::new();
    let soundio = SoundIo::builder()
        .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
        .build();
    soundio.connect_backend(Backend::Dummy).unwrap();
    soundio.flush_events();
    assert_eq!(state.scans.load(Ordering::SeqCst), 1);
    assert_eq!(soundio.output_device(0).id(), "mock-out-0");
}

#[test]
fn test_backend_index_queries() {
    let soundio = SoundIo::new();
    assert!(soundio.backend_count() >= 1);
    assert!(soundio.have_backend(Backend::Dummy));
    let last = soundio.backend(soundio.backend_count() - 1);
    assert_eq!(last, Backend::Dummy);
}

#[test]
#[should_panic]
fn test_backend_index_out_of_range_panics() {
    let soundio = SoundIo::new();
    soundio.backend(soundio.backend_count());
}

#[test]
fn test_device_counts_before_flush() {
    let (soundio, state) = mock_context(Backend::Dummy);
    assert_eq!(soundio.output_device_count(), None);
    soundio.connect().unwrap();
    assert_eq!(soundio.output_device_count(), None);
    assert_eq!(soundio.default_output_device_index(), None);
    assert_eq!(state.scans.load(Ordering::SeqCst), 0);

    soundio.flush_events();
    assert_eq!(soundio.output_device_count(), Some(1));
    assert_eq!(soundio.input_device_count(), Some(1));
    assert_eq!(soundio.default_output_device_index(), Some(0));
    assert_eq!(soundio.default_input_device_index(), Some(0));

    // No change, no rescan
    soundio.flush_events();
    assert_eq!(state.scans.load(Ordering::SeqCst), 1);
}

#[test]
fn test_devices_changed_triggers_rescan_and_callback() {
    let state = MockState::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let counts = Arc::new(Mutex::new(Vec::new()));
    let counts_seen = counts.clone();
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
        .on_devices_change(move |soundio| {
            seen.fetch_add(1, Ordering::SeqCst);
            counts_seen
                .lock()
                .unwrap()
                .push(soundio.output_device_count().unwrap_or(0));
        })
        .build();
    soundio.connect().unwrap();
    soundio.flush_events();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    state
        .output_devices
        .lock()
        .unwrap()
        .push("mock-out-1".to_string());
    state.events().devices_changed();
    soundio.flush_events();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*counts.lock().unwrap(), vec![1, 2]);
    assert_eq!(soundio.output_device(1).id(), "mock-out-1");
}

#[test]
fn test_force_device_scan() {
    let (soundio, state) = connected_mock();
    assert_eq!(state.scans.load(Ordering::SeqCst), 1);
    soundio.force_device_scan();
    soundio.flush_events();
    assert_eq!(state.scans.load(Ordering::SeqCst), 2);
}

#[test]
fn test_backend_disconnect_forgets_devices() {
    let state = MockState::new();
    let lost = Arc::new(Mutex::new(None));
    let lost_seen = lost.clone();
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
        .on_backend_disconnect(move |soundio, err| {
            assert!(!soundio.is_connected());
            *lost_seen.lock().unwrap() = Some(err);
        })
        .build();
    soundio.connect().unwrap();
    soundio.flush_events();

    state
        .events()
        .backend_disconnected(SoundIoError::BackendDisconnected);
    soundio.flush_events();

    assert_eq!(*lost.lock().unwrap(), Some(SoundIoError::BackendDisconnected));
    assert!(!soundio.is_connected());
    assert_eq!(soundio.output_device_count(), None);
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stale_events_are_ignored_after_reconnect() {
    let (soundio, state) = connected_mock();
    let old_events = state.events();
    soundio.disconnect();
    soundio.connect().unwrap();
    soundio.flush_events();
    let scans = state.scans.load(Ordering::SeqCst);

    old_events.backend_disconnected(SoundIoError::BackendDisconnected);
    old_events.devices_changed();
    soundio.flush_events();

    assert!(soundio.is_connected());
    assert_eq!(state.scans.load(Ordering::SeqCst), scans);
}

#[test]
fn test_events_signal_fires_on_backend_thread() {
    let state = MockState::new();
    let signals = Arc::new(AtomicUsize::new(0));
    let seen = signals.clone();
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .driver(Arc::new(MockDriver::new(Backend::Dummy, state.clone())))
        .on_events_signal(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    soundio.connect().unwrap();

    let events = state.events();
    std::thread::spawn(move || events.devices_changed())
        .join()
        .unwrap();
    assert_eq!(signals.load(Ordering::SeqCst), 1);
}

#[test]
fn test_disconnect_calls_session_once() {
    let (soundio, state) = connected_mock();
    soundio.disconnect();
    soundio.disconnect();
    drop(soundio);
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_app_name_and_version() {
    let (soundio, _state) = mock_context(Backend::Dummy);
    assert_eq!(soundio.app_name(), "mock-test");
    assert_eq!(
        soundio::version_string(),
        format!(
            "{}.{}.{}",
            soundio::version_major(),
            soundio::version_minor(),
            soundio::version_patch()
        )
    );
}

#[test]
fn test_reused_device_opens_after_reconnect() {
    let state = MockState::new();
    let soundio = SoundIo::builder()
        .without_registered_drivers()
        .driver(Arc::new(MockDriver::caching(Backend::Dummy, state.clone())))
        .build();
    soundio.connect().unwrap();
    soundio.flush_events();

    let device = soundio.output_device(0);
    let mut stream = device.create_out_stream();
    stream.open().unwrap();
    stream.destroy();

    soundio.disconnect();
    soundio.connect().unwrap();
    soundio.flush_events();

    // Same device object as before, now bound to the new session
    let again = soundio.output_device(0);
    let mut stream = again.create_out_stream();
    assert_eq!(stream.open(), Ok(()));
    assert_eq!(state.streams_started.load(Ordering::SeqCst), 0);
    assert_eq!(state.scans.load(Ordering::SeqCst), 2);
}

#[test]
fn test_device_from_lost_session_stays_disconnected() {
    let (soundio, _state) = connected_mock();
    let device = soundio.output_device(0);
    soundio.disconnect();
    soundio.connect().unwrap();
    soundio.flush_events();

    // A fresh scan produced new devices; the old handle is not re-bound
    let mut stream = device.create_out_stream();
    assert_eq!(stream.open(), Err(SoundIoError::BackendDisconnected));
}
