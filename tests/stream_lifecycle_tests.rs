mod common;

use common::{connected_mock, VecInputBuffer, VecOutputBuffer};
use soundio::{
    ChannelId, ChannelLayout, ChannelLayoutId, Format, SoundIoError, StreamState, MAX_CHANNELS,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_start_before_open_is_invalid() {
    let (soundio, _state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    assert_eq!(stream.start(), Err(SoundIoError::Invalid));
    assert_eq!(stream.state(), StreamState::Created);
}

#[test]
fn test_open_fills_defaults_from_device() {
    let (soundio, _state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    assert_eq!(stream.name(), "SoundIoOutStream");
    assert_eq!(stream.bytes_per_frame(), 0);

    stream.open().unwrap();
    assert_eq!(stream.state(), StreamState::Opened);
    assert_eq!(stream.format(), Some(Format::FLOAT32NE));
    assert_eq!(stream.sample_rate(), Some(48000));
    assert_eq!(
        stream.layout(),
        Some(&ChannelLayout::from_id(ChannelLayoutId::Stereo))
    );
    assert_eq!(stream.software_latency(), Some(0.02));
    assert_eq!(stream.bytes_per_sample(), 4);
    assert_eq!(stream.bytes_per_frame(), 8);
    assert!(stream.layout_error().is_none());
}

#[test]
fn test_latency_is_clamped_to_device_range() {
    let (soundio, _state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    stream.set_software_latency(10.0).unwrap();
    stream.open().unwrap();
    assert_eq!(stream.software_latency(), Some(1.0));

    let mut stream = soundio.input_device(0).create_in_stream();
    stream.set_software_latency(0.0001).unwrap();
    stream.open().unwrap();
    assert_eq!(stream.software_latency(), Some(0.005));
    assert_eq!(stream.name(), "SoundIoInStream");
}

#[test]
fn test_open_rejects_bad_configuration() {
    let (soundio, _state) = connected_mock();
    let device = soundio.output_device(0);

    let mut stream = device.create_out_stream();
    stream.set_format(Format::Invalid).unwrap();
    assert_eq!(stream.open(), Err(SoundIoError::Invalid));
    assert_eq!(stream.state(), StreamState::Failed);

    let mut stream = device.create_out_stream();
    stream.set_format(Format::U8).unwrap();
    assert_eq!(stream.open(), Err(SoundIoError::IncompatibleDevice));

    let mut stream = device.create_out_stream();
    stream.set_sample_rate(96000).unwrap();
    assert_eq!(stream.open(), Err(SoundIoError::IncompatibleDevice));

    let mut stream = device.create_out_stream();
    stream.set_layout(ChannelLayout::from_channels(&[])).unwrap();
    assert_eq!(stream.open(), Err(SoundIoError::Invalid));

    let too_many: Vec<ChannelId> = (0..=MAX_CHANNELS).map(|_| ChannelId::FrontLeft).collect();
    let mut stream = device.create_out_stream();
    stream.set_layout(ChannelLayout::from_channels(&too_many)).unwrap();
    assert_eq!(stream.open(), Err(SoundIoError::Invalid));
}

#[test]
fn test_unsupported_layout_is_not_fatal() {
    let (soundio, _state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    stream
        .set_layout(ChannelLayout::from_id(ChannelLayoutId::FivePointOne))
        .unwrap();
    stream.open().unwrap();
    assert_eq!(stream.layout_error(), Some(&SoundIoError::IncompatibleDevice));
    assert_eq!(stream.bytes_per_frame(), 6 * 4);
}

#[test]
fn test_wrong_aim_is_invalid() {
    let (soundio, _state) = connected_mock();
    let mut stream = soundio.input_device(0).create_out_stream();
    assert_eq!(stream.open(), Err(SoundIoError::Invalid));
}

#[test]
fn test_probe_error_is_returned_from_open() {
    let (soundio, state) = connected_mock();
    *state.probe_error.lock().unwrap() = Some(SoundIoError::OpeningDevice);
    state.events().devices_changed();
    soundio.flush_events();

    let mut stream = soundio.output_device(0).create_out_stream();
    assert_eq!(stream.open(), Err(SoundIoError::OpeningDevice));
}

#[test]
fn test_backend_open_failure_marks_failed() {
    let (soundio, state) = connected_mock();
    state.fail_open.store(true, Ordering::SeqCst);
    let mut stream = soundio.output_device(0).create_out_stream();
    assert_eq!(stream.open(), Err(SoundIoError::OpeningDevice));
    assert_eq!(stream.state(), StreamState::Failed);
    assert_eq!(stream.start(), Err(SoundIoError::Invalid));
    stream.destroy();
    assert_eq!(stream.state(), StreamState::Destroyed);
}

#[test]
fn test_setters_rejected_after_open() {
    let (soundio, _state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    stream.set_name("synth").unwrap();
    stream.open().unwrap();
    assert_eq!(stream.name(), "synth");
    assert_eq!(stream.set_format(Format::S16NE), Err(SoundIoError::Invalid));
    assert_eq!(stream.set_sample_rate(44100), Err(SoundIoError::Invalid));
    assert_eq!(stream.open(), Err(SoundIoError::Invalid));
}

#[test]
fn test_unsupported_pause_leaves_state() {
    let (soundio, state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    stream.open().unwrap();
    stream.start().unwrap();
    assert_eq!(state.streams_started.load(Ordering::SeqCst), 1);
    assert_eq!(stream.start(), Err(SoundIoError::Invalid));

    assert_eq!(stream.pause(true), Err(SoundIoError::IncompatibleBackend));
    assert_eq!(stream.state(), StreamState::Started);
    // Resuming a running stream needs no backend call
    assert_eq!(stream.pause(false), Ok(()));
}

#[test]
fn test_destroy_is_idempotent_and_drops_device() {
    let (soundio, state) = connected_mock();
    let device = soundio.output_device(0);
    let mut stream = device.create_out_stream();
    assert_eq!(device.ref_count(), 3);
    stream.open().unwrap();

    stream.destroy();
    stream.destroy();
    assert_eq!(stream.state(), StreamState::Destroyed);
    assert!(stream.device().is_none());
    assert_eq!(device.ref_count(), 2);
    assert_eq!(state.streams_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(stream.latency(), Err(SoundIoError::Invalid));
}

#[test]
fn test_volume_range() {
    let (soundio, _state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    assert_eq!(stream.set_volume(0.5), Err(SoundIoError::Invalid));
    stream.open().unwrap();
    stream.set_volume(0.5).unwrap();
    assert_eq!(stream.volume(), 0.5);
    assert_eq!(stream.set_volume(1.5), Err(SoundIoError::Invalid));
    assert_eq!(stream.volume(), 0.5);
    stream.clear_buffer().unwrap();
}

#[test]
fn test_disconnect_tears_down_open_streams() {
    let (soundio, state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    stream.open().unwrap();
    stream.start().unwrap();

    soundio.disconnect();
    assert_eq!(state.streams_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(stream.latency(), Err(SoundIoError::BackendDisconnected));
    stream.destroy();
    assert_eq!(state.streams_destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_open_after_disconnect_fails() {
    let (soundio, _state) = connected_mock();
    let device = soundio.output_device(0);
    soundio.disconnect();
    let mut stream = device.create_out_stream();
    assert_eq!(stream.open(), Err(SoundIoError::BackendDisconnected));
}

#[test]
fn test_write_cycle_through_dispatch() {
    let (soundio, state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    let granted = Arc::new(Mutex::new(Vec::new()));
    let seen = granted.clone();
    stream.set_write_callback(move |writer, min, max| {
        assert_eq!(writer.channel_count(), 2);
        assert_eq!(writer.format(), Format::FLOAT32NE);

        // Zero request: nothing granted, nothing pending
        let mut zero = 0;
        assert!(writer.begin_write(&mut zero).unwrap().is_none());
        assert_eq!(zero, 0);
        assert_eq!(writer.end_write(), Err(SoundIoError::Invalid));

        let mut frame_count = 256;
        {
            let mut areas = writer.begin_write(&mut frame_count).unwrap().unwrap();
            for frame in 0..areas.frame_count() {
                areas.write_sample(0, frame, 0.25);
                areas.write_sample(1, frame, -0.25);
            }
        }
        let mut again = 1;
        assert_eq!(
            writer.begin_write(&mut again).err(),
            Some(SoundIoError::Invalid)
        );
        writer.end_write().unwrap();
        seen.lock().unwrap().push((min, max, frame_count));
    });
    stream.open().unwrap();
    stream.start().unwrap();

    let mut buffer = VecOutputBuffer::new(Format::FLOAT32NE, 2, 100);
    state.out_dispatch().write(&mut buffer, 10, 100);

    assert_eq!(*granted.lock().unwrap(), vec![(10, 100, 100)]);
    assert_eq!(buffer.committed, 100);
    let first = f32::from_ne_bytes(buffer.data[0..4].try_into().unwrap());
    let second = f32::from_ne_bytes(buffer.data[4..8].try_into().unwrap());
    assert_eq!(first, 0.25);
    assert_eq!(second, -0.25);
}

#[test]
fn test_uncommitted_write_is_discarded() {
    let (soundio, state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    stream.set_write_callback(|writer, _min, _max| {
        let mut frame_count = 8;
        let _ = writer.begin_write(&mut frame_count).unwrap();
    });
    stream.open().unwrap();

    let mut buffer = VecOutputBuffer::new(Format::FLOAT32NE, 2, 16);
    state.out_dispatch().write(&mut buffer, 0, 16);
    assert_eq!(buffer.committed, 0);
}

#[test]
fn test_read_cycle_through_dispatch() {
    let (soundio, state) = connected_mock();
    let mut stream = soundio.input_device(0).create_in_stream();
    stream.set_format(Format::S16NE).unwrap();
    stream.set_sample_rate(44100).unwrap();
    let samples = Arc::new(Mutex::new(Vec::new()));
    let seen = samples.clone();
    stream.set_read_callback(move |reader, _min, max| {
        let mut zero = 0;
        assert!(reader.begin_read(&mut zero).unwrap().is_none());

        let mut frame_count = max;
        {
            let areas = reader.begin_read(&mut frame_count).unwrap().unwrap();
            for frame in 0..areas.frame_count() {
                seen.lock().unwrap().push(areas.read_sample(1, frame));
            }
        }
        reader.end_read().unwrap();
        assert_eq!(reader.end_read(), Err(SoundIoError::Invalid));
    });
    stream.open().unwrap();
    assert_eq!(stream.sample_rate(), Some(44100));

    // Three stereo frames, right channel at full negative scale
    let mut data = Vec::new();
    for _ in 0..3 {
        data.extend_from_slice(&0i16.to_ne_bytes());
        data.extend_from_slice(&i16::MIN.to_ne_bytes());
    }
    let mut buffer = VecInputBuffer::new(Format::S16NE, 2, data);
    state.in_dispatch().read(&mut buffer, 3, 3);

    assert_eq!(buffer.consumed, 3);
    assert_eq!(*samples.lock().unwrap(), vec![-1.0, -1.0, -1.0]);
}

#[test]
fn test_callback_can_replace_itself() {
    let (soundio, state) = connected_mock();
    let mut stream = soundio.output_device(0).create_out_stream();
    let underflows = Arc::new(AtomicUsize::new(0));
    let seen = underflows.clone();
    stream.set_underflow_callback(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    stream.open().unwrap();

    let dispatch = state.out_dispatch();
    dispatch.underflow();
    dispatch.underflow();
    assert_eq!(underflows.load(Ordering::SeqCst), 2);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_seen = errors.clone();
    stream.set_error_callback(move |err| errors_seen.lock().unwrap().push(err));
    dispatch.error(SoundIoError::Streaming);
    assert_eq!(*errors.lock().unwrap(), vec![SoundIoError::Streaming]);
}
