//! Plays the default input device through the default output device.

use anyhow::{anyhow, Context, Result};
use soundio::{
    best_matching_channel_layout, sort_channel_layouts, Device, EventLoop, Format, RingBuffer,
    SoundIo, SoundIoConfig,
};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const PRIORITIZED_FORMATS: [Format; 13] = [
    Format::FLOAT32NE,
    Format::FLOAT32FE,
    Format::S32NE,
    Format::S32FE,
    Format::S24NE,
    Format::S24FE,
    Format::S16NE,
    Format::S16FE,
    Format::FLOAT64NE,
    Format::FLOAT64FE,
    Format::U32NE,
    Format::U32FE,
    Format::U8,
];

const PRIORITIZED_SAMPLE_RATES: [u32; 4] = [48000, 44100, 96000, 24000];

fn pick_format(input: &Device, output: &Device) -> Option<Format> {
    PRIORITIZED_FORMATS
        .into_iter()
        .find(|f| input.supports_format(*f) && output.supports_format(*f))
}

fn pick_sample_rate(input: &Device, output: &Device) -> Option<u32> {
    PRIORITIZED_SAMPLE_RATES
        .into_iter()
        .find(|r| input.supports_sample_rate(*r) && output.supports_sample_rate(*r))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = SoundIoConfig::from_env()?;
    let latency = config.software_latency.unwrap_or(0.2);

    let soundio = Arc::new(SoundIo::from_config(&config));
    soundio.connect().context("unable to connect to backend")?;
    soundio.flush_events();

    let input = soundio
        .default_input_device_index()
        .map(|i| soundio.input_device(i))
        .ok_or_else(|| anyhow!("no input device"))?;
    let output = soundio
        .default_output_device_index()
        .map(|i| soundio.output_device(i))
        .ok_or_else(|| anyhow!("no output device"))?;
    println!("Input device: {}", input.name());
    println!("Output device: {}", output.name());

    let mut output_layouts = output.layouts().to_vec();
    sort_channel_layouts(&mut output_layouts);
    let layout = best_matching_channel_layout(&output_layouts, input.layouts())
        .cloned()
        .ok_or_else(|| anyhow!("channel layouts not compatible"))?;
    let sample_rate = pick_sample_rate(&input, &output)
        .ok_or_else(|| anyhow!("incompatible sample rates"))?;
    let format = pick_format(&input, &output).ok_or_else(|| anyhow!("incompatible sample formats"))?;
    println!("Layout: {}, rate: {}, format: {}", layout, sample_rate, format);

    let mut in_stream = input.create_in_stream();
    in_stream.set_format(format)?;
    in_stream.set_sample_rate(sample_rate)?;
    in_stream.set_layout(layout.clone())?;
    in_stream.set_software_latency(latency)?;

    let mut out_stream = output.create_out_stream();
    out_stream.set_format(format)?;
    out_stream.set_sample_rate(sample_rate)?;
    out_stream.set_layout(layout.clone())?;
    out_stream.set_software_latency(latency)?;

    let bytes_per_frame = format.bytes_per_frame(layout.channel_count());
    let capacity_frames = (latency * 2.0 * sample_rate as f64).ceil() as usize;
    let ring = RingBuffer::with_frame_alignment(capacity_frames, bytes_per_frame)?;
    let ring_bytes = ring.capacity();
    let (mut producer, mut consumer) = ring.split();

    // Start with one latency's worth of silence
    let prefill_frames = (latency * sample_rate as f64) as usize;
    let silence = {
        let mut bytes = vec![0u8; prefill_frames * bytes_per_frame];
        let mut areas = soundio::ChannelAreasMut::interleaved(
            &mut bytes,
            format,
            layout.channel_count(),
            prefill_frames,
        )?;
        areas.fill_silence();
        bytes
    };
    producer.push(&silence);

    let mut scratch = vec![0u8; ring_bytes];
    in_stream.set_read_callback(move |reader, _frame_count_min, frame_count_max| {
        let free_frames = producer.free_count() / bytes_per_frame;
        let write_frames = frame_count_max.min(free_frames);
        let mut frames_left = write_frames;
        while frames_left > 0 {
            let mut frame_count = frames_left;
            let areas = match reader.begin_read(&mut frame_count) {
                Ok(Some(areas)) => areas,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "begin_read failed");
                    return;
                }
            };
            let copied = areas.copy_interleaved(&mut scratch);
            producer.push(&scratch[..copied]);
            drop(areas);
            if let Err(e) = reader.end_read() {
                warn!(error = %e, "end_read failed");
                return;
            }
            frames_left -= frame_count;
        }
        if write_frames < frame_count_max {
            eprintln!("ring buffer overflow, dropped {} frames", frame_count_max - write_frames);
        }
    });
    in_stream.set_overflow_callback(|| eprintln!("input overflow"));

    let mut staging = vec![0u8; ring_bytes];
    out_stream.set_write_callback(move |writer, frame_count_min, frame_count_max| {
        let fill_frames = consumer.fill_count() / bytes_per_frame;
        let mut frames_left = frame_count_max.min(fill_frames.max(frame_count_min));
        while frames_left > 0 {
            let mut frame_count = frames_left;
            let mut areas = match writer.begin_write(&mut frame_count) {
                Ok(Some(areas)) => areas,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "begin_write failed");
                    return;
                }
            };
            let wanted = frame_count * bytes_per_frame;
            let got = consumer.pop(&mut staging[..wanted]);
            areas.copy_from_interleaved(&staging[..got]);
            if got < wanted {
                // Not enough captured yet; pad the rest with silence
                let frames_got = got / bytes_per_frame;
                for frame in frames_got..frame_count {
                    for ch in 0..areas.channel_count() {
                        areas.write_sample(ch, frame, 0.0);
                    }
                }
            }
            drop(areas);
            if let Err(e) = writer.end_write() {
                warn!(error = %e, "end_write failed");
                return;
            }
            frames_left -= frame_count;
        }
    });
    out_stream.set_underflow_callback(|| eprintln!("output underflow"));

    in_stream.open().context("unable to open input stream")?;
    out_stream.open().context("unable to open output stream")?;
    in_stream.start().context("unable to start input stream")?;
    out_stream.start().context("unable to start output stream")?;

    let event_loop = EventLoop::spawn(soundio.clone());
    println!("Passing audio through; press Ctrl-C to quit");
    tokio::signal::ctrl_c().await?;

    in_stream.destroy();
    out_stream.destroy();
    event_loop.shutdown().await;
    soundio.disconnect();
    Ok(())
}
