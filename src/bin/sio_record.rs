//! Records raw interleaved PCM from an input device to a file.

use anyhow::{anyhow, bail, Context, Result};
use soundio::{Backend, EventLoop, Format, RingBuffer, SoundIo, SoundIoConfig};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PRIORITIZED_FORMATS: [Format; 7] = [
    Format::FLOAT32NE,
    Format::S32NE,
    Format::S24NE,
    Format::S16NE,
    Format::FLOAT64NE,
    Format::U32NE,
    Format::U8,
];

const PRIORITIZED_SAMPLE_RATES: [u32; 4] = [48000, 44100, 96000, 24000];

struct Args {
    backend: Option<Backend>,
    device: Option<String>,
    raw: bool,
    seconds: Option<f64>,
    path: PathBuf,
}

fn usage() -> ! {
    eprintln!(
        "Usage: sio_record [--backend dummy|alsa|pulseaudio|jack|coreaudio|wasapi] \
         [--device id] [--raw] [--seconds n] outfile"
    );
    std::process::exit(1);
}

fn parse_args() -> Result<Args> {
    let mut backend = None;
    let mut device = None;
    let mut raw = false;
    let mut seconds = None;
    let mut path = None;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--raw" => raw = true,
            "--backend" => backend = Backend::parse_selection(&iter.next().unwrap_or_else(|| usage()))?,
            "--device" => device = Some(iter.next().unwrap_or_else(|| usage())),
            "--seconds" => {
                let value = iter.next().unwrap_or_else(|| usage());
                seconds = Some(value.parse().context("bad --seconds")?);
            }
            other if !other.starts_with("--") && path.is_none() => path = Some(PathBuf::from(other)),
            _ => usage(),
        }
    }
    Ok(Args {
        backend,
        device,
        raw,
        seconds,
        path: path.unwrap_or_else(|| usage()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = parse_args()?;
    let mut config = SoundIoConfig::from_env()?;
    if args.backend.is_some() {
        config.backend = args.backend;
    }

    let soundio = Arc::new(SoundIo::from_config(&config));
    soundio.connect().context("unable to connect to backend")?;
    soundio.flush_events();

    let count = soundio
        .input_device_count()
        .ok_or_else(|| anyhow!("device list unavailable"))?;
    let device = match &args.device {
        Some(id) => (0..count)
            .map(|i| soundio.input_device(i))
            .find(|d| d.id() == id && d.is_raw() == args.raw)
            .ok_or_else(|| anyhow!("invalid input device id: {}", id))?,
        None => {
            let index = soundio
                .default_input_device_index()
                .ok_or_else(|| anyhow!("no input device available"))?;
            soundio.input_device(index)
        }
    };
    println!("Device: {}", device.name());
    if let Some(err) = device.probe_error() {
        bail!("unable to probe device: {}", err);
    }

    let format = PRIORITIZED_FORMATS
        .into_iter()
        .find(|f| device.supports_format(*f))
        .ok_or_else(|| anyhow!("no suitable sample format"))?;
    let sample_rate = PRIORITIZED_SAMPLE_RATES
        .into_iter()
        .find(|r| device.supports_sample_rate(*r))
        .or_else(|| device.nearest_sample_rate(48000))
        .ok_or_else(|| anyhow!("no suitable sample rate"))?;

    let mut stream = device.create_in_stream();
    stream.set_format(format)?;
    stream.set_sample_rate(sample_rate)?;
    if let Some(latency) = config.software_latency {
        stream.set_software_latency(latency)?;
    }

    let channel_count = device.current_layout().channel_count().max(1);
    let bytes_per_frame = format.bytes_per_frame(channel_count);
    // Room for 30 seconds between drains
    let ring = RingBuffer::new(30 * sample_rate as usize * bytes_per_frame)?;
    let ring_bytes = ring.capacity();
    let (mut producer, mut consumer) = ring.split();

    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_frames = dropped.clone();
    let mut scratch = vec![0u8; ring_bytes];
    stream.set_read_callback(move |reader, _frame_count_min, frame_count_max| {
        let bpf = reader.bytes_per_frame();
        let free_frames = producer.free_count() / bpf;
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
            dropped_frames.fetch_add((frame_count_max - write_frames) as u64, Ordering::Relaxed);
        }
    });
    stream.set_overflow_callback(|| eprintln!("overflow"));

    stream.open().context("unable to open input stream")?;
    info!(
        format = %format,
        sample_rate,
        layout = %stream.layout().map(|l| l.to_string()).unwrap_or_default(),
        "recording"
    );
    stream.start().context("unable to start input stream")?;

    let mut out = File::create(&args.path)
        .with_context(|| format!("unable to open {}", args.path.display()))?;
    let event_loop = EventLoop::spawn(soundio.clone());
    println!("Recording to {}; press Ctrl-C to stop", args.path.display());

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let deadline = args
        .seconds
        .map(|s| tokio::time::Instant::now() + Duration::from_secs_f64(s));
    let mut written = 0u64;
    let mut drain = vec![0u8; ring_bytes];
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let n = consumer.pop(&mut drain);
                out.write_all(&drain[..n])?;
                written += n as u64;
                if deadline.map_or(false, |d| tokio::time::Instant::now() >= d) {
                    break;
                }
            }
        }
    }

    stream.destroy();
    let n = consumer.pop(&mut drain);
    out.write_all(&drain[..n])?;
    written += n as u64;
    out.flush()?;

    println!(
        "Wrote {} frames, dropped {}",
        written / bytes_per_frame as u64,
        dropped.load(Ordering::Relaxed)
    );
    event_loop.shutdown().await;
    soundio.disconnect();
    Ok(())
}
