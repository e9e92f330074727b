use anyhow::{anyhow, Context, Result};
use soundio::{Backend, EventLoop, SoundIo, SoundIoConfig, SoundIoError};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Args {
    backend: Option<Backend>,
    device: Option<String>,
    raw: bool,
    latency: Option<f64>,
    rate: Option<u32>,
}

fn usage() -> ! {
    eprintln!(
        "Usage: sio_sine [--backend dummy|alsa|pulseaudio|jack|coreaudio|wasapi] \
         [--device id] [--raw] [--latency seconds] [--rate sample_rate]"
    );
    std::process::exit(1);
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        backend: None,
        device: None,
        raw: false,
        latency: None,
        rate: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--raw" => args.raw = true,
            "--backend" | "--device" | "--latency" | "--rate" => {
                let value = iter.next().unwrap_or_else(|| usage());
                match arg.as_str() {
                    "--backend" => args.backend = Backend::parse_selection(&value)?,
                    "--device" => args.device = Some(value),
                    "--latency" => args.latency = Some(value.parse().context("bad --latency")?),
                    _ => args.rate = Some(value.parse().context("bad --rate")?),
                }
            }
            _ => usage(),
        }
    }
    Ok(args)
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
    info!(backend = ?soundio.current_backend(), "connected");

    let count = soundio
        .output_device_count()
        .ok_or_else(|| anyhow!("device list unavailable"))?;
    let device = match &args.device {
        Some(id) => (0..count)
            .map(|i| soundio.output_device(i))
            .find(|d| d.id() == id && d.is_raw() == args.raw)
            .ok_or_else(|| anyhow!("invalid output device id: {}", id))?,
        None => {
            let index = soundio
                .default_output_device_index()
                .ok_or_else(|| anyhow!("no output device available"))?;
            soundio.output_device(index)
        }
    };
    println!("Output device: {}", device.name());
    if let Some(err) = device.probe_error() {
        return Err(anyhow!("cannot probe device: {}", err));
    }

    let mut stream = device.create_out_stream();
    if let Some(rate) = args.rate.or(config.sample_rate) {
        stream.set_sample_rate(rate)?;
    }
    if let Some(latency) = args.latency.or(config.software_latency) {
        stream.set_software_latency(latency)?;
    }

    let mut phase = 0.0f64;
    stream.set_write_callback(move |writer, _frame_count_min, frame_count_max| {
        let pitch = 440.0;
        let delta = 2.0 * PI * pitch / writer.sample_rate() as f64;
        let mut frames_left = frame_count_max;
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
            for frame in 0..frame_count {
                let sample = (phase + frame as f64 * delta).sin() * 0.5;
                for ch in 0..areas.channel_count() {
                    areas.write_sample(ch, frame, sample);
                }
            }
            phase = (phase + frame_count as f64 * delta) % (2.0 * PI);
            drop(areas);
            if let Err(e) = writer.end_write() {
                warn!(error = %e, "end_write failed");
                return;
            }
            frames_left -= frame_count;
        }
    });
    let mut underflows = 0u64;
    stream.set_underflow_callback(move || {
        underflows += 1;
        eprintln!("underflow {}", underflows);
    });

    stream.open().context("unable to open device")?;
    if let Some(err) = stream.layout_error() {
        eprintln!("unable to set channel layout: {}", err);
    }
    println!(
        "Software latency: {:.6}, format {}, rate {}",
        stream.software_latency().unwrap_or(0.0),
        stream.format().map_or("unknown", |f| f.name()),
        stream.sample_rate().unwrap_or(0)
    );
    stream.start().context("unable to start stream")?;

    let event_loop = EventLoop::spawn(soundio.clone());
    println!("Playing; press Ctrl-C to quit");
    tokio::signal::ctrl_c().await?;

    match stream.latency() {
        Ok(latency) => info!(latency, "final latency"),
        Err(SoundIoError::BackendDisconnected) => warn!("backend went away"),
        Err(e) => warn!(error = %e, "latency unavailable"),
    }
    stream.destroy();
    event_loop.shutdown().await;
    soundio.disconnect();
    Ok(())
}
