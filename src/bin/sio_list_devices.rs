use anyhow::{bail, Context, Result};
use soundio::{Backend, Device, EventLoop, SoundIo, SoundIoConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Args {
    backend: Option<Backend>,
    short: bool,
    watch: bool,
}

fn usage() -> ! {
    eprintln!("Usage: sio_list_devices [--backend dummy|alsa|pulseaudio|jack|coreaudio|wasapi] [--short] [--watch]");
    std::process::exit(1);
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        backend: None,
        short: false,
        watch: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--backend" => {
                let value = iter.next().unwrap_or_else(|| usage());
                args.backend = Backend::parse_selection(&value)?;
            }
            "--short" => args.short = true,
            "--watch" => args.watch = true,
            _ => usage(),
        }
    }
    Ok(args)
}

fn print_device(device: &Device, is_default: bool, short: bool) {
    let default_str = if is_default { " (default)" } else { "" };
    let raw_str = if device.is_raw() { " (raw)" } else { "" };
    if short {
        println!("{}{}{}", device.name(), default_str, raw_str);
        return;
    }

    println!("{}{}{}", device.name(), default_str, raw_str);
    println!("  id: {}", device.id());
    if let Some(err) = device.probe_error() {
        println!("  probe error: {}", err);
        println!();
        return;
    }

    println!("  channel layouts:");
    for layout in device.layouts() {
        println!("    {}", layout);
    }
    println!("  current layout: {}", device.current_layout());

    println!("  sample rates:");
    for range in device.sample_rates() {
        println!("    {} - {}", range.min, range.max);
    }
    if device.sample_rate_current() > 0 {
        println!("  current sample rate: {}", device.sample_rate_current());
    }

    let formats: Vec<&str> = device.formats().iter().map(|f| f.name()).collect();
    println!("  formats: {}", formats.join(", "));
    println!("  current format: {}", device.current_format());

    println!(
        "  min software latency: {:.8} sec",
        device.software_latency_min()
    );
    println!(
        "  max software latency: {:.8} sec",
        device.software_latency_max()
    );
    if device.software_latency_current() > 0.0 {
        println!(
            "  current software latency: {:.8} sec",
            device.software_latency_current()
        );
    }
    println!();
}

fn list_devices(soundio: &SoundIo, short: bool) {
    let default_output = soundio.default_output_device_index();
    let default_input = soundio.default_input_device_index();
    let output_count = soundio.output_device_count().unwrap_or(0);
    let input_count = soundio.input_device_count().unwrap_or(0);

    println!("--------Input Devices--------\n");
    for i in 0..input_count {
        print_device(&soundio.input_device(i), default_input == Some(i), short);
    }
    println!("\n--------Output Devices--------\n");
    for i in 0..output_count {
        print_device(&soundio.output_device(i), default_output == Some(i), short);
    }
    println!("\n{} devices found", input_count + output_count);
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
    let short = args.short;

    let soundio = Arc::new(
        SoundIo::builder()
            .config(&config)
            .on_devices_change(move |soundio| {
                println!("devices changed");
                list_devices(soundio, short);
            })
            .build(),
    );
    soundio.connect().context("unable to connect to backend")?;
    println!("backend: {}", soundio.current_backend().map_or("none", |b| b.name()));

    if !args.watch {
        soundio.flush_events();
        if soundio.output_device_count().is_none() {
            bail!("device list unavailable");
        }
        return Ok(());
    }

    let event_loop = EventLoop::spawn(soundio.clone());
    tokio::signal::ctrl_c().await?;
    event_loop.shutdown().await;
    soundio.disconnect();
    Ok(())
}
