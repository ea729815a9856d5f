mod errors;
mod settings;

use duplex_audio::prelude::*;
use errors::{MonitorError, Result};
use settings::MonitorSettings;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
struct Args {
    list: bool,
    device: Option<usize>,
    buffer_frames: Option<u32>,
    seconds: Option<u64>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .ok_or_else(|| MonitorError::InvalidArgument(format!("{} needs a value", name)))
        };
        match arg.as_str() {
            "--list" | "-l" => args.list = true,
            "--device" | "-d" => args.device = Some(parse_number(&value("--device")?)?),
            "--buffer" | "-b" => args.buffer_frames = Some(parse_number(&value("--buffer")?)?),
            "--seconds" | "-s" => args.seconds = Some(parse_number(&value("--seconds")?)?),
            other => return Err(MonitorError::InvalidArgument(other.to_string())),
        }
    }
    Ok(args)
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MonitorError::InvalidArgument(format!("not a number: {}", value)))
}

fn print_pairings<H: AudioHardware>(driver: &SoundDriver<H>) {
    println!("{} device pairings ({}):", driver.driver_count(), driver.backend_name());
    for index in 0..driver.driver_count() {
        let marker = if driver.current_device() == Some(index) {
            "*"
        } else {
            " "
        };
        println!(
            " {} {:3}. {}",
            marker,
            index,
            driver.driver_name(index).unwrap_or_default()
        );
    }
}

fn run(args: Args) -> Result<()> {
    let settings_path = match MonitorSettings::default_path() {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Settings will not be persisted: {}", e);
            None
        }
    };
    let mut settings = match &settings_path {
        Some(path) => MonitorSettings::load(path).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable settings: {}", e);
            MonitorSettings::default()
        }),
        None => MonitorSettings::default(),
    };

    let peak = Arc::new(AtomicU32::new(0));
    let meter = Arc::clone(&peak);
    let mut driver = SoundDriver::<CpalBackend>::builder()
        .config(settings.driver.clone())
        .build(CpalBackend::new()?, move |block: &mut [i16]| {
            let block_peak = block
                .iter()
                .map(|sample| sample.unsigned_abs() as u32)
                .max()
                .unwrap_or(0);
            meter.fetch_max(block_peak, Ordering::Relaxed);
        })?;

    if args.list {
        print_pairings(&driver);
        return Ok(());
    }

    let requested = args
        .device
        .or_else(|| {
            settings
                .device
                .as_deref()
                .and_then(|name| driver.catalog().position(name))
        })
        .unwrap_or(0);

    let selection = driver.set_device(requested)?;
    match &selection {
        DeviceSelection::Loaded(_) => {}
        DeviceSelection::Restored { reason, .. } | DeviceSelection::FellBack { reason, .. } => {
            println!("Requested device is not usable:\n{}", reason);
        }
    }
    let name = driver
        .driver_name(selection.index())
        .ok_or_else(|| MonitorError::DeviceNotUsable(format!("index {}", selection.index())))?
        .to_string();
    println!("Device: {}", name);

    let frames = match args.buffer_frames {
        Some(frames) => driver.init(frames)?,
        None => driver.init_default()?,
    };
    let latency_ms = frames as f64 * 1000.0 / driver.format().sample_rate as f64;
    println!("Buffer: {} frames ({:.1} ms)", frames, latency_ms);

    let seconds = args.seconds.unwrap_or(settings.run_seconds);
    driver.start()?;
    println!("Monitoring for {} s...", seconds);
    thread::sleep(Duration::from_secs(seconds));
    driver.stop()?;

    let stats = driver.stats();
    println!(
        "Input blocks: {}  Output blocks: {}  Overloads: {}",
        stats.input_callbacks, stats.output_callbacks, stats.overloads
    );
    let peak = peak.load(Ordering::Relaxed) as f64 / i16::MAX as f64;
    if peak > 0.0 {
        println!("Input peak: {:.1} dBFS", 20.0 * peak.log10());
    } else {
        println!("Input peak: silence");
    }

    driver.close()?;

    settings.device = Some(name);
    if let Some(path) = &settings_path {
        settings.save(path)?;
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let result = parse_args().and_then(run);
    if let Err(e) = result {
        eprintln!("duplex-monitor: {}", e);
        if matches!(&e, MonitorError::Driver(inner) if inner.is_fatal()) {
            eprintln!("Check your audio devices in the system settings.");
        }
        std::process::exit(1);
    }
}
