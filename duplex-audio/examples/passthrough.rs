//! Routes the default input to the default output for a few seconds,
//! attenuated by 6 dB

use duplex_audio::prelude::*;
use std::thread;
use std::time::Duration;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut driver = SoundDriver::new(CpalBackend::new()?, |block: &mut [i16]| {
        for sample in block.iter_mut() {
            *sample /= 2;
        }
    })?;

    let selection = driver.set_device(0)?;
    if let DeviceSelection::FellBack { reason, .. } | DeviceSelection::Restored { reason, .. } =
        &selection
    {
        println!("Default devices unusable: {}", reason);
    }
    println!(
        "Using: {}",
        driver.driver_name(selection.index()).unwrap_or_default()
    );

    let frames = driver.init(256)?;
    println!("Buffer: {} frames ({} samples per block)", frames, driver.stereo_buffer_len());

    driver.start()?;
    println!("Passing audio through for 5 seconds...");
    thread::sleep(Duration::from_secs(5));
    driver.stop()?;

    let stats = driver.stats();
    println!(
        "Input callbacks: {}, output callbacks: {}, overloads: {}",
        stats.input_callbacks, stats.output_callbacks, stats.overloads
    );

    driver.close()?;
    Ok(())
}
