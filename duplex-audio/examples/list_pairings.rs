//! Lists every input/output pairing and checks which ones can run at 48 kHz

use duplex_audio::prelude::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Duplex Audio Device Pairings");
    println!("============================\n");

    let mut driver = SoundDriver::new(CpalBackend::new()?, |_block: &mut [i16]| {})?;
    println!(
        "Backend: {} ({} pairings)\n",
        driver.backend_name(),
        driver.driver_count()
    );

    for index in 0..driver.driver_count() {
        let name = driver.driver_name(index).unwrap_or_default().to_string();
        match driver.load_driver(index) {
            Ok(None) => println!("  {:3}. {}  [ok]", index, name),
            Ok(Some(mismatch)) => println!("  {:3}. {}  [{} Hz]", index, name, mismatch.actual_rate),
            Err(e) => println!("  {:3}. {}  [error: {}]", index, name, e),
        }
    }

    driver.close()?;
    Ok(())
}
