//! # duplex-audio
//!
//! A low-latency, full-duplex stereo audio driver layer.
//!
//! The driver enumerates every usable (input device, output device)
//! pairing, forces the hardware to a single mandated sample rate, brings
//! input and output to a common buffer size and then shuttles fixed-size
//! interleaved 16-bit stereo blocks between the two hardware callback
//! threads and one application processing callback.
//!
//! ## Quick Start
//!
//! ```no_run
//! use duplex_audio::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! // Pass input straight through to the output
//! let mut driver = SoundDriver::new(CpalBackend::new()?, |_block: &mut [i16]| {})?;
//!
//! for index in 0..driver.driver_count() {
//!     println!("{}: {}", index, driver.driver_name(index).unwrap_or_default());
//! }
//!
//! // Pairing 0 is always the system default input and output
//! driver.set_device(0)?;
//! let frames = driver.init(256)?;
//! println!("running with {} frames per block", frames);
//!
//! driver.start()?;
//! driver.stop()?;
//! driver.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod audio;
pub mod bridge;
pub mod catalog;
pub mod driver;
pub mod error;
pub mod hardware;
pub mod negotiate;
pub mod session;

pub mod backends;

pub use audio::{
    BufferDescription, Direction, DriverConfig, StreamFormat, MAX_NUMBER_SOUND_CARDS,
    SYSTEM_SAMPLE_RATE_HZ,
};
pub use bridge::{CallbackBridge, ProcessCallback, SessionStats};
pub use catalog::{Device, DeviceCatalog, DevicePairing, DEFAULT_PAIRING_NAME};
pub use driver::{DeviceSelection, SoundDriver, SoundDriverBuilder};
pub use error::{Error, Result};
pub use hardware::{AudioHardware, OverloadListener, StreamUnit, UnitCallback};
pub use negotiate::CapabilityMismatch;
pub use session::{SessionState, StreamSession};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        audio::{Direction, DriverConfig, StreamFormat},
        catalog::DevicePairing,
        driver::{DeviceSelection, SoundDriver, SoundDriverBuilder},
        error::{Error, Result},
        hardware::{AudioHardware, StreamUnit},
        negotiate::CapabilityMismatch,
        session::SessionState,
    };

    #[cfg(feature = "cpal-backend")]
    pub use crate::backends::CpalBackend;
}
