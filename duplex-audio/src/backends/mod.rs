//! Audio hardware implementations

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{CpalBackend, CpalDevice, CpalUnit};
