//! Error types for the duplex-audio library

use crate::audio::Direction;
use thiserror::Error;

/// Main error type for duplex-audio operations
#[derive(Error, Debug)]
pub enum Error {
    /// The platform could not report a default input or output device
    #[error(
        "The {0} default device could not be queried. \
         It seems that no sound card is available in the system."
    )]
    NoSoundCard(Direction),

    /// Opening a hardware stream component failed
    #[error("Creating the {direction} stream component failed: {reason}")]
    ComponentOpen {
        /// Which side failed
        direction: Direction,
        /// Backend-provided detail
        reason: String,
    },

    /// The platform rejected assigning a device to a stream
    #[error("Assigning the {direction} device failed: {reason}")]
    DeviceAssignment {
        /// Which side failed
        direction: Direction,
        /// Backend-provided detail
        reason: String,
    },

    /// Installing the stream format or callback failed
    #[error("Installing the {direction} callback or stream format failed: {reason}")]
    CallbackInstall {
        /// Which side failed
        direction: Direction,
        /// Backend-provided detail
        reason: String,
    },

    /// Initializing a hardware stream failed
    #[error("Initialization of the {direction} audio stream failed: {reason}")]
    StreamInit {
        /// Which side failed
        direction: Direction,
        /// Backend-provided detail
        reason: String,
    },

    /// Input and output buffer sizes could not be set to a common value
    #[error(
        "The buffer sizes of the current input and output audio device cannot be set \
         to a common value (input {input} frames, output {output} frames). \
         Please choose other input/output audio devices in your system settings."
    )]
    BufferSizeMismatch {
        /// Frame count the input device settled on
        input: u32,
        /// Frame count the output device reported back
        output: u32,
    },

    /// A pairing index outside the catalog was requested
    #[error("Invalid device index {index} (only {count} devices available)")]
    InvalidDriverIndex {
        /// Requested index
        index: usize,
        /// Number of pairings in the catalog
        count: usize,
    },

    /// Operation not allowed in the current session state
    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Current state name
        state: &'static str,
    },

    /// A zero-sized buffer was requested
    #[error("Invalid buffer size: {0} frames")]
    InvalidBufferSize(u32),

    /// No pairing in the catalog passed capability negotiation
    #[error("No usable sound card found: {0}")]
    NoUsableDevice(String),

    /// Audio backend error
    #[error("Audio backend error: {0}")]
    AudioBackendError(String),

    /// Configuration could not be parsed or serialized
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error leaves the driver layer without a usable device.
    ///
    /// Index and state errors are caller mistakes and leave the current
    /// configuration untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidDriverIndex { .. }
                | Error::InvalidState { .. }
                | Error::InvalidBufferSize(_)
                | Error::Config(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, Error>;
