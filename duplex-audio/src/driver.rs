//! Sound driver: the device-selection surface exposed to the application

use crate::{
    audio::{BufferDescription, DriverConfig, StreamFormat},
    bridge::SessionStats,
    catalog::{DeviceCatalog, DevicePairing},
    error::{Error, Result},
    hardware::AudioHardware,
    negotiate::CapabilityMismatch,
    session::{SessionState, StreamSession},
};
use std::sync::Arc;

/// Outcome of [`SoundDriver::set_device`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// The requested pairing was loaded
    Loaded(usize),
    /// The requested pairing was unusable and the previous one was selected
    /// and checked again. Its streams are not initialized; call
    /// [`SoundDriver::init`] before starting.
    Restored {
        /// Pairing that is loaded now
        index: usize,
        /// Why the requested pairing was rejected
        reason: String,
    },
    /// The requested pairing was unusable, another pairing was loaded
    /// instead. As with `Restored`, `init` must run before `start`.
    FellBack {
        /// Pairing that is loaded now
        index: usize,
        /// Why the requested pairing was rejected
        reason: String,
    },
}

impl DeviceSelection {
    /// Catalog position of the pairing that ended up loaded
    pub fn index(&self) -> usize {
        match self {
            DeviceSelection::Loaded(index)
            | DeviceSelection::Restored { index, .. }
            | DeviceSelection::FellBack { index, .. } => *index,
        }
    }
}

/// Full-duplex stereo driver over one audio hardware abstraction
pub struct SoundDriver<H: AudioHardware> {
    hardware: Arc<H>,
    config: DriverConfig,
    catalog: DeviceCatalog<H::Device>,
    session: StreamSession<H>,
}

impl<H: AudioHardware> SoundDriver<H> {
    /// Create a driver with default configuration
    pub fn new<F>(hardware: H, process: F) -> Result<Self>
    where
        F: FnMut(&mut [i16]) + Send + 'static,
    {
        Self::builder().build(hardware, process)
    }

    /// Create a driver builder
    pub fn builder() -> SoundDriverBuilder {
        SoundDriverBuilder::default()
    }

    /// Number of selectable pairings, default included
    pub fn driver_count(&self) -> usize {
        self.catalog.len()
    }

    /// Display name of the pairing at `index`
    pub fn driver_name(&self, index: usize) -> Option<&str> {
        self.catalog.name(index)
    }

    /// All pairings in catalog order
    pub fn pairings(&self) -> &[DevicePairing<H::Device>] {
        self.catalog.pairings()
    }

    /// The current catalog
    pub fn catalog(&self) -> &DeviceCatalog<H::Device> {
        &self.catalog
    }

    /// Select the pairing at `index` and negotiate its sample rate.
    ///
    /// `Ok(Some(_))` means the pairing is not usable; the message is meant
    /// for the user, who may pick another pairing.
    pub fn load_driver(&mut self, index: usize) -> Result<Option<CapabilityMismatch>> {
        let pairing = self.catalog.get(index)?.clone();
        self.session.load(index, &pairing)
    }

    fn try_load(&mut self, index: usize) -> std::result::Result<(), String> {
        match self.load_driver(index) {
            Ok(None) => Ok(()),
            Ok(Some(mismatch)) => Err(mismatch.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Load the pairing at `index`, falling back when it is unusable.
    ///
    /// If a device was loaded before, it is restored. Otherwise, when
    /// fallback is enabled, every pairing is tried in catalog order and the
    /// first usable one is loaded.
    pub fn set_device(&mut self, index: usize) -> Result<DeviceSelection> {
        self.catalog.get(index)?;
        let state = self.session.state();
        if matches!(state, SessionState::Running | SessionState::Closed) {
            return Err(Error::InvalidState {
                operation: "change the device",
                state: state.as_str(),
            });
        }

        let previous = self.session.current_index();

        let reason = match self.try_load(index) {
            Ok(()) => return Ok(DeviceSelection::Loaded(index)),
            Err(reason) => reason,
        };

        if let Some(previous) = previous.filter(|&previous| previous != index) {
            if self.try_load(previous).is_ok() {
                return Ok(DeviceSelection::Restored {
                    index: previous,
                    reason,
                });
            }
        }

        if !self.config.fallback_to_any_device {
            return Err(Error::NoUsableDevice(reason));
        }

        let mut messages = vec![format!("{}: {}", self.describe(index), reason)];
        for candidate in (0..self.catalog.len()).filter(|&candidate| candidate != index) {
            match self.try_load(candidate) {
                Ok(()) => {
                    log::info!(
                        "Fell back to device '{}' after '{}' failed",
                        self.describe(candidate),
                        self.describe(index)
                    );
                    return Ok(DeviceSelection::FellBack {
                        index: candidate,
                        reason,
                    });
                }
                Err(message) => messages.push(format!("{}: {}", self.describe(candidate), message)),
            }
        }

        Err(Error::NoUsableDevice(messages.join("\n")))
    }

    fn describe(&self, index: usize) -> String {
        self.catalog.name(index).unwrap_or_default().to_string()
    }

    /// Rebuild the catalog from the current hardware state.
    ///
    /// Probing uses its own units, so the loaded pairing stays bound. It
    /// keeps its selection when a pairing with the same name still exists,
    /// and is unloaded otherwise.
    pub fn rescan(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Running {
            return Err(Error::InvalidState {
                operation: "rescan devices",
                state: SessionState::Running.as_str(),
            });
        }

        let catalog = DeviceCatalog::build(self.hardware.as_ref(), self.config.max_pairings)?;
        let loaded = self
            .session
            .current_index()
            .and_then(|index| self.catalog.name(index))
            .map(str::to_string);

        self.catalog = catalog;

        if let Some(name) = loaded {
            match self.catalog.position(&name) {
                Some(index) => self.session.set_current_index(index),
                None => {
                    log::info!("Device '{}' disappeared, unloading it", name);
                    self.session.unload()?;
                }
            }
        }
        Ok(())
    }

    /// Catalog position of the loaded pairing
    pub fn current_device(&self) -> Option<usize> {
        self.session.current_index()
    }

    /// Negotiate buffers and prepare streams; returns the mono frame count in use
    pub fn init(&mut self, preferred_mono_frames: u32) -> Result<u32> {
        self.session.init(preferred_mono_frames)
    }

    /// `init` with the configured preferred buffer size
    pub fn init_default(&mut self) -> Result<u32> {
        self.init(self.config.preferred_buffer_frames)
    }

    /// Start both streams
    pub fn start(&mut self) -> Result<()> {
        self.session.start()
    }

    /// Stop both streams
    pub fn stop(&mut self) -> Result<()> {
        self.session.stop()
    }

    /// Release both streams
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Whether the streams are running
    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Session lifecycle state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Negotiated mono frame count
    pub fn mono_buffer_frames(&self) -> u32 {
        self.session.mono_buffer_frames()
    }

    /// Interleaved samples per block
    pub fn stereo_buffer_len(&self) -> usize {
        self.session.stereo_buffer_len()
    }

    /// How the intermediate buffer is described to the hardware
    pub fn buffer_description(&self) -> BufferDescription {
        self.session.buffer_description()
    }

    /// Callback counters
    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    /// The session, for inspection
    pub fn session(&self) -> &StreamSession<H> {
        &self.session
    }

    /// The fixed stream format
    pub fn format(&self) -> StreamFormat {
        self.session.format()
    }

    /// Driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Backend name
    pub fn backend_name(&self) -> &str {
        self.hardware.backend_name()
    }
}

/// Builder for driver configuration
#[derive(Debug, Clone, Default)]
pub struct SoundDriverBuilder {
    config: DriverConfig,
}

impl SoundDriverBuilder {
    /// Replace the whole configuration
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the mandated sample rate
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.config.sample_rate = rate;
        self
    }

    /// Set the preferred mono buffer size
    pub fn preferred_buffer_frames(mut self, frames: u32) -> Self {
        self.config.preferred_buffer_frames = frames;
        self
    }

    /// Set the catalog bound
    pub fn max_pairings(mut self, max: usize) -> Self {
        self.config.max_pairings = max;
        self
    }

    /// Enable or disable trying other pairings in `set_device`
    pub fn fallback_to_any_device(mut self, enabled: bool) -> Self {
        self.config.fallback_to_any_device = enabled;
        self
    }

    /// Build the catalog and open the session
    pub fn build<H, F>(self, hardware: H, process: F) -> Result<SoundDriver<H>>
    where
        H: AudioHardware,
        F: FnMut(&mut [i16]) + Send + 'static,
    {
        let hardware = Arc::new(hardware);
        let catalog = DeviceCatalog::build(hardware.as_ref(), self.config.max_pairings)?;
        log::info!(
            "{}: {} device pairings available",
            hardware.backend_name(),
            catalog.len()
        );

        let session = StreamSession::open(
            Arc::clone(&hardware),
            self.config.format(),
            Box::new(process),
        )?;

        Ok(SoundDriver {
            hardware,
            config: self.config,
            catalog,
            session,
        })
    }
}
