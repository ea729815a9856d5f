//! Stream session: owns the live input/output units, negotiates the buffer
//! size and drives the start/stop lifecycle

use crate::{
    audio::{BufferDescription, Direction, StreamFormat},
    bridge::{CallbackBridge, ProcessCallback, SessionStats},
    catalog::DevicePairing,
    error::{Error, Result},
    hardware::{AudioHardware, StreamUnit, UnitCallback},
    negotiate::{self, CapabilityMismatch},
};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device bound yet
    Uninitialized,
    /// Devices bound to the units, capabilities not (or not successfully) checked
    DeviceSelected,
    /// Pairing passed negotiation and can be initialized
    CapabilitiesChecked,
    /// Buffers allocated and streams prepared
    Initialized,
    /// Callbacks are being invoked
    Running,
    /// Stopped after running, can be restarted or re-initialized
    Stopped,
    /// Units released, terminal
    Closed,
}

impl SessionState {
    /// Lower-case state name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::DeviceSelected => "device selected",
            SessionState::CapabilitiesChecked => "capabilities checked",
            SessionState::Initialized => "initialized",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping shared by every driver layer, independent of the hardware
#[derive(Debug, Clone)]
pub struct SessionBase {
    driver_name: String,
    running: bool,
    mono_buffer_frames: u32,
}

impl SessionBase {
    fn new(driver_name: &str) -> Self {
        Self {
            driver_name: driver_name.to_string(),
            running: false,
            mono_buffer_frames: 0,
        }
    }

    fn init(&mut self, mono_buffer_frames: u32) {
        self.mono_buffer_frames = mono_buffer_frames;
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    /// Backend name the session was opened with
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Whether the streams are running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Mono buffer size handed to the base at the last init
    pub fn mono_buffer_frames(&self) -> u32 {
        self.mono_buffer_frames
    }
}

/// Request a buffer size and return what the device actually uses.
///
/// The device may clamp or round the request, so callers must use the
/// returned value.
pub fn set_buffer_size<H: AudioHardware>(
    hardware: &H,
    device: &H::Device,
    direction: Direction,
    preferred_frames: u32,
) -> Result<u32> {
    if let Err(e) = hardware.set_buffer_frame_size(device, direction, preferred_frames) {
        log::debug!(
            "{} buffer size request of {} frames rejected: {}",
            direction,
            preferred_frames,
            e
        );
    }

    hardware.buffer_frame_size(device, direction)
}

/// Bring input and output to a common buffer size.
///
/// The input is asked first. If it honours `preferred_frames` the output
/// must honour it too; if it clamps the request, the output is asked for
/// the input's value instead. There is a single retry and the input is
/// authoritative.
pub fn reconcile_buffer_sizes<H: AudioHardware>(
    hardware: &H,
    input: &H::Device,
    output: &H::Device,
    preferred_frames: u32,
) -> Result<u32> {
    if preferred_frames == 0 {
        return Err(Error::InvalidBufferSize(preferred_frames));
    }

    let actual = set_buffer_size(hardware, input, Direction::Input, preferred_frames)?;
    if actual == 0 {
        return Err(Error::AudioBackendError(
            "input device reported a buffer size of 0 frames".to_string(),
        ));
    }

    let output_target = if actual == preferred_frames {
        preferred_frames
    } else {
        log::info!(
            "Input device clamped buffer size {} -> {}, steering output to {}",
            preferred_frames,
            actual,
            actual
        );
        actual
    };

    let output_actual = set_buffer_size(hardware, output, Direction::Output, output_target)?;
    if output_actual != output_target {
        return Err(Error::BufferSizeMismatch {
            input: actual,
            output: output_actual,
        });
    }

    Ok(actual)
}

/// The live session: two units, the loaded pairing and the callback bridge
pub struct StreamSession<H: AudioHardware> {
    hardware: Arc<H>,
    format: StreamFormat,
    input_unit: Option<H::Unit>,
    output_unit: Option<H::Unit>,
    pairing: Option<DevicePairing<H::Device>>,
    current_index: Option<usize>,
    overload_devices: Vec<H::Device>,
    state: SessionState,
    units_initialized: bool,
    mono_buffer_frames: u32,
    bridge: CallbackBridge,
    base: SessionBase,
}

impl<H: AudioHardware> StreamSession<H> {
    /// Open the live input and output units
    pub fn open(hardware: Arc<H>, format: StreamFormat, process: ProcessCallback) -> Result<Self> {
        let open = |direction| {
            hardware
                .open_unit(direction)
                .map_err(|e| Error::ComponentOpen {
                    direction,
                    reason: e.to_string(),
                })
        };
        let input_unit = open(Direction::Input)?;
        let output_unit = open(Direction::Output)?;
        let base = SessionBase::new(hardware.backend_name());

        Ok(Self {
            hardware,
            format,
            input_unit: Some(input_unit),
            output_unit: Some(output_unit),
            pairing: None,
            current_index: None,
            overload_devices: Vec::new(),
            state: SessionState::Uninitialized,
            units_initialized: false,
            mono_buffer_frames: 0,
            bridge: CallbackBridge::new(process),
            base,
        })
    }

    fn ensure(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn units(&mut self) -> Result<(&mut H::Unit, &mut H::Unit)> {
        match (self.input_unit.as_mut(), self.output_unit.as_mut()) {
            (Some(input), Some(output)) => Ok((input, output)),
            _ => Err(Error::InvalidState {
                operation: "use the stream units",
                state: SessionState::Closed.as_str(),
            }),
        }
    }

    fn uninitialize_units(&mut self) {
        if !self.units_initialized {
            return;
        }
        for unit in [self.input_unit.as_mut(), self.output_unit.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = unit.uninitialize() {
                log::warn!("Uninitializing {} unit failed: {}", unit.direction(), e);
            }
        }
        self.units_initialized = false;
    }

    /// Bind the pairing's devices to the live units
    pub fn select_pairing(&mut self, pairing: &DevicePairing<H::Device>) -> Result<()> {
        use SessionState::*;
        self.ensure(
            "select a device",
            &[Uninitialized, DeviceSelected, CapabilitiesChecked, Initialized, Stopped],
        )?;

        self.uninitialize_units();
        self.current_index = None;
        self.bridge.set_active_overload_slot(None);
        self.pairing = None;
        self.state = Uninitialized;

        let (input, output) = self.units()?;
        negotiate::select_pairing(input, output, pairing)?;

        self.pairing = Some(pairing.clone());
        self.state = DeviceSelected;
        Ok(())
    }

    /// Check both sides of the selected pairing against the mandated rate
    pub fn check_capabilities(&mut self) -> Result<Option<CapabilityMismatch>> {
        use SessionState::*;
        self.ensure("check capabilities", &[DeviceSelected, CapabilitiesChecked])?;

        let pairing = self.pairing.clone().ok_or(Error::InvalidState {
            operation: "check capabilities",
            state: Uninitialized.as_str(),
        })?;
        let (Some(input), Some(output)) = (self.input_unit.as_ref(), self.output_unit.as_ref())
        else {
            return Err(Error::InvalidState {
                operation: "check capabilities",
                state: Closed.as_str(),
            });
        };

        let mismatch = negotiate::check_capabilities(
            self.hardware.as_ref(),
            input,
            output,
            &pairing,
            self.format.sample_rate,
        )?;

        self.state = if mismatch.is_none() {
            CapabilitiesChecked
        } else {
            DeviceSelected
        };
        Ok(mismatch)
    }

    /// Select and check the pairing at catalog position `index`.
    ///
    /// On success the pairing becomes the current device and the overload
    /// hook is installed on its input device. On a mismatch no device is
    /// loaded afterwards.
    pub fn load(
        &mut self,
        index: usize,
        pairing: &DevicePairing<H::Device>,
    ) -> Result<Option<CapabilityMismatch>> {
        self.select_pairing(pairing)?;

        if let Some(mismatch) = self.check_capabilities()? {
            log::warn!("Device '{}' is not usable: {}", pairing.name, mismatch);
            return Ok(Some(mismatch));
        }

        self.current_index = Some(index);
        self.install_overload_listener(&pairing.input.id);
        log::info!("Loaded device '{}'", pairing.name);
        Ok(None)
    }

    // One listener per input device for the lifetime of the session; only
    // the loaded device's slot counts. Output notifications duplicate input.
    fn install_overload_listener(&mut self, device: &H::Device) {
        if let Some(slot) = self.overload_devices.iter().position(|known| known == device) {
            self.bridge.set_active_overload_slot(Some(slot));
            return;
        }

        let slot = self.overload_devices.len();
        match self
            .hardware
            .add_overload_listener(device, self.bridge.overload_listener(slot))
        {
            Ok(()) => {
                self.overload_devices.push(device.clone());
                self.bridge.set_active_overload_slot(Some(slot));
            }
            Err(e) => log::warn!("Installing overload listener failed: {}", e),
        }
    }

    /// Negotiate the buffer size, allocate the intermediate buffer and
    /// prepare both streams. Returns the mono frame count actually used.
    pub fn init(&mut self, preferred_mono_frames: u32) -> Result<u32> {
        use SessionState::*;
        self.ensure("initialize", &[CapabilitiesChecked, Initialized, Stopped])?;

        let pairing = self.pairing.clone().ok_or(Error::InvalidState {
            operation: "initialize",
            state: Uninitialized.as_str(),
        })?;

        self.uninitialize_units();
        self.state = CapabilitiesChecked;

        let mono_frames = reconcile_buffer_sizes(
            self.hardware.as_ref(),
            &pairing.input.id,
            &pairing.output.id,
            preferred_mono_frames,
        )?;

        self.mono_buffer_frames = mono_frames;
        self.base.init(mono_frames);
        self.bridge.resize(self.format.stereo_len(mono_frames));

        let format = self.format;
        let description = BufferDescription::for_frames(&format, mono_frames);
        let capture = UnitCallback::Capture(self.bridge.capture_callback());
        let render = UnitCallback::Render(self.bridge.render_callback());

        let (input, output) = self.units()?;
        input
            .initialize(format, description, capture)
            .map_err(|e| Error::StreamInit {
                direction: Direction::Input,
                reason: e.to_string(),
            })?;

        if let Err(e) = output.initialize(format, description, render) {
            if let Err(e) = input.uninitialize() {
                log::warn!("Uninitializing input unit failed: {}", e);
            }
            return Err(Error::StreamInit {
                direction: Direction::Output,
                reason: e.to_string(),
            });
        }

        self.units_initialized = true;
        self.state = Initialized;
        log::info!(
            "Initialized '{}' with {} frames ({} bytes per block)",
            pairing.name,
            mono_frames,
            description.byte_size
        );
        Ok(mono_frames)
    }

    /// Start input, then output
    pub fn start(&mut self) -> Result<()> {
        use SessionState::*;
        self.ensure("start", &[Initialized, Stopped])?;

        let (input, output) = self.units()?;
        input.start()?;
        if let Err(e) = output.start() {
            if let Err(e) = input.stop() {
                log::warn!("Stopping input unit failed: {}", e);
            }
            return Err(e);
        }

        self.base.start();
        self.state = Running;
        Ok(())
    }

    /// Stop input, then output. Stopping a session that is not running is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        use SessionState::*;
        if matches!(self.state, Initialized | Stopped) {
            return Ok(());
        }
        self.ensure("stop", &[Running])?;

        let (input, output) = self.units()?;
        let input_result = input.stop();
        let output_result = output.stop();

        self.base.stop();
        self.state = Stopped;
        input_result.and(output_result)
    }

    /// Uninitialize and release both units. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            log::debug!("Session already closed");
            return Ok(());
        }

        if self.state == SessionState::Running {
            if let Err(e) = self.stop() {
                log::warn!("Stopping streams during close failed: {}", e);
            }
        }

        self.uninitialize_units();
        self.input_unit = None;
        self.output_unit = None;
        self.current_index = None;
        self.bridge.set_active_overload_slot(None);
        self.base.stop();
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Forget the loaded pairing, keeping the units open
    pub fn unload(&mut self) -> Result<()> {
        use SessionState::*;
        self.ensure(
            "unload the device",
            &[Uninitialized, DeviceSelected, CapabilitiesChecked, Initialized, Stopped],
        )?;
        self.uninitialize_units();
        self.pairing = None;
        self.current_index = None;
        self.bridge.set_active_overload_slot(None);
        self.state = Uninitialized;
        Ok(())
    }

    /// Update the catalog position of the loaded pairing after a rescan
    pub(crate) fn set_current_index(&mut self, index: usize) {
        if self.current_index.is_some() {
            self.current_index = Some(index);
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Catalog position of the loaded pairing
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// The loaded (or last selected) pairing
    pub fn pairing(&self) -> Option<&DevicePairing<H::Device>> {
        self.pairing.as_ref()
    }

    /// Negotiated mono frame count, 0 before the first init
    pub fn mono_buffer_frames(&self) -> u32 {
        self.mono_buffer_frames
    }

    /// Interleaved samples per block
    pub fn stereo_buffer_len(&self) -> usize {
        self.format.stereo_len(self.mono_buffer_frames)
    }

    /// How the intermediate buffer is described to the hardware
    pub fn buffer_description(&self) -> BufferDescription {
        BufferDescription::for_frames(&self.format, self.mono_buffer_frames)
    }

    /// Copy of the intermediate buffer
    pub fn intermediate_buffer(&self) -> Vec<i16> {
        self.bridge.snapshot()
    }

    /// Callback counters
    pub fn stats(&self) -> SessionStats {
        self.bridge.stats()
    }

    /// Zero the callback counters
    pub fn reset_stats(&self) {
        self.bridge.reset_stats();
    }

    /// Whether the streams are running
    pub fn is_running(&self) -> bool {
        self.base.is_running()
    }

    /// Shared bookkeeping
    pub fn base(&self) -> &SessionBase {
        &self.base
    }

    /// The fixed stream format
    pub fn format(&self) -> StreamFormat {
        self.format
    }
}

impl<H: AudioHardware> Drop for StreamSession<H> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Closing session failed: {}", e);
        }
    }
}
