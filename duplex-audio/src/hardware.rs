//! Platform seam: the operations the driver layer needs from an audio
//! hardware abstraction

use crate::{
    audio::{BufferDescription, Direction, StreamFormat},
    error::Result,
};
use std::fmt;
use std::sync::Arc;

/// Real-time entry point for captured frames (interleaved stereo)
pub type CaptureCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// Real-time entry point filling a block the hardware will play out
pub type RenderCallback = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

/// Handler invoked when the platform reports a missed deadline
pub type OverloadListener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Callback installed on a stream unit, matching its direction
pub enum UnitCallback {
    /// Installed on input units
    Capture(CaptureCallback),
    /// Installed on output units
    Render(RenderCallback),
}

impl UnitCallback {
    /// Direction this callback belongs to
    pub fn direction(&self) -> Direction {
        match self {
            UnitCallback::Capture(_) => Direction::Input,
            UnitCallback::Render(_) => Direction::Output,
        }
    }
}

impl fmt::Debug for UnitCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitCallback::Capture(_) => f.write_str("UnitCallback::Capture"),
            UnitCallback::Render(_) => f.write_str("UnitCallback::Render"),
        }
    }
}

/// One direction of a hardware stream.
///
/// A unit is bound to one device at a time. Binding is the only reliable
/// capability test on some platforms, so catalog probing uses dedicated
/// units and never the ones a session is streaming through.
pub trait StreamUnit: Send {
    /// Device identifier type of the owning hardware
    type Device;

    /// Direction this unit was opened for
    fn direction(&self) -> Direction;

    /// Bind the unit to `device`; fails if the device cannot serve this direction
    fn set_current_device(&mut self, device: &Self::Device) -> Result<()>;

    /// Sample rate the unit currently runs at for its bound device
    fn sample_rate(&self) -> Result<f64>;

    /// Install the format and callback, and prepare the stream
    fn initialize(
        &mut self,
        format: StreamFormat,
        buffer: BufferDescription,
        callback: UnitCallback,
    ) -> Result<()>;

    /// Begin invoking the installed callback
    fn start(&mut self) -> Result<()>;

    /// Stop invoking the installed callback
    fn stop(&mut self) -> Result<()>;

    /// Tear down whatever `initialize` prepared
    fn uninitialize(&mut self) -> Result<()>;
}

/// Audio hardware abstraction
pub trait AudioHardware: Send + Sync {
    /// Opaque device identifier, stable within a session
    type Device: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    /// Stream unit type this hardware opens
    type Unit: StreamUnit<Device = Self::Device> + 'static;

    /// Short backend name used in logs
    fn backend_name(&self) -> &str;

    /// Every device visible to the OS, in enumeration order
    fn devices(&self) -> Result<Vec<Self::Device>>;

    /// Current OS default device for `direction`
    fn default_device(&self, direction: Direction) -> Option<Self::Device>;

    /// Human-readable device name as seen from `direction`
    fn device_name(&self, device: &Self::Device, direction: Direction) -> Option<String>;

    /// Open a fresh, unbound stream unit
    fn open_unit(&self, direction: Direction) -> Result<Self::Unit>;

    /// Try to switch the device's nominal sample rate
    fn set_nominal_sample_rate(
        &self,
        device: &Self::Device,
        direction: Direction,
        rate: f64,
    ) -> Result<()>;

    /// Request a hardware buffer size; the device may clamp it
    fn set_buffer_frame_size(
        &self,
        device: &Self::Device,
        direction: Direction,
        frames: u32,
    ) -> Result<()>;

    /// Buffer size the device is actually using
    fn buffer_frame_size(&self, device: &Self::Device, direction: Direction) -> Result<u32>;

    /// Register a processor-overload handler on `device`
    fn add_overload_listener(&self, device: &Self::Device, listener: OverloadListener)
        -> Result<()>;
}
