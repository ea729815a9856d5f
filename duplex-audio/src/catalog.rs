//! Device catalog: enumerates hardware devices, classifies them by probing
//! and builds the list of selectable input/output pairings

use crate::{
    audio::Direction,
    error::{Error, Result},
    hardware::{AudioHardware, StreamUnit},
};

/// Display name of the synthetic pairing at index 0
pub const DEFAULT_PAIRING_NAME: &str = "System Default In/Out Devices";

/// Name used when the platform reports none
pub const UNKNOWN_DEVICE_NAME: &str = "UNKNOWN";

/// A hardware device and the capabilities found by probing it
#[derive(Debug, Clone, PartialEq)]
pub struct Device<D> {
    /// Platform identifier
    pub id: D,
    /// Device name, `"UNKNOWN"` if unavailable
    pub name: String,
    /// Device can be bound to an input unit
    pub is_input: bool,
    /// Device can be bound to an output unit
    pub is_output: bool,
}

/// One selectable (input device, output device) combination
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePairing<D> {
    /// Capture side
    pub input: Device<D>,
    /// Playback side
    pub output: Device<D>,
    /// Name shown to the user
    pub name: String,
    /// Synthetic entry resolved from the OS defaults
    pub is_default: bool,
}

/// Two disposable units used only to classify devices.
///
/// Binding a device to a unit is the capability test, so these must never
/// be the units a session streams through.
pub struct DeviceProbe<H: AudioHardware> {
    input: H::Unit,
    output: H::Unit,
}

impl<H: AudioHardware> DeviceProbe<H> {
    /// Open a pair of probe units
    pub fn open(hardware: &H) -> Result<Self> {
        let open = |direction| {
            hardware
                .open_unit(direction)
                .map_err(|e| Error::ComponentOpen {
                    direction,
                    reason: e.to_string(),
                })
        };
        Ok(Self {
            input: open(Direction::Input)?,
            output: open(Direction::Output)?,
        })
    }

    /// Returns `(is_input, is_output)` for `device`
    pub fn classify(&mut self, device: &H::Device) -> (bool, bool) {
        let is_input = self.input.set_current_device(device).is_ok();
        let is_output = self.output.set_current_device(device).is_ok();
        (is_input, is_output)
    }

    /// Probe `device` and look up its name in the scope it supports
    pub fn describe(&mut self, hardware: &H, device: &H::Device) -> Device<H::Device> {
        let (is_input, is_output) = self.classify(device);
        let scope = if is_input {
            Direction::Input
        } else {
            Direction::Output
        };

        let name = hardware
            .device_name(device, scope)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());

        Device {
            id: device.clone(),
            name,
            is_input,
            is_output,
        }
    }
}

/// The probed devices and the pairing list built from them
#[derive(Debug, Clone)]
pub struct DeviceCatalog<D> {
    devices: Vec<Device<D>>,
    pairings: Vec<DevicePairing<D>>,
}

impl<D: Clone + PartialEq> DeviceCatalog<D> {
    /// Enumerate, probe and pair every device the hardware reports.
    ///
    /// Index 0 is always the system default pairing. The remaining entries
    /// are every ordered (input-capable, output-capable) combination, outer
    /// loop over inputs, truncated at `max_pairings` entries in total.
    pub fn build<H>(hardware: &H, max_pairings: usize) -> Result<Self>
    where
        H: AudioHardware<Device = D>,
    {
        let default_input = hardware
            .default_device(Direction::Input)
            .ok_or(Error::NoSoundCard(Direction::Input))?;
        let default_output = hardware
            .default_device(Direction::Output)
            .ok_or(Error::NoSoundCard(Direction::Output))?;

        let mut probe = DeviceProbe::open(hardware)?;

        let devices: Vec<Device<D>> = hardware
            .devices()?
            .iter()
            .map(|id| probe.describe(hardware, id))
            .collect();

        for device in &devices {
            log::debug!(
                "{}: device '{}' input={} output={}",
                hardware.backend_name(),
                device.name,
                device.is_input,
                device.is_output
            );
        }

        let lookup = |id: &D, probe: &mut DeviceProbe<H>| {
            devices
                .iter()
                .find(|device| device.id == *id)
                .cloned()
                .unwrap_or_else(|| probe.describe(hardware, id))
        };
        let default_pairing = DevicePairing {
            input: lookup(&default_input, &mut probe),
            output: lookup(&default_output, &mut probe),
            name: DEFAULT_PAIRING_NAME.to_string(),
            is_default: true,
        };

        let limit = max_pairings.max(1);
        let mut pairings = vec![default_pairing];
        let mut dropped = 0usize;

        for input in devices.iter().filter(|device| device.is_input) {
            for output in devices.iter().filter(|device| device.is_output) {
                if pairings.len() < limit {
                    pairings.push(DevicePairing {
                        input: input.clone(),
                        output: output.clone(),
                        name: format!("in: {}/out: {}", input.name, output.name),
                        is_default: false,
                    });
                } else {
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            log::debug!("Device catalog full, dropped {} pairings", dropped);
        }

        Ok(Self { devices, pairings })
    }

    /// Number of pairings, default included
    pub fn len(&self) -> usize {
        self.pairings.len()
    }

    /// Always false for a built catalog
    pub fn is_empty(&self) -> bool {
        self.pairings.is_empty()
    }

    /// Pairing at `index`
    pub fn get(&self, index: usize) -> Result<&DevicePairing<D>> {
        self.pairings.get(index).ok_or(Error::InvalidDriverIndex {
            index,
            count: self.pairings.len(),
        })
    }

    /// Display name of the pairing at `index`
    pub fn name(&self, index: usize) -> Option<&str> {
        self.pairings.get(index).map(|pairing| pairing.name.as_str())
    }

    /// Index of the first pairing with this display name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.pairings.iter().position(|pairing| pairing.name == name)
    }

    /// All pairings in catalog order
    pub fn pairings(&self) -> &[DevicePairing<D>] {
        &self.pairings
    }

    /// All probed devices in enumeration order
    pub fn devices(&self) -> &[Device<D>] {
        &self.devices
    }
}
