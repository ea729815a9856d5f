//! Capability negotiation: binds a pairing to the session units and brings
//! both devices to the mandated sample rate

use crate::{
    audio::Direction,
    catalog::DevicePairing,
    error::{Error, Result},
    hardware::{AudioHardware, StreamUnit},
};
use std::fmt;

/// A device that runs at a different rate and refused to be switched.
///
/// This is advisory: the pairing is unusable but the caller may pick
/// another one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMismatch {
    /// Side that failed
    pub direction: Direction,
    /// Rate the device runs at, truncated to whole Hz
    pub actual_rate: u32,
    /// Rate the system requires
    pub required_rate: u32,
}

impl fmt::Display for CapabilityMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Current system audio {} device sample rate of {} Hz is not supported. \
             Please open the audio settings of your system and try to set a sample \
             rate of {} Hz.",
            self.direction, self.actual_rate, self.required_rate
        )
    }
}

/// Bind the pairing's input device to `input_unit` and its output device
/// to `output_unit`
pub fn select_pairing<U: StreamUnit>(
    input_unit: &mut U,
    output_unit: &mut U,
    pairing: &DevicePairing<U::Device>,
) -> Result<()> {
    input_unit
        .set_current_device(&pairing.input.id)
        .map_err(|e| Error::DeviceAssignment {
            direction: Direction::Input,
            reason: e.to_string(),
        })?;

    output_unit
        .set_current_device(&pairing.output.id)
        .map_err(|e| Error::DeviceAssignment {
            direction: Direction::Output,
            reason: e.to_string(),
        })?;

    Ok(())
}

/// Check one side: read the unit's rate, and if it differs from
/// `required_rate` try to force the device's nominal rate.
pub fn check_sample_rate<H: AudioHardware>(
    hardware: &H,
    unit: &H::Unit,
    device: &H::Device,
    required_rate: u32,
) -> Result<Option<CapabilityMismatch>> {
    let direction = unit.direction();
    let actual_rate = unit.sample_rate()? as u32;

    if actual_rate == required_rate {
        return Ok(None);
    }

    let mismatch = CapabilityMismatch {
        direction,
        actual_rate,
        required_rate,
    };

    if let Err(e) = hardware.set_nominal_sample_rate(device, direction, f64::from(required_rate)) {
        log::warn!("Forcing {} sample rate to {} Hz failed: {}", direction, required_rate, e);
        return Ok(Some(mismatch));
    }

    // read back, the write may have been accepted without effect
    let confirmed = unit.sample_rate()? as u32;
    if confirmed != required_rate {
        log::warn!(
            "{} device reports {} Hz after forcing {} Hz",
            direction,
            confirmed,
            required_rate
        );
        return Ok(Some(CapabilityMismatch {
            actual_rate: confirmed,
            ..mismatch
        }));
    }

    log::info!(
        "Switched {} device from {} Hz to {} Hz",
        direction,
        actual_rate,
        required_rate
    );
    Ok(None)
}

/// Check both sides of a selected pairing, input first.
///
/// `Ok(None)` means the pairing is eligible for loading.
pub fn check_capabilities<H: AudioHardware>(
    hardware: &H,
    input_unit: &H::Unit,
    output_unit: &H::Unit,
    pairing: &DevicePairing<H::Device>,
    required_rate: u32,
) -> Result<Option<CapabilityMismatch>> {
    if let Some(mismatch) =
        check_sample_rate(hardware, input_unit, &pairing.input.id, required_rate)?
    {
        return Ok(Some(mismatch));
    }

    check_sample_rate(hardware, output_unit, &pairing.output.id, required_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_both_rates() {
        let mismatch = CapabilityMismatch {
            direction: Direction::Output,
            actual_rate: 44_100,
            required_rate: 48_000,
        };
        let message = mismatch.to_string();
        assert!(message.contains("output"));
        assert!(message.contains("44100 Hz"));
        assert!(message.contains("48000 Hz"));
    }
}
