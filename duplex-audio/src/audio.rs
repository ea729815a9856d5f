//! Audio types shared by every component: stream format, directions and
//! driver configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample rate every device pairing has to run at
pub const SYSTEM_SAMPLE_RATE_HZ: u32 = 48_000;

/// Upper bound on catalog entries, default pairing included
/// (e.g. 16 inputs x 8 outputs + the default entry)
pub const MAX_NUMBER_SOUND_CARDS: usize = 129;

/// Mono frame count requested when the caller has no preference
pub const DEFAULT_BUFFER_FRAMES: u32 = 256;

/// Number of interleaved channels in every block
pub const CHANNELS: u16 = 2;

/// Bytes per interleaved stereo frame (2 channels x 16 bit)
pub const BYTES_PER_FRAME: u32 = 4;

/// Stream direction, seen from the application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Capture side
    Input,
    /// Playback side
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// The fixed PCM stream format: signed 16-bit linear, interleaved stereo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channels per frame
    pub channels: u16,
    /// Bits per channel sample
    pub bits_per_channel: u16,
    /// Bytes per frame (and per packet, one frame per packet)
    pub bytes_per_frame: u32,
}

impl StreamFormat {
    /// Stereo 16-bit format at the given rate
    pub const fn stereo_i16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: CHANNELS,
            bits_per_channel: 16,
            bytes_per_frame: BYTES_PER_FRAME,
        }
    }

    /// Number of interleaved samples in a block of `mono_frames` frames
    pub fn stereo_len(&self, mono_frames: u32) -> usize {
        mono_frames as usize * self.channels as usize
    }

    /// Byte size of a block of `mono_frames` frames
    pub fn byte_size(&self, mono_frames: u32) -> u32 {
        mono_frames * self.bytes_per_frame
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::stereo_i16(SYSTEM_SAMPLE_RATE_HZ)
    }
}

/// How the intermediate buffer is described to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescription {
    /// Always one interleaved buffer
    pub buffer_count: u32,
    /// Channels in that buffer
    pub channels: u16,
    /// Size of the buffer in bytes
    pub byte_size: u32,
}

impl BufferDescription {
    /// Describe a block of `mono_frames` frames in `format`
    pub fn for_frames(format: &StreamFormat, mono_frames: u32) -> Self {
        Self {
            buffer_count: 1,
            channels: format.channels,
            byte_size: format.byte_size(mono_frames),
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Sample rate the hardware must run at
    pub sample_rate: u32,
    /// Preferred mono buffer size in frames
    pub preferred_buffer_frames: u32,
    /// Maximum number of catalog entries, default pairing included
    pub max_pairings: usize,
    /// Try other pairings when the selected one is unusable
    pub fallback_to_any_device: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            sample_rate: SYSTEM_SAMPLE_RATE_HZ,
            preferred_buffer_frames: DEFAULT_BUFFER_FRAMES,
            max_pairings: MAX_NUMBER_SOUND_CARDS,
            fallback_to_any_device: true,
        }
    }
}

impl DriverConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration as pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The stream format implied by this configuration
    pub fn format(&self) -> StreamFormat {
        StreamFormat::stereo_i16(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_format_sizes() {
        let format = StreamFormat::default();
        assert_eq!(format.sample_rate, 48_000);
        assert_eq!(format.stereo_len(256), 512);
        assert_eq!(format.byte_size(256), 1024);
    }

    #[test]
    fn test_partial_config_json_uses_defaults() {
        let config = DriverConfig::from_json_str(r#"{ "preferred_buffer_frames": 128 }"#).unwrap();
        assert_eq!(config.preferred_buffer_frames, 128);
        assert_eq!(config.sample_rate, SYSTEM_SAMPLE_RATE_HZ);
        assert_eq!(config.max_pairings, MAX_NUMBER_SOUND_CARDS);
        assert!(config.fallback_to_any_device);
    }

    #[test]
    fn test_invalid_config_json_is_config_error() {
        let err = DriverConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert!(!err.is_fatal());
    }
}
