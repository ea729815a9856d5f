//! CPAL audio backend implementation

use crate::{
    audio::{BufferDescription, Direction, StreamFormat, DEFAULT_BUFFER_FRAMES},
    error::{Error, Result},
    hardware::{
        AudioHardware, CaptureCallback, OverloadListener, RenderCallback, StreamUnit,
        UnitCallback,
    },
};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedBufferSize, SupportedStreamConfigRange,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A cpal device. Identity is the device name, which is what cpal keeps
/// stable across enumerations.
#[derive(Clone)]
pub struct CpalDevice {
    name: String,
    device: cpal::Device,
}

impl CpalDevice {
    fn new(device: cpal::Device) -> Self {
        Self {
            name: device.name().unwrap_or_default(),
            device,
        }
    }

    /// Device name as reported by cpal (may be empty)
    pub fn name(&self) -> &str {
        &self.name
    }

    fn stereo_ranges(&self, direction: Direction) -> Result<Vec<SupportedStreamConfigRange>> {
        let ranges: Vec<SupportedStreamConfigRange> = match direction {
            Direction::Input => self
                .device
                .supported_input_configs()
                .map_err(|e| backend_error("query input configs", e))?
                .collect(),
            Direction::Output => self
                .device
                .supported_output_configs()
                .map_err(|e| backend_error("query output configs", e))?
                .collect(),
        };

        Ok(ranges
            .into_iter()
            .filter(|range| range.channels() == 2)
            .filter(|range| matches!(range.sample_format(), SampleFormat::I16 | SampleFormat::F32))
            .collect())
    }

    fn default_sample_rate(&self, direction: Direction) -> Result<u32> {
        let config = match direction {
            Direction::Input => self
                .device
                .default_input_config()
                .map_err(|e| backend_error("query default input config", e))?,
            Direction::Output => self
                .device
                .default_output_config()
                .map_err(|e| backend_error("query default output config", e))?,
        };
        Ok(config.sample_rate().0)
    }
}

impl PartialEq for CpalDevice {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for CpalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalDevice").field("name", &self.name).finish()
    }
}

type SettingKey = (String, Direction);

/// Values accepted by `set_*` calls, read back by units and queries
#[derive(Debug, Default)]
struct DeviceSettings {
    sample_rates: HashMap<SettingKey, u32>,
    buffer_frames: HashMap<SettingKey, u32>,
}

type Listeners = Arc<Mutex<HashMap<String, OverloadListener>>>;

/// CPAL-based audio hardware
pub struct CpalBackend {
    host: cpal::Host,
    settings: Arc<Mutex<DeviceSettings>>,
    overload_listeners: Listeners,
}

impl CpalBackend {
    /// Create a backend on the default cpal host
    pub fn new() -> Result<Self> {
        Ok(Self::with_host(cpal::default_host()))
    }

    /// Create a backend on a specific cpal host
    pub fn with_host(host: cpal::Host) -> Self {
        Self {
            host,
            settings: Arc::new(Mutex::new(DeviceSettings::default())),
            overload_listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn supported_buffer_range(&self, device: &CpalDevice, direction: Direction) -> Result<(u32, u32)> {
        let rate = lock(&self.settings)
            .sample_rates
            .get(&(device.name.clone(), direction))
            .copied()
            .or_else(|| device.default_sample_rate(direction).ok());

        let ranges: Vec<(u32, u32, SupportedBufferSize)> = device
            .stereo_ranges(direction)?
            .iter()
            .map(|range| {
                (
                    range.min_sample_rate().0,
                    range.max_sample_rate().0,
                    range.buffer_size().clone(),
                )
            })
            .collect();

        buffer_range_at(&ranges, rate).ok_or_else(|| {
            Error::AudioBackendError(format!(
                "device '{}' has no stereo {} configuration",
                device.name, direction
            ))
        })
    }
}

impl AudioHardware for CpalBackend {
    type Device = CpalDevice;
    type Unit = CpalUnit;

    fn backend_name(&self) -> &str {
        self.host.id().name()
    }

    fn devices(&self) -> Result<Vec<Self::Device>> {
        let devices = self
            .host
            .devices()
            .map_err(|e| backend_error("enumerate devices", e))?
            .map(CpalDevice::new)
            .collect();
        Ok(devices)
    }

    fn default_device(&self, direction: Direction) -> Option<Self::Device> {
        match direction {
            Direction::Input => self.host.default_input_device(),
            Direction::Output => self.host.default_output_device(),
        }
        .map(CpalDevice::new)
    }

    fn device_name(&self, device: &Self::Device, _direction: Direction) -> Option<String> {
        Some(device.name.clone()).filter(|name| !name.is_empty())
    }

    fn open_unit(&self, direction: Direction) -> Result<Self::Unit> {
        Ok(CpalUnit {
            direction,
            device: None,
            stream: None,
            settings: Arc::clone(&self.settings),
            overload_listeners: Arc::clone(&self.overload_listeners),
            mismatched_chunks: Arc::new(AtomicU64::new(0)),
        })
    }

    fn set_nominal_sample_rate(
        &self,
        device: &Self::Device,
        direction: Direction,
        rate: f64,
    ) -> Result<()> {
        let rate = rate as u32;
        let supported = device.stereo_ranges(direction)?.iter().any(|range| {
            range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0
        });

        if !supported {
            return Err(Error::AudioBackendError(format!(
                "device '{}' does not support {} Hz on its {} side",
                device.name, rate, direction
            )));
        }

        lock(&self.settings)
            .sample_rates
            .insert((device.name.clone(), direction), rate);
        Ok(())
    }

    fn set_buffer_frame_size(
        &self,
        device: &Self::Device,
        direction: Direction,
        frames: u32,
    ) -> Result<()> {
        let (min, max) = self.supported_buffer_range(device, direction)?;
        lock(&self.settings)
            .buffer_frames
            .insert((device.name.clone(), direction), frames.clamp(min, max));
        Ok(())
    }

    fn buffer_frame_size(&self, device: &Self::Device, direction: Direction) -> Result<u32> {
        let key = (device.name.clone(), direction);
        if let Some(frames) = lock(&self.settings).buffer_frames.get(&key) {
            return Ok(*frames);
        }

        let (min, max) = self.supported_buffer_range(device, direction)?;
        Ok(DEFAULT_BUFFER_FRAMES.clamp(min, max))
    }

    fn add_overload_listener(
        &self,
        device: &Self::Device,
        listener: OverloadListener,
    ) -> Result<()> {
        lock(&self.overload_listeners).insert(device.name.clone(), listener);
        Ok(())
    }
}

/// CPAL stream wrapper
struct CpalStream {
    stream: Stream,
}

// cpal streams are !Send on some hosts. The unit only plays, pauses and
// drops the stream, always from the thread that owns the session.
unsafe impl Send for CpalStream {}

/// One direction of a cpal stream
pub struct CpalUnit {
    direction: Direction,
    device: Option<CpalDevice>,
    stream: Option<CpalStream>,
    settings: Arc<Mutex<DeviceSettings>>,
    overload_listeners: Listeners,
    mismatched_chunks: Arc<AtomicU64>,
}

impl CpalUnit {
    /// Callback chunks whose size differed from the negotiated block since
    /// the stream was built or last stopped. Longer chunks were truncated,
    /// shorter ones zero-padded.
    pub fn mismatched_chunks(&self) -> u64 {
        self.mismatched_chunks.load(Ordering::Relaxed)
    }

    fn report_mismatched_chunks(&self) {
        let count = self.mismatched_chunks.swap(0, Ordering::Relaxed);
        if count > 0 {
            log::debug!(
                "{} stream delivered {} chunks that did not match the negotiated block size",
                self.direction,
                count
            );
        }
    }

    fn bound_device(&self) -> Result<&CpalDevice> {
        self.device.as_ref().ok_or_else(|| {
            Error::AudioBackendError(format!("no {} device bound", self.direction))
        })
    }

    fn stream(&self) -> Result<&Stream> {
        self.stream
            .as_ref()
            .map(|stream| &stream.stream)
            .ok_or_else(|| Error::AudioBackendError(format!("{} stream not initialized", self.direction)))
    }

    fn pick_sample_format(&self, device: &CpalDevice, rate: u32) -> Result<SampleFormat> {
        let ranges = device.stereo_ranges(self.direction)?;
        let supports = |format: SampleFormat| {
            ranges.iter().any(|range| {
                range.sample_format() == format
                    && range.min_sample_rate().0 <= rate
                    && rate <= range.max_sample_rate().0
            })
        };

        if supports(SampleFormat::I16) {
            Ok(SampleFormat::I16)
        } else if supports(SampleFormat::F32) {
            Ok(SampleFormat::F32)
        } else {
            Err(Error::AudioBackendError(format!(
                "device '{}' has no 16-bit or float stereo format at {} Hz",
                device.name, rate
            )))
        }
    }

    fn error_handler(&self, device: &CpalDevice) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let direction = self.direction;
        let name = device.name.clone();
        let listeners = Arc::clone(&self.overload_listeners);

        move |err| {
            log::debug!("{} stream error on '{}': {}", direction, name, err);
            let listener = lock(&listeners).get(&name).cloned();
            if let Some(listener) = listener {
                listener();
            }
        }
    }
}

impl StreamUnit for CpalUnit {
    type Device = CpalDevice;

    fn direction(&self) -> Direction {
        self.direction
    }

    fn set_current_device(&mut self, device: &Self::Device) -> Result<()> {
        let supported = match self.direction {
            Direction::Input => device.device.default_input_config().is_ok(),
            Direction::Output => device.device.default_output_config().is_ok(),
        };

        if !supported {
            return Err(Error::AudioBackendError(format!(
                "device '{}' cannot be used for {}",
                device.name, self.direction
            )));
        }

        self.stream = None;
        self.device = Some(device.clone());
        Ok(())
    }

    fn sample_rate(&self) -> Result<f64> {
        let device = self.bound_device()?;
        let key = (device.name.clone(), self.direction);
        if let Some(rate) = lock(&self.settings).sample_rates.get(&key) {
            return Ok(f64::from(*rate));
        }
        Ok(f64::from(device.default_sample_rate(self.direction)?))
    }

    fn initialize(
        &mut self,
        format: StreamFormat,
        buffer: BufferDescription,
        callback: UnitCallback,
    ) -> Result<()> {
        let device = self.bound_device()?.clone();
        if callback.direction() != self.direction {
            return Err(Error::AudioBackendError(format!(
                "{:?} installed on an {} unit",
                callback, self.direction
            )));
        }

        let frames = buffer.byte_size / format.bytes_per_frame;
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Fixed(frames),
        };
        let scratch_len = format.stereo_len(frames);
        let sample_format = self.pick_sample_format(&device, format.sample_rate)?;
        let on_error = self.error_handler(&device);
        let block = ChunkBlock {
            scratch: vec![0i16; scratch_len],
            mismatched: Arc::clone(&self.mismatched_chunks),
        };

        self.report_mismatched_chunks();
        let stream = match (callback, sample_format) {
            (UnitCallback::Capture(cb), SampleFormat::I16) => {
                build_capture::<i16, _>(&device.device, &config, cb, block, on_error)
            }
            (UnitCallback::Capture(cb), _) => {
                build_capture::<f32, _>(&device.device, &config, cb, block, on_error)
            }
            (UnitCallback::Render(cb), SampleFormat::I16) => {
                build_render::<i16, _>(&device.device, &config, cb, block, on_error)
            }
            (UnitCallback::Render(cb), _) => {
                build_render::<f32, _>(&device.device, &config, cb, block, on_error)
            }
        }?;

        log::debug!(
            "Built {} stream on '{}': {} frames, {:?}",
            self.direction,
            device.name,
            frames,
            sample_format
        );
        self.stream = Some(CpalStream { stream });
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.stream()?
            .play()
            .map_err(|e| backend_error("start stream", e))
    }

    fn stop(&mut self) -> Result<()> {
        let result = self
            .stream()?
            .pause()
            .map_err(|e| backend_error("stop stream", e));
        self.report_mismatched_chunks();
        result
    }

    fn uninitialize(&mut self) -> Result<()> {
        self.stream = None;
        self.report_mismatched_chunks();
        Ok(())
    }
}

/// Preallocated conversion block of one stream callback
struct ChunkBlock {
    scratch: Vec<i16>,
    mismatched: Arc<AtomicU64>,
}

impl ChunkBlock {
    fn note_chunk(&self, len: usize) {
        if len != self.scratch.len() {
            self.mismatched.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Convert a captured chunk into `scratch`; returns the number of samples
/// filled. Samples beyond the block are dropped.
fn convert_captured<T>(data: &[T], scratch: &mut [i16]) -> usize
where
    T: Sample,
    i16: FromSample<T>,
{
    let n = data.len().min(scratch.len());
    for (dst, src) in scratch[..n].iter_mut().zip(data) {
        *dst = (*src).to_sample::<i16>();
    }
    n
}

/// Copy a rendered block into the device chunk, padding with silence
fn convert_rendered<T>(rendered: &[i16], data: &mut [T])
where
    T: Sample + FromSample<i16>,
{
    let n = data.len().min(rendered.len());
    for (dst, src) in data[..n].iter_mut().zip(&rendered[..n]) {
        *dst = (*src).to_sample::<T>();
    }
    data[n..].fill(T::EQUILIBRIUM);
}

fn build_capture<T, E>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut callback: CaptureCallback,
    mut block: ChunkBlock,
    on_error: E,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                block.note_chunk(data.len());
                let n = convert_captured(data, &mut block.scratch);
                callback(&block.scratch[..n]);
            },
            on_error,
            None,
        )
        .map_err(|e| backend_error("build input stream", e))
}

fn build_render<T, E>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut callback: RenderCallback,
    mut block: ChunkBlock,
    on_error: E,
) -> Result<Stream>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                block.note_chunk(data.len());
                let n = data.len().min(block.scratch.len());
                callback(&mut block.scratch[..n]);
                convert_rendered(&block.scratch[..n], data);
            },
            on_error,
            None,
        )
        .map_err(|e| backend_error("build output stream", e))
}

/// Buffer size bounds over every range that supports `rate`, or over all
/// ranges when none does or the rate is unknown
fn buffer_range_at(ranges: &[(u32, u32, SupportedBufferSize)], rate: Option<u32>) -> Option<(u32, u32)> {
    let bounds = |(_, _, size): &(u32, u32, SupportedBufferSize)| match size {
        SupportedBufferSize::Range { min, max } => (*min, *max),
        SupportedBufferSize::Unknown => (1, u32::MAX),
    };
    let union = |acc: Option<(u32, u32)>, (min, max): (u32, u32)| {
        Some(match acc {
            Some((lo, hi)) => (lo.min(min), hi.max(max)),
            None => (min, max),
        })
    };

    let at_rate = rate.and_then(|rate| {
        ranges
            .iter()
            .filter(|(min_rate, max_rate, _)| *min_rate <= rate && rate <= *max_rate)
            .map(bounds)
            .fold(None, union)
    });

    at_rate.or_else(|| ranges.iter().map(bounds).fold(None, union))
}

fn backend_error(action: &str, err: impl fmt::Display) -> Error {
    Error::AudioBackendError(format!("Failed to {}: {}", action, err))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn range(min_rate: u32, max_rate: u32, min: u32, max: u32) -> (u32, u32, SupportedBufferSize) {
        (min_rate, max_rate, SupportedBufferSize::Range { min, max })
    }

    #[test]
    fn test_buffer_range_uses_ranges_supporting_rate() {
        let ranges = [
            range(8_000, 44_100, 16, 64),
            range(48_000, 48_000, 128, 1024),
            range(44_100, 96_000, 256, 4096),
        ];
        assert_eq!(buffer_range_at(&ranges, Some(48_000)), Some((128, 4096)));
        assert_eq!(buffer_range_at(&ranges, Some(22_050)), Some((16, 64)));
    }

    #[test]
    fn test_buffer_range_falls_back_to_union() {
        let ranges = [range(8_000, 44_100, 16, 64), range(44_100, 44_100, 32, 512)];
        assert_eq!(buffer_range_at(&ranges, Some(48_000)), Some((16, 512)));
        assert_eq!(buffer_range_at(&ranges, None), Some((16, 512)));

        let unknown = [(48_000, 48_000, SupportedBufferSize::Unknown)];
        assert_eq!(buffer_range_at(&unknown, Some(48_000)), Some((1, u32::MAX)));
        assert_eq!(buffer_range_at(&[], Some(48_000)), None);
    }

    #[test]
    fn test_oversized_capture_chunk_is_counted() {
        let mut block = ChunkBlock {
            scratch: vec![0i16; 4],
            mismatched: Arc::new(AtomicU64::new(0)),
        };

        let chunk = [1i16, 2, 3, 4, 5, 6];
        block.note_chunk(chunk.len());
        assert_eq!(convert_captured(&chunk, &mut block.scratch), 4);
        assert_eq!(block.scratch, vec![1, 2, 3, 4]);

        block.note_chunk(4);
        block.note_chunk(2);
        assert_eq!(block.mismatched.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_float_capture_converts_to_i16() {
        let mut scratch = [0i16; 2];
        assert_eq!(convert_captured(&[0.0f32, -1.0], &mut scratch), 2);
        assert_eq!(scratch[0], 0);
        assert!(scratch[1] <= -32_767);
    }

    #[test]
    fn test_rendered_block_is_padded_with_silence() {
        let mut data = [9i16; 4];
        convert_rendered(&[7, 8], &mut data);
        assert_eq!(data, [7, 8, 0, 0]);
    }
}
