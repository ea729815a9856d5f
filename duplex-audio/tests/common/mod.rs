//! Scripted in-memory hardware shared by the integration tests

#![allow(dead_code)]

use duplex_audio::hardware::{CaptureCallback, RenderCallback};
use duplex_audio::{
    AudioHardware, BufferDescription, Direction, Error, OverloadListener, Result, StreamFormat,
    StreamUnit, UnitCallback,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A scripted device
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub id: u32,
    pub name: Option<String>,
    pub input: bool,
    pub output: bool,
    pub sample_rate: f64,
    pub forcible: bool,
    pub buffer_sizes: Vec<u32>,
}

impl FakeDevice {
    fn new(id: u32, name: &str, input: bool, output: bool) -> Self {
        Self {
            id,
            name: Some(name.to_string()),
            input,
            output,
            sample_rate: 48_000.0,
            forcible: true,
            buffer_sizes: Vec::new(),
        }
    }

    pub fn input(id: u32, name: &str) -> Self {
        Self::new(id, name, true, false)
    }

    pub fn output(id: u32, name: &str) -> Self {
        Self::new(id, name, false, true)
    }

    pub fn duplex(id: u32, name: &str) -> Self {
        Self::new(id, name, true, true)
    }

    /// Visible to the OS but usable in neither direction
    pub fn new_inert(id: u32, name: &str) -> Self {
        Self::new(id, name, false, false)
    }

    /// Device runs at `rate` until forced
    pub fn rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Device refuses nominal rate changes
    pub fn fixed_rate(mut self) -> Self {
        self.forcible = false;
        self
    }

    /// Only these buffer sizes are supported; other requests snap to the closest
    pub fn buffer_sizes(mut self, sizes: &[u32]) -> Self {
        self.buffer_sizes = sizes.to_vec();
        self
    }

    pub fn unnamed(mut self) -> Self {
        self.name = None;
        self
    }

    fn supports(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.input,
            Direction::Output => self.output,
        }
    }

    fn resolve_buffer_size(&self, requested: u32) -> u32 {
        if self.buffer_sizes.is_empty() || self.buffer_sizes.contains(&requested) {
            return requested;
        }
        self.buffer_sizes
            .iter()
            .copied()
            .min_by_key(|size| size.abs_diff(requested))
            .unwrap_or(requested)
    }
}

#[derive(Default)]
struct FakeState {
    devices: Vec<FakeDevice>,
    default_input: Option<u32>,
    default_output: Option<u32>,
    buffer_frames: HashMap<(u32, Direction), u32>,
    listeners: HashMap<u32, Vec<OverloadListener>>,
    running: HashSet<Direction>,
    descriptions: HashMap<Direction, BufferDescription>,
    fail_init: Option<Direction>,
    fail_open: bool,
    assignments: usize,
    rate_writes: usize,
    buffer_writes: usize,
    units_opened: usize,
    events: Vec<String>,
}

impl FakeState {
    fn device(&self, id: u32) -> Option<&FakeDevice> {
        self.devices.iter().find(|device| device.id == id)
    }

    fn device_mut(&mut self, id: u32) -> Option<&mut FakeDevice> {
        self.devices.iter_mut().find(|device| device.id == id)
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<FakeState>,
    capture: Mutex<Option<CaptureCallback>>,
    render: Mutex<Option<RenderCallback>>,
}

/// Cloneable handle; clones share the same scripted hardware
#[derive(Clone, Default)]
pub struct FakeHardware {
    inner: Arc<Inner>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeHardware {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.inner.state)
    }

    pub fn with_device(self, device: FakeDevice) -> Self {
        self.state().devices.push(device);
        self
    }

    pub fn with_defaults(self, input: u32, output: u32) -> Self {
        {
            let mut state = self.state();
            state.default_input = Some(input);
            state.default_output = Some(output);
        }
        self
    }

    /// A duplex built-in device (1) and a USB interface (2), both defaults on 1
    pub fn two_devices() -> Self {
        Self::new()
            .with_device(FakeDevice::duplex(1, "Built-in"))
            .with_device(FakeDevice::duplex(2, "USB Interface"))
            .with_defaults(1, 1)
    }

    pub fn set_defaults(&self, input: Option<u32>, output: Option<u32>) {
        let mut state = self.state();
        state.default_input = input;
        state.default_output = output;
    }

    pub fn remove_device(&self, id: u32) {
        self.state().devices.retain(|device| device.id != id);
    }

    pub fn set_device_rate(&self, id: u32, rate: f64) {
        if let Some(device) = self.state().device_mut(id) {
            device.sample_rate = rate;
        }
    }

    pub fn fail_init(&self, direction: Option<Direction>) {
        self.state().fail_init = direction;
    }

    pub fn fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    pub fn assignments(&self) -> usize {
        self.state().assignments
    }

    pub fn rate_writes(&self) -> usize {
        self.state().rate_writes
    }

    pub fn buffer_writes(&self) -> usize {
        self.state().buffer_writes
    }

    pub fn units_opened(&self) -> usize {
        self.state().units_opened
    }

    pub fn device_rate(&self, id: u32) -> Option<f64> {
        self.state().device(id).map(|device| device.sample_rate)
    }

    pub fn listener_count(&self, id: u32) -> usize {
        self.state().listeners.get(&id).map_or(0, Vec::len)
    }

    pub fn description(&self, direction: Direction) -> Option<BufferDescription> {
        self.state().descriptions.get(&direction).copied()
    }

    pub fn is_running(&self, direction: Direction) -> bool {
        self.state().running.contains(&direction)
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Deliver captured frames; false when no input stream is running
    pub fn fire_input(&self, samples: &[i16]) -> bool {
        if !self.is_running(Direction::Input) {
            return false;
        }
        match lock(&self.inner.capture).as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    /// Request an output block; false when no output stream is running
    pub fn fire_output(&self, output: &mut [i16]) -> bool {
        if !self.is_running(Direction::Output) {
            return false;
        }
        match lock(&self.inner.render).as_mut() {
            Some(callback) => {
                callback(output);
                true
            }
            None => false,
        }
    }

    /// Deliver a processor-overload notification for `id`
    pub fn fire_overload(&self, id: u32) {
        let listeners = self.state().listeners.get(&id).cloned().unwrap_or_default();
        for listener in listeners {
            listener();
        }
    }
}

impl AudioHardware for FakeHardware {
    type Device = u32;
    type Unit = FakeUnit;

    fn backend_name(&self) -> &str {
        "Fake"
    }

    fn devices(&self) -> Result<Vec<u32>> {
        Ok(self.state().devices.iter().map(|device| device.id).collect())
    }

    fn default_device(&self, direction: Direction) -> Option<u32> {
        let state = self.state();
        match direction {
            Direction::Input => state.default_input,
            Direction::Output => state.default_output,
        }
    }

    fn device_name(&self, device: &u32, _direction: Direction) -> Option<String> {
        self.state().device(*device).and_then(|device| device.name.clone())
    }

    fn open_unit(&self, direction: Direction) -> Result<FakeUnit> {
        let mut state = self.state();
        if state.fail_open {
            return Err(Error::AudioBackendError("component not found".to_string()));
        }
        state.units_opened += 1;
        Ok(FakeUnit {
            direction,
            device: None,
            initialized: false,
            hardware: self.clone(),
        })
    }

    fn set_nominal_sample_rate(&self, device: &u32, _direction: Direction, rate: f64) -> Result<()> {
        let mut state = self.state();
        state.rate_writes += 1;
        let device = state
            .device_mut(*device)
            .ok_or_else(|| Error::AudioBackendError("unknown device".to_string()))?;
        if !device.forcible {
            return Err(Error::AudioBackendError("rate change refused".to_string()));
        }
        device.sample_rate = rate;
        Ok(())
    }

    fn set_buffer_frame_size(&self, device: &u32, direction: Direction, frames: u32) -> Result<()> {
        let mut state = self.state();
        state.buffer_writes += 1;
        let actual = state
            .device(*device)
            .ok_or_else(|| Error::AudioBackendError("unknown device".to_string()))?
            .resolve_buffer_size(frames);
        state.buffer_frames.insert((*device, direction), actual);
        Ok(())
    }

    fn buffer_frame_size(&self, device: &u32, direction: Direction) -> Result<u32> {
        let state = self.state();
        if let Some(frames) = state.buffer_frames.get(&(*device, direction)) {
            return Ok(*frames);
        }
        let device = state
            .device(*device)
            .ok_or_else(|| Error::AudioBackendError("unknown device".to_string()))?;
        Ok(device.buffer_sizes.first().copied().unwrap_or(512))
    }

    fn add_overload_listener(&self, device: &u32, listener: OverloadListener) -> Result<()> {
        self.state().listeners.entry(*device).or_default().push(listener);
        Ok(())
    }
}

pub struct FakeUnit {
    direction: Direction,
    device: Option<u32>,
    initialized: bool,
    hardware: FakeHardware,
}

impl FakeUnit {
    fn event(&self, what: &str) {
        self.hardware
            .state()
            .events
            .push(format!("{}:{}", self.direction, what));
    }
}

impl StreamUnit for FakeUnit {
    type Device = u32;

    fn direction(&self) -> Direction {
        self.direction
    }

    fn set_current_device(&mut self, device: &u32) -> Result<()> {
        let mut state = self.hardware.state();
        state.assignments += 1;
        let supported = state
            .device(*device)
            .is_some_and(|fake| fake.supports(self.direction));
        if !supported {
            return Err(Error::AudioBackendError(format!(
                "device {} rejected for {}",
                device, self.direction
            )));
        }
        drop(state);
        self.device = Some(*device);
        Ok(())
    }

    fn sample_rate(&self) -> Result<f64> {
        let id = self
            .device
            .ok_or_else(|| Error::AudioBackendError("no device bound".to_string()))?;
        self.hardware
            .device_rate(id)
            .ok_or_else(|| Error::AudioBackendError("device vanished".to_string()))
    }

    fn initialize(
        &mut self,
        _format: StreamFormat,
        buffer: BufferDescription,
        callback: UnitCallback,
    ) -> Result<()> {
        {
            let mut state = self.hardware.state();
            if state.fail_init == Some(self.direction) {
                return Err(Error::AudioBackendError("hardware refused".to_string()));
            }
            state.descriptions.insert(self.direction, buffer);
        }

        match callback {
            UnitCallback::Capture(callback) => *lock(&self.hardware.inner.capture) = Some(callback),
            UnitCallback::Render(callback) => *lock(&self.hardware.inner.render) = Some(callback),
        }
        self.initialized = true;
        self.event("initialize");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(Error::AudioBackendError("not initialized".to_string()));
        }
        self.hardware.state().running.insert(self.direction);
        self.event("start");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.hardware.state().running.remove(&self.direction);
        self.event("stop");
        Ok(())
    }

    fn uninitialize(&mut self) -> Result<()> {
        match self.direction {
            Direction::Input => *lock(&self.hardware.inner.capture) = None,
            Direction::Output => *lock(&self.hardware.inner.render) = None,
        }
        self.initialized = false;
        self.event("uninitialize");
        Ok(())
    }
}
