//! Callback bridge between the two hardware callback threads and the
//! application processing callback.
//!
//! The input path owns a private work block. Captured frames are copied
//! into it, the application processes it in place, and the finished block
//! is published into the shared intermediate buffer under the lock. The
//! output path copies the intermediate buffer out under the same lock. The
//! lock is therefore held only for a block copy, never across the
//! application callback, and a reader always sees a complete block.

use crate::hardware::{CaptureCallback, OverloadListener, RenderCallback};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Application processing callback; receives one interleaved stereo block
/// and may overwrite it with the block to play out
pub type ProcessCallback = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

/// Callback counters of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Input-arrival events handled
    pub input_callbacks: u64,
    /// Output requests served
    pub output_callbacks: u64,
    /// Overload notifications received
    pub overloads: u64,
}

#[derive(Debug, Default)]
struct Counters {
    input_callbacks: AtomicU64,
    output_callbacks: AtomicU64,
    overloads: AtomicU64,
}

/// Owns the intermediate buffer and hands out the real-time callbacks
pub struct CallbackBridge {
    buffer: Arc<Mutex<Vec<i16>>>,
    process: Arc<Mutex<ProcessCallback>>,
    counters: Arc<Counters>,
    active_overload_slot: Arc<AtomicUsize>,
}

const NO_OVERLOAD_SLOT: usize = usize::MAX;

impl CallbackBridge {
    /// Create a bridge around the application callback, with an empty buffer
    pub fn new(process: ProcessCallback) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            process: Arc::new(Mutex::new(process)),
            counters: Arc::new(Counters::default()),
            active_overload_slot: Arc::new(AtomicUsize::new(NO_OVERLOAD_SLOT)),
        }
    }

    /// Reallocate the intermediate buffer to `stereo_len` zeroed samples.
    ///
    /// Only called while no stream is running.
    pub fn resize(&self, stereo_len: usize) {
        let mut buffer = lock(&self.buffer);
        buffer.clear();
        buffer.resize(stereo_len, 0);
    }

    /// Number of interleaved samples in the intermediate buffer
    pub fn len(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// True before the first `resize`
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current intermediate buffer contents
    pub fn snapshot(&self) -> Vec<i16> {
        lock(&self.buffer).clone()
    }

    /// Build the input-arrival entry point.
    ///
    /// The work block is allocated here, sized to the current buffer, so
    /// the callback itself never allocates.
    pub fn capture_callback(&self) -> CaptureCallback {
        let mut block = vec![0i16; self.len()];
        let buffer = Arc::clone(&self.buffer);
        let process = Arc::clone(&self.process);
        let counters = Arc::clone(&self.counters);

        Box::new(move |captured: &[i16]| {
            copy_block(captured, &mut block);

            {
                let mut process = lock(&process);
                (*process)(&mut block);
            }

            copy_block(&block, &mut lock(&buffer));
            counters.input_callbacks.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Build the output-request entry point. It never calls the application.
    pub fn render_callback(&self) -> RenderCallback {
        let buffer = Arc::clone(&self.buffer);
        let counters = Arc::clone(&self.counters);

        Box::new(move |output: &mut [i16]| {
            copy_block(&lock(&buffer), output);
            counters.output_callbacks.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Overload handler for listener `slot`.
    ///
    /// It counts the notification while `slot` is the active slot and does
    /// nothing else. Listeners stay registered on devices that are no longer
    /// loaded, so inactive slots must stay silent.
    pub fn overload_listener(&self, slot: usize) -> OverloadListener {
        let counters = Arc::clone(&self.counters);
        let active = Arc::clone(&self.active_overload_slot);
        Arc::new(move || {
            if active.load(Ordering::Acquire) != slot {
                return;
            }
            counters.overloads.fetch_add(1, Ordering::Relaxed);
            log::trace!("Audio processor overload reported");
        })
    }

    /// Select which listener slot counts overloads, `None` silences all
    pub fn set_active_overload_slot(&self, slot: Option<usize>) {
        self.active_overload_slot
            .store(slot.unwrap_or(NO_OVERLOAD_SLOT), Ordering::Release);
    }

    /// Current counter values
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            input_callbacks: self.counters.input_callbacks.load(Ordering::Relaxed),
            output_callbacks: self.counters.output_callbacks.load(Ordering::Relaxed),
            overloads: self.counters.overloads.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters
    pub fn reset_stats(&self) {
        self.counters.input_callbacks.store(0, Ordering::Relaxed);
        self.counters.output_callbacks.store(0, Ordering::Relaxed);
        self.counters.overloads.store(0, Ordering::Relaxed);
    }
}

/// Copy as much of `src` as fits and zero the rest of `dst`
fn copy_block(src: &[i16], dst: &mut [i16]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0);
}

// A panic in one callback must not silence the other direction forever
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_block_zero_fills_short_source() {
        let mut dst = [7i16; 6];
        copy_block(&[1, 2, 3, 4], &mut dst);
        assert_eq!(dst, [1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_copy_block_truncates_long_source() {
        let mut dst = [0i16; 2];
        copy_block(&[5, 6, 7, 8], &mut dst);
        assert_eq!(dst, [5, 6]);
    }

    #[test]
    fn test_output_replays_last_processed_block() {
        let bridge = CallbackBridge::new(Box::new(|block: &mut [i16]| {
            for sample in block.iter_mut() {
                *sample = sample.saturating_mul(2);
            }
        }));
        bridge.resize(4);

        let mut capture = bridge.capture_callback();
        let mut render = bridge.render_callback();

        let mut out = [0i16; 4];
        render(&mut out);
        assert_eq!(out, [0, 0, 0, 0]);

        capture(&[1, 2, 3, 4]);
        render(&mut out);
        assert_eq!(out, [2, 4, 6, 8]);

        // no new input: the same block is played again
        render(&mut out);
        assert_eq!(out, [2, 4, 6, 8]);

        let stats = bridge.stats();
        assert_eq!(stats.input_callbacks, 1);
        assert_eq!(stats.output_callbacks, 3);
    }

    #[test]
    fn test_only_active_overload_slot_counts() {
        let bridge = CallbackBridge::new(Box::new(|_block: &mut [i16]| {}));
        let first = bridge.overload_listener(0);
        let second = bridge.overload_listener(1);

        first();
        assert_eq!(bridge.stats().overloads, 0);

        bridge.set_active_overload_slot(Some(1));
        first();
        second();
        assert_eq!(bridge.stats().overloads, 1);

        bridge.set_active_overload_slot(None);
        second();
        assert_eq!(bridge.stats().overloads, 1);
    }
}
