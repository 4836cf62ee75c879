//! Ring-buffer averaging of ADC conversions

use heapless::HistoryBuffer;

/// Mean of the last `N` samples
///
/// Until `N` samples arrive, the mean covers the samples seen so far.
pub struct MovingAverage<const N: usize> {
    window: HistoryBuffer<u32, N>,
}

impl<const N: usize> MovingAverage<N> {
    pub const fn new() -> Self {
        MovingAverage {
            window: HistoryBuffer::new(),
        }
    }

    pub fn push(&mut self, sample: u32) {
        self.window.write(sample);
    }

    /// Replace every sample with `sample`
    pub fn fill(&mut self, sample: u32) {
        self.window.clear();
        for _ in 0..N {
            self.window.write(sample);
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.window.len() == 0
    }

    /// Returns the mean, or `None` if there are no samples
    pub fn value(&self) -> Option<u32> {
        let samples = self.window.as_slice();
        if samples.is_empty() {
            return None;
        }
        let sum: u64 = samples.iter().map(|&s| u64::from(s)).sum();
        Some((sum / samples.len() as u64) as u32)
    }
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}
