//! Bounded FIFO of numeric samples with O(1) minimum, maximum and average.

use std::cell::Cell;
use std::collections::VecDeque;
use std::collections::vec_deque::Iter;

/// Fixed-capacity FIFO window of samples.
///
/// Pushing into a full window evicts the oldest sample. Minimum and maximum
/// are tracked with monotonic deques so that both stay O(1) amortized under
/// eviction. The running sum is compensated (Neumaier) so evictions do not
/// accumulate rounding error, and the average is memoized until the next
/// mutation, never leaving `[minimum, maximum]`.
///
/// # Example
///
/// ```
/// use rtc_adaptive::SampleWindow;
///
/// let mut window = SampleWindow::new(3);
/// window.push(4.0);
/// window.push(1.0);
/// window.push(7.0);
/// window.push(2.0); // evicts 4.0
///
/// assert_eq!(window.minimum(), Some(1.0));
/// assert_eq!(window.maximum(), Some(7.0));
/// assert_eq!(window.average(), Some(10.0 / 3.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SampleWindow {
    capacity: Option<usize>,
    samples: VecDeque<f64>,
    sum: f64,
    /// Low order bits lost by `sum`.
    compensation: f64,
    /// Non-increasing candidates for maximum, front is the maximum.
    max_queue: VecDeque<f64>,
    /// Non-decreasing candidates for minimum, front is the minimum.
    min_queue: VecDeque<f64>,
    average: Cell<Option<f64>>,
}

impl SampleWindow {
    /// Create a window evicting beyond `capacity` samples.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            samples: VecDeque::with_capacity(capacity.max(1)),
            ..Default::default()
        }
    }

    /// Create a window that never evicts.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|c| self.samples.len() >= c)
    }

    /// Append a sample, returning the evicted one if the window was full.
    ///
    /// Non-finite values are rejected and leave the window untouched.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            log::warn!("sample window rejected non-finite sample {value}");
            return None;
        }

        let evicted = if self.is_full() { self.pop() } else { None };

        self.samples.push_back(value);
        self.accumulate(value);
        self.average.set(None);

        while self.max_queue.back().is_some_and(|&v| v < value) {
            self.max_queue.pop_back();
        }
        self.max_queue.push_back(value);

        while self.min_queue.back().is_some_and(|&v| v > value) {
            self.min_queue.pop_back();
        }
        self.min_queue.push_back(value);

        evicted
    }

    /// Remove and return the oldest sample.
    pub fn pop(&mut self) -> Option<f64> {
        let value = self.samples.pop_front()?;
        self.average.set(None);

        if self.samples.is_empty() {
            self.sum = 0.0;
            self.compensation = 0.0;
        } else {
            self.accumulate(-value);
        }

        if self.max_queue.front() == Some(&value) {
            self.max_queue.pop_front();
        }
        if self.min_queue.front() == Some(&value) {
            self.min_queue.pop_front();
        }

        Some(value)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.max_queue.clear();
        self.min_queue.clear();
        self.sum = 0.0;
        self.compensation = 0.0;
        self.average.set(None);
    }

    fn accumulate(&mut self, value: f64) {
        let sum = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - sum) + value;
        } else {
            self.compensation += (value - sum) + self.sum;
        }
        self.sum = sum;
    }

    pub fn minimum(&self) -> Option<f64> {
        self.min_queue.front().copied()
    }

    pub fn maximum(&self) -> Option<f64> {
        self.max_queue.front().copied()
    }

    pub fn sum(&self) -> f64 {
        self.sum + self.compensation
    }

    /// Average of the held samples, `None` when empty.
    ///
    /// Memoized until the next `push`, `pop` or `clear`.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        if let Some(average) = self.average.get() {
            return Some(average);
        }
        let (minimum, maximum) = (self.minimum()?, self.maximum()?);
        let average = (self.sum() / self.samples.len() as f64).clamp(minimum, maximum);
        self.average.set(Some(average));
        Some(average)
    }

    /// Most recent sample.
    pub fn back(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> Iter<'_, f64> {
        self.samples.iter()
    }
}
