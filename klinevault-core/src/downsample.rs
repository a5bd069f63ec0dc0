//! Row downsampling.
//!
//! Keeps one row out of every `interval` consecutive rows: the last row of
//! each run. An interval of 0 or 1 keeps every row.

/// Advance `counter` and decide whether the current row is kept.
///
/// The counter is reset to zero whenever a row is kept.
pub fn should_keep(counter: &mut u32, interval: u32) -> bool {
    *counter += 1;
    if *counter >= interval {
        *counter = 0;
        true
    } else {
        false
    }
}

/// Downsampling state owned by one extraction task.
#[derive(Debug, Clone)]
pub struct Downsampler {
    interval: u32,
    counter: u32,
}

impl Downsampler {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            counter: 0,
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn keep(&mut self) -> bool {
        should_keep(&mut self.counter, self.interval)
    }
}
