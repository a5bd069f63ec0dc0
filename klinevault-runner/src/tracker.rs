//! Completion barrier for fire-and-forget workers.
//!
//! A tracker counts the completions it expects, hands out one single-use
//! [`CompletionReporter`] per unit of work, and blocks in [`CompletionTracker::wait`]
//! until every expected unit has reported. Failures are collected rather than
//! short-circuiting: one bad unit never stops its siblings.
//!
//! Only the driver that owns the tracker can raise `expected` (it takes
//! `&mut self`); workers only ever hold reporters.

use crate::error::PipelineError;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error};

type Completion<T> = Result<T, PipelineError>;

/// Counts asynchronous completions for one phase.
pub struct CompletionTracker<T = ()> {
    label: String,
    expected: usize,
    tx: Sender<Completion<T>>,
    rx: Receiver<Completion<T>>,
}

impl<T: Send> CompletionTracker<T> {
    pub fn new(label: impl Into<String>, expected: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            label: label.into(),
            expected,
            tx,
            rx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Count one more unit and return the reporter it must complete through.
    pub fn expect_one(&mut self, unit: impl Into<String>) -> CompletionReporter<T> {
        self.expected += 1;
        self.reporter(unit)
    }

    /// Reporter for a unit already included in `expected`.
    pub fn reporter(&self, unit: impl Into<String>) -> CompletionReporter<T> {
        CompletionReporter {
            unit: unit.into(),
            tx: Some(self.tx.clone()),
        }
    }

    /// Block until `expected` completions have arrived, then log every failure.
    pub fn wait(self, verbose: bool) -> TrackerOutcome<T> {
        let Self {
            label,
            expected,
            tx,
            rx,
        } = self;
        // Only reporters keep the channel open from here on.
        drop(tx);

        let mut values = Vec::with_capacity(expected);
        let mut errors = Vec::new();
        let mut received = 0;
        while received < expected {
            match rx.recv() {
                Ok(Ok(value)) => values.push(value),
                Ok(Err(err)) => errors.push(err),
                Err(_) => break,
            }
            received += 1;
        }

        // Every reporter is gone but the count is short.
        for missing in received..expected {
            errors.push(PipelineError::Abandoned {
                unit: format!("{label} unit #{}", missing + 1),
            });
        }

        for err in &errors {
            error!(tracker = %label, "{}", err.describe(verbose));
        }
        debug!(
            tracker = %label,
            expected,
            failed = errors.len(),
            "barrier cleared"
        );

        TrackerOutcome {
            label,
            expected,
            values,
            errors,
        }
    }
}

/// Single-use handle a worker reports its one completion through.
///
/// Dropping a reporter without reporting counts as a failed completion, so a
/// panicking worker cannot leave its tracker waiting forever.
pub struct CompletionReporter<T = ()> {
    unit: String,
    tx: Option<Sender<Completion<T>>>,
}

impl<T> CompletionReporter<T> {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn report(mut self, result: Result<T, PipelineError>) {
        if let Some(tx) = self.tx.take() {
            if tx.send(result).is_err() {
                debug!(unit = %self.unit, "completion reported after its tracker was drained");
            }
        }
    }

    pub fn success(self, value: T) {
        self.report(Ok(value));
    }

    pub fn error(self, err: PipelineError) {
        self.report(Err(err));
    }
}

impl CompletionReporter<()> {
    pub fn report_success(self) {
        self.success(());
    }
}

impl<T> Drop for CompletionReporter<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(PipelineError::Abandoned {
                unit: std::mem::take(&mut self.unit),
            }));
        }
    }
}

/// What a tracker collected once its barrier cleared.
#[derive(Debug)]
pub struct TrackerOutcome<T = ()> {
    pub label: String,
    pub expected: usize,
    pub values: Vec<T>,
    pub errors: Vec<PipelineError>,
}

impl<T> TrackerOutcome<T> {
    pub fn succeeded(&self) -> usize {
        self.values.len()
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
