//! Progress accounting.
//!
//! Codecs feed raw counters (bytes or entries processed) into a
//! [`ProgressAccountant`], which turns them into completion fractions and
//! forwards them to the caller's callback. The accountant guarantees the
//! sequence it emits is non-decreasing, stays within `[0.0, 1.0]`, and that a
//! finished operation ends on exactly `1.0`.

use crate::ProgressCallback;
use std::io::{self, Read};

/// Midpoint reported by streaming codecs that cannot know their total.
pub const COARSE_MIDPOINT: f32 = 0.5;

pub struct ProgressAccountant<'a> {
    sink: &'a ProgressCallback<'a>,
    total: u64,
    processed: u64,
    last: Option<f32>,
}

impl<'a> ProgressAccountant<'a> {
    pub fn new(sink: &'a ProgressCallback<'a>) -> Self {
        Self {
            sink,
            total: 0,
            processed: 0,
            last: None,
        }
    }

    /// Set the denominator for [`advance`](Self::advance). The processed
    /// counter is reset; already emitted fractions are never revisited.
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
        self.processed = 0;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Record `amount` more units processed and report `processed / total`.
    /// Does nothing while the total is unknown (zero).
    pub fn advance(&mut self, amount: u64) {
        self.processed = self.processed.saturating_add(amount);
        if self.total > 0 {
            let fraction = self.processed as f64 / self.total as f64;
            self.report(fraction as f32);
        }
    }

    /// Report an explicit fraction, for codecs with coarse progress.
    pub fn report(&mut self, fraction: f32) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        match self.last {
            Some(last) if fraction <= last => {}
            _ => {
                self.last = Some(fraction);
                (self.sink)(fraction);
            }
        }
    }

    /// Emit the terminal `1.0` sample of a successful operation, unless the
    /// last sample already was `1.0`.
    pub fn finish(&mut self) {
        if self.last == Some(1.0) {
            return;
        }
        self.last = Some(1.0);
        (self.sink)(1.0);
    }

    /// Last fraction handed to the callback.
    pub fn last(&self) -> f32 {
        self.last.unwrap_or(0.0)
    }
}

/// Reader adapter that feeds every byte it yields into a byte-scaled
/// accountant.
pub struct ProgressReader<'p, 'a, R> {
    inner: R,
    progress: &'p mut ProgressAccountant<'a>,
}

impl<'p, 'a, R: Read> ProgressReader<'p, 'a, R> {
    pub fn new(inner: R, progress: &'p mut ProgressAccountant<'a>) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for ProgressReader<'_, '_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.advance(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<f32>>>, Box<ProgressCallback<'static>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        let cb: Box<ProgressCallback<'static>> =
            Box::new(move |p: f32| sink.lock().unwrap().push(p));
        (samples, cb)
    }

    #[test]
    fn test_bytes_progress_is_monotonic_and_finishes_at_one() {
        let (samples, cb) = recorder();
        let mut progress = ProgressAccountant::new(cb.as_ref());
        progress.set_total(100);
        progress.advance(25);
        progress.advance(25);
        progress.report(0.1); // stale value must not be emitted
        progress.advance(50);
        progress.finish();

        let samples = samples.lock().unwrap();
        assert_eq!(*samples, vec![0.25, 0.5, 1.0]);
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_unknown_total_reports_nothing_until_finish() {
        let (samples, cb) = recorder();
        let mut progress = ProgressAccountant::new(cb.as_ref());
        progress.advance(4096);
        progress.finish();
        assert_eq!(*samples.lock().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_report_clamps_out_of_range() {
        let (samples, cb) = recorder();
        let mut progress = ProgressAccountant::new(cb.as_ref());
        progress.report(-1.0);
        progress.report(7.0);
        assert_eq!(*samples.lock().unwrap(), vec![0.0, 1.0]);
        assert_eq!(progress.last(), 1.0);
    }

    #[test]
    fn test_progress_reader_counts_bytes() {
        let (samples, cb) = recorder();
        let mut progress = ProgressAccountant::new(cb.as_ref());
        progress.set_total(8);
        let mut reader = ProgressReader::new(&b"abcdefgh"[..], &mut progress);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(samples.lock().unwrap().last().copied(), Some(1.0));

        progress.finish();
        let samples = samples.lock().unwrap();
        assert_eq!(samples.iter().filter(|p| **p == 1.0).count(), 1);
    }
}
