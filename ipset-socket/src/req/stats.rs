use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

/// Traffic counters of one client socket.
///
/// Counters are atomic so a shared reference can be read while the socket is
/// in use.
#[derive(Debug, Default)]
pub struct ReqStats {
    bytes_tx: AtomicUsize,
    bytes_rx: AtomicUsize,
    /// Requests that completed successfully.
    answered: AtomicUsize,
    /// Mean round trip of answered requests, in microseconds.
    mean_rtt_us: AtomicU64,
    /// Messages whose sequence number matched no outstanding request.
    discarded: AtomicUsize,
}

impl ReqStats {
    pub(crate) fn record_sent(&self, len: usize) {
        self.bytes_tx.fetch_add(len, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, len: usize) {
        self.bytes_rx.fetch_add(len, Ordering::Relaxed);
    }

    /// Folds the round trip of one answered request into the running mean.
    pub(crate) fn record_answered(&self, rtt: Duration) {
        let n = self.answered.fetch_add(1, Ordering::Relaxed) as u64;
        let mean = self.mean_rtt_us.load(Ordering::Relaxed);
        let sample = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX);

        let updated = (sample.saturating_add(n.saturating_mul(mean))) / (n + 1);
        self.mean_rtt_us.store(updated, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_tx(&self) -> usize {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    pub fn bytes_rx(&self) -> usize {
        self.bytes_rx.load(Ordering::Relaxed)
    }

    pub fn answered(&self) -> usize {
        self.answered.load(Ordering::Relaxed)
    }

    /// Mean round trip of answered requests. Zero before the first answer.
    pub fn rtt(&self) -> Duration {
        Duration::from_micros(self.mean_rtt_us.load(Ordering::Relaxed))
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::Relaxed)
    }
}
