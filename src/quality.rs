/*! Link quality monitor.

Smooths raw SNR and BER samples from the demodulator with exponential
moving averages, counts frame and bit errors, and folds everything
into a single composite score in [0, 1] that the adaptive rate control
consumes.

All arithmetic is single precision and every composition step is
clamped back into [0, 1].
 */
use std::collections::VecDeque;

use log::debug;

/// Bounded history length for the SNR and BER sample logs.
pub const MAX_HISTORY: usize = 100;

/// One snapshot of the smoothed link metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySnapshot {
    pub snr_db: f32,
    pub ber: f32,
    pub fer: f32,
    pub score: f32,
}

/// The monitor.
pub struct LinkQualityMonitor {
    alpha: f32,
    update_period: u64,
    sample_count: u64,

    snr_db: f32,
    ber: f32,
    fer: f32,
    score: f32,

    total_frames: u64,
    error_frames: u64,
    total_bits: u64,
    error_bits: u64,

    snr_history: VecDeque<f32>,
    ber_history: VecDeque<f32>,
}

fn clip(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

impl LinkQualityMonitor {
    /// Create a monitor. `alpha` is the EMA weight of a new sample
    /// (clamped into [0, 1]); the composite score is recomputed every
    /// `update_period` processed samples.
    pub fn new(alpha: f32, update_period: u64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            update_period: update_period.max(1),
            sample_count: 0,
            snr_db: 0.0,
            ber: 0.0,
            fer: 0.0,
            score: 0.5,
            total_frames: 0,
            error_frames: 0,
            total_bits: 0,
            error_bits: 0,
            snr_history: VecDeque::new(),
            ber_history: VecDeque::new(),
        }
    }

    /// Feed one SNR sample (dB).
    pub fn update_snr(&mut self, snr_db: f32) {
        if self.snr_history.is_empty() {
            self.snr_db = snr_db;
        } else {
            self.snr_db = self.alpha * snr_db + (1.0 - self.alpha) * self.snr_db;
        }
        self.snr_history.push_back(snr_db);
        if self.snr_history.len() > MAX_HISTORY {
            self.snr_history.pop_front();
        }
    }

    /// Feed one BER sample.
    pub fn update_ber(&mut self, ber: f32) {
        let ber = clip(ber);
        if self.ber_history.is_empty() {
            self.ber = ber;
        } else {
            self.ber = self.alpha * ber + (1.0 - self.alpha) * self.ber;
        }
        self.ber_history.push_back(ber);
        if self.ber_history.len() > MAX_HISTORY {
            self.ber_history.pop_front();
        }
    }

    /// Account one good frame. Updates the frame error rate at once.
    pub fn record_frame_success(&mut self) {
        self.total_frames += 1;
        self.recompute_fer();
    }

    /// Account one bad frame (FCS or FEC failure).
    pub fn record_frame_error(&mut self) {
        self.total_frames += 1;
        self.error_frames += 1;
        self.recompute_fer();
    }

    /// Account raw bit totals from the FEC layer.
    pub fn record_bits(&mut self, total: u64, errors: u64) {
        self.total_bits += total;
        self.error_bits += errors.min(total);
        if self.total_bits > 0 {
            self.ber = clip(self.error_bits as f32 / self.total_bits as f32);
        }
    }

    /// Account `n` processed samples; recomputes the composite score
    /// once per update period.
    pub fn process_samples(&mut self, n: u64) {
        self.sample_count += n;
        if self.sample_count >= self.update_period {
            self.sample_count = 0;
            self.recompute_score();
        }
    }

    fn recompute_fer(&mut self) {
        if self.total_frames > 0 {
            self.fer = clip(self.error_frames as f32 / self.total_frames as f32);
        }
    }

    fn recompute_score(&mut self) {
        let snr_score = clip((self.snr_db + 10.0) / 30.0);
        let ber_score = clip(1.0 - self.ber * 1000.0);
        let fer_score = clip(1.0 - self.fer * 10.0);
        self.score = clip(0.5 * snr_score + 0.3 * ber_score + 0.2 * fer_score);
        debug!(
            "LinkQualityMonitor: snr {:.1} dB, ber {:.2e}, fer {:.3}, score {:.3}",
            self.snr_db, self.ber, self.fer, self.score
        );
    }

    /// Smoothed SNR in dB.
    pub fn snr(&self) -> f32 {
        self.snr_db
    }

    /// Smoothed BER.
    pub fn ber(&self) -> f32 {
        self.ber
    }

    /// Frame error rate.
    pub fn fer(&self) -> f32 {
        self.fer
    }

    /// Composite score in [0, 1], as of the last update period.
    pub fn score(&self) -> f32 {
        self.score
    }

    /// Everything at once.
    pub fn snapshot(&self) -> QualitySnapshot {
        QualitySnapshot {
            snr_db: self.snr_db,
            ber: self.ber,
            fer: self.fer,
            score: self.score,
        }
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        *self = Self::new(self.alpha, self.update_period);
    }
}

impl Default for LinkQualityMonitor {
    /// The standard smoothing factor and update period.
    fn default() -> Self {
        Self::new(0.1, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn first_sample_initializes_ema() {
        let mut mon = LinkQualityMonitor::default();
        mon.update_snr(12.0);
        close(mon.snr(), 12.0);
        mon.update_snr(0.0);
        close(mon.snr(), 0.9 * 12.0);
    }

    #[test]
    fn ber_clamped_and_smoothed() {
        let mut mon = LinkQualityMonitor::default();
        mon.update_ber(2.0);
        close(mon.ber(), 1.0);
        mon.update_ber(0.0);
        close(mon.ber(), 0.9);
    }

    #[test]
    fn fer_counts() {
        let mut mon = LinkQualityMonitor::default();
        close(mon.fer(), 0.0);
        for _ in 0..9 {
            mon.record_frame_success();
        }
        mon.record_frame_error();
        close(mon.fer(), 0.1);
    }

    #[test]
    fn score_updates_on_period() {
        let mut mon = LinkQualityMonitor::new(0.1, 100);
        mon.update_snr(20.0);
        close(mon.score(), 0.5);
        mon.process_samples(99);
        close(mon.score(), 0.5);
        mon.process_samples(1);
        // snr_score = 1.0, ber and fer perfect.
        close(mon.score(), 1.0);
    }

    #[test]
    fn composite_weighting() {
        let mut mon = LinkQualityMonitor::new(1.0, 1);
        mon.update_snr(5.0);
        mon.update_ber(0.0005);
        for _ in 0..4 {
            mon.record_frame_success();
        }
        mon.record_frame_error();
        mon.process_samples(1);
        // snr (5+10)/30 = 0.5, ber 1-0.5 = 0.5, fer 1-2 -> 0.
        close(mon.score(), 0.5 * 0.5 + 0.3 * 0.5 + 0.2 * 0.0);
    }

    #[test]
    fn score_stays_clamped() {
        let mut mon = LinkQualityMonitor::new(1.0, 1);
        mon.update_snr(100.0);
        mon.process_samples(1);
        assert!(mon.score() <= 1.0);
        mon.update_snr(-100.0);
        mon.update_ber(1.0);
        for _ in 0..10 {
            mon.record_frame_error();
        }
        mon.process_samples(1);
        assert!(mon.score() >= 0.0);
    }

    #[test]
    fn history_bounded() {
        let mut mon = LinkQualityMonitor::default();
        for i in 0..500 {
            mon.update_snr(i as f32);
            mon.update_ber(0.001);
        }
        assert_eq!(mon.snr_history.len(), MAX_HISTORY);
        assert_eq!(mon.ber_history.len(), MAX_HISTORY);
    }

    #[test]
    fn bit_accounting_drives_ber() {
        let mut mon = LinkQualityMonitor::default();
        mon.record_bits(1000, 10);
        close(mon.ber(), 0.01);
        mon.record_bits(1000, 0);
        close(mon.ber(), 0.005);
    }

    #[test]
    fn reset_clears_state() {
        let mut mon = LinkQualityMonitor::default();
        mon.update_snr(20.0);
        mon.record_frame_error();
        mon.reset();
        close(mon.snr(), 0.0);
        close(mon.fer(), 0.0);
        assert!(mon.snr_history.is_empty());
    }
}
