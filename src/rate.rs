/*! Adaptive rate control.

A catalog of modulation modes, each with the SNR window, BER ceiling,
quality floor and bit rate it is good for, plus a hysteretic policy
that walks the catalog as link quality changes.

The catalog is one canonical enumeration. Discriminants 0-8 are the
baseline narrowband modes and match the negotiation wire format;
9-13 are the broadband SOQPSK tiers, which exceed a standard channel
and stay locked out unless tier 4 operation is explicitly enabled.
 */
use log::{debug, info, warn};

/// One modulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModulationMode {
    Fsk2 = 0,
    Fsk4 = 1,
    Fsk8 = 2,
    Fsk16 = 3,
    Bpsk = 4,
    Qpsk = 5,
    Psk8 = 6,
    Qam16 = 7,
    Qam64 = 8,
    Soqpsk1M = 9,
    Soqpsk5M = 10,
    Soqpsk10M = 11,
    Soqpsk20M = 12,
    Soqpsk40M = 13,
}

/// Operating thresholds and rate for one mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeProfile {
    pub snr_min_db: f32,
    pub snr_max_db: f32,
    pub ber_max: f32,
    pub quality_min: f32,
    pub bits_per_second: u32,
}

impl ModulationMode {
    /// Every mode, baseline first, then the tier 4 set.
    pub const ALL: [ModulationMode; 14] = [
        ModulationMode::Fsk2,
        ModulationMode::Fsk4,
        ModulationMode::Fsk8,
        ModulationMode::Fsk16,
        ModulationMode::Bpsk,
        ModulationMode::Qpsk,
        ModulationMode::Psk8,
        ModulationMode::Qam16,
        ModulationMode::Qam64,
        ModulationMode::Soqpsk1M,
        ModulationMode::Soqpsk5M,
        ModulationMode::Soqpsk10M,
        ModulationMode::Soqpsk20M,
        ModulationMode::Soqpsk40M,
    ];

    /// Wire discriminant for the negotiation messages.
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Decode a wire discriminant.
    pub fn from_wire(v: u8) -> Option<ModulationMode> {
        ModulationMode::ALL.get(v as usize).copied()
    }

    /// Broadband SOQPSK tier, beyond standard channel bandwidth.
    pub fn is_tier4(self) -> bool {
        self as u8 >= 9
    }

    /// Operating thresholds and data rate.
    pub fn profile(self) -> ModeProfile {
        use ModulationMode::*;
        let (snr_min_db, snr_max_db, ber_max, quality_min, bits_per_second) = match self {
            Fsk2 => (0.0, 15.0, 1e-2, 0.3, 1200),
            Fsk4 => (8.0, 20.0, 5e-3, 0.5, 2400),
            Fsk8 => (12.0, 25.0, 1e-3, 0.7, 3600),
            Fsk16 => (18.0, 30.0, 5e-4, 0.8, 4800),
            Bpsk => (6.0, 18.0, 1e-2, 0.4, 1200),
            Qpsk => (10.0, 22.0, 5e-3, 0.6, 2400),
            Psk8 => (14.0, 26.0, 1e-3, 0.75, 3600),
            Qam16 => (16.0, 28.0, 5e-4, 0.8, 4800),
            Qam64 => (22.0, 35.0, 1e-4, 0.9, 9600),
            Soqpsk1M => (8.0, 40.0, 1e-3, 0.6, 1_000_000),
            Soqpsk5M => (11.0, 45.0, 5e-4, 0.7, 5_000_000),
            Soqpsk10M => (14.0, 50.0, 5e-4, 0.75, 10_000_000),
            Soqpsk20M => (17.0, 55.0, 1e-4, 0.8, 20_000_000),
            Soqpsk40M => (20.0, 60.0, 1e-4, 0.85, 40_000_000),
        };
        ModeProfile {
            snr_min_db,
            snr_max_db,
            ber_max,
            quality_min,
            bits_per_second,
        }
    }

    /// Bit rate of this mode.
    pub fn bit_rate(self) -> u32 {
        self.profile().bits_per_second
    }
}

/// Hysteretic mode selection policy.
pub struct RateControl {
    current: ModulationMode,
    /// Last mode before the current one; also the fallback when tier 4
    /// gets disabled underneath us.
    last: ModulationMode,
    adaptation_enabled: bool,
    tier4_enabled: bool,
    hysteresis_db: f32,
}

impl RateControl {
    /// Create a controller.
    ///
    /// A tier 4 `initial_mode` decays to 2FSK unless `tier4_enabled`.
    pub fn new(initial_mode: ModulationMode, adaptation_enabled: bool, hysteresis_db: f32) -> Self {
        Self::with_tier4(initial_mode, adaptation_enabled, hysteresis_db, false)
    }

    /// Same, with tier 4 operation switched on from the start.
    pub fn with_tier4(
        initial_mode: ModulationMode,
        adaptation_enabled: bool,
        hysteresis_db: f32,
        tier4_enabled: bool,
    ) -> Self {
        let current = if initial_mode.is_tier4() && !tier4_enabled {
            warn!("RateControl: tier 4 initial mode {initial_mode:?} rejected, using 2FSK");
            ModulationMode::Fsk2
        } else {
            initial_mode
        };
        Self {
            current,
            last: current,
            adaptation_enabled,
            tier4_enabled,
            hysteresis_db,
        }
    }

    /// Current operating mode. The modulator polls this.
    pub fn mode(&self) -> ModulationMode {
        self.current
    }

    /// Bit rate of the current mode.
    pub fn data_rate(&self) -> u32 {
        self.current.bit_rate()
    }

    /// Manually select a mode. A tier 4 mode with tier 4 disabled is
    /// silently ignored.
    pub fn set_mode(&mut self, mode: ModulationMode) {
        if mode.is_tier4() && !self.tier4_enabled {
            warn!("RateControl: tier 4 mode {mode:?} rejected");
            return;
        }
        self.last = self.current;
        self.current = mode;
    }

    /// Enable or disable automatic adaptation.
    pub fn set_adaptation_enabled(&mut self, enabled: bool) {
        self.adaptation_enabled = enabled;
    }

    /// Whether tier 4 modes are currently allowed.
    pub fn tier4_enabled(&self) -> bool {
        self.tier4_enabled
    }

    /// Gate the broadband tiers. Disabling while in a tier 4 mode
    /// falls back to the last narrowband mode, or 2FSK.
    pub fn set_tier4_enabled(&mut self, enabled: bool) {
        self.tier4_enabled = enabled;
        if !enabled && self.current.is_tier4() {
            let fallback = if self.last.is_tier4() { ModulationMode::Fsk2 } else { self.last };
            info!("RateControl: tier 4 disabled, falling back to {fallback:?}");
            self.current = fallback;
            self.last = fallback;
        }
    }

    /// Feed a link quality measurement and adapt with hysteresis.
    pub fn update_quality(&mut self, snr_db: f32, ber: f32, quality_score: f32) {
        if !self.adaptation_enabled {
            return;
        }
        let p = self.current.profile();
        let go_up = snr_db > p.snr_max_db + self.hysteresis_db
            && ber < p.ber_max
            && quality_score > p.quality_min;
        let go_down = snr_db < p.snr_min_db - self.hysteresis_db
            || ber > p.ber_max
            || quality_score < p.quality_min - 0.2;
        if !(go_up || go_down) {
            return;
        }
        let recommended = self.recommend_mode(snr_db, ber);
        if recommended == self.current {
            return;
        }
        let up = recommended.bit_rate() > self.current.bit_rate();
        if (go_up && up) || (go_down && !up) {
            info!(
                "RateControl: {:?} -> {recommended:?} (snr {snr_db:.1} dB, ber {ber:.1e})",
                self.current
            );
            self.last = self.current;
            self.current = recommended;
        } else {
            debug!("RateControl: holding {:?} against {recommended:?}", self.current);
        }
    }

    /// Highest rate mode whose SNR floor and BER ceiling admit the
    /// inputs. The SNR ceiling is an upgrade trigger, not a selection
    /// bound, so better SNR never recommends a slower mode. 2FSK is
    /// the fallback.
    pub fn recommend_mode(&self, snr_db: f32, ber: f32) -> ModulationMode {
        let mut best = ModulationMode::Fsk2;
        let mut best_rate = 0u32;
        for mode in ModulationMode::ALL {
            if mode.is_tier4() && !self.tier4_enabled {
                continue;
            }
            let p = mode.profile();
            if snr_db >= p.snr_min_db && ber <= p.ber_max && p.bits_per_second > best_rate {
                best = mode;
                best_rate = p.bits_per_second;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_discriminants_stable() {
        assert_eq!(ModulationMode::Fsk2.to_wire(), 0);
        assert_eq!(ModulationMode::Qam64.to_wire(), 8);
        assert_eq!(ModulationMode::Soqpsk1M.to_wire(), 9);
        for mode in ModulationMode::ALL {
            assert_eq!(ModulationMode::from_wire(mode.to_wire()), Some(mode));
        }
        assert_eq!(ModulationMode::from_wire(14), None);
    }

    #[test]
    fn tier4_membership() {
        assert!(!ModulationMode::Qam64.is_tier4());
        assert!(ModulationMode::Soqpsk1M.is_tier4());
        assert!(ModulationMode::Soqpsk40M.is_tier4());
    }

    #[test]
    fn tier4_rejected_when_disabled() {
        let mut rc = RateControl::new(ModulationMode::Fsk2, true, 2.0);
        rc.set_mode(ModulationMode::Soqpsk1M);
        assert_eq!(rc.mode(), ModulationMode::Fsk2);
    }

    #[test]
    fn tier4_accepted_when_enabled() {
        let mut rc = RateControl::with_tier4(ModulationMode::Fsk2, true, 2.0, true);
        rc.set_mode(ModulationMode::Soqpsk1M);
        assert_eq!(rc.mode(), ModulationMode::Soqpsk1M);
        assert_eq!(rc.data_rate(), 1_000_000);
    }

    #[test]
    fn tier4_data_rates() {
        let mut rc = RateControl::with_tier4(ModulationMode::Fsk2, true, 2.0, true);
        for (mode, rate) in [
            (ModulationMode::Soqpsk1M, 1_000_000),
            (ModulationMode::Soqpsk5M, 5_000_000),
            (ModulationMode::Soqpsk10M, 10_000_000),
            (ModulationMode::Soqpsk20M, 20_000_000),
            (ModulationMode::Soqpsk40M, 40_000_000),
        ] {
            rc.set_mode(mode);
            assert_eq!(rc.data_rate(), rate);
        }
    }

    #[test]
    fn tier4_initial_mode_decays() {
        let rc = RateControl::new(ModulationMode::Soqpsk1M, true, 2.0);
        assert_eq!(rc.mode(), ModulationMode::Fsk2);
    }

    #[test]
    fn disabling_tier4_falls_back() {
        let mut rc = RateControl::with_tier4(ModulationMode::Qpsk, true, 2.0, true);
        rc.set_mode(ModulationMode::Soqpsk5M);
        rc.set_tier4_enabled(false);
        assert!(!rc.mode().is_tier4());
        assert_eq!(rc.mode(), ModulationMode::Qpsk);
    }

    #[test]
    fn recommend_is_monotone_in_snr() {
        let rc = RateControl::new(ModulationMode::Fsk2, true, 2.0);
        let mut last_rate = 0;
        let mut snr = -5.0f32;
        while snr < 50.0 {
            let rate = rc.recommend_mode(snr, 0.0).bit_rate();
            assert!(
                rate >= last_rate,
                "rate dropped from {last_rate} to {rate} at {snr} dB"
            );
            last_rate = rate;
            snr += 0.25;
        }
    }

    #[test]
    fn recommend_falls_back_to_2fsk() {
        let rc = RateControl::new(ModulationMode::Fsk2, true, 2.0);
        assert_eq!(rc.recommend_mode(-20.0, 0.5), ModulationMode::Fsk2);
    }

    #[test]
    fn hysteresis_prevents_oscillation() {
        // In 4FSK (snr 8..20), hysteresis 2 dB.
        let mut rc = RateControl::new(ModulationMode::Fsk4, true, 2.0);

        // 21 dB is within snr_max + H; no switch.
        rc.update_quality(21.0, 0.0, 0.9);
        assert_eq!(rc.mode(), ModulationMode::Fsk4);

        // 22.1 dB crosses the boundary; switch upward.
        rc.update_quality(22.1, 0.0, 0.9);
        let upgraded = rc.mode();
        assert!(upgraded.bit_rate() > ModulationMode::Fsk4.bit_rate());

        // Dropping back to 21 dB stays above the new mode's floor
        // minus hysteresis; no switch back.
        rc.update_quality(21.0, 0.0, 0.9);
        assert_eq!(rc.mode(), upgraded);
    }

    #[test]
    fn degradation_switches_down() {
        let mut rc = RateControl::new(ModulationMode::Qam64, true, 2.0);
        rc.update_quality(5.0, 0.02, 0.2);
        assert!(rc.mode().bit_rate() < ModulationMode::Qam64.bit_rate());
    }

    #[test]
    fn adaptation_disabled_holds_mode() {
        let mut rc = RateControl::new(ModulationMode::Fsk4, false, 2.0);
        rc.update_quality(30.0, 0.0, 1.0);
        assert_eq!(rc.mode(), ModulationMode::Fsk4);
        rc.set_adaptation_enabled(true);
        rc.update_quality(30.0, 0.0, 1.0);
        assert_ne!(rc.mode(), ModulationMode::Fsk4);
    }
}
