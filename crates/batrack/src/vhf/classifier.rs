//! Active/passive classification of tag frequencies.
//!
//! A tag lying still (a roosting bat, a lost collar) transmits with an almost
//! constant power, while a flying bat produces strongly varying power. Each
//! monitored frequency keeps a short power history to tell the two apart.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::config::VhfConfig;

use super::signal::MatchedSignal;

/// Outcome of classifying one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    /// The signal is outside every monitored band.
    Unmonitored,
    /// The signal is longer than the duration threshold.
    TooLong {
        /// Monitored frequency of the matching band.
        freq_mhz: f64,
    },
    /// The signal is below the power threshold.
    TooWeak {
        /// Monitored frequency of the matching band.
        freq_mhz: f64,
    },
    /// One of the first signals in the window; the tag was absent before.
    Match {
        /// Monitored frequency of the matching band.
        freq_mhz: f64,
        /// Signals in the window.
        count: usize,
    },
    /// The power barely varies; the tag is static.
    LowVariance {
        /// Monitored frequency of the matching band.
        freq_mhz: f64,
        /// Population standard deviation of the window's powers.
        std: f64,
    },
    /// Enough signals with varying power; the tag is moving.
    Active {
        /// Monitored frequency of the matching band.
        freq_mhz: f64,
        /// Signals in the window.
        count: usize,
        /// Population standard deviation of the window's powers.
        std: f64,
    },
}

impl Classification {
    /// Whether the signal should set the trigger.
    #[must_use]
    pub fn triggers(&self) -> bool {
        matches!(self, Self::Match { .. } | Self::Active { .. })
    }

    /// Signals in the window, for triggering classifications.
    #[must_use]
    pub fn count(&self) -> Option<usize> {
        match self {
            Self::Match { count, .. } | Self::Active { count, .. } => Some(*count),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct FrequencyBin {
    freq_mhz: f64,
    lower_hz: f64,
    upper_hz: f64,
    history: VecDeque<(DateTime<Utc>, f64)>,
}

impl FrequencyBin {
    fn contains(&self, frequency_hz: f64) -> bool {
        frequency_hz > self.lower_hz && frequency_hz < self.upper_hz
    }
}

/// Activity window as a time delta; out of range values clamp to zero.
fn window_delta(window_s: f64) -> TimeDelta {
    std::time::Duration::try_from_secs_f64(window_s)
        .ok()
        .and_then(|d| TimeDelta::from_std(d).ok())
        .unwrap_or_else(TimeDelta::zero)
}

/// Power histories of all monitored frequencies.
#[derive(Debug, Clone)]
pub struct FrequencyBins {
    bins: Vec<FrequencyBin>,
    threshold_dbw: f64,
    duration_threshold_s: f64,
    window: TimeDelta,
    active_var: f64,
    active_count: usize,
}

impl FrequencyBins {
    /// Build one band of width `freq_bw_hz` around every monitored frequency.
    #[must_use]
    pub fn new(config: &VhfConfig) -> Self {
        let half_bw = f64::from(config.freq_bw_hz) / 2.0;
        let bins = config
            .sig_freqs_mhz
            .iter()
            .map(|&freq_mhz| {
                let centre = (freq_mhz * 1_000_000.0).trunc();
                FrequencyBin {
                    freq_mhz,
                    lower_hz: centre - half_bw,
                    upper_hz: centre + half_bw,
                    history: VecDeque::new(),
                }
            })
            .collect();

        Self {
            bins,
            threshold_dbw: config.sig_threshold_dbw,
            duration_threshold_s: config.sig_duration_threshold_s,
            window: window_delta(config.freq_active_window_s),
            active_var: config.freq_active_var,
            active_count: config.freq_active_count,
        }
    }

    /// Number of monitored frequencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether no frequency is monitored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Signals currently remembered for a monitored frequency.
    #[must_use]
    pub fn history_len(&self, freq_mhz: f64) -> usize {
        self.bins
            .iter()
            .find(|b| (b.freq_mhz - freq_mhz).abs() < f64::EPSILON)
            .map_or(0, |b| b.history.len())
    }

    /// Classify a signal, updating the history of its band.
    pub fn classify(&mut self, signal: &MatchedSignal) -> Classification {
        let power = signal.power_dbw();
        let Some(bin) = self.bins.iter_mut().find(|b| b.contains(signal.frequency_hz)) else {
            debug!(
                "signal {:.3} MHz: not monitored, discarding",
                signal.frequency_hz / 1_000_000.0
            );
            return Classification::Unmonitored;
        };
        let freq_mhz = bin.freq_mhz;

        if self.duration_threshold_s > 0.0 && signal.duration_s > self.duration_threshold_s {
            debug!(
                "signal {:.3} MHz, {:.3} s: too long, discarding",
                freq_mhz, signal.duration_s
            );
            return Classification::TooLong { freq_mhz };
        }

        // weak signals still count towards the variance
        bin.history.push_back((signal.ts, power));

        if power < self.threshold_dbw {
            debug!("signal {:.3} MHz, {:.3} dBW: too weak, discarding", freq_mhz, power);
            return Classification::TooWeak { freq_mhz };
        }

        let window = self.window;
        bin.history.retain(|(ts, _)| signal.ts - *ts < window);

        let count = bin.history.len();
        if count < self.active_count {
            debug!(
                "signal {:.3} MHz, {:.3} dBW: one of the first signals, match",
                freq_mhz, power
            );
            return Classification::Match { freq_mhz, count };
        }

        let std = population_std(bin.history.iter().map(|(_, p)| *p));
        if std < self.active_var {
            debug!(
                "signal {:.3} MHz, {:.3} dBW: power variance low ({:.3}), discarding",
                freq_mhz, power, std
            );
            return Classification::LowVariance { freq_mhz, std };
        }

        debug!(
            "signal {:.3} MHz, {:.3} dBW: met all conditions (count: {}, std: {:.3})",
            freq_mhz, power, count, std
        );
        Classification::Active {
            freq_mhz,
            count,
            std,
        }
    }
}

fn population_std(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let mean = values.clone().sum::<f64>() / n;
    (values.map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}
