//! Constant-Q tiling of the (Q, frequency, time) plane.
//!
//! Planes, rows and tiles are spaced so that neighbouring tiles lose at
//! most `mismatch` of the energy of a signal lying between them.

use crate::error::{PipelineError, Result};
use crate::util::next_power_of_two;
use std::f64::consts::PI;

/// Frequency span of the bisquare window relative to `f / Q`.
fn sqrt_11() -> f64 {
    11f64.sqrt()
}

/// Distance between neighbouring tiles in mismatch-metric units.
pub fn mismatch_step(mismatch: f64) -> f64 {
    2.0 * (mismatch / 3.0).sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub struct QTiling {
    pub duration: f64,
    pub sample_rate: f64,
    pub qrange: (f64, f64),
    pub frange: (f64, f64),
    pub mismatch: f64,
}

impl QTiling {
    pub fn new(
        duration: f64,
        sample_rate: f64,
        qrange: (f64, f64),
        frange: (f64, f64),
        mismatch: f64,
    ) -> Result<Self> {
        if !(qrange.0 > 0.0 && qrange.1 >= qrange.0 && qrange.1.is_finite()) {
            return Err(PipelineError::InvalidInput(format!(
                "invalid Q range {:?}",
                qrange
            )));
        }
        if !(frange.0 >= 0.0 && frange.1 > frange.0) {
            return Err(PipelineError::InvalidInput(format!(
                "invalid frequency range {:?}",
                frange
            )));
        }
        if !(mismatch > 0.0 && mismatch < 0.5) {
            return Err(PipelineError::InvalidInput(format!(
                "mismatch must be in (0, 0.5), got {}",
                mismatch
            )));
        }
        if !(duration > 0.0 && sample_rate > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "duration {} s and sample rate {} Hz must be positive",
                duration, sample_rate
            )));
        }
        Ok(Self {
            duration,
            sample_rate,
            qrange,
            frange,
            mismatch,
        })
    }

    pub fn deltam(&self) -> f64 {
        mismatch_step(self.mismatch)
    }

    /// Q values, log-spaced across the range.
    pub fn q_values(&self) -> Vec<f64> {
        let (qmin, qmax) = self.qrange;
        let cumulative = (qmax / qmin).ln() / 2f64.sqrt();
        let nplanes = ((cumulative / self.deltam()).ceil() as usize).max(1);
        let dq = cumulative / nplanes as f64;
        (0..nplanes)
            .map(|i| qmin * (2f64.sqrt() * dq * (i as f64 + 0.5)).exp())
            .collect()
    }

    /// Planes with at least one row; low-Q planes come first.
    pub fn planes(&self) -> Vec<QPlane> {
        self.q_values()
            .into_iter()
            .filter_map(|q| QPlane::new(q, self.frange, self.duration, self.sample_rate, self.mismatch))
            .collect()
    }
}

/// All rows sharing one quality factor.
#[derive(Debug, Clone, PartialEq)]
pub struct QPlane {
    pub q: f64,
    /// Frequency range after clipping to what this Q can resolve.
    pub frange: (f64, f64),
    pub duration: f64,
    pub sample_rate: f64,
    pub mismatch: f64,
}

impl QPlane {
    /// `None` when the clipped frequency range is empty.
    pub fn new(q: f64, frange: (f64, f64), duration: f64, sample_rate: f64, mismatch: f64) -> Option<Self> {
        // lowest frequency with a few cycles per window, highest whose window
        // stays below Nyquist
        let floor = 50.0 * q / (2.0 * PI * duration);
        let ceiling = sample_rate / 2.0 / (1.0 + sqrt_11() / q);
        let lo = frange.0.max(floor);
        let hi = frange.1.min(ceiling);
        if !(hi > lo) {
            return None;
        }
        Some(Self {
            q,
            frange: (lo, hi),
            duration,
            sample_rate,
            mismatch,
        })
    }

    /// Central frequencies, increasing, quantized to the data resolution.
    pub fn frequencies(&self) -> Vec<f64> {
        let (lo, hi) = self.frange;
        let deltam = mismatch_step(self.mismatch);
        let spread = (2.0 + self.q * self.q).sqrt();
        let cumulative = (hi / lo).ln() * spread / 2.0;
        let nfreq = ((cumulative / deltam).ceil() as usize).max(1);
        let fstep = cumulative / nfreq as f64;
        let resolution = 1.0 / self.duration;
        let mut freqs: Vec<f64> = (0..nfreq)
            .map(|i| {
                let f = lo * (2.0 / spread * (i as f64 + 0.5) * fstep).exp();
                (f / resolution).floor() * resolution
            })
            .filter(|&f| f > 0.0)
            .collect();
        freqs.dedup();
        freqs
    }

    pub fn rows(&self) -> Vec<QRow> {
        self.frequencies()
            .into_iter()
            .map(|f| QRow {
                q: self.q,
                frequency: f,
                duration: self.duration,
                sample_rate: self.sample_rate,
                mismatch: self.mismatch,
            })
            .collect()
    }
}

/// Tiles of one (Q, frequency) pair across the whole duration.
#[derive(Debug, Clone, PartialEq)]
pub struct QRow {
    pub q: f64,
    pub frequency: f64,
    pub duration: f64,
    pub sample_rate: f64,
    pub mismatch: f64,
}

impl QRow {
    fn qprime(&self) -> f64 {
        self.q / sqrt_11()
    }

    /// Width of the frequency-domain window in bins (always odd).
    pub fn window_size(&self) -> usize {
        2 * (self.frequency / self.qprime() * self.duration) as usize + 1
    }

    pub fn ntiles(&self) -> usize {
        let cumulative = self.duration * 2.0 * PI * self.frequency / self.q;
        next_power_of_two(cumulative / mismatch_step(self.mismatch))
            .max(next_power_of_two(self.window_size() as f64))
    }

    pub fn tile_duration(&self) -> f64 {
        self.duration / self.ntiles() as f64
    }

    /// Bin offsets of the window relative to the row frequency.
    pub fn offsets(&self) -> std::ops::RangeInclusive<i64> {
        let half = ((self.window_size() - 1) / 2) as i64;
        -half..=half
    }

    /// Bisquare window over [`QRow::offsets`].
    pub fn window(&self) -> Vec<f64> {
        let qprime = self.qprime();
        self.offsets()
            .map(|j| {
                let x = j as f64 / self.duration * qprime / self.frequency;
                (1.0 - x * x).powi(2)
            })
            .collect()
    }

    /// Data bin at the row frequency.
    pub fn center_bin(&self) -> i64 {
        (self.frequency * self.duration).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiling(mismatch: f64) -> QTiling {
        QTiling::new(8.0, 1024.0, (4.0, 64.0), (0.0, f64::INFINITY), mismatch).unwrap()
    }

    #[test]
    fn test_q_values_cover_range() {
        let qs = tiling(0.2).q_values();
        assert!(qs.len() >= 2);
        assert!(qs.windows(2).all(|w| w[1] > w[0]));
        assert!(qs[0] > 4.0 && *qs.last().unwrap() < 64.0);
        // geometric spacing
        let r0 = qs[1] / qs[0];
        let r1 = qs[qs.len() - 1] / qs[qs.len() - 2];
        assert!((r0 - r1).abs() < 1e-9);
    }

    #[test]
    fn test_smaller_mismatch_tiles_denser() {
        let coarse = tiling(0.35);
        let fine = tiling(0.05);
        assert!(fine.q_values().len() > coarse.q_values().len());
        let q = 20.0;
        let p_coarse = QPlane::new(q, coarse.frange, 8.0, 1024.0, 0.35).unwrap();
        let p_fine = QPlane::new(q, fine.frange, 8.0, 1024.0, 0.05).unwrap();
        assert!(p_fine.frequencies().len() > p_coarse.frequencies().len());
    }

    #[test]
    fn test_higher_q_has_more_rows() {
        let low = QPlane::new(5.0, (20.0, 400.0), 8.0, 1024.0, 0.2).unwrap();
        let high = QPlane::new(50.0, (20.0, 400.0), 8.0, 1024.0, 0.2).unwrap();
        assert!(high.frequencies().len() > low.frequencies().len());
    }

    #[test]
    fn test_plane_clipping() {
        let plane = QPlane::new(10.0, (0.0, f64::INFINITY), 4.0, 256.0, 0.2).unwrap();
        let (lo, hi) = plane.frange;
        assert!((lo - 50.0 * 10.0 / (2.0 * PI * 4.0)).abs() < 1e-12);
        assert!(hi < 128.0);
        for row in plane.rows() {
            assert!(row.frequency >= lo - 0.25 && row.frequency <= hi);
            // window never reaches past Nyquist
            let top = row.center_bin() + *row.offsets().end();
            assert!((top as f64) / 4.0 <= 128.0);
        }
        assert!(QPlane::new(10.0, (200.0, 300.0), 4.0, 256.0, 0.2).is_none());
    }

    #[test]
    fn test_row_geometry() {
        let row = QRow {
            q: 8.0,
            frequency: 100.0,
            duration: 4.0,
            sample_rate: 1024.0,
            mismatch: 0.2,
        };
        assert_eq!(row.window_size() % 2, 1);
        assert!(row.ntiles().is_power_of_two());
        assert!(row.ntiles() >= row.window_size());
        let w = row.window();
        assert_eq!(w.len(), row.window_size());
        let mid = w.len() / 2;
        assert_eq!(w[mid], 1.0);
        assert!(w[0] < 0.05 && w[w.len() - 1] < 0.05);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(QTiling::new(8.0, 1024.0, (0.0, 64.0), (0.0, 100.0), 0.2).is_err());
        assert!(QTiling::new(8.0, 1024.0, (4.0, 64.0), (100.0, 10.0), 0.2).is_err());
        assert!(QTiling::new(8.0, 1024.0, (4.0, 64.0), (0.0, 100.0), 0.9).is_err());
    }
}
