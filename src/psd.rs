//! Welch power spectral density estimation.

use crate::error::{PipelineError, Result};
use crate::fourier::Fourier;
use crate::series::{Domain, PowerSpectralDensity, TimeSeries};
use log::debug;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Bins are floored to this fraction of the loudest bin.
const RELATIVE_FLOOR: f64 = 1e-30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowFunction {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl WindowFunction {
    /// Periodic window coefficients.
    pub fn generate(&self, size: usize) -> Vec<f64> {
        let n = size as f64;
        (0..size)
            .map(|i| {
                let x = i as f64 / n;
                match self {
                    WindowFunction::Rectangular => 1.0,
                    WindowFunction::Hann => 0.5 * (1.0 - (2.0 * PI * x).cos()),
                    WindowFunction::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
                    WindowFunction::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                    }
                }
            })
            .collect()
    }
}

impl std::str::FromStr for WindowFunction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rect" | "rectangular" | "none" => Ok(WindowFunction::Rectangular),
            "hann" | "hanning" => Ok(WindowFunction::Hann),
            "hamming" => Ok(WindowFunction::Hamming),
            "blackman" => Ok(WindowFunction::Blackman),
            other => Err(anyhow::anyhow!("unknown window function '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Averaging {
    Mean,
    #[default]
    Median,
}

impl std::str::FromStr for Averaging {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(Averaging::Mean),
            "median" => Ok(Averaging::Median),
            other => Err(anyhow::anyhow!("unknown averaging method '{}'", other)),
        }
    }
}

pub struct PsdEstimator {
    pub window: WindowFunction,
    pub averaging: Averaging,
    fourier: Fourier,
}

impl Default for PsdEstimator {
    fn default() -> Self {
        Self::new(WindowFunction::default(), Averaging::default())
    }
}

impl PsdEstimator {
    pub fn new(window: WindowFunction, averaging: Averaging) -> Self {
        Self {
            window,
            averaging,
            fourier: Fourier::new(),
        }
    }

    /// One-sided PSD of `series` from overlapping windowed segments.
    ///
    /// The resolution is `1 / segment_duration`. At least two full segments
    /// must fit in the input.
    pub fn estimate(
        &self,
        series: &TimeSeries,
        segment_duration: f64,
        overlap_fraction: f64,
    ) -> Result<PowerSpectralDensity> {
        series.expect_domain(Domain::Time, "PSD input")?;
        if !(segment_duration.is_finite() && segment_duration > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "segment duration must be positive, got {}",
                segment_duration
            )));
        }
        if !(0.0..1.0).contains(&overlap_fraction) {
            return Err(PipelineError::InvalidInput(format!(
                "overlap fraction must be in [0, 1), got {}",
                overlap_fraction
            )));
        }

        let fs = series.sample_rate();
        let nperseg = (segment_duration * fs).round() as usize;
        if nperseg < 2 {
            return Err(PipelineError::InvalidInput(format!(
                "segment of {} s holds fewer than two samples at {} Hz",
                segment_duration, fs
            )));
        }
        let step = ((nperseg as f64 * (1.0 - overlap_fraction)).round() as usize).max(1);
        let samples = series.data();
        let nseg = if samples.len() < nperseg {
            0
        } else {
            (samples.len() - nperseg) / step + 1
        };
        if nseg < 2 {
            return Err(PipelineError::InsufficientData(format!(
                "{} s of data fits {} segment(s) of {} s, need at least 2",
                series.span(),
                nseg,
                segment_duration
            )));
        }
        debug!(
            "Welch PSD: {} segments of {} samples, step {}, {:?} averaging",
            nseg, nperseg, step, self.averaging
        );

        let window = self.window.generate(nperseg);
        let win_norm: f64 = window.iter().map(|w| w * w).sum();
        let nfreq = nperseg / 2 + 1;
        let scale = 1.0 / (fs * win_norm);

        let mut periodograms: Vec<Vec<f64>> = Vec::with_capacity(nseg);
        for s in 0..nseg {
            let start = s * step;
            let segment: Vec<f64> = samples[start..start + nperseg]
                .iter()
                .zip(window.iter())
                .map(|(x, w)| x * w)
                .collect();
            let spectrum = self.fourier.forward_real(&segment);
            let power: Vec<f64> = spectrum
                .iter()
                .take(nfreq)
                .enumerate()
                .map(|(k, c)| {
                    let one_sided = if k == 0 || (nperseg % 2 == 0 && k == nperseg / 2) {
                        1.0
                    } else {
                        2.0
                    };
                    c.norm_sqr() * scale * one_sided
                })
                .collect();
            periodograms.push(power);
        }

        let mut psd = match self.averaging {
            Averaging::Mean => (0..nfreq)
                .map(|k| periodograms.iter().map(|p| p[k]).sum::<f64>() / nseg as f64)
                .collect::<Vec<f64>>(),
            Averaging::Median => {
                let bias = median_bias(nseg);
                (0..nfreq)
                    .map(|k| {
                        let mut column: Vec<f64> = periodograms.iter().map(|p| p[k]).collect();
                        crate::util::median(&mut column) / bias
                    })
                    .collect()
            }
        };

        floor_bins(&mut psd)?;
        PowerSpectralDensity::frequency(psd, fs / nperseg as f64, 0.0)
    }
}

/// Raises every bin to a positive floor so later divisions are safe.
fn floor_bins(psd: &mut [f64]) -> Result<()> {
    if let Some(bad) = psd.iter().position(|v| !v.is_finite()) {
        return Err(PipelineError::NumericalInstability(format!(
            "PSD bin {} is not finite",
            bad
        )));
    }
    let peak = psd.iter().cloned().fold(0.0, f64::max);
    let floor = (peak * RELATIVE_FLOOR).max(f64::MIN_POSITIVE);
    let mut floored = 0;
    for v in psd.iter_mut() {
        if *v < floor {
            *v = floor;
            floored += 1;
        }
    }
    if floored > 0 {
        debug!("Floored {} PSD bin(s) to {:e}", floored, floor);
    }
    Ok(())
}

/// Expected ratio of the median to the mean of `n` chi-squared(2) periodograms.
pub fn median_bias(n: usize) -> f64 {
    let mut bias = 1.0;
    let mut k = 1;
    while k <= n.saturating_sub(1) / 2 {
        bias += 1.0 / (2 * k + 1) as f64 - 1.0 / (2 * k) as f64;
        k += 1;
    }
    bias
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::GaussianNoise;

    fn white(seconds: f64, fs: f64, sigma: f64, seed: u64) -> TimeSeries {
        GaussianNoise::new(seed).white((seconds * fs) as usize, sigma, fs, 0.0).unwrap()
    }

    fn mean_and_spread(psd: &PowerSpectralDensity, expected: f64) -> (f64, f64) {
        // skip DC and Nyquist, which carry half the degrees of freedom
        let inner = &psd.data()[1..psd.len() - 1];
        let mean = inner.iter().sum::<f64>() / inner.len() as f64;
        let spread = (inner
            .iter()
            .map(|v| (v / expected - 1.0).powi(2))
            .sum::<f64>()
            / inner.len() as f64)
            .sqrt();
        (mean, spread)
    }

    #[test]
    fn test_white_noise_level() {
        let fs = 256.0;
        let sigma = 2.0;
        let estimator = PsdEstimator::new(WindowFunction::Hann, Averaging::Mean);
        let expected = 2.0 * sigma * sigma / fs;

        let short = estimator.estimate(&white(16.0, fs, sigma, 7), 2.0, 0.5).unwrap();
        let long = estimator.estimate(&white(256.0, fs, sigma, 7), 2.0, 0.5).unwrap();

        assert!((short.delta() - 0.5).abs() < 1e-12);
        assert_eq!(short.len(), 257);

        let (mean_short, spread_short) = mean_and_spread(&short, expected);
        let (mean_long, spread_long) = mean_and_spread(&long, expected);
        assert!((mean_short / expected - 1.0).abs() < 0.1, "mean {}", mean_short);
        assert!((mean_long / expected - 1.0).abs() < 0.03, "mean {}", mean_long);
        // 15 vs 255 averaged segments
        assert!(spread_long < spread_short / 2.0);
        assert!(spread_long < 0.15);

        // one-sided: folding back to two sides gives sigma^2 * dt
        let two_sided = sigma * sigma / fs;
        assert!((mean_long / 2.0 / two_sided - 1.0).abs() < 0.03, "two-sided {}", mean_long / 2.0);
    }

    #[test]
    fn test_median_is_bias_corrected() {
        let fs = 256.0;
        let estimator = PsdEstimator::default();
        let psd = estimator.estimate(&white(128.0, fs, 1.0, 3), 2.0, 0.5).unwrap();
        let (mean, _) = mean_and_spread(&psd, 2.0 / fs);
        assert!((mean / (2.0 / fs) - 1.0).abs() < 0.1, "mean {}", mean);
    }

    #[test]
    fn test_needs_two_segments() {
        let estimator = PsdEstimator::default();
        let data = white(5.6, 256.0, 1.0, 1);
        assert!(matches!(
            estimator.estimate(&data, 4.0, 0.5),
            Err(PipelineError::InsufficientData(_))
        ));
        assert!(estimator.estimate(&data, 2.0, 0.5).is_ok());
        assert!(matches!(
            estimator.estimate(&data, 2.0, 1.0),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_bins_are_floored() {
        let data = TimeSeries::time(vec![0.0; 1024], 1.0 / 128.0, 0.0).unwrap();
        let psd = PsdEstimator::default().estimate(&data, 2.0, 0.5).unwrap();
        assert!(psd.data().iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_median_bias_values() {
        assert_eq!(median_bias(1), 1.0);
        assert_eq!(median_bias(2), 1.0);
        assert!((median_bias(3) - (1.0 + 1.0 / 3.0 - 0.5)).abs() < 1e-15);
        // tends to ln 2
        assert!((median_bias(10001) - std::f64::consts::LN_2).abs() < 1e-3);
    }
}
