//! Seeded Gaussian noise and signal injection for simulated data.

use crate::error::{PipelineError, Result};
use crate::fourier::{expect_resolution, time_shift, Fourier};
use crate::series::{Domain, FrequencySeries, TimeSeries};
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub struct GaussianNoise {
    rng: StdRng,
}

impl GaussianNoise {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `n` samples of white noise with standard deviation `sigma`.
    pub fn white(&mut self, n: usize, sigma: f64, sample_rate: f64, epoch: f64) -> Result<TimeSeries> {
        let normal = Normal::new(0.0, sigma).map_err(|e| {
            PipelineError::InvalidInput(format!("noise sigma {}: {}", sigma, e))
        })?;
        let samples = normal.sample_iter(&mut self.rng).take(n).collect();
        TimeSeries::time(samples, 1.0 / sample_rate, epoch)
    }
}

/// Adds `scale * signal`, with its reference time moved to `t0`, to `data`.
///
/// `signal` must be a one-sided spectrum at the data's own resolution.
pub fn inject(data: &TimeSeries, signal: &FrequencySeries, t0: f64, scale: f64) -> Result<TimeSeries> {
    data.expect_domain(Domain::Time, "injection target")?;
    signal.expect_domain(Domain::Frequency, "injected signal")?;
    expect_resolution(data.len(), data.delta(), signal.delta(), "injected signal")?;
    if t0 < data.origin() || t0 >= data.end() {
        return Err(PipelineError::InvalidInput(format!(
            "injection time {} outside data span [{}, {})",
            t0,
            data.origin(),
            data.end()
        )));
    }
    debug!("Injecting signal at t={} with scale {:e}", t0, scale);
    let shifted = time_shift(signal, t0 - data.origin());
    let waveform = Fourier::new().to_time_domain(&shifted, data.len(), data.origin())?;
    let samples: Vec<f64> = data
        .data()
        .iter()
        .zip(waveform.data())
        .map(|(x, h)| x + scale * h)
        .collect();
    let mut out = TimeSeries::time(samples, data.delta(), data.origin())?;
    if let Some(cutoff) = data.low_frequency_cutoff() {
        out = out.with_low_frequency_cutoff(cutoff);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moments() {
        let n = 200_000;
        let series = GaussianNoise::new(42).white(n, 2.0, 1024.0, 0.0).unwrap();
        let xs: Vec<f64> = series.data().iter().map(|x| x / 2.0).collect();
        let mean = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.01);
        assert!((var - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_rejects_bad_sigma() {
        assert!(matches!(
            GaussianNoise::new(1).white(16, f64::NAN, 16.0, 0.0),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_seeded_noise_repeats() {
        let a = GaussianNoise::new(9).white(64, 1.0, 64.0, 0.0).unwrap();
        let b = GaussianNoise::new(9).white(64, 1.0, 64.0, 0.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_inject_requires_matching_resolution() {
        let data = TimeSeries::time(vec![0.0; 256], 1.0 / 64.0, 0.0).unwrap();
        let wrong = FrequencySeries::frequency(
            vec![rustfft::num_complex::Complex64::new(1.0, 0.0); 65],
            0.5,
            0.0,
        )
        .unwrap();
        assert!(matches!(
            inject(&data, &wrong, 1.0, 1.0),
            Err(PipelineError::ParameterMismatch(_))
        ));
    }
}
