use crate::error::{same_spacing, PipelineError, Result};
use crate::series::{Domain, FrequencySeries, TimeSeries};
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

/// FFT plan cache plus the transforms between time and frequency series.
///
/// Frequency series follow the continuous Fourier transform convention:
/// `X(f) = dt * FFT(x)` and `x(t) = df * IFFT(X)`.
pub struct Fourier {
    planner: Mutex<FftPlanner<f64>>,
}

impl Default for Fourier {
    fn default() -> Self {
        Self::new()
    }
}

impl Fourier {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn plan(&self, len: usize, inverse: bool) -> Arc<dyn Fft<f64>> {
        let mut planner = self.planner.lock().unwrap_or_else(|e| e.into_inner());
        if inverse {
            planner.plan_fft_inverse(len)
        } else {
            planner.plan_fft_forward(len)
        }
    }

    /// Unscaled forward FFT in place.
    pub fn forward(&self, buffer: &mut [Complex64]) {
        if buffer.is_empty() {
            return;
        }
        self.plan(buffer.len(), false).process(buffer);
    }

    /// Unscaled inverse FFT in place.
    pub fn inverse(&self, buffer: &mut [Complex64]) {
        if buffer.is_empty() {
            return;
        }
        self.plan(buffer.len(), true).process(buffer);
    }

    /// Unscaled forward FFT of real samples, full length.
    pub fn forward_real(&self, samples: &[f64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = samples.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        self.forward(&mut buffer);
        buffer
    }

    /// Real `n`-sample time series whose spectrum is `spectrum`.
    ///
    /// The spectrum spacing must equal `1 / (n * dt)` for the implied `dt`;
    /// bins beyond `spectrum.len()` are zero, bins past Nyquist are ignored.
    pub fn to_time_domain(&self, spectrum: &FrequencySeries, n: usize, epoch: f64) -> Result<TimeSeries> {
        spectrum.expect_domain(Domain::Frequency, "spectrum")?;
        if spectrum.origin() != 0.0 {
            return Err(PipelineError::InvalidInput(format!(
                "spectrum must start at 0 Hz, starts at {}",
                spectrum.origin()
            )));
        }
        if n < 2 {
            return Err(PipelineError::InvalidInput(
                "time series needs at least two samples".to_string(),
            ));
        }
        let df = spectrum.delta();
        let half = n / 2;
        let src = spectrum.data();
        let mut buffer = vec![Complex64::new(0.0, 0.0); n];
        for k in 0..=half.min(src.len() - 1) {
            let value = src[k];
            if k == 0 || (n % 2 == 0 && k == half) {
                buffer[k] = Complex64::new(value.re, 0.0);
            } else {
                buffer[k] = value;
                buffer[n - k] = value.conj();
            }
        }
        self.inverse(&mut buffer);
        let samples = buffer.iter().map(|c| c.re * df).collect();
        TimeSeries::time(samples, 1.0 / (n as f64 * df), epoch)
    }
}

/// Delay a spectrum by `shift` seconds (multiply by `exp(-2πi f shift)`).
pub fn time_shift(spectrum: &FrequencySeries, shift: f64) -> FrequencySeries {
    let df = spectrum.delta();
    let f0 = spectrum.origin();
    let mut k = 0usize;
    spectrum.map(|value| {
        let f = f0 + k as f64 * df;
        k += 1;
        value * Complex64::from_polar(1.0, -2.0 * PI * f * shift)
    })
}

/// Checks that a one-sided spectrum spacing matches an `n`-sample series at `dt`.
pub fn expect_resolution(n: usize, dt: f64, delta_f: f64, what: &str) -> Result<()> {
    let implied = 1.0 / (n as f64 * dt);
    if !same_spacing(implied, delta_f) {
        return Err(PipelineError::ParameterMismatch(format!(
            "{} has delta_f {} Hz but the data segment implies {} Hz",
            what, delta_f, implied
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_lands_in_its_bin() {
        let fs = 64.0;
        let n = 128;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 8.0 * i as f64 / fs).sin())
            .collect();
        let spectrum = Fourier::new().forward_real(&samples);
        assert_eq!(spectrum.len(), n);
        let loudest = (0..=n / 2)
            .max_by(|&a, &b| spectrum[a].norm().total_cmp(&spectrum[b].norm()))
            .unwrap();
        // 8 Hz at 0.5 Hz spacing
        assert_eq!(loudest, 16);
        // |X| * dt = A * T / 2 for a sine of amplitude A over duration T
        assert!((spectrum[16].norm() / fs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shift_moves_impulse() {
        let fourier = Fourier::new();
        let n = 64;
        let df = 1.0;
        let flat = FrequencySeries::frequency(vec![Complex64::new(1.0, 0.0); n / 2 + 1], df, 0.0).unwrap();
        let shifted = time_shift(&flat, 5.0 / n as f64);
        let pulse = fourier.to_time_domain(&shifted, n, 0.0).unwrap();
        assert_eq!(pulse.peak().index, 5);
    }

    #[test]
    fn test_resolution_check() {
        assert!(expect_resolution(16384, 1.0 / 4096.0, 0.25, "psd").is_ok());
        assert!(matches!(
            expect_resolution(16384, 1.0 / 4096.0, 0.125, "psd"),
            Err(PipelineError::ParameterMismatch(_))
        ));
    }
}
