use crate::error::{PipelineError, Result};
use crate::series::{Domain, TimeSeries};
use biquad::{Biquad, Coefficients, DirectForm1, Type, Q_BUTTERWORTH_F64};
use log::debug;

/// Sections cascaded per pass; run forward and backward this gives an
/// eighth-order zero-phase magnitude response.
const SECTIONS: usize = 2;

pub fn forward_backward_filter<F: Biquad<f64>>(signal: &mut [f64], filter: &mut F) {
    signal.iter_mut().for_each(|x| *x = filter.run(*x));
    filter.reset_state();
    signal.reverse();
    signal.iter_mut().for_each(|x| *x = filter.run(*x));
    filter.reset_state();
    signal.reverse();
}

pub fn make_coefficients(f_type: Type<f64>, fs: f64, freq: f64, q: f64) -> Result<Coefficients<f64>> {
    // normalized to Nyquist, so omega = 2*pi*freq/fs
    Coefficients::<f64>::from_normalized_params(f_type, freq / (fs / 2.0), q).map_err(|_| {
        PipelineError::InvalidInput(format!(
            "cannot design filter at {} Hz for {} Hz sampling",
            freq, fs
        ))
    })
}

/// Zero-phase Butterworth high-pass.
///
/// The cutoff is recorded on the returned series so later stages never
/// integrate below it.
pub fn highpass(series: &TimeSeries, cutoff: f64) -> Result<TimeSeries> {
    series.expect_domain(Domain::Time, "high-pass input")?;
    let fs = series.sample_rate();
    if !(cutoff > 0.0 && cutoff < fs / 2.0) {
        return Err(PipelineError::InvalidInput(format!(
            "high-pass cutoff {} Hz must lie in (0, {}) Hz",
            cutoff,
            fs / 2.0
        )));
    }
    debug!("High-pass at {} Hz over {} samples", cutoff, series.len());

    let coeffs = make_coefficients(Type::HighPass, fs, cutoff, Q_BUTTERWORTH_F64)?;
    let mut samples = series.data().to_vec();
    for _ in 0..SECTIONS {
        let mut hpf = DirectForm1::<f64>::new(coeffs);
        forward_backward_filter(&mut samples, &mut hpf);
    }

    let filtered = TimeSeries::time(samples, series.delta(), series.origin())?;
    Ok(match series.low_frequency_cutoff() {
        Some(existing) => filtered.with_low_frequency_cutoff(existing.max(cutoff)),
        None => filtered.with_low_frequency_cutoff(cutoff),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(freq: f64, fs: f64, seconds: f64) -> TimeSeries {
        let n = (fs * seconds) as usize;
        let samples = (0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()).collect();
        TimeSeries::time(samples, 1.0 / fs, 0.0).unwrap()
    }

    fn rms_middle(s: &TimeSeries) -> f64 {
        let d = s.data();
        let mid = &d[d.len() / 4..3 * d.len() / 4];
        (mid.iter().map(|x| x * x).sum::<f64>() / mid.len() as f64).sqrt()
    }

    #[test]
    fn test_highpass_response() {
        let fs = 1024.0;
        let low = highpass(&tone(2.0, fs, 8.0), 15.0).unwrap();
        let high = highpass(&tone(100.0, fs, 8.0), 15.0).unwrap();
        let unit = 1.0 / 2f64.sqrt();
        assert!(rms_middle(&low) < 1e-3 * unit);
        assert!((rms_middle(&high) / unit - 1.0).abs() < 0.01);
        assert_eq!(high.low_frequency_cutoff(), Some(15.0));
    }

    #[test]
    fn test_highpass_cutoff_attenuation() {
        let fs = 1024.0;
        let unit = 1.0 / 2f64.sqrt();
        // four Butterworth passes, each -3 dB at the cutoff
        let at_cutoff = rms_middle(&highpass(&tone(15.0, fs, 8.0), 15.0).unwrap()) / unit;
        assert!((at_cutoff / 0.25 - 1.0).abs() < 0.02, "gain at cutoff {}", at_cutoff);

        let five = rms_middle(&highpass(&tone(5.0, fs, 8.0), 15.0).unwrap()) / unit;
        assert!(five < 1e-3, "gain at 5 Hz {}", five);
        let ten = rms_middle(&highpass(&tone(10.0, fs, 8.0), 15.0).unwrap()) / unit;
        assert!(ten < 0.05, "gain at 10 Hz {}", ten);
    }

    #[test]
    fn test_rejects_cutoff_above_nyquist() {
        let s = tone(10.0, 64.0, 1.0);
        assert!(highpass(&s, 40.0).is_err());
        assert!(highpass(&s, 0.0).is_err());
    }
}
