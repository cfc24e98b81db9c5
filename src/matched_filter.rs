//! Frequency-domain matched filtering.

use crate::error::{same_spacing, PipelineError, Result};
use crate::fourier::{expect_resolution, Fourier};
use crate::series::{Domain, PowerSpectralDensity, SnrSeries, TimeSeries};
use crate::waveform::WaveformTemplate;
use log::{debug, info};
use rustfft::num_complex::Complex64;

/// Integration band in bins, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub first: usize,
    pub last: usize,
}

pub struct MatchedFilter {
    fourier: Fourier,
}

impl Default for MatchedFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchedFilter {
    pub fn new() -> Self {
        Self {
            fourier: Fourier::new(),
        }
    }

    /// Complex SNR of `template` against `data` at every time offset.
    ///
    /// The output shares the data's origin, spacing and length. Samples within
    /// a template duration of either end are corrupted by wrap-around; crop
    /// the data with a buffer around the region of interest.
    pub fn filter(
        &self,
        data: &TimeSeries,
        psd: &PowerSpectralDensity,
        template: &WaveformTemplate,
        f_low: f64,
    ) -> Result<SnrSeries> {
        data.expect_domain(Domain::Time, "matched-filter data")?;
        psd.expect_domain(Domain::Frequency, "PSD")?;
        template.series.expect_domain(Domain::Frequency, "template")?;

        let df = template.delta_f();
        if !same_spacing(psd.delta(), df) {
            return Err(PipelineError::ParameterMismatch(format!(
                "PSD delta_f {} Hz differs from template delta_f {} Hz",
                psd.delta(),
                df
            )));
        }
        let n = data.len();
        let dt = data.delta();
        expect_resolution(n, dt, df, "template")?;

        let f_low = [Some(f_low), Some(template.params.f_lower), data.low_frequency_cutoff()]
            .into_iter()
            .flatten()
            .fold(0.0, f64::max);
        let band = integration_band(n, df, f_low, template, psd)?;
        debug!(
            "Matched filter: {} samples, band bins {}..={} ({}-{} Hz)",
            n,
            band.first,
            band.last,
            band.first as f64 * df,
            band.last as f64 * df
        );

        let sigma = sigma_in_band(template, psd, band)?;
        let data_f = self.fourier.forward_real(data.data());
        let h = template.series.data();
        let s = psd.data();

        // one-sided correlation integrand; negative frequencies stay zero
        let mut z = vec![Complex64::new(0.0, 0.0); n];
        for k in band.first..=band.last {
            z[k] = 4.0 * h[k].conj() * (data_f[k] * dt) / s[k];
        }
        self.fourier.inverse(&mut z);
        let norm = df / sigma;
        let snr: Vec<Complex64> = z.into_iter().map(|c| c * norm).collect();

        let out = SnrSeries::time(snr, dt, data.origin())?;
        let peak = out.peak();
        info!(
            "Peak SNR {:.2} at t={:.4} (template sigma {:e})",
            peak.value, peak.position, sigma
        );
        Ok(out)
    }
}

/// Template normalization `sqrt(4 * sum |h|^2 / S * df)` over `[f_low, f_high]`.
pub fn sigma(
    template: &WaveformTemplate,
    psd: &PowerSpectralDensity,
    f_low: f64,
    f_high: f64,
) -> Result<f64> {
    let df = template.delta_f();
    if !same_spacing(psd.delta(), df) {
        return Err(PipelineError::ParameterMismatch(format!(
            "PSD delta_f {} Hz differs from template delta_f {} Hz",
            psd.delta(),
            df
        )));
    }
    let first = (f_low.max(template.params.f_lower) / df).ceil() as usize;
    let last = ((f_high.min(template.params.f_final) / df).floor() as usize)
        .min(template.series.len() - 1);
    if last >= psd.len() {
        return Err(PipelineError::ParameterMismatch(format!(
            "PSD ends at {} Hz, band extends to {} Hz",
            (psd.len() - 1) as f64 * df,
            last as f64 * df
        )));
    }
    if first > last {
        return Err(PipelineError::ParameterMismatch(format!(
            "empty band [{}, {}] Hz",
            f_low, f_high
        )));
    }
    sigma_in_band(template, psd, Band { first, last })
}

/// Every PSD bin in the band must be positive and finite.
fn expect_positive_psd(psd: &PowerSpectralDensity, band: Band) -> Result<()> {
    let bad = psd.data()[band.first..=band.last]
        .iter()
        .position(|&v| !(v.is_finite() && v > 0.0));
    match bad {
        Some(offset) => {
            let k = band.first + offset;
            Err(PipelineError::NumericalInstability(format!(
                "PSD bin {} ({} Hz) is {}",
                k,
                k as f64 * psd.delta(),
                psd.data()[k]
            )))
        }
        None => Ok(()),
    }
}

fn sigma_in_band(template: &WaveformTemplate, psd: &PowerSpectralDensity, band: Band) -> Result<f64> {
    expect_positive_psd(psd, band)?;
    let h = template.series.data();
    let s = psd.data();
    let sum: f64 = (band.first..=band.last).map(|k| h[k].norm_sqr() / s[k]).sum();
    let sigma = (4.0 * sum * template.delta_f()).sqrt();
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(PipelineError::NumericalInstability(format!(
            "template normalization is {} over bins {}..={}",
            sigma, band.first, band.last
        )));
    }
    Ok(sigma)
}

fn integration_band(
    n: usize,
    df: f64,
    f_low: f64,
    template: &WaveformTemplate,
    psd: &PowerSpectralDensity,
) -> Result<Band> {
    // stop short of Nyquist, whose bin carries no phase
    let top = (n - 1) / 2;
    let first = ((f_low / df).ceil() as usize).max(1);
    let last = ((template.params.f_final / df).floor() as usize)
        .min(template.series.len() - 1)
        .min(top);
    if first > last {
        return Err(PipelineError::ParameterMismatch(format!(
            "no frequencies between {} Hz and {} Hz",
            f_low,
            last as f64 * df
        )));
    }
    if last >= psd.len() {
        return Err(PipelineError::ParameterMismatch(format!(
            "PSD covers up to {} Hz but the band reaches {} Hz",
            (psd.len() - 1) as f64 * df,
            last as f64 * df
        )));
    }
    Ok(Band { first, last })
}
