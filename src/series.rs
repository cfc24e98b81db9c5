//! Uniformly sampled series shared by every stage of the pipeline.
//!
//! A single value type carries real or complex samples in either the time
//! or the frequency domain. Stages check the [`Domain`] tag and the spacing
//! of their inputs instead of relying on naming conventions.

use crate::error::{PipelineError, Result};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Domain {
    Time,
    Frequency,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::Time => write!(f, "time"),
            Domain::Frequency => write!(f, "frequency"),
        }
    }
}

/// Immutable sampled data with its axis metadata.
///
/// `delta` is the time step (seconds) or the frequency step (Hz) and
/// `origin` the first sample's time or frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledSeries<T> {
    data: Vec<T>,
    delta: f64,
    origin: f64,
    domain: Domain,
    low_frequency_cutoff: Option<f64>,
}

pub type TimeSeries = SampledSeries<f64>;
pub type FrequencySeries = SampledSeries<Complex64>;
/// One-sided noise power per Hz, every bin strictly positive.
pub type PowerSpectralDensity = SampledSeries<f64>;
/// Complex matched-filter output; the magnitude is the SNR.
pub type SnrSeries = SampledSeries<Complex64>;

/// Location and value of the largest sample of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub index: usize,
    pub position: f64,
    pub value: f64,
}

impl<T> SampledSeries<T> {
    pub fn new(data: Vec<T>, delta: f64, origin: f64, domain: Domain) -> Result<Self> {
        if data.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "{} series must hold at least one sample",
                domain
            )));
        }
        if !(delta.is_finite() && delta > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "sample spacing must be positive and finite, got {}",
                delta
            )));
        }
        if !origin.is_finite() {
            return Err(PipelineError::InvalidInput(format!(
                "series origin must be finite, got {}",
                origin
            )));
        }
        Ok(Self {
            data,
            delta,
            origin,
            domain,
            low_frequency_cutoff: None,
        })
    }

    pub fn time(data: Vec<T>, delta_t: f64, epoch: f64) -> Result<Self> {
        Self::new(data, delta_t, epoch, Domain::Time)
    }

    pub fn frequency(data: Vec<T>, delta_f: f64, f0: f64) -> Result<Self> {
        Self::new(data, delta_f, f0, Domain::Frequency)
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn origin(&self) -> f64 {
        self.origin
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Highest low-frequency cutoff applied to the data so far, if any.
    pub fn low_frequency_cutoff(&self) -> Option<f64> {
        self.low_frequency_cutoff
    }

    /// Total extent along the axis (`len * delta`).
    pub fn span(&self) -> f64 {
        self.data.len() as f64 * self.delta
    }

    /// Axis value just past the last sample.
    pub fn end(&self) -> f64 {
        self.origin + self.span()
    }

    pub fn position(&self, index: usize) -> f64 {
        self.origin + index as f64 * self.delta
    }

    pub fn axis(&self) -> Vec<f64> {
        (0..self.data.len()).map(|i| self.position(i)).collect()
    }

    pub fn expect_domain(&self, domain: Domain, what: &str) -> Result<()> {
        if self.domain != domain {
            return Err(PipelineError::ParameterMismatch(format!(
                "{} must be a {}-domain series, got {}-domain",
                what, domain, self.domain
            )));
        }
        Ok(())
    }

    pub fn with_low_frequency_cutoff(mut self, cutoff: f64) -> Self {
        self.low_frequency_cutoff = Some(match self.low_frequency_cutoff {
            Some(existing) => existing.max(cutoff),
            None => cutoff,
        });
        self
    }

    /// Same samples, axis moved to start at `origin`.
    pub fn with_origin(mut self, origin: f64) -> Result<Self> {
        if !origin.is_finite() {
            return Err(PipelineError::InvalidInput(format!(
                "series origin must be finite, got {}",
                origin
            )));
        }
        self.origin = origin;
        Ok(self)
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> SampledSeries<U> {
        SampledSeries {
            data: self.data.iter().map(f).collect(),
            delta: self.delta,
            origin: self.origin,
            domain: self.domain,
            low_frequency_cutoff: self.low_frequency_cutoff,
        }
    }
}

impl<T: Clone> SampledSeries<T> {
    /// Copy of the samples covering `[start, end)`.
    ///
    /// Bounds snap to the nearest sample; the result keeps the original
    /// sample grid, so its origin may differ from `start` by under half a step.
    pub fn crop(&self, start: f64, end: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite() && end > start) {
            return Err(PipelineError::InvalidInput(format!(
                "invalid crop window [{}, {})",
                start, end
            )));
        }
        let first = ((start - self.origin) / self.delta).round();
        let count = ((end - start) / self.delta).round();
        if first < 0.0 || count < 1.0 || first + count > self.data.len() as f64 {
            return Err(PipelineError::InsufficientData(format!(
                "crop window [{}, {}) is outside the series span [{}, {})",
                start,
                end,
                self.origin,
                self.end()
            )));
        }
        let first = first as usize;
        let count = count as usize;
        Ok(Self {
            data: self.data[first..first + count].to_vec(),
            delta: self.delta,
            origin: self.position(first),
            domain: self.domain,
            low_frequency_cutoff: self.low_frequency_cutoff,
        })
    }
}

impl SampledSeries<f64> {
    pub fn sample_rate(&self) -> f64 {
        1.0 / self.delta
    }

    pub fn peak(&self) -> Peak {
        peak_of(self, self.data.iter().copied())
    }
}

impl SampledSeries<Complex64> {
    pub fn magnitudes(&self) -> SampledSeries<f64> {
        self.map(|z| z.norm())
    }

    /// Largest magnitude; for an SNR series this is the loudest trigger.
    pub fn peak(&self) -> Peak {
        peak_of(self, self.data.iter().map(|z| z.norm()))
    }
}

fn peak_of<T>(series: &SampledSeries<T>, values: impl Iterator<Item = f64>) -> Peak {
    let mut best = Peak {
        index: 0,
        position: series.origin,
        value: f64::NEG_INFINITY,
    };
    for (i, v) in values.enumerate() {
        if v > best.value {
            best = Peak {
                index: i,
                position: series.position(i),
                value: v,
            };
        }
    }
    best
}
