//! Data source to SNR series, Q-maps and tiles for one detector.

use crate::archive::DataSource;
use crate::cache::{PsdCache, PsdKey};
use crate::error::Result;
use crate::filter::highpass;
use crate::matched_filter::MatchedFilter;
use crate::psd::{Averaging, PsdEstimator, WindowFunction};
use crate::qtransform::{QGram, QParams, QTransform, Tile, TimeFrequencyMap};
use crate::series::{Peak, PowerSpectralDensity, SnrSeries, TimeSeries};
use crate::waveform::{generate_template, WaveformOracle, WaveformParams};
use anyhow::anyhow;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A candidate signal: when it happened and what produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub gps: f64,
    pub mass1: f64,
    pub mass2: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Seconds of data fetched on each side of the event.
    pub padding: f64,
    pub highpass: Option<f64>,
    /// PSD segment length; also the length of the filtered segment.
    pub segment_duration: f64,
    pub overlap: f64,
    pub window: WindowFunction,
    pub averaging: Averaging,
    /// Lowest frequency the matched filter integrates from.
    pub f_low: f64,
    pub approximant: String,
    pub f_lower: f64,
    pub f_final: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            padding: 16.0,
            highpass: Some(15.0),
            segment_duration: 4.0,
            overlap: 0.5,
            window: WindowFunction::default(),
            averaging: Averaging::default(),
            f_low: 15.0,
            approximant: "TaylorF2".to_string(),
            f_lower: 20.0,
            f_final: 2048.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnrReport {
    pub detector: String,
    pub event: String,
    pub snr: SnrSeries,
    pub peak: Peak,
}

pub struct Pipeline {
    source: Arc<dyn DataSource>,
    oracle: Arc<dyn WaveformOracle>,
    settings: PipelineSettings,
    cache: Option<PsdCache>,
    estimator: PsdEstimator,
    filter: MatchedFilter,
}

impl Pipeline {
    pub fn new(source: Arc<dyn DataSource>, oracle: Arc<dyn WaveformOracle>, settings: PipelineSettings) -> Self {
        let estimator = PsdEstimator::new(settings.window, settings.averaging);
        Self {
            source,
            oracle,
            settings,
            cache: None,
            estimator,
            filter: MatchedFilter::new(),
        }
    }

    pub fn with_cache(mut self, cache: PsdCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fetched and, if configured, high-passed data.
    pub fn conditioned(&self, detector: &str, start: f64, end: f64) -> Result<TimeSeries> {
        let data = self.source.fetch(detector, start, end)?;
        match self.settings.highpass {
            Some(cutoff) => highpass(&data, cutoff),
            None => Ok(data),
        }
    }

    pub fn psd(&self, detector: &str, start: f64, end: f64) -> Result<PowerSpectralDensity> {
        let data = self.conditioned(detector, start, end)?;
        self.estimate_psd(detector, start, end, &data)
    }

    fn estimate_psd(&self, detector: &str, start: f64, end: f64, data: &TimeSeries) -> Result<PowerSpectralDensity> {
        let key = PsdKey {
            detector: detector.to_string(),
            start,
            end,
            highpass: self.settings.highpass,
            segment_duration: self.settings.segment_duration,
            overlap: self.settings.overlap,
            window: self.settings.window,
            averaging: self.settings.averaging,
        };
        if let Some(cache) = &self.cache {
            match cache.load(&key) {
                Ok(Some(psd)) => return Ok(psd),
                Ok(None) => {}
                Err(e) => warn!("Ignoring PSD cache: {:#}", e),
            }
        }
        let psd = self
            .estimator
            .estimate(data, self.settings.segment_duration, self.settings.overlap)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&key, &psd) {
                warn!("Failed to cache PSD: {:#}", e);
            }
        }
        Ok(psd)
    }

    /// Matched-filter SNR of `event`'s template around its time.
    ///
    /// The PSD comes from the padded span; the filtered segment is one PSD
    /// segment long and centred on the event.
    pub fn matched_filter_snr(&self, detector: &str, event: &Event) -> Result<SnrReport> {
        let s = &self.settings;
        let (start, end) = (event.gps - s.padding, event.gps + s.padding);
        info!("{}: matched filter for {} over [{}, {})", detector, event.name, start, end);

        let data = self.conditioned(detector, start, end)?;
        let psd = self.estimate_psd(detector, start, end, &data)?;
        let half = s.segment_duration / 2.0;
        let segment = data.crop(event.gps - half, event.gps + half)?;

        let params = WaveformParams {
            approximant: s.approximant.clone(),
            mass1: event.mass1,
            mass2: event.mass2,
            distance: event.distance,
            f_lower: s.f_lower,
            f_final: s.f_final,
        };
        let template = generate_template(self.oracle.as_ref(), &params, psd.delta())?;
        let snr = self.filter.filter(&segment, &psd, &template, s.f_low)?;
        let peak = snr.peak();
        Ok(SnrReport {
            detector: detector.to_string(),
            event: event.name.clone(),
            snr,
            peak,
        })
    }

    /// Q-transform over `duration` seconds centred on `gps`.
    pub fn q_transform(&self, detector: &str, gps: f64, duration: f64, params: &QParams) -> Result<TimeFrequencyMap> {
        let data = self
            .source
            .fetch(detector, gps - self.settings.padding, gps + self.settings.padding)?;
        QTransform::new(params.normalization).transform(&data, (gps - duration / 2.0, gps + duration / 2.0), params)
    }

    /// Q-gram tiles within `half_width` seconds of `gps`.
    pub fn q_gram(
        &self,
        detector: &str,
        gps: f64,
        half_width: f64,
        search: &QGram,
        qrange: (f64, f64),
        mismatch: f64,
    ) -> Result<Vec<Tile>> {
        let data = self
            .source
            .fetch(detector, gps - self.settings.padding, gps + self.settings.padding)?;
        search.search(&data, qrange, (gps - half_width, gps + half_width), mismatch)
    }
}

/// Runs `job` for every detector on the blocking pool.
///
/// Each detector gets its own result, in input order; one failing does not
/// stop the others.
pub async fn fan_out<T, F>(pipeline: Arc<Pipeline>, detectors: &[String], job: F) -> Vec<(String, anyhow::Result<T>)>
where
    T: Send + 'static,
    F: Fn(&Pipeline, &str) -> Result<T> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let handles: Vec<_> = detectors
        .iter()
        .map(|detector| {
            let pipeline = pipeline.clone();
            let job = job.clone();
            let detector = detector.clone();
            tokio::task::spawn_blocking(move || job(pipeline.as_ref(), detector.as_str()))
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (detector, handle) in detectors.iter().zip(handles) {
        let result = match handle.await {
            Ok(r) => r.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow!("worker for {} failed: {}", detector, e)),
        };
        if let Err(e) = &result {
            warn!("{}: {:#}", detector, e);
        }
        results.push((detector.clone(), result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::error::PipelineError;
    use crate::matched_filter::sigma;
    use crate::noise::{inject, GaussianNoise};
    use crate::waveform::NewtonianChirp;

    const FS: f64 = 4096.0;
    const ORIGIN: f64 = 1126259430.0;

    fn chirp_params(distance: f64) -> WaveformParams {
        WaveformParams {
            approximant: "TaylorF2".to_string(),
            mass1: 35.6,
            mass2: 30.6,
            distance,
            f_lower: 20.0,
            f_final: 2048.0,
        }
    }

    /// 64 s of unit white noise with the chirp at the midpoint at SNR ~30.
    fn injected_noise() -> (TimeSeries, f64) {
        let n = (64.0 * FS) as usize;
        let noise = GaussianNoise::new(7).white(n, 1.0, FS, ORIGIN).unwrap();
        let df = 1.0 / 64.0;
        let template = generate_template(&NewtonianChirp, &chirp_params(440.0), df).unwrap();
        let flat = PowerSpectralDensity::frequency(vec![2.0 / FS; n / 2 + 1], df, 0.0).unwrap();
        let scale = 30.0 / sigma(&template, &flat, 20.0, 2047.0).unwrap();
        let t0 = ORIGIN + 32.0;
        (inject(&noise, &template.series, t0, scale).unwrap(), t0)
    }

    #[test]
    fn test_injected_chirp_is_recovered() {
        let (data, t0) = injected_noise();
        let settings = PipelineSettings {
            padding: 32.0,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(
            Arc::new(MemoryArchive::new().with("H1", data)),
            Arc::new(NewtonianChirp),
            settings,
        );
        let event = Event {
            name: "injection".to_string(),
            gps: t0,
            mass1: 35.6,
            mass2: 30.6,
            distance: 440.0,
        };
        let report = pipeline.matched_filter_snr("H1", &event).unwrap();
        assert_eq!(report.snr.len(), (4.0 * FS) as usize);
        assert!(report.peak.value > 8.0, "peak SNR {}", report.peak.value);
        assert!(
            (report.peak.position - t0).abs() <= 1.0 / FS + 1e-6,
            "peak at {} vs {}",
            report.peak.position,
            t0
        );
    }

    #[test]
    fn test_missing_detector_is_unavailable() {
        let data = GaussianNoise::new(1).white(1024, 1.0, 256.0, 0.0).unwrap();
        let pipeline = Pipeline::new(
            Arc::new(MemoryArchive::new().with("H1", data)),
            Arc::new(NewtonianChirp),
            PipelineSettings::default(),
        );
        let event = Event {
            name: "nothing".to_string(),
            gps: 2.0,
            mass1: 10.0,
            mass2: 10.0,
            distance: 100.0,
        };
        assert!(matches!(
            pipeline.matched_filter_snr("L1", &event),
            Err(PipelineError::DataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let data = GaussianNoise::new(3).white(16 * 1024, 1.0, 1024.0, 0.0).unwrap();
        let settings = PipelineSettings {
            segment_duration: 2.0,
            ..PipelineSettings::default()
        };
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(MemoryArchive::new().with("H1", data)),
            Arc::new(NewtonianChirp),
            settings,
        ));
        let detectors = vec!["H1".to_string(), "L1".to_string()];
        let results = fan_out(pipeline, &detectors, |p, d| p.psd(d, 0.0, 16.0)).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "H1");
        let psd = results[0].1.as_ref().unwrap();
        assert_eq!(psd.delta(), 0.5);
        assert_eq!(results[1].0, "L1");
        assert!(results[1].1.is_err());
    }
}
