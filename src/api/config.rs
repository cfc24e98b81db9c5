use crate::pipeline::{Event, PipelineSettings};
use crate::qtransform::QParams;
use anyhow::Context;
use directories::ProjectDirs;
use knuffel::Decode;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Decode, Debug, Clone, Serialize, Deserialize)]
pub struct GwscanConfig {
    #[knuffel(child)]
    pub general: Option<GeneralConfig>,
    #[knuffel(child)]
    pub pipeline: Option<PipelineConfig>,
    #[knuffel(child)]
    pub template: Option<TemplateConfig>,
    #[knuffel(child)]
    pub qtransform: Option<QTransformConfig>,
    #[knuffel(children(name = "event"))]
    pub events: Vec<EventConfig>,
}

#[derive(Decode, Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Worker threads for detector fan-out; 0 picks the core count.
    #[knuffel(property)]
    pub threads: Option<i32>,
    #[knuffel(property)]
    pub cache: Option<bool>,
    #[knuffel(property)]
    pub archive: Option<String>,
}

#[derive(Decode, Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[knuffel(property)]
    pub padding: Option<f64>,
    #[knuffel(property)]
    pub highpass: Option<f64>,
    #[knuffel(property)]
    pub segment_duration: Option<f64>,
    #[knuffel(property)]
    pub overlap: Option<f64>,
    #[knuffel(property)]
    pub window: Option<String>,
    #[knuffel(property)]
    pub averaging: Option<String>,
    #[knuffel(property)]
    pub f_low: Option<f64>,
}

#[derive(Decode, Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[knuffel(property)]
    pub approximant: Option<String>,
    #[knuffel(property)]
    pub f_lower: Option<f64>,
    #[knuffel(property)]
    pub f_final: Option<f64>,
    /// Shared library providing the waveform oracle.
    #[knuffel(property)]
    pub plugin: Option<String>,
}

#[derive(Decode, Debug, Clone, Serialize, Deserialize)]
pub struct QTransformConfig {
    #[knuffel(property)]
    pub qmin: Option<f64>,
    #[knuffel(property)]
    pub qmax: Option<f64>,
    #[knuffel(property)]
    pub fmin: Option<f64>,
    #[knuffel(property)]
    pub fmax: Option<f64>,
    #[knuffel(property)]
    pub mismatch: Option<f64>,
    #[knuffel(property)]
    pub normalization: Option<String>,
    #[knuffel(property)]
    pub energy_floor: Option<f64>,
}

#[derive(Decode, Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    #[knuffel(argument)]
    pub name: String,
    #[knuffel(property)]
    pub gps: f64,
    #[knuffel(property)]
    pub mass1: f64,
    #[knuffel(property)]
    pub mass2: f64,
    #[knuffel(property)]
    pub distance: f64,
}

impl GwscanConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config = knuffel::parse("config.kdl", content)?;
        Ok(config)
    }

    /// `explicit` if given, else `config.kdl` in the platform config dir,
    /// else defaults.
    pub fn locate(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(dirs) = ProjectDirs::from("org", "gwscan", "gwscan") {
            let path = dirs.config_dir().join("config.kdl");
            if path.exists() {
                info!("Using config {}", path.display());
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn threads(&self) -> usize {
        self.general
            .as_ref()
            .and_then(|g| g.threads)
            .filter(|&t| t > 0)
            .map(|t| t as usize)
            .unwrap_or(0)
    }

    pub fn cache_enabled(&self) -> bool {
        self.general.as_ref().and_then(|g| g.cache).unwrap_or(true)
    }

    pub fn archive(&self) -> Option<&str> {
        self.general.as_ref().and_then(|g| g.archive.as_deref())
    }

    pub fn plugin(&self) -> Option<&str> {
        self.template.as_ref().and_then(|t| t.plugin.as_deref())
    }

    pub fn event(&self, name: &str) -> Option<Event> {
        self.events.iter().find(|e| e.name == name).map(|e| Event {
            name: e.name.clone(),
            gps: e.gps,
            mass1: e.mass1,
            mass2: e.mass2,
            distance: e.distance,
        })
    }

    /// Pipeline settings with every unset property at its default.
    pub fn pipeline_settings(&self) -> anyhow::Result<PipelineSettings> {
        let mut settings = PipelineSettings::default();
        if let Some(p) = &self.pipeline {
            if let Some(v) = p.padding {
                settings.padding = v;
            }
            if p.highpass.is_some() {
                settings.highpass = p.highpass.filter(|&f| f > 0.0);
            }
            if let Some(v) = p.segment_duration {
                settings.segment_duration = v;
            }
            if let Some(v) = p.overlap {
                settings.overlap = v;
            }
            if let Some(v) = &p.window {
                settings.window = v.parse()?;
            }
            if let Some(v) = &p.averaging {
                settings.averaging = v.parse()?;
            }
            if let Some(v) = p.f_low {
                settings.f_low = v;
            }
        }
        if let Some(t) = &self.template {
            if let Some(v) = &t.approximant {
                settings.approximant = v.clone();
            }
            if let Some(v) = t.f_lower {
                settings.f_lower = v;
            }
            if let Some(v) = t.f_final {
                settings.f_final = v;
            }
        }
        Ok(settings)
    }

    pub fn q_params(&self) -> anyhow::Result<QParams> {
        let mut params = QParams::default();
        if let Some(q) = &self.qtransform {
            params.qrange = (q.qmin.unwrap_or(params.qrange.0), q.qmax.unwrap_or(params.qrange.1));
            params.frange = (q.fmin.unwrap_or(params.frange.0), q.fmax.unwrap_or(params.frange.1));
            if let Some(v) = q.mismatch {
                params.mismatch = v;
            }
            if let Some(v) = &q.normalization {
                params.normalization = v.parse()?;
            }
        }
        Ok(params)
    }

    pub fn energy_floor(&self) -> Option<f64> {
        self.qtransform.as_ref().and_then(|q| q.energy_floor)
    }
}

impl Default for GwscanConfig {
    fn default() -> Self {
        Self {
            general: Some(GeneralConfig {
                threads: Some(0),
                cache: Some(true),
                archive: None,
            }),
            pipeline: None,
            template: None,
            qtransform: None,
            events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psd::{Averaging, WindowFunction};
    use crate::qtransform::EnergyNormalization;

    const SAMPLE: &str = r#"
general threads=4 cache=false archive="/data/frames"
pipeline padding=16.0 highpass=15.0 segment-duration=4.0 overlap=0.5 window="hamming" averaging="mean" f-low=15.0
template approximant="TaylorF2" f-lower=20.0 f-final=1024.0
qtransform qmin=4.0 qmax=150.0 mismatch=0.35 normalization="mean" energy-floor=20.0
event "GW150914" gps=1126259462.4 mass1=35.6 mass2=30.6 distance=440.0
event "GW200311_115853" gps=1267963151.3 mass1=34.2 mass2=27.7 distance=1170.0
"#;

    #[test]
    fn test_parse_full_config() {
        let config = GwscanConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.threads(), 4);
        assert!(!config.cache_enabled());
        assert_eq!(config.archive(), Some("/data/frames"));

        let settings = config.pipeline_settings().unwrap();
        assert_eq!(settings.highpass, Some(15.0));
        assert_eq!(settings.window, WindowFunction::Hamming);
        assert_eq!(settings.averaging, Averaging::Mean);
        assert_eq!(settings.f_final, 1024.0);

        let params = config.q_params().unwrap();
        assert_eq!(params.qrange, (4.0, 150.0));
        assert_eq!(params.mismatch, 0.35);
        assert_eq!(params.normalization, EnergyNormalization::Mean);
        assert_eq!(config.energy_floor(), Some(20.0));

        let event = config.event("GW150914").unwrap();
        assert_eq!(event.gps, 1126259462.4);
        assert_eq!(event.mass2, 30.6);
        assert!(config.event("GW000000").is_none());
        assert_eq!(config.events.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = GwscanConfig::default();
        assert_eq!(config.threads(), 0);
        assert!(config.cache_enabled());
        assert_eq!(config.pipeline_settings().unwrap(), PipelineSettings::default());
        assert_eq!(config.q_params().unwrap(), QParams::default());
    }

    #[test]
    fn test_bad_window_name() {
        let config = GwscanConfig::parse("pipeline window=\"triangle\"\n").unwrap();
        assert!(config.pipeline_settings().is_err());
    }
}
