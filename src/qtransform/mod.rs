//! Constant-Q time-frequency analysis.
//!
//! [`QTransform`] renders a dense normalized-energy map over an output
//! window; [`QGram`] reports the individual tiles above an energy floor.
//! Both share the tiling in [`tiling`] and the projection in [`transform`].

pub mod qgram;
pub mod tiling;
pub mod transform;

pub use qgram::QGram;
pub use tiling::{QPlane, QRow, QTiling};
pub use transform::QTransform;

use serde::{Deserialize, Serialize};

/// How row energies are scaled so Gaussian noise averages to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnergyNormalization {
    /// Divide by the row mean.
    Mean,
    /// Divide by the row median over ln 2; robust to loud transients.
    #[default]
    Median,
}

impl std::str::FromStr for EnergyNormalization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(EnergyNormalization::Mean),
            "median" => Ok(EnergyNormalization::Median),
            other => Err(anyhow::anyhow!("unknown energy normalization '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QParams {
    pub qrange: (f64, f64),
    /// Requested frequency range; each plane clips it further.
    pub frange: (f64, f64),
    pub mismatch: f64,
    pub normalization: EnergyNormalization,
    /// Output time step; defaults to a thousandth of the output window.
    pub time_resolution: Option<f64>,
    /// Number of log-spaced output frequencies.
    pub frequency_bins: usize,
}

impl Default for QParams {
    fn default() -> Self {
        Self {
            qrange: (4.0, 64.0),
            frange: (0.0, f64::INFINITY),
            mismatch: 0.2,
            normalization: EnergyNormalization::default(),
            time_resolution: None,
            frequency_bins: 500,
        }
    }
}

impl QParams {
    pub fn with_qrange(mut self, qrange: (f64, f64)) -> Self {
        self.qrange = qrange;
        self
    }

    pub fn with_frange(mut self, frange: (f64, f64)) -> Self {
        self.frange = frange;
        self
    }
}

/// Dense energy map, `energy[time][frequency]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeFrequencyMap {
    pub times: Vec<f64>,
    pub frequencies: Vec<f64>,
    pub energy: Vec<Vec<f64>>,
    pub qrange: (f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPeak {
    pub time: f64,
    pub frequency: f64,
    pub energy: f64,
}

impl TimeFrequencyMap {
    pub fn shape(&self) -> (usize, usize) {
        (self.times.len(), self.frequencies.len())
    }

    pub fn peak(&self) -> MapPeak {
        let mut best = MapPeak {
            time: self.times.first().copied().unwrap_or(0.0),
            frequency: self.frequencies.first().copied().unwrap_or(0.0),
            energy: f64::NEG_INFINITY,
        };
        for (i, row) in self.energy.iter().enumerate() {
            for (j, &e) in row.iter().enumerate() {
                if e > best.energy {
                    best = MapPeak {
                        time: self.times[i],
                        frequency: self.frequencies[j],
                        energy: e,
                    };
                }
            }
        }
        best
    }
}

/// One (time, frequency, Q) cell reported by a Q-gram search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub start_time: f64,
    pub duration: f64,
    pub central_frequency: f64,
    pub quality_factor: f64,
    pub normalized_energy: f64,
}

impl Tile {
    pub fn center_time(&self) -> f64 {
        self.start_time + self.duration / 2.0
    }
}
