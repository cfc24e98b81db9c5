use super::tiling::QTiling;
use super::transform::{expect_within, QTransform};
use super::{EnergyNormalization, Tile};
use crate::error::{PipelineError, Result};
use crate::series::TimeSeries;
use log::{debug, info};
use std::cmp::Ordering;

/// Energy of a tile whose matched SNR is 5.5.
pub const DEFAULT_ENERGY_FLOOR: f64 = 5.5 * 5.5 / 2.0;

/// Sparse search over the constant-Q tiling.
pub struct QGram {
    frange: (f64, f64),
    energy_floor: f64,
    transform: QTransform,
}

impl Default for QGram {
    fn default() -> Self {
        Self {
            frange: (0.0, f64::INFINITY),
            energy_floor: DEFAULT_ENERGY_FLOOR,
            transform: QTransform::default(),
        }
    }
}

impl QGram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frange(mut self, frange: (f64, f64)) -> Self {
        self.frange = frange;
        self
    }

    pub fn with_energy_floor(mut self, energy_floor: f64) -> Self {
        self.energy_floor = energy_floor;
        self
    }

    pub fn with_normalization(mut self, normalization: EnergyNormalization) -> Self {
        self.transform = QTransform::new(normalization);
        self
    }

    pub fn energy_floor(&self) -> f64 {
        self.energy_floor
    }

    /// Tiles centred in `search_window` whose energy exceeds the floor,
    /// loudest first.
    pub fn search(
        &self,
        data: &TimeSeries,
        qrange: (f64, f64),
        search_window: (f64, f64),
        mismatch: f64,
    ) -> Result<Vec<Tile>> {
        let (start, end) = search_window;
        expect_within(data, start, end, "search window")?;
        if !(self.energy_floor >= 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "energy floor must be non-negative, got {}",
                self.energy_floor
            )));
        }
        let tiling = QTiling::new(data.span(), data.sample_rate(), qrange, self.frange, mismatch)?;
        let planes = tiling.planes();
        if planes.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "no Q plane in {:?} resolves frequencies in {:?}",
                qrange, self.frange
            )));
        }

        let spectrum = self.transform.spectrum(data)?;
        let origin = data.origin();
        let mut tiles = Vec::new();
        let mut searched = 0usize;
        for plane in &planes {
            for row in self.transform.plane_energies(&spectrum, plane)? {
                let dur = row.tile_duration;
                for (m, &energy) in row.energies.iter().enumerate() {
                    let center = origin + m as f64 * dur;
                    if center < start || center >= end {
                        continue;
                    }
                    searched += 1;
                    if energy > self.energy_floor {
                        tiles.push(Tile {
                            start_time: center - dur / 2.0,
                            duration: dur,
                            central_frequency: row.frequency,
                            quality_factor: row.q,
                            normalized_energy: energy,
                        });
                    }
                }
            }
            debug!("Q={:.2}: {} tiles above floor so far", plane.q, tiles.len());
        }

        tiles.sort_by(loudest_first);
        info!(
            "Q-gram: {} of {} tiles above energy {:.2} in [{}, {})",
            tiles.len(),
            searched,
            self.energy_floor,
            start,
            end
        );
        Ok(tiles)
    }
}

/// Descending energy, then earliest start, then lowest frequency.
fn loudest_first(a: &Tile, b: &Tile) -> Ordering {
    b.normalized_energy
        .total_cmp(&a.normalized_energy)
        .then(a.start_time.total_cmp(&b.start_time))
        .then(a.central_frequency.total_cmp(&b.central_frequency))
}
