use super::tiling::{QPlane, QRow, QTiling};
use super::{EnergyNormalization, QParams, TimeFrequencyMap};
use crate::error::{PipelineError, Result};
use crate::fourier::Fourier;
use crate::series::{Domain, TimeSeries};
use crate::util::{lerp, logspace, median};
use log::{debug, info};
use rustfft::num_complex::Complex64;
use std::f64::consts::LN_2;

const DEFAULT_TIME_STEPS: f64 = 1000.0;

/// Normalized tile energies of one row across the full data span.
#[derive(Debug, Clone)]
pub struct RowEnergy {
    pub q: f64,
    pub frequency: f64,
    pub tile_duration: f64,
    pub energies: Vec<f64>,
}

impl RowEnergy {
    /// Energy at `offset` seconds from the data start, linear between tiles.
    fn at(&self, offset: f64) -> f64 {
        let n = self.energies.len();
        let pos = offset / self.tile_duration;
        let i0 = pos.floor();
        let frac = pos - i0;
        let i0 = (i0 as i64).rem_euclid(n as i64) as usize;
        let i1 = (i0 + 1) % n;
        lerp(self.energies[i0], self.energies[i1], frac)
    }
}

pub struct QTransform {
    pub normalization: EnergyNormalization,
    fourier: Fourier,
}

impl Default for QTransform {
    fn default() -> Self {
        Self::new(EnergyNormalization::default())
    }
}

impl QTransform {
    pub fn new(normalization: EnergyNormalization) -> Self {
        Self {
            normalization,
            fourier: Fourier::new(),
        }
    }

    /// Unscaled full-length spectrum of the data, shared by every row.
    pub(crate) fn spectrum(&self, data: &TimeSeries) -> Result<Vec<Complex64>> {
        data.expect_domain(Domain::Time, "Q-transform input")?;
        Ok(self.fourier.forward_real(data.data()))
    }

    /// Projects the data onto every tile of `row`.
    pub(crate) fn project(&self, spectrum: &[Complex64], row: &QRow) -> Result<RowEnergy> {
        let n = spectrum.len() as i64;
        let ntiles = row.ntiles();
        let center = row.center_bin();
        let mut buffer = vec![Complex64::new(0.0, 0.0); ntiles];
        for (j, w) in row.offsets().zip(row.window()) {
            let k = center + j;
            if k < 0 || k > n / 2 {
                continue;
            }
            buffer[j.rem_euclid(ntiles as i64) as usize] = spectrum[k as usize] * w;
        }
        self.fourier.inverse(&mut buffer);
        let mut energies: Vec<f64> = buffer.iter().map(|c| c.norm_sqr()).collect();

        let scale = match self.normalization {
            EnergyNormalization::Mean => energies.iter().sum::<f64>() / ntiles as f64,
            EnergyNormalization::Median => median(&mut energies.clone()) / LN_2,
        };
        if !(scale.is_finite() && scale > 0.0) {
            return Err(PipelineError::NumericalInstability(format!(
                "row Q={:.2} f={:.2} Hz has energy scale {}",
                row.q, row.frequency, scale
            )));
        }
        energies.iter_mut().for_each(|e| *e /= scale);

        Ok(RowEnergy {
            q: row.q,
            frequency: row.frequency,
            tile_duration: row.tile_duration(),
            energies,
        })
    }

    pub(crate) fn plane_energies(&self, spectrum: &[Complex64], plane: &QPlane) -> Result<Vec<RowEnergy>> {
        plane.rows().iter().map(|row| self.project(spectrum, row)).collect()
    }

    /// Normalized energy over `output_window`, keeping the loudest Q at each cell.
    pub fn transform(
        &self,
        data: &TimeSeries,
        output_window: (f64, f64),
        params: &QParams,
    ) -> Result<TimeFrequencyMap> {
        let (start, end) = output_window;
        expect_within(data, start, end, "output window")?;
        let tiling = QTiling::new(
            data.span(),
            data.sample_rate(),
            params.qrange,
            params.frange,
            params.mismatch,
        )?;
        let planes = tiling.planes();
        if planes.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "no Q plane in {:?} resolves frequencies in {:?}",
                params.qrange, params.frange
            )));
        }

        let tres = params
            .time_resolution
            .unwrap_or((end - start) / DEFAULT_TIME_STEPS);
        if !(tres > 0.0) {
            return Err(PipelineError::InvalidInput(format!("invalid time resolution {}", tres)));
        }
        if params.frequency_bins == 0 {
            return Err(PipelineError::InvalidInput("need at least one output frequency".to_string()));
        }
        let ntimes = (((end - start) / tres).round() as usize).max(1);
        let offset = start - data.origin();
        let times: Vec<f64> = (0..ntimes).map(|i| start + i as f64 * tres).collect();

        let fmin = planes.iter().map(|p| p.frange.0).fold(f64::INFINITY, f64::min);
        let fmax = planes.iter().map(|p| p.frange.1).fold(0.0, f64::max);
        let frequencies = logspace(fmin, fmax, params.frequency_bins);
        info!(
            "Q-transform: {} planes, Q {:.1}-{:.1}, {:.1}-{:.1} Hz, {}x{} grid",
            planes.len(),
            planes[0].q,
            planes[planes.len() - 1].q,
            fmin,
            fmax,
            ntimes,
            frequencies.len()
        );

        let spectrum = self.spectrum(data)?;
        let mut energy = vec![vec![0.0; frequencies.len()]; ntimes];
        for plane in &planes {
            let rows = self.plane_energies(&spectrum, plane)?;
            if rows.is_empty() {
                continue;
            }
            debug!("Q={:.2}: {} rows", plane.q, rows.len());
            for (j, &f) in frequencies.iter().enumerate() {
                if f < plane.frange.0 || f > plane.frange.1 {
                    continue;
                }
                let row = nearest_row(&rows, f);
                for (i, cell) in energy.iter_mut().enumerate() {
                    let e = row.at(offset + i as f64 * tres);
                    if e > cell[j] {
                        cell[j] = e;
                    }
                }
            }
        }

        Ok(TimeFrequencyMap {
            times,
            frequencies,
            energy,
            qrange: params.qrange,
        })
    }
}

/// Row closest to `f` in log-frequency; rows are sorted by frequency.
fn nearest_row(rows: &[RowEnergy], f: f64) -> &RowEnergy {
    let idx = rows.partition_point(|r| r.frequency < f);
    if idx == 0 {
        return &rows[0];
    }
    if idx == rows.len() {
        return &rows[rows.len() - 1];
    }
    let below = &rows[idx - 1];
    let above = &rows[idx];
    if (f / below.frequency).ln() <= (above.frequency / f).ln() {
        below
    } else {
        above
    }
}

pub(crate) fn expect_within(data: &TimeSeries, start: f64, end: f64, what: &str) -> Result<()> {
    if !(end > start) {
        return Err(PipelineError::InvalidInput(format!(
            "{} [{}, {}) is empty",
            what, start, end
        )));
    }
    if start < data.origin() || end > data.end() {
        return Err(PipelineError::InsufficientData(format!(
            "{} [{}, {}) is outside the data span [{}, {})",
            what,
            start,
            end,
            data.origin(),
            data.end()
        )));
    }
    Ok(())
}
