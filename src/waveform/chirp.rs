use super::{Polarizations, WaveformOracle, WaveformRequest};
use crate::error::{PipelineError, Result};
use crate::series::FrequencySeries;
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

/// G * M_sun / c^3 in seconds.
const MTSUN_SI: f64 = 4.925491025543576e-6;
const MPC_SI: f64 = 3.085677581491367e22;
const C_SI: f64 = 299_792_458.0;

/// Leading-order stationary-phase inspiral.
///
/// `h(f) = A f^(-7/6) exp(-i psi(f))` between `f_lower` and `f_final`, with
/// coalescence at template time zero and the binary seen face-on. There is
/// no merger or ringdown, so `f_final` should be chosen by the caller.
#[derive(Debug, Clone, Default)]
pub struct NewtonianChirp;

impl NewtonianChirp {
    pub const NAMES: [&'static str; 2] = ["NewtonianChirp", "TaylorF2"];

    pub fn accepts(approximant: &str) -> bool {
        Self::NAMES.iter().any(|n| n.eq_ignore_ascii_case(approximant))
    }

    /// Chirp mass in seconds.
    pub fn chirp_time(mass1: f64, mass2: f64) -> f64 {
        let total = mass1 + mass2;
        (mass1 * mass2).powf(0.6) / total.powf(0.2) * MTSUN_SI
    }

    /// Time from frequency `f` to coalescence.
    pub fn time_to_coalescence(mass1: f64, mass2: f64, f: f64) -> f64 {
        let tc = Self::chirp_time(mass1, mass2);
        5.0 / 256.0 * tc.powf(-5.0 / 3.0) * (PI * f).powf(-8.0 / 3.0)
    }
}

impl WaveformOracle for NewtonianChirp {
    fn name(&self) -> &str {
        Self::NAMES[0]
    }

    fn generate(&self, request: &WaveformRequest) -> Result<Polarizations> {
        let p = &request.params;
        if !Self::accepts(&p.approximant) {
            return Err(PipelineError::InvalidInput(format!(
                "approximant '{}' is not provided by {}",
                p.approximant,
                self.name()
            )));
        }
        let df = request.delta_f;
        if !(df.is_finite() && df > 0.0) {
            return Err(PipelineError::InvalidInput(format!("delta_f must be positive, got {}", df)));
        }

        let tc = Self::chirp_time(p.mass1, p.mass2);
        let distance = p.distance * MPC_SI / C_SI;
        let amplitude = (5.0f64 / 24.0).sqrt() * PI.powf(-2.0 / 3.0) * tc.powf(5.0 / 6.0) / distance;

        let nbins = (p.f_final / df).floor() as usize + 1;
        let plus: Vec<Complex64> = (0..nbins)
            .map(|k| {
                let f = k as f64 * df;
                if f < p.f_lower || f > p.f_final {
                    return Complex64::new(0.0, 0.0);
                }
                let psi = -PI / 4.0 + 3.0 / 128.0 * (PI * tc * f).powf(-5.0 / 3.0);
                Complex64::from_polar(amplitude * f.powf(-7.0 / 6.0), -psi)
            })
            .collect();
        let cross = plus.iter().map(|h| h * Complex64::new(0.0, -1.0)).collect();

        Ok(Polarizations {
            plus: FrequencySeries::frequency(plus, df, 0.0)?,
            cross: FrequencySeries::frequency(cross, df, 0.0)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::{generate_template, WaveformParams};

    fn params() -> WaveformParams {
        WaveformParams {
            approximant: "TaylorF2".to_string(),
            mass1: 35.6,
            mass2: 30.6,
            distance: 440.0,
            f_lower: 20.0,
            f_final: 1024.0,
        }
    }

    #[test]
    fn test_band_and_slope() {
        let template = generate_template(&NewtonianChirp, &params(), 0.25).unwrap();
        let h = template.series.data();
        assert_eq!(h.len(), 4097);
        assert_eq!(h[79].norm(), 0.0); // 19.75 Hz
        assert!(h[80].norm() > 0.0); // 20 Hz
        // |h| ~ f^(-7/6)
        let ratio = h[160].norm() / h[320].norm();
        assert!((ratio - 2f64.powf(7.0 / 6.0)).abs() < 1e-9);
        // strain of a 30 Msun binary at 440 Mpc is of order 1e-23 / Hz near 40 Hz
        assert!(h[160].norm() > 1e-25 && h[160].norm() < 1e-21);
    }

    #[test]
    fn test_cross_is_quarter_cycle_behind() {
        let out = NewtonianChirp
            .generate(&WaveformRequest { params: params(), delta_f: 1.0 })
            .unwrap();
        let k = 100;
        let rotated = out.plus.data()[k] * Complex64::new(0.0, -1.0);
        assert!((rotated - out.cross.data()[k]).norm() < 1e-35);
    }

    #[test]
    fn test_rejects_unknown_approximant() {
        let mut p = params();
        p.approximant = "IMRPhenomD".to_string();
        assert!(generate_template(&NewtonianChirp, &p, 0.25).is_err());
    }

    #[test]
    fn test_inspiral_duration() {
        // GW150914-like masses spend under a second above 20 Hz
        let t = NewtonianChirp::time_to_coalescence(35.6, 30.6, 20.0);
        assert!(t > 0.5 && t < 1.2, "{}", t);
    }
}
