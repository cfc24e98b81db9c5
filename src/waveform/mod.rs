//! Boundary to the external waveform model.
//!
//! Templates come from a [`WaveformOracle`] supplied by the caller. This
//! module only validates and packages what the oracle returns; it holds no
//! physics of its own.

pub mod chirp;

pub use chirp::NewtonianChirp;

use crate::error::{same_spacing, PipelineError, Result};
use crate::series::{Domain, FrequencySeries};
use log::debug;
use serde::{Deserialize, Serialize};

/// Physical source parameters a template was generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformParams {
    pub approximant: String,
    /// Component masses in solar masses.
    pub mass1: f64,
    pub mass2: f64,
    /// Luminosity distance in Mpc.
    pub distance: f64,
    pub f_lower: f64,
    pub f_final: f64,
}

impl WaveformParams {
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(PipelineError::InvalidInput(format!("{} must be positive, got {}", name, v)))
            }
        };
        positive("mass1", self.mass1)?;
        positive("mass2", self.mass2)?;
        positive("distance", self.distance)?;
        positive("f_lower", self.f_lower)?;
        if !(self.f_final > self.f_lower) {
            return Err(PipelineError::InvalidInput(format!(
                "f_final ({}) must exceed f_lower ({})",
                self.f_final, self.f_lower
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaveformRequest {
    pub params: WaveformParams,
    pub delta_f: f64,
}

/// Frequency-domain polarizations returned by an oracle.
#[derive(Debug, Clone)]
pub struct Polarizations {
    pub plus: FrequencySeries,
    pub cross: FrequencySeries,
}

/// A source of theoretical waveforms.
pub trait WaveformOracle: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, request: &WaveformRequest) -> Result<Polarizations>;
}

/// Plus polarization of one waveform, tagged with its provenance.
#[derive(Debug, Clone)]
pub struct WaveformTemplate {
    pub series: FrequencySeries,
    pub params: WaveformParams,
}

impl WaveformTemplate {
    pub fn delta_f(&self) -> f64 {
        self.series.delta()
    }
}

/// Wraps oracle output as a template at exactly `target_delta_f`.
///
/// A resolution mismatch is an error; the output is never resampled or cut.
pub fn adapt(output: Polarizations, params: WaveformParams, target_delta_f: f64) -> Result<WaveformTemplate> {
    output.plus.expect_domain(Domain::Frequency, "oracle plus polarization")?;
    if !same_spacing(output.plus.delta(), target_delta_f) {
        return Err(PipelineError::ParameterMismatch(format!(
            "oracle produced delta_f {} Hz, expected {} Hz",
            output.plus.delta(),
            target_delta_f
        )));
    }
    if output.plus.origin() != 0.0 {
        return Err(PipelineError::ParameterMismatch(format!(
            "oracle output starts at {} Hz, expected 0 Hz",
            output.plus.origin()
        )));
    }
    Ok(WaveformTemplate {
        series: output.plus,
        params,
    })
}

pub fn generate_template(
    oracle: &dyn WaveformOracle,
    params: &WaveformParams,
    delta_f: f64,
) -> Result<WaveformTemplate> {
    params.validate()?;
    let request = WaveformRequest {
        params: params.clone(),
        delta_f,
    };
    let output = oracle.generate(&request)?;
    debug!(
        "{} generated {} bins at delta_f={} for m1={} m2={}",
        oracle.name(),
        output.plus.len(),
        output.plus.delta(),
        params.mass1,
        params.mass2
    );
    adapt(output, params.clone(), delta_f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::num_complex::Complex64;

    struct FixedOracle {
        delta_f: f64,
    }

    impl WaveformOracle for FixedOracle {
        fn name(&self) -> &str {
            "fixed"
        }

        fn generate(&self, _request: &WaveformRequest) -> Result<Polarizations> {
            let plus = FrequencySeries::frequency(vec![Complex64::new(1.0, 0.0); 9], self.delta_f, 0.0)?;
            Ok(Polarizations {
                cross: plus.clone(),
                plus,
            })
        }
    }

    fn params() -> WaveformParams {
        WaveformParams {
            approximant: "fixed".to_string(),
            mass1: 10.0,
            mass2: 10.0,
            distance: 100.0,
            f_lower: 1.0,
            f_final: 2.0,
        }
    }

    #[test]
    fn test_resolution_mismatch_is_rejected() {
        let oracle = FixedOracle { delta_f: 0.5 };
        assert!(matches!(
            generate_template(&oracle, &params(), 0.25),
            Err(PipelineError::ParameterMismatch(_))
        ));
        let template = generate_template(&oracle, &params(), 0.5).unwrap();
        assert_eq!(template.series.len(), 9);
        assert_eq!(template.params, params());
    }

    #[test]
    fn test_params_validation() {
        let mut p = params();
        p.f_final = 0.5;
        assert!(p.validate().is_err());
        let mut p = params();
        p.mass2 = 0.0;
        assert!(p.validate().is_err());
        assert!(params().validate().is_ok());
    }
}
