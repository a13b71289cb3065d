// Run parameters for a dataset synthesis batch. Loaded from a toml file so a
// run is fully described by one immutable struct instead of constants strewn
// through the code.

use crate::motion::Interpolation;
use crate::paradigm::{MotionParadigm, ValidationPolicy};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("i/o error reading parameter file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse parameter file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid parameters: {0}")]
    Invalid(String),
}

/// maps a nod count to the acquisition label of the input sidecar whose
/// metadata accompanies the corrupted output volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarRule {
    pub num_nods: usize,
    /// acquisition label, e.g. "headmotion1" selects
    /// `<sub>_acq-headmotion1_T1w.json`
    pub acq_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodSimParams {
    /// pitch of the nod in degrees
    pub pitch_degrees: f64,
    /// duration of one nod in seconds
    pub nod_duration_sec: f64,
    /// acquisition duration of the standard MPRAGE in seconds
    pub acquisition_duration_sec: f64,
    /// nod counts to simulate, one output volume per subject per entry
    pub nod_counts: Vec<usize>,
    /// what to do when a schedule fails the monotonicity check
    pub validation: ValidationPolicy,
    /// voxel interpolation for the motion resampling
    pub interpolation: Interpolation,
    /// explicit nod-count -> sidecar mapping; counts without a rule get no
    /// sidecar copy (toml: keep this last, arrays of tables close the file)
    pub sidecar_map: Vec<SidecarRule>,
}

impl Default for NodSimParams {
    fn default() -> Self {
        // reference paradigm for the MR-ART standard MPRAGE
        NodSimParams {
            pitch_degrees: 15.,
            nod_duration_sec: 2.5,
            acquisition_duration_sec: 316.,
            nod_counts: vec![5, 10],
            validation: ValidationPolicy::Warn,
            interpolation: Interpolation::Linear,
            sidecar_map: vec![
                SidecarRule {
                    num_nods: 5,
                    acq_label: "headmotion1".to_string(),
                },
                SidecarRule {
                    num_nods: 10,
                    acq_label: "headmotion2".to_string(),
                },
            ],
        }
    }
}

impl NodSimParams {
    /// reads and validates parameters from a toml file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        let mut toml_str = String::new();
        File::open(path.as_ref())?.read_to_string(&mut toml_str)?;
        let params: NodSimParams = toml::from_str(&toml_str)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.nod_counts.is_empty() {
            return Err(ParamsError::Invalid("nod_counts must not be empty".into()));
        }
        if self.nod_counts.iter().any(|&n| n == 0) {
            return Err(ParamsError::Invalid("nod counts must be at least 1".into()));
        }
        if self.nod_duration_sec <= 0. || self.nod_duration_sec.is_nan() {
            return Err(ParamsError::Invalid(
                "nod_duration_sec must be positive".into(),
            ));
        }
        if self.acquisition_duration_sec <= 0. || self.acquisition_duration_sec.is_nan() {
            return Err(ParamsError::Invalid(
                "acquisition_duration_sec must be positive".into(),
            ));
        }
        if self.nod_duration_sec >= self.acquisition_duration_sec {
            return Err(ParamsError::Invalid(
                "nod_duration_sec must be shorter than acquisition_duration_sec".into(),
            ));
        }
        Ok(())
    }

    /// the paradigm for one nod-count entry
    pub fn paradigm(&self, num_nods: usize) -> MotionParadigm {
        MotionParadigm {
            pitch_degrees: self.pitch_degrees,
            nod_duration_sec: self.nod_duration_sec,
            acquisition_duration_sec: self.acquisition_duration_sec,
            num_nods,
        }
    }

    /// sidecar acquisition label for a nod count, if one is configured
    pub fn sidecar_label(&self, num_nods: usize) -> Option<&str> {
        self.sidecar_map
            .iter()
            .find(|r| r.num_nods == num_nods)
            .map(|r| r.acq_label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let p = NodSimParams::default();
        assert!(p.validate().is_ok());
        assert_eq!(p.sidecar_label(5), Some("headmotion1"));
        assert_eq!(p.sidecar_label(10), Some("headmotion2"));
        assert_eq!(p.sidecar_label(7), None);
    }

    #[test]
    fn toml_round_trip() {
        let p = NodSimParams::default();
        let s = toml::to_string(&p).unwrap();
        let back: NodSimParams = toml::from_str(&s).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let p: NodSimParams = toml::from_str("pitch_degrees = 20.0\n").unwrap();
        assert_eq!(p.pitch_degrees, 20.);
        assert_eq!(p.nod_counts, vec![5, 10]);
        assert_eq!(p.validation, ValidationPolicy::Warn);
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut p = NodSimParams::default();
        p.nod_counts.clear();
        assert!(p.validate().is_err());

        let mut p = NodSimParams::default();
        p.nod_counts = vec![0];
        assert!(p.validate().is_err());

        let mut p = NodSimParams::default();
        p.nod_duration_sec = 400.;
        assert!(p.validate().is_err());
    }
}
