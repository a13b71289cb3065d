// Synthesis of motion-corrupted brain MRI volumes from clean source volumes,
// driven by a parametric periodic-nodding motion paradigm.

pub mod dataset;
pub mod driver;
pub mod motion;
pub mod nifti;
pub mod paradigm;
pub mod params;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodSimError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Dataset(#[from] dataset::DatasetError),
    #[error(transparent)]
    Params(#[from] params::ParamsError),
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(
        "schedule for {num_nods} nods is not strictly increasing: \
         t[{index}] = {at:.4} followed by {next:.4}"
    )]
    ScheduleInvalid {
        num_nods: usize,
        index: usize,
        at: f64,
        next: f64,
    },
}
