// BIDS-like dataset layout: one directory per subject, each holding an `anat`
// directory with the standard T1w volume and its json sidecars. Output mirrors
// the input tree with paradigm parameters encoded in the acquisition label.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("unreadable path during subject discovery: {0}")]
    Glob(#[from] glob::GlobError),
    #[error("no subjects found under {0}")]
    Empty(PathBuf),
}

/// one subject of the input dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub anat_dir: PathBuf,
}

impl Subject {
    pub fn standard_volume(&self) -> PathBuf {
        self.anat_dir
            .join(format!("{}_acq-standard_T1w.nii.gz", self.id))
    }

    pub fn standard_sidecar(&self) -> PathBuf {
        self.anat_dir.join(format!("{}_acq-standard_T1w.json", self.id))
    }

    /// input sidecar for a motion acquisition label, e.g. "headmotion1"
    pub fn motion_sidecar(&self, acq_label: &str) -> PathBuf {
        self.anat_dir
            .join(format!("{}_acq-{}_T1w.json", self.id, acq_label))
    }

    /// output `anat` directory for this subject under an output root
    pub fn output_anat_dir(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.id).join("anat")
    }
}

/// acquisition label encoding the paradigm parameters, e.g.
/// `acq-pitch15dur2.5nnods5`
pub fn acq_label(pitch_degrees: f64, nod_duration_sec: f64, num_nods: usize) -> String {
    format!(
        "acq-pitch{}dur{}nnods{}",
        pitch_degrees, nod_duration_sec, num_nods
    )
}

/// output volume filename for one (subject, paradigm) pair
pub fn corrupted_volume_name(subject_id: &str, acq: &str) -> String {
    format!("{}_{}_T1w.nii.gz", subject_id, acq)
}

/// sidecar filename matching [corrupted_volume_name]
pub fn corrupted_sidecar_name(subject_id: &str, acq: &str) -> String {
    format!("{}_{}_T1w.json", subject_id, acq)
}

/// finds subjects under a dataset root by the presence of their standard T1w
/// volume, in sorted order
pub fn discover_subjects(root: impl AsRef<Path>) -> Result<Vec<Subject>, DatasetError> {
    let root = root.as_ref();
    let pattern = root
        .join("*")
        .join("anat")
        .join("*_acq-standard_T1w.nii.gz");
    let mut subjects = Vec::new();
    for entry in glob::glob(&pattern.display().to_string())? {
        let volume = entry?;
        let anat_dir = volume.parent().expect("volume has a parent").to_path_buf();
        let id = anat_dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());
        if let Some(id) = id {
            // the filename must belong to the directory's subject
            if volume
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(&format!("{}_", id)))
                .unwrap_or(false)
            {
                subjects.push(Subject { id, anat_dir });
            }
        }
    }
    subjects.sort_by(|a, b| a.id.cmp(&b.id));
    subjects.dedup();
    if subjects.is_empty() {
        return Err(DatasetError::Empty(root.to_path_buf()));
    }
    Ok(subjects)
}
