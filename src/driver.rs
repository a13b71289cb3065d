// Batch driver: walks the input dataset and writes one corrupted volume per
// (subject, nod count) pair. Sequential by design; each unit of work is
// independent but the batch aborts on the first unhandled error with no
// partial-progress resume.

use crate::dataset::{self, Subject};
use crate::motion::MotionTransform;
use crate::nifti;
use crate::paradigm::{ScheduleValidity, ValidationPolicy};
use crate::params::NodSimParams;
use crate::NodSimError;
use log::{debug, info, warn};
use serde_json::json;
use std::fs;
use std::path::Path;

/// tallies of one completed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub subjects: usize,
    pub volumes_written: usize,
    pub sidecars_copied: usize,
    pub schedule_warnings: usize,
}

/// runs the full synthesis batch over every subject under `input_root`,
/// mirroring the tree under `output_root`
pub fn run(
    input_root: impl AsRef<Path>,
    output_root: impl AsRef<Path>,
    params: &NodSimParams,
    transform: &impl MotionTransform,
) -> Result<RunSummary, NodSimError> {
    let input_root = input_root.as_ref();
    let output_root = output_root.as_ref();
    params.validate()?;

    let subjects = dataset::discover_subjects(input_root)?;
    info!("found {} subjects under {}", subjects.len(), input_root.display());

    fs::create_dir_all(output_root)?;
    write_dataset_description(input_root, output_root)?;

    let mut summary = RunSummary {
        subjects: subjects.len(),
        ..Default::default()
    };

    for (sub_ix, subject) in subjects.iter().enumerate() {
        info!("subject {} of {}: {}", sub_ix + 1, subjects.len(), subject.id);
        process_subject(subject, output_root, params, transform, &mut summary)?;
    }

    info!(
        "batch complete: {} volumes written, {} sidecars copied, {} schedule warnings",
        summary.volumes_written, summary.sidecars_copied, summary.schedule_warnings
    );
    Ok(summary)
}

fn process_subject(
    subject: &Subject,
    output_root: &Path,
    params: &NodSimParams,
    transform: &impl MotionTransform,
    summary: &mut RunSummary,
) -> Result<(), NodSimError> {
    // the source volume is loaded once and reused across nod counts
    let source = nifti::read_volume(subject.standard_volume())?;
    let out_anat = subject.output_anat_dir(output_root);
    fs::create_dir_all(&out_anat)?;

    for (nods_ix, &num_nods) in params.nod_counts.iter().enumerate() {
        let paradigm = params.paradigm(num_nods);
        let schedule = paradigm.build_schedule();

        if let ScheduleValidity::Invalid { index, at, next } = schedule.check_monotonic() {
            match params.validation {
                ValidationPolicy::Warn => {
                    warn!(
                        "motion paradigm timings are nonsensical for {} with {} nods: \
                         t[{}] = {:.4} followed by {:.4}; continuing anyway",
                        subject.id,
                        num_nods,
                        index,
                        at,
                        next
                    );
                    summary.schedule_warnings += 1;
                }
                ValidationPolicy::Fail => {
                    return Err(NodSimError::ScheduleInvalid {
                        num_nods,
                        index,
                        at,
                        next,
                    });
                }
            }
        }

        let corrupted = transform.apply(&source, &schedule, params.interpolation);
        let acq = dataset::acq_label(params.pitch_degrees, params.nod_duration_sec, num_nods);
        let volume_out = out_anat.join(dataset::corrupted_volume_name(&subject.id, &acq));
        debug!("writing {}", volume_out.display());
        nifti::write_volume(&volume_out, &corrupted)?;
        summary.volumes_written += 1;

        // sidecar from the explicit nod-count mapping; missing files are
        // skipped silently
        if let Some(label) = params.sidecar_label(num_nods) {
            let sidecar_in = subject.motion_sidecar(label);
            if sidecar_in.exists() {
                let sidecar_out =
                    out_anat.join(dataset::corrupted_sidecar_name(&subject.id, &acq));
                fs::copy(&sidecar_in, &sidecar_out)?;
                summary.sidecars_copied += 1;
            } else {
                debug!("no sidecar at {}, skipping", sidecar_in.display());
            }
        }

        // the unmodified source is persisted once per subject
        if nods_ix == 0 {
            let standard_in = subject.standard_volume();
            let standard_out = out_anat.join(
                standard_in
                    .file_name()
                    .expect("standard volume has a filename"),
            );
            fs::copy(&standard_in, &standard_out)?;
            let sidecar_in = subject.standard_sidecar();
            if sidecar_in.exists() {
                let sidecar_out = out_anat.join(
                    sidecar_in.file_name().expect("sidecar has a filename"),
                );
                fs::copy(&sidecar_in, &sidecar_out)?;
                summary.sidecars_copied += 1;
            }
        }
    }
    Ok(())
}

/// copies the input `dataset_description.json` to the output root, or
/// generates a minimal one when the input has none
fn write_dataset_description(input_root: &Path, output_root: &Path) -> Result<(), NodSimError> {
    let name = "dataset_description.json";
    let src = input_root.join(name);
    let dst = output_root.join(name);
    if src.exists() {
        fs::copy(&src, &dst)?;
    } else {
        let desc = json!({
            "Name": "Synthetic periodic-nodding motion dataset",
            "BIDSVersion": "1.8.0",
            "GeneratedBy": [{"Name": env!("CARGO_PKG_NAME"), "Version": env!("CARGO_PKG_VERSION")}],
        });
        fs::write(&dst, serde_json::to_string_pretty(&desc)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::DwellBlendMotion;
    use crate::nifti::NiftiVolume;
    use ndarray::{Array3, ShapeBuilder};
    use std::path::PathBuf;

    fn tmp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("nod-sim-driver-{}", std::process::id()))
            .join(name);
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn seed_subject(root: &Path, id: &str, with_sidecars: bool) {
        let anat = root.join(id).join("anat");
        fs::create_dir_all(&anat).unwrap();
        let data = Array3::from_shape_fn((8, 8, 8).f(), |(x, y, z)| (x + y + z) as f32);
        let vol = NiftiVolume::from_array(data);
        nifti::write_volume(
            anat.join(format!("{}_acq-standard_T1w.nii.gz", id)),
            &vol,
        )
        .unwrap();
        if with_sidecars {
            for acq in ["standard", "headmotion1", "headmotion2"] {
                fs::write(
                    anat.join(format!("{}_acq-{}_T1w.json", id, acq)),
                    format!("{{\"AcquisitionLabel\": \"{}\"}}", acq),
                )
                .unwrap();
            }
        }
    }

    #[test]
    fn batch_writes_expected_tree() {
        let input = tmp_root("batch-in");
        let output = tmp_root("batch-out");
        seed_subject(&input, "sub-001", true);
        seed_subject(&input, "sub-002", false);

        let params = NodSimParams::default();
        let summary = run(&input, &output, &params, &DwellBlendMotion).unwrap();

        assert_eq!(summary.subjects, 2);
        assert_eq!(summary.volumes_written, 4);
        // sub-001: standard + headmotion1 + headmotion2; sub-002 has none
        assert_eq!(summary.sidecars_copied, 3);
        assert_eq!(summary.schedule_warnings, 0);

        for id in ["sub-001", "sub-002"] {
            let anat = output.join(id).join("anat");
            assert!(anat
                .join(format!("{}_acq-pitch15dur2.5nnods5_T1w.nii.gz", id))
                .exists());
            assert!(anat
                .join(format!("{}_acq-pitch15dur2.5nnods10_T1w.nii.gz", id))
                .exists());
            // unmodified source persisted once per subject
            assert!(anat.join(format!("{}_acq-standard_T1w.nii.gz", id)).exists());
        }
        assert!(output
            .join("sub-001/anat/sub-001_acq-pitch15dur2.5nnods5_T1w.json")
            .exists());
        assert!(!output
            .join("sub-002/anat/sub-002_acq-pitch15dur2.5nnods5_T1w.json")
            .exists());
        assert!(output.join("dataset_description.json").exists());

        // outputs read back as valid volumes
        let corrupted = nifti::read_volume(
            output.join("sub-001/anat/sub-001_acq-pitch15dur2.5nnods10_T1w.nii.gz"),
        )
        .unwrap();
        assert_eq!(corrupted.dims(), [8, 8, 8]);
    }

    #[test]
    fn rerun_is_idempotent() {
        let input = tmp_root("rerun-in");
        let output = tmp_root("rerun-out");
        seed_subject(&input, "sub-001", true);

        let params = NodSimParams::default();
        let a = run(&input, &output, &params, &DwellBlendMotion).unwrap();
        let b = run(&input, &output, &params, &DwellBlendMotion).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fail_policy_aborts_on_overlapping_nods() {
        let input = tmp_root("fail-in");
        let output = tmp_root("fail-out");
        seed_subject(&input, "sub-001", true);

        let mut params = NodSimParams::default();
        params.nod_duration_sec = 100.;
        params.nod_counts = vec![5];
        params.validation = ValidationPolicy::Fail;

        match run(&input, &output, &params, &DwellBlendMotion) {
            Err(NodSimError::ScheduleInvalid { num_nods, .. }) => assert_eq!(num_nods, 5),
            other => panic!("expected ScheduleInvalid, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn warn_policy_continues_on_overlapping_nods() {
        let input = tmp_root("warn-in");
        let output = tmp_root("warn-out");
        seed_subject(&input, "sub-001", true);

        let mut params = NodSimParams::default();
        params.nod_duration_sec = 100.;
        params.nod_counts = vec![5];

        let summary = run(&input, &output, &params, &DwellBlendMotion).unwrap();
        assert_eq!(summary.schedule_warnings, 1);
        assert_eq!(summary.volumes_written, 1);
    }

    #[test]
    fn missing_input_volume_aborts() {
        let input = tmp_root("missing-in");
        let output = tmp_root("missing-out");
        seed_subject(&input, "sub-001", false);
        // corrupt the volume so discovery still finds it but the read fails
        fs::write(
            input.join("sub-001/anat/sub-001_acq-standard_T1w.nii.gz"),
            b"not a nifti file",
        )
        .unwrap();

        let params = NodSimParams::default();
        assert!(run(&input, &output, &params, &DwellBlendMotion).is_err());
    }
}
