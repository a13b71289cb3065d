// Rigid-motion simulation seam. The schedule builder hands three index-aligned
// sequences (rotations, translations, normalized timestamps) to a motion
// transform, mirroring the input contract of the k-space augmentation library
// the paradigm was designed for.

use crate::nifti::NiftiVolume;
use crate::paradigm::KeyframeSchedule;
use ndarray::{Array3, ShapeBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// voxel interpolation used when resampling under a rigid pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    Nearest,
}

/// a transform that corrupts a volume according to a keyframe schedule. The
/// schedule's three sequences are equal-length and index-aligned, with
/// timestamps normalized to the acquisition window
pub trait MotionTransform {
    fn apply(
        &self,
        volume: &NiftiVolume,
        schedule: &KeyframeSchedule,
        interpolation: Interpolation,
    ) -> NiftiVolume;
}

/// motion simulation that blends the volume resampled under each scheduled
/// pose, weighted by the fraction of the acquisition window the pose occupies.
/// The rest pose covers the window before the first keyframe; the last
/// keyframe holds until the window ends. Weights sum to 1, so an all-zero
/// rotation schedule reproduces the input volume
#[derive(Debug, Clone, Copy, Default)]
pub struct DwellBlendMotion;

impl MotionTransform for DwellBlendMotion {
    fn apply(
        &self,
        volume: &NiftiVolume,
        schedule: &KeyframeSchedule,
        interpolation: Interpolation,
    ) -> NiftiVolume {
        if schedule.is_empty() {
            return volume.clone();
        }

        let weights = dwell_weights(schedule.times());

        // resample once per distinct pitch angle; the nodding paradigm only
        // ever produces three of them (rest, halfway, full)
        let mut resampled: HashMap<u64, Array3<f32>> = HashMap::new();
        let dims = volume.dims();
        let n_vox = dims.iter().product::<usize>();
        let mut out = vec![0f32; n_vox];

        // rest pose before the first keyframe
        accumulate(&mut out, volume.data.as_slice_memory_order().unwrap(), weights[0]);

        for (kf, &w) in schedule.rotations().iter().zip(&weights[1..]) {
            if w <= 0. {
                continue;
            }
            let pitch = kf[0];
            let rotated = resampled.entry(pitch.to_bits()).or_insert_with(|| {
                rotate_about_first_axis(&volume.data, pitch, interpolation)
            });
            accumulate(&mut out, rotated.as_slice_memory_order().unwrap(), w);
        }

        let data = Array3::from_shape_vec((dims[0], dims[1], dims[2]).f(), out)
            .expect("shape and buffer length agree");
        volume.with_data(data)
    }
}

/// converts keyframe timestamps into blend weights. Entry 0 is the rest-pose
/// weight; entry i+1 is the dwell fraction of keyframe i. Out-of-order
/// timestamps contribute zero dwell rather than negative weight, so an
/// invalid schedule still produces a bounded result
fn dwell_weights(times: &[f64]) -> Vec<f64> {
    let n = times.len();
    let mut weights = Vec::with_capacity(n + 1);
    weights.push(times[0].clamp(0., 1.));
    for i in 0..n {
        let end = if i + 1 < n { times[i + 1] } else { 1. };
        weights.push((end - times[i]).max(0.));
    }
    let total = weights.iter().sum::<f64>();
    if total > 0. {
        weights.iter_mut().for_each(|w| *w /= total);
    }
    weights
}

fn accumulate(out: &mut [f32], src: &[f32], weight: f64) {
    let w = weight as f32;
    out.par_iter_mut().zip(src.par_iter()).for_each(|(o, s)| {
        *o += w * s;
    });
}

/// resamples a volume under a rotation of `degrees` about the first voxel
/// axis through the volume center. Inverse mapping with out-of-bounds source
/// coordinates reading as zero
fn rotate_about_first_axis(
    data: &Array3<f32>,
    degrees: f64,
    interpolation: Interpolation,
) -> Array3<f32> {
    let (nx, ny, nz) = data.dim();
    if degrees == 0. {
        return data.clone();
    }
    let theta = degrees.to_radians() as f32;
    let (sin_t, cos_t) = theta.sin_cos();
    let cy = (ny as f32 - 1.) / 2.;
    let cz = (nz as f32 - 1.) / 2.;

    let src = data.as_slice_memory_order().expect("contiguous volume buffer");
    let plane = nx * ny;

    let mut out = vec![0f32; nx * ny * nz];
    // rotation mixes y and z only, so resample whole x-columns at once
    out.par_chunks_exact_mut(nx).enumerate().for_each(|(idx, col)| {
        let iz = idx / ny;
        let iy = idx % ny;
        let y = iy as f32 - cy;
        let z = iz as f32 - cz;
        // inverse rotation back to source coordinates
        let sy = cos_t * y + sin_t * z + cy;
        let sz = -sin_t * y + cos_t * z + cz;

        match interpolation {
            Interpolation::Nearest => {
                let jy = sy.round();
                let jz = sz.round();
                if in_bounds(jy, ny) && in_bounds(jz, nz) {
                    let base = jz as usize * plane + jy as usize * nx;
                    col.copy_from_slice(&src[base..base + nx]);
                }
            }
            Interpolation::Linear => {
                let fy = sy.floor();
                let fz = sz.floor();
                let wy = sy - fy;
                let wz = sz - fz;
                for (dy, dz, w) in [
                    (0., 0., (1. - wy) * (1. - wz)),
                    (1., 0., wy * (1. - wz)),
                    (0., 1., (1. - wy) * wz),
                    (1., 1., wy * wz),
                ] {
                    let jy = fy + dy;
                    let jz = fz + dz;
                    if w > 0. && in_bounds(jy, ny) && in_bounds(jz, nz) {
                        let base = jz as usize * plane + jy as usize * nx;
                        let row = &src[base..base + nx];
                        col.iter_mut().zip(row).for_each(|(o, s)| *o += w * s);
                    }
                }
            }
        }
    });

    Array3::from_shape_vec((nx, ny, nz).f(), out).expect("shape and buffer length agree")
}

fn in_bounds(coord: f32, n: usize) -> bool {
    coord >= 0. && coord < n as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paradigm::MotionParadigm;
    use ndarray::Array3;

    fn paradigm(pitch: f64, num_nods: usize) -> MotionParadigm {
        MotionParadigm {
            pitch_degrees: pitch,
            nod_duration_sec: 2.5,
            acquisition_duration_sec: 316.,
            num_nods,
        }
    }

    fn test_volume() -> NiftiVolume {
        let data =
            Array3::from_shape_fn((8, 8, 8).f(), |(x, y, z)| (x + 2 * y + 3 * z) as f32);
        NiftiVolume::from_array(data)
    }

    #[test]
    fn dwell_weights_sum_to_one() {
        let s = paradigm(15., 5).build_schedule();
        let w = dwell_weights(s.times());
        assert_eq!(w.len(), s.len() + 1);
        assert!((w.iter().sum::<f64>() - 1.).abs() < 1e-12);
        assert!(w.iter().all(|&x| x >= 0.));
    }

    #[test]
    fn zero_pitch_is_identity() {
        let vol = test_volume();
        let s = paradigm(0., 5).build_schedule();
        let out = DwellBlendMotion.apply(&vol, &s, Interpolation::Nearest);
        // weights sum to 1, so only float accumulation error remains
        for (a, b) in out.data.iter().zip(vol.data.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn nonzero_pitch_corrupts_volume() {
        let vol = test_volume();
        let s = paradigm(30., 5).build_schedule();
        let out = DwellBlendMotion.apply(&vol, &s, Interpolation::Linear);
        assert_eq!(out.dims(), vol.dims());
        assert_ne!(out.data, vol.data);
    }

    #[test]
    fn rotation_preserves_x_profile() {
        // rotation is about the first axis, so a volume constant in y and z
        // away from the edges keeps its x variation at the center voxel
        let data = Array3::from_shape_fn((16, 9, 9).f(), |(x, _, _)| x as f32);
        let rot = rotate_about_first_axis(&data, 90., Interpolation::Nearest);
        for x in 0..16 {
            assert_eq!(rot[[x, 4, 4]], x as f32);
        }
    }

    #[test]
    fn invalid_schedule_still_bounded() {
        let vol = test_volume();
        let p = MotionParadigm {
            pitch_degrees: 15.,
            nod_duration_sec: 100.,
            acquisition_duration_sec: 316.,
            num_nods: 5,
        };
        let s = p.build_schedule();
        assert!(!s.check_monotonic().is_valid());
        let out = DwellBlendMotion.apply(&vol, &s, Interpolation::Linear);
        let max_in = vol.data.iter().cloned().fold(0f32, f32::max);
        assert!(out.data.iter().all(|v| v.is_finite() && *v <= max_in + 1e-3));
    }
}
