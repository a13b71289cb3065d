// Periodic nodding motion paradigm.
// A nod is one head motion cycle: rest -> halfway up -> all the way up ->
// halfway down -> rest. Each cycle decomposes into 4 discrete rigid-transform
// keyframes that a k-space motion simulation interpolates between.

use serde::{Deserialize, Serialize};

/// number of discrete rigid transforms per nod cycle
pub const TRANSFORMS_PER_NOD: usize = 4;

/// user parameters for a single motion paradigm: one subject, one nod count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParadigm {
    /// pitch of the nod in degrees, rotation about the first voxel axis
    pub pitch_degrees: f64,
    /// duration of one nod in seconds
    pub nod_duration_sec: f64,
    /// total acquisition duration in seconds
    pub acquisition_duration_sec: f64,
    /// number of nods over the acquisition, at least 1
    pub num_nods: usize,
}

impl MotionParadigm {
    /// nod duration normalized to the acquisition window
    pub fn duration_fraction(&self) -> f64 {
        self.nod_duration_sec / self.acquisition_duration_sec
    }

    /// normalized interval between nod start times
    pub fn inter_nod_interval(&self) -> f64 {
        1. / self.num_nods as f64
    }

    /// builds the keyframe schedule for this paradigm. The schedule is not
    /// validated here; see [KeyframeSchedule::check_monotonic]
    pub fn build_schedule(&self) -> KeyframeSchedule {
        assert!(self.num_nods >= 1, "paradigm requires at least one nod");
        let num_transforms = TRANSFORMS_PER_NOD * self.num_nods;
        let d = self.duration_fraction();

        // nod start times spread evenly over [0, 1 - 1/num_nods], which
        // leaves room for the last nod before the window ends
        let spacing = if self.num_nods == 1 {
            0.
        } else {
            (1. - self.inter_nod_interval()) / (self.num_nods - 1) as f64
        };

        let mut times = vec![0f64; num_transforms];
        let mut rotations = vec![[0f64; 3]; num_transforms];
        let translations = vec![[0f64; 3]; num_transforms];

        let halfway = [self.pitch_degrees / 2., 0., 0.];
        let full = [self.pitch_degrees, 0., 0.];
        let rest = [0., 0., 0.];

        for k in 0..self.num_nods {
            let start = k as f64 * spacing;
            let base = TRANSFORMS_PER_NOD * k;
            // phase timings: start, a third in, two thirds in, end of nod
            times[base] = start;
            times[base + 1] = start + d / 3.;
            times[base + 2] = start + 2. * d / 3.;
            times[base + 3] = start + d;
            // phase poses: halfway up, all the way up, halfway down, rest
            rotations[base] = halfway;
            rotations[base + 1] = full;
            rotations[base + 2] = halfway;
            rotations[base + 3] = rest;
        }

        KeyframeSchedule {
            times,
            rotations,
            translations,
        }
    }
}

/// what to do when a generated schedule fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// log a warning and use the schedule anyway (reference behavior)
    #[default]
    Warn,
    /// refuse to use the schedule
    Fail,
}

/// result of the schedule sanity check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleValidity {
    Valid,
    /// timestamps are not strictly increasing at `index` -> `index + 1`
    Invalid {
        index: usize,
        at: f64,
        next: f64,
    },
}

impl ScheduleValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, ScheduleValidity::Valid)
    }
}

/// three index-aligned sequences describing the discrete rigid transforms of
/// one motion paradigm. Built fresh per (subject, nod count) pair and consumed
/// once by the motion transform; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeSchedule {
    /// normalized acquisition-time positions in [0,1), strictly increasing
    times: Vec<f64>,
    /// rotation triples in degrees, non-zero only about the first axis
    rotations: Vec<[f64; 3]>,
    /// translation triples, all zero in this paradigm
    translations: Vec<[f64; 3]>,
}

impl KeyframeSchedule {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn rotations(&self) -> &[[f64; 3]] {
        &self.rotations
    }

    pub fn translations(&self) -> &[[f64; 3]] {
        &self.translations
    }

    /// checks that timestamps are strictly increasing across the full
    /// sequence. A violation means nods overlap in time and the simulated
    /// motion is nonsensical
    pub fn check_monotonic(&self) -> ScheduleValidity {
        for (i, pair) in self.times.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return ScheduleValidity::Invalid {
                    index: i,
                    at: pair[0],
                    next: pair[1],
                };
            }
        }
        ScheduleValidity::Valid
    }
}
