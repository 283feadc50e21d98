//! Exposure scheduling: maps elapsed recording time onto a sensor integration time.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureMode {
    #[default]
    Fixed,
    Iterate,
}

/// Exposure settings as loaded from the configuration store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureState {
    pub mode: ExposureMode,
    /// Integration time used in `Fixed` mode, microseconds.
    pub fixed: u32,
    pub start: u32,
    pub end: u32,
    pub step: u32,
    /// Seconds spent on each step of an `Iterate` sweep.
    pub step_duration_s: f64,
}

impl Default for ExposureState {
    fn default() -> Self {
        Self {
            mode: ExposureMode::Fixed,
            fixed: 1_000,
            start: 1_000,
            end: 10_000,
            step: 1_000,
            step_duration_s: 5.0,
        }
    }
}

/// Exposure and sweep iteration for one grab.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExposureSample {
    pub exposure_us: u32,
    pub loop_count: u64,
}

/// Validated exposure settings. Only constructible through [`ExposureSchedule::new`],
/// so the per-frame computation never divides by zero.
#[derive(Clone, Debug, PartialEq)]
pub struct ExposureSchedule {
    state: ExposureState,
    total_steps: u64,
}

impl ExposureSchedule {
    pub fn new(state: ExposureState) -> Result<Self, ConfigError> {
        let total_steps = match state.mode {
            ExposureMode::Fixed => {
                if state.fixed == 0 {
                    return Err(ConfigError::ZeroExposure);
                }
                1
            }
            ExposureMode::Iterate => {
                if state.step == 0 {
                    return Err(ConfigError::ZeroExposureStep);
                }
                if !(state.step_duration_s.is_finite() && state.step_duration_s > 0.0) {
                    return Err(ConfigError::InvalidStepDuration(state.step_duration_s));
                }
                if state.start == 0 {
                    return Err(ConfigError::ZeroExposure);
                }
                if state.end < state.start {
                    return Err(ConfigError::EmptyExposureSweep {
                        start: state.start,
                        end: state.end,
                    });
                }
                u64::from((state.end - state.start) / state.step) + 1
            }
        };
        Ok(Self { state, total_steps })
    }

    pub fn state(&self) -> &ExposureState {
        &self.state
    }

    /// Number of distinct exposures in one sweep (1 in `Fixed` mode).
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn compute(&self, elapsed_seconds: f64) -> ExposureSample {
        compute_exposure(self, elapsed_seconds)
    }
}

/// Exposure to apply after `elapsed_seconds` of recording.
///
/// Negative or NaN elapsed times are treated as zero.
pub fn compute_exposure(schedule: &ExposureSchedule, elapsed_seconds: f64) -> ExposureSample {
    let state = &schedule.state;
    match state.mode {
        ExposureMode::Fixed => ExposureSample {
            exposure_us: state.fixed,
            loop_count: 0,
        },
        ExposureMode::Iterate => {
            let elapsed = if elapsed_seconds.is_nan() {
                0.0
            } else {
                elapsed_seconds.max(0.0)
            };
            let steps_passed = (elapsed / state.step_duration_s).floor() as u64;
            let loop_count = steps_passed / schedule.total_steps;
            let current_step = steps_passed % schedule.total_steps;
            ExposureSample {
                exposure_us: state.start + (current_step as u32) * state.step,
                loop_count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(start: u32, end: u32, step: u32, duration: f64) -> ExposureState {
        ExposureState {
            mode: ExposureMode::Iterate,
            start,
            end,
            step,
            step_duration_s: duration,
            ..ExposureState::default()
        }
    }

    #[test]
    fn fixed_mode_ignores_elapsed_time() {
        let schedule = ExposureSchedule::new(ExposureState {
            fixed: 2_500,
            ..ExposureState::default()
        })
        .unwrap();
        for elapsed in [0.0, 3.7, 1e6] {
            assert_eq!(
                schedule.compute(elapsed),
                ExposureSample {
                    exposure_us: 2_500,
                    loop_count: 0
                }
            );
        }
    }

    #[test]
    fn iterate_mode_wraps_after_a_full_sweep() {
        let schedule = ExposureSchedule::new(sweep(1_000, 3_000, 1_000, 5.0)).unwrap();
        assert_eq!(schedule.total_steps(), 3);
        assert_eq!(
            schedule.compute(16.0),
            ExposureSample {
                exposure_us: 1_000,
                loop_count: 1
            }
        );
        assert_eq!(schedule.compute(4.99).exposure_us, 1_000);
        assert_eq!(schedule.compute(5.0).exposure_us, 2_000);
        assert_eq!(schedule.compute(14.0).exposure_us, 3_000);
    }

    #[test]
    fn sweep_end_that_is_not_on_a_step_is_truncated() {
        let schedule = ExposureSchedule::new(sweep(1_000, 3_500, 1_000, 1.0)).unwrap();
        assert_eq!(schedule.total_steps(), 3);
        assert_eq!(schedule.compute(2.0).exposure_us, 3_000);
    }

    #[test]
    fn computation_is_deterministic() {
        let schedule = ExposureSchedule::new(sweep(500, 9_500, 500, 0.25)).unwrap();
        for i in 0..200 {
            let elapsed = i as f64 * 0.137;
            assert_eq!(schedule.compute(elapsed), schedule.compute(elapsed));
        }
    }

    #[test]
    fn negative_elapsed_is_clamped() {
        let schedule = ExposureSchedule::new(sweep(1_000, 3_000, 1_000, 5.0)).unwrap();
        assert_eq!(schedule.compute(-3.0), schedule.compute(0.0));
    }

    #[test]
    fn invalid_sweeps_are_configuration_errors() {
        assert!(matches!(
            ExposureSchedule::new(sweep(1_000, 3_000, 0, 5.0)),
            Err(ConfigError::ZeroExposureStep)
        ));
        assert!(matches!(
            ExposureSchedule::new(sweep(1_000, 3_000, 1_000, 0.0)),
            Err(ConfigError::InvalidStepDuration(_))
        ));
        assert!(matches!(
            ExposureSchedule::new(sweep(3_000, 1_000, 1_000, 5.0)),
            Err(ConfigError::EmptyExposureSweep { .. })
        ));
    }
}
