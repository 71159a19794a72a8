//! # Execution Plans and Results
//!
//! An [`ExecutionPlan`] lists the pin combinations to probe and how to probe
//! them. Each probed pin yields one [`MeasurementResult`], classified by
//! [`MeasurementResult::pass`]:
//!
//! | expected connected | reading        | pass |
//! |--------------------|----------------|------|
//! | yes                | `<= 10 Ω`      | yes  |
//! | yes                | `> 10 Ω`, NaN  | no   |
//! | no                 | NaN (overflow) | yes  |
//! | no                 | finite         | no   |


use std::collections::HashSet;

use thiserror::Error;

/// Highest reading accepted as "connected".
pub const CONNECTED_MAX_OHMS: f64 = 10.0;

// ------------------------------------------------------------------------------------------------
// Plan
// ------------------------------------------------------------------------------------------------

/// One set of test pins measured against a set of ground pins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinCheckCombination {
    /// Pins to probe.
    pub test_pins: Vec<u16>,
    /// Reference pins, typically one.
    pub ground_pins: Vec<u16>,
    /// Test pins expected to read as connected to ground.
    /// Must be a subset of `test_pins`.
    pub common_connected_pins: Vec<u16>,
}

impl PinCheckCombination {
    pub fn new(test_pins: impl Into<Vec<u16>>, ground_pins: impl Into<Vec<u16>>) -> Self {
        Self {
            test_pins: test_pins.into(),
            ground_pins: ground_pins.into(),
            common_connected_pins: Vec::new(),
        }
    }

    pub fn with_common_connected(mut self, pins: impl Into<Vec<u16>>) -> Self {
        self.common_connected_pins = pins.into();
        self
    }

    pub fn is_common_connected(&self, pin: u16) -> bool {
        self.common_connected_pins.contains(&pin)
    }

    /// Ground pin reported in results: the first one.
    pub fn primary_ground(&self) -> u16 {
        self.ground_pins.first().copied().unwrap_or(0)
    }

    fn validate(&self, index: usize, pin_count: u16) -> Result<(), PlanError> {
        if self.ground_pins.is_empty() {
            return Err(PlanError::NoGroundPin { combination: index });
        }

        let all = self
            .test_pins
            .iter()
            .chain(&self.ground_pins)
            .chain(&self.common_connected_pins);
        for &pin in all {
            if pin == 0 || pin > pin_count {
                return Err(PlanError::PinOutOfRange {
                    combination: index,
                    pin,
                    pin_count,
                });
            }
        }

        for pins in [&self.test_pins, &self.ground_pins, &self.common_connected_pins] {
            if let Some(pin) = first_duplicate(pins) {
                return Err(PlanError::DuplicatePin {
                    combination: index,
                    pin,
                });
            }
        }

        if let Some(&pin) = self
            .common_connected_pins
            .iter()
            .find(|p| !self.test_pins.contains(p))
        {
            return Err(PlanError::CommonNotTested {
                combination: index,
                pin,
            });
        }
        Ok(())
    }
}

/// Relay selections for one pin are summed into its register, so a pin
/// listed twice would land on a neighbouring channel's bit.
fn first_duplicate(pins: &[u16]) -> Option<u16> {
    let mut seen = HashSet::with_capacity(pins.len());
    pins.iter().copied().find(|&pin| !seen.insert(pin))
}

/// What to measure and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub combinations: Vec<PinCheckCombination>,
    /// Let the meter choose its range.
    pub use_auto_range: bool,
    /// Discharge every pin before each matrix reconfiguration.
    pub discharge_after_each_operation: bool,
    /// Measure test pins in chunks, isolating failures pin by pin.
    pub batch_mode: bool,
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self {
            combinations: Vec::new(),
            use_auto_range: false,
            discharge_after_each_operation: true,
            batch_mode: true,
        }
    }
}

impl ExecutionPlan {
    pub fn new(combinations: Vec<PinCheckCombination>) -> Self {
        Self {
            combinations,
            ..Self::default()
        }
    }

    pub fn batch(mut self, enabled: bool) -> Self {
        self.batch_mode = enabled;
        self
    }

    pub fn discharge(mut self, enabled: bool) -> Self {
        self.discharge_after_each_operation = enabled;
        self
    }

    pub fn auto_range(mut self, enabled: bool) -> Self {
        self.use_auto_range = enabled;
        self
    }

    /// Number of results an uninterrupted run produces.
    ///
    /// Batch mode skips common-connected pins.
    pub fn expected_results(&self) -> usize {
        self.combinations
            .iter()
            .map(|c| {
                if self.batch_mode {
                    c.test_pins
                        .iter()
                        .filter(|&&p| !c.is_common_connected(p))
                        .count()
                } else {
                    c.test_pins.len()
                }
            })
            .sum()
    }

    /// Checks every pin against `1..=pin_count` and the subset invariant.
    pub fn validate(&self, pin_count: u16) -> Result<(), PlanError> {
        for (index, combination) in self.combinations.iter().enumerate() {
            combination.validate(index, pin_count)?;
        }
        Ok(())
    }
}

/// Reasons a plan is rejected before any hardware is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("combination {combination}: no ground pin")]
    NoGroundPin { combination: usize },

    #[error("combination {combination}: pin {pin} outside 1..={pin_count}")]
    PinOutOfRange {
        combination: usize,
        pin: u16,
        pin_count: u16,
    },

    #[error("combination {combination}: pin {pin} listed twice")]
    DuplicatePin { combination: usize, pin: u16 },

    #[error("combination {combination}: common-connected pin {pin} is not a test pin")]
    CommonNotTested { combination: usize, pin: u16 },
}

// ------------------------------------------------------------------------------------------------
// Result
// ------------------------------------------------------------------------------------------------

/// One probed pin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementResult {
    pub ground_pin: u16,
    pub test_pin: u16,
    /// Reading in ohms. `NaN` when the meter overflowed.
    pub resistance_ohms: f64,
    /// Whether the pin was listed as common-connected.
    pub expected_connected: bool,
}

impl MeasurementResult {
    pub fn is_out_of_range(&self) -> bool {
        self.resistance_ohms.is_nan()
    }

    pub fn pass(&self) -> bool {
        if self.expected_connected {
            self.resistance_ohms <= CONNECTED_MAX_OHMS
        } else {
            self.is_out_of_range()
        }
    }
}
