//! # Measurement Orchestrator
//!
//! Executes an [`ExecutionPlan`] against the switch matrix and the meter.
//!
//! Every measurement follows the same sequence:
//!
//! ```text
//! Discharge (optional) -> Clear -> SetMatrix -> Measure -> Classify
//! ```
//!
//! ## Single-pin mode
//!
//! Each test pin is measured on its own against the combination's ground
//! pins. Cancellation is polled before every pin.
//!
//! ## Batch mode
//!
//! Common-connected pins are skipped; the rest are split into chunks of
//! `batch_size` pins, all routed to the test line at once and measured with
//! a single reading shared by the whole chunk.
//!
//! - If every candidate result passes, the chunk is committed as is.
//! - Otherwise all candidates are discarded and every pin in the chunk is
//!   re-measured alone. Those individual results are committed whatever
//!   they read. There is no further recursion.
//!
//! Cancellation is polled before every chunk.
//!
//! ## Outcome
//!
//! The run ends [`CheckOutcome::Completed`], [`CheckOutcome::Cancelled`] or
//! [`CheckOutcome::Aborted`] on the first driver fault. Results committed
//! before the end are always returned. Relays are released with a final
//! clear unless the run faulted.

#[cfg(test)]
mod tests;

use tracing::{debug, error, info, warn};

use crate::matrix::SwitchMatrix;
use crate::meter::MeterSession;
use crate::plan::{ExecutionPlan, MeasurementResult, PinCheckCombination};
use crate::run::RunGuard;
use crate::{PinCheckConfig, PinCheckError};

// ------------------------------------------------------------------------------------------------
// Report
// ------------------------------------------------------------------------------------------------

/// How a check run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Every combination was measured.
    Completed,
    /// A cancellation request stopped the run early.
    Cancelled,
    /// Another run was active; nothing was done.
    Busy,
    /// A driver fault stopped the run.
    Aborted(PinCheckError),
}

/// Results of a check run and how it ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    /// Committed results in measurement order.
    pub results: Vec<MeasurementResult>,
    pub outcome: CheckOutcome,
}

impl CheckReport {
    pub(crate) fn busy() -> Self {
        Self {
            results: Vec::new(),
            outcome: CheckOutcome::Busy,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == CheckOutcome::Completed
    }

    /// `true` if the run completed and every result passed.
    pub fn passed(&self) -> bool {
        self.is_completed() && self.results.iter().all(MeasurementResult::pass)
    }

    pub fn failures(&self) -> impl Iterator<Item = &MeasurementResult> {
        self.results.iter().filter(|r| !r.pass())
    }

    /// The fault that aborted the run, if any.
    pub fn fault(&self) -> Option<&PinCheckError> {
        match &self.outcome {
            CheckOutcome::Aborted(e) => Some(e),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Orchestrator
// ------------------------------------------------------------------------------------------------

enum Flow {
    Continue,
    Cancelled,
}

struct Orchestrator<'r, 'm> {
    plan: &'r ExecutionPlan,
    config: &'r PinCheckConfig,
    matrix: &'r mut SwitchMatrix,
    meter: &'r mut MeterSession<'m>,
    run: &'r RunGuard<'r>,
    results: Vec<MeasurementResult>,
}

/// Executes `plan` while `run` holds the handle.
///
/// The plan must already be validated against `config.pin_count`.
pub fn run_plan(
    plan: &ExecutionPlan,
    config: &PinCheckConfig,
    matrix: &mut SwitchMatrix,
    meter: &mut MeterSession<'_>,
    run: &RunGuard<'_>,
) -> CheckReport {
    info!(
        combinations = plan.combinations.len(),
        batch = plan.batch_mode,
        discharge = plan.discharge_after_each_operation,
        "check started"
    );

    let mut orch = Orchestrator {
        plan,
        config,
        matrix,
        meter,
        run,
        results: Vec::with_capacity(plan.expected_results()),
    };

    let mut outcome = match orch.execute() {
        Ok(Flow::Continue) => CheckOutcome::Completed,
        Ok(Flow::Cancelled) => {
            warn!(results = orch.results.len(), "check cancelled");
            CheckOutcome::Cancelled
        }
        Err(e) => {
            error!(results = orch.results.len(), "check aborted: {e}");
            CheckOutcome::Aborted(e)
        }
    };

    if !matches!(outcome, CheckOutcome::Aborted(_)) {
        if let Err(e) = orch.matrix.clear() {
            error!("final clear failed: {e}");
            outcome = CheckOutcome::Aborted(e.into());
        }
    }

    let results = orch.results;
    info!(results = results.len(), ?outcome, "check finished");
    CheckReport { results, outcome }
}

impl Orchestrator<'_, '_> {
    fn execute(&mut self) -> Result<Flow, PinCheckError> {
        let mut settings = self.config.meter.clone();
        settings.auto_range = self.plan.use_auto_range;
        self.meter.prepare(&settings)?;

        let plan = self.plan;
        for (index, combination) in plan.combinations.iter().enumerate() {
            if self.run.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            debug!(
                index,
                test_pins = combination.test_pins.len(),
                ground = ?combination.ground_pins,
                "combination"
            );

            let flow = if plan.batch_mode {
                self.check_batched(combination)?
            } else {
                self.check_single(combination)?
            };
            if let Flow::Cancelled = flow {
                return Ok(Flow::Cancelled);
            }
        }
        Ok(Flow::Continue)
    }

    fn check_single(&mut self, combination: &PinCheckCombination) -> Result<Flow, PinCheckError> {
        for &pin in &combination.test_pins {
            if self.run.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            let result = self.measure_one(combination, pin)?;
            self.results.push(result);
        }
        Ok(Flow::Continue)
    }

    fn check_batched(&mut self, combination: &PinCheckCombination) -> Result<Flow, PinCheckError> {
        let pins: Vec<u16> = combination
            .test_pins
            .iter()
            .copied()
            .filter(|&p| !combination.is_common_connected(p))
            .collect();

        for chunk in pins.chunks(self.config.batch_size.max(1)) {
            if self.run.is_cancelled() {
                return Ok(Flow::Cancelled);
            }

            let ohms = self.measure(chunk, &combination.ground_pins)?;
            let candidates: Vec<MeasurementResult> = chunk
                .iter()
                .map(|&pin| result_for(combination, pin, ohms))
                .collect();

            if candidates.iter().all(MeasurementResult::pass) {
                self.results.extend(candidates);
                continue;
            }

            debug!(chunk = chunk.len(), ohms, "chunk failed, isolating pins");
            for &pin in chunk {
                let result = self.measure_one(combination, pin)?;
                self.results.push(result);
            }
        }
        Ok(Flow::Continue)
    }

    fn measure_one(
        &mut self,
        combination: &PinCheckCombination,
        pin: u16,
    ) -> Result<MeasurementResult, PinCheckError> {
        let ohms = self.measure(&[pin], &combination.ground_pins)?;
        Ok(result_for(combination, pin, ohms))
    }

    /// Discharge, clear, route `zap` against `ground` and take one reading.
    fn measure(&mut self, zap: &[u16], ground: &[u16]) -> Result<f64, PinCheckError> {
        if self.plan.discharge_after_each_operation {
            self.matrix.discharge_all(
                self.config.pin_count,
                ground,
                self.config.discharge_chunk_size,
            )?;
        }
        self.matrix.clear()?;
        self.matrix.set_matrix(zap, ground)?;
        Ok(self.meter.measure()?)
    }
}

fn result_for(combination: &PinCheckCombination, pin: u16, ohms: f64) -> MeasurementResult {
    MeasurementResult {
        ground_pin: combination.primary_ground(),
        test_pin: pin,
        resistance_ohms: ohms,
        expected_connected: combination.is_common_connected(pin),
    }
}
