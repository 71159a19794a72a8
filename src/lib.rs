//! # pincheck
//!
//! Pin continuity and isolation checks on a relay switch-matrix test
//! fixture. Logical connector pins are routed through shift-register
//! driven relay banks onto a **zap** (test) line and a **ground**
//! (reference) line, and a precision 4-wire resistance meter reads the
//! path between them.
//!
//! ## Quick Start
//!
//! ```rust
//! # #[cfg(feature = "sim")] {
//! use pincheck::plan::{ExecutionPlan, PinCheckCombination};
//! use pincheck::sim::SimulatedFixture;
//! use pincheck::{PinCheck, PinCheckConfig};
//!
//! // A simulated fixture whose DUT shorts pin 3 to pin 1.
//! let fixture = SimulatedFixture::new();
//! fixture.connect(3, 1, 0.2);
//!
//! let pc = PinCheck::new(fixture.spi_driver(), fixture.meter(), PinCheckConfig::default()).unwrap();
//!
//! let plan = ExecutionPlan::new(vec![
//!     PinCheckCombination::new([2, 3, 4], [1]).with_common_connected([3]),
//! ]);
//! let report = pc.run_check(&plan).unwrap();
//! assert!(report.passed());
//!
//! let health = pc.run_self_test().unwrap().expect("not cancelled");
//! assert!(health.pass);
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`address`]: logical pin to shift-register bit encoding.
//! - [`gateway`]: the one lock every interface-driver call goes through.
//! - [`matrix`]: relay command executor, device session, clear and
//!   discharge sequences.
//! - [`meter`]: scoped resistance-meter session.
//! - [`check`]: plan execution with batched measurement and per-pin
//!   fault isolation.
//! - [`selftest`]: exhaustive per-pin fixture health check.
//! - `sim` (feature `sim`): a software fixture implementing both driver
//!   contracts.

pub mod address;
pub mod check;
pub mod driver;
pub mod gateway;
pub mod matrix;
pub mod meter;
pub mod plan;
pub mod run;
pub mod selftest;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use address::MAX_CHANNEL;
use check::CheckReport;
use driver::{LinkSettings, MeterSettings, ResistanceMeter, SpiDioDriver};
use gateway::{DeviceError, DeviceGateway};
use matrix::{MatrixError, SwitchMatrix, TRANSFER_BITS};
use meter::{MeterError, MeterSession};
use plan::{ExecutionPlan, PlanError};
use run::{CancelHandle, RunContext, RunState};
use selftest::SelfTestResult;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`PinCheck`] handle.
///
/// All fields have defaults matching the production fixture via
/// [`PinCheckConfig::default()`]. The configuration is validated when
/// passed to [`PinCheck::new`].
///
/// # Example
///
/// ```rust
/// use pincheck::PinCheckConfig;
///
/// let config = PinCheckConfig {
///     pin_count: 128,
///     batch_size: 25,
///     ..PinCheckConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PinCheckConfig {
    /// Size of the pin universe, `1..=pin_count`.
    ///
    /// Default: 512. Must be in `1..=512`.
    pub pin_count: u16,

    /// Pins measured together in batch mode.
    ///
    /// Default: 50. Must be ≥ 1.
    pub batch_size: usize,

    /// Pins tied to ground per matrix write while discharging.
    ///
    /// Default: 50. Must be ≥ 1.
    pub discharge_chunk_size: usize,

    /// Ground pin used to discharge the fixture before a self-test.
    ///
    /// Default: 1. Must be within `1..=pin_count`.
    pub self_test_reference_pin: u16,

    /// Interface device link parameters.
    pub link: LinkSettings,

    /// Meter setup. `auto_range` is overridden per run.
    pub meter: MeterSettings,
}

impl Default for PinCheckConfig {
    fn default() -> Self {
        Self {
            pin_count: MAX_CHANNEL,
            batch_size: 50,
            discharge_chunk_size: 50,
            self_test_reference_pin: 1,
            link: LinkSettings::default(),
            meter: MeterSettings::default(),
        }
    }
}

impl PinCheckConfig {
    /// Validates all configuration parameters.
    fn validate(&self) -> Result<(), PinCheckError> {
        if self.pin_count == 0 || self.pin_count > MAX_CHANNEL {
            return Err(PinCheckError::InvalidConfig(
                "pin_count must be in 1..=512".into(),
            ));
        }
        if self.batch_size < 1 {
            return Err(PinCheckError::InvalidConfig(
                "batch_size must be >= 1".into(),
            ));
        }
        if self.discharge_chunk_size < 1 {
            return Err(PinCheckError::InvalidConfig(
                "discharge_chunk_size must be >= 1".into(),
            ));
        }
        if self.self_test_reference_pin == 0 || self.self_test_reference_pin > self.pin_count {
            return Err(PinCheckError::InvalidConfig(
                "self_test_reference_pin must be within 1..=pin_count".into(),
            ));
        }
        if self.link.bits_per_sample != TRANSFER_BITS {
            return Err(PinCheckError::InvalidConfig(
                "link.bits_per_sample must be 64 (one register half per transfer)".into(),
            ));
        }
        if self.link.clock_rate_khz == 0 {
            return Err(PinCheckError::InvalidConfig(
                "link.clock_rate_khz must be > 0".into(),
            ));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.meter.range_ohms) || !positive(self.meter.resolution_digits) {
            return Err(PinCheckError::InvalidConfig(
                "meter range and resolution must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`PinCheck`] operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PinCheckError {
    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The plan references pins outside the universe or is malformed.
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// Another run is active on this handle.
    #[error("another run is active")]
    Busy,

    /// An interface-driver call failed.
    #[error("{0}")]
    Device(#[from] DeviceError),

    /// A meter-driver call failed.
    #[error("{0}")]
    Meter(#[from] MeterError),

    /// Broken internal invariant (poisoned lock, unencodable pin).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MatrixError> for PinCheckError {
    fn from(e: MatrixError) -> Self {
        match e {
            MatrixError::Device(e) => PinCheckError::Device(e),
            // Plans are validated against the pin universe up front.
            MatrixError::Address(e) => PinCheckError::Internal(e.to_string()),
            MatrixError::TransferWidth { bits } => {
                PinCheckError::InvalidConfig(format!("unsupported transfer width: {bits} bits"))
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Handle
// ------------------------------------------------------------------------------------------------

/// The main pin-check handle.
///
/// Owns both drivers and the run context. Runs are synchronous: the
/// calling thread drives the whole sequence and the call returns when
/// the run ends.
///
/// # Thread safety
///
/// `PinCheck` is `Send + Sync`. Only one run (check or self-test) can be
/// active at a time; a concurrent request is rejected immediately without
/// touching any driver. Cancellation can be requested from any thread,
/// either on the handle or through a [`CancelHandle`].
///
/// # Device session
///
/// The interface device is opened lazily by each run and closed when the
/// run ends, on every exit path.
pub struct PinCheck {
    config: PinCheckConfig,
    gateway: DeviceGateway,
    meter: Mutex<Box<dyn ResistanceMeter>>,
    run: Arc<RunContext>,
}

impl std::fmt::Debug for PinCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinCheck")
            .field("state", &self.run.state())
            .finish_non_exhaustive()
    }
}

impl PinCheck {
    /// Creates a handle over the given drivers. No driver is called yet.
    ///
    /// # Errors
    ///
    /// Returns [`PinCheckError::InvalidConfig`] if any configuration
    /// parameter is out of range.
    pub fn new(
        spi_driver: impl SpiDioDriver + 'static,
        meter: impl ResistanceMeter + 'static,
        config: PinCheckConfig,
    ) -> Result<Self, PinCheckError> {
        config.validate()?;

        info!(
            pin_count = config.pin_count,
            batch_size = config.batch_size,
            "pin check handle created"
        );

        Ok(Self {
            config,
            gateway: DeviceGateway::new(spi_driver),
            meter: Mutex::new(Box::new(meter)),
            run: Arc::new(RunContext::new()),
        })
    }

    pub fn config(&self) -> &PinCheckConfig {
        &self.config
    }

    // --------------------------------------------------------------------------------------------
    // Runs
    // --------------------------------------------------------------------------------------------

    /// Executes `plan` and returns every committed result.
    ///
    /// A run that is cancelled or hits a driver fault still returns the
    /// results committed so far; [`CheckReport::outcome`] tells how it
    /// ended. If another run is active the report is empty with outcome
    /// [`check::CheckOutcome::Busy`] and no driver is called.
    ///
    /// # Errors
    ///
    /// Returns [`PinCheckError::InvalidPlan`] before any driver call if the
    /// plan is malformed. While busy the plan is not looked at.
    pub fn run_check(&self, plan: &ExecutionPlan) -> Result<CheckReport, PinCheckError> {
        let Some(guard) = self.run.begin(RunState::Checking) else {
            warn!("check rejected: another run is active");
            return Ok(CheckReport::busy());
        };
        plan.validate(self.config.pin_count)?;

        let mut meter = self.lock_meter()?;
        let mut session = MeterSession::new(&mut **meter);
        let mut matrix = SwitchMatrix::new(self.gateway.clone(), self.config.link.clone())?;

        let report = check::run_plan(plan, &self.config, &mut matrix, &mut session, &guard);

        if let Err(e) = matrix.disconnect() {
            warn!("closing relay interface failed: {e}");
        }
        Ok(report)
    }

    /// Runs the fixture self-test.
    ///
    /// Returns `Ok(None)` if the scan was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PinCheckError::Busy`] if another run is active, or the
    /// driver fault that aborted the scan.
    pub fn run_self_test(&self) -> Result<Option<SelfTestResult>, PinCheckError> {
        let Some(guard) = self.run.begin(RunState::SelfTesting) else {
            warn!("self-test rejected: another run is active");
            return Err(PinCheckError::Busy);
        };

        let mut meter = self.lock_meter()?;
        let mut session = MeterSession::new(&mut **meter);
        let mut matrix = SwitchMatrix::new(self.gateway.clone(), self.config.link.clone())?;

        let result = selftest::run_scan(&self.config, &mut matrix, &mut session, &guard);

        if let Err(e) = matrix.disconnect() {
            warn!("closing relay interface failed: {e}");
        }
        result
    }

    // --------------------------------------------------------------------------------------------
    // Run control
    // --------------------------------------------------------------------------------------------

    /// Asks the active run, if any, to stop at its next check point.
    pub fn request_cancel(&self) {
        self.run.request_cancel();
    }

    pub fn is_busy(&self) -> bool {
        self.run.is_busy()
    }

    pub fn run_state(&self) -> RunState {
        self.run.state()
    }

    /// Token for cancelling runs from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.run))
    }

    fn lock_meter(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn ResistanceMeter>>, PinCheckError> {
        self.meter
            .lock()
            .map_err(|_| PinCheckError::Internal("meter lock poisoned".into()))
    }
}
