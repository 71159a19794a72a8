use crate::PinCheckConfig;
use crate::check::{CheckReport, run_plan};
use crate::gateway::{DeviceGateway, DeviceOp};
use crate::matrix::SwitchMatrix;
use crate::meter::MeterSession;
use crate::plan::ExecutionPlan;
use crate::run::{RunContext, RunState};
use crate::sim::SimulatedFixture;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small pin universe so discharge stays cheap: 64 pins, one chip select.
pub fn small_config() -> PinCheckConfig {
    init_tracing();
    PinCheckConfig {
        pin_count: 64,
        ..PinCheckConfig::default()
    }
}

/// Runs `plan` on a fresh matrix and meter session wired to `fixture`.
pub fn run_on(
    fixture: &SimulatedFixture,
    ctx: &RunContext,
    plan: &ExecutionPlan,
    config: &PinCheckConfig,
) -> CheckReport {
    let mut matrix = SwitchMatrix::new(DeviceGateway::new(fixture.spi_driver()), config.link.clone()).unwrap();
    let mut meter = fixture.meter();
    let mut session = MeterSession::new(&mut meter);
    let guard = ctx.begin(RunState::Checking).unwrap();
    run_plan(plan, config, &mut matrix, &mut session, &guard)
}

pub fn count(fixture: &SimulatedFixture, op: DeviceOp) -> usize {
    fixture
        .device_calls()
        .iter()
        .filter(|&&call| call == op)
        .count()
}
