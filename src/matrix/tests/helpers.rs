use crate::driver::LinkSettings;
use crate::gateway::{DeviceGateway, DeviceOp};
use crate::matrix::SwitchMatrix;
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

/// Fresh fixture plus a matrix wired to it with default link settings.
pub fn sim_matrix() -> (SimulatedFixture, SwitchMatrix) {
    init_tracing();
    let fixture = SimulatedFixture::new();
    let gateway = DeviceGateway::new(fixture.spi_driver());
    let matrix = SwitchMatrix::new(gateway, LinkSettings::default()).unwrap();
    (fixture, matrix)
}

/// Number of times `op` appears in the fixture's call log.
pub fn count(fixture: &SimulatedFixture, op: DeviceOp) -> usize {
    fixture
        .device_calls()
        .iter()
        .filter(|&&call| call == op)
        .count()
}
