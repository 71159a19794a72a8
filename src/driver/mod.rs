//! # External Driver Contracts
//!
//! The relay board is driven through a USB SPI/DIO interface and the
//! measurement is taken with a precision DMM. Both vendor drivers are
//! external collaborators; this module fixes the contract they must meet:
//!
//! - [`SpiDioDriver`]: device discovery, session open/close, SPI
//!   configuration contexts, SPI transfers and DIO port writes.
//! - [`ResistanceMeter`]: reset, 4-wire resistance configuration, single
//!   reads and self-test.
//!
//! Vendor bindings convert their raw `i32` status with
//! [`StatusCode::check`]. Neither trait is used concurrently; callers go
//! through [`DeviceGateway`](crate::gateway::DeviceGateway) and
//! [`MeterSession`](crate::meter::MeterSession).

mod status;

pub use status::StatusCode;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Handles
// ------------------------------------------------------------------------------------------------

/// Opaque handle to an open interface device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque handle to an SPI configuration context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigHandle(pub u64);

// ------------------------------------------------------------------------------------------------
// Link parameters
// ------------------------------------------------------------------------------------------------

/// I/O voltage of the interface lines. Discriminants are the vendor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoVoltage {
    V3_3 = 33,
    V2_5 = 25,
    V1_8 = 18,
    V1_5 = 15,
    V1_2 = 12,
}

/// DIO output driver type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriveMode {
    OpenDrain = 0,
    PushPull = 1,
}

/// SPI clock idle level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClockPolarity {
    IdleLow = 0,
    IdleHigh = 1,
}

/// SPI clock edge on which data is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClockPhase {
    FirstEdge = 0,
    SecondEdge = 1,
}

/// Fixed link parameters applied to the interface.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    /// SPI transfer width in bits. One transfer moves one register half.
    pub bits_per_sample: u16,
    /// SPI port number.
    pub spi_port: u8,
    /// SPI clock rate in kHz.
    pub clock_rate_khz: u16,
    pub clock_polarity: ClockPolarity,
    pub clock_phase: ClockPhase,
    pub io_voltage: IoVoltage,
    pub drive_mode: DriveMode,
    /// DIO port carrying the relay clear line.
    pub dio_port: u8,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            bits_per_sample: 64,
            spi_port: 0,
            clock_rate_khz: 2500,
            clock_polarity: ClockPolarity::IdleLow,
            clock_phase: ClockPhase::FirstEdge,
            io_voltage: IoVoltage::V3_3,
            drive_mode: DriveMode::PushPull,
            dio_port: 0,
        }
    }
}

impl LinkSettings {
    /// Bytes moved by a single SPI transfer.
    pub fn transfer_bytes(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }
}

// ------------------------------------------------------------------------------------------------
// SPI / DIO driver
// ------------------------------------------------------------------------------------------------

/// Contract of the SPI/DIO interface driver.
///
/// Every call is a blocking device transaction. The device supports
/// exactly one transaction in flight.
pub trait SpiDioDriver: Send {
    /// Returns the resource name of the first device found and the number
    /// of devices present.
    fn find_device(&mut self) -> Result<(String, u32), StatusCode>;

    fn open(&mut self, resource: &str) -> Result<DeviceHandle, StatusCode>;

    fn close(&mut self, device: DeviceHandle) -> Result<(), StatusCode>;

    fn set_io_voltage_level(
        &mut self,
        device: DeviceHandle,
        level: IoVoltage,
    ) -> Result<(), StatusCode>;

    fn set_driver_type(
        &mut self,
        device: DeviceHandle,
        port: u8,
        mode: DriveMode,
    ) -> Result<(), StatusCode>;

    fn configuration_open(&mut self) -> Result<ConfigHandle, StatusCode>;

    fn configuration_close(&mut self, config: ConfigHandle) -> Result<(), StatusCode>;

    fn configuration_set_chip_select(
        &mut self,
        config: ConfigHandle,
        chip_select: u32,
    ) -> Result<(), StatusCode>;

    fn configuration_set_port(&mut self, config: ConfigHandle, port: u8)
    -> Result<(), StatusCode>;

    fn configuration_set_clock_rate(
        &mut self,
        config: ConfigHandle,
        khz: u16,
    ) -> Result<(), StatusCode>;

    fn configuration_set_clock_polarity(
        &mut self,
        config: ConfigHandle,
        polarity: ClockPolarity,
    ) -> Result<(), StatusCode>;

    fn configuration_set_clock_phase(
        &mut self,
        config: ConfigHandle,
        phase: ClockPhase,
    ) -> Result<(), StatusCode>;

    fn configuration_set_bits_per_sample(
        &mut self,
        config: ConfigHandle,
        bits: u16,
    ) -> Result<(), StatusCode>;

    /// Full-duplex transfer. Returns the number of bytes read into `read`.
    fn spi_write_read(
        &mut self,
        device: DeviceHandle,
        config: ConfigHandle,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<usize, StatusCode>;

    /// Sets line directions of a DIO port. A set bit makes the line an output.
    fn dio_set_port_direction_map(
        &mut self,
        device: DeviceHandle,
        port: u8,
        map: u8,
    ) -> Result<(), StatusCode>;

    fn dio_write_port(&mut self, device: DeviceHandle, port: u8, value: u8)
    -> Result<(), StatusCode>;
}

// ------------------------------------------------------------------------------------------------
// Resistance meter driver
// ------------------------------------------------------------------------------------------------

/// Failure reported by the meter driver.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("meter fault {code}: {message}")]
pub struct MeterFault {
    pub code: i32,
    pub message: String,
}

/// Outcome of the meter's built-in self-test. `code == 0` is success.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSelfTest {
    pub code: i32,
    pub message: String,
}

impl MeterSelfTest {
    pub fn passed(&self) -> bool {
        self.code == 0
    }
}

/// 4-wire resistance measurement setup.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSettings {
    /// Let the meter pick its range. When `false`, `range_ohms` is used.
    pub auto_range: bool,
    pub range_ohms: f64,
    pub resolution_digits: f64,
    pub powerline_hz: f64,
    pub auto_zero: bool,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            auto_range: false,
            range_ohms: 0.02,
            resolution_digits: 6.5,
            powerline_hz: 50.0,
            auto_zero: true,
        }
    }
}

/// Contract of the resistance-meter driver.
pub trait ResistanceMeter: Send {
    fn reset(&mut self) -> Result<(), MeterFault>;

    fn configure_four_wire_resistance(&mut self, settings: &MeterSettings)
    -> Result<(), MeterFault>;

    /// Takes one reading in ohms. An overflow / out-of-range reading is
    /// reported as `f64::NAN`, not as a fault.
    fn read(&mut self) -> Result<f64, MeterFault>;

    fn self_test(&mut self) -> MeterSelfTest;

    /// Releases the driver session. Called once when a run ends.
    fn close(&mut self) {}
}
