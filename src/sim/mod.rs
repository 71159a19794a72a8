//! # Simulated Fixture
//!
//! A software model of the relay board, the interface device and the DMM,
//! wired to a device-under-test with configurable pin-to-pin connections.
//! It implements both [`SpiDioDriver`] and [`ResistanceMeter`] so the
//! whole stack can run without hardware.
//!
//! ## Relay model
//!
//! - Each chip select owns a 128-bit word split into two 64-bit halves.
//!   After a chip select is configured, SPI transfers alternate between the
//!   first half (lanes `0..8`) and the second half (lanes `8..16`).
//! - Relays **latch**: written bits are OR-ed into the word. Zero bytes
//!   leave relays untouched.
//! - A rising edge on DIO line 0, with line 0 configured as an output,
//!   releases every relay.
//!
//! ## Meter model
//!
//! A reading is the parallel combination of every closed path between a
//! zap-routed channel and a ground-routed channel:
//!
//! - a channel routed to both lines reads its own loop resistance
//!   (default [`DEFAULT_LOOP_OHMS`]);
//! - two different channels read the resistance of a DUT connection
//!   registered with [`SimulatedFixture::connect`].
//!
//! With no closed path the meter overflows and reads `NaN`.
//!
//! ## Scripting
//!
//! Readings can be queued explicitly, individual driver calls can be made
//! to fail, and a hook can observe every meter read (used to trigger
//! cancellation at a precise point).


use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::address::{
    CHANNELS_PER_CHIP_SELECT, CHANNELS_PER_REGISTER, CHIP_SELECT_COUNT, REGISTERS_PER_CHIP_SELECT,
};
use crate::driver::{
    ClockPhase, ClockPolarity, ConfigHandle, DeviceHandle, DriveMode, IoVoltage, MeterFault,
    MeterSelfTest, MeterSettings, ResistanceMeter, SpiDioDriver, StatusCode,
};
use crate::gateway::DeviceOp;

/// Loop resistance of a healthy channel routed to both lines.
pub const DEFAULT_LOOP_OHMS: f64 = 0.05;

const RESOURCE_NAME: &str = "USB0::SIM::RELAY";
const HALF_BYTES: usize = 8;

// ------------------------------------------------------------------------------------------------
// Observable state
// ------------------------------------------------------------------------------------------------

/// Calls received by the simulated meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterCall {
    Reset,
    Configure,
    Read,
    SelfTest,
    Close,
}

/// Channels currently routed to each line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayState {
    pub zap: BTreeSet<u16>,
    pub ground: BTreeSet<u16>,
}

impl RelayState {
    pub fn is_released(&self) -> bool {
        self.zap.is_empty() && self.ground.is_empty()
    }
}

type ReadHook = Box<dyn FnMut(usize) + Send>;

struct ConfigState {
    chip_select: u32,
    bits_per_sample: u16,
    next_half: usize,
}

struct FixtureState {
    // board
    words: [[u8; REGISTERS_PER_CHIP_SELECT as usize]; CHIP_SELECT_COUNT as usize],
    dio_direction: u8,
    dio_value: u8,
    device_present: bool,
    open_device: Option<DeviceHandle>,
    next_config: u64,
    configs: HashMap<u64, ConfigState>,

    // DUT
    loop_ohms: HashMap<u16, f64>,
    connections: HashMap<(u16, u16), f64>,

    // meter
    meter_settings: Option<MeterSettings>,
    scripted: VecDeque<f64>,
    self_test: MeterSelfTest,
    read_hook: Option<ReadHook>,

    // fault injection
    device_faults: Vec<(DeviceOp, usize, StatusCode)>,
    read_faults: Vec<(usize, MeterFault)>,

    // logs
    device_calls: Vec<DeviceOp>,
    meter_calls: Vec<MeterCall>,
    op_counts: HashMap<DeviceOp, usize>,
    reads: usize,
    spi_writes: Vec<(u32, Vec<u8>)>,
}

impl FixtureState {
    fn new() -> Self {
        Self {
            words: [[0; REGISTERS_PER_CHIP_SELECT as usize]; CHIP_SELECT_COUNT as usize],
            dio_direction: 0,
            dio_value: 0,
            device_present: true,
            open_device: None,
            next_config: 1,
            configs: HashMap::new(),
            loop_ohms: HashMap::new(),
            connections: HashMap::new(),
            meter_settings: None,
            scripted: VecDeque::new(),
            self_test: MeterSelfTest {
                code: 0,
                message: "Self test passed".into(),
            },
            read_hook: None,
            device_faults: Vec::new(),
            read_faults: Vec::new(),
            device_calls: Vec::new(),
            meter_calls: Vec::new(),
            op_counts: HashMap::new(),
            reads: 0,
            spi_writes: Vec::new(),
        }
    }

    /// Logs `op` and returns an injected fault if one is due.
    fn enter(&mut self, op: DeviceOp) -> Result<(), StatusCode> {
        self.device_calls.push(op);
        let count = self.op_counts.entry(op).or_insert(0);
        *count += 1;
        let nth = *count;

        match self
            .device_faults
            .iter()
            .find(|(fault_op, at, _)| *fault_op == op && *at == nth)
        {
            Some((_, _, status)) => Err(*status),
            None => Ok(()),
        }
    }

    fn require_device(&self, device: DeviceHandle) -> Result<(), StatusCode> {
        match self.open_device {
            Some(open) if open == device => Ok(()),
            _ => Err(StatusCode::InvalidDeviceId),
        }
    }

    fn config_mut(&mut self, config: ConfigHandle) -> Result<&mut ConfigState, StatusCode> {
        self.configs
            .get_mut(&config.0)
            .ok_or(StatusCode::InvalidConfigurationReference)
    }

    fn relay_state(&self) -> RelayState {
        let mut state = RelayState::default();
        for (cs, word) in self.words.iter().enumerate() {
            for (register, &byte) in word.iter().enumerate() {
                for bit in 0..8u8 {
                    if byte & (1u8 << bit) == 0 {
                        continue;
                    }
                    let lane = (REGISTERS_PER_CHIP_SELECT as u16 - 1) - register as u16;
                    let channel = cs as u16 * CHANNELS_PER_CHIP_SELECT
                        + lane * CHANNELS_PER_REGISTER
                        + u16::from(bit / 2)
                        + 1;
                    if bit % 2 == 0 {
                        state.zap.insert(channel);
                    } else {
                        state.ground.insert(channel);
                    }
                }
            }
        }
        state
    }

    fn path_ohms(&self, zap: u16, ground: u16) -> Option<f64> {
        if zap == ground {
            return Some(*self.loop_ohms.get(&zap).unwrap_or(&DEFAULT_LOOP_OHMS));
        }
        let key = (zap.min(ground), zap.max(ground));
        self.connections.get(&key).copied()
    }

    fn measure(&self) -> f64 {
        let relays = self.relay_state();
        let paths: Vec<f64> = relays
            .zap
            .iter()
            .flat_map(|&z| relays.ground.iter().filter_map(move |&g| self.path_ohms(z, g)))
            .collect();

        match paths.as_slice() {
            [] => f64::NAN,
            [single] => *single,
            _ if paths.iter().any(|&ohms| ohms <= 0.0) => 0.0,
            _ => 1.0 / paths.iter().map(|ohms| 1.0 / ohms).sum::<f64>(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Fixture handle
// ------------------------------------------------------------------------------------------------

/// Shared handle to a simulated fixture. Clones observe the same state.
#[derive(Clone)]
pub struct SimulatedFixture {
    state: Arc<Mutex<FixtureState>>,
}

impl Default for SimulatedFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedFixture").finish_non_exhaustive()
    }
}

impl SimulatedFixture {
    /// A fixture with a healthy board and a DUT with no connections.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FixtureState::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FixtureState> {
        // The simulator never panics while holding the lock except through
        // a user hook; recover the state in that case.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Driver half implementing [`SpiDioDriver`].
    pub fn spi_driver(&self) -> SimSpiDriver {
        SimSpiDriver {
            fixture: self.clone(),
        }
    }

    /// Driver half implementing [`ResistanceMeter`].
    pub fn meter(&self) -> SimMeter {
        SimMeter {
            fixture: self.clone(),
        }
    }

    // --------------------------------------------------------------------------------------------
    // DUT setup
    // --------------------------------------------------------------------------------------------

    /// Registers a DUT connection between two pins.
    pub fn connect(&self, a: u16, b: u16, ohms: f64) {
        self.lock().connections.insert((a.min(b), a.max(b)), ohms);
    }

    /// Overrides the loop resistance read when `pin` is routed to both lines.
    pub fn set_loop_resistance(&self, pin: u16, ohms: f64) {
        self.lock().loop_ohms.insert(pin, ohms);
    }

    /// Queues readings returned by the meter ahead of the modelled value.
    pub fn script_readings(&self, readings: impl IntoIterator<Item = f64>) {
        self.lock().scripted.extend(readings);
    }

    /// Sets the outcome of the meter's built-in self-test.
    pub fn set_meter_self_test(&self, code: i32, message: impl Into<String>) {
        self.lock().self_test = MeterSelfTest {
            code,
            message: message.into(),
        };
    }

    /// Makes `find_device` report no device.
    pub fn unplug(&self) {
        self.lock().device_present = false;
    }

    /// Installs a hook called after every meter read with the running read count.
    pub fn on_read(&self, hook: impl FnMut(usize) + Send + 'static) {
        self.lock().read_hook = Some(Box::new(hook));
    }

    // --------------------------------------------------------------------------------------------
    // Fault injection
    // --------------------------------------------------------------------------------------------

    /// Fails the `nth` (1-based, counted since creation) call of `op` with `status`.
    pub fn fail_device_call(&self, op: DeviceOp, nth: usize, status: StatusCode) {
        self.lock().device_faults.push((op, nth, status));
    }

    /// Fails the `nth` (1-based) meter read.
    pub fn fail_meter_read(&self, nth: usize, fault: MeterFault) {
        self.lock().read_faults.push((nth, fault));
    }

    // --------------------------------------------------------------------------------------------
    // Inspection
    // --------------------------------------------------------------------------------------------

    pub fn relay_state(&self) -> RelayState {
        self.lock().relay_state()
    }

    /// Raw 128-bit word of one chip select, lane 0 first.
    pub fn register_word(&self, chip_select: u8) -> [u8; REGISTERS_PER_CHIP_SELECT as usize] {
        self.lock().words[chip_select as usize]
    }

    pub fn device_calls(&self) -> Vec<DeviceOp> {
        self.lock().device_calls.clone()
    }

    pub fn meter_calls(&self) -> Vec<MeterCall> {
        self.lock().meter_calls.clone()
    }

    /// Every SPI transfer as `(chip_select, bytes)`.
    pub fn spi_writes(&self) -> Vec<(u32, Vec<u8>)> {
        self.lock().spi_writes.clone()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    pub fn is_device_open(&self) -> bool {
        self.lock().open_device.is_some()
    }

    pub fn open_configurations(&self) -> usize {
        self.lock().configs.len()
    }

    pub fn meter_settings(&self) -> Option<MeterSettings> {
        self.lock().meter_settings.clone()
    }

    /// Drops the call and transfer logs. Fault-injection counters keep
    /// counting.
    pub fn reset_logs(&self) {
        let mut state = self.lock();
        state.device_calls.clear();
        state.meter_calls.clear();
        state.spi_writes.clear();
    }

    /// `true` if no driver of either kind has been called.
    pub fn untouched(&self) -> bool {
        let state = self.lock();
        state.device_calls.is_empty() && state.meter_calls.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// SPI / DIO half
// ------------------------------------------------------------------------------------------------

/// Simulated interface device. See [`SimulatedFixture`].
pub struct SimSpiDriver {
    fixture: SimulatedFixture,
}

impl SpiDioDriver for SimSpiDriver {
    fn find_device(&mut self) -> Result<(String, u32), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::FindDevice)?;
        if !s.device_present {
            return Err(StatusCode::InvalidResourceName);
        }
        Ok((RESOURCE_NAME.to_string(), 1))
    }

    fn open(&mut self, resource: &str) -> Result<DeviceHandle, StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::Open)?;
        if resource != RESOURCE_NAME || !s.device_present {
            return Err(StatusCode::InvalidResourceName);
        }
        if s.open_device.is_some() {
            return Err(StatusCode::ResourceBusy);
        }
        let handle = DeviceHandle(0xD0);
        s.open_device = Some(handle);
        Ok(handle)
    }

    fn close(&mut self, device: DeviceHandle) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::Close)?;
        s.require_device(device)?;
        s.open_device = None;
        s.configs.clear();
        Ok(())
    }

    fn set_io_voltage_level(
        &mut self,
        device: DeviceHandle,
        _level: IoVoltage,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetIoVoltageLevel)?;
        s.require_device(device)
    }

    fn set_driver_type(
        &mut self,
        device: DeviceHandle,
        _port: u8,
        _mode: DriveMode,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetDriverType)?;
        s.require_device(device)
    }

    fn configuration_open(&mut self) -> Result<ConfigHandle, StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::ConfigurationOpen)?;
        let id = s.next_config;
        s.next_config += 1;
        s.configs.insert(
            id,
            ConfigState {
                chip_select: 0,
                bits_per_sample: 8,
                next_half: 0,
            },
        );
        Ok(ConfigHandle(id))
    }

    fn configuration_close(&mut self, config: ConfigHandle) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::ConfigurationClose)?;
        s.configs
            .remove(&config.0)
            .map(|_| ())
            .ok_or(StatusCode::InvalidConfigurationReference)
    }

    fn configuration_set_chip_select(
        &mut self,
        config: ConfigHandle,
        chip_select: u32,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetChipSelect)?;
        if chip_select >= CHIP_SELECT_COUNT as u32 {
            return Err(StatusCode::InvalidChipSelect);
        }
        let cfg = s.config_mut(config)?;
        cfg.chip_select = chip_select;
        cfg.next_half = 0;
        Ok(())
    }

    fn configuration_set_port(
        &mut self,
        config: ConfigHandle,
        port: u8,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetPort)?;
        s.config_mut(config)?;
        if port != 0 {
            return Err(StatusCode::InvalidSpiPortNumber);
        }
        Ok(())
    }

    fn configuration_set_clock_rate(
        &mut self,
        config: ConfigHandle,
        khz: u16,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetClockRate)?;
        s.config_mut(config)?;
        if !(25..=50_000).contains(&khz) {
            return Err(StatusCode::InvalidClockRate);
        }
        Ok(())
    }

    fn configuration_set_clock_polarity(
        &mut self,
        config: ConfigHandle,
        _polarity: ClockPolarity,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetClockPolarity)?;
        s.config_mut(config).map(|_| ())
    }

    fn configuration_set_clock_phase(
        &mut self,
        config: ConfigHandle,
        _phase: ClockPhase,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetClockPhase)?;
        s.config_mut(config).map(|_| ())
    }

    fn configuration_set_bits_per_sample(
        &mut self,
        config: ConfigHandle,
        bits: u16,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SetBitsPerSample)?;
        if !(4..=64).contains(&bits) {
            return Err(StatusCode::InvalidBitsPerSample);
        }
        s.config_mut(config)?.bits_per_sample = bits;
        Ok(())
    }

    fn spi_write_read(
        &mut self,
        device: DeviceHandle,
        config: ConfigHandle,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<usize, StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::SpiWriteRead)?;
        s.require_device(device)?;

        let cfg = s.config_mut(config)?;
        if write.len() != HALF_BYTES || usize::from(cfg.bits_per_sample) != HALF_BYTES * 8 {
            return Err(StatusCode::InvalidDataBufferSize);
        }
        let cs = cfg.chip_select;
        let half = cfg.next_half;
        cfg.next_half = (cfg.next_half + 1) % 2;

        let word = &mut s.words[cs as usize];
        for (i, byte) in write.iter().enumerate() {
            word[half * HALF_BYTES + i] |= byte;
        }
        s.spi_writes.push((cs, write.to_vec()));

        let n = read.len().min(write.len());
        read[..n].fill(0);
        Ok(n)
    }

    fn dio_set_port_direction_map(
        &mut self,
        device: DeviceHandle,
        port: u8,
        map: u8,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::DioSetPortDirectionMap)?;
        s.require_device(device)?;
        if port != 0 {
            return Err(StatusCode::InvalidDioPortNumber);
        }
        s.dio_direction = map;
        Ok(())
    }

    fn dio_write_port(
        &mut self,
        device: DeviceHandle,
        port: u8,
        value: u8,
    ) -> Result<(), StatusCode> {
        let mut s = self.fixture.lock();
        s.enter(DeviceOp::DioWritePort)?;
        s.require_device(device)?;
        if port != 0 {
            return Err(StatusCode::InvalidDioPortNumber);
        }

        let line0_output = s.dio_direction & 1 == 1;
        let rising = s.dio_value & 1 == 0 && value & 1 == 1;
        s.dio_value = value;

        if line0_output && rising {
            for word in s.words.iter_mut() {
                word.fill(0);
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Meter half
// ------------------------------------------------------------------------------------------------

/// Simulated DMM. See [`SimulatedFixture`].
pub struct SimMeter {
    fixture: SimulatedFixture,
}

impl ResistanceMeter for SimMeter {
    fn reset(&mut self) -> Result<(), MeterFault> {
        let mut s = self.fixture.lock();
        s.meter_calls.push(MeterCall::Reset);
        s.meter_settings = None;
        Ok(())
    }

    fn configure_four_wire_resistance(
        &mut self,
        settings: &MeterSettings,
    ) -> Result<(), MeterFault> {
        let mut s = self.fixture.lock();
        s.meter_calls.push(MeterCall::Configure);
        s.meter_settings = Some(settings.clone());
        Ok(())
    }

    fn read(&mut self) -> Result<f64, MeterFault> {
        let mut s = self.fixture.lock();
        s.meter_calls.push(MeterCall::Read);
        s.reads += 1;
        let nth = s.reads;

        let fault = s
            .read_faults
            .iter()
            .find(|(at, _)| *at == nth)
            .map(|(_, fault)| fault.clone());

        let outcome = match fault {
            Some(fault) => Err(fault),
            None => Ok(match s.scripted.pop_front() {
                Some(value) => value,
                None => s.measure(),
            }),
        };

        if let Some(hook) = s.read_hook.as_mut() {
            hook(nth);
        }
        outcome
    }

    fn self_test(&mut self) -> MeterSelfTest {
        let mut s = self.fixture.lock();
        s.meter_calls.push(MeterCall::SelfTest);
        s.self_test.clone()
    }

    fn close(&mut self) {
        self.fixture.lock().meter_calls.push(MeterCall::Close);
    }
}
