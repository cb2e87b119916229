//! In-memory stand-ins for the hardware, the clock and the shelf transport.
//! Each fake is a cheap handle onto shared state so a test can keep one copy
//! while the code under test owns another.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::error::HardwareError;
use crate::hardware::{FanController, FanReading, TemperatureSource};
use crate::shelf::{Connector, DutySink};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct ClockState {
    now: u64,
    sleeps: Vec<Duration>,
}

/// Manual clock; `sleep` advances it by whole seconds.
#[derive(Clone, Default)]
pub struct FakeClock {
    inner: Arc<Mutex<ClockState>>,
}

impl FakeClock {
    pub fn new(now: u64) -> Self {
        let clock = Self::default();
        clock.set(now);
        clock
    }

    pub fn set(&self, now: u64) {
        lock(&self.inner).now = now;
    }

    pub fn advance(&self, secs: u64) {
        lock(&self.inner).now += secs;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.inner).sleeps.clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        lock(&self.inner).now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = lock(&self.inner);
        state.sleeps.push(duration);
        state.now += duration.as_secs();
    }
}

#[derive(Default)]
struct ConnState {
    attempts: u32,
    refuse: bool,
    fail_remaining: u32,
    broken_writes: bool,
    written: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<Mutex<ConnState>>,
}

impl FakeConnector {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let c = Self::default();
        c.refuse_connections(true);
        c
    }

    pub fn failing_first(n: u32) -> Self {
        let c = Self::default();
        lock(&c.inner).fail_remaining = n;
        c
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.inner).refuse = refuse;
    }

    pub fn break_writes(&self, broken: bool) {
        lock(&self.inner).broken_writes = broken;
    }

    pub fn attempts(&self) -> u32 {
        lock(&self.inner).attempts
    }

    /// Everything written over every stream, as text.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&lock(&self.inner).written).into_owned()
    }
}

pub struct FakeStream {
    inner: Arc<Mutex<ConnState>>,
}

impl Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.inner);
        if state.broken_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connector for FakeConnector {
    type Stream = FakeStream;

    fn open(&mut self, address: &str, _port: u16) -> io::Result<(FakeStream, String)> {
        let mut state = lock(&self.inner);
        state.attempts += 1;
        if state.refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        }
        Ok((
            FakeStream {
                inner: Arc::clone(&self.inner),
            },
            address.to_string(),
        ))
    }
}

#[derive(Default)]
struct SensorState {
    cpu: Option<Vec<f32>>,
    disk_temps: HashMap<String, i32>,
    disk_queries: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeSensors {
    inner: Arc<Mutex<SensorState>>,
}

impl FakeSensors {
    /// `None` makes the CPU read fail.
    pub fn set_cpu_temps(&self, temps: Option<Vec<f32>>) {
        lock(&self.inner).cpu = temps;
    }

    pub fn set_disk_temp(&self, node: &str, temp: i32) {
        lock(&self.inner).disk_temps.insert(node.to_string(), temp);
    }

    pub fn remove_disk_temp(&self, node: &str) {
        lock(&self.inner).disk_temps.remove(node);
    }

    pub fn disk_queries(&self) -> Vec<String> {
        lock(&self.inner).disk_queries.clone()
    }
}

impl TemperatureSource for FakeSensors {
    fn read_cpu_temps(&mut self) -> Result<Vec<f32>, HardwareError> {
        lock(&self.inner).cpu.clone().ok_or_else(|| HardwareError::Parse {
            command: "sensors".to_string(),
            reason: "fake failure".to_string(),
        })
    }

    fn read_disk_temp(&mut self, device: &str) -> Option<i32> {
        let mut state = lock(&self.inner);
        state.disk_queries.push(device.to_string());
        state.disk_temps.get(device).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanCall {
    ModeFull,
    Duty(u8, u8),
    ColdReset,
}

struct FanState {
    calls: Vec<FanCall>,
    queries: u32,
    readings: VecDeque<FanReading>,
    default_reading: FanReading,
    fail_queries: bool,
    fail_duty: bool,
}

impl Default for FanState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            queries: 0,
            readings: VecDeque::new(),
            default_reading: FanReading::Rpm(1400),
            fail_queries: false,
            fail_duty: false,
        }
    }
}

/// Records every BMC command. Queries return queued readings, then the
/// default reading (a healthy 1400 RPM unless changed).
#[derive(Clone, Default)]
pub struct FakeFan {
    inner: Arc<Mutex<FanState>>,
}

impl FakeFan {
    pub fn push_reading(&self, reading: FanReading) {
        lock(&self.inner).readings.push_back(reading);
    }

    pub fn set_default_reading(&self, reading: FanReading) {
        lock(&self.inner).default_reading = reading;
    }

    pub fn fail_queries(&self, fail: bool) {
        lock(&self.inner).fail_queries = fail;
    }

    pub fn fail_duty(&self, fail: bool) {
        lock(&self.inner).fail_duty = fail;
    }

    pub fn calls(&self) -> Vec<FanCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn queries(&self) -> u32 {
        lock(&self.inner).queries
    }

    pub fn clear_calls(&self) {
        lock(&self.inner).calls.clear();
    }

    pub fn duties(&self) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                FanCall::Duty(_, duty) => Some(duty),
                _ => None,
            })
            .collect()
    }
}

fn fake_failure(command: &str) -> HardwareError {
    HardwareError::Parse {
        command: command.to_string(),
        reason: "fake failure".to_string(),
    }
}

impl FanController for FakeFan {
    fn set_fan_mode_full(&mut self) -> Result<(), HardwareError> {
        lock(&self.inner).calls.push(FanCall::ModeFull);
        Ok(())
    }

    fn set_duty(&mut self, zone: u8, percent: u8) -> Result<(), HardwareError> {
        let mut state = lock(&self.inner);
        state.calls.push(FanCall::Duty(zone, percent));
        if state.fail_duty {
            return Err(fake_failure("ipmitool raw"));
        }
        Ok(())
    }

    fn query_fan_speed(&mut self) -> Result<FanReading, HardwareError> {
        let mut state = lock(&self.inner);
        state.queries += 1;
        if state.fail_queries {
            return Err(fake_failure("ipmitool sdr"));
        }
        let reading = match state.readings.pop_front() {
            Some(reading) => reading,
            None => state.default_reading.clone(),
        };
        Ok(reading)
    }

    fn cold_reset(&mut self) -> Result<(), HardwareError> {
        lock(&self.inner).calls.push(FanCall::ColdReset);
        Ok(())
    }
}

/// Duty sink that remembers what it was sent.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<u8> {
        lock(&self.sent).clone()
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }
}

impl DutySink for RecordingSink {
    fn send_duty(&mut self, duty: u8) {
        lock(&self.sent).push(duty);
    }

    fn close(&mut self) {
        *lock(&self.closed) = true;
    }
}
