//! Recording GPU backend for tests

use std::sync::{Arc, Mutex};

use super::{FanMode, GpuError, GpuManagement, GpuReading, PowerConstraint};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CoreOffset(u32, i32),
    MemOffset(u32, i32),
    PowerLimit(u32, u32),
    Fan(u32, FanMode),
}

pub struct MockGpu {
    pub count: u32,
    pub reading: Mutex<Option<GpuReading>>,
    pub constraint: Option<PowerConstraint>,
    pub default_limit: Option<u32>,
    /// Mutator that fails, by call name
    pub fail_on: Option<&'static str>,
    /// Shared so a test can keep a handle after the mock is boxed away
    pub calls: Arc<Mutex<Vec<Call>>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            count: 1,
            reading: Mutex::new(Some(GpuReading {
                core_clock_mhz: 1905,
                mem_clock_mhz: 9501,
                temperature_c: 61,
            })),
            constraint: Some(PowerConstraint {
                min_mw: 100_000,
                max_mw: 250_000,
            }),
            default_limit: Some(220_000),
            fail_on: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn check(&self, index: u32) -> Result<(), GpuError> {
        if index < self.count {
            Ok(())
        } else {
            Err(GpuError::NoDevice(index))
        }
    }

    fn record(&self, op: &'static str, call: Call) -> Result<(), GpuError> {
        if self.fail_on == Some(op) {
            return Err(GpuError::Backend {
                op,
                message: "Insufficient Permissions".to_string(),
            });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl GpuManagement for MockGpu {
    fn device_count(&self) -> Result<u32, GpuError> {
        Ok(self.count)
    }

    fn device_name(&self, index: u32) -> Result<String, GpuError> {
        self.check(index)?;
        Ok(format!("Mock GPU {index}"))
    }

    fn device_bus_id(&self, index: u32) -> Result<String, GpuError> {
        self.check(index)?;
        if self.fail_on == Some("bus_id") {
            return Err(GpuError::Backend {
                op: "bus_id",
                message: "Not Supported".to_string(),
            });
        }
        Ok(format!("00000000:{:02X}:00.0", index + 1))
    }

    fn clocks_and_temp(&self, index: u32) -> Result<GpuReading, GpuError> {
        self.check(index)?;
        self.reading
            .lock()
            .unwrap()
            .ok_or_else(|| GpuError::Unavailable("empty response".to_string()))
    }

    fn power_constraints(&self, index: u32) -> Result<PowerConstraint, GpuError> {
        self.check(index)?;
        self.constraint
            .ok_or_else(|| GpuError::Unavailable("no constraints".to_string()))
    }

    fn default_power_limit(&self, index: u32) -> Result<u32, GpuError> {
        self.check(index)?;
        self.default_limit
            .ok_or_else(|| GpuError::Unavailable("no default limit".to_string()))
    }

    fn set_core_offset(&self, index: u32, offset_mhz: i32) -> Result<(), GpuError> {
        self.check(index)?;
        self.record("core", Call::CoreOffset(index, offset_mhz))
    }

    fn set_mem_offset(&self, index: u32, offset: i32) -> Result<(), GpuError> {
        self.check(index)?;
        self.record("mem", Call::MemOffset(index, offset))
    }

    fn set_power_limit(&self, index: u32, limit_mw: u32) -> Result<(), GpuError> {
        self.check(index)?;
        self.record("power", Call::PowerLimit(index, limit_mw))
    }

    fn set_fan(&self, index: u32, mode: FanMode) -> Result<(), GpuError> {
        self.check(index)?;
        self.record("fan", Call::Fan(index, mode))
    }
}
