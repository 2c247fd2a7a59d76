//! GPU management interface.
//!
//! The sampler only reads clocks and temperature through it; the elevated
//! helper drives the mutators. Backends are selected at build time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "nvml")]
pub mod nvml;

#[cfg(test)]
pub mod mock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("GPU management interface unavailable: {0}")]
    Unavailable(String),
    #[error("no GPU at index {0}")]
    NoDevice(u32),
    #[error("{op} failed: {message}")]
    Backend { op: &'static str, message: String },
}

/// Power limits the board accepts, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerConstraint {
    pub min_mw: u32,
    pub max_mw: u32,
}

impl PowerConstraint {
    pub fn contains(&self, limit_mw: u32) -> bool {
        (self.min_mw..=self.max_mw).contains(&limit_mw)
    }
}

/// Clock and temperature triple returned by one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuReading {
    pub core_clock_mhz: u32,
    pub mem_clock_mhz: u32,
    pub temperature_c: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "percent")]
pub enum FanMode {
    /// Hand fan control back to the driver
    Default,
    Manual(u8),
}

pub trait GpuManagement: Send + Sync {
    fn device_count(&self) -> Result<u32, GpuError>;

    fn device_name(&self, index: u32) -> Result<String, GpuError>;

    /// PCI bus id in `domain:bus:device.function` form
    fn device_bus_id(&self, index: u32) -> Result<String, GpuError>;

    /// All three values or an error, never a partial reading.
    fn clocks_and_temp(&self, index: u32) -> Result<GpuReading, GpuError>;

    fn power_constraints(&self, index: u32) -> Result<PowerConstraint, GpuError>;

    fn default_power_limit(&self, index: u32) -> Result<u32, GpuError>;

    fn set_core_offset(&self, index: u32, offset_mhz: i32) -> Result<(), GpuError>;

    /// `offset` is already in the vendor's doubled memory-clock units.
    fn set_mem_offset(&self, index: u32, offset: i32) -> Result<(), GpuError>;

    fn set_power_limit(&self, index: u32, limit_mw: u32) -> Result<(), GpuError>;

    fn set_fan(&self, index: u32, mode: FanMode) -> Result<(), GpuError>;
}

/// Open the backend this binary was built with.
pub fn open_backend() -> Result<Box<dyn GpuManagement>, GpuError> {
    #[cfg(feature = "nvml")]
    {
        Ok(Box::new(nvml::NvmlGpu::init()?))
    }

    #[cfg(not(feature = "nvml"))]
    {
        Err(GpuError::Unavailable("built without the nvml feature".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_bounds_are_inclusive() {
        let c = PowerConstraint {
            min_mw: 100_000,
            max_mw: 250_000,
        };
        assert!(c.contains(100_000));
        assert!(c.contains(250_000));
        assert!(!c.contains(99_999));
        assert!(!c.contains(300_000));
    }
}
