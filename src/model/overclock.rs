use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    gpu::{FanMode, GpuManagement, PowerConstraint},
    utils::constants::fan,
};

/// Overclock parameters as entered by the operator. Offsets default to 0,
/// an absent power limit means the board default, an absent fan mode
/// leaves the fans alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OverclockRequest {
    pub gpu_index: u32,
    pub core_offset_mhz: i32,
    pub mem_offset_mhz: i32,
    pub power_limit_mw: Option<u32>,
    pub fan_mode: Option<FanMode>,
}

impl OverclockRequest {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse request file: {}", path.display()))
    }
}

/// A request that passed validation, in the units the vendor interface
/// takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub gpu_index: u32,
    pub core_offset_mhz: i32,
    /// Twice the entered memory offset
    pub mem_offset: i32,
    pub power_limit_mw: u32,
    pub fan_mode: Option<FanMode>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("default power limit unavailable: {0}")]
    DefaultUnavailable(String),
    #[error("power limit constraints unavailable: {0}")]
    ConstraintsUnavailable(String),
    #[error("power limit {requested} mW outside [{min}, {max}] mW")]
    PowerOutOfRange { requested: u32, min: u32, max: u32 },
    #[error("fan speed {0}% is not one of 10, 20, ..., 100")]
    InvalidFanSpeed(u8),
    #[error("no GPU at index {index} ({count} present)")]
    UnknownDevice { index: u32, count: u32 },
    #[error("memory offset {0} MHz overflows when doubled")]
    OffsetOverflow(i32),
}

fn fan_speed_allowed(percent: u8) -> bool {
    (fan::MIN_PERCENT..=fan::MAX_PERCENT).contains(&percent) && percent % fan::STEP == 0
}

/// Checks requests against what the management interface reports.
pub struct Validator<'a> {
    gpu: &'a dyn GpuManagement,
}

impl<'a> Validator<'a> {
    pub fn new(gpu: &'a dyn GpuManagement) -> Self {
        Self { gpu }
    }

    pub fn validate(
        &self,
        request: &OverclockRequest,
        constraints: PowerConstraint,
    ) -> Result<NormalizedRequest, ValidationError> {
        let power_limit_mw = match request.power_limit_mw {
            Some(limit) => limit,
            None => {
                let limit = self
                    .gpu
                    .default_power_limit(request.gpu_index)
                    .map_err(|e| ValidationError::DefaultUnavailable(e.to_string()))?;
                debug!("GPU {}: using default power limit {limit} mW", request.gpu_index);
                limit
            }
        };

        if !constraints.contains(power_limit_mw) {
            return Err(ValidationError::PowerOutOfRange {
                requested: power_limit_mw,
                min: constraints.min_mw,
                max: constraints.max_mw,
            });
        }

        let mem_offset = request
            .mem_offset_mhz
            .checked_mul(2)
            .ok_or(ValidationError::OffsetOverflow(request.mem_offset_mhz))?;

        if let Some(FanMode::Manual(percent)) = request.fan_mode
            && !fan_speed_allowed(percent)
        {
            return Err(ValidationError::InvalidFanSpeed(percent));
        }

        Ok(NormalizedRequest {
            gpu_index: request.gpu_index,
            core_offset_mhz: request.core_offset_mhz,
            mem_offset,
            power_limit_mw,
            fan_mode: request.fan_mode,
        })
    }

    /// Check the device index, read the power constraints fresh and
    /// validate against them.
    pub fn validate_fresh(
        &self,
        request: &OverclockRequest,
    ) -> Result<NormalizedRequest, ValidationError> {
        let count = self
            .gpu
            .device_count()
            .map_err(|e| ValidationError::ConstraintsUnavailable(e.to_string()))?;
        if request.gpu_index >= count {
            return Err(ValidationError::UnknownDevice {
                index: request.gpu_index,
                count,
            });
        }

        let constraints = self
            .gpu
            .power_constraints(request.gpu_index)
            .map_err(|e| ValidationError::ConstraintsUnavailable(e.to_string()))?;
        debug!(
            "GPU {}: power limit range [{}, {}] mW",
            request.gpu_index, constraints.min_mw, constraints.max_mw
        );

        self.validate(request, constraints).inspect_err(|e| {
            warn!("Request for GPU {} rejected: {e}", request.gpu_index);
        })
    }
}
