//! Privileged apply path.
//!
//! A validated request becomes one [`CommandSequence`], serialized as TOML
//! and piped to this binary's `helper` sub-command running elevated. The
//! helper walks the steps with [`execute`] and stops at the first failure,
//! so the caller sees exactly one outcome per request.

use std::{path::PathBuf, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    datasource::file_path::HELPER_SUBCOMMAND,
    gpu::{FanMode, GpuError, GpuManagement},
    model::overclock::{NormalizedRequest, OverclockRequest, ValidationError, Validator},
    utils::{
        device_lock::with_device,
        elevation::{ElevatedCommand, PrivilegedRunner},
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Init,
    SelectDevice { index: u32 },
    SetCoreOffset { mhz: i32 },
    SetMemOffset { offset: i32 },
    SetPowerLimit { mw: u32 },
    SetFan { fan: FanMode },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSequence {
    pub steps: Vec<Step>,
}

impl CommandSequence {
    pub fn from_request(request: &NormalizedRequest) -> Self {
        let mut steps = vec![
            Step::Init,
            Step::SelectDevice {
                index: request.gpu_index,
            },
            Step::SetCoreOffset {
                mhz: request.core_offset_mhz,
            },
            Step::SetMemOffset {
                offset: request.mem_offset,
            },
            Step::SetPowerLimit {
                mw: request.power_limit_mw,
            },
        ];
        if let Some(fan) = request.fan_mode {
            steps.push(Step::SetFan { fan });
        }
        steps.push(Step::Shutdown);
        Self { steps }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    pub fn from_toml(payload: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    RejectedByValidation(ValidationError),
    /// Diagnostic text of the elevated process, unmodified
    PrivilegedExecutionFailed(String),
}

/// Runs command sequences through the elevation boundary.
pub struct PrivilegedApplier {
    runner: Arc<dyn PrivilegedRunner>,
    helper: PathBuf,
    timeout: Duration,
}

impl PrivilegedApplier {
    pub fn new(runner: Arc<dyn PrivilegedRunner>, helper: PathBuf, timeout: Duration) -> Self {
        Self {
            runner,
            helper,
            timeout,
        }
    }

    pub fn apply(&self, request: &NormalizedRequest) -> ApplyOutcome {
        let sequence = CommandSequence::from_request(request);
        let payload = match sequence.to_toml() {
            Ok(payload) => payload,
            Err(e) => {
                return ApplyOutcome::PrivilegedExecutionFailed(format!(
                    "failed to serialize command sequence: {e}"
                ));
            }
        };
        debug!("Command sequence for GPU {}:\n{payload}", request.gpu_index);

        let command = ElevatedCommand::new(self.helper.to_string_lossy())
            .arg(HELPER_SUBCOMMAND)
            .stdin(payload);
        let result = with_device(request.gpu_index, || self.runner.run(&command, self.timeout));

        match result {
            Ok(out) if out.success() => {
                info!("Overclock applied to GPU {}", request.gpu_index);
                ApplyOutcome::Applied
            }
            Ok(out) => {
                error!("Elevated helper exited with {:?}: {}", out.code, out.stderr.trim());
                ApplyOutcome::PrivilegedExecutionFailed(out.stderr)
            }
            Err(e) => {
                error!("Elevated helper failed: {e}");
                ApplyOutcome::PrivilegedExecutionFailed(e.to_string())
            }
        }
    }

    /// Validate against freshly read constraints, then apply. A rejected
    /// request never reaches the elevation boundary.
    pub fn submit(&self, validator: &Validator<'_>, request: &OverclockRequest) -> ApplyOutcome {
        match validator.validate_fresh(request) {
            Ok(normalized) => self.apply(&normalized),
            Err(e) => ApplyOutcome::RejectedByValidation(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("malformed command sequence: {0}")]
    Malformed(#[from] toml::de::Error),
    #[error("{0:?} issued before init")]
    NotInitialized(Step),
    #[error("{0:?} issued before a device was selected")]
    NoDeviceSelected(Step),
    #[error("no GPU at index {index} ({count} present)")]
    UnknownDevice { index: u32, count: u32 },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Walk `sequence` against the backend produced by `open`. The first
/// failing step ends the run; dropping the backend shuts it down.
pub fn execute<F>(sequence: &CommandSequence, open: F) -> Result<(), HelperError>
where
    F: FnOnce() -> Result<Box<dyn GpuManagement>, GpuError>,
{
    let mut open = Some(open);
    let mut backend: Option<Box<dyn GpuManagement>> = None;
    let mut device: Option<u32> = None;

    for step in &sequence.steps {
        debug!("helper step: {step:?}");
        match step {
            Step::Init => {
                if let Some(open) = open.take() {
                    backend = Some(open()?);
                }
                continue;
            }
            Step::Shutdown => {
                backend = None;
                device = None;
                continue;
            }
            _ => {}
        }

        let gpu = backend
            .as_deref()
            .ok_or_else(|| HelperError::NotInitialized(step.clone()))?;

        if let Step::SelectDevice { index } = step {
            let count = gpu.device_count()?;
            if *index >= count {
                return Err(HelperError::UnknownDevice {
                    index: *index,
                    count,
                });
            }
            device = Some(*index);
            continue;
        }

        let index = device.ok_or_else(|| HelperError::NoDeviceSelected(step.clone()))?;
        match step {
            Step::SetCoreOffset { mhz } => gpu.set_core_offset(index, *mhz)?,
            Step::SetMemOffset { offset } => gpu.set_mem_offset(index, *offset)?,
            Step::SetPowerLimit { mw } => gpu.set_power_limit(index, *mw)?,
            Step::SetFan { fan } => gpu.set_fan(index, *fan)?,
            Step::Init | Step::Shutdown | Step::SelectDevice { .. } => {}
        }
    }

    if backend.is_some() {
        warn!("Command sequence ended without shutdown");
    }
    Ok(())
}
