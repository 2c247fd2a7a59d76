use std::{
    fs::File,
    os::unix::fs::FileExt,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use log::debug;

use crate::{
    datasource::{
        file_path::{MSR_PERF_STATUS, MSR_VOLTAGE_BITFIELD, RDMSR_BIN},
        source::{MetricKind, MetricSource, SourceError},
    },
    utils::{
        constants::VOLTAGE_SCALE,
        elevation::{ElevatedCommand, PrivilegedRunner},
    },
};

const RDMSR_DEADLINE: Duration = Duration::from_secs(5);

/// Register field 47:32 of IA32_PERF_STATUS is the core voltage in
/// 1/8192 V steps.
pub fn raw_to_volts(raw: u64) -> f64 {
    raw as f64 / VOLTAGE_SCALE
}

/// Extract bits 47:32 from the full 64-bit register value.
pub fn voltage_field(register: u64) -> u64 {
    (register >> 32) & 0xFFFF
}

/// Reads the core voltage register field. The MSR device node is used when
/// it can be opened, otherwise `rdmsr` runs through the elevation runner.
pub struct CoreVoltage {
    msr_device: PathBuf,
    runner: Arc<dyn PrivilegedRunner>,
}

impl CoreVoltage {
    pub fn new<P: Into<PathBuf>>(msr_device: P, runner: Arc<dyn PrivilegedRunner>) -> Self {
        Self {
            msr_device: msr_device.into(),
            runner,
        }
    }

    fn read_device(&self) -> Option<u64> {
        let file = File::open(&self.msr_device).ok()?;
        let mut buf = [0u8; 8];
        match file.read_exact_at(&mut buf, u64::from(MSR_PERF_STATUS)) {
            Ok(()) => Some(voltage_field(u64::from_le_bytes(buf))),
            Err(e) => {
                debug!("pread on {} failed: {e}", self.msr_device.display());
                None
            }
        }
    }

    fn read_tool(&self) -> Result<u64, SourceError> {
        let command = ElevatedCommand::new(RDMSR_BIN)
            .arg(format!("{MSR_PERF_STATUS:#x}"))
            .arg("-u")
            .arg("--bitfield")
            .arg(MSR_VOLTAGE_BITFIELD);

        let out = self
            .runner
            .run(&command, RDMSR_DEADLINE)
            .map_err(|e| SourceError::Unavailable(format!("{RDMSR_BIN}: {e}")))?;
        if !out.success() {
            return Err(SourceError::Unavailable(format!(
                "{RDMSR_BIN} exited with {:?}: {}",
                out.code,
                out.stderr.trim()
            )));
        }

        out.stdout.trim().parse::<u64>().map_err(|_| SourceError::Parse {
            path: RDMSR_BIN.to_string(),
            content: out.stdout.trim().to_string(),
        })
    }
}

impl MetricSource for CoreVoltage {
    fn kinds(&self) -> Vec<MetricKind> {
        vec![MetricKind::CoreVoltage]
    }

    fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
        let raw = match self.read_device() {
            Some(raw) => raw,
            None => self.read_tool()?,
        };
        Ok(vec![(MetricKind::CoreVoltage, raw_to_volts(raw))])
    }
}
