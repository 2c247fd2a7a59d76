use std::path::Path;

use anyhow::{Context, Result};

/// Identity of the host processor as listed for the first CPU in cpuinfo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostCpu {
    pub model_name: Option<String>,
    pub family: Option<String>,
}

pub fn parse_cpuinfo(content: &str) -> HostCpu {
    let mut cpu = HostCpu::default();
    for line in content.lines() {
        // the first blank line ends the block of processor 0
        if line.trim().is_empty() && (cpu.model_name.is_some() || cpu.family.is_some()) {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "model name" if cpu.model_name.is_none() => cpu.model_name = Some(value),
            "cpu family" if cpu.family.is_none() => cpu.family = Some(value),
            _ => {}
        }
    }
    cpu
}

pub fn read_host_cpu<P: AsRef<Path>>(path: P) -> Result<HostCpu> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_cpuinfo(&content))
}
