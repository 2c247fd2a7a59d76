use std::path::{Path, PathBuf};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    datasource::{
        file_path::CPUFREQ_CUR_NODE,
        source::{MetricKind, MetricSource, SourceError, read_scaled_node},
    },
    utils::constants::units::KHZ_PER_MHZ,
};

static CPU_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^cpu(\d+)$").unwrap());

/// Current scaling frequency of one logical core.
pub struct CpuFrequency {
    core: usize,
    node: PathBuf,
}

impl CpuFrequency {
    pub fn new(core: usize, node: PathBuf) -> Self {
        Self { core, node }
    }

    pub fn node(&self) -> &Path {
        &self.node
    }
}

impl MetricSource for CpuFrequency {
    fn kinds(&self) -> Vec<MetricKind> {
        vec![MetricKind::CpuFrequency(self.core)]
    }

    fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
        let mhz = read_scaled_node(&self.node, KHZ_PER_MHZ)?;
        Ok(vec![(MetricKind::CpuFrequency(self.core), mhz)])
    }
}

/// One source per `cpuN/cpufreq/scaling_cur_freq` under `cpu_root`,
/// ordered by core number.
pub fn discover(cpu_root: &Path) -> Vec<CpuFrequency> {
    let entries = match std::fs::read_dir(cpu_root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {e}", cpu_root.display());
            return Vec::new();
        }
    };

    let mut cores: Vec<(usize, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = CPU_DIR.captures(name.to_str()?)?;
            let core = caps[1].parse::<usize>().ok()?;
            let node = entry.path().join(CPUFREQ_CUR_NODE);
            node.is_file().then_some((core, node))
        })
        .collect();

    cores.sort_by_key(|(core, _)| *core);
    cores
        .into_iter()
        .map(|(core, node)| CpuFrequency::new(core, node))
        .collect()
}
