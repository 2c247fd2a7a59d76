use std::path::{Path, PathBuf};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    datasource::source::{MetricKind, MetricSource, SourceError, read_scaled_node},
    utils::constants::units::MILLIDEGREE_PER_DEGREE,
};

static HWMON_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^hwmon(\d+)$").unwrap());
static TEMP_INPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^temp(\d+)_input$").unwrap());

/// One hardware-monitor temperature input, labelled by its position in the
/// sorted input list.
pub struct CpuTemperature {
    slot: usize,
    node: PathBuf,
}

impl CpuTemperature {
    pub fn new(slot: usize, node: PathBuf) -> Self {
        Self { slot, node }
    }

    pub fn node(&self) -> &Path {
        &self.node
    }
}

impl MetricSource for CpuTemperature {
    fn kinds(&self) -> Vec<MetricKind> {
        vec![MetricKind::CpuTemperature(self.slot)]
    }

    fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
        let celsius = read_scaled_node(&self.node, MILLIDEGREE_PER_DEGREE)?;
        Ok(vec![(MetricKind::CpuTemperature(self.slot), celsius)])
    }
}

fn numbered(re: &Regex, name: &str) -> Option<u32> {
    re.captures(name)?[1].parse().ok()
}

/// Every `hwmonN/tempM_input` under `hwmon_root`, sorted ascending by the
/// input number M (ties broken by N), so labels stay put between cycles.
pub fn discover(hwmon_root: &Path) -> Vec<CpuTemperature> {
    let chips = match std::fs::read_dir(hwmon_root) {
        Ok(chips) => chips,
        Err(e) => {
            debug!("Cannot list {}: {e}", hwmon_root.display());
            return Vec::new();
        }
    };

    let mut inputs: Vec<(u32, u32, PathBuf)> = Vec::new();
    for chip in chips.filter_map(|c| c.ok()) {
        let Some(chip_no) = chip.file_name().to_str().and_then(|n| numbered(&HWMON_DIR, n)) else {
            continue;
        };
        let Ok(files) = std::fs::read_dir(chip.path()) else {
            continue;
        };
        for file in files.filter_map(|f| f.ok()) {
            let name = file.file_name();
            if let Some(input_no) = name.to_str().and_then(|n| numbered(&TEMP_INPUT, n)) {
                inputs.push((input_no, chip_no, file.path()));
            }
        }
    }

    inputs.sort_by_key(|(input_no, chip_no, _)| (*input_no, *chip_no));
    inputs
        .into_iter()
        .enumerate()
        .map(|(slot, (_, _, node))| CpuTemperature::new(slot, node))
        .collect()
}
