pub mod config_parser;
pub mod cpu_freq;
pub mod cpu_temp;
pub mod file_path;
pub mod gpu_clock;
pub mod host_info;
pub mod power;
pub mod source;
pub mod voltage;

use std::{path::Path, sync::Arc};

use log::info;

use crate::{
    datasource::{
        config_parser::SamplingConfig, cpu_freq::CpuFrequency, cpu_temp::CpuTemperature,
        gpu_clock::GpuClocksAndTemp, power::RaplWattage, source::MetricSource,
        voltage::CoreVoltage,
    },
    gpu::{GpuError, GpuManagement},
    utils::{elevation::PrivilegedRunner, file_operate::check_read, file_status::get_status},
};

fn check_node(path: &Path) {
    info!("Node {}: {}", path.display(), check_read(path));
}

/// Build every metric source for this host. Discovered nodes are opened
/// once so their readability shows up in the log and the status map.
pub fn build_sources(
    config: &SamplingConfig,
    runner: Arc<dyn PrivilegedRunner>,
    gpu: Result<Arc<dyn GpuManagement>, GpuError>,
) -> Vec<Box<dyn MetricSource>> {
    let mut sources: Vec<Box<dyn MetricSource>> = Vec::new();

    check_node(&config.rapl_energy_path);
    if !get_status(&config.rapl_energy_path.to_string_lossy()) {
        info!("Energy counter not readable yet, read access is requested on first sample");
    }
    sources.push(Box::new(RaplWattage::new(
        config.rapl_energy_path.clone(),
        config.rapl_range_path.clone(),
        runner.clone(),
    )));

    check_node(&config.msr_device);
    sources.push(Box::new(CoreVoltage::new(config.msr_device.clone(), runner)));

    let cores: Vec<CpuFrequency> = cpu_freq::discover(&config.cpu_root);
    info!("Found {} CPU frequency node(s)", cores.len());
    for core in cores {
        check_node(core.node());
        sources.push(Box::new(core));
    }

    let sensors: Vec<CpuTemperature> = cpu_temp::discover(&config.hwmon_root);
    info!("Found {} temperature input(s)", sensors.len());
    for sensor in sensors {
        check_node(sensor.node());
        sources.push(Box::new(sensor));
    }

    sources.push(Box::new(GpuClocksAndTemp::new(gpu, config.gpu_index)));
    sources
}
