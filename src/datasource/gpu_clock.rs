use std::sync::Arc;

use crate::{
    datasource::source::{MetricKind, MetricSource, SourceError},
    gpu::{GpuError, GpuManagement},
    utils::device_lock::with_device,
};

const KINDS: [MetricKind; 3] = [
    MetricKind::GpuCoreClock,
    MetricKind::GpuMemoryClock,
    MetricKind::GpuTemperature,
];

/// Core clock, memory clock and temperature of one GPU from a single query.
/// The three values succeed or fail together.
pub struct GpuClocksAndTemp {
    backend: Result<Arc<dyn GpuManagement>, GpuError>,
    index: u32,
}

impl GpuClocksAndTemp {
    /// `backend` may be the error from opening the management interface; the
    /// source then reports it every cycle instead of vanishing from snapshots.
    pub fn new(backend: Result<Arc<dyn GpuManagement>, GpuError>, index: u32) -> Self {
        Self { backend, index }
    }
}

impl MetricSource for GpuClocksAndTemp {
    fn kinds(&self) -> Vec<MetricKind> {
        KINDS.to_vec()
    }

    fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
        let gpu = self
            .backend
            .as_ref()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let index = self.index;
        let reading = with_device(index, || gpu.clocks_and_temp(index))
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        Ok(vec![
            (MetricKind::GpuCoreClock, f64::from(reading.core_clock_mhz)),
            (MetricKind::GpuMemoryClock, f64::from(reading.mem_clock_mhz)),
            (MetricKind::GpuTemperature, f64::from(reading.temperature_c)),
        ])
    }
}
