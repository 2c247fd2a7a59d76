use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StatsError {
    #[error("no sample has been recorded")]
    NoData,
}

/// Cumulative aggregate of one metric over the monitoring session.
/// Nothing is retained besides these five fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStatistics {
    count: u64,
    current: f64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Default for RunningStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStatistics {
    pub fn new() -> Self {
        Self {
            count: 0,
            current: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    pub fn update(&mut self, sample: f64) {
        self.count += 1;
        self.current = sample;
        self.sum += sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn current(&self) -> Option<f64> {
        (self.count > 0).then_some(self.current)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn average(&self) -> Result<f64, StatsError> {
        if self.count == 0 {
            return Err(StatsError::NoData);
        }
        Ok(self.sum / self.count as f64)
    }
}
