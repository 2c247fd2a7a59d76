use std::{fmt, path::Path};

use chrono::{DateTime, Local};
use thiserror::Error;

/// Physical quantity a sample belongs to. Ordering drives snapshot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    Wattage,
    CoreVoltage,
    CpuFrequency(usize),
    CpuTemperature(usize),
    GpuCoreClock,
    GpuMemoryClock,
    GpuTemperature,
}

impl MetricKind {
    pub fn unit(&self) -> Unit {
        match self {
            MetricKind::Wattage => Unit::Watts,
            MetricKind::CoreVoltage => Unit::Volts,
            MetricKind::CpuFrequency(_) | MetricKind::GpuCoreClock | MetricKind::GpuMemoryClock => {
                Unit::Megahertz
            }
            MetricKind::CpuTemperature(_) | MetricKind::GpuTemperature => Unit::Celsius,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Wattage => write!(f, "CPU package power"),
            MetricKind::CoreVoltage => write!(f, "CPU core voltage"),
            MetricKind::CpuFrequency(core) => write!(f, "CPU{core} frequency"),
            MetricKind::CpuTemperature(core) => write!(f, "Core {core} temperature"),
            MetricKind::GpuCoreClock => write!(f, "GPU core clock"),
            MetricKind::GpuMemoryClock => write!(f, "GPU memory clock"),
            MetricKind::GpuTemperature => write!(f, "GPU temperature"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Watts,
    Volts,
    Megahertz,
    Celsius,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Watts => "W",
            Unit::Volts => "V",
            Unit::Megahertz => "MHz",
            Unit::Celsius => "°C",
        }
    }

    /// Decimal places used when rendering values of this unit.
    pub fn precision(&self) -> usize {
        match self {
            Unit::Volts => 3,
            _ => 2,
        }
    }
}

/// Value of a metric for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Value(f64),
    Unavailable,
}

impl Reading {
    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub kind: MetricKind,
    pub value: Reading,
    pub unit: Unit,
    pub timestamp: DateTime<Local>,
}

impl MetricSample {
    pub fn new(kind: MetricKind, value: Reading, timestamp: DateTime<Local>) -> Self {
        Self {
            kind,
            value,
            unit: kind.unit(),
            timestamp,
        }
    }
}

impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Reading::Value(v) => write!(
                f,
                "{:.prec$} {}",
                v,
                self.unit.symbol(),
                prec = self.unit.precision()
            ),
            Reading::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// Why a source produced no value this cycle. Never leaves the sampler.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no prior reading to difference against")]
    Warmup,
    #[error("read permission for {path} could not be obtained: {reason}")]
    PermissionDenied { path: String, reason: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected content in {path}: {content:?}")]
    Parse { path: String, content: String },
    #[error("{0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn read(path: impl Into<String>, source: std::io::Error) -> Self {
        SourceError::Read {
            path: path.into(),
            source,
        }
    }
}

/// Read a node holding one integer and divide it into display units.
pub fn read_scaled_node(path: &Path, divisor: f64) -> Result<f64, SourceError> {
    let shown = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| SourceError::read(shown.clone(), e))?;
    let raw = content.trim().parse::<i64>().map_err(|_| SourceError::Parse {
        path: shown,
        content: content.trim().to_string(),
    })?;
    Ok(raw as f64 / divisor)
}

/// One physical quantity (or one inseparable group, like the GPU triple).
///
/// `kinds` is fixed at construction so the sampler can register statistics
/// up front. `sample` returns every kind or an error for the whole group.
pub trait MetricSource: Send {
    fn kinds(&self) -> Vec<MetricKind>;

    fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_order_cpu_before_gpu() {
        let mut kinds = vec![
            MetricKind::GpuTemperature,
            MetricKind::CpuTemperature(1),
            MetricKind::CpuFrequency(10),
            MetricKind::CpuFrequency(2),
            MetricKind::Wattage,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                MetricKind::Wattage,
                MetricKind::CpuFrequency(2),
                MetricKind::CpuFrequency(10),
                MetricKind::CpuTemperature(1),
                MetricKind::GpuTemperature,
            ]
        );
    }

    #[test]
    fn sample_display_uses_unit_precision() {
        let now = Local::now();
        let volts = MetricSample::new(MetricKind::CoreVoltage, Reading::Value(1.25), now);
        assert_eq!(volts.to_string(), "1.250 V");
        let gone = MetricSample::new(MetricKind::GpuCoreClock, Reading::Unavailable, now);
        assert_eq!(gone.to_string(), "Unavailable");
    }
}
