use std::{
    collections::BTreeMap,
    fmt::Display,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use chrono::Local;
use log::{debug, error, info};
use thiserror::Error;

use crate::{
    datasource::source::{MetricKind, MetricSample, MetricSource, Reading, SourceError},
    model::{
        snapshot::{Snapshot, SnapshotEntry},
        statistics::RunningStatistics,
    },
};

// Upper bound on how long a shutdown request waits for the inter-cycle sleep
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SamplerError {
    #[error("privilege acquisition failed: {0}")]
    PermissionDenied(String),
    #[error("sampler is not sampling")]
    NotSampling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Sampling,
}

struct Registered {
    source: Box<dyn MetricSource>,
    kinds: Vec<MetricKind>,
}

/// Polls every registered source once per cycle and folds the values into
/// per-metric running statistics.
pub struct TelemetrySampler {
    state: SamplerState,
    refused: Option<String>,
    interval: Duration,
    sources: Vec<Registered>,
    stats: BTreeMap<MetricKind, RunningStatistics>,
}

impl TelemetrySampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: SamplerState::Idle,
            refused: None,
            interval,
            sources: Vec::new(),
            stats: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn register(&mut self, source: Box<dyn MetricSource>) {
        let kinds = source.kinds();
        for kind in &kinds {
            self.stats.entry(*kind).or_default();
        }
        debug!("Registered source for {:?}", kinds);
        self.sources.push(Registered { source, kinds });
    }

    /// Leave `Idle` by running `acquire` once. A failure is final: later
    /// calls report the same refusal without trying again.
    pub fn start<T, E: Display>(
        &mut self,
        acquire: impl FnOnce() -> Result<T, E>,
    ) -> Result<Option<T>, SamplerError> {
        if let Some(reason) = &self.refused {
            return Err(SamplerError::PermissionDenied(reason.clone()));
        }
        if self.state == SamplerState::Sampling {
            return Ok(None);
        }

        match acquire() {
            Ok(credential) => {
                self.state = SamplerState::Sampling;
                info!("Privileged context established, sampling every {:?}", self.interval);
                Ok(Some(credential))
            }
            Err(e) => {
                let reason = e.to_string();
                error!("Privilege acquisition failed, sampler stays idle: {reason}");
                self.refused = Some(reason.clone());
                Err(SamplerError::PermissionDenied(reason))
            }
        }
    }

    /// Run one cycle and return its snapshot.
    pub fn poll_cycle(&mut self) -> Result<Snapshot, SamplerError> {
        if self.state != SamplerState::Sampling {
            return Err(SamplerError::NotSampling);
        }

        let mut readings: BTreeMap<MetricKind, Reading> = BTreeMap::new();
        for registered in &mut self.sources {
            let values = match registered.source.sample() {
                Ok(values) => values,
                Err(SourceError::Warmup) => {
                    debug!("{:?} warming up", registered.kinds);
                    Vec::new()
                }
                Err(e) => {
                    debug!("{:?} unavailable: {e}", registered.kinds);
                    Vec::new()
                }
            };

            for kind in &registered.kinds {
                readings.insert(*kind, Reading::Unavailable);
            }
            for (kind, value) in values {
                if !registered.kinds.contains(&kind) {
                    debug!("Ignoring unregistered {kind:?} from source");
                    continue;
                }
                if !value.is_finite() {
                    debug!("{kind} returned non-finite {value}");
                    continue;
                }
                readings.insert(kind, Reading::Value(value));
            }
        }

        let taken_at = Local::now();
        let mut entries = BTreeMap::new();
        for (kind, reading) in readings {
            let stats = self.stats.entry(kind).or_default();
            if let Reading::Value(v) = reading {
                stats.update(v);
            }
            entries.insert(
                kind,
                SnapshotEntry {
                    stats: *stats,
                    sample: MetricSample::new(kind, reading, taken_at),
                },
            );
        }

        Ok(Snapshot::new(taken_at, entries))
    }

    /// Cycle at the configured interval until `shutdown` is raised. A cycle
    /// that overruns the interval is followed immediately by the next one.
    pub fn run(
        &mut self,
        shutdown: &AtomicBool,
        mut publish: impl FnMut(Snapshot),
    ) -> Result<(), SamplerError> {
        if self.state != SamplerState::Sampling {
            return Err(SamplerError::NotSampling);
        }

        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let snapshot = self.poll_cycle()?;
            publish(snapshot);

            while let Some(left) = self.interval.checked_sub(started.elapsed()) {
                if left.is_zero() || shutdown.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(left.min(SHUTDOWN_POLL));
            }
        }

        info!("Sampler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Fixed(MetricKind, f64);

    impl MetricSource for Fixed {
        fn kinds(&self) -> Vec<MetricKind> {
            vec![self.0]
        }

        fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
            Ok(vec![(self.0, self.1)])
        }
    }

    struct Broken(Vec<MetricKind>);

    impl MetricSource for Broken {
        fn kinds(&self) -> Vec<MetricKind> {
            self.0.clone()
        }

        fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
            Err(SourceError::Unavailable("simulated".to_string()))
        }
    }

    struct Ramp {
        kind: MetricKind,
        next: f64,
    }

    impl MetricSource for Ramp {
        fn kinds(&self) -> Vec<MetricKind> {
            vec![self.kind]
        }

        fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
            let v = self.next;
            self.next += 1.0;
            Ok(vec![(self.kind, v)])
        }
    }

    fn sampling(interval: Duration) -> TelemetrySampler {
        let mut sampler = TelemetrySampler::new(interval);
        sampler.start(|| Ok::<_, String>(())).unwrap();
        sampler
    }

    #[test]
    fn failing_source_does_not_affect_others() {
        let mut sampler = sampling(Duration::from_millis(1));
        sampler.register(Box::new(Fixed(MetricKind::CoreVoltage, 1.25)));
        sampler.register(Box::new(Broken(vec![
            MetricKind::GpuCoreClock,
            MetricKind::GpuMemoryClock,
            MetricKind::GpuTemperature,
        ])));
        sampler.register(Box::new(Fixed(MetricKind::CpuFrequency(0), 3400.0)));

        let snapshot = sampler.poll_cycle().unwrap();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.available(), 2);
        let value = |kind: MetricKind| snapshot.get(&kind).map(|e| e.sample.value);
        assert_eq!(value(MetricKind::CoreVoltage), Some(Reading::Value(1.25)));
        assert_eq!(value(MetricKind::CpuFrequency(0)), Some(Reading::Value(3400.0)));
        for kind in [
            MetricKind::GpuCoreClock,
            MetricKind::GpuMemoryClock,
            MetricKind::GpuTemperature,
        ] {
            let entry = snapshot.get(&kind).unwrap();
            assert_eq!(entry.sample.value, Reading::Unavailable);
            assert_eq!(entry.stats.count(), 0);
        }
    }

    #[test]
    fn statistics_accumulate_across_cycles() {
        let mut sampler = sampling(Duration::from_millis(1));
        sampler.register(Box::new(Ramp {
            kind: MetricKind::Wattage,
            next: 10.0,
        }));

        let mut last = None;
        for _ in 0..4 {
            last = Some(sampler.poll_cycle().unwrap());
        }
        let entry = last.unwrap().get(&MetricKind::Wattage).cloned().unwrap();
        assert_eq!(entry.stats.count(), 4);
        assert_eq!(entry.stats.min(), Some(10.0));
        assert_eq!(entry.stats.max(), Some(13.0));
        assert_eq!(entry.stats.average(), Ok(11.5));
        assert_eq!(entry.sample.value, Reading::Value(13.0));
    }

    #[test]
    fn earlier_snapshots_stay_unchanged() {
        let mut sampler = sampling(Duration::from_millis(1));
        sampler.register(Box::new(Ramp {
            kind: MetricKind::Wattage,
            next: 1.0,
        }));
        let first = sampler.poll_cycle().unwrap();
        let _ = sampler.poll_cycle().unwrap();
        let entry = first.get(&MetricKind::Wattage).unwrap();
        assert_eq!(entry.sample.value, Reading::Value(1.0));
        assert_eq!(entry.stats.count(), 1);
    }

    #[test]
    fn non_finite_values_are_unavailable() {
        let mut sampler = sampling(Duration::from_millis(1));
        sampler.register(Box::new(Fixed(MetricKind::CpuTemperature(0), f64::NAN)));
        sampler.register(Box::new(Fixed(MetricKind::CpuTemperature(1), f64::INFINITY)));
        let snapshot = sampler.poll_cycle().unwrap();
        assert_eq!(snapshot.available(), 0);
        assert_eq!(snapshot.get(&MetricKind::CpuTemperature(0)).unwrap().stats.count(), 0);
    }

    #[test]
    fn refused_acquisition_is_permanent() {
        let mut sampler = TelemetrySampler::new(Duration::from_millis(1));
        let attempts = Cell::new(0);

        let first = sampler.start(|| {
            attempts.set(attempts.get() + 1);
            Err::<(), _>("sudo: 3 incorrect password attempts")
        });
        assert_eq!(
            first,
            Err(SamplerError::PermissionDenied(
                "sudo: 3 incorrect password attempts".to_string()
            ))
        );

        let second = sampler.start(|| {
            attempts.set(attempts.get() + 1);
            Ok::<_, String>(())
        });
        assert!(matches!(second, Err(SamplerError::PermissionDenied(_))));
        assert_eq!(attempts.get(), 1);
        assert_eq!(sampler.state(), SamplerState::Idle);
        assert_eq!(sampler.poll_cycle().unwrap_err(), SamplerError::NotSampling);
    }

    #[test]
    fn start_hands_back_the_credential_once() {
        let mut sampler = TelemetrySampler::new(Duration::from_millis(1));
        assert_eq!(sampler.start(|| Ok::<_, String>("token")), Ok(Some("token")));
        assert_eq!(sampler.state(), SamplerState::Sampling);
        assert_eq!(sampler.start(|| Ok::<_, String>("again")), Ok(None));
    }

    #[test]
    fn run_publishes_until_shutdown() {
        let mut sampler = sampling(Duration::from_millis(5));
        sampler.register(Box::new(Fixed(MetricKind::Wattage, 42.0)));
        let shutdown = AtomicBool::new(false);
        let mut published = Vec::new();

        sampler
            .run(&shutdown, |snapshot| {
                published.push(snapshot);
                if published.len() == 3 {
                    shutdown.store(true, Ordering::SeqCst);
                }
            })
            .unwrap();

        assert_eq!(published.len(), 3);
        assert_eq!(published[2].get(&MetricKind::Wattage).unwrap().stats.count(), 3);
        assert!(published[0].taken_at() <= published[2].taken_at());
    }

    #[test]
    fn run_requires_sampling_state() {
        let mut sampler = TelemetrySampler::new(Duration::from_millis(1));
        let shutdown = AtomicBool::new(false);
        assert_eq!(sampler.run(&shutdown, |_| {}), Err(SamplerError::NotSampling));
    }
}
