use std::{
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    datasource::{
        file_path::CHMOD_BIN,
        source::{MetricKind, MetricSource, SourceError},
    },
    utils::{
        constants::units::MICROJOULE_PER_JOULE,
        elevation::{ElevatedCommand, PrivilegedRunner},
        file_operate::read_u64,
    },
};

const PERMISSION_DEADLINE: Duration = Duration::from_secs(10);

/// One energy counter read, `at` measured from an arbitrary fixed origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyReading {
    pub energy_uj: u64,
    pub at: Duration,
}

/// Average power between two counter reads: `(E₂−E₁)/1e6 / (t₂−t₁)`.
///
/// A counter that went backwards wrapped; it is unwrapped with the zone's
/// `max_energy_range_uj` when known, otherwise there is no answer.
pub fn wattage(prev: EnergyReading, cur: EnergyReading, range_uj: Option<u64>) -> Option<f64> {
    let elapsed = cur.at.checked_sub(prev.at)?.as_secs_f64();
    if elapsed <= 0.0 {
        return None;
    }

    let delta_uj = if cur.energy_uj >= prev.energy_uj {
        cur.energy_uj - prev.energy_uj
    } else {
        let range = range_uj?;
        range.checked_sub(prev.energy_uj)? + cur.energy_uj
    };

    Some(delta_uj as f64 / MICROJOULE_PER_JOULE / elapsed)
}

#[derive(Debug, Clone, PartialEq)]
enum Permission {
    NotRequested,
    Granted,
    Denied(String),
}

/// Package power from the RAPL energy counter of zone 0.
pub struct RaplWattage {
    energy_path: PathBuf,
    range_path: PathBuf,
    runner: Arc<dyn PrivilegedRunner>,
    permission: Permission,
    origin: Instant,
    last: Option<EnergyReading>,
}

impl RaplWattage {
    pub fn new<P: Into<PathBuf>>(
        energy_path: P,
        range_path: P,
        runner: Arc<dyn PrivilegedRunner>,
    ) -> Self {
        Self {
            energy_path: energy_path.into(),
            range_path: range_path.into(),
            runner,
            permission: Permission::NotRequested,
            origin: Instant::now(),
            last: None,
        }
    }

    fn path_str(&self) -> String {
        self.energy_path.display().to_string()
    }

    /// The counter is root-only on most kernels. Ask for world read access
    /// once; a refusal sticks for the rest of the session.
    fn ensure_permission(&mut self) -> Result<(), SourceError> {
        match &self.permission {
            Permission::Granted => return Ok(()),
            Permission::Denied(reason) => {
                return Err(SourceError::PermissionDenied {
                    path: self.path_str(),
                    reason: reason.clone(),
                });
            }
            Permission::NotRequested => {}
        }

        if !needs_permission(&self.energy_path) {
            debug!("{} needs no permission change", self.energy_path.display());
            self.permission = Permission::Granted;
            return Ok(());
        }

        let command = ElevatedCommand::new(CHMOD_BIN)
            .arg("o+r")
            .arg(self.path_str());
        let outcome = self.runner.run(&command, PERMISSION_DEADLINE);

        self.permission = match outcome {
            Ok(out) if out.success() => {
                info!("Read access granted on {}", self.energy_path.display());
                Permission::Granted
            }
            Ok(out) => Permission::Denied(out.stderr.trim().to_string()),
            Err(e) => Permission::Denied(e.to_string()),
        };

        match &self.permission {
            Permission::Denied(reason) => {
                warn!("Cannot open {} for reading: {}", self.energy_path.display(), reason);
                Err(SourceError::PermissionDenied {
                    path: self.path_str(),
                    reason: reason.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn read_counter(&self) -> Result<u64, SourceError> {
        let content = std::fs::read_to_string(&self.energy_path)
            .map_err(|e| SourceError::read(self.path_str(), e))?;
        content.trim().parse::<u64>().map_err(|_| SourceError::Parse {
            path: self.path_str(),
            content: content.trim().to_string(),
        })
    }
}

fn needs_permission(path: &Path) -> bool {
    matches!(File::open(path), Err(e) if e.kind() == ErrorKind::PermissionDenied)
}

impl MetricSource for RaplWattage {
    fn kinds(&self) -> Vec<MetricKind> {
        vec![MetricKind::Wattage]
    }

    fn sample(&mut self) -> Result<Vec<(MetricKind, f64)>, SourceError> {
        self.ensure_permission()?;

        let cur = EnergyReading {
            energy_uj: self.read_counter()?,
            at: self.origin.elapsed(),
        };
        let prev = self.last.replace(cur);

        let Some(prev) = prev else {
            return Err(SourceError::Warmup);
        };

        let range = if cur.energy_uj < prev.energy_uj {
            read_u64(&self.range_path).ok()
        } else {
            None
        };

        wattage(prev, cur, range)
            .map(|watts| vec![(MetricKind::Wattage, watts)])
            .ok_or_else(|| {
                SourceError::Unavailable("energy counter wrapped or stalled".to_string())
            })
    }
}
