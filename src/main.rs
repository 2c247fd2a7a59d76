mod datasource;
mod gpu;
mod model;
mod utils;

use std::{
    env,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use log::{LevelFilter, debug, error, info, warn};

use crate::{
    datasource::{
        build_sources,
        config_parser::{Config, ConfigOrigin, load_config},
        file_path::*,
        host_info::read_host_cpu,
    },
    gpu::{GpuManagement, open_backend},
    model::{
        applier::{ApplyOutcome, CommandSequence, HelperError, PrivilegedApplier, execute},
        overclock::{OverclockRequest, Validator},
        sampler::TelemetrySampler,
        snapshot::Snapshot,
    },
    utils::{
        constants::{NOTES, VERSION},
        elevation::{Elevation, PrivilegedRunner},
        log_monitor::monitor_log_level,
        logger::init_logger,
        shutdown,
    },
};

fn print_usage() {
    println!("{}", NOTES);
    println!("Usage:");
    println!("\t-v show version");
    println!("\t-h show help");
    println!("\tmonitor [config.toml]             sample telemetry until interrupted");
    println!("\tgpus                              list GPUs");
    println!("\tapply <request.toml> [config.toml] validate and apply an overclock");
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Version,
    Monitor { config: PathBuf },
    Gpus,
    Apply { request: PathBuf, config: PathBuf },
    Helper,
}

fn parse_command(args: &[String]) -> Result<Command> {
    match args.get(1).map(String::as_str) {
        Some("-h") => Ok(Command::Help),
        Some("-v") => Ok(Command::Version),
        None | Some("monitor") => Ok(Command::Monitor {
            config: config_path(args.get(2)),
        }),
        Some("gpus") => Ok(Command::Gpus),
        Some("apply") => {
            let request = args
                .get(2)
                .context("apply needs a request file, use -h for help")?;
            Ok(Command::Apply {
                request: PathBuf::from(request),
                config: config_path(args.get(3)),
            })
        }
        Some(HELPER_SUBCOMMAND) => Ok(Command::Helper),
        Some(other) => bail!("Unknown argument: {other}, use -h for help"),
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match parse_command(&args)? {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Version => {
            println!("{}", NOTES);
            println!("{}", VERSION);
            Ok(())
        }
        Command::Monitor { config } => run_monitor(&config),
        Command::Gpus => run_gpus(),
        Command::Apply { request, config } => {
            let outcome = run_apply(&request, &config)?;
            if outcome != ApplyOutcome::Applied {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Helper => {
            // stderr of this process is the diagnostic the caller surfaces
            if let Err(e) = run_helper() {
                eprintln!("{e:#}");
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn config_path(arg: Option<&String>) -> PathBuf {
    arg.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn setup(config_file: &Path) -> Result<Config> {
    let (config, origin) = load_config(config_file)?;
    let level = config.log_level().unwrap_or(LevelFilter::Info);
    init_logger(level)?;

    info!("{}", NOTES);
    info!("{}", VERSION);
    match origin {
        ConfigOrigin::File => info!("Loaded config file: {}", config_file.display()),
        ConfigOrigin::Defaults => info!(
            "Config file not found, using defaults: {}",
            config_file.display()
        ),
    }
    if config.log_level().is_none() {
        warn!("Unknown log level {:?}, using info", config.log.level);
    }

    if let Some(level_file) = config.log.level_file.clone() {
        thread::Builder::new()
            .name(LOG_LEVEL_THREAD.to_string())
            .spawn(move || {
                if let Err(e) = monitor_log_level(level_file, level) {
                    error!("Log level monitor error: {}", e);
                }
            })
            .context("Failed to spawn log level monitor")?;
    }

    Ok(config)
}

fn log_snapshot(snapshot: &Snapshot) {
    if snapshot.is_empty() {
        warn!("No metric sources registered");
        return;
    }
    info!(
        "Cycle at {}: {}/{} metrics available",
        snapshot.taken_at().format("%H:%M:%S%.3f"),
        snapshot.available(),
        snapshot.len()
    );
    for (_, entry) in snapshot.iter() {
        info!("  {}", entry);
    }
    if let Some(summary) = snapshot.cpu_frequency_summary() {
        info!("  CPU frequency: {summary}");
    }
    if let Some(summary) = snapshot.cpu_temperature_summary() {
        info!("  CPU temperature: {summary}");
    }
}

fn run_monitor(config_file: &Path) -> Result<()> {
    let config = setup(config_file)?;
    shutdown::install_handlers()?;

    match read_host_cpu(PROC_CPUINFO) {
        Ok(cpu) => info!(
            "Host CPU: {} (family {})",
            cpu.model_name.as_deref().unwrap_or("unknown"),
            cpu.family.as_deref().unwrap_or("unknown")
        ),
        Err(e) => warn!("{e:#}"),
    }

    let interval = Duration::from_millis(config.sampling.interval_ms);
    let mut sampler = TelemetrySampler::new(interval);

    let mechanism = config.privilege.mechanism;
    let password = config.privilege.password();
    let elevation = sampler
        .start(|| Elevation::acquire(mechanism, password))
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| anyhow!("Sampler was already started"))?;
    let runner: Arc<dyn PrivilegedRunner> = Arc::new(elevation);

    let gpu = open_backend().map(Arc::<dyn GpuManagement>::from);
    if let Err(e) = &gpu {
        warn!("GPU metrics disabled: {e}");
    }

    for source in build_sources(&config.sampling, runner, gpu) {
        sampler.register(source);
    }

    let handle = thread::Builder::new()
        .name(SAMPLER_THREAD.to_string())
        .spawn(move || {
            info!("{SAMPLER_THREAD} Start");
            sampler.run(shutdown::flag(), |snapshot| log_snapshot(&snapshot))
        })
        .context("Failed to spawn sampler thread")?;

    handle
        .join()
        .map_err(|_| anyhow!("Sampler thread panicked"))?
        .map_err(|e| anyhow!(e))?;

    info!("Exiting");
    Ok(())
}

/// One line per device: index, name and PCI bus id. A field the driver
/// refuses is shown as its error.
fn gpu_listing(gpu: &dyn GpuManagement) -> Result<Vec<String>> {
    let count = gpu.device_count()?;
    Ok((0..count)
        .map(|index| {
            let name = gpu.device_name(index).unwrap_or_else(|e| format!("<{e}>"));
            let bus_id = gpu
                .device_bus_id(index)
                .unwrap_or_else(|e| format!("<{e}>"));
            format!("{index}: {name} [{bus_id}]")
        })
        .collect())
}

fn run_gpus() -> Result<()> {
    let gpu = open_backend()?;
    let lines = gpu_listing(gpu.as_ref())?;
    if lines.is_empty() {
        println!("No GPU found");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn run_apply(request_file: &Path, config_file: &Path) -> Result<ApplyOutcome> {
    let config = setup(config_file)?;
    let request = OverclockRequest::from_toml_file(request_file)?;
    debug!("Request: {:?}", request);

    let gpu = open_backend()?;
    let validator = Validator::new(gpu.as_ref());

    let runner: Arc<dyn PrivilegedRunner> = Arc::new(Elevation::per_invocation(
        config.apply.mechanism,
        config.privilege.password(),
    )?);
    let applier = PrivilegedApplier::new(
        runner,
        config.apply.helper()?,
        Duration::from_secs(config.apply.timeout_secs),
    );

    let outcome = applier.submit(&validator, &request);
    match &outcome {
        ApplyOutcome::Applied => println!("Applied"),
        ApplyOutcome::RejectedByValidation(reason) => println!("Rejected: {reason}"),
        ApplyOutcome::PrivilegedExecutionFailed(stderr) => {
            println!("Privileged execution failed:");
            print!("{stderr}");
        }
    }
    Ok(outcome)
}

fn run_helper() -> Result<()> {
    let mut payload = String::new();
    std::io::stdin()
        .read_to_string(&mut payload)
        .context("Failed to read command sequence from stdin")?;
    let sequence = CommandSequence::from_toml(&payload).map_err(HelperError::Malformed)?;
    execute(&sequence, open_backend)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::MockGpu;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("hwtune")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn monitor_is_the_default_command() {
        let expected = Command::Monitor {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
        };
        assert_eq!(parse_command(&argv(&[])).unwrap(), expected);
        assert_eq!(parse_command(&argv(&["monitor"])).unwrap(), expected);
        assert_eq!(
            parse_command(&argv(&["monitor", "/tmp/hwtune.toml"])).unwrap(),
            Command::Monitor {
                config: PathBuf::from("/tmp/hwtune.toml"),
            }
        );
    }

    #[test]
    fn apply_takes_request_and_optional_config() {
        assert_eq!(
            parse_command(&argv(&["apply", "oc.toml"])).unwrap(),
            Command::Apply {
                request: PathBuf::from("oc.toml"),
                config: PathBuf::from(DEFAULT_CONFIG_PATH),
            }
        );
        assert_eq!(
            parse_command(&argv(&["apply", "oc.toml", "alt.toml"])).unwrap(),
            Command::Apply {
                request: PathBuf::from("oc.toml"),
                config: PathBuf::from("alt.toml"),
            }
        );
    }

    #[test]
    fn apply_without_request_is_an_error() {
        let err = parse_command(&argv(&["apply"])).unwrap_err();
        assert!(err.to_string().contains("request file"));
    }

    #[test]
    fn unknown_argument_is_an_error() {
        assert!(parse_command(&argv(&["overclock"])).is_err());
        assert_eq!(parse_command(&argv(&["helper"])).unwrap(), Command::Helper);
    }

    #[test]
    fn gpu_listing_shows_name_and_bus_id() {
        let mut gpu = MockGpu::new();
        gpu.count = 2;
        assert_eq!(
            gpu_listing(&gpu).unwrap(),
            [
                "0: Mock GPU 0 [00000000:01:00.0]",
                "1: Mock GPU 1 [00000000:02:00.0]",
            ]
        );

        gpu.fail_on = Some("bus_id");
        let lines = gpu_listing(&gpu).unwrap();
        assert_eq!(lines[0], "0: Mock GPU 0 [<bus_id failed: Not Supported>]");
    }

    #[test]
    fn no_gpu_gives_an_empty_listing() {
        let mut gpu = MockGpu::new();
        gpu.count = 0;
        assert!(gpu_listing(&gpu).unwrap().is_empty());
    }
}
