// Thread names
pub const SAMPLER_THREAD: &str = "TelemetrySampler";
pub const LOG_LEVEL_THREAD: &str = "LogLevelWatcher";

// Config
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hwtune/hwtune.toml";

// CPU power capping (single package zone)
pub const RAPL_ENERGY_UJ: &str = "/sys/class/powercap/intel-rapl:0/energy_uj";
pub const RAPL_MAX_ENERGY_RANGE_UJ: &str = "/sys/class/powercap/intel-rapl:0/max_energy_range_uj";

// Clock scaling and hardware monitor roots
pub const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";
pub const CPUFREQ_CUR_NODE: &str = "cpufreq/scaling_cur_freq";
pub const HWMON_ROOT: &str = "/sys/class/hwmon";
pub const PROC_CPUINFO: &str = "/proc/cpuinfo";

// Model specific register holding the core voltage field
pub const MSR_DEVICE: &str = "/dev/cpu/0/msr";
pub const MSR_PERF_STATUS: u32 = 0x198;
pub const MSR_VOLTAGE_BITFIELD: &str = "47:32";
pub const RDMSR_BIN: &str = "rdmsr";

// GPU management library
pub const NVML_LIBRARY: &str = "libnvidia-ml.so.1";

// Elevation front-ends
pub const SUDO_BIN: &str = "sudo";
pub const PKEXEC_BIN: &str = "pkexec";
pub const CHMOD_BIN: &str = "chmod";

// Constants
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_APPLY_TIMEOUT_SECS: u64 = 60;
pub const HELPER_SUBCOMMAND: &str = "helper";
