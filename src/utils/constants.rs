/// Banner shown by `-h` / `-v` and at start-up
pub const NOTES: &str = "hwtune - hardware telemetry and GPU overclock helper";
pub const VERSION: &str = concat!("Version: v", env!("CARGO_PKG_VERSION"));

/// Fixed-point scale of the core voltage register field
pub const VOLTAGE_SCALE: f64 = 8192.0;

pub mod units {
    pub const KHZ_PER_MHZ: f64 = 1000.0;
    pub const MILLIDEGREE_PER_DEGREE: f64 = 1000.0;
    pub const MICROJOULE_PER_JOULE: f64 = 1e6;
}

pub mod fan {
    /// Manual fan speeds accepted by the validator, in percent
    pub const STEP: u8 = 10;
    pub const MIN_PERCENT: u8 = 10;
    pub const MAX_PERCENT: u8 = 100;
}
