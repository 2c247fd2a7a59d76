pub mod constants;
pub mod device_lock;
pub mod elevation;
pub mod file_operate;
pub mod file_status;
pub mod inotify;
pub mod log_monitor;
pub mod logger;
pub mod shutdown;
