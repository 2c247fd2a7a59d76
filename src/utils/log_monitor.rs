use std::path::PathBuf;

use anyhow::Result;
use inotify::WatchMask;
use log::{LevelFilter, debug, info, warn};

use crate::{
    datasource::file_path::LOG_LEVEL_THREAD,
    utils::{file_operate::check_read_simple, inotify::InotifyWatcher, logger::update_log_level},
};

pub fn monitor_log_level(level_file: PathBuf, default: LevelFilter) -> Result<()> {
    info!("{LOG_LEVEL_THREAD} Start");

    if !check_read_simple(&level_file) {
        info!("Log level file does not exist: {}", level_file.display());
    } else {
        info!("Using log level path: {}", level_file.display());
        update_log_level(&level_file, default);
    }

    let mut inotify = InotifyWatcher::new()?;
    inotify.add(&level_file, WatchMask::CLOSE_WRITE | WatchMask::MODIFY)?;

    loop {
        if let Err(e) = inotify.wait_and_handle() {
            warn!("Inotify error in log level monitor: {e}");
            std::thread::sleep(std::time::Duration::from_secs(1));
            continue;
        }

        if !check_read_simple(&level_file) {
            debug!("Log level file no longer exists");
            continue;
        }

        update_log_level(&level_file, default);
    }
}
