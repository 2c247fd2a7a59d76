use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;

// One exclusive section per GPU index, shared by telemetry reads and applies
static DEVICE_LOCKS: Lazy<Mutex<HashMap<u32, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Run `f` while holding the exclusive section of GPU `index`.
pub fn with_device<R>(index: u32, f: impl FnOnce() -> R) -> R {
    let lock = {
        let mut map = DEVICE_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(index).or_default().clone()
    };
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    f()
}
