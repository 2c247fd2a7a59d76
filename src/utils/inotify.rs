use std::{collections::HashMap, ffi::OsStr, path::Path, thread, time::Duration};

use anyhow::{Context, Result};
use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

const WAIT_MOVE_US: u64 = 500 * 1000;

pub struct InotifyWatcher {
    inotify: Inotify,
    watches: HashMap<WatchDescriptor, String>,
}

impl InotifyWatcher {
    pub fn new() -> Result<Self> {
        let inotify = Inotify::init().with_context(|| "Failed to initialize inotify")?;

        Ok(Self {
            inotify,
            watches: HashMap::new(),
        })
    }

    pub fn add<P: AsRef<Path>>(&mut self, path: P, mask: WatchMask) -> Result<()> {
        let path_ref = path.as_ref();
        let path_str = path_ref
            .to_str()
            .with_context(|| format!("Invalid path: {}", path_ref.display()))?;

        // editors replace files instead of writing in place
        let mask = mask | WatchMask::DELETE_SELF | WatchMask::MOVE_SELF;

        let wd = self
            .inotify
            .watches()
            .add(path_ref, mask)
            .with_context(|| format!("Failed to add watch for: {}", path_ref.display()))?;

        self.watches.insert(wd, path_str.to_string());
        Ok(())
    }

    /// Block until at least one event arrives, re-arming watches on
    /// replaced files. Returns the number of events seen.
    pub fn wait_and_handle(&mut self) -> Result<usize> {
        let mut buffer = [0; 4096];
        let events = self
            .inotify
            .read_events_blocking(&mut buffer)
            .with_context(|| "Failed to read inotify events")?;

        let stale = collect_stale(&self.watches, events);
        let seen = stale.seen;
        self.rearm(stale.watches)?;
        Ok(seen)
    }

    fn rearm(&mut self, stale: Vec<(WatchDescriptor, String)>) -> Result<()> {
        for (wd, path) in stale {
            if !Path::new(&path).exists() {
                thread::sleep(Duration::from_micros(WAIT_MOVE_US));
            }
            if !Path::new(&path).exists() {
                continue;
            }

            let mask = WatchMask::MODIFY
                | WatchMask::CLOSE_WRITE
                | WatchMask::DELETE_SELF
                | WatchMask::MOVE_SELF;

            let new_wd = self
                .inotify
                .watches()
                .add(&path, mask)
                .with_context(|| format!("Failed to re-add watch for: {path}"))?;

            self.watches.remove(&wd);
            self.watches.insert(new_wd, path);
        }
        Ok(())
    }
}

struct StaleWatches {
    seen: usize,
    watches: Vec<(WatchDescriptor, String)>,
}

fn collect_stale<'a, I>(watches: &HashMap<WatchDescriptor, String>, events: I) -> StaleWatches
where
    I: IntoIterator<Item = inotify::Event<&'a OsStr>>,
{
    let mut stale = StaleWatches {
        seen: 0,
        watches: Vec::new(),
    };

    for event in events {
        stale.seen += 1;
        if let Some(path) = watches.get(&event.wd)
            && (event.mask.contains(EventMask::IGNORED)
                || event.mask.contains(EventMask::DELETE_SELF)
                || event.mask.contains(EventMask::MOVE_SELF))
        {
            stale.watches.push((event.wd.clone(), path.clone()));
        }
    }
    stale
}
