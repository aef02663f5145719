//! Re-enumerates the endpoint directory on an interval and reports endpoints
//! as they appear or disappear.
use std::{
    collections::BTreeMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    thread,
    time::Duration,
};

use crate::transport::{EndpointId, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    Added {
        direction: Direction,
        id: EndpointId,
        name: String,
    },
    Removed {
        direction: Direction,
        id: EndpointId,
        name: String,
    },
}

/// Everything visible in one scan.
pub type Snapshot = BTreeMap<(Direction, EndpointId), String>;

/// Background watcher; dropping it stops the scan thread.
pub struct DirectoryWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DirectoryWatcher {
    pub fn start<T: Transport>(
        transport: Arc<T>,
        interval: Duration,
        tx: Sender<DirectoryEvent>,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = thread::Builder::new()
            .name("midi-directory".into())
            .spawn(move || {
                let mut known = Snapshot::new();

                while !flag.load(Ordering::Acquire) {
                    // a failed scan keeps the last known state so nothing flaps
                    if let Some(present) = scan(transport.as_ref()) {
                        for event in diff(&known, &present) {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                        known = present;
                    }
                    thread::park_timeout(interval);
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::warn!("MIDI directory watcher panicked");
            }
        }
    }
}

/// Events turning `previous` into `current`. A renamed endpoint shows up as
/// removed then added.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<DirectoryEvent> {
    let mut events = Vec::new();

    for ((direction, id), name) in previous {
        if current.get(&(*direction, id.clone())) != Some(name) {
            log::info!("🎹 Gone: {name} ({id})");
            events.push(DirectoryEvent::Removed {
                direction: *direction,
                id: id.clone(),
                name: name.clone(),
            });
        }
    }
    for ((direction, id), name) in current {
        if previous.get(&(*direction, id.clone())) != Some(name) {
            log::info!("🎹 New: {name} ({id})");
            events.push(DirectoryEvent::Added {
                direction: *direction,
                id: id.clone(),
                name: name.clone(),
            });
        }
    }
    events
}

fn scan<T: Transport>(transport: &T) -> Option<Snapshot> {
    let inputs = transport
        .list_inputs()
        .map_err(|e| log::warn!("MIDI input scan failed: {e}"))
        .ok()?;
    let outputs = transport
        .list_outputs()
        .map_err(|e| log::warn!("MIDI output scan failed: {e}"))
        .ok()?;

    let inputs = inputs.into_iter().map(|(id, n)| ((Direction::Input, id), n));
    let outputs = outputs.into_iter().map(|(id, n)| ((Direction::Output, id), n));
    Some(inputs.chain(outputs).collect())
}
