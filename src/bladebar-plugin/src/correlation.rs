//! Remote-event handle allocation and result matching.

use std::collections::HashMap;
use tokio::sync::oneshot;

/// Caller-side token for an outstanding remote event.
///
/// Dropping it is how a caller stops caring about the result; a late result
/// is then discarded.
#[derive(Debug)]
pub struct PendingEvent {
    handle: u32,
    rx: oneshot::Receiver<bool>,
}

impl PendingEvent {
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Wait for the outcome. `None` means the event was evicted before a
    /// result arrived (the worker went away).
    pub async fn wait(self) -> Option<bool> {
        self.rx.await.ok()
    }

    /// Non-blocking check for an outcome that already arrived.
    pub fn try_result(&mut self) -> Option<bool> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct Entry {
    owner: u32,
    reply: oneshot::Sender<bool>,
}

/// Handle counter plus the table of events still waiting for a result.
///
/// Each entry remembers the unique id of the plugin it was sent to (or, in a
/// wrapper, came from) so a result is only accepted from that peer and all
/// entries of a dead peer can be evicted at once.
#[derive(Debug, Default)]
pub struct Correlator {
    counter: u32,
    pending: HashMap<u32, Entry>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next handle and register a pending entry for `owner`.
    pub fn issue(&mut self, owner: u32) -> (u32, PendingEvent) {
        let handle = self.next_handle();
        let (reply, rx) = oneshot::channel();
        self.pending.insert(handle, Entry { owner, reply });
        (handle, PendingEvent { handle, rx })
    }

    /// Deliver a result. Returns `false` when nothing was waiting for it.
    pub fn resolve(&mut self, owner: u32, handle: u32, result: bool) -> bool {
        match self.pending.get(&handle) {
            Some(entry) if entry.owner == owner => {}
            _ => return false,
        }
        if let Some(entry) = self.pending.remove(&handle) {
            // the caller may have dropped its token already
            let _ = entry.reply.send(result);
        }
        true
    }

    /// Forget a single entry without resolving it.
    pub fn cancel(&mut self, handle: u32) -> bool {
        self.pending.remove(&handle).is_some()
    }

    /// Drop every entry owned by `owner`; their tokens resolve to `None`.
    pub fn evict(&mut self, owner: u32) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, entry| entry.owner != owner);
        before - self.pending.len()
    }

    pub fn is_pending(&self, handle: u32) -> bool {
        self.pending.contains_key(&handle)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_handle(&mut self) -> u32 {
        loop {
            if self.counter > u32::MAX - 2 {
                self.counter = 0;
            }
            self.counter += 1;

            // After a wrap, skip handles an ancient event still holds.
            if !self.pending.contains_key(&self.counter) {
                return self.counter;
            }
        }
    }

    #[cfg(test)]
    fn starting_at(counter: u32) -> Self {
        Self {
            counter,
            pending: HashMap::new(),
        }
    }
}
