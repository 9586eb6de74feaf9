//! In-process single-flight for cache misses.
//!
//! The first caller to miss on a key becomes the leader and computes; callers
//! that miss on the same key while the leader runs wait for its encoded
//! payload instead of computing again.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

/// What a follower receives once the leader finishes.
#[derive(Debug, Clone)]
pub(crate) enum Landing {
    /// Encoded value, exactly as written to the store.
    Value(Arc<str>),
    /// The leader failed or was dropped; followers compute on their own.
    Abandoned,
}

type Slot = watch::Receiver<Option<Landing>>;

#[derive(Default)]
pub(crate) struct SingleFlight {
    inflight: Arc<DashMap<String, Slot>>,
}

pub(crate) enum Role {
    Leader(FlightGuard),
    Follower(Slot),
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, starting one when none is running.
    pub(crate) fn join(&self, key: &str) -> Role {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(slot) => Role::Follower(slot.get().clone()),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                vacant.insert(receiver);
                Role::Leader(FlightGuard {
                    key: key.to_string(),
                    sender,
                    inflight: Arc::clone(&self.inflight),
                    landed: false,
                })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inflight.len()
    }
}

/// Wait for the leader of a flight to land.
pub(crate) async fn wait(mut slot: Slot) -> Landing {
    match slot.wait_for(Option::is_some).await {
        Ok(landing) => (*landing).clone().unwrap_or(Landing::Abandoned),
        Err(_) => Landing::Abandoned,
    }
}

/// Held by the leader. Landing (or dropping) the guard closes the flight.
pub(crate) struct FlightGuard {
    key: String,
    sender: watch::Sender<Option<Landing>>,
    inflight: Arc<DashMap<String, Slot>>,
    landed: bool,
}

impl FlightGuard {
    pub(crate) fn land(mut self, payload: Arc<str>) {
        self.finish(Landing::Value(payload));
    }

    fn finish(&mut self, landing: Landing) {
        if self.landed {
            return;
        }
        self.landed = true;
        self.inflight.remove(&self.key);
        // Followers may all have gone away; nothing to deliver then.
        let _ = self.sender.send(Some(landing));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.finish(Landing::Abandoned);
    }
}
