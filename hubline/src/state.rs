//! Connection state and change notifications

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

/// The state of a supervised connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection is open and none is being attempted
    Disconnected,
    /// An initial connection attempt is in progress
    Connecting,
    /// The connection is open
    Connected,
    /// The connection dropped and the transport is re-establishing it
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// A notification that the connection state changed
///
/// Status updates requested explicitly carry the same value in both fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    /// The state before the change
    pub previous: ConnectionState,
    /// The state after the change
    pub current: ConnectionState,
}

/// Identifies a subscription so that it can be removed later
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(StateChange) + Send + Sync>;

#[derive(Debug)]
struct Current {
    state: ConnectionState,
    silenced: bool,
    pending: VecDeque<StateChange>,
    delivering: bool,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks the current state and delivers changes to subscribers
///
/// Notifications are delivered synchronously, in the order the changes
/// occurred. Changes reported while a notification is being delivered,
/// including those reported from within a callback, are queued and
/// delivered by the thread already delivering once it finishes the current
/// one. Subscribers may also subscribe or unsubscribe from within a callback.
pub struct StateNotifier {
    current: Mutex<Current>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl Default for StateNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let current = lock(&self.current);
        f.debug_struct("StateNotifier")
            .field("state", &current.state)
            .field("silenced", &current.silenced)
            .field("pending", &current.pending.len())
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

/// Releases the delivery role if a callback panics
struct Delivering<'a>(&'a StateNotifier);

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(&self.0.current).delivering = false;
        }
    }
}

impl StateNotifier {
    /// Constructs a new notifier in the [`Disconnected`][ConnectionState::Disconnected] state
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Current {
                state: ConnectionState::Disconnected,
                silenced: false,
                pending: VecDeque::new(),
                delivering: false,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The current state
    pub fn current(&self) -> ConnectionState {
        lock(&self.current).state
    }

    /// Registers a callback for state changes
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Removes a callback, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Records a new state and notifies subscribers
    pub fn transition(&self, state: ConnectionState) {
        {
            let mut current = lock(&self.current);
            let previous = std::mem::replace(&mut current.state, state);
            if current.silenced {
                tracing::trace!(%previous, current = %state, "state changed while silenced");
                return;
            }

            tracing::debug!(%previous, current = %state, "connection state changed");
            current.pending.push_back(StateChange {
                previous,
                current: state,
            });
        }

        self.drain();
    }

    /// Delivers the current state to all subscribers without changing it
    pub fn fire_current(&self) {
        {
            let mut current = lock(&self.current);
            if current.silenced {
                return;
            }

            let state = current.state;
            current.pending.push_back(StateChange {
                previous: state,
                current: state,
            });
        }

        self.drain();
    }

    /// Stops delivering notifications
    ///
    /// Queued notifications are dropped. The current state continues to be
    /// tracked.
    pub fn silence(&self) {
        let mut current = lock(&self.current);
        current.silenced = true;
        current.pending.clear();
    }

    fn drain(&self) {
        {
            let mut current = lock(&self.current);
            if current.delivering {
                return;
            }
            current.delivering = true;
        }
        let _delivering = Delivering(self);

        loop {
            let change = {
                let mut current = lock(&self.current);
                if current.silenced {
                    current.pending.clear();
                }
                match current.pending.pop_front() {
                    Some(change) => change,
                    None => {
                        current.delivering = false;
                        return;
                    }
                }
            };

            self.deliver(change);
        }
    }

    fn deliver(&self, change: StateChange) {
        let callbacks: Vec<Callback> = lock(&self.subscribers)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(change);
        }
    }
}
