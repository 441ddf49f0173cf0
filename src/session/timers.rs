//! Cancellable, generation-tokened timers that fire into the mailbox.
//!
//! Aborting a sleep task does not retract a firing that already reached the
//! mailbox, so every firing carries the token it was armed with and is only
//! honoured while that token is still the current one for its slot.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;

use super::machine::Input;
use crate::protocol::RequestId;

/// What a timer guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timeout {
    /// Connecting took too long
    Connect,
    /// Shutdown was not acknowledged in time
    Disconnect,
    /// Own-number search for the given request took too long
    OwnNumberSearch(RequestId),
}

/// One slot per timer role; re-arming a slot replaces its timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerSlot {
    Connect,
    Disconnect,
    OwnNumberSearch,
}

impl Timeout {
    pub(crate) fn slot(&self) -> TimerSlot {
        match self {
            Self::Connect => TimerSlot::Connect,
            Self::Disconnect => TimerSlot::Disconnect,
            Self::OwnNumberSearch(_) => TimerSlot::OwnNumberSearch,
        }
    }
}

struct Armed {
    token: u64,
    task: JoinHandle<()>,
}

pub(crate) struct Timers {
    mailbox: WeakUnboundedSender<Input>,
    next_token: u64,
    armed: HashMap<TimerSlot, Armed>,
}

impl Timers {
    pub(crate) fn new(mailbox: WeakUnboundedSender<Input>) -> Self {
        Self {
            mailbox,
            next_token: 0,
            armed: HashMap::new(),
        }
    }

    /// Arm `timeout` to fire after `after`, replacing any timer in its slot
    pub(crate) fn arm(&mut self, timeout: Timeout, after: Duration) -> u64 {
        self.cancel(timeout.slot());
        self.next_token += 1;
        let token = self.next_token;

        let mailbox = self.mailbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(Input::Timer { timeout, token });
            }
        });

        tracing::debug!(?timeout, token, ?after, "timer armed");
        self.armed.insert(timeout.slot(), Armed { token, task });
        token
    }

    /// Cancel the timer in `slot`; returns whether one was armed
    pub(crate) fn cancel(&mut self, slot: TimerSlot) -> bool {
        match self.armed.remove(&slot) {
            Some(armed) => {
                armed.task.abort();
                true
            },
            None => false,
        }
    }

    /// Accept a firing if it is the current timer for its slot, disarming it
    pub(crate) fn fire(&mut self, timeout: Timeout, token: u64) -> bool {
        let slot = timeout.slot();
        match self.armed.get(&slot) {
            Some(armed) if armed.token == token => {
                self.armed.remove(&slot);
                true
            },
            _ => {
                tracing::debug!(?timeout, token, "stale timer ignored");
                false
            },
        }
    }

    pub(crate) fn is_armed(&self, slot: TimerSlot) -> bool {
        self.armed.contains_key(&slot)
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.task.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_into_mailbox() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx.downgrade());
        let token = timers.arm(Timeout::Disconnect, Duration::from_secs(3));

        match rx.recv().await {
            Some(Input::Timer { timeout, token: fired }) => {
                assert_eq!(timeout, Timeout::Disconnect);
                assert_eq!(fired, token);
                assert!(timers.fire(timeout, fired));
                assert!(!timers.is_armed(TimerSlot::Disconnect));
            },
            _ => panic!("expected a timer firing"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_makes_old_token_stale() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx.downgrade());
        let old = timers.arm(Timeout::Connect, Duration::from_secs(1));
        let new = timers.arm(Timeout::Connect, Duration::from_secs(1));

        assert!(!timers.fire(Timeout::Connect, old));
        assert!(timers.fire(Timeout::Connect, new));
        // a second firing with the same token is a duplicate
        assert!(!timers.fire(Timeout::Connect, new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_is_stale() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx.downgrade());
        let token = timers.arm(Timeout::OwnNumberSearch(RequestId::new(1)), Duration::from_secs(1));
        assert!(timers.cancel(TimerSlot::OwnNumberSearch));
        assert!(!timers.cancel(TimerSlot::OwnNumberSearch));
        assert!(!timers.fire(Timeout::OwnNumberSearch(RequestId::new(1)), token));
    }
}
