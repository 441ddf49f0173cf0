//! MAS connection lifecycle.
//!
//! One connection to one MAS instance is driven by a single task that owns the
//! state machine and reads one mailbox. Session
//! callbacks, request completions, API commands and timer firings all arrive
//! through that mailbox, so the machine never needs a lock on its own state.
//!
//! ## State Machine
//!
//! | State           | Entry action                               | Valid Transitions             |
//! |-----------------|--------------------------------------------|-------------------------------|
//! | `Connecting`    | arm connect timer                          | → Connected, Disconnecting, Disconnected |
//! | `Connected`     | start own-number search + timer            | → Disconnecting, Disconnected |
//! | `Disconnecting` | shut the session down, arm deadline        | → Disconnected                |
//! | `Disconnected`  | release per-connection state, clean up     | (terminal)                    |
//!
//! ```text
//!                 established
//!   [Connecting] ─────────────> [Connected]
//!      │    │                      │     │
//!      │    │ disconnect()/timeout │     │ disconnect()
//!      │    └──────────┐           │     v
//!      │               └──────> [Disconnecting]
//!      │ session lost              │     │ ack or deadline
//!      v                           v     v
//!   [Disconnected] <──────────────────────
//! ```
//!
//! ## Own-Number Discovery
//!
//! On entering Connected the machine searches for the local phone number
//! before anything else. A complete answer or the search timeout, whichever
//! comes first, starts the next stage exactly once: notification
//! registration plus Inbox and Sent listings.

mod coordinator;
mod handle;
mod machine;
mod observer;
mod store;
mod timers;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{
    BluetoothAddress, EventReport, EventType, MessageStatus, Request, RequestId, RequestKind,
};

pub use coordinator::RequestCoordinator;
pub use handle::{ConnectionHandle, EventSink, SendOptions};
pub use machine::ConnectionSnapshot;
pub use observer::{ChannelObserver, ClientEvent};
pub use store::{Direction, MemoryStore, MessageRecord};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Waiting for the SDP record and session establishment
    Connecting,
    /// Session up, requests flowing
    Connected,
    /// Shutdown requested, waiting for acknowledgement or deadline
    Disconnecting,
    /// Session gone; terminal for this connection instance
    Disconnected,
}

impl ConnectionState {
    /// Check if the state accepts a `disconnect()` call
    pub fn can_disconnect(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Events emitted by the session layer into the connection mailbox
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// SDP lookup produced the MAS record
    SdpRecord(crate::protocol::SdpMasRecord),
    /// SDP lookup failed
    SdpFailed,
    /// OBEX session established
    Established,
    /// OBEX session gone (failure, remote close or shutdown acknowledgement)
    Disconnected,
    /// A submitted request finished; carries its result
    RequestCompleted(Request),
    /// Event report; `None` for an empty report
    Notification(Option<EventReport>),
}

/// Transport to the MAS.
///
/// Calls never block: `submit` only reports whether the request was accepted
/// for transmission. Completions come back later through the
/// [`EventSink`] given to the client at construction.
pub trait SessionClient: Send {
    /// Queue a request for transmission
    fn submit(&mut self, request: Request) -> bool;

    /// Stop working on a request; no completion is expected afterwards
    fn abort(&mut self, id: RequestId);

    /// Begin closing the session; acknowledged by [`SessionEvent::Disconnected`]
    fn shutdown(&mut self);

    /// Release transport resources after the connection is over
    fn cleanup(&mut self) {}
}

/// Persistent message storage
pub trait MessageStore: Send {
    /// Store a record and return its id
    fn insert(&mut self, record: MessageRecord) -> crate::Result<u64>;
}

/// Host notifications. Only state changes are mandatory.
pub trait StateObserver: Send {
    /// Called exactly once per transition
    fn on_state_changed(
        &mut self,
        device: BluetoothAddress,
        previous: ConnectionState,
        next: ConnectionState,
    );

    /// Non-empty event report received while connected
    fn on_event_report(&mut self, _device: BluetoothAddress, _report: &EventReport) {}

    /// Outbound push finished; `handle` is set on success
    fn on_message_sent(&mut self, _device: BluetoothAddress, _handle: Option<&str>, _success: bool) {}

    /// Sending/delivery report for a message pushed on this connection
    fn on_delivery_status(&mut self, _device: BluetoothAddress, _handle: &str, _event: EventType) {}

    /// Downloaded message stored under `record_id`
    fn on_message_received(
        &mut self,
        _device: BluetoothAddress,
        _record_id: u64,
        _record: &MessageRecord,
    ) {
    }

    /// Remote acknowledged (or refused) a status change
    fn on_message_status(
        &mut self,
        _device: BluetoothAddress,
        _handle: &str,
        _status: MessageStatus,
        _success: bool,
    ) {
    }
}

/// Why the coordinator refused a request
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// A singleton request of this kind is already outstanding
    #[error("{0:?} already outstanding")]
    Busy(RequestKind),

    /// Session client refused the request
    #[error("session client rejected request")]
    Rejected,
}
