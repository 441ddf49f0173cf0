//! # MAP Client - Bluetooth Message Access Profile connection core
//!
//! Connection lifecycle for the client side of Bluetooth MAP: one connection
//! to one Message Access Server (MAS) instance on a remote phone, driven
//! through SDP, session establishment, own-number discovery, folder
//! synchronization and outbound message pushes.
//!
//! ## Features
//!
//! - **Single-mailbox state machine**: session events, API calls and timer
//!   firings are serialized through one queue per connection
//! - **Own-number discovery**: pages the Sent and Inbox listings for the
//!   local phone number, bounded by a timeout
//! - **Request coordination**: completions are matched to requests by
//!   identity; stale and duplicate completions are dropped
//! - **Outbound dispatch**: one store insert per completed push
//! - **Loopback MAS**: a simulated server for hosts, tests and the CLI
//!
//! ## Architecture
//!
//! ```text
//!  Host                     Connection task                  SessionClient
//!   |                            |                                |
//!   |-- send_message() -------->|                                |
//!   |   (Command)               |-- submit(PushMessage) -------->|
//!   |                            |                                |
//!   |                            |<-- RequestCompleted -----------|
//!   |                            |    (EventSink)                 |
//!   |                            |-- MessageStore::insert         |
//!   |<-- on_message_sent --------|                                |
//!   |    (StateObserver)         |                                |
//! ```
//!
//! ### Connection States
//!
//! ```text
//!     [Connecting] ──established──> [Connected]
//!         │    │                       │    │
//!         │    └── disconnect() ───────┼──> [Disconnecting]
//!         │        connect timeout     │          │
//!         │                            │   ack or deadline
//!         v          session lost      v          v
//!     [Disconnected] <─────────────────────────────
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mapclient::{
//!     ChannelObserver, ConnectionHandle, ConnectionState, LoopbackServer, MemoryStore,
//!     SendOptions,
//! };
//!
//! # async fn demo() -> mapclient::Result<()> {
//! let server = LoopbackServer::default();
//! let (observer, _events) = ChannelObserver::new(64);
//! let store = MemoryStore::new(0);
//!
//! let handle = ConnectionHandle::connect(
//!     "00:11:22:33:44:55".parse()?,
//!     mapclient::Config::default().connection,
//!     |sink| server.client(sink),
//!     store.clone(),
//!     observer,
//! );
//!
//! handle.wait_for_state(ConnectionState::Connected).await?;
//! handle.send_message(&["tel:555-1212"], "hello", SendOptions::default())?;
//! handle.disconnect()?;
//! handle.wait_for_state(ConnectionState::Disconnected).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`session`]: Connection state machine, request coordination, host handle
//! - [`protocol`]: Requests, bMessages, event reports, own-number search
//! - [`sim`]: Loopback MAS
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sim;

// Re-exports for convenience
pub use config::{Config, ConnectionConfig, StoreConfig};
pub use error::{MapClientError, Result};
pub use protocol::{
    BluetoothAddress, Bmessage, BmessageType, EventReport, EventType, Folder, MessageStatus,
    Operation, Recipient, Request, RequestId, Response, SdpMasRecord,
};
pub use session::{
    ChannelObserver, ClientEvent, ConnectionHandle, ConnectionSnapshot, ConnectionState,
    EventSink, MemoryStore, MessageRecord, MessageStore, RequestCoordinator, SendOptions,
    SessionClient, SessionEvent, StateObserver,
};
pub use sim::{LoopbackClient, LoopbackOptions, LoopbackServer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
