//! Message Access Profile protocol vocabulary.
//!
//! The types a MAP client exchanges with a remote Message Access Server (MAS):
//! request descriptors, bMessages, folder listings, SDP records and event
//! reports. Nothing here touches the wire; encoding and segmentation belong to
//! the [`SessionClient`](crate::session::SessionClient) implementation.
//!
//! ## Request Flow
//!
//! ```text
//! Client (MCE)                          Server (MAS)
//!    |                                      |
//!    |--- GetMessagesListing (own num) ---->|  Sent, then Inbox, in batches
//!    |<-------------- listing --------------|
//!    |                                      |
//!    |--- SetNotificationRegistration ----->|  enable event reports
//!    |--- GetMessagesListing (inbox) ------>|
//!    |--- GetMessagesListing (sent) ------->|
//!    |                                      |
//!    |<========== EventReport ==============|  NewMessage, SendingSuccess...
//!    |--- GetMessage (handle) ------------->|
//!    |--- PushMessage (bMessage) ---------->|  outbound send
//!    |--- SetMessageStatus (handle) ------->|  read / deleted flags
//! ```
//!
//! Every [`Request`] carries its own result once resolved, so a completion is
//! simply the same request handed back with its result filled in.

mod bmessage;
mod device;
mod event_report;
mod own_number;
mod request;
mod sdp;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use bmessage::{
    normalize_phone_number, phone_numbers_match, Address, Bmessage, BmessageType, Recipient,
};
pub use device::BluetoothAddress;
pub use event_report::{EventReport, EventType};
pub use own_number::OwnNumberSearch;
pub use request::{
    MessageListingEntry, MessageStatus, Operation, Request, RequestId, RequestKind,
    RequestStatus, Response, RESPONSE_INTERNAL_ERROR,
};
pub use sdp::{MapFeature, SdpMasRecord};

/// Message folders exposed by a MAS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    /// Received messages
    Inbox,
    /// Sent messages
    Sent,
    /// Messages queued for sending
    Outbox,
    /// Deleted messages
    Deleted,
    /// Drafts
    Draft,
}

impl Folder {
    /// Folder name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Outbox => "outbox",
            Self::Deleted => "deleted",
            Self::Draft => "draft",
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
