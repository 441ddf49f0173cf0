//! MAP request descriptors.
//!
//! A [`Request`] is a closed set of operations ([`Operation`]), each variant
//! holding the slot for its own result. The session client resolves a request
//! with a [`Response`] and hands the same request back as a completion, so the
//! core can match completions to requests by [`RequestId`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Bmessage, BmessageType, Folder, OwnNumberSearch};

/// OBEX "Internal Server Error", used when a response does not fit the request
pub const RESPONSE_INTERNAL_ERROR: u8 = 0xD0;

/// Request identity, stable across resubmission of the same logical request.
///
/// Each submission additionally gets its own generation (see
/// [`Request::generation`]), so a completion from an earlier round of a
/// resubmitted request can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Status flags settable on a remote message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Mark read
    Read,
    /// Mark unread
    Unread,
    /// Move to deleted
    Deleted,
    /// Restore from deleted
    Undeleted,
}

/// One entry of a messages-listing response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageListingEntry {
    /// Server-assigned message handle
    pub handle: String,
    /// Message type
    pub kind: BmessageType,
    /// Originator address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_addressing: Option<String>,
    /// Recipient address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_addressing: Option<String>,
    /// Message timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
    /// Read flag
    pub read: bool,
}

impl MessageListingEntry {
    /// Entry with only a handle and type set
    pub fn new(handle: impl Into<String>, kind: BmessageType) -> Self {
        Self {
            handle: handle.into(),
            kind,
            sender_addressing: None,
            recipient_addressing: None,
            datetime: None,
            read: false,
        }
    }

    /// Set the originator address
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender_addressing = Some(sender.into());
        self
    }

    /// Set the recipient address
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient_addressing = Some(recipient.into());
        self
    }
}

/// Protocol operations
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// List messages in a folder
    GetMessagesListing {
        /// Folder to list
        folder: Folder,
        /// Maximum number of entries
        max_list_count: u16,
        /// Offset of the first entry
        offset: u16,
        /// Result: listing entries
        listing: Vec<MessageListingEntry>,
    },
    /// Own-number search over Sent and Inbox listings
    GetMessagesListingForOwnNumber(OwnNumberSearch),
    /// Enable or disable event reports
    SetNotificationRegistration {
        /// Register when true
        enable: bool,
    },
    /// Upload a message for sending
    PushMessage {
        /// Target folder
        folder: Folder,
        /// Message to send
        message: Bmessage,
        /// Ask the server to retry failed sends
        retry: bool,
        /// Do not keep a copy in the server's Sent folder
        transparent: bool,
        /// Result: handle assigned by the server
        handle: Option<String>,
    },
    /// Change read/deleted status of a remote message
    SetMessageStatus {
        /// Message handle
        handle: String,
        /// New status
        status: MessageStatus,
    },
    /// Download one message
    GetMessage {
        /// Message handle
        handle: String,
        /// Result: the downloaded message
        message: Option<Bmessage>,
    },
}

/// Fieldless discriminant of [`Operation`], for logging and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// [`Operation::GetMessagesListing`]
    GetMessagesListing,
    /// [`Operation::GetMessagesListingForOwnNumber`]
    GetMessagesListingForOwnNumber,
    /// [`Operation::SetNotificationRegistration`]
    SetNotificationRegistration,
    /// [`Operation::PushMessage`]
    PushMessage,
    /// [`Operation::SetMessageStatus`]
    SetMessageStatus,
    /// [`Operation::GetMessage`]
    GetMessage,
}

/// Completion status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Not resolved yet
    Pending,
    /// Server answered with success
    Success,
    /// Server answered with the given OBEX response code
    Failed(u8),
}

/// Server answer used to resolve a request
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Messages-listing body
    Listing(Vec<MessageListingEntry>),
    /// Push accepted, with the assigned handle
    Pushed {
        /// Assigned message handle
        handle: String,
    },
    /// Message body
    Message(Bmessage),
    /// Success without a body
    Ack,
    /// Failure with an OBEX response code
    Failed(u8),
}

/// A protocol request and, once resolved, its result
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    id: RequestId,
    generation: u64,
    op: Operation,
    status: RequestStatus,
}

impl Request {
    /// Create a pending request
    pub fn new(id: RequestId, op: Operation) -> Self {
        Self {
            id,
            generation: 0,
            op,
            status: RequestStatus::Pending,
        }
    }

    /// Request identity
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Submission generation, assigned each time the request is submitted.
    /// Zero until first submitted.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Operation and result slot
    pub fn operation(&self) -> &Operation {
        &self.op
    }

    /// Completion status
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Check if the server answered with success
    pub fn is_success(&self) -> bool {
        self.status == RequestStatus::Success
    }

    /// Operation discriminant
    pub fn kind(&self) -> RequestKind {
        match &self.op {
            Operation::GetMessagesListing { .. } => RequestKind::GetMessagesListing,
            Operation::GetMessagesListingForOwnNumber(_) => {
                RequestKind::GetMessagesListingForOwnNumber
            },
            Operation::SetNotificationRegistration { .. } => {
                RequestKind::SetNotificationRegistration
            },
            Operation::PushMessage { .. } => RequestKind::PushMessage,
            Operation::SetMessageStatus { .. } => RequestKind::SetMessageStatus,
            Operation::GetMessage { .. } => RequestKind::GetMessage,
        }
    }

    /// Folder of a plain messages-listing request
    pub fn listing_folder(&self) -> Option<Folder> {
        match &self.op {
            Operation::GetMessagesListing { folder, .. } => Some(*folder),
            _ => None,
        }
    }

    /// Own-number search state, for own-number requests
    pub fn own_number_search(&self) -> Option<&OwnNumberSearch> {
        match &self.op {
            Operation::GetMessagesListingForOwnNumber(search) => Some(search),
            _ => None,
        }
    }

    /// Back to pending under a new submission generation
    pub(crate) fn begin_attempt(&mut self, generation: u64) {
        self.generation = generation;
        self.status = RequestStatus::Pending;
    }

    /// Fill in the result from a server answer.
    ///
    /// An own-number search absorbs the listing batch and may stay
    /// incomplete; its status is still `Success` because the exchange itself
    /// succeeded. A response that does not fit the operation marks the
    /// request failed with [`RESPONSE_INTERNAL_ERROR`].
    pub fn resolve(&mut self, response: Response) {
        let (id, kind) = (self.id, self.kind());
        self.status = match (&mut self.op, response) {
            (_, Response::Failed(code)) => RequestStatus::Failed(code),
            (Operation::GetMessagesListing { listing, .. }, Response::Listing(entries)) => {
                *listing = entries;
                RequestStatus::Success
            },
            (Operation::GetMessagesListingForOwnNumber(search), Response::Listing(entries)) => {
                search.absorb(&entries);
                RequestStatus::Success
            },
            (Operation::PushMessage { handle, .. }, Response::Pushed { handle: assigned }) => {
                *handle = Some(assigned);
                RequestStatus::Success
            },
            (Operation::GetMessage { message, .. }, Response::Message(body)) => {
                *message = Some(body);
                RequestStatus::Success
            },
            (
                Operation::SetNotificationRegistration { .. } | Operation::SetMessageStatus { .. },
                Response::Ack,
            ) => RequestStatus::Success,
            (_, other) => {
                tracing::warn!("{id} ({kind:?}) resolved with mismatched response {other:?}");
                RequestStatus::Failed(RESPONSE_INTERNAL_ERROR)
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Recipient;

    fn push_request() -> Request {
        let message = Bmessage::new(BmessageType::SmsGsm, Folder::Sent)
            .with_body("hi")
            .with_recipient(Recipient::phone("5551212"));
        Request::new(
            RequestId::new(7),
            Operation::PushMessage {
                folder: Folder::Sent,
                message,
                retry: false,
                transparent: false,
                handle: None,
            },
        )
    }

    #[test]
    fn test_resolve_push() {
        let mut req = push_request();
        assert_eq!(req.status(), RequestStatus::Pending);
        req.resolve(Response::Pushed {
            handle: "12345".to_string(),
        });
        assert!(req.is_success());
        match req.operation() {
            Operation::PushMessage { handle, .. } => assert_eq!(handle.as_deref(), Some("12345")),
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_resolve_failure_keeps_identity() {
        let mut req = push_request();
        req.resolve(Response::Failed(0xC3));
        assert_eq!(req.status(), RequestStatus::Failed(0xC3));
        assert_eq!(req.id(), RequestId::new(7));
    }

    #[test]
    fn test_resolve_mismatch() {
        let mut req = push_request();
        req.resolve(Response::Listing(vec![]));
        assert_eq!(req.status(), RequestStatus::Failed(RESPONSE_INTERNAL_ERROR));
    }

    #[test]
    fn test_begin_attempt_keeps_identity() {
        let mut req = push_request();
        req.resolve(Response::Failed(0xC3));
        req.begin_attempt(4);
        assert_eq!(req.id(), RequestId::new(7));
        assert_eq!(req.generation(), 4);
        assert_eq!(req.status(), RequestStatus::Pending);
    }

    #[test]
    fn test_listing_folder() {
        let req = Request::new(
            RequestId::new(1),
            Operation::GetMessagesListing {
                folder: Folder::Inbox,
                max_list_count: 10,
                offset: 0,
                listing: vec![],
            },
        );
        assert_eq!(req.kind(), RequestKind::GetMessagesListing);
        assert_eq!(req.listing_folder(), Some(Folder::Inbox));
        assert!(push_request().listing_folder().is_none());
    }
}
