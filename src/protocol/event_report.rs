//! MAP event reports (MNS notifications).

use serde::{Deserialize, Serialize};

use super::{BmessageType, Folder};

/// Event report types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    /// A new message arrived
    NewMessage,
    /// A sent message reached its recipient
    DeliverySuccess,
    /// A message left the device
    SendingSuccess,
    /// Delivery failed
    DeliveryFailure,
    /// Sending failed
    SendingFailure,
    /// Server message memory is full
    MemoryFull,
    /// Server message memory is available again
    MemoryAvailable,
    /// A message was deleted
    MessageDeleted,
    /// A message moved between folders
    MessageShift,
    /// Read flag changed
    ReadStatusChanged,
}

/// A single event report from the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReport {
    /// Event type
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Message handle the event refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Folder the message is in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<Folder>,
    /// Previous folder, for [`EventType::MessageShift`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_folder: Option<Folder>,
    /// Message type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<BmessageType>,
}

impl EventReport {
    /// Report of `kind` about `handle`
    pub fn new(kind: EventType, handle: impl Into<String>) -> Self {
        Self {
            kind,
            handle: Some(handle.into()),
            folder: None,
            old_folder: None,
            message_type: None,
        }
    }

    /// Set the folder
    pub fn in_folder(mut self, folder: Folder) -> Self {
        self.folder = Some(folder);
        self
    }

    /// Check if this announces a new message in the inbox
    pub fn is_new_inbox_message(&self) -> bool {
        self.kind == EventType::NewMessage
            && self.handle.is_some()
            && self.folder.map_or(true, |f| f == Folder::Inbox)
    }
}
