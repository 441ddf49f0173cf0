//! Stored message records and an in-memory [`MessageStore`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageStore;
use crate::error::{MapClientError, Result};
use crate::protocol::{phone_numbers_match, Bmessage, BmessageType, Folder};

/// Whether the local device sent or received a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent from this device's number
    Sent,
    /// Received by this device's number
    Received,
}

/// A message as handed to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// MAS message handle
    pub handle: String,
    /// Sent or received
    pub direction: Direction,
    /// Folder on the server
    pub folder: Folder,
    /// Message type
    pub kind: BmessageType,
    /// Counterpart addresses: recipients when sent, originator when received
    pub addresses: Vec<String>,
    /// Body text
    pub body: String,
    /// Read flag
    pub read: bool,
    /// When the record was created locally
    pub stored_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Record for a message this device pushed
    pub fn sent(handle: &str, message: &Bmessage) -> Self {
        Self {
            handle: handle.to_string(),
            direction: Direction::Sent,
            folder: Folder::Sent,
            kind: message.kind(),
            addresses: recipient_addresses(message),
            body: message.body().to_string(),
            read: true,
            stored_at: Utc::now(),
        }
    }

    /// Record for a downloaded message.
    ///
    /// Messages filed under Sent/Outbox, or whose originator is the own
    /// number, count as sent; everything else as received.
    pub fn downloaded(handle: &str, message: &Bmessage, own_number: Option<&str>) -> Self {
        let from_self = matches!(message.folder(), Folder::Sent | Folder::Outbox)
            || match (message.originator(), own_number) {
                (Some(originator), Some(own)) => phone_numbers_match(originator.address.as_str(), own),
                _ => false,
            };

        let (direction, addresses) = if from_self {
            (Direction::Sent, recipient_addresses(message))
        } else {
            let from = message
                .originator()
                .map(|o| vec![o.address.as_str().to_string()])
                .unwrap_or_default();
            (Direction::Received, from)
        };

        Self {
            handle: handle.to_string(),
            direction,
            folder: message.folder(),
            kind: message.kind(),
            addresses,
            body: message.body().to_string(),
            read: message.is_read(),
            stored_at: Utc::now(),
        }
    }
}

fn recipient_addresses(message: &Bmessage) -> Vec<String> {
    message
        .recipients()
        .iter()
        .map(|r| r.address.as_str().to_string())
        .collect()
}

#[derive(Default)]
struct Records {
    next_id: u64,
    entries: VecDeque<(u64, MessageRecord)>,
}

/// In-memory store; clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Records>>,
    max_records: usize,
}

impl MemoryStore {
    /// Create a store keeping at most `max_records` records (0 = unbounded)
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Arc::default(),
            max_records,
        }
    }

    /// All records, oldest first
    pub fn records(&self) -> Vec<(u64, MessageRecord)> {
        self.records
            .lock()
            .map(|r| r.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.entries.len()).unwrap_or_default()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records as a JSON array
    pub fn to_json(&self) -> Result<String> {
        let records: Vec<_> = self.records().into_iter().map(|(_, r)| r).collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }
}

impl MessageStore for MemoryStore {
    fn insert(&mut self, record: MessageRecord) -> Result<u64> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| MapClientError::Store("store lock poisoned".to_string()))?;

        records.next_id += 1;
        let id = records.next_id;
        records.entries.push_back((id, record));
        if self.max_records > 0 {
            while records.entries.len() > self.max_records {
                records.entries.pop_front();
            }
        }
        Ok(id)
    }
}
