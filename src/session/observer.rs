//! Broadcast-backed [`StateObserver`].

use serde::Serialize;
use tokio::sync::broadcast;

use super::{ConnectionState, MessageRecord, StateObserver};
use crate::protocol::{BluetoothAddress, EventReport, EventType, MessageStatus};

/// Everything a connection reports to its host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Connection state changed
    StateChanged {
        /// Remote device
        device: BluetoothAddress,
        /// State before the transition
        previous: ConnectionState,
        /// State after the transition
        next: ConnectionState,
    },
    /// Event report from the server
    EventReport {
        /// Remote device
        device: BluetoothAddress,
        /// The report
        report: EventReport,
    },
    /// Push finished
    MessageSent {
        /// Remote device
        device: BluetoothAddress,
        /// Assigned handle on success
        handle: Option<String>,
        /// Whether the server accepted the push
        success: bool,
    },
    /// Sending/delivery report for a pushed message
    DeliveryStatus {
        /// Remote device
        device: BluetoothAddress,
        /// Message handle
        handle: String,
        /// Report type
        kind: EventType,
    },
    /// Message downloaded and stored
    MessageReceived {
        /// Remote device
        device: BluetoothAddress,
        /// Store id
        record_id: u64,
        /// Stored record
        record: MessageRecord,
    },
    /// Status change answered
    MessageStatus {
        /// Remote device
        device: BluetoothAddress,
        /// Message handle
        handle: String,
        /// Requested status
        status: MessageStatus,
        /// Whether the server accepted it
        success: bool,
    },
}

/// Publishes every notification as a [`ClientEvent`] on a broadcast channel.
///
/// Sends with no live subscribers are dropped silently.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: broadcast::Sender<ClientEvent>,
}

impl ChannelObserver {
    /// Create the observer and a first subscriber
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ClientEvent>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Add a subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl StateObserver for ChannelObserver {
    fn on_state_changed(
        &mut self,
        device: BluetoothAddress,
        previous: ConnectionState,
        next: ConnectionState,
    ) {
        self.publish(ClientEvent::StateChanged {
            device,
            previous,
            next,
        });
    }

    fn on_event_report(&mut self, device: BluetoothAddress, report: &EventReport) {
        self.publish(ClientEvent::EventReport {
            device,
            report: report.clone(),
        });
    }

    fn on_message_sent(&mut self, device: BluetoothAddress, handle: Option<&str>, success: bool) {
        self.publish(ClientEvent::MessageSent {
            device,
            handle: handle.map(str::to_string),
            success,
        });
    }

    fn on_delivery_status(&mut self, device: BluetoothAddress, handle: &str, event: EventType) {
        self.publish(ClientEvent::DeliveryStatus {
            device,
            handle: handle.to_string(),
            kind: event,
        });
    }

    fn on_message_received(&mut self, device: BluetoothAddress, record_id: u64, record: &MessageRecord) {
        self.publish(ClientEvent::MessageReceived {
            device,
            record_id,
            record: record.clone(),
        });
    }

    fn on_message_status(
        &mut self,
        device: BluetoothAddress,
        handle: &str,
        status: MessageStatus,
        success: bool,
    ) {
        self.publish(ClientEvent::MessageStatus {
            device,
            handle: handle.to_string(),
            status,
            success,
        });
    }
}
