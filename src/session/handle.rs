//! Host-facing connection handle.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;
use uuid::Uuid;

use super::machine::{Command, ConnectionSnapshot, ConnectionStateMachine, Input};
use super::timers::Timers;
use super::{
    ConnectionState, MessageStore, RequestCoordinator, SessionClient, SessionEvent,
    StateObserver,
};
use crate::config::ConnectionConfig;
use crate::error::{MapClientError, Result};
use crate::protocol::{
    normalize_phone_number, BluetoothAddress, Bmessage, BmessageType, EventReport, Folder,
    MessageStatus, Recipient, Request, SdpMasRecord,
};

/// Options for [`ConnectionHandle::send_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Message type to push
    pub kind: BmessageType,
    /// Ask the server to retry failed sends
    pub retry: bool,
    /// Do not keep a copy in the server's Sent folder
    pub transparent: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            kind: BmessageType::SmsGsm,
            retry: false,
            transparent: false,
        }
    }
}

/// Where a session client posts its events.
///
/// Holds only a weak reference to the mailbox: once every
/// [`ConnectionHandle`] is gone, posting fails and the connection winds down.
#[derive(Clone)]
pub struct EventSink {
    mailbox: mpsc::WeakUnboundedSender<Input>,
}

impl EventSink {
    /// Post a session event; returns false once the connection is gone
    pub fn post(&self, event: SessionEvent) -> bool {
        self.mailbox
            .upgrade()
            .is_some_and(|tx| tx.send(Input::Session(event)).is_ok())
    }

    /// SDP lookup produced a MAS record
    pub fn sdp_record(&self, record: SdpMasRecord) -> bool {
        self.post(SessionEvent::SdpRecord(record))
    }

    /// SDP lookup failed
    pub fn sdp_failed(&self) -> bool {
        self.post(SessionEvent::SdpFailed)
    }

    /// Session established
    pub fn established(&self) -> bool {
        self.post(SessionEvent::Established)
    }

    /// Session gone
    pub fn disconnected(&self) -> bool {
        self.post(SessionEvent::Disconnected)
    }

    /// A submitted request finished
    pub fn request_completed(&self, request: Request) -> bool {
        self.post(SessionEvent::RequestCompleted(request))
    }

    /// Event report received; `None` for an empty one
    pub fn notification(&self, report: Option<EventReport>) -> bool {
        self.post(SessionEvent::Notification(report))
    }
}

/// Handle to one MAS connection.
///
/// The connection runs on its own task; every method here either reads the
/// published state or posts to the connection's mailbox, so none of them
/// block. Clones address the same connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    device: BluetoothAddress,
    mailbox: mpsc::UnboundedSender<Input>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Start connecting to `device`.
    ///
    /// `make_client` receives the [`EventSink`] the session client reports
    /// through. The connection starts in Connecting.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn connect<C, F>(
        device: BluetoothAddress,
        config: ConnectionConfig,
        make_client: F,
        store: impl MessageStore + 'static,
        observer: impl StateObserver + 'static,
    ) -> Self
    where
        C: SessionClient + 'static,
        F: FnOnce(EventSink) -> C,
    {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let client = make_client(EventSink {
            mailbox: tx.downgrade(),
        });
        let machine = ConnectionStateMachine::new(
            device,
            config,
            RequestCoordinator::new(Box::new(client)),
            Box::new(store),
            Box::new(observer),
            Timers::new(tx.downgrade()),
            state_tx,
        );

        let span = tracing::info_span!("connection", %device, id = %id);
        tokio::spawn(machine.run(rx).instrument(span));
        tracing::debug!(%device, id = %id, "connection task spawned");

        Self {
            id,
            device,
            mailbox: tx,
            state_rx,
        }
    }

    /// Connection id, unique per `connect` call
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote device
    pub fn device(&self) -> BluetoothAddress {
        self.device
    }

    /// Sink for session events, for transports wired up after `connect`
    pub fn events(&self) -> EventSink {
        EventSink {
            mailbox: self.mailbox.downgrade(),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Request disconnection.
    ///
    /// Valid in Connecting and Connected; the session is shut down and the
    /// connection reaches Disconnected on acknowledgement or deadline.
    pub fn disconnect(&self) -> Result<()> {
        let state = self.state();
        if !state.can_disconnect() {
            return Err(MapClientError::InvalidState(state));
        }
        self.command(Command::Disconnect)
    }

    /// Send a message to `recipients`.
    ///
    /// Recipients are `tel:`/`sms:`/`mailto:` URIs or bare phone numbers.
    /// `Ok` means the push was queued; its outcome is reported to the
    /// observer when the server answers.
    pub fn send_message(&self, recipients: &[&str], body: &str, options: SendOptions) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(MapClientError::NotConnected);
        }
        if recipients.is_empty() {
            return Err(MapClientError::EmptyMessage);
        }

        let mut message = Bmessage::new(options.kind, Folder::Sent)
            .with_body(body)
            .with_read(true);
        for recipient in recipients {
            message = message.with_recipient(parse_recipient(recipient)?);
        }

        self.command(Command::SendMessage {
            message,
            retry: options.retry,
            transparent: options.transparent,
        })
    }

    /// Change the status of a remote message.
    ///
    /// `Ok` means the request was queued, not that the server applied it.
    pub fn set_message_status(&self, handle: &str, status: MessageStatus) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(MapClientError::NotConnected);
        }
        self.command(Command::SetMessageStatus {
            handle: handle.to_string(),
            status,
        })
    }

    /// Stop the connection task. Timers are cancelled and, unless already
    /// disconnected, the session client is cleaned up.
    pub fn quit(&self) {
        let _ = self.command(Command::Quit);
    }

    /// Point-in-time view of the connection
    pub async fn snapshot(&self) -> Result<ConnectionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| MapClientError::MailboxClosed)
    }

    /// Wait until everything posted before this call has been handled
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Flush(tx))?;
        rx.await.map_err(|_| MapClientError::MailboxClosed)
    }

    /// Wait until the connection reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| MapClientError::MailboxClosed)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.mailbox
            .send(Input::Command(command))
            .map_err(|_| MapClientError::MailboxClosed)
    }
}

fn parse_recipient(raw: &str) -> Result<Recipient> {
    let raw = raw.trim();
    if raw.contains(':') {
        return Recipient::from_uri(raw);
    }
    if normalize_phone_number(raw).is_empty() {
        return Err(MapClientError::InvalidRecipient(raw.to_string()));
    }
    Ok(Recipient::phone(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Address;

    #[test]
    fn test_parse_recipient() {
        assert_eq!(
            parse_recipient("tel:555-1212").unwrap().address,
            Address::Phone("5551212".to_string())
        );
        assert_eq!(
            parse_recipient(" +1 (555) 1212 ").unwrap().address,
            Address::Phone("+15551212".to_string())
        );
        assert_eq!(
            parse_recipient("mailto:a@example.com").unwrap().address,
            Address::Email("a@example.com".to_string())
        );
        assert!(matches!(
            parse_recipient("nobody"),
            Err(MapClientError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_default_send_options() {
        let options = SendOptions::default();
        assert_eq!(options.kind, BmessageType::SmsGsm);
        assert!(!options.retry);
        assert!(!options.transparent);
    }

    #[tokio::test]
    async fn test_sink_fails_after_handles_drop() {
        let (tx, rx) = mpsc::unbounded_channel::<Input>();
        let sink = EventSink {
            mailbox: tx.downgrade(),
        };
        assert!(sink.established());
        drop(tx);
        drop(rx);
        assert!(!sink.established());
    }
}
