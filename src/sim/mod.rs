//! Loopback MAS.
//!
//! [`LoopbackServer`] keeps a small message store and answers requests the
//! way a phone's MAS would, after a configurable latency. Its
//! [`LoopbackClient`] plugs into [`ConnectionHandle::connect`] as the session
//! client, which makes it useful for the CLI, for host integration tests and
//! for exercising the connection without a radio.
//!
//! [`ConnectionHandle::connect`]: crate::session::ConnectionHandle::connect

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::protocol::{
    Bmessage, EventReport, EventType, Folder, MessageListingEntry, MessageStatus, Operation,
    Request, RequestId, Response, SdpMasRecord,
};
use crate::session::{EventSink, SessionClient};

/// OBEX "Forbidden"
const RESPONSE_FORBIDDEN: u8 = 0xC3;
/// OBEX "Not Found"
const RESPONSE_NOT_FOUND: u8 = 0xC4;

/// How the loopback server behaves
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Delay before every answer
    pub latency: Duration,
    /// Post the SDP record and establish the session on client creation
    pub auto_establish: bool,
    /// Fail SDP instead of establishing
    pub sdp_fails: bool,
    /// Answer `shutdown` with a disconnect
    pub acknowledge_shutdown: bool,
    /// Refuse every push
    pub reject_pushes: bool,
    /// Record advertised during SDP
    pub record: SdpMasRecord,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(20),
            auto_establish: true,
            sdp_fails: false,
            acknowledge_shutdown: true,
            reject_pushes: false,
            record: SdpMasRecord {
                mas_instance_id: 0,
                l2cap_psm: Some(0x1029),
                rfcomm_channel: 4,
                profile_version: 0x0104,
                supported_features: 0x007F,
                supported_message_types: 0x0F,
                service_name: "SMS/MMS".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct ServerState {
    folders: HashMap<Folder, Vec<(String, Bmessage)>>,
    next_handle: u64,
    submitted: Vec<Request>,
    aborted: HashSet<RequestId>,
    notifications: bool,
    shutdowns: usize,
    closed: bool,
    sink: Option<EventSink>,
}

impl ServerState {
    fn allocate_handle(&mut self) -> String {
        self.next_handle += 1;
        format!("{:016X}", 0x0400_0000_0000_0000_u64 + self.next_handle)
    }

    fn find(&self, handle: &str) -> Option<(Folder, usize)> {
        self.folders.iter().find_map(|(folder, messages)| {
            messages
                .iter()
                .position(|(h, _)| h == handle)
                .map(|index| (*folder, index))
        })
    }

    fn listing(&self, folder: Folder, offset: u16, count: u16) -> Vec<MessageListingEntry> {
        self.folders
            .get(&folder)
            .map(|messages| {
                messages
                    .iter()
                    .skip(usize::from(offset))
                    .take(usize::from(count))
                    .map(|(handle, message)| listing_entry(handle, message))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn listing_entry(handle: &str, message: &Bmessage) -> MessageListingEntry {
    let mut entry = MessageListingEntry::new(handle, message.kind());
    entry.read = message.is_read();
    if let Some(originator) = message.originator() {
        entry = entry.with_sender(originator.address.as_str());
    }
    if let Some(recipient) = message.recipients().first() {
        entry = entry.with_recipient(recipient.address.as_str());
    }
    entry
}

/// A simulated MAS; clones share the same server.
#[derive(Clone, Default)]
pub struct LoopbackServer {
    state: Arc<Mutex<ServerState>>,
    options: LoopbackOptions,
}

impl LoopbackServer {
    /// Empty server
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            state: Arc::default(),
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Builder form of [`add_message`](Self::add_message)
    pub fn with_message(self, folder: Folder, message: Bmessage) -> Self {
        self.add_message(folder, message);
        self
    }

    /// File `message` under `folder`, returning its handle
    pub fn add_message(&self, folder: Folder, message: Bmessage) -> String {
        let mut state = self.lock();
        let handle = state.allocate_handle();
        state
            .folders
            .entry(folder)
            .or_default()
            .push((handle.clone(), message));
        handle
    }

    /// A new message arrives in the Inbox; reported to a registered client
    pub fn deliver_incoming(&self, message: Bmessage) -> String {
        let kind = message.kind();
        let handle = self.add_message(Folder::Inbox, message);
        let mut report =
            EventReport::new(EventType::NewMessage, handle.clone()).in_folder(Folder::Inbox);
        report.message_type = Some(kind);
        self.report(report);
        handle
    }

    /// Messages in `folder`, in filing order
    pub fn messages(&self, folder: Folder) -> Vec<(String, Bmessage)> {
        self.lock().folders.get(&folder).cloned().unwrap_or_default()
    }

    /// Every request received, in order
    pub fn submitted(&self) -> Vec<Request> {
        self.lock().submitted.clone()
    }

    /// Requests the client aborted
    pub fn aborted(&self) -> Vec<RequestId> {
        let mut aborted: Vec<_> = self.lock().aborted.iter().copied().collect();
        aborted.sort();
        aborted
    }

    /// Number of shutdown calls
    pub fn shutdowns(&self) -> usize {
        self.lock().shutdowns
    }

    /// Check if event reports are enabled
    pub fn notifications_registered(&self) -> bool {
        self.lock().notifications
    }

    /// Drop the session from the server side
    pub fn drop_session(&self) {
        let sink = {
            let mut state = self.lock();
            state.closed = true;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            self.after_latency(move || {
                sink.disconnected();
            });
        }
    }

    /// Session client bound to this server, reporting through `sink`
    pub fn client(&self, sink: EventSink) -> LoopbackClient {
        {
            let mut state = self.lock();
            state.sink = Some(sink.clone());
            state.closed = false;
        }

        if self.options.auto_establish {
            let options = self.options.clone();
            let events = sink.clone();
            self.after_latency(move || {
                if options.sdp_fails {
                    events.sdp_failed();
                } else {
                    events.sdp_record(options.record);
                    events.established();
                }
            });
        }

        LoopbackClient {
            server: self.clone(),
            sink,
        }
    }

    fn report(&self, report: EventReport) {
        let sink = {
            let state = self.lock();
            if !state.notifications || state.closed {
                return;
            }
            state.sink.clone()
        };
        if let Some(sink) = sink {
            self.after_latency(move || {
                sink.notification(Some(report));
            });
        }
    }

    fn after_latency(&self, f: impl FnOnce() + Send + 'static) {
        let latency = self.options.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            f();
        });
    }

    fn answer(&self, request: &Request) -> (Response, Option<String>) {
        let mut state = self.lock();
        match request.operation() {
            Operation::GetMessagesListing {
                folder,
                max_list_count,
                offset,
                ..
            } => (
                Response::Listing(state.listing(*folder, *offset, *max_list_count)),
                None,
            ),
            Operation::GetMessagesListingForOwnNumber(search) => {
                let listing = search
                    .current_folder()
                    .map(|folder| state.listing(folder, search.offset(), search.batch_size()))
                    .unwrap_or_default();
                (Response::Listing(listing), None)
            },
            Operation::SetNotificationRegistration { enable } => {
                state.notifications = *enable;
                (Response::Ack, None)
            },
            Operation::PushMessage {
                message,
                transparent,
                ..
            } => {
                if self.options.reject_pushes {
                    return (Response::Failed(RESPONSE_FORBIDDEN), None);
                }
                let handle = state.allocate_handle();
                if !transparent {
                    state
                        .folders
                        .entry(Folder::Sent)
                        .or_default()
                        .push((handle.clone(), message.clone()));
                }
                (
                    Response::Pushed {
                        handle: handle.clone(),
                    },
                    Some(handle),
                )
            },
            Operation::SetMessageStatus { handle, status } => {
                let Some((folder, index)) = state.find(handle) else {
                    return (Response::Failed(RESPONSE_NOT_FOUND), None);
                };
                let target = match status {
                    MessageStatus::Deleted => Some(Folder::Deleted),
                    MessageStatus::Undeleted if folder == Folder::Deleted => Some(Folder::Inbox),
                    _ => None,
                };
                if let Some(messages) = state.folders.get_mut(&folder) {
                    let (handle, message) = messages.remove(index);
                    let message = match status {
                        MessageStatus::Read => message.with_read(true),
                        MessageStatus::Unread => message.with_read(false),
                        _ => message,
                    };
                    let folder = target.unwrap_or(folder);
                    state.folders.entry(folder).or_default().insert(
                        if target.is_some() { 0 } else { index },
                        (handle, message),
                    );
                }
                (Response::Ack, None)
            },
            Operation::GetMessage { handle, .. } => match state.find(handle) {
                Some((folder, index)) => (
                    Response::Message(state.folders[&folder][index].1.clone()),
                    None,
                ),
                None => (Response::Failed(RESPONSE_NOT_FOUND), None),
            },
        }
    }
}

/// [`SessionClient`] backed by a [`LoopbackServer`]
pub struct LoopbackClient {
    server: LoopbackServer,
    sink: EventSink,
}

impl LoopbackClient {
    /// The server this client talks to
    pub fn server(&self) -> &LoopbackServer {
        &self.server
    }
}

impl SessionClient for LoopbackClient {
    fn submit(&mut self, mut request: Request) -> bool {
        {
            let mut state = self.server.lock();
            if state.closed {
                return false;
            }
            state.submitted.push(request.clone());
        }

        let (response, pushed) = self.server.answer(&request);
        let id = request.id();
        request.resolve(response);

        let sink = self.sink.clone();
        let server = self.server.clone();
        self.server.after_latency(move || {
            if server.lock().aborted.contains(&id) {
                return;
            }
            sink.request_completed(request);
            if let Some(handle) = pushed {
                server.report(EventReport::new(EventType::SendingSuccess, handle.clone()).in_folder(Folder::Sent));
                server.report(EventReport::new(EventType::DeliverySuccess, handle).in_folder(Folder::Sent));
            }
        });
        true
    }

    fn abort(&mut self, id: RequestId) {
        self.server.lock().aborted.insert(id);
    }

    fn shutdown(&mut self) {
        {
            let mut state = self.server.lock();
            state.shutdowns += 1;
            state.closed = true;
        }
        if self.server.options.acknowledge_shutdown {
            let sink = self.sink.clone();
            self.server.after_latency(move || {
                sink.disconnected();
            });
        }
    }

    fn cleanup(&mut self) {
        let mut state = self.server.lock();
        state.closed = true;
        state.notifications = false;
    }
}
