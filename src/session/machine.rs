//! The connection state machine.
//!
//! Everything here runs on the connection task. [`ConnectionStateMachine::handle`]
//! is the single transition function: it takes one mailbox [`Input`], reacts
//! according to the current state and performs at most one transition chain.

use std::collections::HashSet;
use std::mem;
use std::ops::ControlFlow;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use super::timers::{TimerSlot, Timeout, Timers};
use super::{
    ConnectionState, MessageRecord, MessageStore, RequestCoordinator, SessionEvent,
    StateObserver, SubmitError,
};
use crate::config::ConnectionConfig;
use crate::protocol::{
    BluetoothAddress, Bmessage, EventReport, EventType, Folder, MapFeature, MessageListingEntry,
    MessageStatus, Operation, OwnNumberSearch, Request, RequestId, RequestKind, SdpMasRecord,
};

/// Mailbox message
#[derive(Debug)]
pub(crate) enum Input {
    Session(SessionEvent),
    Command(Command),
    Timer { timeout: Timeout, token: u64 },
}

/// Host API calls, routed through the mailbox
#[derive(Debug)]
pub(crate) enum Command {
    Disconnect,
    SendMessage {
        message: Bmessage,
        retry: bool,
        transparent: bool,
    },
    SetMessageStatus {
        handle: String,
        status: MessageStatus,
    },
    Snapshot(oneshot::Sender<ConnectionSnapshot>),
    Flush(oneshot::Sender<()>),
    Quit,
}

/// Point-in-time view of a connection, for hosts and diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    /// Remote device
    pub device: BluetoothAddress,
    /// Current state
    pub state: ConnectionState,
    /// SDP record of the current attempt
    pub sdp_record: Option<SdpMasRecord>,
    /// Discovered own number
    pub own_number: Option<String>,
    /// An own-number request is being tracked
    pub own_number_search_pending: bool,
    /// The own-number timeout is armed
    pub own_number_timer_armed: bool,
    /// The disconnect deadline is armed
    pub disconnect_timer_armed: bool,
    /// Own-number discovery has concluded on this connection
    pub discovery_concluded: bool,
    /// Next-stage requests have been issued
    pub next_stage_started: bool,
    /// Outstanding requests in submission order
    pub outstanding: Vec<RequestId>,
    /// Transitions performed so far
    pub transitions: u64,
}

#[derive(Debug, Default)]
struct Discovery {
    /// The own-number request currently tracked; completions for any other
    /// identity are stale
    request: Option<RequestId>,
    concluded: bool,
    own_number: Option<String>,
}

pub(crate) struct ConnectionStateMachine {
    device: BluetoothAddress,
    config: ConnectionConfig,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    coordinator: RequestCoordinator,
    store: Box<dyn MessageStore>,
    observer: Box<dyn StateObserver>,
    timers: Timers,
    sdp_record: Option<SdpMasRecord>,
    discovery: Discovery,
    next_stage_started: bool,
    /// Handles already downloaded or being downloaded
    known_handles: HashSet<String>,
    /// Handles assigned to pushes made on this connection
    pushed_handles: HashSet<String>,
    transport_failed: bool,
    transitions: u64,
}

impl ConnectionStateMachine {
    pub(crate) fn new(
        device: BluetoothAddress,
        config: ConnectionConfig,
        coordinator: RequestCoordinator,
        store: Box<dyn MessageStore>,
        observer: Box<dyn StateObserver>,
        timers: Timers,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            device,
            config,
            state: ConnectionState::Disconnected,
            state_tx,
            coordinator,
            store,
            observer,
            timers,
            sdp_record: None,
            discovery: Discovery::default(),
            next_stage_started: false,
            known_handles: HashSet::new(),
            pushed_handles: HashSet::new(),
            transport_failed: false,
            transitions: 0,
        }
    }

    /// Drive the machine until quit or until every sender is gone
    pub(crate) async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Input>) {
        self.start();
        while let Some(input) = mailbox.recv().await {
            if self.handle(input).is_break() {
                break;
            }
        }
        self.teardown();
    }

    /// Enter Connecting
    pub(crate) fn start(&mut self) {
        self.transition_to(ConnectionState::Connecting);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// Process one mailbox input
    pub(crate) fn handle(&mut self, input: Input) -> ControlFlow<()> {
        let next = match input {
            Input::Command(Command::Quit) => return ControlFlow::Break(()),
            Input::Command(Command::Snapshot(reply)) => {
                let _ = reply.send(self.snapshot());
                None
            },
            Input::Command(Command::Flush(reply)) => {
                let _ = reply.send(());
                None
            },
            Input::Timer { timeout, token } => {
                if self.timers.fire(timeout, token) {
                    self.on_timeout(timeout)
                } else {
                    None
                }
            },
            Input::Session(event) => self.on_session_event(event),
            Input::Command(command) => self.on_command(command),
        };

        if let Some(next) = next {
            self.transition_to(next);
        }
        if mem::take(&mut self.transport_failed) && self.is_live() {
            tracing::warn!(device = %self.device, "submission rejected, treating session as lost");
            self.transition_to(ConnectionState::Disconnected);
        }
        ControlFlow::Continue(())
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    pub(crate) fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            device: self.device,
            state: self.state,
            sdp_record: self.sdp_record.clone(),
            own_number: self.discovery.own_number.clone(),
            own_number_search_pending: self.discovery.request.is_some(),
            own_number_timer_armed: self.timers.is_armed(TimerSlot::OwnNumberSearch),
            disconnect_timer_armed: self.timers.is_armed(TimerSlot::Disconnect),
            discovery_concluded: self.discovery.concluded,
            next_stage_started: self.next_stage_started,
            outstanding: self.coordinator.outstanding(),
            transitions: self.transitions,
        }
    }

    fn teardown(&mut self) {
        tracing::debug!(device = %self.device, state = ?self.state, "connection task stopping");
        self.timers.cancel_all();
        if self.state != ConnectionState::Disconnected {
            self.coordinator.cleanup();
        }
    }

    // ---
    // Transitions

    fn transition_to(&mut self, next: ConnectionState) {
        let mut target = Some(next);
        while let Some(next) = target.take() {
            let previous = self.state;
            if previous == next {
                continue;
            }

            self.exit(previous);
            self.state = next;
            self.transitions += 1;
            self.state_tx.send_replace(next);
            tracing::info!(device = %self.device, ?previous, ?next, "state transition");
            self.observer.on_state_changed(self.device, previous, next);

            self.enter(next);
            if mem::take(&mut self.transport_failed) && self.is_live() {
                target = Some(ConnectionState::Disconnected);
            }
        }
    }

    fn exit(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => {
                self.timers.cancel(TimerSlot::Connect);
            },
            ConnectionState::Connected => {
                self.timers.cancel(TimerSlot::OwnNumberSearch);
            },
            ConnectionState::Disconnecting => {
                self.timers.cancel(TimerSlot::Disconnect);
            },
            ConnectionState::Disconnected => {},
        }
    }

    fn enter(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => {
                self.timers
                    .arm(Timeout::Connect, self.config.connect_timeout());
            },
            ConnectionState::Connected => self.begin_discovery(),
            ConnectionState::Disconnecting => {
                self.coordinator.shutdown();
                self.timers
                    .arm(Timeout::Disconnect, self.config.disconnect_timeout());
            },
            ConnectionState::Disconnected => self.release(),
        }
    }

    fn release(&mut self) {
        self.timers.cancel_all();
        self.coordinator.cleanup();
        self.sdp_record = None;
        self.discovery = Discovery::default();
        self.next_stage_started = false;
        self.known_handles.clear();
        self.pushed_handles.clear();
    }

    // ---
    // Event handling

    fn on_timeout(&mut self, timeout: Timeout) -> Option<ConnectionState> {
        match (self.state, timeout) {
            (ConnectionState::Connecting, Timeout::Connect) => {
                tracing::warn!(device = %self.device, "connect timed out");
                Some(ConnectionState::Disconnecting)
            },
            (ConnectionState::Connected, Timeout::OwnNumberSearch(id)) => {
                self.on_own_number_timeout(id);
                None
            },
            (ConnectionState::Disconnecting, Timeout::Disconnect) => {
                tracing::warn!(device = %self.device, "disconnect not acknowledged, forcing");
                Some(ConnectionState::Disconnected)
            },
            (state, timeout) => {
                tracing::debug!(?state, ?timeout, "timeout ignored");
                None
            },
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) -> Option<ConnectionState> {
        match (self.state, event) {
            (ConnectionState::Connecting, SessionEvent::SdpRecord(record)) => {
                if self.sdp_record.is_some() {
                    tracing::debug!("duplicate SDP record ignored");
                } else {
                    tracing::info!(
                        device = %self.device,
                        instance = record.mas_instance_id,
                        features = record.supported_features,
                        "MAS record received"
                    );
                    self.sdp_record = Some(record);
                }
                None
            },
            (ConnectionState::Connecting, SessionEvent::SdpFailed) => {
                tracing::warn!(device = %self.device, "SDP lookup failed");
                Some(ConnectionState::Disconnected)
            },
            (ConnectionState::Connecting, SessionEvent::Established) => {
                Some(ConnectionState::Connected)
            },
            (
                ConnectionState::Connecting | ConnectionState::Connected,
                SessionEvent::Disconnected,
            ) => {
                tracing::info!(device = %self.device, "session lost");
                Some(ConnectionState::Disconnected)
            },
            (ConnectionState::Disconnecting, SessionEvent::Disconnected) => {
                tracing::debug!(device = %self.device, "shutdown acknowledged");
                Some(ConnectionState::Disconnected)
            },
            (ConnectionState::Connected, SessionEvent::RequestCompleted(request)) => {
                self.on_request_completed(request);
                None
            },
            (ConnectionState::Connected, SessionEvent::Notification(report)) => {
                self.on_notification(report);
                None
            },
            (state, event) => {
                tracing::debug!(?state, ?event, "session event ignored");
                None
            },
        }
    }

    fn on_command(&mut self, command: Command) -> Option<ConnectionState> {
        match (self.state, command) {
            (
                ConnectionState::Connecting | ConnectionState::Connected,
                Command::Disconnect,
            ) => Some(ConnectionState::Disconnecting),
            (
                ConnectionState::Connected,
                Command::SendMessage {
                    message,
                    retry,
                    transparent,
                },
            ) => {
                self.submit(Operation::PushMessage {
                    folder: Folder::Sent,
                    message,
                    retry,
                    transparent,
                    handle: None,
                });
                None
            },
            (ConnectionState::Connected, Command::SetMessageStatus { handle, status }) => {
                self.submit(Operation::SetMessageStatus { handle, status });
                None
            },
            (state, Command::SendMessage { .. }) => {
                tracing::warn!(?state, "outbound message dropped, not connected");
                self.observer.on_message_sent(self.device, None, false);
                None
            },
            (state, command) => {
                tracing::debug!(?state, ?command, "command ignored");
                None
            },
        }
    }

    fn on_request_completed(&mut self, request: Request) {
        let id = request.id();
        if !self.coordinator.complete(&request) {
            tracing::debug!("{id}: stale completion dropped");
            return;
        }

        if request.kind() == RequestKind::GetMessagesListingForOwnNumber {
            self.on_own_number_completed(request);
            return;
        }

        let success = request.is_success();
        match request.operation() {
            Operation::GetMessagesListing { folder, listing, .. } => {
                if success {
                    tracing::debug!("{id}: {folder} listing with {} entries", listing.len());
                    self.sync_listing(listing);
                } else {
                    tracing::warn!("{id}: {folder} listing failed: {:?}", request.status());
                }
            },
            Operation::GetMessage { handle, message } => match (success, message) {
                (true, Some(message)) => self.store_downloaded(handle, message),
                _ => {
                    tracing::warn!("{id}: download of {handle} failed: {:?}", request.status());
                    self.known_handles.remove(handle);
                },
            },
            Operation::PushMessage {
                message, handle, ..
            } => match (success, handle) {
                (true, Some(handle)) => self.store_sent(handle, message),
                _ => {
                    tracing::warn!("{id}: push failed: {:?}", request.status());
                    self.observer.on_message_sent(self.device, None, false);
                },
            },
            Operation::SetNotificationRegistration { enable } => {
                if success {
                    tracing::debug!("{id}: notification registration {enable} accepted");
                } else {
                    tracing::warn!("{id}: notification registration failed: {:?}", request.status());
                }
            },
            Operation::SetMessageStatus { handle, status } => {
                self.observer
                    .on_message_status(self.device, handle, *status, success);
            },
            Operation::GetMessagesListingForOwnNumber(_) => {},
        }
    }

    fn on_notification(&mut self, report: Option<EventReport>) {
        let Some(report) = report else {
            tracing::debug!("empty event report");
            return;
        };

        tracing::debug!(kind = ?report.kind, handle = ?report.handle, "event report");
        self.observer.on_event_report(self.device, &report);

        let Some(handle) = report.handle.as_deref() else {
            return;
        };
        match report.kind {
            EventType::NewMessage if report.is_new_inbox_message() => {
                self.download(handle);
            },
            EventType::SendingSuccess
            | EventType::SendingFailure
            | EventType::DeliverySuccess
            | EventType::DeliveryFailure => {
                if self.pushed_handles.contains(handle) {
                    self.observer
                        .on_delivery_status(self.device, handle, report.kind);
                }
            },
            EventType::MessageDeleted => {
                self.known_handles.remove(handle);
            },
            _ => {},
        }
    }

    // ---
    // Own-number discovery

    fn begin_discovery(&mut self) {
        let search = OwnNumberSearch::new(self.config.own_number_batch_size);
        if let Some(id) = self.submit(Operation::GetMessagesListingForOwnNumber(search)) {
            self.discovery.request = Some(id);
            self.timers.arm(
                Timeout::OwnNumberSearch(id),
                self.config.own_number_timeout(),
            );
        }
    }

    fn on_own_number_completed(&mut self, request: Request) {
        let id = request.id();
        if self.discovery.request != Some(id) {
            tracing::debug!("{id}: own number completion no longer tracked");
            return;
        }

        if !request.is_success() {
            tracing::warn!("{id}: own number search failed: {:?}", request.status());
            self.timers.cancel(TimerSlot::OwnNumberSearch);
            self.finish_discovery(None);
            return;
        }

        let Some(search) = request.own_number_search() else {
            return;
        };
        if search.is_search_completed() {
            let number = search.own_number().map(str::to_string);
            self.timers.cancel(TimerSlot::OwnNumberSearch);
            self.finish_discovery(number);
        } else {
            tracing::debug!(
                "{id}: own number search continues in {:?} at offset {}",
                search.current_folder(),
                search.offset()
            );
            if let Err(SubmitError::Rejected) = self.coordinator.resubmit(request) {
                self.transport_failed = true;
            }
        }
    }

    fn on_own_number_timeout(&mut self, id: RequestId) {
        if self.discovery.request != Some(id) {
            return;
        }
        tracing::warn!("{id}: own number search timed out");
        self.coordinator.abort(id);
        self.finish_discovery(None);
    }

    fn finish_discovery(&mut self, own_number: Option<String>) {
        tracing::info!(device = %self.device, own_number = ?own_number, "own number discovery finished");
        self.discovery.request = None;
        self.discovery.concluded = true;
        self.discovery.own_number = own_number;
        self.start_next_stage();
    }

    fn start_next_stage(&mut self) {
        if mem::replace(&mut self.next_stage_started, true) {
            tracing::debug!("next stage already started");
            return;
        }

        let advertised = self
            .sdp_record
            .as_ref()
            .map_or(true, |record| record.supports(MapFeature::NotificationRegistration));
        if self.config.notification_registration && advertised {
            self.submit(Operation::SetNotificationRegistration { enable: true });
        } else if !advertised {
            tracing::info!(device = %self.device, "server does not advertise notification registration");
        }
        for folder in [Folder::Inbox, Folder::Sent] {
            if self.transport_failed {
                return;
            }
            self.submit(Operation::GetMessagesListing {
                folder,
                max_list_count: self.config.listing_batch_size,
                offset: 0,
                listing: Vec::new(),
            });
        }
    }

    // ---
    // Folder sync and outbound messages

    fn sync_listing(&mut self, listing: &[MessageListingEntry]) {
        if !self.config.download_on_listing {
            return;
        }
        for entry in listing {
            if self.transport_failed {
                return;
            }
            self.download(&entry.handle);
        }
    }

    fn download(&mut self, handle: &str) {
        if self.known_handles.insert(handle.to_string()) {
            self.submit(Operation::GetMessage {
                handle: handle.to_string(),
                message: None,
            });
        }
    }

    fn store_downloaded(&mut self, handle: &str, message: &Bmessage) {
        let record =
            MessageRecord::downloaded(handle, message, self.discovery.own_number.as_deref());
        match self.store.insert(record.clone()) {
            Ok(record_id) => {
                self.observer
                    .on_message_received(self.device, record_id, &record);
            },
            Err(e) => tracing::warn!("failed to store message {handle}: {e}"),
        }
    }

    fn store_sent(&mut self, handle: &str, message: &Bmessage) {
        if let Err(e) = self.store.insert(MessageRecord::sent(handle, message)) {
            tracing::warn!("failed to store sent message {handle}: {e}");
        }
        self.pushed_handles.insert(handle.to_string());
        self.known_handles.insert(handle.to_string());
        self.observer.on_message_sent(self.device, Some(handle), true);
    }

    fn submit(&mut self, op: Operation) -> Option<RequestId> {
        match self.coordinator.submit(op) {
            Ok(id) => Some(id),
            Err(SubmitError::Busy(_)) => None,
            Err(SubmitError::Rejected) => {
                self.transport_failed = true;
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::protocol::{BmessageType, Recipient, Response};
    use crate::session::{MemoryStore, SessionClient};

    #[derive(Default)]
    struct Log {
        submitted: Vec<Request>,
        aborted: Vec<RequestId>,
        shutdowns: usize,
        cleanups: usize,
        reject: bool,
    }

    #[derive(Clone, Default)]
    struct FakeClient(Arc<Mutex<Log>>);

    impl SessionClient for FakeClient {
        fn submit(&mut self, request: Request) -> bool {
            let mut log = self.0.lock().unwrap();
            if log.reject {
                return false;
            }
            log.submitted.push(request);
            true
        }

        fn abort(&mut self, id: RequestId) {
            self.0.lock().unwrap().aborted.push(id);
        }

        fn shutdown(&mut self) {
            self.0.lock().unwrap().shutdowns += 1;
        }

        fn cleanup(&mut self) {
            self.0.lock().unwrap().cleanups += 1;
        }
    }

    impl FakeClient {
        fn count(&self, kind: RequestKind) -> usize {
            self.0
                .lock()
                .unwrap()
                .submitted
                .iter()
                .filter(|r| r.kind() == kind)
                .count()
        }

        fn last(&self, kind: RequestKind) -> Request {
            self.0
                .lock()
                .unwrap()
                .submitted
                .iter()
                .rev()
                .find(|r| r.kind() == kind)
                .cloned()
                .unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct Transitions(Arc<Mutex<Vec<(ConnectionState, ConnectionState)>>>);

    impl StateObserver for Transitions {
        fn on_state_changed(
            &mut self,
            _device: BluetoothAddress,
            previous: ConnectionState,
            next: ConnectionState,
        ) {
            self.0.lock().unwrap().push((previous, next));
        }
    }

    struct Harness {
        machine: ConnectionStateMachine,
        client: FakeClient,
        store: MemoryStore,
        transitions: Transitions,
        _tx: mpsc::UnboundedSender<Input>,
        rx: mpsc::UnboundedReceiver<Input>,
    }

    impl Harness {
        fn new() -> Self {
            let client = FakeClient::default();
            let store = MemoryStore::new(0);
            let transitions = Transitions::default();
            let (tx, rx) = mpsc::unbounded_channel();
            let (state_tx, _) = watch::channel(ConnectionState::Connecting);
            let mut machine = ConnectionStateMachine::new(
                BluetoothAddress::new([0, 1, 2, 3, 4, 5]),
                ConnectionConfig::default(),
                RequestCoordinator::new(Box::new(client.clone())),
                Box::new(store.clone()),
                Box::new(transitions.clone()),
                Timers::new(tx.downgrade()),
                state_tx,
            );
            machine.start();
            Self {
                machine,
                client,
                store,
                transitions,
                _tx: tx,
                rx,
            }
        }

        fn session(&mut self, event: SessionEvent) {
            let _ = self.machine.handle(Input::Session(event));
        }

        fn command(&mut self, command: Command) {
            let _ = self.machine.handle(Input::Command(command));
        }

        fn connected() -> Self {
            let mut h = Self::new();
            h.session(SessionEvent::Established);
            assert_eq!(h.machine.state(), ConnectionState::Connected);
            h
        }

        /// Wait for the next timer firing and feed it to the machine
        async fn next_timer(&mut self) -> Timeout {
            loop {
                match self.rx.recv().await {
                    Some(Input::Timer { timeout, token }) => {
                        let _ = self.machine.handle(Input::Timer { timeout, token });
                        return timeout;
                    },
                    Some(other) => {
                        let _ = self.machine.handle(other);
                    },
                    None => panic!("mailbox closed"),
                }
            }
        }
    }

    fn own_number_completion(client: &FakeClient, batch: Vec<MessageListingEntry>) -> Request {
        let mut request = client.last(RequestKind::GetMessagesListingForOwnNumber);
        request.resolve(Response::Listing(batch));
        request
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_connecting() {
        let h = Harness::new();
        assert_eq!(h.machine.state(), ConnectionState::Connecting);
        assert_eq!(
            *h.transitions.0.lock().unwrap(),
            vec![(ConnectionState::Disconnected, ConnectionState::Connecting)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sdp_record_retained() {
        let mut h = Harness::new();
        let record = SdpMasRecord {
            mas_instance_id: 1,
            l2cap_psm: None,
            rfcomm_channel: 1,
            profile_version: 0x0104,
            supported_features: 1,
            supported_message_types: 1,
            service_name: "MasRecord".to_string(),
        };
        h.session(SessionEvent::SdpRecord(record.clone()));
        assert_eq!(h.machine.snapshot().sdp_record, Some(record));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_goes_to_disconnecting() {
        let mut h = Harness::new();
        assert_eq!(h.next_timer().await, Timeout::Connect);
        assert_eq!(h.machine.state(), ConnectionState::Disconnecting);
        assert_eq!(h.client.0.lock().unwrap().shutdowns, 1);

        assert_eq!(h.next_timer().await, Timeout::Disconnect);
        assert_eq!(h.machine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sdp_failure_disconnects() {
        let mut h = Harness::new();
        h.session(SessionEvent::SdpFailed);
        assert_eq!(h.machine.state(), ConnectionState::Disconnected);
        assert_eq!(h.client.0.lock().unwrap().cleanups, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_entry_starts_one_search() {
        let h = Harness::connected();
        assert_eq!(h.client.count(RequestKind::GetMessagesListingForOwnNumber), 1);
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 0);
        let snap = h.machine.snapshot();
        assert!(snap.own_number_search_pending);
        assert!(snap.own_number_timer_armed);
        assert!(!snap.next_stage_started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_completion_is_dropped() {
        let mut h = Harness::connected();
        let done = own_number_completion(
            &h.client,
            vec![MessageListingEntry::new("1", BmessageType::SmsGsm).with_sender("555-1234")],
        );
        h.session(SessionEvent::RequestCompleted(done.clone()));
        h.session(SessionEvent::RequestCompleted(done));

        assert_eq!(h.client.count(RequestKind::SetNotificationRegistration), 1);
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 2);
        assert_eq!(h.machine.snapshot().own_number.as_deref(), Some("5551234"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_incomplete_completion_is_dropped() {
        let mut h = Harness::connected();
        let full_batch: Vec<_> = (0..10)
            .map(|i| {
                MessageListingEntry::new(format!("{i:02}"), BmessageType::SmsGsm)
                    .with_recipient("555-0000")
            })
            .collect();
        let round_one = own_number_completion(&h.client, full_batch);
        assert!(!round_one.own_number_search().unwrap().is_search_completed());

        h.session(SessionEvent::RequestCompleted(round_one.clone()));
        assert_eq!(h.client.count(RequestKind::GetMessagesListingForOwnNumber), 2);

        h.session(SessionEvent::RequestCompleted(round_one));
        assert_eq!(h.client.count(RequestKind::GetMessagesListingForOwnNumber), 2);
        let snap = h.machine.snapshot();
        assert_eq!(snap.outstanding.len(), 1);
        assert!(snap.own_number_search_pending);
        assert!(!snap.next_stage_started);

        // the current round still concludes discovery
        let round_two = own_number_completion(
            &h.client,
            vec![MessageListingEntry::new("10", BmessageType::SmsGsm).with_sender("555-1234")],
        );
        h.session(SessionEvent::RequestCompleted(round_two));
        assert_eq!(h.machine.snapshot().own_number.as_deref(), Some("5551234"));
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_skipped_without_feature() {
        let mut h = Harness::new();
        h.session(SessionEvent::SdpRecord(SdpMasRecord {
            mas_instance_id: 1,
            l2cap_psm: None,
            rfcomm_channel: 1,
            profile_version: 0x0102,
            supported_features: 0,
            supported_message_types: 1,
            service_name: "MasRecord".to_string(),
        }));
        h.session(SessionEvent::Established);
        let done = own_number_completion(
            &h.client,
            vec![MessageListingEntry::new("1", BmessageType::SmsGsm).with_sender("555-1234")],
        );
        h.session(SessionEvent::RequestCompleted(done));

        assert_eq!(h.client.count(RequestKind::SetNotificationRegistration), 0);
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_completion() {
        let mut h = Harness::connected();
        let pending = own_number_completion(&h.client, vec![]);

        assert!(matches!(h.next_timer().await, Timeout::OwnNumberSearch(_)));
        assert_eq!(h.client.0.lock().unwrap().aborted, vec![pending.id()]);
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 2);

        h.session(SessionEvent::RequestCompleted(pending));
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 2);
        assert_eq!(h.client.count(RequestKind::GetMessagesListingForOwnNumber), 1);
        assert_eq!(h.client.count(RequestKind::SetNotificationRegistration), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_after_completion() {
        let mut h = Harness::connected();

        // capture the token the machine armed, then complete the search
        let armed = tokio::time::timeout(Duration::from_secs(60), h.rx.recv()).await;
        let Ok(Some(Input::Timer { timeout, token })) = armed else {
            panic!("expected own number timer");
        };
        let done = own_number_completion(
            &h.client,
            vec![MessageListingEntry::new("1", BmessageType::SmsGsm).with_sender("5551234")],
        );
        h.session(SessionEvent::RequestCompleted(done));
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 2);

        let _ = h.machine.handle(Input::Timer { timeout, token });
        assert!(h.client.0.lock().unwrap().aborted.is_empty());
        assert_eq!(h.client.count(RequestKind::GetMessagesListing), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_disconnects() {
        let mut h = Harness::new();
        h.client.0.lock().unwrap().reject = true;
        h.session(SessionEvent::Established);
        assert_eq!(h.machine.state(), ConnectionState::Disconnected);
        assert_eq!(
            *h.transitions.0.lock().unwrap(),
            vec![
                (ConnectionState::Disconnected, ConnectionState::Connecting),
                (ConnectionState::Connecting, ConnectionState::Connected),
                (ConnectionState::Connected, ConnectionState::Disconnected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_downloads_unseen_messages() {
        let mut h = Harness::connected();
        let done = own_number_completion(
            &h.client,
            vec![MessageListingEntry::new("1", BmessageType::SmsGsm).with_sender("555-1234")],
        );
        h.session(SessionEvent::RequestCompleted(done));

        let mut inbox = h
            .client
            .0
            .lock()
            .unwrap()
            .submitted
            .iter()
            .find(|r| r.listing_folder() == Some(Folder::Inbox))
            .cloned()
            .unwrap();
        inbox.resolve(Response::Listing(vec![
            MessageListingEntry::new("A", BmessageType::SmsGsm),
            MessageListingEntry::new("B", BmessageType::SmsGsm),
        ]));
        h.session(SessionEvent::RequestCompleted(inbox));
        assert_eq!(h.client.count(RequestKind::GetMessage), 2);

        // a new-message report for a handle already being fetched is not refetched
        h.session(SessionEvent::Notification(Some(
            EventReport::new(EventType::NewMessage, "A").in_folder(Folder::Inbox),
        )));
        assert_eq!(h.client.count(RequestKind::GetMessage), 2);

        let mut get = h.client.last(RequestKind::GetMessage);
        get.resolve(Response::Message(
            Bmessage::new(BmessageType::SmsGsm, Folder::Inbox)
                .with_body("hey")
                .with_originator(Recipient::phone("555-9999"))
                .with_recipient(Recipient::phone("555-1234")),
        ));
        h.session(SessionEvent::RequestCompleted(get));
        let records = h.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.direction, crate::session::Direction::Received);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_outside_connected_is_dropped() {
        let mut h = Harness::new();
        h.command(Command::SendMessage {
            message: Bmessage::new(BmessageType::SmsGsm, Folder::Sent),
            retry: false,
            transparent: false,
        });
        assert_eq!(h.client.count(RequestKind::PushMessage), 0);
        assert_eq!(h.machine.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_is_terminal() {
        let mut h = Harness::connected();
        h.session(SessionEvent::Disconnected);
        assert_eq!(h.machine.state(), ConnectionState::Disconnected);

        h.session(SessionEvent::Established);
        h.command(Command::Disconnect);
        assert_eq!(h.machine.state(), ConnectionState::Disconnected);
        assert_eq!(h.transitions.0.lock().unwrap().len(), 3);
        assert!(h.machine.handle(Input::Command(Command::Quit)).is_break());
    }
}
