//! Request sequencing between the state machine and the session client.

use std::collections::BTreeMap;

use super::{SessionClient, SubmitError};
use crate::protocol::{Operation, Request, RequestId, RequestKind};

/// Kinds that may only have one instance outstanding at a time
const SINGLETON_KINDS: [RequestKind; 1] = [RequestKind::GetMessagesListingForOwnNumber];

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    kind: RequestKind,
    generation: u64,
}

/// Hands requests to the [`SessionClient`] in call order and remembers which
/// are outstanding, so completions can be correlated by identity.
///
/// Every submission, including a resubmission under an existing id, gets a
/// fresh generation. A completion counts only when both its id and its
/// generation match the outstanding entry.
pub struct RequestCoordinator {
    client: Box<dyn SessionClient>,
    next_id: u64,
    next_generation: u64,
    outstanding: BTreeMap<RequestId, Outstanding>,
}

impl RequestCoordinator {
    /// Wrap a session client
    pub fn new(client: Box<dyn SessionClient>) -> Self {
        Self {
            client,
            next_id: 1,
            next_generation: 1,
            outstanding: BTreeMap::new(),
        }
    }

    /// Submit a new request
    pub fn submit(&mut self, op: Operation) -> Result<RequestId, SubmitError> {
        let id = RequestId::new(self.next_id);
        self.next_id += 1;
        self.dispatch(Request::new(id, op))
    }

    /// Submit a request again under its existing identity
    pub fn resubmit(&mut self, request: Request) -> Result<RequestId, SubmitError> {
        self.dispatch(request)
    }

    fn dispatch(&mut self, mut request: Request) -> Result<RequestId, SubmitError> {
        let (id, kind) = (request.id(), request.kind());

        if SINGLETON_KINDS.contains(&kind) && self.outstanding.values().any(|o| o.kind == kind) {
            tracing::warn!("{id}: {kind:?} already outstanding, not submitting");
            return Err(SubmitError::Busy(kind));
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        request.begin_attempt(generation);

        if !self.client.submit(request) {
            tracing::warn!("{id}: session client rejected {kind:?}");
            return Err(SubmitError::Rejected);
        }

        tracing::debug!("{id}: submitted {kind:?} (generation {generation})");
        self.outstanding.insert(id, Outstanding { kind, generation });
        Ok(id)
    }

    /// Mark a request complete; `false` means the completion is stale,
    /// either because the id is no longer outstanding or because it answers
    /// an earlier submission of the same id
    pub fn complete(&mut self, request: &Request) -> bool {
        let id = request.id();
        match self.outstanding.get(&id) {
            Some(o) if o.generation == request.generation() => {
                self.outstanding.remove(&id);
                true
            },
            Some(o) => {
                tracing::debug!(
                    "{id}: completion for generation {} while {} is outstanding",
                    request.generation(),
                    o.generation
                );
                false
            },
            None => false,
        }
    }

    /// Abort an outstanding request; later completions for it are stale
    pub fn abort(&mut self, id: RequestId) -> bool {
        if self.outstanding.remove(&id).is_some() {
            tracing::debug!("{id}: aborting");
            self.client.abort(id);
            true
        } else {
            false
        }
    }

    /// Outstanding requests in submission order
    pub fn outstanding(&self) -> Vec<RequestId> {
        self.outstanding.keys().copied().collect()
    }

    /// Ask the session client to close the session
    pub fn shutdown(&mut self) {
        self.client.shutdown();
    }

    /// Forget everything outstanding and release the session client
    pub fn cleanup(&mut self) {
        if !self.outstanding.is_empty() {
            tracing::debug!("dropping {} outstanding requests", self.outstanding.len());
        }
        self.outstanding.clear();
        self.client.cleanup();
    }
}
