//! Own phone number discovery.
//!
//! A MAS does not advertise the subscriber's number, but messages reveal it:
//! the originator of anything in Sent, or the recipient of anything in Inbox.
//! The search pages through Sent first, then Inbox, until a batch yields an
//! address or both folders run out.

use super::{normalize_phone_number, Folder, MessageListingEntry};

const SEARCH_ORDER: [Folder; 2] = [Folder::Sent, Folder::Inbox];

/// Incremental own-number search state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnNumberSearch {
    folder_index: usize,
    offset: u16,
    batch_size: u16,
    own_number: Option<String>,
    complete: bool,
}

impl OwnNumberSearch {
    /// Start a search that requests `batch_size` entries per listing
    pub fn new(batch_size: u16) -> Self {
        Self {
            folder_index: 0,
            offset: 0,
            batch_size: batch_size.max(1),
            own_number: None,
            complete: false,
        }
    }

    /// Folder the next batch should be listed from, `None` once complete
    pub fn current_folder(&self) -> Option<Folder> {
        if self.complete {
            None
        } else {
            SEARCH_ORDER.get(self.folder_index).copied()
        }
    }

    /// Offset of the next batch within the current folder
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Entries requested per batch
    pub fn batch_size(&self) -> u16 {
        self.batch_size
    }

    /// Check if the search has concluded (found or exhausted)
    pub fn is_search_completed(&self) -> bool {
        self.complete
    }

    /// Number found, if any
    pub fn own_number(&self) -> Option<&str> {
        self.own_number.as_deref()
    }

    /// Fold one listing batch into the search.
    pub fn absorb(&mut self, batch: &[MessageListingEntry]) {
        let Some(folder) = self.current_folder() else {
            return;
        };

        let found = batch
            .iter()
            .filter_map(|entry| match folder {
                Folder::Sent => entry.sender_addressing.as_deref(),
                _ => entry.recipient_addressing.as_deref(),
            })
            .map(normalize_phone_number)
            .find(|number| !number.is_empty());

        if let Some(number) = found {
            tracing::debug!(folder = %folder, "own number found");
            self.own_number = Some(number);
            self.complete = true;
            return;
        }

        if batch.len() < usize::from(self.batch_size) {
            self.folder_index += 1;
            self.offset = 0;
            if self.folder_index >= SEARCH_ORDER.len() {
                tracing::debug!("own number search exhausted");
                self.complete = true;
            }
        } else {
            self.offset = self.offset.saturating_add(self.batch_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BmessageType;
    use proptest::prelude::*;

    fn entry(handle: &str) -> MessageListingEntry {
        MessageListingEntry::new(handle, BmessageType::SmsGsm)
    }

    #[test]
    fn test_found_in_sent() {
        let mut search = OwnNumberSearch::new(2);
        assert_eq!(search.current_folder(), Some(Folder::Sent));

        search.absorb(&[entry("1").with_sender("555-1234").with_recipient("999")]);
        assert!(search.is_search_completed());
        assert_eq!(search.own_number(), Some("5551234"));
        assert_eq!(search.current_folder(), None);
    }

    #[test]
    fn test_pages_then_moves_to_inbox() {
        let mut search = OwnNumberSearch::new(2);

        search.absorb(&[entry("1"), entry("2")]);
        assert!(!search.is_search_completed());
        assert_eq!(search.current_folder(), Some(Folder::Sent));
        assert_eq!(search.offset(), 2);

        search.absorb(&[entry("3")]);
        assert_eq!(search.current_folder(), Some(Folder::Inbox));
        assert_eq!(search.offset(), 0);

        // inbox looks at the recipient, not the sender
        search.absorb(&[entry("4").with_sender("111").with_recipient("+1 555 0000")]);
        assert_eq!(search.own_number(), Some("+15550000"));
    }

    #[test]
    fn test_exhausted_without_number() {
        let mut search = OwnNumberSearch::new(10);
        search.absorb(&[]);
        search.absorb(&[entry("1")]);
        assert!(search.is_search_completed());
        assert_eq!(search.own_number(), None);

        // further batches are ignored
        search.absorb(&[entry("2").with_recipient("5551234")]);
        assert_eq!(search.own_number(), None);
    }

    proptest! {
        #[test]
        fn prop_empty_listings_terminate(batch_size in 0u16..64, pages in 0usize..8) {
            let mut search = OwnNumberSearch::new(batch_size);
            let full: Vec<_> = (0..search.batch_size()).map(|i| entry(&i.to_string())).collect();
            for _ in 0..pages {
                search.absorb(&full);
            }
            prop_assert!(!search.is_search_completed());
            search.absorb(&[]);
            search.absorb(&[]);
            prop_assert!(search.is_search_completed());
            prop_assert_eq!(search.own_number(), None);
        }
    }
}
