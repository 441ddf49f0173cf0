//! bMessage payloads and recipient addressing.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Folder;
use crate::error::{MapClientError, Result};

lazy_static! {
    /// Everything that is not dialable
    static ref NON_DIALABLE: Regex = Regex::new(r"[^0-9+*#]").unwrap();
}

/// Shortest digit run treated as a comparable subscriber number
const MIN_MATCH_DIGITS: usize = 7;

/// Message type carried in a bMessage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BmessageType {
    /// GSM SMS
    SmsGsm,
    /// CDMA SMS
    SmsCdma,
    /// MMS
    Mms,
    /// E-mail
    Email,
    /// Instant message
    Im,
}

/// Recipient or originator address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Address {
    /// Phone number, normalized to dialable characters
    Phone(String),
    /// E-mail address
    Email(String),
}

impl Address {
    /// Raw address string
    pub fn as_str(&self) -> &str {
        match self {
            Self::Phone(s) | Self::Email(s) => s,
        }
    }
}

/// A contact reference plus its address (the vCard part of a bMessage)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Display name, if known
    pub name: Option<String>,
    /// Address
    pub address: Address,
}

impl Recipient {
    /// Recipient with a phone number
    pub fn phone(number: &str) -> Self {
        Self {
            name: None,
            address: Address::Phone(normalize_phone_number(number)),
        }
    }

    /// Recipient with an e-mail address
    pub fn email(address: &str) -> Self {
        Self {
            name: None,
            address: Address::Email(address.to_string()),
        }
    }

    /// Attach a display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parse a contact URI (`tel:`, `tel://`, `sms:`, `mailto:`).
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once(':')
            .ok_or_else(|| MapClientError::InvalidRecipient(uri.to_string()))?;
        let value = rest.trim_start_matches("//");

        match scheme.to_ascii_lowercase().as_str() {
            "tel" | "sms" => {
                let number = normalize_phone_number(value);
                if number.is_empty() {
                    return Err(MapClientError::InvalidRecipient(uri.to_string()));
                }
                Ok(Self {
                    name: None,
                    address: Address::Phone(number),
                })
            },
            "mailto" if value.contains('@') => Ok(Self::email(value)),
            _ => Err(MapClientError::InvalidRecipient(uri.to_string())),
        }
    }
}

/// Strip formatting from a phone number, keeping only dialable characters.
pub fn normalize_phone_number(number: &str) -> String {
    NON_DIALABLE.replace_all(number, "").into_owned()
}

/// Loose phone number equality.
///
/// Numbers match when their digits are equal, or when both carry at least
/// seven digits and one is a suffix of the other (a national
/// number against the same number with a country code).
pub fn phone_numbers_match(a: &str, b: &str) -> bool {
    let a: String = a.chars().filter(char::is_ascii_digit).collect();
    let b: String = b.chars().filter(char::is_ascii_digit).collect();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    short.len() >= MIN_MATCH_DIGITS && long.ends_with(short.as_str())
}

/// Message payload. Built once, then read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bmessage {
    kind: BmessageType,
    folder: Folder,
    read: bool,
    originator: Option<Recipient>,
    recipients: Vec<Recipient>,
    body: String,
}

impl Bmessage {
    /// Create an empty message of `kind` filed under `folder`
    pub fn new(kind: BmessageType, folder: Folder) -> Self {
        Self {
            kind,
            folder,
            read: false,
            originator: None,
            recipients: Vec::new(),
            body: String::new(),
        }
    }

    /// Set the body text
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a recipient
    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    /// Set the originator
    pub fn with_originator(mut self, originator: Recipient) -> Self {
        self.originator = Some(originator);
        self
    }

    /// Mark as read
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Message type
    pub fn kind(&self) -> BmessageType {
        self.kind
    }

    /// Folder the message belongs to
    pub fn folder(&self) -> Folder {
        self.folder
    }

    /// Read flag
    pub fn is_read(&self) -> bool {
        self.read
    }

    /// Originator, if present
    pub fn originator(&self) -> Option<&Recipient> {
        self.originator.as_ref()
    }

    /// Recipients
    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Body text
    pub fn body(&self) -> &str {
        &self.body
    }
}
