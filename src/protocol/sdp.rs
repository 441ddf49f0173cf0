//! MAS SDP record.

use serde::{Deserialize, Serialize};

/// MAP supported-features bits advertised in the MAS SDP record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MapFeature {
    /// Notification registration
    NotificationRegistration = 1 << 0,
    /// Notification (event reports)
    Notification = 1 << 1,
    /// Folder and listing browsing
    Browsing = 1 << 2,
    /// Message upload (push)
    Uploading = 1 << 3,
    /// Message deletion
    Delete = 1 << 4,
    /// Instance information
    InstanceInformation = 1 << 5,
    /// Extended event report 1.1
    ExtendedEventReport11 = 1 << 6,
}

/// Connection parameters for one MAS instance, received once per
/// connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpMasRecord {
    /// MAS instance id
    pub mas_instance_id: u8,
    /// L2CAP PSM, when the server supports OBEX over L2CAP
    pub l2cap_psm: Option<u16>,
    /// RFCOMM server channel
    pub rfcomm_channel: u8,
    /// MAP profile version (e.g. `0x0104`)
    pub profile_version: u16,
    /// Supported features bitmask (see [`MapFeature`])
    pub supported_features: u32,
    /// Supported message types bitmask
    pub supported_message_types: u8,
    /// Service name
    pub service_name: String,
}

impl SdpMasRecord {
    /// Check a supported-features bit
    pub fn supports(&self, feature: MapFeature) -> bool {
        self.supported_features & feature as u32 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_features() {
        let record = SdpMasRecord {
            mas_instance_id: 1,
            l2cap_psm: Some(0x1005),
            rfcomm_channel: 1,
            profile_version: 0x0104,
            supported_features: 0b1001,
            supported_message_types: 1,
            service_name: "MasRecord".to_string(),
        };
        assert!(record.supports(MapFeature::NotificationRegistration));
        assert!(record.supports(MapFeature::Uploading));
        assert!(!record.supports(MapFeature::Browsing));
    }
}
