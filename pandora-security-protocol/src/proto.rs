//! Pandora Security Messages
//!
//! Rust renditions of the messages exchanged by the `pandora.Security` and
//! `pandora.SecurityStorage` services.
//!
//! ## JSON Mapping
//!
//! Messages follow the proto3 JSON mapping so that they can travel inside
//! wire frames unchanged:
//! - field names are lowerCamelCase
//! - `bytes` fields are standard base64
//! - oneof members are flattened into the enclosing object
//! - enums are written as their value names
//!
//! ```
//! use pandora_security_protocol::proto::{Connection, PairingEvent, PairingMethod};
//! use pandora_security_protocol::Address;
//!
//! let address: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
//! let event = PairingEvent::new(
//!     Connection::from_address(&address),
//!     PairingMethod::NumericComparison(123456),
//! );
//!
//! let json = serde_json::to_value(&event).unwrap();
//! assert_eq!(json["numericComparison"], 123456);
//! ```

use crate::{Address, BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Base64 (de)serialization for `bytes` fields
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// `google.protobuf.Empty`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// `google.protobuf.Any`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Any {
    /// Type URL, left empty for connection cookies
    #[serde(default)]
    pub type_url: String,

    /// Opaque payload
    #[serde(default, with = "base64_bytes")]
    pub value: Vec<u8>,
}

/// `pandora.Connection`: an opaque handle to a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub cookie: Any,
}

impl Connection {
    /// Build a connection whose cookie carries the peer address
    pub fn from_address(address: &Address) -> Self {
        Self {
            cookie: Any {
                type_url: String::new(),
                value: address.to_cookie(),
            },
        }
    }

    /// Decode the peer address from the cookie
    pub fn address(&self) -> Result<Address> {
        Address::from_cookie(&self.cookie.value)
    }
}

/// The peer a pairing event refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingRemote {
    /// Raw device address
    Address(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Connection handle
    Connection(Connection),
}

/// The decision a pairing event asks the client for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingMethod {
    /// Consent only
    JustWorks(Empty),
    /// Confirm that both sides display this value
    NumericComparison(u32),
    /// The client must enter the passkey shown on the peer
    PasskeyEntryRequest(Empty),
    /// Passkey to be entered on the peer
    PasskeyEntryNotification(u32),
    /// The client must enter a legacy PIN
    PinCodeRequest(Empty),
    /// PIN to be entered on the peer
    PinCodeNotification(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// `pandora.PairingEvent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEvent {
    #[serde(flatten)]
    pub remote: Option<PairingRemote>,

    #[serde(flatten)]
    pub method: Option<PairingMethod>,
}

impl PairingEvent {
    /// Create an event for a connection
    pub fn new(connection: Connection, method: PairingMethod) -> Self {
        Self {
            remote: Some(PairingRemote::Connection(connection)),
            method: Some(method),
        }
    }

    /// Resolve the peer address this event refers to
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::MalformedAnswer` when the event has no remote or
    /// the remote does not decode to an address.
    pub fn remote_address(&self) -> Result<Address> {
        match &self.remote {
            Some(PairingRemote::Connection(connection)) => connection.address(),
            Some(PairingRemote::Address(bytes)) => Address::from_cookie(bytes),
            None => Err(BridgeError::malformed("pairing event has no remote")),
        }
    }
}

/// The client's decision for a pairing event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingAnswer {
    /// Accept or reject the pairing
    Confirm(bool),
    /// Passkey typed by the user
    Passkey(u32),
    /// Legacy PIN typed by the user
    Pin(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl PairingAnswer {
    /// Short name of the answer kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            PairingAnswer::Confirm(_) => "confirm",
            PairingAnswer::Passkey(_) => "passkey",
            PairingAnswer::Pin(_) => "pin",
        }
    }
}

/// `pandora.PairingEventAnswer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEventAnswer {
    /// The event being answered
    pub event: Option<PairingEvent>,

    #[serde(flatten)]
    pub answer: Option<PairingAnswer>,
}

impl PairingEventAnswer {
    /// Confirm (or reject) pairing with the peer of `event`
    pub fn confirm(event: PairingEvent, accept: bool) -> Self {
        Self {
            event: Some(event),
            answer: Some(PairingAnswer::Confirm(accept)),
        }
    }

    /// Resolve the peer address this answer refers to
    pub fn remote_address(&self) -> Result<Address> {
        self.event
            .as_ref()
            .ok_or_else(|| BridgeError::malformed("answer carries no event"))?
            .remote_address()
    }
}

/// `pandora.SecurityLevel` (BR/EDR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    Level0,
    Level1,
    Level2,
    Level3,
    Level4,
}

/// `pandora.LESecurityLevel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeSecurityLevel {
    LeLevel1,
    LeLevel2,
    LeLevel3,
    LeLevel4,
}

/// Requested security level, per transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityLevelRequest {
    Classic(SecurityLevel),
    Le(LeSecurityLevel),
}

/// `pandora.SecureRequest`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureRequest {
    #[serde(default)]
    pub connection: Option<Connection>,

    #[serde(flatten)]
    pub level: Option<SecurityLevelRequest>,
}

/// Outcome of a security procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityResult {
    Success(Empty),
    NotReached(Empty),
    ConnectionDied(Empty),
    PairingFailure(Empty),
    AuthenticationFailure(Empty),
    EncryptionFailure(Empty),
}

/// `pandora.SecureResponse`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureResponse {
    #[serde(flatten)]
    pub result: Option<SecurityResult>,
}

/// `pandora.WaitSecurityRequest`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSecurityRequest {
    #[serde(default)]
    pub connection: Option<Connection>,

    #[serde(flatten)]
    pub level: Option<SecurityLevelRequest>,
}

/// `pandora.WaitSecurityResponse`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSecurityResponse {
    #[serde(flatten)]
    pub result: Option<SecurityResult>,
}

/// Address of a bonded device, by address type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BondAddress {
    Public(#[serde(with = "base64_bytes")] Vec<u8>),
    Random(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// `pandora.IsBondedRequest`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsBondedRequest {
    #[serde(flatten)]
    pub address: Option<BondAddress>,
}

/// `pandora.DeleteBondRequest`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBondRequest {
    #[serde(flatten)]
    pub address: Option<BondAddress>,
}
