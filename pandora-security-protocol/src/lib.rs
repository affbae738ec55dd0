//! Pandora Security Bridge
//!
//! This library exposes the pairing flow of a Bluetooth host stack as the
//! Pandora `Security` RPC surface: pairing requests raised by the stack become
//! a stream of [`proto::PairingEvent`]s, and the client's
//! [`proto::PairingEventAnswer`]s become stack commands.

pub mod address;
pub mod answers;
pub mod bridge;
pub mod floss;
pub mod frame;
pub mod observer;
pub mod proto;
pub mod service;
pub mod stack;

mod error;

pub use address::{Address, ADDRESS_LEN};
pub use answers::{AnswerConsumer, AnswerStream};
pub use bridge::{PairingEventBridge, PairingEventStream};
pub use error::{BridgeError, Result, UNIMPLEMENTED_MESSAGE};
pub use floss::FlossAdapter;
pub use frame::{Frame, Method, MAX_FRAME_SIZE};
pub use observer::{PairingNotification, PairingObserver};
pub use service::{EventStream, Security, SecurityService, SecurityStorage, SecurityStorageService};
pub use stack::{AdapterCallbacks, ObserverRegistry, RemoteDevice, SspVariant, StackAdapter};

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
