//! Pairing Observer
//!
//! The per-session registration handle the stack calls back into. It turns
//! raw SSP callback arguments into [`PairingNotification`] values and hands
//! them to the session's channel.
//!
//! The handoff is an unbounded send: it never blocks the stack's context
//! and never drops a notification while the session is alive. The stack
//! serialises its own callback delivery, so the queue only grows as fast as
//! pairing requests arrive.

use crate::stack::{AdapterCallbacks, RemoteDevice, SspVariant};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A pairing request raised by the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingNotification {
    /// Peer address in text form
    pub address: String,
    /// Peer friendly name
    pub name: String,
    /// Peer class of device
    pub class_of_device: u32,
    /// Decision the stack needs
    pub variant: SspVariant,
    /// Passkey to compare or display, when the variant has one
    pub passkey: u32,
}

/// Observer bound to one pairing session's channel
pub struct PairingObserver {
    name: String,
    notifications: mpsc::UnboundedSender<PairingNotification>,
}

impl PairingObserver {
    /// Create an observer feeding `notifications`, with a fresh unique name
    pub fn new(notifications: mpsc::UnboundedSender<PairingNotification>) -> Self {
        Self {
            name: format!("pandora-pairing-observer-{}", Uuid::new_v4()),
            notifications,
        }
    }

    /// The name this observer registers under
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AdapterCallbacks for PairingObserver {
    fn on_ssp_request(
        &self,
        remote_device: RemoteDevice,
        class_of_device: u32,
        variant: SspVariant,
        passkey: u32,
    ) {
        let notification = PairingNotification {
            address: remote_device.address,
            name: remote_device.name,
            class_of_device,
            variant,
            passkey,
        };

        debug!(
            "{}: SSP request {:?} from {}",
            self.name, notification.variant, notification.address
        );

        if let Err(e) = self.notifications.send(notification) {
            debug!(
                "{}: session already closed, dropping request from {}",
                self.name, e.0.address
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = PairingObserver::new(tx.clone());
        let b = PairingObserver::new(tx);
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_callback_enqueues_notification() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = PairingObserver::new(tx);

        observer.on_ssp_request(
            RemoteDevice::new("AA:BB:CC:DD:EE:FF", "Headset"),
            0x240404,
            SspVariant::PasskeyConfirmation,
            123456,
        );

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(notification.name, "Headset");
        assert_eq!(notification.class_of_device, 0x240404);
        assert_eq!(notification.variant, SspVariant::PasskeyConfirmation);
        assert_eq!(notification.passkey, 123456);
    }

    #[test]
    fn test_callback_from_foreign_thread() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = std::sync::Arc::new(PairingObserver::new(tx));

        let remote = observer.clone();
        std::thread::spawn(move || {
            remote.on_ssp_request(
                RemoteDevice::new("00:11:22:33:44:55", ""),
                0,
                SspVariant::Consent,
                0,
            );
        })
        .join()
        .unwrap();

        assert_eq!(rx.try_recv().unwrap().variant, SspVariant::Consent);
    }

    #[test]
    fn test_closed_session_drops_silently() {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = PairingObserver::new(tx);
        drop(rx);

        observer.on_ssp_request(RemoteDevice::default(), 0, SspVariant::Consent, 0);
    }
}
