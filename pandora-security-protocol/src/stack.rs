//! Bluetooth Stack Boundary
//!
//! The narrow interface the bridge uses to observe pairing requests and to
//! answer them. Implementations talk to the real host stack; the bridge
//! treats them as trusted collaborators.
//!
//! ## Observer Registry
//!
//! Stacks deliver callbacks to a single registration. [`ObserverRegistry`]
//! fans those callbacks out to named in-process observers so that adapters
//! can expose `register_observer`/`unregister_observer` without a round trip
//! to the stack.

use crate::{BridgeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Kind of user decision a Secure Simple Pairing request needs
///
/// Numbering follows the stack's `BtSspVariant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SspVariant {
    /// Numeric comparison: both sides show the passkey
    PasskeyConfirmation,
    /// The user types the passkey shown on the peer
    PasskeyEntry,
    /// Just-works consent
    Consent,
    /// The peer needs the passkey we display
    PasskeyNotification,
    /// A variant this bridge does not know
    Unknown(u32),
}

impl From<u32> for SspVariant {
    fn from(value: u32) -> Self {
        match value {
            0 => SspVariant::PasskeyConfirmation,
            1 => SspVariant::PasskeyEntry,
            2 => SspVariant::Consent,
            3 => SspVariant::PasskeyNotification,
            other => SspVariant::Unknown(other),
        }
    }
}

impl From<SspVariant> for u32 {
    fn from(variant: SspVariant) -> Self {
        match variant {
            SspVariant::PasskeyConfirmation => 0,
            SspVariant::PasskeyEntry => 1,
            SspVariant::Consent => 2,
            SspVariant::PasskeyNotification => 3,
            SspVariant::Unknown(other) => other,
        }
    }
}

/// A remote device as reported by the stack
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteDevice {
    /// Address in text form, e.g. `AA:BB:CC:DD:EE:FF`
    pub address: String,
    /// Friendly name, possibly empty
    pub name: String,
}

impl RemoteDevice {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

/// Callbacks delivered by the stack
///
/// Invoked on the stack's own execution context. Implementations must not
/// block.
pub trait AdapterCallbacks: Send + Sync {
    /// A pairing request needs a user decision
    fn on_ssp_request(
        &self,
        remote_device: RemoteDevice,
        class_of_device: u32,
        variant: SspVariant,
        passkey: u32,
    );
}

/// Commands and registrations the bridge issues against the stack
#[async_trait]
pub trait StackAdapter: Send + Sync {
    /// Register a named observer for stack callbacks
    ///
    /// Fails with `BridgeError::ResourceBusy` when the name is taken.
    fn register_observer(&self, name: &str, observer: Arc<dyn AdapterCallbacks>) -> Result<()>;

    /// Remove a previously registered observer
    fn unregister_observer(&self, name: &str, observer: &Arc<dyn AdapterCallbacks>) -> Result<()>;

    /// Accept or reject a pending pairing with `address`
    async fn set_pairing_confirmation(&self, address: &str, accept: bool) -> Result<()>;
}

/// Named fan-out of stack callbacks
#[derive(Default, Clone)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<HashMap<String, Arc<dyn AdapterCallbacks>>>>,
}

fn same_observer(a: &Arc<dyn AdapterCallbacks>, b: &Arc<dyn AdapterCallbacks>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer under `name`
    pub fn register(&self, name: &str, observer: Arc<dyn AdapterCallbacks>) -> Result<()> {
        let mut observers = self
            .observers
            .write()
            .map_err(|_| BridgeError::Internal("observer registry poisoned".to_string()))?;

        if observers.contains_key(name) {
            return Err(BridgeError::ResourceBusy(format!(
                "observer '{}' is already registered",
                name
            )));
        }

        observers.insert(name.to_string(), observer);
        debug!("Registered observer {} ({} total)", name, observers.len());
        Ok(())
    }

    /// Remove the observer registered under `name`
    ///
    /// Only removes the entry if it holds the same observer instance.
    pub fn unregister(&self, name: &str, observer: &Arc<dyn AdapterCallbacks>) -> Result<()> {
        let mut observers = self
            .observers
            .write()
            .map_err(|_| BridgeError::Internal("observer registry poisoned".to_string()))?;

        match observers.get(name) {
            Some(existing) if same_observer(existing, observer) => {
                observers.remove(name);
                debug!("Unregistered observer {} ({} left)", name, observers.len());
            }
            Some(_) => warn!("Observer {} belongs to another owner, not removing", name),
            None => debug!("Observer {} was not registered", name),
        }
        Ok(())
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.observers
            .read()
            .map(|o| o.contains_key(name))
            .unwrap_or(false)
    }

    /// Deliver an SSP request to every registered observer
    pub fn dispatch_ssp_request(
        &self,
        remote_device: &RemoteDevice,
        class_of_device: u32,
        variant: SspVariant,
        passkey: u32,
    ) {
        // Snapshot so observers may unregister from inside the callback
        let snapshot: Vec<Arc<dyn AdapterCallbacks>> = match self.observers.read() {
            Ok(observers) => observers.values().cloned().collect(),
            Err(_) => {
                warn!("Observer registry poisoned, dropping SSP request");
                return;
            }
        };

        debug!(
            "Dispatching SSP request from {} to {} observer(s)",
            remote_device.address,
            snapshot.len()
        );

        for observer in snapshot {
            observer.on_ssp_request(remote_device.clone(), class_of_device, variant, passkey);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<(String, SspVariant, u32)>>,
    }

    impl AdapterCallbacks for Collecting {
        fn on_ssp_request(
            &self,
            remote: RemoteDevice,
            _cod: u32,
            variant: SspVariant,
            passkey: u32,
        ) {
            self.seen.lock().unwrap().push((remote.address, variant, passkey));
        }
    }

    #[test]
    fn test_variant_numbering() {
        assert_eq!(SspVariant::from(0), SspVariant::PasskeyConfirmation);
        assert_eq!(SspVariant::from(1), SspVariant::PasskeyEntry);
        assert_eq!(SspVariant::from(2), SspVariant::Consent);
        assert_eq!(SspVariant::from(3), SspVariant::PasskeyNotification);
        assert_eq!(SspVariant::from(9), SspVariant::Unknown(9));
        assert_eq!(u32::from(SspVariant::Consent), 2);
    }

    #[test]
    fn test_duplicate_name_is_busy() {
        let registry = ObserverRegistry::new();
        let first: Arc<dyn AdapterCallbacks> = Arc::new(Collecting::default());
        let second: Arc<dyn AdapterCallbacks> = Arc::new(Collecting::default());

        registry.register("pairing", first).unwrap();
        let error = registry.register("pairing", second).unwrap_err();

        assert!(matches!(error, BridgeError::ResourceBusy(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_requires_same_instance() {
        let registry = ObserverRegistry::new();
        let owner: Arc<dyn AdapterCallbacks> = Arc::new(Collecting::default());
        let stranger: Arc<dyn AdapterCallbacks> = Arc::new(Collecting::default());

        registry.register("pairing", owner.clone()).unwrap();
        registry.unregister("pairing", &stranger).unwrap();
        assert!(registry.contains("pairing"));

        registry.unregister("pairing", &owner).unwrap();
        assert!(registry.is_empty());

        // Unknown names are a no-op
        registry.unregister("pairing", &owner).unwrap();
    }

    #[test]
    fn test_dispatch_reaches_every_observer() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Collecting::default());
        let b = Arc::new(Collecting::default());
        registry.register("a", a.clone()).unwrap();
        registry.register("b", b.clone()).unwrap();

        let device = RemoteDevice::new("AA:BB:CC:DD:EE:FF", "Phone");
        registry.dispatch_ssp_request(&device, 0x5a020c, SspVariant::Consent, 0);

        assert_eq!(a.seen.lock().unwrap().len(), 1);
        assert_eq!(
            b.seen.lock().unwrap()[0],
            ("AA:BB:CC:DD:EE:FF".to_string(), SspVariant::Consent, 0)
        );
    }
}
