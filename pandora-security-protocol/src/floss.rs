//! Floss DBus Stack Adapter
//!
//! Drives the Floss Bluetooth daemon (`btadapterd`) over the system bus.
//!
//! ## Floss DBus Interface
//!
//! - Service: `org.chromium.bluetooth`
//! - Adapter: `/org/chromium/bluetooth/hci<N>/adapter`
//!
//! ## Adapter Methods Used
//!
//! - `RegisterCallback(o) -> u`: subscribe an exported callback object
//! - `UnregisterCallback(u) -> b`
//! - `SetPairingConfirmation(a{sv} device, b accept) -> b`
//!
//! ## Callback Methods Served
//!
//! - `OnSspRequest(a{sv} device, u cod, u variant, u passkey)`
//!
//! Floss delivers callbacks to a single object per registration; this
//! adapter registers once and fans callbacks out through an
//! [`ObserverRegistry`].

use crate::stack::{AdapterCallbacks, ObserverRegistry, RemoteDevice, SspVariant, StackAdapter};
use crate::{BridgeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zbus::interface;
use zbus::zvariant::{ObjectPath, OwnedValue, Value};
use zbus::Connection;

/// DBus service name of the Floss adapter daemon
pub const FLOSS_SERVICE: &str = "org.chromium.bluetooth";
/// DBus interface of the Floss adapter
const ADAPTER_INTERFACE: &str = "org.chromium.bluetooth.Bluetooth";
/// Object path prefix for our exported callback objects
const CALLBACK_PATH_PREFIX: &str = "/org/chromium/bluetooth/pandora/security";

/// Object path of the adapter with the given HCI index
pub fn adapter_path(hci_index: u32) -> String {
    format!("/org/chromium/bluetooth/hci{}/adapter", hci_index)
}

/// Extract a string entry from a Floss property map
fn string_property(properties: &HashMap<String, OwnedValue>, key: &str) -> String {
    match properties.get(key).map(|v| &**v) {
        Some(Value::Str(s)) => s.as_str().to_string(),
        _ => String::new(),
    }
}

/// Decode Floss's `BluetoothDevice` property map
fn remote_device_from_dbus(properties: &HashMap<String, OwnedValue>) -> RemoteDevice {
    RemoteDevice {
        address: string_property(properties, "address"),
        name: string_property(properties, "name"),
    }
}

/// Callback object Floss calls into
struct BluetoothCallback {
    registry: ObserverRegistry,
}

#[interface(name = "org.chromium.bluetooth.BluetoothCallback")]
impl BluetoothCallback {
    #[zbus(name = "OnSspRequest")]
    fn on_ssp_request(
        &self,
        remote_device: HashMap<String, OwnedValue>,
        cod: u32,
        variant: u32,
        passkey: u32,
    ) {
        let device = remote_device_from_dbus(&remote_device);
        debug!(
            "OnSspRequest from {} ({}), variant {}",
            device.address, device.name, variant
        );
        self.registry
            .dispatch_ssp_request(&device, cod, SspVariant::from(variant), passkey);
    }
}

/// [`StackAdapter`] backed by the Floss adapter daemon
pub struct FlossAdapter {
    connection: Connection,
    adapter_path: String,
    callback_path: String,
    callback_id: u32,
    registry: ObserverRegistry,
}

impl FlossAdapter {
    /// Connect to the system bus and subscribe to adapter callbacks
    pub async fn connect(hci_index: u32) -> Result<Self> {
        let connection = Connection::system().await?;
        let registry = ObserverRegistry::new();

        let callback_path = format!(
            "{}/hci{}/callback{}",
            CALLBACK_PATH_PREFIX,
            hci_index,
            std::process::id()
        );
        connection
            .object_server()
            .at(
                callback_path.as_str(),
                BluetoothCallback {
                    registry: registry.clone(),
                },
            )
            .await?;

        let adapter_path = adapter_path(hci_index);
        let callback_object = ObjectPath::try_from(callback_path.as_str())
            .map_err(|e| BridgeError::DBus(e.into()))?;

        let reply = connection
            .call_method(
                Some(FLOSS_SERVICE),
                adapter_path.as_str(),
                Some(ADAPTER_INTERFACE),
                "RegisterCallback",
                &callback_object,
            )
            .await?;
        let callback_id: u32 = reply.body().deserialize()?;

        info!(
            "Registered Floss callback {} at {} on {}",
            callback_id, callback_path, adapter_path
        );

        Ok(Self {
            connection,
            adapter_path,
            callback_path,
            callback_id,
            registry,
        })
    }

    /// Unsubscribe from adapter callbacks and withdraw the callback object
    pub async fn shutdown(&self) -> Result<()> {
        let reply = self
            .connection
            .call_method(
                Some(FLOSS_SERVICE),
                self.adapter_path.as_str(),
                Some(ADAPTER_INTERFACE),
                "UnregisterCallback",
                &self.callback_id,
            )
            .await?;
        let removed: bool = reply.body().deserialize()?;
        if !removed {
            warn!("Floss did not know callback {}", self.callback_id);
        }

        self.connection
            .object_server()
            .remove::<BluetoothCallback, _>(self.callback_path.as_str())
            .await?;

        info!("Unregistered Floss callback {}", self.callback_id);
        Ok(())
    }
}

#[async_trait]
impl StackAdapter for FlossAdapter {
    fn register_observer(&self, name: &str, observer: Arc<dyn AdapterCallbacks>) -> Result<()> {
        self.registry.register(name, observer)
    }

    fn unregister_observer(&self, name: &str, observer: &Arc<dyn AdapterCallbacks>) -> Result<()> {
        self.registry.unregister(name, observer)
    }

    async fn set_pairing_confirmation(&self, address: &str, accept: bool) -> Result<()> {
        let mut device: HashMap<&str, Value<'_>> = HashMap::new();
        device.insert("address", Value::from(address));
        device.insert("name", Value::from(""));

        debug!("SetPairingConfirmation({}, {})", address, accept);

        let reply = self
            .connection
            .call_method(
                Some(FLOSS_SERVICE),
                self.adapter_path.as_str(),
                Some(ADAPTER_INTERFACE),
                "SetPairingConfirmation",
                &(device, accept),
            )
            .await
            .map_err(|e| {
                BridgeError::stack(format!("SetPairingConfirmation({}): {}", address, e))
            })?;

        let applied: bool = reply
            .body()
            .deserialize()
            .map_err(|e| BridgeError::stack(format!("SetPairingConfirmation reply: {}", e)))?;

        if !applied {
            return Err(BridgeError::stack(format!(
                "stack refused pairing confirmation for {}",
                address
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_path() {
        assert_eq!(adapter_path(0), "/org/chromium/bluetooth/hci0/adapter");
        assert_eq!(adapter_path(3), "/org/chromium/bluetooth/hci3/adapter");
    }

    #[test]
    fn test_remote_device_from_dbus() {
        let mut properties = HashMap::new();
        properties.insert(
            "address".to_string(),
            OwnedValue::try_from(Value::from("AA:BB:CC:DD:EE:FF")).unwrap(),
        );
        properties.insert(
            "name".to_string(),
            OwnedValue::try_from(Value::from("Pixel")).unwrap(),
        );

        let device = remote_device_from_dbus(&properties);
        assert_eq!(device, RemoteDevice::new("AA:BB:CC:DD:EE:FF", "Pixel"));
    }

    #[test]
    fn test_remote_device_missing_fields() {
        let mut properties = HashMap::new();
        properties.insert("address".to_string(), OwnedValue::try_from(Value::from(7u32)).unwrap());

        let device = remote_device_from_dbus(&properties);
        assert_eq!(device, RemoteDevice::default());
    }
}
