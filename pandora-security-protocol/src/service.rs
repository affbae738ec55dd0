//! Pandora Security Services
//!
//! The RPC surface of the bridge, split the way the Pandora interfaces are:
//!
//! - [`Security`]: `OnPairing`, `Secure`, `WaitSecurity`
//! - [`SecurityStorage`]: `IsBonded`, `DeleteBond`
//!
//! Only `OnPairing` has behaviour. The other RPCs answer `UNIMPLEMENTED`
//! with a fixed message and touch no state; clients must treat that as a
//! permanent response.

use crate::answers::AnswerStream;
use crate::bridge::PairingEventBridge;
use crate::proto::{
    DeleteBondRequest, Empty, IsBondedRequest, PairingEvent, SecureRequest, SecureResponse,
    WaitSecurityRequest, WaitSecurityResponse,
};
use crate::stack::StackAdapter;
use crate::UNIMPLEMENTED_MESSAGE;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tonic::Status;
use tracing::{debug, warn};

/// Outbound pairing events, as handed to the transport
pub type EventStream = Pin<Box<dyn Stream<Item = Result<PairingEvent, Status>> + Send>>;

/// Service to trigger Bluetooth host security pairing procedures
#[async_trait]
pub trait Security: Send + Sync + 'static {
    /// Stream pairing events to the client while applying its answers
    async fn on_pairing(&self, answers: AnswerStream) -> Result<EventStream, Status>;

    /// Secure a connection to the requested level
    async fn secure(&self, request: SecureRequest) -> Result<SecureResponse, Status>;

    /// Wait until a connection reaches the requested level
    async fn wait_security(
        &self,
        request: WaitSecurityRequest,
    ) -> Result<WaitSecurityResponse, Status>;
}

/// Service to query and manage persisted bonds
#[async_trait]
pub trait SecurityStorage: Send + Sync + 'static {
    /// Whether a bond exists for the device
    async fn is_bonded(&self, request: IsBondedRequest) -> Result<bool, Status>;

    /// Remove the bond for the device
    async fn delete_bond(&self, request: DeleteBondRequest) -> Result<Empty, Status>;
}

fn unimplemented(method: &str) -> Status {
    warn!("{} called but is not implemented", method);
    Status::unimplemented(UNIMPLEMENTED_MESSAGE)
}

/// [`Security`] backed by a [`PairingEventBridge`]
pub struct SecurityService {
    bridge: PairingEventBridge,
}

impl SecurityService {
    pub fn new(adapter: Arc<dyn StackAdapter>) -> Self {
        Self {
            bridge: PairingEventBridge::new(adapter),
        }
    }

    /// The bridge serving `OnPairing`
    pub fn bridge(&self) -> &PairingEventBridge {
        &self.bridge
    }
}

#[async_trait]
impl Security for SecurityService {
    async fn on_pairing(&self, answers: AnswerStream) -> Result<EventStream, Status> {
        debug!("OnPairing requested");
        let events = self.bridge.run_session(answers)?;
        Ok(Box::pin(events.map(|item| item.map_err(Status::from))))
    }

    async fn secure(&self, _request: SecureRequest) -> Result<SecureResponse, Status> {
        Err(unimplemented("Secure"))
    }

    async fn wait_security(
        &self,
        _request: WaitSecurityRequest,
    ) -> Result<WaitSecurityResponse, Status> {
        Err(unimplemented("WaitSecurity"))
    }
}

/// [`SecurityStorage`] for a stack without bond storage access
#[derive(Debug, Default)]
pub struct SecurityStorageService;

impl SecurityStorageService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecurityStorage for SecurityStorageService {
    async fn is_bonded(&self, _request: IsBondedRequest) -> Result<bool, Status> {
        Err(unimplemented("IsBonded"))
    }

    async fn delete_bond(&self, _request: DeleteBondRequest) -> Result<Empty, Status> {
        Err(unimplemented("DeleteBond"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::BondAddress;
    use tonic::Code;

    #[tokio::test]
    async fn test_storage_stubs_are_unimplemented() {
        let storage = SecurityStorageService::new();

        let request = IsBondedRequest {
            address: Some(BondAddress::Public(vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])),
        };
        let status = storage.is_bonded(request).await.unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
        assert_eq!(status.message(), "Method not implemented!");

        let status = storage
            .delete_bond(DeleteBondRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
        assert_eq!(status.message(), "Method not implemented!");
    }
}
