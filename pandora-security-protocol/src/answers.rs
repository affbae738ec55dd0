//! Answer Consumer
//!
//! Drains the client's answer stream and turns each answer into a command on
//! the Bluetooth stack, in the order the client sent them.
//!
//! | answer    | stack command                          |
//! |-----------|----------------------------------------|
//! | `confirm` | `set_pairing_confirmation(addr, value)` |
//! | `passkey` | none, logged                           |
//! | `pin`     | none, logged                           |
//!
//! An answer whose peer cannot be resolved ends the session: the stack has
//! no way to ignore an answer it never received.
//!
//! Once the session's closed flag is set no further answer is applied. A
//! command already handed to the stack cannot be recalled and may still
//! complete.

use crate::proto::{PairingAnswer, PairingEventAnswer};
use crate::stack::StackAdapter;
use crate::{BridgeError, Result};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tonic::{Code, Status};
use tracing::{debug, info, warn};

/// Client-supplied answers, as delivered by the transport
pub type AnswerStream =
    Pin<Box<dyn Stream<Item = std::result::Result<PairingEventAnswer, Status>> + Send>>;

/// Applies client answers to the stack
pub struct AnswerConsumer {
    adapter: Arc<dyn StackAdapter>,
    closed: Arc<AtomicBool>,
}

impl AnswerConsumer {
    pub fn new(adapter: Arc<dyn StackAdapter>) -> Self {
        Self {
            adapter,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the consumer before its next answer once set
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Run the consumer on its own task
    pub fn spawn(self, answers: AnswerStream) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(answers))
    }

    /// Consume `answers` until the stream ends
    ///
    /// A `CANCELLED` item from the transport ends consumption without error.
    /// An `INVALID_ARGUMENT` item is a malformed answer. Returns
    /// `BridgeError::Cancelled` when the session closed underneath it.
    pub async fn run(self, mut answers: AnswerStream) -> Result<()> {
        while let Some(item) = answers.next().await {
            let answer = match item {
                Ok(answer) => answer,
                Err(status) if status.code() == Code::Cancelled => {
                    info!("Answer stream cancelled by client: {}", status.message());
                    return Ok(());
                }
                Err(status) if status.code() == Code::InvalidArgument => {
                    return Err(BridgeError::malformed(status.message()));
                }
                Err(status) => {
                    return Err(BridgeError::AnswerStream(format!(
                        "{:?}: {}",
                        status.code(),
                        status.message()
                    )));
                }
            };

            if self.closed.load(Ordering::Acquire) {
                debug!("Pairing session closed, dropping remaining answers");
                return Err(BridgeError::Cancelled("pairing session closed".into()));
            }

            self.apply(answer).await?;
        }

        debug!("Answer stream closed by client");
        Ok(())
    }

    /// Apply a single answer
    pub async fn apply(&self, answer: PairingEventAnswer) -> Result<()> {
        let address = answer.remote_address()?;

        let Some(decision) = answer.answer else {
            warn!("Pairing answer for {} carries no decision, ignoring", address);
            return Ok(());
        };

        info!("Pairing answer {} for {}", decision.kind(), address);

        match decision {
            PairingAnswer::Confirm(accept) => self
                .adapter
                .set_pairing_confirmation(&address.to_string(), accept)
                .await
                .map_err(|e| match e {
                    BridgeError::StackCommandFailure(_) => e,
                    other => BridgeError::stack(other.to_string()),
                }),
            PairingAnswer::Passkey(_) | PairingAnswer::Pin(_) => {
                warn!(
                    "{} answers are not supported by the stack yet, ignoring answer for {}",
                    decision.kind(),
                    address
                );
                Ok(())
            }
        }
    }
}
