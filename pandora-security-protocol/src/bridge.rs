//! Pairing Event Bridge
//!
//! Converts the stack's callback-driven pairing requests into a pull-based,
//! cancellable stream of [`PairingEvent`]s while a companion task applies
//! the client's answers.
//!
//! ## Session Lifecycle
//!
//! ```text
//!  Idle ──run_session──▶ Starting ──▶ Running ──▶ Terminating ──▶ Terminal
//!                           │                         ▲
//!                           └── ResourceBusy ─────────┘ (partial release only)
//! ```
//!
//! - **Starting**: claim the bridge, open the notification channel, register
//!   a fresh [`PairingObserver`], spawn the [`AnswerConsumer`].
//! - **Running**: the returned [`PairingEventStream`] yields one event per
//!   notification, in arrival order; the consumer applies answers.
//! - **Terminating**: entered when the answer stream ends, when the consumer
//!   fails, or when the event stream is dropped. Teardown aborts the
//!   consumer, unregisters the observer, closes the channel and releases the
//!   bridge. It runs exactly once, from whichever path gets there first.
//!
//! At most one session is active per bridge: the stack has a single notion
//! of "the pairing listener".

use crate::answers::{AnswerConsumer, AnswerStream};
use crate::observer::{PairingNotification, PairingObserver};
use crate::proto::{Connection, Empty, PairingEvent, PairingMethod};
use crate::stack::{AdapterCallbacks, SspVariant, StackAdapter};
use crate::{Address, BridgeError, Result};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Translate a stack notification into the event sent to the client
///
/// Returns `None` for variants the bridge does not map and for notifications
/// whose address cannot be parsed; both are skipped.
pub fn event_from_notification(notification: &PairingNotification) -> Option<PairingEvent> {
    let method = match notification.variant {
        SspVariant::PasskeyConfirmation => PairingMethod::NumericComparison(notification.passkey),
        SspVariant::PasskeyEntry => PairingMethod::PasskeyEntryRequest(Empty {}),
        SspVariant::Consent => PairingMethod::JustWorks(Empty {}),
        SspVariant::PasskeyNotification => {
            PairingMethod::PasskeyEntryNotification(notification.passkey)
        }
        SspVariant::Unknown(value) => {
            warn!(
                "Skipping SSP request from {} with unknown variant {}",
                notification.address, value
            );
            return None;
        }
    };

    let address: Address = match notification.address.parse() {
        Ok(address) => address,
        Err(e) => {
            warn!("Skipping SSP request with unusable address: {}", e);
            return None;
        }
    };

    Some(PairingEvent::new(Connection::from_address(&address), method))
}

/// Exclusive claim on a bridge, released on drop
struct SessionClaim {
    active: Arc<AtomicBool>,
}

impl SessionClaim {
    fn acquire(active: &Arc<AtomicBool>) -> Result<Self> {
        active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BridgeError::ResourceBusy("a pairing session is already active".into()))?;
        Ok(Self {
            active: active.clone(),
        })
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// The single active run of the bridge
///
/// Owns every resource the session acquired. [`PairingSession::teardown`]
/// releases them; `Drop` calls it so that cancellation takes the same path.
struct PairingSession {
    adapter: Arc<dyn StackAdapter>,
    observer_name: String,
    observer: Option<Arc<dyn AdapterCallbacks>>,
    notifications: mpsc::UnboundedReceiver<PairingNotification>,
    consumer: Option<JoinHandle<Result<()>>>,
    consumer_closed: Arc<AtomicBool>,
    claim: Option<SessionClaim>,
}

impl PairingSession {
    /// Release everything the session holds. Idempotent.
    ///
    /// No answer is dispatched after this starts; `abort` alone does not wait
    /// for a consumer running on another worker.
    fn teardown(&mut self) {
        let Some(claim) = self.claim.take() else {
            return;
        };

        self.consumer_closed.store(true, Ordering::Release);
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }

        if let Some(observer) = self.observer.take() {
            if let Err(e) = self.adapter.unregister_observer(&self.observer_name, &observer) {
                error!("Failed to unregister {}: {}", self.observer_name, e);
            }
        }

        self.notifications.close();
        while self.notifications.try_recv().is_ok() {}

        drop(claim);
        info!("Pairing session {} torn down", self.observer_name);
    }
}

impl Drop for PairingSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Lazy stream of pairing events for one session
///
/// Ends with `None` when the client closes its answer stream, or with a
/// single `Err` when the session fails. Dropping it cancels the session.
pub struct PairingEventStream {
    session: Option<PairingSession>,
}

impl PairingEventStream {
    fn finish(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
    }
}

impl Stream for PairingEventStream {
    type Item = Result<PairingEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(session) = this.session.as_mut() else {
            return Poll::Ready(None);
        };

        // Drain pending notifications before looking at the consumer so that
        // everything the stack raised before the answers ended is delivered.
        loop {
            match session.notifications.poll_recv(cx) {
                Poll::Ready(Some(notification)) => {
                    if let Some(event) = event_from_notification(&notification) {
                        debug!("Delivering pairing event for {}", notification.address);
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(None) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        let Some(consumer) = session.consumer.as_mut() else {
            this.finish();
            return Poll::Ready(None);
        };

        match Pin::new(consumer).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(outcome) => {
                session.consumer = None;
                let item = match outcome {
                    Ok(Ok(())) => {
                        debug!("Answers finished, ending pairing session");
                        None
                    }
                    Ok(Err(e)) if !e.is_session_fatal() => {
                        debug!("Pairing session ended: {}", e);
                        None
                    }
                    Ok(Err(e)) => {
                        error!("Pairing session failed: {}", e);
                        Some(Err(e))
                    }
                    Err(e) if e.is_cancelled() => None,
                    Err(e) => {
                        error!("Answer consumer crashed: {}", e);
                        Some(Err(BridgeError::Internal(format!(
                            "answer consumer failed: {}",
                            e
                        ))))
                    }
                };
                this.finish();
                Poll::Ready(item)
            }
        }
    }
}

impl Drop for PairingEventStream {
    fn drop(&mut self) {
        if self.session.is_some() {
            debug!("Pairing event stream dropped, cancelling session");
        }
        self.finish();
    }
}

/// Bridges pairing requests from the stack to one client at a time
pub struct PairingEventBridge {
    adapter: Arc<dyn StackAdapter>,
    active: Arc<AtomicBool>,
}

impl PairingEventBridge {
    pub fn new(adapter: Arc<dyn StackAdapter>) -> Self {
        Self {
            adapter,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a session currently holds this bridge
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a pairing session driven by `answers`
    ///
    /// Must be called from within a Tokio runtime; the answer consumer runs on
    /// its own task.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ResourceBusy` if a session is already active or
    /// the stack refuses the observer. Nothing of the active session is
    /// touched in that case.
    pub fn run_session(&self, answers: AnswerStream) -> Result<PairingEventStream> {
        let claim = SessionClaim::acquire(&self.active)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let observer = PairingObserver::new(tx);
        let observer_name = observer.name().to_string();
        let observer: Arc<dyn AdapterCallbacks> = Arc::new(observer);

        self.adapter
            .register_observer(&observer_name, observer.clone())
            .map_err(|e| match e {
                BridgeError::ResourceBusy(_) => e,
                other => BridgeError::ResourceBusy(format!("stack refused observer: {}", other)),
            })?;

        let consumer = AnswerConsumer::new(self.adapter.clone());
        let consumer_closed = consumer.closed_flag();
        let consumer = consumer.spawn(answers);

        info!("Pairing session {} started", observer_name);

        Ok(PairingEventStream {
            session: Some(PairingSession {
                adapter: self.adapter.clone(),
                observer_name,
                observer: Some(observer),
                notifications: rx,
                consumer: Some(consumer),
                consumer_closed,
                claim: Some(claim),
            }),
        })
    }
}
