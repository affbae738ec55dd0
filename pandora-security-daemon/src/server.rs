//! RPC Server
//!
//! Serves the Security and SecurityStorage RPCs over TCP, one call per
//! connection. See [`pandora_security_protocol::frame`] for the framing.

use anyhow::Result;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use pandora_security_protocol::frame::{read_frame, write_frame};
use pandora_security_protocol::proto::PairingEventAnswer;
use pandora_security_protocol::{
    AnswerStream, BridgeError, Frame, Method, Security, SecurityStorage,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tonic::Status;
use tracing::{debug, error, info, warn};

/// Dispatches calls to the RPC services
pub struct Server {
    security: Arc<dyn Security>,
    storage: Arc<dyn SecurityStorage>,
    max_frame_size: usize,
}

/// Decode a unary request, treating a missing body as an empty message
fn decode_request<T: DeserializeOwned>(body: Value) -> Result<T, Status> {
    let body = if body.is_null() {
        Value::Object(Default::default())
    } else {
        body
    };
    Frame::decode_body(body).map_err(Status::from)
}

fn encode_response<T: Serialize>(result: Result<T, Status>) -> Result<Value, Status> {
    let response = result?;
    serde_json::to_value(&response)
        .map_err(|e| Status::internal(format!("failed to encode response: {}", e)))
}

/// Write the response of a unary call
async fn reply<W>(writer: &mut W, result: Result<Value, Status>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match result {
        Ok(response) => {
            write_frame(writer, &Frame::message(&response)?).await?;
            write_frame(writer, &Frame::ok()).await?;
        }
        Err(status) => {
            debug!("Call failed: {:?} {}", status.code(), status.message());
            write_frame(writer, &Frame::status(&status)).await?;
        }
    }
    Ok(())
}

/// Feed answer frames from the client into the session's answer stream
///
/// Ends on `half_close` or end of stream. A lost connection is reported as a
/// cancellation.
async fn forward_answers<R>(
    mut reader: R,
    answers: UnboundedSender<Result<PairingEventAnswer, Status>>,
    max_frame_size: usize,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        let item = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(Frame::Message { body })) => {
                Frame::decode_body::<PairingEventAnswer>(body).map_err(Status::from)
            }
            Ok(Some(Frame::HalfClose)) | Ok(None) => {
                debug!("Client closed its answer stream");
                break;
            }
            Ok(Some(other)) => Err(Status::invalid_argument(format!(
                "unexpected frame in answer stream: {:?}",
                other
            ))),
            Err(BridgeError::Io(e)) => Err(Status::cancelled(format!("connection lost: {}", e))),
            Err(e) => Err(Status::from(e)),
        };

        let last = item.is_err();
        if answers.unbounded_send(item).is_err() || last {
            break;
        }
    }
}

impl Server {
    pub fn new(
        security: Arc<dyn Security>,
        storage: Arc<dyn SecurityStorage>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            security,
            storage,
            max_frame_size,
        }
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping RPC listener");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote_addr)) => {
                            debug!("Accepted connection from {}", remote_addr);
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream).await {
                                    warn!("Connection from {} failed: {:#}", remote_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Serve the single call carried by `stream`
    pub async fn handle_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let Some(frame) = read_frame(&mut reader, self.max_frame_size).await? else {
            debug!("Connection closed before any call");
            return Ok(());
        };

        let (method, body) = match frame {
            Frame::Call { method, body } => (method, body),
            other => {
                warn!("Expected a call frame, got {:?}", other);
                let status = Status::invalid_argument("expected a call frame");
                write_frame(&mut writer, &Frame::status(&status)).await?;
                return Ok(());
            }
        };

        debug!("Call {}", method);

        if method.is_client_streaming() {
            return self.serve_pairing(reader, &mut writer).await;
        }

        let result = self.call_unary(method, body).await;
        reply(&mut writer, result).await
    }

    /// Run a unary call and encode its response
    async fn call_unary(&self, method: Method, body: Value) -> Result<Value, Status> {
        match method {
            Method::Secure => encode_response(self.security.secure(decode_request(body)?).await),
            Method::WaitSecurity => {
                encode_response(self.security.wait_security(decode_request(body)?).await)
            }
            Method::IsBonded => {
                encode_response(self.storage.is_bonded(decode_request(body)?).await)
            }
            Method::DeleteBond => {
                encode_response(self.storage.delete_bond(decode_request(body)?).await)
            }
            Method::OnPairing => Err(Status::internal(format!("{} is not a unary call", method))),
        }
    }

    /// Run an `OnPairing` call until either side ends it
    async fn serve_pairing<R, W>(&self, reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let (tx, rx) = unbounded();
        let answers: AnswerStream = Box::pin(rx);
        let forwarder = tokio::spawn(forward_answers(reader, tx, self.max_frame_size));

        let result = self.stream_events(answers, writer).await;
        forwarder.abort();

        let last = result?;
        write_frame(writer, &last).await?;
        Ok(())
    }

    /// Write pairing events and return the closing status frame
    async fn stream_events<W>(&self, answers: AnswerStream, writer: &mut W) -> Result<Frame>
    where
        W: AsyncWrite + Unpin,
    {
        let mut events = match self.security.on_pairing(answers).await {
            Ok(events) => events,
            Err(status) => {
                warn!("OnPairing refused: {}", status.message());
                return Ok(Frame::status(&status));
            }
        };

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => write_frame(writer, &Frame::message(&event)?).await?,
                Err(status) => return Ok(Frame::status(&status)),
            }
        }

        Ok(Frame::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pandora_security_protocol::proto::{PairingEvent, PairingMethod};
    use pandora_security_protocol::{
        AdapterCallbacks, ObserverRegistry, RemoteDevice, SecurityService,
        SecurityStorageService, SspVariant, StackAdapter, MAX_FRAME_SIZE,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tonic::Code;

    const PEER: &str = "AA:BB:CC:DD:EE:FF";

    #[derive(Default)]
    struct FakeStack {
        registry: ObserverRegistry,
        confirmations: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl StackAdapter for FakeStack {
        fn register_observer(
            &self,
            name: &str,
            observer: Arc<dyn AdapterCallbacks>,
        ) -> pandora_security_protocol::Result<()> {
            self.registry.register(name, observer)
        }

        fn unregister_observer(
            &self,
            name: &str,
            observer: &Arc<dyn AdapterCallbacks>,
        ) -> pandora_security_protocol::Result<()> {
            self.registry.unregister(name, observer)
        }

        async fn set_pairing_confirmation(
            &self,
            address: &str,
            accept: bool,
        ) -> pandora_security_protocol::Result<()> {
            self.confirmations
                .lock()
                .unwrap()
                .push((address.to_string(), accept));
            Ok(())
        }
    }

    struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn send(&mut self, frame: Frame) {
            write_frame(&mut self.writer, &frame).await.unwrap();
        }

        async fn recv(&mut self) -> Frame {
            tokio::time::timeout(
                Duration::from_secs(5),
                read_frame(&mut self.reader, MAX_FRAME_SIZE),
            )
            .await
            .expect("server stalled")
            .unwrap()
            .expect("server closed the connection")
        }
    }

    fn connect(server: &Arc<Server>) -> Client {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let server = server.clone();
        tokio::spawn(async move { server.handle_connection(server_side).await });

        let (reader, writer) = tokio::io::split(client);
        Client {
            reader: BufReader::new(reader),
            writer,
        }
    }

    fn setup() -> (Arc<FakeStack>, Arc<Server>) {
        let stack = Arc::new(FakeStack::default());
        let server = Arc::new(Server::new(
            Arc::new(SecurityService::new(stack.clone())),
            Arc::new(SecurityStorageService::new()),
            MAX_FRAME_SIZE,
        ));
        (stack, server)
    }

    async fn wait_for_observer(stack: &FakeStack) {
        for _ in 0..500 {
            if !stack.registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pairing session never registered");
    }

    fn status_code(frame: &Frame) -> i32 {
        match frame {
            Frame::Status { code, .. } => *code,
            other => panic!("expected status frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unimplemented_calls() {
        let (_stack, server) = setup();

        for (method, body) in [
            (Method::Secure, json!({"classic": "LEVEL2"})),
            (Method::WaitSecurity, Value::Null),
            (Method::IsBonded, json!({"public": "qrvM3e7/"})),
            (Method::DeleteBond, json!({"random": "qrvM3e7/"})),
        ] {
            let mut client = connect(&server);
            client.send(Frame::Call { method, body }).await;

            assert_eq!(
                client.recv().await,
                Frame::Status {
                    code: Code::Unimplemented as i32,
                    message: "Method not implemented!".to_string(),
                }
            );
        }
    }

    #[tokio::test]
    async fn test_first_frame_must_be_call() {
        let (_stack, server) = setup();
        let mut client = connect(&server);

        client.send(Frame::HalfClose).await;
        assert_eq!(status_code(&client.recv().await), Code::InvalidArgument as i32);
    }

    #[tokio::test]
    async fn test_pairing_round_trip() {
        let (stack, server) = setup();
        let mut client = connect(&server);

        client
            .send(Frame::Call {
                method: Method::OnPairing,
                body: Value::Null,
            })
            .await;
        wait_for_observer(&stack).await;

        stack.registry.dispatch_ssp_request(
            &RemoteDevice::new(PEER, "Phone"),
            0,
            SspVariant::PasskeyConfirmation,
            123456,
        );

        let event: PairingEvent = match client.recv().await {
            Frame::Message { body } => Frame::decode_body(body).unwrap(),
            other => panic!("expected event, got {:?}", other),
        };
        assert_eq!(event.method, Some(PairingMethod::NumericComparison(123456)));

        let answer = PairingEventAnswer::confirm(event, true);
        client.send(Frame::message(&answer).unwrap()).await;
        client.send(Frame::HalfClose).await;

        assert_eq!(client.recv().await, Frame::ok());
        assert_eq!(
            *stack.confirmations.lock().unwrap(),
            vec![(PEER.to_string(), true)]
        );
        assert!(stack.registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_pairing_is_busy() {
        let (stack, server) = setup();

        let mut first = connect(&server);
        first
            .send(Frame::Call {
                method: Method::OnPairing,
                body: Value::Null,
            })
            .await;
        wait_for_observer(&stack).await;

        let mut second = connect(&server);
        second
            .send(Frame::Call {
                method: Method::OnPairing,
                body: Value::Null,
            })
            .await;
        assert_eq!(
            status_code(&second.recv().await),
            Code::ResourceExhausted as i32
        );

        first.send(Frame::HalfClose).await;
        assert_eq!(first.recv().await, Frame::ok());
    }

    #[tokio::test]
    async fn test_undecodable_answer_fails_session() {
        let (stack, server) = setup();
        let mut client = connect(&server);

        client
            .send(Frame::Call {
                method: Method::OnPairing,
                body: Value::Null,
            })
            .await;
        wait_for_observer(&stack).await;

        client
            .send(Frame::Message {
                body: json!({"confirm": "yes please"}),
            })
            .await;

        let code = status_code(&client.recv().await);
        assert_eq!(code, Code::InvalidArgument as i32);
        assert!(stack.confirmations.lock().unwrap().is_empty());
        assert!(stack.registry.is_empty());
    }
}
