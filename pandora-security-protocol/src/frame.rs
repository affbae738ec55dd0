//! Wire Frames
//!
//! RPCs travel over a byte stream as JSON frames terminated by a single
//! newline. A connection carries exactly one call.
//!
//! ## Frame Types
//!
//! - `call`: opens the RPC; carries the method and, for unary RPCs, the request
//! - `message`: one streamed or unary message
//! - `half_close`: the client has no more messages to send
//! - `status`: the server's final word, with a numeric gRPC status code
//!
//! ## Example Exchange
//!
//! ```text
//! → {"type":"call","method":"/pandora.Security/OnPairing","body":null}
//! ← {"type":"message","body":{"connection":{...},"justWorks":{}}}
//! → {"type":"message","body":{"event":{...},"confirm":true}}
//! → {"type":"half_close"}
//! ← {"type":"status","code":0,"message":""}
//! ```

use crate::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tonic::{Code, Status};

/// Maximum frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// RPC methods reachable over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "/pandora.Security/OnPairing")]
    OnPairing,
    #[serde(rename = "/pandora.Security/Secure")]
    Secure,
    #[serde(rename = "/pandora.Security/WaitSecurity")]
    WaitSecurity,
    #[serde(rename = "/pandora.SecurityStorage/IsBonded")]
    IsBonded,
    #[serde(rename = "/pandora.SecurityStorage/DeleteBond")]
    DeleteBond,
}

impl Method {
    /// Whether the client streams messages after the call frame
    pub fn is_client_streaming(&self) -> bool {
        matches!(self, Method::OnPairing)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = match self {
            Method::OnPairing => "/pandora.Security/OnPairing",
            Method::Secure => "/pandora.Security/Secure",
            Method::WaitSecurity => "/pandora.Security/WaitSecurity",
            Method::IsBonded => "/pandora.SecurityStorage/IsBonded",
            Method::DeleteBond => "/pandora.SecurityStorage/DeleteBond",
        };
        f.write_str(path)
    }
}

/// A single unit on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Open an RPC
    Call {
        method: Method,
        #[serde(default)]
        body: Value,
    },
    /// One message of the RPC
    Message { body: Value },
    /// No more client messages
    HalfClose,
    /// Final RPC status
    Status { code: i32, message: String },
}

impl Frame {
    /// Wrap a serializable message
    pub fn message<T: Serialize>(message: &T) -> Result<Self> {
        Ok(Frame::Message {
            body: serde_json::to_value(message)?,
        })
    }

    /// Final frame for `status`
    pub fn status(status: &Status) -> Self {
        Frame::Status {
            code: status.code() as i32,
            message: status.message().to_string(),
        }
    }

    /// Final frame for a successful RPC
    pub fn ok() -> Self {
        Frame::Status {
            code: Code::Ok as i32,
            message: String::new(),
        }
    }

    /// Decode the body of a `call` or `message` frame
    pub fn decode_body<T: DeserializeOwned>(body: Value) -> Result<T> {
        serde_json::from_value(body)
            .map_err(|e| BridgeError::InvalidPacket(format!("bad message body: {}", e)))
    }

    /// Serialize to bytes with newline terminator
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_string(self)?;
        let mut bytes = json.into_bytes();
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Deserialize from bytes
    ///
    /// Accepts `\n`, `\r\n` or no terminator.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let trimmed = data
            .strip_suffix(b"\r\n")
            .or_else(|| data.strip_suffix(b"\n"))
            .unwrap_or(data);

        serde_json::from_slice(trimmed)
            .map_err(|e| BridgeError::InvalidPacket(format!("Failed to deserialize frame: {}", e)))
    }
}

/// Read one frame, or `None` at end of stream
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(max_size as u64 + 1);
    let read = limited.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(None);
    }

    if line.len() > max_size {
        return Err(BridgeError::InvalidPacket(format!(
            "Frame too large: {} bytes (max {})",
            line.len(),
            max_size
        )));
    }

    Frame::from_bytes(&line).map(Some)
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn test_call_frame_json() {
        let frame = Frame::Call {
            method: Method::IsBonded,
            body: json!({"public": "qrvM3e7/"}),
        };
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "call");
        assert_eq!(value["method"], "/pandora.SecurityStorage/IsBonded");
    }

    #[test]
    fn test_only_pairing_streams_from_client() {
        assert!(Method::OnPairing.is_client_streaming());
        for method in [
            Method::Secure,
            Method::WaitSecurity,
            Method::IsBonded,
            Method::DeleteBond,
        ] {
            assert!(!method.is_client_streaming());
        }
    }

    #[test]
    fn test_from_bytes_accepts_crlf() {
        let frame = Frame::from_bytes(b"{\"type\":\"half_close\"}\r\n").unwrap();
        assert_eq!(frame, Frame::HalfClose);
    }

    #[test]
    fn test_status_frame() {
        let frame = Frame::status(&Status::unimplemented("Method not implemented!"));
        assert_eq!(
            frame,
            Frame::Status {
                code: Code::Unimplemented as i32,
                message: "Method not implemented!".to_string(),
            }
        );
        assert_eq!(Code::Unimplemented as i32, 12);
    }

    #[test]
    fn test_invalid_frame() {
        let error = Frame::from_bytes(b"{\"type\":\"shout\"}").unwrap_err();
        assert!(matches!(error, BridgeError::InvalidPacket(_)));
    }

    #[tokio::test]
    async fn test_read_frames_until_eof() {
        let data = concat!(
            "{\"type\":\"call\",\"method\":\"/pandora.Security/OnPairing\"}\n",
            "{\"type\":\"half_close\"}\n",
        )
        .as_bytes();
        let mut reader = BufReader::new(data);

        let first = read_frame(&mut reader, MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(
            first,
            Some(Frame::Call {
                method: Method::OnPairing,
                body: Value::Null,
            })
        );
        assert_eq!(
            read_frame(&mut reader, MAX_FRAME_SIZE).await.unwrap(),
            Some(Frame::HalfClose)
        );
        assert_eq!(read_frame(&mut reader, MAX_FRAME_SIZE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let data = format!("{{\"type\":\"message\",\"body\":\"{}\"}}\n", "x".repeat(64));
        let mut reader = BufReader::new(data.as_bytes());

        let error = read_frame(&mut reader, 16).await.unwrap_err();
        assert!(matches!(error, BridgeError::InvalidPacket(_)));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, &Frame::ok()).await.unwrap();
        assert_eq!(out, b"{\"type\":\"status\",\"code\":0,\"message\":\"\"}\n");
    }
}
