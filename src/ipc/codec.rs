//! Frame codec for the IPC wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ type(1B) │   msgpack payload      │
//! │ u32 BE   │ u8       │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(type byte) + sizeof(payload), NOT including the 4-byte prefix.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Message type: request from client.
pub const MSG_REQUEST: u8 = 0x01;
/// Message type: response to client.
pub const MSG_RESPONSE: u8 = 0x02;
/// Message type: bus signal addressed to the client.
pub const MSG_SIGNAL: u8 = 0x05;
/// Message type: greeting carrying the client's unique bus name.
pub const MSG_HELLO: u8 = 0x06;
/// Message type: error response to client.
pub const MSG_ERROR: u8 = 0xFF;

/// Method call sent by a client in a `MSG_REQUEST` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Echoed in the reply.
    #[serde(default)]
    pub id: String,
    /// Bus name the target object must belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub path: String,
    pub method: String,
    #[serde(default = "empty_body")]
    pub body: Value,
}

fn empty_body() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Encode a payload as msgpack with named fields.
pub fn encode<T: Serialize>(value: &T) -> std::io::Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| {
        tracing::error!("Msgpack encoding failed: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })
}

/// Decode a msgpack payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> std::io::Result<T> {
    rmp_serde::from_slice(payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Read one frame from the stream.
///
/// Returns `(msg_type, payload_bytes)`. Returns `None` on clean EOF.
/// `max_frame_bytes` caps the maximum accepted payload size.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", frame_len),
        ));
    }
    if frame_len < 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Frame too short: missing type byte",
        ));
    }

    let mut frame_data = vec![0u8; frame_len as usize];
    reader.read_exact(&mut frame_data).await?;

    let payload = frame_data.split_off(1);
    Ok(Some((frame_data[0], payload)))
}

/// Write one frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let frame_len = u32::try_from(payload.len() + 1).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Frame exceeds u32 length")
    })?;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(&[msg_type]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, MSG_SIGNAL, &[0xAA, 0xBB]).await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, MSG_SIGNAL, 0xAA, 0xBB]);

        let mut reader = buf.as_slice();
        let (msg_type, payload) = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(msg_type, MSG_SIGNAL);
        assert_eq!(payload, vec![0xAA, 0xBB]);
        assert!(read_frame(&mut reader, 1024).await.unwrap().is_none());
    }

    #[test]
    fn test_request_defaults() {
        let payload = encode(&serde_json::json!({
            "path": "/org/freedesktop/InputMethod",
            "method": "GetAddress",
        }))
        .unwrap();
        let request: Request = decode(&payload).unwrap();
        assert_eq!(request.id, "");
        assert_eq!(request.destination, None);
        assert_eq!(request.body, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_empty_frames() {
        let mut oversized: &[u8] = &[0, 0, 1, 0, MSG_REQUEST];
        let err = read_frame(&mut oversized, 16).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let mut empty: &[u8] = &[0, 0, 0, 0];
        let err = read_frame(&mut empty, 16).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
