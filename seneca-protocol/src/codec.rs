//! Message codec for pipe transport framing
//!
//! JSON-RPC frames travel either with a 4-byte big-endian length prefix or
//! one per line (the MCP stdio convention). Both directions use the same
//! codec; classification of decoded frames happens in [`JsonRpcMessage`].

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::JsonRpcMessage;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// How frames are delimited on the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// u32 big-endian length followed by the JSON body
    #[default]
    LengthPrefixed,
    /// One JSON document per `\n`-terminated line
    NewlineDelimited,
}

/// Codec for JSON-RPC frames in either framing
#[derive(Debug)]
pub struct JsonRpcCodec {
    framing: Framing,
    /// Offset already scanned for a newline (line framing only)
    next_index: usize,
}

impl JsonRpcCodec {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            next_index: 0,
        }
    }

    pub fn length_prefixed() -> Self {
        Self::new(Framing::LengthPrefixed)
    }

    pub fn newline_delimited() -> Self {
        Self::new(Framing::NewlineDelimited)
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn decode_length_prefixed(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<JsonRpcMessage>, CodecError> {
        // Need at least 4 bytes for length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        // Peek at length without consuming
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        // Check if we have the full message
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let data = src.split_to(len);
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn decode_line(&mut self, src: &mut BytesMut) -> Result<Option<JsonRpcMessage>, CodecError> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');
            let Some(offset) = newline else {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(CodecError::MessageTooLarge {
                        size: src.len(),
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;
            let line = src.split_to(end + 1);
            let body = &line[..end];
            let body = body.strip_suffix(b"\r").unwrap_or(body);

            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(serde_json::from_slice(body)?));
        }
    }
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self::new(Framing::default())
    }
}

impl Decoder for JsonRpcCodec {
    type Item = JsonRpcMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::LengthPrefixed => self.decode_length_prefixed(src),
            Framing::NewlineDelimited => self.decode_line(src),
        }
    }
}

impl Encoder<JsonRpcMessage> for JsonRpcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: JsonRpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serde_json::to_vec(&item)?;

        if data.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        match self.framing {
            Framing::LengthPrefixed => {
                dst.reserve(4 + data.len());
                dst.put_u32(data.len() as u32);
                dst.put_slice(&data);
            }
            Framing::NewlineDelimited => {
                dst.reserve(data.len() + 1);
                dst.put_slice(&data);
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{JsonRpcNotification, JsonRpcRequest};
    use serde_json::json;

    fn ping() -> JsonRpcMessage {
        JsonRpcRequest::new(1, "ping", json!({"echo": "seneca"})).into()
    }

    #[test]
    fn test_length_prefixed_roundtrip() {
        let mut codec = JsonRpcCodec::length_prefixed();
        let mut buf = BytesMut::new();
        codec.encode(ping(), &mut buf).unwrap();

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, ping());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_message() {
        let mut codec = JsonRpcCodec::length_prefixed();
        let mut buf = BytesMut::new();
        codec.encode(ping(), &mut buf).unwrap();

        // Split buffer to simulate partial read
        let mut partial = buf.split_to(6);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        assert_eq!(codec.decode(&mut partial).unwrap().unwrap(), ping());
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = JsonRpcCodec::length_prefixed();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_MESSAGE_SIZE + 1) as u32);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_in_one_buffer() {
        let mut codec = JsonRpcCodec::length_prefixed();
        let mut buf = BytesMut::new();
        let note: JsonRpcMessage =
            JsonRpcNotification::new("notifications/event", json!({})).into();
        codec.encode(ping(), &mut buf).unwrap();
        codec.encode(note.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), ping());
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), note);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_newline_roundtrip() {
        let mut codec = JsonRpcCodec::newline_delimited();
        let mut buf = BytesMut::new();
        codec.encode(ping(), &mut buf).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), ping());
    }

    #[test]
    fn test_newline_skips_blank_lines_and_crlf() {
        let mut codec = JsonRpcCodec::newline_delimited();
        let mut buf = BytesMut::from(
            &concat!(
                "\n  \r\n",
                r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{"echo":"seneca"}}"#,
                "\r\n"
            )
            .as_bytes()[..],
        );
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), ping());
    }

    #[test]
    fn test_newline_partial_line_resumes_scan() {
        let mut codec = JsonRpcCodec::newline_delimited();
        let mut buf = BytesMut::from(&b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"event\"}\n");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(
            decoded,
            JsonRpcMessage::Notification(n) if n.method == "notifications/event"
        ));
    }

    #[test]
    fn test_malformed_json_is_error() {
        let mut codec = JsonRpcCodec::newline_delimited();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_framing_serde_names() {
        let framing: Framing = serde_json::from_str("\"newline_delimited\"").unwrap();
        assert_eq!(framing, Framing::NewlineDelimited);
        assert_eq!(Framing::default(), Framing::LengthPrefixed);
    }

    #[tokio::test]
    async fn test_framed_over_duplex() {
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (a, b) = tokio::io::duplex(1024);
        let mut left = Framed::new(a, JsonRpcCodec::length_prefixed());
        let mut right = Framed::new(b, JsonRpcCodec::length_prefixed());

        left.send(ping()).await.unwrap();
        let received = right.next().await.unwrap().unwrap();
        assert_eq!(received, ping());
    }
}
