//! Envelope codec for the correlation wire protocol.
//!
//! Envelope format (one per transport frame):
//! ```text
//! { "i": <integer request id>, "m": <opaque payload> }
//! ```
//! A reply whose `m` is the string `"error"` rejects the correlated request.
//!
//! Over TCP each envelope is additionally length-prefixed:
//! ```text
//! ┌──────────┬────────────────────────┐
//! │ len (4B) │   UTF-8 JSON envelope  │
//! │ u32 BE   │                        │
//! └──────────┴────────────────────────┘
//! ```
//! Inbound TCP frames longer than `max_frame_bytes` are skipped and reported
//! as malformed; the connection stays up.

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::rpc::pending::Settlement;
use crate::types::{Error, RequestId, Result};

/// Reply payload that marks a request as rejected by the server.
pub const ERROR_SENTINEL: &str = "error";

/// Correlation frame pairing a request id with an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "i")]
    pub id: RequestId,
    #[serde(rename = "m")]
    pub payload: Value,
}

impl Envelope {
    pub fn new(id: RequestId, payload: Value) -> Self {
        Self { id, payload }
    }

    /// Interpret a reply envelope: the error sentinel rejects, anything else resolves.
    pub fn into_settlement(self) -> Settlement {
        if self.payload.as_str() == Some(ERROR_SENTINEL) {
            Err(Error::Application {
                payload: self.payload,
            })
        } else {
            Ok(self.payload)
        }
    }
}

/// Serialize an outbound envelope to its text frame.
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse an inbound text frame.
///
/// Fails with `MalformedFrame` when the text is not JSON, is not an object,
/// or its `i` field is missing or not a non-negative integer. A missing `m`
/// decodes as `null`.
pub fn decode_envelope(frame: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| Error::malformed(format!("invalid JSON: {}", e)))?;

    let Value::Object(mut fields) = value else {
        return Err(Error::malformed("envelope is not an object"));
    };

    let id = fields
        .get("i")
        .and_then(Value::as_u64)
        .map(RequestId::new)
        .ok_or_else(|| Error::malformed("missing or non-integer \"i\" field"))?;
    let payload = fields.remove("m").unwrap_or(Value::Null);

    Ok(Envelope { id, payload })
}

const LENGTH_FIELD_BYTES: usize = 4;

/// One frame read off the TCP stream.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundFrame {
    Data(BytesMut),
    /// Length prefix exceeded the cap; the body is discarded unread.
    Oversized(usize),
}

/// Length-delimited framing used by the TCP transport.
///
/// Wraps [`LengthDelimitedCodec`]. A frame longer than `max_frame_bytes`
/// yields [`InboundFrame::Oversized`] and its body is skipped as it arrives,
/// so decoding resumes at the next length prefix. Outbound frames are not
/// capped beyond what the 4-byte length field can express.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    max_frame_bytes: usize,
    discarding: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .length_field_length(LENGTH_FIELD_BYTES)
            .big_endian()
            .max_frame_length(usize::try_from(u32::MAX).unwrap_or(usize::MAX))
            .new_codec();
        Self {
            inner,
            max_frame_bytes,
            discarding: 0,
        }
    }

    fn discard(&mut self, src: &mut BytesMut) {
        let n = self.discarding.min(src.len());
        src.advance(n);
        self.discarding -= n;
    }
}

impl Decoder for FrameCodec {
    type Item = InboundFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<InboundFrame>> {
        self.discard(src);
        if self.discarding > 0 || src.len() < LENGTH_FIELD_BYTES {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_bytes {
            src.advance(LENGTH_FIELD_BYTES);
            self.discarding = len;
            self.discard(src);
            return Ok(Some(InboundFrame::Oversized(len)));
        }

        // Hand the inner codec whole frames only, so it never holds a
        // half-read header across calls.
        let needed = LENGTH_FIELD_BYTES + len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }
        Ok(self.inner.decode(src)?.map(InboundFrame::Data))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> io::Result<()> {
        self.inner.encode(frame, dst)
    }
}
