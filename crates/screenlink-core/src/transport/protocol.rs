//! Envelope framing shared by every stream transport.
//!
//! A request travels as
//!
//! ```text
//! [u32 BE: preamble][u32 BE: magic][u32 BE: len][JSON header][u32 BE: len][payload]
//! ```
//!
//! and the reply as the same envelope without the preamble. The header is an
//! [`EnvelopeHeader`]: the call id, the optional comId, the function id and
//! the call status. The payload is the serde_json encoding of the method's
//! request or response type.
//!
//! Several calls may be in flight on one connection. The server echoes the
//! call id of each request in its reply, and replies may arrive in any order.

use super::{TransportError, WireReply, WireRequest};
use crate::config::TransportConfig;
use crate::status::{CallFailure, CallResult, CallStatus, FailureKind};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Status carried in every envelope header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStatus {
    #[serde(flatten)]
    pub outcome: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl WireStatus {
    pub fn ok() -> Self {
        Self {
            outcome: CallStatus::ok(),
            kind: None,
        }
    }

    pub fn failed(failure: &CallFailure) -> Self {
        Self {
            outcome: CallStatus::from(failure),
            kind: Some(failure.kind),
        }
    }

    /// Turn the status back into a call outcome.
    ///
    /// A failed status without a kind is reported as `Aborted`.
    pub fn into_result(self) -> CallResult<()> {
        if self.outcome.is_ok() {
            return Ok(());
        }
        Err(CallFailure::new(
            self.kind.unwrap_or(FailureKind::Aborted),
            self.outcome.error_message,
        ))
    }
}

/// JSON header of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Chosen by the client, echoed by the server.
    pub call_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub com_id: Option<String>,
    pub function_id: u32,
    pub status: WireStatus,
}

/// A reply envelope that has not yet been matched to its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub header: EnvelopeHeader,
    pub payload: Vec<u8>,
}

impl ReplyEnvelope {
    pub fn call_id(&self) -> u64 {
        self.header.call_id
    }

    /// Check that this envelope answers `request` and unwrap the reply.
    pub fn into_reply(self, request: &WireRequest) -> Result<WireReply, TransportError> {
        let header = self.header;
        if header.function_id != request.function_id || header.com_id != request.com_id {
            return Err(TransportError::Protocol(format!(
                "reply for function {} ({:?}) does not match request for function {} ({:?})",
                header.function_id, header.com_id, request.function_id, request.com_id
            )));
        }
        Ok(WireReply {
            status: header.status,
            payload: self.payload,
        })
    }
}

/// Read one big-endian u32.
///
/// Returns `None` when the stream ends before the first byte. A stream that
/// ends after some but not all four bytes is [`TransportError::Truncated`].
async fn read_u32<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    what: &'static str,
) -> Result<Option<u32>, TransportError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::Truncated(what));
        }
        filled += n;
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

async fn expect_u32<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    expected: u32,
    what: &'static str,
) -> Result<(), TransportError> {
    match read_u32(reader, what).await? {
        Some(value) if value == expected => Ok(()),
        Some(value) => Err(TransportError::Protocol(format!(
            "bad {}: expected {:#010x}, got {:#010x}",
            what, expected, value
        ))),
        None => Err(TransportError::Truncated(what)),
    }
}

/// Read a length-prefixed frame.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF before the length prefix.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, TransportError> {
    let len = match read_u32(reader, "frame length").await? {
        Some(len) => len as usize,
        None => return Ok(None),
    };

    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: TransportConfig::MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Truncated("frame body")
        } else {
            e.into()
        }
    })?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame. The caller flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), TransportError> {
    if payload.len() > TransportConfig::MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: TransportConfig::MAX_FRAME_SIZE,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

async fn read_envelope<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<(EnvelopeHeader, Vec<u8>), TransportError> {
    let header_bytes = read_frame(reader)
        .await?
        .ok_or(TransportError::Truncated("envelope header"))?;
    let header: EnvelopeHeader = serde_json::from_slice(&header_bytes)?;
    let payload = read_frame(reader)
        .await?
        .ok_or(TransportError::Truncated("envelope payload"))?;
    Ok((header, payload))
}

async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &EnvelopeHeader,
    payload: &[u8],
) -> Result<(), TransportError> {
    let header_bytes = serde_json::to_vec(header)?;
    writer
        .write_all(&TransportConfig::MAGIC_ENVELOPE.to_be_bytes())
        .await?;
    write_frame(writer, &header_bytes).await?;
    write_frame(writer, payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a request envelope, preamble included.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    call_id: u64,
    request: &WireRequest,
) -> Result<(), TransportError> {
    let header = EnvelopeHeader {
        call_id,
        com_id: request.com_id.clone(),
        function_id: request.function_id,
        status: WireStatus::ok(),
    };
    writer
        .write_all(&TransportConfig::MAGIC_PREAMBLE.to_be_bytes())
        .await?;
    write_envelope(writer, &header, &request.payload).await
}

/// Read a request envelope and its call id.
///
/// Returns `None` when the peer closed the connection between requests.
pub async fn read_request<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<(u64, WireRequest)>, TransportError> {
    match read_u32(reader, "preamble").await? {
        Some(TransportConfig::MAGIC_PREAMBLE) => {}
        Some(other) => {
            return Err(TransportError::Protocol(format!(
                "bad preamble: {:#010x}",
                other
            )))
        }
        None => return Ok(None),
    }
    expect_u32(reader, TransportConfig::MAGIC_ENVELOPE, "envelope magic").await?;

    let (header, payload) = read_envelope(reader).await?;
    let request = WireRequest {
        com_id: header.com_id,
        function_id: header.function_id,
        payload,
    };
    Ok(Some((header.call_id, request)))
}

/// Write the reply to call `call_id`, echoing the request's comId and
/// function id.
pub async fn write_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    call_id: u64,
    request: &WireRequest,
    reply: &WireReply,
) -> Result<(), TransportError> {
    let header = EnvelopeHeader {
        call_id,
        com_id: request.com_id.clone(),
        function_id: request.function_id,
        status: reply.status.clone(),
    };
    write_envelope(writer, &header, &reply.payload).await
}

/// Read the next reply envelope.
///
/// Returns `None` when the peer closed the connection between replies.
pub async fn read_reply<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<ReplyEnvelope>, TransportError> {
    match read_u32(reader, "envelope magic").await? {
        Some(TransportConfig::MAGIC_ENVELOPE) => {}
        Some(other) => {
            return Err(TransportError::Protocol(format!(
                "bad envelope magic: {:#010x}",
                other
            )))
        }
        None => return Ok(None),
    }
    let (header, payload) = read_envelope(reader).await?;
    Ok(Some(ReplyEnvelope { header, payload }))
}
