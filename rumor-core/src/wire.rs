//! Datagram framing: length-prefix (4 bytes LE) + bincode-encoded envelope.

use crate::envelope::Envelope;
use crate::protocol::Message;

const LEN_SIZE: usize = 4;
/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Encode a message into one datagram: 4 bytes LE length + bincode envelope.
pub fn encode_datagram(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(&msg.to_envelope()).map_err(FrameEncodeError::Encode)?;
    if LEN_SIZE + payload.len() > MAX_DATAGRAM_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message (bincode or datagram size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("datagram too large")]
    TooLarge,
}

/// Decode one datagram into its envelope without classifying it.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::Truncated);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_DATAGRAM_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    let body = &bytes[LEN_SIZE..];
    if body.len() < len {
        return Err(FrameDecodeError::Truncated);
    }
    if body.len() > len {
        return Err(FrameDecodeError::TrailingBytes);
    }
    bincode::deserialize(body).map_err(FrameDecodeError::Decode)
}

/// Decode and classify one datagram.
pub fn decode_datagram(bytes: &[u8]) -> Result<Message, FrameDecodeError> {
    decode_envelope(bytes)?
        .classify()
        .ok_or(FrameDecodeError::Unrecognized)
}

/// Error decoding a datagram. Every variant means "drop it".
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("datagram truncated")]
    Truncated,
    #[error("bytes after frame")]
    TrailingBytes,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
    #[error("unrecognized field set")]
    Unrecognized,
}
