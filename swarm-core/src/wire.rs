//! Framing: length-prefix (4 bytes LE) + version byte + bincode payload.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::PROTOCOL_VERSION;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024; // 64 MiB

/// Requests carry two digests at most; anything bigger is not a request.
pub const MAX_REQUEST_LEN: u32 = 64 * 1024;

/// Largest chunk payload whose `Chunk` response still fits in one frame.
/// The margin covers the version byte and the response envelope.
pub const MAX_CHUNK_LENGTH: u64 = MAX_FRAME_LEN as u64 - 64;

/// Encode a message into a single frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    let body_len = payload.len() + 1;
    if body_len > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Body length announced by a frame header, rejected above `max`.
/// Stream readers call this, then read that many bytes.
pub fn body_len(header: [u8; LEN_SIZE], max: u32) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(header);
    if len > max.min(MAX_FRAME_LEN) {
        return Err(FrameDecodeError::TooLarge);
    }
    if len == 0 {
        return Err(FrameDecodeError::Empty);
    }
    Ok(len as usize)
}

/// Decode a frame body (everything after the length prefix).
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameDecodeError> {
    let (&version, payload) = body.split_first().ok_or(FrameDecodeError::Empty)?;
    if version != PROTOCOL_VERSION {
        return Err(FrameDecodeError::Version(version));
    }
    bincode::deserialize(payload).map_err(FrameDecodeError::Decode)
}

/// Error decoding a frame (bad header, version or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too large")]
    TooLarge,
    #[error("empty frame")]
    Empty,
    #[error("unsupported protocol version {0}")]
    Version(u8),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, Response};

    fn chunk_request() -> Request {
        Request::Chunk {
            info_hash: "ab".repeat(32),
            chunk_hash: "cd".repeat(32),
        }
    }

    fn split(frame: &[u8]) -> (usize, &[u8]) {
        let len = body_len([frame[0], frame[1], frame[2], frame[3]], MAX_FRAME_LEN).unwrap();
        (len, &frame[LEN_SIZE..])
    }

    #[test]
    fn chunk_response_survives_framing() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let frame = encode_frame(&Response::Chunk(Some(payload.clone()))).unwrap();
        let (len, body) = split(&frame);
        assert_eq!(len, body.len());
        assert_eq!(decode_body::<Response>(body).unwrap(), Response::Chunk(Some(payload)));
    }

    #[test]
    fn requests_fit_the_request_limit() {
        let frame = encode_frame(&chunk_request()).unwrap();
        let header = [frame[0], frame[1], frame[2], frame[3]];
        assert!(body_len(header, MAX_REQUEST_LEN).is_ok());
        let big = (MAX_REQUEST_LEN + 1).to_le_bytes();
        assert!(matches!(body_len(big, MAX_REQUEST_LEN), Err(FrameDecodeError::TooLarge)));
        assert!(body_len(big, MAX_FRAME_LEN).is_ok());
    }

    #[test]
    fn largest_chunk_fits_one_frame() {
        let frame = encode_frame(&Response::Chunk(Some(vec![0; MAX_CHUNK_LENGTH as usize]))).unwrap();
        assert!(frame.len() <= LEN_SIZE + MAX_FRAME_LEN as usize);
        drop(frame);
        let over = vec![0; MAX_FRAME_LEN as usize];
        assert!(matches!(
            encode_frame(&Response::Chunk(Some(over))),
            Err(FrameEncodeError::TooLarge)
        ));
    }

    #[test]
    fn truncated_body_is_a_decode_error() {
        let frame = encode_frame(&chunk_request()).unwrap();
        assert!(matches!(
            decode_body::<Request>(&frame[LEN_SIZE..frame.len() - 1]),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut frame = encode_frame(&chunk_request()).unwrap();
        frame[LEN_SIZE] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            decode_body::<Request>(&frame[LEN_SIZE..]),
            Err(FrameDecodeError::Version(_))
        ));
    }

    #[test]
    fn oversized_header_rejected() {
        let header = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(matches!(body_len(header, u32::MAX), Err(FrameDecodeError::TooLarge)));
        assert!(matches!(body_len([0; 4], MAX_FRAME_LEN), Err(FrameDecodeError::Empty)));
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let body = [PROTOCOL_VERSION, 0xff, 0xff];
        assert!(matches!(decode_body::<Request>(&body), Err(FrameDecodeError::Decode(_))));
        assert!(matches!(decode_body::<Request>(&[]), Err(FrameDecodeError::Empty)));
    }
}
