//! Binary audio framing (spec.md §3 `AudioFrame`, §4.1 "Binary framing").
//!
//! Frames identify their session via an 8-byte truncated hash of the
//! session UUID rather than a JSON wrapper, so no per-frame text parsing is
//! needed on the hot path. All multi-byte integers and the PCM payload are
//! little-endian (spec.md §6.1).

use uuid::Uuid;

/// `0x01` — the only magic byte this protocol version emits.
pub const MAGIC: u8 = 0x01;

/// Wire header size in bytes (spec.md §3: "12-byte header").
pub const HEADER_LEN: usize = 12;

/// Audio frame direction, carried as a single byte in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn to_byte(self) -> u8 {
        match self {
            Direction::Inbound => 0x00,
            Direction::Outbound => 0x01,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Direction::Inbound),
            0x01 => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// First 8 bytes of SHA-256(session_id), used as a compact per-frame
/// session tag (spec.md §3, property P7: a pure function of `session_id`
/// with effectively-unique output across distinct sessions).
pub fn session_hash(session_id: &Uuid) -> [u8; 8] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// A decoded binary audio frame: header fields plus PCM payload. The
/// payload is a plain `Vec<u8>` here; the ring buffer (`voice-media-fork`)
/// stores frames by reference/slice to avoid copies on the hot path.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub direction: Direction,
    pub session_hash: [u8; 8],
    pub payload: Vec<u8>,
}

/// Errors decoding a binary frame. Per spec.md §4.1, a session-hash
/// mismatch is NOT an error here — that check happens one layer up where
/// the active-session table is available, and a mismatch is silently
/// dropped rather than rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    #[error("frame shorter than the {HEADER_LEN}-byte header")]
    TooShort,
    #[error("bad magic byte: {0:#x}")]
    BadMagic(u8),
    #[error("unknown direction byte: {0:#x}")]
    BadDirection(u8),
}

/// Encode a frame: 1 magic + 1 direction + 8 session-hash + 2 reserved + payload.
pub fn encode(frame: &AudioFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + frame.payload.len());
    out.push(MAGIC);
    out.push(frame.direction.to_byte());
    out.extend_from_slice(&frame.session_hash);
    out.extend_from_slice(&[0u8, 0u8]); // reserved
    out.extend_from_slice(&frame.payload);
    out
}

/// Decode a frame from raw bytes as received off the WebSocket binary channel.
pub fn decode(bytes: &[u8]) -> Result<AudioFrame, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::TooShort);
    }
    if bytes[0] != MAGIC {
        return Err(FrameError::BadMagic(bytes[0]));
    }
    let direction = Direction::from_byte(bytes[1]).ok_or(FrameError::BadDirection(bytes[1]))?;
    let mut session_hash = [0u8; 8];
    session_hash.copy_from_slice(&bytes[2..10]);
    // bytes[10..12] are reserved and ignored.
    let payload = bytes[HEADER_LEN..].to_vec();
    Ok(AudioFrame { direction, session_hash, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_frame() {
        let sid = Uuid::new_v4();
        let frame = AudioFrame {
            direction: Direction::Inbound,
            session_hash: session_hash(&sid),
            payload: vec![0xAB; 320],
        };
        let bytes = encode(&frame);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.direction, Direction::Inbound);
        assert_eq!(decoded.session_hash, frame.session_hash);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn distinct_sessions_get_distinct_hashes() {
        let a = session_hash(&Uuid::new_v4());
        let b = session_hash(&Uuid::new_v4());
        assert_ne!(a, b);
    }

    #[test]
    fn session_hash_is_pure() {
        let sid = Uuid::new_v4();
        assert_eq!(session_hash(&sid), session_hash(&sid));
    }

    #[test]
    fn rejects_short_frames() {
        assert!(matches!(decode(&[0x01, 0x00]), Err(FrameError::TooShort)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0] = 0x99;
        assert!(matches!(decode(&bytes), Err(FrameError::BadMagic(0x99))));
    }
}
