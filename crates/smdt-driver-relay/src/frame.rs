//! Relay board wire format.
//!
//! Each command is a fixed 4-byte frame:
//!
//! | byte | value                      |
//! |------|----------------------------|
//! | 0    | `0x7B` (`{`)               |
//! | 1    | physical tube position     |
//! | 2    | `1` connect, `0` disconnect |
//! | 3    | `0x7D` (`}`)               |
//!
//! The board sends no acknowledgement.

use crate::error::RelayError;

pub const FRAME_START: u8 = b'{';
pub const FRAME_END: u8 = b'}';
pub const FRAME_LEN: usize = 4;

/// One relay command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayFrame {
    pub tube: u8,
    pub enable: bool,
}

impl RelayFrame {
    pub fn connect(tube: u8) -> Self {
        Self { tube, enable: true }
    }

    pub fn disconnect(tube: u8) -> Self {
        Self {
            tube,
            enable: false,
        }
    }

    pub fn encode(self) -> [u8; FRAME_LEN] {
        [FRAME_START, self.tube, u8::from(self.enable), FRAME_END]
    }

    /// Parse a frame as the board would.
    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        match bytes {
            [FRAME_START, tube, enable @ (0 | 1), FRAME_END] => Ok(Self {
                tube: *tube,
                enable: *enable == 1,
            }),
            _ => Err(RelayError::MalformedFrame {
                bytes: bytes.to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_connect_and_disconnect() {
        assert_eq!(RelayFrame::connect(5).encode(), [b'{', 5, 1, b'}']);
        assert_eq!(RelayFrame::disconnect(5).encode(), [0x7B, 5, 0, 0x7D]);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert_eq!(
            RelayFrame::decode(&[b'{', 63, 1, b'}']).unwrap(),
            RelayFrame::connect(63)
        );
        assert!(RelayFrame::decode(&[b'{', 1, 2, b'}']).is_err());
        assert!(RelayFrame::decode(&[b'[', 1, 1, b']']).is_err());
        assert!(RelayFrame::decode(&[b'{', 1, 1]).is_err());
    }
}
