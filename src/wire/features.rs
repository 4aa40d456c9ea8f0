//! RAS Features characteristic payload.

use super::FrameError;

/// RAS feature bitmap (32-bit LE).
///
/// Bits: 0 = real-time ranging data, 1 = retrieve lost segments,
/// 2 = abort operation, 3 = filter ranging data. Remaining bits are
/// reserved for future use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RasFeatures(u32);

impl RasFeatures {
    /// No optional features.
    pub const NONE: Self = Self(0);
    /// Real-time ranging data supported.
    pub const REALTIME_RD: Self = Self(1 << 0);
    /// Retrieve-lost-segments operation supported.
    pub const RETRIEVE_LOST_SEGMENTS: Self = Self(1 << 1);
    /// Abort operation supported.
    pub const ABORT_OP: Self = Self(1 << 2);
    /// Ranging data filtering supported.
    pub const FILTER_RD: Self = Self(1 << 3);

    /// Build from a raw bitmap.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bitmap value.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether real-time ranging data is supported.
    pub fn realtime_rd(self) -> bool {
        self.0 & Self::REALTIME_RD.0 != 0
    }

    /// Whether lost-segment retrieval is supported.
    pub fn retrieve_lost_segments(self) -> bool {
        self.0 & Self::RETRIEVE_LOST_SEGMENTS.0 != 0
    }

    /// Whether the abort operation is supported.
    pub fn abort_op(self) -> bool {
        self.0 & Self::ABORT_OP.0 != 0
    }

    /// Whether ranging data filtering is supported.
    pub fn filter_rd(self) -> bool {
        self.0 & Self::FILTER_RD.0 != 0
    }

    /// Combine feature sets.
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Serialize the characteristic value.
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Parse a characteristic read.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < 4 {
            return Err(FrameError::TooShort {
                expected: 4,
                actual: bytes.len(),
            });
        }
        Ok(Self(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }
}
