//! Decoding of variable-length numeric leaves.
//!
//! CodeView stores offsets, sizes and enumerator values as a numeric leaf: values below
//! [`LF_NUMERIC`](cv::LF_NUMERIC) are stored inline in two bytes, larger values are prefixed by a
//! two-byte tag naming the width and signedness of the value that follows.

use crate::cv;

/// A decoded numeric leaf.
///
/// Holds the leaf tag, the raw value bytes and the number of bytes the leaf occupied in its record.
/// An empty numeric (`encoded_size() == 0`) is returned for truncated or unsupported leaves.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Numeric<'d> {
    kind: u16,
    bytes: &'d [u8],
    encoded_size: usize,
}

/// Returns the size of the value following a numeric tag, or `None` for unknown tags.
fn value_size(kind: u16) -> Option<usize> {
    Some(match kind {
        cv::LF_CHAR => 1,
        cv::LF_SHORT | cv::LF_USHORT | cv::LF_REAL16 => 2,
        cv::LF_LONG | cv::LF_ULONG | cv::LF_REAL32 => 4,
        cv::LF_REAL48 => 6,
        cv::LF_REAL64 | cv::LF_QUADWORD | cv::LF_UQUADWORD | cv::LF_COMPLEX32 => 8,
        cv::LF_REAL80 => 10,
        cv::LF_REAL128 | cv::LF_OCTWORD | cv::LF_UOCTWORD | cv::LF_COMPLEX64 => 16,
        cv::LF_COMPLEX80 => 20,
        cv::LF_COMPLEX128 => 32,
        cv::LF_VARSTRING | cv::LF_DECIMAL | cv::LF_DATE | cv::LF_UTF8STRING => 0,
        _ => return None,
    })
}

impl<'d> Numeric<'d> {
    /// Decodes the numeric leaf at the start of `data`.
    pub fn parse(data: &'d [u8]) -> Self {
        let Some(tag) = data.get(..2) else {
            return Self::default();
        };

        let kind = u16::from_le_bytes([tag[0], tag[1]]);
        if kind < cv::LF_NUMERIC {
            return Self {
                kind: cv::LF_USHORT,
                bytes: tag,
                encoded_size: 2,
            };
        }

        let Some(size) = value_size(kind) else {
            return Self::default();
        };

        match data.get(2..2 + size) {
            Some(bytes) => Self {
                kind,
                bytes,
                encoded_size: 2 + size,
            },
            None => Self::default(),
        }
    }

    /// The numeric leaf tag. Inline values report [`LF_USHORT`](cv::LF_USHORT).
    pub fn kind(&self) -> u16 {
        self.kind
    }

    /// The little-endian bytes of the value.
    pub fn bytes(&self) -> &'d [u8] {
        self.bytes
    }

    /// The number of record bytes this leaf occupied, including its tag.
    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    fn is_signed(&self) -> bool {
        matches!(
            self.kind,
            cv::LF_CHAR | cv::LF_SHORT | cv::LF_LONG | cv::LF_QUADWORD | cv::LF_OCTWORD
        )
    }

    fn is_integer(&self) -> bool {
        self.is_signed()
            || matches!(
                self.kind,
                cv::LF_USHORT | cv::LF_ULONG | cv::LF_UQUADWORD | cv::LF_UOCTWORD
            )
    }

    /// Returns the value as a signed integer, sign-extending signed leaves.
    ///
    /// Octwords are truncated to their low 64 bits. Returns `None` for non-integer leaves.
    pub fn as_i64(&self) -> Option<i64> {
        if !self.is_integer() {
            return None;
        }

        let len = self.bytes.len().min(8);
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(&self.bytes[..len]);

        let negative = self.is_signed() && self.bytes[len - 1] & 0x80 != 0;
        if negative {
            buf[len..].fill(0xff);
        }

        Some(i64::from_le_bytes(buf))
    }

    /// Returns the value as an unsigned integer.
    ///
    /// Negative values wrap. Returns `None` for non-integer leaves.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().map(|v| v as u64)
    }
}
