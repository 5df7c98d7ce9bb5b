//! Test helpers for `symbolic`.
//!
//! Conversion tests describe their input as CodeView records rather than binary fixtures. The
//! [`Bytes`] builder assembles record bodies in little endian, and [`record`] wraps a body into a
//! length-prefixed record as it appears in type and symbol streams.
#![warn(missing_docs)]

/// Builder for the little-endian body of a CodeView record.
///
/// # Example
///
/// ```
/// use symbolic_testutils::Bytes;
///
/// let body = Bytes::new().u16(0x1234).name("main").build();
/// assert_eq!(body, b"\x34\x12main\0");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bytes(Vec<u8>);

impl Bytes {
    /// Creates an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a byte.
    pub fn u8(mut self, value: u8) -> Self {
        self.0.push(value);
        self
    }

    /// Appends a 16-bit integer.
    pub fn u16(mut self, value: u16) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a 32-bit integer.
    pub fn u32(mut self, value: u32) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a signed 32-bit integer.
    pub fn i32(mut self, value: i32) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a 64-bit integer.
    pub fn u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a null-terminated string.
    pub fn name(mut self, value: &str) -> Self {
        self.0.extend_from_slice(value.as_bytes());
        self.0.push(0);
        self
    }

    /// Appends raw bytes.
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.0.extend_from_slice(value);
        self
    }

    /// Appends the contents of another builder.
    pub fn append(self, other: Bytes) -> Self {
        self.bytes(&other.0)
    }

    /// Pads with `LF_PAD` bytes up to the next multiple of `alignment`.
    ///
    /// Pad bytes are `0xf0 + n`, where `n` is the number of bytes up to and including the pad
    /// byte that remain until the boundary.
    pub fn align(mut self, alignment: usize) -> Self {
        while self.0.len() % alignment != 0 {
            let remaining = alignment - self.0.len() % alignment;
            self.0.push(0xf0 + remaining as u8);
        }
        self
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the assembled bytes.
    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

impl From<Bytes> for Vec<u8> {
    fn from(bytes: Bytes) -> Self {
        bytes.0
    }
}

/// Wraps a record body into a `[size: u16][kind: u16][body]` record.
///
/// # Example
///
/// ```
/// use symbolic_testutils::{record, Bytes};
///
/// let bytes = record(0x0006, Bytes::new());
/// assert_eq!(bytes, [2, 0, 6, 0]);
/// ```
pub fn record(kind: u16, body: Bytes) -> Vec<u8> {
    let body = body.build();
    let size = (body.len() + 2) as u16;
    Bytes::new().u16(size).u16(kind).bytes(&body).build()
}
