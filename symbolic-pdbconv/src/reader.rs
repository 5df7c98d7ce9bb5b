use scroll::{Pread, LE};

use crate::error::{CodeViewError, CodeViewErrorKind};
use crate::numeric::Numeric;

/// A little-endian cursor over the body of a single leaf or symbol record.
#[derive(Clone, Debug)]
pub struct RecordReader<'d> {
    data: &'d [u8],
    offset: usize,
}

impl<'d> RecordReader<'d> {
    pub fn new(data: &'d [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn at(data: &'d [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn remaining(&self) -> &'d [u8] {
        self.data.get(self.offset..).unwrap_or_default()
    }

    pub fn u8(&mut self) -> Result<u8, CodeViewError> {
        Ok(self.data.gread_with(&mut self.offset, LE)?)
    }

    pub fn u16(&mut self) -> Result<u16, CodeViewError> {
        Ok(self.data.gread_with(&mut self.offset, LE)?)
    }

    pub fn u32(&mut self) -> Result<u32, CodeViewError> {
        Ok(self.data.gread_with(&mut self.offset, LE)?)
    }

    pub fn i32(&mut self) -> Result<i32, CodeViewError> {
        Ok(self.data.gread_with(&mut self.offset, LE)?)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), CodeViewError> {
        match self.offset.checked_add(len) {
            Some(end) if end <= self.data.len() => {
                self.offset = end;
                Ok(())
            }
            _ => Err(CodeViewErrorKind::Truncated.into()),
        }
    }

    /// Reads a variable-length numeric leaf and advances past it.
    pub fn numeric(&mut self) -> Result<Numeric<'d>, CodeViewError> {
        let numeric = Numeric::parse(self.remaining());
        if numeric.encoded_size() == 0 {
            return Err(CodeViewErrorKind::Truncated.into());
        }
        self.offset += numeric.encoded_size();
        Ok(numeric)
    }

    /// Reads a null-terminated name, capped at the end of the record.
    ///
    /// A missing terminator is tolerated, in which case the name extends to the end of the record.
    /// Invalid UTF-8 is replaced lossily.
    pub fn name(&mut self) -> String {
        let rest = self.remaining();
        let len = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        let name = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.offset += (len + 1).min(rest.len());
        name
    }

    /// Aligns the cursor up to the given power of two, clamped to the end of the record.
    pub fn align(&mut self, alignment: usize) {
        let aligned = (self.offset + alignment - 1) & !(alignment - 1);
        self.offset = aligned.min(self.data.len());
    }
}
