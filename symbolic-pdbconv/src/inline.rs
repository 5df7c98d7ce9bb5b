//! Decoder for the binary annotations of inline sites.
//!
//! Binary annotations are a compact bytecode of `(opcode, operands)` pairs that describe how code
//! offsets, code lengths, files and lines change over the body of an inlined call. The
//! [`InlineSiteDecoder`] interprets them one event at a time. Each [`InlineStep`] reports what
//! happened through its [`StepFlags`]:
//!
//!  - `EMIT_RANGE` / `EXTEND_LAST_RANGE`: a code range of the inline site was completed.
//!  - `EMIT_FILE`: subsequent lines belong to a different source file.
//!  - `EMIT_LINE`: a line starts at `line_voff`.
//!
//! A step without flags signals the end of the annotations.

use std::fmt;

use smallvec::SmallVec;

use crate::cv;
use crate::model::VoffRange;

/// Events reported by an [`InlineStep`].
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct StepFlags(u8);

impl StepFlags {
    pub const EMIT_RANGE: Self = Self(1 << 0);
    pub const EXTEND_LAST_RANGE: Self = Self(1 << 1);
    pub const EMIT_FILE: Self = Self(1 << 2);
    pub const EMIT_LINE: Self = Self(1 << 3);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for StepFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for StepFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::EMIT_RANGE, "EMIT_RANGE"),
            (Self::EXTEND_LAST_RANGE, "EXTEND_LAST_RANGE"),
            (Self::EMIT_FILE, "EMIT_FILE"),
            (Self::EMIT_LINE, "EMIT_LINE"),
        ];

        let mut list = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                list.entry(&format_args!("{name}"));
            }
        }
        list.finish()
    }
}

/// The result of [`InlineSiteDecoder::step`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InlineStep {
    pub flags: StepFlags,
    /// The emitted or extended code range.
    pub range: VoffRange,
    /// The file checksum offset of subsequent lines.
    pub file_off: u32,
    pub line_voff: u64,
    /// The end of the last known range when the line was emitted.
    pub line_voff_end: u64,
    pub line: u32,
    pub column: u32,
}

/// Decodes a compressed unsigned operand.
///
/// Returns the value and the number of bytes consumed. Missing bytes decode as zero, and the
/// reserved `0b111` prefix decodes as `u32::MAX`.
pub fn decode_operand(data: &[u8]) -> (u32, usize) {
    let Some(&header) = data.first() else {
        return (0, 0);
    };
    let header = u32::from(header);

    if header & 0x80 == 0 {
        (header, 1)
    } else if header & 0xc0 == 0x80 {
        match data.get(1) {
            Some(&b1) => (((header & 0x3f) << 8) | u32::from(b1), 2),
            None => (0, 1),
        }
    } else if header & 0xe0 == 0xc0 {
        match data.get(1..4) {
            Some(&[b1, b2, b3]) => {
                let value = ((header & 0x1f) << 24)
                    | (u32::from(b1) << 16)
                    | (u32::from(b2) << 8)
                    | u32::from(b3);
                (value, 4)
            }
            _ => (0, 1),
        }
    } else {
        (u32::MAX, 1)
    }
}

/// Converts an operand into a signed value. The sign is stored in the lowest bit.
pub fn signed_operand(value: u32) -> i32 {
    let magnitude = (value >> 1) as i32;
    if value & 1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// A stateful interpreter for the binary annotations of one inline site.
#[derive(Clone, Debug)]
pub struct InlineSiteDecoder<'a> {
    annotations: &'a [u8],
    cursor: usize,
    parent_voff: u64,

    code_offset: u64,
    code_offset_changed: bool,
    code_offset_lo: u64,
    code_offset_lo_changed: bool,
    code_length: u64,
    code_length_changed: bool,

    file_off: u32,
    file_off_changed: bool,
    file_count: u32,
    file_line_count: u32,
    file_last_line: i64,

    line: i64,
    line_changed: bool,
    column: u32,

    last_range: Option<VoffRange>,
}

impl<'a> InlineSiteDecoder<'a> {
    /// Creates a decoder for an inline site.
    ///
    /// `file_off` and `first_line` come from the inlinee lines of the unit, `parent_voff` is the
    /// start of the procedure containing the inline site.
    pub fn new(annotations: &'a [u8], file_off: u32, first_line: u32, parent_voff: u64) -> Self {
        Self {
            annotations,
            cursor: 0,
            parent_voff,
            code_offset: 0,
            code_offset_changed: false,
            code_offset_lo: 0,
            code_offset_lo_changed: false,
            code_length: 0,
            code_length_changed: false,
            file_off,
            file_off_changed: false,
            file_count: 0,
            file_line_count: 0,
            file_last_line: 0,
            line: i64::from(first_line),
            line_changed: true,
            column: 1,
            last_range: None,
        }
    }

    fn operand(&mut self) -> u32 {
        let rest = self.annotations.get(self.cursor..).unwrap_or_default();
        let (value, size) = decode_operand(rest);
        self.cursor += size;
        value
    }

    fn change_code_offset(&mut self, delta: u32) {
        self.code_offset += u64::from(delta);
        if !self.code_offset_lo_changed {
            self.code_offset_lo = self.code_offset;
            self.code_offset_lo_changed = true;
        }
        self.code_offset_changed = true;
    }

    /// Applies a single opcode. Returns `false` if decoding cannot continue.
    fn apply(&mut self, opcode: u32) -> bool {
        match opcode {
            cv::BA_OP_INVALID => {
                self.cursor = self.annotations.len();
                self.code_length = self.code_offset.saturating_sub(self.code_offset_lo);
                self.code_length_changed = true;
            }
            cv::BA_OP_CODE_OFFSET => {
                self.code_offset = u64::from(self.operand());
                self.code_offset_changed = true;
            }
            cv::BA_OP_CHANGE_CODE_OFFSET => {
                let delta = self.operand();
                self.change_code_offset(delta);
            }
            cv::BA_OP_CHANGE_CODE_LENGTH => {
                self.code_length = u64::from(self.operand());
                self.code_length_changed = true;
            }
            cv::BA_OP_CHANGE_FILE => {
                let previous = self.file_off;
                self.file_off = self.operand();
                self.file_off_changed = previous != self.file_off;
                // Code ranges do not have to end before a file change.
                self.code_length_changed = self.file_off_changed;
            }
            cv::BA_OP_CHANGE_LINE_OFFSET => {
                let delta = signed_operand(self.operand());
                self.line += i64::from(delta);
                self.line_changed = true;
            }
            cv::BA_OP_CHANGE_CODE_OFFSET_AND_LINE_OFFSET => {
                let operand = self.operand();
                self.line += i64::from(signed_operand(operand >> 4));
                self.line_changed = true;
                self.change_code_offset(operand & 0xf);
            }
            cv::BA_OP_CHANGE_CODE_LENGTH_AND_CODE_OFFSET => {
                self.code_length = u64::from(self.operand());
                let delta = self.operand();
                self.change_code_offset(delta);
                self.code_length_changed = true;
            }
            _ => {
                tracing::debug!(opcode, "unsupported binary annotation");
                self.cursor = self.annotations.len();
                return false;
            }
        }

        true
    }

    /// Decodes opcodes until at least one event occurs.
    ///
    /// Returns a step with empty flags once all annotations are consumed.
    pub fn step(&mut self) -> InlineStep {
        let mut step = InlineStep::default();

        while self.cursor < self.annotations.len() && step.flags.is_empty() {
            let opcode = self.operand();
            if !self.apply(opcode) {
                break;
            }

            let line_code_offset = self.code_offset;

            if self.code_length_changed {
                let code_offset_hi = self.code_offset + self.code_length;
                let lo = self.parent_voff.wrapping_add(self.code_offset_lo);
                let hi = self.parent_voff.wrapping_add(code_offset_hi);

                match self.last_range.as_mut() {
                    Some(last) if last.max == lo => {
                        last.max = hi;
                        step.flags.insert(StepFlags::EXTEND_LAST_RANGE);
                        step.range = *last;
                    }
                    _ => {
                        let range = VoffRange::new(lo, hi);
                        self.last_range = Some(range);
                        step.flags.insert(StepFlags::EMIT_RANGE);
                        step.range = range;
                    }
                }

                self.code_offset_lo = code_offset_hi;
                self.code_offset += self.code_length;
                self.code_offset_lo_changed = false;
                self.code_length_changed = false;
                self.code_length = 0;
            }

            if self.file_off_changed || self.file_count == 0 {
                step.flags.insert(StepFlags::EMIT_FILE);
                step.file_off = self.file_off;

                self.file_off_changed = false;
                self.file_count += 1;
                self.file_line_count = 0;
            }

            if self.code_offset_changed && self.line_changed {
                if self.file_line_count == 0 || self.file_last_line != self.line {
                    step.flags.insert(StepFlags::EMIT_LINE);
                    step.line = self.line as u32;
                    step.column = self.column;
                    step.line_voff = self.parent_voff.wrapping_add(line_code_offset);
                    step.line_voff_end = self.last_range.map_or(0, |r| r.max);

                    self.file_line_count += 1;
                    self.file_last_line = self.line;
                }

                self.code_offset_changed = false;
                self.line_changed = false;
            }
        }

        step
    }
}

impl Iterator for InlineSiteDecoder<'_> {
    type Item = InlineStep;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.step();
        (!step.flags.is_empty()).then_some(step)
    }
}

/// Returns the code ranges covered by an inline site.
pub fn inline_site_ranges(annotations: &[u8], parent_voff: u64) -> SmallVec<[VoffRange; 1]> {
    let mut ranges = SmallVec::<[VoffRange; 1]>::new();

    for step in InlineSiteDecoder::new(annotations, 0, 0, parent_voff) {
        if step.flags.contains(StepFlags::EXTEND_LAST_RANGE) {
            if let Some(last) = ranges.last_mut() {
                last.max = step.range.max;
                continue;
            }
        }

        if step
            .flags
            .intersects(StepFlags::EMIT_RANGE | StepFlags::EXTEND_LAST_RANGE)
        {
            ranges.push(step.range);
        }
    }

    ranges
}

/// A run of lines of an inline site within one source file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InlineSequence {
    /// The file checksum offset of the source file.
    pub file_off: u32,
    /// Start of each line, followed by the end of the last line.
    pub voffs: Vec<u64>,
    pub lines: Vec<u32>,
}

#[derive(Default)]
struct SequenceBuilder {
    starts: Vec<u64>,
    lines: Vec<u32>,
    end: u64,
}

impl SequenceBuilder {
    fn finish(&mut self, file_off: u32, sequences: &mut Vec<InlineSequence>) {
        let Some(&last_start) = self.starts.last() else {
            return;
        };

        let mut voffs = std::mem::take(&mut self.starts);
        voffs.push(self.end.max(last_start));
        sequences.push(InlineSequence {
            file_off,
            voffs,
            lines: std::mem::take(&mut self.lines),
        });
        self.end = 0;
    }
}

/// Decodes the line sequences of an inline site, one per run of lines in the same file.
///
/// The end of a line is the end of the code range that covers its start. This is only known
/// after subsequent range events, so each event that covers the last line patches its end.
pub fn inline_line_sequences(
    annotations: &[u8],
    file_off: u32,
    first_line: u32,
    parent_voff: u64,
) -> Vec<InlineSequence> {
    let mut decoder = InlineSiteDecoder::new(annotations, file_off, first_line, parent_voff);
    let mut sequences = Vec::new();
    let mut builder = SequenceBuilder::default();
    let mut current_file = None;

    loop {
        let step = decoder.step();

        if step
            .flags
            .intersects(StepFlags::EMIT_RANGE | StepFlags::EXTEND_LAST_RANGE)
        {
            if let Some(&start) = builder.starts.last() {
                if step.range.contains(start) {
                    builder.end = step.range.max;
                }
            }
        }

        if step.flags.contains(StepFlags::EMIT_FILE) {
            if let Some(previous) = current_file.replace(step.file_off) {
                if previous != step.file_off {
                    builder.finish(previous, &mut sequences);
                }
            }
        }

        if step.flags.is_empty() {
            if let Some(file) = current_file.take() {
                builder.finish(file, &mut sequences);
            }
            break;
        }

        if step.flags.contains(StepFlags::EMIT_LINE) {
            builder.starts.push(step.line_voff);
            builder.lines.push(step.line);
            builder.end = step.line_voff_end;
        }
    }

    sequences
}
