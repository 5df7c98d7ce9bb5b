//! Variable locations, registers and live-range splitting.

use std::fmt;

use smallvec::SmallVec;
use symbolic_common::Arch;

use crate::cv;
use crate::model::VoffRange;

/// Names of the canonical x86 registers, indexed by register code.
const X86_REGISTERS: &[&str] = &["", "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

/// Names of the canonical x86-64 registers, indexed by register code.
const X64_REGISTERS: &[&str] = &[
    "", "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

// Canonical register codes, shared by both architectures.
const REG_A: u8 = 1;
const REG_SP: u8 = 5;
const REG_BP: u8 = 6;
const REG_B: u8 = 4;
const REG_R8: u8 = 9;
const REG_R13: u8 = 14;

// CodeView register codes.
const CV_AL: u16 = 1;
const CV_AH: u16 = 5;
const CV_AX: u16 = 9;
const CV_EAX: u16 = 17;
const CV_EDI: u16 = 24;
const CV_AMD64_SIL: u16 = 324;
const CV_AMD64_RAX: u16 = 328;
const CV_AMD64_R8: u16 = 336;
const CV_AMD64_R8B: u16 = 344;
const CV_AMD64_R8W: u16 = 352;
const CV_AMD64_R8D: u16 = 360;
const CV_AMD64_R15D: u16 = 367;

/// A register, or a byte range within a register.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Register {
    pub arch: Arch,
    /// The canonical code of the full-width register.
    pub code: u8,
    /// The width of the accessed part in bytes.
    pub size: u8,
    /// The byte offset of the accessed part within the register.
    pub pos: u8,
}

impl Register {
    fn new(arch: Arch, code: u8, size: u8, pos: u8) -> Self {
        Self {
            arch,
            code,
            size,
            pos,
        }
    }

    /// Returns the full-width register with the given canonical code.
    fn full(arch: Arch, code: u8) -> Option<Self> {
        let size = arch.address_size()? as u8;
        Some(Self::new(arch, code, size, 0))
    }

    /// Maps a CodeView register code to a register of the given architecture.
    pub fn from_cv(arch: Arch, cv_reg: u16) -> Option<Self> {
        let address_size = arch.address_size()? as u8;
        let reg = match cv_reg {
            // AL, CL, DL, BL and AH, CH, DH, BH
            CV_AL..=4 => Self::new(arch, (cv_reg - CV_AL) as u8 + REG_A, 1, 0),
            CV_AH..=8 => Self::new(arch, (cv_reg - CV_AH) as u8 + REG_A, 1, 1),
            // AX through DI
            CV_AX..=16 => Self::new(arch, (cv_reg - CV_AX) as u8 + REG_A, 2, 0),
            // EAX through EDI
            CV_EAX..=CV_EDI => Self::new(arch, (cv_reg - CV_EAX) as u8 + REG_A, 4, 0),
            _ if arch != Arch::Amd64 => return None,

            // SIL, DIL, BPL, SPL
            CV_AMD64_SIL..=327 => {
                let code = [7, 8, REG_BP, REG_SP][usize::from(cv_reg - CV_AMD64_SIL)];
                Self::new(arch, code, 1, 0)
            }
            // RAX, RBX, RCX, RDX, RSI, RDI, RBP, RSP
            CV_AMD64_RAX..=335 => {
                let code = [REG_A, REG_B, 2, 3, 7, 8, REG_BP, REG_SP]
                    [usize::from(cv_reg - CV_AMD64_RAX)];
                Self::new(arch, code, address_size, 0)
            }
            CV_AMD64_R8..=343 => Self::new(arch, (cv_reg - CV_AMD64_R8) as u8 + REG_R8, 8, 0),
            CV_AMD64_R8B..=351 => Self::new(arch, (cv_reg - CV_AMD64_R8B) as u8 + REG_R8, 1, 0),
            CV_AMD64_R8W..=359 => Self::new(arch, (cv_reg - CV_AMD64_R8W) as u8 + REG_R8, 2, 0),
            CV_AMD64_R8D..=CV_AMD64_R15D => {
                Self::new(arch, (cv_reg - CV_AMD64_R8D) as u8 + REG_R8, 4, 0)
            }
            _ => return None,
        };

        Some(reg)
    }

    /// Returns the register a `FRAMEPROC` frame pointer encoding refers to.
    pub fn from_frame_pointer(arch: Arch, encoded: u32) -> Option<Self> {
        let code = match (arch, encoded) {
            (Arch::Amd64, cv::FRAME_REG_STACK_PTR) => REG_SP,
            (Arch::Amd64, cv::FRAME_REG_FRAME_PTR) => REG_BP,
            (Arch::Amd64, cv::FRAME_REG_BASE_PTR) => REG_R13,
            (Arch::X86, cv::FRAME_REG_FRAME_PTR) => REG_BP,
            (Arch::X86, cv::FRAME_REG_BASE_PTR) => REG_B,
            // x86 addresses off the virtual frame, which has no register
            _ => return None,
        };

        Self::full(arch, code)
    }

    /// The name of the full-width register.
    pub fn name(&self) -> &'static str {
        let names = match self.arch {
            Arch::X86 => X86_REGISTERS,
            Arch::Amd64 => X64_REGISTERS,
            _ => &[],
        };

        names.get(usize::from(self.code)).copied().unwrap_or("?")
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_size = self.arch.address_size().unwrap_or(0);
        if self.pos == 0 && u64::from(self.size) == full_size {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}[{}..{}]", self.name(), self.pos, self.pos + self.size)
        }
    }
}

/// An operation of a location expression, evaluated on a stack machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvalOp {
    /// Pushes the value of a register.
    RegRead(Register),
    /// Pushes a constant.
    Const(i64),
    /// Pops two values and pushes their sum.
    Add,
    /// Pops an address and pushes the value of the given size read from memory.
    MemRead(u8),
}

/// Where the value of a local lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Location {
    /// The value is held in a register.
    ValReg(Register),
    /// The value is in memory at a register plus an offset.
    AddrRegPlusU16 { reg: Register, offset: u16 },
    /// The memory at a register plus an offset holds the address of the value.
    AddrAddrRegPlusU16 { reg: Register, offset: u16 },
    /// The address of the value is computed by an expression.
    AddrBytecode(SmallVec<[EvalOp; 4]>),
    /// The value is in memory at a fixed virtual offset.
    ValueAtVoff(u64),
}

impl Location {
    /// Creates a location at a register plus a signed offset.
    ///
    /// Offsets that fit an unsigned 16-bit value use the compact forms, all others are encoded
    /// as an expression.
    pub fn reg_offset(reg: Register, offset: i64, extra_indirection: bool) -> Self {
        match u16::try_from(offset) {
            Ok(offset) if extra_indirection => Self::AddrAddrRegPlusU16 { reg, offset },
            Ok(offset) => Self::AddrRegPlusU16 { reg, offset },
            Err(_) => {
                let mut ops = SmallVec::new();
                ops.push(EvalOp::RegRead(reg));
                ops.push(EvalOp::Const(offset));
                ops.push(EvalOp::Add);
                if extra_indirection {
                    let addr_size = reg.arch.address_size().unwrap_or(8) as u8;
                    ops.push(EvalOp::MemRead(addr_size));
                }
                Self::AddrBytecode(ops)
            }
        }
    }
}

/// A window within a live range in which a variable is not at its location.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Gap {
    /// Offset relative to the start of the range.
    pub offset: u16,
    pub len: u16,
}

/// Removes gaps from a live range.
///
/// Returns disjoint, ascending sub-ranges. Gaps may be unordered or overlap, and are clamped to
/// the range.
pub fn split_range(range: VoffRange, gaps: &[Gap]) -> SmallVec<[VoffRange; 2]> {
    let mut sorted: SmallVec<[Gap; 8]> = gaps.iter().copied().collect();
    sorted.sort_unstable_by_key(|gap| gap.offset);

    let mut ranges = SmallVec::new();
    let mut cursor = range.min;

    for gap in sorted {
        let gap_first = (range.min + u64::from(gap.offset)).min(range.max);
        let gap_opl = (gap_first + u64::from(gap.len)).min(range.max);

        if cursor < gap_first {
            ranges.push(VoffRange::new(cursor, gap_first));
        }
        cursor = cursor.max(gap_opl);
    }

    if cursor < range.max {
        ranges.push(VoffRange::new(cursor, range.max));
    }

    ranges
}
