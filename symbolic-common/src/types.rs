//! Architecture and language tags of compilation units.

use std::fmt;

/// An enumeration of CPU architectures that CodeView debug information is converted for.
///
/// CodeView compile records name a machine from a large table of historic processors. Only the
/// Intel 32-bit family and x64 are supported by the converter, everything else is reported as
/// [`Arch::Unknown`].
///
/// This enumeration is represented as `u32` for C-bindings and lowlevel APIs.
#[repr(u32)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Arch {
    /// The architecture could not be determined.
    #[default]
    Unknown = 0,
    /// 32-bit little-endian CPUs using the Intel 8086 instruction set, also known as `x86`.
    X86 = 101,
    /// 64-bit little-endian, also known as `x86_64`, now widely used by Intel and AMD.
    Amd64 = 201,
}

impl Arch {
    /// Creates an `Arch` from the machine field of a CodeView `COMPILE2` or `COMPILE3` record.
    ///
    /// Returns `Arch::Unknown` for all machines that are not supported.
    ///
    /// # Examples
    ///
    /// ```
    /// use symbolic_common::Arch;
    ///
    /// assert_eq!(Arch::from_cv_machine(0xd0), Arch::Amd64);
    /// assert_eq!(Arch::from_cv_machine(0x07), Arch::X86);
    /// assert_eq!(Arch::from_cv_machine(0xf6), Arch::Unknown);
    /// ```
    pub fn from_cv_machine(machine: u16) -> Arch {
        match machine {
            // 8086, 80286, 80386, 80486, Pentium, Pentium Pro / II, Pentium III
            0x01..=0x07 => Arch::X86,
            0xd0 => Arch::Amd64,
            _ => Arch::Unknown,
        }
    }

    /// Returns the native address size in bytes.
    ///
    /// This is the size of pointers, of the instruction pointer and of general purpose registers.
    /// Returns `None` if the architecture is unknown.
    ///
    /// # Examples
    ///
    /// ```
    /// use symbolic_common::Arch;
    ///
    /// assert_eq!(Arch::Amd64.address_size(), Some(8));
    /// assert_eq!(Arch::X86.address_size(), Some(4));
    /// ```
    pub fn address_size(self) -> Option<u64> {
        match self {
            Arch::Unknown => None,
            Arch::X86 => Some(4),
            Arch::Amd64 => Some(8),
        }
    }

    /// Returns the name of the architecture.
    ///
    /// The name is always given in lower case without special characters or spaces, suitable for
    /// serialization and parsing.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "x86",
            Arch::Amd64 => "x86_64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A programming language declared in debugging information.
///
/// This enumeration is represented as `u32` for C-bindings and lowlevel APIs.
#[repr(u32)]
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Language {
    #[default]
    Unknown = 0,
    C = 1,
    Cpp = 2,
}

impl Language {
    /// Creates a `Language` from the language byte of a CodeView compile record.
    ///
    /// Returns `Language::Unknown` for all languages other than C and C++.
    ///
    /// # Examples
    ///
    /// ```
    /// use symbolic_common::Language;
    ///
    /// assert_eq!(Language::from_cv_language(0x01), Language::Cpp);
    /// assert_eq!(Language::from_cv_language(0x03), Language::Unknown);
    /// ```
    pub fn from_cv_language(val: u8) -> Language {
        match val {
            0x00 => Language::C,
            0x01 => Language::Cpp,
            _ => Language::Unknown,
        }
    }

    /// Returns the name of the language.
    ///
    /// The name is always given in lower case without special characters or spaces, suitable for
    /// serialization and parsing. For a human readable name, use the `Display` implementation,
    /// instead.
    pub fn name(self) -> &'static str {
        match self {
            Language::Unknown => "unknown",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = match *self {
            Language::Unknown => "unknown",
            Language::C => "C",
            Language::Cpp => "C++",
        };

        f.write_str(formatted)
    }
}
