//! CodeView record kinds, property bits and type index helpers.
//!
//! Names follow `cvinfo.h` so they can be cross-referenced with Microsoft's documentation.

#![allow(missing_docs)]

/// The first type index that refers into the TPI stream. Lower indices encode basic types.
pub const FIRST_COMPLEX_ITYPE: u32 = 0x1000;

// Type records

pub const LF_MODIFIER: u16 = 0x1001;
pub const LF_POINTER: u16 = 0x1002;
pub const LF_PROCEDURE: u16 = 0x1008;
pub const LF_MFUNCTION: u16 = 0x1009;
pub const LF_ARGLIST: u16 = 0x1201;
pub const LF_FIELDLIST: u16 = 0x1203;
pub const LF_BITFIELD: u16 = 0x1205;
pub const LF_METHODLIST: u16 = 0x1206;
pub const LF_ARRAY: u16 = 0x1503;
pub const LF_CLASS: u16 = 0x1504;
pub const LF_STRUCTURE: u16 = 0x1505;
pub const LF_UNION: u16 = 0x1506;
pub const LF_ENUM: u16 = 0x1507;
pub const LF_CLASS2: u16 = 0x1608;
pub const LF_STRUCTURE2: u16 = 0x1609;

// Field list members

pub const LF_BCLASS: u16 = 0x1400;
pub const LF_VBCLASS: u16 = 0x1401;
pub const LF_IVBCLASS: u16 = 0x1402;
pub const LF_INDEX: u16 = 0x1404;
pub const LF_VFUNCTAB: u16 = 0x1409;
pub const LF_ENUMERATE: u16 = 0x1502;
pub const LF_MEMBER: u16 = 0x150d;
pub const LF_STMEMBER: u16 = 0x150e;
pub const LF_METHOD: u16 = 0x150f;
pub const LF_NESTTYPE: u16 = 0x1510;
pub const LF_ONEMETHOD: u16 = 0x1511;
pub const LF_NESTTYPEEX: u16 = 0x1512;

// ID records (IPI stream)

pub const LF_FUNC_ID: u16 = 0x1601;
pub const LF_MFUNC_ID: u16 = 0x1602;

// Numeric leaves

pub const LF_NUMERIC: u16 = 0x8000;
pub const LF_CHAR: u16 = 0x8000;
pub const LF_SHORT: u16 = 0x8001;
pub const LF_USHORT: u16 = 0x8002;
pub const LF_LONG: u16 = 0x8003;
pub const LF_ULONG: u16 = 0x8004;
pub const LF_REAL32: u16 = 0x8005;
pub const LF_REAL64: u16 = 0x8006;
pub const LF_REAL80: u16 = 0x8007;
pub const LF_REAL128: u16 = 0x8008;
pub const LF_QUADWORD: u16 = 0x8009;
pub const LF_UQUADWORD: u16 = 0x800a;
pub const LF_REAL48: u16 = 0x800b;
pub const LF_COMPLEX32: u16 = 0x800c;
pub const LF_COMPLEX64: u16 = 0x800d;
pub const LF_COMPLEX80: u16 = 0x800e;
pub const LF_COMPLEX128: u16 = 0x800f;
pub const LF_VARSTRING: u16 = 0x8010;
pub const LF_OCTWORD: u16 = 0x8017;
pub const LF_UOCTWORD: u16 = 0x8018;
pub const LF_DECIMAL: u16 = 0x8019;
pub const LF_DATE: u16 = 0x801a;
pub const LF_UTF8STRING: u16 = 0x801b;
pub const LF_REAL16: u16 = 0x801c;

// Symbol records

pub const S_END: u16 = 0x0006;
pub const S_FRAMEPROC: u16 = 0x1012;
pub const S_BLOCK32: u16 = 0x1103;
pub const S_LDATA32: u16 = 0x110c;
pub const S_GDATA32: u16 = 0x110d;
pub const S_PUB32: u16 = 0x110e;
pub const S_LPROC32: u16 = 0x110f;
pub const S_GPROC32: u16 = 0x1110;
pub const S_REGREL32: u16 = 0x1111;
pub const S_LTHREAD32: u16 = 0x1112;
pub const S_GTHREAD32: u16 = 0x1113;
pub const S_COMPILE2: u16 = 0x1116;
pub const S_COMPILE3: u16 = 0x113c;
pub const S_LOCAL: u16 = 0x113e;
pub const S_DEFRANGE_REGISTER: u16 = 0x1141;
pub const S_DEFRANGE_FRAMEPOINTER_REL: u16 = 0x1142;
pub const S_DEFRANGE_SUBFIELD_REGISTER: u16 = 0x1143;
pub const S_DEFRANGE_FRAMEPOINTER_REL_FULL_SCOPE: u16 = 0x1144;
pub const S_DEFRANGE_REGISTER_REL: u16 = 0x1145;
pub const S_INLINESITE: u16 = 0x114d;
pub const S_INLINESITE_END: u16 = 0x114e;
pub const S_FILESTATIC: u16 = 0x1153;
pub const S_INLINESITE2: u16 = 0x115d;

/// Returns `true` for records that open a lexical scope.
pub fn opens_scope(kind: u16) -> bool {
    matches!(
        kind,
        S_LPROC32 | S_GPROC32 | S_BLOCK32 | S_INLINESITE | S_INLINESITE2
    )
}

/// Returns `true` for records that close a lexical scope.
pub fn closes_scope(kind: u16) -> bool {
    matches!(kind, S_END | S_INLINESITE_END)
}

// Binary annotation opcodes of inline sites

pub const BA_OP_INVALID: u32 = 0;
pub const BA_OP_CODE_OFFSET: u32 = 1;
pub const BA_OP_CHANGE_CODE_OFFSET_BASE: u32 = 2;
pub const BA_OP_CHANGE_CODE_OFFSET: u32 = 3;
pub const BA_OP_CHANGE_CODE_LENGTH: u32 = 4;
pub const BA_OP_CHANGE_FILE: u32 = 5;
pub const BA_OP_CHANGE_LINE_OFFSET: u32 = 6;
pub const BA_OP_CHANGE_LINE_END_DELTA: u32 = 7;
pub const BA_OP_CHANGE_RANGE_KIND: u32 = 8;
pub const BA_OP_CHANGE_COLUMN_START: u32 = 9;
pub const BA_OP_CHANGE_COLUMN_END_DELTA: u32 = 10;
pub const BA_OP_CHANGE_CODE_OFFSET_AND_LINE_OFFSET: u32 = 11;
pub const BA_OP_CHANGE_CODE_LENGTH_AND_CODE_OFFSET: u32 = 12;
pub const BA_OP_CHANGE_COLUMN_END: u32 = 13;

// Type properties of CLASS, STRUCTURE, UNION and ENUM records

pub const PROP_FWDREF: u16 = 1 << 7;
pub const PROP_SCOPED: u16 = 1 << 8;
pub const PROP_HAS_UNIQUE_NAME: u16 = 1 << 9;

// MODIFIER flags

pub const MOD_CONST: u16 = 1 << 0;
pub const MOD_VOLATILE: u16 = 1 << 1;

// POINTER attributes

pub const PTR_MODE_LREF: u32 = 1;
pub const PTR_MODE_PMEM: u32 = 2;
pub const PTR_MODE_PMFUNC: u32 = 3;
pub const PTR_MODE_RREF: u32 = 4;

pub const PTR_ATTR_VOLATILE: u32 = 1 << 9;
pub const PTR_ATTR_CONST: u32 = 1 << 10;
pub const PTR_ATTR_RESTRICT: u32 = 1 << 12;
pub const PTR_ATTR_LREF: u32 = 1 << 21;
pub const PTR_ATTR_RREF: u32 = 1 << 22;

/// Extracts the pointer mode (plain, reference, member) from pointer attributes.
pub fn pointer_mode(attributes: u32) -> u32 {
    (attributes >> 5) & 0x7
}

// Method properties, stored in bits 2..5 of member attributes

pub const MPROP_VANILLA: u16 = 0;
pub const MPROP_VIRTUAL: u16 = 1;
pub const MPROP_STATIC: u16 = 2;
pub const MPROP_FRIEND: u16 = 3;
pub const MPROP_INTRO: u16 = 4;
pub const MPROP_PURE_VIRTUAL: u16 = 5;
pub const MPROP_PURE_INTRO: u16 = 6;

/// Extracts the method property from member attributes.
pub fn method_prop(attributes: u16) -> u16 {
    (attributes >> 2) & 0x7
}

/// Returns `true` if a method with these attributes carries a v-table offset.
pub fn has_vtable_offset(attributes: u16) -> bool {
    matches!(method_prop(attributes), MPROP_INTRO | MPROP_PURE_INTRO)
}

// LOCAL flags

pub const LOCAL_PARAM: u16 = 1 << 0;
pub const LOCAL_GLOBAL: u16 = 1 << 9;
pub const LOCAL_STATIC: u16 = 1 << 10;

// FRAMEPROC encoded frame pointer registers

pub const FRAME_REG_NONE: u32 = 0;
pub const FRAME_REG_STACK_PTR: u32 = 1;
pub const FRAME_REG_FRAME_PTR: u32 = 2;
pub const FRAME_REG_BASE_PTR: u32 = 3;

/// Extracts the encoded frame pointer register used to address locals.
pub fn local_base_pointer(frameproc_flags: u32) -> u32 {
    (frameproc_flags >> 14) & 0x3
}

/// Extracts the encoded frame pointer register used to address parameters.
pub fn param_base_pointer(frameproc_flags: u32) -> u32 {
    (frameproc_flags >> 16) & 0x3
}

// Basic types

/// Returns `true` if this type index encodes a basic type rather than a TPI record.
pub fn is_basic_itype(itype: u32) -> bool {
    itype < FIRST_COMPLEX_ITYPE
}

/// Returns the basic type code of a basic type index.
pub fn basic_type(itype: u32) -> u8 {
    (itype & 0xff) as u8
}

/// Returns the pointer mode of a basic type index, `0` for direct values.
pub fn basic_pointer_mode(itype: u32) -> u8 {
    ((itype >> 8) & 0xf) as u8
}

pub const BASIC_PTR_NEAR: u8 = 0x1;
pub const BASIC_PTR_FAR: u8 = 0x2;
pub const BASIC_PTR_HUGE: u8 = 0x3;
pub const BASIC_PTR_32: u8 = 0x4;
pub const BASIC_PTR_FAR32: u8 = 0x5;
pub const BASIC_PTR_64: u8 = 0x6;

pub const T_NOTYPE: u8 = 0x00;
pub const T_VOID: u8 = 0x03;
pub const T_HRESULT: u8 = 0x08;
pub const T_CHAR: u8 = 0x10;
pub const T_SHORT: u8 = 0x11;
pub const T_LONG: u8 = 0x12;
pub const T_QUAD: u8 = 0x13;
pub const T_OCT: u8 = 0x14;
pub const T_UCHAR: u8 = 0x20;
pub const T_USHORT: u8 = 0x21;
pub const T_ULONG: u8 = 0x22;
pub const T_UQUAD: u8 = 0x23;
pub const T_UOCT: u8 = 0x24;
pub const T_BOOL08: u8 = 0x30;
pub const T_BOOL16: u8 = 0x31;
pub const T_BOOL32: u8 = 0x32;
pub const T_BOOL64: u8 = 0x33;
pub const T_REAL32: u8 = 0x40;
pub const T_REAL64: u8 = 0x41;
pub const T_REAL80: u8 = 0x42;
pub const T_REAL128: u8 = 0x43;
pub const T_REAL48: u8 = 0x44;
pub const T_REAL32PP: u8 = 0x45;
pub const T_REAL16: u8 = 0x46;
pub const T_CPLX32: u8 = 0x50;
pub const T_CPLX64: u8 = 0x51;
pub const T_CPLX80: u8 = 0x52;
pub const T_CPLX128: u8 = 0x53;
pub const T_INT1: u8 = 0x68;
pub const T_UINT1: u8 = 0x69;
pub const T_RCHAR: u8 = 0x70;
pub const T_WCHAR: u8 = 0x71;
pub const T_INT2: u8 = 0x72;
pub const T_UINT2: u8 = 0x73;
pub const T_INT4: u8 = 0x74;
pub const T_UINT4: u8 = 0x75;
pub const T_INT8: u8 = 0x76;
pub const T_UINT8: u8 = 0x77;
pub const T_INT16: u8 = 0x78;
pub const T_UINT16: u8 = 0x79;
pub const T_CHAR16: u8 = 0x7a;
pub const T_CHAR32: u8 = 0x7b;
pub const T_CHAR8: u8 = 0x7c;
pub const T_PTR: u8 = 0xf0;

// Registers

pub const CV_REG_ESP: u16 = 21;
pub const CV_AMD64_RSP: u16 = 335;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_itype_split() {
        // 0x0603 is a 64-bit pointer to void
        assert!(is_basic_itype(0x0603));
        assert_eq!(basic_type(0x0603), T_VOID);
        assert_eq!(basic_pointer_mode(0x0603), BASIC_PTR_64);
        assert_eq!(basic_pointer_mode(0x0074), 0);
        assert!(!is_basic_itype(0x1000));
    }

    #[test]
    fn test_frameproc_base_pointers() {
        let flags = (FRAME_REG_FRAME_PTR << 14) | (FRAME_REG_BASE_PTR << 16);
        assert_eq!(local_base_pointer(flags), FRAME_REG_FRAME_PTR);
        assert_eq!(param_base_pointer(flags), FRAME_REG_BASE_PTR);
    }

    #[test]
    fn test_method_props() {
        assert_eq!(method_prop(MPROP_INTRO << 2 | 0x3), MPROP_INTRO);
        assert!(has_vtable_offset(MPROP_PURE_INTRO << 2));
        assert!(!has_vtable_offset(MPROP_VIRTUAL << 2));
    }
}
