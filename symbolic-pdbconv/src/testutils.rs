//! Record builders shared by unit tests.

pub use symbolic_testutils::Bytes;

use crate::cv;
use crate::source::{LeafRecord, SymbolRecord};

pub fn leaf(kind: u16, body: Bytes) -> LeafRecord {
    LeafRecord::new(kind, body.build())
}

/// Appends a numeric leaf, inline if the value is small enough.
pub fn numeric(bytes: Bytes, value: u64) -> Bytes {
    if value < u64::from(cv::LF_NUMERIC) {
        bytes.u16(value as u16)
    } else if value <= u64::from(u32::MAX) {
        bytes.u16(cv::LF_ULONG).u32(value as u32)
    } else {
        bytes.u16(cv::LF_UQUADWORD).u64(value)
    }
}

/// Builds a struct, class, union or enum record.
///
/// For enums, `size` is the type index of the underlying type.
pub fn udt_leaf(
    kind: u16,
    props: u16,
    field_list: u32,
    size: u64,
    name: &str,
    unique_name: Option<&str>,
) -> LeafRecord {
    let mut body = match kind {
        cv::LF_ENUM => Bytes::new()
            .u16(0)
            .u16(props)
            .u32(size as u32)
            .u32(field_list),
        cv::LF_UNION => numeric(Bytes::new().u16(0).u16(props).u32(field_list), size),
        cv::LF_CLASS2 | cv::LF_STRUCTURE2 => {
            let header = Bytes::new()
                .u16(props)
                .u16(0)
                .u32(field_list)
                .u32(0)
                .u32(0)
                .u16(0);
            numeric(header, size)
        }
        _ => {
            let header = Bytes::new()
                .u16(0)
                .u16(props)
                .u32(field_list)
                .u32(0)
                .u32(0);
            numeric(header, size)
        }
    };

    body = body.name(name);
    if let Some(unique_name) = unique_name {
        body = body.name(unique_name);
    }

    leaf(kind, body)
}

pub fn symbol(kind: u16, body: Bytes) -> SymbolRecord {
    SymbolRecord::new(kind, body.build(), 0)
}

/// Assigns consecutive stream offsets to records.
pub fn symbols(records: Vec<SymbolRecord>) -> Vec<SymbolRecord> {
    let mut offset = 0;
    records
        .into_iter()
        .map(|mut record| {
            record.offset = offset;
            offset += record.data.len() as u32 + 4;
            record
        })
        .collect()
}
