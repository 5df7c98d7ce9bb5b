//! Expansion of field lists into the members and enumerators of user-defined types.

use std::collections::HashSet;
use std::ops::Range;

use crate::chunk::ChunkList;
use crate::cv;
use crate::error::{CodeViewError, CodeViewErrorKind};
use crate::model::{Enumerator, Member, MemberKind, Udt};
use crate::reader::RecordReader;
use crate::source::TypeStream;
use crate::types::{is_udt_leaf, parse_udt_header, TypeGraph};

/// Builds UDTs for all complete structs, classes, unions and enums in a range of type indices.
///
/// The type graph must be complete. UDTs are emitted in type index order.
#[tracing::instrument(level = "trace", skip_all, fields(itypes = ?itypes))]
pub fn expand_udts(tpi: &TypeStream, graph: &TypeGraph, itypes: Range<u32>) -> ChunkList<Udt> {
    let mut udts = ChunkList::new();

    for itype in itypes {
        let Some(leaf) = tpi.leaf(itype) else {
            continue;
        };
        if !is_udt_leaf(leaf.kind) {
            continue;
        }

        let header = match parse_udt_header(leaf) {
            Ok(header) => header,
            Err(error) => {
                tracing::debug!(itype, kind = leaf.kind, %error, "skipping user-defined type");
                continue;
            }
        };
        if header.is_forward_ref() {
            continue;
        }

        let Some(self_type) = graph.lookup(itype) else {
            continue;
        };

        let mut expander = FieldListExpander {
            tpi,
            graph,
            udt: Udt {
                self_type,
                members: Vec::new(),
                enumerators: Vec::new(),
            },
        };
        expander.expand(header.field_list);
        udts.push(expander.udt);
    }

    udts
}

struct FieldListExpander<'a> {
    tpi: &'a TypeStream,
    graph: &'a TypeGraph,
    udt: Udt,
}

impl FieldListExpander<'_> {
    /// Walks a field list and all continuations reachable through `LF_INDEX`.
    fn expand(&mut self, field_list: u32) {
        let mut todo = vec![field_list];
        let mut done = HashSet::new();

        while let Some(itype) = todo.pop() {
            if !done.insert(itype) {
                continue;
            }

            if let Err(error) = self.read_field_list(itype, &mut todo) {
                tracing::debug!(itype, %error, "invalid field list");
            }
        }
    }

    fn read_field_list(&mut self, itype: u32, todo: &mut Vec<u32>) -> Result<(), CodeViewError> {
        let leaf = self
            .tpi
            .leaf(itype)
            .ok_or(CodeViewErrorKind::UnknownItype)?;
        if leaf.truncated {
            return Err(CodeViewErrorKind::Truncated.into());
        }
        if leaf.kind != cv::LF_FIELDLIST {
            return Err(CodeViewErrorKind::UnexpectedKind.into());
        }

        let mut reader = RecordReader::new(&leaf.data);
        while !reader.is_eof() {
            let kind = reader.u16()?;
            self.read_field(kind, &mut reader, todo)?;
            reader.align(4);
        }

        Ok(())
    }

    fn member(&mut self, kind: MemberKind, name: String, itype: u32, offset: u64) {
        self.udt.members.push(Member {
            kind,
            name,
            type_id: self.graph.lookup(itype),
            offset,
        });
    }

    fn read_field(
        &mut self,
        kind: u16,
        reader: &mut RecordReader<'_>,
        todo: &mut Vec<u32>,
    ) -> Result<(), CodeViewError> {
        match kind {
            cv::LF_INDEX => {
                reader.u16()?;
                todo.push(reader.u32()?);
            }
            cv::LF_MEMBER => {
                reader.u16()?; // attributes
                let itype = reader.u32()?;
                let offset = reader.numeric()?.as_u64().unwrap_or(0);
                let name = reader.name();
                self.member(MemberKind::DataField, name, itype, offset);
            }
            cv::LF_STMEMBER => {
                reader.u16()?; // attributes
                let itype = reader.u32()?;
                let name = reader.name();
                self.member(MemberKind::StaticData, name, itype, 0);
            }
            cv::LF_METHOD => {
                reader.u16()?; // overload count
                let list = reader.u32()?;
                let name = reader.name();
                self.read_method_list(list, &name);
            }
            cv::LF_ONEMETHOD => {
                let attributes = reader.u16()?;
                let itype = reader.u32()?;
                let vtable_offset = if cv::has_vtable_offset(attributes) {
                    reader.u32()?
                } else {
                    0
                };
                let name = reader.name();
                self.member(
                    method_kind(attributes),
                    name,
                    itype,
                    u64::from(vtable_offset),
                );
            }
            cv::LF_NESTTYPE | cv::LF_NESTTYPEEX => {
                reader.u16()?;
                let itype = reader.u32()?;
                let name = reader.name();
                self.member(MemberKind::NestedType, name, itype, 0);
            }
            cv::LF_BCLASS => {
                reader.u16()?; // attributes
                let itype = reader.u32()?;
                let offset = reader.numeric()?.as_u64().unwrap_or(0);
                self.member(MemberKind::Base, String::new(), itype, offset);
            }
            cv::LF_VBCLASS | cv::LF_IVBCLASS => {
                reader.u16()?; // attributes
                let itype = reader.u32()?;
                reader.u32()?; // virtual base pointer type
                let vbptr_offset = reader.numeric()?.as_u64().unwrap_or(0);
                reader.numeric()?; // index into the virtual base table
                self.member(MemberKind::VirtualBase, String::new(), itype, vbptr_offset);
            }
            cv::LF_VFUNCTAB => {
                reader.u16()?;
                reader.u32()?;
            }
            cv::LF_ENUMERATE => {
                reader.u16()?; // attributes
                let value = reader.numeric()?.as_u64().unwrap_or(0);
                let name = reader.name();
                self.udt.enumerators.push(Enumerator { name, value });
            }
            _ => {
                // The size of unknown fields is unknown, so the rest of the list is lost.
                return Err(CodeViewErrorKind::UnexpectedKind.into());
            }
        }

        Ok(())
    }

    /// Emits one member per overload of an `LF_METHOD` field.
    fn read_method_list(&mut self, itype: u32, name: &str) {
        let Some(leaf) = self.tpi.leaf(itype) else {
            tracing::debug!(itype, "method list out of range");
            return;
        };
        if leaf.truncated || leaf.kind != cv::LF_METHODLIST {
            tracing::debug!(itype, kind = leaf.kind, "invalid method list");
            return;
        }

        let mut reader = RecordReader::new(&leaf.data);
        let mut read = || -> Result<(), CodeViewError> {
            while !reader.is_eof() {
                let attributes = reader.u16()?;
                reader.u16()?;
                let method = reader.u32()?;
                let vtable_offset = if cv::has_vtable_offset(attributes) {
                    reader.u32()?
                } else {
                    0
                };

                self.member(
                    method_kind(attributes),
                    name.to_owned(),
                    method,
                    u64::from(vtable_offset),
                );
            }
            Ok(())
        };

        if let Err(error) = read() {
            tracing::debug!(itype, %error, "truncated method list");
        }
    }
}

fn method_kind(attributes: u16) -> MemberKind {
    match cv::method_prop(attributes) {
        cv::MPROP_STATIC => MemberKind::StaticMethod,
        cv::MPROP_VIRTUAL | cv::MPROP_PURE_VIRTUAL | cv::MPROP_INTRO | cv::MPROP_PURE_INTRO => {
            MemberKind::VirtualMethod
        }
        _ => MemberKind::Method,
    }
}
