/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Protobuf text format parsing for the generated messages.
//!
//! rust-protobuf 2 only prints text format, so parsing goes through a
//! `prost-reflect` descriptor pool built from the generated file
//! descriptors: the text is parsed into a dynamic message, re-encoded to
//! the binary wire format and decoded into the concrete message type.

use prost::Message as _;
use prost_reflect::{DescriptorPool, DynamicMessage};

use protobuf::descriptor::{
    DescriptorProto, FieldDescriptorProto, FieldDescriptorProto_Label, FieldDescriptorProto_Type,
    FileDescriptorProto, FileDescriptorSet,
};
use protobuf::Message;

use std::sync::OnceLock;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TextFormatError {
    #[error("cannot build message descriptors ({0})")]
    Descriptors(String),
    #[error("no descriptor for message '{0}'")]
    UnknownMessage(String),
    #[error(transparent)]
    Parse(#[from] prost_reflect::text_format::ParseError),
    #[error("cannot decode message ({0})")]
    Decode(#[from] protobuf::ProtobufError),
}

/// `google/protobuf/any.proto`, which the generated files import but which
/// rust-protobuf maps to its own `well_known_types` instead of generating.
fn any_file() -> FileDescriptorProto {
    let field = |name: &str, json_name: &str, number: i32, ty: FieldDescriptorProto_Type| {
        let mut field = FieldDescriptorProto::new();
        field.set_name(name.to_string());
        field.set_json_name(json_name.to_string());
        field.set_number(number);
        field.set_label(FieldDescriptorProto_Label::LABEL_OPTIONAL);
        field.set_field_type(ty);
        field
    };
    let mut any = DescriptorProto::new();
    any.set_name("Any".to_string());
    any.mut_field()
        .push(field("type_url", "typeUrl", 1, FieldDescriptorProto_Type::TYPE_STRING));
    any.mut_field()
        .push(field("value", "value", 2, FieldDescriptorProto_Type::TYPE_BYTES));

    let mut file = FileDescriptorProto::new();
    file.set_name("google/protobuf/any.proto".to_string());
    file.set_package("google.protobuf".to_string());
    file.set_syntax("proto3".to_string());
    file.mut_message_type().push(any);
    file
}

fn build_pool() -> Result<DescriptorPool, String> {
    let mut set = FileDescriptorSet::new();
    // Dependencies first.
    set.mut_file().push(any_file());
    for file in [
        crate::status::file_descriptor_proto(),
        crate::code::file_descriptor_proto(),
        crate::p4types::file_descriptor_proto(),
        crate::p4info::file_descriptor_proto(),
        crate::p4data::file_descriptor_proto(),
        crate::p4runtime::file_descriptor_proto(),
    ] {
        set.mut_file().push(file.clone());
    }
    let bytes = set.write_to_bytes().map_err(|e| e.to_string())?;
    DescriptorPool::decode(&bytes[..]).map_err(|e| e.to_string())
}

fn pool() -> Result<&'static DescriptorPool, TextFormatError> {
    static POOL: OnceLock<Result<DescriptorPool, String>> = OnceLock::new();
    POOL.get_or_init(build_pool)
        .as_ref()
        .map_err(|e| TextFormatError::Descriptors(e.clone()))
}

/// Parses `text` as the text format of message `M`.
pub fn parse_from_str<M: Message>(text: &str) -> Result<M, TextFormatError> {
    let name = M::descriptor_static().full_name();
    let descriptor = pool()?
        .get_message_by_name(name)
        .ok_or_else(|| TextFormatError::UnknownMessage(name.to_string()))?;
    let dynamic = DynamicMessage::parse_text_format(descriptor, text)?;
    Ok(M::parse_from_bytes(&dynamic.encode_to_vec())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p4info::P4Info;
    use crate::p4runtime::{Update_Type, WriteRequest};

    #[test]
    fn p4info_tables_and_actions() {
        let p4info: P4Info = parse_from_str(
            r#"
            pkg_info { arch: "v1model" }
            tables {
              preamble { id: 33582705 name: "ExactOne" alias: "ExactOne" }
              match_fields { id: 1 name: "header_test.field32" bitwidth: 32 match_type: EXACT }
              action_refs { id: 16783703 }
              size: 512
            }
            actions {
              preamble { id: 16783703 name: "actionA" alias: "actionA" }
              params { id: 1 name: "param" bitwidth: 48 }
            }
            "#,
        )
        .unwrap();
        assert_eq!(p4info.get_pkg_info().get_arch(), "v1model");
        let table = &p4info.get_tables()[0];
        assert_eq!(table.get_preamble().get_id(), 33582705);
        assert_eq!(table.get_match_fields()[0].get_bitwidth(), 32);
        assert_eq!(table.get_size(), 512);
        assert_eq!(p4info.get_actions()[0].get_params()[0].get_name(), "param");
    }

    #[test]
    fn write_request_with_oneofs_and_bytes() {
        let request: WriteRequest = parse_from_str(
            r#"
            device_id: 1
            election_id { high: 0 low: 1 }
            updates {
              type: INSERT
              entity {
                table_entry {
                  table_id: 33582705
                  match { field_id: 1 exact { value: "\n\000\000\001" } }
                  action { action { action_id: 16783703 params { param_id: 1 value: "\252" } } }
                }
              }
            }
            "#,
        )
        .unwrap();
        assert_eq!(request.get_device_id(), 1);
        assert_eq!(request.get_election_id().get_low(), 1);
        let update = &request.get_updates()[0];
        assert_eq!(update.get_field_type(), Update_Type::INSERT);
        let entry = update.get_entity().get_table_entry();
        assert_eq!(entry.get_field_match()[0].get_exact().get_value(), &[10, 0, 0, 1]);
        assert_eq!(
            entry.get_action().get_action().get_params()[0].get_value(),
            &[0xaa]
        );
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(matches!(
            parse_from_str::<P4Info>("tables { preamble { id: } }"),
            Err(TextFormatError::Parse(_))
        ));
        assert!(matches!(
            parse_from_str::<P4Info>("no_such_field: 1"),
            Err(TextFormatError::Parse(_))
        ));
    }
}
