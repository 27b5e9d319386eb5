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

use proto::p4runtime::{self, PacketMetadata};

use protobuf::RepeatedField;

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use crate::bytes_utils::{decode_uint, num_bytes, parse_value, to_hex};
use crate::client::RpcClient;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::schema::{ControllerPacketMetadata, P4Object};

/// A packet to be injected by the controller.  Every metadata field
/// declared for `packet_out` starts out as zero.
#[derive(Clone, Debug)]
pub struct PacketOut {
    ctx: Context,
    info: ControllerPacketMetadata,
    payload: Vec<u8>,
    metadata: BTreeMap<u32, Vec<u8>>,
}

impl PacketOut {
    pub fn new(ctx: &Context) -> Result<Self> {
        let info = ctx.schema().controller_packet_metadata("packet_out")?.clone();
        let metadata = info
            .metadata
            .iter()
            .map(|m| (m.id(), ctx.canonical(vec![0; num_bytes(m.bitwidth)])))
            .collect();
        Ok(PacketOut {
            ctx: ctx.clone(),
            info,
            payload: Vec::new(),
            metadata,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    pub fn metadata(&self, name: &str) -> Result<&[u8]> {
        let id = self.info.field(name)?.id();
        Ok(self.metadata.get(&id).map_or(&[][..], |v| v.as_slice()))
    }

    pub fn set_metadata(&mut self, name: &str, value: &str) -> Result<()> {
        let field = self.info.field(name)?;
        let bytes = self.ctx.canonical(parse_value(value.trim(), field.bitwidth)?);
        self.metadata.insert(field.id(), bytes);
        Ok(())
    }

    pub fn with_metadata(mut self, name: &str, value: &str) -> Result<Self> {
        self.set_metadata(name, value)?;
        Ok(self)
    }

    pub fn to_proto(&self) -> p4runtime::PacketOut {
        let mut packet = p4runtime::PacketOut::new();
        packet.set_payload(self.payload.clone());
        let metadata: Vec<PacketMetadata> = self
            .metadata
            .iter()
            .map(|(id, value)| {
                let mut m = PacketMetadata::new();
                m.set_metadata_id(*id);
                m.set_value(value.clone());
                m
            })
            .collect();
        packet.set_metadata(RepeatedField::from_vec(metadata));
        packet
    }

    /// Sends the packet on the client's stream channel.
    pub fn send(&self, client: &RpcClient) -> Result<()> {
        client.send_packet_out(self.to_proto())
    }
}

/// A packet received from the device, with its metadata resolved to names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketIn {
    pub payload: Vec<u8>,
    pub metadata: Vec<(String, Vec<u8>)>,
}

impl PacketIn {
    pub fn decode(ctx: &Context, msg: &p4runtime::PacketIn) -> Result<Self> {
        let info = ctx.schema().controller_packet_metadata("packet_in")?;
        let mut metadata = Vec::with_capacity(msg.get_metadata().len());
        for m in msg.get_metadata() {
            let field = info.field(m.get_metadata_id()).map_err(|_| {
                Error::SchemaLookup(format!(
                    "Unknown packet_in metadata id {}",
                    m.get_metadata_id()
                ))
            })?;
            metadata.push((field.name().to_string(), m.get_value().to_vec()));
        }
        Ok(PacketIn {
            payload: msg.get_payload().to_vec(),
            metadata,
        })
    }

    pub fn metadata(&self, name: &str) -> Option<&[u8]> {
        self.metadata
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn metadata_u128(&self, name: &str) -> Option<u128> {
        self.metadata(name).and_then(decode_uint)
    }
}

impl Display for PacketIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "packet_in ({} bytes)", self.payload.len())?;
        for (name, value) in &self.metadata {
            write!(f, " {}={}", name, to_hex(value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::context;

    #[test]
    fn packet_out_defaults_metadata_to_zero() {
        let ctx = context();
        let packet = PacketOut::new(&ctx).unwrap();
        let msg = packet.to_proto();
        assert_eq!(msg.get_metadata().len(), 2);
        for m in msg.get_metadata() {
            assert_eq!(m.get_value(), &[0]);
        }

        let padded = ctx.with_options(ctx.options().with_canonical_bytestrings(false));
        let msg = PacketOut::new(&padded).unwrap().to_proto();
        assert_eq!(msg.get_metadata()[0].get_value(), &[0, 0]);
    }

    #[test]
    fn packet_out_metadata() {
        let ctx = context();
        let mut packet = PacketOut::new(&ctx)
            .unwrap()
            .with_metadata("egress_port", "300")
            .unwrap();
        packet.set_payload(b"hello".to_vec());
        assert!(matches!(
            packet.set_metadata("egress_port", "512"),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            packet.set_metadata("ingress_port", "1"),
            Err(Error::SchemaLookup(_))
        ));
        let msg = packet.to_proto();
        assert_eq!(msg.get_payload(), b"hello");
        assert_eq!(msg.get_metadata()[0].get_metadata_id(), 1);
        assert_eq!(msg.get_metadata()[0].get_value(), &[0x01, 0x2c]);
    }

    #[test]
    fn packet_in_names_metadata() {
        let ctx = context();
        let mut msg = p4runtime::PacketIn::new();
        msg.set_payload(vec![1, 2, 3]);
        let mut m = PacketMetadata::new();
        m.set_metadata_id(1);
        m.set_value(vec![0x01, 0x02]);
        msg.mut_metadata().push(m);

        let packet = PacketIn::decode(&ctx, &msg).unwrap();
        assert_eq!(packet.metadata("ingress_port"), Some(&[0x01, 0x02][..]));
        assert_eq!(packet.metadata_u128("ingress_port"), Some(258));
        assert_eq!(packet.to_string(), "packet_in (3 bytes) ingress_port=0x0102");

        msg.mut_metadata()[0].set_metadata_id(99);
        assert!(PacketIn::decode(&ctx, &msg).is_err());
    }
}
