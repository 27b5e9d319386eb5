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

//! Packet replication engine entries: multicast groups and clone sessions.
//! These are not described by the P4Info, so they need no context.

use proto::p4runtime::{self, Entity, PacketReplicationEngineEntry};

use protobuf::RepeatedField;

use crate::entity::P4Entity;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Replica {
    pub egress_port: u32,
    pub instance: u32,
}

impl Replica {
    pub fn new(egress_port: u32) -> Self {
        Replica {
            egress_port,
            instance: 0,
        }
    }

    fn to_proto(self) -> p4runtime::Replica {
        let mut r = p4runtime::Replica::new();
        r.set_egress_port(self.egress_port);
        r.set_instance(self.instance);
        r
    }

    fn from_proto(r: &p4runtime::Replica) -> Self {
        Replica {
            egress_port: r.get_egress_port(),
            instance: r.get_instance(),
        }
    }
}

fn replicas_to_proto(replicas: &[Replica]) -> RepeatedField<p4runtime::Replica> {
    replicas.iter().map(|r| r.to_proto()).collect()
}

fn expect_pre_entry(entity: &Entity) -> Result<&PacketReplicationEngineEntry> {
    if !entity.has_packet_replication_engine_entry() {
        return Err(Error::ProtocolDecode(
            "expected a packet replication engine entity".into(),
        ));
    }
    Ok(entity.get_packet_replication_engine_entry())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MulticastGroupEntry {
    pub group_id: u32,
    pub replicas: Vec<Replica>,
}

impl MulticastGroupEntry {
    /// Group id 0 reads every group.
    pub fn new(group_id: u32) -> Self {
        MulticastGroupEntry {
            group_id,
            replicas: Vec::new(),
        }
    }

    pub fn add(&mut self, egress_port: u32, instance: u32) -> &mut Self {
        self.replicas.push(Replica {
            egress_port,
            instance,
        });
        self
    }
}

impl P4Entity for MulticastGroupEntry {
    fn validate_write(&self) -> Result<()> {
        if self.group_id == 0 {
            return Err(Error::Validation("0 is not a valid multicast group id".into()));
        }
        Ok(())
    }

    fn to_entity(&self) -> Result<Entity> {
        let mut group = p4runtime::MulticastGroupEntry::new();
        group.set_multicast_group_id(self.group_id);
        group.set_replicas(replicas_to_proto(&self.replicas));

        let mut pre_entry = PacketReplicationEngineEntry::new();
        pre_entry.set_multicast_group_entry(group);

        let mut entity = Entity::new();
        entity.set_packet_replication_engine_entry(pre_entry);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        let pre_entry = expect_pre_entry(entity)?;
        if !pre_entry.has_multicast_group_entry() {
            return Err(Error::ProtocolDecode("expected a multicast group entry".into()));
        }
        let msg = pre_entry.get_multicast_group_entry();
        Ok(MulticastGroupEntry {
            group_id: msg.get_multicast_group_id(),
            replicas: msg.get_replicas().iter().map(Replica::from_proto).collect(),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloneSessionEntry {
    pub session_id: u32,
    pub replicas: Vec<Replica>,
    pub class_of_service: u32,
    /// Truncation length; 0 clones whole packets.
    pub packet_length_bytes: i32,
}

impl CloneSessionEntry {
    pub fn new(session_id: u32) -> Self {
        CloneSessionEntry {
            session_id,
            ..Default::default()
        }
    }

    pub fn add(&mut self, egress_port: u32, instance: u32) -> &mut Self {
        self.replicas.push(Replica {
            egress_port,
            instance,
        });
        self
    }
}

impl P4Entity for CloneSessionEntry {
    fn to_entity(&self) -> Result<Entity> {
        let mut session = p4runtime::CloneSessionEntry::new();
        session.set_session_id(self.session_id);
        session.set_replicas(replicas_to_proto(&self.replicas));
        session.set_class_of_service(self.class_of_service);
        session.set_packet_length_bytes(self.packet_length_bytes);

        let mut pre_entry = PacketReplicationEngineEntry::new();
        pre_entry.set_clone_session_entry(session);

        let mut entity = Entity::new();
        entity.set_packet_replication_engine_entry(pre_entry);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        let pre_entry = expect_pre_entry(entity)?;
        if !pre_entry.has_clone_session_entry() {
            return Err(Error::ProtocolDecode("expected a clone session entry".into()));
        }
        let msg = pre_entry.get_clone_session_entry();
        Ok(CloneSessionEntry {
            session_id: msg.get_session_id(),
            replicas: msg.get_replicas().iter().map(Replica::from_proto).collect(),
            class_of_service: msg.get_class_of_service(),
            packet_length_bytes: msg.get_packet_length_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::p4runtime::Update_Type;

    #[test]
    fn multicast_group_zero_is_read_only() {
        let read_all = MulticastGroupEntry::new(0);
        assert!(read_all.entity().is_ok());
        assert!(matches!(
            read_all.update(Update_Type::INSERT),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn multicast_group_replicas() {
        let mut group = MulticastGroupEntry::new(1);
        group.add(1, 0).add(2, 0).add(2, 1);
        let update = group.update(Update_Type::INSERT).unwrap();
        assert_eq!(update.get_field_type(), Update_Type::INSERT);
        let msg = update
            .get_entity()
            .get_packet_replication_engine_entry()
            .get_multicast_group_entry();
        assert_eq!(msg.get_multicast_group_id(), 1);
        let ports: Vec<(u32, u32)> = msg
            .get_replicas()
            .iter()
            .map(|r| (r.get_egress_port(), r.get_instance()))
            .collect();
        assert_eq!(ports, vec![(1, 0), (2, 0), (2, 1)]);
        assert_eq!(group.from_entity(update.get_entity()).unwrap(), group);
    }

    #[test]
    fn clone_session_scalars() {
        let mut session = CloneSessionEntry::new(100);
        session.add(5, 0);
        session.class_of_service = 2;
        session.packet_length_bytes = 128;
        let entity = session.entity().unwrap();
        let msg = entity
            .get_packet_replication_engine_entry()
            .get_clone_session_entry();
        assert_eq!(msg.get_class_of_service(), 2);
        assert_eq!(msg.get_packet_length_bytes(), 128);
        assert_eq!(session.from_entity(&entity).unwrap(), session);
        assert!(MulticastGroupEntry::new(1).from_entity(&entity).is_err());
    }
}
