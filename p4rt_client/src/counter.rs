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

use proto::p4runtime::{self, CounterData, Entity, Index};

use crate::context::Context;
use crate::entity::P4Entity;
use crate::error::{Error, Result};
use crate::schema::{self, CounterUnit, P4Object};
use crate::table_entry::TableEntry;

fn set_byte_count(data: &mut CounterData, unit: CounterUnit, name: &str, v: i64) -> Result<()> {
    if unit == CounterUnit::Packets {
        return Err(Error::Capability(format!(
            "Counter '{}' is of type PACKETS and does not count bytes",
            name
        )));
    }
    data.set_byte_count(v);
    Ok(())
}

fn set_packet_count(data: &mut CounterData, unit: CounterUnit, name: &str, v: i64) -> Result<()> {
    if unit == CounterUnit::Bytes {
        return Err(Error::Capability(format!(
            "Counter '{}' is of type BYTES and does not count packets",
            name
        )));
    }
    data.set_packet_count(v);
    Ok(())
}

fn unknown_attr(attr: &str, what: &str) -> Error {
    Error::SchemaLookup(format!("'{}' is not a valid attribute for {}", attr, what))
}

/// One cell of an indexed counter.  Without an index the entry reads every
/// cell.
#[derive(Clone, Debug)]
pub struct CounterEntry {
    ctx: Context,
    counter: schema::Counter,
    index: Option<i64>,
    data: Option<CounterData>,
}

impl CounterEntry {
    pub fn new(ctx: &Context, counter_name: &str) -> Result<Self> {
        Ok(CounterEntry {
            ctx: ctx.clone(),
            counter: ctx.schema().counter(counter_name)?.clone(),
            index: None,
            data: None,
        })
    }

    pub fn counter(&self) -> &schema::Counter {
        &self.counter
    }

    pub fn index(&self) -> Option<i64> {
        self.index
    }

    pub fn set_index(&mut self, index: i64) {
        self.index = Some(index);
    }

    pub fn clear_index(&mut self) {
        self.index = None;
    }

    pub fn data(&self) -> Option<&CounterData> {
        self.data.as_ref()
    }

    /// The counter data, created with zero counts on first access.
    pub fn data_mut(&mut self) -> &mut CounterData {
        self.data.get_or_insert_with(CounterData::new)
    }

    pub fn clear_data(&mut self) {
        self.data = None;
    }

    pub fn set_byte_count(&mut self, v: i64) -> Result<()> {
        let unit = self.counter.unit;
        let name = self.counter.preamble.name.clone();
        set_byte_count(self.data_mut(), unit, &name, v)
    }

    pub fn set_packet_count(&mut self, v: i64) -> Result<()> {
        let unit = self.counter.unit;
        let name = self.counter.preamble.name.clone();
        set_packet_count(self.data_mut(), unit, &name, v)
    }

    /// Sets `index`, `byte_count` or `packet_count` by name.
    pub fn set(&mut self, attr: &str, v: i64) -> Result<()> {
        match attr {
            "index" => {
                self.set_index(v);
                Ok(())
            }
            "byte_count" => self.set_byte_count(v),
            "packet_count" => self.set_packet_count(v),
            _ => Err(unknown_attr(attr, "counter entries")),
        }
    }
}

impl P4Entity for CounterEntry {
    fn to_entity(&self) -> Result<Entity> {
        let mut entry = p4runtime::CounterEntry::new();
        entry.set_counter_id(self.counter.id());
        if let Some(index) = self.index {
            let mut i = Index::new();
            i.set_index(index);
            entry.set_index(i);
        }
        if let Some(data) = &self.data {
            entry.set_data(data.clone());
        }
        let mut entity = Entity::new();
        entity.set_counter_entry(entry);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_counter_entry() {
            return Err(Error::ProtocolDecode("expected a counter entry entity".into()));
        }
        let msg = entity.get_counter_entry();
        let counter = self.ctx.schema().resolve_id(msg.get_counter_id())?;
        let mut entry = CounterEntry::new(&self.ctx, counter)?;
        if msg.has_index() {
            entry.index = Some(msg.get_index().get_index());
        }
        if msg.has_data() {
            entry.data = Some(msg.get_data().clone());
        }
        Ok(entry)
    }
}

/// The counter attached to one entry of a table.
#[derive(Clone, Debug)]
pub struct DirectCounterEntry {
    counter: schema::DirectCounter,
    table_entry: TableEntry,
    data: Option<CounterData>,
}

impl DirectCounterEntry {
    pub fn new(ctx: &Context, counter_name: &str) -> Result<Self> {
        let counter = ctx.schema().direct_counter(counter_name)?.clone();
        let table = ctx.schema().table_by_id(counter.direct_table_id)?;
        Ok(DirectCounterEntry {
            table_entry: TableEntry::new(ctx, table.name())?,
            counter,
            data: None,
        })
    }

    pub fn counter(&self) -> &schema::DirectCounter {
        &self.counter
    }

    /// The entry whose counter this is.  Its match key selects the entry.
    pub fn table_entry(&self) -> &TableEntry {
        &self.table_entry
    }

    pub fn table_entry_mut(&mut self) -> &mut TableEntry {
        &mut self.table_entry
    }

    pub fn data(&self) -> Option<&CounterData> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> &mut CounterData {
        self.data.get_or_insert_with(CounterData::new)
    }

    pub fn clear_data(&mut self) {
        self.data = None;
    }

    pub fn set_byte_count(&mut self, v: i64) -> Result<()> {
        let unit = self.counter.unit;
        let name = self.counter.preamble.name.clone();
        set_byte_count(self.data_mut(), unit, &name, v)
    }

    pub fn set_packet_count(&mut self, v: i64) -> Result<()> {
        let unit = self.counter.unit;
        let name = self.counter.preamble.name.clone();
        set_packet_count(self.data_mut(), unit, &name, v)
    }

    pub fn set(&mut self, attr: &str, v: i64) -> Result<()> {
        match attr {
            "index" => Err(Error::Capability(format!(
                "Direct counter '{}' is not indexed: use the table entry to select a counter",
                self.counter.name()
            ))),
            "byte_count" => self.set_byte_count(v),
            "packet_count" => self.set_packet_count(v),
            _ => Err(unknown_attr(attr, "direct counter entries")),
        }
    }
}

impl P4Entity for DirectCounterEntry {
    fn validate(&self) -> Result<()> {
        self.table_entry.validate()
    }

    fn to_entity(&self) -> Result<Entity> {
        let mut entry = p4runtime::DirectCounterEntry::new();
        entry.set_table_entry(self.table_entry.to_proto()?);
        if let Some(data) = &self.data {
            entry.set_data(data.clone());
        }
        let mut entity = Entity::new();
        entity.set_direct_counter_entry(entry);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_direct_counter_entry() {
            return Err(Error::ProtocolDecode(
                "expected a direct counter entry entity".into(),
            ));
        }
        let msg = entity.get_direct_counter_entry();
        let ctx = self.table_entry.context();
        Ok(DirectCounterEntry {
            counter: self.counter.clone(),
            table_entry: TableEntry::decode(ctx, msg.get_table_entry())?,
            data: if msg.has_data() {
                Some(msg.get_data().clone())
            } else {
                None
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::context;

    #[test]
    fn indexed_counter() {
        let ctx = context();
        let mut entry = CounterEntry::new(&ctx, "CounterA").unwrap();
        let entity = entry.entity().unwrap();
        assert!(!entity.get_counter_entry().has_index());
        assert!(!entity.get_counter_entry().has_data());

        entry.set("index", 12).unwrap();
        entry.set("packet_count", 4).unwrap();
        let entity = entry.entity().unwrap();
        let msg = entity.get_counter_entry();
        assert_eq!(msg.get_counter_id(), 302055013);
        assert_eq!(msg.get_index().get_index(), 12);
        assert_eq!(msg.get_data().get_packet_count(), 4);
        assert_eq!(msg.get_data().get_byte_count(), 0);

        assert!(matches!(
            entry.set("bytes", 1),
            Err(Error::SchemaLookup(_))
        ));

        let decoded = entry.from_entity(&entity).unwrap();
        assert_eq!(decoded.index(), Some(12));
        assert_eq!(decoded.data().map(|d| d.get_packet_count()), Some(4));
    }

    #[test]
    fn data_is_created_on_access() {
        let ctx = context();
        let mut entry = CounterEntry::new(&ctx, "CounterA").unwrap();
        assert!(entry.data().is_none());
        assert_eq!(entry.data_mut().get_byte_count(), 0);
        assert!(entry.entity().unwrap().get_counter_entry().has_data());
    }

    #[test]
    fn unit_is_checked() {
        let ctx = context();
        let mut direct = DirectCounterEntry::new(&ctx, "ExactOne_counter").unwrap();
        assert!(matches!(
            direct.set_packet_count(1),
            Err(Error::Capability(_))
        ));
        direct.set_byte_count(100).unwrap();
    }

    #[test]
    fn direct_counter_has_no_index() {
        let ctx = context();
        let mut direct = DirectCounterEntry::new(&ctx, "ExactOne_counter").unwrap();
        assert!(matches!(direct.set("index", 1), Err(Error::Capability(_))));

        direct
            .table_entry_mut()
            .set_match("field32", "0x0a000001")
            .unwrap();
        let entity = direct.entity().unwrap();
        let msg = entity.get_direct_counter_entry();
        assert_eq!(msg.get_table_entry().get_table_id(), 33582705);
        assert_eq!(msg.get_table_entry().get_field_match().len(), 1);
    }
}
