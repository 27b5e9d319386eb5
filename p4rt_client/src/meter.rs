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

use proto::p4runtime::{self, Entity, Index, MeterConfig};

use crate::context::Context;
use crate::entity::P4Entity;
use crate::error::{Error, Result};
use crate::schema::{self, P4Object};
use crate::table_entry::TableEntry;

fn set_config_attr(config: &mut MeterConfig, attr: &str, v: i64, what: &str) -> Result<()> {
    match attr {
        "cir" => config.set_cir(v),
        "cburst" => config.set_cburst(v),
        "pir" => config.set_pir(v),
        "pburst" => config.set_pburst(v),
        _ => {
            return Err(Error::SchemaLookup(format!(
                "'{}' is not a valid attribute for {}",
                attr, what
            )))
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct MeterEntry {
    ctx: Context,
    meter: schema::Meter,
    index: Option<i64>,
    config: Option<MeterConfig>,
}

impl MeterEntry {
    pub fn new(ctx: &Context, meter_name: &str) -> Result<Self> {
        Ok(MeterEntry {
            ctx: ctx.clone(),
            meter: ctx.schema().meter(meter_name)?.clone(),
            index: None,
            config: None,
        })
    }

    pub fn meter(&self) -> &schema::Meter {
        &self.meter
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

    pub fn config(&self) -> Option<&MeterConfig> {
        self.config.as_ref()
    }

    /// The meter configuration, created with zero rates on first access.
    pub fn config_mut(&mut self) -> &mut MeterConfig {
        self.config.get_or_insert_with(MeterConfig::new)
    }

    pub fn clear_config(&mut self) {
        self.config = None;
    }

    /// Sets `index`, `cir`, `cburst`, `pir` or `pburst` by name.
    pub fn set(&mut self, attr: &str, v: i64) -> Result<()> {
        if attr == "index" {
            self.set_index(v);
            return Ok(());
        }
        set_config_attr(self.config_mut(), attr, v, "meter entries")
    }
}

impl P4Entity for MeterEntry {
    fn to_entity(&self) -> Result<Entity> {
        let mut entry = p4runtime::MeterEntry::new();
        entry.set_meter_id(self.meter.id());
        if let Some(index) = self.index {
            let mut i = Index::new();
            i.set_index(index);
            entry.set_index(i);
        }
        if let Some(config) = &self.config {
            entry.set_config(config.clone());
        }
        let mut entity = Entity::new();
        entity.set_meter_entry(entry);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_meter_entry() {
            return Err(Error::ProtocolDecode("expected a meter entry entity".into()));
        }
        let msg = entity.get_meter_entry();
        let meter = self.ctx.schema().resolve_id(msg.get_meter_id())?;
        let mut entry = MeterEntry::new(&self.ctx, meter)?;
        if msg.has_index() {
            entry.index = Some(msg.get_index().get_index());
        }
        if msg.has_config() {
            entry.config = Some(msg.get_config().clone());
        }
        Ok(entry)
    }
}

/// The meter attached to one entry of a table.
#[derive(Clone, Debug)]
pub struct DirectMeterEntry {
    meter: schema::DirectMeter,
    table_entry: TableEntry,
    config: Option<MeterConfig>,
}

impl DirectMeterEntry {
    pub fn new(ctx: &Context, meter_name: &str) -> Result<Self> {
        let meter = ctx.schema().direct_meter(meter_name)?.clone();
        let table = ctx.schema().table_by_id(meter.direct_table_id)?;
        Ok(DirectMeterEntry {
            table_entry: TableEntry::new(ctx, table.name())?,
            meter,
            config: None,
        })
    }

    pub fn meter(&self) -> &schema::DirectMeter {
        &self.meter
    }

    pub fn table_entry(&self) -> &TableEntry {
        &self.table_entry
    }

    pub fn table_entry_mut(&mut self) -> &mut TableEntry {
        &mut self.table_entry
    }

    pub fn config(&self) -> Option<&MeterConfig> {
        self.config.as_ref()
    }

    pub fn config_mut(&mut self) -> &mut MeterConfig {
        self.config.get_or_insert_with(MeterConfig::new)
    }

    pub fn clear_config(&mut self) {
        self.config = None;
    }

    pub fn set(&mut self, attr: &str, v: i64) -> Result<()> {
        if attr == "index" {
            return Err(Error::Capability(format!(
                "Direct meter '{}' is not indexed: use the table entry to select a meter",
                self.meter.name()
            )));
        }
        set_config_attr(self.config_mut(), attr, v, "direct meter entries")
    }
}

impl P4Entity for DirectMeterEntry {
    fn validate(&self) -> Result<()> {
        self.table_entry.validate()
    }

    fn to_entity(&self) -> Result<Entity> {
        let mut entry = p4runtime::DirectMeterEntry::new();
        entry.set_table_entry(self.table_entry.to_proto()?);
        if let Some(config) = &self.config {
            entry.set_config(config.clone());
        }
        let mut entity = Entity::new();
        entity.set_direct_meter_entry(entry);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_direct_meter_entry() {
            return Err(Error::ProtocolDecode(
                "expected a direct meter entry entity".into(),
            ));
        }
        let msg = entity.get_direct_meter_entry();
        Ok(DirectMeterEntry {
            meter: self.meter.clone(),
            table_entry: TableEntry::decode(self.table_entry.context(), msg.get_table_entry())?,
            config: if msg.has_config() {
                Some(msg.get_config().clone())
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
    fn meter_config_by_name() {
        let ctx = context();
        let mut entry = MeterEntry::new(&ctx, "MeterA").unwrap();
        assert!(entry.config().is_none());
        entry.set("index", 3).unwrap();
        entry.set("cir", 1000).unwrap();
        entry.set("pburst", 20).unwrap();
        assert!(matches!(entry.set("eir", 1), Err(Error::SchemaLookup(_))));

        let entity = entry.entity().unwrap();
        let msg = entity.get_meter_entry();
        assert_eq!(msg.get_index().get_index(), 3);
        assert_eq!(msg.get_config().get_cir(), 1000);
        assert_eq!(msg.get_config().get_cburst(), 0);
        assert_eq!(msg.get_config().get_pburst(), 20);

        let decoded = entry.from_entity(&entity).unwrap();
        assert_eq!(decoded.meter().name(), "MeterA");
        assert_eq!(decoded.config().map(|c| c.get_pburst()), Some(20));
    }

    #[test]
    fn direct_meter_binds_table_entry() {
        let ctx = context();
        let mut entry = DirectMeterEntry::new(&ctx, "ExactOne_meter").unwrap();
        assert!(matches!(entry.set("index", 0), Err(Error::Capability(_))));
        entry.set("cir", 5).unwrap();
        entry
            .table_entry_mut()
            .set_match("field32", "1")
            .unwrap();
        let entity = entry.entity().unwrap();
        let msg = entity.get_direct_meter_entry();
        assert_eq!(msg.get_table_entry().get_table_id(), 33582705);
        assert_eq!(msg.get_config().get_cir(), 5);
    }
}
