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

use proto::p4runtime::{self, CounterData, Entity, MeterConfig, TableAction};

use protobuf::RepeatedField;

use std::fmt::{self, Display};
use std::sync::Arc;

use tracing::info;

use crate::action::Action;
use crate::action_profile::Oneshot;
use crate::bytes_utils::to_hex;
use crate::context::Context;
use crate::entity::P4Entity;
use crate::error::{Error, Result};
use crate::match_key::MatchKey;
use crate::schema::{P4Object, Table};

/// What a table entry does on a hit.  Which variants a table accepts
/// depends on whether it has an action profile, and whether that profile
/// has a selector.
#[derive(Clone, Debug, Default)]
pub enum ActionSpec {
    #[default]
    None,
    Direct(Action),
    MemberId(u32),
    GroupId(u32),
    Oneshot(Oneshot),
}

#[derive(Clone, Debug)]
pub struct TableEntry {
    ctx: Context,
    table: Arc<Table>,
    match_key: MatchKey,
    action: ActionSpec,
    priority: i32,
    is_default: bool,
    metadata: Vec<u8>,
    idle_timeout_ns: i64,
    counter_data: Option<CounterData>,
    meter_config: Option<MeterConfig>,
}

impl TableEntry {
    pub fn new(ctx: &Context, table_name: &str) -> Result<Self> {
        let table = Arc::new(ctx.schema().table(table_name)?.clone());
        Ok(TableEntry::for_table(ctx, table))
    }

    pub fn for_table(ctx: &Context, table: Arc<Table>) -> Self {
        TableEntry {
            ctx: ctx.clone(),
            match_key: MatchKey::new(ctx, table.clone()),
            table,
            action: ActionSpec::None,
            priority: 0,
            is_default: false,
            metadata: Vec::new(),
            idle_timeout_ns: 0,
            counter_data: None,
            meter_config: None,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn match_key(&self) -> &MatchKey {
        &self.match_key
    }

    /// Sets one field of the match key.  This is allowed on a default
    /// entry, but such an entry no longer validates.
    pub fn set_match(&mut self, field: &str, value: &str) -> Result<()> {
        self.match_key.set(field, value)
    }

    pub fn with_match(mut self, field: &str, value: &str) -> Result<Self> {
        self.set_match(field, value)?;
        Ok(self)
    }

    pub fn unset_match(&mut self, field: &str) -> Result<()> {
        self.match_key.unset(field)
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Marks the entry as the table's default entry.  A default entry has
    /// no match key, so any key already set is dropped.
    pub fn set_default(&mut self, is_default: bool) {
        if is_default && !self.match_key.is_empty() {
            info!("Resetting match key because entry is now default");
            self.match_key.reset();
        }
        self.is_default = is_default;
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: Vec<u8>) {
        self.metadata = metadata;
    }

    pub fn idle_timeout_ns(&self) -> i64 {
        self.idle_timeout_ns
    }

    pub fn set_idle_timeout_ns(&mut self, timeout: i64) {
        self.idle_timeout_ns = timeout;
    }

    pub fn action(&self) -> &ActionSpec {
        &self.action
    }

    pub fn clear_action(&mut self) {
        self.action = ActionSpec::None;
    }

    pub fn set_action(&mut self, action: Action) -> Result<()> {
        if let Some(implementation) = &self.table.implementation {
            return Err(Error::Capability(format!(
                "Table '{}' uses action profile '{}': set a member id, a group id or a oneshot instead of a direct action",
                self.table.name(),
                implementation.action_profile_name
            )));
        }
        if self.table.action_ref(action.id()).is_none() {
            return Err(Error::Validation(format!(
                "Action '{}' is not a valid action for table '{}'",
                action.name(),
                self.table.name()
            )));
        }
        self.action = ActionSpec::Direct(action);
        Ok(())
    }

    pub fn with_action(mut self, action: Action) -> Result<Self> {
        self.set_action(action)?;
        Ok(self)
    }

    pub fn set_member_id(&mut self, member_id: u32) -> Result<()> {
        if !self.table.has_implementation() {
            return Err(Error::Capability(format!(
                "Table '{}' does not have an action profile: member ids cannot be used",
                self.table.name()
            )));
        }
        self.action = ActionSpec::MemberId(member_id);
        Ok(())
    }

    pub fn set_group_id(&mut self, group_id: u32) -> Result<()> {
        if !self.table.has_selector() {
            return Err(Error::Capability(format!(
                "Table '{}' does not have an action selector: group ids cannot be used",
                self.table.name()
            )));
        }
        self.action = ActionSpec::GroupId(group_id);
        Ok(())
    }

    pub fn set_oneshot(&mut self, oneshot: Oneshot) -> Result<()> {
        if oneshot.table_id() != self.table.id() {
            return Err(Error::Validation(format!(
                "Oneshot action set was built for a different table than '{}'",
                self.table.name()
            )));
        }
        self.action = ActionSpec::Oneshot(oneshot);
        Ok(())
    }

    /// The direct counter data of the entry, created on first access.
    pub fn counter_data(&mut self) -> Result<&mut CounterData> {
        if self.table.direct_counter.is_none() {
            return Err(Error::Capability(format!(
                "Table '{}' does not have a direct counter",
                self.table.name()
            )));
        }
        Ok(self.counter_data.get_or_insert_with(CounterData::new))
    }

    pub fn clear_counter_data(&mut self) {
        self.counter_data = None;
    }

    /// The direct meter configuration of the entry, created on first access.
    pub fn meter_config(&mut self) -> Result<&mut MeterConfig> {
        if self.table.direct_meter.is_none() {
            return Err(Error::Capability(format!(
                "Table '{}' does not have a direct meter",
                self.table.name()
            )));
        }
        Ok(self.meter_config.get_or_insert_with(MeterConfig::new))
    }

    pub fn clear_meter_config(&mut self) {
        self.meter_config = None;
    }

    pub fn to_proto(&self) -> Result<p4runtime::TableEntry> {
        let mut te = p4runtime::TableEntry::new();
        te.set_table_id(self.table.id());
        te.set_field_match(RepeatedField::from_vec(self.match_key.to_proto()));

        let mut table_action = TableAction::new();
        match &self.action {
            ActionSpec::None => (),
            ActionSpec::Direct(action) => table_action.set_action(action.to_proto()?),
            ActionSpec::MemberId(id) => table_action.set_action_profile_member_id(*id),
            ActionSpec::GroupId(id) => table_action.set_action_profile_group_id(*id),
            ActionSpec::Oneshot(oneshot) => {
                table_action.set_action_profile_action_set(oneshot.to_proto()?)
            }
        }
        if !matches!(self.action, ActionSpec::None) {
            te.set_action(table_action);
        }

        te.set_priority(self.priority);
        te.set_is_default_action(self.is_default);
        te.set_metadata(self.metadata.clone());
        te.set_idle_timeout_ns(self.idle_timeout_ns);
        if let Some(data) = &self.counter_data {
            te.set_counter_data(data.clone());
        }
        if let Some(config) = &self.meter_config {
            te.set_meter_config(config.clone());
        }
        Ok(te)
    }

    /// Decodes a table entry read from the device.
    pub fn decode(ctx: &Context, msg: &p4runtime::TableEntry) -> Result<Self> {
        let table = Arc::new(ctx.schema().table_by_id(msg.get_table_id())?.clone());
        let mut entry = TableEntry::for_table(ctx, table.clone());
        for fm in msg.get_field_match() {
            entry.match_key.insert_raw(fm.clone())?;
        }
        if msg.has_action() {
            let ta = msg.get_action();
            entry.action = if ta.has_action() {
                ActionSpec::Direct(Action::from_proto(ctx, ta.get_action())?)
            } else if ta.has_action_profile_member_id() {
                ActionSpec::MemberId(ta.get_action_profile_member_id())
            } else if ta.has_action_profile_group_id() {
                ActionSpec::GroupId(ta.get_action_profile_group_id())
            } else if ta.has_action_profile_action_set() {
                ActionSpec::Oneshot(Oneshot::from_proto(
                    ctx,
                    table,
                    ta.get_action_profile_action_set(),
                )?)
            } else {
                ActionSpec::None
            };
        }
        entry.priority = msg.get_priority();
        entry.is_default = msg.get_is_default_action();
        entry.metadata = msg.get_metadata().to_vec();
        entry.idle_timeout_ns = msg.get_idle_timeout_ns();
        if msg.has_counter_data() {
            entry.counter_data = Some(msg.get_counter_data().clone());
        }
        if msg.has_meter_config() {
            entry.meter_config = Some(msg.get_meter_config().clone());
        }
        Ok(entry)
    }
}

impl P4Entity for TableEntry {
    fn validate(&self) -> Result<()> {
        if self.is_default && !self.match_key.is_empty() {
            return Err(Error::Validation(format!(
                "Default entry for table '{}' cannot have a match key",
                self.table.name()
            )));
        }
        if self.counter_data.is_some() && self.table.direct_counter.is_none() {
            return Err(Error::Capability(format!(
                "Table '{}' does not have a direct counter",
                self.table.name()
            )));
        }
        if self.meter_config.is_some() && self.table.direct_meter.is_none() {
            return Err(Error::Capability(format!(
                "Table '{}' does not have a direct meter",
                self.table.name()
            )));
        }
        if let ActionSpec::Direct(action) = &self.action {
            let action_ref = self.table.action_ref(action.id()).ok_or_else(|| {
                Error::Validation(format!(
                    "Action '{}' is not a valid action for table '{}'",
                    action.name(),
                    self.table.name()
                ))
            })?;
            if self.is_default && !action_ref.may_be_default {
                return Err(Error::Validation(format!(
                    "Action '{}' cannot be the default action for table '{}'",
                    action.name(),
                    self.table.name()
                )));
            }
            if !self.is_default && !action_ref.may_be_entry {
                return Err(Error::Validation(format!(
                    "Action '{}' can only be the default action for table '{}'",
                    action.name(),
                    self.table.name()
                )));
            }
        }
        Ok(())
    }

    fn to_entity(&self) -> Result<Entity> {
        let mut entity = Entity::new();
        entity.set_table_entry(self.to_proto()?);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_table_entry() {
            return Err(Error::ProtocolDecode("expected a table entry entity".into()));
        }
        TableEntry::decode(&self.ctx, entity.get_table_entry())
    }
}

impl Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "table {}", self.table.name())?;
        if self.is_default {
            writeln!(f, "  default entry")?;
        }
        for line in self.match_key.to_string().lines() {
            writeln!(f, "  {}", line)?;
        }
        match &self.action {
            ActionSpec::None => (),
            ActionSpec::Direct(action) => writeln!(f, "  action {}", action)?,
            ActionSpec::MemberId(id) => writeln!(f, "  member {}", id)?,
            ActionSpec::GroupId(id) => writeln!(f, "  group {}", id)?,
            ActionSpec::Oneshot(oneshot) => {
                for a in oneshot.actions() {
                    writeln!(f, "  oneshot {} weight {}", a.action, a.weight)?;
                }
            }
        }
        if self.priority != 0 {
            writeln!(f, "  priority {}", self.priority)?;
        }
        if !self.metadata.is_empty() {
            writeln!(f, "  metadata {}", to_hex(&self.metadata))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_profile::OneshotAction;
    use crate::test_util::context;
    use tracing_test::traced_test;

    fn action_a(ctx: &Context) -> Action {
        Action::new(ctx, "actionA")
            .unwrap()
            .with("param", "0xaabbccddeeff")
            .unwrap()
    }

    #[test]
    fn exact_entry_wire_form() {
        let ctx = context();
        let entry = TableEntry::new(&ctx, "ExactOne")
            .unwrap()
            .with_match("header_test.field32", "0x0a000001")
            .unwrap()
            .with_action(action_a(&ctx))
            .unwrap();
        let entity = entry.entity().unwrap();
        let te = entity.get_table_entry();
        assert_eq!(te.get_table_id(), 33582705);
        assert_eq!(te.get_field_match().len(), 1);
        assert_eq!(te.get_field_match()[0].get_exact().get_value(), &[0x0a, 0, 0, 1]);
        assert_eq!(te.get_action().get_action().get_action_id(), 16783703);
        assert!(!te.get_is_default_action());
    }

    #[test]
    #[traced_test]
    fn default_flag_clears_match_key() {
        let ctx = context();
        let mut entry = TableEntry::new(&ctx, "ExactOne")
            .unwrap()
            .with_match("field32", "1")
            .unwrap();
        entry.set_default(true);
        assert!(entry.match_key().is_empty());
        assert!(logs_contain("Resetting match key because entry is now default"));

        // Setting a field afterwards is allowed, but the entry no longer
        // validates.
        entry.set_match("field32", "1").unwrap();
        assert!(matches!(entry.entity(), Err(Error::Validation(_))));
    }

    #[test]
    fn action_scope_is_checked() {
        let ctx = context();
        let no_action = Action::new(&ctx, "NoAction").unwrap();
        let mut entry = TableEntry::new(&ctx, "ExactOne")
            .unwrap()
            .with_match("field32", "1")
            .unwrap();
        entry.set_action(no_action.clone()).unwrap();
        assert!(matches!(entry.entity(), Err(Error::Validation(_))));

        let mut default_entry = TableEntry::new(&ctx, "ExactOne").unwrap();
        default_entry.set_default(true);
        default_entry.set_action(no_action).unwrap();
        assert!(default_entry.entity().is_ok());

        let err = entry
            .set_action(Action::new(&ctx, "actionC").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn action_spec_gating() {
        let ctx = context();
        let mut plain = TableEntry::new(&ctx, "ExactOne").unwrap();
        assert!(matches!(plain.set_member_id(1), Err(Error::Capability(_))));
        assert!(matches!(plain.set_group_id(1), Err(Error::Capability(_))));

        let mut profile = TableEntry::new(&ctx, "ActProfTable").unwrap();
        let action = Action::new(&ctx, "actionB").unwrap().with("param", "1").unwrap();
        assert!(matches!(
            profile.set_action(action.clone()),
            Err(Error::Capability(_))
        ));
        profile.set_member_id(5).unwrap();
        assert!(matches!(profile.set_group_id(1), Err(Error::Capability(_))));
        let te = profile.to_proto().unwrap();
        assert_eq!(te.get_action().get_action_profile_member_id(), 5);

        let mut selector = TableEntry::new(&ctx, "ActSelTable").unwrap();
        selector.set_group_id(9).unwrap();
        let mut oneshot = Oneshot::new(&ctx, "ActSelTable").unwrap();
        oneshot.add(OneshotAction::new(action)).unwrap();
        selector.set_oneshot(oneshot).unwrap();
        let te = selector.to_proto().unwrap();
        assert_eq!(
            te.get_action()
                .get_action_profile_action_set()
                .get_action_profile_actions()
                .len(),
            1
        );

        let other = Oneshot::new(&ctx, "ActSelTable").unwrap();
        assert!(profile.set_oneshot(other).is_err());
    }

    #[test]
    fn direct_resources() {
        let ctx = context();
        let mut entry = TableEntry::new(&ctx, "ExactOne").unwrap();
        entry.counter_data().unwrap().set_packet_count(3);
        entry.meter_config().unwrap().set_cir(100);
        let te = entry.to_proto().unwrap();
        assert_eq!(te.get_counter_data().get_packet_count(), 3);
        assert_eq!(te.get_meter_config().get_cir(), 100);

        let mut lpm = TableEntry::new(&ctx, "LpmOne").unwrap();
        let err = lpm.counter_data().unwrap_err();
        assert_eq!(err.to_string(), "Table 'ingress.LpmOne' does not have a direct counter");
        assert!(matches!(lpm.meter_config(), Err(Error::Capability(_))));
    }

    #[test]
    fn decode_round_trip() {
        let ctx = context();
        let mut entry = TableEntry::new(&ctx, "TernaryOne")
            .unwrap()
            .with_match("header_test.field32", "10.0.0.1 &&& 0xff0000ff")
            .unwrap()
            .with_action(action_a(&ctx))
            .unwrap();
        entry.set_priority(10);
        let decoded = entry.from_entity(&entry.entity().unwrap()).unwrap();
        assert_eq!(decoded.priority(), 10);
        assert_eq!(decoded.match_key().len(), 1);
        match decoded.action() {
            ActionSpec::Direct(action) => assert_eq!(action.name(), "actionA"),
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(decoded.to_string(), entry.to_string());
    }
}
