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

use proto::p4runtime::{
    self, ActionProfileAction, ActionProfileActionSet, ActionProfileGroup_Member, Entity,
};

use protobuf::RepeatedField;

use std::sync::Arc;

use crate::action::Action;
use crate::context::Context;
use crate::entity::P4Entity;
use crate::error::{Error, Result};
use crate::schema::{self, P4Object, Table};

fn check_weight(weight: i32) -> Result<()> {
    if weight < 1 {
        return Err(Error::Validation(format!(
            "Invalid weight {}: weights must be at least 1",
            weight
        )));
    }
    Ok(())
}

/// A member of an action profile: a numbered action invocation that table
/// entries and groups refer to.
#[derive(Clone, Debug)]
pub struct ActionProfileMember {
    ctx: Context,
    profile: schema::ActionProfile,
    member_id: u32,
    action: Option<Action>,
}

impl ActionProfileMember {
    pub fn new(ctx: &Context, profile_name: &str) -> Result<Self> {
        Ok(ActionProfileMember {
            ctx: ctx.clone(),
            profile: ctx.schema().action_profile(profile_name)?.clone(),
            member_id: 0,
            action: None,
        })
    }

    pub fn profile(&self) -> &schema::ActionProfile {
        &self.profile
    }

    pub fn member_id(&self) -> u32 {
        self.member_id
    }

    pub fn set_member_id(&mut self, member_id: u32) {
        self.member_id = member_id;
    }

    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }

    /// The action must be one that the tables sharing this profile accept.
    pub fn set_action(&mut self, action: Action) -> Result<()> {
        let mut allowed = false;
        for &table_id in &self.profile.table_ids {
            if self
                .ctx
                .schema()
                .table_by_id(table_id)?
                .action_ref(action.id())
                .is_some()
            {
                allowed = true;
                break;
            }
        }
        if !allowed {
            return Err(Error::Validation(format!(
                "Action '{}' is not a valid action for action profile '{}'",
                action.name(),
                self.profile.name()
            )));
        }
        self.action = Some(action);
        Ok(())
    }
}

impl P4Entity for ActionProfileMember {
    fn to_entity(&self) -> Result<Entity> {
        let mut member = p4runtime::ActionProfileMember::new();
        member.set_action_profile_id(self.profile.id());
        member.set_member_id(self.member_id);
        if let Some(action) = &self.action {
            member.set_action(action.to_proto()?);
        }
        let mut entity = Entity::new();
        entity.set_action_profile_member(member);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_action_profile_member() {
            return Err(Error::ProtocolDecode(
                "expected an action profile member entity".into(),
            ));
        }
        let msg = entity.get_action_profile_member();
        Ok(ActionProfileMember {
            ctx: self.ctx.clone(),
            profile: self
                .ctx
                .schema()
                .action_profile_by_id(msg.get_action_profile_id())?
                .clone(),
            member_id: msg.get_member_id(),
            action: if msg.has_action() {
                Some(Action::from_proto(&self.ctx, msg.get_action())?)
            } else {
                None
            },
        })
    }
}

/// A reference from a group to one of the profile's members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupMember {
    pub member_id: u32,
    pub weight: i32,
    pub watch: i32,
    pub watch_port: Vec<u8>,
}

impl GroupMember {
    pub fn new(member_id: u32) -> Self {
        GroupMember {
            member_id,
            weight: 1,
            watch: 0,
            watch_port: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    fn to_proto(&self) -> ActionProfileGroup_Member {
        let mut m = ActionProfileGroup_Member::new();
        m.set_member_id(self.member_id);
        m.set_weight(self.weight);
        if !self.watch_port.is_empty() {
            m.set_watch_port(self.watch_port.clone());
        } else if self.watch != 0 {
            m.set_watch(self.watch);
        }
        m
    }

    fn from_proto(m: &ActionProfileGroup_Member) -> Self {
        GroupMember {
            member_id: m.get_member_id(),
            weight: m.get_weight(),
            watch: m.get_watch(),
            watch_port: m.get_watch_port().to_vec(),
        }
    }
}

/// A weighted set of members of a profile with a selector.
#[derive(Clone, Debug)]
pub struct ActionProfileGroup {
    ctx: Context,
    profile: schema::ActionProfile,
    group_id: u32,
    max_size: i32,
    members: Vec<GroupMember>,
}

impl ActionProfileGroup {
    pub fn new(ctx: &Context, profile_name: &str) -> Result<Self> {
        let profile = ctx.schema().action_profile(profile_name)?;
        if !profile.with_selector {
            return Err(Error::Capability(format!(
                "Action profile '{}' does not have a selector and cannot hold groups",
                profile.name()
            )));
        }
        Ok(ActionProfileGroup {
            ctx: ctx.clone(),
            profile: profile.clone(),
            group_id: 0,
            max_size: 0,
            members: Vec::new(),
        })
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    pub fn set_group_id(&mut self, group_id: u32) {
        self.group_id = group_id;
    }

    pub fn max_size(&self) -> i32 {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: i32) {
        self.max_size = max_size;
    }

    pub fn members(&self) -> &[GroupMember] {
        &self.members
    }

    pub fn add_member(&mut self, member: GroupMember) -> Result<()> {
        check_weight(member.weight)?;
        self.members.push(member);
        Ok(())
    }

    /// Adds `member_id` with the default weight.
    pub fn add(&mut self, member_id: u32) -> Result<()> {
        self.add_member(GroupMember::new(member_id))
    }

    pub fn clear_members(&mut self) {
        self.members.clear();
    }
}

impl P4Entity for ActionProfileGroup {
    fn to_entity(&self) -> Result<Entity> {
        let mut group = p4runtime::ActionProfileGroup::new();
        group.set_action_profile_id(self.profile.id());
        group.set_group_id(self.group_id);
        group.set_max_size(self.max_size);
        group.set_members(self.members.iter().map(|m| m.to_proto()).collect());
        let mut entity = Entity::new();
        entity.set_action_profile_group(group);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_action_profile_group() {
            return Err(Error::ProtocolDecode(
                "expected an action profile group entity".into(),
            ));
        }
        let msg = entity.get_action_profile_group();
        Ok(ActionProfileGroup {
            ctx: self.ctx.clone(),
            profile: self
                .ctx
                .schema()
                .action_profile_by_id(msg.get_action_profile_id())?
                .clone(),
            group_id: msg.get_group_id(),
            max_size: msg.get_max_size(),
            members: msg.get_members().iter().map(GroupMember::from_proto).collect(),
        })
    }
}

/// One candidate action of a oneshot action set.
#[derive(Clone, Debug)]
pub struct OneshotAction {
    pub action: Action,
    pub weight: i32,
    pub watch: i32,
    pub watch_port: Vec<u8>,
}

impl OneshotAction {
    pub fn new(action: Action) -> Self {
        OneshotAction {
            action,
            weight: 1,
            watch: 0,
            watch_port: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}

/// An inline set of weighted actions for a table backed by an action
/// selector, programmed without creating members and groups.
#[derive(Clone, Debug)]
pub struct Oneshot {
    table: Arc<Table>,
    actions: Vec<OneshotAction>,
}

impl Oneshot {
    pub fn new(ctx: &Context, table_name: &str) -> Result<Self> {
        Oneshot::for_table(Arc::new(ctx.schema().table(table_name)?.clone()))
    }

    pub fn for_table(table: Arc<Table>) -> Result<Self> {
        if !table.has_selector() {
            return Err(Error::Capability(format!(
                "Table '{}' does not support oneshot programming (no action selector)",
                table.name()
            )));
        }
        Ok(Oneshot {
            table,
            actions: Vec::new(),
        })
    }

    pub fn table_id(&self) -> u32 {
        self.table.id()
    }

    pub fn actions(&self) -> &[OneshotAction] {
        &self.actions
    }

    pub fn add(&mut self, action: OneshotAction) -> Result<()> {
        check_weight(action.weight)?;
        if self.table.action_ref(action.action.id()).is_none() {
            return Err(Error::Validation(format!(
                "Action '{}' is not a valid action for table '{}'",
                action.action.name(),
                self.table.name()
            )));
        }
        self.actions.push(action);
        Ok(())
    }

    pub fn to_proto(&self) -> Result<ActionProfileActionSet> {
        let mut actions = Vec::with_capacity(self.actions.len());
        for a in &self.actions {
            let mut msg = ActionProfileAction::new();
            msg.set_action(a.action.to_proto()?);
            msg.set_weight(a.weight);
            if !a.watch_port.is_empty() {
                msg.set_watch_port(a.watch_port.clone());
            } else if a.watch != 0 {
                msg.set_watch(a.watch);
            }
            actions.push(msg);
        }
        let mut set = ActionProfileActionSet::new();
        set.set_action_profile_actions(RepeatedField::from_vec(actions));
        Ok(set)
    }

    pub fn from_proto(
        ctx: &Context,
        table: Arc<Table>,
        msg: &ActionProfileActionSet,
    ) -> Result<Self> {
        let mut actions = Vec::new();
        for a in msg.get_action_profile_actions() {
            actions.push(OneshotAction {
                action: Action::from_proto(ctx, a.get_action())?,
                weight: a.get_weight(),
                watch: a.get_watch(),
                watch_port: a.get_watch_port().to_vec(),
            });
        }
        Ok(Oneshot { table, actions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::context;

    #[test]
    fn member_action_must_belong_to_profile_tables() {
        let ctx = context();
        let mut member = ActionProfileMember::new(&ctx, "ActProfile").unwrap();
        member.set_member_id(7);
        member
            .set_action(Action::new(&ctx, "actionB").unwrap().with("param", "3").unwrap())
            .unwrap();
        let entity = member.entity().unwrap();
        let msg = entity.get_action_profile_member();
        assert_eq!(msg.get_member_id(), 7);
        assert_eq!(msg.get_action().get_action_id(), 16809468);

        let err = member
            .set_action(Action::new(&ctx, "actionC").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn group_requires_selector() {
        let ctx = context();
        assert!(matches!(
            ActionProfileGroup::new(&ctx, "ActProfile"),
            Err(Error::Capability(_))
        ));
        let mut group = ActionProfileGroup::new(&ctx, "ActSelector").unwrap();
        group.set_group_id(1);
        group.set_max_size(4);
        group.add(10).unwrap();
        group
            .add_member(GroupMember::new(11).with_weight(3))
            .unwrap();
        assert!(matches!(
            group.add_member(GroupMember::new(12).with_weight(0)),
            Err(Error::Validation(_))
        ));

        let entity = group.entity().unwrap();
        let msg = entity.get_action_profile_group();
        assert_eq!(msg.get_max_size(), 4);
        let weights: Vec<(u32, i32)> = msg
            .get_members()
            .iter()
            .map(|m| (m.get_member_id(), m.get_weight()))
            .collect();
        assert_eq!(weights, vec![(10, 1), (11, 3)]);

        let decoded = group.from_entity(&entity).unwrap();
        assert_eq!(decoded.members(), group.members());
    }

    #[test]
    fn oneshot_requires_selector_table() {
        let ctx = context();
        assert!(matches!(
            Oneshot::new(&ctx, "ActProfTable"),
            Err(Error::Capability(_))
        ));
        let mut oneshot = Oneshot::new(&ctx, "ActSelTable").unwrap();
        let action = Action::new(&ctx, "actionB").unwrap().with("param", "1").unwrap();
        oneshot
            .add(OneshotAction::new(action.clone()).with_weight(2))
            .unwrap();
        oneshot.add(OneshotAction::new(action)).unwrap();
        let set = oneshot.to_proto().unwrap();
        let weights: Vec<i32> = set
            .get_action_profile_actions()
            .iter()
            .map(|a| a.get_weight())
            .collect();
        assert_eq!(weights, vec![2, 1]);
    }
}
