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

use proto::p4runtime;

use protobuf::RepeatedField;

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use crate::bytes_utils::{make_canonical, parse_value, to_hex};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::schema::{self, Lookup, P4Object};

/// An action invocation: an action from the schema plus a value for each
/// of its parameters.
#[derive(Clone, Debug)]
pub struct Action {
    info: schema::Action,
    options: Options,
    params: BTreeMap<u32, Vec<u8>>,
}

impl Action {
    pub fn new(ctx: &Context, name: &str) -> Result<Self> {
        Ok(Action::from_info(ctx, ctx.schema().action(name)?))
    }

    pub fn from_info(ctx: &Context, info: &schema::Action) -> Self {
        Action {
            info: info.clone(),
            options: *ctx.options(),
            params: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.info.id()
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn info(&self) -> &schema::Action {
        &self.info
    }

    /// Parses `value` at the bitwidth of `param`.
    pub fn set(&mut self, param: &str, value: &str) -> Result<()> {
        let param = self.info.param(param)?;
        let bytes = make_canonical(parse_value(value.trim(), param.bitwidth)?, &self.options);
        self.params.insert(param.id(), bytes);
        Ok(())
    }

    /// Builder form of [`Action::set`].
    pub fn with(mut self, param: &str, value: &str) -> Result<Self> {
        self.set(param, value)?;
        Ok(self)
    }

    pub fn get<'a>(&self, param: impl Into<Lookup<'a>>) -> Result<Option<&[u8]>> {
        let id = self.info.param(param)?.id();
        Ok(self.params.get(&id).map(|v| v.as_slice()))
    }

    /// Serializes the action.  Every declared parameter must have a value.
    pub fn to_proto(&self) -> Result<p4runtime::Action> {
        let mut params = Vec::with_capacity(self.info.params.len());
        for param in &self.info.params {
            let value = self.params.get(&param.id()).ok_or_else(|| {
                Error::Validation(format!(
                    "Action '{}' is missing a value for parameter '{}'",
                    self.name(),
                    param.name()
                ))
            })?;
            let mut p = p4runtime::Action_Param::new();
            p.set_param_id(param.id());
            p.set_value(value.clone());
            params.push(p);
        }

        let mut action = p4runtime::Action::new();
        action.set_action_id(self.id());
        action.set_params(RepeatedField::from_vec(params));
        Ok(action)
    }

    pub fn from_proto(ctx: &Context, msg: &p4runtime::Action) -> Result<Self> {
        let mut action = Action::from_info(ctx, ctx.schema().action_by_id(msg.get_action_id())?);
        for p in msg.get_params() {
            let id = action.info.param(p.get_param_id())?.id();
            action
                .params
                .insert(id, make_canonical(p.get_value().to_vec(), &action.options));
        }
        Ok(action)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (i, param) in self.info.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match self.params.get(&param.id()) {
                Some(v) => write!(f, "{}={}", param.name(), to_hex(v))?,
                None => write!(f, "{}=<unset>", param.name())?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::context;

    #[test]
    fn serialize_all_params() {
        let ctx = context();
        let action = Action::new(&ctx, "actionA")
            .unwrap()
            .with("param", "00:11:22:33:44:55")
            .unwrap();
        let msg = action.to_proto().unwrap();
        assert_eq!(msg.get_action_id(), 16783703);
        assert_eq!(msg.get_params().len(), 1);
        assert_eq!(msg.get_params()[0].get_param_id(), 1);
        assert_eq!(
            msg.get_params()[0].get_value(),
            &[0x11, 0x22, 0x33, 0x44, 0x55]
        );
    }

    #[test]
    fn missing_param_is_rejected() {
        let ctx = context();
        let action = Action::new(&ctx, "actionA").unwrap();
        assert!(matches!(action.to_proto(), Err(Error::Validation(_))));
    }

    #[test]
    fn unknown_action_and_param() {
        let ctx = context();
        assert!(matches!(
            Action::new(&ctx, "actionZ"),
            Err(Error::SchemaLookup(_))
        ));
        let mut action = Action::new(&ctx, "actionB").unwrap();
        assert!(matches!(
            action.set("nope", "1"),
            Err(Error::SchemaLookup(_))
        ));
        assert!(matches!(action.set("param", "256"), Err(Error::Format(_))));
    }

    #[test]
    fn decode_from_wire() {
        let ctx = context();
        let msg = Action::new(&ctx, "actionB")
            .unwrap()
            .with("param", "7")
            .unwrap()
            .to_proto()
            .unwrap();
        let action = Action::from_proto(&ctx, &msg).unwrap();
        assert_eq!(action.name(), "actionB");
        assert_eq!(action.get("param").unwrap(), Some(&[7u8][..]));
        assert_eq!(action.to_string(), "actionB(param=0x07)");
    }
}
