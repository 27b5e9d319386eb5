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

use proto::p4runtime::{self, DigestEntry_Config, Entity};

use crate::context::Context;
use crate::entity::P4Entity;
use crate::error::{Error, Result};
use crate::schema::{self, P4Object};

/// Configuration of how the device generates digest lists.
#[derive(Clone, Debug)]
pub struct DigestEntry {
    ctx: Context,
    digest: schema::Digest,
    config: Option<DigestEntry_Config>,
}

impl DigestEntry {
    pub fn new(ctx: &Context, digest_name: &str) -> Result<Self> {
        Ok(DigestEntry {
            ctx: ctx.clone(),
            digest: ctx.schema().digest(digest_name)?.clone(),
            config: None,
        })
    }

    pub fn digest_id(&self) -> u32 {
        self.digest.id()
    }

    pub fn config(&self) -> Option<&DigestEntry_Config> {
        self.config.as_ref()
    }

    pub fn config_mut(&mut self) -> &mut DigestEntry_Config {
        self.config.get_or_insert_with(DigestEntry_Config::new)
    }

    pub fn set_max_timeout_ns(&mut self, v: i64) {
        self.config_mut().set_max_timeout_ns(v);
    }

    pub fn set_max_list_size(&mut self, v: i32) {
        self.config_mut().set_max_list_size(v);
    }

    pub fn set_ack_timeout_ns(&mut self, v: i64) {
        self.config_mut().set_ack_timeout_ns(v);
    }
}

impl P4Entity for DigestEntry {
    fn to_entity(&self) -> Result<Entity> {
        let mut entry = p4runtime::DigestEntry::new();
        entry.set_digest_id(self.digest.id());
        if let Some(config) = &self.config {
            entry.set_config(config.clone());
        }
        let mut entity = Entity::new();
        entity.set_digest_entry(entry);
        Ok(entity)
    }

    fn from_entity(&self, entity: &Entity) -> Result<Self> {
        if !entity.has_digest_entry() {
            return Err(Error::ProtocolDecode("expected a digest entry entity".into()));
        }
        let msg = entity.get_digest_entry();
        let name = self.ctx.schema().resolve_id(msg.get_digest_id())?;
        let mut entry = DigestEntry::new(&self.ctx, name)?;
        if msg.has_config() {
            entry.config = Some(msg.get_config().clone());
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::context;

    #[test]
    fn digest_config() {
        let ctx = context();
        let mut entry = DigestEntry::new(&ctx, "learn_t").unwrap();
        assert!(!entry.entity().unwrap().get_digest_entry().has_config());

        entry.set_max_timeout_ns(1_000_000);
        entry.set_max_list_size(1);
        entry.set_ack_timeout_ns(1_000_000_000);
        let entity = entry.entity().unwrap();
        let msg = entity.get_digest_entry();
        assert_eq!(msg.get_digest_id(), entry.digest_id());
        assert_eq!(msg.get_config().get_max_list_size(), 1);

        let decoded = entry.from_entity(&entity).unwrap();
        assert_eq!(decoded.config(), entry.config());
    }
}
