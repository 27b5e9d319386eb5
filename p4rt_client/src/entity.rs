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

//! The operations shared by every entity builder.

use proto::p4runtime::{Entity, Update, Update_Type};

use crate::client::{ReadStream, RpcClient};
use crate::error::Result;

/// A builder for one kind of P4Runtime entity.
///
/// The builder state is the source of truth: the wire form is produced on
/// demand by [`P4Entity::entity`] or [`P4Entity::update`], which run the
/// validation first.
pub trait P4Entity: Sized {
    /// Cross-field checks that apply to every use of the entity.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Additional checks for entities about to be written.  Reads may use
    /// values (such as wildcards) that writes may not.
    fn validate_write(&self) -> Result<()> {
        self.validate()
    }

    /// Serializes the builder state without validating it.
    fn to_entity(&self) -> Result<Entity>;

    /// Decodes an entity of the same kind, e.g. a read result, using this
    /// builder for name resolution.
    fn from_entity(&self, entity: &Entity) -> Result<Self>;

    fn entity(&self) -> Result<Entity> {
        self.validate()?;
        self.to_entity()
    }

    fn update(&self, update_type: Update_Type) -> Result<Update> {
        self.validate_write()?;
        let mut update = Update::new();
        update.set_field_type(update_type);
        update.set_entity(self.to_entity()?);
        Ok(update)
    }

    fn insert(&self, client: &RpcClient) -> Result<()> {
        client.write_update(self.update(Update_Type::INSERT)?)
    }

    fn modify(&self, client: &RpcClient) -> Result<()> {
        client.write_update(self.update(Update_Type::MODIFY)?)
    }

    fn delete(&self, client: &RpcClient) -> Result<()> {
        client.write_update(self.update(Update_Type::DELETE)?)
    }

    /// Reads every entity matching the current builder state.  Fields left
    /// unset act as wildcards.
    fn read<'a>(&'a self, client: &'a RpcClient) -> Result<EntityReader<'a, Self>> {
        let stream = client.read_one(self.entity()?)?;
        Ok(EntityReader::new(self, stream))
    }
}

/// Iterates over the decoded entities of all pages of a Read response.
pub struct EntityReader<'a, E> {
    template: &'a E,
    stream: ReadStream<'a>,
    page: std::vec::IntoIter<Entity>,
}

impl<'a, E: P4Entity> EntityReader<'a, E> {
    fn new(template: &'a E, stream: ReadStream<'a>) -> Self {
        EntityReader {
            template,
            stream,
            page: Vec::new().into_iter(),
        }
    }
}

impl<E: P4Entity> Iterator for EntityReader<'_, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.page.next() {
                return Some(self.template.from_entity(&entity));
            }
            match self.stream.next()? {
                Ok(mut response) => self.page = response.take_entities().into_vec().into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
