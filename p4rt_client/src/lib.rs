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

//! A P4Runtime client.
//!
//! [`Context`] wraps the P4Info schema of the pipeline running on the
//! device.  Entities are built against it by name, validated and encoded
//! on the way out ([`TableEntry`], [`ActionProfileMember`],
//! [`CounterEntry`], ...) and decoded against it on the way back.
//! [`RpcClient`] connects to a device, performs arbitration on the
//! StreamChannel and carries the unary RPCs.
//!
//! ```no_run
//! use p4rt_client::{Action, ClientConfig, Context, P4Entity, RpcClient, TableEntry};
//!
//! # fn main() -> p4rt_client::Result<()> {
//! let client = RpcClient::connect(ClientConfig::default())?;
//! let ctx = Context::from_p4info(&client.get_p4info()?);
//! let entry = TableEntry::new(&ctx, "ingress.ExactOne")?
//!     .with_match("header_test.field32", "10.0.0.1")?
//!     .with_action(Action::new(&ctx, "actionA")?.with("param", "00:11:22:33:44:55")?)?;
//! entry.insert(&client)?;
//! for entry in TableEntry::new(&ctx, "ExactOne")?.read(&client)? {
//!     println!("{}", entry?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod action_profile;
pub mod bytes_utils;
pub mod client;
pub mod context;
pub mod counter;
pub mod digest;
pub mod entity;
pub mod error;
pub mod match_key;
pub mod meter;
pub mod options;
pub mod packet;
pub mod replication;
pub mod schema;
pub mod stream;
pub mod table_entry;

pub use action::Action;
pub use action_profile::{
    ActionProfileGroup, ActionProfileMember, GroupMember, Oneshot, OneshotAction,
};
pub use client::{ClientConfig, ElectionId, ReadStream, RpcClient, SslOptions};
pub use context::{load_p4info, Context};
pub use counter::{CounterEntry, DirectCounterEntry};
pub use digest::DigestEntry;
pub use entity::{EntityReader, P4Entity};
pub use error::{Error, Result, WriteErrors, WriteFailure};
pub use match_key::MatchKey;
pub use meter::{DirectMeterEntry, MeterEntry};
pub use options::{GlobalOption, OptionValue, Options};
pub use packet::{PacketIn, PacketOut};
pub use replication::{CloneSessionEntry, MulticastGroupEntry, Replica};
pub use schema::{Lookup, MatchKind, ObjectKind, P4InfoSchema, Schema};
pub use stream::{SessionState, StreamEnvelope, StreamKind};
pub use table_entry::{ActionSpec, TableEntry};

#[cfg(test)]
pub(crate) mod test_util {
    use proto::p4info::P4Info;

    use crate::context::Context;
    use crate::schema::P4InfoSchema;

    pub const P4INFO: &str = include_str!("../tests/testdata/unittest.p4info.txt");

    fn p4info() -> P4Info {
        proto::text_format::parse_from_str(P4INFO).unwrap()
    }

    pub fn schema() -> P4InfoSchema {
        P4InfoSchema::from(&p4info())
    }

    pub fn context() -> Context {
        Context::from_p4info(&p4info())
    }
}
