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

//! P4Runtime v1 protocol bindings.
//!
//! The message modules are generated by `build.rs` from the `.proto`
//! sources under `p4runtime/` and `googleapis/`.  The gRPC stubs in
//! [`p4runtime_grpc`] carry those messages over tonic, and [`text_format`]
//! reads them from protobuf text format.

pub mod code;
pub mod codec;
pub mod p4data;
pub mod p4info;
pub mod p4runtime;
pub mod p4types;
pub mod status;
pub mod text_format;

/// Client and server stubs for the `p4.v1.P4Runtime` service.
pub mod p4runtime_grpc {
    include!(concat!(env!("OUT_DIR"), "/p4.v1.P4Runtime.rs"));

    pub use p4_runtime_client::P4RuntimeClient;
    pub use p4_runtime_server::{P4Runtime, P4RuntimeServer};
}
