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

//! Error types shared by every layer of the client.

use protobuf::{Message, ProtobufEnum};

use proto::code::Code;
use proto::p4runtime;
use proto::status;

use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::schema::MatchKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A literal could not be parsed or does not fit its bitwidth.
    #[error("{0}")]
    Format(String),

    /// A well-formed value violates a constraint of the entity it is
    /// assigned to.
    #[error("{0}")]
    Validation(String),

    /// The value matches every packet and must be omitted from the key.
    #[error("invalid {match_kind} match for field '{field}': don't care match must be omitted from the match key")]
    DontCareMatch { field: String, match_kind: MatchKind },

    /// The schema does not declare the resource the operation needs.
    #[error("{0}")]
    Capability(String),

    #[error("{0}")]
    SchemaLookup(String),

    #[error("P4Runtime RPC error ({code}): {message}")]
    Rpc { code: String, message: String },

    #[error("{0}")]
    BatchWrite(WriteErrors),

    #[error("malformed P4Runtime error details: {0}")]
    ProtocolDecode(String),

    #[error("failed to connect to P4Runtime server at {addr} ({source})")]
    Connect {
        addr: String,
        source: tonic::transport::Error,
    },

    #[error("failed to start client runtime ({0})")]
    Runtime(#[source] io::Error),

    #[error("failed to establish session with device {device_id}: no arbitration reply within {timeout:?}")]
    ArbitrationTimeout { device_id: u64, timeout: Duration },

    #[error("stream channel is closed")]
    StreamClosed,

    #[error("P4Runtime client has been torn down")]
    SessionClosed,

    #[error("unknown stream message type '{0}'")]
    UnknownStreamKind(String),

    #[error("{}: {}", .path.display(), .source)]
    Io { path: PathBuf, source: io::Error },

    #[error("{}: could not parse {what} ({message})", .path.display())]
    Parse {
        path: PathBuf,
        what: &'static str,
        message: String,
    },
}

impl Error {
    pub fn is_dont_care(&self) -> bool {
        matches!(self, Error::DontCareMatch { .. })
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Rpc {
            code: code_name(status.code() as i32),
            message: status.message().to_string(),
        }
    }
}

/// Returns the canonical name of a `google.rpc.Code` value.
pub fn code_name(code: i32) -> String {
    match Code::from_i32(code) {
        Some(c) => format!("{:?}", c),
        None => format!("code {}", code),
    }
}

/// Maps the status of a failed Write RPC.
///
/// Batch failures arrive with code UNKNOWN and a serialized
/// `google.rpc.Status` in the binary details; anything else is reported
/// as a plain RPC error.
pub(crate) fn write_error(status: tonic::Status) -> Error {
    if status.code() != tonic::Code::Unknown {
        return status.into();
    }
    match WriteErrors::from_status(&status) {
        Ok(errors) => Error::BatchWrite(errors),
        Err(e) => e,
    }
}

/// One failed update of a write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteFailure {
    /// Position of the update in the batch.
    pub index: usize,
    pub canonical_code: i32,
    pub message: String,
}

impl Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "At index {}: {}, '{}'",
            self.index,
            code_name(self.canonical_code),
            self.message
        )
    }
}

/// The non-OK entries of a failed write batch, in batch order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteErrors(pub Vec<WriteFailure>);

impl WriteErrors {
    pub fn from_status(status: &tonic::Status) -> Result<Self> {
        let details = status.details();
        if details.is_empty() {
            return Err(Error::ProtocolDecode("no binary details field".into()));
        }
        let rpc_status = status::Status::parse_from_bytes(details).map_err(|e| {
            Error::ProtocolDecode(format!("cannot parse binary details field ({})", e))
        })?;
        Self::from_rpc_status(&rpc_status)
    }

    pub fn from_rpc_status(rpc_status: &status::Status) -> Result<Self> {
        let details = rpc_status.get_details();
        if details.is_empty() {
            return Err(Error::ProtocolDecode(
                "binary details field has empty Any details repeated field".into(),
            ));
        }

        let mut failures = Vec::new();
        for (index, any) in details.iter().enumerate() {
            let error = match any.unpack::<p4runtime::Error>() {
                Ok(Some(error)) => error,
                _ => {
                    return Err(Error::ProtocolDecode(
                        "cannot convert Any message to p4.Error".into(),
                    ))
                }
            };
            if error.canonical_code == Code::OK.value() {
                continue;
            }
            failures.push(WriteFailure {
                index,
                canonical_code: error.canonical_code,
                message: error.message,
            });
        }
        Ok(WriteErrors(failures))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteFailure> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for WriteErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error(s) during Write:")?;
        for failure in &self.0 {
            writeln!(f, "\t* {}", failure)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use protobuf::well_known_types::Any;
    use protobuf::RepeatedField;

    fn p4_error(code: Code, message: &str) -> Any {
        let mut error = p4runtime::Error::new();
        error.set_canonical_code(code.value());
        error.set_message(message.into());
        Any::pack(&error).unwrap()
    }

    fn unknown_status(details: Vec<Any>) -> tonic::Status {
        let mut rpc_status = status::Status::new();
        rpc_status.set_code(Code::UNKNOWN.value());
        rpc_status.set_details(RepeatedField::from_vec(details));
        tonic::Status::with_details(
            tonic::Code::Unknown,
            "write failed",
            rpc_status.write_to_bytes().unwrap().into(),
        )
    }

    #[test]
    fn batch_errors_skip_ok_entries() {
        let status = unknown_status(vec![
            p4_error(Code::OK, ""),
            p4_error(Code::INVALID_ARGUMENT, "bad match"),
            p4_error(Code::OK, ""),
            p4_error(Code::ALREADY_EXISTS, "duplicate entry"),
        ]);
        let errors = WriteErrors::from_status(&status).unwrap();
        assert_eq!(
            errors.0,
            vec![
                WriteFailure {
                    index: 1,
                    canonical_code: Code::INVALID_ARGUMENT.value(),
                    message: "bad match".into(),
                },
                WriteFailure {
                    index: 3,
                    canonical_code: Code::ALREADY_EXISTS.value(),
                    message: "duplicate entry".into(),
                },
            ]
        );
        assert_eq!(
            errors.to_string(),
            "Error(s) during Write:\n\
             \t* At index 1: INVALID_ARGUMENT, 'bad match'\n\
             \t* At index 3: ALREADY_EXISTS, 'duplicate entry'\n"
        );
    }

    #[test]
    fn write_error_maps_unknown_to_batch() {
        let status = unknown_status(vec![p4_error(Code::NOT_FOUND, "no such entry")]);
        match write_error(status) {
            Error::BatchWrite(errors) => assert_eq!(errors.len(), 1),
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn missing_details_is_a_decode_error() {
        let status = tonic::Status::new(tonic::Code::Unknown, "write failed");
        assert!(matches!(write_error(status), Error::ProtocolDecode(_)));

        let empty = unknown_status(Vec::new());
        assert!(matches!(
            WriteErrors::from_status(&empty),
            Err(Error::ProtocolDecode(_))
        ));
    }

    #[test]
    fn foreign_any_is_a_decode_error() {
        let mut wrong = p4runtime::Uint128::new();
        wrong.set_high(1);
        let status = unknown_status(vec![Any::pack(&wrong).unwrap()]);
        assert!(matches!(
            WriteErrors::from_status(&status),
            Err(Error::ProtocolDecode(_))
        ));
    }

    #[test]
    fn other_codes_are_rpc_errors() {
        let status = tonic::Status::unavailable("connection refused");
        match write_error(status) {
            Error::Rpc { code, message } => {
                assert_eq!(code, "UNAVAILABLE");
                assert_eq!(message, "connection refused");
            }
            e => panic!("unexpected error {:?}", e),
        }
    }
}
