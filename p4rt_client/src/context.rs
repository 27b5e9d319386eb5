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

use proto::p4info::P4Info;

use protobuf::Message;

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::bytes_utils;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::schema::{P4InfoSchema, Schema};

/// Reads a P4Info file: binary protobuf if the extension is `.bin` or
/// `.pb`, text format otherwise.
pub fn load_p4info(path: &Path) -> Result<P4Info> {
    let binary = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("bin") | Some("pb")
    );
    let io_error = |source| Error::Io {
        path: path.into(),
        source,
    };
    let parse_error = |message| Error::Parse {
        path: path.into(),
        what: "P4Info",
        message,
    };
    if binary {
        let bytes = fs::read(path).map_err(io_error)?;
        P4Info::parse_from_bytes(&bytes).map_err(|e| parse_error(e.to_string()))
    } else {
        let text = fs::read_to_string(path).map_err(io_error)?;
        proto::text_format::parse_from_str::<P4Info>(&text)
            .map_err(|e| parse_error(e.to_string()))
    }
}

/// Everything an entity builder needs besides its own state: the schema
/// used to resolve names and the codec options in effect.
#[derive(Clone)]
pub struct Context {
    schema: Arc<dyn Schema>,
    options: Options,
}

impl Context {
    pub fn new(schema: Arc<dyn Schema>, options: Options) -> Self {
        Context { schema, options }
    }

    pub fn from_p4info(p4info: &P4Info) -> Self {
        Context::new(Arc::new(P4InfoSchema::from(p4info)), Options::default())
    }

    pub fn from_p4info_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Context::from_p4info(&load_p4info(path.as_ref())?))
    }

    pub fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn with_options(&self, options: Options) -> Self {
        Context {
            schema: self.schema.clone(),
            options,
        }
    }

    /// Applies the byte string policy of this context to a wire value.
    pub fn canonical(&self, bytes: Vec<u8>) -> Vec<u8> {
        bytes_utils::make_canonical(bytes, &self.options)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::P4Object;
    use crate::test_util::P4INFO;

    #[test]
    fn loads_text_and_binary_p4info() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("unittest.p4info.txt");
        fs::write(&text, P4INFO).unwrap();
        let from_text = load_p4info(&text).unwrap();
        assert_eq!(from_text.get_tables().len(), 8);

        let binary = dir.path().join("unittest.p4info.pb");
        fs::write(&binary, from_text.write_to_bytes().unwrap()).unwrap();
        assert_eq!(load_p4info(&binary).unwrap(), from_text);

        let ctx = Context::from_p4info_file(&text).unwrap();
        assert_eq!(ctx.schema().table("ExactOne").unwrap().id(), 33582705);
    }

    #[test]
    fn malformed_text_p4info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.txt");
        fs::write(&path, "tables { preamble { id: 1 ").unwrap();
        assert!(matches!(
            load_p4info(&path),
            Err(Error::Parse { what: "P4Info", .. })
        ));
        assert!(matches!(
            load_p4info(&dir.path().join("missing.txt")),
            Err(Error::Io { .. })
        ));
    }
}
