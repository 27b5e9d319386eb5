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

//! Codec options.
//!
//! There is no process-wide option store: an [`Options`] value travels with
//! the [`Context`](crate::Context) that every entity builder is created
//! from, so two contexts with different settings can coexist.

use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlobalOption {
    /// Strip leading zero bytes from every binary string placed on the
    /// wire.
    CanonicalBytestrings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionType {
    Bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
}

impl GlobalOption {
    pub const ALL: [GlobalOption; 1] = [GlobalOption::CanonicalBytestrings];

    pub fn name(self) -> &'static str {
        match self {
            GlobalOption::CanonicalBytestrings => "canonical_bytestrings",
        }
    }

    pub fn option_type(self) -> OptionType {
        match self {
            GlobalOption::CanonicalBytestrings => OptionType::Bool,
        }
    }

    pub fn default_value(self) -> OptionValue {
        match self {
            GlobalOption::CanonicalBytestrings => OptionValue::Bool(true),
        }
    }
}

impl Display for GlobalOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for GlobalOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        GlobalOption::ALL
            .iter()
            .copied()
            .find(|o| o.name() == s)
            .ok_or_else(|| Error::Validation(format!("'{}' is not a valid option name", s)))
    }
}

impl OptionValue {
    pub fn option_type(self) -> OptionType {
        match self {
            OptionValue::Bool(_) => OptionType::Bool,
        }
    }

    fn parse(option_type: OptionType, s: &str) -> Result<Self> {
        match option_type {
            OptionType::Bool => match s.trim() {
                "true" | "True" | "1" => Ok(OptionValue::Bool(true)),
                "false" | "False" | "0" => Ok(OptionValue::Bool(false)),
                _ => Err(Error::Validation(format!("'{}' is not a valid boolean", s))),
            },
        }
    }
}

impl Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    canonical_bytestrings: bool,
}

impl Default for Options {
    fn default() -> Self {
        let mut options = Options {
            canonical_bytestrings: false,
        };
        options.reset();
        options
    }
}

impl Options {
    pub fn get(&self, option: GlobalOption) -> OptionValue {
        match option {
            GlobalOption::CanonicalBytestrings => OptionValue::Bool(self.canonical_bytestrings),
        }
    }

    /// Sets `option`, rejecting values whose type differs from the
    /// option's declared type.
    pub fn set(&mut self, option: GlobalOption, value: OptionValue) -> Result<()> {
        if value.option_type() != option.option_type() {
            return Err(Error::Validation(format!(
                "option '{}' expects a {:?} value, got '{}'",
                option,
                option.option_type(),
                value
            )));
        }
        match (option, value) {
            (GlobalOption::CanonicalBytestrings, OptionValue::Bool(b)) => {
                self.canonical_bytestrings = b
            }
        }
        Ok(())
    }

    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<()> {
        let option: GlobalOption = name.parse()?;
        let value = OptionValue::parse(option.option_type(), value)?;
        self.set(option, value)
    }

    /// Restores every option to its default.
    pub fn reset(&mut self) {
        for option in GlobalOption::ALL {
            match (option, option.default_value()) {
                (GlobalOption::CanonicalBytestrings, OptionValue::Bool(b)) => {
                    self.canonical_bytestrings = b
                }
            }
        }
    }

    pub fn values(&self) -> Vec<(GlobalOption, OptionValue)> {
        GlobalOption::ALL
            .iter()
            .map(|&o| (o, self.get(o)))
            .collect()
    }

    pub fn canonical_bytestrings(&self) -> bool {
        self.canonical_bytestrings
    }

    pub fn with_canonical_bytestrings(mut self, canonical: bool) -> Self {
        self.canonical_bytestrings = canonical;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_reset() {
        let mut options = Options::default();
        assert!(options.canonical_bytestrings());

        options
            .set(GlobalOption::CanonicalBytestrings, OptionValue::Bool(false))
            .unwrap();
        assert_eq!(
            options.get(GlobalOption::CanonicalBytestrings),
            OptionValue::Bool(false)
        );

        options.reset();
        assert_eq!(options, Options::default());
    }

    #[test]
    fn reset_restores_every_declared_default() {
        let mut options = Options::default().with_canonical_bytestrings(false);
        options.reset();
        for (option, value) in options.values() {
            assert_eq!(value, option.default_value(), "option {}", option);
            assert_eq!(value.option_type(), option.option_type());
        }
    }

    #[test]
    fn set_from_str_validates() {
        let mut options = Options::default();
        options
            .set_from_str("canonical_bytestrings", "false")
            .unwrap();
        assert!(!options.canonical_bytestrings());

        assert!(options.set_from_str("canonical_bytestrings", "maybe").is_err());
        assert!(options.set_from_str("no_such_option", "true").is_err());
        assert!(!options.canonical_bytestrings());
    }
}
