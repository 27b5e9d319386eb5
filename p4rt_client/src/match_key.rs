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

//! Encoding of table match keys.
//!
//! Every match kind has its own textual form:
//!
//! | kind     | form                 |
//! |----------|----------------------|
//! | exact    | `<value>`            |
//! | optional | `<value>`            |
//! | LPM      | `<prefix>[/<len>]`   |
//! | ternary  | `<value>[&&&<mask>]` |
//! | range    | `<low>..<high>`      |
//!
//! A constraint that matches every value ("don't care") has no wire form:
//! it is rejected with [`Error::DontCareMatch`] and the field must be left
//! out of the key instead.

use proto::p4runtime::{
    FieldMatch, FieldMatch_Exact, FieldMatch_LPM, FieldMatch_Optional, FieldMatch_Range,
    FieldMatch_Ternary,
};

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use tracing::warn;

use crate::bytes_utils::{all_ones, make_canonical, parse_value, to_hex};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::schema::{Lookup, MatchField, MatchKind, P4Object, Table};

fn dont_care(field: &MatchField) -> Error {
    Error::DontCareMatch {
        field: field.preamble.name.clone(),
        match_kind: field.match_kind.clone(),
    }
}

pub fn encode_exact(field: &MatchField, value: &str, options: &Options) -> Result<FieldMatch> {
    let mut exact = FieldMatch_Exact::new();
    exact.set_value(make_canonical(parse_value(value.trim(), field.bitwidth)?, options));

    let mut fm = FieldMatch::new();
    fm.set_field_id(field.id());
    fm.set_exact(exact);
    Ok(fm)
}

/// Same value encoding as [`encode_exact`].  An optional field that should
/// match anything is simply left out of the key.
pub fn encode_optional(field: &MatchField, value: &str, options: &Options) -> Result<FieldMatch> {
    let mut optional = FieldMatch_Optional::new();
    optional.set_value(make_canonical(parse_value(value.trim(), field.bitwidth)?, options));

    let mut fm = FieldMatch::new();
    fm.set_field_id(field.id());
    fm.set_optional(optional);
    Ok(fm)
}

pub fn encode_lpm(field: &MatchField, value: &str, options: &Options) -> Result<FieldMatch> {
    let (prefix, prefix_len) = match value.split_once('/') {
        Some((prefix, len)) => {
            let len = len.trim().parse::<u32>().map_err(|_| {
                Error::Format(format!("Invalid prefix length '{}' in '{}'", len.trim(), value))
            })?;
            (prefix.trim(), len)
        }
        None => (value.trim(), field.bitwidth),
    };
    if prefix_len > field.bitwidth {
        return Err(Error::Validation(format!(
            "Prefix length {} is larger than the bitwidth {} of field '{}'",
            prefix_len,
            field.bitwidth,
            field.name()
        )));
    }
    if prefix_len == 0 {
        return Err(dont_care(field));
    }

    let mut bytes = parse_value(prefix, field.bitwidth)?;
    // The value is left-padded to a whole number of bytes, so the prefix
    // starts after the padding bits.
    let keep = (bytes.len() * 8 - field.bitwidth as usize) + prefix_len as usize;
    let mut transformed = false;
    for (i, b) in bytes.iter_mut().enumerate() {
        let start = i * 8;
        let mask = if start + 8 <= keep {
            0xff
        } else if start >= keep {
            0x00
        } else {
            0xffu8 << (8 - (keep - start))
        };
        if *b & !mask != 0 {
            transformed = true;
            *b &= mask;
        }
    }
    if transformed {
        warn!("LPM value was transformed to conform to the P4Runtime spec (trailing bits must be unset)");
    }

    let mut lpm = FieldMatch_LPM::new();
    lpm.set_value(make_canonical(bytes, options));
    lpm.set_prefix_len(prefix_len as i32);

    let mut fm = FieldMatch::new();
    fm.set_field_id(field.id());
    fm.set_lpm(lpm);
    Ok(fm)
}

pub fn encode_ternary(field: &MatchField, value: &str, options: &Options) -> Result<FieldMatch> {
    let (value_str, mask) = match value.split_once("&&&") {
        Some((v, m)) => (v.trim(), parse_value(m.trim(), field.bitwidth)?),
        None => (value.trim(), all_ones(field.bitwidth)),
    };
    if mask.iter().all(|&b| b == 0) {
        return Err(dont_care(field));
    }

    let mut bytes = parse_value(value_str, field.bitwidth)?;
    let mut transformed = false;
    for (b, m) in bytes.iter_mut().zip(mask.iter()) {
        if *b & !m != 0 {
            transformed = true;
            *b &= m;
        }
    }
    if transformed {
        warn!("ternary value was transformed to conform to the P4Runtime spec (masked off bits must be unset)");
    }

    let mut ternary = FieldMatch_Ternary::new();
    ternary.set_value(make_canonical(bytes, options));
    ternary.set_mask(make_canonical(mask, options));

    let mut fm = FieldMatch::new();
    fm.set_field_id(field.id());
    fm.set_ternary(ternary);
    Ok(fm)
}

pub fn encode_range(field: &MatchField, value: &str, options: &Options) -> Result<FieldMatch> {
    let (low, high) = value.split_once("..").ok_or_else(|| {
        Error::Format(format!(
            "Invalid range match '{}': expected '<low>..<high>'",
            value
        ))
    })?;
    let low = parse_value(low.trim(), field.bitwidth)?;
    let high = parse_value(high.trim(), field.bitwidth)?;
    // Both sides have the same width, so byte order is numeric order.
    if low > high {
        return Err(Error::Validation(format!(
            "Invalid range match for field '{}': low is greater than high",
            field.name()
        )));
    }
    if low.iter().all(|&b| b == 0) && high == all_ones(field.bitwidth) {
        return Err(dont_care(field));
    }

    let mut range = FieldMatch_Range::new();
    range.set_low(make_canonical(low, options));
    range.set_high(make_canonical(high, options));

    let mut fm = FieldMatch::new();
    fm.set_field_id(field.id());
    fm.set_range(range);
    Ok(fm)
}

/// Encodes `value` according to the match kind of `field`.
pub fn encode_field(field: &MatchField, value: &str, options: &Options) -> Result<FieldMatch> {
    match field.match_kind {
        MatchKind::Exact => encode_exact(field, value, options),
        MatchKind::Optional => encode_optional(field, value, options),
        MatchKind::Lpm => encode_lpm(field, value, options),
        MatchKind::Ternary => encode_ternary(field, value, options),
        MatchKind::Range => encode_range(field, value, options),
        ref kind => Err(Error::Capability(format!(
            "Match field '{}' has unsupported match kind '{}'",
            field.name(),
            kind
        ))),
    }
}

/// Renders the constraint of a FieldMatch in the same syntax it is
/// parsed from.
pub(crate) fn format_field_match(fm: &FieldMatch) -> String {
    if fm.has_exact() {
        to_hex(fm.get_exact().get_value())
    } else if fm.has_optional() {
        to_hex(fm.get_optional().get_value())
    } else if fm.has_lpm() {
        let lpm = fm.get_lpm();
        format!("{}/{}", to_hex(lpm.get_value()), lpm.get_prefix_len())
    } else if fm.has_ternary() {
        let ternary = fm.get_ternary();
        format!(
            "{} &&& {}",
            to_hex(ternary.get_value()),
            to_hex(ternary.get_mask())
        )
    } else if fm.has_range() {
        let range = fm.get_range();
        format!("{}..{}", to_hex(range.get_low()), to_hex(range.get_high()))
    } else {
        "<other>".into()
    }
}

/// The match key of a table entry, built one field at a time.
///
/// Fields are kept ordered by id, so the wire form does not depend on the
/// order in which they were set.
#[derive(Clone, Debug)]
pub struct MatchKey {
    table: Arc<Table>,
    options: Options,
    values: BTreeMap<u32, FieldMatch>,
}

impl MatchKey {
    pub fn new(ctx: &Context, table: Arc<Table>) -> Self {
        MatchKey {
            table,
            options: *ctx.options(),
            values: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Parses `value` for the field named `name` (full name or unique
    /// suffix) and stores the result, replacing any earlier value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let field = self.table.field(name)?;
        let fm = encode_field(field, value, &self.options)?;
        self.values.insert(field.id(), fm);
        Ok(())
    }

    pub fn get<'a>(&self, key: impl Into<Lookup<'a>>) -> Result<Option<&FieldMatch>> {
        let field = self.table.field(key)?;
        Ok(self.values.get(&field.id()))
    }

    pub fn unset<'a>(&mut self, key: impl Into<Lookup<'a>>) -> Result<()> {
        let id = self.table.field(key)?.id();
        self.values.remove(&id);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stores an already encoded FieldMatch, e.g. one read back from the
    /// device.
    pub fn insert_raw(&mut self, fm: FieldMatch) -> Result<()> {
        let id = self.table.field(fm.get_field_id())?.id();
        self.values.insert(id, fm);
        Ok(())
    }

    pub fn to_proto(&self) -> Vec<FieldMatch> {
        self.values.values().cloned().collect()
    }
}

impl Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, fm) in &self.values {
            let name = self
                .table
                .field(*id)
                .map(|mf| mf.name().to_string())
                .unwrap_or_else(|_| id.to_string());
            writeln!(f, "{}: {}", name, format_field_match(fm))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Preamble, Schema};
    use crate::test_util::context;
    use tracing_test::traced_test;

    fn field(bitwidth: u32, match_kind: MatchKind) -> MatchField {
        MatchField {
            preamble: Preamble {
                id: 1,
                name: "hdr.ipv4.dst_addr".into(),
                ..Default::default()
            },
            bitwidth,
            match_kind,
            type_name: None,
        }
    }

    fn canonical() -> Options {
        Options::default()
    }

    fn padded() -> Options {
        Options::default().with_canonical_bytestrings(false)
    }

    #[test]
    #[traced_test]
    fn lpm_clears_trailing_bits() {
        let fm = encode_lpm(&field(32, MatchKind::Lpm), "10.0.15.0/20", &canonical()).unwrap();
        assert_eq!(fm.get_lpm().get_value(), &[0x0a, 0, 0, 0]);
        assert_eq!(fm.get_lpm().get_prefix_len(), 20);
        assert!(logs_contain("LPM value was transformed"));
    }

    #[test]
    #[traced_test]
    fn lpm_without_length_is_full_width() {
        let fm = encode_lpm(&field(32, MatchKind::Lpm), "10.0.0.1", &canonical()).unwrap();
        assert_eq!(fm.get_lpm().get_value(), &[0x0a, 0, 0, 1]);
        assert_eq!(fm.get_lpm().get_prefix_len(), 32);
        assert!(!logs_contain("transformed"));
    }

    #[test]
    fn lpm_odd_bitwidth_accounts_for_padding() {
        // 9-bit field, /3 keeps the three most significant value bits.
        let fm = encode_lpm(&field(9, MatchKind::Lpm), "0x1ff/3", &padded()).unwrap();
        assert_eq!(fm.get_lpm().get_value(), &[0x01, 0xc0]);
    }

    #[test]
    fn lpm_zero_length_is_dont_care() {
        let err = encode_lpm(&field(32, MatchKind::Lpm), "10.0.0.0/0", &canonical()).unwrap_err();
        assert!(err.is_dont_care());
        assert!(err.to_string().contains("don't care match"));
    }

    #[test]
    fn lpm_bad_length() {
        assert!(matches!(
            encode_lpm(&field(32, MatchKind::Lpm), "10.0.0.0/x", &canonical()),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            encode_lpm(&field(32, MatchKind::Lpm), "10.0.0.0/33", &canonical()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn ternary_value_and_mask() {
        let fm = encode_ternary(
            &field(32, MatchKind::Ternary),
            "10.0.0.1 &&& 0xff0000ff",
            &canonical(),
        )
        .unwrap();
        assert_eq!(fm.get_ternary().get_value(), &[0x0a, 0, 0, 1]);
        assert_eq!(fm.get_ternary().get_mask(), &[0xff, 0, 0, 0xff]);
    }

    #[test]
    fn ternary_mask_defaults_to_all_ones() {
        let fm = encode_ternary(&field(12, MatchKind::Ternary), "0x123", &padded()).unwrap();
        assert_eq!(fm.get_ternary().get_mask(), &[0x0f, 0xff]);
        assert_eq!(fm.get_ternary().get_value(), &[0x01, 0x23]);
    }

    #[test]
    #[traced_test]
    fn ternary_clears_bits_outside_mask() {
        let fm = encode_ternary(
            &field(32, MatchKind::Ternary),
            "10.0.0.1 &&& 0xff000000",
            &canonical(),
        )
        .unwrap();
        assert_eq!(fm.get_ternary().get_value(), &[0x0a, 0, 0, 0]);
        assert!(logs_contain("ternary value was transformed"));
    }

    #[test]
    fn ternary_zero_mask_is_dont_care() {
        let err = encode_ternary(&field(32, MatchKind::Ternary), "10.0.0.1 &&& 0", &canonical())
            .unwrap_err();
        assert!(err.is_dont_care());
    }

    #[test]
    fn range_canonical_and_padded() {
        let fm = encode_range(&field(32, MatchKind::Range), "0..1024", &canonical()).unwrap();
        assert_eq!(fm.get_range().get_low(), &[0x00]);
        assert_eq!(fm.get_range().get_high(), &[0x04, 0x00]);

        let fm = encode_range(&field(32, MatchKind::Range), "0..1024", &padded()).unwrap();
        assert_eq!(fm.get_range().get_low(), &[0, 0, 0, 0]);
        assert_eq!(fm.get_range().get_high(), &[0, 0, 0x04, 0]);
    }

    #[test]
    fn range_errors() {
        let f = field(16, MatchKind::Range);
        assert!(matches!(
            encode_range(&f, "10..5", &canonical()),
            Err(Error::Validation(_))
        ));
        assert!(encode_range(&f, "0..65535", &canonical())
            .unwrap_err()
            .is_dont_care());
        assert!(matches!(
            encode_range(&f, "10", &canonical()),
            Err(Error::Format(_))
        ));
        assert!(encode_range(&f, "0..65534", &canonical()).is_ok());
    }

    #[test]
    fn exact_and_optional() {
        let fm = encode_exact(&field(32, MatchKind::Exact), "0x0000abcd", &canonical()).unwrap();
        assert_eq!(fm.get_exact().get_value(), &[0xab, 0xcd]);
        assert_eq!(fm.get_field_id(), 1);

        let fm = encode_optional(&field(32, MatchKind::Optional), "7", &padded()).unwrap();
        assert_eq!(fm.get_optional().get_value(), &[0, 0, 0, 7]);

        assert!(matches!(
            encode_exact(&field(8, MatchKind::Exact), "256", &canonical()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn match_key_orders_by_field_id() {
        let ctx = context();
        let table = Arc::new(ctx.schema().table("MultiKey").unwrap().clone());
        let mut key = MatchKey::new(&ctx, table);
        key.set("hdr.a.addr", "10.0.0.1").unwrap();
        key.set("b.port", "2").unwrap();
        key.set("a.port", "1").unwrap();
        let ids: Vec<u32> = key.to_proto().iter().map(|fm| fm.get_field_id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        key.unset("b.port").unwrap();
        assert_eq!(key.len(), 2);
        assert!(key.get("b.port").unwrap().is_none());
        assert!(key.set("port", "1").is_err());

        key.reset();
        assert!(key.is_empty());
    }

    #[test]
    fn match_key_display() {
        let ctx = context();
        let table = Arc::new(ctx.schema().table("LpmOne").unwrap().clone());
        let mut key = MatchKey::new(&ctx, table);
        key.set("header_test.field32", "10.0.0.0/16").unwrap();
        assert_eq!(key.to_string(), "header_test.field32: 0x0a000000/16\n");
    }

    #[test]
    fn match_key_uses_field_kinds() {
        let ctx = context();
        let range = Arc::new(ctx.schema().table("RangeOne").unwrap().clone());
        let mut key = MatchKey::new(&ctx, range);
        key.set("field16", "10..20").unwrap();
        let fm = key.get("field16").unwrap().unwrap();
        assert_eq!(fm.get_range().get_low(), &[10]);
        assert_eq!(fm.get_range().get_high(), &[20]);
        assert!(key.set("field16", "0..0xffff").unwrap_err().is_dont_care());

        // Optional fields left unset are simply absent from the key.
        let optional = Arc::new(ctx.schema().table("OptionalOne").unwrap().clone());
        let mut key = MatchKey::new(&ctx, optional);
        key.set("field16", "0x0800").unwrap();
        let fms = key.to_proto();
        assert_eq!(fms.len(), 1);
        assert_eq!(fms[0].get_field_id(), 2);
        assert_eq!(fms[0].get_optional().get_value(), &[0x08, 0x00]);
    }
}
