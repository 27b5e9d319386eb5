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

//! Read-only view of a P4Info schema.
//!
//! The encoders never look at P4Info messages directly: they go through
//! the [`Schema`] trait, which resolves object names (full names or unique
//! dotted suffixes) and ids to the descriptors defined here.
//! [`P4InfoSchema`] is the implementation backed by a `p4info::P4Info`.

use itertools::Itertools;

use proto::p4info;
use proto::p4types;

use std::collections::HashMap;
use std::fmt::{self, Display};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct SourceLocation {
    file: String,
    line: i32,
    column: i32,
}

impl From<&p4types::SourceLocation> for SourceLocation {
    fn from(s: &p4types::SourceLocation) -> Self {
        SourceLocation {
            file: s.file.clone(),
            line: s.line,
            column: s.column,
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if self.line != 0 {
            write!(f, ":{}", self.line)?;
            if self.column != 0 {
                write!(f, ":{}", self.column)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum Expression {
    String(String),
    Integer(i64),
    Bool(bool),
    Unset,
}

impl From<&p4types::Expression> for Expression {
    fn from(e: &p4types::Expression) -> Self {
        use p4types::Expression_oneof_value::*;
        match e.value {
            Some(string_value(ref s)) => Expression::String(s.clone()),
            Some(int64_value(i)) => Expression::Integer(i),
            Some(bool_value(b)) => Expression::Bool(b),
            None => Expression::Unset,
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::String(s) => write!(f, "\"{}\"", s.escape_debug()),
            Expression::Integer(i) => write!(f, "{}", i),
            Expression::Bool(b) => write!(f, "{}", b),
            Expression::Unset => Ok(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct KeyValuePair(String, Expression);

impl From<&p4types::KeyValuePair> for KeyValuePair {
    fn from(kvp: &p4types::KeyValuePair) -> Self {
        KeyValuePair(kvp.get_key().into(), kvp.get_value().into())
    }
}

impl Display for KeyValuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.0.escape_debug(), self.1)
    }
}

#[derive(Clone, Debug)]
pub enum AnnotationValue {
    Empty,
    Unstructured(String),
    Expressions(Vec<Expression>),
    KeyValuePairs(Vec<KeyValuePair>),
}

impl From<&p4types::StructuredAnnotation> for AnnotationValue {
    fn from(sa: &p4types::StructuredAnnotation) -> AnnotationValue {
        if sa.has_expression_list() {
            AnnotationValue::Expressions(
                sa.get_expression_list()
                    .get_expressions()
                    .iter()
                    .map(|e| e.into())
                    .collect(),
            )
        } else {
            AnnotationValue::KeyValuePairs(
                sa.get_kv_pair_list()
                    .get_kv_pairs()
                    .iter()
                    .map(|kvp| kvp.into())
                    .collect(),
            )
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Annotations(HashMap<String, (Option<SourceLocation>, AnnotationValue)>);

impl Annotations {
    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.0.get(name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn parse_annotations<'a, T, U, V>(
    annotations: T,
    annotation_locs: U,
    structured_annotations: V,
) -> Annotations
where
    T: IntoIterator<Item = &'a String>,
    U: IntoIterator<Item = &'a p4types::SourceLocation>,
    V: IntoIterator<Item = &'a p4types::StructuredAnnotation>,
{
    use AnnotationValue::*;

    // Annotation locations are optional.  Pad them so that every
    // annotation has one to pair with.
    let extended_annotation_locs = annotation_locs
        .into_iter()
        .map(|a| Some(a.into()))
        .chain(std::iter::repeat(None));
    let unstructured_annotations =
        annotations
            .into_iter()
            .zip(extended_annotation_locs)
            .map(|(s, source_location)| {
                let s = s.trim_start_matches('@');
                match s.split_once('(') {
                    Some((name, rest)) if rest.ends_with(')') => {
                        let value = rest[..rest.len() - 1].to_string();
                        (name.to_string(), (source_location, Unstructured(value)))
                    }
                    _ => (s.to_string(), (source_location, Empty)),
                }
            });
    let structured_annotations = structured_annotations.into_iter().map(|x| {
        (
            x.name.clone(),
            (
                if x.has_source_location() {
                    Some(x.get_source_location().into())
                } else {
                    None
                },
                x.into(),
            ),
        )
    });
    Annotations(
        unstructured_annotations
            .chain(structured_annotations)
            .collect(),
    )
}

impl Display for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Sort by name for predictable output.
        let sorted_annotations = self.0.iter().sorted_by(|a, b| a.0.cmp(b.0));
        for (i, (k, (_, v))) in sorted_annotations.enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "@{}", k)?;

            use AnnotationValue::*;
            match v {
                Empty => (),
                Unstructured(s) => write!(f, "({})", s.escape_debug())?,
                Expressions(expressions) => write!(f, "[{}]", expressions.iter().join(", "))?,
                KeyValuePairs(kvp) => write!(f, "[{}]", kvp.iter().join(", "))?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Documentation {
    pub brief: String,
    pub description: String,
}

impl From<&p4info::Documentation> for Documentation {
    fn from(t: &p4info::Documentation) -> Self {
        Self {
            brief: t.brief.clone(),
            description: t.description.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Preamble {
    pub id: u32,
    pub name: String,
    pub alias: String,
    pub annotations: Annotations,
    pub doc: Documentation,
}

impl From<&p4info::Preamble> for Preamble {
    fn from(p: &p4info::Preamble) -> Self {
        Preamble {
            id: p.id,
            name: p.name.clone(),
            alias: p.alias.clone(),
            annotations: parse_annotations(
                p.get_annotations(),
                p.get_annotation_locations(),
                p.get_structured_annotations(),
            ),
            doc: p.get_doc().into(),
        }
    }
}

/// Common access to the preamble of every named P4Info object.
pub trait P4Object {
    fn preamble(&self) -> &Preamble;

    fn id(&self) -> u32 {
        self.preamble().id
    }

    fn name(&self) -> &str {
        &self.preamble().name
    }
}

/// The kinds of top-level objects that can be looked up by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    Action,
    ActionProfile,
    Counter,
    DirectCounter,
    Meter,
    DirectMeter,
    ControllerPacketMetadata,
    Digest,
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Table => "table",
            ObjectKind::Action => "action",
            ObjectKind::ActionProfile => "action profile",
            ObjectKind::Counter => "counter",
            ObjectKind::DirectCounter => "direct counter",
            ObjectKind::Meter => "meter",
            ObjectKind::DirectMeter => "direct meter",
            ObjectKind::ControllerPacketMetadata => "controller packet metadata",
            ObjectKind::Digest => "digest",
        };
        write!(f, "{}", s)
    }
}

/// Selects a match field or parameter by name (or unique suffix) or by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup<'a> {
    Name(&'a str),
    Id(u32),
}

impl<'a> From<&'a str> for Lookup<'a> {
    fn from(name: &'a str) -> Self {
        Lookup::Name(name)
    }
}

impl From<u32> for Lookup<'_> {
    fn from(id: u32) -> Self {
        Lookup::Id(id)
    }
}

impl Display for Lookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Name(name) => write!(f, "{}", name),
            Lookup::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Name resolution over a list of dotted names: exact names first, then
/// any suffix of whole components that belongs to exactly one name.
#[derive(Clone, Debug, Default)]
pub(crate) struct SuffixIndex {
    names: HashMap<String, usize>,
    suffixes: HashMap<String, usize>,
}

impl SuffixIndex {
    pub(crate) fn new<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = SuffixIndex::default();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for (i, name) in names.into_iter().enumerate() {
            index.names.insert(name.to_string(), i);
            let components: Vec<&str> = name.split('.').collect();
            for start in (0..components.len()).rev() {
                let suffix = components[start..].join(".");
                *counts.entry(suffix.clone()).or_default() += 1;
                index.suffixes.insert(suffix, i);
            }
        }
        index.suffixes.retain(|suffix, _| counts[suffix] == 1);
        index
    }

    pub(crate) fn get(&self, name: &str) -> Option<usize> {
        self.names
            .get(name)
            .or_else(|| self.suffixes.get(name))
            .copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchKind {
    Unspecified,
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
    Other(String),
}

impl Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MatchKind::*;
        let s = match self {
            Unspecified => "unspecified",
            Exact => "exact",
            Lpm => "LPM",
            Ternary => "ternary",
            Range => "range",
            Optional => "optional",
            Other(s) => s,
        };
        write!(f, "{}", s)
    }
}

fn parse_type_name(pnt: &p4types::P4NamedType) -> Option<String> {
    if pnt.name.is_empty() {
        None
    } else {
        Some(pnt.name.clone())
    }
}

#[derive(Clone, Debug)]
pub struct MatchField {
    // The protobuf MatchField has everything a Preamble has except
    // 'alias', so a Preamble is used for uniformity.
    pub preamble: Preamble,
    pub bitwidth: u32,
    pub match_kind: MatchKind,
    pub type_name: Option<String>,
}

impl From<&p4info::MatchField> for MatchField {
    fn from(mf: &p4info::MatchField) -> Self {
        use p4info::MatchField_MatchType::*;
        MatchField {
            preamble: Preamble {
                id: mf.id,
                name: mf.name.clone(),
                alias: mf.name.clone(),
                annotations: parse_annotations(
                    mf.get_annotations(),
                    mf.get_annotation_locations(),
                    mf.get_structured_annotations(),
                ),
                doc: mf.get_doc().into(),
            },
            bitwidth: mf.bitwidth.max(0) as u32,
            match_kind: if mf.has_other_match_type() {
                MatchKind::Other(mf.get_other_match_type().into())
            } else {
                match mf.get_match_type() {
                    EXACT => MatchKind::Exact,
                    LPM => MatchKind::Lpm,
                    TERNARY => MatchKind::Ternary,
                    RANGE => MatchKind::Range,
                    OPTIONAL => MatchKind::Optional,
                    UNSPECIFIED => MatchKind::Unspecified,
                }
            },
            type_name: parse_type_name(mf.get_type_name()),
        }
    }
}

impl P4Object for MatchField {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

impl Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field {} (id {}): bit<{}>",
            self.preamble.name, self.preamble.id, self.bitwidth
        )?;
        if let Some(ref type_name) = self.type_name {
            write!(f, " ({})", type_name.escape_debug())?;
        }
        write!(f, " {}-match", self.match_kind)?;
        if !self.preamble.annotations.is_empty() {
            write!(f, " {}", self.preamble.annotations)?;
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Param {
    // See the comment on MatchField.
    pub preamble: Preamble,
    pub bitwidth: u32,
    pub type_name: Option<String>,
}

impl From<&p4info::Action_Param> for Param {
    fn from(ap: &p4info::Action_Param) -> Self {
        Param {
            preamble: Preamble {
                id: ap.id,
                name: ap.name.clone(),
                alias: ap.name.clone(),
                annotations: parse_annotations(
                    ap.get_annotations(),
                    ap.get_annotation_locations(),
                    ap.get_structured_annotations(),
                ),
                doc: ap.get_doc().into(),
            },
            bitwidth: ap.bitwidth.max(0) as u32,
            type_name: parse_type_name(ap.get_type_name()),
        }
    }
}

impl From<&p4info::ControllerPacketMetadata_Metadata> for Param {
    fn from(m: &p4info::ControllerPacketMetadata_Metadata) -> Self {
        Param {
            preamble: Preamble {
                id: m.id,
                name: m.name.clone(),
                alias: m.name.clone(),
                annotations: parse_annotations(
                    m.get_annotations(),
                    m.get_annotation_locations(),
                    m.get_structured_annotations(),
                ),
                doc: Documentation::default(),
            },
            bitwidth: m.bitwidth.max(0) as u32,
            type_name: parse_type_name(m.get_type_name()),
        }
    }
}

impl P4Object for Param {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

impl Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: bit<{}>", self.preamble.name, self.bitwidth)
    }
}

/// Looks up a member of `items` by exact name, unique suffix or id.
fn lookup_member<'a, T: P4Object>(
    items: &'a [T],
    index: &SuffixIndex,
    key: Lookup<'_>,
) -> Option<&'a T> {
    match key {
        Lookup::Name(name) => index.get(name).map(|i| &items[i]),
        Lookup::Id(id) => items.iter().find(|x| x.id() == id),
    }
}

#[derive(Clone, Debug, Default)]
pub struct Action {
    pub preamble: Preamble,
    pub params: Vec<Param>,
    param_index: SuffixIndex,
}

impl From<&p4info::Action> for Action {
    fn from(a: &p4info::Action) -> Self {
        let params: Vec<Param> = a.get_params().iter().map(|x| x.into()).collect();
        Action {
            preamble: a.get_preamble().into(),
            param_index: SuffixIndex::new(params.iter().map(|p| p.name())),
            params,
        }
    }
}

impl P4Object for Action {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

impl Action {
    pub fn param<'a>(&self, key: impl Into<Lookup<'a>>) -> Result<&Param> {
        let key = key.into();
        lookup_member(&self.params, &self.param_index, key).ok_or_else(|| {
            Error::SchemaLookup(format!(
                "'{}' is not a valid parameter for action '{}'",
                key, self.preamble.name
            ))
        })
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "action {}({})",
            self.preamble.name,
            self.params.iter().join(", ")
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActionRef {
    pub action: Action,
    pub may_be_default: bool, // Allowed as the default action?
    pub may_be_entry: bool,   // Allowed as an entry's action?
    pub annotations: Annotations,
}

impl ActionRef {
    fn new_from_proto(ar: &p4info::ActionRef, actions: &HashMap<u32, Action>) -> Option<Self> {
        Some(ActionRef {
            action: actions.get(&ar.id)?.clone(),
            may_be_default: ar.scope != p4info::ActionRef_Scope::TABLE_ONLY,
            may_be_entry: ar.scope != p4info::ActionRef_Scope::DEFAULT_ONLY,
            annotations: parse_annotations(
                ar.get_annotations(),
                ar.get_annotation_locations(),
                ar.get_structured_annotations(),
            ),
        })
    }
}

impl Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.may_be_entry {
            write!(f, "default-only ")?;
        } else if !self.may_be_default {
            write!(f, "not-default ")?;
        }
        write!(f, "{}", self.action)?;
        if !self.annotations.is_empty() {
            write!(f, " {}", self.annotations)?;
        };
        Ok(())
    }
}

/// The action profile a table draws its actions from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Implementation {
    pub action_profile_id: u32,
    pub action_profile_name: String,
    pub with_selector: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterUnit {
    Unspecified,
    Bytes,
    Packets,
    Both,
}

impl CounterUnit {
    pub fn counts_bytes(self) -> bool {
        matches!(self, CounterUnit::Bytes | CounterUnit::Both)
    }

    pub fn counts_packets(self) -> bool {
        matches!(self, CounterUnit::Packets | CounterUnit::Both)
    }
}

impl From<&p4info::CounterSpec> for CounterUnit {
    fn from(spec: &p4info::CounterSpec) -> Self {
        use p4info::CounterSpec_Unit::*;
        match spec.get_unit() {
            UNSPECIFIED => CounterUnit::Unspecified,
            BYTES => CounterUnit::Bytes,
            PACKETS => CounterUnit::Packets,
            BOTH => CounterUnit::Both,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeterUnit {
    Unspecified,
    Bytes,
    Packets,
}

impl From<&p4info::MeterSpec> for MeterUnit {
    fn from(spec: &p4info::MeterSpec) -> Self {
        use p4info::MeterSpec_Unit::*;
        match spec.get_unit() {
            UNSPECIFIED => MeterUnit::Unspecified,
            BYTES => MeterUnit::Bytes,
            PACKETS => MeterUnit::Packets,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DirectCounter {
    pub preamble: Preamble,
    pub unit: CounterUnit,
    pub direct_table_id: u32,
}

impl From<&p4info::DirectCounter> for DirectCounter {
    fn from(c: &p4info::DirectCounter) -> Self {
        DirectCounter {
            preamble: c.get_preamble().into(),
            unit: c.get_spec().into(),
            direct_table_id: c.direct_table_id,
        }
    }
}

impl P4Object for DirectCounter {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

#[derive(Clone, Debug)]
pub struct DirectMeter {
    pub preamble: Preamble,
    pub unit: MeterUnit,
    pub direct_table_id: u32,
}

impl From<&p4info::DirectMeter> for DirectMeter {
    fn from(m: &p4info::DirectMeter) -> Self {
        DirectMeter {
            preamble: m.get_preamble().into(),
            unit: m.get_spec().into(),
            direct_table_id: m.direct_table_id,
        }
    }
}

impl P4Object for DirectMeter {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

#[derive(Clone, Debug, Default)]
pub struct Table {
    pub preamble: Preamble,
    pub match_fields: Vec<MatchField>,
    pub actions: Vec<ActionRef>,
    pub const_default_action: Option<Action>,
    pub implementation: Option<Implementation>,
    pub direct_counter: Option<DirectCounter>,
    pub direct_meter: Option<DirectMeter>,
    pub max_entries: Option<u64>,
    pub idle_notify: bool,
    pub is_const_table: bool,
    field_index: SuffixIndex,
}

impl P4Object for Table {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

impl Table {
    fn new_from_proto(
        t: &p4info::Table,
        actions: &HashMap<u32, Action>,
        profiles: &[ActionProfile],
        direct_counters: &[DirectCounter],
        direct_meters: &[DirectMeter],
    ) -> Self {
        let id = t.get_preamble().id;
        let match_fields: Vec<MatchField> =
            t.get_match_fields().iter().map(|x| x.into()).collect();
        Table {
            preamble: t.get_preamble().into(),
            field_index: SuffixIndex::new(match_fields.iter().map(|f| f.name())),
            match_fields,
            actions: t
                .get_action_refs()
                .iter()
                .filter_map(|x| ActionRef::new_from_proto(x, actions))
                .collect(),
            const_default_action: actions.get(&t.const_default_action_id).cloned(),
            implementation: profiles
                .iter()
                .find(|p| t.implementation_id != 0 && p.id() == t.implementation_id)
                .map(|p| Implementation {
                    action_profile_id: p.id(),
                    action_profile_name: p.name().to_string(),
                    with_selector: p.with_selector,
                }),
            direct_counter: direct_counters
                .iter()
                .find(|c| c.direct_table_id == id)
                .cloned(),
            direct_meter: direct_meters
                .iter()
                .find(|m| m.direct_table_id == id)
                .cloned(),
            max_entries: if t.size > 0 {
                Some(t.size as u64)
            } else {
                None
            },
            idle_notify: t.idle_timeout_behavior
                == p4info::Table_IdleTimeoutBehavior::NOTIFY_CONTROL,
            is_const_table: t.is_const_table,
        }
    }

    /// Resolves a match field by full name, unique dotted suffix or id.
    pub fn field<'a>(&self, key: impl Into<Lookup<'a>>) -> Result<&MatchField> {
        let key = key.into();
        lookup_member(&self.match_fields, &self.field_index, key).ok_or_else(|| {
            Error::SchemaLookup(format!(
                "'{}' is not a valid match field name, nor a valid unique suffix, for table '{}'",
                key, self.preamble.name
            ))
        })
    }

    pub fn action_ref(&self, action_id: u32) -> Option<&ActionRef> {
        self.actions.iter().find(|a| a.action.preamble.id == action_id)
    }

    pub fn has_implementation(&self) -> bool {
        self.implementation.is_some()
    }

    pub fn has_selector(&self) -> bool {
        self.implementation
            .as_ref()
            .map_or(false, |i| i.with_selector)
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {}:", self.preamble.name)?;
        for mf in &self.match_fields {
            write!(f, "\t{}", mf)?;
        }
        for ar in &self.actions {
            write!(f, "\t{}", ar)?;
        }
        if let Some(implementation) = &self.implementation {
            write!(f, "\timplementation {}", implementation.action_profile_name)?;
        }
        if let Some(c) = &self.direct_counter {
            write!(f, "\tdirect counter {}", c.preamble.name)?;
        }
        if let Some(m) = &self.direct_meter {
            write!(f, "\tdirect meter {}", m.preamble.name)?;
        }
        if let Some(max_entries) = self.max_entries {
            write!(f, "\tsize: {}", max_entries)?;
        }
        if let Some(a) = &self.const_default_action {
            write!(f, "\tconst default action {}", a)?;
        }
        if self.is_const_table {
            write!(f, "\tconst table")?;
        }
        if self.idle_notify {
            write!(f, "\tidle notify")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ActionProfile {
    pub preamble: Preamble,
    pub table_ids: Vec<u32>,
    pub with_selector: bool,
    pub size: i64,
    pub max_group_size: i32,
}

impl From<&p4info::ActionProfile> for ActionProfile {
    fn from(p: &p4info::ActionProfile) -> Self {
        ActionProfile {
            preamble: p.get_preamble().into(),
            table_ids: p.get_table_ids().to_vec(),
            with_selector: p.with_selector,
            size: p.size,
            max_group_size: p.max_group_size,
        }
    }
}

impl P4Object for ActionProfile {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

#[derive(Clone, Debug)]
pub struct Counter {
    pub preamble: Preamble,
    pub unit: CounterUnit,
    pub size: i64,
}

impl From<&p4info::Counter> for Counter {
    fn from(c: &p4info::Counter) -> Self {
        Counter {
            preamble: c.get_preamble().into(),
            unit: c.get_spec().into(),
            size: c.size,
        }
    }
}

impl P4Object for Counter {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

#[derive(Clone, Debug)]
pub struct Meter {
    pub preamble: Preamble,
    pub unit: MeterUnit,
    pub size: i64,
}

impl From<&p4info::Meter> for Meter {
    fn from(m: &p4info::Meter) -> Self {
        Meter {
            preamble: m.get_preamble().into(),
            unit: m.get_spec().into(),
            size: m.size,
        }
    }
}

impl P4Object for Meter {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

#[derive(Clone, Debug)]
pub struct ControllerPacketMetadata {
    pub preamble: Preamble,
    pub metadata: Vec<Param>,
    metadata_index: SuffixIndex,
}

impl From<&p4info::ControllerPacketMetadata> for ControllerPacketMetadata {
    fn from(c: &p4info::ControllerPacketMetadata) -> Self {
        let metadata: Vec<Param> = c.get_metadata().iter().map(|m| m.into()).collect();
        ControllerPacketMetadata {
            preamble: c.get_preamble().into(),
            metadata_index: SuffixIndex::new(metadata.iter().map(|m| m.name())),
            metadata,
        }
    }
}

impl P4Object for ControllerPacketMetadata {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

impl ControllerPacketMetadata {
    pub fn field<'a>(&self, key: impl Into<Lookup<'a>>) -> Result<&Param> {
        let key = key.into();
        lookup_member(&self.metadata, &self.metadata_index, key).ok_or_else(|| {
            Error::SchemaLookup(format!(
                "'{}' is not a valid metadata field for '{}'",
                key, self.preamble.name
            ))
        })
    }
}

#[derive(Clone, Debug)]
pub struct Digest {
    pub preamble: Preamble,
}

impl From<&p4info::Digest> for Digest {
    fn from(d: &p4info::Digest) -> Self {
        Digest {
            preamble: d.get_preamble().into(),
        }
    }
}

impl P4Object for Digest {
    fn preamble(&self) -> &Preamble {
        &self.preamble
    }
}

/// The lookup interface the encoders are written against.
pub trait Schema: Send + Sync {
    fn table(&self, name: &str) -> Result<&Table>;
    fn table_by_id(&self, id: u32) -> Result<&Table>;
    fn action(&self, name: &str) -> Result<&Action>;
    fn action_by_id(&self, id: u32) -> Result<&Action>;
    fn action_profile(&self, name: &str) -> Result<&ActionProfile>;
    fn action_profile_by_id(&self, id: u32) -> Result<&ActionProfile>;
    fn counter(&self, name: &str) -> Result<&Counter>;
    fn direct_counter(&self, name: &str) -> Result<&DirectCounter>;
    fn meter(&self, name: &str) -> Result<&Meter>;
    fn direct_meter(&self, name: &str) -> Result<&DirectMeter>;
    fn controller_packet_metadata(&self, name: &str) -> Result<&ControllerPacketMetadata>;
    fn digest(&self, name: &str) -> Result<&Digest>;

    /// Returns the full name of the object with the given id.
    fn resolve_id(&self, id: u32) -> Result<&str>;

    fn resolve_name(&self, kind: ObjectKind, name: &str) -> Result<u32> {
        Ok(match kind {
            ObjectKind::Table => self.table(name)?.id(),
            ObjectKind::Action => self.action(name)?.id(),
            ObjectKind::ActionProfile => self.action_profile(name)?.id(),
            ObjectKind::Counter => self.counter(name)?.id(),
            ObjectKind::DirectCounter => self.direct_counter(name)?.id(),
            ObjectKind::Meter => self.meter(name)?.id(),
            ObjectKind::DirectMeter => self.direct_meter(name)?.id(),
            ObjectKind::ControllerPacketMetadata => self.controller_packet_metadata(name)?.id(),
            ObjectKind::Digest => self.digest(name)?.id(),
        })
    }

    fn lookup_field(&self, table: &str, field: Lookup<'_>) -> Result<&MatchField> {
        self.table(table)?.field(field)
    }

    fn lookup_action_param(&self, action: &str, param: Lookup<'_>) -> Result<&Param> {
        self.action(action)?.param(param)
    }
}

/// Objects of one kind, indexed by name, unique suffix and id.
#[derive(Clone, Debug)]
struct Objects<T> {
    kind: ObjectKind,
    items: Vec<T>,
    index: SuffixIndex,
    by_id: HashMap<u32, usize>,
}

impl<T: P4Object> Objects<T> {
    fn new(kind: ObjectKind, items: Vec<T>) -> Self {
        Objects {
            kind,
            index: SuffixIndex::new(items.iter().map(|x| x.name())),
            by_id: items.iter().enumerate().map(|(i, x)| (x.id(), i)).collect(),
            items,
        }
    }

    fn get(&self, name: &str) -> Result<&T> {
        self.index
            .get(name)
            .map(|i| &self.items[i])
            .ok_or_else(|| Error::SchemaLookup(format!("{} '{}' does not exist", self.kind, name)))
    }

    fn get_by_id(&self, id: u32) -> Result<&T> {
        self.by_id
            .get(&id)
            .map(|&i| &self.items[i])
            .ok_or_else(|| {
                Error::SchemaLookup(format!("{} with id {} does not exist", self.kind, id))
            })
    }
}

/// A [`Schema`] built from a P4Info message.
#[derive(Clone, Debug)]
pub struct P4InfoSchema {
    tables: Objects<Table>,
    actions: Objects<Action>,
    action_profiles: Objects<ActionProfile>,
    counters: Objects<Counter>,
    direct_counters: Objects<DirectCounter>,
    meters: Objects<Meter>,
    direct_meters: Objects<DirectMeter>,
    controller_packet_metadata: Objects<ControllerPacketMetadata>,
    digests: Objects<Digest>,
    names: HashMap<u32, String>,
}

impl From<&p4info::P4Info> for P4InfoSchema {
    fn from(p4i: &p4info::P4Info) -> Self {
        let actions: Vec<Action> = p4i.get_actions().iter().map(|x| x.into()).collect();
        let actions_by_id: HashMap<u32, Action> =
            actions.iter().map(|a| (a.id(), a.clone())).collect();
        let action_profiles: Vec<ActionProfile> =
            p4i.get_action_profiles().iter().map(|x| x.into()).collect();
        let direct_counters: Vec<DirectCounter> =
            p4i.get_direct_counters().iter().map(|x| x.into()).collect();
        let direct_meters: Vec<DirectMeter> =
            p4i.get_direct_meters().iter().map(|x| x.into()).collect();
        let tables: Vec<Table> = p4i
            .get_tables()
            .iter()
            .map(|x| {
                Table::new_from_proto(
                    x,
                    &actions_by_id,
                    &action_profiles,
                    &direct_counters,
                    &direct_meters,
                )
            })
            .collect();
        let counters: Vec<Counter> = p4i.get_counters().iter().map(|x| x.into()).collect();
        let meters: Vec<Meter> = p4i.get_meters().iter().map(|x| x.into()).collect();
        let controller_packet_metadata: Vec<ControllerPacketMetadata> = p4i
            .get_controller_packet_metadata()
            .iter()
            .map(|x| x.into())
            .collect();
        let digests: Vec<Digest> = p4i.get_digests().iter().map(|x| x.into()).collect();

        let mut names = HashMap::new();
        let preambles = tables
            .iter()
            .map(|x| x.preamble())
            .chain(actions.iter().map(|x| x.preamble()))
            .chain(action_profiles.iter().map(|x| x.preamble()))
            .chain(counters.iter().map(|x| x.preamble()))
            .chain(direct_counters.iter().map(|x| x.preamble()))
            .chain(meters.iter().map(|x| x.preamble()))
            .chain(direct_meters.iter().map(|x| x.preamble()))
            .chain(controller_packet_metadata.iter().map(|x| x.preamble()))
            .chain(digests.iter().map(|x| x.preamble()));
        for p in preambles {
            names.insert(p.id, p.name.clone());
        }

        P4InfoSchema {
            tables: Objects::new(ObjectKind::Table, tables),
            actions: Objects::new(ObjectKind::Action, actions),
            action_profiles: Objects::new(ObjectKind::ActionProfile, action_profiles),
            counters: Objects::new(ObjectKind::Counter, counters),
            direct_counters: Objects::new(ObjectKind::DirectCounter, direct_counters),
            meters: Objects::new(ObjectKind::Meter, meters),
            direct_meters: Objects::new(ObjectKind::DirectMeter, direct_meters),
            controller_packet_metadata: Objects::new(
                ObjectKind::ControllerPacketMetadata,
                controller_packet_metadata,
            ),
            digests: Objects::new(ObjectKind::Digest, digests),
            names,
        }
    }
}

impl P4InfoSchema {
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.items.iter()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.items.iter()
    }
}

impl Schema for P4InfoSchema {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name)
    }

    fn table_by_id(&self, id: u32) -> Result<&Table> {
        self.tables.get_by_id(id)
    }

    fn action(&self, name: &str) -> Result<&Action> {
        self.actions.get(name)
    }

    fn action_by_id(&self, id: u32) -> Result<&Action> {
        self.actions.get_by_id(id)
    }

    fn action_profile(&self, name: &str) -> Result<&ActionProfile> {
        self.action_profiles.get(name)
    }

    fn action_profile_by_id(&self, id: u32) -> Result<&ActionProfile> {
        self.action_profiles.get_by_id(id)
    }

    fn counter(&self, name: &str) -> Result<&Counter> {
        self.counters.get(name)
    }

    fn direct_counter(&self, name: &str) -> Result<&DirectCounter> {
        self.direct_counters.get(name)
    }

    fn meter(&self, name: &str) -> Result<&Meter> {
        self.meters.get(name)
    }

    fn direct_meter(&self, name: &str) -> Result<&DirectMeter> {
        self.direct_meters.get(name)
    }

    fn controller_packet_metadata(&self, name: &str) -> Result<&ControllerPacketMetadata> {
        self.controller_packet_metadata.get(name)
    }

    fn digest(&self, name: &str) -> Result<&Digest> {
        self.digests.get(name)
    }

    fn resolve_id(&self, id: u32) -> Result<&str> {
        self.names
            .get(&id)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::SchemaLookup(format!("no object with id {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::schema;

    #[test]
    fn suffix_index_drops_ambiguous_suffixes() {
        let index = SuffixIndex::new(vec!["hdr.a.port", "hdr.b.port", "hdr.a.addr"]);
        assert_eq!(index.get("hdr.a.port"), Some(0));
        assert_eq!(index.get("a.port"), Some(0));
        assert_eq!(index.get("b.port"), Some(1));
        assert_eq!(index.get("port"), None);
        assert_eq!(index.get("addr"), Some(2));
        assert_eq!(index.get("a"), None);
    }

    #[test]
    fn exact_name_beats_ambiguous_suffix() {
        let index = SuffixIndex::new(vec!["port", "a.port"]);
        assert_eq!(index.get("port"), Some(0));
        assert_eq!(index.get("a.port"), Some(1));
    }

    #[test]
    fn objects_resolve_by_name_suffix_and_id() {
        let schema = schema();
        let table = schema.table("ingress.ExactOne").unwrap();
        assert_eq!(table.id(), 33582705);
        assert_eq!(schema.table("ExactOne").unwrap().id(), 33582705);
        assert_eq!(schema.table_by_id(33582705).unwrap().name(), "ingress.ExactOne");
        assert_eq!(schema.resolve_id(16783703).unwrap(), "actionA");
        assert_eq!(
            schema.resolve_name(ObjectKind::Action, "actionB").unwrap(),
            16809468
        );
        assert!(matches!(
            schema.table("NoSuchTable"),
            Err(Error::SchemaLookup(_))
        ));
    }

    #[test]
    fn table_capabilities() {
        let schema = schema();
        let exact = schema.table("ExactOne").unwrap();
        assert!(!exact.has_implementation());
        assert_eq!(exact.direct_counter.as_ref().unwrap().name(), "ExactOne_counter");
        assert_eq!(exact.direct_meter.as_ref().unwrap().name(), "ExactOne_meter");

        let member_table = schema.table("ActProfTable").unwrap();
        assert!(member_table.has_implementation());
        assert!(!member_table.has_selector());

        let selector_table = schema.table("ActSelTable").unwrap();
        assert!(selector_table.has_selector());

        let default_only = exact.action_ref(16800567).unwrap();
        assert!(default_only.may_be_default);
        assert!(!default_only.may_be_entry);
    }

    #[test]
    fn field_and_param_lookup() {
        let schema = schema();
        let field = schema
            .lookup_field("ExactOne", Lookup::Name("field32"))
            .unwrap();
        assert_eq!(field.bitwidth, 32);
        assert_eq!(field.match_kind, MatchKind::Exact);
        assert_eq!(
            schema.lookup_field("ExactOne", Lookup::Id(1)).unwrap().name(),
            "header_test.field32"
        );

        let multi = schema.table("MultiKey").unwrap();
        let err = multi.field("port").unwrap_err();
        assert!(err
            .to_string()
            .contains("not a valid match field name, nor a valid unique suffix"));
        assert_eq!(multi.field("a.port").unwrap().name(), "hdr.a.port");

        let param = schema
            .lookup_action_param("actionA", Lookup::Name("param"))
            .unwrap();
        assert_eq!(param.bitwidth, 48);
    }

    #[test]
    fn display_lists_fields_and_actions() {
        let schema = schema();
        let s = schema.table("ExactOne").unwrap().to_string();
        assert!(s.starts_with("table ingress.ExactOne:"));
        assert!(s.contains("field header_test.field32 (id 1): bit<32> exact-match"));
        assert!(s.contains("default-only action NoAction()"));
        assert!(s.contains("direct counter ExactOne_counter"));
    }
}
