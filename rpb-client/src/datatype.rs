//! # Convergent Data Types
//!
//! Purpose: Fetch and update the store's mergeable counters, sets and maps.
//!
//! ## Design Principles
//! 1. **Deltas, Not Values**: Local edits accumulate as pending operations;
//!    `store()` ships only the delta together with the causal context.
//! 2. **Typed Fetches**: `fetch_counter`, `fetch_set` and `fetch_map` fail
//!    with `DataTypeMismatch` when the key holds another type.
//! 3. **Absent Is Empty**: A missing key yields an empty value that can be
//!    edited and stored like any other.
//!
//! Map entries are keyed by name and kind, so a map can hold a counter and a
//! register under the same name.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};

use rpb_common::messages::{
    CounterOp, DataType, DtFetchReq, DtFetchResp, DtOp, DtUpdateReq, DtUpdateResp, DtValue,
    FlagOp, MapEntry, MapField, MapFieldType, MapOp, MapUpdate, RpbDelReq, SetOp,
};
use tracing::{trace, warn};

use crate::bucket::Bucket;
use crate::error::{ClientError, ClientResult};
use crate::object::{lossy, non_empty};
use crate::options::Options;

/// Bucket type used when a bucket handle names none.
pub const DEFAULT_BUCKET_TYPE: &str = "default";

/// A value that can live at the top level of a key.
pub trait DataTypeValue: Default {
    const KIND: DataType;

    fn from_wire(value: DtValue) -> Self;

    /// Pending edits as a store operation.
    fn to_op(&self) -> DtOp;

    /// Folds pending edits into the local value once the store accepted them.
    fn commit(&mut self);
}

/// A data type value bound to its bucket, key and causal context.
#[derive(Debug, Clone)]
pub struct DataTypeObject<T> {
    bucket: Bucket,
    key: String,
    context: Vec<u8>,
    pub options: Options,
    pub value: T,
}

pub type CounterDt = DataTypeObject<CounterValue>;
pub type SetDt = DataTypeObject<SetValue>;
pub type MapDt = DataTypeObject<MapValue>;

impl<T: DataTypeValue> DataTypeObject<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Opaque causal context from the last fetch or store.
    pub fn context(&self) -> &[u8] {
        &self.context
    }

    /// Sends the pending edits. An empty key lets the store assign one.
    pub fn store(&mut self) -> ClientResult<()> {
        let request = DtUpdateReq {
            bucket: self.bucket.name().as_bytes().to_vec(),
            key: non_empty(self.key.as_bytes()),
            r#type: type_name(&self.bucket),
            context: non_empty(&self.context),
            op: self.value.to_op(),
            w: self.options.wire_w(),
            dw: self.options.wire_dw(),
            pw: self.options.wire_pw(),
            ..Default::default()
        };
        let resp: DtUpdateResp = self.bucket.client().executor().request(&request)?;
        if self.key.is_empty() {
            if let Some(key) = resp.key {
                self.key = lossy(key);
            }
        }
        if let Some(context) = resp.context {
            self.context = context;
        }
        self.value.commit();
        trace!(bucket = self.bucket.name(), key = %self.key, kind = ?T::KIND, "data type stored");
        Ok(())
    }

    /// Deletes the key.
    pub fn destroy(&self) -> ClientResult<()> {
        let request = RpbDelReq {
            bucket: self.bucket.name().as_bytes().to_vec(),
            key: self.key.as_bytes().to_vec(),
            r: self.options.wire_r(),
            pr: self.options.wire_pr(),
            rw: self.options.wire_rw(),
            w: self.options.wire_w(),
            dw: self.options.wire_dw(),
            pw: self.options.wire_pw(),
            r#type: Some(type_name(&self.bucket)),
            ..Default::default()
        };
        self.bucket.client().executor().request_ack(&request)
    }
}

impl<T> Deref for DataTypeObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for DataTypeObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl Bucket {
    pub fn fetch_counter(&self, key: &str, options: Options) -> ClientResult<CounterDt> {
        self.fetch_data_type(key, options)
    }

    pub fn fetch_set(&self, key: &str, options: Options) -> ClientResult<SetDt> {
        self.fetch_data_type(key, options)
    }

    pub fn fetch_map(&self, key: &str, options: Options) -> ClientResult<MapDt> {
        self.fetch_data_type(key, options)
    }

    fn fetch_data_type<T: DataTypeValue>(
        &self,
        key: &str,
        options: Options,
    ) -> ClientResult<DataTypeObject<T>> {
        let request = DtFetchReq {
            bucket: self.name().as_bytes().to_vec(),
            key: key.as_bytes().to_vec(),
            r#type: type_name(self),
            r: options.wire_r(),
            pr: options.wire_pr(),
            notfound_ok: Some(true),
            include_context: Some(true),
            ..Default::default()
        };
        let resp: DtFetchResp = self.client().executor().request(&request)?;
        if resp.r#type != T::KIND as i32 {
            let actual = DataType::try_from(resp.r#type)
                .map(|kind| kind_name(kind).to_string())
                .unwrap_or_else(|_| resp.r#type.to_string());
            return Err(ClientError::DataTypeMismatch {
                expected: kind_name(T::KIND),
                actual,
            });
        }
        Ok(DataTypeObject {
            bucket: self.clone(),
            key: key.to_string(),
            context: resp.context.unwrap_or_default(),
            options,
            value: resp.value.map(T::from_wire).unwrap_or_default(),
        })
    }
}

fn kind_name(kind: DataType) -> &'static str {
    match kind {
        DataType::Counter => "counter",
        DataType::Set => "set",
        DataType::Map => "map",
    }
}

fn type_name(bucket: &Bucket) -> Vec<u8> {
    bucket
        .bucket_type()
        .unwrap_or(DEFAULT_BUCKET_TYPE)
        .as_bytes()
        .to_vec()
}

// ============================================================================
// COUNTERS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterValue {
    value: i64,
    pending: i64,
}

impl CounterValue {
    /// Value as last seen, without pending increments.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Adds `amount` to the pending delta.
    pub fn increment(&mut self, amount: i64) -> ClientResult<()> {
        self.pending = self
            .pending
            .checked_add(amount)
            .ok_or(ClientError::CounterOverflow { amount })?;
        Ok(())
    }

    fn op(&self) -> Option<CounterOp> {
        (self.pending != 0).then_some(CounterOp {
            increment: Some(self.pending),
        })
    }

    fn apply(&mut self) {
        self.value = self.value.saturating_add(self.pending);
        self.pending = 0;
    }
}

impl DataTypeValue for CounterValue {
    const KIND: DataType = DataType::Counter;

    fn from_wire(value: DtValue) -> Self {
        CounterValue {
            value: value.counter_value.unwrap_or_default(),
            pending: 0,
        }
    }

    fn to_op(&self) -> DtOp {
        DtOp {
            counter_op: Some(CounterOp {
                increment: Some(self.pending),
            }),
            ..Default::default()
        }
    }

    fn commit(&mut self) {
        self.apply();
    }
}

// ============================================================================
// SETS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetValue {
    value: Vec<Vec<u8>>,
    adds: Vec<Vec<u8>>,
    removes: Vec<Vec<u8>>,
}

impl SetValue {
    /// Members as last seen, without pending edits.
    pub fn value(&self) -> &[Vec<u8>] {
        &self.value
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.value.iter().any(|m| m.as_slice() == member)
    }

    pub fn add(&mut self, member: impl Into<Vec<u8>>) {
        push_unique(&mut self.adds, member.into());
    }

    pub fn remove(&mut self, member: impl Into<Vec<u8>>) {
        push_unique(&mut self.removes, member.into());
    }

    fn op(&self) -> Option<SetOp> {
        if self.adds.is_empty() && self.removes.is_empty() {
            return None;
        }
        Some(SetOp {
            adds: self.adds.clone(),
            removes: self.removes.clone(),
        })
    }

    fn apply(&mut self) {
        let removes = std::mem::take(&mut self.removes);
        self.value.retain(|m| !removes.contains(m));
        for member in std::mem::take(&mut self.adds) {
            push_unique(&mut self.value, member);
        }
    }
}

fn push_unique(list: &mut Vec<Vec<u8>>, member: Vec<u8>) {
    if !list.contains(&member) {
        list.push(member);
    }
}

impl DataTypeValue for SetValue {
    const KIND: DataType = DataType::Set;

    fn from_wire(value: DtValue) -> Self {
        SetValue {
            value: value.set_value,
            ..SetValue::default()
        }
    }

    fn to_op(&self) -> DtOp {
        DtOp {
            set_op: Some(SetOp {
                adds: self.adds.clone(),
                removes: self.removes.clone(),
            }),
            ..Default::default()
        }
    }

    fn commit(&mut self) {
        self.apply();
    }
}

// ============================================================================
// MAPS
// ============================================================================

/// Last-writer-wins byte value inside a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Register {
    value: Vec<u8>,
    new_value: Option<Vec<u8>>,
}

impl Register {
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn update(&mut self, value: impl Into<Vec<u8>>) {
        self.new_value = Some(value.into());
    }
}

/// Boolean inside a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flag {
    value: bool,
    op: Option<FlagOp>,
}

impl Flag {
    pub fn value(&self) -> bool {
        self.value
    }

    pub fn enable(&mut self) {
        self.op = Some(FlagOp::Enable);
    }

    pub fn disable(&mut self) {
        self.op = Some(FlagOp::Disable);
    }
}

/// Identifies a map entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapKey {
    pub name: String,
    pub kind: MapFieldType,
}

impl MapKey {
    pub fn new(name: impl Into<String>, kind: MapFieldType) -> Self {
        MapKey {
            name: name.into(),
            kind,
        }
    }

    fn to_field(&self) -> MapField {
        MapField {
            name: self.name.as_bytes().to_vec(),
            r#type: self.kind as i32,
        }
    }
}

/// One value held in a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapItem {
    Counter(CounterValue),
    Set(SetValue),
    Register(Register),
    Flag(Flag),
    Map(MapValue),
}

impl MapItem {
    fn empty(kind: MapFieldType) -> Self {
        match kind {
            MapFieldType::Counter => MapItem::Counter(CounterValue::default()),
            MapFieldType::Set => MapItem::Set(SetValue::default()),
            MapFieldType::Register => MapItem::Register(Register::default()),
            MapFieldType::Flag => MapItem::Flag(Flag::default()),
            MapFieldType::Map => MapItem::Map(MapValue::default()),
        }
    }

    fn from_entry(kind: MapFieldType, entry: MapEntry) -> Self {
        match kind {
            MapFieldType::Counter => MapItem::Counter(CounterValue {
                value: entry.counter_value.unwrap_or_default(),
                pending: 0,
            }),
            MapFieldType::Set => MapItem::Set(SetValue {
                value: entry.set_value,
                ..SetValue::default()
            }),
            MapFieldType::Register => MapItem::Register(Register {
                value: entry.register_value.unwrap_or_default(),
                new_value: None,
            }),
            MapFieldType::Flag => MapItem::Flag(Flag {
                value: entry.flag_value.unwrap_or(false),
                op: None,
            }),
            MapFieldType::Map => MapItem::Map(MapValue::from_entries(entry.map_value)),
        }
    }

    fn update(&self, field: MapField) -> Option<MapUpdate> {
        let mut update = MapUpdate {
            field,
            ..Default::default()
        };
        match self {
            MapItem::Counter(counter) => update.counter_op = Some(counter.op()?),
            MapItem::Set(set) => update.set_op = Some(set.op()?),
            MapItem::Register(register) => update.register_op = Some(register.new_value.clone()?),
            MapItem::Flag(flag) => update.flag_op = Some(flag.op? as i32),
            MapItem::Map(map) => update.map_op = Some(map.op()?),
        }
        Some(update)
    }

    fn apply(&mut self) {
        match self {
            MapItem::Counter(counter) => counter.apply(),
            MapItem::Set(set) => set.apply(),
            MapItem::Register(register) => {
                if let Some(value) = register.new_value.take() {
                    register.value = value;
                }
            }
            MapItem::Flag(flag) => {
                if let Some(op) = flag.op.take() {
                    flag.value = op == FlagOp::Enable;
                }
            }
            MapItem::Map(map) => map.apply(),
        }
    }

    pub fn as_counter(&mut self) -> Option<&mut CounterValue> {
        match self {
            MapItem::Counter(counter) => Some(counter),
            _ => None,
        }
    }

    pub fn as_set(&mut self) -> Option<&mut SetValue> {
        match self {
            MapItem::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_register(&mut self) -> Option<&mut Register> {
        match self {
            MapItem::Register(register) => Some(register),
            _ => None,
        }
    }

    pub fn as_flag(&mut self) -> Option<&mut Flag> {
        match self {
            MapItem::Flag(flag) => Some(flag),
            _ => None,
        }
    }

    pub fn as_map(&mut self) -> Option<&mut MapValue> {
        match self {
            MapItem::Map(map) => Some(map),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapValue {
    values: BTreeMap<MapKey, MapItem>,
    removes: BTreeSet<MapKey>,
}

impl MapValue {
    fn from_entries(entries: Vec<MapEntry>) -> Self {
        let mut values = BTreeMap::new();
        for entry in entries {
            let kind = match MapFieldType::try_from(entry.field.r#type) {
                Ok(kind) => kind,
                Err(_) => {
                    warn!(field_type = entry.field.r#type, "skipping map entry of unknown type");
                    continue;
                }
            };
            let key = MapKey::new(lossy(entry.field.name.clone()), kind);
            values.insert(key, MapItem::from_entry(kind, entry));
        }
        MapValue {
            values,
            removes: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.values.keys()
    }

    pub fn fetch(&self, name: &str, kind: MapFieldType) -> Option<&MapItem> {
        self.values.get(&MapKey::new(name, kind))
    }

    /// Returns the entry, creating an empty one of `kind` when absent.
    pub fn add(&mut self, name: &str, kind: MapFieldType) -> &mut MapItem {
        let key = MapKey::new(name, kind);
        self.removes.remove(&key);
        self.values.entry(key).or_insert_with(|| MapItem::empty(kind))
    }

    /// Removes the entry locally and on the next store.
    pub fn remove(&mut self, name: &str, kind: MapFieldType) {
        let key = MapKey::new(name, kind);
        self.values.remove(&key);
        self.removes.insert(key);
    }

    fn op(&self) -> Option<MapOp> {
        let op = self.map_op();
        (!op.updates.is_empty() || !op.removes.is_empty()).then_some(op)
    }

    fn map_op(&self) -> MapOp {
        MapOp {
            removes: self.removes.iter().map(MapKey::to_field).collect(),
            updates: self
                .values
                .iter()
                .filter_map(|(key, item)| item.update(key.to_field()))
                .collect(),
        }
    }

    fn apply(&mut self) {
        self.removes.clear();
        for item in self.values.values_mut() {
            item.apply();
        }
    }
}

impl DataTypeValue for MapValue {
    const KIND: DataType = DataType::Map;

    fn from_wire(value: DtValue) -> Self {
        MapValue::from_entries(value.map_value)
    }

    fn to_op(&self) -> DtOp {
        DtOp {
            map_op: Some(self.map_op()),
            ..Default::default()
        }
    }

    fn commit(&mut self) {
        self.apply();
    }
}
