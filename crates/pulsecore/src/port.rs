//! Typed single-slot value cells.
//!
//! A port holds at most one value plus a write counter. Array and object
//! ports are containers: after every successful write they re-derive a keyed
//! map of child ports mirroring the shape of the stored collection, so that
//! individual elements can be wired like any other port.

use crate::value::{convert, is_compatible};
use crate::{ConversionError, DataType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type PortId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

/// What a port carries: dataflow values, side-channel control signals, or
/// the untyped execution trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Data,
    Control,
    Exec,
}

#[derive(Debug, Clone)]
pub struct Port {
    id: PortId,
    name: String,
    direction: PortDirection,
    kind: PortKind,
    data_type: DataType,
    data: Value,
    version: u64,
    last_read_version: u64,
    children: BTreeMap<String, Port>,
}

impl Port {
    pub fn new(
        name: impl Into<String>,
        direction: PortDirection,
        kind: PortKind,
        data_type: DataType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            direction,
            kind,
            data_type,
            data: Value::Null,
            version: 0,
            last_read_version: 0,
            children: BTreeMap::new(),
        }
    }

    /// Untyped execution trigger port.
    pub fn exec(name: impl Into<String>, direction: PortDirection) -> Self {
        Self::new(name, direction, PortKind::Exec, DataType::Null)
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_read_version(&self) -> u64 {
        self.last_read_version
    }

    pub fn is_container(&self) -> bool {
        self.data_type.is_container()
    }

    pub fn has_data(&self) -> bool {
        self.version > 0 || !self.data.is_null()
    }

    pub fn has_new_data(&self) -> bool {
        self.version > self.last_read_version
    }

    /// Convert and store `value`. On failure the port is left untouched.
    ///
    /// Returns the value as stored after coercion.
    pub fn write(&mut self, value: Value) -> Result<Value, ConversionError> {
        if value.is_null() {
            self.data = Value::Null;
            self.version += 1;
            self.drop_children();
            return Ok(Value::Null);
        }
        let converted = convert(&value, self.data_type)?;
        self.store(converted.clone());
        Ok(converted)
    }

    /// Return the current value and mark it consumed. Storage is kept.
    pub fn read(&mut self) -> Value {
        self.last_read_version = self.version;
        self.data.clone()
    }

    pub fn peek(&self) -> &Value {
        &self.data
    }

    /// Reset to the never-written state. Element ports are reset too but
    /// keep their ids, so edges wired into them stay valid.
    pub fn clear(&mut self) {
        self.data = Value::Null;
        self.version = 0;
        self.last_read_version = 0;
        for child in self.children.values_mut() {
            child.clear();
        }
    }

    /// Write into this port or one of its element ports by id.
    ///
    /// A write into an element is folded back into every container above it,
    /// so reading the top-level port sees the delivered value.
    pub fn write_at(&mut self, id: PortId, value: Value) -> Option<Result<Value, ConversionError>> {
        if self.id == id {
            return Some(self.write(value));
        }
        let child = self
            .children
            .values_mut()
            .find(|child| child.find(id).is_some())?;
        let result = child.write_at(id, value)?;
        if result.is_ok() {
            self.fold_children();
        }
        Some(result)
    }

    /// Whether a value of this port's type may flow into `target`.
    pub fn can_connect(&self, target: &Port) -> bool {
        is_compatible(self.data_type, target.data_type)
    }

    /// Change the declared type. Stored data that no longer fits is cleared.
    pub fn set_data_type(&mut self, data_type: DataType) {
        if self.data_type == data_type {
            return;
        }
        self.data_type = data_type;
        if !data_type.is_container() {
            self.drop_children();
        }
        match convert(&self.data, data_type) {
            Ok(converted) => self.store_in_place(converted),
            Err(_) => {
                self.drop_children();
                self.clear();
            }
        }
    }

    pub fn children(&self) -> &BTreeMap<String, Port> {
        &self.children
    }

    pub fn child(&self, key: &str) -> Option<&Port> {
        self.children.get(key)
    }

    /// Find this port or one of its descendants by id.
    pub fn find(&self, id: PortId) -> Option<&Port> {
        if self.id == id {
            return Some(self);
        }
        self.children.values().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: PortId) -> Option<&mut Port> {
        if self.id == id {
            return Some(self);
        }
        self.children.values_mut().find_map(|child| child.find_mut(id))
    }

    /// Ids of this port and all of its descendants, parent first.
    pub fn tree_ids(&self) -> Vec<PortId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<PortId>) {
        ids.push(self.id);
        for child in self.children.values() {
            child.collect_ids(ids);
        }
    }

    /// Load saved state. Saved data goes through the same conversion as a
    /// write, so it always matches `data_type`.
    pub(crate) fn restore(
        &mut self,
        id: PortId,
        data_type: DataType,
        data: Value,
        children: Vec<(String, Port)>,
    ) -> Result<(), ConversionError> {
        let data = if data.is_null() {
            data
        } else {
            convert(&data, data_type)?
        };
        self.id = id;
        self.data_type = data_type;
        self.version = u64::from(!data.is_null());
        self.last_read_version = 0;
        self.data = data;
        self.children = children.into_iter().collect();
        Ok(())
    }

    pub(crate) fn restored_child(
        &self,
        key: &str,
        id: PortId,
        data_type: DataType,
        data: Value,
        children: Vec<(String, Port)>,
    ) -> Result<Port, ConversionError> {
        let mut child = Port::new(key, self.direction, self.kind, data_type);
        child.restore(id, data_type, data, children)?;
        Ok(child)
    }

    fn store(&mut self, value: Value) {
        self.version += 1;
        self.store_in_place(value);
    }

    fn store_in_place(&mut self, value: Value) {
        self.data = value;
        if self.data_type.is_container() {
            self.sync_children();
        }
    }

    fn drop_children(&mut self) {
        for child in self.children.values_mut() {
            child.clear();
        }
        self.children.clear();
    }

    /// Rebuild this container's value from its element ports.
    fn fold_children(&mut self) {
        let data = match self.data_type {
            DataType::Array => {
                let mut items: Vec<(usize, Value)> = self
                    .children
                    .iter()
                    .filter_map(|(key, child)| Some((key.parse().ok()?, child.data.clone())))
                    .collect();
                items.sort_by_key(|(index, _)| *index);
                Value::Array(items.into_iter().map(|(_, value)| value).collect())
            }
            DataType::Object => Value::Object(
                self.children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.data.clone()))
                    .collect(),
            ),
            _ => return,
        };
        self.data = data;
        self.version += 1;
    }

    fn sync_children(&mut self) {
        let elements: Vec<(String, Value)> = match &self.data {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };

        let mut previous = std::mem::take(&mut self.children);
        for (key, element) in elements {
            let inferred = element.data_type();
            let mut child = match previous.remove(&key) {
                Some(mut existing) => {
                    if existing.data_type != inferred && !inferred.is_container() {
                        existing.drop_children();
                    }
                    existing.data_type = inferred;
                    existing
                }
                None => Port::new(key.clone(), self.direction, self.kind, inferred),
            };
            child.store(element);
            self.children.insert(key, child);
        }
        for (_, mut stale) in previous {
            stale.clear();
        }
    }
}
