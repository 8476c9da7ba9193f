//! Container objects - the native targets of sequence and mapping arguments

use super::error::NativeError;
use super::object::{type_index, NativeObject};
use super::value::NativeValue;

/// Immutable array of native values
#[derive(Debug)]
pub struct ArrayObj {
    items: Vec<NativeValue>,
}

impl NativeObject for ArrayObj {
    const TYPE_INDEX: u32 = type_index::ARRAY;
    const TYPE_KEY: &'static str = "runtime.Array";
}

impl ArrayObj {
    pub fn new(items: Vec<NativeValue>) -> Result<Self, NativeError> {
        if let Some(pos) = items.iter().position(|v| matches!(v, NativeValue::TensorView(_))) {
            return Err(NativeError::new(format!(
                "Array element {} is a borrowed tensor view and cannot be stored",
                pos
            )));
        }
        Ok(Self { items })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: i64) -> Result<&NativeValue, NativeError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.items.get(i))
            .ok_or_else(|| {
                NativeError::new(format!("Index {} out of range for array of size {}", index, self.items.len()))
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeValue> {
        self.items.iter()
    }
}

/// Association list keyed by value equality (identity for objects)
#[derive(Debug)]
pub struct MapObj {
    entries: Vec<(NativeValue, NativeValue)>,
}

impl NativeObject for MapObj {
    const TYPE_INDEX: u32 = type_index::MAP;
    const TYPE_KEY: &'static str = "runtime.Map";
}

impl MapObj {
    /// Build from pairs; a repeated key keeps its last value
    pub fn new(pairs: Vec<(NativeValue, NativeValue)>) -> Result<Self, NativeError> {
        let mut entries: Vec<(NativeValue, NativeValue)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            if matches!(key, NativeValue::TensorView(_)) || matches!(value, NativeValue::TensorView(_)) {
                return Err(NativeError::new("Map entries cannot hold borrowed tensor views"));
            }
            match entries.iter_mut().find(|(k, _)| keys_equal(k, &key)) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
        Ok(Self { entries })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &NativeValue) -> Option<&NativeValue> {
        self.entries.iter().find(|(k, _)| keys_equal(k, key)).map(|(_, v)| v)
    }
}

fn keys_equal(a: &NativeValue, b: &NativeValue) -> bool {
    use NativeValue::*;
    match (a, b) {
        (Null, Null) => true,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x.to_bits() == y.to_bits(),
        (Bool(x), Bool(y)) => x == y,
        (Device(x), Device(y)) => x == y,
        (Str(x), Str(y)) => x == y,
        (Bytes(x), Bytes(y)) => x == y,
        (Handle(x), Handle(y)) => x == y,
        (Ext(cx, x), Ext(cy, y)) => cx == cy && x == y,
        (Object(x), Object(y)) => x.same_as(y),
        _ => false,
    }
}
