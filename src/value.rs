// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(clippy::pattern_type_mismatch)]

use alloc::collections::BTreeSet;
use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::location::SourceLocation;
use crate::number::Number;

pub type Object = IndexMap<String, Value>;

#[derive(Debug, Default, PartialEq, Eq)]
struct MetadataInner {
    locations: BTreeSet<SourceLocation>,
    secret: bool,
}

/// Lineage attached to every value: the source locations of every value that
/// contributed to it and whether any of them was secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    inner: Option<Arc<MetadataInner>>,
}

impl Metadata {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn at(location: SourceLocation) -> Self {
        let mut locations = BTreeSet::new();
        locations.insert(location);
        Self {
            inner: Some(Arc::new(MetadataInner {
                locations,
                secret: false,
            })),
        }
    }

    pub fn secret() -> Self {
        Self {
            inner: Some(Arc::new(MetadataInner {
                locations: BTreeSet::new(),
                secret: true,
            })),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn is_secret(&self) -> bool {
        self.inner.as_ref().is_some_and(|m| m.secret)
    }

    pub fn locations(&self) -> impl Iterator<Item = &SourceLocation> {
        self.inner.iter().flat_map(|m| m.locations.iter())
    }

    pub fn merge(&self, other: &Metadata) -> Metadata {
        match (&self.inner, &other.inner) {
            (None, _) => other.clone(),
            (_, None) => self.clone(),
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => self.clone(),
            (Some(a), Some(b)) => {
                let mut locations = a.locations.clone();
                locations.extend(b.locations.iter().copied());
                Metadata {
                    inner: Some(Arc::new(MetadataInner {
                        locations,
                        secret: a.secret || b.secret,
                    })),
                }
            }
        }
    }

    pub fn merge_all<'a>(values: impl IntoIterator<Item = &'a Value>) -> Metadata {
        values
            .into_iter()
            .fold(Metadata::empty(), |acc, v| acc.merge(&v.meta))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub message: String,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    Boolean(bool),
    Number(Number),
    Text(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<Object>),
    Null,
    Undefined,
    Error(Arc<ErrorValue>),
}

/// Runtime datum of the policy language.
#[derive(Debug, Clone)]
pub struct Value {
    kind: ValueKind,
    meta: Metadata,
}

impl PartialEq for ValueKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a == b,
            (ValueKind::Number(a), ValueKind::Number(b)) => a == b,
            (ValueKind::Text(a), ValueKind::Text(b)) => a == b,
            (ValueKind::Array(a), ValueKind::Array(b)) => a == b,
            (ValueKind::Object(a), ValueKind::Object(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (ValueKind::Null, ValueKind::Null) => true,
            (ValueKind::Undefined, ValueKind::Undefined) => true,
            (ValueKind::Error(a), ValueKind::Error(b)) => a.message == b.message,
            _ => false,
        }
    }
}

/// Equality is structural and ignores metadata.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Value {
    fn of(kind: ValueKind) -> Self {
        Self {
            kind,
            meta: Metadata::empty(),
        }
    }

    pub fn null() -> Self {
        Self::of(ValueKind::Null)
    }

    pub fn undefined() -> Self {
        Self::of(ValueKind::Undefined)
    }

    pub fn bool(b: bool) -> Self {
        Self::of(ValueKind::Boolean(b))
    }

    pub fn text(s: impl AsRef<str>) -> Self {
        Self::of(ValueKind::Text(Arc::from(s.as_ref())))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::of(ValueKind::Array(Arc::new(items)))
    }

    pub fn object(fields: Object) -> Self {
        Self::of(ValueKind::Object(Arc::new(fields)))
    }

    pub fn new_array() -> Self {
        Self::array(Vec::new())
    }

    pub fn new_object() -> Self {
        Self::object(Object::new())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::of(ValueKind::Error(Arc::new(ErrorValue {
            message: message.into(),
            location: None,
        })))
    }

    pub fn error_at(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::of(ValueKind::Error(Arc::new(ErrorValue {
            message: message.into(),
            location: Some(location),
        })))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    pub fn with_metadata(mut self, meta: Metadata) -> Self {
        self.meta = meta;
        self
    }

    pub fn merge_metadata(mut self, meta: &Metadata) -> Self {
        self.meta = self.meta.merge(meta);
        self
    }

    pub fn with_location(self, location: SourceLocation) -> Self {
        self.merge_metadata(&Metadata::at(location))
    }

    pub fn as_secret(self) -> Self {
        self.merge_metadata(&Metadata::secret())
    }

    pub fn is_secret(&self) -> bool {
        self.meta.is_secret()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ValueKind::Error(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.kind, ValueKind::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            ValueKind::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Number> {
        match &self.kind {
            ValueKind::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Text(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match &self.kind {
            ValueKind::Array(a) => Some(a.as_ref()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match &self.kind {
            ValueKind::Object(o) => Some(o.as_ref()),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match &self.kind {
            ValueKind::Error(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Name of the variant, as used in type error messages.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::Boolean(_) => "Boolean",
            ValueKind::Number(_) => "Number",
            ValueKind::Text(_) => "Text",
            ValueKind::Array(_) => "Array",
            ValueKind::Object(_) => "Object",
            ValueKind::Null => "Null",
            ValueKind::Undefined => "Undefined",
            ValueKind::Error(_) => "Error",
        }
    }

    pub fn from_json_str(json: &str) -> Result<Value> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_str(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.kind {
            ValueKind::Null | ValueKind::Undefined => serializer.serialize_none(),
            ValueKind::Boolean(b) => serializer.serialize_bool(*b),
            ValueKind::Number(n) => n.serialize(serializer),
            ValueKind::Text(s) => serializer.serialize_str(s),
            ValueKind::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for e in a.iter() {
                    seq.serialize_element(e)?;
                }
                seq.end()
            }
            ValueKind::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            ValueKind::Error(e) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", &e.message)?;
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a json value")
    }

    fn visit_unit<E>(self) -> core::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::null())
    }

    fn visit_none<E>(self) -> core::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::null())
    }

    fn visit_bool<E>(self, b: bool) -> core::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::bool(b))
    }

    fn visit_u64<E>(self, v: u64) -> core::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_i64<E>(self, v: i64) -> core::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> core::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        match Number::from_f64(v) {
            Some(n) => Ok(Value::from(n)),
            None => Err(de::Error::custom("non-finite number")),
        }
    }

    fn visit_str<E>(self, s: &str) -> core::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::text(s))
    }

    fn visit_seq<V>(self, mut visitor: V) -> core::result::Result<Self::Value, V::Error>
    where
        V: SeqAccess<'de>,
    {
        let mut arr = vec![];
        while let Some(v) = visitor.next_element()? {
            arr.push(v);
        }
        Ok(Value::array(arr))
    }

    fn visit_map<V>(self, mut visitor: V) -> core::result::Result<Self::Value, V::Error>
    where
        V: MapAccess<'de>,
    {
        let mut map = Object::new();
        while let Some((key, value)) = visitor.next_entry::<String, Value>()? {
            if key == "$serde_json::private::Number" {
                if let Some(n) = value.as_text().and_then(|s| Number::from_str(s).ok()) {
                    return Ok(Value::from(n));
                }
                return Err(de::Error::custom("failed to read big number"));
            }
            map.insert(key, value);
        }
        Ok(Value::object(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ValueKind::Undefined => write!(f, "undefined"),
            ValueKind::Error(e) => write!(f, "ERROR[{}]", e.message),
            _ => match serde_json::to_string(self) {
                Ok(s) => write!(f, "{s}"),
                Err(_e) => Err(fmt::Error),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::of(ValueKind::Number(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::from(Number::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::from(Number::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::from(Number::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Object> for Value {
    fn from(fields: Object) -> Self {
        Value::object(fields)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn json_round_trip_preserves_key_order() {
        let v = Value::from_json_str(r#"{"z":1,"a":[true,null,"x"],"m":1.25}"#).unwrap();
        let keys: Vec<_> = v.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["z", "a", "m"]);
        assert_eq!(v.to_string(), r#"{"z":1,"a":[true,null,"x"],"m":1.25}"#);
    }

    #[test]
    fn equality_ignores_metadata() {
        let loc = SourceLocation::new(1, 2, 1, 5);
        let a = Value::from(3i64).with_location(loc).as_secret();
        let b = Value::from(3i64);
        assert_eq!(a, b);
        assert!(a.is_secret());
        assert_eq!(a.meta().locations().count(), 1);
    }

    #[test]
    fn metadata_merge_unions_locations() {
        let a = Metadata::at(SourceLocation::new(1, 0, 1, 1));
        let b = Metadata::at(SourceLocation::new(2, 0, 2, 1)).merge(&Metadata::secret());
        let m = a.merge(&b);
        assert_eq!(m.locations().count(), 2);
        assert!(m.is_secret());
        assert!(Metadata::empty().merge(&Metadata::empty()).is_empty());
    }

    #[test]
    fn object_equality_is_order_insensitive() {
        let a = Value::from_json_str(r#"{"a":1,"b":2}"#).unwrap();
        let b = Value::from_json_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Value::from_json_str(r#"{"a":1}"#).unwrap());
    }

    #[test]
    fn display_of_special_values() {
        assert_eq!(Value::undefined().to_string(), "undefined");
        assert_eq!(Value::error("boom").to_string(), "ERROR[boom]");
        assert_eq!(Value::error("boom").type_name(), "Error");
    }
}
