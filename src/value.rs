//! Value System - Polymorphic Template Data
//!
//! `Value` carries everything a template can see: scalars, strings of either
//! width, engine-native lists/maps, generic views over host containers, and
//! host callables. Recursive cases live behind a `Box`, so the size of a
//! `Value` does not depend on nesting depth and `clone` is a deep copy.

use std::collections::HashMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::callable::UserCallable;
use crate::generic::{GenericList, GenericMap};
use crate::width::WString;

pub type ValuesList = Vec<Value>;
pub type ValuesMap = HashMap<String, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Empty,
    Bool(bool),
    String(String),
    WString(WString),
    StrView(&'static str),
    WStrView(&'static [char]),
    Int(i64),
    Double(f64),
    List(Box<ValuesList>),
    Map(Box<ValuesMap>),
    GenericList(GenericList),
    GenericMap(GenericMap),
    Callable(Box<UserCallable>),
}

impl Value {
    /// Non-owning view over static narrow text.
    pub fn str_view(s: &'static str) -> Self {
        Value::StrView(s)
    }

    /// Non-owning view over static wide text.
    pub fn wstr_view(s: &'static [char]) -> Self {
        Value::WStrView(s)
    }

    /// Name of the active case, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::WString(_) => "wstring",
            Value::StrView(_) => "string view",
            Value::WStrView(_) => "wstring view",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::GenericList(_) => "generic list",
            Value::GenericMap(_) => "generic map",
            Value::Callable(_) => "callable",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_wstring(&self) -> bool {
        matches!(self, Value::WString(_))
    }

    /// True for any of the four string cases.
    pub fn is_any_string(&self) -> bool {
        matches!(
            self,
            Value::String(_) | Value::WString(_) | Value::StrView(_) | Value::WStrView(_)
        )
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// True for native and generic lists.
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_) | Value::GenericList(_))
    }

    /// True for native and generic maps.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_) | Value::GenericMap(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Callable(_))
    }

    /// # Panics
    /// If the active case is not `Bool`.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            other => mismatch("bool", other),
        }
    }

    /// # Panics
    /// If the active case is not `Int`.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            other => mismatch("int", other),
        }
    }

    /// # Panics
    /// If the active case is not `Double`.
    pub fn as_double(&self) -> f64 {
        match self {
            Value::Double(d) => *d,
            other => mismatch("double", other),
        }
    }

    /// # Panics
    /// If the active case is not `String`.
    pub fn as_string(&self) -> &String {
        match self {
            Value::String(s) => s,
            other => mismatch("string", other),
        }
    }

    pub fn as_string_mut(&mut self) -> &mut String {
        match self {
            Value::String(s) => s,
            other => mismatch("string", other),
        }
    }

    /// # Panics
    /// If the active case is not `WString`.
    pub fn as_wstring(&self) -> &WString {
        match self {
            Value::WString(s) => s,
            other => mismatch("wstring", other),
        }
    }

    /// # Panics
    /// If the active case is not the native `List`.
    pub fn as_list(&self) -> &ValuesList {
        match self {
            Value::List(list) => list,
            other => mismatch("list", other),
        }
    }

    pub fn as_list_mut(&mut self) -> &mut ValuesList {
        match self {
            Value::List(list) => list,
            other => mismatch("list", other),
        }
    }

    /// # Panics
    /// If the active case is not the native `Map`.
    pub fn as_map(&self) -> &ValuesMap {
        match self {
            Value::Map(map) => map,
            other => mismatch("map", other),
        }
    }

    pub fn as_map_mut(&mut self) -> &mut ValuesMap {
        match self {
            Value::Map(map) => map,
            other => mismatch("map", other),
        }
    }

    /// # Panics
    /// If the active case is not `Callable`.
    pub fn as_callable(&self) -> &UserCallable {
        match self {
            Value::Callable(callable) => callable,
            other => mismatch("callable", other),
        }
    }

    pub fn get_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an `Int` or `Double`.
    pub fn get_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Borrowed narrow text of `String` and `StrView`.
    pub fn get_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            Value::StrView(s) => Some(*s),
            _ => None,
        }
    }

    pub fn get_list(&self) -> Option<&ValuesList> {
        match self {
            Value::List(list) => Some(&**list),
            _ => None,
        }
    }

    pub fn get_map(&self) -> Option<&ValuesMap> {
        match self {
            Value::Map(map) => Some(&**map),
            _ => None,
        }
    }

    pub fn get_callable(&self) -> Option<&UserCallable> {
        match self {
            Value::Callable(callable) => Some(&**callable),
            _ => None,
        }
    }

    /// Reduces any string case to narrow text; `None` for everything else.
    pub fn string_value(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::StrView(s) => Some(s.to_string()),
            Value::WString(s) => Some(s.to_narrow()),
            Value::WStrView(s) => Some(s.iter().collect()),
            _ => None,
        }
    }

    /// Number of items of a list or map, characters of a string.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(list) => Some(list.len()),
            Value::Map(map) => Some(map.len()),
            Value::GenericList(list) => Some(list.size()),
            Value::GenericMap(map) => Some(map.size()),
            Value::String(s) => Some(s.chars().count()),
            Value::StrView(s) => Some(s.chars().count()),
            Value::WString(s) => Some(s.len()),
            Value::WStrView(s) => Some(s.len()),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Empty => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::Callable(_) => true,
            other => other.len().is_some_and(|len| len > 0),
        }
    }
}

#[track_caller]
fn mismatch(expected: &str, found: &Value) -> ! {
    panic!("Value holds {}, not {}", found.kind(), expected)
}

/// Substitutes the internal representation of a host-supplied value, or
/// returns `None` when the value can be used as is.
///
/// Unbound generic wrappers become `Empty`; native containers are rebuilt
/// only when one of their items needs conversion.
pub fn convert_input(value: &Value) -> Option<Value> {
    match value {
        Value::GenericList(list) if !list.is_bound() => Some(Value::Empty),
        Value::GenericMap(map) if !map.is_bound() => Some(Value::Empty),
        Value::List(items) => {
            let first = items.iter().position(|item| convert_input(item).is_some())?;
            let mut converted = (**items).clone();
            for item in converted.iter_mut().skip(first) {
                if let Some(replacement) = convert_input(item) {
                    *item = replacement;
                }
            }
            Some(Value::from(converted))
        }
        Value::Map(map) => {
            if !map.values().any(|item| convert_input(item).is_some()) {
                return None;
            }
            let converted: ValuesMap = map
                .iter()
                .map(|(k, v)| (k.clone(), convert_input(v).unwrap_or_else(|| v.clone())))
                .collect();
            Some(Value::from(converted))
        }
        _ => None,
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => f.write_str("Empty"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::WString(s) => write!(f, "WString({:?})", s.to_narrow()),
            Value::StrView(s) => write!(f, "StrView({s:?})"),
            Value::WStrView(s) => write!(f, "WStrView({:?})", s.iter().collect::<String>()),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Double(d) => write!(f, "Double({d})"),
            Value::List(list) => f.debug_list().entries(list.iter()).finish(),
            Value::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Value::GenericList(list) => list.fmt(f),
            Value::GenericMap(map) => map.fmt(f),
            Value::Callable(callable) => callable.fmt(f),
        }
    }
}

/// Strings compare by content across cases; `Int` and `Double` compare
/// numerically; callables and generic wrappers compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.get_number() == b.get_number(),
            (a, b) if a.is_any_string() && b.is_any_string() => a.string_value() == b.string_value(),
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::GenericList(a), Value::GenericList(b)) => a.same_source(b),
            (Value::GenericMap(a), Value::GenericMap(b)) => a.same_source(b),
            (Value::Callable(a), Value::Callable(b)) => a.same_function(b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Empty | Value::Callable(_) => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::String(_) | Value::StrView(_) | Value::WString(_) | Value::WStrView(_) => {
                serializer.serialize_str(&self.string_value().unwrap_or_default())
            }
            Value::List(list) => list.serialize(serializer),
            Value::GenericList(list) => {
                let mut seq = serializer.serialize_seq(Some(list.size()))?;
                for item in list.iter() {
                    seq.serialize_element(&item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                let mut out = serializer.serialize_map(Some(keys.len()))?;
                for key in keys {
                    out.serialize_entry(key, &map[key])?;
                }
                out.end()
            }
            Value::GenericMap(map) => {
                let mut keys = map.keys();
                keys.sort();
                let mut out = serializer.serialize_map(Some(keys.len()))?;
                for key in keys {
                    out.serialize_entry(&key, &map.value_by_name(&key))?;
                }
                out.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Empty,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::from(items.into_iter().map(Value::from).collect::<ValuesList>())
            }
            serde_json::Value::Object(map) => Value::from(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<ValuesMap>(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(i: $ty) -> Self {
                Value::Int(i as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32, usize);

impl From<f32> for Value {
    fn from(d: f32) -> Self {
        Value::Double(d as f64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<WString> for Value {
    fn from(s: WString) -> Self {
        Value::WString(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(Box::new(items.into_iter().map(Into::into).collect()))
    }
}

impl From<ValuesMap> for Value {
    fn from(map: ValuesMap) -> Self {
        Value::Map(Box::new(map))
    }
}

impl From<GenericList> for Value {
    fn from(list: GenericList) -> Self {
        Value::GenericList(list)
    }
}

impl From<GenericMap> for Value {
    fn from(map: GenericMap) -> Self {
        Value::GenericMap(map)
    }
}

impl From<UserCallable> for Value {
    fn from(callable: UserCallable) -> Self {
        Value::Callable(Box::new(callable))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_empty() {
        let value = Value::default();
        assert!(value.is_empty());
        assert!(!value.is_string());
        assert!(!value.is_list());
        assert!(!value.is_map());
    }

    #[test]
    fn test_size_independent_of_nesting() {
        let flat = Value::from(vec![1, 2, 3]);
        let nested = Value::from(vec![Value::from(vec![Value::from(vec![flat.clone()])])]);
        assert_eq!(std::mem::size_of_val(&flat), std::mem::size_of_val(&nested));
    }

    #[test]
    fn test_clone_is_deep() {
        let mut original = Value::from(vec![Value::from("a"), Value::from("b")]);
        let copy = original.clone();
        original.as_list_mut().push(Value::from("c"));
        assert_eq!(copy.as_list().len(), 2);
        assert_eq!(original.as_list().len(), 3);
    }

    #[test]
    fn test_classification_is_total() {
        let values = vec![
            Value::Empty,
            Value::from(true),
            Value::from("s"),
            Value::from(WString::from("w")),
            Value::str_view("view"),
            Value::from(7),
            Value::from(2.5),
            Value::from(vec![1]),
            Value::from(ValuesMap::new()),
            Value::from(GenericList::default()),
            Value::from(GenericMap::default()),
        ];
        for v in &values {
            let _ = (v.is_empty(), v.is_string(), v.is_wstring(), v.is_list(), v.is_map());
        }
        assert!(values[9].is_list());
        assert!(values[10].is_map());
        assert!(values[4].is_any_string());
        assert!(!values[4].is_string());
    }

    #[test]
    #[should_panic(expected = "Value holds int, not string")]
    fn test_mismatched_extraction_panics() {
        Value::from(1).as_string();
    }

    #[test]
    fn test_string_reduction() {
        assert_eq!(Value::from(WString::from("wide")).string_value().as_deref(), Some("wide"));
        assert_eq!(Value::str_view("view").string_value().as_deref(), Some("view"));
        assert_eq!(Value::from(vec![1]).string_value(), None);
    }

    #[test]
    fn test_cross_case_equality() {
        assert_eq!(Value::from("abc"), Value::str_view("abc"));
        assert_eq!(Value::from("abc"), Value::from(WString::from("abc")));
        assert_eq!(Value::from(2), Value::from(2.0));
        assert_ne!(Value::from(2), Value::from("2"));
    }

    #[test]
    fn test_from_json() {
        let value = Value::from(json!({"name": "World", "items": [1, 2.5, null]}));
        assert_eq!(value.as_map()["name"], Value::from("World"));
        let items = value.as_map()["items"].as_list();
        assert_eq!(items[0], Value::from(1));
        assert_eq!(items[1], Value::from(2.5));
        assert!(items[2].is_empty());
    }

    #[test]
    fn test_serialize_sorted_map() {
        let mut map = ValuesMap::new();
        map.insert("z".into(), Value::from(1));
        map.insert("a".into(), Value::from(WString::from("w")));
        let json = serde_json::to_string(&Value::from(map)).unwrap();
        assert_eq!(json, r#"{"a":"w","z":1}"#);
    }

    #[test]
    fn test_convert_input_skips_plain_values() {
        assert!(convert_input(&Value::from(vec![1, 2])).is_none());
        assert!(convert_input(&Value::from("text")).is_none());
        let with_unbound = Value::from(vec![Value::from(1), Value::from(GenericMap::default())]);
        let converted = convert_input(&with_unbound).unwrap();
        assert!(converted.as_list()[1].is_empty());
    }
}
