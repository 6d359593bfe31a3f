//! Generic Containers - Zero-Copy Views Over Host Data
//!
//! A `GenericMap`/`GenericList` holds only a factory. Every query calls the
//! factory again and asks the returned accessor, so the view always reflects
//! the host structure as it is right now. Nothing fetched is cached.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::value::{Value, ValuesList, ValuesMap};

/// Capability interface of a host dictionary.
pub trait MapItemAccessor: Send + Sync {
    fn size(&self) -> usize;
    fn has_value(&self, name: &str) -> bool;
    /// Value stored under `name`, or `Value::Empty` when absent.
    fn value_by_name(&self, name: &str) -> Value;
    /// Keys in unspecified order.
    fn keys(&self) -> Vec<String>;
}

/// Capability interface of a host sequence.
pub trait ListItemAccessor: Send + Sync {
    fn size(&self) -> usize;
    /// Value at `index`, or `Value::Empty` when out of range.
    fn value_at(&self, index: usize) -> Value;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

type MapFactory = dyn Fn() -> Arc<dyn MapItemAccessor> + Send + Sync;
type ListFactory = dyn Fn() -> Arc<dyn ListItemAccessor> + Send + Sync;

/// Map view over a host container.
#[derive(Clone, Default)]
pub struct GenericMap {
    accessor: Option<Arc<MapFactory>>,
}

impl GenericMap {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn MapItemAccessor> + Send + Sync + 'static,
    {
        Self {
            accessor: Some(Arc::new(factory)),
        }
    }

    /// View over an accessor the host keeps alive elsewhere.
    pub fn from_accessor<A: MapItemAccessor + 'static>(accessor: Arc<A>) -> Self {
        Self::new(move || accessor.clone() as Arc<dyn MapItemAccessor>)
    }

    /// View over a shared, mutable engine-native map.
    pub fn shared(map: Arc<RwLock<ValuesMap>>) -> Self {
        Self::from_accessor(map)
    }

    pub fn is_bound(&self) -> bool {
        self.accessor.is_some()
    }

    pub fn accessor(&self) -> Option<Arc<dyn MapItemAccessor>> {
        self.accessor.as_ref().map(|factory| factory())
    }

    pub fn has_value(&self, name: &str) -> bool {
        self.accessor().is_some_and(|a| a.has_value(name))
    }

    pub fn value_by_name(&self, name: &str) -> Value {
        self.accessor()
            .map(|a| a.value_by_name(name))
            .unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.accessor().map_or(0, |a| a.size())
    }

    pub fn keys(&self) -> Vec<String> {
        self.accessor().map(|a| a.keys()).unwrap_or_default()
    }

    /// True when both views share the same factory.
    pub fn same_source(&self, other: &GenericMap) -> bool {
        match (&self.accessor, &other.accessor) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for GenericMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericMap")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// List view over a host container.
#[derive(Clone, Default)]
pub struct GenericList {
    accessor: Option<Arc<ListFactory>>,
}

impl GenericList {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn ListItemAccessor> + Send + Sync + 'static,
    {
        Self {
            accessor: Some(Arc::new(factory)),
        }
    }

    pub fn from_accessor<A: ListItemAccessor + 'static>(accessor: Arc<A>) -> Self {
        Self::new(move || accessor.clone() as Arc<dyn ListItemAccessor>)
    }

    pub fn shared(list: Arc<RwLock<ValuesList>>) -> Self {
        Self::from_accessor(list)
    }

    pub fn is_bound(&self) -> bool {
        self.accessor.is_some()
    }

    pub fn accessor(&self) -> Option<Arc<dyn ListItemAccessor>> {
        self.accessor.as_ref().map(|factory| factory())
    }

    pub fn size(&self) -> usize {
        self.accessor().map_or(0, |a| a.size())
    }

    pub fn value_at(&self, index: usize) -> Value {
        self.accessor()
            .map(|a| a.value_at(index))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.accessor().map_or(true, |a| a.is_empty())
    }

    /// Items in order; each step queries the host again.
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.size()).map(move |index| self.value_at(index))
    }

    pub fn same_source(&self, other: &GenericList) -> bool {
        match (&self.accessor, &other.accessor) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for GenericList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericList")
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl MapItemAccessor for ValuesMap {
    fn size(&self) -> usize {
        self.len()
    }

    fn has_value(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn value_by_name(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }

    fn keys(&self) -> Vec<String> {
        std::collections::HashMap::keys(self).cloned().collect()
    }
}

impl ListItemAccessor for ValuesList {
    fn size(&self) -> usize {
        self.len()
    }

    fn value_at(&self, index: usize) -> Value {
        self.get(index).cloned().unwrap_or_default()
    }
}

impl MapItemAccessor for RwLock<ValuesMap> {
    fn size(&self) -> usize {
        self.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn has_value(&self, name: &str) -> bool {
        self.read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn value_by_name(&self, name: &str) -> Value {
        MapItemAccessor::value_by_name(&*self.read().unwrap_or_else(PoisonError::into_inner), name)
    }

    fn keys(&self) -> Vec<String> {
        MapItemAccessor::keys(&*self.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ListItemAccessor for RwLock<ValuesList> {
    fn size(&self) -> usize {
        self.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn value_at(&self, index: usize) -> Value {
        ListItemAccessor::value_at(&*self.read().unwrap_or_else(PoisonError::into_inner), index)
    }
}
