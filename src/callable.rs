//! User Callables - Host Functions Invoked From Templates
//!
//! A callable declares its parameters as an ordered `ArgInfo` list. The
//! engine binds call-site arguments against that list before invoking:
//!
//! 1. named arguments match by name;
//! 2. positional arguments fill the remaining parameters in declaration order;
//! 3. leftovers go to the overflow buckets, never dropped;
//! 4. unfilled optional parameters take their default;
//! 5. an unfilled mandatory parameter fails the call.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use thiserror::Error;

use crate::value::{Value, ValuesList, ValuesMap};

pub type CallableFn = dyn Fn(&UserCallableParams) -> Value + Send + Sync;

/// Declaration of one callable parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgInfo {
    pub name: String,
    pub mandatory: bool,
    pub default: Value,
}

impl ArgInfo {
    pub fn new(name: impl Into<String>, mandatory: bool, default: Value) -> Self {
        Self {
            name: name.into(),
            mandatory,
            default,
        }
    }

    pub fn mandatory(name: impl Into<String>) -> Self {
        Self::new(name, true, Value::Empty)
    }

    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self::new(name, false, default.into())
    }
}

/// `ArgInfo` tagged with the host type the callable expects.
pub struct ArgInfoT<T> {
    info: ArgInfo,
    _expected: PhantomData<fn() -> T>,
}

impl<T> ArgInfoT<T> {
    pub fn new(name: impl Into<String>, mandatory: bool, default: Value) -> Self {
        Self {
            info: ArgInfo::new(name, mandatory, default),
            _expected: PhantomData,
        }
    }

    pub fn expected_type(&self) -> &'static str {
        type_name::<T>()
    }

    pub fn into_info(self) -> ArgInfo {
        self.info
    }
}

impl<T> Deref for ArgInfoT<T> {
    type Target = ArgInfo;

    fn deref(&self) -> &ArgInfo {
        &self.info
    }
}

impl<T> From<ArgInfo> for ArgInfoT<T> {
    fn from(info: ArgInfo) -> Self {
        Self {
            info,
            _expected: PhantomData,
        }
    }
}

impl<T> From<ArgInfoT<T>> for ArgInfo {
    fn from(typed: ArgInfoT<T>) -> Self {
        typed.info
    }
}

impl<T> Clone for ArgInfoT<T> {
    fn clone(&self) -> Self {
        Self::from(self.info.clone())
    }
}

impl<T> fmt::Debug for ArgInfoT<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgInfoT")
            .field("info", &self.info)
            .field("expected", &self.expected_type())
            .finish()
    }
}

/// Arguments as seen by the host function.
#[derive(Debug, Clone, Default)]
pub struct UserCallableParams {
    /// Declared parameters, matched or defaulted.
    pub args: ValuesMap,
    /// Positional arguments beyond the declared ones (a list).
    pub extra_pos_args: Value,
    /// Named arguments matching no declared parameter (a map).
    pub extra_kw_args: Value,
    /// Variables visible at the call site (a map).
    pub context: Value,
    pub params_parsed: bool,
}

static EMPTY: Value = Value::Empty;

impl UserCallableParams {
    /// Bound value of `name`, `Value::Empty` if the callable declares no such
    /// parameter.
    pub fn get(&self, name: &str) -> &Value {
        self.args.get(name).unwrap_or(&EMPTY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("missing mandatory argument '{0}'")]
    MissingMandatoryArgument(String),
}

#[derive(Clone)]
pub struct UserCallable {
    pub callable: Arc<CallableFn>,
    pub args_info: Vec<ArgInfo>,
}

impl UserCallable {
    pub fn new<F>(args_info: Vec<ArgInfo>, callable: F) -> Self
    where
        F: Fn(&UserCallableParams) -> Value + Send + Sync + 'static,
    {
        Self {
            callable: Arc::new(callable),
            args_info,
        }
    }

    /// Binds call-site arguments against `args_info`.
    pub fn bind(
        &self,
        positional: ValuesList,
        named: Vec<(String, Value)>,
    ) -> Result<UserCallableParams, BindError> {
        let mut matched = vec![false; self.args_info.len()];
        let mut args = ValuesMap::new();
        let mut extra_kw = ValuesMap::new();

        for (name, value) in named {
            match self.args_info.iter().position(|info| info.name == name) {
                Some(idx) if !matched[idx] => {
                    matched[idx] = true;
                    args.insert(name, value);
                }
                _ => {
                    extra_kw.insert(name, value);
                }
            }
        }

        let mut positional = positional.into_iter();
        for (idx, info) in self.args_info.iter().enumerate() {
            if matched[idx] {
                continue;
            }
            let Some(value) = positional.next() else {
                break;
            };
            matched[idx] = true;
            args.insert(info.name.clone(), value);
        }
        let extra_pos: ValuesList = positional.collect();

        for (idx, info) in self.args_info.iter().enumerate() {
            if matched[idx] {
                continue;
            }
            if info.mandatory {
                return Err(BindError::MissingMandatoryArgument(info.name.clone()));
            }
            args.insert(info.name.clone(), info.default.clone());
        }

        Ok(UserCallableParams {
            args,
            extra_pos_args: Value::from(extra_pos),
            extra_kw_args: Value::from(extra_kw),
            context: Value::Empty,
            params_parsed: true,
        })
    }

    pub fn invoke(&self, params: &UserCallableParams) -> Value {
        (self.callable)(params)
    }

    pub fn same_function(&self, other: &UserCallable) -> bool {
        Arc::ptr_eq(&self.callable, &other.callable)
    }
}

impl fmt::Debug for UserCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.args_info.iter().map(|a| a.name.as_str()).collect();
        f.debug_struct("UserCallable").field("args", &names).finish()
    }
}
