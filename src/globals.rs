//! Builtin Globals and Filters
//!
//! Both are plain `UserCallable`s, built once and shared by every render.
//! Globals sit in the outermost scope, beneath environment globals and
//! call-site parameters. Filters are consulted only when no callable of the
//! same name is in scope.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::callable::{ArgInfo, UserCallable, UserCallableParams};
use crate::render::render_value;
use crate::value::{Value, ValuesList, ValuesMap};
use crate::width::Narrow;

static GLOBALS: OnceLock<ValuesMap> = OnceLock::new();
static FILTERS: OnceLock<HashMap<&'static str, UserCallable>> = OnceLock::new();

pub fn builtin_globals() -> &'static ValuesMap {
    GLOBALS.get_or_init(|| {
        let mut globals = ValuesMap::new();
        globals.insert(
            "range".into(),
            Value::from(UserCallable::new(
                vec![
                    ArgInfo::mandatory("start"),
                    ArgInfo::optional("stop", Value::Empty),
                    ArgInfo::optional("step", 1),
                ],
                range,
            )),
        );
        globals.insert(
            "dict".into(),
            Value::from(UserCallable::new(vec![], |params| params.extra_kw_args.clone())),
        );
        globals
    })
}

pub fn builtin_filter(name: &str) -> Option<&'static UserCallable> {
    FILTERS.get_or_init(build_filters).get(name)
}

fn build_filters() -> HashMap<&'static str, UserCallable> {
    let unary = |f: fn(&Value) -> Value| {
        UserCallable::new(vec![ArgInfo::mandatory("value")], move |params| f(params.get("value")))
    };

    let mut filters = HashMap::new();
    filters.insert("upper", unary(|v| map_text(v, |s| s.to_uppercase())));
    filters.insert("lower", unary(|v| map_text(v, |s| s.to_lowercase())));
    filters.insert(
        "length",
        unary(|v| Value::from(v.len().unwrap_or(0))),
    );
    filters.insert("first", unary(|v| pick(v, true)));
    filters.insert("last", unary(|v| pick(v, false)));
    filters.insert(
        "join",
        UserCallable::new(
            vec![ArgInfo::mandatory("value"), ArgInfo::optional("d", "")],
            join,
        ),
    );
    filters.insert(
        "default",
        UserCallable::new(
            vec![
                ArgInfo::mandatory("value"),
                ArgInfo::optional("default_value", ""),
            ],
            |params| match params.get("value") {
                Value::Empty => params.get("default_value").clone(),
                value => value.clone(),
            },
        ),
    );
    filters
}

fn range(params: &UserCallableParams) -> Value {
    let first = params.get("start").get_int().unwrap_or(0);
    let (start, stop) = match params.get("stop").get_int() {
        Some(stop) => (first, stop),
        None => (0, first),
    };
    let step = params.get("step").get_int().unwrap_or(1);

    let mut items = ValuesList::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Value::from(items)
}

fn map_text(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value.string_value() {
        Some(text) => Value::from(f(&text)),
        None => value.clone(),
    }
}

fn sequence(value: &Value) -> Option<ValuesList> {
    match value {
        Value::List(items) => Some((**items).clone()),
        Value::GenericList(list) => Some(list.iter().collect()),
        _ => None,
    }
}

fn pick(value: &Value, first: bool) -> Value {
    if let Some(items) = sequence(value) {
        let item = if first { items.first() } else { items.last() };
        return item.cloned().unwrap_or_default();
    }
    let Some(text) = value.string_value() else {
        return Value::Empty;
    };
    let c = if first { text.chars().next() } else { text.chars().last() };
    c.map(|c| Value::from(c.to_string())).unwrap_or_default()
}

fn join(params: &UserCallableParams) -> Value {
    let Some(items) = sequence(params.get("value")) else {
        return params.get("value").clone();
    };
    let separator = params.get("d").string_value().unwrap_or_default();
    let mut out = String::new();
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(&separator);
        }
        render_value::<Narrow>(item, &mut out);
    }
    Value::from(out)
}
