//! Rendering Runtime - Output Streams, Context, Faults
//!
//! Render-tree nodes write through an `OutStream` and read variables from a
//! `RenderContext`. Anything that goes wrong while rendering is a
//! `RenderFault`, threaded back with `?` to the template's render boundary.

use std::any::Any;
use std::borrow::Cow;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorCode, ErrorInfo};
use crate::generic::{GenericMap, MapItemAccessor};
use crate::template::LoadedTemplate;
use crate::value::{Value, ValuesList, ValuesMap};
use crate::width::{CharWidth, Narrow, Wide};

/// A fault raised while rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderFault {
    Narrow(ErrorInfo<Narrow>),
    Wide(ErrorInfo<Wide>),
    /// Anything that is not a structured error.
    Unexpected(String),
}

impl fmt::Display for RenderFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderFault::Narrow(e) => e.fmt(f),
            RenderFault::Wide(e) => e.fmt(f),
            RenderFault::Unexpected(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for RenderFault {}

pub type RenderResult<T = ()> = Result<T, RenderFault>;

/// Nested includes deeper than this fail with `IncludeDepthExceeded`.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic during render".to_string())
}

/// Sink behind an `OutStream`.
pub trait StreamWriter<W: CharWidth> {
    /// Appends already encoded text.
    fn write_buffer(&mut self, buf: &W::Slice);
    /// Appends the rendered form of `value`.
    fn write_value(&mut self, value: &Value);
}

/// Writer appending to a text buffer of the template's width.
pub struct StringStreamWriter<'a, W: CharWidth> {
    target: &'a mut W::Str,
}

impl<'a, W: CharWidth> StringStreamWriter<'a, W> {
    pub fn new(target: &'a mut W::Str) -> Self {
        Self { target }
    }
}

impl<W: CharWidth> StreamWriter<W> for StringStreamWriter<'_, W> {
    fn write_buffer(&mut self, buf: &W::Slice) {
        W::append(self.target, buf);
    }

    fn write_value(&mut self, value: &Value) {
        render_value::<W>(value, self.target);
    }
}

pub struct OutStream<'a, W: CharWidth> {
    writer: Box<dyn StreamWriter<W> + 'a>,
}

impl<'a, W: CharWidth> OutStream<'a, W> {
    pub fn new(writer: impl StreamWriter<W> + 'a) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    pub fn on_string(target: &'a mut W::Str) -> Self {
        Self::new(StringStreamWriter::new(target))
    }

    pub fn write_buffer(&mut self, buf: &W::Slice) {
        self.writer.write_buffer(buf);
    }

    pub fn write_value(&mut self, value: &Value) {
        self.writer.write_value(value);
    }
}

/// Appends the text form of `value` to `out`.
///
/// Scalars render bare; inside lists and maps strings are single-quoted and
/// map entries are ordered by key.
pub fn render_value<W: CharWidth>(value: &Value, out: &mut W::Str) {
    match value {
        Value::Empty | Value::Callable(_) => {}
        Value::Bool(b) => W::push_str(out, if *b { "true" } else { "false" }),
        Value::String(s) => W::push_str(out, s),
        Value::StrView(s) => W::push_str(out, s),
        Value::WString(s) => W::push_chars(out, s.as_chars()),
        Value::WStrView(s) => W::push_chars(out, s),
        Value::Int(i) => W::push_str(out, &i.to_string()),
        Value::Double(d) => W::push_str(out, &d.to_string()),
        Value::List(items) => render_sequence::<W>(items.iter().cloned(), out),
        Value::GenericList(list) => render_sequence::<W>(list.iter(), out),
        Value::Map(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            render_entries::<W>(keys.into_iter().map(|k| {
                let v = map[&k].clone();
                (k, v)
            }), out);
        }
        Value::GenericMap(map) => {
            let mut keys = map.keys();
            keys.sort();
            render_entries::<W>(keys.into_iter().map(|k| {
                let v = map.value_by_name(&k);
                (k, v)
            }), out);
        }
    }
}

fn render_item<W: CharWidth>(value: &Value, out: &mut W::Str) {
    if value.is_any_string() {
        W::push_str(out, "'");
        render_value::<W>(value, out);
        W::push_str(out, "'");
    } else {
        render_value::<W>(value, out);
    }
}

fn render_sequence<W: CharWidth>(items: impl Iterator<Item = Value>, out: &mut W::Str) {
    W::push_str(out, "[");
    for (idx, item) in items.enumerate() {
        if idx > 0 {
            W::push_str(out, ", ");
        }
        render_item::<W>(&item, out);
    }
    W::push_str(out, "]");
}

fn render_entries<W: CharWidth>(entries: impl Iterator<Item = (String, Value)>, out: &mut W::Str) {
    W::push_str(out, "{");
    for (idx, (key, value)) in entries.enumerate() {
        if idx > 0 {
            W::push_str(out, ", ");
        }
        W::push_str(out, "'");
        W::push_str(out, &key);
        W::push_str(out, "': ");
        render_item::<W>(&value, out);
    }
    W::push_str(out, "}");
}

/// Services the render tree needs from the template it belongs to.
pub trait RendererCallback<W: CharWidth> {
    /// Rendered text of `value` in the template's width.
    fn as_target_string(&self, value: &Value) -> W::Str;
    /// Stream appending to `target`, which is emptied first.
    fn stream_on_string<'s>(&self, target: &'s mut W::Str) -> OutStream<'s, W>;
    fn load_template(&self, file_name: &str) -> LoadedTemplate;
    /// Like `load_template`, for a name that must reduce to a string.
    fn load_template_value(&self, file_name: &Value) -> LoadedTemplate;
    fn runtime_error(&self, code: ErrorCode, extra_params: ValuesList) -> RenderFault;
}

/// One layer of named variables.
pub type Scope<'a> = HashMap<String, Cow<'a, Value>>;

/// Per-render variable scopes plus the template callback.
///
/// Base layers, outermost first: builtin globals, environment globals,
/// call-site parameters. Statement scopes are pushed above them; lookups go
/// innermost first.
pub struct RenderContext<'a, W: CharWidth> {
    scopes: Vec<Scope<'a>>,
    base_layers: usize,
    callback: &'a dyn RendererCallback<W>,
    depth: usize,
    base_view: OnceCell<Arc<ValuesMap>>,
}

impl<'a, W: CharWidth> RenderContext<'a, W> {
    pub fn new(
        builtins: Scope<'a>,
        env_globals: Scope<'a>,
        params: Scope<'a>,
        callback: &'a dyn RendererCallback<W>,
    ) -> Self {
        Self {
            scopes: vec![builtins, env_globals, params, Scope::new()],
            base_layers: 3,
            callback,
            depth: 0,
            base_view: OnceCell::new(),
        }
    }

    /// Marks this context as rendering an include nested `depth` levels deep.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn callback(&self) -> &'a dyn RendererCallback<W> {
        self.callback
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(|value| &**value)
    }

    /// Binds `name` in the innermost scope.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), Cow::Owned(value));
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > self.base_layers + 1 {
            self.scopes.pop();
        }
    }

    /// Environment globals and call-site parameters, merged. Base layers never
    /// change during a render, so this is collected once and shared.
    pub fn base_view(&self) -> Arc<ValuesMap> {
        let view = self.base_view.get_or_init(|| {
            let mut visible = ValuesMap::new();
            for scope in &self.scopes[1..self.base_layers] {
                for (name, value) in scope {
                    visible.insert(name.clone(), (**value).clone());
                }
            }
            Arc::new(visible)
        });
        Arc::clone(view)
    }

    /// Statement-level bindings, inner ones winning.
    pub fn locals(&self) -> ValuesMap {
        let mut visible = ValuesMap::new();
        for scope in &self.scopes[self.base_layers..] {
            for (name, value) in scope {
                visible.insert(name.clone(), (**value).clone());
            }
        }
        visible
    }

    /// Every visible variable except builtins, as a map view for host
    /// callables. Only local bindings are copied per call.
    pub fn context_view(&self) -> Value {
        let view = ScopeView {
            base: self.base_view(),
            locals: self.locals(),
        };
        Value::from(GenericMap::from_accessor(Arc::new(view)))
    }
}

struct ScopeView {
    base: Arc<ValuesMap>,
    locals: ValuesMap,
}

impl MapItemAccessor for ScopeView {
    fn size(&self) -> usize {
        self.keys().len()
    }

    fn has_value(&self, name: &str) -> bool {
        self.locals.contains_key(name) || self.base.contains_key(name)
    }

    fn value_by_name(&self, name: &str) -> Value {
        self.locals
            .get(name)
            .or_else(|| self.base.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.locals.keys().cloned().collect();
        keys.extend(
            self.base
                .keys()
                .filter(|key| !self.locals.contains_key(*key))
                .cloned(),
        );
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::width::WString;
    use std::sync::RwLock;

    fn narrow(value: &Value) -> String {
        let mut out = String::new();
        render_value::<Narrow>(value, &mut out);
        out
    }

    #[test]
    fn test_render_scalars() {
        assert_eq!(narrow(&Value::Empty), "");
        assert_eq!(narrow(&Value::from(true)), "true");
        assert_eq!(narrow(&Value::from(42)), "42");
        assert_eq!(narrow(&Value::from(2.5)), "2.5");
        assert_eq!(narrow(&Value::from(WString::from("wide"))), "wide");
    }

    #[test]
    fn test_render_containers() {
        let list = Value::from(vec![Value::from(1), Value::from("a")]);
        assert_eq!(narrow(&list), "[1, 'a']");

        let mut map = ValuesMap::new();
        map.insert("b".into(), Value::from(2));
        map.insert("a".into(), Value::from("x"));
        assert_eq!(narrow(&Value::from(map.clone())), "{'a': 'x', 'b': 2}");

        let generic = GenericMap::shared(Arc::new(RwLock::new(map)));
        assert_eq!(narrow(&Value::from(generic)), "{'a': 'x', 'b': 2}");
    }

    #[test]
    fn test_render_into_wide() {
        let mut out = WString::new();
        render_value::<Wide>(&Value::from("grüße"), &mut out);
        assert_eq!(out.to_narrow(), "grüße");
    }

    struct NoCallback;

    impl RendererCallback<Narrow> for NoCallback {
        fn as_target_string(&self, value: &Value) -> String {
            let mut out = String::new();
            render_value::<Narrow>(value, &mut out);
            out
        }

        fn stream_on_string<'s>(&self, target: &'s mut String) -> OutStream<'s, Narrow> {
            OutStream::on_string(target)
        }

        fn load_template(&self, _file_name: &str) -> LoadedTemplate {
            LoadedTemplate::NoEnvironment
        }

        fn load_template_value(&self, _file_name: &Value) -> LoadedTemplate {
            LoadedTemplate::NoEnvironment
        }

        fn runtime_error(&self, code: ErrorCode, _extra_params: ValuesList) -> RenderFault {
            RenderFault::Unexpected(code.to_string())
        }
    }

    #[test]
    fn test_context_view_layers_locals_over_params() {
        let params: ValuesMap = [("x".to_string(), Value::from(1)), ("y".to_string(), Value::from(2))]
            .into_iter()
            .collect();
        let mut scope = Scope::new();
        for (name, value) in &params {
            scope.insert(name.clone(), Cow::Borrowed(value));
        }
        let callback = NoCallback;
        let mut ctx = RenderContext::<Narrow>::new(Scope::new(), Scope::new(), scope, &callback);
        ctx.push_scope();
        ctx.set("x", Value::from("local"));

        let view = ctx.context_view();
        let Value::GenericMap(map) = &view else {
            panic!("expected a map view, got {view:?}");
        };
        assert_eq!(map.value_by_name("x"), Value::from("local"));
        assert_eq!(map.value_by_name("y"), Value::from(2));
        assert_eq!(map.size(), 2);
        assert!(Arc::ptr_eq(&ctx.base_view(), &ctx.base_view()));

        ctx.pop_scope();
        assert!(ctx.locals().is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 1");
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), "panic during render");
    }

    #[test]
    fn test_out_stream_write_paths() {
        let mut target = String::new();
        {
            let mut stream = OutStream::<Narrow>::on_string(&mut target);
            stream.write_buffer("n = ");
            stream.write_value(&Value::from(5));
        }
        assert_eq!(target, "n = 5");
    }
}
