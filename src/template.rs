//! Template - Compile and Render Front End
//!
//! `Template<W>` owns a compiled render tree for source text of width `W`.
//! `render` is the single boundary where render faults of either width, and
//! anything unstructured, become the caller's `ErrorInfo<W>`.

use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::env::TemplateEnv;
use crate::error::{ErrorCode, ErrorInfo, SourceLocation, UNKNOWN_FILE};
use crate::globals;
use crate::hashing;
use crate::nodes::RenderTree;
use crate::parser;
use crate::render::{
    panic_message, render_value, OutStream, RenderContext, RenderFault, RendererCallback, Scope,
};
use crate::settings::Settings;
use crate::value::{convert_input, Value, ValuesList, ValuesMap};
use crate::width::{CharWidth, Narrow, Wide, Width};

/// Outcome of a nested load, tagged with the width it resolved to.
#[derive(Debug)]
pub enum LoadedTemplate {
    /// The requesting template was created without an environment.
    NoEnvironment,
    Narrow(Result<Arc<Template<Narrow>>, ErrorInfo<Narrow>>),
    Wide(Result<Arc<Template<Wide>>, ErrorInfo<Wide>>),
}

impl LoadedTemplate {
    pub fn width(&self) -> Option<Width> {
        match self {
            LoadedTemplate::NoEnvironment => None,
            LoadedTemplate::Narrow(_) => Some(Width::Narrow),
            LoadedTemplate::Wide(_) => Some(Width::Wide),
        }
    }
}

#[derive(Debug)]
pub struct Template<W: CharWidth> {
    env: Option<Arc<TemplateEnv>>,
    settings: Settings,
    source: W::Str,
    name: String,
    renderer: Option<RenderTree<W>>,
}

impl<W: CharWidth> Template<W> {
    /// An empty template. Settings come from `env` when one is given.
    pub fn new(env: Option<Arc<TemplateEnv>>) -> Self {
        let settings = env
            .as_ref()
            .map(|env| env.settings().clone())
            .unwrap_or_default();
        let name = settings.default_template_name.clone();
        Self {
            env,
            settings,
            source: W::Str::default(),
            name,
            renderer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &W::Str {
        &self.source
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn env(&self) -> Option<&Arc<TemplateEnv>> {
        self.env.as_ref()
    }

    pub fn renderer(&self) -> Option<&RenderTree<W>> {
        self.renderer.as_ref()
    }

    /// Compiles `source`, replacing whatever this template held before. On
    /// failure no render tree remains and the first parse error is returned.
    pub fn load(&mut self, source: W::Str, name: Option<&str>) -> Result<(), ErrorInfo<W>> {
        let name = name
            .filter(|name| !name.is_empty())
            .map_or_else(|| self.settings.default_template_name.clone(), str::to_string);
        self.renderer = None;
        self.source = W::Str::default();

        match parser::parse::<W>(&source, &self.settings, &name) {
            Ok(tree) => {
                debug!(template = %name, width = ?W::WIDTH, "template compiled");
                self.source = source;
                self.renderer = Some(tree);
                self.name = name;
                Ok(())
            }
            Err(errors) => {
                let first = errors.into_iter().next().unwrap_or_else(|| {
                    ErrorInfo::new(ErrorCode::Unspecified, SourceLocation::runtime(name.as_str()))
                });
                debug!(template = %name, code = ?first.code(), "template failed to compile");
                self.name = name;
                Err(first)
            }
        }
    }

    pub fn load_str(&mut self, source: &str, name: Option<&str>) -> Result<(), ErrorInfo<W>> {
        self.load(W::from_narrow(source), name)
    }

    /// Appends the rendered output to `out`. Output written before a fault
    /// stays in `out`.
    pub fn render(&self, out: &mut W::Str, params: &ValuesMap) -> Result<(), ErrorInfo<W>> {
        self.render_layers(out, &[params], 0)
    }

    /// Renders with parameters merged from `layers` (later layers win), as an
    /// include nested `depth` levels below the outermost render.
    pub(crate) fn render_layers(
        &self,
        out: &mut W::Str,
        layers: &[&ValuesMap],
        depth: usize,
    ) -> Result<(), ErrorInfo<W>> {
        let Some(renderer) = &self.renderer else {
            return Err(ErrorInfo::new(
                ErrorCode::TemplateNotParsed,
                SourceLocation::runtime(UNKNOWN_FILE),
            ));
        };
        debug!(template = %self.name, depth, "rendering template");

        let mut call_params = Scope::new();
        for params in layers {
            convert_params(params, &mut call_params);
        }
        let mut env_globals = Scope::new();
        if let Some(env) = &self.env {
            env.apply_globals(|globals| convert_params(globals, &mut env_globals));
        }
        let mut builtins = Scope::new();
        convert_params(globals::builtin_globals(), &mut builtins);

        let callback = TemplateCallback { host: self };
        let mut ctx =
            RenderContext::new(builtins, env_globals, call_params, &callback).with_depth(depth);
        let mut stream = OutStream::on_string(out);

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&mut stream, &mut ctx)))
                .unwrap_or_else(|payload| Err(RenderFault::Unexpected(panic_message(&*payload))));

        match outcome {
            Ok(()) => Ok(()),
            Err(fault) => {
                let err = match fault {
                    RenderFault::Narrow(err) => err.convert::<W>(),
                    RenderFault::Wide(err) => err.convert::<W>(),
                    RenderFault::Unexpected(message) => {
                        ErrorInfo::new(ErrorCode::UnexpectedException, SourceLocation::runtime(self.name.as_str()))
                            .with_extra_params(vec![Value::from(message)])
                    }
                };
                warn!(template = %self.name, error = %err, "render failed");
                Err(err)
            }
        }
    }

    pub fn render_as_string(&self, params: &ValuesMap) -> Result<W::Str, ErrorInfo<W>> {
        let mut out = W::Str::default();
        self.render(&mut out, params)?;
        Ok(out)
    }

    /// SHA-256 of the rendered output.
    pub fn render_digest(&self, params: &ValuesMap) -> Result<String, ErrorInfo<W>> {
        let out = self.render_as_string(params)?;
        Ok(hashing::output_digest::<W>(&out))
    }

    /// Resolves `file_name` through the environment, in the width the
    /// environment holds that source in.
    pub fn load_template(&self, file_name: &str) -> LoadedTemplate {
        let Some(env) = &self.env else {
            return LoadedTemplate::NoEnvironment;
        };
        trace!(template = %self.name, nested = file_name, "nested template load");
        match env.source_width(file_name) {
            Some(Width::Narrow) => LoadedTemplate::Narrow(env.load_template(file_name)),
            Some(Width::Wide) => LoadedTemplate::Wide(env.load_template_wide(file_name)),
            None => W::loaded(W::load_template(env, file_name)),
        }
    }

    pub fn load_template_value(&self, file_name: &Value) -> LoadedTemplate {
        match file_name.string_value() {
            Some(name) => self.load_template(&name),
            None => W::loaded(Err(ErrorInfo::new(
                ErrorCode::InvalidTemplateName,
                SourceLocation::runtime(self.name.as_str()),
            )
            .with_extra_params(vec![file_name.clone()]))),
        }
    }

    /// A render fault of this template's width at this template's file.
    pub fn runtime_error(&self, code: ErrorCode, extra_params: ValuesList) -> RenderFault {
        W::fault(ErrorInfo::new(code, SourceLocation::runtime(self.name.as_str())).with_extra_params(extra_params))
    }
}

/// Borrows every parameter unless conversion has to substitute it.
fn convert_params<'a>(params: &'a ValuesMap, scope: &mut Scope<'a>) {
    for (name, value) in params {
        let value = match convert_input(value) {
            Some(converted) => Cow::Owned(converted),
            None => Cow::Borrowed(value),
        };
        scope.insert(name.clone(), value);
    }
}

struct TemplateCallback<'t, W: CharWidth> {
    host: &'t Template<W>,
}

impl<W: CharWidth> RendererCallback<W> for TemplateCallback<'_, W> {
    fn as_target_string(&self, value: &Value) -> W::Str {
        let mut out = W::Str::default();
        render_value::<W>(value, &mut out);
        out
    }

    fn stream_on_string<'s>(&self, target: &'s mut W::Str) -> OutStream<'s, W> {
        *target = W::Str::default();
        OutStream::on_string(target)
    }

    fn load_template(&self, file_name: &str) -> LoadedTemplate {
        self.host.load_template(file_name)
    }

    fn load_template_value(&self, file_name: &Value) -> LoadedTemplate {
        self.host.load_template_value(file_name)
    }

    fn runtime_error(&self, code: ErrorCode, extra_params: ValuesList) -> RenderFault {
        self.host.runtime_error(code, extra_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{ArgInfo, UserCallable};
    use crate::width::WString;

    fn params(pairs: &[(&str, Value)]) -> ValuesMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn render(source: &str, params: &ValuesMap) -> Result<String, ErrorInfo<Narrow>> {
        let mut template = Template::<Narrow>::new(None);
        template.load_str(source, Some("test.j2"))?;
        template.render_as_string(params)
    }

    #[test]
    fn test_hello_world() {
        let out = render("Hello, {{ name }}!", &params(&[("name", Value::from("World"))])).unwrap();
        assert_eq!(out, "Hello, World!");
    }

    #[test]
    fn test_statements() {
        let source = "{% for item in items %}{{ loop.index }}:{{ item | upper }}{% if not loop.last %}, {% endif %}{% endfor %}";
        let items = Value::from(vec!["a", "b"]);
        assert_eq!(render(source, &params(&[("items", items)])).unwrap(), "1:A, 2:B");

        let source = "{% set total = 0 %}{% for n in range(4) %}{% set total = total + n %}{% endfor %}{{ total }}";
        assert_eq!(render(source, &ValuesMap::new()).unwrap(), "0");

        let source = "{% for k, v in {'b': 2, 'a': 1} %}{{ k }}={{ v }};{% else %}empty{% endfor %}";
        assert_eq!(render(source, &ValuesMap::new()).unwrap(), "a=1;b=2;");
        assert_eq!(render("{% for x in [] %}x{% else %}empty{% endfor %}", &ValuesMap::new()).unwrap(), "empty");
    }

    #[test]
    fn test_expressions() {
        let empty = ValuesMap::new();
        assert_eq!(render("{{ 7 // 2 }} {{ 7 % 3 }} {{ 1 / 2 }}", &empty).unwrap(), "3 1 0.5");
        assert_eq!(render("{{ 'a' ~ 1 ~ none }}", &empty).unwrap(), "a1");
        assert_eq!(render("{{ 2 in [1, 2] and 'x' not in 'abc' }}", &empty).unwrap(), "true");
        assert_eq!(render("{{ missing or 'fallback' }}", &empty).unwrap(), "fallback");
        assert_eq!(render("{{ dict(a=1).a }}", &empty).unwrap(), "1");
        assert_eq!(render("{{ {'a': {'b': 1}}.a.b }}", &empty).unwrap(), "1");
    }

    #[test]
    fn test_integer_overflow_does_not_panic() {
        let empty = ValuesMap::new();
        assert_eq!(
            render("{{ (-9223372036854775807 - 1) // -1 }}", &empty).unwrap(),
            "9223372036854775808"
        );

        let p = params(&[("x", Value::from(i64::MIN))]);
        assert_eq!(render("{{ x % -1 }}", &p).unwrap(), "0");
        assert_eq!(render("{{ -x }}", &p).unwrap(), "9223372036854775808");
    }

    #[test]
    fn test_empty_name_falls_back_to_default() {
        let mut template = Template::<Narrow>::new(None);
        template.load_str("x", Some("")).unwrap();
        assert_eq!(template.name(), crate::settings::DEFAULT_TEMPLATE_NAME);
    }

    #[test]
    fn test_callable_context_sees_params_and_locals() {
        let lookup = UserCallable::new(vec![ArgInfo::mandatory("name")], |params| {
            let Value::GenericMap(scope) = &params.context else {
                return Value::from("no scope");
            };
            let name = params.get("name").string_value().unwrap_or_default();
            scope.value_by_name(&name)
        });
        let p = params(&[("lookup", Value::from(lookup)), ("greeting", Value::from("hi"))]);
        let out = render(
            "{% for x in [1, 2] %}{{ lookup('greeting') }}{{ lookup('x') }} {% endfor %}",
            &p,
        )
        .unwrap();
        assert_eq!(out, "hi1 hi2 ");
    }

    #[test]
    fn test_user_callable() {
        let greet = UserCallable::new(
            vec![ArgInfo::mandatory("who"), ArgInfo::optional("punct", "!")],
            |params| {
                let who = params.get("who").string_value().unwrap_or_default();
                let punct = params.get("punct").string_value().unwrap_or_default();
                Value::from(format!("hi {who}{punct}"))
            },
        );
        let p = params(&[("greet", Value::from(greet))]);
        assert_eq!(render("{{ greet('bob') }}", &p).unwrap(), "hi bob!");
        assert_eq!(render("{{ 'ann' | greet(punct='?') }}", &p).unwrap(), "hi ann?");

        let err = render("{{ greet() }}", &p).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingMandatoryArgument);
        assert_eq!(err.location(), &SourceLocation::new("test.j2", 1, 1));
        assert_eq!(err.extra_params(), &[Value::from("who")]);
    }

    #[test]
    fn test_panicking_callable_is_unexpected_exception() {
        let broken = UserCallable::new(vec![], |_| Value::Empty.as_list().clone().into());
        let err = render("before {{ broken() }}", &params(&[("broken", Value::from(broken))])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnexpectedException);
        assert_eq!(err.extra_params(), &[Value::from("Value holds empty, not list")]);
    }

    #[test]
    fn test_runtime_faults() {
        let empty = ValuesMap::new();
        assert_eq!(render("{{ 1 / 0 }}", &empty).unwrap_err().code(), ErrorCode::InvalidValueType);
        assert_eq!(render("{{ 'a' - 1 }}", &empty).unwrap_err().code(), ErrorCode::InvalidValueType);
        assert_eq!(render("{{ 1 | nope }}", &empty).unwrap_err().code(), ErrorCode::UnknownFilter);
        assert_eq!(render("{{ 3() }}", &empty).unwrap_err().code(), ErrorCode::InvalidValueType);

        let err = render("{% include 'other.j2' %}", &empty).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TemplateEnvAbsent);
        assert_eq!(err.extra_params(), &[Value::from("other.j2")]);
    }

    #[test]
    fn test_render_appends_and_keeps_partial_output() {
        let mut template = Template::<Narrow>::new(None);
        template.load_str("ok {{ 1 | nope }}", None).unwrap();
        assert_eq!(template.name(), crate::settings::DEFAULT_TEMPLATE_NAME);

        let mut out = String::from(">");
        let err = template.render(&mut out, &ValuesMap::new()).unwrap_err();
        assert_eq!(out, ">ok ");
        assert_eq!(err.location().file_name, crate::settings::DEFAULT_TEMPLATE_NAME);
    }

    #[test]
    fn test_wide_template() {
        let mut template = Template::<Wide>::new(None);
        template.load(WString::from("{{ word | upper }} ✓"), Some("wide.j2")).unwrap();
        let out = template
            .render_as_string(&params(&[("word", Value::from("straße"))]))
            .unwrap();
        assert_eq!(out.to_narrow(), "STRASSE ✓");
    }

    #[test]
    fn test_callback_services() {
        let mut template = Template::<Narrow>::new(None);
        template.load_str("x", Some("cb.j2")).unwrap();
        let callback = TemplateCallback { host: &template };

        assert_eq!(callback.as_target_string(&Value::from(vec![1, 2])), "[1, 2]");

        let mut target = String::from("stale");
        {
            let mut stream = callback.stream_on_string(&mut target);
            stream.write_value(&Value::from(3));
        }
        assert_eq!(target, "3");

        assert!(matches!(callback.load_template("a.j2"), LoadedTemplate::NoEnvironment));
        match callback.runtime_error(ErrorCode::FileNotFound, vec![]) {
            RenderFault::Narrow(err) => assert_eq!(err.location(), &SourceLocation::runtime("cb.j2")),
            other => panic!("unexpected fault {other:?}"),
        }
    }
}
