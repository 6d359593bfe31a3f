//! Contract Invariant Tests
//!
//! These tests verify the guarantees callers rely on, through the public API.

use std::sync::{Arc, RwLock};

use stencil_core::{
    output_digest, ArgInfo, BindError, ErrorCode, ErrorInfo, GenericMap, LoadedTemplate,
    MapItemAccessor, Narrow, SourceLocation, Template, TemplateEnv, UserCallable, Value,
    ValuesMap, WString, Wide,
};

fn params(pairs: &[(&str, Value)]) -> ValuesMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn invariant_render_without_load_is_not_parsed() {
    let template = Template::<Narrow>::new(None);
    let mut sink = String::from("untouched");

    let err = template.render(&mut sink, &ValuesMap::new()).unwrap_err();

    assert_eq!(err.code(), ErrorCode::TemplateNotParsed);
    assert_eq!(err.location(), &SourceLocation::new("<unknown file>", 1, 1));
    assert_eq!(sink, "untouched");
}

#[test]
fn invariant_failed_load_leaves_no_render_tree() {
    let mut template = Template::<Wide>::new(None);
    let err = template.load_str("{% if %}", Some("broken.j2")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExpectedExpression);
    assert_eq!(err.location().file_name, "broken.j2");
    assert!(template.renderer().is_none());

    let mut sink = WString::new();
    let err = template.render(&mut sink, &ValuesMap::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TemplateNotParsed);
    assert!(sink.is_empty());
}

#[test]
fn invariant_reload_replaces_failed_state() {
    let mut template = Template::<Narrow>::new(None);
    assert!(template.load_str("{{ unclosed", Some("t.j2")).is_err());
    template.load_str("fixed {{ n }}", Some("t.j2")).unwrap();

    let out = template.render_as_string(&params(&[("n", Value::from(1))])).unwrap();
    assert_eq!(out, "fixed 1");
}

#[test]
fn invariant_rendering_is_deterministic() {
    let mut template = Template::<Narrow>::new(None);
    template
        .load_str(
            "{% for k, v in data %}{{ k }}={{ v }} {% endfor %}{{ data }}",
            Some("det.j2"),
        )
        .unwrap();

    let mut data = ValuesMap::new();
    for (idx, key) in ["zeta", "alpha", "mid", "beta"].iter().enumerate() {
        data.insert(key.to_string(), Value::from(idx));
    }
    let p = params(&[("data", Value::from(data))]);

    let first = template.render_digest(&p).unwrap();
    for _ in 0..10 {
        assert_eq!(template.render_digest(&p).unwrap(), first);
    }
    let out = template.render_as_string(&p).unwrap();
    assert_eq!(output_digest::<Narrow>(&out), first);
    assert!(out.starts_with("alpha=1 beta=3 mid=2 zeta=0 "));
}

#[test]
fn invariant_hello_world() {
    let mut narrow = Template::<Narrow>::new(None);
    narrow.load_str("Hello, {{ name }}!", None).unwrap();
    let mut out = String::new();
    narrow
        .render(&mut out, &params(&[("name", Value::from("World"))]))
        .unwrap();
    assert_eq!(out, "Hello, World!");

    let mut wide = Template::<Wide>::new(None);
    wide.load(WString::from("Hello, {{ name }}!"), None).unwrap();
    let out = wide
        .render_as_string(&params(&[("name", Value::from(WString::from("World")))]))
        .unwrap();
    assert_eq!(out, WString::from("Hello, World!"));
}

#[test]
fn invariant_error_conversion_is_identity_for_own_width() {
    let err: ErrorInfo<Narrow> = ErrorInfo::new(ErrorCode::UnexpectedToken, SourceLocation::new("a.j2", 4, 2))
        .with_location_descr("x ]\n--^".to_string())
        .with_extra_params(vec![Value::from("]")]);

    assert_eq!(err.convert::<Narrow>(), err);
    let wide: ErrorInfo<Wide> = err.convert();
    assert_eq!(wide.location_descr(), &WString::from("x ]\n--^"));
    assert_eq!(wide.convert::<Narrow>(), err);
}

#[test]
fn invariant_argument_binding() {
    let callable = UserCallable::new(
        vec![ArgInfo::mandatory("a"), ArgInfo::optional("b", "V")],
        |params| params.get("b").clone(),
    );

    let bound = callable.bind(vec![Value::from(1)], vec![]).unwrap();
    assert_eq!(bound.get("a"), &Value::from(1));
    assert_eq!(bound.get("b"), &Value::from("V"));
    assert!(bound.params_parsed);

    let err = callable.bind(vec![], vec![("b".into(), Value::from(2))]).unwrap_err();
    assert_eq!(err, BindError::MissingMandatoryArgument("a".into()));
}

#[test]
fn invariant_generic_map_reflects_host_mutation() {
    let host = Arc::new(RwLock::new(ValuesMap::new()));
    host.write().unwrap().insert("count".into(), Value::from(1));

    let mut template = Template::<Narrow>::new(None);
    template.load_str("{{ state.count }}", Some("live.j2")).unwrap();
    let p = params(&[("state", Value::from(GenericMap::shared(Arc::clone(&host))))]);

    assert_eq!(template.render_as_string(&p).unwrap(), "1");
    host.write().unwrap().insert("count".into(), Value::from(2));
    assert_eq!(template.render_as_string(&p).unwrap(), "2");
}

#[test]
fn invariant_nested_load_by_non_string_value() {
    let mut env = TemplateEnv::new();
    env.add_source("part.j2", "part");
    let mut template = Template::<Narrow>::new(Some(Arc::new(env)));
    template.load_str("{% include names %}", Some("host.j2")).unwrap();

    let names = Value::from(vec!["part.j2"]);
    match template.load_template_value(&names) {
        LoadedTemplate::Narrow(Err(err)) => {
            assert_eq!(err.code(), ErrorCode::InvalidTemplateName);
            assert_eq!(err.extra_params(), &[names.clone()]);
        }
        other => panic!("unexpected load result {other:?}"),
    }

    let err = template
        .render_as_string(&params(&[("names", names.clone())]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidTemplateName);
    assert_eq!(err.extra_params(), &[names]);
    assert_eq!(err.location(), &SourceLocation::new("host.j2", 1, 1));
}

#[test]
fn invariant_include_crosses_widths() {
    let mut env = TemplateEnv::new();
    env.add_global("site", "stencil");
    env.add_wide_source("badge.j2", "[{{ label }} ✓ {{ site }}]");
    env.add_source("page.j2", "<{% include 'badge.j2' %}>");
    let env = Arc::new(env);

    let page = env.load_template("page.j2").unwrap();
    assert!(matches!(page.load_template("badge.j2"), LoadedTemplate::Wide(Ok(_))));

    let out = page
        .render_as_string(&params(&[("label", Value::from("ok"))]))
        .unwrap();
    assert_eq!(out, "<[ok ✓ stencil]>");
}

#[test]
fn invariant_nested_fault_is_converted_to_host_width() {
    let mut env = TemplateEnv::new();
    env.add_wide_source("bad.j2", "{{ 1 | nope }}");
    let env = Arc::new(env);

    let mut host = Template::<Narrow>::new(Some(Arc::clone(&env)));
    host.load_str("{% include 'bad.j2' %}", Some("host.j2")).unwrap();
    let err = host.render_as_string(&ValuesMap::new()).unwrap_err();

    assert_eq!(err.code(), ErrorCode::UnknownFilter);
    assert_eq!(err.location(), &SourceLocation::new("bad.j2", 1, 1));
    assert_eq!(err.extra_params(), &[Value::from("nope")]);

    let err = host.load_template("missing.j2");
    assert!(matches!(err, LoadedTemplate::Narrow(Err(ref e)) if e.code() == ErrorCode::TemplateNotFound));
}

#[test]
fn invariant_call_site_params_shadow_env_globals() {
    let mut env = TemplateEnv::new();
    env.add_global("who", "global");
    env.add_global("only_global", "g");
    let mut template = Template::<Narrow>::new(Some(Arc::new(env)));
    template.load_str("{{ who }}/{{ only_global }}", None).unwrap();

    let out = template
        .render_as_string(&params(&[("who", Value::from("local"))]))
        .unwrap();
    assert_eq!(out, "local/g");
}

#[test]
fn invariant_unbound_generic_values_render_empty() {
    let mut template = Template::<Narrow>::new(None);
    template.load_str("[{{ view }}]", None).unwrap();
    let out = template
        .render_as_string(&params(&[("view", Value::from(GenericMap::default()))]))
        .unwrap();
    assert_eq!(out, "[]");
}

struct FailingAccessor;

impl MapItemAccessor for FailingAccessor {
    fn size(&self) -> usize {
        1
    }

    fn has_value(&self, _name: &str) -> bool {
        true
    }

    fn value_by_name(&self, name: &str) -> Value {
        panic!("host map lost entry {name}")
    }

    fn keys(&self) -> Vec<String> {
        vec!["a".into()]
    }
}

#[test]
fn invariant_host_panic_becomes_unexpected_exception() {
    let mut template = Template::<Narrow>::new(None);
    template.load_str("before {{ m.a }}", Some("host.j2")).unwrap();
    let p = params(&[("m", Value::from(GenericMap::from_accessor(Arc::new(FailingAccessor))))]);

    let mut out = String::new();
    let err = template.render(&mut out, &p).unwrap_err();

    assert_eq!(err.code(), ErrorCode::UnexpectedException);
    assert_eq!(err.location(), &SourceLocation::new("host.j2", 1, 1));
    assert_eq!(err.extra_params(), &[Value::from("host map lost entry a")]);
    assert_eq!(out, "before ");
}

#[test]
fn invariant_recursive_include_is_a_fault() {
    let mut env = TemplateEnv::new();
    env.add_source("self.j2", "{% include 'self.j2' %}");
    env.add_source("ping.j2", "ping {% include 'pong.j2' %}");
    env.add_wide_source("pong.j2", "pong {% include 'ping.j2' %}");
    let env = Arc::new(env);

    let err = env
        .load_template("self.j2")
        .unwrap()
        .render_as_string(&ValuesMap::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IncludeDepthExceeded);
    assert_eq!(err.location().file_name, "self.j2");

    let err = env
        .load_template("ping.j2")
        .unwrap()
        .render_as_string(&ValuesMap::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IncludeDepthExceeded);
    assert_eq!(err.extra_params().len(), 1);
}

#[test]
fn invariant_bounded_include_depth_renders() {
    let mut env = TemplateEnv::new();
    env.add_source("outer.j2", "<{% include 'middle.j2' %}>");
    env.add_source("middle.j2", "[{% set shade = 'dark' %}{% include 'inner.j2' %}]");
    env.add_source("inner.j2", "{{ shade }} {{ who }}");
    let env = Arc::new(env);

    let out = env
        .load_template("outer.j2")
        .unwrap()
        .render_as_string(&params(&[("who", Value::from("world"))]))
        .unwrap();
    assert_eq!(out, "<[dark world]>");
}
