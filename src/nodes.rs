//! Render Tree - Compiled Template Nodes
//!
//! Produced by the parser, executed by `Template::render`. The tree is never
//! mutated while rendering, so one compiled template serves any number of
//! renders.

use std::borrow::Borrow;
use std::sync::Arc;

use crate::error::{ErrorCode, ErrorInfo};
use crate::expr::Expr;
use crate::render::{OutStream, RenderContext, RenderResult, MAX_INCLUDE_DEPTH};
use crate::template::{LoadedTemplate, Template};
use crate::value::{Value, ValuesList, ValuesMap};
use crate::width::{transcode, CharWidth, Narrow, Wide};

#[derive(Debug)]
pub struct RenderTree<W: CharWidth> {
    nodes: Vec<Node<W>>,
}

impl<W: CharWidth> RenderTree<W> {
    pub fn new(nodes: Vec<Node<W>>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node<W>] {
        &self.nodes
    }

    pub fn render(&self, out: &mut OutStream<'_, W>, ctx: &mut RenderContext<'_, W>) -> RenderResult {
        render_nodes(&self.nodes, out, ctx)
    }
}

#[derive(Debug)]
pub enum Node<W: CharWidth> {
    Text(W::Str),
    Expr(Expr),
    If {
        branches: Vec<(Expr, Vec<Node<W>>)>,
        otherwise: Vec<Node<W>>,
    },
    For {
        targets: Vec<String>,
        iterable: Expr,
        body: Vec<Node<W>>,
        otherwise: Vec<Node<W>>,
    },
    Set {
        name: String,
        value: Expr,
    },
    Include {
        name: Expr,
    },
}

fn render_nodes<W: CharWidth>(
    nodes: &[Node<W>],
    out: &mut OutStream<'_, W>,
    ctx: &mut RenderContext<'_, W>,
) -> RenderResult {
    nodes.iter().try_for_each(|node| node.render(out, ctx))
}

impl<W: CharWidth> Node<W> {
    fn render(&self, out: &mut OutStream<'_, W>, ctx: &mut RenderContext<'_, W>) -> RenderResult {
        match self {
            Node::Text(text) => {
                out.write_buffer(Borrow::<W::Slice>::borrow(text));
                Ok(())
            }
            Node::Expr(expr) => {
                let value = expr.eval(ctx)?;
                out.write_value(&value);
                Ok(())
            }
            Node::If { branches, otherwise } => {
                for (condition, body) in branches {
                    if condition.eval(ctx)?.is_truthy() {
                        return render_nodes(body, out, ctx);
                    }
                }
                render_nodes(otherwise, out, ctx)
            }
            Node::For {
                targets,
                iterable,
                body,
                otherwise,
            } => {
                let iterable = iterable.eval(ctx)?;
                let items = loop_items(&iterable, targets.len() > 1).ok_or_else(|| {
                    ctx.callback()
                        .runtime_error(ErrorCode::InvalidValueType, vec![Value::from(iterable.kind())])
                })?;
                if items.is_empty() {
                    return render_nodes(otherwise, out, ctx);
                }
                ctx.push_scope();
                let result = render_iterations(targets, items, body, out, ctx);
                ctx.pop_scope();
                result
            }
            Node::Set { name, value } => {
                let value = value.eval(ctx)?;
                ctx.set(name.clone(), value);
                Ok(())
            }
            Node::Include { name } => {
                let name = name.eval(ctx)?;
                let callback = ctx.callback();
                if ctx.depth() >= MAX_INCLUDE_DEPTH {
                    return Err(callback.runtime_error(ErrorCode::IncludeDepthExceeded, vec![name]));
                }
                match callback.load_template_value(&name) {
                    LoadedTemplate::NoEnvironment => {
                        Err(callback.runtime_error(ErrorCode::TemplateEnvAbsent, vec![name]))
                    }
                    LoadedTemplate::Narrow(loaded) => render_included::<W, Narrow>(loaded, out, ctx),
                    LoadedTemplate::Wide(loaded) => render_included::<W, Wide>(loaded, out, ctx),
                }
            }
        }
    }
}

/// Items a `for` statement walks. Map entries come ordered by key, as the
/// key alone or as a `[key, value]` pair when the loop unpacks.
fn loop_items(iterable: &Value, unpack: bool) -> Option<ValuesList> {
    let entry = |key: String, value: Value| {
        if unpack {
            Value::from(vec![Value::from(key), value])
        } else {
            Value::from(key)
        }
    };
    let items = match iterable {
        Value::Empty => ValuesList::new(),
        Value::List(items) => (**items).clone(),
        Value::GenericList(list) => list.iter().collect(),
        Value::Map(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            keys.into_iter()
                .map(|key| {
                    let value = map[&key].clone();
                    entry(key, value)
                })
                .collect()
        }
        Value::GenericMap(map) => {
            let mut keys = map.keys();
            keys.sort();
            keys.into_iter()
                .map(|key| {
                    let value = map.value_by_name(&key);
                    entry(key, value)
                })
                .collect()
        }
        other => other
            .string_value()?
            .chars()
            .map(|c| Value::from(c.to_string()))
            .collect(),
    };
    Some(items)
}

fn render_iterations<W: CharWidth>(
    targets: &[String],
    items: ValuesList,
    body: &[Node<W>],
    out: &mut OutStream<'_, W>,
    ctx: &mut RenderContext<'_, W>,
) -> RenderResult {
    let length = items.len();
    for (idx, item) in items.into_iter().enumerate() {
        match targets {
            [single] => ctx.set(single.clone(), item),
            _ => {
                let parts = item.get_list().cloned().unwrap_or_default();
                for (pos, target) in targets.iter().enumerate() {
                    ctx.set(target.clone(), parts.get(pos).cloned().unwrap_or_default());
                }
            }
        }

        let mut info = ValuesMap::new();
        info.insert("index".into(), Value::from(idx + 1));
        info.insert("index0".into(), Value::from(idx));
        info.insert("first".into(), Value::from(idx == 0));
        info.insert("last".into(), Value::from(idx + 1 == length));
        info.insert("length".into(), Value::from(length));
        ctx.set("loop", Value::from(info));

        render_nodes(body, out, ctx)?;
    }
    Ok(())
}

/// Renders a nested template of width `N` into a `W` stream, one level
/// deeper than `ctx`.
fn render_included<W: CharWidth, N: CharWidth>(
    loaded: Result<Arc<Template<N>>, ErrorInfo<N>>,
    out: &mut OutStream<'_, W>,
    ctx: &RenderContext<'_, W>,
) -> RenderResult {
    let template = loaded.map_err(N::fault)?;
    let base = ctx.base_view();
    let locals = ctx.locals();
    let mut text = N::Str::default();
    template
        .render_layers(&mut text, &[&*base, &locals], ctx.depth() + 1)
        .map_err(N::fault)?;
    let text = transcode::<N, W>(&text);
    out.write_buffer(Borrow::<W::Slice>::borrow(&text));
    Ok(())
}
