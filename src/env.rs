//! Template Environment - Settings, Globals, Sources
//!
//! The environment owns everything templates share: effective settings,
//! global parameters visible to every render, and the named sources nested
//! loads resolve against. Loaded templates are compiled on demand and not
//! cached.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::error::{ErrorCode, ErrorInfo, SourceLocation};
use crate::settings::Settings;
use crate::template::Template;
use crate::value::{Value, ValuesMap};
use crate::width::{CharWidth, Narrow, WString, Wide, Width};

const TEMPLATE_EXTENSIONS: [&str; 2] = ["j2", "j2tpl"];

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Registered source text, kept in the width it was supplied in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSource {
    Narrow(String),
    Wide(WString),
}

impl TemplateSource {
    fn width(&self) -> Width {
        match self {
            TemplateSource::Narrow(_) => Width::Narrow,
            TemplateSource::Wide(_) => Width::Wide,
        }
    }

    fn text<W: CharWidth>(&self) -> W::Str {
        match self {
            TemplateSource::Narrow(text) => W::from_narrow(text),
            TemplateSource::Wide(text) => W::from_chars(text.as_chars()),
        }
    }
}

#[derive(Debug, Default)]
pub struct TemplateEnv {
    settings: Settings,
    globals: ValuesMap,
    sources: HashMap<String, TemplateSource>,
}

impl TemplateEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Registers every `*.j2` / `*.j2tpl` file of `dir` under its file name.
    pub fn load_from_dir(dir: &Path, settings: Settings) -> Result<Self, EnvError> {
        let mut env = Self::with_settings(settings);
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                let is_template = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| TEMPLATE_EXTENSIONS.contains(&e));
                if !is_template {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    let source = fs::read_to_string(&path)?;
                    env.add_source(name, source);
                }
            }
        }
        debug!(dir = %dir.display(), sources = env.sources.len(), "loaded template sources");
        Ok(env)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn globals(&self) -> &ValuesMap {
        &self.globals
    }

    /// Hands the global parameters to `visitor`.
    pub fn apply_globals<'s, F>(&'s self, visitor: F)
    where
        F: FnOnce(&'s ValuesMap),
    {
        visitor(&self.globals)
    }

    pub fn add_source(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.sources
            .insert(name.into(), TemplateSource::Narrow(source.into()));
    }

    /// Registers a wide source; nested loads of it resolve to a wide template.
    pub fn add_wide_source(&mut self, name: impl Into<String>, source: impl Into<WString>) {
        self.sources
            .insert(name.into(), TemplateSource::Wide(source.into()));
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Width `name` was registered in, `None` when unknown.
    pub fn source_width(&self, name: &str) -> Option<Width> {
        self.sources.get(name).map(TemplateSource::width)
    }

    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn load_template(self: &Arc<Self>, name: &str) -> Result<Arc<Template<Narrow>>, ErrorInfo<Narrow>> {
        self.load(name)
    }

    pub fn load_template_wide(self: &Arc<Self>, name: &str) -> Result<Arc<Template<Wide>>, ErrorInfo<Wide>> {
        self.load(name)
    }

    fn load<W: CharWidth>(self: &Arc<Self>, name: &str) -> Result<Arc<Template<W>>, ErrorInfo<W>> {
        trace!(template = name, width = ?W::WIDTH, "loading template from environment");
        let source = self.sources.get(name).ok_or_else(|| {
            ErrorInfo::new(ErrorCode::TemplateNotFound, SourceLocation::runtime(name))
                .with_extra_params(vec![Value::from(name)])
        })?;

        let mut template = Template::new(Some(Arc::clone(self)));
        template.load(source.text::<W>(), Some(name))?;
        Ok(Arc::new(template))
    }
}
