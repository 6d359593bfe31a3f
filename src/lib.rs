//! Stencil Core - Dual-Width Template Engine
//!
//! Jinja-style templates compiled once and rendered many times, over narrow
//! (UTF-8) or wide (one `char` per unit) text.
//!
//! # Guarantees
//! 1. Rendering without a successful load fails with `TemplateNotParsed` and
//!    writes nothing
//! 2. Identical source and parameters render identical output
//! 3. Every render fault reaches the caller as an `ErrorInfo` of the
//!    template's own width
//! 4. Host values are borrowed, not copied, unless they need conversion

pub mod callable;
pub mod env;
pub mod error;
pub mod expr;
pub mod generic;
pub mod globals;
pub mod hashing;
pub mod lexer;
pub mod nodes;
pub mod parser;
pub mod render;
pub mod settings;
pub mod template;
pub mod value;
pub mod width;

pub use callable::{ArgInfo, ArgInfoT, BindError, UserCallable, UserCallableParams};
pub use env::{EnvError, TemplateEnv};
pub use error::{ErrorCode, ErrorInfo, SourceLocation};
pub use generic::{GenericList, GenericMap, ListItemAccessor, MapItemAccessor};
pub use hashing::{canonical_json, output_digest, render_job_hash};
pub use render::{OutStream, RenderFault, RendererCallback, StreamWriter};
pub use settings::Settings;
pub use template::{LoadedTemplate, Template};
pub use value::{convert_input, Value, ValuesList, ValuesMap};
pub use width::{transcode, CharWidth, Narrow, WString, Wide, Width};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub type NarrowTemplate = Template<Narrow>;
pub type WideTemplate = Template<Wide>;
pub type ErrorInfoW = ErrorInfo<Wide>;
