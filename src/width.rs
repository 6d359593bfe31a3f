//! Character Widths - Narrow and Wide Text
//!
//! Every compile/render algorithm is written once against [`CharWidth`] and
//! instantiated twice: [`Narrow`] (UTF-8 `String`) and [`Wide`] ([`WString`],
//! one `char` per unit).

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::env::TemplateEnv;
use crate::error::ErrorInfo;
use crate::render::RenderFault;
use crate::template::{LoadedTemplate, Template};
use crate::value::Value;

/// Runtime tag naming a width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    Narrow,
    Wide,
}

/// Wide string: a sequence of Unicode scalar values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WString(Vec<char>);

impl WString {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_chars(chars: &[char]) -> Self {
        Self(chars.to_vec())
    }

    pub fn as_chars(&self) -> &[char] {
        &self.0
    }

    pub fn push(&mut self, c: char) {
        self.0.push(c);
    }

    pub fn push_str(&mut self, s: &str) {
        self.0.extend(s.chars());
    }

    pub fn push_chars(&mut self, chars: &[char]) {
        self.0.extend_from_slice(chars);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn to_narrow(&self) -> String {
        self.0.iter().collect()
    }
}

impl Deref for WString {
    type Target = [char];

    fn deref(&self) -> &[char] {
        &self.0
    }
}

impl Borrow<[char]> for WString {
    fn borrow(&self) -> &[char] {
        &self.0
    }
}

impl From<&str> for WString {
    fn from(s: &str) -> Self {
        Self(s.chars().collect())
    }
}

impl From<String> for WString {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<&[char]> for WString {
    fn from(chars: &[char]) -> Self {
        Self::from_chars(chars)
    }
}

impl FromIterator<char> for WString {
    fn from_iter<I: IntoIterator<Item = char>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for WString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|c| fmt::Write::write_char(f, *c))
    }
}

impl Serialize for WString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_narrow())
    }
}

/// A character width: the text types a template of this width compiles from
/// and renders into, plus the width-specific dispatch points.
pub trait CharWidth: fmt::Debug + Clone + Copy + Default + PartialEq + Send + Sync + 'static {
    /// Owned text of this width.
    type Str: Clone
        + Default
        + fmt::Debug
        + fmt::Display
        + PartialEq
        + Eq
        + Send
        + Sync
        + Borrow<Self::Slice>
        + 'static;
    /// Borrowed raw buffer of this width.
    type Slice: ?Sized;

    const WIDTH: Width;

    fn from_narrow(s: &str) -> Self::Str;
    fn from_chars(chars: &[char]) -> Self::Str;
    fn to_narrow(s: &Self::Str) -> String;
    fn to_chars(s: &Self::Str) -> Vec<char>;

    fn append(target: &mut Self::Str, buf: &Self::Slice);
    fn push_str(target: &mut Self::Str, s: &str);
    fn push_chars(target: &mut Self::Str, chars: &[char]);

    /// Wraps text of this width as a string value.
    fn into_value(s: Self::Str) -> Value;

    /// Resolves a nested template of this width through the environment.
    fn load_template(
        env: &Arc<TemplateEnv>,
        name: &str,
    ) -> Result<Arc<Template<Self>>, ErrorInfo<Self>>;

    fn loaded(result: Result<Arc<Template<Self>>, ErrorInfo<Self>>) -> LoadedTemplate;

    fn fault(error: ErrorInfo<Self>) -> RenderFault;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Narrow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wide;

impl CharWidth for Narrow {
    type Str = String;
    type Slice = str;

    const WIDTH: Width = Width::Narrow;

    fn from_narrow(s: &str) -> String {
        s.to_string()
    }

    fn from_chars(chars: &[char]) -> String {
        chars.iter().collect()
    }

    fn to_narrow(s: &String) -> String {
        s.clone()
    }

    fn to_chars(s: &String) -> Vec<char> {
        s.chars().collect()
    }

    fn append(target: &mut String, buf: &str) {
        target.push_str(buf);
    }

    fn push_str(target: &mut String, s: &str) {
        target.push_str(s);
    }

    fn push_chars(target: &mut String, chars: &[char]) {
        target.extend(chars.iter());
    }

    fn into_value(s: String) -> Value {
        Value::String(s)
    }

    fn load_template(
        env: &Arc<TemplateEnv>,
        name: &str,
    ) -> Result<Arc<Template<Narrow>>, ErrorInfo<Narrow>> {
        env.load_template(name)
    }

    fn loaded(result: Result<Arc<Template<Narrow>>, ErrorInfo<Narrow>>) -> LoadedTemplate {
        LoadedTemplate::Narrow(result)
    }

    fn fault(error: ErrorInfo<Narrow>) -> RenderFault {
        RenderFault::Narrow(error)
    }
}

impl CharWidth for Wide {
    type Str = WString;
    type Slice = [char];

    const WIDTH: Width = Width::Wide;

    fn from_narrow(s: &str) -> WString {
        WString::from(s)
    }

    fn from_chars(chars: &[char]) -> WString {
        WString::from_chars(chars)
    }

    fn to_narrow(s: &WString) -> String {
        s.to_narrow()
    }

    fn to_chars(s: &WString) -> Vec<char> {
        s.as_chars().to_vec()
    }

    fn append(target: &mut WString, buf: &[char]) {
        target.push_chars(buf);
    }

    fn push_str(target: &mut WString, s: &str) {
        target.push_str(s);
    }

    fn push_chars(target: &mut WString, chars: &[char]) {
        target.push_chars(chars);
    }

    fn into_value(s: WString) -> Value {
        Value::WString(s)
    }

    fn load_template(
        env: &Arc<TemplateEnv>,
        name: &str,
    ) -> Result<Arc<Template<Wide>>, ErrorInfo<Wide>> {
        env.load_template_wide(name)
    }

    fn loaded(result: Result<Arc<Template<Wide>>, ErrorInfo<Wide>>) -> LoadedTemplate {
        LoadedTemplate::Wide(result)
    }

    fn fault(error: ErrorInfo<Wide>) -> RenderFault {
        RenderFault::Wide(error)
    }
}

/// Transcodes text between widths.
pub fn transcode<A: CharWidth, B: CharWidth>(s: &A::Str) -> B::Str {
    B::from_chars(&A::to_chars(s))
}
