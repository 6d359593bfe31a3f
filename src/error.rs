//! Structured Errors - Code, Location, Diagnostics
//!
//! `ErrorInfo<W>` is the only error a template hands back to its caller.
//! Its location description is text of the template's width; everything
//! else is width independent, which is what makes `convert` lossless.

use std::fmt;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use thiserror::Error;

use crate::width::{transcode, CharWidth};
use crate::value::{Value, ValuesList};

pub const UNKNOWN_FILE: &str = "<unknown file>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[error("unspecified error")]
    Unspecified,
    #[error("unexpected exception")]
    UnexpectedException,
    #[error("file not found")]
    FileNotFound,
    #[error("template environment is absent")]
    TemplateEnvAbsent,
    #[error("template not found")]
    TemplateNotFound,
    #[error("template not parsed")]
    TemplateNotParsed,
    #[error("invalid template name")]
    InvalidTemplateName,
    #[error("invalid value type")]
    InvalidValueType,
    #[error("missing mandatory argument")]
    MissingMandatoryArgument,
    #[error("unknown filter")]
    UnknownFilter,
    #[error("include depth exceeded")]
    IncludeDepthExceeded,
    #[error("expected identifier")]
    ExpectedIdentifier,
    #[error("expected string literal")]
    ExpectedStringLiteral,
    #[error("expected expression")]
    ExpectedExpression,
    #[error("expected token")]
    ExpectedToken,
    #[error("expected end of statement")]
    ExpectedEndOfStatement,
    #[error("unexpected token")]
    UnexpectedToken,
    #[error("unexpected statement")]
    UnexpectedStatement,
    #[error("unexpected end of expression block")]
    UnexpectedExprEnd,
    #[error("unexpected end of statement block")]
    UnexpectedStmtEnd,
    #[error("unexpected end of comment block")]
    UnexpectedCommentEnd,
    #[error("unexpected end of template")]
    UnexpectedEndOfInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file_name: String,
    pub line: usize,
    pub col: usize,
}

impl SourceLocation {
    pub fn new(file_name: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            file_name: file_name.into(),
            line,
            col,
        }
    }

    /// Runtime faults carry no evaluation-site position, only the file.
    pub fn runtime(file_name: impl Into<String>) -> Self {
        Self::new(file_name, 1, 1)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_name, self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo<W: CharWidth> {
    pub code: ErrorCode,
    pub src_loc: SourceLocation,
    pub location_descr: W::Str,
    pub extra_params: ValuesList,
}

impl<W: CharWidth> ErrorInfo<W> {
    pub fn new(code: ErrorCode, src_loc: SourceLocation) -> Self {
        Self {
            code,
            src_loc,
            location_descr: W::Str::default(),
            extra_params: ValuesList::new(),
        }
    }

    pub fn with_extra_params(mut self, extra_params: ValuesList) -> Self {
        self.extra_params = extra_params;
        self
    }

    pub fn with_location_descr(mut self, descr: W::Str) -> Self {
        self.location_descr = descr;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn location(&self) -> &SourceLocation {
        &self.src_loc
    }

    pub fn location_descr(&self) -> &W::Str {
        &self.location_descr
    }

    pub fn extra_params(&self) -> &[Value] {
        &self.extra_params
    }

    /// The structurally equal error in width `T`.
    pub fn convert<T: CharWidth>(&self) -> ErrorInfo<T> {
        ErrorInfo {
            code: self.code,
            src_loc: self.src_loc.clone(),
            location_descr: transcode::<W, T>(&self.location_descr),
            extra_params: self.extra_params.clone(),
        }
    }

    /// Human-readable report: headline, location description, diagnostics.
    pub fn to_report(&self) -> String {
        let mut report = self.to_string();
        let descr = W::to_narrow(&self.location_descr);
        if !descr.is_empty() {
            report.push('\n');
            report.push_str(&descr);
        }
        for param in &self.extra_params {
            report.push_str("\n  - ");
            report.push_str(&param.string_value().unwrap_or_else(|| format!("{param:?}")));
        }
        report
    }
}

impl<W: CharWidth> fmt::Display for ErrorInfo<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: error: {}", self.src_loc, self.code)
    }
}

impl<W: CharWidth> std::error::Error for ErrorInfo<W> {}

impl<W: CharWidth> Serialize for ErrorInfo<W> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("ErrorInfo", 5)?;
        out.serialize_field("code", &self.code)?;
        out.serialize_field("message", &self.code.to_string())?;
        out.serialize_field("location", &self.src_loc)?;
        out.serialize_field("locationDescr", &W::to_narrow(&self.location_descr))?;
        out.serialize_field("extraParams", &self.extra_params)?;
        out.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::width::{Narrow, Wide, WString};

    fn sample() -> ErrorInfo<Wide> {
        ErrorInfo::new(ErrorCode::ExpectedIdentifier, SourceLocation::new("page.j2", 3, 7))
            .with_location_descr(WString::from("{{ for }}\n---^"))
            .with_extra_params(vec![Value::from("for")])
    }

    #[test]
    fn test_convert_keeps_structure() {
        let wide = sample();
        let narrow: ErrorInfo<Narrow> = wide.convert();
        assert_eq!(narrow.code(), ErrorCode::ExpectedIdentifier);
        assert_eq!(narrow.location(), wide.location());
        assert_eq!(narrow.location_descr(), "{{ for }}\n---^");
        assert_eq!(narrow.extra_params(), wide.extra_params());
    }

    #[test]
    fn test_convert_round_trip_is_identity() {
        let wide = sample();
        assert_eq!(wide.convert::<Wide>(), wide);
        assert_eq!(wide.convert::<Narrow>().convert::<Wide>(), wide);
    }

    #[test]
    fn test_display() {
        let err: ErrorInfo<Narrow> =
            ErrorInfo::new(ErrorCode::TemplateNotParsed, SourceLocation::runtime(UNKNOWN_FILE));
        assert_eq!(err.to_string(), "<unknown file>:1:1: error: template not parsed");
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["code"], "expected_identifier");
        assert_eq!(json["location"]["line"], 3);
        assert_eq!(json["extraParams"][0], "for");
    }
}
