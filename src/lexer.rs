//! Lexer - Template Segmentation and Expression Tokens
//!
//! Works on a `char` view of the source so both widths share it. Positions
//! are char offsets into the whole template.

use std::fmt;

use crate::error::ErrorCode;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Expr,
    Stmt,
    Comment,
}

impl TagKind {
    fn close(self) -> char {
        match self {
            TagKind::Expr => '}',
            TagKind::Stmt => '%',
            TagKind::Comment => '#',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, already whitespace-adjusted.
    Text { start: usize, end: usize },
    /// Inner content of a tag, delimiters and trim markers excluded.
    Tag { kind: TagKind, start: usize, end: usize },
}

#[derive(Debug, Clone, Copy)]
struct RawTag {
    kind: TagKind,
    open: usize,
    content_start: usize,
    content_end: usize,
    close_end: usize,
    trim_before: bool,
    trim_after: bool,
    keep_indent: bool,
}

/// Lexing failure: code plus char offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexError {
    pub code: ErrorCode,
    pub pos: usize,
}

/// Splits template source into text and tag segments, applying `-`/`+`
/// markers and the `trim_blocks`/`lstrip_blocks` settings.
pub fn segment(chars: &[char], settings: &Settings) -> Result<Vec<Segment>, LexError> {
    let tags = scan_tags(chars)?;
    let mut segments = Vec::with_capacity(tags.len() * 2 + 1);
    let mut text_start = 0;

    for (idx, tag) in tags.iter().enumerate() {
        let mut start = text_start;
        let mut end = tag.open;

        if idx > 0 {
            let prev = &tags[idx - 1];
            if prev.trim_after {
                start = skip_whitespace(chars, start, end);
            } else if settings.trim_blocks && prev.kind != TagKind::Expr {
                start = skip_newline(chars, start, end);
            }
        }
        if tag.trim_before {
            end = trim_whitespace_end(chars, start, end);
        } else if settings.lstrip_blocks && tag.kind != TagKind::Expr && !tag.keep_indent {
            end = strip_indent(chars, start, end);
        }
        if start < end {
            segments.push(Segment::Text { start, end });
        }
        if tag.kind != TagKind::Comment {
            segments.push(Segment::Tag {
                kind: tag.kind,
                start: tag.content_start,
                end: tag.content_end,
            });
        }
        text_start = tag.close_end;
    }

    let mut start = text_start;
    if let Some(last) = tags.last() {
        if last.trim_after {
            start = skip_whitespace(chars, start, chars.len());
        } else if settings.trim_blocks && last.kind != TagKind::Expr {
            start = skip_newline(chars, start, chars.len());
        }
    }
    if start < chars.len() {
        segments.push(Segment::Text { start, end: chars.len() });
    }
    Ok(segments)
}

fn scan_tags(chars: &[char]) -> Result<Vec<RawTag>, LexError> {
    let mut tags = vec![];
    let mut pos = 0;

    while pos + 1 < chars.len() {
        let kind = match (chars[pos], chars[pos + 1]) {
            ('{', '{') => TagKind::Expr,
            ('{', '%') => TagKind::Stmt,
            ('{', '#') => TagKind::Comment,
            (c, '}') if c == '}' || c == '%' || c == '#' => {
                let code = match c {
                    '}' => ErrorCode::UnexpectedExprEnd,
                    '%' => ErrorCode::UnexpectedStmtEnd,
                    _ => ErrorCode::UnexpectedCommentEnd,
                };
                return Err(LexError { code, pos });
            }
            _ => {
                pos += 1;
                continue;
            }
        };
        let open = pos;
        let mut content_start = pos + 2;
        let marker = chars.get(content_start).copied();
        let trim_before = marker == Some('-');
        let keep_indent = marker == Some('+');
        if trim_before || keep_indent {
            content_start += 1;
        }

        let close = find_close(chars, kind, content_start).ok_or(LexError {
            code: ErrorCode::UnexpectedEndOfInput,
            pos: open,
        })?;
        let trim_after = close > content_start && chars[close - 1] == '-';
        let content_end = if trim_after { close - 1 } else { close };

        tags.push(RawTag {
            kind,
            open,
            content_start,
            content_end,
            close_end: close + 2,
            trim_before,
            trim_after,
            keep_indent,
        });
        pos = close + 2;
    }
    Ok(tags)
}

/// Offset of the closing delimiter, skipping quoted strings inside
/// expression and statement tags. In expression tags a `}}` closing a map
/// literal does not end the tag.
fn find_close(chars: &[char], kind: TagKind, from: usize) -> Option<usize> {
    let mut pos = from;
    let mut quote: Option<char> = None;
    let mut braces = 0usize;
    while pos + 1 < chars.len() {
        let c = chars[pos];
        match quote {
            Some(_) if c == '\\' => {
                pos += 2;
                continue;
            }
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if kind != TagKind::Comment && (c == '"' || c == '\'') => quote = Some(c),
            None if kind == TagKind::Expr && c == '{' => braces += 1,
            None if kind == TagKind::Expr && c == '}' && braces > 0 => braces -= 1,
            None if c == kind.close() && chars[pos + 1] == '}' => return Some(pos),
            None => {}
        }
        pos += 1;
    }
    None
}

fn skip_whitespace(chars: &[char], mut start: usize, end: usize) -> usize {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    start
}

fn skip_newline(chars: &[char], start: usize, end: usize) -> usize {
    match chars.get(start..end) {
        Some(['\r', '\n', ..]) => start + 2,
        Some(['\n', ..]) => start + 1,
        _ => start,
    }
}

fn trim_whitespace_end(chars: &[char], start: usize, mut end: usize) -> usize {
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    end
}

/// Drops spaces/tabs between the last newline and the tag, but only when
/// nothing else precedes the tag on its line.
fn strip_indent(chars: &[char], start: usize, end: usize) -> usize {
    let mut cut = end;
    while cut > start && matches!(chars[cut - 1], ' ' | '\t') {
        cut -= 1;
    }
    if cut == start || chars[cut - 1] == '\n' {
        cut
    } else {
        end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Pipe,
    Tilde,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Assign,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

impl Token {
    pub fn is_keyword(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(name) if name == word)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            TokenKind::Ident(name) => return f.write_str(name),
            TokenKind::Str(text) => return write!(f, "'{text}'"),
            TokenKind::Int(i) => return write!(f, "{i}"),
            TokenKind::Float(d) => return write!(f, "{d}"),
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Pipe => "|",
            TokenKind::Tilde => "~",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::SlashSlash => "//",
            TokenKind::Percent => "%",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::End => "<end of block>",
        };
        f.write_str(symbol)
    }
}

/// Tokenizes `chars[start..end]`; the result always ends with `End`.
pub fn tokenize(chars: &[char], start: usize, end: usize) -> Result<Vec<Token>, LexError> {
    let mut tokens = vec![];
    let mut pos = start;

    while pos < end {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        let token_start = pos;
        let next = if pos + 1 < end { Some(chars[pos + 1]) } else { None };

        let kind = if c.is_alphabetic() || c == '_' {
            while pos < end && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            TokenKind::Ident(chars[token_start..pos].iter().collect())
        } else if c.is_ascii_digit() {
            let (kind, after) = lex_number(chars, pos, end)?;
            pos = after;
            kind
        } else if c == '"' || c == '\'' {
            let (text, after) = lex_string(chars, pos, end)?;
            pos = after;
            TokenKind::Str(text)
        } else {
            let (kind, width) = match (c, next) {
                ('/', Some('/')) => (TokenKind::SlashSlash, 2),
                ('=', Some('=')) => (TokenKind::Eq, 2),
                ('!', Some('=')) => (TokenKind::NotEq, 2),
                ('<', Some('=')) => (TokenKind::Le, 2),
                ('>', Some('=')) => (TokenKind::Ge, 2),
                ('(', _) => (TokenKind::LParen, 1),
                (')', _) => (TokenKind::RParen, 1),
                ('[', _) => (TokenKind::LBracket, 1),
                (']', _) => (TokenKind::RBracket, 1),
                ('{', _) => (TokenKind::LBrace, 1),
                ('}', _) => (TokenKind::RBrace, 1),
                (',', _) => (TokenKind::Comma, 1),
                (':', _) => (TokenKind::Colon, 1),
                ('.', _) => (TokenKind::Dot, 1),
                ('|', _) => (TokenKind::Pipe, 1),
                ('~', _) => (TokenKind::Tilde, 1),
                ('+', _) => (TokenKind::Plus, 1),
                ('-', _) => (TokenKind::Minus, 1),
                ('*', _) => (TokenKind::Star, 1),
                ('/', _) => (TokenKind::Slash, 1),
                ('%', _) => (TokenKind::Percent, 1),
                ('=', _) => (TokenKind::Assign, 1),
                ('<', _) => (TokenKind::Lt, 1),
                ('>', _) => (TokenKind::Gt, 1),
                _ => {
                    return Err(LexError {
                        code: ErrorCode::UnexpectedToken,
                        pos,
                    })
                }
            };
            pos += width;
            kind
        };
        tokens.push(Token {
            kind,
            pos: token_start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::End,
        pos: end,
    });
    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize, end: usize) -> Result<(TokenKind, usize), LexError> {
    let mut pos = start;
    while pos < end && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    let is_float = pos + 1 < end && chars[pos] == '.' && chars[pos + 1].is_ascii_digit();
    if is_float {
        pos += 1;
        while pos < end && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    let text: String = chars[start..pos].iter().collect();
    let invalid = LexError {
        code: ErrorCode::UnexpectedToken,
        pos: start,
    };
    let kind = if is_float {
        TokenKind::Float(text.parse().map_err(|_| invalid)?)
    } else {
        TokenKind::Int(text.parse().map_err(|_| invalid)?)
    };
    Ok((kind, pos))
}

fn lex_string(chars: &[char], start: usize, end: usize) -> Result<(String, usize), LexError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut pos = start + 1;
    while pos < end {
        match chars[pos] {
            c if c == quote => return Ok((text, pos + 1)),
            '\\' if pos + 1 < end => {
                text.push(match chars[pos + 1] {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                pos += 2;
            }
            c => {
                text.push(c);
                pos += 1;
            }
        }
    }
    Err(LexError {
        code: ErrorCode::ExpectedStringLiteral,
        pos: start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn texts(source: &str, settings: &Settings) -> Vec<String> {
        let chars = chars(source);
        segment(&chars, settings)
            .unwrap()
            .into_iter()
            .map(|seg| match seg {
                Segment::Text { start, end } => chars[start..end].iter().collect(),
                Segment::Tag { start, end, .. } => {
                    format!("<{}>", chars[start..end].iter().collect::<String>().trim())
                }
            })
            .collect()
    }

    #[test]
    fn test_segments() {
        let parts = texts("Hello, {{ name }}!{# note #}", &Settings::default());
        assert_eq!(parts, vec!["Hello, ", "<name>", "!"]);
    }

    #[test]
    fn test_trim_markers() {
        let parts = texts("a  {{- x -}}  b", &Settings::default());
        assert_eq!(parts, vec!["a", "<x>", "b"]);
    }

    #[test]
    fn test_trim_and_lstrip_blocks() {
        let settings = Settings {
            trim_blocks: true,
            lstrip_blocks: true,
            ..Settings::default()
        };
        let parts = texts("x\n    {% if a %}\nbody\n{% endif %}\n", &settings);
        assert_eq!(parts, vec!["x\n", "<if a>", "body\n", "<endif>"]);
    }

    #[test]
    fn test_close_inside_string_is_ignored() {
        let parts = texts("{{ '}}' }}", &Settings::default());
        assert_eq!(parts, vec!["<'}}'>"]);
    }

    #[test]
    fn test_nested_map_literal_keeps_tag_open() {
        let parts = texts("{{ {'a': {'b': 1}} }}!", &Settings::default());
        assert_eq!(parts, vec!["<{'a': {'b': 1}}>", "!"]);
    }

    #[test]
    fn test_unterminated_tag() {
        let err = segment(&chars("ab {{ name"), &Settings::default()).unwrap_err();
        assert_eq!(err, LexError { code: ErrorCode::UnexpectedEndOfInput, pos: 3 });
    }

    #[test]
    fn test_stray_closing_delimiters() {
        let settings = Settings::default();
        let err = segment(&chars("a }} b"), &settings).unwrap_err();
        assert_eq!(err, LexError { code: ErrorCode::UnexpectedExprEnd, pos: 2 });
        let err = segment(&chars("{{ x }} %}"), &settings).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedStmtEnd);
        let err = segment(&chars("#}"), &settings).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedCommentEnd);
    }

    #[test]
    fn test_tokens() {
        let source = chars("user.name | join(', ') ~ 3.5 // 2 != x");
        let kinds: Vec<_> = tokenize(&source, 0, source.len())
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("user".into()),
                TokenKind::Dot,
                TokenKind::Ident("name".into()),
                TokenKind::Pipe,
                TokenKind::Ident("join".into()),
                TokenKind::LParen,
                TokenKind::Str(", ".into()),
                TokenKind::RParen,
                TokenKind::Tilde,
                TokenKind::Float(3.5),
                TokenKind::SlashSlash,
                TokenKind::Int(2),
                TokenKind::NotEq,
                TokenKind::Ident("x".into()),
                TokenKind::End,
            ]
        );
    }
}
