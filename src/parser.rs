//! Parser - Template Source to Render Tree
//!
//! Statements: `if`/`elif`/`else`/`endif`, `for`/`else`/`endfor`, `set`,
//! `include`. Expression precedence, loosest first: `or`, `and`, `not`,
//! comparisons and `in`, `~`, `+ -`, `* / // %`, unary `-`, filters,
//! postfix access and calls.

use crate::error::{ErrorCode, ErrorInfo, SourceLocation};
use crate::expr::{BinaryOp, CallArgs, Expr, UnaryOp};
use crate::lexer::{self, LexError, Segment, TagKind, Token, TokenKind};
use crate::nodes::{Node, RenderTree};
use crate::settings::Settings;
use crate::value::{Value, ValuesList};
use crate::width::CharWidth;

/// Compiles `source`. On failure the first error is the one that stopped
/// the parse.
pub fn parse<W: CharWidth>(
    source: &W::Str,
    settings: &Settings,
    template_name: &str,
) -> Result<RenderTree<W>, Vec<ErrorInfo<W>>> {
    let chars = W::to_chars(source);
    let parse_result = lexer::segment(&chars, settings)
        .map_err(ParseError::from)
        .and_then(|segments| {
            let mut parser = Parser {
                chars: &chars,
                segments,
                next: 0,
            };
            parser.parse_block::<W>(&[])
        });
    match parse_result {
        Ok((nodes, _)) => Ok(RenderTree::new(nodes)),
        Err(err) => Err(vec![err.into_info(&chars, template_name)]),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ParseError {
    code: ErrorCode,
    pos: usize,
    extra_params: ValuesList,
}

impl ParseError {
    fn new(code: ErrorCode, pos: usize) -> Self {
        Self {
            code,
            pos,
            extra_params: ValuesList::new(),
        }
    }

    fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.extra_params.push(param.into());
        self
    }

    /// Locates the error and renders the offending line with a caret under
    /// the error column.
    fn into_info<W: CharWidth>(self, chars: &[char], template_name: &str) -> ErrorInfo<W> {
        let pos = self.pos.min(chars.len());
        let line_start = chars[..pos]
            .iter()
            .rposition(|c| *c == '\n')
            .map_or(0, |idx| idx + 1);
        let line_end = chars[pos..]
            .iter()
            .position(|c| *c == '\n')
            .map_or(chars.len(), |idx| pos + idx);
        let line = chars[..pos].iter().filter(|c| **c == '\n').count() + 1;
        let col = pos - line_start + 1;

        let mut descr: Vec<char> = chars[line_start..line_end].to_vec();
        descr.push('\n');
        descr.extend(std::iter::repeat('-').take(col - 1));
        descr.push('^');

        ErrorInfo::new(self.code, SourceLocation::new(template_name, line, col))
            .with_location_descr(W::from_chars(&descr))
            .with_extra_params(self.extra_params)
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self::new(err.code, err.pos)
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Statement that ended a block, with the rest of its tokens.
struct Closer {
    keyword: String,
    tokens: TokenStream,
}

struct Parser<'s> {
    chars: &'s [char],
    segments: Vec<Segment>,
    next: usize,
}

impl<'s> Parser<'s> {
    /// Parses nodes up to the first statement named in `closers`, or to the
    /// end of input when `closers` is empty.
    fn parse_block<W: CharWidth>(&mut self, closers: &[&str]) -> ParseResult<(Vec<Node<W>>, Option<Closer>)> {
        let mut nodes = vec![];

        while let Some(segment) = self.segments.get(self.next).cloned() {
            self.next += 1;
            let (kind, start, end) = match segment {
                Segment::Text { start, end } => {
                    nodes.push(Node::Text(W::from_chars(&self.chars[start..end])));
                    continue;
                }
                Segment::Tag { kind, start, end } => (kind, start, end),
            };
            let mut tokens = TokenStream::new(lexer::tokenize(self.chars, start, end)?);

            if kind == TagKind::Expr {
                let expr = tokens.parse_expr()?;
                tokens.expect_end()?;
                nodes.push(Node::Expr(expr));
                continue;
            }

            let (keyword, keyword_pos) = tokens.expect_ident()?;
            if closers.contains(&keyword.as_str()) {
                return Ok((nodes, Some(Closer { keyword, tokens })));
            }
            let node = match keyword.as_str() {
                "if" => self.parse_if(tokens)?,
                "for" => self.parse_for(tokens)?,
                "set" => {
                    let (name, _) = tokens.expect_ident()?;
                    tokens.expect(TokenKind::Assign)?;
                    let value = tokens.parse_expr()?;
                    tokens.expect_end()?;
                    Node::Set { name, value }
                }
                "include" => {
                    let name = tokens.parse_expr()?;
                    tokens.expect_end()?;
                    Node::Include { name }
                }
                _ => {
                    return Err(ParseError::new(ErrorCode::UnexpectedStatement, keyword_pos).with_param(keyword))
                }
            };
            nodes.push(node);
        }

        if closers.is_empty() {
            return Ok((nodes, None));
        }
        let mut err = ParseError::new(ErrorCode::UnexpectedEndOfInput, self.chars.len());
        for closer in closers {
            err = err.with_param(*closer);
        }
        Err(err)
    }

    fn parse_until<W: CharWidth>(&mut self, closers: &[&str]) -> ParseResult<(Vec<Node<W>>, Closer)> {
        match self.parse_block(closers)? {
            (nodes, Some(closer)) => Ok((nodes, closer)),
            (_, None) => Err(ParseError::new(ErrorCode::UnexpectedEndOfInput, self.chars.len())),
        }
    }

    fn parse_if<W: CharWidth>(&mut self, mut tokens: TokenStream) -> ParseResult<Node<W>> {
        let mut condition = tokens.parse_expr()?;
        tokens.expect_end()?;
        let mut branches = vec![];

        loop {
            let (body, mut closer) = self.parse_until(&["elif", "else", "endif"])?;
            branches.push((condition, body));
            match closer.keyword.as_str() {
                "elif" => {
                    condition = closer.tokens.parse_expr()?;
                    closer.tokens.expect_end()?;
                }
                "else" => {
                    closer.tokens.expect_end()?;
                    let (otherwise, closer) = self.parse_until(&["endif"])?;
                    closer.tokens.expect_end()?;
                    return Ok(Node::If { branches, otherwise });
                }
                _ => {
                    closer.tokens.expect_end()?;
                    return Ok(Node::If {
                        branches,
                        otherwise: vec![],
                    });
                }
            }
        }
    }

    fn parse_for<W: CharWidth>(&mut self, mut tokens: TokenStream) -> ParseResult<Node<W>> {
        let mut targets = vec![tokens.expect_ident()?.0];
        while tokens.eat(&TokenKind::Comma) {
            targets.push(tokens.expect_ident()?.0);
        }
        if !tokens.eat_keyword("in") {
            return Err(ParseError::new(ErrorCode::ExpectedToken, tokens.peek().pos).with_param("in"));
        }
        let iterable = tokens.parse_expr()?;
        tokens.expect_end()?;

        let (body, closer) = self.parse_until(&["else", "endfor"])?;
        closer.tokens.expect_end()?;
        let otherwise = if closer.keyword == "else" {
            let (otherwise, closer) = self.parse_until(&["endfor"])?;
            closer.tokens.expect_end()?;
            otherwise
        } else {
            vec![]
        };

        Ok(Node::For {
            targets,
            iterable,
            body,
            otherwise,
        })
    }
}

/// Cursor over one tag's tokens; the last token is always `End`.
struct TokenStream {
    tokens: Vec<Token>,
    cursor: usize,
}

impl TokenStream {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.cursor + offset).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::End {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek().is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(ParseError::new(ErrorCode::ExpectedToken, self.peek().pos).with_param(kind.to_string()))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<(String, usize)> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, token.pos))
            }
            _ => Err(ParseError::new(ErrorCode::ExpectedIdentifier, token.pos)),
        }
    }

    fn expect_end(&self) -> ParseResult<()> {
        let token = self.peek();
        if token.kind == TokenKind::End {
            Ok(())
        } else {
            Err(ParseError::new(ErrorCode::ExpectedEndOfStatement, token.pos).with_param(token.kind.to_string()))
        }
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_and()?;
        while self.eat_keyword("or") {
            expr = binary(BinaryOp::Or, expr, self.parse_and()?);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_not()?;
        while self.eat_keyword("and") {
            expr = binary(BinaryOp::And, expr, self.parse_not()?);
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_concat()?;
        if self.peek().is_keyword("not") && self.peek_at(1).is_keyword("in") {
            self.advance();
            self.advance();
            let rhs = self.parse_concat()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(binary(BinaryOp::In, lhs, rhs))));
        }
        let op = match self.peek().kind {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ if self.peek().is_keyword("in") => BinaryOp::In,
            _ => return Ok(lhs),
        };
        self.advance();
        Ok(binary(op, lhs, self.parse_concat()?))
    }

    fn parse_concat(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_additive()?;
        while self.eat(&TokenKind::Tilde) {
            expr = binary(BinaryOp::Concat, expr, self.parse_additive()?);
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(expr),
            };
            self.advance();
            expr = binary(op, expr, self.parse_multiplicative()?);
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::SlashSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(expr),
            };
            self.advance();
            expr = binary(op, expr, self.parse_unary()?);
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.eat(&TokenKind::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_filtered()
    }

    fn parse_filtered(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_postfix()?;
        while self.eat(&TokenKind::Pipe) {
            let (name, _) = self.expect_ident()?;
            let args = if self.eat(&TokenKind::LParen) {
                self.parse_call_args()?
            } else {
                CallArgs::default()
            };
            expr = Expr::Filter(Box::new(expr), name, args);
        }
        Ok(expr)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let (name, _) = self.expect_ident()?;
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat(&TokenKind::LBracket) {
                let key = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else if self.eat(&TokenKind::LParen) {
                let args = self.parse_call_args()?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening parenthesis, through the closing one.
    fn parse_call_args(&mut self) -> ParseResult<CallArgs> {
        let mut args = CallArgs::default();
        while !self.eat(&TokenKind::RParen) {
            let named = matches!(self.peek().kind, TokenKind::Ident(_))
                && self.peek_at(1).kind == TokenKind::Assign;
            if named {
                let (name, _) = self.expect_ident()?;
                self.advance();
                args.named.push((name, self.parse_expr()?));
            } else {
                args.positional.push(self.parse_expr()?);
            }
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let expr = match token.kind {
            TokenKind::Int(i) => Expr::Literal(Value::Int(i)),
            TokenKind::Float(d) => Expr::Literal(Value::Double(d)),
            TokenKind::Str(text) => Expr::Literal(Value::from(text)),
            TokenKind::Ident(name) => match name.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "none" | "None" => Expr::Literal(Value::Empty),
                _ => Expr::Name(name),
            },
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                inner
            }
            TokenKind::LBracket => {
                let mut items = vec![];
                while !self.eat(&TokenKind::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(TokenKind::RBracket)?;
                        break;
                    }
                }
                Expr::List(items)
            }
            TokenKind::LBrace => {
                let mut entries = vec![];
                while !self.eat(&TokenKind::RBrace) {
                    let key = self.advance();
                    let key = match key.kind {
                        TokenKind::Str(text) | TokenKind::Ident(text) => text,
                        _ => return Err(ParseError::new(ErrorCode::ExpectedStringLiteral, key.pos)),
                    };
                    self.expect(TokenKind::Colon)?;
                    entries.push((key, self.parse_expr()?));
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(TokenKind::RBrace)?;
                        break;
                    }
                }
                Expr::Map(entries)
            }
            TokenKind::End => return Err(ParseError::new(ErrorCode::ExpectedExpression, token.pos)),
            other => {
                return Err(ParseError::new(ErrorCode::UnexpectedToken, token.pos).with_param(other.to_string()))
            }
        };
        Ok(expr)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::width::{Narrow, WString, Wide};

    fn compile(source: &str) -> Result<RenderTree<Narrow>, ErrorInfo<Narrow>> {
        parse::<Narrow>(&source.to_string(), &Settings::default(), "test.j2")
            .map_err(|mut errors| errors.remove(0))
    }

    #[test]
    fn test_parses_statements() {
        let tree = compile("{% for k, v in items %}{{ k }}{% else %}none{% endfor %}").unwrap();
        match &tree.nodes()[0] {
            Node::For { targets, otherwise, .. } => {
                assert_eq!(targets, &vec!["k".to_string(), "v".to_string()]);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }

        let tree = compile("{% if a %}A{% elif b %}B{% else %}C{% endif %}").unwrap();
        match &tree.nodes()[0] {
            Node::If { branches, otherwise } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let tree = compile("{{ 1 + 2 * 3 }}").unwrap();
        let Node::Expr(Expr::Binary(BinaryOp::Add, _, rhs)) = &tree.nodes()[0] else {
            panic!("expected addition at the root");
        };
        assert!(matches!(**rhs, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn test_error_location() {
        let err = compile("line one\n{{ user. }}").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExpectedIdentifier);
        assert_eq!(err.location(), &SourceLocation::new("test.j2", 2, 10));
        assert_eq!(err.location_descr(), "{{ user. }}\n---------^");
    }

    #[test]
    fn test_unclosed_block() {
        let err = compile("{% if a %}open").unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnexpectedEndOfInput);
        assert_eq!(err.extra_params()[2], Value::from("endif"));
    }

    #[test]
    fn test_unknown_statement() {
        let err = compile("{% endfor %}").unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnexpectedStatement);
        assert_eq!(err.extra_params(), &[Value::from("endfor")]);
    }

    #[test]
    fn test_missing_expression() {
        let err = compile("{{ }}").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExpectedExpression);
    }

    #[test]
    fn test_wide_source() {
        let source = WString::from("{{ 'grüße' ~ name }}");
        let tree = parse::<Wide>(&source, &Settings::default(), "wide.j2").unwrap();
        assert_eq!(tree.nodes().len(), 1);
    }
}
