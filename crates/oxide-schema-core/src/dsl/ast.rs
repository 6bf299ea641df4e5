//! Syntax tree of the definition language and its grammar.
//!
//! The language is a data-only subset of Ruby call syntax:
//!
//! ```text
//! program := call*
//! call    := [IDENT '.'] IDENT ( '(' args? ')' | args )? block?
//! args    := arg (',' arg)*
//! arg     := LABEL value | value '=>' value | value
//! block   := 'do' ( '|' IDENT '|' )? call* 'end'
//! value   := STRING | SYMBOL | INTEGER | FLOAT | 'true' | 'false' | 'nil'
//!          | '[' (value (',' value)*)? ','? ']'
//!          | '{' (pair (',' pair)*)? ','? '}'
//!          | '->' '{' STRING '}'
//! ```
//!
//! Nothing is evaluated; calls are interpreted by the
//! [`Parser`](super::Parser).

use super::token::{Span, SyntaxError, Token, TokenKind};

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Symbol(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Array(Vec<Value>),
    Hash(Vec<(String, Value)>),
    /// `-> { "EXPR" }`, a raw SQL expression.
    Lambda(String),
}

impl Value {
    /// Short name of the value's kind for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Nil => "nil",
            Self::Array(_) => "array",
            Self::Hash(_) => "hash",
            Self::Lambda(_) => "lambda",
        }
    }

    /// String or symbol text.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

/// A keyword option with the position of its label.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionArg {
    pub key: String,
    pub value: Value,
    pub span: Span,
}

/// A method call, possibly with a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Receiver of `t.string`, i.e. the block parameter.
    pub receiver: Option<String>,
    pub method: String,
    pub args: Vec<Value>,
    pub options: Vec<OptionArg>,
    pub block: Option<Block>,
    pub span: Span,
}

impl Call {
    /// Looks up an option by key.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options
            .iter()
            .find(|o| o.key == key)
            .map(|o| &o.value)
    }

    /// Short description used in error messages, e.g. `t.string "name"`.
    #[must_use]
    pub fn describe(&self) -> String {
        let head = self.receiver.as_ref().map_or_else(
            || self.method.clone(),
            |r| format!("{r}.{}", self.method),
        );
        match self.args.first().and_then(Value::as_name) {
            Some(name) => format!("{head} \"{name}\""),
            None => head,
        }
    }
}

/// A `do |param| ... end` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub param: Option<String>,
    pub body: Vec<Call>,
}

/// Recursive-descent parser from tokens to calls.
pub struct SyntaxParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl SyntaxParser {
    /// Creates a parser over a token stream ending in `Eof`.
    #[must_use]
    pub const fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parses the whole program.
    pub fn parse_program(mut self) -> Result<Vec<Call>, SyntaxError> {
        let mut calls = Vec::new();
        while !self.at(&TokenKind::Eof) {
            calls.push(self.parse_call()?);
        }
        Ok(calls)
    }

    fn peek(&self) -> &Token {
        // The stream always ends with Eof, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(SyntaxError::unexpected(what, self.peek()))
        }
    }

    fn parse_call(&mut self) -> Result<Call, SyntaxError> {
        let first = self.advance();
        let first_name = match &first.kind {
            TokenKind::Ident(name) if name != "end" && name != "do" => name.clone(),
            _ => return Err(SyntaxError::unexpected("a declaration", &first)),
        };

        let (receiver, method) = if self.at(&TokenKind::Dot) {
            self.advance();
            let name = self.advance();
            match name.kind {
                TokenKind::Ident(m) => (Some(first_name), m),
                _ => return Err(SyntaxError::unexpected("a method name", &name)),
            }
        } else {
            (None, first_name)
        };

        let mut call = Call {
            receiver,
            method,
            args: Vec::new(),
            options: Vec::new(),
            block: None,
            span: first.span,
        };

        if self.at(&TokenKind::LParen) {
            self.advance();
            if !self.at(&TokenKind::RParen) {
                self.parse_args(&mut call)?;
            }
            self.expect(&TokenKind::RParen, "')'")?;
        } else if self.starts_arg() {
            self.parse_args(&mut call)?;
        }

        if self.peek().is_ident("do") {
            self.advance();
            call.block = Some(self.parse_block()?);
        }
        Ok(call)
    }

    fn starts_arg(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Str(_)
            | TokenKind::Symbol(_)
            | TokenKind::Integer(_)
            | TokenKind::Float(_)
            | TokenKind::Label(_)
            | TokenKind::LBracket
            | TokenKind::Arrow => true,
            TokenKind::Ident(word) => matches!(word.as_str(), "true" | "false" | "nil"),
            _ => false,
        }
    }

    fn parse_args(&mut self, call: &mut Call) -> Result<(), SyntaxError> {
        loop {
            let token = self.peek().clone();
            if let TokenKind::Label(key) = token.kind {
                self.advance();
                let value = self.parse_value()?;
                call.options.push(OptionArg {
                    key,
                    value,
                    span: token.span,
                });
            } else {
                let value = self.parse_value()?;
                if self.eat(&TokenKind::HashRocket) {
                    let key = value_key(&value, &token)?;
                    let value = self.parse_value()?;
                    call.options.push(OptionArg {
                        key,
                        value,
                        span: token.span,
                    });
                } else if call.options.is_empty() {
                    call.args.push(value);
                } else {
                    return Err(SyntaxError::new(
                        "positional argument after keyword options",
                        token.span,
                    ));
                }
            }
            if !self.eat(&TokenKind::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let mut param = None;
        if self.eat(&TokenKind::Pipe) {
            let name = self.advance();
            match name.kind {
                TokenKind::Ident(p) => param = Some(p),
                _ => return Err(SyntaxError::unexpected("a block parameter", &name)),
            }
            self.expect(&TokenKind::Pipe, "'|'")?;
        }
        let mut body = Vec::new();
        loop {
            if self.peek().is_ident("end") {
                self.advance();
                return Ok(Block { param, body });
            }
            if self.at(&TokenKind::Eof) {
                return Err(SyntaxError::new("missing 'end'", self.peek().span));
            }
            body.push(self.parse_call()?);
        }
    }

    fn parse_value(&mut self) -> Result<Value, SyntaxError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Value::Str(s)),
            TokenKind::Symbol(s) => Ok(Value::Symbol(s)),
            TokenKind::Integer(n) => Ok(Value::Integer(n)),
            TokenKind::Float(n) => Ok(Value::Float(n)),
            TokenKind::Ident(ref word) => match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "nil" => Ok(Value::Nil),
                _ => Err(SyntaxError::unexpected("a value", &token)),
            },
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    items.push(self.parse_value()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Value::Array(items))
            }
            TokenKind::LBrace => self.parse_hash(),
            TokenKind::Arrow => {
                self.expect(&TokenKind::LBrace, "'{'")?;
                let body = self.advance();
                let expr = match &body.kind {
                    TokenKind::Str(expr) => expr.clone(),
                    _ => return Err(SyntaxError::unexpected("a string expression", &body)),
                };
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Value::Lambda(expr))
            }
            _ => Err(SyntaxError::unexpected("a value", &token)),
        }
    }

    fn parse_hash(&mut self) -> Result<Value, SyntaxError> {
        let mut pairs = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let token = self.peek().clone();
            let key = if let TokenKind::Label(key) = token.kind {
                self.advance();
                key
            } else {
                let key = self.parse_value()?;
                self.expect(&TokenKind::HashRocket, "'=>'")?;
                value_key(&key, &token)?
            };
            pairs.push((key, self.parse_value()?));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Value::Hash(pairs))
    }
}

fn value_key(value: &Value, token: &Token) -> Result<String, SyntaxError> {
    value
        .as_name()
        .map(ToString::to_string)
        .ok_or_else(|| SyntaxError::new("hash keys must be strings or symbols", token.span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::lexer::Lexer;

    fn parse(input: &str) -> Vec<Call> {
        let tokens = Lexer::new(input).tokenize().unwrap();
        SyntaxParser::new(tokens).parse_program().unwrap()
    }

    #[test]
    fn test_parse_block_with_options() {
        let calls = parse(
            r#"
            create_table "users", force: :cascade do |t|
              t.string "name", limit: 255, null: false
              t.timestamps
            end
            "#,
        );
        assert_eq!(calls.len(), 1);
        let create = &calls[0];
        assert_eq!(create.method, "create_table");
        assert_eq!(create.args, vec![Value::Str("users".into())]);
        assert_eq!(create.option("force"), Some(&Value::Symbol("cascade".into())));
        let block = create.block.as_ref().unwrap();
        assert_eq!(block.param.as_deref(), Some("t"));
        assert_eq!(block.body.len(), 2);
        assert_eq!(block.body[0].receiver.as_deref(), Some("t"));
        assert_eq!(block.body[0].option("null"), Some(&Value::Bool(false)));
        assert!(block.body[1].args.is_empty());
    }

    #[test]
    fn test_parse_parenthesized_and_hashes() {
        let calls = parse(
            r#"add_index("users", ["a", "b"], length: { a: 10, "b" => 4 }, where: "a > 0")"#,
        );
        let call = &calls[0];
        assert_eq!(call.args.len(), 2);
        assert_eq!(
            call.option("length"),
            Some(&Value::Hash(vec![
                ("a".into(), Value::Integer(10)),
                ("b".into(), Value::Integer(4)),
            ]))
        );
    }

    #[test]
    fn test_parse_lambda_default() {
        let calls = parse(r#"t.datetime "at", default: -> { "CURRENT_TIMESTAMP" }"#);
        assert_eq!(
            calls[0].option("default"),
            Some(&Value::Lambda("CURRENT_TIMESTAMP".into()))
        );
    }

    #[test]
    fn test_missing_end() {
        let tokens = Lexer::new("create_table \"x\" do |t|\n t.string \"a\"")
            .tokenize()
            .unwrap();
        let err = SyntaxParser::new(tokens).parse_program().unwrap_err();
        assert!(err.message.contains("end"));
    }

    #[test]
    fn test_positional_after_options_rejected() {
        let tokens = Lexer::new("add_index \"t\", name: \"x\", \"a\"").tokenize().unwrap();
        assert!(SyntaxParser::new(tokens).parse_program().is_err());
    }
}
