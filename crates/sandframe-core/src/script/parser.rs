//! Recursive-descent parser producing [`Program`]s.

use std::rc::Rc;

use super::ast::{
    BinOp, CmpOp, Comprehension, ComprehensionKind, Expr, FStringPart, LambdaDef, Literal,
    Program, Stmt, StmtKind, UnaryOp,
};
use super::error::{ErrorClass, ScriptError, ScriptResult};
use super::lexer::{RawFPart, Tok, Token, tokenize};

/// Maximum expression nesting before parsing gives up.
const MAX_DEPTH: usize = 64;

/// Statement keywords outside the supported language.
const BLOCK_KEYWORDS: &[&str] = &[
    "def", "class", "for", "while", "if", "elif", "else", "with", "try", "except", "finally",
    "return", "del", "global", "nonlocal", "raise", "assert", "async", "await", "yield", "break",
    "continue",
];

/// Words that can never be used as names.
const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "for", "lambda", "import", "from", "pass",
    "def", "class", "while", "with", "try", "except", "finally", "return", "del", "global",
    "nonlocal", "raise", "assert", "async", "await", "yield", "break", "continue", "elif",
];

static EOF: Tok = Tok::Eof;

/// Parse a whole script.
pub fn parse(source: &str) -> ScriptResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&EOF)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn is_name(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == word)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line())
    }

    fn unexpected(&self) -> ScriptError {
        self.error(format!("unexpected {}", describe(self.peek())))
    }

    fn expect(&mut self, expected: Tok, what: &str) -> ScriptResult<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", what, describe(self.peek()))))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> ScriptResult<()> {
        if self.is_name(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", word, describe(self.peek()))))
        }
    }

    fn expect_identifier(&mut self) -> ScriptResult<String> {
        match self.peek().clone() {
            Tok::Name(name) if !RESERVED.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected a name, found {}", describe(self.peek())))),
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ScriptResult<T>) -> ScriptResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(
                ScriptError::new(ErrorClass::Recursion, "expression nested too deeply")
                    .at_line(self.line()),
            );
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn program(&mut self) -> ScriptResult<Program> {
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Tok::Newline | Tok::Semicolon => {
                    self.advance();
                    continue;
                }
                Tok::Eof => break,
                _ => {}
            }
            let line = self.line();
            let kind = self.statement()?;
            statements.push(Stmt { kind, line });
            match self.peek() {
                Tok::Newline | Tok::Semicolon => {
                    self.advance();
                }
                Tok::Eof => break,
                _ => return Err(self.unexpected()),
            }
        }
        Ok(Program { statements })
    }

    fn statement(&mut self) -> ScriptResult<StmtKind> {
        if let Tok::Name(word) = self.peek().clone() {
            match word.as_str() {
                "pass" => {
                    self.advance();
                    return Ok(StmtKind::Pass);
                }
                "import" | "from" => {
                    let module = match self.peek_at(1) {
                        Tok::Name(module) => module.clone(),
                        _ => String::new(),
                    };
                    return Err(ScriptError::new(
                        ErrorClass::Import,
                        format!("import of '{}' is not allowed", module),
                    )
                    .at_line(self.line()));
                }
                w if BLOCK_KEYWORDS.contains(&w) => {
                    return Err(ScriptError::unsupported(format!(
                        "'{}' statements are not supported",
                        w
                    ))
                    .at_line(self.line()));
                }
                _ => {}
            }
        }

        let first = self.expr_list()?;
        let aug_op = match self.peek() {
            Tok::PlusAssign => Some(BinOp::Add),
            Tok::MinusAssign => Some(BinOp::Sub),
            Tok::StarAssign => Some(BinOp::Mul),
            Tok::SlashAssign => Some(BinOp::Div),
            _ => None,
        };

        if let Some(op) = aug_op {
            if !matches!(first, Expr::Name(_) | Expr::Subscript { .. }) {
                return Err(self.error("illegal target for augmented assignment"));
            }
            self.advance();
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if !matches!(self.peek(), Tok::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while matches!(self.peek(), Tok::Assign) {
            self.advance();
            exprs.push(self.expr_list()?);
        }
        let Some(value) = exprs.pop() else {
            return Err(self.unexpected());
        };
        for target in &exprs {
            self.check_target(target)?;
        }
        Ok(StmtKind::Assign {
            targets: exprs,
            value,
        })
    }

    fn check_target(&self, target: &Expr) -> ScriptResult<()> {
        match target {
            Expr::Name(_) | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) if !items.is_empty() => {
                items.iter().try_for_each(|item| self.check_target(item))
            }
            Expr::Attribute { .. } => Ok(()),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    /// `a, b, c` without brackets becomes a tuple.
    fn expr_list(&mut self) -> ScriptResult<Expr> {
        let first = self.test()?;
        if !matches!(self.peek(), Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            if matches!(
                self.peek(),
                Tok::Newline | Tok::Eof | Tok::Semicolon | Tok::Assign
            ) {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> ScriptResult<Expr> {
        self.nested(|p| {
            if p.is_name("lambda") {
                return p.lambda();
            }
            let body = p.or_test()?;
            if !p.is_name("if") {
                return Ok(body);
            }
            p.advance();
            let condition = p.or_test()?;
            p.expect_keyword("else")?;
            let otherwise = p.test()?;
            Ok(Expr::IfElse {
                condition: Box::new(condition),
                then: Box::new(body),
                otherwise: Box::new(otherwise),
            })
        })
    }

    fn lambda(&mut self) -> ScriptResult<Expr> {
        self.advance();
        let mut params = Vec::new();
        while !matches!(self.peek(), Tok::Colon) {
            params.push(self.expect_identifier()?);
            if matches!(self.peek(), Tok::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Tok::Colon, "':' after lambda parameters")?;
        let body = self.test()?;
        Ok(Expr::Lambda(Rc::new(LambdaDef { params, body })))
    }

    fn or_test(&mut self) -> ScriptResult<Expr> {
        let mut left = self.and_test()?;
        while self.is_name("or") {
            self.advance();
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> ScriptResult<Expr> {
        let mut left = self.not_test()?;
        while self.is_name("and") {
            self.advance();
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> ScriptResult<Expr> {
        if self.is_name("not") {
            self.advance();
            let operand = self.nested(|p| p.not_test())?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison_op(&self) -> Option<(CmpOp, usize)> {
        let op = match self.peek() {
            Tok::EqEq => (CmpOp::Eq, 1),
            Tok::NotEq => (CmpOp::NotEq, 1),
            Tok::Lt => (CmpOp::Lt, 1),
            Tok::Le => (CmpOp::Le, 1),
            Tok::Gt => (CmpOp::Gt, 1),
            Tok::Ge => (CmpOp::Ge, 1),
            Tok::Name(n) if n == "in" => (CmpOp::In, 1),
            Tok::Name(n) if n == "not" => match self.peek_at(1) {
                Tok::Name(m) if m == "in" => (CmpOp::NotIn, 2),
                _ => return None,
            },
            Tok::Name(n) if n == "is" => match self.peek_at(1) {
                Tok::Name(m) if m == "not" => (CmpOp::IsNot, 2),
                _ => (CmpOp::Is, 1),
            },
            _ => return None,
        };
        Some(op)
    }

    fn comparison(&mut self) -> ScriptResult<Expr> {
        let left = self.bit_or()?;
        let mut comparisons = Vec::new();
        while let Some((op, width)) = self.comparison_op() {
            for _ in 0..width {
                self.advance();
            }
            comparisons.push((op, self.bit_or()?));
        }
        if comparisons.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                comparisons,
            })
        }
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> ScriptResult<Expr>,
        op_for: fn(&Tok) -> Option<BinOp>,
    ) -> ScriptResult<Expr> {
        let mut left = next(self)?;
        while let Some(op) = op_for(self.peek()) {
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn bit_or(&mut self) -> ScriptResult<Expr> {
        self.binary_chain(Self::bit_and, |tok| {
            matches!(tok, Tok::Pipe).then_some(BinOp::BitOr)
        })
    }

    fn bit_and(&mut self) -> ScriptResult<Expr> {
        self.binary_chain(Self::arith, |tok| {
            matches!(tok, Tok::Amp).then_some(BinOp::BitAnd)
        })
    }

    fn arith(&mut self) -> ScriptResult<Expr> {
        self.binary_chain(Self::term, |tok| match tok {
            Tok::Plus => Some(BinOp::Add),
            Tok::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> ScriptResult<Expr> {
        self.binary_chain(Self::factor, |tok| match tok {
            Tok::Star => Some(BinOp::Mul),
            Tok::Slash => Some(BinOp::Div),
            Tok::DoubleSlash => Some(BinOp::FloorDiv),
            Tok::Percent => Some(BinOp::Mod),
            _ => None,
        })
    }

    fn factor(&mut self) -> ScriptResult<Expr> {
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Pos,
            Tok::Tilde => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.nested(|p| p.factor())?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ScriptResult<Expr> {
        let base = self.postfix()?;
        if !matches!(self.peek(), Tok::DoubleStar) {
            return Ok(base);
        }
        self.advance();
        let exponent = self.nested(|p| p.factor())?;
        Ok(Expr::Binary {
            op: BinOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent),
        })
    }

    fn postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.advance();
                    let (args, keywords) = self.call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.subscript()?;
                    self.expect(Tok::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Tok::Dot => {
                    self.advance();
                    let name = match self.advance() {
                        Tok::Name(name) => name,
                        _ => return Err(self.error("expected attribute name after '.'")),
                    };
                    expr = Expr::Attribute {
                        object: Box::new(expr),
                        name,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> ScriptResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<(String, Expr)> = Vec::new();
        loop {
            if matches!(self.peek(), Tok::RParen) {
                self.advance();
                break;
            }
            if matches!(self.peek(), Tok::Star | Tok::DoubleStar) {
                return Err(ScriptError::unsupported("argument unpacking is not supported")
                    .at_line(self.line()));
            }

            let keyword = match (self.peek(), self.peek_at(1)) {
                (Tok::Name(name), Tok::Assign) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.advance();
                self.advance();
                if keywords.iter().any(|(existing, _)| *existing == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                let value = self.test()?;
                keywords.push((name, value));
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let value = self.test()?;
                if self.is_name("for") {
                    args.push(self.comprehension(ComprehensionKind::List, None, value)?);
                } else {
                    args.push(value);
                }
            }

            match self.peek() {
                Tok::Comma => {
                    self.advance();
                }
                Tok::RParen => {}
                _ => return Err(self.error(format!(
                    "expected ',' or ')' in call, found {}",
                    describe(self.peek())
                ))),
            }
        }
        Ok((args, keywords))
    }

    fn subscript(&mut self) -> ScriptResult<Expr> {
        let first = self.slice_item()?;
        if !matches!(self.peek(), Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            if matches!(self.peek(), Tok::RBracket) {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_item(&mut self) -> ScriptResult<Expr> {
        let start = if matches!(self.peek(), Tok::Colon) {
            None
        } else {
            let expr = self.test()?;
            if !matches!(self.peek(), Tok::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.advance();

        let ends_item = |tok: &Tok| matches!(tok, Tok::Colon | Tok::Comma | Tok::RBracket);
        let stop = if ends_item(self.peek()) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let mut step = None;
        if matches!(self.peek(), Tok::Colon) {
            self.advance();
            if !matches!(self.peek(), Tok::Comma | Tok::RBracket) {
                step = Some(Box::new(self.test()?));
            }
        }
        Ok(Expr::Slice { start, stop, step })
    }

    fn atom(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Name(name) => match name.as_str() {
                "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" => Ok(Expr::Literal(Literal::Bool(false))),
                "None" => Ok(Expr::Literal(Literal::None)),
                w if RESERVED.contains(&w) => {
                    Err(ScriptError::syntax(format!("invalid syntax near '{}'", w), line))
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::Int(value) => Ok(Expr::Literal(Literal::Int(value))),
            Tok::Float(value) => Ok(Expr::Literal(Literal::Float(value))),
            tok @ (Tok::Str(_) | Tok::FStr(_)) => self.string(tok, line),
            Tok::LParen => self.paren(),
            Tok::LBracket => self.list(),
            Tok::LBrace => self.dict(),
            other => Err(ScriptError::syntax(format!("unexpected {}", describe(&other)), line)),
        }
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// run an f-string.
    fn string(&mut self, first: Tok, line: usize) -> ScriptResult<Expr> {
        let mut pieces = vec![first];
        while matches!(self.peek(), Tok::Str(_) | Tok::FStr(_)) {
            pieces.push(self.advance());
        }

        if pieces.iter().all(|tok| matches!(tok, Tok::Str(_))) {
            let mut text = String::new();
            for tok in pieces {
                if let Tok::Str(s) = tok {
                    text.push_str(&s);
                }
            }
            return Ok(Expr::Literal(Literal::Str(text)));
        }

        let mut parts = Vec::new();
        for tok in pieces {
            match tok {
                Tok::Str(s) => parts.push(FStringPart::Literal(s)),
                Tok::FStr(raw) => {
                    for part in raw {
                        parts.push(match part {
                            RawFPart::Literal(s) => FStringPart::Literal(s),
                            RawFPart::Field { source, spec } => FStringPart::Field {
                                expr: parse_field(&source, line)?,
                                spec,
                            },
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(Expr::FString(parts))
    }

    fn paren(&mut self) -> ScriptResult<Expr> {
        if matches!(self.peek(), Tok::RParen) {
            self.advance();
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        if self.is_name("for") {
            let comp = self.comprehension(ComprehensionKind::List, None, first)?;
            self.expect(Tok::RParen, "')'")?;
            return Ok(comp);
        }
        if !matches!(self.peek(), Tok::Comma) {
            self.expect(Tok::RParen, "')'")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            if matches!(self.peek(), Tok::RParen) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect(Tok::RParen, "')'")?;
        Ok(Expr::Tuple(items))
    }

    fn list(&mut self) -> ScriptResult<Expr> {
        if matches!(self.peek(), Tok::RBracket) {
            self.advance();
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.test()?;
        if self.is_name("for") {
            let comp = self.comprehension(ComprehensionKind::List, None, first)?;
            self.expect(Tok::RBracket, "']'")?;
            return Ok(comp);
        }
        let mut items = vec![first];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            if matches!(self.peek(), Tok::RBracket) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect(Tok::RBracket, "']'")?;
        Ok(Expr::List(items))
    }

    fn dict(&mut self) -> ScriptResult<Expr> {
        if matches!(self.peek(), Tok::RBrace) {
            self.advance();
            return Ok(Expr::Dict(Vec::new()));
        }
        let key = self.test()?;
        if !matches!(self.peek(), Tok::Colon) {
            return Err(ScriptError::unsupported("set literals are not supported")
                .at_line(self.line()));
        }
        self.advance();
        let value = self.test()?;
        if self.is_name("for") {
            let comp = self.comprehension(ComprehensionKind::Dict, Some(key), value)?;
            self.expect(Tok::RBrace, "'}'")?;
            return Ok(comp);
        }

        let mut entries = vec![(key, value)];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            if matches!(self.peek(), Tok::RBrace) {
                break;
            }
            let key = self.test()?;
            self.expect(Tok::Colon, "':' in dict literal")?;
            let value = self.test()?;
            entries.push((key, value));
        }
        self.expect(Tok::RBrace, "'}'")?;
        Ok(Expr::Dict(entries))
    }

    fn comprehension(
        &mut self,
        kind: ComprehensionKind,
        key: Option<Expr>,
        element: Expr,
    ) -> ScriptResult<Expr> {
        self.expect_keyword("for")?;

        let parenthesized = matches!(self.peek(), Tok::LParen);
        if parenthesized {
            self.advance();
        }
        let mut targets = vec![self.expect_identifier()?];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            targets.push(self.expect_identifier()?);
        }
        if parenthesized {
            self.expect(Tok::RParen, "')'")?;
        }

        self.expect_keyword("in")?;
        let iter = self.or_test()?;
        let mut conditions = Vec::new();
        while self.is_name("if") {
            self.advance();
            conditions.push(self.or_test()?);
        }
        if self.is_name("for") {
            return Err(
                ScriptError::unsupported("nested comprehension loops are not supported")
                    .at_line(self.line()),
            );
        }

        Ok(Expr::Comprehension(Box::new(Comprehension {
            kind,
            key,
            element,
            targets,
            iter,
            conditions,
        })))
    }
}

/// Parse one `{...}` field of an f-string written on `line`.
fn parse_field(source: &str, line: usize) -> ScriptResult<Expr> {
    let relocate = |mut err: ScriptError| {
        err.line = Some(line);
        err
    };
    let mut tokens = tokenize(source).map_err(relocate)?;
    for token in &mut tokens {
        token.line = line;
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.test().map_err(relocate)?;
    if !matches!(parser.peek(), Tok::Newline) || !matches!(parser.peek_at(1), Tok::Eof) {
        return Err(ScriptError::syntax(
            format!("invalid f-string field '{}'", source),
            line,
        ));
    }
    Ok(expr)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(name) => format!("'{}'", name),
        Tok::Int(value) => format!("number {}", value),
        Tok::Float(value) => format!("number {}", value),
        Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
        Tok::Newline => "end of line".to_string(),
        Tok::Eof => "end of script".to_string(),
        other => format!("'{}'", symbol(other)),
    }
}

fn symbol(tok: &Tok) -> &'static str {
    match tok {
        Tok::LParen => "(",
        Tok::RParen => ")",
        Tok::LBracket => "[",
        Tok::RBracket => "]",
        Tok::LBrace => "{",
        Tok::RBrace => "}",
        Tok::Comma => ",",
        Tok::Colon => ":",
        Tok::Dot => ".",
        Tok::Semicolon => ";",
        Tok::Assign => "=",
        Tok::PlusAssign => "+=",
        Tok::MinusAssign => "-=",
        Tok::StarAssign => "*=",
        Tok::SlashAssign => "/=",
        Tok::Plus => "+",
        Tok::Minus => "-",
        Tok::Star => "*",
        Tok::Slash => "/",
        Tok::DoubleSlash => "//",
        Tok::Percent => "%",
        Tok::DoubleStar => "**",
        Tok::EqEq => "==",
        Tok::NotEq => "!=",
        Tok::Lt => "<",
        Tok::Le => "<=",
        Tok::Gt => ">",
        Tok::Ge => ">=",
        Tok::Amp => "&",
        Tok::Pipe => "|",
        Tok::Tilde => "~",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        let program = parse(source).unwrap();
        match program.statements.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    fn name(n: &str) -> Expr {
        Expr::Name(n.to_string())
    }

    fn int(v: i64) -> Expr {
        Expr::Literal(Literal::Int(v))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("1 + 2 * 3"),
            Expr::Binary {
                op: BinOp::Add,
                left: Box::new(int(1)),
                right: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    left: Box::new(int(2)),
                    right: Box::new(int(3)),
                }),
            }
        );
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        assert_eq!(
            expr("-2 ** 2"),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::Binary {
                    op: BinOp::Pow,
                    left: Box::new(int(2)),
                    right: Box::new(int(2)),
                }),
            }
        );
    }

    #[test]
    fn test_chained_comparison() {
        match expr("0 < x <= 10") {
            Expr::Compare { comparisons, .. } => {
                let ops: Vec<CmpOp> = comparisons.iter().map(|(op, _)| *op).collect();
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::Le]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match expr("a not in b") {
            Expr::Compare { comparisons, .. } => assert_eq!(comparisons[0].0, CmpOp::NotIn),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_method_chain() {
        let parsed = expr("df.groupby('region')['sales'].sum()");
        let Expr::Call { func, args, .. } = parsed else {
            panic!("expected call");
        };
        assert!(args.is_empty());
        let Expr::Attribute { name, .. } = *func else {
            panic!("expected attribute");
        };
        assert_eq!(name, "sum");
    }

    #[test]
    fn test_keyword_arguments() {
        let Expr::Call { args, keywords, .. } =
            expr("df.sort_values('sales', ascending=False)")
        else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(keywords[0].0, "ascending");
        assert_eq!(keywords[0].1, Expr::Literal(Literal::Bool(false)));
    }

    #[test]
    fn test_assignment_forms() {
        let program = parse("a = b = 1\nx, y = 1, 2\ndf['z'] = 3\ntotal += 1").unwrap();
        assert_eq!(program.statements.len(), 4);
        match &program.statements[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match &program.statements[1].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets[0], Expr::Tuple(vec![name("x"), name("y")]));
                assert_eq!(*value, Expr::Tuple(vec![int(1), int(2)]));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            program.statements[3].kind,
            StmtKind::AugAssign { op: BinOp::Add, .. }
        ));
        assert_eq!(program.statements[3].line, 4);
    }

    #[test]
    fn test_slices() {
        let Expr::Subscript { index, .. } = expr("xs[1:]") else {
            panic!("expected subscript");
        };
        assert_eq!(
            *index,
            Expr::Slice {
                start: Some(Box::new(int(1))),
                stop: None,
                step: None
            }
        );

        let Expr::Subscript { index, .. } = expr("df.loc[:, 'a']") else {
            panic!("expected subscript");
        };
        assert!(matches!(*index, Expr::Tuple(ref items) if items.len() == 2));
    }

    #[test]
    fn test_comprehensions_and_generators() {
        assert!(matches!(
            expr("[x * 2 for x in xs if x > 1]"),
            Expr::Comprehension(ref c) if c.kind == ComprehensionKind::List && c.conditions.len() == 1
        ));
        assert!(matches!(
            expr("{k: v for k, v in pairs}"),
            Expr::Comprehension(ref c) if c.kind == ComprehensionKind::Dict && c.targets.len() == 2
        ));
        let Expr::Call { args, .. } = expr("sum(x for x in xs)") else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Expr::Comprehension(_)));
    }

    #[test]
    fn test_lambda_and_ternary() {
        let Expr::Lambda(def) = expr("lambda v: v if v > 0 else 0") else {
            panic!("expected lambda");
        };
        assert_eq!(def.params, vec!["v".to_string()]);
        assert!(matches!(def.body, Expr::IfElse { .. }));
    }

    #[test]
    fn test_fstring_fields_are_parsed() {
        let Expr::FString(parts) = expr("f'{len(df)} rows' ' total'") else {
            panic!("expected f-string");
        };
        assert!(matches!(parts[0], FStringPart::Field { .. }));
        assert_eq!(parts.last(), Some(&FStringPart::Literal(" total".into())));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            expr("'ab' \"cd\""),
            Expr::Literal(Literal::Str("abcd".into()))
        );
    }

    #[test]
    fn test_import_is_denied() {
        let err = parse("x = 1\nimport os").unwrap_err();
        assert_eq!(err.class, ErrorClass::Import);
        assert_eq!(err.line, Some(2));
        assert!(err.message.contains("os"));
    }

    #[test]
    fn test_block_statements_are_unsupported() {
        let err = parse("for x in range(3):\n    pass").unwrap_err();
        assert_eq!(err.class, ErrorClass::Unsupported);
        let err = parse("def f():\n    return 1").unwrap_err();
        assert_eq!(err.class, ErrorClass::Unsupported);
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse("result = = 1").unwrap_err().class, ErrorClass::Syntax);
        assert_eq!(parse("x = 1 2").unwrap_err().class, ErrorClass::Syntax);
        assert_eq!(parse("f(a=1, 2)").unwrap_err().class, ErrorClass::Syntax);
        assert_eq!(parse("1 = x").unwrap_err().class, ErrorClass::Syntax);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        let class = std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(move || parse(&source).unwrap_err().class)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(class, ErrorClass::Recursion);
    }

    #[test]
    fn test_empty_program() {
        assert!(parse("").unwrap().statements.is_empty());
        assert!(parse("# only a comment\n\n").unwrap().statements.is_empty());
    }
}
