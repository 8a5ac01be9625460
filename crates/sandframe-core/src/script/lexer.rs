//! Tokenizer for scripts.
//!
//! Newlines inside brackets are joined, as are lines ending in a backslash.
//! Indentation carries no meaning because block statements are not part of
//! the language.

use super::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq)]
pub enum RawFPart {
    Literal(String),
    Field { source: String, spec: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(Vec<RawFPart>),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Amp,
    Pipe,
    Tilde,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    depth: usize,
    tokens: Vec<Token>,
}

/// Split source text into tokens, ending with `Eof`.
pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    let mut lexer = Lexer {
        chars: source.chars().peekable(),
        line: 1,
        depth: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer<'_> {
    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn run(&mut self) -> ScriptResult<()> {
        while let Some(c) = self.chars.next() {
            match c {
                '\n' => {
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => {}
                '#' => {
                    while let Some(&next) = self.chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '\\' => {
                    if !self.eat('\n') {
                        return Err(ScriptError::syntax("unexpected '\\'", self.line));
                    }
                    self.line += 1;
                }
                '(' => self.open(Tok::LParen),
                '[' => self.open(Tok::LBracket),
                '{' => self.open(Tok::LBrace),
                ')' => self.close(Tok::RParen)?,
                ']' => self.close(Tok::RBracket)?,
                '}' => self.close(Tok::RBrace)?,
                ',' => self.push(Tok::Comma),
                ':' => self.push(Tok::Colon),
                ';' => self.push(Tok::Semicolon),
                '~' => self.push(Tok::Tilde),
                '&' => self.push(Tok::Amp),
                '|' => self.push(Tok::Pipe),
                '%' => self.push(Tok::Percent),
                '.' => {
                    if self.chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                        self.number('.')?;
                    } else {
                        self.push(Tok::Dot);
                    }
                }
                '+' => {
                    let tok = if self.eat('=') { Tok::PlusAssign } else { Tok::Plus };
                    self.push(tok);
                }
                '-' => {
                    let tok = if self.eat('=') { Tok::MinusAssign } else { Tok::Minus };
                    self.push(tok);
                }
                '*' => {
                    let tok = if self.eat('*') {
                        Tok::DoubleStar
                    } else if self.eat('=') {
                        Tok::StarAssign
                    } else {
                        Tok::Star
                    };
                    self.push(tok);
                }
                '/' => {
                    let tok = if self.eat('/') {
                        Tok::DoubleSlash
                    } else if self.eat('=') {
                        Tok::SlashAssign
                    } else {
                        Tok::Slash
                    };
                    self.push(tok);
                }
                '=' => {
                    let tok = if self.eat('=') { Tok::EqEq } else { Tok::Assign };
                    self.push(tok);
                }
                '!' => {
                    if !self.eat('=') {
                        return Err(ScriptError::syntax("unexpected '!'", self.line));
                    }
                    self.push(Tok::NotEq);
                }
                '<' => {
                    let tok = if self.eat('=') { Tok::Le } else { Tok::Lt };
                    self.push(tok);
                }
                '>' => {
                    let tok = if self.eat('=') { Tok::Ge } else { Tok::Gt };
                    self.push(tok);
                }
                '"' | '\'' => {
                    let text = self.string_body(c, false)?;
                    self.push(Tok::Str(text));
                }
                c if c.is_ascii_digit() => self.number(c)?,
                c if c.is_alphabetic() || c == '_' => self.word(c)?,
                other => {
                    return Err(ScriptError::syntax(
                        format!("unexpected character '{}'", other),
                        self.line,
                    ));
                }
            }
        }
        if self.depth > 0 {
            return Err(ScriptError::syntax("unclosed bracket at end of script", self.line));
        }
        self.push(Tok::Newline);
        self.push(Tok::Eof);
        Ok(())
    }

    fn open(&mut self, tok: Tok) {
        self.depth += 1;
        self.push(tok);
    }

    fn close(&mut self, tok: Tok) -> ScriptResult<()> {
        if self.depth == 0 {
            return Err(ScriptError::syntax("unmatched closing bracket", self.line));
        }
        self.depth -= 1;
        self.push(tok);
        Ok(())
    }

    fn word(&mut self, first: char) -> ScriptResult<()> {
        let mut word = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        // String prefixes: r, b, f and their combinations.
        if let Some(&quote) = self.chars.peek() {
            if (quote == '"' || quote == '\'') && is_string_prefix(&word) {
                self.chars.next();
                let lower = word.to_ascii_lowercase();
                let raw = lower.contains('r');
                let text = self.string_body(quote, raw)?;
                if lower.contains('f') {
                    let parts = split_fstring(&text, self.line)?;
                    self.push(Tok::FStr(parts));
                } else {
                    self.push(Tok::Str(text));
                }
                return Ok(());
            }
        }

        self.push(Tok::Name(word));
        Ok(())
    }

    fn number(&mut self, first: char) -> ScriptResult<()> {
        let mut text = String::from(first);
        let mut is_float = first == '.';
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
            } else if c == 'e' || c == 'E' {
                is_float = true;
                text.push(c);
                self.chars.next();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        text.push(sign);
                        self.chars.next();
                    }
                }
                continue;
            } else {
                break;
            }
            self.chars.next();
        }

        let cleaned: String = text.chars().filter(|c| *c != '_').collect();
        if !is_float {
            if let Ok(value) = cleaned.parse::<i64>() {
                self.push(Tok::Int(value));
                return Ok(());
            }
        }
        match cleaned.parse::<f64>() {
            Ok(value) => {
                self.push(Tok::Float(value));
                Ok(())
            }
            Err(_) => Err(ScriptError::syntax(format!("invalid number '{}'", text), self.line)),
        }
    }

    /// Read a string body after its opening quote (handles triple quotes).
    fn string_body(&mut self, quote: char, raw: bool) -> ScriptResult<String> {
        let start_line = self.line;
        let triple = if self.chars.peek() == Some(&quote) {
            self.chars.next();
            if self.chars.peek() == Some(&quote) {
                self.chars.next();
                true
            } else {
                // Empty string literal.
                return Ok(String::new());
            }
        } else {
            false
        };

        let mut text = String::new();
        loop {
            let Some(c) = self.chars.next() else {
                return Err(ScriptError::syntax("unterminated string", start_line));
            };
            match c {
                c if c == quote => {
                    if !triple {
                        return Ok(text);
                    }
                    if self.eat(quote) {
                        if self.eat(quote) {
                            return Ok(text);
                        }
                        text.push(quote);
                    }
                    text.push(quote);
                }
                '\n' => {
                    if !triple {
                        return Err(ScriptError::syntax("unterminated string", start_line));
                    }
                    self.line += 1;
                    text.push('\n');
                }
                '\\' if !raw => {
                    let Some(escaped) = self.chars.next() else {
                        return Err(ScriptError::syntax("unterminated string", start_line));
                    };
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        '0' => text.push('\0'),
                        '\\' => text.push('\\'),
                        '\'' => text.push('\''),
                        '"' => text.push('"'),
                        '\n' => self.line += 1,
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                }
                c => text.push(c),
            }
        }
    }
}

fn is_string_prefix(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "r" | "b" | "f" | "rb" | "br" | "rf" | "fr"
    )
}

/// Split an f-string body into literal text and `{expr[:spec]}` fields.
fn split_fstring(text: &str, line: usize) -> ScriptResult<Vec<RawFPart>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(ScriptError::syntax("single '}' in f-string", line)),
            '{' => {
                if !literal.is_empty() {
                    parts.push(RawFPart::Literal(std::mem::take(&mut literal)));
                }
                let mut source = String::new();
                let mut spec: Option<String> = None;
                let mut depth = 0usize;
                let mut quote: Option<char> = None;
                loop {
                    let Some(c) = chars.next() else {
                        return Err(ScriptError::syntax("unterminated field in f-string", line));
                    };
                    let in_spec = spec.is_some();
                    let target = match spec.as_mut() {
                        Some(spec) => spec,
                        None => &mut source,
                    };
                    if let Some(q) = quote {
                        target.push(c);
                        if c == q {
                            quote = None;
                        }
                        continue;
                    }
                    match c {
                        '\'' | '"' => {
                            quote = Some(c);
                            target.push(c);
                        }
                        '(' | '[' | '{' => {
                            depth += 1;
                            target.push(c);
                        }
                        ')' | ']' => {
                            depth = depth.saturating_sub(1);
                            target.push(c);
                        }
                        '}' if depth > 0 => {
                            depth -= 1;
                            target.push(c);
                        }
                        '}' => break,
                        ':' if depth == 0 && !in_spec => spec = Some(String::new()),
                        c => target.push(c),
                    }
                }
                // Conversions (`!r`, `!s`) have no effect on our formatting.
                let trimmed = source.trim_end();
                let source = match trimmed.rfind('!') {
                    Some(bang)
                        if matches!(&trimmed[bang..], "!r" | "!s" | "!a")
                            && !trimmed[..bang].ends_with('=') =>
                    {
                        trimmed[..bang].to_string()
                    }
                    _ => trimmed.to_string(),
                };
                if source.trim().is_empty() {
                    return Err(ScriptError::syntax("empty expression in f-string", line));
                }
                parts.push(RawFPart::Field { source, spec });
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        parts.push(RawFPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_basic_assignment() {
        assert_eq!(
            toks("result = len(df)"),
            vec![
                Tok::Name("result".into()),
                Tok::Assign,
                Tok::Name("len".into()),
                Tok::LParen,
                Tok::Name("df".into()),
                Tok::RParen,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_joined() {
        let tokens = toks("x = [1,\n 2]\ny = 3");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("2.5")[0], Tok::Float(2.5));
        assert_eq!(toks("1e3")[0], Tok::Float(1000.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
        assert_eq!(toks("99999999999999999999")[0], Tok::Float(1e20));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(toks(r#""a\tb""#)[0], Tok::Str("a\tb".into()));
        assert_eq!(toks("'it''s'")[0], Tok::Str("it".into()));
        assert_eq!(toks(r"r'\d+'")[0], Tok::Str("\\d+".into()));
        assert_eq!(toks("''")[0], Tok::Str(String::new()));
        assert_eq!(toks("'''a\nb'''")[0], Tok::Str("a\nb".into()));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            toks("# header\nx = 1 # trailing"),
            vec![
                Tok::Newline,
                Tok::Name("x".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_fstring_fields() {
        let parts = match &toks("f'mean={df[\"x\"].mean():.2f} {{raw}}'")[0] {
            Tok::FStr(parts) => parts.clone(),
            other => panic!("expected f-string, got {:?}", other),
        };
        assert_eq!(
            parts,
            vec![
                RawFPart::Literal("mean=".into()),
                RawFPart::Field {
                    source: "df[\"x\"].mean()".into(),
                    spec: Some(".2f".into())
                },
                RawFPart::Literal(" {raw}".into()),
            ]
        );
    }

    #[test]
    fn test_fstring_spec_keeps_later_colons() {
        let parts = match &toks("f'{ts:%H:%M}'")[0] {
            Tok::FStr(parts) => parts.clone(),
            other => panic!("expected f-string, got {:?}", other),
        };
        assert_eq!(
            parts,
            vec![RawFPart::Field {
                source: "ts".into(),
                spec: Some("%H:%M".into())
            }]
        );
    }

    #[test]
    fn test_unterminated_string_reports_line() {
        let err = tokenize("x = 1\ny = 'oops").unwrap_err();
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_unbalanced_brackets() {
        assert!(tokenize("x = (1").is_err());
        assert!(tokenize("x = 1)").is_err());
    }
}
