//! Tokenizer for the snippet language
//!
//! Produces an indentation-aware token stream: `Newline` ends a logical
//! line, `Indent`/`Dedent` bracket blocks. Newlines inside brackets and
//! after a trailing backslash do not end the line.

use super::error::{ErrorKind, SandboxError, SandboxResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string, escapes already processed
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", "...", "==", "!=", "<=", ">=", "**", "//", "+=", "-=", "*=", "/=", "%=", "->",
    "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
    "&", "|", "~", "^", "@", "!",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

pub fn tokenize(src: &str) -> SandboxResult<Vec<Token>> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        )
    }

    fn run(&mut self) -> SandboxResult<()> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                self.handle_indentation()?;
                continue;
            }

            let c = self.chars[self.pos];
            match c {
                '#' => {
                    while self.peek(0).is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek(1) == Some('\r') && self.peek(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                '\n' => {
                    if self.depth == 0 && !self.last_is_newline() {
                        self.push(Tok::Newline);
                    }
                    self.pos += 1;
                    self.line += 1;
                    at_line_start = self.depth == 0;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '0'..='9' => self.number()?,
                '.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                '\'' | '"' => {
                    let body = self.string(c, false)?;
                    self.push(Tok::Str(body));
                }
                c if c.is_alphabetic() || c == '_' => self.name_or_prefixed_string()?,
                _ => self.operator()?,
            }
        }

        if !self.last_is_newline() {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure leading whitespace of the next non-blank line and emit
    /// `Indent`/`Dedent` tokens. Blank and comment-only lines are skipped.
    fn handle_indentation(&mut self) -> SandboxResult<()> {
        let width = loop {
            let mut width = 0;
            let mut offset = 0;
            while let Some(c) = self.peek(offset) {
                match c {
                    ' ' => width += 1,
                    '\t' => width += 8 - (width % 8),
                    '\x0c' | '\r' => {}
                    _ => break,
                }
                offset += 1;
            }
            self.pos += offset;

            match self.peek(0) {
                None => return Ok(()),
                Some('\n') | Some('#') => {
                    while self.peek(0).is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                    if self.peek(0) == Some('\n') {
                        self.pos += 1;
                        self.line += 1;
                    }
                }
                _ => break width,
            }
        };

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(SandboxError::new(
                    ErrorKind::Indentation,
                    "unindent does not match any outer indentation level",
                )
                .at(self.line));
            }
        }
        Ok(())
    }

    fn number(&mut self) -> SandboxResult<()> {
        let start = self.pos;
        let mut is_float = false;

        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X')) {
            self.pos += 2;
            while self.peek(0).is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.chars[start + 2..self.pos].iter().filter(|c| **c != '_').collect();
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| SandboxError::syntax("invalid hexadecimal literal", self.line))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        while let Some(c) = self.peek(0) {
            match c {
                '0'..='9' | '_' => self.pos += 1,
                '.' if !is_float => {
                    is_float = true;
                    self.pos += 1;
                }
                'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(0), Some('+' | '-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }

        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| SandboxError::syntax(format!("invalid number '{}'", text), self.line))?;
            self.push(Tok::Float(value));
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.push(Tok::Int(value)),
                Err(_) => {
                    let value = text.parse::<f64>().map_err(|_| {
                        SandboxError::syntax(format!("invalid number '{}'", text), self.line)
                    })?;
                    self.push(Tok::Float(value));
                }
            }
        }
        Ok(())
    }

    fn name_or_prefixed_string(&mut self) -> SandboxResult<()> {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if let Some(quote @ ('\'' | '"')) = self.peek(0) {
            let prefix = name.to_lowercase();
            if matches!(prefix.as_str(), "r" | "f" | "rf" | "fr" | "u" | "b" | "br" | "rb") {
                let raw = prefix.contains('r');
                let body = self.string(quote, raw)?;
                if prefix.contains('f') {
                    self.push(Tok::FStr(body));
                } else {
                    self.push(Tok::Str(body));
                }
                return Ok(());
            }
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn string(&mut self, quote: char, raw: bool) -> SandboxResult<String> {
        let start_line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(SandboxError::syntax("unterminated string literal", start_line));
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(SandboxError::syntax("unterminated string literal", start_line));
                }
                self.line += 1;
            }

            if c == '\\' {
                let next = self.peek(1);
                if raw {
                    out.push('\\');
                    if let Some(n) = next {
                        out.push(n);
                        if n == '\n' {
                            self.line += 1;
                        }
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                    continue;
                }
                self.pos += 2;
                match next {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('\n') => self.line += 1,
                    Some('x') => out.push(self.hex_escape(2)?),
                    Some('u') => out.push(self.hex_escape(4)?),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => {
                        return Err(SandboxError::syntax("unterminated string literal", start_line))
                    }
                }
                continue;
            }

            out.push(c);
            self.pos += 1;
        }
    }

    fn hex_escape(&mut self, len: usize) -> SandboxResult<char> {
        let digits: String = (0..len).filter_map(|i| self.peek(i)).collect();
        self.pos += digits.len();
        u32::from_str_radix(&digits, 16)
            .ok()
            .filter(|_| digits.len() == len)
            .and_then(char::from_u32)
            .ok_or_else(|| SandboxError::syntax("invalid escape sequence", self.line))
    }

    fn operator(&mut self) -> SandboxResult<()> {
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek(i) == Some(c));
            if matches {
                self.pos += op.chars().count();
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(*op));
                return Ok(());
            }
        }
        let c = self.chars[self.pos];
        Err(SandboxError::syntax(format!("invalid character '{}'", c), self.line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            toks("x = 1.5 # note"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Float(1.5),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indentation_blocks() {
        let t = toks("for a in b:\n    x = a\n\n    # c\ny = 2\n");
        assert!(t.contains(&Tok::Indent));
        let dedent = t.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert_eq!(t[dedent + 1], Tok::Name("y".into()));
    }

    #[test]
    fn test_brackets_join_lines() {
        let t = toks("fig = px.bar(\n    df,\n    x='team',\n)\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn test_strings_and_prefixes() {
        assert_eq!(toks("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(toks("r'a\\nb'")[0], Tok::Str("a\\nb".into()));
        assert_eq!(toks("f\"{x}||{y}\"")[0], Tok::FStr("{x}||{y}".into()));
        assert_eq!(toks("\"\"\"two\nlines\"\"\"")[0], Tok::Str("two\nlines".into()));
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a = 1\n\nb = 2\n").unwrap();
        let b = tokens.iter().find(|t| t.tok == Tok::Name("b".into())).unwrap();
        assert_eq!(b.line, 3);
    }

    #[test]
    fn test_errors() {
        assert_eq!(tokenize("x = 'open").unwrap_err().kind, ErrorKind::Syntax);
        assert_eq!(
            tokenize("if a:\n        b = 1\n    c = 2\n").unwrap_err().kind,
            ErrorKind::Indentation
        );
        assert_eq!(tokenize("x = $").unwrap_err().kind, ErrorKind::Syntax);
    }
}
