//! Recursive-descent parser for the snippet language

use super::ast::*;
use super::error::{SandboxError, SandboxResult};
use super::lexer::{tokenize, Tok, Token};

pub fn parse_program(src: &str) -> SandboxResult<Vec<Stmt>> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(body)
}

/// Parse a standalone expression, as found inside f-string braces.
pub fn parse_expression(src: &str, line: usize) -> SandboxResult<Expr> {
    let tokens = tokenize(src).map_err(|e| SandboxError { line, ..e })?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression_list().map_err(|e| SandboxError { line, ..e })?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(SandboxError::syntax("f-string: expecting '}'", line));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

const AUG_OPS: &[(&str, BinOp)] = &[
    ("+=", BinOp::Add),
    ("-=", BinOp::Sub),
    ("*=", BinOp::Mul),
    ("/=", BinOp::Div),
    ("//=", BinOp::FloorDiv),
    ("%=", BinOp::Mod),
    ("**=", BinOp::Pow),
];

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::syntax(message, self.line())
    }

    fn expect_op(&mut self, op: &str) -> SandboxResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", op, describe(self.peek()))))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> SandboxResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", kw, describe(self.peek()))))
        }
    }

    fn identifier(&mut self) -> SandboxResult<String> {
        match self.peek().clone() {
            Tok::Name(name) if !is_reserved(&name) => {
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", describe(&other)))),
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> SandboxResult<Vec<Stmt>> {
        let line = self.line();
        let head = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        let kind = match head.as_str() {
            "for" => self.for_statement()?,
            "while" => self.while_statement()?,
            "if" => self.if_statement()?,
            "def" | "class" | "try" | "with" | "return" | "global" | "async" | "raise" | "del" => {
                return Err(self.error(format!("'{}' statements are not supported", head)));
            }
            _ => return self.simple_statements(),
        };
        Ok(vec![Stmt { line, kind }])
    }

    fn simple_statements(&mut self) -> SandboxResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.simple_statement()?;
            stmts.push(Stmt { line, kind });
            if !self.eat_op(";") || self.at(&Tok::Newline) {
                break;
            }
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) {
            return Err(self.error(format!("invalid syntax near {}", describe(self.peek()))));
        }
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> SandboxResult<StmtKind> {
        if self.eat_keyword("pass") {
            return Ok(StmtKind::Pass);
        }
        if self.eat_keyword("break") {
            return Ok(StmtKind::Break);
        }
        if self.eat_keyword("continue") {
            return Ok(StmtKind::Continue);
        }
        if self.eat_keyword("import") {
            let mut names = Vec::new();
            loop {
                let path = self.dotted_name()?;
                let alias = if self.eat_keyword("as") { Some(self.identifier()?) } else { None };
                names.push(ImportName { path, alias });
                if !self.eat_op(",") {
                    break;
                }
            }
            return Ok(StmtKind::Import(names));
        }
        if self.eat_keyword("from") {
            let module = self.dotted_name()?;
            self.expect_keyword("import")?;
            let parenthesized = self.eat_op("(");
            let mut names = Vec::new();
            loop {
                if self.eat_op("*") {
                    return Err(self.error("wildcard imports are not supported"));
                }
                let path = self.identifier()?;
                let alias = if self.eat_keyword("as") { Some(self.identifier()?) } else { None };
                names.push(ImportName { path, alias });
                if !self.eat_op(",") || (parenthesized && self.at_op(")")) {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
            return Ok(StmtKind::FromImport { module, names });
        }

        let first = self.expression_list()?;

        for (op, bin) in AUG_OPS {
            if self.eat_op(op) {
                if !first.is_place() {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                let value = self.expression_list()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op: *bin,
                    value,
                });
            }
        }

        if self.at_op("=") {
            let mut targets = vec![first];
            let mut value = None;
            while self.eat_op("=") {
                let next = self.expression_list()?;
                if let Some(prev) = value.replace(next) {
                    targets.push(prev);
                }
            }
            for target in &targets {
                check_target(target).map_err(|msg| self.error(msg))?;
            }
            let value = value.ok_or_else(|| self.error("expected a value after '='"))?;
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> SandboxResult<String> {
        let mut path = self.identifier()?;
        while self.eat_op(".") {
            path.push('.');
            path.push_str(&self.identifier()?);
        }
        Ok(path)
    }

    fn block(&mut self) -> SandboxResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&Tok::Indent) {
            return Err(SandboxError::new(
                super::error::ErrorKind::Indentation,
                "expected an indented block",
            )
            .at(self.line()));
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn for_statement(&mut self) -> SandboxResult<StmtKind> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.expression_list()?;
        let body = self.block()?;
        Ok(StmtKind::For { target, iter, body })
    }

    fn while_statement(&mut self) -> SandboxResult<StmtKind> {
        self.expect_keyword("while")?;
        let condition = self.expression()?;
        let body = self.block()?;
        Ok(StmtKind::While { condition, body })
    }

    fn if_statement(&mut self) -> SandboxResult<StmtKind> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let condition = self.expression()?;
        branches.push((condition, self.block()?));

        let mut orelse = Vec::new();
        loop {
            if self.eat_keyword("elif") {
                let condition = self.expression()?;
                branches.push((condition, self.block()?));
            } else if self.eat_keyword("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    /// `a`, `a, b`, `(a, b)` as loop/comprehension targets
    fn target_list(&mut self) -> SandboxResult<Expr> {
        let mut items = vec![self.bitor()?];
        let mut trailing = false;
        while self.eat_op(",") {
            trailing = true;
            if self.at_keyword("in") {
                break;
            }
            items.push(self.bitor()?);
        }
        let target = if items.len() == 1 && !trailing {
            items.remove(0)
        } else {
            Expr::Tuple(items)
        };
        check_target(&target).map_err(|msg| self.error(msg))?;
        Ok(target)
    }

    // ---- expressions ----

    /// Comma-separated expressions form a tuple.
    fn expression_list(&mut self) -> SandboxResult<Expr> {
        let first = self.expression()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at(&Tok::Newline) || self.at_op("=") || self.at_op(")") || self.at(&Tok::Eof) {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expression(&mut self) -> SandboxResult<Expr> {
        if self.eat_keyword("lambda") {
            let mut params = Vec::new();
            if !self.at_op(":") {
                loop {
                    params.push(self.identifier()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
            }
            self.expect_op(":")?;
            let body = self.expression()?;
            return Ok(Expr::Lambda {
                params,
                body: Box::new(body),
            });
        }

        let body = self.or_expr()?;
        if self.at_keyword("if") {
            // Ternary only; a bare `if` here belongs to a comprehension.
            let save = self.pos;
            self.pos += 1;
            let condition = self.or_expr()?;
            if self.eat_keyword("else") {
                let orelse = self.expression()?;
                return Ok(Expr::IfElse {
                    condition: Box::new(condition),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                });
            }
            self.pos = save;
        }
        Ok(body)
    }

    fn or_expr(&mut self) -> SandboxResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = Expr::Bool(BoolOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> SandboxResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            let right = self.not_expr()?;
            left = Expr::Bool(BoolOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> SandboxResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let next_is = |p: &Self, kw: &str| matches!(p.peek_at(1), Tok::Name(m) if m == kw);
        let (op, width) = match self.peek().clone() {
            Tok::Op("==") => (CmpOp::Eq, 1),
            Tok::Op("!=") => (CmpOp::NotEq, 1),
            Tok::Op("<") => (CmpOp::Lt, 1),
            Tok::Op("<=") => (CmpOp::LtE, 1),
            Tok::Op(">") => (CmpOp::Gt, 1),
            Tok::Op(">=") => (CmpOp::GtE, 1),
            Tok::Name(n) if n == "in" => (CmpOp::In, 1),
            Tok::Name(n) if n == "not" && next_is(self, "in") => (CmpOp::NotIn, 2),
            Tok::Name(n) if n == "is" && next_is(self, "not") => (CmpOp::IsNot, 2),
            Tok::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn comparison(&mut self) -> SandboxResult<Expr> {
        let left = self.bitor()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.bitor()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn bitor(&mut self) -> SandboxResult<Expr> {
        let mut left = self.bitand()?;
        while self.eat_op("|") {
            let right = self.bitand()?;
            left = Expr::Binary(BinOp::BitOr, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn bitand(&mut self) -> SandboxResult<Expr> {
        let mut left = self.arith()?;
        while self.eat_op("&") {
            let right = self.arith()?;
            left = Expr::Binary(BinOp::BitAnd, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn arith(&mut self) -> SandboxResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> SandboxResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> SandboxResult<Expr> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Pos
        } else if self.eat_op("~") {
            UnaryOp::Invert
        } else {
            return self.power();
        };
        let operand = self.factor()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> SandboxResult<Expr> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> SandboxResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(n) => n,
                    other => {
                        return Err(self.error(format!(
                            "expected an attribute name, found {}",
                            describe(&other)
                        )))
                    }
                };
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> SandboxResult<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.eat_op(")") {
            if self.eat_op("**") {
                args.push(Arg::KwSplat(self.expression()?));
            } else if self.eat_op("*") {
                args.push(Arg::Splat(self.expression()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("=")) {
                let name = self.identifier()?;
                self.expect_op("=")?;
                args.push(Arg::Keyword(name, self.expression()?));
            } else {
                let value = self.expression()?;
                if self.at_keyword("for") {
                    let clauses = self.comprehension_clauses()?;
                    args.push(Arg::Positional(Expr::ListComp {
                        element: Box::new(value),
                        clauses,
                    }));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn subscript(&mut self) -> SandboxResult<Expr> {
        let parse_bound = |p: &mut Self| -> SandboxResult<Option<Box<Expr>>> {
            if p.at_op(":") || p.at_op("]") || p.at_op(",") {
                Ok(None)
            } else {
                Ok(Some(Box::new(p.expression()?)))
            }
        };

        let mut items = Vec::new();
        loop {
            let lower = parse_bound(self)?;
            let item = if self.eat_op(":") {
                let upper = parse_bound(self)?;
                let step = if self.eat_op(":") { parse_bound(self)? } else { None };
                Expr::Slice { lower, upper, step }
            } else {
                match lower {
                    Some(e) => *e,
                    None => return Err(self.error("empty subscript")),
                }
            };
            items.push(item);
            if !self.eat_op(",") || self.at_op("]") {
                break;
            }
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(Expr::Tuple(items))
        }
    }

    fn comprehension_clauses(&mut self) -> SandboxResult<Vec<Comprehension>> {
        let mut clauses = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_expr()?;
            let mut conditions = Vec::new();
            while self.eat_keyword("if") {
                conditions.push(self.or_expr()?);
            }
            clauses.push(Comprehension {
                target,
                iter,
                conditions,
            });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> SandboxResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Tok::Str(s) => self.string_concat(Some(s), None, line),
            Tok::FStr(s) => self.string_concat(None, Some(s), line),
            Tok::Name(n) => match n.as_str() {
                "None" => Ok(Expr::Literal(Literal::None)),
                "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" => Ok(Expr::Literal(Literal::Bool(false))),
                _ if is_reserved(&n) => Err(SandboxError::syntax(
                    format!("unexpected keyword '{}'", n),
                    line,
                )),
                _ => Ok(Expr::Name(n)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.at_keyword("for") {
                    let clauses = self.comprehension_clauses()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clauses,
                    });
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expression()?;
                if self.at_keyword("for") {
                    let clauses = self.comprehension_clauses()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clauses,
                    });
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => self.brace_display(),
            other => Err(SandboxError::syntax(
                format!("invalid syntax near {}", describe(&other)),
                line,
            )),
        }
    }

    fn brace_display(&mut self) -> SandboxResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let key = self.expression()?;
        if !self.eat_op(":") {
            return Err(self.error("set literals are not supported"));
        }
        let value = self.expression()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::DictComp {
                key: Box::new(key),
                value: Box::new(value),
                clauses,
            });
        }
        let mut entries = vec![(key, value)];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            let key = self.expression()?;
            self.expect_op(":")?;
            entries.push((key, self.expression()?));
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }

    /// Adjacent literals concatenate; any f-string makes the whole an f-string.
    fn string_concat(
        &mut self,
        plain: Option<String>,
        fstring: Option<String>,
        line: usize,
    ) -> SandboxResult<Expr> {
        let mut parts: Vec<FPart> = Vec::new();
        let mut is_f = false;
        let mut push = |parts: &mut Vec<FPart>, plain: Option<String>, fstr: Option<String>| -> SandboxResult<()> {
            if let Some(s) = plain {
                parts.push(FPart::Lit(s));
            }
            if let Some(s) = fstr {
                is_f = true;
                parts.extend(parse_fstring(&s, line)?);
            }
            Ok(())
        };
        push(&mut parts, plain, fstring)?;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    push(&mut parts, Some(s), None)?;
                }
                Tok::FStr(s) => {
                    self.pos += 1;
                    push(&mut parts, None, Some(s))?;
                }
                _ => break,
            }
        }

        if !is_f {
            let text: String = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Lit(s) => s,
                    FPart::Expr { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Literal(Literal::Str(text)));
        }
        Ok(Expr::FString(parts))
    }
}

/// Split an f-string body into literal text and `{expr!c:spec}` fields.
fn parse_fstring(body: &str, line: usize) -> SandboxResult<Vec<FPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            literal.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(SandboxError::syntax("f-string: single '}' is not allowed", line));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        if !literal.is_empty() {
            parts.push(FPart::Lit(std::mem::take(&mut literal)));
        }

        // Scan the replacement field, respecting nested brackets and quotes.
        i += 1;
        let start = i;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut expr_end = None;
        let mut conversion = None;
        let mut spec_start = None;
        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && chars.get(i + 1) != Some(&'=') && expr_end.is_none() => {
                    expr_end = Some(i);
                    conversion = chars.get(i + 1).copied();
                    i += 1;
                }
                ':' if depth == 0 && spec_start.is_none() => {
                    if expr_end.is_none() {
                        expr_end = Some(i);
                    }
                    spec_start = Some(i + 1);
                }
                _ => {}
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(SandboxError::syntax("f-string: expecting '}'", line));
        }

        let end = expr_end.unwrap_or(i);
        let source: String = chars[start..end].iter().collect();
        if source.trim().is_empty() {
            return Err(SandboxError::syntax("f-string: empty expression not allowed", line));
        }
        let spec = spec_start.map(|s| chars[s..i].iter().collect::<String>());
        parts.push(FPart::Expr {
            expr: Box::new(parse_expression(source.trim(), line)?),
            conversion,
            spec,
        });
        i += 1;
    }

    if !literal.is_empty() {
        parts.push(FPart::Lit(literal));
    }
    Ok(parts)
}

fn check_target(target: &Expr) -> Result<(), String> {
    match target {
        Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..) => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(check_target),
        _ => Err("cannot assign to expression".to_string()),
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "and" | "or" | "not" | "in" | "is" | "if" | "elif" | "else" | "for" | "while" | "def"
            | "class" | "return" | "import" | "from" | "as" | "pass" | "break" | "continue"
            | "lambda" | "try" | "except" | "finally" | "with" | "raise" | "global" | "del"
            | "yield" | "async" | "await" | "None" | "True" | "False"
    )
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{}'", n),
        Tok::Int(i) => format!("'{}'", i),
        Tok::Float(f) => format!("'{}'", f),
        Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
        Tok::Op(o) => format!("'{}'", o),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "unexpected indent".to_string(),
        Tok::Dedent => "unindent".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(src: &str) -> StmtKind {
        let mut body = parse_program(src).unwrap();
        assert_eq!(body.len(), 1, "{:?}", body);
        body.remove(0).kind
    }

    #[test]
    fn test_call_with_keywords() {
        let StmtKind::Assign { targets, value } = one("fig = px.bar(df, x='team', y=\"wins\")") else {
            panic!("expected assignment");
        };
        assert_eq!(targets, vec![Expr::Name("fig".into())]);
        let Expr::Call { func, args } = value else { panic!("expected call") };
        assert_eq!(*func, Expr::Attribute(Box::new(Expr::Name("px".into())), "bar".into()));
        assert_eq!(args.len(), 3);
        assert!(matches!(&args[1], Arg::Keyword(k, _) if k == "x"));
    }

    #[test]
    fn test_for_if_blocks() {
        let src = "for i, row in enumerate(data):\n    if row['wins'] > 5:\n        top.append(row)\n    elif i == 0:\n        pass\n    else:\n        continue\n";
        let StmtKind::For { target, body, .. } = one(src) else { panic!() };
        assert!(matches!(target, Expr::Tuple(ref items) if items.len() == 2));
        let StmtKind::If { branches, orelse } = &body[0].kind else { panic!() };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse[0].kind, StmtKind::Continue);
        assert_eq!(body[0].line, 2);
    }

    #[test]
    fn test_comprehensions_and_ternary() {
        let StmtKind::Assign { value, .. } = one("xs = [r['team'] for r in data if r['wins'] > 3]") else { panic!() };
        assert!(matches!(value, Expr::ListComp { ref clauses, .. } if clauses[0].conditions.len() == 1));

        let StmtKind::Assign { value, .. } = one("d = {k: v for k, v in pairs}") else { panic!() };
        assert!(matches!(value, Expr::DictComp { .. }));

        let StmtKind::Assign { value, .. } = one("c = 'a' if flag else 'b'") else { panic!() };
        assert!(matches!(value, Expr::IfElse { .. }));
    }

    #[test]
    fn test_fstring_fields() {
        let StmtKind::Expr(Expr::FString(parts)) = one("f\"{season}||{team!s} {pct:.1f}%\"") else {
            panic!()
        };
        assert_eq!(parts.len(), 6);
        assert!(matches!(&parts[1], FPart::Lit(s) if s == "||"));
        assert!(matches!(&parts[4], FPart::Expr { spec: Some(s), .. } if s == ".1f"));
    }

    #[test]
    fn test_slices_and_masks() {
        let StmtKind::Assign { value, .. } = one("top = df[(df['a'] > 1) & (df['b'] == 'x')][:5]") else {
            panic!()
        };
        let Expr::Subscript(_, index) = value else { panic!() };
        assert!(matches!(*index, Expr::Slice { lower: None, .. }));
    }

    #[test]
    fn test_imports() {
        assert_eq!(
            one("import plotly.express as px"),
            StmtKind::Import(vec![ImportName {
                path: "plotly.express".into(),
                alias: Some("px".into())
            }])
        );
        assert!(matches!(
            one("from plotly.subplots import make_subplots"),
            StmtKind::FromImport { ref module, .. } if module == "plotly.subplots"
        ));
    }

    #[test]
    fn test_syntax_errors_carry_line() {
        let err = parse_program("x = 1\ny = (2,\n").unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Syntax);
        let err = parse_program("a = 1\ndef f():\n    pass\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("def"));
    }

    #[test]
    fn test_tuple_assignment_and_augassign() {
        let StmtKind::Assign { targets, value } = one("a, b = 1, 2") else { panic!() };
        assert!(matches!(&targets[0], Expr::Tuple(items) if items.len() == 2));
        assert!(matches!(value, Expr::Tuple(_)));
        assert!(matches!(one("total += row['wins']"), StmtKind::AugAssign { op: BinOp::Add, .. }));
    }
}
