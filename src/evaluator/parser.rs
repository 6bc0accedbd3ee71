//! Recursive-descent parser for map function sources.
//!
//! Precedence, lowest first: assignment, `?:`, `||`, `&&`, equality,
//! relational, additive, multiplicative, unary, postfix (call, member,
//! index, `++`/`--`), primary.
//!
//! Only the outermost function expression is accepted; a function literal
//! anywhere inside it is a compile error, as is nesting deeper than
//! [`MAX_NESTING`].

use super::EvalError;
use super::ast::{BinaryOp, Expr, Function, LogicalOp, Stmt, UnaryOp};
use super::lexer::{Spanned, Token, tokenize};
use serde_json::Value;

/// Deepest statement or expression nesting accepted.
pub const MAX_NESTING: usize = 128;

/// Compile a source that must evaluate to a single function expression,
/// e.g. `(function(doc) { emit(doc._id, null); })`.
pub fn parse_function(source: &str) -> Result<Function, EvalError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
        loop_depth: 0,
        function_seen: false,
    };

    let expr = parser.parse_expression()?;
    parser.eat(";");
    parser.expect_eof()?;

    match expr {
        Expr::Function(function) => Ok(*function),
        _ => Err(EvalError::InvalidFunction(source.to_string())),
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    loop_depth: usize,
    function_seen: bool,
}

impl Parser<'_> {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, punct: &str) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == punct)
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == keyword)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.check(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), EvalError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", punct)))
        }
    }

    fn expect_eof(&self) -> Result<(), EvalError> {
        match self.peek() {
            Token::Eof => Ok(()),
            _ => Err(self.error("unexpected trailing input")),
        }
    }

    fn expect_ident(&mut self) -> Result<String, EvalError> {
        match self.advance() {
            Token::Ident(name) if !is_reserved(&name) => Ok(name),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected identifier"))
            }
        }
    }

    fn error(&self, message: &str) -> EvalError {
        let spanned = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        let found = match &spanned.token {
            Token::Ident(name) => format!("'{}'", name),
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string {:?}", s),
            Token::Punct(p) => format!("'{}'", p),
            Token::Eof => "end of input".to_string(),
        };
        EvalError::Compile {
            function: self.source.to_string(),
            message: format!("{}, found {} at offset {}", message, found, spanned.offset),
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_function_literal(&mut self) -> Result<Function, EvalError> {
        let name = match self.peek() {
            Token::Ident(_) => Some(self.expect_ident()?),
            _ => None,
        };

        self.expect("(")?;
        let mut params = Vec::new();
        if !self.check(")") {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect(")")?;

        let body = self.parse_block_body()?;
        Ok(Function { name, params, body })
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, EvalError> {
        self.expect("{")?;
        let mut body = Vec::new();
        while !self.check("}") {
            if matches!(self.peek(), Token::Eof) {
                return Err(self.error("expected '}'"));
            }
            body.push(self.parse_statement()?);
        }
        self.expect("}")?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Stmt, EvalError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, EvalError> {
        if self.eat(";") {
            return Ok(Stmt::Empty);
        }
        if self.check("{") {
            return Ok(Stmt::Block(self.parse_block_body()?));
        }
        if self.eat_keyword("var") || self.eat_keyword("let") || self.eat_keyword("const") {
            return self.parse_var();
        }
        if self.eat_keyword("if") {
            return self.parse_if();
        }
        if self.eat_keyword("for") {
            return self.parse_for();
        }
        if self.eat_keyword("while") {
            return self.parse_while();
        }
        if self.check_keyword("break") || self.check_keyword("continue") {
            if self.loop_depth == 0 {
                return Err(self.error("illegal statement outside of a loop"));
            }
            let stmt = if self.eat_keyword("break") {
                Stmt::Break
            } else {
                self.advance();
                Stmt::Continue
            };
            if !self.eat(";") && !self.check("}") {
                return Err(self.error("expected ';'"));
            }
            return Ok(stmt);
        }
        if self.eat_keyword("return") {
            if self.eat(";") || self.check("}") {
                return Ok(Stmt::Return(None));
            }
            let value = self.parse_expression()?;
            self.eat(";");
            return Ok(Stmt::Return(Some(value)));
        }

        let expr = self.parse_expression()?;
        if !self.eat(";") && !self.check("}") {
            return Err(self.error("expected ';'"));
        }
        Ok(Stmt::Expr(expr))
    }

    fn parse_var(&mut self) -> Result<Stmt, EvalError> {
        let bindings = self.parse_var_bindings()?;
        if !self.eat(";") && !self.check("}") {
            return Err(self.error("expected ';'"));
        }
        Ok(Stmt::Var(bindings))
    }

    fn parse_var_bindings(&mut self) -> Result<Vec<(String, Option<Expr>)>, EvalError> {
        let mut bindings = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            bindings.push((name, init));
            if !self.eat(",") {
                break;
            }
        }
        Ok(bindings)
    }

    fn parse_if(&mut self) -> Result<Stmt, EvalError> {
        self.expect("(")?;
        let cond = self.parse_expression()?;
        self.expect(")")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat_keyword("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    /// `for (init; cond; step) body`, each header part optional.
    fn parse_for(&mut self) -> Result<Stmt, EvalError> {
        self.expect("(")?;
        let init = if self.check(";") {
            None
        } else if self.eat_keyword("var") || self.eat_keyword("let") || self.eat_keyword("const") {
            Some(Box::new(Stmt::Var(self.parse_var_bindings()?)))
        } else {
            Some(Box::new(Stmt::Expr(self.parse_expression()?)))
        };
        self.expect(";")?;
        let cond = if self.check(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(";")?;
        let step = if self.check(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(")")?;
        let body = Box::new(self.parse_loop_body()?);
        Ok(Stmt::For { init, cond, step, body })
    }

    fn parse_while(&mut self) -> Result<Stmt, EvalError> {
        self.expect("(")?;
        let cond = self.parse_expression()?;
        self.expect(")")?;
        let body = Box::new(self.parse_loop_body()?);
        Ok(Stmt::While { cond, body })
    }

    fn parse_loop_body(&mut self) -> Result<Stmt, EvalError> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        body
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, EvalError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, EvalError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, EvalError> {
        let target = self.parse_conditional()?;
        let compound = match self.peek() {
            Token::Punct("=") => None,
            Token::Punct("+=") => Some(BinaryOp::Add),
            Token::Punct("-=") => Some(BinaryOp::Sub),
            Token::Punct("*=") => Some(BinaryOp::Mul),
            Token::Punct("/=") => Some(BinaryOp::Div),
            Token::Punct("%=") => Some(BinaryOp::Mod),
            _ => return Ok(target),
        };
        match target {
            Expr::Ident(name) => {
                self.advance();
                let mut value = self.parse_assignment()?;
                if let Some(op) = compound {
                    value = Expr::Binary(op, Box::new(Expr::Ident(name.clone())), Box::new(value));
                }
                Ok(Expr::Assign(name, Box::new(value)))
            }
            _ => Err(self.error("only plain variables can be assigned")),
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, EvalError> {
        let cond = self.parse_logical_or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then_value = self.parse_assignment()?;
        self.expect(":")?;
        let else_value = self.parse_assignment()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then_value),
            Box::new(else_value),
        ))
    }

    fn parse_logical_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_logical_and()?;
        while self.eat("||") {
            let right = self.parse_logical_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_equality()?;
        while self.eat("&&") {
            let right = self.parse_equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(punct) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNotEq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::LtEq),
                (">=", BinaryOp::GtEq),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        self.parse_binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Mod)],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.check("++") || self.check("--") {
            let delta = self.parse_update_delta();
            return match self.nested(Self::parse_unary)? {
                Expr::Ident(name) => Ok(Expr::Update {
                    name,
                    delta,
                    prefix: true,
                }),
                _ => Err(self.error("invalid increment or decrement operand")),
            };
        }

        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else if self.eat_keyword("typeof") {
            UnaryOp::Typeof
        } else {
            return self.parse_postfix();
        };
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let name = match self.advance() {
                    Token::Ident(name) => name,
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.error("expected property name"));
                    }
                };
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat("[") {
                let index = self.parse_expression()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.check("++") || self.check("--") {
                let Expr::Ident(name) = expr else {
                    return Err(self.error("invalid increment or decrement operand"));
                };
                let delta = self.parse_update_delta();
                return Ok(Expr::Update {
                    name,
                    delta,
                    prefix: false,
                });
            } else {
                return Ok(expr);
            }
        }
    }

    /// Consume `++` or `--`.
    fn parse_update_delta(&mut self) -> f64 {
        if self.eat("++") {
            1.0
        } else {
            self.advance();
            -1.0
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if self.eat(")") {
                return Ok(args);
            }
            self.expect(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(number_literal(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Punct("(") => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                self.advance();
                self.parse_array_literal()
            }
            Token::Punct("{") => {
                self.advance();
                self.parse_object_literal()
            }
            Token::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    "undefined" => Ok(Expr::Undefined),
                    "function" if self.function_seen => {
                        self.pos = self.pos.saturating_sub(1);
                        Err(self.error("nested function expressions are not supported"))
                    }
                    "function" => {
                        self.function_seen = true;
                        Ok(Expr::Function(Box::new(self.parse_function_literal()?)))
                    }
                    _ if is_reserved(&name) => {
                        self.pos = self.pos.saturating_sub(1);
                        Err(self.error("unexpected keyword"))
                    }
                    _ => Ok(Expr::Ident(name)),
                }
            }
            _ => Err(self.error("expected expression")),
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, EvalError> {
        let mut items = Vec::new();
        while !self.eat("]") {
            items.push(self.parse_assignment()?);
            if !self.check("]") {
                self.expect(",")?;
            }
        }
        Ok(Expr::Array(items))
    }

    fn parse_object_literal(&mut self) -> Result<Expr, EvalError> {
        let mut members = Vec::new();
        while !self.eat("}") {
            let key = match self.advance() {
                Token::Ident(name) => name,
                Token::Str(s) => s,
                Token::Number(n) => super::runtime::format_number(n),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error("expected property key"));
                }
            };
            self.expect(":")?;
            members.push((key, self.parse_assignment()?));
            if !self.check("}") {
                self.expect(",")?;
            }
        }
        Ok(Expr::Object(members))
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "var"
            | "let"
            | "const"
            | "if"
            | "else"
            | "for"
            | "while"
            | "break"
            | "continue"
            | "return"
            | "function"
            | "typeof"
            | "true"
            | "false"
            | "null"
    )
}

fn number_literal(n: f64) -> Value {
    super::runtime::number_value(n)
}
