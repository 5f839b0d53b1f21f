//! 表达式解析器 - 手写递归下降
//!
//! 优先级从低到高：
//! 条件表达式 `a if c else b` → `or` → `and` → `not` → 比较 / `in` → `~` → `+ -`
//! → `* / %` → 一元负号 → 后缀（`.attr`、`[i]`、`[a:b]`、`| filter`）→ 基本项

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::error::TemplateError;
use super::filters::is_builtin;
use super::lexer::{SpannedToken, Token, tokenize};

/// 解析单个 `{{ ... }}` 块中的表达式
///
/// `base` 为表达式在模板中的起始偏移，用于报告错误位置。
pub fn parse_expression(source: &str, base: usize) -> Result<Expr, TemplateError> {
    let tokens = tokenize(source, base)?;
    let mut parser = Parser::new(&tokens, base + source.len());

    if parser.is_at_end() {
        return Err(TemplateError::syntax("表达式为空", base));
    }

    let expr = parser.parse_conditional()?;

    if let Some((token, span)) = parser.peek_spanned() {
        return Err(TemplateError::syntax(
            format!("表达式末尾存在多余的 token '{}'", token),
            span.start,
        ));
    }

    Ok(expr)
}

/// 递归下降解析器
struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    /// 输入结束位置，用于 EOF 错误
    end: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [SpannedToken], end: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
        }
    }

    // === 工具方法 ===

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_spanned(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// 当前位置偏移（EOF 时指向输入末尾）
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::syntax(message, self.offset())
    }

    fn expect(&mut self, expected: &Token) -> Result<(), TemplateError> {
        if self.eat(expected) {
            return Ok(());
        }
        match self.peek() {
            Some(found) => Err(self.error(format!("期望 '{}'，实际为 '{}'", expected, found))),
            None => Err(self.error(format!("期望 '{}'，但表达式已结束", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, TemplateError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            Some(found) => Err(self.error(format!("期望标识符，实际为 '{}'", found))),
            None => Err(self.error("期望标识符，但表达式已结束")),
        }
    }

    /// 函数名在编译期确定，未知函数直接报错
    fn function_name(&mut self) -> Result<String, TemplateError> {
        let name = self.expect_ident()?;
        if !is_builtin(&name) {
            return Err(TemplateError::UnknownFunction(name));
        }
        Ok(name)
    }

    // === 语法规则 ===

    /// `then if cond else otherwise`
    fn parse_conditional(&mut self) -> Result<Expr, TemplateError> {
        let then = self.parse_or()?;

        if !self.eat(&Token::If) {
            return Ok(then);
        }

        let cond = self.parse_or()?;
        let otherwise = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_conditional()?))
        } else {
            None
        };

        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise,
        })
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, TemplateError> {
        if self.eat(&Token::Not) {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_concat()?;

        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                // `not in` 需要向前看一个 token，单独的 `not` 不属于比较
                Some(Token::Not) if self.peek_nth(1) == Some(&Token::In) => {
                    self.pos += 1;
                    BinaryOp::NotIn
                }
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_concat()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_additive()?;
        while self.eat(&Token::Tilde) {
            let right = self.parse_additive()?;
            left = Expr::binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, TemplateError> {
        if self.eat(&Token::Minus) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    expr = Expr::Attr {
                        target: Box::new(expr),
                        name,
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    expr = self.parse_subscript(expr)?;
                }
                Some(Token::Pipe) => {
                    self.pos += 1;
                    let name = self.function_name()?;
                    let args = if self.check(&Token::LParen) {
                        self.parse_args()?
                    } else {
                        Vec::new()
                    };
                    expr = Expr::Filter {
                        value: Box::new(expr),
                        name,
                        args,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// `[` 之后的下标或切片
    fn parse_subscript(&mut self, target: Expr) -> Result<Expr, TemplateError> {
        let start = if self.check(&Token::Colon) {
            None
        } else {
            Some(Box::new(self.parse_conditional()?))
        };

        if !self.eat(&Token::Colon) {
            self.expect(&Token::RBracket)?;
            let index = start.ok_or_else(|| self.error("下标不能为空"))?;
            return Ok(Expr::Index {
                target: Box::new(target),
                index,
            });
        }

        let end = if self.check(&Token::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_conditional()?))
        };
        self.expect(&Token::RBracket)?;

        Ok(Expr::Slice {
            target: Box::new(target),
            start,
            end,
        })
    }

    /// `(a, b, ...)`
    fn parse_args(&mut self) -> Result<Vec<Expr>, TemplateError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();

        if self.eat(&Token::RParen) {
            return Ok(args);
        }

        loop {
            args.push(self.parse_conditional()?);
            if self.eat(&Token::Comma) {
                // 允许尾随逗号
                if self.eat(&Token::RParen) {
                    break;
                }
                continue;
            }
            self.expect(&Token::RParen)?;
            break;
        }

        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        let offset = self.offset();
        let token = match self.advance() {
            Some(token) => token.clone(),
            None => return Err(TemplateError::syntax("表达式意外结束", offset)),
        };

        match token {
            Token::Int(n) => Ok(Expr::Literal(Value::from(n))),
            Token::Float(n) => Ok(Expr::Literal(Value::from(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => {
                if self.check(&Token::LParen) {
                    if !is_builtin(&name) {
                        return Err(TemplateError::UnknownFunction(name));
                    }
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        function: name,
                        args,
                    })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                let expr = self.parse_conditional()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_conditional()?);
                        if self.eat(&Token::Comma) {
                            if self.eat(&Token::RBracket) {
                                break;
                            }
                            continue;
                        }
                        self.expect(&Token::RBracket)?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            other => Err(TemplateError::syntax(
                format!("意外的 token '{}'", other),
                offset,
            )),
        }
    }
}
