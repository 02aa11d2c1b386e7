use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Lexer, Spanned, Token};
use crate::span::Span;

/// Parse a complete guest script
pub fn parse(source: &str) -> Result<Script, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, pos: 0 }.script()
}

/// Binding power of binary operators, loosest first
fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::BitOr => 3,
        BinaryOp::BitXor => 4,
        BinaryOp::BitAnd => 5,
        BinaryOp::Eq | BinaryOp::Ne => 6,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 7,
        BinaryOp::Shl | BinaryOp::Shr => 8,
        BinaryOp::Add | BinaryOp::Sub => 9,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 10,
    }
}

/// Vector and rotation components stop before comparisons so the closing `>` is not consumed
const COMPONENT_PRECEDENCE: u8 = 9;

fn binary_op(punct: &str) -> Option<BinaryOp> {
    Some(match punct {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "|" => BinaryOp::BitOr,
        "^" => BinaryOp::BitXor,
        "&" => BinaryOp::BitAnd,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "<<" => BinaryOp::Shl,
        ">>" => BinaryOp::Shr,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        _ => return None,
    })
}

fn assign_op(punct: &str) -> Option<AssignOp> {
    Some(match punct {
        "=" => AssignOp::Assign,
        "+=" => AssignOp::Add,
        "-=" => AssignOp::Sub,
        "*=" => AssignOp::Mul,
        "/=" => AssignOp::Div,
        "%=" => AssignOp::Mod,
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    // ===== Token helpers =====

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == w)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<Span, ParseError> {
        if self.is_punct(p) {
            Ok(self.advance().span)
        } else {
            Err(self.unexpected(&format!("'{}'", p)))
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) if !is_reserved(&name) => {
                let span = self.advance().span;
                Ok(Ident::new(name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn peek_type(&self) -> Option<TypeName> {
        match self.peek() {
            Token::Ident(word) => TypeName::from_keyword(word),
            _ => None,
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        let found = match self.peek() {
            Token::Ident(s) => format!("'{}'", s),
            Token::Integer(s) | Token::Float(s) => format!("'{}'", s),
            Token::Str(_) => "string literal".to_string(),
            Token::Punct(p) => format!("'{}'", p),
            Token::Eof => "end of input".to_string(),
        };
        ParseError::new(self.span(), format!("expected {}, found {}", wanted, found))
    }

    // ===== Top level =====

    fn script(mut self) -> Result<Script, ParseError> {
        let mut script = Script::default();

        while !self.is_word("default") && !self.is_word("state") {
            if matches!(self.peek(), Token::Eof) {
                return Err(ParseError::new(self.span(), "script has no default state"));
            }
            script.globals.push(self.global_item()?);
        }

        if !self.is_word("default") {
            return Err(self.unexpected("'default' state"));
        }

        while !matches!(self.peek(), Token::Eof) {
            script.states.push(self.state_decl()?);
        }

        Ok(script)
    }

    fn global_item(&mut self) -> Result<GlobalItem, ParseError> {
        let span = self.span();
        let ty = self.peek_type();
        if ty.is_some() {
            self.advance();
        }
        let name = self.expect_ident()?;

        if self.is_punct("(") {
            let params = self.params()?;
            let body = self.block()?;
            return Ok(GlobalItem::Function(FunctionDecl {
                ret: ty,
                name,
                params,
                body,
                span,
            }));
        }

        let Some(ty) = ty else {
            return Err(self.unexpected("'('"));
        };
        let init = if self.eat_punct("=") {
            Some(self.expr()?)
        } else {
            None
        };
        self.expect_punct(";")?;
        Ok(GlobalItem::Variable(VarDecl {
            ty,
            name,
            init,
            span,
        }))
    }

    fn params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            let Some(ty) = self.peek_type() else {
                return Err(self.unexpected("parameter type"));
            };
            self.advance();
            let name = self.expect_ident()?;
            params.push(Param { ty, name });
            if self.eat_punct(")") {
                return Ok(params);
            }
            self.expect_punct(",")?;
        }
    }

    fn state_decl(&mut self) -> Result<StateDecl, ParseError> {
        let span = self.span();
        let name = if self.is_word("default") {
            Ident::new("default", self.advance().span)
        } else if self.is_word("state") {
            self.advance();
            self.expect_ident()?
        } else {
            return Err(self.unexpected("state declaration"));
        };

        self.expect_punct("{")?;
        let mut handlers = Vec::new();
        while !self.eat_punct("}") {
            let hspan = self.span();
            let hname = self.expect_ident()?;
            let params = self.params()?;
            let body = self.block()?;
            handlers.push(Handler {
                name: hname,
                params,
                body,
                span: hspan,
            });
        }
        Ok(StateDecl {
            name,
            handlers,
            span,
        })
    }

    // ===== Statements =====

    fn block(&mut self) -> Result<Block, ParseError> {
        let span = self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if matches!(self.peek(), Token::Eof) {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.stmt()?);
        }
        Ok(Block { stmts, span })
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();

        if self.eat_punct(";") {
            return Ok(Stmt {
                kind: StmtKind::Empty,
                span,
            });
        }
        if self.is_punct("{") {
            let block = self.block()?;
            return Ok(Stmt {
                kind: StmtKind::Block(block),
                span,
            });
        }
        if self.eat_punct("@") {
            let label = self.expect_ident()?;
            self.expect_punct(";")?;
            return Ok(Stmt {
                kind: StmtKind::Label(label),
                span,
            });
        }
        if let Some(ty) = self.peek_type() {
            self.advance();
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect_punct(";")?;
            return Ok(Stmt {
                kind: StmtKind::Decl(VarDecl {
                    ty,
                    name,
                    init,
                    span,
                }),
                span,
            });
        }

        let kind = match self.peek() {
            Token::Ident(word) if word == "if" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                let then = Box::new(self.stmt()?);
                let otherwise = if self.is_word("else") {
                    self.advance();
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            Token::Ident(word) if word == "while" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                let body = Box::new(self.stmt()?);
                StmtKind::While { cond, body }
            }
            Token::Ident(word) if word == "do" => {
                self.advance();
                let body = Box::new(self.stmt()?);
                if !self.is_word("while") {
                    return Err(self.unexpected("'while'"));
                }
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                self.expect_punct(";")?;
                StmtKind::DoWhile { body, cond }
            }
            Token::Ident(word) if word == "for" => {
                self.advance();
                self.expect_punct("(")?;
                let init = self.expr_list(";")?;
                self.expect_punct(";")?;
                let cond = if self.is_punct(";") {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect_punct(";")?;
                let step = self.expr_list(")")?;
                self.expect_punct(")")?;
                let body = Box::new(self.stmt()?);
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body,
                }
            }
            Token::Ident(word) if word == "return" => {
                self.advance();
                let value = if self.is_punct(";") {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect_punct(";")?;
                StmtKind::Return(value)
            }
            Token::Ident(word) if word == "state" => {
                self.advance();
                let target = if self.is_word("default") {
                    Ident::new("default", self.advance().span)
                } else {
                    self.expect_ident()?
                };
                self.expect_punct(";")?;
                StmtKind::StateChange(target)
            }
            Token::Ident(word) if word == "jump" => {
                self.advance();
                let label = self.expect_ident()?;
                self.expect_punct(";")?;
                StmtKind::Jump(label)
            }
            _ => {
                let expr = self.expr()?;
                self.expect_punct(";")?;
                StmtKind::Expr(expr)
            }
        };

        Ok(Stmt { kind, span })
    }

    fn expr_list(&mut self, terminator: &str) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = Vec::new();
        if self.is_punct(terminator) {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.expr()?);
            if !self.eat_punct(",") {
                return Ok(exprs);
            }
        }
    }

    // ===== Expressions =====

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.binary(1)?;

        let op = match self.peek() {
            Token::Punct(p) => assign_op(p),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };

        let target = match &lhs.kind {
            ExprKind::Ident(name) => LValue {
                name: Ident::new(name.clone(), lhs.span),
                field: None,
            },
            ExprKind::Member { target, field } => match &target.kind {
                ExprKind::Ident(name) => LValue {
                    name: Ident::new(name.clone(), target.span),
                    field: Some(*field),
                },
                _ => return Err(ParseError::new(lhs.span, "invalid assignment target")),
            },
            _ => return Err(ParseError::new(lhs.span, "invalid assignment target")),
        };
        self.advance();
        let value = self.expr()?;
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target,
                value: Box::new(value),
            },
            lhs.span,
        ))
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Punct(p) => binary_op(p),
                _ => None,
            };
            let Some(op) = op else { break };
            let prec = precedence(op);
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary(prec + 1)?;
            let span = lhs.span;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();

        let op = if self.is_punct("-") {
            Some(UnaryOp::Neg)
        } else if self.is_punct("!") {
            Some(UnaryOp::Not)
        } else if self.is_punct("~") {
            Some(UnaryOp::BitNot)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }

        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.advance();
            let target = self.lvalue()?;
            return Ok(Expr::new(
                ExprKind::IncDec {
                    target,
                    increment,
                    prefix: true,
                },
                span,
            ));
        }

        // Cast: '(' type ')' unary
        if self.is_punct("(") {
            if let Token::Ident(word) = self.peek_at(1) {
                if let Some(ty) = TypeName::from_keyword(word) {
                    if matches!(self.peek_at(2), Token::Punct(")")) {
                        self.advance();
                        self.advance();
                        self.advance();
                        let operand = self.unary()?;
                        return Ok(Expr::new(
                            ExprKind::Cast {
                                ty,
                                operand: Box::new(operand),
                            },
                            span,
                        ));
                    }
                }
            }
        }

        self.postfix()
    }

    fn lvalue(&mut self) -> Result<LValue, ParseError> {
        let name = self.expect_ident()?;
        let field = if self.eat_punct(".") {
            Some(self.field()?)
        } else {
            None
        };
        Ok(LValue { name, field })
    }

    fn field(&mut self) -> Result<Field, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => match Field::from_name(&name) {
                Some(field) => {
                    self.advance();
                    Ok(field)
                }
                None => Err(ParseError::new(
                    self.span(),
                    format!("'{}' is not a component; use x, y, z or s", name),
                )),
            },
            _ => Err(self.unexpected("component name")),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.is_punct(".") {
                self.advance();
                let field = self.field()?;
                let span = expr.span;
                expr = Expr::new(
                    ExprKind::Member {
                        target: Box::new(expr),
                        field,
                    },
                    span,
                );
            } else if self.is_punct("++") || self.is_punct("--") {
                let increment = self.is_punct("++");
                let target = match &expr.kind {
                    ExprKind::Ident(name) => LValue {
                        name: Ident::new(name.clone(), expr.span),
                        field: None,
                    },
                    ExprKind::Member { target, field } => match &target.kind {
                        ExprKind::Ident(name) => LValue {
                            name: Ident::new(name.clone(), target.span),
                            field: Some(*field),
                        },
                        _ => return Err(ParseError::new(expr.span, "invalid increment target")),
                    },
                    _ => return Err(ParseError::new(expr.span, "invalid increment target")),
                };
                self.advance();
                let span = expr.span;
                expr = Expr::new(
                    ExprKind::IncDec {
                        target,
                        increment,
                        prefix: false,
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Integer(text) => {
                self.advance();
                Ok(Expr::new(ExprKind::Integer(text), span))
            }
            Token::Float(text) => {
                self.advance();
                Ok(Expr::new(ExprKind::Float(text), span))
            }
            Token::Str(text) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(text), span))
            }
            Token::Ident(name) if !is_reserved(&name) => {
                self.advance();
                if self.is_punct("(") {
                    self.advance();
                    let args = self.expr_list(")")?;
                    self.expect_punct(")")?;
                    Ok(Expr::new(
                        ExprKind::Call {
                            name: Ident::new(name, span),
                            args,
                        },
                        span,
                    ))
                } else {
                    Ok(Expr::new(ExprKind::Ident(name), span))
                }
            }
            Token::Punct("(") => {
                self.advance();
                let inner = self.expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                self.advance();
                let items = self.expr_list("]")?;
                self.expect_punct("]")?;
                Ok(Expr::new(ExprKind::List(items), span))
            }
            Token::Punct("<") => {
                self.advance();
                let mut parts = vec![self.binary(COMPONENT_PRECEDENCE)?];
                while self.eat_punct(",") {
                    parts.push(self.binary(COMPONENT_PRECEDENCE)?);
                }
                self.expect_punct(">")?;
                match parts.len() {
                    3 => Ok(Expr::new(ExprKind::Vector(parts), span)),
                    4 => Ok(Expr::new(ExprKind::Rotation(parts), span)),
                    n => Err(ParseError::new(
                        span,
                        format!("a vector needs 3 components and a rotation 4, found {}", n),
                    )),
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "default" | "state" | "if" | "else" | "while" | "do" | "for" | "return" | "jump"
    ) || TypeName::from_keyword(word).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_script() {
        let script = parse("default { state_entry() { llSay(0, \"hi\"); } }").unwrap();
        assert_eq!(script.states.len(), 1);
        assert!(script.states[0].is_default());
        assert_eq!(script.states[0].handlers[0].name.name, "state_entry");
    }

    #[test]
    fn test_parse_globals_and_functions() {
        let src = r#"
            integer count = 3;
            vector offset;
            integer twice(integer x) { return x * 2; }
            ping() { }
            default { touch_start(integer n) { count = twice(count); } }
        "#;
        let script = parse(src).unwrap();
        assert_eq!(script.globals.len(), 4);
        match &script.globals[2] {
            GlobalItem::Function(f) => {
                assert_eq!(f.ret, Some(TypeName::Integer));
                assert_eq!(f.params.len(), 1);
            }
            other => panic!("expected function, got {:?}", other),
        }
        match &script.globals[3] {
            GlobalItem::Function(f) => assert_eq!(f.ret, None),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_vector_literal_versus_comparison() {
        let script = parse("default { state_entry() { if (a < b) { v = <1, 2, 3>; } } }").unwrap();
        let body = &script.states[0].handlers[0].body.stmts[0];
        let StmtKind::If { cond, then, .. } = &body.kind else {
            panic!("expected if");
        };
        assert!(matches!(cond.kind, ExprKind::Binary { op: BinaryOp::Lt, .. }));
        let StmtKind::Block(block) = &then.kind else {
            panic!("expected block");
        };
        let StmtKind::Expr(assign) = &block.stmts[0].kind else {
            panic!("expected expression");
        };
        let ExprKind::Assign { value, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Vector(ref parts) if parts.len() == 3));
    }

    #[test]
    fn test_rotation_and_list_literals() {
        let script =
            parse("default { state_entry() { r = <0, 0, 0, 1>; l = [1, \"a\", <1,2,3>]; } }")
                .unwrap();
        let stmts = &script.states[0].handlers[0].body.stmts;
        let StmtKind::Expr(e) = &stmts[1].kind else {
            panic!()
        };
        let ExprKind::Assign { value, .. } = &e.kind else {
            panic!()
        };
        assert!(matches!(value.kind, ExprKind::List(ref items) if items.len() == 3));
    }

    #[test]
    fn test_precedence() {
        let script = parse("default { state_entry() { x = 1 + 2 * 3; } }").unwrap();
        let StmtKind::Expr(e) = &script.states[0].handlers[0].body.stmts[0].kind else {
            panic!()
        };
        let ExprKind::Assign { value, .. } = &e.kind else {
            panic!()
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_cast_and_member_assignment() {
        let script =
            parse("default { state_entry() { v.x = (float)\"2\"; i++; --j; } }").unwrap();
        let stmts = &script.states[0].handlers[0].body.stmts;
        let StmtKind::Expr(e) = &stmts[0].kind else {
            panic!()
        };
        let ExprKind::Assign { target, value, .. } = &e.kind else {
            panic!()
        };
        assert_eq!(target.field, Some(Field::X));
        assert!(matches!(value.kind, ExprKind::Cast { ty: TypeName::Float, .. }));
        assert!(matches!(
            stmts[1].kind,
            StmtKind::Expr(Expr {
                kind: ExprKind::IncDec { prefix: false, increment: true, .. },
                ..
            })
        ));
    }

    #[test]
    fn test_control_flow_statements() {
        let src = r#"
            default {
                state_entry() {
                    integer i;
                    for (i = 0; i < 3; i++) { }
                    while (i) i--;
                    do { i++; } while (i < 2);
                    jump done;
                    @done;
                    state other;
                }
            }
            state other { state_entry() { return; } }
        "#;
        let script = parse(src).unwrap();
        assert_eq!(script.states.len(), 2);
        assert_eq!(script.states[0].handlers[0].body.stmts.len(), 7);
    }

    #[test]
    fn test_missing_default_state() {
        let err = parse("integer x;").unwrap_err();
        assert!(err.message.contains("default"));
    }

    #[test]
    fn test_error_position() {
        let err = parse("default {\n  state_entry() {\n    x = ;\n  }\n}").unwrap_err();
        assert_eq!(err.span, Span::new(3, 9));
    }
}
