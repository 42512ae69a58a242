//! Recursive-descent parser for the restricted query grammar.
//!
//! ```text
//! select <proj> from <Entity> [as] <alias>
//!     [join [fetch] <alias>.<assoc> [as] <alias2> [on <pred>]]*
//!     [where <pred>]
//! update <Entity> [as] <alias> set <path> = <expr> {, <path> = <expr>}
//!     [where <pred>]
//! delete from <Entity> [as] <alias> [where <pred>]
//! ```

use crate::{
    query::{
        ast::{
            DeleteAst, ExprAst, JoinAst, ParamRef, PathExpr, PredicateAst, QueryAst, SelectAst,
            UpdateAst,
        },
        token::{QuerySyntaxError, Tok, Token, tokenize},
    },
    sql::Cmp,
    value::Value,
};

/// Parse query text into an AST.
pub fn parse(text: &str) -> Result<QueryAst, QuerySyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };

    let ast = if parser.peek_keyword("select") {
        QueryAst::Select(parser.select()?)
    } else if parser.peek_keyword("update") {
        QueryAst::Update(parser.update()?)
    } else if parser.peek_keyword("delete") {
        QueryAst::Delete(parser.delete()?)
    } else {
        return Err(QuerySyntaxError::new(
            parser.offset(),
            "expected select, update, or delete",
        ));
    };

    if parser.pos < parser.tokens.len() {
        return Err(QuerySyntaxError::new(
            parser.offset(),
            "unexpected trailing input",
        ));
    }

    Ok(ast)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn take_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), QuerySyntaxError> {
        if self.take_keyword(keyword) {
            Ok(())
        } else {
            Err(QuerySyntaxError::new(
                self.offset(),
                format!("expected '{keyword}'"),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, usize), QuerySyntaxError> {
        let offset = self.offset();
        match self.peek() {
            Some(Tok::Ident(word)) if !is_reserved(word) => {
                let word = word.clone();
                self.pos += 1;
                Ok((word, offset))
            }
            _ => Err(QuerySyntaxError::new(offset, "expected identifier")),
        }
    }

    fn expect_tok(&mut self, expected: &Tok, label: &str) -> Result<(), QuerySyntaxError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(QuerySyntaxError::new(
                self.offset(),
                format!("expected {label}"),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn select(&mut self) -> Result<SelectAst, QuerySyntaxError> {
        self.expect_keyword("select")?;

        let mut projection = vec![self.path()?];
        while self.peek() == Some(&Tok::Comma) {
            self.pos += 1;
            projection.push(self.path()?);
        }

        self.expect_keyword("from")?;
        let (entity, _) = self.expect_ident()?;
        let _ = self.take_keyword("as");
        let (alias, _) = self.expect_ident()?;

        let mut joins = Vec::new();
        while self.peek_keyword("join") {
            joins.push(self.join()?);
        }

        let predicate = self.optional_where()?;

        Ok(SelectAst {
            projection,
            entity,
            alias,
            joins,
            predicate,
        })
    }

    fn join(&mut self) -> Result<JoinAst, QuerySyntaxError> {
        self.expect_keyword("join")?;
        let fetch = self.take_keyword("fetch");

        let path = self.path()?;
        let _ = self.take_keyword("as");
        let (alias, _) = self.expect_ident()?;

        let on = if self.take_keyword("on") {
            Some(self.predicate()?)
        } else {
            None
        };

        Ok(JoinAst {
            fetch,
            path,
            alias,
            on,
        })
    }

    fn update(&mut self) -> Result<UpdateAst, QuerySyntaxError> {
        self.expect_keyword("update")?;
        let (entity, _) = self.expect_ident()?;
        let _ = self.take_keyword("as");
        let (alias, _) = self.expect_ident()?;
        self.expect_keyword("set")?;

        let mut assignments = vec![self.assignment()?];
        while self.peek() == Some(&Tok::Comma) {
            self.pos += 1;
            assignments.push(self.assignment()?);
        }

        let predicate = self.optional_where()?;

        Ok(UpdateAst {
            entity,
            alias,
            assignments,
            predicate,
        })
    }

    fn assignment(&mut self) -> Result<(PathExpr, ExprAst), QuerySyntaxError> {
        let path = self.path()?;
        self.expect_tok(&Tok::Eq, "'='")?;
        let value = self.expr()?;

        Ok((path, value))
    }

    fn delete(&mut self) -> Result<DeleteAst, QuerySyntaxError> {
        self.expect_keyword("delete")?;
        self.expect_keyword("from")?;
        let (entity, _) = self.expect_ident()?;
        let _ = self.take_keyword("as");
        let (alias, _) = self.expect_ident()?;
        let predicate = self.optional_where()?;

        Ok(DeleteAst {
            entity,
            alias,
            predicate,
        })
    }

    fn optional_where(&mut self) -> Result<Option<PredicateAst>, QuerySyntaxError> {
        if self.take_keyword("where") {
            Ok(Some(self.predicate()?))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Predicates: or < and < not < primary
    // ------------------------------------------------------------------

    fn predicate(&mut self) -> Result<PredicateAst, QuerySyntaxError> {
        let mut lhs = self.and_chain()?;
        while self.take_keyword("or") {
            let rhs = self.and_chain()?;
            lhs = PredicateAst::Or(Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn and_chain(&mut self) -> Result<PredicateAst, QuerySyntaxError> {
        let mut lhs = self.unary()?;
        while self.take_keyword("and") {
            let rhs = self.unary()?;
            lhs = PredicateAst::And(Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<PredicateAst, QuerySyntaxError> {
        if self.take_keyword("not") {
            let inner = self.unary()?;
            return Ok(PredicateAst::Not(Box::new(inner)));
        }

        if self.peek() == Some(&Tok::LParen) {
            self.pos += 1;
            let inner = self.predicate()?;
            self.expect_tok(&Tok::RParen, "')'")?;
            return Ok(inner);
        }

        self.comparison()
    }

    fn comparison(&mut self) -> Result<PredicateAst, QuerySyntaxError> {
        let lhs = self.expr()?;

        if self.take_keyword("is") {
            let negated = self.take_keyword("not");
            self.expect_keyword("null")?;
            let ExprAst::Path(path) = lhs else {
                return Err(QuerySyntaxError::new(
                    self.offset(),
                    "'is null' applies to attribute paths only",
                ));
            };
            return Ok(PredicateAst::IsNull { path, negated });
        }

        let op = match self.peek() {
            Some(Tok::Eq) => Cmp::Eq,
            Some(Tok::Ne) => Cmp::Ne,
            Some(Tok::Lt) => Cmp::Lt,
            Some(Tok::Lte) => Cmp::Lte,
            Some(Tok::Gt) => Cmp::Gt,
            Some(Tok::Gte) => Cmp::Gte,
            _ => {
                return Err(QuerySyntaxError::new(
                    self.offset(),
                    "expected comparison operator",
                ));
            }
        };
        self.pos += 1;

        let rhs = self.expr()?;

        Ok(PredicateAst::Cmp { lhs, op, rhs })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self) -> Result<ExprAst, QuerySyntaxError> {
        let offset = self.offset();
        match self.peek().cloned() {
            Some(Tok::Int(value)) => {
                self.pos += 1;
                Ok(ExprAst::Literal(Value::Int(value)))
            }
            Some(Tok::Float(value)) => {
                self.pos += 1;
                Ok(ExprAst::Literal(Value::Float(value)))
            }
            Some(Tok::Str(value)) => {
                self.pos += 1;
                Ok(ExprAst::Literal(Value::Text(value)))
            }
            Some(Tok::Ident(word)) if word.eq_ignore_ascii_case("true") => {
                self.pos += 1;
                Ok(ExprAst::Literal(Value::Bool(true)))
            }
            Some(Tok::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                self.pos += 1;
                Ok(ExprAst::Literal(Value::Bool(false)))
            }
            Some(Tok::Colon) => {
                self.pos += 1;
                let (name, _) = self.expect_ident()?;
                Ok(ExprAst::Param(ParamRef::Named(name)))
            }
            Some(Tok::Question) => {
                self.pos += 1;
                match self.peek() {
                    Some(Tok::Int(index)) if *index > 0 => {
                        let index = u32::try_from(*index).map_err(|_| {
                            QuerySyntaxError::new(offset, "positional parameter out of range")
                        })?;
                        self.pos += 1;
                        Ok(ExprAst::Param(ParamRef::Positional(index)))
                    }
                    _ => Err(QuerySyntaxError::new(
                        offset,
                        "expected positive index after '?'",
                    )),
                }
            }
            Some(Tok::Ident(_)) => Ok(ExprAst::Path(self.path()?)),
            _ => Err(QuerySyntaxError::new(offset, "expected expression")),
        }
    }

    fn path(&mut self) -> Result<PathExpr, QuerySyntaxError> {
        let (root, offset) = self.expect_ident()?;
        let mut segments = Vec::new();
        while self.peek() == Some(&Tok::Dot) {
            self.pos += 1;
            let (segment, _) = self.expect_ident()?;
            segments.push(segment);
        }

        Ok(PathExpr {
            root,
            segments,
            offset,
        })
    }
}

/// Grammar keywords that cannot serve as identifiers.
fn is_reserved(word: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "and", "as", "delete", "false", "fetch", "from", "is", "join", "not", "null", "on", "or",
        "select", "set", "true", "update", "where",
    ];

    KEYWORDS
        .iter()
        .any(|keyword| word.eq_ignore_ascii_case(keyword))
}
