//! Recursive-descent parser from clause tokens to a term tree.
//!
//! The parser knows nothing about clause or effect names; it only builds
//! the shape `name<TypeArgs>(args...)`. Interpretation happens in
//! [`crate::contracts`].

use crate::lexer::{lex, Spanned, SyntaxError, Token};

/// A parsed clause term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// `name(args)` or `name<T>(args)`; `name` may be a dotted path.
    Apply {
        name: String,
        type_args: Vec<String>,
        args: Vec<Term>,
        column: u32,
    },
    /// A bare (possibly dotted) name such as `init` or `InvocationKind.EXACTLY_ONCE`.
    Name { path: String, column: u32 },
    /// `this` or `this@Label`.
    This { label: Option<String>, column: u32 },
    /// `::member` or `Owner::member`.
    CallableRef {
        owner: Option<String>,
        member: String,
        column: u32,
    },
}

impl Term {
    pub fn column(&self) -> u32 {
        match self {
            Term::Apply { column, .. }
            | Term::Name { column, .. }
            | Term::This { column, .. }
            | Term::CallableRef { column, .. } => *column,
        }
    }

    /// Last segment of a dotted name (`kotlin.contracts.InvocationKind.EXACTLY_ONCE`
    /// becomes `EXACTLY_ONCE`).
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            Term::Name { path, .. } | Term::Apply { name: path, .. } => {
                path.rsplit('.').next()
            }
            _ => None,
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn cur_column(&self) -> u32 {
        self.cur().column
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn err(&self, msg: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.cur_column(), msg)
    }

    fn expect(&mut self, expected: Token) -> Result<(), SyntaxError> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, got {}", expected, self.peek())))
        }
    }

    fn take_word(&mut self) -> Result<String, SyntaxError> {
        if let Token::Word(w) = self.peek().clone() {
            self.advance();
            Ok(w)
        } else {
            Err(self.err(format!("expected identifier, got {}", self.peek())))
        }
    }

    fn path(&mut self) -> Result<String, SyntaxError> {
        let mut path = self.take_word()?;
        while self.peek() == &Token::Dot {
            self.advance();
            path.push('.');
            path.push_str(&self.take_word()?);
        }
        Ok(path)
    }

    fn term(&mut self) -> Result<Term, SyntaxError> {
        let column = self.cur_column();
        match self.peek().clone() {
            Token::ColonColon => {
                self.advance();
                let member = self.take_word()?;
                Ok(Term::CallableRef {
                    owner: None,
                    member,
                    column,
                })
            }
            Token::Word(w) if w == "this" => {
                self.advance();
                let label = if self.peek() == &Token::At {
                    self.advance();
                    Some(self.take_word()?)
                } else {
                    None
                };
                Ok(Term::This { label, column })
            }
            Token::Word(_) => {
                let name = self.path()?;
                if self.peek() == &Token::ColonColon {
                    self.advance();
                    let member = self.take_word()?;
                    return Ok(Term::CallableRef {
                        owner: Some(name),
                        member,
                        column,
                    });
                }

                let mut type_args = Vec::new();
                let mut applied = false;
                if self.peek() == &Token::Lt {
                    applied = true;
                    self.advance();
                    loop {
                        type_args.push(self.path()?);
                        if self.peek() == &Token::Comma {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                    self.expect(Token::Gt)?;
                }

                let mut args = Vec::new();
                if self.peek() == &Token::LParen {
                    applied = true;
                    self.advance();
                    if self.peek() != &Token::RParen {
                        loop {
                            args.push(self.term()?);
                            if self.peek() == &Token::Comma {
                                self.advance();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(Token::RParen)?;
                }

                if applied {
                    Ok(Term::Apply {
                        name,
                        type_args,
                        args,
                        column,
                    })
                } else {
                    Ok(Term::Name { path: name, column })
                }
            }
            other => Err(self.err(format!("unexpected {}", other))),
        }
    }
}

/// Parse one clause of a contract block.
pub fn parse_clause(src: &str) -> Result<Term, SyntaxError> {
    let tokens = lex(src)?;
    let mut parser = Parser::new(&tokens);
    let term = parser.term()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.err(format!("unexpected {} after clause", parser.peek())));
    }
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_application() {
        let term = parse_clause("callsIn(init, DslMarkers(receiverOf(init)))").unwrap();
        match term {
            Term::Apply { name, args, .. } => {
                assert_eq!(name, "callsIn");
                assert_eq!(args.len(), 2);
                assert!(matches!(&args[0], Term::Name { path, .. } if path == "init"));
                match &args[1] {
                    Term::Apply { name, args, .. } => {
                        assert_eq!(name, "DslMarkers");
                        assert!(matches!(&args[0], Term::Apply { name, .. } if name == "receiverOf"));
                    }
                    other => panic!("unexpected term {:?}", other),
                }
            }
            other => panic!("unexpected term {:?}", other),
        }
    }

    #[test]
    fn parses_type_arguments_and_empty_args() {
        let term = parse_clause("requires(CatchesException<java.io.IOException>())").unwrap();
        let Term::Apply { args, .. } = term else {
            panic!("expected application");
        };
        assert_eq!(
            args[0],
            Term::Apply {
                name: "CatchesException".into(),
                type_args: vec!["java.io.IOException".into()],
                args: vec![],
                column: 10,
            }
        );
    }

    #[test]
    fn parses_callable_references() {
        let term = parse_clause("CallKind(BazBuilder::setY, InvocationKind.EXACTLY_ONCE, ::other)")
            .unwrap();
        let Term::Apply { args, .. } = term else {
            panic!("expected application");
        };
        assert!(matches!(
            &args[0],
            Term::CallableRef { owner: Some(o), member, .. } if o == "BazBuilder" && member == "setY"
        ));
        assert_eq!(args[1].simple_name(), Some("EXACTLY_ONCE"));
        assert!(matches!(
            &args[2],
            Term::CallableRef { owner: None, member, .. } if member == "other"
        ));
    }

    #[test]
    fn parses_labelled_this() {
        let term = parse_clause("this@Transaction").unwrap();
        assert_eq!(
            term,
            Term::This {
                label: Some("Transaction".into()),
                column: 1
            }
        );
    }

    #[test]
    fn rejects_trailing_tokens() {
        let err = parse_clause("requires(x) y").unwrap_err();
        assert_eq!(err.column, 13);
    }

    #[test]
    fn rejects_unclosed_parenthesis() {
        let err = parse_clause("requires(Opened(this)").unwrap_err();
        assert!(err.message.contains("expected ')'"), "{}", err.message);
    }
}
