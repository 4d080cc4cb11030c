//! Tokenizer for contract clause text such as
//! `callsIn(init, DslMarkers(receiverOf(init)))`.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords (`this`, `receiverOf`, ...); the parser tells them apart
    Word(String),
    // Punctuation
    LParen,
    RParen,
    Comma,
    Dot,
    Lt,
    Gt,
    At,
    ColonColon,
    // End of input
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "'{}'", w),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::Dot => write!(f, "'.'"),
            Token::Lt => write!(f, "'<'"),
            Token::Gt => write!(f, "'>'"),
            Token::At => write!(f, "'@'"),
            Token::ColonColon => write!(f, "'::'"),
            Token::Eof => write!(f, "end of clause"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    /// 1-based column within the clause text.
    pub column: u32,
}

/// Lexer or parser failure, positioned inside the clause text.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub column: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(column: u32, message: impl Into<String>) -> Self {
        SyntaxError {
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "column {}: {}", self.column, self.message)
    }
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];
        let column = pos as u32 + 1;

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            tokens.push(Spanned {
                token: Token::Word(word),
                column,
            });
            continue;
        }

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '<' => Token::Lt,
            '>' => Token::Gt,
            '@' => Token::At,
            ':' => {
                if pos + 1 < chars.len() && chars[pos + 1] == ':' {
                    pos += 1;
                    Token::ColonColon
                } else {
                    return Err(SyntaxError::new(column, "expected '::'"));
                }
            }
            other => {
                return Err(SyntaxError::new(
                    column,
                    format!("unexpected character '{}'", other),
                ));
            }
        };
        pos += 1;
        tokens.push(Spanned { token, column });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        column: chars.len() as u32 + 1,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_callable_reference_and_labelled_this() {
        assert_eq!(
            kinds("Calls(::setY, this@Builder)"),
            vec![
                Token::Word("Calls".into()),
                Token::LParen,
                Token::ColonColon,
                Token::Word("setY".into()),
                Token::Comma,
                Token::Word("this".into()),
                Token::At,
                Token::Word("Builder".into()),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_type_arguments() {
        let toks = kinds("CatchesException<IOException>()");
        assert_eq!(toks[1], Token::Lt);
        assert_eq!(toks[3], Token::Gt);
    }

    #[test]
    fn records_columns() {
        let toks = lex("a  (b)").unwrap();
        assert_eq!(toks[0].column, 1);
        assert_eq!(toks[1].column, 4);
        assert_eq!(toks[2].column, 5);
    }

    #[test]
    fn single_colon_is_an_error() {
        let err = lex("a:b").unwrap_err();
        assert_eq!(err.column, 2);
    }

    #[test]
    fn unexpected_character_is_an_error() {
        let err = lex("requires(#)").unwrap_err();
        assert!(err.message.contains('#'));
        assert_eq!(err.column, 10);
    }
}
