//! Tokenizer.

use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    // keywords
    Let,
    Fn,
    For,
    In,
    While,
    If,
    Else,
    Return,
    Break,
    Continue,
    True,
    False,
    Nil,
    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }
}

/// Split source into tokens. `//` and `#` start line comments.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    let mut lx = Lexer {
        chars: source.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    while let Some(c) = lx.peek() {
        if c.is_whitespace() {
            lx.bump();
            continue;
        }
        if c == '#' || (c == '/' && source_peek2(&lx) == Some('/')) {
            while let Some(c) = lx.peek() {
                if c == '\n' {
                    break;
                }
                lx.bump();
            }
            continue;
        }

        let (line, column) = (lx.line, lx.column);
        let tok = if c.is_ascii_digit() {
            lex_number(&mut lx)?
        } else if c.is_ascii_alphabetic() || c == '_' {
            lex_word(&mut lx)
        } else if c == '"' || c == '\'' {
            lex_string(&mut lx)?
        } else {
            lx.bump();
            match c {
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                '{' => Tok::LBrace,
                '}' => Tok::RBrace,
                ',' => Tok::Comma,
                ';' => Tok::Semi,
                ':' => Tok::Colon,
                '*' => Tok::Star,
                '/' => Tok::Slash,
                '%' => Tok::Percent,
                '+' if lx.eat('=') => Tok::PlusAssign,
                '+' => Tok::Plus,
                '-' if lx.eat('=') => Tok::MinusAssign,
                '-' => Tok::Minus,
                '=' if lx.eat('=') => Tok::Eq,
                '=' => Tok::Assign,
                '!' if lx.eat('=') => Tok::NotEq,
                '!' => Tok::Bang,
                '<' if lx.eat('=') => Tok::LtEq,
                '<' => Tok::Lt,
                '>' if lx.eat('=') => Tok::GtEq,
                '>' => Tok::Gt,
                '&' if lx.eat('&') => Tok::AndAnd,
                '|' if lx.eat('|') => Tok::OrOr,
                other => {
                    return Err(ScriptError::Syntax {
                        line,
                        column,
                        message: format!("unexpected character {:?}", other),
                    })
                }
            }
        };
        tokens.push(Token { tok, line, column });
    }

    tokens.push(Token {
        tok: Tok::Eof,
        line: lx.line,
        column: lx.column,
    });
    Ok(tokens)
}

fn source_peek2(lx: &Lexer<'_>) -> Option<char> {
    let mut it = lx.chars.clone();
    it.next();
    it.next()
}

fn lex_number(lx: &mut Lexer<'_>) -> Result<Tok, ScriptError> {
    let mut text = String::new();
    let mut is_float = false;
    while let Some(c) = lx.peek() {
        if c.is_ascii_digit() || c == '_' {
            if c != '_' {
                text.push(c);
            }
            lx.bump();
        } else if c == '.' && !is_float {
            // Only a float if a digit follows the dot.
            let mut ahead = lx.chars.clone();
            ahead.next();
            if !matches!(ahead.next(), Some(d) if d.is_ascii_digit()) {
                break;
            }
            is_float = true;
            text.push(c);
            lx.bump();
        } else {
            break;
        }
    }
    if is_float {
        text.parse()
            .map(Tok::Float)
            .map_err(|_| lx.error(format!("invalid number {}", text)))
    } else {
        text.parse()
            .map(Tok::Int)
            .map_err(|_| lx.error(format!("integer literal out of range: {}", text)))
    }
}

fn lex_word(lx: &mut Lexer<'_>) -> Tok {
    let mut word = String::new();
    while let Some(c) = lx.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            lx.bump();
        } else {
            break;
        }
    }
    match word.as_str() {
        "let" => Tok::Let,
        "fn" => Tok::Fn,
        "for" => Tok::For,
        "in" => Tok::In,
        "while" => Tok::While,
        "if" => Tok::If,
        "else" => Tok::Else,
        "return" => Tok::Return,
        "break" => Tok::Break,
        "continue" => Tok::Continue,
        "true" => Tok::True,
        "false" => Tok::False,
        "nil" => Tok::Nil,
        _ => Tok::Ident(word),
    }
}

fn lex_string(lx: &mut Lexer<'_>) -> Result<Tok, ScriptError> {
    let quote = lx.bump().unwrap_or('"');
    let mut text = String::new();
    loop {
        match lx.bump() {
            None | Some('\n') => return Err(lx.error("unterminated string literal")),
            Some(c) if c == quote => break,
            Some('\\') => match lx.bump() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('\\') => text.push('\\'),
                Some('"') => text.push('"'),
                Some('\'') => text.push('\''),
                Some(other) => return Err(lx.error(format!("unknown escape \\{}", other))),
                None => return Err(lx.error("unterminated string literal")),
            },
            Some(c) => text.push(c),
        }
    }
    Ok(Tok::Str(text))
}
