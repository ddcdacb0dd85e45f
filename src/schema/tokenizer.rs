//! lexer for RFC 4512 schema definition strings

use lazy_static::lazy_static;
use regex::Regex;

/// a lexical token of a schema definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `(`
    Open,
    /// `)`
    Close,
    /// an unquoted, whitespace delimited word (OIDs, keywords, `$`)
    Word(String),
    /// a single-quoted string with the quotes removed
    Quoted(String),
}

impl Token {
    /// the textual content of a word or quoted string
    pub fn text(&self) -> Option<&str> {
        match self {
            Token::Word(s) | Token::Quoted(s) => Some(s),
            Token::Open | Token::Close => None,
        }
    }

    /// consume the token, returning the content of words and quoted strings
    pub fn into_text(self) -> Option<String> {
        match self {
            Token::Word(s) | Token::Quoted(s) => Some(s),
            Token::Open | Token::Close => None,
        }
    }

    /// true for the `$` list separator
    pub fn is_separator(&self) -> bool {
        matches!(self, Token::Word(s) if s == "$")
    }
}

/// split a raw definition into tokens
///
/// a quote inside a quoted string is kept as long as it is followed by
/// something other than whitespace or `)`, so `'O'Reilly'` yields
/// `O'Reilly`. Characters matching none of the token forms (e.g. an
/// unterminated quote) are skipped.
pub fn tokenize(definition: &str) -> Vec<Token> {
    lazy_static! {
        static ref TOKEN_RE: Regex = Regex::new(
            r"(?x) \s* (?: ([()]) | ([^'\s()]+) | '((?:[^']+|'[^\s)])*)' ) \s*"
        )
        .expect("valid schema token regex");
    }
    let mut tokens = Vec::new();
    for caps in TOKEN_RE.captures_iter(definition) {
        if let Some(paren) = caps.get(1) {
            if paren.as_str() == "(" {
                tokens.push(Token::Open);
            } else {
                tokens.push(Token::Close);
            }
        } else if let Some(word) = caps.get(2) {
            tokens.push(Token::Word(word.as_str().to_string()));
        } else if let Some(quoted) = caps.get(3) {
            let quoted = quoted.as_str().trim();
            if !quoted.is_empty() {
                tokens.push(Token::Quoted(quoted.to_string()));
            }
        }
    }
    tracing::trace!("Tokenized {:?} into {:?}", definition, tokens);
    tokens
}
