//! turns the tokens of one schema definition into a [SchemaEntry]

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;

use super::tokenizer::{tokenize, Token};
use super::SchemaEntry;
use crate::error::SchemaParseError;

/// keywords that stand on their own and take no value
pub const FLAG_KEYWORDS: [&str; 7] = [
    "single-value",
    "obsolete",
    "collective",
    "no-user-modification",
    "abstract",
    "structural",
    "auxiliary",
];

/// keywords whose value is always treated as a list
pub const LIST_KEYWORDS: [&str; 3] = ["must", "may", "sup"];

/// a parsed keyword value before it is sorted into scalar or list fields
#[derive(Debug)]
enum Value {
    /// a single word or quoted string
    Scalar(String),
    /// a parenthesized, possibly `$` separated list
    List(Vec<String>),
}

/// tokenize and parse a single definition string
pub fn parse_definition(definition: &str) -> Result<SchemaEntry, SchemaParseError> {
    parse_tokens(tokenize(definition)).map_err(|_| SchemaParseError::Empty {
        definition: definition.to_string(),
    })
}

/// parse the tokens of exactly one definition
pub fn parse_tokens(tokens: Vec<Token>) -> Result<SchemaEntry, SchemaParseError> {
    let mut tokens = tokens;
    if tokens.last() == Some(&Token::Close) {
        tokens.pop();
    }
    let mut tokens = tokens.into_iter().peekable();
    if tokens.peek() == Some(&Token::Open) {
        tokens.next();
    }

    let oid = match tokens.next() {
        Some(token) => token.into_text().unwrap_or_default(),
        None => {
            return Err(SchemaParseError::Empty {
                definition: String::new(),
            })
        }
    };

    let mut flags = BTreeSet::new();
    let mut fields = BTreeMap::new();
    let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();

    while let Some(token) = tokens.next() {
        let Some(keyword) = token.into_text() else {
            tracing::trace!("Skipping stray parenthesis in definition of {}", oid);
            continue;
        };
        let keyword = keyword.to_lowercase();
        if FLAG_KEYWORDS.contains(&keyword.as_str()) {
            flags.insert(keyword);
            continue;
        }
        let value = match tokens.next() {
            Some(Token::Open) => {
                let mut values = Vec::new();
                for t in tokens.by_ref() {
                    if t == Token::Close {
                        break;
                    }
                    if t.is_separator() {
                        continue;
                    }
                    if let Some(v) = t.into_text() {
                        values.push(v);
                    }
                }
                Value::List(values)
            }
            Some(Token::Close) | None => {
                tracing::trace!("Keyword {} of {} has no value, ignoring it", keyword, oid);
                continue;
            }
            Some(Token::Word(v)) | Some(Token::Quoted(v)) => Value::Scalar(v),
        };
        match value {
            Value::List(values) => {
                fields.remove(&keyword);
                lists.insert(keyword, values);
            }
            Value::Scalar(v) if LIST_KEYWORDS.contains(&keyword.as_str()) => {
                lists.insert(keyword, vec![v]);
            }
            Value::Scalar(v) => {
                lists.remove(&keyword);
                fields.insert(keyword, v);
            }
        }
    }

    let max_length = fields.get("syntax").and_then(|s| syntax_max_length(s));

    let (name, aliases) = match (fields.remove("name"), lists.remove("name")) {
        (Some(name), _) if !name.is_empty() => (name, Vec::new()),
        (_, Some(mut names)) if !names.is_empty() => {
            let name = names.remove(0);
            (name, names)
        }
        _ => (oid.clone(), Vec::new()),
    };

    Ok(SchemaEntry {
        oid,
        name,
        aliases,
        flags,
        fields,
        lists,
        max_length,
    })
}

/// extract `n` from a syntax OID with a `{n}` length suffix
pub fn syntax_max_length(syntax: &str) -> Option<u32> {
    lazy_static! {
        static ref LENGTH_RE: Regex = Regex::new(r"\{(\d+)\}").expect("valid length regex");
    }
    LENGTH_RE
        .captures(syntax)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
