//! the directory's self-described schema: parsed definitions and a lazily
//! populated per-class index

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

pub mod cache;
pub mod parser;
pub mod tokenizer;

pub use cache::{Schema, SchemaCache, SchemaSource};
pub use parser::{parse_definition, parse_tokens};
pub use tokenizer::{tokenize, Token};

/// the subschema subentry attributes holding definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaClass {
    /// attributeTypes
    AttributeTypes,
    /// dITContentRules
    DitContentRules,
    /// dITStructureRules
    DitStructureRules,
    /// matchingRules
    MatchingRules,
    /// matchingRuleUse
    MatchingRuleUse,
    /// nameForms
    NameForms,
    /// objectClasses
    ObjectClasses,
    /// ldapSyntaxes
    LdapSyntaxes,
}

impl SchemaClass {
    /// all definition classes, in the order they are requested from the server
    pub const ALL: [SchemaClass; 8] = [
        SchemaClass::AttributeTypes,
        SchemaClass::DitContentRules,
        SchemaClass::DitStructureRules,
        SchemaClass::MatchingRules,
        SchemaClass::MatchingRuleUse,
        SchemaClass::NameForms,
        SchemaClass::ObjectClasses,
        SchemaClass::LdapSyntaxes,
    ];

    /// the attribute name on the subschema subentry
    pub fn attribute_name(&self) -> &'static str {
        match self {
            SchemaClass::AttributeTypes => "attributeTypes",
            SchemaClass::DitContentRules => "dITContentRules",
            SchemaClass::DitStructureRules => "dITStructureRules",
            SchemaClass::MatchingRules => "matchingRules",
            SchemaClass::MatchingRuleUse => "matchingRuleUse",
            SchemaClass::NameForms => "nameForms",
            SchemaClass::ObjectClasses => "objectClasses",
            SchemaClass::LdapSyntaxes => "ldapSyntaxes",
        }
    }

    /// the lowercase key used in normalized search results and the index
    pub fn key(&self) -> String {
        self.attribute_name().to_lowercase()
    }
}

impl Display for SchemaClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.attribute_name())
    }
}

/// error returned when a string names no known schema class
#[derive(Debug, Clone, Error)]
#[error("Unknown schema class {0}")]
pub struct UnknownSchemaClass(pub String);

impl FromStr for SchemaClass {
    type Err = UnknownSchemaClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchemaClass::ALL
            .into_iter()
            .find(|c| c.attribute_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownSchemaClass(s.to_string()))
    }
}

/// kind of an object class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClassKind {
    /// ABSTRACT
    Abstract,
    /// STRUCTURAL
    Structural,
    /// AUXILIARY
    Auxiliary,
}

/// one parsed schema definition
///
/// keyword keys are stored lowercase. Keywords followed by a parenthesized
/// list, and `MUST`, `MAY` and `SUP` even when followed by a single value,
/// end up in `lists`; every other valued keyword in `fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    /// numeric OID (or whatever the server put first)
    pub oid: String,
    /// first NAME, or the OID if there was none
    pub name: String,
    /// remaining NAMEs
    pub aliases: Vec<String>,
    /// keywords without a value (single-value, obsolete, structural,...)
    pub flags: BTreeSet<String>,
    /// keywords with a single value (syntax, equality, desc,...)
    pub fields: BTreeMap<String, String>,
    /// keywords with a list value (must, may, sup,...)
    pub lists: BTreeMap<String, Vec<String>>,
    /// length bound from a `{n}` suffix on the syntax
    pub max_length: Option<u32>,
}

impl SchemaEntry {
    /// value of a single valued keyword
    pub fn field(&self, keyword: &str) -> Option<&str> {
        self.fields
            .get(&keyword.to_lowercase())
            .map(String::as_str)
    }

    /// value of a list keyword
    pub fn list(&self, keyword: &str) -> Option<&[String]> {
        self.lists.get(&keyword.to_lowercase()).map(Vec::as_slice)
    }

    /// true if the flag keyword was present
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(&flag.to_lowercase())
    }

    /// true if `name` is the name, one of the aliases or the OID
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.oid.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// SYNTAX, including any length suffix
    pub fn syntax(&self) -> Option<&str> {
        self.field("syntax")
    }

    /// EQUALITY matching rule
    pub fn equality(&self) -> Option<&str> {
        self.field("equality")
    }

    /// ORDERING matching rule
    pub fn ordering(&self) -> Option<&str> {
        self.field("ordering")
    }

    /// SUBSTR matching rule
    pub fn substr(&self) -> Option<&str> {
        self.field("substr")
    }

    /// DESC
    pub fn description(&self) -> Option<&str> {
        self.field("desc")
    }

    /// SUP, empty if absent
    pub fn sup(&self) -> &[String] {
        self.list("sup").unwrap_or_default()
    }

    /// MUST, empty if absent
    pub fn must(&self) -> &[String] {
        self.list("must").unwrap_or_default()
    }

    /// MAY, empty if absent
    pub fn may(&self) -> &[String] {
        self.list("may").unwrap_or_default()
    }

    /// OBSOLETE
    pub fn is_obsolete(&self) -> bool {
        self.has_flag("obsolete")
    }

    /// SINGLE-VALUE
    pub fn is_single_value(&self) -> bool {
        self.has_flag("single-value")
    }

    /// ABSTRACT, STRUCTURAL or AUXILIARY, if any was given
    pub fn kind(&self) -> Option<ObjectClassKind> {
        if self.has_flag("abstract") {
            Some(ObjectClassKind::Abstract)
        } else if self.has_flag("structural") {
            Some(ObjectClassKind::Structural)
        } else if self.has_flag("auxiliary") {
            Some(ObjectClassKind::Auxiliary)
        } else {
            None
        }
    }
}

impl Display for SchemaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_class_from_str_ignores_case() {
        assert_eq!(
            "objectclasses".parse::<SchemaClass>().unwrap(),
            SchemaClass::ObjectClasses
        );
        assert_eq!(
            "dITContentRules".parse::<SchemaClass>().unwrap(),
            SchemaClass::DitContentRules
        );
        assert!("objectClass".parse::<SchemaClass>().is_err());
        assert_eq!(SchemaClass::MatchingRuleUse.key(), "matchingruleuse");
    }

    #[test]
    fn entry_naming() {
        let entry = parse_definition("( 2.5.4.3 NAME ( 'cn' 'commonName' ) )").unwrap();
        assert!(entry.is_named("CN"));
        assert!(entry.is_named("commonname"));
        assert!(entry.is_named("2.5.4.3"));
        assert!(!entry.is_named("sn"));
        assert_eq!(entry.to_string(), "cn");
    }
}
