#![deny(unknown_lints)]
#![deny(renamed_and_removed_lints)]
#![forbid(unsafe_code)]
#![deny(deprecated)]
#![forbid(non_fmt_panics)]
#![deny(unreachable_code)]
#![deny(unreachable_patterns)]
#![forbid(unused_doc_comments)]
#![forbid(unused_must_use)]
#![deny(while_true)]
#![deny(unused_parens)]
#![deny(redundant_semicolons)]
#![deny(non_ascii_idents)]
#![deny(confusable_idents)]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::cargo_common_metadata)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]
#![deny(clippy::mod_module_files)]
#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod connection;
pub mod dn;
pub mod entry;
pub mod error;
pub mod root_dse;
pub mod schema;
pub mod search;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::DirectoryClient;
pub use config::{server_config, ServerConfig, ServerConfigBuilder};
pub use connection::{Connection, ConnectionState};
pub use dn::{rdn_values, split_dn};
pub use entry::{AttributeMap, BinaryAttributes, Entry, SearchResults};
pub use error::{ConfigError, DirectoryError, Result, SchemaParseError, ScopeParserError};
pub use root_dse::{RootDse, PAGED_RESULTS_OID};
pub use schema::{Schema, SchemaCache, SchemaClass, SchemaEntry, SchemaSource};
pub use search::{parse_scope, Deref, PagedSearchExecutor, SearchRequest, SearchScope};
pub use transport::{Connector, Ldap3Connector, ModifyMode, Transport};

/// escape a value for use in a search filter (RFC 4515)
pub fn escape_filter_value(value: &str) -> String {
    ldap3::ldap_escape(value).into_owned()
}

/// escape a value for use in a DN (RFC 4514)
pub fn escape_dn_value(value: &str) -> String {
    ldap3::dn_escape(value).into_owned()
}
