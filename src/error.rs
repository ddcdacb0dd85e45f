//! error types shared by the connection, search and schema layers

use thiserror::Error;

/// error which can occur while parsing a scope
#[derive(Debug, Clone, Error)]
pub enum ScopeParserError {
    /// could not parse the value as a scope
    #[error("Could not parse {0} as an ldap scope")]
    CouldNotParseAsScope(String),
}

/// error which can occur while parsing a single schema definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaParseError {
    /// the definition contained no tokens once the outer parentheses were removed
    #[error("Malformed schema definition (no tokens): {definition:?}")]
    Empty {
        /// the raw definition string
        definition: String,
    },
}

/// an error during directory operations (connect, bind, search, add, modify, delete,...)
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// the transport could not be opened or StartTLS negotiation failed
    #[error("Transport error connecting to {target}: {message}")]
    Transport {
        /// host:port we tried to reach
        target: String,
        /// description of the underlying failure
        message: String,
    },
    /// the server rejected a bind
    #[error("Bind as {dn:?} failed with code {code}: {message}")]
    Authentication {
        /// the DN used for the bind, empty for anonymous binds
        dn: String,
        /// LDAP result code
        code: u32,
        /// diagnostic message returned by the server
        message: String,
    },
    /// an LDAP operation returned a non-success result code
    #[error("LDAP {operation} on {dn:?} failed with code {code}: {message}")]
    Protocol {
        /// name of the operation (search, add, modify,...)
        operation: &'static str,
        /// DN the operation targeted
        dn: String,
        /// LDAP result code
        code: u32,
        /// diagnostic message returned by the server
        message: String,
    },
    /// a schema definition could not be parsed
    #[error("Schema parse error: {0}")]
    MalformedSchemaDefinition(#[from] SchemaParseError),
    /// a mutating operation was attempted on a read-only client
    #[error("Refusing to {operation} {dn:?}: the directory client is read-only")]
    ReadOnlyViolation {
        /// name of the refused operation
        operation: &'static str,
        /// DN the operation targeted
        dn: String,
    },
    /// only LDAPv3 is supported
    #[error("Unsupported LDAP protocol version {0}, only version 3 is supported")]
    UnsupportedProtocolVersion(u32),
    /// the server kept returning continuation cookies past the configured limit
    #[error("Paged search below {base:?} exceeded the limit of {limit} pages")]
    PageLimitExceeded {
        /// search base
        base: String,
        /// configured page limit
        limit: u32,
    },
    /// a DN could not be split into RDN and parent
    #[error("Invalid DN {0:?}")]
    InvalidDn(String),
    /// an entry expected to exist was not returned by the server
    #[error("No such entry {0:?}")]
    NoSuchEntry(String),
}

impl DirectoryError {
    /// the LDAP result code carried by this error, if any
    pub fn result_code(&self) -> Option<u32> {
        match self {
            DirectoryError::Authentication { code, .. } | DirectoryError::Protocol { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// true if the error means the transport is no longer usable
    pub fn is_transport(&self) -> bool {
        matches!(self, DirectoryError::Transport { .. })
    }
}

/// errors which can happen while assembling a [crate::config::ServerConfig]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// an I/O error
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    /// an error deserializing the TOML file
    #[error("Toml deserialization error: {0}")]
    TomlError(#[from] toml::de::Error),
    /// an error when compiling or using a regular expression
    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
    /// a required value could not be retrieved from any config source
    #[error("Config builder error: {0}")]
    BuilderError(#[from] crate::config::ServerConfigBuilderError),
    /// an LDAP URI we could not make sense of
    #[error("Invalid LDAP URI {0:?}")]
    InvalidUri(String),
}

/// result type used throughout the directory engine
pub type Result<T> = std::result::Result<T, DirectoryError>;
