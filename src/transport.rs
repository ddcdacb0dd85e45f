//! the seam between the engine and the wire
//!
//! [Connector] opens a [Transport]; everything the engine sends to a server
//! goes through these two traits. [native] implements them with the
//! synchronous ldap3 client.

use std::path::PathBuf;
use std::time::Duration;

use crate::entry::{AttributeMap, BinaryAttributes};
use crate::error::Result;
use crate::search::SearchRequest;

pub mod native;

pub use native::{Ldap3Connector, Ldap3Transport};

/// the only protocol version the engine speaks
pub const LDAP_VERSION: u32 = 3;

/// what a [Connector] needs to open a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// use ldaps:// instead of ldap://
    pub ldaps: bool,
    /// negotiate StartTLS right after connecting
    pub starttls: bool,
    /// connect and per-operation timeout
    pub timeout: Option<Duration>,
    /// CA certificate path
    pub ca_cert_path: Option<PathBuf>,
    /// client certificate path
    pub client_cert_path: Option<PathBuf>,
    /// client key path
    pub client_key_path: Option<PathBuf>,
    /// skip server certificate verification
    pub no_tls_verify: bool,
}

impl TransportSettings {
    /// settings for a plain connection to host:port
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        TransportSettings {
            host: host.into(),
            port,
            ldaps: false,
            starttls: false,
            timeout: None,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            no_tls_verify: false,
        }
    }

    /// the LDAP URL for these settings
    pub fn url(&self) -> String {
        let scheme = if self.ldaps { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// host:port, used in error messages
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// paged results control values for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageControl {
    /// requested page size
    pub size: u32,
    /// continuation cookie, empty for the first page
    pub cookie: Vec<u8>,
}

/// one page of a search, exactly as the transport produced it
///
/// only [crate::search::normalize] looks inside `entries`
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// the entries, `None` if the server found nothing (e.g. noSuchObject)
    pub entries: Option<Vec<ldap3::SearchEntry>>,
    /// continuation cookie of the paged results response control, if any
    pub cookie: Option<Vec<u8>>,
}

/// kind of change in a [Modification]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModifyMode {
    /// replace all values of the attribute
    #[default]
    Replace,
    /// add values
    Add,
    /// delete the given values, or the whole attribute if none are given
    Delete,
}

/// one change of one attribute in a modify request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// kind of change
    pub mode: ModifyMode,
    /// attribute name
    pub attribute: String,
    /// values to add, delete or replace with
    pub values: Vec<String>,
}

/// opens transports
pub trait Connector {
    /// the transport type produced
    type Transport: Transport;

    /// open a transport, negotiating StartTLS if the settings ask for it
    ///
    /// failures are reported as [crate::DirectoryError::Transport]
    fn connect(&self, settings: &TransportSettings) -> Result<Self::Transport>;
}

/// an open, LDAPv3 speaking link to one server
pub trait Transport {
    /// simple bind, [crate::DirectoryError::Authentication] on rejection
    fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// one search request, optionally carrying a paged results control
    fn search(&mut self, request: &SearchRequest, page: Option<&PageControl>) -> Result<RawPage>;

    /// add an entry
    fn add(&mut self, dn: &str, attributes: &AttributeMap, binary: &BinaryAttributes)
        -> Result<()>;

    /// modify an entry
    fn modify(&mut self, dn: &str, modifications: &[Modification]) -> Result<()>;

    /// delete a leaf entry
    fn delete(&mut self, dn: &str) -> Result<()>;

    /// compare an attribute value, true if it matches
    fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> Result<bool>;

    /// modify DN
    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> Result<()>;

    /// send an unbind request, after which the transport is unusable
    fn unbind(&mut self) -> Result<()>;
}
