//! server configuration, from TOML files, OpenLDAP client config files or
//! built programmatically

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use dirs2::home_dir;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::instrument;

use crate::error::ConfigError;
use crate::search::SearchScope;
use crate::transport::TransportSettings;

/// port used when neither the config nor the URI name one
pub const DEFAULT_PORT: u16 = 389;

/// port used for ldaps:// URIs without an explicit port
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// upper bound on the number of pages a single search may fetch
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

/// serde default for [ServerConfig::port]
fn default_port() -> u16 {
    DEFAULT_PORT
}

/// serde default for [ServerConfig::max_pages]
fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

/// serde default for [ServerConfig::object_class]
fn default_object_class() -> Vec<String> {
    vec!["*".to_string()]
}

/// everything needed to talk to one directory server
///
/// the values are treated as opaque by the engine, they are owned by whoever
/// hosts it
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(setter(into))]
pub struct ServerConfig {
    /// host name or address of the directory server
    pub host: String,
    /// TCP port
    #[builder(default = "DEFAULT_PORT")]
    #[serde(default = "default_port")]
    pub port: u16,
    /// connect with ldaps:// instead of ldap://
    #[builder(default)]
    #[serde(default)]
    pub ldaps: bool,
    /// upgrade the connection with StartTLS before binding
    #[builder(default)]
    #[serde(default)]
    pub starttls: bool,
    /// DN for the primary bind, anonymous if unset
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub bind_dn: Option<String>,
    /// password for the primary bind
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub bind_password: Option<String>,
    /// page size for the paged results control, 0 disables paging
    #[builder(default)]
    #[serde(default)]
    pub page_size: u32,
    /// maximum number of pages fetched for a single search
    #[builder(default = "DEFAULT_MAX_PAGES")]
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// refuse all mutating operations
    #[builder(default)]
    #[serde(default)]
    pub read_only: bool,
    /// base DN for searches done via [crate::DirectoryClient::find]
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub base_dn: Option<String>,
    /// scope for searches done via [crate::DirectoryClient::find]
    #[builder(default)]
    #[serde(default)]
    pub scope: SearchScope,
    /// object classes every entry found via [crate::DirectoryClient::find] must have
    #[builder(default = "default_object_class()")]
    #[serde(default = "default_object_class")]
    pub object_class: Vec<String>,
    /// extra filter clause ANDed into [ServerConfig::object_filter]
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub filter: Option<String>,
    /// connect timeout in seconds
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// CA certificate path
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// client certificate path
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,
    /// client key path
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
    /// skip verification of the server certificate
    #[builder(default)]
    #[serde(default)]
    pub no_tls_verify: bool,
}

impl ServerConfig {
    /// the transport relevant part of the config
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            host: self.host.clone(),
            port: self.port,
            ldaps: self.ldaps,
            starttls: self.starttls,
            timeout: self.timeout_secs.map(Duration::from_secs),
            ca_cert_path: self.ca_cert_path.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            no_tls_verify: self.no_tls_verify,
        }
    }

    /// build a filter matching the configured object classes, the configured
    /// extra filter and an optional caller supplied clause
    ///
    /// clauses without surrounding parentheses get them added
    pub fn object_filter(&self, clause: Option<&str>) -> String {
        let mut parts: Vec<String> = self
            .object_class
            .iter()
            .map(|oc| format!("(objectClass={})", oc))
            .collect();
        if parts.is_empty() {
            parts.push("(objectClass=*)".to_string());
        }
        for extra in self.filter.iter().map(String::as_str).chain(clause) {
            let extra = extra.trim();
            if extra.is_empty() {
                continue;
            }
            if extra.starts_with('(') {
                parts.push(extra.to_string());
            } else {
                parts.push(format!("({})", extra));
            }
        }
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            format!("(&{})", parts.concat())
        }
    }
}

/// split an LDAP URI into (host, port, ldaps)
///
/// only the first URI of a whitespace separated list is considered
pub fn parse_ldap_uri(uri: &str) -> Result<(String, u16, bool), ConfigError> {
    lazy_static! {
        static ref URI_RE: Regex =
            Regex::new(r"^(?i)(ldaps?)://([^:/\s]+)(?::(\d+))?/?$").expect("valid URI regex");
    }
    let first = uri
        .split_whitespace()
        .next()
        .ok_or_else(|| ConfigError::InvalidUri(uri.to_string()))?;
    let caps = URI_RE
        .captures(first)
        .ok_or_else(|| ConfigError::InvalidUri(uri.to_string()))?;
    let ldaps = caps
        .get(1)
        .is_some_and(|s| s.as_str().eq_ignore_ascii_case("ldaps"));
    let host = caps
        .get(2)
        .map(|h| h.as_str().to_string())
        .ok_or_else(|| ConfigError::InvalidUri(uri.to_string()))?;
    let port = match caps.get(3) {
        Some(p) => p
            .as_str()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidUri(uri.to_string()))?,
        None if ldaps => DEFAULT_LDAPS_PORT,
        None => DEFAULT_PORT,
    };
    Ok((host, port, ldaps))
}

/// apply the options we understand from the content of an OpenLDAP client
/// config file (ldap.conf or .ldaprc) to the builder
pub fn apply_openldap_config<'a>(
    builder: &'a mut ServerConfigBuilder,
    content: &str,
) -> Result<&'a mut ServerConfigBuilder, ConfigError> {
    lazy_static! {
        static ref OPTION_RE: Regex =
            Regex::new(r"^\s*([A-Za-z_]+)\s+(.*?)\s*$").expect("valid option regex");
    }
    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let Some(caps) = OPTION_RE.captures(line) else {
            continue;
        };
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str();
        match key.as_str().to_ascii_uppercase().as_str() {
            "URI" => {
                tracing::debug!("Extracted URI value {}", value);
                let (host, port, ldaps) = parse_ldap_uri(value)?;
                builder.host(host).port(port).ldaps(ldaps);
            }
            "BASE" => {
                tracing::debug!("Extracted BASE value {}", value);
                builder.base_dn(value);
            }
            "BINDDN" => {
                tracing::debug!("Extracted BINDDN value {}", value);
                builder.bind_dn(value);
            }
            "TLS_CACERT" => {
                tracing::debug!("Extracted TLS_CACERT value {}", value);
                builder.ca_cert_path(PathBuf::from(value));
            }
            "TLS_CERT" => {
                tracing::debug!("Extracted TLS_CERT value {}", value);
                builder.client_cert_path(PathBuf::from(value));
            }
            "TLS_KEY" => {
                tracing::debug!("Extracted TLS_KEY value {}", value);
                builder.client_key_path(PathBuf::from(value));
            }
            "TLS_REQCERT" => {
                let never = value.eq_ignore_ascii_case("never") || value.eq_ignore_ascii_case("allow");
                builder.no_tls_verify(never);
            }
            "TIMEOUT" | "NETWORK_TIMEOUT" => {
                if let Ok(secs) = value.parse::<u64>() {
                    builder.timeout_secs(secs);
                }
            }
            _ => {}
        }
    }
    Ok(builder)
}

/// try to detect connect parameters from the OpenLDAP config files
/// (ldap.conf in /etc/ldap or /etc/openldap and .ldaprc in the user home dir)
///
/// the user's .ldaprc is applied last so its values win
#[instrument(skip(builder))]
pub fn openldap_server_config(
    builder: &mut ServerConfigBuilder,
) -> Result<&mut ServerConfigBuilder, ConfigError> {
    let mut ldap_conf_filename = Path::new("/etc/ldap/ldap.conf");
    if !ldap_conf_filename.exists() {
        ldap_conf_filename = Path::new("/etc/openldap/ldap.conf");
    }
    if ldap_conf_filename.exists() {
        tracing::debug!("Using ldap.conf at {:?}", ldap_conf_filename);
        let ldap_conf_content = std::fs::read_to_string(ldap_conf_filename)?;
        apply_openldap_config(builder, &ldap_conf_content)?;
    }
    if let Some(mut ldap_rc_filename) = home_dir() {
        ldap_rc_filename.push(".ldaprc");
        if ldap_rc_filename.exists() {
            tracing::debug!("Using .ldaprc at {:?}", ldap_rc_filename);
            let ldap_rc_content = std::fs::read_to_string(ldap_rc_filename)?;
            apply_openldap_config(builder, &ldap_rc_content)?;
        }
    }
    Ok(builder)
}

/// fill the builder with hardcoded default parameters
///
/// the only required value without a default is the host, which falls back
/// to localhost here
#[instrument(skip(builder))]
pub fn default_server_config(builder: &mut ServerConfigBuilder) -> &mut ServerConfigBuilder {
    if builder.host.is_none() {
        builder.host("localhost");
    }
    builder
}

/// load the server config from a toml file
#[instrument]
pub fn toml_server_config(filename: PathBuf) -> Result<ServerConfig, ConfigError> {
    let config = std::fs::read_to_string(filename)?;
    let result: ServerConfig = toml::from_str(&config)?;
    Ok(result)
}

/// environment variable naming a TOML config file
pub const CONFIG_ENV_VAR: &str = "SIMPLE_LDAP_CONFIG";

/// load the TOML file named by [CONFIG_ENV_VAR] if set, otherwise build a
/// server config from the OpenLDAP client config files, substituting
/// defaults for anything they do not set
#[instrument]
pub fn server_config() -> Result<ServerConfig, ConfigError> {
    if let Some(filename) = std::env::var_os(CONFIG_ENV_VAR) {
        tracing::debug!("Using config file {:?} from {}", filename, CONFIG_ENV_VAR);
        return toml_server_config(PathBuf::from(filename));
    }
    let mut builder = ServerConfigBuilder::default();
    openldap_server_config(&mut builder)?;
    match builder.build() {
        Ok(result) => Ok(result),
        Err(err_msg) => {
            tracing::debug!(
                "Building of ServerConfig based on OpenLDAP config files failed: {}",
                err_msg
            );
            Ok(default_server_config(&mut builder).build()?)
        }
    }
}
