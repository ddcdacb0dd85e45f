//! [Connector] and [Transport] on top of the synchronous ldap3 client

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, LdapError, Mod, SearchEntry, SearchOptions, SearchResult};
use native_tls::{Certificate, Identity, TlsConnector};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::x509::X509;
use thiserror::Error;
use tracing::instrument;

use super::{Connector, Modification, ModifyMode, PageControl, RawPage, Transport, TransportSettings};
use crate::entry::{AttributeMap, BinaryAttributes};
use crate::error::{DirectoryError, Result};
use crate::search::SearchRequest;

/// LDAP result code noSuchObject
const NO_SUCH_OBJECT: u32 = 32;

/// LDAP result code timeLimitExceeded
const TIME_LIMIT_EXCEEDED: u32 = 3;

/// LDAP result code sizeLimitExceeded
const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// errors which can happen while assembling the TLS connector
#[derive(Debug, Error)]
pub enum TlsSetupError {
    /// an I/O error reading certificates or keys
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    /// an error in the native_tls crate
    #[error("Native TLS error: {0}")]
    NativeTLSError(#[from] native_tls::Error),
    /// an error in the openssl library used to read certificates and keys
    #[error("openssl error: {0}")]
    OpenSSLError(#[from] openssl::error::ErrorStack),
    /// only one of client certificate and client key was configured
    #[error("client certificate and client key must be configured together")]
    IncompleteClientIdentity,
}

/// read a whole file
fn read_file(path: &Path) -> std::result::Result<Vec<u8>, TlsSetupError> {
    let mut contents = Vec::new();
    let mut file = File::open(path)?;
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// build a TLS connector from the configured CA and client certificate,
/// `None` if no TLS material is configured
pub fn tls_connector(
    settings: &TransportSettings,
) -> std::result::Result<Option<TlsConnector>, TlsSetupError> {
    if settings.ca_cert_path.is_none()
        && settings.client_cert_path.is_none()
        && settings.client_key_path.is_none()
    {
        return Ok(None);
    }
    let mut builder = TlsConnector::builder();
    if let Some(ca_cert_path) = &settings.ca_cert_path {
        let ca_cert_contents = read_file(ca_cert_path)?;
        builder.add_root_certificate(Certificate::from_pem(&ca_cert_contents)?);
    }
    match (&settings.client_cert_path, &settings.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let client_cert = X509::from_pem(&read_file(cert_path)?)?;
            let client_key = PKey::private_key_from_pem(&read_file(key_path)?)?;
            let p12_password = "client";
            let mut p12_builder = Pkcs12::builder();
            p12_builder
                .name("client")
                .pkey(&client_key)
                .cert(&client_cert);
            let p12_contents = p12_builder.build2(p12_password)?.to_der()?;
            builder.identity(Identity::from_pkcs12(&p12_contents, p12_password)?);
        }
        (None, None) => {}
        _ => return Err(TlsSetupError::IncompleteClientIdentity),
    }
    if settings.no_tls_verify {
        builder.danger_accept_invalid_certs(true);
    }
    Ok(Some(builder.build()?))
}

/// opens [Ldap3Transport]s
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap3Connector;

impl Connector for Ldap3Connector {
    type Transport = Ldap3Transport;

    #[instrument(skip(self))]
    fn connect(&self, settings: &TransportSettings) -> Result<Ldap3Transport> {
        let target = settings.target();
        let transport_error = |message: String| DirectoryError::Transport {
            target: target.clone(),
            message,
        };
        let mut ldap_settings = LdapConnSettings::new()
            .set_starttls(settings.starttls)
            .set_no_tls_verify(settings.no_tls_verify);
        if let Some(timeout) = settings.timeout {
            ldap_settings = ldap_settings.set_conn_timeout(timeout);
        }
        if let Some(connector) = tls_connector(settings).map_err(|e| transport_error(e.to_string()))? {
            ldap_settings = ldap_settings.set_connector(connector);
        }
        tracing::debug!(
            "Connecting to {} (StartTLS: {})",
            settings.url(),
            settings.starttls
        );
        let conn = LdapConn::with_settings(ldap_settings, &settings.url())
            .map_err(|e| transport_error(e.to_string()))?;
        Ok(Ldap3Transport {
            conn,
            target,
            timeout: settings.timeout,
        })
    }
}

/// a live ldap3 connection
pub struct Ldap3Transport {
    /// the connection
    conn: LdapConn,
    /// host:port for error messages
    target: String,
    /// per-operation timeout
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Ldap3Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3Transport")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Ldap3Transport {
    /// the connection with the per-operation timeout applied
    fn conn(&mut self) -> &mut LdapConn {
        if let Some(timeout) = self.timeout {
            self.conn.with_timeout(timeout);
        }
        &mut self.conn
    }

    /// map an ldap3 error of an operation to our error type
    fn operation_error(&self, operation: &'static str, dn: &str, err: LdapError) -> DirectoryError {
        match err {
            LdapError::LdapResult { result } => DirectoryError::Protocol {
                operation,
                dn: dn.to_string(),
                code: result.rc,
                message: result.text,
            },
            other => DirectoryError::Transport {
                target: self.target.clone(),
                message: other.to_string(),
            },
        }
    }

    /// turn the outcome of a non-search operation into our result type
    fn check(
        &self,
        operation: &'static str,
        dn: &str,
        result: ldap3::result::Result<ldap3::LdapResult>,
    ) -> Result<()> {
        let result = result.map_err(|e| self.operation_error(operation, dn, e))?;
        if result.rc != 0 {
            return Err(DirectoryError::Protocol {
                operation,
                dn: dn.to_string(),
                code: result.rc,
                message: result.text,
            });
        }
        Ok(())
    }
}

/// convert string values into the set type ldap3 wants
fn value_set(values: &[String]) -> HashSet<String> {
    values.iter().cloned().collect()
}

impl Transport for Ldap3Transport {
    fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let result = self
            .conn()
            .simple_bind(dn, password)
            .map_err(|e| self.operation_error("bind", dn, e))?;
        if result.rc != 0 {
            return Err(DirectoryError::Authentication {
                dn: dn.to_string(),
                code: result.rc,
                message: result.text,
            });
        }
        Ok(())
    }

    fn search(&mut self, request: &SearchRequest, page: Option<&PageControl>) -> Result<RawPage> {
        let options = SearchOptions::new()
            .deref(request.deref.into())
            .typesonly(request.attrs_only)
            .sizelimit(request.size_limit)
            .timelimit(request.time_limit);
        let conn = self.conn();
        conn.with_search_options(options);
        if let Some(page) = page {
            conn.with_controls(PagedResults {
                size: i32::try_from(page.size).unwrap_or(i32::MAX),
                cookie: page.cookie.clone(),
            });
        }
        let SearchResult(raw_entries, result) = conn
            .search(
                &request.base,
                request.scope.into(),
                &request.filter,
                &request.attributes,
            )
            .map_err(|e| self.operation_error("search", &request.base, e))?;
        match result.rc {
            0 => {}
            NO_SUCH_OBJECT => {
                tracing::debug!("Search base {} does not exist", request.base);
                return Ok(RawPage::default());
            }
            TIME_LIMIT_EXCEEDED | SIZE_LIMIT_EXCEEDED => {
                tracing::warn!(
                    "Search below {} stopped early with code {}: {}",
                    request.base,
                    result.rc,
                    result.text
                );
            }
            rc => {
                return Err(DirectoryError::Protocol {
                    operation: "search",
                    dn: request.base.clone(),
                    code: rc,
                    message: result.text,
                })
            }
        }
        let cookie = result.ctrls.iter().find_map(|ctrl| match ctrl {
            Control(Some(ControlType::PagedResults), raw) => {
                Some(raw.parse::<PagedResults>().cookie)
            }
            _ => None,
        });
        let entries = raw_entries
            .into_iter()
            .filter(|e| !e.is_ref() && !e.is_intermediate())
            .map(SearchEntry::construct)
            .collect();
        Ok(RawPage {
            entries: Some(entries),
            cookie,
        })
    }

    fn add(&mut self, dn: &str, attributes: &AttributeMap, binary: &BinaryAttributes) -> Result<()> {
        // we need to perform the add in one operation or we will run into problems with
        // objectclass requirements
        let mut combined_attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = binary
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.iter().cloned().collect()))
            .collect();
        combined_attrs.extend(attributes.iter().map(|(k, v)| {
            (
                k.as_bytes().to_vec(),
                v.iter().map(|s| s.as_bytes().to_vec()).collect(),
            )
        }));
        let result = self.conn().add(dn, combined_attrs);
        self.check("add", dn, result)
    }

    fn modify(&mut self, dn: &str, modifications: &[Modification]) -> Result<()> {
        let mods: Vec<Mod<String>> = modifications
            .iter()
            .map(|m| {
                let attribute = m.attribute.clone();
                let values = value_set(&m.values);
                match m.mode {
                    ModifyMode::Add => Mod::Add(attribute, values),
                    ModifyMode::Delete => Mod::Delete(attribute, values),
                    ModifyMode::Replace => Mod::Replace(attribute, values),
                }
            })
            .collect();
        let result = self.conn().modify(dn, mods);
        self.check("modify", dn, result)
    }

    fn delete(&mut self, dn: &str) -> Result<()> {
        let result = self.conn().delete(dn);
        self.check("delete", dn, result)
    }

    fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> Result<bool> {
        let result = self
            .conn()
            .compare(dn, attribute, value)
            .map_err(|e| self.operation_error("compare", dn, e))?;
        result
            .equal()
            .map_err(|e| self.operation_error("compare", dn, e))
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let result = self.conn().modifydn(dn, new_rdn, delete_old_rdn, new_parent);
        self.check("rename", dn, result)
    }

    fn unbind(&mut self) -> Result<()> {
        let target = self.target.clone();
        self.conn
            .unbind()
            .map_err(|e| DirectoryError::Transport {
                target,
                message: e.to_string(),
            })
    }
}
