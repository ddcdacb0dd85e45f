//! the connect/bind state machine around one transport

use tracing::instrument;

use crate::config::ServerConfig;
use crate::entry::{AttributeMap, BinaryAttributes, SearchResults};
use crate::error::{DirectoryError, Result};
use crate::root_dse::RootDse;
use crate::schema::SchemaSource;
use crate::search::{PagedSearchExecutor, SearchRequest};
use crate::transport::{
    Connector, Ldap3Connector, Modification, Transport, TransportSettings, LDAP_VERSION,
};

/// where a [Connection] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// no transport
    Unconnected,
    /// transport open, not (or no longer) bound
    Connected,
    /// transport open and bound with the stored credentials
    Bound,
}

/// one logical connection to a directory server
///
/// operations connect and bind on demand. Changing host, port or StartTLS
/// drops the transport, changing credentials only drops the bind.
pub struct Connection<C: Connector = Ldap3Connector> {
    /// opens transports
    connector: C,
    /// where to connect to
    settings: TransportSettings,
    /// DN for the primary bind, anonymous if `None`
    bind_dn: Option<String>,
    /// password for the primary bind
    bind_password: Option<String>,
    /// the transport, only present while connected
    transport: Option<C::Transport>,
    /// true after a successful primary bind on the current transport
    bound: bool,
    /// page size as configured
    configured_page_size: u32,
    /// page size in effect, 0 once paging has been found unsupported
    page_size: u32,
    /// maximum number of pages of a single search
    max_pages: u32,
    /// cached root DSE
    root_dse: Option<RootDse>,
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.settings.target())
            .field("starttls", &self.settings.starttls)
            .field("bind_dn", &self.bind_dn)
            .field("state", &self.state())
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Connection<Ldap3Connector> {
    /// a connection using the ldap3 transport
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(Ldap3Connector, config)
    }
}

impl<C: Connector> Connection<C> {
    /// an unconnected connection
    pub fn new(connector: C, config: &ServerConfig) -> Self {
        Connection {
            connector,
            settings: config.transport_settings(),
            bind_dn: config.bind_dn.clone(),
            bind_password: config.bind_password.clone(),
            transport: None,
            bound: false,
            configured_page_size: config.page_size,
            page_size: config.page_size,
            max_pages: config.max_pages,
            root_dse: None,
        }
    }

    /// the current lifecycle state
    pub fn state(&self) -> ConnectionState {
        match (&self.transport, self.bound) {
            (None, _) => ConnectionState::Unconnected,
            (Some(_), false) => ConnectionState::Connected,
            (Some(_), true) => ConnectionState::Bound,
        }
    }

    /// the transport settings
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// the host
    pub fn host(&self) -> &str {
        &self.settings.host
    }

    /// the port
    pub fn port(&self) -> u16 {
        self.settings.port
    }

    /// true if StartTLS is negotiated after connecting
    pub fn starttls(&self) -> bool {
        self.settings.starttls
    }

    /// the DN of the primary bind
    pub fn bind_dn(&self) -> Option<&str> {
        self.bind_dn.as_deref()
    }

    /// page size in effect, 0 if searches are not paged
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// maximum number of pages of one search
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// the protocol version, always 3
    pub fn protocol_version(&self) -> u32 {
        LDAP_VERSION
    }

    /// only version 3 is accepted
    pub fn set_protocol_version(&mut self, version: u32) -> Result<()> {
        if version != LDAP_VERSION {
            return Err(DirectoryError::UnsupportedProtocolVersion(version));
        }
        Ok(())
    }

    /// change the host, disconnecting and forgetting the root DSE
    pub fn set_host<S: Into<String>>(&mut self, host: S) {
        let host = host.into();
        if host != self.settings.host {
            self.disconnect();
            self.reset_root_dse();
            self.settings.host = host;
        }
    }

    /// change the port, disconnecting and forgetting the root DSE
    pub fn set_port(&mut self, port: u16) {
        if port != self.settings.port {
            self.disconnect();
            self.reset_root_dse();
            self.settings.port = port;
        }
    }

    /// switch StartTLS, disconnecting
    pub fn set_starttls(&mut self, starttls: bool) {
        if starttls != self.settings.starttls {
            self.disconnect();
            self.settings.starttls = starttls;
        }
    }

    /// replace the stored credentials, the next operation binds again
    pub fn set_credentials(&mut self, dn: Option<String>, password: Option<String>) {
        if dn != self.bind_dn || password != self.bind_password {
            tracing::debug!("Credentials changed, next operation binds as {:?}", dn);
            self.bind_dn = dn;
            self.bind_password = password;
            self.bound = false;
        }
    }

    /// change the page size, 0 disables paging
    pub fn set_page_size(&mut self, page_size: u32) {
        self.configured_page_size = page_size;
        self.page_size = page_size;
    }

    /// open the transport unless already connected
    ///
    /// on failure no transport is kept
    #[instrument(skip(self), fields(target = %self.settings.target()))]
    pub fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }
        let transport = self.connector.connect(&self.settings)?;
        tracing::debug!("Connected to {}", self.settings.url());
        self.transport = Some(transport);
        self.bound = false;
        Ok(())
    }

    /// bind with the stored credentials, a no-op if already bound
    ///
    /// after the bind succeeds the root DSE is consulted to see whether the
    /// server supports paged results; if it does not, paging is turned off
    #[instrument(skip(self), fields(target = %self.settings.target()))]
    pub fn bind(&mut self) -> Result<()> {
        self.connect()?;
        if self.bound {
            return Ok(());
        }
        let dn = self.bind_dn.clone().unwrap_or_default();
        let password = self.bind_password.clone().unwrap_or_default();
        self.with_transport(|t| t.simple_bind(&dn, &password))?;
        tracing::debug!("Bound to {} as {:?}", self.settings.target(), dn);
        self.bound = true;
        self.probe_paging();
        Ok(())
    }

    /// bind again with new credentials, which become the stored ones
    pub fn rebind(&mut self, dn: Option<String>, password: Option<String>) -> Result<()> {
        self.set_credentials(dn, password);
        self.bind()
    }

    /// check whether a DN/password pair is accepted by the server
    ///
    /// uses a transport of its own, so the state of this connection is the
    /// same afterwards. An empty password is rejected without asking the
    /// server, so unlike every other check no bind is sent for it: servers
    /// accept an empty password as an unauthenticated bind.
    #[instrument(skip(self, password))]
    pub fn check_credentials(&mut self, dn: &str, password: &str) -> Result<bool> {
        if password.is_empty() {
            tracing::debug!("Refusing to check empty password for {}", dn);
            return Ok(false);
        }
        let mut transport = self.connector.connect(&self.settings)?;
        let outcome = transport.simple_bind(dn, password);
        if let Err(err) = transport.unbind() {
            tracing::debug!("Unbind after credential check failed: {}", err);
        }
        match outcome {
            Ok(()) => Ok(true),
            Err(DirectoryError::Authentication { code, message, .. }) => {
                tracing::debug!("Credentials for {} rejected ({}): {}", dn, code, message);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// send an unbind request and close the transport
    ///
    /// does nothing if not connected
    pub fn unbind(&mut self) -> Result<()> {
        self.bound = false;
        match self.transport.take() {
            Some(mut transport) => {
                tracing::debug!("Unbinding from {}", self.settings.target());
                transport.unbind()
            }
            None => Ok(()),
        }
    }

    /// like [Connection::unbind] but errors are only logged
    pub fn disconnect(&mut self) {
        if let Err(err) = self.unbind() {
            tracing::warn!("Error disconnecting from {}: {}", self.settings.target(), err);
        }
    }

    /// the root DSE, read once and cached until [Connection::reset_root_dse]
    #[instrument(skip(self))]
    pub fn root_dse(&mut self) -> Result<&RootDse> {
        if self.root_dse.is_none() {
            // binding may already read it while checking for paging support
            self.bind()?;
        }
        let dse = match self.root_dse.take() {
            Some(dse) => dse,
            None => {
                let request = SearchRequest::read("").with_attributes(RootDse::ATTRIBUTES);
                let entry = self.search_pages(&request, 0)?.into_first().unwrap_or_default();
                RootDse::from_entry(entry)
            }
        };
        Ok(&*self.root_dse.insert(dse))
    }

    /// forget the cached root DSE and any paging downgrade based on it
    pub fn reset_root_dse(&mut self) {
        self.root_dse = None;
        self.page_size = self.configured_page_size;
    }

    /// run a search to completion, paged if enabled
    pub fn search(&mut self, request: &SearchRequest) -> Result<SearchResults> {
        self.search_pages(request, self.page_size)
    }

    /// add an entry
    pub fn add(
        &mut self,
        dn: &str,
        attributes: &AttributeMap,
        binary: &BinaryAttributes,
    ) -> Result<()> {
        self.bind()?;
        self.with_transport(|t| t.add(dn, attributes, binary))
    }

    /// modify an entry
    pub fn modify(&mut self, dn: &str, modifications: &[Modification]) -> Result<()> {
        self.bind()?;
        self.with_transport(|t| t.modify(dn, modifications))
    }

    /// delete a leaf entry
    pub fn delete(&mut self, dn: &str) -> Result<()> {
        self.bind()?;
        self.with_transport(|t| t.delete(dn))
    }

    /// compare an attribute value
    pub fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> Result<bool> {
        self.bind()?;
        self.with_transport(|t| t.compare(dn, attribute, value))
    }

    /// rename and/or move an entry
    pub fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.bind()?;
        self.with_transport(|t| t.rename(dn, new_rdn, new_parent, delete_old_rdn))
    }

    /// bind, then run the search with the given page size
    fn search_pages(&mut self, request: &SearchRequest, page_size: u32) -> Result<SearchResults> {
        self.bind()?;
        let max_pages = self.max_pages;
        self.with_transport(|t| PagedSearchExecutor::new(t, page_size, max_pages).run(request))
    }

    /// turn paging off if the server does not advertise the control
    fn probe_paging(&mut self) {
        if self.page_size == 0 {
            return;
        }
        match self.root_dse() {
            Ok(dse) if dse.supports_paged_results() => {
                tracing::debug!("Server supports paged results");
            }
            Ok(_) => {
                tracing::warn!(
                    "{} does not advertise the paged results control, disabling paging",
                    self.settings.target()
                );
                self.page_size = 0;
            }
            Err(err) => {
                tracing::warn!("Could not read root DSE, disabling paging: {}", err);
                self.page_size = 0;
            }
        }
    }

    /// run an operation on the transport, dropping it if the operation
    /// reports it unusable
    fn with_transport<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut C::Transport) -> Result<R>,
    {
        let Some(transport) = self.transport.as_mut() else {
            return Err(DirectoryError::Transport {
                target: self.settings.target(),
                message: "not connected".to_string(),
            });
        };
        let result = f(transport);
        if let Err(err) = &result {
            if err.is_transport() {
                tracing::warn!("Dropping connection to {}: {}", self.settings.target(), err);
                self.transport = None;
                self.bound = false;
            }
        }
        result
    }
}

impl<C: Connector> SchemaSource for Connection<C> {
    fn subschema_subentry(&mut self) -> Result<Option<String>> {
        Ok(self.root_dse()?.subschema_subentry.clone())
    }

    fn read_attribute(&mut self, dn: &str, attribute: &str) -> Result<Vec<String>> {
        let request = SearchRequest::read(dn).with_attributes([attribute]);
        Ok(self
            .search(&request)?
            .into_first()
            .and_then(|mut entry| entry.attributes.remove(attribute))
            .unwrap_or_default())
    }
}
