//! the directory client: one connection, its schema cache and the
//! read-only guard in front of every write

use tracing::instrument;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dn::{rdn_values, split_dn};
use crate::entry::{AttributeMap, BinaryAttributes, Entry, SearchResults};
use crate::error::{DirectoryError, Result};
use crate::root_dse::RootDse;
use crate::schema::{Schema, SchemaCache};
use crate::search::{SearchRequest, SearchScope, MATCH_ALL_FILTER, NO_ATTRIBUTES};
use crate::transport::{Connector, Ldap3Connector, Modification, ModifyMode};

/// a synchronous client for one directory server
#[derive(Debug)]
pub struct DirectoryClient<C: Connector = Ldap3Connector> {
    /// the connection
    connection: Connection<C>,
    /// schema definitions loaded through the connection
    schema: SchemaCache,
    /// the configuration the client was created from
    config: ServerConfig,
    /// refuse all writes
    read_only: bool,
}

impl DirectoryClient<Ldap3Connector> {
    /// a client talking to the configured server through ldap3
    pub fn from_config(config: ServerConfig) -> Self {
        Self::new(Ldap3Connector, config)
    }
}

impl<C: Connector> DirectoryClient<C> {
    /// a client using the given connector, nothing is sent until the first
    /// operation
    pub fn new(connector: C, config: ServerConfig) -> Self {
        DirectoryClient {
            connection: Connection::new(connector, &config),
            schema: SchemaCache::new(),
            read_only: config.read_only,
            config,
        }
    }

    /// the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// the underlying connection
    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    /// the underlying connection, e.g. to change host or credentials
    pub fn connection_mut(&mut self) -> &mut Connection<C> {
        &mut self.connection
    }

    /// true if writes are refused
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// refuse or allow writes
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// connect and bind with the configured credentials
    pub fn bind(&mut self) -> Result<()> {
        self.connection.bind()
    }

    /// check a user's password without touching the client's own session
    pub fn authenticate(&mut self, dn: &str, password: &str) -> Result<bool> {
        self.connection.check_credentials(dn, password)
    }

    /// run a search to completion
    pub fn search(&mut self, request: &SearchRequest) -> Result<SearchResults> {
        self.connection.search(request)
    }

    /// search below the configured base DN with the configured scope and
    /// object class filter, narrowed by an optional extra clause
    ///
    /// without a configured base DN the first naming context of the server
    /// is used
    #[instrument(skip(self))]
    pub fn find(&mut self, clause: Option<&str>, attributes: &[&str]) -> Result<SearchResults> {
        let base = match &self.config.base_dn {
            Some(base) => base.clone(),
            None => self
                .connection
                .root_dse()?
                .naming_contexts
                .first()
                .cloned()
                .unwrap_or_default(),
        };
        let request = SearchRequest::new(base, self.config.object_filter(clause), self.config.scope)
            .with_attributes(attributes.iter().copied());
        self.connection.search(&request)
    }

    /// true if an entry with this DN exists
    pub fn exists(&mut self, dn: &str) -> Result<bool> {
        let request = SearchRequest::read(dn).with_attributes([NO_ATTRIBUTES]);
        Ok(!self.connection.search(&request)?.is_empty())
    }

    /// a single entry with all its user attributes
    pub fn entry(&mut self, dn: &str) -> Result<Option<Entry>> {
        Ok(self.connection.search(&SearchRequest::read(dn))?.into_first())
    }

    /// compare an attribute value on the server
    pub fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> Result<bool> {
        self.connection.compare(dn, attribute, value)
    }

    /// add an entry
    ///
    /// empty values are dropped, as are attributes left without values
    pub fn add(&mut self, dn: &str, attributes: &AttributeMap) -> Result<()> {
        self.add_with_binary(dn, attributes, &BinaryAttributes::new())
    }

    /// add an entry with textual and binary attributes
    #[instrument(skip(self, attributes, binary))]
    pub fn add_with_binary(
        &mut self,
        dn: &str,
        attributes: &AttributeMap,
        binary: &BinaryAttributes,
    ) -> Result<()> {
        self.ensure_writable("add", dn)?;
        let mut attributes = attributes.clone();
        attributes.retain(|name, values| {
            values.retain(|v| !v.is_empty());
            if values.is_empty() {
                tracing::debug!("Omitting empty attribute {} from {}", name, dn);
            }
            !values.is_empty()
        });
        let mut binary = binary.clone();
        binary.retain(|_, values| {
            values.retain(|v| !v.is_empty());
            !values.is_empty()
        });
        tracing::debug!(
            "Adding LDAP entry at {} with attributes\n{:#?}\nand binary attributes\n{:#?}",
            dn,
            attributes,
            binary.keys().collect::<Vec<_>>()
        );
        self.connection.add(dn, &attributes, &binary)
    }

    /// delete an entry, with `recursive` all its descendants first
    ///
    /// children are deleted depth first; the first failure aborts the whole
    /// operation, leaving whatever was already deleted deleted
    #[instrument(skip(self))]
    pub fn delete(&mut self, dn: &str, recursive: bool) -> Result<()> {
        self.ensure_writable("delete", dn)?;
        if recursive {
            let request = SearchRequest::new(dn, MATCH_ALL_FILTER, SearchScope::One)
                .with_attributes([NO_ATTRIBUTES]);
            for child in self.connection.search(&request)? {
                tracing::debug!("Found child entry to delete {}", child.dn);
                self.delete(&child.dn, true)?;
            }
        }
        tracing::debug!("Deleting LDAP entry at {}", dn);
        self.connection.delete(dn)
    }

    /// apply every attribute of `attributes` to the entry with the given mode
    ///
    /// with [ModifyMode::Delete] an attribute without values is removed
    /// entirely
    #[instrument(skip(self, attributes))]
    pub fn modify(&mut self, dn: &str, attributes: &AttributeMap, mode: ModifyMode) -> Result<()> {
        self.ensure_writable("modify", dn)?;
        let modifications: Vec<Modification> = attributes
            .iter()
            .map(|(attribute, values)| Modification {
                mode,
                attribute: attribute.to_string(),
                values: values.to_vec(),
            })
            .collect();
        if modifications.is_empty() {
            tracing::debug!("Nothing to modify on {}", dn);
            return Ok(());
        }
        tracing::debug!(
            "Modifying LDAP entry at {} with modifications\n{:#?}",
            dn,
            modifications
        );
        self.connection.modify(dn, &modifications)
    }

    /// rename an entry and/or move it below another parent
    #[instrument(skip(self))]
    pub fn move_entry(&mut self, dn: &str, new_dn: &str, delete_old_rdn: bool) -> Result<()> {
        self.ensure_writable("move", dn)?;
        let (new_rdn, new_parent) = split_dn(new_dn)?;
        let (_, old_parent) = split_dn(dn)?;
        let same_parent = match (&new_parent, &old_parent) {
            (Some(new), Some(old)) => new.eq_ignore_ascii_case(old),
            (None, None) => true,
            _ => false,
        };
        let new_parent = if same_parent { None } else { new_parent };
        self.connection
            .rename(dn, &new_rdn, new_parent.as_deref(), delete_old_rdn)
    }

    /// add a copy of an entry at another DN, leaving the original in place
    ///
    /// the naming attribute values of the old RDN are replaced by those of
    /// the new one
    #[instrument(skip(self))]
    pub fn copy(&mut self, dn: &str, new_dn: &str) -> Result<()> {
        self.ensure_writable("copy", dn)?;
        let (old_rdn, _) = split_dn(dn)?;
        let (new_rdn, _) = split_dn(new_dn)?;
        let Some(source) = self.entry(dn)? else {
            return Err(DirectoryError::NoSuchEntry(dn.to_string()));
        };
        let mut attributes = source.attributes;
        for (attribute, value) in rdn_values(&old_rdn) {
            if let Some(values) = attributes.get_mut(&attribute) {
                values.retain(|v| !v.eq_ignore_ascii_case(&value));
            }
        }
        for (attribute, value) in rdn_values(&new_rdn) {
            if !attributes
                .get(&attribute)
                .is_some_and(|v| v.iter().any(|v| v.eq_ignore_ascii_case(&value)))
            {
                attributes.push(&attribute, value);
            }
        }
        self.add_with_binary(new_dn, &attributes, &source.binary)
    }

    /// the root DSE of the server
    pub fn root_dse(&mut self) -> Result<&RootDse> {
        self.connection.root_dse()
    }

    /// the schema of the server, loaded on demand
    pub fn schema(&mut self) -> Schema<'_, Connection<C>> {
        Schema::new(&mut self.schema, &mut self.connection)
    }

    /// forget the cached schema and root DSE
    pub fn reset_caches(&mut self) {
        self.schema.reset();
        self.connection.reset_root_dse();
    }

    /// fail with [DirectoryError::ReadOnlyViolation] if writes are refused
    fn ensure_writable(&self, operation: &'static str, dn: &str) -> Result<()> {
        if self.read_only {
            tracing::warn!("Refusing to {} {} on read-only client", operation, dn);
            return Err(DirectoryError::ReadOnlyViolation {
                operation,
                dn: dn.to_string(),
            });
        }
        Ok(())
    }
}
