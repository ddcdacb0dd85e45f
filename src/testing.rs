//! in-memory directory server behind the [Connector]/[Transport] traits
//!
//! filters are not evaluated, every entry in scope matches

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use crate::dn::{rdn_values, split_dn};
use crate::entry::{AttributeMap, BinaryAttributes, Entry};
use crate::error::{DirectoryError, Result};
use crate::root_dse::PAGED_RESULTS_OID;
use crate::search::{SearchRequest, SearchScope, NO_ATTRIBUTES};
use crate::transport::{
    Connector, Modification, ModifyMode, PageControl, RawPage, Transport, TransportSettings,
};

/// one search as the mock server saw it
#[derive(Debug, Clone)]
pub struct SearchCall {
    /// search base
    pub base: String,
    /// scope
    pub scope: SearchScope,
    /// requested attributes
    pub attributes: Vec<String>,
    /// page size of the paged results control, if sent
    pub page_size: Option<u32>,
    /// cookie of the paged results control, if sent
    pub cookie: Option<Vec<u8>>,
}

/// state of the mock server, shared by all its transports
#[derive(Debug, Default)]
pub struct MockDirectory {
    /// entries by lowercase DN
    pub entries: BTreeMap<String, Entry>,
    /// accepted DN/password pairs
    pub credentials: HashMap<String, String>,
    /// transports opened
    pub connects: usize,
    /// DNs of all bind requests, in order
    pub binds: Vec<String>,
    /// unbind requests received
    pub unbinds: usize,
    /// every search received
    pub searches: Vec<SearchCall>,
    /// every mutating request as "operation dn"
    pub writes: Vec<String>,
    /// DNs whose deletion fails with unwillingToPerform
    pub fail_delete: HashSet<String>,
    /// refuse new transports
    pub fail_connect: bool,
    /// fail searches with this result code
    pub fail_search: Option<u32>,
    /// every operation fails as if the link broke
    pub drop_link: bool,
    /// hand out a continuation cookie for every page
    pub endless_cookie: bool,
}

impl MockDirectory {
    /// a server with a root DSE advertising paged results and naming
    /// `cn=Subschema` as its subschema subentry
    pub fn new() -> Self {
        let mut directory = MockDirectory::default();
        directory.insert(
            "",
            &[
                ("objectClass", &["top"]),
                ("namingContexts", &["dc=example,dc=com"]),
                ("subschemaSubentry", &["cn=Subschema"]),
                ("supportedControl", &[PAGED_RESULTS_OID]),
                ("supportedLDAPVersion", &["3"]),
            ],
        );
        directory
    }

    /// wrap for sharing with connectors and transports
    pub fn shared(self) -> Rc<RefCell<MockDirectory>> {
        Rc::new(RefCell::new(self))
    }

    /// add or replace an entry
    pub fn insert(&mut self, dn: &str, attributes: &[(&str, &[&str])]) {
        let mut entry = Entry::new(dn);
        for (name, values) in attributes {
            entry.attributes.extend_values(name, values.iter().copied());
        }
        self.entries.insert(dn.to_lowercase(), entry);
    }

    /// accept a DN/password pair for binds
    pub fn allow(&mut self, dn: &str, password: &str) {
        self.credentials
            .insert(dn.to_lowercase(), password.to_string());
    }

    /// replace the supportedControl values of the root DSE
    pub fn set_supported_controls(&mut self, oids: &[&str]) {
        if let Some(root) = self.entries.get_mut("") {
            root.attributes
                .insert("supportedControl", oids.iter().copied());
        }
    }

    /// the entry with this DN
    pub fn get(&self, dn: &str) -> Option<&Entry> {
        self.entries.get(&dn.to_lowercase())
    }

    /// true if the entry exists
    pub fn contains(&self, dn: &str) -> bool {
        self.entries.contains_key(&dn.to_lowercase())
    }

    /// the DNs of all deletes, in order
    pub fn deleted(&self) -> Vec<String> {
        self.writes
            .iter()
            .filter_map(|w| w.strip_prefix("delete "))
            .map(str::to_string)
            .collect()
    }

    /// true if `dn` is within `scope` of `base`
    fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
        let parent = split_dn(dn).ok().and_then(|(_, parent)| parent);
        match scope {
            SearchScope::Base => dn == base,
            SearchScope::One => parent.as_deref() == Some(base),
            SearchScope::Sub => {
                base.is_empty() || dn == base || dn.ends_with(&format!(",{}", base))
            }
        }
    }

    /// a protocol error with the given code
    fn error(operation: &'static str, dn: &str, code: u32) -> DirectoryError {
        DirectoryError::Protocol {
            operation,
            dn: dn.to_string(),
            code,
            message: String::new(),
        }
    }

    /// check for a broken link
    fn link(&self) -> Result<()> {
        if self.drop_link {
            return Err(DirectoryError::Transport {
                target: "mock:389".to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(())
    }

    /// the raw shape of an entry with the requested attributes
    fn raw_entry(entry: &Entry, attributes: &[String]) -> ldap3::SearchEntry {
        let all = attributes.is_empty() || attributes.iter().any(|a| a == "*");
        let none = attributes.len() == 1 && attributes[0] == NO_ATTRIBUTES;
        let wanted =
            |name: &str| !none && (all || attributes.iter().any(|a| a.eq_ignore_ascii_case(name)));
        ldap3::SearchEntry {
            dn: entry.dn.clone(),
            attrs: entry
                .attributes
                .iter()
                .filter(|(name, _)| wanted(*name))
                .map(|(name, values)| (name.to_string(), values.to_vec()))
                .collect(),
            bin_attrs: entry
                .binary
                .iter()
                .filter(|(name, _)| wanted(name.as_str()))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
        }
    }
}

/// opens [MockTransport]s onto a shared [MockDirectory]
#[derive(Debug, Clone)]
pub struct MockConnector {
    /// the server
    directory: Rc<RefCell<MockDirectory>>,
}

impl MockConnector {
    /// a connector for a new mock server
    pub fn new(directory: MockDirectory) -> Self {
        MockConnector {
            directory: directory.shared(),
        }
    }

    /// the server state
    pub fn directory(&self) -> Rc<RefCell<MockDirectory>> {
        Rc::clone(&self.directory)
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(&self, settings: &TransportSettings) -> Result<MockTransport> {
        let mut directory = self.directory.borrow_mut();
        if directory.fail_connect {
            return Err(DirectoryError::Transport {
                target: settings.target(),
                message: "connection refused".to_string(),
            });
        }
        directory.connects += 1;
        Ok(MockTransport::new(Rc::clone(&self.directory)))
    }
}

/// one link to a [MockDirectory]
#[derive(Debug)]
pub struct MockTransport {
    /// the server
    directory: Rc<RefCell<MockDirectory>>,
}

impl MockTransport {
    /// a transport onto the server
    pub fn new(directory: Rc<RefCell<MockDirectory>>) -> Self {
        MockTransport { directory }
    }
}

impl Transport for MockTransport {
    fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let mut directory = self.directory.borrow_mut();
        directory.link()?;
        directory.binds.push(dn.to_string());
        let anonymous = dn.is_empty() && password.is_empty();
        if anonymous || directory.credentials.get(&dn.to_lowercase()).map(String::as_str) == Some(password) {
            Ok(())
        } else {
            Err(DirectoryError::Authentication {
                dn: dn.to_string(),
                code: 49,
                message: "invalid credentials".to_string(),
            })
        }
    }

    fn search(&mut self, request: &SearchRequest, page: Option<&PageControl>) -> Result<RawPage> {
        let mut directory = self.directory.borrow_mut();
        directory.link()?;
        directory.searches.push(SearchCall {
            base: request.base.clone(),
            scope: request.scope,
            attributes: request.attributes.clone(),
            page_size: page.map(|p| p.size),
            cookie: page.map(|p| p.cookie.clone()),
        });
        if let Some(code) = directory.fail_search {
            return Err(MockDirectory::error("search", &request.base, code));
        }
        let base = request.base.to_lowercase();
        if !directory.entries.contains_key(&base) {
            return Ok(RawPage::default());
        }
        let matching: Vec<ldap3::SearchEntry> = directory
            .entries
            .iter()
            .filter(|(dn, _)| MockDirectory::in_scope(dn, &base, request.scope))
            .map(|(_, entry)| MockDirectory::raw_entry(entry, &request.attributes))
            .collect();
        let Some(page) = page else {
            return Ok(RawPage {
                entries: Some(matching),
                cookie: None,
            });
        };
        let offset: usize = std::str::from_utf8(&page.cookie)
            .ok()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let end = (offset + page.size as usize).min(matching.len());
        let cookie = if directory.endless_cookie {
            offset.to_string().into_bytes()
        } else if end < matching.len() {
            end.to_string().into_bytes()
        } else {
            Vec::new()
        };
        Ok(RawPage {
            entries: Some(matching[offset.min(end)..end].to_vec()),
            cookie: Some(cookie),
        })
    }

    fn add(&mut self, dn: &str, attributes: &AttributeMap, binary: &BinaryAttributes) -> Result<()> {
        let mut directory = self.directory.borrow_mut();
        directory.link()?;
        directory.writes.push(format!("add {}", dn));
        if directory.contains(dn) {
            return Err(MockDirectory::error("add", dn, 68));
        }
        let entry = Entry {
            dn: dn.to_string(),
            attributes: attributes.clone(),
            binary: binary.clone(),
        };
        directory.entries.insert(dn.to_lowercase(), entry);
        Ok(())
    }

    fn modify(&mut self, dn: &str, modifications: &[Modification]) -> Result<()> {
        let mut directory = self.directory.borrow_mut();
        directory.link()?;
        directory.writes.push(format!("modify {}", dn));
        let Some(entry) = directory.entries.get_mut(&dn.to_lowercase()) else {
            return Err(MockDirectory::error("modify", dn, 32));
        };
        for m in modifications {
            match m.mode {
                ModifyMode::Replace => {
                    entry.attributes.insert(&m.attribute, m.values.iter().cloned());
                }
                ModifyMode::Add => {
                    entry
                        .attributes
                        .extend_values(&m.attribute, m.values.iter().cloned());
                }
                ModifyMode::Delete if m.values.is_empty() => {
                    entry.attributes.remove(&m.attribute);
                }
                ModifyMode::Delete => {
                    if let Some(values) = entry.attributes.get_mut(&m.attribute) {
                        values.retain(|v| !m.values.contains(v));
                    }
                }
            }
        }
        entry.attributes.retain(|_, values| !values.is_empty());
        Ok(())
    }

    fn delete(&mut self, dn: &str) -> Result<()> {
        let mut directory = self.directory.borrow_mut();
        directory.link()?;
        let key = dn.to_lowercase();
        if directory.fail_delete.contains(&key) {
            return Err(MockDirectory::error("delete", dn, 53));
        }
        if !directory.entries.contains_key(&key) {
            return Err(MockDirectory::error("delete", dn, 32));
        }
        if directory
            .entries
            .keys()
            .any(|other| MockDirectory::in_scope(other, &key, SearchScope::One))
        {
            return Err(MockDirectory::error("delete", dn, 66));
        }
        directory.writes.push(format!("delete {}", dn));
        directory.entries.remove(&key);
        Ok(())
    }

    fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> Result<bool> {
        let directory = self.directory.borrow();
        directory.link()?;
        let entry = directory
            .get(dn)
            .ok_or_else(|| MockDirectory::error("compare", dn, 32))?;
        Ok(entry
            .get(attribute)
            .is_some_and(|values| values.iter().any(|v| v == value)))
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let mut directory = self.directory.borrow_mut();
        directory.link()?;
        directory.writes.push(format!("rename {}", dn));
        let (old_rdn, old_parent) = split_dn(dn)?;
        let parent = new_parent.map(str::to_string).or(old_parent);
        let new_dn = match parent {
            Some(parent) => format!("{},{}", new_rdn, parent),
            None => new_rdn.to_string(),
        };
        if directory.contains(&new_dn) {
            return Err(MockDirectory::error("rename", dn, 68));
        }
        let Some(mut entry) = directory.entries.remove(&dn.to_lowercase()) else {
            return Err(MockDirectory::error("rename", dn, 32));
        };
        if delete_old_rdn {
            for (attribute, value) in rdn_values(&old_rdn) {
                if let Some(values) = entry.attributes.get_mut(&attribute) {
                    values.retain(|v| *v != value);
                }
            }
            entry.attributes.retain(|_, values| !values.is_empty());
        }
        for (attribute, value) in rdn_values(new_rdn) {
            if !entry.get(&attribute).is_some_and(|v| v.contains(&value)) {
                entry.attributes.push(&attribute, value);
            }
        }
        entry.dn = new_dn.clone();
        directory.entries.insert(new_dn.to_lowercase(), entry);
        Ok(())
    }

    fn unbind(&mut self) -> Result<()> {
        let mut directory = self.directory.borrow_mut();
        directory.link()?;
        directory.unbinds += 1;
        Ok(())
    }
}
