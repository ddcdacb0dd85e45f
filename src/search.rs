//! search requests and the executor that drives one logical search across
//! as many paged-results round trips as the server asks for

use std::fmt::Display;
use std::str::FromStr;

use derive_builder::Builder;
use ldap3::SearchEntry;
use serde::Deserialize;
use tracing::instrument;

use crate::entry::{Entry, SearchResults};
use crate::error::{DirectoryError, Result, ScopeParserError};
use crate::transport::{PageControl, RawPage, Transport};

/// filter matching every entry
pub const MATCH_ALL_FILTER: &str = "(objectClass=*)";

/// the special attribute list entry requesting no attributes at all
pub const NO_ATTRIBUTES: &str = "1.1";

/// search scope, named as with OpenLDAP's ldapsearch -s parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// only the base entry itself
    Base,
    /// immediate children of the base
    One,
    /// the base and its whole subtree
    #[default]
    Sub,
}

/// parse a [SearchScope] from the string one would specify to use the same
/// scope with OpenLDAP's ldapsearch -s parameter
pub fn parse_scope(src: &str) -> std::result::Result<SearchScope, ScopeParserError> {
    match src {
        "base" => Ok(SearchScope::Base),
        "one" => Ok(SearchScope::One),
        "sub" => Ok(SearchScope::Sub),
        s => Err(ScopeParserError::CouldNotParseAsScope(s.to_string())),
    }
}

impl FromStr for SearchScope {
    type Err = ScopeParserError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_scope(s)
    }
}

impl Display for SearchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchScope::Base => write!(f, "base"),
            SearchScope::One => write!(f, "one"),
            SearchScope::Sub => write!(f, "sub"),
        }
    }
}

impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => ldap3::Scope::Base,
            SearchScope::One => ldap3::Scope::OneLevel,
            SearchScope::Sub => ldap3::Scope::Subtree,
        }
    }
}

/// alias dereferencing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deref {
    /// never dereference
    #[default]
    Never,
    /// dereference while searching below the base
    Searching,
    /// dereference when locating the base
    Finding,
    /// always dereference
    Always,
}

impl From<Deref> for ldap3::DerefAliases {
    fn from(deref: Deref) -> Self {
        match deref {
            Deref::Never => ldap3::DerefAliases::Never,
            Deref::Searching => ldap3::DerefAliases::Searching,
            Deref::Finding => ldap3::DerefAliases::Finding,
            Deref::Always => ldap3::DerefAliases::Always,
        }
    }
}

/// everything describing one logical search
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct SearchRequest {
    /// search base DN
    pub base: String,
    /// filter string
    #[builder(default = "MATCH_ALL_FILTER.to_string()")]
    pub filter: String,
    /// scope
    #[builder(default)]
    pub scope: SearchScope,
    /// requested attributes, empty for all user attributes
    #[builder(default)]
    pub attributes: Vec<String>,
    /// return attribute names only
    #[builder(default)]
    pub attrs_only: bool,
    /// server side size limit, 0 for none
    #[builder(default)]
    pub size_limit: i32,
    /// server side time limit in seconds, 0 for none
    #[builder(default)]
    pub time_limit: i32,
    /// alias dereferencing
    #[builder(default)]
    pub deref: Deref,
}

impl SearchRequest {
    /// a request with default limits and all user attributes
    pub fn new<B: Into<String>, F: Into<String>>(base: B, filter: F, scope: SearchScope) -> Self {
        SearchRequest {
            base: base.into(),
            filter: filter.into(),
            scope,
            attributes: Vec::new(),
            attrs_only: false,
            size_limit: 0,
            time_limit: 0,
            deref: Deref::Never,
        }
    }

    /// base scope read of a single entry
    pub fn read<B: Into<String>>(base: B) -> Self {
        Self::new(base, MATCH_ALL_FILTER, SearchScope::Base)
    }

    /// restrict the returned attributes
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// the equivalent OpenLDAP ldapsearch command line, for debug output
    pub fn ldapsearch_command(&self, page_size: u32) -> String {
        let paging = if page_size > 0 {
            format!(" -E pr={}/noprompt", page_size)
        } else {
            String::new()
        };
        format!(
            "ldapsearch -Q -LLL{} -o ldif-wrap=no -b '{}' -s {} '{}' {}",
            paging,
            self.base,
            self.scope,
            self.filter,
            itertools::join(self.attributes.iter(), " ")
        )
    }
}

/// the progress of one paged search
#[derive(Debug, Clone, Default)]
pub struct PageState {
    /// continuation cookie, empty before the first and after the last page
    pub cookie: Vec<u8>,
    /// entries collected so far
    pub accumulated: SearchResults,
    /// page size, 0 if paging is disabled
    pub page_size: u32,
    /// number of round trips done
    pub pages: u32,
}

impl PageState {
    /// state before the first page
    pub fn new(page_size: u32) -> Self {
        PageState {
            page_size,
            ..Default::default()
        }
    }

    /// true if requests carry the paged results control
    pub fn is_paging(&self) -> bool {
        self.page_size > 0
    }

    /// the control for the next request, if paging
    pub fn control(&self) -> Option<PageControl> {
        self.is_paging().then(|| PageControl {
            size: self.page_size,
            cookie: self.cookie.clone(),
        })
    }

    /// take in one raw page, returning true if another page should be fetched
    pub fn absorb(&mut self, page: RawPage) -> bool {
        self.pages += 1;
        let results = normalize(page.entries);
        if self.is_paging() {
            self.accumulated.merge(results);
            self.cookie = page.cookie.unwrap_or_default();
        } else {
            self.accumulated = results;
            self.cookie.clear();
        }
        !self.cookie.is_empty()
    }
}

/// turn the raw entries of one page into DN keyed entries
///
/// attribute names are folded to lowercase, a missing page yields no entries
pub fn normalize(raw: Option<Vec<SearchEntry>>) -> SearchResults {
    let mut results = SearchResults::new();
    for raw_entry in raw.unwrap_or_default() {
        let mut entry = Entry::new(raw_entry.dn);
        for (name, values) in raw_entry.attrs {
            entry.attributes.extend_values(name, values);
        }
        for (name, values) in raw_entry.bin_attrs {
            entry
                .binary
                .entry(name.to_lowercase())
                .or_default()
                .extend(values);
        }
        tracing::trace!("Found entry {}", entry.dn);
        results.insert(entry);
    }
    results
}

/// drives one search to completion over a borrowed transport
#[derive(Debug)]
pub struct PagedSearchExecutor<'t, T: Transport + ?Sized> {
    /// the transport
    transport: &'t mut T,
    /// page size, 0 disables paging
    page_size: u32,
    /// maximum number of round trips
    max_pages: u32,
}

impl<'t, T: Transport + ?Sized> PagedSearchExecutor<'t, T> {
    /// an executor for one or more searches
    pub fn new(transport: &'t mut T, page_size: u32, max_pages: u32) -> Self {
        PagedSearchExecutor {
            transport,
            page_size,
            max_pages,
        }
    }

    /// fetch every page of the search and return the accumulated entries
    #[instrument(skip(self), fields(page_size = self.page_size))]
    pub fn run(&mut self, request: &SearchRequest) -> Result<SearchResults> {
        let mut state = PageState::new(self.page_size);
        loop {
            let control = state.control();
            let page = match self.transport.search(request, control.as_ref()) {
                Ok(page) => page,
                Err(err) => {
                    tracing::debug!(
                        "Error {} in LDAP query after {} results and {} pages\n  base: {}\n  scope: {}\n  filter: {}\n  attrs: {:#?}",
                        err,
                        state.accumulated.len(),
                        state.pages,
                        request.base,
                        request.scope,
                        request.filter,
                        request.attributes
                    );
                    tracing::debug!("{}", request.ldapsearch_command(self.page_size));
                    return Err(err);
                }
            };
            if !state.absorb(page) {
                break;
            }
            if state.pages >= self.max_pages {
                return Err(DirectoryError::PageLimitExceeded {
                    base: request.base.clone(),
                    limit: self.max_pages,
                });
            }
            tracing::trace!(
                "Fetching page {} of search below {}",
                state.pages + 1,
                request.base
            );
        }
        tracing::debug!(
            "Search below {} returned {} entries in {} pages",
            request.base,
            state.accumulated.len(),
            state.pages
        );
        Ok(state.accumulated)
    }
}
