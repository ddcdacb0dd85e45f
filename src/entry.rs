//! normalized search results: DN to attribute name to ordered values

use std::collections::btree_map;
use std::collections::BTreeMap;

/// binary attribute values by lowercase attribute name
pub type BinaryAttributes = BTreeMap<String, Vec<Vec<u8>>>;

/// textual attribute values keyed by lowercase attribute name
///
/// LDAP attribute names are case-insensitive, so all keys are folded to
/// lowercase on the way in and lookups ignore case. Value order is kept as
/// the server (or caller) supplied it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap(BTreeMap<String, Vec<String>>);

impl AttributeMap {
    /// an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// set the values of an attribute, replacing previous ones
    pub fn insert<N, I, V>(&mut self, name: N, values: I) -> Option<Vec<String>>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.0.insert(
            name.as_ref().to_lowercase(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    /// append a single value to an attribute
    pub fn push<N: AsRef<str>, V: Into<String>>(&mut self, name: N, value: V) {
        self.0
            .entry(name.as_ref().to_lowercase())
            .or_default()
            .push(value.into());
    }

    /// append several values to an attribute, creating it if needed
    pub fn extend_values<N, I, V>(&mut self, name: N, values: I)
    where
        N: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.0
            .entry(name.as_ref().to_lowercase())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// the values of an attribute
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(&name.to_lowercase()).map(Vec::as_slice)
    }

    /// mutable access to the values of an attribute
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        self.0.get_mut(&name.to_lowercase())
    }

    /// the first value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// remove an attribute
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(&name.to_lowercase())
    }

    /// true if the attribute is present (even without values)
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_lowercase())
    }

    /// number of attributes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// true if there are no attributes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// attribute names (lowercase)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// attribute names with their values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// keep only the attributes for which the predicate returns true
    pub fn retain<F: FnMut(&str, &mut Vec<String>) -> bool>(&mut self, mut f: F) {
        self.0.retain(|k, v| f(k, v));
    }
}

impl<N, I, V> FromIterator<(N, I)> for AttributeMap
where
    N: AsRef<str>,
    I: IntoIterator<Item = V>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
        let mut map = AttributeMap::new();
        for (name, values) in iter {
            map.extend_values(name, values);
        }
        map
    }
}

impl IntoIterator for AttributeMap {
    type Item = (String, Vec<String>);
    type IntoIter = btree_map::IntoIter<String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// one normalized directory entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// distinguished name as returned by the server
    pub dn: String,
    /// textual attributes
    pub attributes: AttributeMap,
    /// attributes whose values are not valid UTF-8
    pub binary: BinaryAttributes,
}

impl Entry {
    /// an entry without attributes
    pub fn new<S: Into<String>>(dn: S) -> Self {
        Entry {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// the textual values of an attribute
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name)
    }

    /// the first textual value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes.first(name)
    }

    /// the binary values of an attribute
    pub fn binary(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.binary.get(&name.to_lowercase()).map(Vec::as_slice)
    }
}

/// all entries of one logical search, keyed by DN
///
/// a DN seen twice keeps only the later entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults(BTreeMap<String, Entry>);

impl SearchResults {
    /// no entries
    pub fn new() -> Self {
        Self::default()
    }

    /// add or replace an entry
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        self.0.insert(entry.dn.clone(), entry)
    }

    /// move all entries of `other` into `self`, replacing duplicates
    pub fn merge(&mut self, other: SearchResults) {
        self.0.extend(other.0);
    }

    /// the entry for a DN
    pub fn get(&self, dn: &str) -> Option<&Entry> {
        self.0.get(dn)
    }

    /// number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// true if nothing was found
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// the DNs of all entries
    pub fn dns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// all entries
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.0.values()
    }

    /// the first entry in DN order, mostly useful for base scope searches
    pub fn into_first(self) -> Option<Entry> {
        self.0.into_values().next()
    }
}

impl IntoIterator for SearchResults {
    type Item = Entry;
    type IntoIter = btree_map::IntoValues<String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

impl FromIterator<Entry> for SearchResults {
    fn from_iter<T: IntoIterator<Item = Entry>>(iter: T) -> Self {
        let mut results = SearchResults::new();
        for entry in iter {
            results.insert(entry);
        }
        results
    }
}
