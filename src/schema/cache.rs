//! lazily loaded, per-class index of schema definitions

use std::collections::{BTreeMap, HashMap};

use tracing::instrument;

use super::parser::parse_definition;
use super::{SchemaClass, SchemaEntry};
use crate::error::Result;

/// DN used when the root DSE does not name a subschema subentry
pub const FALLBACK_SUBSCHEMA_DN: &str = "cn=Subschema";

/// where the cache gets its raw definitions from
///
/// implemented by [crate::Connection]
pub trait SchemaSource {
    /// the `subschemaSubentry` value of the root DSE, if there is one
    fn subschema_subentry(&mut self) -> Result<Option<String>>;

    /// base-scope read of a single attribute's values of one entry
    fn read_attribute(&mut self, dn: &str, attribute: &str) -> Result<Vec<String>>;
}

/// index of the definitions of one class
#[derive(Debug, Clone, Default)]
struct ClassIndex {
    /// entries by lowercase canonical name
    entries: BTreeMap<String, SchemaEntry>,
    /// lowercase aliases and OIDs to lowercase canonical name
    alternates: HashMap<String, String>,
}

impl ClassIndex {
    /// add an entry, replacing any earlier one with the same name
    fn insert(&mut self, entry: SchemaEntry) {
        let key = entry.name.to_lowercase();
        for alt in entry.aliases.iter().chain(std::iter::once(&entry.oid)) {
            let alt = alt.to_lowercase();
            if alt != key {
                self.alternates.insert(alt, key.clone());
            }
        }
        self.entries.insert(key, entry);
    }

    /// case-insensitive lookup by name, alias or OID
    fn lookup(&self, name: &str) -> Option<&SchemaEntry> {
        let name = name.to_lowercase();
        self.entries.get(&name).or_else(|| {
            self.alternates
                .get(&name)
                .and_then(|key| self.entries.get(key))
        })
    }
}

/// the schema cache of one connection
///
/// each class is loaded at most once until [SchemaCache::reset] is called
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    /// subschema subentry DN, discovered on first load
    dn: Option<String>,
    /// loaded classes
    index: BTreeMap<SchemaClass, ClassIndex>,
}

impl SchemaCache {
    /// an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// forget everything, including the subschema subentry DN
    pub fn reset(&mut self) {
        tracing::debug!("Resetting schema cache");
        self.dn = None;
        self.index.clear();
    }

    /// true once the class has been fetched
    pub fn is_loaded(&self, class: SchemaClass) -> bool {
        self.index.contains_key(&class)
    }

    /// the subschema subentry DN, discovered via the root DSE on first use
    pub fn subschema_dn<S: SchemaSource + ?Sized>(&mut self, source: &mut S) -> Result<String> {
        if let Some(dn) = &self.dn {
            return Ok(dn.clone());
        }
        let dn = match source.subschema_subentry()? {
            Some(dn) if !dn.is_empty() => dn,
            _ => {
                tracing::debug!(
                    "Root DSE names no subschemaSubentry, falling back to {}",
                    FALLBACK_SUBSCHEMA_DN
                );
                FALLBACK_SUBSCHEMA_DN.to_string()
            }
        };
        self.dn = Some(dn.clone());
        Ok(dn)
    }

    /// fetch and parse every requested class not yet cached
    ///
    /// definitions that fail to parse are skipped with a warning
    #[instrument(skip(self, source))]
    pub fn load<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        classes: &[SchemaClass],
    ) -> Result<()> {
        for class in classes {
            if self.is_loaded(*class) {
                continue;
            }
            let dn = self.subschema_dn(source)?;
            tracing::debug!("Loading {} from {}", class, dn);
            let values = source.read_attribute(&dn, class.attribute_name())?;
            let mut class_index = ClassIndex::default();
            for value in values {
                match parse_definition(&value) {
                    Ok(entry) => {
                        tracing::trace!("Parsed {} definition {}", class, entry.name);
                        class_index.insert(entry);
                    }
                    Err(err) => {
                        tracing::warn!("Skipping unparseable {} definition: {}", class, err);
                    }
                }
            }
            tracing::debug!("Loaded {} {} definitions", class_index.entries.len(), class);
            self.index.insert(*class, class_index);
        }
        Ok(())
    }

    /// load every class not yet cached
    pub fn load_all<S: SchemaSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        self.load(source, &SchemaClass::ALL)
    }

    /// with a name: whether that definition exists; without: whether the
    /// class has any definitions at all
    pub fn exists<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        class: SchemaClass,
        name: Option<&str>,
    ) -> Result<bool> {
        self.load(source, &[class])?;
        Ok(match (self.index.get(&class), name) {
            (Some(idx), Some(name)) => idx.lookup(name).is_some(),
            (Some(idx), None) => !idx.entries.is_empty(),
            (None, _) => false,
        })
    }

    /// a single definition by name, alias or OID
    pub fn get<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        class: SchemaClass,
        name: &str,
    ) -> Result<Option<&SchemaEntry>> {
        self.load(source, &[class])?;
        Ok(self.lookup(class, name))
    }

    /// all definitions of a class keyed by lowercase name
    pub fn entries<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        class: SchemaClass,
    ) -> Result<Option<&BTreeMap<String, SchemaEntry>>> {
        self.load(source, &[class])?;
        Ok(self.index.get(&class).map(|idx| &idx.entries))
    }

    /// MAY attributes of an object class, with those of all superclasses if
    /// `recursive`
    ///
    /// `None` if the object class is unknown. Duplicates are not removed.
    pub fn may<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        objectclass: &str,
        recursive: bool,
    ) -> Result<Option<Vec<String>>> {
        self.load(source, &[SchemaClass::ObjectClasses])?;
        Ok(self.inherited(objectclass, recursive, SchemaEntry::may))
    }

    /// MUST attributes of an object class, with those of all superclasses if
    /// `recursive`
    ///
    /// `None` if the object class is unknown. Duplicates are not removed.
    pub fn must<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        objectclass: &str,
        recursive: bool,
    ) -> Result<Option<Vec<String>>> {
        self.load(source, &[SchemaClass::ObjectClasses])?;
        Ok(self.inherited(objectclass, recursive, SchemaEntry::must))
    }

    /// MUST followed by MAY
    pub fn attributes<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        objectclass: &str,
        recursive: bool,
    ) -> Result<Option<Vec<String>>> {
        self.load(source, &[SchemaClass::ObjectClasses])?;
        let Some(mut attributes) = self.inherited(objectclass, recursive, SchemaEntry::must)
        else {
            return Ok(None);
        };
        attributes.extend(
            self.inherited(objectclass, recursive, SchemaEntry::may)
                .unwrap_or_default(),
        );
        Ok(Some(attributes))
    }

    /// the SUP list of an object class, flattened over all ancestors if
    /// `recursive`
    pub fn superclass<S: SchemaSource + ?Sized>(
        &mut self,
        source: &mut S,
        objectclass: &str,
        recursive: bool,
    ) -> Result<Option<Vec<String>>> {
        self.load(source, &[SchemaClass::ObjectClasses])?;
        Ok(self.inherited(objectclass, recursive, SchemaEntry::sup))
    }

    /// lookup in an already loaded class
    fn lookup(&self, class: SchemaClass, name: &str) -> Option<&SchemaEntry> {
        self.index.get(&class).and_then(|idx| idx.lookup(name))
    }

    /// the picked list of an object class plus, if `recursive`, those of
    /// every resolvable ancestor
    fn inherited(
        &self,
        objectclass: &str,
        recursive: bool,
        pick: fn(&SchemaEntry) -> &[String],
    ) -> Option<Vec<String>> {
        let entry = self.lookup(SchemaClass::ObjectClasses, objectclass)?;
        let mut result = pick(entry).to_vec();
        if recursive {
            let mut path = vec![entry.name.to_lowercase()];
            self.collect_ancestors(entry, pick, &mut path, &mut result);
        }
        Some(result)
    }

    /// depth first walk over the SUP chain
    fn collect_ancestors(
        &self,
        entry: &SchemaEntry,
        pick: fn(&SchemaEntry) -> &[String],
        path: &mut Vec<String>,
        result: &mut Vec<String>,
    ) {
        for sup in entry.sup() {
            let Some(parent) = self.lookup(SchemaClass::ObjectClasses, sup) else {
                tracing::trace!("Superclass {} of {} not found, skipping", sup, entry.name);
                continue;
            };
            let key = parent.name.to_lowercase();
            if path.contains(&key) {
                tracing::warn!("Cyclic superclass chain through {}", parent.name);
                continue;
            }
            result.extend(pick(parent).iter().cloned());
            path.push(key);
            self.collect_ancestors(parent, pick, path, result);
            path.pop();
        }
    }
}

/// the schema cache together with the source it loads from
///
/// returned by [crate::DirectoryClient::schema]
#[derive(Debug)]
pub struct Schema<'a, S: SchemaSource + ?Sized> {
    /// the cache
    cache: &'a mut SchemaCache,
    /// the connection used to fill it
    source: &'a mut S,
}

impl<'a, S: SchemaSource + ?Sized> Schema<'a, S> {
    /// combine a cache and a source
    pub fn new(cache: &'a mut SchemaCache, source: &'a mut S) -> Self {
        Self { cache, source }
    }

    /// see [SchemaCache::subschema_dn]
    pub fn dn(&mut self) -> Result<String> {
        self.cache.subschema_dn(&mut *self.source)
    }

    /// see [SchemaCache::load]
    pub fn load(&mut self, classes: &[SchemaClass]) -> Result<()> {
        self.cache.load(&mut *self.source, classes)
    }

    /// see [SchemaCache::load_all]
    pub fn load_all(&mut self) -> Result<()> {
        self.cache.load_all(&mut *self.source)
    }

    /// see [SchemaCache::exists]
    pub fn exists(&mut self, class: SchemaClass, name: Option<&str>) -> Result<bool> {
        self.cache.exists(&mut *self.source, class, name)
    }

    /// see [SchemaCache::get]
    pub fn get(&mut self, class: SchemaClass, name: &str) -> Result<Option<&SchemaEntry>> {
        self.cache.get(&mut *self.source, class, name)
    }

    /// see [SchemaCache::entries]
    pub fn entries(
        &mut self,
        class: SchemaClass,
    ) -> Result<Option<&BTreeMap<String, SchemaEntry>>> {
        self.cache.entries(&mut *self.source, class)
    }

    /// see [SchemaCache::may]
    pub fn may(&mut self, objectclass: &str, recursive: bool) -> Result<Option<Vec<String>>> {
        self.cache.may(&mut *self.source, objectclass, recursive)
    }

    /// see [SchemaCache::must]
    pub fn must(&mut self, objectclass: &str, recursive: bool) -> Result<Option<Vec<String>>> {
        self.cache.must(&mut *self.source, objectclass, recursive)
    }

    /// see [SchemaCache::attributes]
    pub fn attributes(
        &mut self,
        objectclass: &str,
        recursive: bool,
    ) -> Result<Option<Vec<String>>> {
        self.cache.attributes(&mut *self.source, objectclass, recursive)
    }

    /// see [SchemaCache::superclass]
    pub fn superclass(
        &mut self,
        objectclass: &str,
        recursive: bool,
    ) -> Result<Option<Vec<String>>> {
        self.cache.superclass(&mut *self.source, objectclass, recursive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectoryError;

    /// in-memory subschema subentry
    #[derive(Default)]
    struct FakeSource {
        subentry: Option<String>,
        values: HashMap<String, Vec<String>>,
        reads: Vec<(String, String)>,
        fail: bool,
    }

    impl FakeSource {
        fn with(class: SchemaClass, definitions: &[&str]) -> Self {
            let mut source = FakeSource {
                subentry: Some("cn=schema".to_string()),
                ..Default::default()
            };
            source.add(class, definitions);
            source
        }

        fn add(&mut self, class: SchemaClass, definitions: &[&str]) {
            self.values.insert(
                class.attribute_name().to_string(),
                definitions.iter().map(|d| d.to_string()).collect(),
            );
        }
    }

    impl SchemaSource for FakeSource {
        fn subschema_subentry(&mut self) -> Result<Option<String>> {
            Ok(self.subentry.clone())
        }

        fn read_attribute(&mut self, dn: &str, attribute: &str) -> Result<Vec<String>> {
            self.reads.push((dn.to_string(), attribute.to_string()));
            if self.fail {
                return Err(DirectoryError::Protocol {
                    operation: "search",
                    dn: dn.to_string(),
                    code: 50,
                    message: "insufficient access".to_string(),
                });
            }
            Ok(self.values.get(attribute).cloned().unwrap_or_default())
        }
    }

    fn object_classes() -> FakeSource {
        FakeSource::with(
            SchemaClass::ObjectClasses,
            &[
                "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )",
                "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) \
                 MAY ( userPassword $ telephoneNumber $ seeAlso $ description ) )",
                "( 2.5.6.7 NAME 'organizationalPerson' SUP person STRUCTURAL \
                 MAY ( title $ telephoneNumber ) )",
                "( 1.2.3.4 NAME 'orphan' SUP missingClass MUST uid )",
                "( 1.2.3.5 NAME ( 'loopA' 'aliasA' ) SUP loopB MUST a )",
                "( 1.2.3.6 NAME 'loopB' SUP loopA MUST b )",
            ],
        )
    }

    #[test]
    fn must_is_transitive() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        let must = cache.must(&mut source, "person", true).unwrap().unwrap();
        assert!(must.contains(&"objectClass".to_string()));
        assert!(must.contains(&"sn".to_string()));
        assert!(must.contains(&"cn".to_string()));

        let direct = cache.must(&mut source, "person", false).unwrap().unwrap();
        assert_eq!(direct, vec!["sn".to_string(), "cn".to_string()]);
    }

    #[test]
    fn may_keeps_duplicates() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        let may = cache
            .may(&mut source, "organizationalPerson", true)
            .unwrap()
            .unwrap();
        let phones = may.iter().filter(|a| *a == "telephoneNumber").count();
        assert_eq!(phones, 2);
        assert_eq!(may.first().map(String::as_str), Some("title"));
    }

    #[test]
    fn unknown_object_class_is_none() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        assert_eq!(cache.may(&mut source, "nonexistent", true).unwrap(), None);
        assert_eq!(cache.superclass(&mut source, "nonexistent", false).unwrap(), None);
    }

    #[test]
    fn unresolvable_superclass_is_skipped() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        assert_eq!(
            cache.must(&mut source, "orphan", true).unwrap(),
            Some(vec!["uid".to_string()])
        );
    }

    #[test]
    fn superclass_chain() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        assert_eq!(
            cache
                .superclass(&mut source, "organizationalPerson", false)
                .unwrap(),
            Some(vec!["person".to_string()])
        );
        assert_eq!(
            cache
                .superclass(&mut source, "organizationalPerson", true)
                .unwrap(),
            Some(vec!["person".to_string(), "top".to_string()])
        );
        assert_eq!(
            cache.superclass(&mut source, "top", true).unwrap(),
            Some(vec![])
        );
    }

    #[test]
    fn cyclic_superclasses_terminate() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        let must = cache.must(&mut source, "loopA", true).unwrap().unwrap();
        assert_eq!(must, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn attributes_are_must_then_may() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        let attributes = cache.attributes(&mut source, "person", false).unwrap().unwrap();
        assert_eq!(&attributes[..2], &["sn".to_string(), "cn".to_string()]);
        assert_eq!(attributes.len(), 6);
    }

    #[test]
    fn classes_load_once() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        assert!(cache
            .exists(&mut source, SchemaClass::ObjectClasses, Some("PERSON"))
            .unwrap());
        cache.must(&mut source, "person", true).unwrap();
        cache.get(&mut source, SchemaClass::ObjectClasses, "top").unwrap();
        assert_eq!(
            source.reads,
            vec![("cn=schema".to_string(), "objectClasses".to_string())]
        );

        cache
            .load(
                &mut source,
                &[SchemaClass::ObjectClasses, SchemaClass::AttributeTypes],
            )
            .unwrap();
        assert_eq!(source.reads.len(), 2);
        assert_eq!(source.reads[1].1, "attributeTypes");

        cache.reset();
        cache.must(&mut source, "person", false).unwrap();
        assert_eq!(source.reads.len(), 3);
    }

    #[test]
    fn lookup_by_alias_and_oid() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        let by_alias = cache
            .get(&mut source, SchemaClass::ObjectClasses, "ALIASA")
            .unwrap()
            .cloned();
        let by_oid = cache
            .get(&mut source, SchemaClass::ObjectClasses, "1.2.3.5")
            .unwrap()
            .cloned();
        assert_eq!(by_alias.as_ref().map(|e| e.name.as_str()), Some("loopA"));
        assert_eq!(by_alias, by_oid);
    }

    #[test]
    fn nameless_definition_is_found_by_oid() {
        let mut source = FakeSource::with(
            SchemaClass::AttributeTypes,
            &["( 1.3.6.1.4.1.9999.1 SYNTAX 1.3.6.1.4.1.1466.115.121.1.15{64} )"],
        );
        let mut cache = SchemaCache::new();
        let entry = cache
            .get(&mut source, SchemaClass::AttributeTypes, "1.3.6.1.4.1.9999.1")
            .unwrap()
            .cloned()
            .unwrap();
        assert_eq!(entry.name, entry.oid);
        assert_eq!(entry.max_length, Some(64));
    }

    #[test]
    fn malformed_definitions_do_not_abort_load() {
        let mut source = FakeSource::with(
            SchemaClass::AttributeTypes,
            &["( )", "( 2.5.4.3 NAME 'cn' )", ""],
        );
        let mut cache = SchemaCache::new();
        let entries = cache
            .entries(&mut source, SchemaClass::AttributeTypes)
            .unwrap()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("cn"));
    }

    #[test]
    fn empty_class_exists_without_name_is_false() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        assert!(!cache
            .exists(&mut source, SchemaClass::NameForms, None)
            .unwrap());
        assert!(cache
            .exists(&mut source, SchemaClass::ObjectClasses, None)
            .unwrap());
    }

    #[test]
    fn subschema_dn_falls_back() {
        let mut source = FakeSource::default();
        let mut cache = SchemaCache::new();
        cache.load(&mut source, &[SchemaClass::ObjectClasses]).unwrap();
        assert_eq!(source.reads[0].0, FALLBACK_SUBSCHEMA_DN);
    }

    #[test]
    fn failed_load_is_retried() {
        let mut source = object_classes();
        source.fail = true;
        let mut cache = SchemaCache::new();
        assert!(cache.must(&mut source, "person", false).is_err());
        assert!(!cache.is_loaded(SchemaClass::ObjectClasses));
        source.fail = false;
        assert!(cache.must(&mut source, "person", false).unwrap().is_some());
    }

    #[test]
    fn schema_view_delegates() {
        let mut source = object_classes();
        let mut cache = SchemaCache::new();
        let mut schema = Schema::new(&mut cache, &mut source);
        assert_eq!(schema.dn().unwrap(), "cn=schema");
        assert!(schema.exists(SchemaClass::ObjectClasses, Some("top")).unwrap());
        assert_eq!(
            schema.superclass("person", true).unwrap(),
            Some(vec!["top".to_string()])
        );
    }
}
