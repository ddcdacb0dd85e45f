//! the server's root DSE (the entry with the empty DN)

use crate::entry::{AttributeMap, Entry};

/// OID of the simple paged results control (RFC 2696)
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// informational data the server publishes about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootDse {
    /// vendorName
    pub vendor_name: Option<String>,
    /// vendorVersion
    pub vendor_version: Option<String>,
    /// namingContexts
    pub naming_contexts: Vec<String>,
    /// altServer
    pub alt_servers: Vec<String>,
    /// supportedExtension
    pub supported_extensions: Vec<String>,
    /// supportedControl
    pub supported_controls: Vec<String>,
    /// supportedSASLMechanisms
    pub supported_sasl_mechanisms: Vec<String>,
    /// supportedLDAPVersion
    pub supported_ldap_versions: Vec<String>,
    /// subschemaSubentry
    pub subschema_subentry: Option<String>,
    /// objectClass
    pub object_classes: Vec<String>,
    /// anything else the server returned
    pub other: AttributeMap,
}

impl RootDse {
    /// attributes requested when reading the root DSE
    pub const ATTRIBUTES: [&'static str; 10] = [
        "vendorName",
        "vendorVersion",
        "namingContexts",
        "altServer",
        "supportedExtension",
        "supportedControl",
        "supportedSASLMechanisms",
        "supportedLDAPVersion",
        "subschemaSubentry",
        "objectClass",
    ];

    /// pick the well-known attributes out of a normalized entry
    pub fn from_entry(entry: Entry) -> Self {
        let mut attrs = entry.attributes;
        let mut take = |name: &str| attrs.remove(name).unwrap_or_default();
        let vendor_name = take("vendorName").into_iter().next();
        let vendor_version = take("vendorVersion").into_iter().next();
        let naming_contexts = take("namingContexts");
        let alt_servers = take("altServer");
        let supported_extensions = take("supportedExtension");
        let supported_controls = take("supportedControl");
        let supported_sasl_mechanisms = take("supportedSASLMechanisms");
        let supported_ldap_versions = take("supportedLDAPVersion");
        let subschema_subentry = take("subschemaSubentry").into_iter().next();
        let object_classes = take("objectClass");
        RootDse {
            vendor_name,
            vendor_version,
            naming_contexts,
            alt_servers,
            supported_extensions,
            supported_controls,
            supported_sasl_mechanisms,
            supported_ldap_versions,
            subschema_subentry,
            object_classes,
            other: attrs,
        }
    }

    /// true if the server advertises the control
    pub fn supports_control(&self, oid: &str) -> bool {
        self.supported_controls.iter().any(|c| c.trim() == oid)
    }

    /// true if the server advertises the paged results control
    pub fn supports_paged_results(&self) -> bool {
        self.supports_control(PAGED_RESULTS_OID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_attributes_are_extracted() {
        let mut entry = Entry::new("");
        entry.attributes.insert("supportedControl", [PAGED_RESULTS_OID, "1.3.6.1.1.12"]);
        entry.attributes.insert("subschemaSubentry", ["cn=Subschema"]);
        entry.attributes.insert("namingContexts", ["dc=example,dc=com"]);
        entry.attributes.insert("vendorName", ["Example Inc."]);
        entry.attributes.insert("entryDN", [""]);
        let dse = RootDse::from_entry(entry);
        assert!(dse.supports_paged_results());
        assert_eq!(dse.subschema_subentry.as_deref(), Some("cn=Subschema"));
        assert_eq!(dse.naming_contexts, vec!["dc=example,dc=com".to_string()]);
        assert_eq!(dse.vendor_name.as_deref(), Some("Example Inc."));
        assert!(dse.other.contains("entrydn"));
        assert!(!dse.other.contains("supportedcontrol"));
    }

    #[test]
    fn missing_control_is_unsupported() {
        assert!(!RootDse::default().supports_paged_results());
    }
}
