//! just enough DN handling to split off the RDN of an entry

use crate::error::{DirectoryError, Result};

/// byte index of the first occurrence of `separator` not preceded by a backslash escape
fn unescaped_position(s: &str, separator: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == separator => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// split `s` at every unescaped `separator`
fn split_unescaped(s: &str, separator: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(pos) = unescaped_position(rest, separator) {
        parts.push(&rest[..pos]);
        rest = &rest[pos + 1..];
    }
    parts.push(rest);
    parts
}

/// split a DN into its RDN and the DN of its parent
///
/// the parent is `None` for single component DNs
pub fn split_dn(dn: &str) -> Result<(String, Option<String>)> {
    let dn = dn.trim();
    let (rdn, parent) = match unescaped_position(dn, b',') {
        Some(pos) => (dn[..pos].trim(), Some(dn[pos + 1..].trim())),
        None => (dn, None),
    };
    if rdn.is_empty() || unescaped_position(rdn, b'=').is_none() {
        return Err(DirectoryError::InvalidDn(dn.to_string()));
    }
    match parent {
        Some("") => Err(DirectoryError::InvalidDn(dn.to_string())),
        parent => Ok((rdn.to_string(), parent.map(str::to_string))),
    }
}

/// the parent DN, `None` for single component DNs
pub fn parent_dn(dn: &str) -> Result<Option<String>> {
    Ok(split_dn(dn)?.1)
}

/// undo DN value escaping (`\,` as well as `\2C` style hex escapes)
pub fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes
                .get(i + 1..i + 3)
                .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    out.push(bytes[i + 1]);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// the attribute/value pairs of an RDN, multi-valued RDNs (`a=1+b=2`) yield
/// several pairs
pub fn rdn_values(rdn: &str) -> Vec<(String, String)> {
    split_unescaped(rdn, b'+')
        .into_iter()
        .filter_map(|ava| {
            let pos = unescaped_position(ava, b'=')?;
            Some((
                ava[..pos].trim().to_string(),
                unescape_value(ava[pos + 1..].trim()),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_simple() {
        assert_eq!(
            split_dn("uid=jdoe,ou=people,dc=example,dc=com").unwrap(),
            (
                "uid=jdoe".to_string(),
                Some("ou=people,dc=example,dc=com".to_string())
            )
        );
        assert_eq!(split_dn("dc=com").unwrap(), ("dc=com".to_string(), None));
    }

    #[test]
    fn escaped_commas_stay_in_the_rdn() {
        let (rdn, parent) = split_dn(r"cn=Doe\, John,ou=people,dc=example,dc=com").unwrap();
        assert_eq!(rdn, r"cn=Doe\, John");
        assert_eq!(parent.as_deref(), Some("ou=people,dc=example,dc=com"));
        assert_eq!(
            rdn_values(&rdn),
            vec![("cn".to_string(), "Doe, John".to_string())]
        );
    }

    #[test]
    fn invalid_dns() {
        assert!(split_dn("").is_err());
        assert!(split_dn("noequals,dc=com").is_err());
        assert!(split_dn("uid=a,").is_err());
    }

    #[test]
    fn multi_valued_rdn() {
        assert_eq!(
            rdn_values("cn=John+sn=Doe"),
            vec![
                ("cn".to_string(), "John".to_string()),
                ("sn".to_string(), "Doe".to_string())
            ]
        );
    }

    #[test]
    fn hex_escapes() {
        assert_eq!(unescape_value(r"a\2Cb"), "a,b");
        assert_eq!(unescape_value(r"\+x"), "+x");
        assert_eq!(unescape_value(r"caf\C3\A9"), "café");
    }

    #[test]
    fn escaped_plus_before_digit() {
        assert_eq!(unescape_value(r"1\+2"), "1+2");
        assert_eq!(
            rdn_values(r"cn=1\+2"),
            vec![("cn".to_string(), "1+2".to_string())]
        );
    }

    #[test]
    fn parent_of_entry() {
        assert_eq!(
            parent_dn("ou=people,dc=example").unwrap().as_deref(),
            Some("dc=example")
        );
    }
}
