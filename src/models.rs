use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppError, Result};
use crate::password::{hash_password, verify_password};
use crate::schema::TOP_CLASS;

const OBJECT_CLASS_ATTRIBUTE: &str = "objectClass";

/// Attribute name to values. Ordered so that rendered entries are stable.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub parent: Option<String>,
    pub rdn: String,
    /// Declared classes. `top` is implicit and never stored here.
    pub object_classes: Vec<String>,
    pub user_attributes: AttributeMap,
    pub operational_attributes: AttributeMap,
}

impl DirectoryEntry {
    /// A naming context: an entry with no parent, whose DN is its RDN.
    pub fn root(rdn: impl Into<String>) -> Self {
        let rdn = rdn.into();
        Self {
            dn: rdn.clone(),
            parent: None,
            rdn,
            object_classes: Vec::new(),
            user_attributes: AttributeMap::new(),
            operational_attributes: AttributeMap::new(),
        }
    }

    pub fn child(rdn: impl Into<String>, parent: impl Into<String>) -> Self {
        let rdn = rdn.into();
        let parent = parent.into();
        Self {
            dn: format!("{},{}", rdn, parent),
            parent: Some(parent),
            rdn,
            object_classes: Vec::new(),
            user_attributes: AttributeMap::new(),
            operational_attributes: AttributeMap::new(),
        }
    }

    pub fn with_object_class(mut self, name: impl Into<String>) -> Self {
        self.object_classes.push(name.into());
        self
    }

    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_attributes
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_operational_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operational_attributes
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Textual subtree membership: the DN ends with `base`.
    ///
    /// There is no RDN boundary check, so `c=org` also matches `dc=org`.
    pub fn in_subtree_of(&self, base: &str) -> bool {
        self.dn.ends_with(base)
    }

    /// Values of the synthesized `objectClass` attribute: `top` followed by
    /// the declared classes in stored order.
    pub fn object_class_values(&self) -> Vec<String> {
        std::iter::once(TOP_CLASS.to_string())
            .chain(self.object_classes.iter().cloned())
            .collect()
    }

    /// Check the naming invariants that tie `dn`, `rdn` and `parent` together.
    pub fn validate(&self) -> Result<()> {
        if self.rdn.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "entry {:?} has an empty RDN",
                self.dn
            )));
        }
        let expected = match &self.parent {
            None => self.rdn.clone(),
            Some(parent) => format!("{},{}", self.rdn, parent),
        };
        if self.dn != expected {
            return Err(AppError::InvalidInput(format!(
                "entry DN {:?} does not match RDN and parent (expected {:?})",
                self.dn, expected
            )));
        }
        if self
            .object_classes
            .iter()
            .any(|class| class.eq_ignore_ascii_case(TOP_CLASS))
        {
            return Err(AppError::InvalidInput(format!(
                "entry {:?} declares {:?}, which is implicit",
                self.dn, TOP_CLASS
            )));
        }
        // objectClass is synthesized from `object_classes` when rendered.
        if self
            .user_attributes
            .keys()
            .chain(self.operational_attributes.keys())
            .any(|name| name.eq_ignore_ascii_case(OBJECT_CLASS_ATTRIBUTE))
        {
            return Err(AppError::InvalidInput(format!(
                "entry {:?} stores {:?} as an attribute; declare classes instead",
                self.dn, OBJECT_CLASS_ATTRIBUTE
            )));
        }
        Ok(())
    }
}

/// A principal that can authenticate with a simple bind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    pub username: String,
    /// Base64 of the derived key.
    pub password_hash: String,
    /// Base64 of the raw salt.
    pub password_salt: String,
    pub created: DateTime<Utc>,
}

impl Principal {
    /// Create a principal with a freshly salted hash of `password`.
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        let hashed = hash_password(password);
        Self {
            username: username.into(),
            password_hash: hashed.hash,
            password_salt: hashed.salt,
            created: Utc::now(),
        }
    }

    pub fn verify_password(&self, password: &[u8]) -> Result<bool> {
        verify_password(password, &self.password_hash, &self.password_salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_dn_is_rdn_comma_parent() {
        let entry = DirectoryEntry::child("cn=Users", "dc=example,dc=org");
        assert_eq!(entry.dn, "cn=Users,dc=example,dc=org");
        assert_eq!(entry.parent.as_deref(), Some("dc=example,dc=org"));
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn test_root_dn_equals_rdn() {
        let entry = DirectoryEntry::root("dc=example,dc=org");
        assert!(entry.is_root());
        assert_eq!(entry.dn, entry.rdn);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inconsistent_dn() {
        let mut entry = DirectoryEntry::child("cn=a", "dc=org");
        entry.dn = "cn=b,dc=org".to_string();
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_stored_top() {
        let entry = DirectoryEntry::root("dc=org").with_object_class("top");
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_object_class_attribute() {
        let user = DirectoryEntry::root("dc=org")
            .with_object_class("domain")
            .with_attribute("objectClass", ["domain"]);
        assert!(matches!(user.validate(), Err(AppError::InvalidInput(_))));

        let operational = DirectoryEntry::root("dc=org")
            .with_object_class("domain")
            .with_operational_attribute("OBJECTCLASS", ["domain"]);
        assert!(matches!(
            operational.validate(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_object_class_values_prepend_top() {
        let entry = DirectoryEntry::root("dc=org")
            .with_object_class("domain")
            .with_object_class("dcObject");
        assert_eq!(
            entry.object_class_values(),
            vec!["top".to_string(), "domain".to_string(), "dcObject".to_string()]
        );
    }

    #[test]
    fn test_with_attribute_accumulates_values() {
        let entry = DirectoryEntry::root("dc=org")
            .with_attribute("mail", ["a@org"])
            .with_attribute("mail", ["b@org"]);
        assert_eq!(entry.user_attributes["mail"], vec!["a@org", "b@org"]);
    }

    #[test]
    fn test_subtree_membership_is_textual() {
        let entry = DirectoryEntry::child("cn=x", "dc=example,dc=org");
        assert!(entry.in_subtree_of("dc=example,dc=org"));
        assert!(entry.in_subtree_of("cn=x,dc=example,dc=org"));
        assert!(!entry.in_subtree_of("dc=other,dc=org"));
        // Known over-match: no separator boundary is enforced.
        assert!(DirectoryEntry::root("dc=org").in_subtree_of("c=org"));
    }

    #[test]
    fn test_principal_verifies_own_password() {
        let principal = Principal::new("admin", "admin");
        assert!(principal.verify_password(b"admin").unwrap());
        assert!(!principal.verify_password(b"wrong").unwrap());
    }
}
