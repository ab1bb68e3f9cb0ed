//! Schema catalog: syntaxes, matching rules, attribute types and object
//! classes, plus their RFC 4512 textual forms (see [`render`]).
//!
//! A [`SchemaCatalog`] is immutable once built. Reloading builds a new one and
//! swaps it into the shared [`SchemaHandle`], so readers always see a whole
//! snapshot without taking a lock.

pub mod render;
pub mod standard;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::info;

use crate::db::DirectoryStore;
use crate::error::{AppError, Result};
use crate::models::DirectoryEntry;

/// The abstract root of the object-class hierarchy. It is never stored on an
/// entry or recorded as a superior; it is supplied when rendering.
pub const TOP_CLASS: &str = "top";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Syntax {
    pub oid: String,
    pub description: String,
}

impl Syntax {
    pub fn new(oid: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRule {
    pub oid: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// OID of the assertion syntax.
    pub syntax: String,
}

impl MatchingRule {
    pub fn new(oid: impl Into<String>, name: impl Into<String>, syntax: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            aliases: Vec::new(),
            syntax: syntax.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeTypeFlags(u8);

impl AttributeTypeFlags {
    pub const NONE: Self = Self(0);
    pub const SINGLE_VALUE: Self = Self(1);
    pub const NO_USER_MODIFICATION: Self = Self(1 << 1);
    pub const OBSOLETE: Self = Self(1 << 2);
    pub const COLLECTIVE: Self = Self(1 << 3);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for AttributeTypeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// RFC 4512 attribute usage. Exactly one applies to any attribute type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeUsage {
    #[default]
    UserApplications,
    DirectoryOperation,
    DistributedOperation,
    #[serde(rename = "dSAOperation")]
    DsaOperation,
}

impl AttributeUsage {
    pub fn keyword(self) -> &'static str {
        match self {
            AttributeUsage::UserApplications => "userApplications",
            AttributeUsage::DirectoryOperation => "directoryOperation",
            AttributeUsage::DistributedOperation => "distributedOperation",
            AttributeUsage::DsaOperation => "dSAOperation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    pub oid: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Name of the attribute type this one refines.
    pub superior: Option<String>,
    /// Syntax OID.
    pub syntax: Option<String>,
    /// Matching rule names.
    pub equality: Option<String>,
    pub substring: Option<String>,
    pub ordering: Option<String>,
    #[serde(default)]
    pub flags: AttributeTypeFlags,
    #[serde(default)]
    pub usage: AttributeUsage,
}

impl AttributeType {
    pub fn new(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            aliases: Vec::new(),
            superior: None,
            syntax: None,
            equality: None,
            substring: None,
            ordering: None,
            flags: AttributeTypeFlags::NONE,
            usage: AttributeUsage::UserApplications,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn sup(mut self, superior: impl Into<String>) -> Self {
        self.superior = Some(superior.into());
        self
    }

    pub fn syntax(mut self, oid: impl Into<String>) -> Self {
        self.syntax = Some(oid.into());
        self
    }

    pub fn equality(mut self, rule: impl Into<String>) -> Self {
        self.equality = Some(rule.into());
        self
    }

    pub fn substring(mut self, rule: impl Into<String>) -> Self {
        self.substring = Some(rule.into());
        self
    }

    pub fn ordering(mut self, rule: impl Into<String>) -> Self {
        self.ordering = Some(rule.into());
        self
    }

    pub fn flags(mut self, flags: AttributeTypeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn usage(mut self, usage: AttributeUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Canonical name followed by aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.names().any(|n| n.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClassKind {
    Structural,
    Auxiliary,
    Abstract,
}

impl ObjectClassKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ObjectClassKind::Structural => "STRUCTURAL",
            ObjectClassKind::Auxiliary => "AUXILIARY",
            ObjectClassKind::Abstract => "ABSTRACT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClass {
    pub oid: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Recorded superior. `None` means "derives from top".
    pub superior: Option<String>,
    pub kind: ObjectClassKind,
    #[serde(default)]
    pub must: Vec<String>,
    #[serde(default)]
    pub may: Vec<String>,
}

impl ObjectClass {
    pub fn new(oid: impl Into<String>, name: impl Into<String>, kind: ObjectClassKind) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            aliases: Vec::new(),
            superior: None,
            kind,
            must: Vec::new(),
            may: Vec::new(),
        }
    }

    pub fn sup(mut self, superior: impl Into<String>) -> Self {
        self.superior = Some(superior.into());
        self
    }

    pub fn must<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.must.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn may<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.may.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.names().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// The effective superior. A class with nothing recorded derives from
    /// `top`; `top` itself has none.
    pub fn superior(&self) -> Option<&str> {
        match self.superior.as_deref() {
            Some(name) => Some(name),
            None if self.name.eq_ignore_ascii_case(TOP_CLASS) => None,
            None => Some(TOP_CLASS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    syntaxes: Vec<Syntax>,
    matching_rules: Vec<MatchingRule>,
    attribute_types: Vec<AttributeType>,
    object_classes: Vec<ObjectClass>,
}

impl SchemaCatalog {
    /// Build a catalog, checking that OIDs are unique within each kind and
    /// that every recorded superior resolves.
    pub fn new(
        syntaxes: Vec<Syntax>,
        matching_rules: Vec<MatchingRule>,
        attribute_types: Vec<AttributeType>,
        object_classes: Vec<ObjectClass>,
    ) -> Result<Self> {
        ensure_unique_oids("syntax", syntaxes.iter().map(|s| s.oid.as_str()))?;
        ensure_unique_oids(
            "matching rule",
            matching_rules.iter().map(|r| r.oid.as_str()),
        )?;
        ensure_unique_oids(
            "attribute type",
            attribute_types.iter().map(|a| a.oid.as_str()),
        )?;
        ensure_unique_oids(
            "object class",
            object_classes.iter().map(|c| c.oid.as_str()),
        )?;

        let catalog = Self {
            syntaxes,
            matching_rules,
            attribute_types,
            object_classes,
        };

        for attribute in &catalog.attribute_types {
            if let Some(superior) = &attribute.superior {
                if catalog.attribute_type(superior).is_none() {
                    return Err(AppError::Schema(format!(
                        "attribute type {} names unknown superior {}",
                        attribute.name, superior
                    )));
                }
            }
        }
        for class in &catalog.object_classes {
            catalog.superior_chain(&class.name)?;
        }

        Ok(catalog)
    }

    /// Load all four schema kinds through the directory store.
    pub async fn load(store: &dyn DirectoryStore) -> Result<Self> {
        let syntaxes = store.all_syntaxes().await?;
        let matching_rules = store.all_matching_rules().await?;
        let attribute_types = store.all_attribute_types().await?;
        let object_classes = store.all_object_classes().await?;
        Self::new(syntaxes, matching_rules, attribute_types, object_classes)
    }

    pub fn syntaxes(&self) -> &[Syntax] {
        &self.syntaxes
    }

    pub fn matching_rules(&self) -> &[MatchingRule] {
        &self.matching_rules
    }

    pub fn attribute_types(&self) -> &[AttributeType] {
        &self.attribute_types
    }

    pub fn object_classes(&self) -> &[ObjectClass] {
        &self.object_classes
    }

    pub fn attribute_type(&self, name: &str) -> Option<&AttributeType> {
        self.attribute_types.iter().find(|a| a.is_named(name))
    }

    pub fn object_class(&self, name: &str) -> Option<&ObjectClass> {
        self.object_classes.iter().find(|c| c.is_named(name))
    }

    /// The class named `name` followed by each of its superiors up to the root.
    pub fn superior_chain(&self, name: &str) -> Result<Vec<&ObjectClass>> {
        let mut chain = Vec::new();
        let mut next = Some(name.to_string());
        while let Some(current) = next {
            let class = self.object_class(&current).ok_or_else(|| {
                AppError::Schema(format!("unknown object class {}", current))
            })?;
            if chain.iter().any(|seen: &&ObjectClass| seen.oid == class.oid) {
                return Err(AppError::Schema(format!(
                    "object class {} has a cyclic superior chain",
                    name
                )));
            }
            chain.push(class);
            next = class.superior().map(str::to_string);
        }
        Ok(chain)
    }

    /// Every declared class must be known and at least one must be structural.
    pub fn check_entry(&self, entry: &DirectoryEntry) -> Result<()> {
        let mut structural = false;
        for name in &entry.object_classes {
            let class = self.object_class(name).ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "entry {} declares unknown object class {}",
                    entry.dn, name
                ))
            })?;
            structural |= class.kind == ObjectClassKind::Structural;
        }
        if !structural {
            return Err(AppError::InvalidInput(format!(
                "entry {} has no structural object class",
                entry.dn
            )));
        }
        Ok(())
    }
}

fn ensure_unique_oids<'a>(kind: &str, oids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for oid in oids {
        if !seen.insert(oid) {
            return Err(AppError::Schema(format!("duplicate {} OID {}", kind, oid)));
        }
    }
    Ok(())
}

/// Shared, swappable reference to the current catalog.
#[derive(Clone)]
pub struct SchemaHandle {
    current: Arc<ArcSwap<SchemaCatalog>>,
}

impl SchemaHandle {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(catalog)),
        }
    }

    /// A snapshot that stays consistent for as long as the caller holds it.
    pub fn current(&self) -> Arc<SchemaCatalog> {
        self.current.load_full()
    }

    pub fn replace(&self, catalog: SchemaCatalog) {
        self.current.store(Arc::new(catalog));
    }

    /// Rebuild the catalog from the store and swap it in. On error the
    /// previous catalog stays in place.
    pub async fn reload(&self, store: &dyn DirectoryStore) -> Result<()> {
        let catalog = SchemaCatalog::load(store).await?;
        info!(
            syntaxes = catalog.syntaxes().len(),
            matching_rules = catalog.matching_rules().len(),
            attribute_types = catalog.attribute_types().len(),
            object_classes = catalog.object_classes().len(),
            "Schema catalog reloaded"
        );
        self.replace(catalog);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockDirectoryStore;

    fn small_catalog() -> Result<SchemaCatalog> {
        SchemaCatalog::new(
            vec![Syntax::new("1.1.1", "Directory String")],
            vec![MatchingRule::new("2.2.2", "caseIgnoreMatch", "1.1.1")],
            vec![
                AttributeType::new("3.0", "name").syntax("1.1.1"),
                AttributeType::new("3.1", "cn").sup("name"),
            ],
            vec![
                ObjectClass::new("4.0", "top", ObjectClassKind::Abstract),
                ObjectClass::new("4.1", "person", ObjectClassKind::Structural).must(["cn"]),
                ObjectClass::new("4.2", "employee", ObjectClassKind::Structural).sup("person"),
                ObjectClass::new("4.3", "extra", ObjectClassKind::Auxiliary),
            ],
        )
    }

    #[test]
    fn test_standard_catalog_is_valid() {
        let standard = SchemaCatalog::standard();
        let rebuilt = SchemaCatalog::new(
            standard.syntaxes().to_vec(),
            standard.matching_rules().to_vec(),
            standard.attribute_types().to_vec(),
            standard.object_classes().to_vec(),
        );
        assert!(rebuilt.is_ok(), "{:?}", rebuilt.err());
    }

    #[test]
    fn test_duplicate_oid_rejected() {
        let result = SchemaCatalog::new(
            vec![Syntax::new("1.1", "a"), Syntax::new("1.1", "b")],
            vec![],
            vec![],
            vec![],
        );
        assert!(matches!(result, Err(AppError::Schema(_))));
    }

    #[test]
    fn test_unknown_attribute_superior_rejected() {
        let result = SchemaCatalog::new(
            vec![],
            vec![],
            vec![AttributeType::new("3.1", "cn").sup("missing")],
            vec![],
        );
        assert!(matches!(result, Err(AppError::Schema(_))));
    }

    #[test]
    fn test_unknown_class_superior_rejected() {
        let result = SchemaCatalog::new(
            vec![],
            vec![],
            vec![],
            vec![
                ObjectClass::new("4.0", "top", ObjectClassKind::Abstract),
                ObjectClass::new("4.1", "person", ObjectClassKind::Structural).sup("nobody"),
            ],
        );
        assert!(matches!(result, Err(AppError::Schema(_))));
    }

    #[test]
    fn test_cyclic_superiors_rejected() {
        let result = SchemaCatalog::new(
            vec![],
            vec![],
            vec![],
            vec![
                ObjectClass::new("4.1", "a", ObjectClassKind::Structural).sup("b"),
                ObjectClass::new("4.2", "b", ObjectClassKind::Structural).sup("a"),
            ],
        );
        assert!(matches!(result, Err(AppError::Schema(_))));
    }

    #[test]
    fn test_superior_defaults_to_top() {
        let catalog = small_catalog().unwrap();
        let person = catalog.object_class("person").unwrap();
        assert_eq!(person.superior(), Some("top"));
        let top = catalog.object_class("top").unwrap();
        assert_eq!(top.superior(), None);

        let chain: Vec<&str> = catalog
            .superior_chain("employee")
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(chain, vec!["employee", "person", "top"]);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = small_catalog().unwrap();
        assert!(catalog.attribute_type("CN").is_some());
        assert!(catalog.object_class("PERSON").is_some());
    }

    #[test]
    fn test_check_entry_requires_structural_class() {
        let catalog = small_catalog().unwrap();
        let ok = DirectoryEntry::root("cn=a").with_object_class("person");
        assert!(catalog.check_entry(&ok).is_ok());

        let aux_only = DirectoryEntry::root("cn=b").with_object_class("extra");
        assert!(catalog.check_entry(&aux_only).is_err());

        let unknown = DirectoryEntry::root("cn=c").with_object_class("ghost");
        assert!(catalog.check_entry(&unknown).is_err());
    }

    #[test]
    fn test_flags_contains() {
        let flags = AttributeTypeFlags::SINGLE_VALUE | AttributeTypeFlags::NO_USER_MODIFICATION;
        assert!(flags.contains(AttributeTypeFlags::SINGLE_VALUE));
        assert!(flags.contains(AttributeTypeFlags::NO_USER_MODIFICATION));
        assert!(!flags.contains(AttributeTypeFlags::OBSOLETE));
        assert!(!flags.contains(AttributeTypeFlags::NONE));
    }

    #[tokio::test]
    async fn test_handle_reload_swaps_catalog() {
        let handle = SchemaHandle::new(SchemaCatalog::default());
        let before = handle.current();
        assert!(before.object_classes().is_empty());

        let standard = SchemaCatalog::standard();
        let mut store = MockDirectoryStore::new();
        let syntaxes = standard.syntaxes().to_vec();
        let rules = standard.matching_rules().to_vec();
        let attributes = standard.attribute_types().to_vec();
        let classes = standard.object_classes().to_vec();
        store
            .expect_all_syntaxes()
            .times(1)
            .returning(move || Ok(syntaxes.clone()));
        store
            .expect_all_matching_rules()
            .times(1)
            .returning(move || Ok(rules.clone()));
        store
            .expect_all_attribute_types()
            .times(1)
            .returning(move || Ok(attributes.clone()));
        store
            .expect_all_object_classes()
            .times(1)
            .returning(move || Ok(classes.clone()));

        handle.reload(&store).await.unwrap();

        // The snapshot taken earlier is unaffected by the swap.
        assert!(before.object_classes().is_empty());
        assert_eq!(
            handle.current().object_classes().len(),
            standard.object_classes().len()
        );
    }

    #[tokio::test]
    async fn test_handle_reload_failure_keeps_previous() {
        let handle = SchemaHandle::new(SchemaCatalog::standard());
        let mut store = MockDirectoryStore::new();
        store
            .expect_all_syntaxes()
            .times(1)
            .returning(|| Err(AppError::Storage("down".to_string())));

        assert!(handle.reload(&store).await.is_err());
        assert!(!handle.current().object_classes().is_empty());
    }
}
