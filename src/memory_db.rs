use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::db::{seed_entries, DirectoryStore, SEED_ADMIN_USERNAME};
use crate::error::{AppError, Result};
use crate::models::{DirectoryEntry, Principal};
use crate::schema::{AttributeType, MatchingRule, ObjectClass, SchemaCatalog, Syntax};

#[derive(Default)]
struct MemoryState {
    /// Keyed by DN, so every query returns entries in DN order.
    entries: BTreeMap<String, DirectoryEntry>,
    principals: BTreeMap<String, Principal>,
    catalog: SchemaCatalog,
}

/// In-process implementation of [`DirectoryStore`].
///
/// Provisioning goes through [`insert_entry`](Self::insert_entry) and
/// [`insert_principal`](Self::insert_principal), which enforce the tree
/// invariants the protocol handlers rely on.
pub struct MemoryDirectoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryDirectoryStore {
    /// An empty tree over the given schema.
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                catalog,
                ..MemoryState::default()
            }),
        }
    }

    /// Standard schema, the example tree and an `admin` principal.
    pub async fn seeded(admin_password: &str) -> Result<Self> {
        let store = Self::new(SchemaCatalog::standard());
        for entry in seed_entries() {
            store.insert_entry(entry).await?;
        }
        store
            .insert_principal(Principal::new(SEED_ADMIN_USERNAME, admin_password))
            .await?;
        info!("Seeded in-memory directory");
        Ok(store)
    }

    pub async fn insert_entry(&self, entry: DirectoryEntry) -> Result<()> {
        entry.validate()?;

        let mut state = self.state.write().await;
        if state.entries.contains_key(&entry.dn) {
            return Err(AppError::InvalidInput(format!(
                "entry {} already exists",
                entry.dn
            )));
        }
        if let Some(parent) = &entry.parent {
            if !state.entries.contains_key(parent) {
                return Err(AppError::InvalidInput(format!(
                    "parent {} of entry {} does not exist",
                    parent, entry.dn
                )));
            }
        }
        state.catalog.check_entry(&entry)?;

        debug!(dn = %entry.dn, "Inserted entry");
        state.entries.insert(entry.dn.clone(), entry);
        Ok(())
    }

    pub async fn insert_principal(&self, principal: Principal) -> Result<()> {
        let mut state = self.state.write().await;
        if state.principals.contains_key(&principal.username) {
            return Err(AppError::InvalidInput(format!(
                "principal {} already exists",
                principal.username
            )));
        }
        state
            .principals
            .insert(principal.username.clone(), principal);
        Ok(())
    }

    /// Replace the stored schema. Takes effect for the protocol handlers on
    /// the next schema reload.
    pub async fn load_schema(&self, catalog: SchemaCatalog) {
        self.state.write().await.catalog = catalog;
    }

    async fn select<F>(&self, predicate: F) -> Vec<DirectoryEntry>
    where
        F: Fn(&DirectoryEntry) -> bool,
    {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectoryStore {
    async fn entries_by_dn(&self, dn: &str) -> Result<Vec<DirectoryEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(dn).cloned().into_iter().collect())
    }

    async fn entries_by_parent(&self, parent: &str) -> Result<Vec<DirectoryEntry>> {
        Ok(self
            .select(|entry| entry.parent.as_deref() == Some(parent))
            .await)
    }

    async fn entry_tree_by_parent(&self, parent: &str) -> Result<Vec<DirectoryEntry>> {
        Ok(self.select(|entry| entry.in_subtree_of(parent)).await)
    }

    async fn root_entries(&self) -> Result<Vec<DirectoryEntry>> {
        Ok(self.select(DirectoryEntry::is_root).await)
    }

    async fn principals_by_username(&self, username: &str) -> Result<Vec<Principal>> {
        let state = self.state.read().await;
        Ok(state.principals.get(username).cloned().into_iter().collect())
    }

    async fn all_syntaxes(&self) -> Result<Vec<Syntax>> {
        Ok(self.state.read().await.catalog.syntaxes().to_vec())
    }

    async fn all_matching_rules(&self) -> Result<Vec<MatchingRule>> {
        Ok(self.state.read().await.catalog.matching_rules().to_vec())
    }

    async fn all_attribute_types(&self) -> Result<Vec<AttributeType>> {
        Ok(self.state.read().await.catalog.attribute_types().to_vec())
    }

    async fn all_object_classes(&self) -> Result<Vec<ObjectClass>> {
        Ok(self.state.read().await.catalog.object_classes().to_vec())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns(entries: &[DirectoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.dn.as_str()).collect()
    }

    #[tokio::test]
    async fn test_seeded_queries() {
        let store = MemoryDirectoryStore::seeded("admin").await.unwrap();

        let roots = store.root_entries().await.unwrap();
        assert_eq!(dns(&roots), vec!["dc=example,dc=org"]);

        let base = store.entries_by_dn("dc=example,dc=org").await.unwrap();
        assert_eq!(base.len(), 1);
        assert!(store.entries_by_dn("dc=missing").await.unwrap().is_empty());

        let children = store
            .entries_by_parent("cn=Users,dc=example,dc=org")
            .await
            .unwrap();
        assert_eq!(
            dns(&children),
            vec![
                "cn=Test User,cn=Users,dc=example,dc=org",
                "cn=Test User2,cn=Users,dc=example,dc=org",
            ]
        );

        let tree = store
            .entry_tree_by_parent("dc=example,dc=org")
            .await
            .unwrap();
        assert_eq!(tree.len(), 4);
    }

    #[tokio::test]
    async fn test_scope_monotonicity() {
        let store = MemoryDirectoryStore::seeded("admin").await.unwrap();
        for base in [
            "dc=example,dc=org",
            "cn=Users,dc=example,dc=org",
            "cn=Test User,cn=Users,dc=example,dc=org",
            "dc=missing",
        ] {
            let one = store.entries_by_parent(base).await.unwrap();
            let sub = store.entry_tree_by_parent(base).await.unwrap();
            for entry in &one {
                assert!(sub.contains(entry), "{} missing from subtree of {}", entry.dn, base);
            }
            for entry in store.entries_by_dn(base).await.unwrap() {
                assert!(sub.contains(&entry));
            }
        }
    }

    #[tokio::test]
    async fn test_principal_lookup() {
        let store = MemoryDirectoryStore::seeded("s3cret").await.unwrap();
        let found = store.principals_by_username("admin").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].verify_password(b"s3cret").unwrap());
        assert!(store
            .principals_by_username("nobody")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_insert_entry_requires_parent() {
        let store = MemoryDirectoryStore::new(SchemaCatalog::standard());
        let orphan = DirectoryEntry::child("cn=x", "dc=nowhere")
            .with_object_class("person")
            .with_attribute("cn", ["x"])
            .with_attribute("sn", ["x"]);
        assert!(matches!(
            store.insert_entry(orphan).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_entry_rejects_duplicate_dn() {
        let store = MemoryDirectoryStore::new(SchemaCatalog::standard());
        let entry = DirectoryEntry::root("dc=org").with_object_class("domain");
        store.insert_entry(entry.clone()).await.unwrap();
        assert!(store.insert_entry(entry).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_entry_rejects_object_class_attribute() {
        let store = MemoryDirectoryStore::new(SchemaCatalog::standard());
        let entry = DirectoryEntry::root("dc=org")
            .with_object_class("domain")
            .with_attribute("objectClass", ["domain"]);
        assert!(matches!(
            store.insert_entry(entry).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(store.entries_by_dn("dc=org").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_entry_requires_structural_class() {
        let store = MemoryDirectoryStore::new(SchemaCatalog::standard());
        let entry = DirectoryEntry::root("dc=org").with_object_class("dcObject");
        assert!(store.insert_entry(entry).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_principal_rejects_duplicate() {
        let store = MemoryDirectoryStore::new(SchemaCatalog::standard());
        store
            .insert_principal(Principal::new("admin", "a"))
            .await
            .unwrap();
        assert!(store
            .insert_principal(Principal::new("admin", "b"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_schema_queries_follow_loaded_catalog() {
        let store = MemoryDirectoryStore::new(SchemaCatalog::default());
        assert!(store.all_object_classes().await.unwrap().is_empty());

        store.load_schema(SchemaCatalog::standard()).await;
        let standard = SchemaCatalog::standard();
        assert_eq!(
            store.all_object_classes().await.unwrap().len(),
            standard.object_classes().len()
        );
        assert_eq!(
            store.all_syntaxes().await.unwrap().len(),
            standard.syntaxes().len()
        );
    }
}
