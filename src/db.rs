use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::models::{DirectoryEntry, Principal};
use crate::schema::{AttributeType, MatchingRule, ObjectClass, Syntax};

/// Read-side storage contract consulted by the protocol handlers.
///
/// Every method may fail with a storage error. Handlers propagate those
/// errors; they never turn them into LDAP result codes.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    // Entries

    /// Entries whose DN equals `dn` (zero or one in a consistent store).
    async fn entries_by_dn(&self, dn: &str) -> Result<Vec<DirectoryEntry>>;

    /// Direct children of `parent`.
    async fn entries_by_parent(&self, parent: &str) -> Result<Vec<DirectoryEntry>>;

    /// Entries whose DN ends with `parent`, `parent` itself included.
    async fn entry_tree_by_parent(&self, parent: &str) -> Result<Vec<DirectoryEntry>>;

    /// Naming contexts: entries without a parent.
    async fn root_entries(&self) -> Result<Vec<DirectoryEntry>>;

    // Principals

    async fn principals_by_username(&self, username: &str) -> Result<Vec<Principal>>;

    // Schema

    async fn all_syntaxes(&self) -> Result<Vec<Syntax>>;
    async fn all_matching_rules(&self) -> Result<Vec<MatchingRule>>;
    async fn all_attribute_types(&self) -> Result<Vec<AttributeType>>;
    async fn all_object_classes(&self) -> Result<Vec<ObjectClass>>;

    /// Health check for the underlying storage
    async fn health_check(&self) -> Result<bool>;
}

/// Username of the principal provisioned with the seed data.
pub const SEED_ADMIN_USERNAME: &str = "admin";

/// The example tree every fresh store is provisioned with, parents first.
pub fn seed_entries() -> Vec<DirectoryEntry> {
    let created = Utc::now().format("%Y%m%d%H%M%SZ").to_string();
    let base = "dc=example,dc=org";
    let users = format!("cn=Users,{}", base);
    let people = ["Test User", "Test User2"];

    let mut entries = vec![
        DirectoryEntry::root(base)
            .with_object_class("domain")
            .with_attribute("dc", ["example"]),
        DirectoryEntry::child("cn=Users", base)
            .with_object_class("groupOfNames")
            .with_attribute("cn", ["Users"])
            .with_attribute(
                "member",
                people.iter().map(|name| format!("cn={},{}", name, users)),
            ),
    ];
    for name in people {
        entries.push(
            DirectoryEntry::child(format!("cn={}", name), users.as_str())
                .with_object_class("person")
                .with_attribute("cn", [name])
                .with_attribute("sn", ["User"]),
        );
    }

    entries
        .into_iter()
        .map(|entry| entry.with_operational_attribute("createTimestamp", [created.as_str()]))
        .collect()
}
