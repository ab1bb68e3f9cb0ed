use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::db::{seed_entries, DirectoryStore, SEED_ADMIN_USERNAME};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{DirectoryEntry, Principal};
use crate::schema::{AttributeType, MatchingRule, ObjectClass, SchemaCatalog, Syntax};

const ROOTS_KEY: &str = "entries:roots";
/// Sorted set of reversed DNs, all scored 0, so a subtree is one lexical range.
const TREE_KEY: &str = "entries:tree";
const SYNTAXES_KEY: &str = "schema:syntaxes";
const MATCHING_RULES_KEY: &str = "schema:matching_rules";
const ATTRIBUTE_TYPES_KEY: &str = "schema:attribute_types";
const OBJECT_CLASSES_KEY: &str = "schema:object_classes";

/// Redis-based implementation of the DirectoryStore trait
pub struct RedisDirectoryStore {
    pool: Pool,
}

impl RedisDirectoryStore {
    /// Create a new RedisDirectoryStore from a Redis URL with retry logic
    pub async fn new(redis_url: &str, retry: Option<u32>) -> Result<Self> {
        let retry = retry.unwrap_or(10);
        Self::new_with_retry(redis_url, retry, tokio::time::Duration::from_secs(2)).await
    }

    /// Create a new RedisDirectoryStore with configurable retry parameters
    pub async fn new_with_retry(
        redis_url: &str,
        max_retries: u32,
        initial_delay: tokio::time::Duration,
    ) -> Result<Self> {
        let mut retries = 0;
        let mut delay = initial_delay;

        loop {
            // Recreate the pool on each attempt to force DNS re-resolution
            let attempt = match PoolConfig::from_url(redis_url).create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => Self::test_connection(&pool).await.map(|_| pool),
                Err(e) => Err(AppError::Pool(format!("Failed to create Redis pool: {}", e))),
            };

            match attempt {
                Ok(pool) => {
                    info!("Successfully connected to Redis");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    retries += 1;
                    if retries >= max_retries {
                        return Err(AppError::Storage(format!(
                            "Failed to connect to Redis after {} attempts: {}",
                            max_retries, e
                        )));
                    }
                    warn!(
                        "Failed to connect to Redis (attempt {}/{}): {}. Retrying in {:?}...",
                        retries, max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    // Exponential backoff with max 30 seconds
                    delay = std::cmp::min(delay * 2, tokio::time::Duration::from_secs(30));
                }
            }
        }
    }

    /// Test the Redis connection
    async fn test_connection(pool: &Pool) -> Result<()> {
        let mut conn = pool.get().await?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to ping Redis: {}", e)))?;

        Ok(())
    }

    fn entry_key(dn: &str) -> String {
        format!("entry:{}", dn)
    }

    fn children_key(parent: &str) -> String {
        format!("entries:children:{}", parent)
    }

    fn principal_key(username: &str) -> String {
        format!("principal:{}", username)
    }

    fn reversed(dn: &str) -> String {
        dn.chars().rev().collect()
    }

    /// Lexical bounds covering every member that starts with `prefix`.
    fn prefix_range(prefix: &str) -> (Vec<u8>, Vec<u8>) {
        if prefix.is_empty() {
            return (b"-".to_vec(), b"+".to_vec());
        }
        let mut min = b"[".to_vec();
        min.extend_from_slice(prefix.as_bytes());
        let mut max = min.clone();
        // 0xff never occurs in UTF-8, so it sorts after every continuation.
        max.push(0xff);
        (min, max)
    }

    async fn connection(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn load_entries(conn: &mut Connection, dns: Vec<String>) -> Result<Vec<DirectoryEntry>> {
        if dns.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = dns.iter().map(|dn| Self::entry_key(dn)).collect();
        let values: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut entries = Vec::with_capacity(values.len());
        for (dn, value) in dns.iter().zip(values) {
            match value {
                Some(json) => entries.push(serde_json::from_str::<DirectoryEntry>(&json)?),
                None => warn!(dn = %dn, "Index references a missing entry"),
            }
        }
        entries.sort_by(|a, b| a.dn.cmp(&b.dn));
        Ok(entries)
    }

    async fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let mut conn = self.connection().await?;
        let json: Option<String> = conn.get(key).await?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Persist all four schema sections.
    pub async fn store_schema(&self, catalog: &SchemaCatalog) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(SYNTAXES_KEY, serde_json::to_string(catalog.syntaxes())?)
            .ignore()
            .set(
                MATCHING_RULES_KEY,
                serde_json::to_string(catalog.matching_rules())?,
            )
            .ignore()
            .set(
                ATTRIBUTE_TYPES_KEY,
                serde_json::to_string(catalog.attribute_types())?,
            )
            .ignore()
            .set(
                OBJECT_CLASSES_KEY,
                serde_json::to_string(catalog.object_classes())?,
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Insert an entry after checking it against the stored schema and tree.
    pub async fn insert_entry(&self, entry: DirectoryEntry) -> Result<()> {
        entry.validate()?;
        SchemaCatalog::load(self).await?.check_entry(&entry)?;

        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(Self::entry_key(&entry.dn)).await?;
        if exists {
            return Err(AppError::InvalidInput(format!(
                "entry {} already exists",
                entry.dn
            )));
        }

        let index_key = match &entry.parent {
            Some(parent) => {
                let parent_exists: bool = conn.exists(Self::entry_key(parent)).await?;
                if !parent_exists {
                    return Err(AppError::InvalidInput(format!(
                        "parent {} of entry {} does not exist",
                        parent, entry.dn
                    )));
                }
                Self::children_key(parent)
            }
            None => ROOTS_KEY.to_string(),
        };

        let json = serde_json::to_string(&entry)?;
        let _: () = redis::pipe()
            .atomic()
            .set(Self::entry_key(&entry.dn), json)
            .ignore()
            .sadd(index_key, &entry.dn)
            .ignore()
            .zadd(TREE_KEY, Self::reversed(&entry.dn), 0)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(dn = %entry.dn, "Inserted entry");
        Ok(())
    }

    pub async fn insert_principal(&self, principal: Principal) -> Result<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(&principal)?;
        let created: bool = conn
            .set_nx(Self::principal_key(&principal.username), json)
            .await?;
        if !created {
            return Err(AppError::InvalidInput(format!(
                "principal {} already exists",
                principal.username
            )));
        }
        Ok(())
    }

    /// Provision the standard schema, example tree and admin principal
    /// unless a naming context already exists. Returns whether it seeded.
    pub async fn seed_if_empty(&self, admin_password: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let roots: usize = conn.scard(ROOTS_KEY).await?;
        if roots > 0 {
            debug!(roots, "Redis directory already provisioned");
            return Ok(false);
        }

        self.store_schema(&SchemaCatalog::standard()).await?;
        for entry in seed_entries() {
            self.insert_entry(entry).await?;
        }
        let principal_exists: bool = conn
            .exists(Self::principal_key(SEED_ADMIN_USERNAME))
            .await?;
        if !principal_exists {
            self.insert_principal(Principal::new(SEED_ADMIN_USERNAME, admin_password))
                .await?;
        }
        info!("Seeded Redis directory");
        Ok(true)
    }
}

/// Run a storage call and record its latency and outcome.
async fn timed<T, F>(operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = call.await;
    metrics::record_store_operation(operation, result.is_ok(), start.elapsed());
    result
}

#[async_trait]
impl DirectoryStore for RedisDirectoryStore {
    async fn entries_by_dn(&self, dn: &str) -> Result<Vec<DirectoryEntry>> {
        timed("entries_by_dn", async {
            let mut conn = self.connection().await?;
            let json: Option<String> = conn.get(Self::entry_key(dn)).await?;
            match json {
                Some(json) => Ok(vec![serde_json::from_str::<DirectoryEntry>(&json)?]),
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    async fn entries_by_parent(&self, parent: &str) -> Result<Vec<DirectoryEntry>> {
        timed("entries_by_parent", async {
            let mut conn = self.connection().await?;
            let dns: Vec<String> = conn.smembers(Self::children_key(parent)).await?;
            Self::load_entries(&mut conn, dns).await
        })
        .await
    }

    async fn entry_tree_by_parent(&self, parent: &str) -> Result<Vec<DirectoryEntry>> {
        timed("entry_tree_by_parent", async {
            let mut conn = self.connection().await?;
            let (min, max) = Self::prefix_range(&Self::reversed(parent));
            let reversed: Vec<String> = conn.zrangebylex(TREE_KEY, min, max).await?;
            let dns = reversed.iter().map(|r| Self::reversed(r)).collect();
            Self::load_entries(&mut conn, dns).await
        })
        .await
    }

    async fn root_entries(&self) -> Result<Vec<DirectoryEntry>> {
        timed("root_entries", async {
            let mut conn = self.connection().await?;
            let dns: Vec<String> = conn.smembers(ROOTS_KEY).await?;
            Self::load_entries(&mut conn, dns).await
        })
        .await
    }

    async fn principals_by_username(&self, username: &str) -> Result<Vec<Principal>> {
        timed("principals_by_username", async {
            let mut conn = self.connection().await?;
            let json: Option<String> = conn.get(Self::principal_key(username)).await?;
            match json {
                Some(json) => Ok(vec![serde_json::from_str(&json)?]),
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    async fn all_syntaxes(&self) -> Result<Vec<Syntax>> {
        timed("all_syntaxes", self.load_list(SYNTAXES_KEY)).await
    }

    async fn all_matching_rules(&self) -> Result<Vec<MatchingRule>> {
        timed("all_matching_rules", self.load_list(MATCHING_RULES_KEY)).await
    }

    async fn all_attribute_types(&self) -> Result<Vec<AttributeType>> {
        timed("all_attribute_types", self.load_list(ATTRIBUTE_TYPES_KEY)).await
    }

    async fn all_object_classes(&self) -> Result<Vec<ObjectClass>> {
        timed("all_object_classes", self.load_list(OBJECT_CLASSES_KEY)).await
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        Ok(result.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(
            RedisDirectoryStore::entry_key("dc=example,dc=org"),
            "entry:dc=example,dc=org"
        );
        assert_eq!(
            RedisDirectoryStore::children_key("dc=org"),
            "entries:children:dc=org"
        );
        assert_eq!(RedisDirectoryStore::principal_key("admin"), "principal:admin");
    }

    #[test]
    fn test_reversed_prefix_is_dn_suffix() {
        let dn = RedisDirectoryStore::reversed("cn=a,dc=example,dc=org");
        let base = RedisDirectoryStore::reversed("dc=example,dc=org");
        assert!(dn.starts_with(&base));
        assert_eq!(RedisDirectoryStore::reversed(&dn), "cn=a,dc=example,dc=org");
    }

    #[test]
    fn test_prefix_range() {
        let (min, max) = RedisDirectoryStore::prefix_range("gro");
        assert_eq!(min, b"[gro".to_vec());
        assert_eq!(max, b"[gro\xff".to_vec());

        let (min, max) = RedisDirectoryStore::prefix_range("");
        assert_eq!(min, b"-".to_vec());
        assert_eq!(max, b"+".to_vec());
    }
}
