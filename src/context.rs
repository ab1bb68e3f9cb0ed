use std::sync::Arc;

use crate::db::DirectoryStore;
use crate::schema::SchemaHandle;

/// State shared by every connection of one server instance.
pub struct ServerContext {
    pub store: Arc<dyn DirectoryStore>,
    pub schema: SchemaHandle,
    /// Dump every inbound packet at trace level.
    pub log_packets: bool,
}

impl ServerContext {
    pub fn new(store: Arc<dyn DirectoryStore>, schema: SchemaHandle) -> Self {
        Self {
            store,
            schema,
            log_packets: false,
        }
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.log_packets = enabled;
        self
    }
}

/// Per-connection view handed to operation handlers.
#[derive(Clone)]
pub struct ConnectionContext {
    pub server: Arc<ServerContext>,
    pub peer: String,
    /// `"ldap"` or `"ldaps"`.
    pub transport: &'static str,
}

impl ConnectionContext {
    pub fn new(server: Arc<ServerContext>, peer: impl Into<String>, transport: &'static str) -> Self {
        Self {
            server,
            peer: peer.into(),
            transport,
        }
    }

    pub fn store(&self) -> &dyn DirectoryStore {
        self.server.store.as_ref()
    }
}
