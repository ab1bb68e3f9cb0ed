pub mod api;
pub mod auth;
pub mod ber;
pub mod bind;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod ldap_lib;
pub mod memory_db;
pub mod metrics;
pub mod models;
pub mod password;
pub mod protocol;
pub mod redis_db;
pub mod schema;
pub mod search;
pub mod tls;
