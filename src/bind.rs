//! Simple bind.
//!
//! | condition                                    | outcome                          |
//! |----------------------------------------------|----------------------------------|
//! | request fields do not decode                 | handler error, no response       |
//! | authentication choice other than simple      | `protocolError`, then close      |
//! | principal lookup or verification fails       | handler error, no response       |
//! | zero or several principals for the username  | `invalidCredentials`, then close |
//! | one principal, wrong password                | `invalidCredentials`, then close |
//! | one principal, right password                | `success`, session stays open    |

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::ber::Packet;
use crate::context::ConnectionContext;
use crate::db::DirectoryStore;
use crate::dispatch::{HandlerResponse, OperationHandler};
use crate::error::Result;
use crate::ldap_lib::{create_bind_response, LdapResultCode};
use crate::metrics;
use crate::protocol::{BindAuthentication, BindRequest};

pub struct BindHandler;

#[async_trait]
impl OperationHandler for BindHandler {
    async fn handle(
        &self,
        ctx: &ConnectionContext,
        message_id: i64,
        request: &Packet,
    ) -> Result<HandlerResponse> {
        let bind = BindRequest::decode(request)?;
        debug!(
            peer = %ctx.peer,
            version = bind.version,
            name = %bind.name,
            "Bind request"
        );

        let code = match &bind.authentication {
            BindAuthentication::Simple(password) => {
                authenticate(ctx.store(), &bind.name, password).await?
            }
            BindAuthentication::Unsupported(choice) => {
                warn!(
                    peer = %ctx.peer,
                    choice,
                    "Unsupported bind authentication choice"
                );
                LdapResultCode::ProtocolError
            }
        };

        metrics::record_ldap_bind(code.name());
        let response = HandlerResponse::reply(create_bind_response(message_id, code));
        if code == LdapResultCode::Success {
            info!(peer = %ctx.peer, username = %bind.name, "Bind succeeded");
            Ok(response)
        } else {
            info!(
                peer = %ctx.peer,
                username = %bind.name,
                result = code.name(),
                "Bind rejected, closing connection"
            );
            Ok(response.closing())
        }
    }
}

/// Check a simple-bind username and password against the stored principals.
///
/// Storage and verifier failures are errors; every kind of mismatch is
/// `invalidCredentials`.
pub async fn authenticate(
    store: &dyn DirectoryStore,
    username: &str,
    password: &[u8],
) -> Result<LdapResultCode> {
    let principals = store.principals_by_username(username).await?;
    let principal = match principals.as_slice() {
        [principal] => principal,
        [] => {
            debug!(username, "No principal with this username");
            return Ok(LdapResultCode::InvalidCredentials);
        }
        many => {
            warn!(
                username,
                matches = many.len(),
                "Ambiguous username, refusing bind"
            );
            return Ok(LdapResultCode::InvalidCredentials);
        }
    };

    if principal.verify_password(password)? {
        Ok(LdapResultCode::Success)
    } else {
        Ok(LdapResultCode::InvalidCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::Class;
    use crate::context::ServerContext;
    use crate::db::mock::MockDirectoryStore;
    use crate::error::AppError;
    use crate::ldap_lib::op;
    use crate::models::Principal;
    use crate::protocol::fixtures::bind_request;
    use crate::schema::{SchemaCatalog, SchemaHandle};
    use mockall::predicate::eq;
    use std::sync::Arc;

    fn context(store: MockDirectoryStore) -> ConnectionContext {
        let server = ServerContext::new(
            Arc::new(store),
            SchemaHandle::new(SchemaCatalog::default()),
        );
        ConnectionContext::new(Arc::new(server), "127.0.0.1:40000", "ldap")
    }

    fn store_with(principals: Vec<Principal>) -> MockDirectoryStore {
        let mut store = MockDirectoryStore::new();
        store
            .expect_principals_by_username()
            .times(1)
            .returning(move |_| Ok(principals.clone()));
        store
    }

    #[tokio::test]
    async fn test_bind_success_keeps_session() {
        let mut store = MockDirectoryStore::new();
        store
            .expect_principals_by_username()
            .with(eq("admin"))
            .times(1)
            .returning(|_| Ok(vec![Principal::new("admin", "admin")]));

        let response = BindHandler
            .handle(&context(store), 1, &bind_request("admin", "admin"))
            .await
            .unwrap();

        assert!(!response.close);
        assert_eq!(response.messages.len(), 1);
        let bytes = response.messages[0].to_bytes();
        assert_eq!(bytes[5], 0x61); // BindResponse
        assert_eq!(bytes[9], 0); // success
    }

    #[tokio::test]
    async fn test_bind_wrong_password_closes() {
        let store = store_with(vec![Principal::new("admin", "admin")]);
        let response = BindHandler
            .handle(&context(store), 2, &bind_request("admin", "wrong"))
            .await
            .unwrap();

        assert!(response.close);
        assert_eq!(response.messages[0].to_bytes()[9], 49);
    }

    #[tokio::test]
    async fn test_bind_unknown_user() {
        let store = store_with(Vec::new());
        let response = BindHandler
            .handle(&context(store), 3, &bind_request("nobody", "x"))
            .await
            .unwrap();

        assert!(response.close);
        assert_eq!(response.messages[0].to_bytes()[9], 49);
    }

    #[tokio::test]
    async fn test_bind_ambiguous_username() {
        let store = store_with(vec![
            Principal::new("admin", "admin"),
            Principal::new("admin", "admin"),
        ]);
        let code = authenticate(&store, "admin", b"admin").await.unwrap();
        assert_eq!(code, LdapResultCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_bind_storage_error_sends_nothing() {
        let mut store = MockDirectoryStore::new();
        store
            .expect_principals_by_username()
            .returning(|_| Err(AppError::Storage("connection refused".to_string())));

        let result = BindHandler
            .handle(&context(store), 4, &bind_request("admin", "admin"))
            .await;
        assert!(matches!(result, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn test_bind_corrupt_salt_is_an_error() {
        let mut principal = Principal::new("admin", "admin");
        principal.password_salt = "not base64!".to_string();
        let store = store_with(vec![principal]);

        let result = authenticate(&store, "admin", b"admin").await;
        assert!(matches!(result, Err(AppError::Credential(_))));
    }

    #[tokio::test]
    async fn test_bind_sasl_is_protocol_error() {
        // No lookup may happen for an unsupported mechanism.
        let store = MockDirectoryStore::new();
        let request = Packet::constructed(Class::Application, op::BIND_REQUEST, "Bind Request")
            .with_child(Packet::integer(3, "version"))
            .with_child(Packet::octet_string("admin", "name"))
            .with_child(
                Packet::constructed(Class::Context, 3, "sasl")
                    .with_child(Packet::octet_string("EXTERNAL", "mechanism")),
            );

        let response = BindHandler
            .handle(&context(store), 5, &request)
            .await
            .unwrap();
        assert!(response.close);
        assert_eq!(response.messages[0].to_bytes()[9], 2);
    }

    #[tokio::test]
    async fn test_bind_malformed_request_is_decode_error() {
        let store = MockDirectoryStore::new();
        let request = Packet::constructed(Class::Application, op::BIND_REQUEST, "Bind Request")
            .with_child(Packet::integer(3, "version"));

        let result = BindHandler.handle(&context(store), 6, &request).await;
        assert!(matches!(result, Err(AppError::Decode(_))));
    }
}
