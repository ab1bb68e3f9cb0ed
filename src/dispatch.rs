//! Routing of protocol operations to their handlers.
//!
//! Handlers are registered per application tag and run in registration
//! order. A handler error stops the chain; whatever the earlier handlers
//! produced is still returned so the connection can write it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ber::Packet;
use crate::bind::BindHandler;
use crate::context::ConnectionContext;
use crate::error::{AppError, Result};
use crate::ldap_lib::op;
use crate::search::SearchHandler;

/// Messages to write back and whether to close the connection afterwards.
#[derive(Debug, Default)]
pub struct HandlerResponse {
    pub messages: Vec<Packet>,
    pub close: bool,
}

impl HandlerResponse {
    pub fn reply(message: Packet) -> Self {
        Self {
            messages: vec![message],
            close: false,
        }
    }

    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }

    fn absorb(&mut self, other: HandlerResponse) {
        self.messages.extend(other.messages);
        self.close |= other.close;
    }
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Handle one request. `request` is the protocol operation element of
    /// the LDAPMessage, not the envelope.
    async fn handle(
        &self,
        ctx: &ConnectionContext,
        message_id: i64,
        request: &Packet,
    ) -> Result<HandlerResponse>;
}

/// Outcome of routing one operation.
#[derive(Debug)]
pub enum Dispatch {
    /// No handler is registered for the tag.
    Unhandled,
    Handled(HandlerResponse),
    /// A handler failed. `response` holds what ran before the failure.
    Failed {
        response: HandlerResponse,
        error: AppError,
    },
}

#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<u32, Vec<Arc<dyn OperationHandler>>>,
}

impl DispatcherBuilder {
    pub fn register(mut self, tag: u32, handler: Arc<dyn OperationHandler>) -> Self {
        self.handlers.entry(tag).or_default().push(handler);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

pub struct Dispatcher {
    handlers: HashMap<u32, Vec<Arc<dyn OperationHandler>>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Bind and search, the operations this server implements.
    pub fn standard() -> Self {
        Self::builder()
            .register(op::BIND_REQUEST, Arc::new(BindHandler))
            .register(op::SEARCH_REQUEST, Arc::new(SearchHandler))
            .build()
    }

    pub fn handles(&self, tag: u32) -> bool {
        self.handlers.contains_key(&tag)
    }

    pub async fn dispatch(
        &self,
        ctx: &ConnectionContext,
        tag: u32,
        message_id: i64,
        request: &Packet,
    ) -> Dispatch {
        let Some(chain) = self.handlers.get(&tag) else {
            return Dispatch::Unhandled;
        };

        let mut response = HandlerResponse::default();
        for handler in chain {
            match handler.handle(ctx, message_id, request).await {
                Ok(produced) => response.absorb(produced),
                Err(error) => return Dispatch::Failed { response, error },
            }
        }
        Dispatch::Handled(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::Class;
    use crate::context::ServerContext;
    use crate::db::mock::MockDirectoryStore;
    use crate::ldap_lib::{create_bind_response, LdapResultCode};
    use crate::schema::{SchemaCatalog, SchemaHandle};

    struct Reply(LdapResultCode);

    #[async_trait]
    impl OperationHandler for Reply {
        async fn handle(
            &self,
            _ctx: &ConnectionContext,
            message_id: i64,
            _request: &Packet,
        ) -> Result<HandlerResponse> {
            Ok(HandlerResponse::reply(create_bind_response(message_id, self.0)))
        }
    }

    struct Close;

    #[async_trait]
    impl OperationHandler for Close {
        async fn handle(
            &self,
            _ctx: &ConnectionContext,
            _message_id: i64,
            _request: &Packet,
        ) -> Result<HandlerResponse> {
            Ok(HandlerResponse::default().closing())
        }
    }

    struct Fail;

    #[async_trait]
    impl OperationHandler for Fail {
        async fn handle(
            &self,
            _ctx: &ConnectionContext,
            _message_id: i64,
            _request: &Packet,
        ) -> Result<HandlerResponse> {
            Err(AppError::Storage("unavailable".to_string()))
        }
    }

    fn context() -> ConnectionContext {
        let server = ServerContext::new(
            Arc::new(MockDirectoryStore::new()),
            SchemaHandle::new(SchemaCatalog::default()),
        );
        ConnectionContext::new(Arc::new(server), "127.0.0.1:1", "ldap")
    }

    fn request() -> Packet {
        Packet::constructed(Class::Application, 0, "request")
    }

    #[tokio::test]
    async fn test_unregistered_tag_is_unhandled() {
        let dispatcher = Dispatcher::builder().build();
        let outcome = dispatcher.dispatch(&context(), 3, 1, &request()).await;
        assert!(matches!(outcome, Dispatch::Unhandled));
        assert!(!dispatcher.handles(3));
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let dispatcher = Dispatcher::builder()
            .register(0, Arc::new(Reply(LdapResultCode::Success)))
            .register(0, Arc::new(Close))
            .register(0, Arc::new(Reply(LdapResultCode::Other)))
            .build();

        match dispatcher.dispatch(&context(), 0, 7, &request()).await {
            Dispatch::Handled(response) => {
                assert_eq!(response.messages.len(), 2);
                assert!(response.close);
                assert_eq!(response.messages[0].to_bytes()[9], 0);
                assert_eq!(response.messages[1].to_bytes()[9], 80);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_stops_chain_and_keeps_partial_output() {
        let dispatcher = Dispatcher::builder()
            .register(0, Arc::new(Reply(LdapResultCode::Success)))
            .register(0, Arc::new(Fail))
            .register(0, Arc::new(Close))
            .build();

        match dispatcher.dispatch(&context(), 0, 1, &request()).await {
            Dispatch::Failed { response, error } => {
                assert_eq!(response.messages.len(), 1);
                assert!(!response.close);
                assert_eq!(error.kind(), "storage");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_standard_dispatcher_routes_bind_and_search() {
        let dispatcher = Dispatcher::standard();
        assert!(dispatcher.handles(op::BIND_REQUEST));
        assert!(dispatcher.handles(op::SEARCH_REQUEST));
        assert!(!dispatcher.handles(op::UNBIND_REQUEST));
    }
}
