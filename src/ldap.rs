//! LDAP listener and per-connection loop.
//!
//! # Connection lifecycle
//! Each accepted connection gets its own task. The task reads one BER frame
//! at a time and handles it to completion, search entries included, before
//! reading the next, so requests on one connection are strictly serialized.
//!
//! A session ends when:
//! - the peer closes the stream on a packet boundary (quietly),
//! - a frame has no elements at all, which is what a TLS client talking to
//!   the plain port looks like,
//! - framing is lost (oversized, truncated or undecodable length),
//! - a response cannot be written,
//! - a handler asks for it, as a failed bind does.
//!
//! A frame that was read completely but does not decode is reported and the
//! session carries on with the next one.
//!
//! # Routing
//! Only application-class constructed operations are routed. UnbindRequest
//! is primitive, so it is logged and the peer's close ends the session.
//! Operations with no registered handler are logged and ignored.
//!
//! # TLS
//! Many clients drop TLS sessions without a `close_notify` alert. Those
//! closures are logged at debug level and not treated as errors.

use rustls::ServerConfig;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, trace, warn};

use crate::ber::{self, BerError};
use crate::context::{ConnectionContext, ServerContext};
use crate::dispatch::{Dispatch, Dispatcher, HandlerResponse};
use crate::error::{AppError, Result};
use crate::ldap_lib::op;
use crate::metrics;
use crate::protocol::Envelope;
use crate::tls::is_benign_tls_closure_error;

pub const TRANSPORT_PLAIN: &str = "ldap";
pub const TRANSPORT_TLS: &str = "ldaps";

#[derive(Clone)]
pub struct LdapServer {
    context: Arc<ServerContext>,
    dispatcher: Arc<Dispatcher>,
}

impl LdapServer {
    pub fn new(context: Arc<ServerContext>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            context,
            dispatcher,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Start the LDAP server
    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to bind LDAP server: {}", e)))?;

        info!("LDAP server listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept plain connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    info!("New LDAP connection from {}", peer);
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    metrics::record_connection(TRANSPORT_PLAIN);

                    let ctx = ConnectionContext::new(
                        self.context.clone(),
                        peer.to_string(),
                        TRANSPORT_PLAIN,
                    );
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, &ctx, &dispatcher).await {
                            report(&ctx, &e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept LDAP connection: {}", e);
                }
            }
        }
    }

    /// Start the LDAP server with TLS
    pub async fn run_with_tls(&self, addr: &str, tls_config: Arc<ServerConfig>) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to bind LDAPS server: {}", e)))?;

        info!("LDAP server with TLS listening on {}", addr);
        self.serve_tls(listener, TlsAcceptor::from(tls_config))
            .await
    }

    /// Accept TLS connections from an already bound listener.
    pub async fn serve_tls(&self, listener: TcpListener, acceptor: TlsAcceptor) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("New LDAPS connection from {}", peer);
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }

                    let acceptor = acceptor.clone();
                    let ctx = ConnectionContext::new(
                        self.context.clone(),
                        peer.to_string(),
                        TRANSPORT_TLS,
                    );
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(socket).await {
                            Ok(tls_stream) => {
                                metrics::record_connection(TRANSPORT_TLS);
                                if let Err(e) =
                                    serve_connection(tls_stream, &ctx, &dispatcher).await
                                {
                                    report(&ctx, &e);
                                }
                            }
                            Err(e) if is_benign_tls_closure_error(&e) => {
                                debug!("Client {} left during TLS handshake: {}", ctx.peer, e);
                            }
                            Err(e) => {
                                error!("TLS handshake with {} failed: {}", ctx.peer, e);
                                metrics::record_connection_error("tls_handshake");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept LDAPS connection: {}", e);
                }
            }
        }
    }
}

/// Log an error raised while serving a connection and count it.
fn report(ctx: &ConnectionContext, err: &AppError) {
    warn!(
        peer = %ctx.peer,
        transport = ctx.transport,
        kind = err.kind(),
        "LDAP connection error: {}",
        err
    );
    metrics::record_connection_error(err.kind());
}

/// Run one session over an accepted (and, for LDAPS, handshaken) stream.
///
/// Returns `Ok(())` when the session ends normally and `Err` when it ends
/// on a terminal error. Recoverable errors are reported as they happen.
pub async fn serve_connection<S>(
    stream: S,
    ctx: &ConnectionContext,
    dispatcher: &Dispatcher,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    loop {
        let packet = match ber::read_packet(&mut reader).await {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                debug!("Client {} disconnected", ctx.peer);
                return Ok(());
            }
            Err(BerError::Io(e)) if is_benign_tls_closure_error(&e) => {
                debug!(
                    "Connection from {} closed without close_notify: {}",
                    ctx.peer, e
                );
                return Ok(());
            }
            Err(BerError::Io(e)) => return Err(AppError::Io(e)),
            Err(e) if e.is_recoverable() => {
                report(ctx, &AppError::Ber(e));
                continue;
            }
            Err(e) => return Err(AppError::Ber(e)),
        };

        if ctx.server.log_packets {
            trace!("Inbound packet from {}:\n{}", ctx.peer, packet.dump());
        }

        if packet.children.is_empty() {
            return Err(AppError::WrongProtocol);
        }

        let envelope = match Envelope::parse(&packet) {
            Ok(envelope) => envelope,
            Err(e) => {
                report(ctx, &e);
                continue;
            }
        };

        let tag = envelope.operation.tag;
        if !envelope.is_routable() {
            if tag == op::UNBIND_REQUEST {
                debug!("Client {} sent unbind", ctx.peer);
            } else {
                debug!(
                    "Ignoring non-routable operation {} ({:?}, constructed: {}) from {}",
                    tag, envelope.operation.class, envelope.operation.constructed, ctx.peer
                );
            }
            continue;
        }

        debug!(
            "Message ID: {}, Op: {} from {}",
            envelope.message_id,
            op::name(tag),
            ctx.peer
        );

        let response = match dispatcher
            .dispatch(ctx, tag, envelope.message_id, envelope.operation)
            .await
        {
            Dispatch::Unhandled => {
                info!(
                    "No handler for operation {} ({}) from {}",
                    tag,
                    op::name(tag),
                    ctx.peer
                );
                continue;
            }
            Dispatch::Handled(response) => response,
            Dispatch::Failed { response, error } => {
                report(ctx, &error);
                response
            }
        };

        write_response(&mut writer, ctx, &response).await?;
        if response.close {
            debug!("Closing connection from {} at handler request", ctx.peer);
            let _ = writer.shutdown().await;
            return Ok(());
        }
    }
}

async fn write_response<W>(
    writer: &mut W,
    ctx: &ConnectionContext,
    response: &HandlerResponse,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for (index, message) in response.messages.iter().enumerate() {
        if ctx.server.log_packets {
            trace!("Outbound packet to {}:\n{}", ctx.peer, message.dump());
        }
        let bytes = message.to_bytes();
        debug!(
            "Writing LDAP message {}/{}: {} bytes",
            index + 1,
            response.messages.len(),
            bytes.len()
        );
        writer.write_all(&bytes).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::{Class, Packet};
    use crate::memory_db::MemoryDirectoryStore;
    use crate::protocol::fixtures::{bind_request, search_request};
    use crate::schema::{SchemaCatalog, SchemaHandle};
    use tokio::io::{AsyncReadExt, DuplexStream};

    async fn seeded_context() -> ConnectionContext {
        let store = MemoryDirectoryStore::seeded("admin").await.unwrap();
        let server = ServerContext::new(Arc::new(store), SchemaHandle::new(SchemaCatalog::standard()))
            .with_packet_logging(true);
        ConnectionContext::new(Arc::new(server), "test-peer", TRANSPORT_PLAIN)
    }

    fn message(message_id: i64, operation: Packet) -> Vec<u8> {
        Packet::sequence("LDAPMessage")
            .with_child(Packet::integer(message_id, "messageID"))
            .with_child(operation)
            .to_bytes()
    }

    /// Spawn a session on one end of an in-memory pipe and return the other.
    async fn start() -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let ctx = seeded_context().await;
        let handle = tokio::spawn(async move {
            let dispatcher = Dispatcher::standard();
            serve_connection(server, &ctx, &dispatcher).await
        });
        (client, handle)
    }

    async fn read_message(client: &mut DuplexStream) -> Packet {
        ber::read_packet(client).await.unwrap().unwrap()
    }

    fn result_code(message: &Packet) -> i64 {
        message.child(1).unwrap().child(0).unwrap().as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_bind_then_search_on_one_session() {
        let (mut client, handle) = start().await;

        client.write_all(&message(1, bind_request("admin", "admin"))).await.unwrap();
        let bind = read_message(&mut client).await;
        assert_eq!(bind.child(0).unwrap().as_i64().unwrap(), 1);
        assert_eq!(bind.child(1).unwrap().tag, op::BIND_RESPONSE);
        assert_eq!(result_code(&bind), 0);

        client
            .write_all(&message(2, search_request("cn=Users,dc=example,dc=org", 1, &[])))
            .await
            .unwrap();
        let first = read_message(&mut client).await;
        let second = read_message(&mut client).await;
        let done = read_message(&mut client).await;
        assert_eq!(first.child(1).unwrap().tag, op::SEARCH_RESULT_ENTRY);
        assert_eq!(second.child(1).unwrap().tag, op::SEARCH_RESULT_ENTRY);
        assert_eq!(done.child(1).unwrap().tag, op::SEARCH_RESULT_DONE);
        assert_eq!(result_code(&done), 0);

        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failed_bind_closes_session() {
        let (mut client, handle) = start().await;

        client.write_all(&message(1, bind_request("admin", "wrong"))).await.unwrap();
        let bind = read_message(&mut client).await;
        assert_eq!(result_code(&bind), 49);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_empty_packet_is_wrong_protocol() {
        let (mut client, handle) = start().await;
        client.write_all(&[0x30, 0x00]).await.unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(AppError::WrongProtocol)));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session() {
        let (mut client, handle) = start().await;

        // Outer length is honest, inner INTEGER claims 5 octets but has 1.
        client.write_all(&[0x30, 0x03, 0x02, 0x05, 0x01]).await.unwrap();
        // Envelope without an operation.
        client
            .write_all(&Packet::sequence("").with_child(Packet::integer(9, "")).to_bytes())
            .await
            .unwrap();

        client.write_all(&message(3, bind_request("admin", "admin"))).await.unwrap();
        let bind = read_message(&mut client).await;
        assert_eq!(bind.child(0).unwrap().as_i64().unwrap(), 3);
        assert_eq!(result_code(&bind), 0);

        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unbind_and_unknown_operations_are_ignored() {
        let (mut client, handle) = start().await;

        client
            .write_all(&message(1, Packet::primitive(Class::Application, op::UNBIND_REQUEST, Vec::new(), "Unbind")))
            .await
            .unwrap();
        // DelRequest has no handler.
        client
            .write_all(&message(2, Packet::constructed(Class::Application, 10, "Del Request")))
            .await
            .unwrap();
        client.write_all(&message(3, bind_request("admin", "admin"))).await.unwrap();

        let bind = read_message(&mut client).await;
        assert_eq!(bind.child(0).unwrap().as_i64().unwrap(), 3);

        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_handler_error_keeps_session() {
        let (mut client, handle) = start().await;

        // A bind with a missing password field fails to decode.
        let broken = Packet::constructed(Class::Application, op::BIND_REQUEST, "Bind Request")
            .with_child(Packet::integer(3, "version"))
            .with_child(Packet::octet_string("admin", "name"));
        client.write_all(&message(1, broken)).await.unwrap();
        client.write_all(&message(2, bind_request("admin", "admin"))).await.unwrap();

        let bind = read_message(&mut client).await;
        assert_eq!(bind.child(0).unwrap().as_i64().unwrap(), 2);

        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_truncated_frame_ends_session() {
        let (mut client, handle) = start().await;
        client.write_all(&[0x30, 0x10, 0x02]).await.unwrap();
        drop(client);
        assert!(matches!(
            handle.await.unwrap(),
            Err(AppError::Ber(BerError::UnexpectedEof))
        ));
    }
}
