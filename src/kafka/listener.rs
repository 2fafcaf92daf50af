// TCP listener module
//
// Accepts Kafka client connections and runs one KafkaSession per connection.
//
// Each connection is split into a reader and a writer:
// - Reader: decodes frames in arrival order, submits them to the session and
//   queues the response receiver for the writer
// - Writer: awaits the queued receivers one at a time and writes responses
//
// Kafka requires: if Request A comes before Request B, Response A must come
// before Response B. The writer awaits receivers in the order the reader queued
// them, so responses leave in receipt order no matter which handler finishes
// first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::sink::SinkExt;
use futures::stream::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use super::context::GatewayContext;
use super::error::{KafkaError, Result};
use super::messages::{KafkaRequest, KafkaResponse, PendingRequest};
use super::protocol::{self, rejection_response, ParsedRequest};
use super::session::KafkaSession;

/// One response slot queued for the writer
struct Outgoing {
    correlation_id: i32,
    response: oneshot::Receiver<KafkaResponse>,
    /// acks=0 produce: the client expects no reply
    silent: bool,
}

/// Bind the plaintext listener from the configuration
pub async fn bind(gateway: &GatewayContext) -> Result<TcpListener> {
    let config = gateway.config();
    let port = config.plaintext_port().ok_or_else(|| {
        KafkaError::InvalidConfig(format!(
            "no PLAINTEXT listener in '{}'",
            config.listeners
        ))
    })?;
    let bind_addr = format!("{}:{}", config.bind_host, port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(bind_addr = %bind_addr, "kafka-bridge listener bound");
    Ok(listener)
}

/// Run the accept loop until `shutdown_rx` flips to true
///
/// Open connections stop reading on shutdown and get up to
/// `shutdown_timeout_ms` to flush responses already queued.
pub async fn run(
    listener: TcpListener,
    gateway: Arc<GatewayContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    info!("kafka-bridge listener started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((socket, peer)) => {
                        info!(peer = %peer, "Accepted connection");
                        let gateway = Arc::clone(&gateway);
                        let shutdown_rx = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, peer, gateway, shutdown_rx).await {
                                warn!(peer = %peer, error = %e, "Error handling connection");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Error accepting connection");
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Listener received shutdown signal");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Serve one client connection until it disconnects or shutdown is signalled
pub async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    gateway: Arc<GatewayContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let config = gateway.config();
    let framed = Framed::new(
        socket,
        LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(4)
            .max_frame_length(config.max_request_size.max(1) as usize)
            .new_codec(),
    );
    let (mut writer, mut reader) = framed.split();

    let session = KafkaSession::new(Arc::clone(&gateway), peer);
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();

    let writer_handle: tokio::task::JoinHandle<Result<()>> = tokio::spawn(async move {
        while let Some(outgoing) = outgoing_rx.recv().await {
            let response = match outgoing.response.await {
                Ok(response) => response,
                Err(_) => {
                    // Every handle answers on drop, so this only happens if the
                    // response was consumed elsewhere
                    error!(
                        peer = %peer,
                        correlation_id = outgoing.correlation_id,
                        "Response channel closed without a response"
                    );
                    continue;
                }
            };
            if outgoing.silent {
                debug!(
                    peer = %peer,
                    correlation_id = outgoing.correlation_id,
                    "acks=0 response suppressed"
                );
                continue;
            }
            let bytes = protocol::encode_response(response)?;
            writer.send(bytes.freeze()).await?;
        }
        Ok(())
    });

    loop {
        let frame = tokio::select! {
            frame = reader.next() => frame,
            _ = shutdown_rx.changed() => {
                debug!(peer = %peer, "Connection stopping for shutdown");
                break;
            }
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(peer = %peer, error = %e, "Error reading frame");
                break;
            }
            None => break,
        };

        let parsed = match protocol::parse_request(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Unreadable request header, closing connection");
                break;
            }
        };

        let outgoing = match parsed {
            ParsedRequest::Request { header, body } => {
                let silent = matches!(body, KafkaRequest::Produce { acks: 0, .. });
                let correlation_id = header.correlation_id;
                let (pending, rx) = PendingRequest::new(header, body);
                session.submit(pending);
                Outgoing {
                    correlation_id,
                    response: rx,
                    silent,
                }
            }
            ParsedRequest::Rejected {
                header,
                error_code,
                error_message,
            } => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(rejection_response(&header, error_code, &error_message));
                Outgoing {
                    correlation_id: header.correlation_id,
                    response: rx,
                    silent: false,
                }
            }
        };

        if outgoing_tx.send(outgoing).is_err() {
            warn!(peer = %peer, "Writer stopped, closing connection");
            break;
        }
    }

    // Fails queued produces and aborts in-flight work; their handles still
    // answer, so the writer can drain what is left
    session.close();
    drop(outgoing_tx);

    let flush_timeout = Duration::from_millis(config.shutdown_timeout_ms.max(0) as u64);
    match tokio::time::timeout(flush_timeout, writer_handle).await {
        Ok(Ok(Err(e))) => debug!(peer = %peer, error = %e, "Writer ended with error"),
        Ok(Err(e)) => warn!(peer = %peer, error = %e, "Writer task failed"),
        Err(_) => warn!(peer = %peer, "Timed out flushing responses"),
        Ok(Ok(Ok(()))) => {}
    }

    info!(peer = %peer, "Connection closed");
    Ok(())
}
