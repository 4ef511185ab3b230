//! TCP IPC server: accept loop and per-connection handler.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusConnection, LocalBus, LocalConnection, Signal};
use crate::ipc::codec::{
    decode, encode, read_frame, write_frame, Request, MSG_ERROR, MSG_HELLO, MSG_REQUEST,
    MSG_RESPONSE, MSG_SIGNAL,
};
use crate::types::{Error, IpcConfig, ObjectPath};

/// IPC server exposing a `LocalBus` over TCP.
#[derive(Debug)]
pub struct IpcServer {
    bus: LocalBus,
    addr: SocketAddr,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl IpcServer {
    pub fn new(bus: LocalBus, addr: SocketAddr, ipc_config: IpcConfig) -> Self {
        Self {
            bus,
            addr,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    /// Run the server until cancelled or a fatal error occurs.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener).await
    }

    /// Like `serve`, on an already bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            "IPC server listening on {} (max_connections={})",
            listener.local_addr()?,
            self.ipc_config.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.ipc_config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    let (connection, signals) = self.bus.connect();
                    tracing::debug!(
                        "IPC connection from {} as {:?} (active={})",
                        peer,
                        connection,
                        self.ipc_config.max_connections - conn_semaphore.available_permits(),
                    );
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        let result = handle_connection(
                            stream,
                            connection.clone(),
                            signals,
                            cancel,
                            ipc_config,
                            permit,
                        )
                        .await;
                        // The peer leaves the bus however the connection ended.
                        connection.close();
                        if let Err(e) = result {
                            tracing::warn!("Connection from {} error: {}", peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

fn error_payload(id: &str, code: &str, message: String) -> Value {
    json!({
        "id": id,
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

fn signal_payload(signal: &Signal) -> Value {
    json!({
        "path": signal.path,
        "interface": signal.interface,
        "member": signal.member,
        "body": signal.body,
    })
}

/// Handle a single TCP connection: greet, then read requests → bus calls →
/// replies, pushing the peer's signals in between.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    connection: LocalConnection,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let write_timeout = Duration::from_secs(ipc_config.write_timeout_secs);

    let unique_name = connection.unique_name().unwrap_or_default();
    let hello = encode(&json!({ "unique_name": unique_name }))?;
    timed_write(&mut writer, MSG_HELLO, &hello, write_timeout).await?;

    // Frames are read on their own task so a signal wakeup never interrupts a
    // partially read frame.
    let (frame_tx, mut frames) = mpsc::channel(16);
    let max_frame_bytes = ipc_config.max_frame_bytes;
    let reader_task = tokio::spawn(async move {
        loop {
            let frame = read_frame(&mut reader, max_frame_bytes).await;
            let done = !matches!(frame, Ok(Some(_)));
            if frame_tx.send(frame).await.is_err() || done {
                break;
            }
        }
    });

    let result = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(signal) = signals.recv() => {
                    write_signal(&mut writer, &signal, write_timeout).await?;
                }
                frame = frames.recv() => {
                    let (msg_type, payload) = match frame {
                        Some(Ok(Some(frame))) => frame,
                        Some(Err(e)) => return Err(e),
                        Some(Ok(None)) | None => break,
                    };

                    let (reply_type, reply) = match msg_type {
                        MSG_REQUEST => handle_request(&connection, &payload).await,
                        other => (
                            MSG_ERROR,
                            error_payload(
                                "",
                                "INVALID_ARGUMENT",
                                format!("Unexpected message type: 0x{:02X}", other),
                            ),
                        ),
                    };

                    // Signals raised by the call go out before its reply.
                    while let Ok(signal) = signals.try_recv() {
                        write_signal(&mut writer, &signal, write_timeout).await?;
                    }
                    let encoded = encode(&reply)?;
                    timed_write(&mut writer, reply_type, &encoded, write_timeout).await?;
                }
            }
        }
        Ok::<(), std::io::Error>(())
    }
    .await;

    reader_task.abort();
    result
}

async fn handle_request(connection: &LocalConnection, payload: &[u8]) -> (u8, Value) {
    let request: Request = match decode(payload) {
        Ok(request) => request,
        Err(e) => {
            return (
                MSG_ERROR,
                error_payload("", "INVALID_ARGUMENT", format!("Invalid request: {}", e)),
            )
        }
    };

    let result = match ObjectPath::from_string(request.path.clone()) {
        Ok(path) => {
            connection
                .call(request.destination.as_deref(), &path, &request.method, request.body)
                .await
        }
        Err(e) => Err(Error::validation(format!("{}: {}", e, request.path))),
    };

    match result {
        Ok(body) => (
            MSG_RESPONSE,
            json!({
                "id": request.id,
                "ok": true,
                "body": body,
            }),
        ),
        Err(e) => {
            tracing::debug!(
                "ipc_call_failed: path={} method={} error={}",
                request.path,
                request.method,
                e
            );
            (
                MSG_ERROR,
                error_payload(&request.id, e.to_ipc_error_code(), e.to_string()),
            )
        }
    }
}

async fn write_signal(
    writer: &mut OwnedWriteHalf,
    signal: &Signal,
    timeout: Duration,
) -> std::io::Result<()> {
    let encoded = encode(&signal_payload(signal))?;
    timed_write(writer, MSG_SIGNAL, &encoded, timeout).await
}

/// Write a frame with a timeout. Returns an error if the write takes too long
/// (prevents slow consumers from holding connections indefinitely).
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({}s), dropping connection", timeout.as_secs());
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
