//! The per-connection command dispatcher.
//!
//! Owns the read buffer for one client connection, drains complete RESP
//! frames out of it, interprets each as a command, and replies. A
//! connection that completes a `PSYNC` handshake is promoted to an
//! attached replica: its write half is handed to the store for
//! propagation and this loop returns without closing the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::clock;
use crate::command::{self, Command, CommandError};
use crate::resp::{self, DecodeError, Value};
use crate::server::ServerContext;
use crate::snapshot;
use crate::store::ReplicaHandle;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("command error: {0}")]
    Command(#[from] CommandError),
}

const READ_CHUNK: usize = 4096;

/// Runs the dispatcher loop for one accepted connection until the peer
/// closes it, a protocol error occurs, or it is promoted to a replica.
pub async fn run(mut tcp: TcpStream, addr: SocketAddr, ctx: Arc<ServerContext>) {
    info!(%addr, "accepted connection");
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        let n = match tcp.read_buf(&mut buf).await {
            Ok(0) => {
                debug!(%addr, "connection closed by peer");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                warn!(%addr, error = %err, "read error");
                return;
            }
        };
        let _ = n;
        let now_ms = clock::now_ms();

        loop {
            let (frame, consumed) = match resp::decode(&buf) {
                Ok(pair) => pair,
                Err(DecodeError::Incomplete) => break,
                Err(err @ DecodeError::Malformed(_)) => {
                    warn!(%addr, error = %err, "malformed frame, closing connection");
                    return;
                }
            };
            let raw_frame = buf[..consumed].to_vec();
            buf.advance(consumed);

            let command = match command::parse(&frame) {
                Ok(command) => command,
                Err(err) => {
                    warn!(%addr, error = %err, "bad command, closing connection");
                    return;
                }
            };

            if matches!(command, Command::Psync { .. }) {
                match handle_psync(&mut tcp, &ctx).await {
                    Ok(()) => {
                        info!(%addr, "connection promoted to replica");
                        let (_read_half, write_half) = tcp.into_split();
                        ctx.store
                            .attach_replica(ReplicaHandle::new(addr, write_half))
                            .await;
                    }
                    Err(err) => warn!(%addr, error = %err, "psync failed"),
                }
                return;
            }

            if let Err(err) = handle_command(command, &raw_frame, now_ms, &ctx, &mut tcp).await {
                warn!(%addr, error = %err, "error handling command, closing connection");
                return;
            }
        }
    }
}

async fn handle_command(
    command: Command,
    raw_frame: &[u8],
    now_ms: i64,
    ctx: &ServerContext,
    tcp: &mut TcpStream,
) -> Result<(), ConnectionError> {
    let is_write = command.is_write();

    let reply = match command {
        Command::Ping => Value::simple_string("PONG"),
        Command::Echo(msg) => Value::bulk_string(msg),
        Command::Set { key, value, px_ms } => {
            let expires_at_ms = px_ms.map(|ms| now_ms + ms);
            ctx.store
                .set_and_propagate(key, value, expires_at_ms, raw_frame)
                .await;
            Value::simple_string("OK")
        }
        Command::Get(key) => match ctx.store.get(&key, now_ms).await {
            Some(payload) => Value::bulk_string(payload),
            None => Value::Null,
        },
        Command::Info(_section) => Value::bulk_string(ctx.replication.info_body()),
        Command::ReplConf(_args) => Value::simple_string("OK"),
        Command::Psync { .. } => unreachable!("handled by handle_psync before reaching here"),
    };

    tcp.write_all(&reply.encode()).await?;

    if is_write {
        ctx.replication.advance_offset(raw_frame.len());
    }

    Ok(())
}

async fn handle_psync(tcp: &mut TcpStream, ctx: &ServerContext) -> Result<(), ConnectionError> {
    let fullresync = Value::simple_string(format!(
        "FULLRESYNC {} 0",
        ctx.replication.master_replid
    ));
    tcp.write_all(&fullresync.encode()).await?;
    tcp.write_all(&snapshot::framed()).await?;
    Ok(())
}
