//! Replica-side master link: the 4-step handshake and the long-lived
//! streaming loop that follows it.

use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::clock;
use crate::command::{self, Command};
use crate::resp::{self, DecodeError, Value};
use crate::server::ServerContext;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("io error: {0}")]
    Io(#[from] IoError),

    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("master rejected {step}: expected {expected}, got {got:?}")]
    Rejected {
        step: &'static str,
        expected: String,
        got: Value,
    },

    #[error("malformed snapshot framing: {0}")]
    BadSnapshot(String),
}

fn eof(context: &'static str) -> HandshakeError {
    HandshakeError::Io(IoError::new(ErrorKind::UnexpectedEof, context))
}

/// The master connection plus whatever bytes arrived after the snapshot
/// but before the handshake finished reading it. The master is free to
/// pipe a write command into the same segment as the snapshot trailer.
pub struct MasterLink {
    tcp: TcpStream,
    buf: BytesMut,
}

/// Connects to `host:port` and performs the replica-side handshake,
/// checking each step's reply literally. Returns the connected link
/// positioned right after the embedded snapshot, ready for [`stream`].
pub async fn connect_and_handshake(
    host: String,
    port: u16,
    own_port: u16,
) -> Result<MasterLink, HandshakeError> {
    let mut tcp = TcpStream::connect((host.as_str(), port)).await?;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    send_command(&mut tcp, &["PING"]).await?;
    expect_simple_string(&mut tcp, &mut buf, "PING", "PONG").await?;

    send_command(&mut tcp, &["REPLCONF", "listening-port", &own_port.to_string()]).await?;
    expect_simple_string(&mut tcp, &mut buf, "REPLCONF listening-port", "OK").await?;

    send_command(&mut tcp, &["REPLCONF", "capa", "psync2"]).await?;
    expect_simple_string(&mut tcp, &mut buf, "REPLCONF capa", "OK").await?;

    send_command(&mut tcp, &["PSYNC", "?", "-1"]).await?;
    let reply = read_frame(&mut tcp, &mut buf).await?;
    match &reply {
        Value::SimpleString(s) if s.starts_with("FULLRESYNC ") => {
            info!(reply = %s, "received FULLRESYNC");
        }
        other => {
            return Err(HandshakeError::Rejected {
                step: "PSYNC",
                expected: "FULLRESYNC <id> <offset>".to_string(),
                got: other.clone(),
            })
        }
    }

    read_snapshot(&mut tcp, &mut buf).await?;

    Ok(MasterLink { tcp, buf })
}

/// The long-lived receive loop: decodes frames as they arrive and applies
/// them to the local store without replying. Returns
/// when the master closes the connection or sends something unparseable.
pub async fn stream(link: MasterLink, ctx: Arc<ServerContext>) {
    let MasterLink { mut tcp, mut buf } = link;
    info!("replica streaming loop started");

    loop {
        loop {
            match resp::decode(&buf) {
                Ok((frame, consumed)) => {
                    buf.advance(consumed);
                    apply_from_master(&frame, consumed, &ctx).await;
                }
                Err(DecodeError::Incomplete) => break,
                Err(err) => {
                    warn!(error = %err, "malformed frame on master link, closing");
                    return;
                }
            }
        }

        match tcp.read_buf(&mut buf).await {
            Ok(0) => {
                info!("master link closed");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "master link read error");
                return;
            }
        }
    }
}

async fn apply_from_master(frame: &Value, raw_len: usize, ctx: &ServerContext) {
    match command::parse(frame) {
        Ok(Command::Set { key, value, px_ms }) => {
            let now_ms = clock::now_ms();
            let expires_at_ms = px_ms.map(|ms| now_ms + ms);
            ctx.store.set(key, value, expires_at_ms).await;
            ctx.replication.advance_offset(raw_len);
        }
        Ok(_) => {
            // Anything else arriving on the master link (e.g. a REPLCONF
            // GETACK probe) is outside this spec's scope; ignore it.
        }
        Err(err) => warn!(error = %err, "unparseable command from master"),
    }
}

async fn send_command(tcp: &mut TcpStream, parts: &[&str]) -> Result<(), HandshakeError> {
    let frame = Value::command_array(parts.iter().map(|s| s.as_bytes().to_vec()));
    tcp.write_all(&frame.encode()).await?;
    Ok(())
}

/// Reads one complete RESP frame, reading more bytes off the wire as
/// needed and retaining any unconsumed tail in `buf`.
async fn read_frame(tcp: &mut TcpStream, buf: &mut BytesMut) -> Result<Value, HandshakeError> {
    loop {
        match resp::decode(buf) {
            Ok((value, consumed)) => {
                buf.advance(consumed);
                return Ok(value);
            }
            Err(DecodeError::Incomplete) => {
                if tcp.read_buf(buf).await? == 0 {
                    return Err(eof("master closed connection during handshake"));
                }
            }
            Err(err @ DecodeError::Malformed(_)) => return Err(err.into()),
        }
    }
}

async fn expect_simple_string(
    tcp: &mut TcpStream,
    buf: &mut BytesMut,
    step: &'static str,
    expected: &str,
) -> Result<(), HandshakeError> {
    let reply = read_frame(tcp, buf).await?;
    match &reply {
        Value::SimpleString(s) if s == expected => Ok(()),
        _ => Err(HandshakeError::Rejected {
            step,
            expected: expected.to_string(),
            got: reply,
        }),
    }
}

/// Reads the `$<n>\r\n<n bytes>` snapshot framing that follows
/// `FULLRESYNC` and discards its contents: the snapshot is treated as an
/// opaque blob with no RDB reader on the replica side. This framing has no
/// trailing CRLF, so it cannot be read through [`resp::decode`].
async fn read_snapshot(tcp: &mut TcpStream, buf: &mut BytesMut) -> Result<(), HandshakeError> {
    loop {
        if let Some(pos) = find_crlf(buf) {
            if buf.first() != Some(&b'$') {
                return Err(HandshakeError::BadSnapshot(
                    "expected '$' length header".to_string(),
                ));
            }
            let len_str = std::str::from_utf8(&buf[1..pos])
                .map_err(|_| HandshakeError::BadSnapshot("length is not UTF-8".to_string()))?;
            let len: usize = len_str
                .parse()
                .map_err(|_| HandshakeError::BadSnapshot(format!("bad length: {len_str:?}")))?;
            buf.advance(pos + 2);
            return read_exact_buffered(tcp, buf, len).await;
        }

        if tcp.read_buf(buf).await? == 0 {
            return Err(eof("master closed connection while sending snapshot header"));
        }
    }
}

async fn read_exact_buffered(
    tcp: &mut TcpStream,
    buf: &mut BytesMut,
    n: usize,
) -> Result<(), HandshakeError> {
    while buf.len() < n {
        if tcp.read_buf(buf).await? == 0 {
            return Err(eof("master closed connection while sending snapshot body"));
        }
    }
    buf.advance(n);
    Ok(())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == resp::CRLF)
}
