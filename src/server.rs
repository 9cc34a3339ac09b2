//! The listener/acceptor: binds the port, accepts connections,
//! and spawns a dispatcher task per connection.

use std::net::SocketAddrV4;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::connection;
use crate::replica;
use crate::replication::{ReplicationInfo, Role};
use crate::store::Store;

/// State shared by every connection task: the key-value store and the
/// server-wide replication bookkeeping.
pub struct ServerContext {
    pub store: Arc<Store>,
    pub replication: Arc<ReplicationInfo>,
}

pub struct Server {
    config: Config,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let role = if config.replica_of().is_some() {
            Role::Slave
        } else {
            Role::Master
        };
        let ctx = Arc::new(ServerContext {
            store: Arc::new(Store::new()),
            replication: Arc::new(ReplicationInfo::new(role)),
        });
        Self { config, ctx }
    }

    /// Binds the listener and, if configured as a replica, performs the
    /// handshake before accepting any client connections. A bind or
    /// handshake failure is propagated to the caller so `main` can map it
    /// to a non-zero exit code.
    pub async fn run(self) -> anyhow::Result<()> {
        if let Some((host, port)) = self.config.replica_of() {
            let master_link = replica::connect_and_handshake(host, port, self.config.port)
                .await
                .context("replica handshake with master failed")?;
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                replica::stream(master_link, ctx).await;
            });
        }

        let addr = SocketAddrV4::new([127, 0, 0, 1].into(), self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "listening");

        loop {
            let (tcp, peer_addr) = listener.accept().await.context("accept failed")?;
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                connection::run(tcp, peer_addr, ctx).await;
            });
        }
    }
}
