//! Coordinator network layer: accepts TCP connections and serves framed
//! request/response traffic for players and workers.

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::service::{ConnectionState, Coordinator};
use log::{debug, error, info, warn};
use shared::protocol::{read_packet, write_packet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Main server coordinating the listener and the tick scheduler.
pub struct Server {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
}

impl Server {
    pub async fn bind(config: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let coordinator = Arc::new(Coordinator::new(config)?);
        let listener = TcpListener::bind(&config.bind).await?;
        info!("Coordinator listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            coordinator,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CoordinatorError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Spawns the task that queues tick tasks
    fn spawn_scheduler(&self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move { coordinator.scheduler.run(shutdown).await })
    }

    /// Spawns the task that serves one connection until it closes
    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, shutdown: watch::Receiver<bool>) {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            debug!("Connection from {}", addr);
            serve_connection(&coordinator, stream, addr, shutdown).await;
            debug!("Connection from {} closed", addr);
        });
    }

    /// Accepts connections until `shutdown` flips to true, then closes the
    /// task channel.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoordinatorError> {
        let scheduler = self.spawn_scheduler(shutdown.clone());

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Could not set TCP_NODELAY for {}: {}", addr, e);
                            }
                            self.spawn_connection(stream, addr, shutdown.clone());
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Coordinator shutting down");
        self.coordinator.channel.close();
        if let Err(e) = scheduler.await {
            error!("Tick scheduler task panicked: {}", e);
        }
        Ok(())
    }
}

async fn serve_connection(
    coordinator: &Coordinator,
    mut stream: TcpStream,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connection = ConnectionState::default();

    loop {
        let packet = tokio::select! {
            read = read_packet(&mut stream) => read,
            _ = shutdown.changed() => break,
        };

        let packet = match packet {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(e) => {
                warn!("Dropping connection from {}: {}", addr, e);
                break;
            }
        };

        let response = coordinator.handle(packet, &mut connection).await;
        if let Err(e) = write_packet(&mut stream, &response).await {
            warn!("Failed to answer {}: {}", addr, e);
            break;
        }
    }

    coordinator.disconnect(connection);
}
