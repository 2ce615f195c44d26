//! TCP listener for client connections.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::SharedBroker;

/// Accepts client connections and hands each one to the broker.
pub struct BrokerServer {
    config: ServerConfig,
    listener: TcpListener,
    connection_semaphore: Arc<Semaphore>,
}

impl BrokerServer {
    /// Binds the listener described by the configuration.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!(addr = %listener.local_addr()?, "registry broker listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            config,
            listener,
            connection_semaphore,
        })
    }

    /// Returns the bound address (useful when the configured port was 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs the accept loop indefinitely, spawning one task per connection.
    /// Accept errors are logged and survived.
    pub async fn run(&self, broker: SharedBroker) -> ServerResult<()> {
        loop {
            let permit = self.connection_semaphore.clone().acquire_owned().await;
            let permit = permit.expect("semaphore should not be closed");

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted connection");
                    let broker = broker.clone();
                    tokio::spawn(async move {
                        broker.handle_connection(stream).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    /// Runs the accept loop until the shutdown future completes.
    pub async fn run_until_shutdown<S>(&self, broker: SharedBroker, shutdown: S) -> ServerResult<()>
    where
        S: std::future::Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(broker) => result,
            _ = shutdown => {
                info!("shutdown signal received");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Broker;

    #[tokio::test]
    async fn bind_on_ephemeral_port() {
        let config = ServerConfig::new("127.0.0.1", 0);
        let server = BrokerServer::bind(config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn run_until_shutdown_stops_on_signal() {
        let config = ServerConfig::new("127.0.0.1", 0);
        let server = BrokerServer::bind(config).await.unwrap();
        let broker = Arc::new(Broker::new("127.0.0.1"));

        // An immediately-ready shutdown future wins the select.
        server
            .run_until_shutdown(broker, async {})
            .await
            .unwrap();
    }
}
