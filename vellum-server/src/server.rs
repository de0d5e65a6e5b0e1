//! Accept loop and server lifecycle.
//!
//! One owned `Server` value carries everything mutable about the process:
//! the repository registry, the session bound, and the shutdown flag. The
//! accept loop waits for session capacity before accepting, so excess
//! clients queue in the listen backlog rather than in memory; flipping the
//! shutdown flag stops accepting while in-flight sessions run to
//! completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use vellum_core::protocol::DEFAULT_IO_TIMEOUT;
use vellum_core::Result;

use crate::manager::RepositoryManager;
use crate::session;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_root: PathBuf,
    pub default_branch: String,
    pub max_sessions: usize,
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            default_branch: "master".to_string(),
            max_sessions: 32,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

pub struct Server {
    config: ServerConfig,
    manager: Arc<RepositoryManager>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let manager = Arc::new(RepositoryManager::new(
            config.data_root.clone(),
            config.default_branch.clone(),
        ));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            manager,
            shutdown,
        }
    }

    pub fn manager(&self) -> Arc<RepositoryManager> {
        self.manager.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop accepting new connections; in-flight sessions finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Accept and serve connections until shutdown is requested.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let sessions = Arc::new(Semaphore::new(self.config.max_sessions));
        let mut tasks = JoinSet::new();

        tracing::info!(
            max_sessions = self.config.max_sessions,
            data_root = %self.config.data_root.display(),
            "accepting connections"
        );

        loop {
            // Catches a shutdown requested before this loop subscribed.
            if *shutdown_rx.borrow() {
                break;
            }

            // Wait for capacity first so pending clients stay in the
            // listen backlog instead of piling up as tasks.
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => break,
                permit = sessions.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => accepted?,
            };

            let manager = self.manager.clone();
            let io_timeout = self.config.io_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                match session::serve_connection(stream, manager, io_timeout).await {
                    Ok(()) => tracing::debug!(%peer, "session closed"),
                    Err(e) => tracing::warn!(%peer, error = %e, "session aborted"),
                }
            });
        }

        drop(listener);
        tracing::info!(in_flight = tasks.len(), "draining sessions");
        while tasks.join_next().await.is_some() {}
        tracing::info!("server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(Server::new(ServerConfig {
            data_root: dir.path().to_path_buf(),
            ..ServerConfig::default()
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run(listener).await })
        };
        server.shutdown();
        runner.await.unwrap().unwrap();
    }
}
