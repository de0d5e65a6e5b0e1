//! Per-connection protocol sessions.
//!
//! Each accepted connection carries exactly one session: one opener line,
//! one PUSH/FETCH/PULL exchange, then the connection closes. A protocol
//! error aborts only its own session; objects already written stay (they
//! are content-addressed, so a retry simply deduplicates).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use vellum_core::commit::{self, AncestorWalk};
use vellum_core::protocol::{
    SessionRequest, SyncCommand, Wire, COMMITS_PREFIX, TOKEN_END, TOKEN_OK, UPDATE_REF_PREFIX,
};
use vellum_core::{Error, ObjectId, Result};

use crate::manager::{ManagedRepository, RepositoryManager};

/// Drive one client session over an established stream.
pub async fn serve_connection<S>(
    stream: S,
    manager: Arc<RepositoryManager>,
    io_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut wire = Wire::with_timeout(stream, io_timeout);
    let opener = wire.read_line().await?;
    let request = match SessionRequest::parse(&opener) {
        Ok(request) => request,
        Err(e) => {
            let _ = wire.send_line("ERR unknown command").await;
            return Err(e);
        }
    };
    tracing::debug!(%request, "session opened");

    let managed = manager.get_or_create(&request.repo).await?;
    match request.command {
        SyncCommand::Push => handle_push(&mut wire, &managed, &request.branch).await,
        SyncCommand::Fetch => handle_fetch(&mut wire, &managed, &request.branch).await,
        SyncCommand::Pull => handle_pull(&mut wire, &managed).await,
    }
}

/// Receive commits and blobs, then advance the branch ref as the last,
/// lock-guarded step.
async fn handle_push<S>(
    wire: &mut Wire<S>,
    managed: &ManagedRepository,
    branch: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let client_tip = wire.read_hash().await?;
    let server_tip = managed.repo.refs().tip(branch)?;
    if server_tip == Some(client_tip) {
        wire.send_line(TOKEN_OK).await?;
        return Ok(());
    }
    wire.send_tip(server_tip).await?;

    let line = wire.read_line().await?;
    let count: usize = line
        .strip_prefix(COMMITS_PREFIX)
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| Error::ProtocolViolation(format!("expected COMMITS, got {line:?}")))?;

    let store = managed.repo.store();
    let mut received = 0usize;
    for _ in 0..count {
        let announced = wire.read_hash().await?;
        let raw = wire.read_frame().await?;
        let id = store.put_raw(&raw)?;
        if id != announced {
            return Err(Error::ProtocolViolation(format!(
                "commit announced as {announced} hashed to {id}"
            )));
        }
        // The commit body itself decides how many blobs follow; a client
        // that miscounts is caught by the next framing read.
        let record = commit::load(store, id)?;
        for entry in &record.manifest {
            let blob_announced = wire.read_hash().await?;
            let raw = wire.read_frame().await?;
            let blob_id = store.put_raw(&raw)?;
            if blob_id != entry.id || blob_id != blob_announced {
                return Err(Error::ProtocolViolation(format!(
                    "blob announced as {blob_announced} hashed to {blob_id}"
                )));
            }
            received += 1;
        }
    }

    let line = wire.read_line().await?;
    let rest = line
        .strip_prefix(UPDATE_REF_PREFIX)
        .ok_or_else(|| Error::ProtocolViolation(format!("expected UPDATE_REF, got {line:?}")))?;
    let (ref_branch, tip) = rest
        .trim()
        .split_once(' ')
        .ok_or_else(|| Error::ProtocolViolation(format!("malformed UPDATE_REF {line:?}")))?;
    let new_tip = ObjectId::from_hex(tip.trim())
        .map_err(|_| Error::ProtocolViolation(format!("bad UPDATE_REF hash {tip:?}")))?;
    if !store.exists(new_tip) {
        return Err(Error::ObjectNotFound(new_tip));
    }

    let lock = managed.locks.lock_for(ref_branch).await;
    {
        let _guard = lock.lock().await;
        managed.repo.refs().write(ref_branch, new_tip)?;
    }
    wire.send_line(TOKEN_OK).await?;
    tracing::info!(
        branch = ref_branch,
        tip = %new_tip,
        commits = count,
        blobs = received,
        "push accepted"
    );
    Ok(())
}

/// Send the commits the client is missing; never touches blobs or refs.
async fn handle_fetch<S>(
    wire: &mut Wire<S>,
    managed: &ManagedRepository,
    branch: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let store = managed.repo.store();
    let server_tip = managed.repo.refs().tip(branch)?;
    wire.send_tip(server_tip).await?;
    let client_tip = wire.read_tip().await?;
    if client_tip == server_tip {
        return Ok(());
    }

    let walk = match server_tip {
        Some(tip) => commit::ancestors_until(store, tip, client_tip)?,
        None => AncestorWalk {
            commits: Vec::new(),
            reached_stop: false,
        },
    };

    wire.send_line(&walk.commits.len().to_string()).await?;
    for id in &walk.commits {
        wire.send_line(&id.to_hex()).await?;
        wire.send_frame(&store.get_raw(*id)?).await?;
    }
    tracing::debug!(branch, commits = walk.commits.len(), "fetch served");
    Ok(())
}

/// Serve blob requests by hash; `END` when a hash cannot be supplied.
async fn handle_pull<S>(wire: &mut Wire<S>, managed: &ManagedRepository) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let line = wire.read_line().await?;
    let count: usize = line
        .trim()
        .parse()
        .map_err(|_| Error::ProtocolViolation(format!("expected a blob count, got {line:?}")))?;

    let store = managed.repo.store();
    for served in 0..count {
        let id = wire.read_hash().await?;
        if !store.exists(id) {
            wire.send_line(TOKEN_END).await?;
            tracing::warn!(%id, served, requested = count, "pull stopped on missing blob");
            return Ok(());
        }
        wire.send_frame(&store.get_raw(id)?).await?;
    }
    tracing::debug!(blobs = count, "pull served");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_unknown_command_gets_err_line() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(RepositoryManager::new(dir.path(), "master"));
        let (client, server_side) = duplex(4096);
        let task = tokio::spawn(serve_connection(
            server_side,
            manager,
            Duration::from_secs(1),
        ));

        let mut client = BufReader::new(client);
        client.write_all(b"NUKE project master\n").await.unwrap();
        let mut reply = String::new();
        client.read_line(&mut reply).await.unwrap();
        assert_eq!(reply, "ERR unknown command\n");

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_invalid_repo_name_aborts_session() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(RepositoryManager::new(dir.path(), "master"));
        let (client, server_side) = duplex(4096);
        let task = tokio::spawn(serve_connection(
            server_side,
            manager,
            Duration::from_secs(1),
        ));

        let mut client = BufReader::new(client);
        client.write_all(b"FETCH ..%2f master\n").await.unwrap();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }
}
