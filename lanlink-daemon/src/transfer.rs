//! File transfer engine: chunked sends with cooperative pause/resume/cancel,
//! and reassembly of inbound chunks into files in the download directory.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use lanlink_core::chunk::{self, CHUNK_SIZE};
use lanlink_core::protocol::now_timestamp;
use lanlink_core::{Event, MessageKind, TransferId, TransferState};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::node::NodeState;
use crate::transport;

/// How often a paused worker re-checks its flags. Cancellation is observed
/// within this interval even while paused.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Small gap between chunks so one transfer does not saturate the session.
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(10);

/// Cooperative flags for one outbound transfer, checked between chunks only,
/// so chunk boundaries are the only suspension points.
#[derive(Debug, Default)]
pub struct TransferControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl TransferControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Worker for one outbound transfer. Emits progress after every chunk and
/// exactly one terminal `TransferCompleted`, whatever the outcome.
pub async fn run_send(
    state: Arc<NodeState>,
    id: TransferId,
    addr: IpAddr,
    path: PathBuf,
    control: Arc<TransferControl>,
) {
    let outcome = send_file(&state, id, addr, &path, &control).await;
    state.controls.lock().await.remove(&id);
    let (success, message) = match outcome {
        Ok(true) => (true, "Transfer completed successfully".to_string()),
        Ok(false) => (false, "Transfer cancelled".to_string()),
        Err(e) => (false, format!("Transfer failed: {e:#}")),
    };
    if success {
        info!(transfer = %id, %addr, "transfer finished");
    } else {
        warn!(transfer = %id, %addr, %message, "transfer did not finish");
    }
    state.emit(Event::TransferCompleted {
        id,
        success,
        message,
    });
}

/// Ok(true) on full delivery, Ok(false) on cancellation, Err on I/O or
/// session failure.
async fn send_file(
    state: &Arc<NodeState>,
    id: TransferId,
    addr: IpAddr,
    path: &Path,
    control: &TransferControl,
) -> anyhow::Result<bool> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let file_size = metadata.len();
    let filename = path
        .file_name()
        .ok_or_else(|| anyhow!("not a file path: {}", path.display()))?
        .to_string_lossy()
        .into_owned();
    let total_chunks = chunk::total_chunks(file_size, CHUNK_SIZE as u64);

    progress(state, id, 0, file_size, "Starting transfer...".into());

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_sent: u64 = 0;
    let mut chunk_index: u64 = 0;

    while bytes_sent < file_size {
        while control.is_paused() && !control.is_cancelled() {
            tokio::time::sleep(PAUSE_POLL).await;
        }
        if control.is_cancelled() {
            return Ok(false);
        }

        let want = (file_size - bytes_sent).min(CHUNK_SIZE as u64) as usize;
        file.read_exact(&mut buf[..want])
            .await
            .with_context(|| format!("read failed at chunk {chunk_index}"))?;

        let envelope = chunk::chunk_envelope(
            id,
            &filename,
            file_size,
            chunk_index,
            total_chunks,
            &buf[..want],
        );
        if !transport::send(state, addr, envelope).await {
            bail!("no open session to {addr}");
        }

        bytes_sent += want as u64;
        chunk_index += 1;
        let percent = bytes_sent * 100 / file_size;
        progress(
            state,
            id,
            bytes_sent,
            file_size,
            format!("Sending... {percent}%"),
        );
        tokio::time::sleep(INTER_CHUNK_DELAY).await;
    }
    Ok(true)
}

fn progress(state: &NodeState, id: TransferId, bytes_done: u64, bytes_total: u64, status: String) {
    state.emit(Event::TransferProgress {
        id,
        bytes_done,
        bytes_total,
        status,
    });
}

/// Receive one `file_chunk`. Metadata must match the chunk math before the
/// first chunk of an unseen transfer ID allocates the bookkeeping record;
/// the last chunk triggers assembly.
#[allow(clippy::too_many_arguments)]
pub async fn ingest_chunk(
    state: &Arc<NodeState>,
    addr: IpAddr,
    id: TransferId,
    chunk_data: &str,
    chunk_index: u64,
    total_chunks: u64,
    file_size: u64,
    filename: String,
) {
    // file_size and total_chunks are peer-supplied; reject disagreeing
    // values before they seed any bookkeeping.
    if total_chunks == 0 || chunk::total_chunks(file_size, CHUNK_SIZE as u64) != total_chunks {
        warn!(%addr, transfer = %id, file_size, total_chunks, "implausible transfer metadata");
        state.emit(Event::MessageReceived {
            addr,
            kind: MessageKind::FileError,
            content: format!("invalid transfer metadata for {filename}"),
            timestamp: now_timestamp(),
        });
        return;
    }
    let data = match chunk::decode_chunk_data(chunk_data) {
        Ok(d) => d,
        Err(e) => {
            warn!(%addr, transfer = %id, error = %e, "undecodable chunk payload");
            state.emit(Event::MessageReceived {
                addr,
                kind: MessageKind::FileError,
                content: format!("invalid chunk data for {filename}: {e}"),
                timestamp: now_timestamp(),
            });
            return;
        }
    };

    let complete = {
        let mut inbound = state.inbound.lock().await;
        let transfer = inbound.entry(id).or_insert_with(|| {
            debug!(%addr, transfer = %id, %filename, total_chunks, "new inbound transfer");
            TransferState::new(id, filename, addr, file_size, total_chunks)
        });
        transfer.store(chunk_index, data)
    };

    if complete {
        let transfer = state.inbound.lock().await.remove(&id);
        if let Some(transfer) = transfer {
            finish_inbound(state, transfer).await;
        }
    }
}

/// Assemble a completed transfer and write it out. Success and failure both
/// surface on the local message stream, attributed to the source file; the
/// record is gone either way and a retry means resending chunks.
async fn finish_inbound(state: &Arc<NodeState>, transfer: TransferState) {
    let addr = transfer.source_peer;
    let id = transfer.transfer_id;
    let filename = transfer.filename.clone();
    match write_assembled(state, &transfer).await {
        Ok(dest) => {
            info!(%addr, transfer = %id, path = %dest.display(), "file transfer completed");
            state.emit(Event::MessageReceived {
                addr,
                kind: MessageKind::FileCompleted,
                content: filename,
                timestamp: now_timestamp(),
            });
        }
        Err(e) => {
            warn!(%addr, transfer = %id, error = %e, "file assembly failed");
            state.emit(Event::MessageReceived {
                addr,
                kind: MessageKind::FileError,
                content: format!("{filename}: {e:#}"),
                timestamp: now_timestamp(),
            });
        }
    }
}

async fn write_assembled(state: &Arc<NodeState>, transfer: &TransferState) -> anyhow::Result<PathBuf> {
    let bytes = transfer
        .assemble()
        .ok_or_else(|| anyhow!("transfer is missing chunks"))?;
    tokio::fs::create_dir_all(&state.download_dir)
        .await
        .with_context(|| format!("cannot create {}", state.download_dir.display()))?;
    // Keep only the final path component of the advertised name.
    let name = Path::new(&transfer.filename)
        .file_name()
        .ok_or_else(|| anyhow!("unusable filename {:?}", transfer.filename))?;
    let dest = state.download_dir.join(name);
    tokio::fs::write(&dest, &bytes)
        .await
        .with_context(|| format!("cannot write {}", dest.display()))?;
    Ok(dest)
}
