//! Chunked file transfer engine.
//!
//! Once a peer session is open, the engine moves one file across the data
//! channel: a single metadata text frame, then the file bytes as binary
//! frames of at most [`CHUNK_SIZE`](crate::CHUNK_SIZE) bytes, in strict
//! ascending order, back to back, with no per-chunk acknowledgment.
//! Delivery and ordering are the channel's job.
//!
//! Both directions track [`TransferProgress`] through a `tokio::sync::watch`
//! channel so a UI can observe percentage and throughput without polling the
//! engine.
//!
//! The receive side buffers the whole file in memory and hands out a
//! [`ReceivedFile`] exactly when the declared byte count has arrived. There
//! is no resume: a channel that closes mid-transfer aborts it and the
//! partial data is discarded.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::protocol::{self, FileMetadata};
use crate::CHUNK_SIZE;

/// The open peer-to-peer duplex channel carrying file frames.
///
/// This is the data-channel surface of the peer transport primitive, which
/// this crate treats as a given capability with reliable, ordered delivery.
/// `is_open` must reflect the channel state promptly: the send loop polls it
/// between chunks as its sole cancellation mechanism.
pub trait DataChannel {
    /// Whether the channel is currently open for sending.
    fn is_open(&self) -> bool;

    /// Send one text frame.
    fn send_text(&self, text: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Send one binary frame.
    fn send_binary(&self, bytes: &[u8]) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Progress of one transfer direction.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Bytes sent or received so far
    pub bytes_transferred: u64,
    /// Declared total size in bytes
    pub total_bytes: u64,
    /// When the transfer started
    pub started_at: Instant,
}

impl TransferProgress {
    fn new(total_bytes: u64) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
            started_at: Instant::now(),
        }
    }

    /// Progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Throughput in bytes per second since the transfer started.
    #[must_use]
    pub fn speed_bps(&self) -> u64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (self.bytes_transferred as f64 / elapsed) as u64
            }
        } else {
            0
        }
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Sends one file over an open data channel.
#[derive(Debug)]
pub struct FileSender {
    progress_tx: watch::Sender<TransferProgress>,
    progress_rx: watch::Receiver<TransferProgress>,
}

impl Default for FileSender {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSender {
    /// Create a sender.
    #[must_use]
    pub fn new() -> Self {
        let (progress_tx, progress_rx) = watch::channel(TransferProgress::default());
        Self {
            progress_tx,
            progress_rx,
        }
    }

    /// Get a progress receiver for observers.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress_rx.clone()
    }

    /// Send `bytes` as `metadata` over `channel`.
    ///
    /// Sends the metadata text frame, then the file as ordered binary chunks
    /// of at most 16384 bytes. Progress and throughput are recomputed after
    /// every chunk. Each chunk send is a suspension point; the channel's open
    /// state is re-checked between chunks and nothing else cancels the loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotReady`] if the channel is not open when the
    /// call is made (nothing is sent), or [`Error::TransferAborted`] if the
    /// channel leaves the open state mid-loop. Bytes already sent are not
    /// retried or rolled back.
    pub async fn send<C: DataChannel>(
        &self,
        metadata: &FileMetadata,
        bytes: &[u8],
        channel: &C,
    ) -> Result<()> {
        if !channel.is_open() {
            return Err(Error::ChannelNotReady);
        }

        tracing::info!(
            "sending '{}' ({} bytes, {} chunk(s))",
            metadata.name,
            metadata.size,
            metadata.chunk_count()
        );

        channel.send_text(&protocol::encode(metadata)?).await?;

        let mut progress = TransferProgress::new(metadata.size);
        let _ = self.progress_tx.send(progress.clone());

        for chunk in bytes.chunks(CHUNK_SIZE) {
            if !channel.is_open() {
                tracing::warn!(
                    "channel closed after {} of {} bytes, aborting send",
                    progress.bytes_transferred,
                    metadata.size
                );
                return Err(Error::TransferAborted);
            }

            channel
                .send_binary(chunk)
                .await
                .map_err(|_| Error::TransferAborted)?;

            progress.bytes_transferred += chunk.len() as u64;
            let _ = self.progress_tx.send(progress.clone());
        }

        tracing::info!("sent '{}' in {:?}", metadata.name, progress.started_at.elapsed());
        Ok(())
    }
}

/// A fully reassembled file, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Metadata as declared by the sender
    pub metadata: FileMetadata,
    /// The complete file content
    pub data: Vec<u8>,
}

impl ReceivedFile {
    /// Write the file into `dir` under its declared name.
    ///
    /// The declared name is reduced to its final path component first, so a
    /// sender cannot steer the write outside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared name has no usable file component or
    /// the write fails.
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        let name = sanitize_file_name(&self.metadata.name)?;
        let path = dir.join(name);
        tokio::fs::write(&path, &self.data).await?;
        tracing::info!("saved '{}' ({} bytes)", path.display(), self.data.len());
        Ok(path)
    }
}

/// Strip any path components from a sender-declared file name.
fn sanitize_file_name(declared: &str) -> Result<String> {
    let name = Path::new(declared)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidFileName(declared.to_string()))?;

    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidFileName(declared.to_string()));
    }

    Ok(name.to_string())
}

/// An in-progress inbound transfer.
#[derive(Debug)]
struct IncomingFile {
    metadata: FileMetadata,
    /// Ordered, append-only chunk sequence
    chunks: Vec<Vec<u8>>,
    bytes_received: u64,
}

/// Reassembles one file from data-channel frames.
///
/// Feed it every frame in arrival order: text frames through
/// [`handle_text`](Self::handle_text), binary frames through
/// [`handle_binary`](Self::handle_binary). When the declared byte count has
/// arrived the completed file is returned and the receiver resets itself for
/// the next transfer.
#[derive(Debug)]
pub struct FileReceiver {
    incoming: Option<IncomingFile>,
    progress_tx: watch::Sender<TransferProgress>,
    progress_rx: watch::Receiver<TransferProgress>,
}

impl Default for FileReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FileReceiver {
    /// Create a receiver with no transfer in progress.
    #[must_use]
    pub fn new() -> Self {
        let (progress_tx, progress_rx) = watch::channel(TransferProgress::default());
        Self {
            incoming: None,
            progress_tx,
            progress_rx,
        }
    }

    /// Get a progress receiver for observers.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress_rx.clone()
    }

    /// Whether a transfer is currently in progress.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.incoming.is_some()
    }

    /// Handle a text frame: new file metadata.
    ///
    /// Resets the receive state for the declared file. If a prior transfer
    /// was still incomplete its partial data is discarded (logged, since the
    /// sender gets no signal). A zero-byte file completes immediately, as no
    /// binary frames will follow.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid metadata.
    pub fn handle_text(&mut self, frame: &str) -> Result<Option<ReceivedFile>> {
        let metadata: FileMetadata = protocol::decode(frame)?;

        if let Some(dropped) = self.incoming.take() {
            tracing::warn!(
                "new metadata for '{}' discards incomplete transfer of '{}' ({} of {} bytes)",
                metadata.name,
                dropped.metadata.name,
                dropped.bytes_received,
                dropped.metadata.size
            );
        }

        tracing::info!(
            "receiving '{}' ({} bytes, {} chunk(s))",
            metadata.name,
            metadata.size,
            metadata.chunk_count()
        );

        let _ = self.progress_tx.send(TransferProgress::new(metadata.size));

        if metadata.size == 0 {
            return Ok(Some(ReceivedFile {
                metadata,
                data: Vec::new(),
            }));
        }

        self.incoming = Some(IncomingFile {
            metadata,
            chunks: Vec::new(),
            bytes_received: 0,
        });
        Ok(None)
    }

    /// Handle a binary frame: one file chunk.
    ///
    /// Appends the chunk and recomputes progress. Returns the reassembled
    /// file exactly when the received byte count equals the declared size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedChunk`] if no metadata preceded the frame,
    /// or [`Error::TransferOverrun`] if more bytes arrive than were declared
    /// (the partial transfer is discarded).
    pub fn handle_binary(&mut self, frame: &[u8]) -> Result<Option<ReceivedFile>> {
        let Some(incoming) = self.incoming.as_mut() else {
            return Err(Error::UnexpectedChunk);
        };

        incoming.chunks.push(frame.to_vec());
        incoming.bytes_received += frame.len() as u64;

        if incoming.bytes_received > incoming.metadata.size {
            let incoming = self.incoming.take().expect("incoming present");
            return Err(Error::TransferOverrun {
                received: incoming.bytes_received,
                declared: incoming.metadata.size,
            });
        }

        self.progress_tx.send_modify(|progress| {
            progress.bytes_transferred = incoming.bytes_received;
        });

        if incoming.bytes_received == incoming.metadata.size {
            let incoming = self.incoming.take().expect("incoming present");
            let mut data =
                Vec::with_capacity(usize::try_from(incoming.bytes_received).unwrap_or_default());
            for chunk in incoming.chunks {
                data.extend_from_slice(&chunk);
            }
            tracing::info!("received '{}' complete", incoming.metadata.name);
            return Ok(Some(ReceivedFile {
                metadata: incoming.metadata,
                data,
            }));
        }

        Ok(None)
    }

    /// Discard any in-progress transfer, e.g. when the channel closes.
    pub fn reset(&mut self) {
        if let Some(dropped) = self.incoming.take() {
            tracing::warn!(
                "discarding incomplete transfer of '{}' ({} of {} bytes)",
                dropped.metadata.name,
                dropped.bytes_received,
                dropped.metadata.size
            );
        }
    }
}
