// Executor and probe seams.
//
// The state machine never blocks on a collaborator directly: a method
// executor hands back a channel of progress events and watches a cancel
// signal, and a verification probe hands back a one-shot report. Long-running
// work lives on the collaborator's side of the channel.

use crate::decision::Technique;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Cooperative cancellation flag shared between the state machine and an
/// executor. Executors check it at safe checkpoints (chunk or pass
/// boundaries) and stop writing once raised.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress stream element reported by a method executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress {
        pass_index: u32,
        bytes_written: u64,
        total_bytes: u64,
    },
    /// Terminal: the executor finished all passes.
    Done,
    /// Terminal: the executor failed; the detail lands in the operation's
    /// `error_detail`.
    Error(String),
}

/// External collaborator that performs the sanitization pass.
///
/// `execute` must not block: implementations spawn their own work and
/// return the receiving end of the event stream. Dropping the stream
/// without a terminal event is treated as an executor failure unless the
/// operation was cancelled.
pub trait MethodExecutor: Send + Sync {
    fn execute(
        &self,
        device_path: &str,
        technique: Technique,
        cancel: CancelSignal,
    ) -> mpsc::Receiver<ProgressEvent>;
}

/// Result of the post-sanitization completion check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub passed: bool,
    pub details: Vec<String>,
}

/// External collaborator that checks whether sanitization actually
/// completed. Like the executor, it returns immediately and reports on a
/// one-shot channel.
pub trait VerificationProbe: Send + Sync {
    fn check(&self, device_path: &str, technique: Technique) -> oneshot::Receiver<ProbeReport>;
}

/// Sandbox executor: a real single-pass zero overwrite of a regular file.
///
/// This is the only executable path shipped with the core. It refuses
/// anything that is not a plain file, so it can never touch physical media;
/// hardware secure-erase and cryptographic erase are simulated as the same
/// overwrite on sandbox images.
pub struct FileOverwriteExecutor {
    chunk_size: usize,
}

impl FileOverwriteExecutor {
    pub fn new() -> Self {
        Self {
            chunk_size: 1024 * 1024,
        }
    }

    /// Smaller chunks mean more frequent progress events; used by tests.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    fn overwrite(
        path: &str,
        chunk_size: usize,
        cancel: &CancelSignal,
        tx: &mpsc::Sender<ProgressEvent>,
    ) -> std::io::Result<bool> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::other(format!(
                "{path} is not a regular file; the sandbox executor refuses raw devices"
            )));
        }
        let total_bytes = metadata.len();

        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(0))?;

        let zeros = vec![0u8; chunk_size];
        let mut written = 0u64;

        while written < total_bytes {
            if cancel.is_cancelled() {
                debug!(path, written, "overwrite cancelled at chunk boundary");
                file.sync_all()?;
                return Ok(false);
            }

            let to_write = std::cmp::min(chunk_size as u64, total_bytes - written) as usize;
            file.write_all(&zeros[..to_write])?;
            written += to_write as u64;

            // Receiver gone means the operation is being torn down.
            if tx
                .blocking_send(ProgressEvent::Progress {
                    pass_index: 0,
                    bytes_written: written,
                    total_bytes,
                })
                .is_err()
            {
                return Ok(false);
            }
        }

        file.sync_all()?;
        Ok(true)
    }
}

impl Default for FileOverwriteExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodExecutor for FileOverwriteExecutor {
    fn execute(
        &self,
        device_path: &str,
        technique: Technique,
        cancel: CancelSignal,
    ) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(64);
        let path = device_path.to_string();
        let chunk_size = self.chunk_size;

        tokio::task::spawn_blocking(move || {
            if !technique.is_executable() {
                let _ = tx.blocking_send(ProgressEvent::Error(format!(
                    "technique {technique} has no executable action"
                )));
                return;
            }
            match Self::overwrite(&path, chunk_size, &cancel, &tx) {
                Ok(true) => {
                    let _ = tx.blocking_send(ProgressEvent::Done);
                }
                Ok(false) => {
                    // Cancelled or torn down: end the stream without a
                    // terminal event; the state machine already holds the
                    // terminal state.
                }
                Err(e) => {
                    warn!(path, error = %e, "sandbox overwrite failed");
                    let _ = tx.blocking_send(ProgressEvent::Error(e.to_string()));
                }
            }
        });

        rx
    }
}

/// Sandbox probe: reads the first block, the last block, and a set of
/// randomly chosen offsets, and confirms every sampled byte reads back
/// zero. Random sampling keeps a partial overwrite from hiding behind a
/// fixed sampling grid.
pub struct ZeroFillProbe {
    sample_count: usize,
}

impl ZeroFillProbe {
    pub fn new() -> Self {
        Self { sample_count: 64 }
    }

    fn sample(path: &str, sample_count: usize) -> std::io::Result<ProbeReport> {
        use rand::Rng;

        let metadata = std::fs::metadata(path)?;
        let len = metadata.len();
        if len == 0 {
            return Ok(ProbeReport {
                passed: true,
                details: vec!["empty media; nothing to verify".to_string()],
            });
        }

        let mut offsets = vec![0u64, len.saturating_sub(512)];
        let mut rng = rand::thread_rng();
        offsets.extend((0..sample_count).map(|_| rng.gen_range(0..len)));

        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut buf = [0u8; 512];
        let mut sampled = 0usize;

        for offset in offsets {
            file.seek(SeekFrom::Start(offset))?;
            let want = std::cmp::min(buf.len() as u64, len - offset) as usize;
            file.read_exact(&mut buf[..want])?;
            sampled += want;

            if let Some(position) = buf[..want].iter().position(|&b| b != 0) {
                return Ok(ProbeReport {
                    passed: false,
                    details: vec![format!(
                        "non-zero byte at offset {} after overwrite",
                        offset + position as u64
                    )],
                });
            }
        }

        Ok(ProbeReport {
            passed: true,
            details: vec![format!(
                "sampled {sampled} bytes at {} offsets; all zero",
                sample_count + 2
            )],
        })
    }
}

impl Default for ZeroFillProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationProbe for ZeroFillProbe {
    fn check(&self, device_path: &str, _technique: Technique) -> oneshot::Receiver<ProbeReport> {
        let (tx, rx) = oneshot::channel();
        let path = device_path.to_string();
        let sample_count = self.sample_count;

        tokio::task::spawn_blocking(move || {
            let report = match Self::sample(&path, sample_count) {
                Ok(report) => report,
                Err(e) => ProbeReport {
                    passed: false,
                    details: vec![format!("verification read failed: {e}")],
                },
            };
            let _ = tx.send(report);
        });

        rx
    }
}
