//! Byte pumping between a blocking reader and writer.

use super::{Engine, Halt, Step};
use crate::control::Signal;
use crate::error::ErrorKind;
use std::io::{self, Read, Write};
use tandem_vfs::error::{ErrorKind as VfsErrorKind, Result as VfsResult};
use tandem_vfs::{BoxSyncRead, BoxSyncWrite, FileAddress};
use tokio::sync::{mpsc, watch};

/// An open copy that can be parked and picked up again.
pub(crate) struct Transfer {
    reader: BoxSyncRead,
    writer: BoxSyncWrite,
}

pub(crate) enum Pumped {
    Done,
    /// Pause was requested; the transfer is handed back untouched.
    Paused(Transfer),
    Interrupted,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

/// Copy chunks until the reader runs dry, checking for pause and cancel
/// before each one. Bytes written are reported through `progress`.
///
/// Blocking; run it from [`spawn_blocking`](tokio::task::spawn_blocking).
pub(crate) fn pump(
    mut transfer: Transfer,
    signals: &watch::Receiver<Signal>,
    buffer_size: usize,
    progress: &mpsc::UnboundedSender<u64>,
) -> Pumped {
    let mut buffer = vec![0; buffer_size.max(1)];
    loop {
        match *signals.borrow() {
            Signal::Run => {},
            Signal::Pause => return Pumped::Paused(transfer),
            Signal::Cancel => return Pumped::Interrupted,
        }
        let read = match transfer.reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Pumped::ReadFailed(err),
        };
        if let Err(err) = transfer.writer.write_all(&buffer[..read]) {
            return Pumped::WriteFailed(err);
        }
        let _ = progress.send(read as u64);
    }
    // Some backends only commit on flush.
    match transfer.writer.flush() {
        Ok(()) => Pumped::Done,
        Err(err) => Pumped::WriteFailed(err),
    }
}

impl Engine {
    /// Stream everything from `reader` into `writer`, parking across
    /// pauses. I/O failures come back as the inner error, with this
    /// attempt's bytes taken off the progress counters.
    pub(super) async fn stream(
        &mut self,
        reader: BoxSyncRead,
        writer: BoxSyncWrite,
        source: &FileAddress,
        destination: &FileAddress,
    ) -> Step<VfsResult<u64>> {
        let mut transfer = Transfer { reader, writer };
        let mut moved = 0;
        loop {
            let (progress, mut chunks) = mpsc::unbounded_channel();
            let signals = self.control.subscribe();
            let buffer_size = self.context.options.buffer_size;
            let task = tokio::task::spawn_blocking(move || pump(transfer, &signals, buffer_size, &progress));
            // Ends when the pump returns and drops its sender.
            while let Some(bytes) = chunks.recv().await {
                moved += bytes;
                self.reporter.add_bytes(bytes);
            }
            let pumped = task
                .await
                .map_err(|err| Halt::Failed(exn::Exn::from(ErrorKind::Worker(format!("copy of {source} panicked: {err}")))))?;
            let failure = match pumped {
                Pumped::Done => {
                    tracing::debug!(%source, %destination, bytes = moved, "Copied");
                    return Ok(Ok(moved));
                },
                Pumped::Paused(parked) => {
                    transfer = parked;
                    self.checkpoint().await?;
                    continue;
                },
                Pumped::Interrupted => return Err(Halt::Interrupted),
                Pumped::ReadFailed(err) => VfsErrorKind::io(&err, source),
                Pumped::WriteFailed(err) => VfsErrorKind::io(&err, destination),
            };
            self.reporter.rollback_bytes(moved);
            return Ok(Err(exn::Exn::from(failure)));
        }
    }
}
