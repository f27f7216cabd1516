use std::{
    io::{self, BufRead, BufReader, ErrorKind, Read},
    sync::mpsc::{self, Receiver, SyncSender, TrySendError},
};

use tracing::{debug, trace};

use crate::utils::threads::spawn_named_thread;

const READ_BUFFER_SIZE: usize = 4096;
/// Lines kept while nobody polls. Once full, new lines are dropped instead of blocking the
/// reader, which would in turn block the process on a full stderr pipe.
const MAX_PENDING_LINES: usize = 1024;

/// Splits a byte stream into lines. Both `\n` and `\r` terminate a line because
/// progress-reporting tools such as ffmpeg rewrite their status line with `\r`.
/// Empty lines are dropped.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = self.take_pending() {
                    lines.push(line);
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub fn finish(mut self) -> Option<String> {
        self.take_pending()
    }

    fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Spawns a thread reading `stream` until it is closed, sending each line through the returned
/// channel. Consumers read with `try_recv` so they never wait on the process. At most
/// [`MAX_PENDING_LINES`] lines wait in the channel.
pub(crate) fn spawn_line_reader<R>(stream: R, pid: u32) -> io::Result<Receiver<String>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(MAX_PENDING_LINES);
    spawn_named_thread(format!("stderr reader {pid}"), move || {
        read_lines(stream, tx, pid)
    })?;
    Ok(rx)
}

fn read_lines<R: Read>(mut stream: R, tx: SyncSender<String>, pid: u32) {
    let mut splitter = LineSplitter::default();
    let mut dropped = 0usize;
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let read = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(pid, "stderr stream error: {}", err);
                break;
            }
        };
        for line in splitter.push(&buf[..read]) {
            match tx.try_send(line) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped += 1,
                // Nobody is polling this process anymore.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
    if let Some(line) = splitter.finish() {
        if let Err(TrySendError::Full(_)) = tx.try_send(line) {
            dropped += 1;
        }
    }
    if dropped > 0 {
        debug!(pid, dropped, "stderr lines dropped while the channel was full");
    }
    trace!(pid, "stderr stream closed");
}

/// Spawns a thread forwarding every stdout line of the process to the logs.
pub(crate) fn spawn_output_logger<R>(stream: R, pid: u32) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    spawn_named_thread(format!("stdout logger {pid}"), move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => debug!(pid, "stdout: {}", line),
                Err(err) => {
                    debug!(pid, "stdout stream error: {}", err);
                    break;
                }
            }
        }
    })?;
    Ok(())
}
