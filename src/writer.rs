//! Background gzip writer.
//!
//! Serialized output is handed over as byte chunks and compressed on a
//! dedicated thread, so assembly never stalls on the output device. The
//! channel between producer and writer is bounded; `send` blocks once the
//! writer falls behind by `queue_len` chunks.

use std::io::{self, Write};
use std::thread;

use crossbeam::channel::{bounded, Sender};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;

use crate::error::{Error, Result};

/// Default number of chunks buffered between producer and writer thread.
pub const DEFAULT_QUEUE_LEN: usize = 16;

/// A gzip-compressing writer running on its own thread.
///
/// Dropping a `WriteThread` without calling [`finish`](WriteThread::finish)
/// still drains and closes the stream but swallows any write error.
pub struct WriteThread {
    sender: Option<Sender<Vec<u8>>>,
    handle: Option<thread::JoinHandle<io::Result<u64>>>,
}

impl WriteThread {
    /// Spawns the writer thread over `sink`.
    pub fn spawn<W>(sink: W, queue_len: usize) -> Result<WriteThread>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = bounded::<Vec<u8>>(queue_len);
        let handle = thread::Builder::new()
            .name("area-writer".into())
            .spawn(move || -> io::Result<u64> {
                let mut encoder = GzEncoder::new(sink, Compression::default());
                let mut written = 0u64;
                for chunk in receiver {
                    encoder.write_all(&chunk)?;
                    written += chunk.len() as u64;
                }
                encoder.finish()?;
                debug!("write thread done, {written} uncompressed bytes");
                Ok(written)
            })?;
        Ok(WriteThread {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queues a chunk for compression, blocking while the queue is full.
    pub fn send(&self, chunk: Vec<u8>) -> Result<()> {
        let sender = self.sender.as_ref().expect("writer already finished");
        sender.send(chunk).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write thread terminated",
            ))
        })
    }

    /// Closes the stream and waits for the writer thread.
    ///
    /// Returns the number of uncompressed bytes written, or the first i/o
    /// error the writer ran into.
    pub fn finish(mut self) -> Result<u64> {
        self.sender.take();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result.map_err(Error::from),
                Err(_) => Err(Error::Io(io::Error::other("write thread panicked"))),
            },
            None => Ok(0),
        }
    }
}

impl Drop for WriteThread {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
