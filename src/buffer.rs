//! Bounded append buffer between the manager and its downstream.
//!
//! Assembled areas collect here until the fill estimate crosses the flush
//! threshold, then the whole chunk is handed to the downstream callback
//! synchronously. If the downstream blocks, the producer blocks; there is
//! no unbounded queue in between. Without a callback the buffer simply
//! accumulates and is drained with [`OutputBuffer::read`].

use std::fmt;
use std::mem;

use crate::area::Area;
use crate::error::Result;

/// Default flush threshold in approximate payload bytes.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1 << 20;

type Callback = Box<dyn FnMut(Vec<Area>) -> Result<()>>;

pub struct OutputBuffer {
    areas: Vec<Area>,
    bytes: usize,
    threshold: usize,
    callback: Option<Callback>,
}

impl OutputBuffer {
    pub fn new() -> OutputBuffer {
        OutputBuffer {
            areas: Vec::new(),
            bytes: 0,
            threshold: DEFAULT_FLUSH_THRESHOLD,
            callback: None,
        }
    }

    /// Change the flush threshold. The threshold bounds worst-case latency
    /// of a single producer call, not a hard memory cap: one oversized
    /// area still lands in the buffer before the next flush.
    pub fn set_threshold(&mut self, bytes: usize) {
        self.threshold = bytes;
    }

    /// Install the downstream callback receiving full chunks.
    pub fn set_callback(&mut self, callback: impl FnMut(Vec<Area>) -> Result<()> + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn push(&mut self, area: Area) {
        self.bytes += area.approx_bytes();
        self.areas.push(area);
    }

    /// Flush if the fill estimate crossed the threshold.
    pub fn possibly_flush(&mut self) -> Result<()> {
        if self.bytes >= self.threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Hand the buffered chunk to the callback. Without a callback the
    /// contents stay put for [`OutputBuffer::read`].
    pub fn flush(&mut self) -> Result<()> {
        if self.areas.is_empty() {
            return Ok(());
        }
        if let Some(callback) = &mut self.callback {
            let chunk = mem::take(&mut self.areas);
            self.bytes = 0;
            callback(chunk)?;
        }
        Ok(())
    }

    /// Take the residual contents.
    pub fn read(&mut self) -> Vec<Area> {
        self.bytes = 0;
        mem::take(&mut self.areas)
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}

impl Default for OutputBuffer {
    fn default() -> OutputBuffer {
        OutputBuffer::new()
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("areas", &self.areas.len())
            .field("bytes", &self.bytes)
            .field("threshold", &self.threshold)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osm::{ItemType, Tags};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn area(id: i64) -> Area {
        let tags: Tags = [("building", "yes")].into_iter().collect();
        Area::new(id, ItemType::Way, tags, Vec::new())
    }

    #[test]
    fn accumulates_without_callback() {
        let mut buffer = OutputBuffer::new();
        buffer.push(area(1));
        buffer.push(area(2));
        buffer.possibly_flush().unwrap();
        buffer.flush().unwrap();
        assert_eq!(buffer.len(), 2);

        let chunk = buffer.read();
        assert_eq!(chunk.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn threshold_hands_chunks_downstream() {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);

        let mut buffer = OutputBuffer::new();
        buffer.set_threshold(1);
        buffer.set_callback(move |chunk| {
            sink.borrow_mut().extend(chunk);
            Ok(())
        });

        buffer.push(area(1));
        buffer.possibly_flush().unwrap();
        assert!(buffer.is_empty());
        assert_eq!(received.borrow().len(), 1);

        buffer.push(area(2));
        buffer.push(area(3));
        buffer.flush().unwrap();
        assert_eq!(received.borrow().len(), 3);
        assert_eq!(received.borrow()[2].orig_id(), 3);
    }

    #[test]
    fn below_threshold_nothing_moves() {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);

        let mut buffer = OutputBuffer::new();
        buffer.set_callback(move |chunk| {
            sink.borrow_mut().extend(chunk);
            Ok(())
        });
        buffer.push(area(1));
        buffer.possibly_flush().unwrap();
        assert_eq!(buffer.len(), 1);
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn callback_failure_propagates() {
        let mut buffer = OutputBuffer::new();
        buffer.set_callback(|_| Err(crate::error::Error::Io(std::io::Error::other("full"))));
        buffer.push(area(1));
        assert!(buffer.flush().is_err());
    }
}
