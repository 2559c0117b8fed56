//! Bounded capture of child process output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Keeps the most recent `limit` bytes of a stream.
#[derive(Debug)]
pub(crate) struct OutputCapture {
    limit: usize,
    buf: VecDeque<u8>,
    dropped: u64,
}

impl OutputCapture {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: VecDeque::with_capacity(limit.min(64 * 1024)),
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend(chunk);
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.drain(..excess);
            self.dropped += excess as u64;
        }
    }

    pub(crate) fn truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Captured text (lossy UTF-8) and whether older bytes were dropped.
    pub(crate) fn finish(&mut self) -> (String, bool) {
        let bytes = self.buf.make_contiguous();
        (String::from_utf8_lossy(bytes).into_owned(), self.truncated())
    }
}

pub(crate) type SharedCapture = Arc<Mutex<OutputCapture>>;

pub(crate) fn shared(limit: usize) -> SharedCapture {
    Arc::new(Mutex::new(OutputCapture::new(limit)))
}

/// Copy `reader` into `sink` until EOF or a read error.
///
/// The sink is shared so whatever was read survives if this task is aborted.
pub(crate) async fn pump<R>(mut reader: R, sink: SharedCapture)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(&chunk[..n]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_tail_and_flags_truncation() {
        let mut capture = OutputCapture::new(8);
        capture.push(b"hello ");
        assert!(!capture.truncated());
        capture.push(b"world!");
        let (text, truncated) = capture.finish();
        assert_eq!(text, "o world!");
        assert!(truncated);
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut capture = OutputCapture::new(0);
        capture.push(b"abc");
        assert_eq!(capture.finish(), (String::new(), true));
    }

    #[tokio::test]
    async fn pump_reads_to_eof() {
        let sink = shared(1024);
        pump(&b"residual 1e-3\nresidual 1e-4\n"[..], sink.clone()).await;
        let (text, truncated) = sink.lock().unwrap().finish();
        assert_eq!(text, "residual 1e-3\nresidual 1e-4\n");
        assert!(!truncated);
    }
}
