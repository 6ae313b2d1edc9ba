//! Byte stream to line framing
//!
//! Modems interleave command responses, unsolicited result codes and the
//! bare `>` prompt used by two-step commands. [`LineFramer`] turns raw bytes
//! into [`Frame`]s; [`run_reader`] drives it from an async reader.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prompt emitted by the modem when it waits for PDU input
pub const PROMPT: &str = ">";

/// Lines longer than this are discarded
const MAX_LINE_LEN: usize = 4096;

const READ_BUF_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    Prompt,
}

/// Item forwarded by the reader task; an error is always the last item
pub type ReadEvent = Result<Frame, io::Error>;

#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &b in bytes {
            match b {
                b'\r' => {}
                b'\n' => {
                    if let Some(line) = self.take_line() {
                        frames.push(Frame::Line(line));
                    }
                }
                b'>' if self.buf.is_empty() && !self.overflowed => frames.push(Frame::Prompt),
                _ => {
                    if self.buf.len() >= MAX_LINE_LEN {
                        self.overflowed = true;
                        self.buf.clear();
                    }
                    if !self.overflowed {
                        self.buf.push(b);
                    }
                }
            }
        }
        frames
    }

    fn take_line(&mut self) -> Option<String> {
        if std::mem::take(&mut self.overflowed) {
            warn!("Dropped line longer than {} bytes", MAX_LINE_LEN);
            self.buf.clear();
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read until cancelled or the stream fails; end of stream counts as failure
pub async fn run_reader<R>(
    port_name: String,
    mut reader: R,
    tx: mpsc::Sender<ReadEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };

        let err = match read {
            Ok(0) => io::Error::new(io::ErrorKind::UnexpectedEof, "port closed"),
            Ok(n) => {
                for frame in framer.push(&buf[..n]) {
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
                continue;
            }
            Err(e) if is_transient(&e) => continue,
            Err(e) => e,
        };

        debug!("[{}] Reader exiting: {}", port_name, err);
        let _ = tx.send(Err(err)).await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(frames: Vec<Frame>) -> Vec<String> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                Frame::Line(l) => Some(l),
                Frame::Prompt => None,
            })
            .collect()
    }

    #[test]
    fn test_splits_lines_and_drops_empty() {
        let mut framer = LineFramer::new();
        let frames = framer.push(b"\r\nAT\r\n\r\nOK\r\n");
        assert_eq!(lines(frames), vec!["AT", "OK"]);
    }

    #[test]
    fn test_partial_lines_across_pushes() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"+CSQ: 2").is_empty());
        let frames = framer.push(b"0,99\r\nO");
        assert_eq!(lines(frames), vec!["+CSQ: 20,99"]);
        assert_eq!(lines(framer.push(b"K\n")), vec!["OK"]);
    }

    #[test]
    fn test_prompt_only_at_line_start() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"\r\n> "), vec![Frame::Prompt]);

        let mut framer = LineFramer::new();
        let frames = framer.push(b"a>b\r\n");
        assert_eq!(frames, vec![Frame::Line("a>b".to_string())]);
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let mut framer = LineFramer::new();
        let long = vec![b'x'; MAX_LINE_LEN + 10];
        assert!(framer.push(&long).is_empty());
        assert!(framer.push(b"\r\n").is_empty());
        assert_eq!(lines(framer.push(b"OK\r\n")), vec!["OK"]);
    }

    #[tokio::test]
    async fn test_reader_reports_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_reader("test".into(), client, tx, cancel));

        tokio::io::AsyncWriteExt::write_all(&mut server, b"RING\r\n")
            .await
            .unwrap();
        drop(server);

        assert_eq!(rx.recv().await.unwrap().unwrap(), Frame::Line("RING".into()));
        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_skips_transient_errors() {
        let port = tokio_test::io::Builder::new()
            .read(b"+CSQ: 2")
            .read_error(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            .read(b"0,99\r\n")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
            .build();
        let (tx, mut rx) = mpsc::channel(8);

        run_reader("test".into(), port, tx, CancellationToken::new()).await;

        assert_eq!(rx.recv().await.unwrap().unwrap(), Frame::Line("+CSQ: 20,99".into()));
        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(rx.recv().await.is_none());
    }
}
