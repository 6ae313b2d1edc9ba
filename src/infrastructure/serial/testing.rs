//! Scripted modem for unit tests

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

/// Answer every command line read from `stream` with `respond(command)`.
/// Responses use `\n` between lines; an empty response sends nothing.
pub(crate) fn scripted_modem<F>(stream: DuplexStream, respond: F) -> JoinHandle<Vec<String>>
where
    F: Fn(&str) -> String + Send + 'static,
{
    tokio::spawn(async move {
        let (rx, mut tx) = tokio::io::split(stream);
        let mut lines = BufReader::new(rx).lines();
        let mut seen = Vec::new();

        while let Ok(Some(line)) = lines.next_line().await {
            let command = line.trim().to_string();
            if command.is_empty() {
                continue;
            }
            let reply = respond(&command);
            seen.push(command);
            if reply.is_empty() {
                continue;
            }
            let wire = format!("{}\r\n", reply.replace('\n', "\r\n"));
            if tx.write_all(wire.as_bytes()).await.is_err() {
                break;
            }
        }
        seen
    })
}
