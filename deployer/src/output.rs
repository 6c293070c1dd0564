//! Streaming of child-process and exec-channel output

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::info;

/// Receives output lines from installers and exec channels
pub trait OutputSink: Send + Sync {
    /// Handle one line produced by `source`
    fn line(&self, source: &str, line: &str);
}

/// Forwards every line to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, source: &str, line: &str) {
        info!("{}: {}", source, line);
    }
}

/// Keeps every line in memory, tagged with its source
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<(String, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the collected `(source, line)` pairs
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl OutputSink for CollectingSink {
    fn line(&self, source: &str, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((source.to_string(), line.to_string()));
        }
    }
}

/// Read `reader` to the end on a dedicated task, line by line
///
/// Lines go to `sink` when one is given and are discarded otherwise; the
/// stream is always drained so the producer never blocks on a full pipe.
/// The task resolves to the number of lines read.
pub fn spawn_line_reader<R>(
    reader: R,
    source: String,
    sink: Option<Arc<dyn OutputSink>>,
) -> JoinHandle<std::io::Result<usize>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut count = 0;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            count += 1;

            if let Some(sink) = &sink {
                let line = String::from_utf8_lossy(&buf);
                sink.line(&source, line.trim_end_matches(['\r', '\n']));
            }
        }

        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_forwards_lines_in_order() {
        let sink = Arc::new(CollectingSink::new());
        let input: &'static [u8] = b"one\r\ntwo\nthree";

        let count = spawn_line_reader(input, "HELM".to_string(), Some(sink.clone()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            sink.lines(),
            vec![
                ("HELM".to_string(), "one".to_string()),
                ("HELM".to_string(), "two".to_string()),
                ("HELM".to_string(), "three".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reader_drains_without_sink() {
        let input: &'static [u8] = b"a\nb\n";
        let count = spawn_line_reader(input, "pod".to_string(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let sink = Arc::new(CollectingSink::new());
        let input: &'static [u8] = b"ok \xff\n";
        spawn_line_reader(input, "pod".to_string(), Some(sink.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink.lines()[0].1, "ok \u{fffd}");
    }
}
