//! Queue transports.
//!
//! [`JsonLinesQueue`] / [`JsonLinesSink`] speak newline-delimited JSON over
//! any async reader and writer (stdin and stdout in the binary).
//! [`ChannelQueue`] / [`ChannelSink`] use `tokio::sync::mpsc` for
//! embedding the worker in another process or a test.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc;

use crate::messages::{JobMessage, JobOutcome};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode outcome: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Outcome channel closed")]
    Closed,
}

/// One item taken off the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A well-formed job message.
    Job(JobMessage),
    /// A message that could not be decoded but names its job, so it can
    /// still be answered.
    Malformed { job_id: String, reason: String },
}

#[async_trait]
pub trait JobQueue: Send {
    /// The next delivery, or `None` once the queue is exhausted.
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError>;
}

#[async_trait]
pub trait OutcomeSink: Send {
    async fn publish(&mut self, outcome: &JobOutcome) -> Result<(), TransportError>;
}

/// Decode one queue line. Blank lines and undecodable lines without a
/// recoverable `job_id` yield `None`.
pub fn decode_line(line: &str) -> Option<Delivery> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<JobMessage>(line) {
        Ok(message) => Some(Delivery::Job(message)),
        Err(e) => {
            let job_id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|value| value.get("job_id")?.as_str().map(str::to_string))
                .filter(|id| !id.is_empty());
            match job_id {
                Some(job_id) => Some(Delivery::Malformed {
                    job_id,
                    reason: format!("Malformed job message: {e}"),
                }),
                None => {
                    tracing::warn!(error = %e, raw_message = %line, "Dropping undecodable queue message");
                    None
                }
            }
        }
    }
}

/// Job messages read as JSON lines.
pub struct JsonLinesQueue<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> JsonLinesQueue<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> JobQueue for JsonLinesQueue<R> {
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        while let Some(line) = self.lines.next_line().await? {
            if let Some(delivery) = decode_line(&line) {
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }
}

/// Outcomes written as JSON lines, flushed after each one.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> OutcomeSink for JsonLinesSink<W> {
    async fn publish(&mut self, outcome: &JobOutcome) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Job messages received over an mpsc channel.
pub struct ChannelQueue {
    receiver: mpsc::Receiver<Delivery>,
}

impl ChannelQueue {
    pub fn new(receiver: mpsc::Receiver<Delivery>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        Ok(self.receiver.recv().await)
    }
}

/// Outcomes sent over an mpsc channel.
pub struct ChannelSink {
    sender: mpsc::Sender<JobOutcome>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<JobOutcome>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl OutcomeSink for ChannelSink {
    async fn publish(&mut self, outcome: &JobOutcome) -> Result<(), TransportError> {
        self.sender
            .send(outcome.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const JOB: &str = r#"{"job_id":"J1","reference_asset":"avatars/x","quantity":1,"seed":42,"prompt":"p","aspect_ratio":"square_1x1"}"#;

    #[test]
    fn decode_valid_line() {
        assert_matches!(decode_line(JOB), Some(Delivery::Job(m)) if m.job_id == "J1");
    }

    #[test]
    fn decode_recovers_job_id_from_bad_message() {
        let line = r#"{"job_id":"J9","quantity":"lots"}"#;
        assert_matches!(
            decode_line(line),
            Some(Delivery::Malformed { job_id, .. }) if job_id == "J9"
        );
    }

    #[test]
    fn decode_skips_blank_and_anonymous_garbage() {
        assert_eq!(decode_line("   "), None);
        assert_eq!(decode_line("not json"), None);
        assert_eq!(decode_line(r#"{"quantity":1}"#), None);
    }

    #[tokio::test]
    async fn json_lines_queue_reads_until_eof() {
        let input = format!("{JOB}\n\ngarbage\n{{\"job_id\":\"J2\"}}\n");
        let mut queue = JsonLinesQueue::new(input.as_bytes());

        assert_matches!(queue.next().await.unwrap(), Some(Delivery::Job(_)));
        assert_matches!(
            queue.next().await.unwrap(),
            Some(Delivery::Malformed { job_id, .. }) if job_id == "J2"
        );
        assert_matches!(queue.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_lines_sink_writes_one_line_per_outcome() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&JobOutcome::failed("J1", "boom")).await.unwrap();
        sink.publish(&JobOutcome::failed("J2", "boom")).await.unwrap();

        let written = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: JobOutcome = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.job_id, "J1");
    }

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        assert_matches!(
            sink.publish(&JobOutcome::failed("J1", "x")).await,
            Err(TransportError::Closed)
        );
    }
}
