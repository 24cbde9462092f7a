//! Lazy stream of batches read from the sensor output.

use sensor_runner_common::MetricPoint;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::delivery::DeliveryChannel;
use crate::influx::Connector;
use crate::parser::{LineOutcome, LineParser};

/// Why a stream stopped yielding batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// The sensor closed its output.
    EndOfStream,
    /// The sensor repeated its previous line.
    Stalled,
    /// Reading the sensor output failed.
    ReadError(String),
}

impl std::fmt::Display for RunEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunEnd::EndOfStream => write!(f, "end of stream"),
            RunEnd::Stalled => write!(f, "stalled output"),
            RunEnd::ReadError(e) => write!(f, "read error: {e}"),
        }
    }
}

/// Reads sensor output line by line and turns each line into a batch.
///
/// Only one line is held in memory at a time.
pub struct BatchStream<'a, R> {
    reader: R,
    parser: &'a mut LineParser,
    line: Vec<u8>,
    end: Option<RunEnd>,
}

impl<'a, R: AsyncBufRead + Unpin> BatchStream<'a, R> {
    pub fn new(reader: R, parser: &'a mut LineParser) -> Self {
        Self {
            reader,
            parser,
            line: Vec::new(),
            end: None,
        }
    }

    /// Next batch, or `None` once the stream has ended.
    pub async fn next_batch(&mut self) -> Option<Vec<MetricPoint>> {
        if self.end.is_some() {
            return None;
        }

        self.line.clear();
        let read = match self.reader.read_until(b'\n', &mut self.line).await {
            Ok(read) => read,
            Err(e) => {
                warn!(error = %e, "Failed to read sensor output");
                self.end = Some(RunEnd::ReadError(e.to_string()));
                return None;
            }
        };

        if read == 0 {
            debug!("Sensor output closed");
            self.end = Some(RunEnd::EndOfStream);
            return None;
        }

        match self.parser.parse_line(&self.line) {
            LineOutcome::Batch(points) => Some(points),
            LineOutcome::Stalled => {
                info!("Sensor output stalled");
                self.end = Some(RunEnd::Stalled);
                None
            }
        }
    }

    /// How the stream ended, once [`next_batch`](Self::next_batch) returned `None`.
    pub fn end(&self) -> Option<&RunEnd> {
        self.end.as_ref()
    }
}

/// Forward every batch of `stream` to `channel` until the stream ends.
///
/// Each batch is fully sent before the next line is read.
pub async fn stream_into<R, C>(
    stream: &mut BatchStream<'_, R>,
    channel: &mut DeliveryChannel<C>,
) -> RunEnd
where
    R: AsyncBufRead + Unpin,
    C: Connector,
{
    while let Some(batch) = stream.next_batch().await {
        channel.send_batch(batch).await;
    }

    stream.end().cloned().unwrap_or(RunEnd::EndOfStream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::mock::MockConnector;
    use crate::fields::{DATABASE_NAME, ERROR_NAMESPACE, default_fields};
    use crate::influx::{ConnectionDescriptor, Transport};

    fn parser() -> LineParser {
        LineParser::new(default_fields(), "test", ERROR_NAMESPACE)
    }

    #[tokio::test]
    async fn test_stream_reads_until_end() {
        let mut parser = parser();
        let input: &[u8] = b"1.0 2 3\n0.5 1 4\n";
        let mut stream = BatchStream::new(input, &mut parser);

        assert_eq!(stream.next_batch().await.map(|b| b.len()), Some(3));
        assert_eq!(stream.next_batch().await.map(|b| b.len()), Some(3));
        assert!(stream.next_batch().await.is_none());
        assert_eq!(stream.end(), Some(&RunEnd::EndOfStream));

        // Stays ended
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let mut parser = parser();
        let input: &[u8] = b"1.0 2 3";
        let mut stream = BatchStream::new(input, &mut parser);

        assert!(stream.next_batch().await.is_some());
        assert!(stream.next_batch().await.is_none());
        assert_eq!(stream.end(), Some(&RunEnd::EndOfStream));
    }

    #[tokio::test]
    async fn test_repeated_line_ends_stream() {
        let mut parser = parser();
        let input: &[u8] = b"1.0 2 3\n1.0 2 3\n0.5 1 4\n";
        let mut stream = BatchStream::new(input, &mut parser);

        assert!(stream.next_batch().await.is_some());
        assert!(stream.next_batch().await.is_none());
        assert_eq!(stream.end(), Some(&RunEnd::Stalled));
    }

    #[tokio::test]
    async fn test_read_error_ends_stream() {
        let mut parser = parser();
        let reader = tokio_test::io::Builder::new()
            .read(b"1.0 2 3\n")
            .read_error(std::io::Error::other("pipe broken"))
            .build();
        let mut stream = BatchStream::new(tokio::io::BufReader::new(reader), &mut parser);

        assert!(stream.next_batch().await.is_some());
        assert!(stream.next_batch().await.is_none());
        assert!(matches!(stream.end(), Some(RunEnd::ReadError(_))));
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let mut parser = parser();
        let reader = tokio_test::io::Builder::new()
            .read(b"1.0 2")
            .read(b" 3\n")
            .build();
        let mut stream = BatchStream::new(tokio::io::BufReader::new(reader), &mut parser);

        let batch = stream.next_batch().await.unwrap();
        assert_eq!(batch[2].measurement(), "sensor.generated_metrics_number");
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decoded_lossily() {
        let mut parser = parser();
        let input: &[u8] = b"1.0 \xff 3\n";
        let mut stream = BatchStream::new(input, &mut parser);

        let batch = stream.next_batch().await.unwrap();
        assert_eq!(
            batch[1].measurement(),
            "sensor.error.sensor.bounded_random_generator"
        );
    }

    #[tokio::test]
    async fn test_lines_differing_in_invalid_bytes_keep_streaming() {
        let mut parser = parser();
        let input: &[u8] = b"1.0 \xff 3\n1.0 \xfe 3\n";
        let mut stream = BatchStream::new(input, &mut parser);

        assert!(stream.next_batch().await.is_some());
        assert!(stream.next_batch().await.is_some());
        assert!(stream.next_batch().await.is_none());
        assert_eq!(stream.end(), Some(&RunEnd::EndOfStream));
    }

    #[tokio::test]
    async fn test_stream_into_sends_each_batch() {
        let connector = MockConnector::default();
        let mut channel = DeliveryChannel::new(connector.clone(), DATABASE_NAME, ERROR_NAMESPACE);
        channel
            .init_connection(
                ConnectionDescriptor::new("localhost", 8086, Transport::Http, DATABASE_NAME),
                false,
            )
            .await
            .unwrap();

        let mut parser = parser();
        let input: &[u8] = b"1.0 2 3\n1.0 2 3\n";
        let mut stream = BatchStream::new(input, &mut parser);

        let end = stream_into(&mut stream, &mut channel).await;

        assert_eq!(end, RunEnd::Stalled);
        assert_eq!(connector.writes().len(), 1);
        assert_eq!(connector.writes()[0].len(), 3);
    }
}
