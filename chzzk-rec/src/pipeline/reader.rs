//! Record-oriented reader for subprocess stderr.
//!
//! FFmpeg rewrites its status line with carriage returns (`\r`). When stderr
//! is piped those updates are not newline-delimited, so `lines()` would hold
//! them back. This reader yields records delimited by either `\n` or `\r`.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Upper bound on a single record; longer runs are flushed as-is.
const MAX_RECORD_BYTES: usize = 64 * 1024;

fn is_delimiter(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Yields trimmed, non-empty text records from a byte stream.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    record: Vec<u8>,
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            record: Vec::new(),
        }
    }

    /// Next record, `None` at end of stream. Runs of delimiters produce no
    /// empty records.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(take_record(&mut self.record));
            }

            match available.iter().position(|&b| is_delimiter(b)) {
                Some(idx) => {
                    self.record.extend_from_slice(&available[..idx]);
                    self.reader.consume(idx + 1);
                    if let Some(record) = take_record(&mut self.record) {
                        return Ok(Some(record));
                    }
                }
                None => {
                    let len = available.len();
                    self.record.extend_from_slice(available);
                    self.reader.consume(len);
                    if self.record.len() >= MAX_RECORD_BYTES
                        && let Some(record) = take_record(&mut self.record)
                    {
                        return Ok(Some(record));
                    }
                }
            }
        }
    }
}

fn take_record(buf: &mut Vec<u8>) -> Option<String> {
    let text = String::from_utf8_lossy(buf).trim().to_string();
    buf.clear();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn splits_on_cr_and_lf() {
        let (mut tx, rx) = tokio::io::duplex(1024);

        tokio::spawn(async move {
            let _ = tx.write_all(b"frame=1\rframe=2\nprogress=continue\r\n\r\nlast").await;
        });

        let mut reader = OutputRecordReader::new(rx);
        let mut records = Vec::new();
        while let Some(line) = reader.next_record().await.unwrap() {
            records.push(line);
        }

        assert_eq!(records, vec!["frame=1", "frame=2", "progress=continue", "last"]);
    }

    #[tokio::test]
    async fn tolerates_invalid_utf8() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = tx.write_all(b"ok \xff\xfe line\n").await;
        });

        let mut reader = OutputRecordReader::new(rx);
        let record = reader.next_record().await.unwrap().unwrap();
        assert!(record.starts_with("ok"));
        assert!(record.ends_with("line"));
        assert_eq!(reader.next_record().await.unwrap(), None);
    }
}
