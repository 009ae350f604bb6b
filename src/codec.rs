// =============================================================================
// codec.rs - LENGTH-DELIMITED RECORD FRAMES
// =============================================================================
//
// Wire format, one frame per record, back to back, no file header:
//
//   +----------------------+-------------------------------+
//   | u32 little-endian N  | N bytes of bincode(Record)    |
//   +----------------------+-------------------------------+
//
// End-of-file exactly on a frame boundary is the normal way a stream ends
// (`Ok(None)`). End-of-file anywhere else means somebody truncated the file,
// and that is an error: a benchmark that silently drops its last record is
// not a benchmark.
// =============================================================================

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{DedupError, Result};
use crate::models::Record;
use crate::scanner::RecordSource;

/// Largest payload we will allocate for. Real records are well under 200 bytes.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const LEN_PREFIX: usize = 4;

/// Reads framed records from any byte source.
pub struct RecordReader<R> {
    inner: R,
    records_read: u64,
    bytes_read: u64,
    buf: Vec<u8>,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Opened record stream for reading");
        Ok(Self::new(BufReader::with_capacity(1 << 16, file)))
    }
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            records_read: 0,
            bytes_read: 0,
            buf: Vec::new(),
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fill `buf` as far as the source allows. Returns the bytes actually read,
    /// which is short only at end-of-file.
    fn fill(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn read_error(&self, source: io::Error) -> DedupError {
        DedupError::StreamRead {
            record: self.records_read,
            source,
        }
    }

    /// Next record, `Ok(None)` on a clean end of stream.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let mut prefix = [0u8; LEN_PREFIX];
        let got = Self::fill(&mut self.inner, &mut prefix).map_err(|e| self.read_error(e))?;
        if got == 0 {
            return Ok(None);
        }
        if got < LEN_PREFIX {
            return Err(DedupError::TruncatedFrame {
                record: self.records_read,
                got,
                expected: LEN_PREFIX,
            });
        }

        let len = u32::from_le_bytes(prefix) as usize;
        if len > MAX_FRAME_LEN {
            return Err(DedupError::FrameTooLarge {
                record: self.records_read,
                len,
                max: MAX_FRAME_LEN,
            });
        }

        self.buf.resize(len, 0);
        let got = Self::fill(&mut self.inner, &mut self.buf).map_err(|e| self.read_error(e))?;
        if got < len {
            return Err(DedupError::TruncatedFrame {
                record: self.records_read,
                got,
                expected: len,
            });
        }

        let record: Record = bincode::deserialize(&self.buf)
            .map_err(|e| self.read_error(io::Error::new(ErrorKind::InvalidData, e)))?;
        self.records_read += 1;
        self.bytes_read += (LEN_PREFIX + len) as u64;
        Ok(Some(record))
    }
}

impl<R: Read> RecordSource for RecordReader<R> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        self.read_record()
    }
}

/// Writes framed records to any byte sink.
pub struct RecordWriter<W: Write> {
    inner: W,
    records_written: u64,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Created record stream for writing");
        Ok(Self::new(BufWriter::with_capacity(1 << 16, file)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    fn write_error(&self, source: io::Error) -> DedupError {
        DedupError::StreamWrite {
            record: self.records_written,
            source,
        }
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        let payload = bincode::serialize(record)
            .map_err(|e| self.write_error(io::Error::new(ErrorKind::InvalidData, e)))?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(self.write_error(io::Error::new(
                ErrorKind::InvalidInput,
                format!("record encodes to {} bytes, limit is {MAX_FRAME_LEN}", payload.len()),
            )));
        }

        let prefix = (payload.len() as u32).to_le_bytes();
        self.inner
            .write_all(&prefix)
            .and_then(|_| self.inner.write_all(&payload))
            .map_err(|e| self.write_error(e))?;
        self.records_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| self.write_error(e))
    }

    /// Flush and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    fn sample(i: i32) -> Record {
        let ts = Utc.with_ymd_and_hms(2022, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::nanoseconds(i64::from(i) * 1_234_567);
        Record::new(ts, format!("loc-{i}"), format!("cap-{i}"), i as f32 / 10.0, i % 6)
    }

    fn encode(records: &[Record]) -> Vec<u8> {
        let mut writer = RecordWriter::new(Vec::new());
        for r in records {
            writer.write(r).unwrap();
        }
        assert_eq!(writer.records_written(), records.len() as u64);
        writer.finish().unwrap()
    }

    #[test]
    fn test_empty_stream_ends_cleanly() {
        let mut reader = RecordReader::new(Cursor::new(Vec::new()));
        assert!(reader.read_record().unwrap().is_none());
        assert!(reader.read_record().unwrap().is_none());
        assert_eq!(reader.records_read(), 0);
    }

    #[test]
    fn test_records_come_back_in_order_with_full_precision() {
        let records: Vec<_> = (0..5).map(sample).collect();
        let bytes = encode(&records);
        let total = bytes.len() as u64;

        let mut reader = RecordReader::new(Cursor::new(bytes));
        let mut back = Vec::new();
        while let Some(r) = reader.read_record().unwrap() {
            back.push(r);
        }
        assert_eq!(back, records);
        assert_eq!(reader.records_read(), 5);
        assert_eq!(reader.bytes_read(), total);
    }

    #[test]
    fn test_truncated_prefix_is_an_error() {
        let mut bytes = encode(&[sample(1)]);
        bytes.extend_from_slice(&[3, 0]);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(reader.read_record().unwrap().is_some());
        let err = reader.read_record().unwrap_err();
        assert!(matches!(
            err,
            DedupError::TruncatedFrame { record: 1, got: 2, expected: 4 }
        ));
        assert!(err.is_stream_read());
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let mut bytes = encode(&[sample(1)]);
        bytes.truncate(bytes.len() - 3);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read_record(),
            Err(DedupError::TruncatedFrame { record: 0, .. })
        ));
    }

    #[test]
    fn test_oversized_frame_is_rejected_before_allocating() {
        let bytes = u32::MAX.to_le_bytes().to_vec();
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read_record(),
            Err(DedupError::FrameTooLarge { len, .. }) if len == u32::MAX as usize
        ));
    }

    #[test]
    fn test_garbage_payload_is_a_read_error() {
        let mut bytes = 4u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read_record(),
            Err(DedupError::StreamRead { record: 0, .. })
        ));
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "nobody is listening"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_a_write_error() {
        let mut writer = RecordWriter::new(FailingSink);
        let err = writer.write(&sample(0)).unwrap_err();
        assert!(matches!(err, DedupError::StreamWrite { record: 0, .. }));
        assert_eq!(writer.records_written(), 0);
    }
}
