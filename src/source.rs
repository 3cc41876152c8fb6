use flate2::read::MultiGzDecoder;
use std::{
    cell::Cell,
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
    rc::Rc,
};

use crate::error::ExtractResult;

const READ_BUFFER_BYTES: usize = 1 << 20;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Shared tally of decoded bytes pulled through a [`CountingReader`].
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Rc<Cell<u64>>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    fn add(&self, n: usize) {
        self.0.set(self.0.get() + n as u64);
    }
}

pub struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> (Self, ByteCounter) {
        let counter = ByteCounter::default();
        (
            Self {
                inner,
                counter: counter.clone(),
            },
            counter,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n);
        Ok(n)
    }
}

pub type DecodedStream = CountingReader<Box<dyn Read>>;

/// Wraps a buffered source, transparently gunzipping it when it starts
/// with the gzip magic bytes.
pub fn decode_stream<R: BufRead + 'static>(mut reader: R) -> io::Result<(DecodedStream, ByteCounter)> {
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let inner: Box<dyn Read> = if is_gzip {
        Box::new(MultiGzDecoder::new(reader))
    } else {
        Box::new(reader)
    };
    Ok(CountingReader::new(inner))
}

/// Opens a local MRF document (`.json` or `.json.gz`) as a decoded byte stream.
/// Every call starts a fresh forward pass.
pub fn open_input(path: &Path) -> ExtractResult<(DecodedStream, ByteCounter)> {
    let file = File::open(path).map_err(|err| {
        io::Error::new(err.kind(), format!("Failed opening {}: {err}", path.display()))
    })?;
    Ok(decode_stream(BufReader::with_capacity(READ_BUFFER_BYTES, file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use std::io::{Cursor, Write};

    fn read_all(stream: &mut DecodedStream) -> String {
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn plain_json_passes_through() {
        let (mut stream, counter) = decode_stream(Cursor::new(b"{\"a\":1}".to_vec())).unwrap();
        assert_eq!(read_all(&mut stream), "{\"a\":1}");
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn gzip_is_detected_by_magic_bytes() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"in_network\":[]}").unwrap();
        let compressed = encoder.finish().unwrap();

        let (mut stream, counter) = decode_stream(Cursor::new(compressed)).unwrap();
        assert_eq!(read_all(&mut stream), "{\"in_network\":[]}");
        assert_eq!(counter.get(), 17);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = open_input(Path::new("/definitely/not/here.json.gz")).err().unwrap();
        assert!(err.to_string().contains("/definitely/not/here.json.gz"));
    }
}
