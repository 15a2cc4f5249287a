use crate::command::{Stdin, Stdout};
use std::io::{Cursor, Read, Result as IoResult, Write};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

/// Memory-backed reader that can be bound as a command's stdin.
///
/// Bound to an external process it is pumped through an OS pipe.
#[derive(Debug)]
pub struct MemReader {
    cursor: Cursor<Vec<u8>>,
}

impl MemReader {
    /// Create a MemReader that will read from the provided buffer.
    pub fn new(buf: impl Into<Vec<u8>>) -> Self {
        Self {
            cursor: Cursor::new(buf.into()),
        }
    }
}

impl Read for MemReader {
    fn read(&mut self, out: &mut [u8]) -> IoResult<usize> {
        self.cursor.read(out)
    }
}

impl Stdin for MemReader {
    fn stdio(self: Box<Self>) -> Result<Stdio, Box<dyn Read + Send>> {
        Err(self)
    }
}

/// Memory-backed writer for capturing a command's output.
///
/// Clones share the same buffer, so one clone can be bound to a command while
/// another is kept to read the collected bytes.
#[derive(Debug, Clone, Default)]
pub struct MemWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemWriter {
    /// Public constructor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bytes written so far, decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

impl Stdout for MemWriter {
    fn stdio(self: Box<Self>) -> Result<Stdio, Box<dyn Write + Send>> {
        Err(self)
    }
}

impl Stdin for std::io::Stdin {
    fn stdio(self: Box<Self>) -> Result<Stdio, Box<dyn Read + Send>> {
        Ok(Stdio::inherit())
    }
}

impl Stdout for std::io::Stdout {
    fn stdio(self: Box<Self>) -> Result<Stdio, Box<dyn Write + Send>> {
        Ok(Stdio::inherit())
    }
}

impl Stdout for std::io::Stderr {
    fn stdio(self: Box<Self>) -> Result<Stdio, Box<dyn Write + Send>> {
        Ok(Stdio::inherit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_writer_clones_share_buffer() {
        let writer = MemWriter::new();
        let mut bound = writer.clone();
        bound.write_all(b"hello\n").unwrap();
        assert_eq!(writer.text(), "hello\n");
    }

    #[test]
    fn mem_adapters_have_no_os_handle() {
        let reader: Box<dyn Stdin> = Box::new(MemReader::new("abc"));
        let mut back = reader.stdio().err().expect("in-memory reader has no handle");
        let mut s = String::new();
        back.read_to_string(&mut s).unwrap();
        assert_eq!(s, "abc");

        let writer: Box<dyn Stdout> = Box::new(MemWriter::new());
        assert!(writer.stdio().is_err());
    }
}
