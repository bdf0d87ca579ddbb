//! Input byte sources

use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

/// Seekable input of bitstream bytes
pub trait ByteSource {
    /// Fill `buf` from the current position
    ///
    /// Returns fewer than `buf.len()` bytes only at end of input.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Seek back to the first byte
    fn rewind(&mut self) -> io::Result<()>;

    /// Total length of the input in bytes
    fn total_len(&mut self) -> io::Result<u64>;
}

impl<R: Read + Seek> ByteSource for R {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }

    fn total_len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most 3 bytes per read
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.read(&mut buf[..n])
        }
    }

    impl Seek for Trickle {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    #[test]
    fn test_read_chunk_fills_buffer() {
        let mut src = Trickle(Cursor::new((0u8..10).collect()));
        let mut buf = [0u8; 8];
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 8);
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(src.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_total_len_keeps_position() {
        let mut src = Cursor::new(vec![0u8; 300]);
        let mut buf = [0u8; 100];
        src.read_chunk(&mut buf).unwrap();
        assert_eq!(src.total_len().unwrap(), 300);
        assert_eq!(src.position(), 100);
        ByteSource::rewind(&mut src).unwrap();
        assert_eq!(src.position(), 0);
    }
}
