//! Minimal `ByteSource`/`ByteSink` collaborator traits. The core
//! never inspects what a sink wraps, so a decrypting transform is just another
//! `ByteSink` to it -- so these stay intentionally thin.

/// Supplies compressed bytes. Mirrors `std::io::Read` but returns a plain
/// count with no distinguished "would block" case, since the core always
/// drives it synchronously.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes, returning how many were read. `Ok(0)`
    /// means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Receives decompressed bytes in exact unpacked order.
pub trait ByteSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()>;
}

impl ByteSource for &[u8] {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.len());
        buf[..n].copy_from_slice(&self[..n]);
        *self = &self[n..];
        Ok(n)
    }
}

/// Adapts any `std::io::Read` (a file, a decrypting stream, ...) into a
/// `ByteSource` without colliding with the `&[u8]` impl above.
pub struct ReadSource<R>(pub R);

impl<R: std::io::Read> ByteSource for ReadSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

/// A `ByteSink` over an owned growable buffer, used heavily by the
/// integration tests and by any caller that wants extraction in memory
/// rather than to the filesystem.
#[derive(Debug, Default, Clone)]
pub struct VecSink(pub Vec<u8>);

impl ByteSink for VecSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.0.extend_from_slice(buf);
        Ok(())
    }
}
