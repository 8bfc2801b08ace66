//! Stdin sources for shell commands

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// Byte source forwarded to a command's stdin
///
/// `read` returns the number of bytes written into `buf`, `0` meaning end of
/// input. Returning an error aborts the command with that error; return
/// [`crate::CoreError::Cancelled`] to abort it as cancelled.
#[async_trait]
pub trait InputChannel: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

#[async_trait]
impl<T> InputChannel for Box<T>
where
    T: InputChannel + ?Sized,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf).await
    }
}

/// [`InputChannel`] over any `AsyncRead`
pub struct ReaderInput<R> {
    reader: R,
}

impl<R> ReaderInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> InputChannel for ReaderInput<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf).await?)
    }
}

/// Stdin fed from an in-memory buffer
pub fn bytes_input(data: impl Into<Vec<u8>>) -> ReaderInput<std::io::Cursor<Vec<u8>>> {
    ReaderInput::new(std::io::Cursor::new(data.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_input_reads_to_eof() {
        let mut input = bytes_input("hello");
        let mut buf = [0u8; 3];
        assert_eq!(input.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(input.read(&mut buf).await.unwrap(), 2);
        assert_eq!(input.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_boxed_input() {
        let mut input: Box<dyn InputChannel> = Box::new(bytes_input(vec![1u8, 2]));
        let mut buf = [0u8; 8];
        assert_eq!(input.read(&mut buf).await.unwrap(), 2);
    }
}
