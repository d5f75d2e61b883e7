//! Async client for the transfer protocol.
//!
//! Works over any `AsyncRead + AsyncWrite` stream. [`Client::connect`]
//! opens a TCP connection.

use crate::protocols::transfer::codec::{self, CodecError, Direction};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

/// Client-side transfer failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("local file error at {path:?}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),
    /// The server answered with an ERROR confirmation.
    #[error("server refused: {0}")]
    Rejected(String),
    #[error("connection closed after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
}

/// One connection to a transfer server. Transfers run one after another.
pub struct Client<S> {
    stream: S,
}

impl Client<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        debug!(peer = ?stream.peer_addr().ok(), "Connected");
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Upload the file at `local` and store it as `remote_name`.
    ///
    /// Returns the number of bytes sent.
    pub async fn upload(&mut self, local: &Path, remote_name: &str) -> Result<u64, ClientError> {
        let local_err = |source| ClientError::LocalFile {
            path: local.to_path_buf(),
            source,
        };
        let file = File::open(local).await.map_err(local_err)?;
        let size = file.metadata().await.map_err(local_err)?.len();

        self.upload_from(remote_name, size, file).await
    }

    /// Upload exactly `size` bytes read from `source` as `remote_name`.
    pub async fn upload_from<R: AsyncRead + Unpin>(
        &mut self,
        remote_name: &str,
        size: u64,
        source: R,
    ) -> Result<u64, ClientError> {
        let mut header = vec![Direction::Upload.as_byte()];
        header.extend(codec::encode_filename(remote_name)?);
        header.extend(codec::encode_u64_le(size));
        self.stream.write_all(&header).await?;

        self.read_confirmation().await?;
        info!(name = remote_name, size, "Sending file");

        let sent = tokio::io::copy(&mut source.take(size), &mut self.stream).await?;
        if sent < size {
            return Err(ClientError::Truncated {
                expected: size,
                received: sent,
            });
        }
        self.stream.flush().await?;

        self.read_confirmation().await?;
        info!(name = remote_name, size, "File uploaded");
        Ok(sent)
    }

    /// Download `remote_name` into a file at `dest`.
    ///
    /// The file is only created once the server accepts the request.
    pub async fn download(&mut self, remote_name: &str, dest: &Path) -> Result<u64, ClientError> {
        let size = self.request_download(remote_name).await?;

        let mut file = File::create(dest)
            .await
            .map_err(|source| ClientError::LocalFile {
                path: dest.to_path_buf(),
                source,
            })?;
        let received = self.receive(size, &mut file).await?;
        info!(name = remote_name, dest = %dest.display(), size, "File downloaded");
        Ok(received)
    }

    /// Download `remote_name` into `sink`.
    pub async fn download_to<W: AsyncWrite + Unpin>(
        &mut self,
        remote_name: &str,
        sink: &mut W,
    ) -> Result<u64, ClientError> {
        let size = self.request_download(remote_name).await?;
        self.receive(size, sink).await
    }

    /// Half-close the connection; the server sees end of stream.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn request_download(&mut self, remote_name: &str) -> Result<u64, ClientError> {
        let mut header = vec![Direction::Download.as_byte()];
        header.extend(codec::encode_filename(remote_name)?);
        self.stream.write_all(&header).await?;

        self.read_confirmation().await?;
        let size = self.stream.read_u64_le().await?;
        info!(name = remote_name, size, "Receiving file");
        Ok(size)
    }

    async fn receive<W: AsyncWrite + Unpin>(
        &mut self,
        size: u64,
        sink: &mut W,
    ) -> Result<u64, ClientError> {
        let received = tokio::io::copy(&mut (&mut self.stream).take(size), sink).await?;
        sink.flush().await?;
        if received < size {
            return Err(ClientError::Truncated {
                expected: size,
                received,
            });
        }
        Ok(received)
    }

    /// Read one confirmation; an ERROR status becomes [`ClientError::Rejected`].
    async fn read_confirmation(&mut self) -> Result<(), ClientError> {
        let status = self.stream.read_u8().await?;
        if codec::decode_status(status)? {
            return Ok(());
        }

        let len = self.stream.read_u8().await?;
        let mut message = vec![0u8; len as usize];
        self.stream.read_exact(&mut message).await?;
        Err(ClientError::Rejected(
            String::from_utf8_lossy(&message).into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn error_frame(message: &str) -> Vec<u8> {
        codec::encode_confirmation(false, Some(message)).unwrap()
    }

    #[tokio::test]
    async fn test_upload_frames() {
        let mock = Builder::new()
            .write(b"U\x05a.txt")
            .write(&12u64.to_le_bytes())
            .read(&[0])
            .write(b"hello world!")
            .read(&[0])
            .build();

        let mut client = Client::new(mock);
        let sent = client
            .upload_from("a.txt", 12, &b"hello world!"[..])
            .await
            .unwrap();
        assert_eq!(sent, 12);
    }

    #[tokio::test]
    async fn test_upload_rejected() {
        let mock = Builder::new()
            .write(b"U\x05a.txt")
            .write(&0u64.to_le_bytes())
            .read(&error_frame("Invalid file size!"))
            .build();

        let mut client = Client::new(mock);
        let err = client.upload_from("a.txt", 0, &b""[..]).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(m) if m == "Invalid file size!"));
    }

    #[tokio::test]
    async fn test_upload_short_source() {
        let mock = Builder::new()
            .write(b"U\x01x")
            .write(&10u64.to_le_bytes())
            .read(&[0])
            .write(b"abc")
            .build();

        let mut client = Client::new(mock);
        let err = client.upload_from("x", 10, &b"abc"[..]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Truncated {
                expected: 10,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_download_split_reads() {
        let mock = Builder::new()
            .write(b"D\x05b.txt")
            .read(&[0, 4, 0])
            .read(&[0, 0, 0, 0, 0, 0])
            .read(b"da")
            .read(b"ta")
            .build();

        let mut client = Client::new(mock);
        let mut sink = Vec::new();
        let received = client.download_to("b.txt", &mut sink).await.unwrap();
        assert_eq!(received, 4);
        assert_eq!(sink, b"data");
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let mock = Builder::new()
            .write(b"D\x05b.txt")
            .read(&error_frame("File not found!"))
            .build();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("b.txt");
        let mut client = Client::new(mock);
        let err = client.download("b.txt", &dest).await.unwrap_err();

        assert!(matches!(err, ClientError::Rejected(m) if m == "File not found!"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_truncated() {
        let mock = Builder::new()
            .write(b"D\x01c")
            .read(&[0])
            .read(&5u64.to_le_bytes())
            .read(b"ab")
            .build();

        let mut client = Client::new(mock);
        let mut sink = Vec::new();
        let err = client.download_to("c", &mut sink).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Truncated {
                expected: 5,
                received: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_status() {
        let mock = Builder::new().write(b"D\x01c").read(&[7]).build();

        let mut client = Client::new(mock);
        let err = client.download_to("c", &mut Vec::<u8>::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(CodecError::UnknownStatus(7))
        ));
    }

    #[test]
    fn test_filename_too_long_is_local_error() {
        let name = "n".repeat(300);
        let mock = Builder::new().build();
        let mut client = Client::new(mock);
        let err = tokio_test::block_on(client.download_to(&name, &mut Vec::<u8>::new())).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(CodecError::FilenameTooLong(300))));
    }
}
