//! Stream connection handling for PathNet
//!
//! Frames messages over a reliable byte stream:
//! - the 12-byte header is written completely, then the payload
//! - reads block until exactly 12 header bytes, then exactly `payload_size` bytes
//! - a stream that ends mid-message is fatal for the connection
//!
//! Requests and responses strictly alternate; there is no pipelining.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{decode_header, encode_header, CodecError, Frame, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A framed connection to a remote PathNet host
pub struct Connection<S = TcpStream> {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The underlying stream
    stream: S,
    /// Last activity timestamp
    last_activity: Instant,
    /// Statistics
    stats: ConnectionStats,
}

impl Connection<TcpStream> {
    /// Open a TCP connection to `addr`
    pub async fn connect(addr: SocketAddr) -> ConnectionResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, addr))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S, remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            stream,
            last_activity: Instant::now(),
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Get time since last activity
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Send a frame: the full header, then the full payload
    ///
    /// Partial writes are retried until every byte is flushed; any write error
    /// fails the whole send.
    pub async fn send(&mut self, frame: &Frame) -> ConnectionResult<()> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: frame.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }
        let mut header = frame.header;
        header.payload_size = frame.payload.len() as u32;

        self.stream.write_all(&encode_header(&header)).await?;
        if !frame.payload.is_empty() {
            self.stream.write_all(&frame.payload).await?;
        }
        self.stream.flush().await?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += (HEADER_SIZE + frame.payload.len()) as u64;
        self.last_activity = Instant::now();

        Ok(())
    }

    /// Receive one frame
    ///
    /// Returns `None` when the peer closed the stream cleanly between messages.
    /// A close in the middle of a message is `ConnectionError::Closed`.
    pub async fn recv(&mut self) -> ConnectionResult<Option<Frame>> {
        let mut header_buf = [0u8; HEADER_SIZE];
        if !self.read_full(&mut header_buf, true).await? {
            return Ok(None);
        }
        let header = decode_header(&header_buf)?;

        let mut payload = vec![0u8; header.payload_size as usize];
        if !payload.is_empty() {
            self.read_full(&mut payload, false).await?;
        }

        self.stats.messages_received += 1;
        self.last_activity = Instant::now();

        Ok(Some(Frame {
            header,
            payload: payload.into(),
        }))
    }

    /// Send a request and wait for its response
    pub async fn request(&mut self, frame: &Frame) -> ConnectionResult<Frame> {
        self.send(frame).await?;
        self.recv().await?.ok_or(ConnectionError::Closed)
    }

    /// Shut down the write half of the stream
    pub async fn shutdown(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Fill `buf` completely. With `eof_ok`, a close before the first byte
    /// yields `Ok(false)`.
    async fn read_full(&mut self, buf: &mut [u8], eof_ok: bool) -> ConnectionResult<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 && eof_ok {
                    return Ok(false);
                }
                return Err(ConnectionError::Closed);
            }
            filled += n;
            self.stats.bytes_received += n as u64;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, encode_path_query, Command, MessageHeader, PathQueryPayload, Status};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    fn sample_frame() -> Frame {
        Frame::new(
            MessageHeader::request(Command::PathQuery, 17),
            encode_path_query(&PathQueryPayload { source: 2, target: 5 }),
        )
    }

    #[tokio::test]
    async fn test_recv_whole_message() {
        let bytes = encode_frame(&sample_frame());
        let mock = Builder::new().read(&bytes).build();
        let mut conn = Connection::new(mock, peer());

        assert_eq!(conn.recv().await.unwrap(), Some(sample_frame()));
        assert_eq!(conn.recv().await.unwrap(), None);
        assert_eq!(conn.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_recv_byte_by_byte() {
        let bytes = encode_frame(&sample_frame());
        let mut builder = Builder::new();
        for byte in bytes.iter() {
            builder.read(std::slice::from_ref(byte));
        }
        let mut conn = Connection::new(builder.build(), peer());

        assert_eq!(conn.recv().await.unwrap(), Some(sample_frame()));
        assert_eq!(conn.stats().bytes_received, bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_recv_back_to_back_in_odd_chunks() {
        let first = sample_frame();
        let second = Frame::empty(MessageHeader::new(Command::Exit, Status::Ok, 18));
        let mut stream = encode_frame(&first).to_vec();
        stream.extend_from_slice(&encode_frame(&second));

        let mut builder = Builder::new();
        for chunk in stream.chunks(5) {
            builder.read(chunk);
        }
        let mut conn = Connection::new(builder.build(), peer());

        assert_eq!(conn.recv().await.unwrap(), Some(first));
        assert_eq!(conn.recv().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_close_mid_message_is_fatal() {
        let bytes = encode_frame(&sample_frame());

        let mid_header = Builder::new().read(&bytes[..5]).build();
        let mut conn = Connection::new(mid_header, peer());
        assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));

        let mid_payload = Builder::new().read(&bytes[..HEADER_SIZE + 1]).build();
        let mut conn = Connection::new(mid_payload, peer());
        assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected_before_payload() {
        let mut header = encode_header(&MessageHeader::request(Command::UploadGraph, 1));
        header[4..8].copy_from_slice(&((MAX_PAYLOAD_SIZE as u32) + 1).to_be_bytes());
        let mock = Builder::new().read(&header).build();
        let mut conn = Connection::new(mock, peer());

        assert!(matches!(
            conn.recv().await,
            Err(ConnectionError::Protocol(CodecError::PayloadTooLarge { .. }))
        ));
    }

    /// Sink that accepts a single byte per write call
    #[derive(Default)]
    struct Trickle {
        written: Vec<u8>,
        calls: usize,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.calls += 1;
            match buf.first() {
                Some(&byte) => {
                    self.written.push(byte);
                    Poll::Ready(Ok(1))
                }
                None => Poll::Ready(Ok(0)),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_send_survives_partial_writes() {
        let frame = sample_frame();
        let bytes = encode_frame(&frame);
        let mut conn = Connection::new(Trickle::default(), peer());

        conn.send(&frame).await.unwrap();
        assert_eq!(conn.stream.written, bytes.to_vec());
        assert_eq!(conn.stream.calls, bytes.len());
        assert_eq!(conn.stats().bytes_sent, bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_request_response() {
        let request = sample_frame();
        let response = Frame::empty(MessageHeader::new(Command::Error, Status::NotReady, 17));
        let mock = Builder::new()
            .write(&encode_frame(&request))
            .read(&encode_frame(&response))
            .build();
        let mut conn = Connection::new(mock, peer());

        assert_eq!(conn.request(&request).await.unwrap(), response);
    }
}
