use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::error::ConsoleError;

use super::telnet::{self, TelnetCodec};

/// One bidirectional byte stream to a device console.
///
/// `read_available` must never wait for data: it returns whatever is
/// buffered, possibly nothing. Callers own the polling cadence.
pub trait Transport: Send {
    /// Writes `data` verbatim. No line ending is added.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), ConsoleError>> + Send;

    /// Returns all bytes received since the previous call.
    ///
    /// Returns [`ConsoleError::ConnectionClosed`] once the peer has closed
    /// the stream and every buffered byte has been handed out.
    fn read_available(&mut self) -> impl Future<Output = Result<Vec<u8>, ConsoleError>> + Send;

    /// Releases the connection. Calling it twice is harmless.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens [`Transport`]s to console endpoints.
pub trait Connector: Send + Sync + 'static {
    type Conn: Transport + 'static;

    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Conn, ConsoleError>> + Send;
}

/// Connects to consoles over plain Telnet.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelnetConnector;

impl Connector for TelnetConnector {
    type Conn = TelnetTransport;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<TelnetTransport, ConsoleError> {
        TelnetTransport::connect(host, port, timeout).await
    }
}

/// Telnet connection with a background reader task.
///
/// The reader task decodes Telnet commands, answers negotiation and forwards
/// payload chunks over a channel, so `read_available` only drains the channel.
pub struct TelnetTransport {
    addr: String,
    writer: Option<Arc<Mutex<OwnedWriteHalf>>>,
    recv: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl TelnetTransport {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ConsoleError> {
        let addr = format!("{host}:{port}");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(ConsoleError::Connect {
                    addr,
                    reason: err.to_string(),
                });
            }
            Err(_) => return Err(ConsoleError::ConnectTimeout(addr)),
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{} Failed to set TCP_NODELAY: {:?}", addr, e);
        }
        debug!("{} TCP connection successful", addr);

        let (mut read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let (sender_to_user, receiver_from_console) = mpsc::channel::<Vec<u8>>(256);

        let task_writer = writer.clone();
        let task_addr = addr.clone();
        let reader = tokio::spawn(async move {
            let mut codec = TelnetCodec::new();
            let mut buf = vec![0u8; 4096];
            loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) => {
                        debug!("{} Console sent EOF.", task_addr);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!("{} Console read failed: {:?}", task_addr, e);
                        break;
                    }
                };
                let decoded = codec.decode(&buf[..n]);
                if !decoded.replies.is_empty() {
                    trace!("{} Refusing options: {:?}", task_addr, decoded.replies);
                    let mut guard = task_writer.lock().await;
                    if let Err(e) = guard.write_all(&decoded.replies).await {
                        debug!("{} Failed to send negotiation reply: {:?}", task_addr, e);
                        break;
                    }
                }
                if !decoded.data.is_empty() && sender_to_user.send(decoded.data).await.is_err() {
                    debug!("{} Output receiver dropped. Closing task.", task_addr);
                    break;
                }
            }
            debug!("{} Telnet reader task ended.", task_addr);
        });

        Ok(Self {
            addr,
            writer: Some(writer),
            recv: receiver_from_console,
            reader: Some(reader),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Transport for TelnetTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), ConsoleError> {
        let writer = self.writer.as_ref().ok_or(ConsoleError::ConnectionClosed)?;
        let payload = telnet::escape(data);
        let mut guard = writer.lock().await;
        guard.write_all(&payload).await?;
        guard.flush().await?;
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, ConsoleError> {
        let mut data = Vec::new();
        loop {
            match self.recv.try_recv() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if data.is_empty() {
                        return Err(ConsoleError::ConnectionClosed);
                    }
                    break;
                }
            }
        }
        Ok(data)
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.recv.close();
        if let Some(writer) = self.writer.take() {
            let mut guard = writer.lock().await;
            if let Err(e) = guard.shutdown().await {
                debug!("{} Error shutting down console connection: {:?}", self.addr, e);
            }
            debug!("{} Console connection closed", self.addr);
        }
    }
}

impl Drop for TelnetTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = match TelnetTransport::connect("127.0.0.1", port, Duration::from_secs(2)).await {
            Ok(_) => panic!("closed port should refuse"),
            Err(err) => err,
        };
        assert!(err.is_connect_error());
    }

    #[tokio::test]
    async fn reads_payload_and_refuses_options() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            socket
                .write_all(&[telnet::IAC, telnet::WILL, 1, b'R', b'1', b'#'])
                .await
                .expect("write");
            let mut reply = [0u8; 3];
            socket.read_exact(&mut reply).await.expect("read reply");
            let mut line = [0u8; 6];
            socket.read_exact(&mut line).await.expect("read line");
            (reply, line)
        });

        let mut transport = TelnetTransport::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .expect("connect");

        let mut received = Vec::new();
        for _ in 0..50 {
            received.extend(transport.read_available().await.expect("read"));
            if received.ends_with(b"R1#") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(received, b"R1#");

        transport.send(b"show\r\n").await.expect("send");
        let (reply, line) = server.await.expect("server task");
        assert_eq!(reply, [telnet::IAC, telnet::DONT, 1]);
        assert_eq!(&line, b"show\r\n");

        transport.close().await;
        transport.close().await;
        assert!(matches!(
            transport.send(b"x").await,
            Err(ConsoleError::ConnectionClosed)
        ));
    }
}
