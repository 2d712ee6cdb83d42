use crate::error::{AvrError, Result};
use crate::protocol::{Command, TERMINATOR};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Low-level control stream handler
///
/// Owns a writer task draining the command queue in FIFO order and a reader
/// task framing inbound lines and handing them to the line callback. When the
/// peer closes the stream the reader runs the close callback once.
pub(crate) struct Connection {
    peer: String,
    alive: Arc<AtomicBool>,
    queue: mpsc::UnboundedSender<Command>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Open the stream and start both loops
    pub(crate) async fn connect<F, C>(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        on_line: F,
        on_close: C,
    ) -> Result<Self>
    where
        F: FnMut(&str) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        tracing::info!("Connecting to {}:{}", host, port);

        let stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(AvrError::Connect {
                    host: host.to_string(),
                    port,
                    source,
                })
            }
            Err(_) => {
                return Err(AvrError::ConnectTimeout {
                    host: host.to_string(),
                    port,
                })
            }
        };

        Ok(Self::start(stream, format!("{}:{}", host, port), on_line, on_close))
    }

    fn start<F, C>(stream: TcpStream, peer: String, mut on_line: F, on_close: C) -> Self
    where
        F: FnMut(&str) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }
        let (read, mut write) = stream.into_split();
        let (queue, mut queue_rx) = mpsc::unbounded_channel::<Command>();
        let alive = Arc::new(AtomicBool::new(true));

        // One command on the wire at a time, flushed before the next
        let writer_peer = peer.clone();
        let writer_alive = alive.clone();
        let writer = tokio::spawn(async move {
            while let Some(command) = queue_rx.recv().await {
                tracing::debug!("Sending {}{} to {}", command.code, command.parameter, writer_peer);
                let bytes = command.encode();
                let sent = async {
                    write.write_all(&bytes).await?;
                    write.flush().await
                }
                .await;
                if let Err(e) = sent {
                    tracing::error!("Failed to send to {}: {}", writer_peer, e);
                    writer_alive.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader_peer = peer.clone();
        let reader_alive = alive.clone();
        let writer_abort = writer.abort_handle();
        let reader = tokio::spawn(async move {
            let mut read = BufReader::new(read);
            let mut buf = Vec::with_capacity(128);
            loop {
                buf.clear();
                match read.read_until(TERMINATOR, &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if buf.last() == Some(&TERMINATOR) {
                            buf.pop();
                        }
                        let line = String::from_utf8_lossy(&buf);
                        tracing::debug!("Received {:?} from {}", line, reader_peer);
                        on_line(line.as_ref());
                    }
                    Err(e) => {
                        tracing::debug!("Read from {} failed: {}", reader_peer, e);
                        break;
                    }
                }
            }

            reader_alive.store(false, Ordering::SeqCst);
            writer_abort.abort();
            tracing::info!("Connection to {} closed", reader_peer);
            on_close();
        });

        Self {
            peer,
            alive,
            queue,
            reader,
            writer,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queue a command. Dropped with a debug log once the connection is closed.
    pub(crate) fn send(&self, command: Command) {
        if !self.is_alive() {
            tracing::debug!(
                "Dropping {}{}: connection to {} is closed",
                command.code,
                command.parameter,
                self.peer
            );
            return;
        }
        if let Err(e) = self.queue.send(command) {
            tracing::debug!("Dropping {}{}: writer for {} is gone", e.0.code, e.0.parameter, self.peer);
        }
    }

    /// Stop both loops and release the stream. Safe to call more than once.
    pub(crate) fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            tracing::info!("Closing connection to {}", self.peer);
        }
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
