//! Plain line-framed TCP transport.
//!
//! The request body is sent followed by a line holding a single `.`. The
//! peer answers with packets: a header line (`REP`, `PREP` or `NAK`), body
//! lines, and a terminating `.` line. Body lines starting with `.` are
//! dot-stuffed.

use super::transport::{EstimateTransport, Packet, PacketKind, TransportError};
use futures::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

pub(crate) struct TcpTransport {
    port: u16,
}

impl TcpTransport {
    pub(crate) const fn new(port: u16) -> Self {
        Self { port }
    }
}

fn stuff(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 4);
    for line in body.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(".\n");
    out
}

async fn exchange(
    host: &str,
    addr: &str,
    body: &str,
    tx: &mpsc::Sender<Result<Packet, TransportError>>,
) -> Result<(), TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect { host: host.to_string(), source })?;
    let (read, mut write) = stream.into_split();
    write.write_all(stuff(body).as_bytes()).await?;
    write.flush().await?;
    debug!("sent request to {}", addr);

    let mut lines = BufReader::new(read).lines();
    loop {
        let Some(header) = lines.next_line().await? else {
            return Err(TransportError::Closed);
        };
        let header = header.trim();
        if header.is_empty() {
            continue;
        }
        let kind = PacketKind::try_from(header).map_err(TransportError::Framing)?;

        let mut packet_body = String::new();
        loop {
            let Some(line) = lines.next_line().await? else {
                return Err(TransportError::Closed);
            };
            if line == "." {
                break;
            }
            let unstuffed = if line.starts_with("..") { &line[1..] } else { line.as_str() };
            packet_body.push_str(unstuffed);
            packet_body.push('\n');
        }

        if tx.send(Ok(Packet::new(kind, packet_body))).await.is_err() || kind.is_final() {
            return Ok(());
        }
    }
}

impl EstimateTransport for TcpTransport {
    fn request(&self, host: &str, body: String) -> BoxStream<'static, Result<Packet, TransportError>> {
        let (tx, rx) = mpsc::channel(4);
        let addr = format!("{host}:{}", self.port);
        let host = host.to_string();
        tokio::spawn(async move {
            // Dropping the stream (deadline, cancellation) ends the exchange
            // and closes the connection.
            tokio::select! {
                result = exchange(&host, &addr, &body, &tx) => {
                    if let Err(e) = result {
                        let _ = tx.send(Err(e)).await;
                    }
                }
                () = tx.closed() => debug!("request to {} abandoned", addr),
            }
        });
        ReceiverStream::new(rx).boxed()
    }
}
