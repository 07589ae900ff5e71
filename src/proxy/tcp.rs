//! Upstream dialing and bidirectional stream splicing.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Why a dial attempt did not produce an upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("failed to connect to upstream {0}: {1}")]
    Connect(SocketAddr, io::Error),

    #[error("connection to upstream {0} timed out")]
    Timeout(SocketAddr),

    #[error("dial of upstream {0} was cancelled")]
    Cancelled(SocketAddr),
}

/// Bytes moved in each direction over one proxied session.
#[derive(Debug)]
pub struct SpliceResult {
    /// Bytes copied from the client to the upstream.
    pub bytes_to_upstream: u64,
    /// Bytes copied from the upstream to the client.
    pub bytes_to_client: u64,
}

/// Connect to an upstream host.
///
/// The dial is bounded by `connect_timeout` and by the cancellation token;
/// whichever fires first terminates it.
#[instrument(skip_all, fields(upstream = %addr))]
pub async fn connect_to_upstream(
    addr: SocketAddr,
    connect_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TcpStream, DialError> {
    debug!("dialing upstream");

    let stream = tokio::select! {
        _ = cancel.cancelled() => return Err(DialError::Cancelled(addr)),
        dial = timeout(connect_timeout, TcpStream::connect(addr)) => match dial {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(DialError::Connect(addr, e)),
            Err(_) => return Err(DialError::Timeout(addr)),
        },
    };

    debug!("connected to upstream");

    // Lower latency for small interactive payloads
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY on upstream connection");
    }

    Ok(stream)
}

/// Copy bytes between two streams in both directions until both close.
///
/// Each direction runs as its own copy task. When a direction finishes,
/// whether at EOF or on a transport error, it shuts down the side it was
/// writing to, which the peer direction observes as EOF. The session is
/// over only when both directions have returned; transport errors end the
/// affected direction but are not surfaced.
#[instrument(skip_all)]
pub async fn splice<C, U>(client: C, upstream: U) -> SpliceResult
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let client_to_upstream = async {
        let copied = tokio::io::copy(&mut client_read, &mut upstream_write).await;
        let _ = upstream_write.shutdown().await;
        copied
    };

    let upstream_to_client = async {
        let copied = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    };

    let (to_upstream, to_client) = tokio::join!(client_to_upstream, upstream_to_client);

    if let Err(e) = &to_upstream {
        debug!(error = %e, "client to upstream copy ended with error");
    }
    if let Err(e) = &to_client {
        debug!(error = %e, "upstream to client copy ended with error");
    }

    SpliceResult {
        bytes_to_upstream: to_upstream.unwrap_or(0),
        bytes_to_client: to_client.unwrap_or(0),
    }
}
