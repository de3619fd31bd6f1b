//! Loopback bridge between a database driver and the tunnel stream.
//!
//! The bridge binds an ephemeral listener on `127.0.0.1:0` and splices the
//! first accepted connection with the tunnel's inner stream in both
//! directions. Database drivers then "dial localhost" and perform their own
//! wire-protocol handshake across the tunnel, which keeps the broker out of
//! the business of reimplementing database protocols.
//!
//! Splice errors are swallowed: the driver habitually slams its socket shut
//! the moment its query completes, and that must not surface as a pipeline
//! failure. A listener error before the first accept is fatal: it is
//! recorded on the bridge, and the pipeline reports it in place of the
//! driver's doomed connection attempt.

use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::Result;

/// A live loopback bridge.
///
/// Dropping (or [`close`](LocalBridge::close)-ing) the bridge aborts the
/// splice task, which drops the tunnel stream and the accepted socket.
pub struct LocalBridge {
    port: u16,
    task: JoinHandle<()>,
    accept_failure: Arc<StdMutex<Option<io::Error>>>,
}

impl LocalBridge {
    /// Bind `127.0.0.1:0` and start serving `tunnel` to the first accepted
    /// connection.
    pub async fn open<S>(tunnel: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();

        debug!(port = port, "Local bridge listening");

        let accept_failure = Arc::new(StdMutex::new(None));
        let task = tokio::spawn(run_bridge(listener, tunnel, Arc::clone(&accept_failure)));

        Ok(Self {
            port,
            task,
            accept_failure,
        })
    }

    /// The OS-assigned loopback port drivers connect to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Take the listener error recorded before the first accept, if any.
    ///
    /// The splice task runs detached and cannot fail the `open()` call that
    /// already returned, so a pre-accept listener failure is parked here.
    /// The pipeline checks it when the driver's connection attempt comes
    /// back dead, and reports the bridge failure instead of the misleading
    /// driver error.
    pub fn take_accept_failure(&self) -> Option<io::Error> {
        self.accept_failure.lock().unwrap().take()
    }

    /// Tear the bridge down: abort the splice task, dropping the listener,
    /// the accepted socket, and the tunnel stream.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for LocalBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accept the first connection and splice it with the tunnel; drop any
/// additional connections immediately.
async fn run_bridge<S>(
    listener: TcpListener,
    tunnel: S,
    accept_failure: Arc<StdMutex<Option<io::Error>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (socket, peer) = match listener.accept().await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Bridge listener failed before accept");
            *accept_failure.lock().unwrap() = Some(e);
            return;
        }
    };

    debug!(peer = %peer, "Bridge accepted driver connection");

    let splice = splice(socket, tunnel);
    tokio::pin!(splice);

    loop {
        tokio::select! {
            _ = &mut splice => break,
            extra = listener.accept() => {
                if let Ok((sock, peer)) = extra {
                    debug!(peer = %peer, "Dropping additional bridge connection");
                    drop(sock);
                }
            }
        }
    }

    debug!("Bridge splice finished");
}

/// Bidirectional splice until either side closes.
async fn splice<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (a_read, a_write) = split(a);
    let (b_read, b_write) = split(b);

    let driver_to_tunnel = tokio::spawn(copy_half(a_read, b_write, "driver->tunnel"));
    let tunnel_to_driver = tokio::spawn(copy_half(b_read, a_write, "tunnel->driver"));

    // Either direction ending means the conversation is over; the other
    // half is torn down when its split handle drops.
    tokio::select! {
        result = driver_to_tunnel => {
            trace!("driver->tunnel copy finished: {:?}", result);
        }
        result = tunnel_to_driver => {
            trace!("tunnel->driver copy finished: {:?}", result);
        }
    }
}

/// Copy from reader to writer until EOF or error; errors are swallowed.
async fn copy_half<R, W>(mut reader: R, mut writer: W, direction: &'static str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                trace!("{}: EOF after {} bytes", direction, total);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("{}: read error after {} bytes: {}", direction, total, e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!("{}: write error after {} bytes: {}", direction, total, e);
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!("{}: flush error: {}", direction, e);
            break;
        }
        total += n as u64;
    }

    let _ = writer.shutdown().await;
    total
}
