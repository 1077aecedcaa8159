//! TCP listener: accepts connections and serves each on its own thread.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::gateway::Gateway;

/// Upper bound for receiving a complete request from a client.
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

const ACCEPT_IDLE: Duration = Duration::from_millis(50);

/// Bind `bind` and start the accept loop in a background thread.
///
/// Returns the bound address, the running flag (store `false` to stop accepting) and the
/// join handle of the accept thread. In-flight requests finish on their own threads.
pub fn start_gateway(
    bind: &str,
    gateway: Arc<Gateway>,
) -> io::Result<(SocketAddr, Arc<AtomicBool>, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind)
        .map_err(|e| io::Error::new(e.kind(), format!("bind {bind} failed: {e}")))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let running = Arc::new(AtomicBool::new(true));
    let running_cl = running.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(%addr, routes = gateway.handlers().len(), "gateway listening");
        while running_cl.load(Ordering::SeqCst) {
            let (stream, peer) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        tracing::warn!(error = %e, "accept error");
                    }
                    std::thread::sleep(ACCEPT_IDLE);
                    continue;
                }
            };
            let _ = stream.set_nonblocking(false);
            let _ = stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT));
            let _ = stream.set_write_timeout(None);

            let gw = gateway.clone();
            std::thread::spawn(move || {
                tracing::debug!(%peer, "connection accepted");
                let mut s = stream;
                gw.handle_connection(&mut s);
                let _ = s.shutdown(std::net::Shutdown::Both);
            });
        }
        tracing::info!(%addr, "gateway stopped");
    });
    Ok((addr, running, handle))
}
