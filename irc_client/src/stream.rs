//! Socket setup. TLS is out of scope (the socket is treated as an opaque byte stream — see
//! `spec.md` §1) and is architecturally incompatible with hand-off, which needs to transfer a bare
//! OS file descriptor between processes; a TLS session's key material can't travel with it. The
//! teacher's `Stream` enum (TCP/TLS, `tls-native`/`tls-rustls` features) is dropped accordingly —
//! see `DESIGN.md`.

use std::io;

use tokio::net::TcpStream;

/// Resolve and connect. `tokio::net::TcpStream::connect` already does the resolution (via
/// `ToSocketAddrs`, on a blocking thread internally), so there's no separate
/// `resolve_addr`/`try_connect` split here the way the teacher's `main_loop` had one.
pub(crate) async fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
