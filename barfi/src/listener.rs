/// One listener per local overlay address, serving the peer drop API on
/// a deterministic port.
///
/// why a deterministic port at all? peers discover the port through the
/// mesh control plane, so nothing would break with an ephemeral one. but
/// a port you can predict from the address is very convenient when
/// debugging with curl across a handful of test machines, and because we
/// hash only the low three bytes of the address, the IPv4 and IPv6 forms
/// of the same overlay address usually land on the same port. it is a
/// best effort only: if the candidate is taken we perturb the seed a few
/// times and finally fall back to whatever the OS hands us, so nobody
/// should bake the derivation into a client.
///
/// each accepted connection is resolved to a peer identity *before* any
/// HTTP is parsed, and then served by its own `serve_connection` whose
/// service closure captures that identity. that is the whole trick that
/// lets the handler trust `is_self` without a request-context
/// side-channel.
pub struct DropListener {
    ip: std::net::IpAddr,
    port: u16,
    url: String,
    cancel: tokio_util::sync::CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl DropListener {
    /// Binds the address and starts the accept loop.
    pub fn spawn(
        server: std::sync::Arc<crate::DropServer>,
        ip: std::net::IpAddr,
        graceful: &barfi_utils::Graceful,
    ) -> eyre::Result<Self> {
        let listener = bind_listener(ip, server.network_mode(), server.tun_name())?;
        let port = listener.local_addr()?.port();
        let url = base_url(ip, port);
        let cancel = tokio_util::sync::CancellationToken::new();
        tracing::info!(%ip, port, "peer drop listener started");
        let task = graceful.spawn(accept_loop(
            server,
            listener,
            graceful.clone(),
            cancel.clone(),
        ));
        Ok(DropListener {
            ip,
            port,
            url,
            cancel,
            task: Some(task),
        })
    }

    /// A listener without an accept endpoint, used in userspace-stack
    /// mode for every address after the first: the stack delivers the
    /// connections, we only publish the derived port and URL.
    pub fn endpoint_less(ip: std::net::IpAddr) -> Self {
        let port = derive_port(ip, 0);
        DropListener {
            ip,
            port,
            url: base_url(ip, port),
            cancel: tokio_util::sync::CancellationToken::new(),
            task: None,
        }
    }

    pub fn ip(&self) -> std::net::IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL peers can reach this listener at, `http://<addr>:<port>/`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_bound(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the accept loop and waits for it to exit. Connections
    /// already being served keep running until their handler returns.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("accept loop panicked: {e:?}");
            }
        }
    }
}

fn base_url(ip: std::net::IpAddr, port: u16) -> String {
    format!("http://{}/", std::net::SocketAddr::new(ip, port))
}

/// Candidate port for an overlay address: CRC-32 (IEEE) over the low
/// three bytes of the 16-byte address form, mapped into the upper 32 KiB
/// range. `attempt` perturbs the first seed byte on bind failure.
pub(crate) fn derive_port(ip: std::net::IpAddr, attempt: u8) -> u16 {
    let a16 = match ip {
        std::net::IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        std::net::IpAddr::V6(v6) => v6.octets(),
    };
    let mut seed = [a16[13], a16[14], a16[15]];
    seed[0] = seed[0].wrapping_add(attempt);
    (32 << 10) | (crc32fast::hash(&seed) as u16)
}

fn bind_listener(
    ip: std::net::IpAddr,
    mode: crate::NetworkMode,
    tun_name: &str,
) -> eyre::Result<tokio::net::TcpListener> {
    for attempt in 0..5 {
        let port = derive_port(ip, attempt);
        match try_bind(ip, port, mode, tun_name) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(%ip, port, attempt, "bind failed, trying next candidate: {e:?}")
            }
        }
    }
    // all candidates taken, let the OS pick
    try_bind(ip, 0, mode, tun_name)
}

fn try_bind(
    ip: std::net::IpAddr,
    port: u16,
    mode: crate::NetworkMode,
    tun_name: &str,
) -> eyre::Result<tokio::net::TcpListener> {
    use eyre::WrapErr;

    let socket = match ip {
        std::net::IpAddr::V4(_) => tokio::net::TcpSocket::new_v4()?,
        std::net::IpAddr::V6(_) => tokio::net::TcpSocket::new_v6()?,
    };

    let mut bind_ip = ip;
    if let Some(hook) = crate::backend::listen_hook() {
        // sandboxed OSes scope the socket to the tun interface here, and
        // the socket must then bind the unspecified address
        hook(&socket, ip, tun_name)?;
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            bind_ip = unspecified(ip);
        }
    }
    if mode == crate::NetworkMode::Userspace {
        // the userspace stack terminates TCP and hands us connections
        // over its loopback, the overlay address is not bindable here
        bind_ip = unspecified(ip);
    }

    socket
        .bind(std::net::SocketAddr::new(bind_ip, port))
        .wrap_err_with(|| format!("failed to bind port {port}"))?;
    socket
        .listen(1024)
        .wrap_err_with(|| format!("failed to listen on port {port}"))
}

fn unspecified(ip: std::net::IpAddr) -> std::net::IpAddr {
    match ip {
        std::net::IpAddr::V4(_) => std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        std::net::IpAddr::V6(_) => std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    }
}

async fn accept_loop(
    server: std::sync::Arc<crate::DropServer>,
    listener: tokio::net::TcpListener,
    graceful: barfi_utils::Graceful,
    cancel: tokio_util::sync::CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("listener closed");
                break;
            }
            _ = graceful.cancelled() => break,
            r = listener.accept() => match r {
                Ok((stream, _)) => {
                    let server = server.clone();
                    let g = graceful.clone();
                    graceful.spawn(async move { handle_connection(server, stream, g).await });
                }
                Err(e) => {
                    tracing::error!("failed to accept: {e:?}");
                    break;
                }
            }
        }
    }
}

/// Resolves the remote address to a peer identity, then serves this one
/// connection with a fresh HTTP server whose handler carries that
/// identity for its whole lifetime.
async fn handle_connection(
    server: std::sync::Arc<crate::DropServer>,
    stream: tokio::net::TcpStream,
    graceful: barfi_utils::Graceful,
) {
    let remote = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("connection without a remote address: {e:?}");
            return;
        }
    };
    let peer = match server.backend().who_is(remote).await {
        Some(peer) => peer,
        None => {
            tracing::info!(%remote, "unknown peer, dropping connection");
            return;
        }
    };
    tracing::debug!(%remote, peer = %peer.node.computed_name, "peer connected");

    let handler = std::sync::Arc::new(crate::DropHandler::new(server, remote, peer));

    let io = hyper_util::rt::TokioIo::new(stream);
    let builder =
        hyper_util::server::conn::auto::Builder::new(hyper_util::rt::tokio::TokioExecutor::new());
    tokio::pin! {
        let conn = builder.serve_connection(
            io,
            hyper::service::service_fn(move |r| {
                let h = handler.clone();
                async move { h.handle_request(r).await }
            }),
        );
    }

    if let Err(e) = tokio::select! {
        _ = graceful.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
        r = &mut conn => r,
    } {
        tracing::error!(%remote, "connection error: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::derive_port;

    #[test]
    fn derive_port_matches_crc_of_low_three_bytes() {
        let ip: std::net::IpAddr = "fd7a:115c:a1e0::102:304".parse().unwrap();
        // low three bytes of the 16-byte form are 02 03 04
        assert_eq!(
            derive_port(ip, 0),
            (32 << 10) | (crc32fast::hash(&[0x02, 0x03, 0x04]) as u16)
        );
        // a retry perturbs the first seed byte
        assert_eq!(
            derive_port(ip, 1),
            (32 << 10) | (crc32fast::hash(&[0x03, 0x03, 0x04]) as u16)
        );
    }

    #[test]
    fn derive_port_same_for_v4_and_mapped_v6() {
        let v4: std::net::IpAddr = "100.64.1.2".parse().unwrap();
        let v6: std::net::IpAddr = "::ffff:100.64.1.2".parse().unwrap();
        assert_eq!(derive_port(v4, 0), derive_port(v6, 0));
    }

    #[test]
    fn derive_port_stays_in_upper_range() {
        for last in 0..=255u8 {
            let ip = std::net::IpAddr::V4(std::net::Ipv4Addr::new(100, 64, 7, last));
            for attempt in 0..5 {
                assert!(derive_port(ip, attempt) >= 32 << 10);
            }
        }
    }
}
