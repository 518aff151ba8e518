/// Owns the set of active listeners, one per local overlay address.
/// The host calls `reconfigure` whenever its address set changes and
/// advertises the URLs from `urls` through the mesh control plane.
pub struct ListenerSet {
    server: std::sync::Arc<crate::DropServer>,
    graceful: barfi_utils::Graceful,
    listeners: tokio::sync::Mutex<std::collections::HashMap<std::net::IpAddr, crate::DropListener>>,
}

impl ListenerSet {
    pub fn new(server: std::sync::Arc<crate::DropServer>, graceful: barfi_utils::Graceful) -> Self {
        ListenerSet {
            server,
            graceful,
            listeners: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Brings the listener set in line with `addrs`: departed addresses
    /// have their listeners closed (synchronously with accept-loop exit),
    /// new addresses get listeners. A bind failure loses that address but
    /// not the others.
    pub async fn reconfigure(&self, addrs: &[std::net::IpAddr]) {
        let mut listeners = self.listeners.lock().await;

        let departed: Vec<std::net::IpAddr> = listeners
            .keys()
            .copied()
            .filter(|ip| !addrs.contains(ip))
            .collect();
        for ip in departed {
            if let Some(listener) = listeners.remove(&ip) {
                tracing::info!(%ip, "address withdrawn, closing listener");
                listener.close().await;
            }
        }

        for ip in addrs {
            if listeners.contains_key(ip) {
                continue;
            }
            // in userspace-stack mode only one real socket exists; every
            // further address still gets a derived port and URL
            let listener = if self.server.network_mode() == crate::NetworkMode::Userspace
                && listeners.values().any(crate::DropListener::is_bound)
            {
                crate::DropListener::endpoint_less(*ip)
            } else {
                match crate::DropListener::spawn(self.server.clone(), *ip, &self.graceful) {
                    Ok(listener) => listener,
                    Err(e) => {
                        tracing::error!(%ip, "failed to start listener, skipping address: {e:?}");
                        continue;
                    }
                }
            };
            listeners.insert(*ip, listener);
        }
    }

    /// Reachable base URLs of every active listener, for advertisement.
    pub async fn urls(&self) -> Vec<String> {
        let listeners = self.listeners.lock().await;
        let mut urls: Vec<String> = listeners.values().map(|l| l.url().to_string()).collect();
        urls.sort();
        urls
    }

    /// Port the listener for `ip` is reachable on, if any.
    pub async fn port(&self, ip: std::net::IpAddr) -> Option<u16> {
        self.listeners.lock().await.get(&ip).map(|l| l.port())
    }

    /// Closes every listener. In-flight connections drain on their own.
    pub async fn shutdown(&self) {
        let mut listeners = self.listeners.lock().await;
        for (ip, listener) in listeners.drain() {
            tracing::debug!(%ip, "closing listener");
            listener.close().await;
        }
    }
}
