/// In-crate test double for the host node.
pub(crate) struct TestBackend {
    notifies: std::sync::atomic::AtomicUsize,
    pub(crate) cap_file_sharing: bool,
    pub(crate) peers:
        std::sync::Mutex<std::collections::HashMap<std::net::IpAddr, crate::Peer>>,
}

impl Default for TestBackend {
    fn default() -> Self {
        TestBackend {
            notifies: std::sync::atomic::AtomicUsize::new(0),
            cap_file_sharing: true,
            peers: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl TestBackend {
    pub(crate) fn notify_count(&self) -> usize {
        self.notifies.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl crate::Backend for TestBackend {
    async fn who_is(&self, addr: std::net::SocketAddr) -> Option<crate::Peer> {
        self.peers.lock().unwrap().get(&addr.ip()).cloned()
    }

    fn has_cap_file_sharing(&self) -> bool {
        self.cap_file_sharing
    }

    fn send_file_notify(&self) {
        self.notifies
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

pub(crate) fn peer(display_name: &str, computed_name: &str, user: crate::UserId) -> crate::Peer {
    crate::Peer {
        node: crate::NodeInfo {
            computed_name: computed_name.to_string(),
            user,
        },
        user: crate::UserProfile {
            display_name: display_name.to_string(),
        },
    }
}

pub(crate) fn test_config(root: Option<std::path::PathBuf>) -> crate::DropConfig {
    crate::DropConfig {
        root_dir: root,
        tun_name: "barfi0".to_string(),
        self_node: crate::NodeInfo {
            computed_name: "self-node".to_string(),
            user: crate::UserId(1),
        },
        direct_file_mode: false,
        network_mode: crate::NetworkMode::Kernel,
    }
}

/// A server over a fresh temp staging root. The `TempDir` guard must be
/// kept alive for the server's lifetime.
pub(crate) fn test_server() -> (crate::DropServer, tempfile::TempDir) {
    test_server_with(|_| {})
}

pub(crate) fn test_server_with(
    tweak: impl FnOnce(&mut crate::DropConfig),
) -> (crate::DropServer, tempfile::TempDir) {
    let root = tempfile::TempDir::new().expect("failed to create temp staging root");
    let mut config = test_config(Some(root.path().to_path_buf()));
    tweak(&mut config);
    let backend = std::sync::Arc::new(TestBackend::default());
    (crate::DropServer::new(config, backend), root)
}
