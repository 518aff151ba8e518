/// What the file-drop service needs from the node that embeds it.
///
/// The mesh control plane owns peer identity and capabilities; the
/// front-end notification bus is whatever the host wires up. We only
/// describe the seam here so the core stays testable without a running
/// mesh.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Resolves the remote end of an accepted connection to a peer
    /// identity. `None` means the address is not a known mesh peer and
    /// the connection must be dropped before any request is parsed.
    async fn who_is(&self, addr: std::net::SocketAddr) -> Option<Peer>;

    /// Whether the file-sharing capability is advertised for this node.
    fn has_cap_file_sharing(&self) -> bool;

    /// Pokes the front-end notification bus. Fired on coalesced upload
    /// progress, on terminal completion in direct mode, and after every
    /// successful put.
    fn send_file_notify(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeInfo {
    pub computed_name: String,
    pub user: UserId,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserProfile {
    pub display_name: String,
}

/// A resolved remote peer: the node making the connection plus the
/// profile of the user owning it.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub node: NodeInfo,
    pub user: UserProfile,
}

/// Whether TCP for overlay addresses is terminated by the host kernel or
/// by a userspace stack inside this process. Affects bind semantics: in
/// userspace mode the listener accepts via the stack's loopback, so we
/// bind the unspecified address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Kernel,
    Userspace,
}

/// Platform hook for sandboxed OSes that must setsockopt an interface
/// index onto the socket before bind. Receives the raw socket, the
/// overlay address, and the tun device name.
pub type ListenHook = fn(&tokio::net::TcpSocket, std::net::IpAddr, &str) -> eyre::Result<()>;

static LISTEN_HOOK: std::sync::OnceLock<ListenHook> = std::sync::OnceLock::new();

/// Registers the platform listen hook. First registration wins; later
/// calls are ignored.
pub fn set_listen_hook(hook: ListenHook) {
    let _ = LISTEN_HOOK.set(hook);
}

pub(crate) fn listen_hook() -> Option<ListenHook> {
    LISTEN_HOOK.get().copied()
}
