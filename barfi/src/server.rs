use eyre::WrapErr;

/// Per-node state of the file-drop service: the staging directory, the
/// self identity used for the owner check, and the set of in-flight
/// uploads the front-end can observe.
pub struct DropServer {
    root_dir: Option<std::path::PathBuf>,
    tun_name: String,
    self_node: crate::NodeInfo,
    /// direct mode: uploads land as `<name>.partial` in a user-visible
    /// download directory for a GUI front-end to finalize, instead of
    /// being staged for later retrieval.
    direct_file_mode: bool,
    network_mode: crate::NetworkMode,
    backend: std::sync::Arc<dyn crate::Backend>,

    /// Negative-existence cache: true once a full scan observed the
    /// staging directory empty. Purely an optimization for front-end
    /// polling; never consulted for enumeration or delete correctness.
    known_empty: std::sync::atomic::AtomicBool,
    incoming: std::sync::Mutex<Vec<std::sync::Arc<crate::IncomingFile>>>,
}

pub struct DropConfig {
    /// Staging root. `None` disables the service: stores reject every
    /// operation and no upload is ever registered.
    pub root_dir: Option<std::path::PathBuf>,
    /// Name of the tun device, handed to the platform listen hook.
    pub tun_name: String,
    pub self_node: crate::NodeInfo,
    pub direct_file_mode: bool,
    pub network_mode: crate::NetworkMode,
}

/// A completed upload waiting in the staging directory, as shipped to
/// the front-end.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WaitingFile {
    pub name: String,
    pub size: u64,
}

impl DropServer {
    pub fn new(config: DropConfig, backend: std::sync::Arc<dyn crate::Backend>) -> Self {
        DropServer {
            root_dir: config.root_dir,
            tun_name: config.tun_name,
            self_node: config.self_node,
            direct_file_mode: config.direct_file_mode,
            network_mode: config.network_mode,
            backend,
            known_empty: std::sync::atomic::AtomicBool::new(false),
            incoming: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn backend(&self) -> &std::sync::Arc<dyn crate::Backend> {
        &self.backend
    }

    pub(crate) fn self_node(&self) -> &crate::NodeInfo {
        &self.self_node
    }

    pub(crate) fn tun_name(&self) -> &str {
        &self.tun_name
    }

    pub fn network_mode(&self) -> crate::NetworkMode {
        self.network_mode
    }

    pub fn direct_file_mode(&self) -> bool {
        self.direct_file_mode
    }

    pub(crate) fn root_dir(&self) -> Option<&std::path::Path> {
        self.root_dir.as_deref()
    }

    pub(crate) fn disk_path(&self, base_name: &str) -> Option<std::path::PathBuf> {
        crate::filename::disk_path(self.root_dir.as_deref()?, base_name)
    }

    pub(crate) fn clear_known_empty(&self) {
        self.known_empty
            .store(false, std::sync::atomic::Ordering::Relaxed);
    }

    /// Cheap probe for the front-end: are any completed uploads waiting?
    ///
    /// The staging directory is usually empty, so a scan that reaches the
    /// end without finding a file records that and later probes skip the
    /// filesystem entirely until the next successful upload. Errors are
    /// reported as "nothing waiting" rather than propagated.
    pub async fn has_files_waiting(&self) -> bool {
        let root = match &self.root_dir {
            Some(root) => root,
            None => return false,
        };
        if self.direct_file_mode {
            return false;
        }
        if self.known_empty.load(std::sync::atomic::Ordering::Relaxed) {
            return false;
        }
        let mut dir = match tokio::fs::read_dir(root).await {
            Ok(dir) => dir,
            Err(_) => return false,
        };
        loop {
            match dir.next_entry().await {
                Ok(Some(entry)) => {
                    if entry
                        .file_name()
                        .to_string_lossy()
                        .ends_with(crate::PARTIAL_SUFFIX)
                    {
                        continue;
                    }
                    match entry.file_type().await {
                        Ok(t) if t.is_file() => return true,
                        _ => continue,
                    }
                }
                Ok(None) => {
                    // full scan came up empty, remember that
                    self.known_empty
                        .store(true, std::sync::atomic::Ordering::Relaxed);
                    return false;
                }
                Err(_) => return false,
            }
        }
    }

    /// Enumerates completed uploads in the staging directory. In-progress
    /// `.partial` files are skipped; entries whose metadata cannot be read
    /// are skipped too, but a failure to read the directory itself
    /// propagates.
    pub async fn waiting_files(&self) -> eyre::Result<Vec<WaitingFile>> {
        let root = match &self.root_dir {
            Some(root) => root,
            None => return Err(eyre::anyhow!("file drop disabled; no storage configured")),
        };
        if self.direct_file_mode {
            return Ok(Vec::new());
        }
        let mut dir = tokio::fs::read_dir(root)
            .await
            .wrap_err_with(|| "failed to open staging directory")?;
        let mut ret = Vec::new();
        loop {
            let entry = match dir
                .next_entry()
                .await
                .wrap_err_with(|| "failed to read staging directory")?
            {
                Some(entry) => entry,
                None => break,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(crate::PARTIAL_SUFFIX) {
                continue;
            }
            let md = match entry.metadata().await {
                Ok(md) => md,
                Err(_) => continue,
            };
            if !md.is_file() {
                continue;
            }
            ret.push(WaitingFile {
                name,
                size: md.len(),
            });
        }
        Ok(ret)
    }

    /// Deletes a waiting file. Unknown names succeed. On Windows an open
    /// file cannot be unlinked, so contention is retried with exponential
    /// backoff for up to ten seconds before giving up.
    pub async fn delete_file(&self, base_name: &str) -> eyre::Result<()> {
        if self.root_dir.is_none() {
            return Err(eyre::anyhow!("file drop disabled; no storage configured"));
        }
        if self.direct_file_mode {
            return Err(eyre::anyhow!("deletes not allowed in direct mode"));
        }
        let path = self
            .disk_path(base_name)
            .ok_or_else(|| eyre::anyhow!("bad filename"))?;

        let t0 = std::time::Instant::now();
        let mut delay = std::time::Duration::from_millis(100);
        loop {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    if cfg!(windows) && t0.elapsed() < std::time::Duration::from_secs(10) {
                        tracing::debug!(name = %base_name, "delete contended, backing off: {e:?}");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(std::time::Duration::from_secs(1));
                        continue;
                    }
                    tracing::error!(name = %base_name, "failed to delete file: {e:?}");
                    // the io error carries no path, and neither may we
                    return Err(eyre::anyhow!("failed to delete file: {}", e.kind()));
                }
            }
        }
    }

    /// Opens a waiting file for the front-end to read, returning it with
    /// its current size.
    pub async fn open_file(&self, base_name: &str) -> eyre::Result<(tokio::fs::File, u64)> {
        if self.root_dir.is_none() {
            return Err(eyre::anyhow!("file drop disabled; no storage configured"));
        }
        if self.direct_file_mode {
            return Err(eyre::anyhow!("opens not allowed in direct mode"));
        }
        let path = self
            .disk_path(base_name)
            .ok_or_else(|| eyre::anyhow!("bad filename"))?;
        let f = tokio::fs::File::open(&path)
            .await
            .wrap_err_with(|| format!("failed to open {base_name}"))?;
        let md = f
            .metadata()
            .await
            .wrap_err_with(|| format!("failed to stat {base_name}"))?;
        Ok((f, md.len()))
    }

    /// Joins or leaves the set of uploads visible to `partial_files`.
    pub fn register_incoming_file(
        &self,
        file: &std::sync::Arc<crate::IncomingFile>,
        active: bool,
    ) {
        let mut incoming = self.incoming.lock().unwrap();
        if active {
            incoming.push(file.clone());
        } else {
            incoming.retain(|f| !std::sync::Arc::ptr_eq(f, file));
        }
    }

    /// Snapshots every in-flight upload for the front-end.
    pub fn partial_files(&self) -> Vec<crate::PartialFile> {
        self.incoming
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.partial_file())
            .collect()
    }
}
