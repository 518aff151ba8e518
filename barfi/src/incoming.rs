/// One in-flight upload. The handler owns the destination file and pushes
/// every completed write through `record_write`, which keeps the byte
/// counter and decides when a progress notification is due. Snapshots for
/// the front-end are taken under the same lock so name/bytes/done are
/// always consistent with each other.
pub struct IncomingFile {
    name: String,
    started: std::time::SystemTime,
    /// Declared size from the request, or -1 if unknown. Never 0: a
    /// zero-length put has no `IncomingFile` at all.
    declared_size: i64,
    /// Set only in direct mode, where the bytes land in a user-visible
    /// `.partial` file.
    partial_path: Option<std::path::PathBuf>,
    backend: std::sync::Arc<dyn crate::Backend>,
    state: std::sync::Mutex<Progress>,
}

#[derive(Default)]
struct Progress {
    copied: i64,
    done: bool,
    last_notify: Option<std::time::Instant>,
}

impl IncomingFile {
    pub(crate) fn new(
        name: String,
        declared_size: i64,
        partial_path: Option<std::path::PathBuf>,
        backend: std::sync::Arc<dyn crate::Backend>,
    ) -> Self {
        IncomingFile {
            name,
            started: std::time::SystemTime::now(),
            declared_size,
            partial_path,
            backend,
            state: std::sync::Mutex::new(Progress::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accounts for `n` bytes that have already hit the destination file.
    /// Publishes at most one progress notification per wall-clock second
    /// per upload; the first write always notifies.
    pub(crate) fn record_write(&self, n: usize) {
        if n == 0 {
            return;
        }
        let due = {
            let mut state = self.state.lock().unwrap();
            state.copied += n as i64;
            let now = std::time::Instant::now();
            match state.last_notify {
                Some(t) if now.duration_since(t) <= std::time::Duration::from_secs(1) => false,
                _ => {
                    state.last_notify = Some(now);
                    true
                }
            }
        };
        if due {
            self.backend.send_file_notify();
        }
    }

    /// Terminal notification for direct mode: the `.partial` file is
    /// complete and the front-end should finalize it.
    pub(crate) fn mark_and_notify_done(&self) {
        self.state.lock().unwrap().done = true;
        self.backend.send_file_notify();
    }

    /// Consistent snapshot for the front-end.
    pub fn partial_file(&self) -> PartialFile {
        let state = self.state.lock().unwrap();
        PartialFile {
            name: self.name.clone(),
            started: self.started,
            declared_size: self.declared_size,
            received: state.copied,
            partial_path: self.partial_path.clone(),
            done: state.done,
        }
    }
}

/// Progress snapshot of one in-flight upload, as shipped to the
/// front-end.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PartialFile {
    pub name: String,
    pub started: std::time::SystemTime,
    pub declared_size: i64,
    pub received: i64,
    pub partial_path: Option<std::path::PathBuf>,
    pub done: bool,
}
