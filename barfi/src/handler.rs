const PUT_PREFIX: &str = "/v0/put/";

/// Per-connection request handler. Built by the dispatcher after the
/// remote address has been resolved to a peer, so every request on the
/// connection sees the same immutable identity.
pub struct DropHandler {
    server: std::sync::Arc<crate::DropServer>,
    remote: std::net::SocketAddr,
    peer_node: crate::NodeInfo,
    peer_user: crate::UserProfile,
    /// whether the peer is owned by the same user as this node
    is_self: bool,
}

impl DropHandler {
    pub(crate) fn new(
        server: std::sync::Arc<crate::DropServer>,
        remote: std::net::SocketAddr,
        peer: crate::Peer,
    ) -> Self {
        let is_self = peer.node.user == server.self_node().user;
        DropHandler {
            server,
            remote,
            peer_node: peer.node,
            peer_user: peer.user,
            is_self,
        }
    }

    pub async fn handle_request(
        &self,
        r: hyper::Request<hyper::body::Incoming>,
    ) -> barfi_utils::ApiResult {
        if r.uri().path().starts_with(PUT_PREFIX) {
            return self.handle_put(r).await;
        }
        Ok(self.greeting())
    }

    /// Landing page for anyone poking the port with a browser. No side
    /// effects.
    fn greeting(&self) -> barfi_utils::ApiResponse {
        let who = barfi_utils::html_escape(&self.peer_user.display_name);
        let device = barfi_utils::html_escape(&self.peer_node.computed_name);
        let mut page = format!(
            "<html>\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <body>\n\
             <h1>Hello, {who} ({ip})</h1>\n\
             This is my barfi node. Your device is {device}.\n",
            ip = self.remote.ip(),
        );
        if self.is_self {
            page.push_str("<p>You are the owner of this node.\n");
        }
        barfi_utils::http::html_(page)
    }

    async fn handle_put(
        &self,
        r: hyper::Request<hyper::body::Incoming>,
    ) -> barfi_utils::ApiResult {
        if !self.is_self {
            tracing::info!(remote = %self.remote, "put rejected: not owner");
            return Ok(barfi_utils::forbidden!("not owner"));
        }
        if !self.server.backend().has_cap_file_sharing() {
            tracing::info!(remote = %self.remote, "put rejected: file sharing not enabled");
            return Ok(barfi_utils::forbidden!("file sharing not enabled"));
        }
        if r.method() != hyper::Method::PUT {
            return Ok(barfi_utils::method_not_allowed!("expected method PUT"));
        }
        if self.server.root_dir().is_none() {
            return Ok(barfi_utils::server_error!("no rootdir"));
        }

        // the path is still percent-encoded here; a literal slash in the
        // name would have arrived as %2F
        let raw_path = r.uri().path().to_string();
        let suffix = match raw_path.strip_prefix(PUT_PREFIX) {
            Some(suffix) => suffix,
            None => return Ok(barfi_utils::server_error!("misconfigured internals")),
        };
        if suffix.is_empty() {
            return Ok(barfi_utils::bad_request!("empty filename"));
        }
        if suffix.contains('/') {
            return Ok(barfi_utils::bad_request!("directories not supported"));
        }
        let base_name = match percent_encoding::percent_decode_str(suffix).decode_utf8() {
            Ok(name) => name.into_owned(),
            Err(_) => return Ok(barfi_utils::bad_request!("bad path encoding")),
        };
        if base_name.contains('/') {
            // an encoded %2F is still a directory separator
            return Ok(barfi_utils::bad_request!("directories not supported"));
        }
        let dst = match self.server.disk_path(&base_name) {
            Some(dst) => dst,
            None => return Ok(barfi_utils::bad_request!("bad filename")),
        };
        let dst = match self.server.direct_file_mode() {
            true => {
                let mut s = dst.into_os_string();
                s.push(crate::PARTIAL_SUFFIX);
                std::path::PathBuf::from(s)
            }
            false => dst,
        };

        let mut file = match tokio::fs::File::create(&dst).await {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("put create error: {e:?}");
                return Ok(barfi_utils::server_error!("{e}"));
            }
        };

        let declared_size = declared_size(&r);
        let mut final_size = 0i64;
        let mut in_file = None;
        if declared_size != 0 {
            let incoming = std::sync::Arc::new(crate::IncomingFile::new(
                base_name.clone(),
                declared_size,
                self.server.direct_file_mode().then(|| dst.clone()),
                self.server.backend().clone(),
            ));
            self.server.register_incoming_file(&incoming, true);
            let copied = copy_body(r.into_body(), &mut file, &incoming).await;
            self.server.register_incoming_file(&incoming, false);
            match copied {
                Ok(n) => final_size = n,
                Err(e) => {
                    drop(file);
                    remove_failed(&dst).await;
                    tracing::error!("put copy error: {e:?}");
                    return Ok(barfi_utils::server_error!("{e}"));
                }
            }
            in_file = Some(incoming);
        }

        if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut file).await {
            drop(file);
            remove_failed(&dst).await;
            tracing::error!("put close error: {e:?}");
            return Ok(barfi_utils::server_error!("{e}"));
        }
        drop(file);

        if self.server.direct_file_mode() {
            // zero-length puts have no in-flight record and no terminal
            // notification; the unconditional notify below still wakes
            // the front-end
            if let Some(in_file) = in_file {
                in_file.mark_and_notify_done();
            }
        }

        tracing::info!(
            "put of {} from {}/{}",
            approx_size(final_size),
            self.remote.ip(),
            self.peer_node.computed_name
        );

        self.server.clear_known_empty();
        self.server.backend().send_file_notify();
        Ok(barfi_utils::ok!("{{}}\n"))
    }
}

fn declared_size(r: &hyper::Request<hyper::body::Incoming>) -> i64 {
    // absent or unparseable means unknown, which is never 0
    r.headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(-1)
}

/// Streams the request body into the destination file, accounting each
/// completed write against the in-flight record.
async fn copy_body(
    body: hyper::body::Incoming,
    file: &mut tokio::fs::File,
    incoming: &crate::IncomingFile,
) -> eyre::Result<i64> {
    use eyre::WrapErr;
    use http_body_util::BodyExt;
    use tokio::io::AsyncWriteExt;

    let mut body = body;
    let mut copied = 0i64;
    while let Some(frame) = body.frame().await {
        let frame = frame.wrap_err_with(|| "failed to read request body")?;
        let Ok(data) = frame.into_data() else {
            // trailers, nothing to write
            continue;
        };
        if data.is_empty() {
            continue;
        }
        file.write_all(&data)
            .await
            .wrap_err_with(|| "failed to write to destination")?;
        copied += data.len() as i64;
        incoming.record_write(data.len());
    }
    Ok(copied)
}

/// Best-effort removal of a destination a failed put left behind.
async fn remove_failed(dst: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(dst).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::error!("failed to remove after failed put: {e:?}");
        }
    }
}

fn approx_size(n: i64) -> String {
    if n <= 1 << 10 {
        return "<=1KB".to_string();
    }
    if n <= 1 << 20 {
        return "<=1MB".to_string();
    }
    format!("~{}MB", n >> 20)
}

#[cfg(test)]
mod tests {
    use crate::testutil::{peer, test_server_with};

    #[test]
    fn approx_size_buckets() {
        assert_eq!(super::approx_size(0), "<=1KB");
        assert_eq!(super::approx_size(1024), "<=1KB");
        assert_eq!(super::approx_size(1025), "<=1MB");
        assert_eq!(super::approx_size(1 << 20), "<=1MB");
        assert_eq!(super::approx_size(5 << 20), "~5MB");
    }

    async fn body_of(resp: barfi_utils::ApiResponse) -> String {
        use http_body_util::BodyExt;
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn greeting_escapes_interpolations() {
        let (server, _root) = test_server_with(|c| c.self_node.user = crate::UserId(7));
        let handler = super::DropHandler::new(
            std::sync::Arc::new(server),
            "100.64.0.9:55555".parse().unwrap(),
            peer("<Alice>", "alices-<laptop>", crate::UserId(7)),
        );

        let page = body_of(handler.greeting()).await;
        assert!(page.contains("&lt;Alice&gt;"));
        assert!(page.contains("alices-&lt;laptop&gt;"));
        assert!(!page.contains("<Alice>"));
        assert!(page.contains("100.64.0.9"));
        assert!(page.contains("You are the owner of this node."));
    }

    #[tokio::test]
    async fn greeting_omits_owner_marker_for_other_users() {
        let (server, _root) = test_server_with(|c| c.self_node.user = crate::UserId(7));
        let handler = super::DropHandler::new(
            std::sync::Arc::new(server),
            "100.64.0.9:55555".parse().unwrap(),
            peer("Bob", "bobs-phone", crate::UserId(8)),
        );

        let page = body_of(handler.greeting()).await;
        assert!(page.contains("Hello, Bob"));
        assert!(!page.contains("owner of this node"));
    }
}
