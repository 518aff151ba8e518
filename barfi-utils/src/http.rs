pub type ApiResponse =
    hyper::Response<http_body_util::combinators::BoxBody<hyper::body::Bytes, hyper::Error>>;
pub type ApiResult = eyre::Result<ApiResponse>;

pub fn ok_(s: String) -> ApiResponse {
    bytes_to_resp(s.into_bytes(), hyper::StatusCode::OK)
}

pub fn html_(s: String) -> ApiResponse {
    let mut r = bytes_to_resp(s.into_bytes(), hyper::StatusCode::OK);
    r.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    r
}

pub fn server_error_(m: String) -> ApiResponse {
    bytes_to_resp(m.into_bytes(), hyper::StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn bad_request_(m: String) -> ApiResponse {
    bytes_to_resp(m.into_bytes(), hyper::StatusCode::BAD_REQUEST)
}

pub fn forbidden_(m: String) -> ApiResponse {
    bytes_to_resp(m.into_bytes(), hyper::StatusCode::FORBIDDEN)
}

pub fn method_not_allowed_(m: String) -> ApiResponse {
    bytes_to_resp(m.into_bytes(), hyper::StatusCode::METHOD_NOT_ALLOWED)
}

#[macro_export]
macro_rules! ok {
    ($($t:tt)*) => {{
        $crate::http::ok_(format!($($t)*))
    }};
}

#[macro_export]
macro_rules! server_error {
    ($($t:tt)*) => {{
        $crate::http::server_error_(format!($($t)*))
    }};
}

#[macro_export]
macro_rules! bad_request {
    ($($t:tt)*) => {{
        $crate::http::bad_request_(format!($($t)*))
    }};
}

#[macro_export]
macro_rules! forbidden {
    ($($t:tt)*) => {{
        $crate::http::forbidden_(format!($($t)*))
    }};
}

#[macro_export]
macro_rules! method_not_allowed {
    ($($t:tt)*) => {{
        $crate::http::method_not_allowed_(format!($($t)*))
    }};
}

pub fn bytes_to_resp(bytes: Vec<u8>, status: hyper::StatusCode) -> ApiResponse {
    use http_body_util::BodyExt;

    let mut r = hyper::Response::new(
        http_body_util::Full::new(hyper::body::Bytes::from(bytes))
            .map_err(|e| match e {})
            .boxed(),
    );
    *r.status_mut() = status;
    r
}

/// Escapes the five characters that matter when interpolating untrusted
/// text into an HTML page.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
