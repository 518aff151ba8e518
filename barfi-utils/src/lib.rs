#![deny(unsafe_code)]

extern crate self as barfi_utils;

mod graceful;
pub mod http;

pub use graceful::Graceful;
pub use http::{ApiResponse, ApiResult, html_escape};
