//! Content types used by the built-in endpoints.

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_JSON_UTF_8: &str = "application/json; charset=utf-8";
pub const APPLICATION_FORM: &str = "application/x-www-form-urlencoded";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
pub const MULTIPART_FORM: &str = "multipart/form-data";
pub const TEXT_HTML: &str = "text/html";
pub const TEXT_HTML_UTF_8: &str = "text/html; charset=utf-8";
pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";
