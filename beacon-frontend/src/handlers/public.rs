//! `GET /public/*`: static assets served from a directory.
//!
//! Files are served by `tower_http`'s `ServeDir`, which handles content
//! types, `Range` and conditional requests, and `index.html` for directory
//! paths. Paths that would leave the root are answered with 404.

use std::path::Path;

use tower_http::services::ServeDir;

/// Service mounted under `/public` when a public directory is configured.
pub fn public_files(root: &Path) -> ServeDir {
    ServeDir::new(root).append_index_html_on_directories(true)
}
