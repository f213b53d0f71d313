//! Remote path utilities
//!
//! Remote SFTP paths always use `/` as separator (per SFTP protocol), no matter
//! which separator the local machine uses. Everything that ends up in a remote
//! call or in the creation cache goes through [`normalize_remote_path`] first.

use std::path::{Component, Path};

/// Convert every `\` to `/`.
///
/// # Examples
/// ```
/// use sftp_deploy::sftp::path_utils::normalize_remote_path;
/// assert_eq!(normalize_remote_path("C:\\site\\css"), "C:/site/css");
/// assert_eq!(normalize_remote_path("/var/www"), "/var/www");
/// ```
pub fn normalize_remote_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Check if a remote SFTP path is absolute.
///
/// Even Windows SSH servers present paths in Unix style.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    let component = component.trim_start_matches('/');
    if base.is_empty() {
        component.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Rewrite a leading `/~` home marker to `~`.
///
/// Joining `/` with `~/site` yields `/~/site`; the server resolves `~`
/// relative paths against the login directory, so the leading slash must go.
pub fn expand_home_marker(path: &str) -> String {
    if path == "/~" || path.starts_with("/~/") {
        path[1..].to_string()
    } else {
        path.to_string()
    }
}

/// Strip trailing slashes, keeping a lone `/` intact.
fn trim_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Parent directory of a remote path, `None` for `/`, `~`, `.` or a bare name.
pub fn remote_parent(path: &str) -> Option<String> {
    let path = trim_trailing_slashes(path);
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

/// Every ancestor directory of `dir`, `dir` itself included, nearest first.
///
/// ```
/// use sftp_deploy::sftp::path_utils::remote_ancestors;
/// assert_eq!(remote_ancestors("/a/b/c"), vec!["/a/b/c", "/a/b", "/a", "/"]);
/// ```
pub fn remote_ancestors(dir: &str) -> Vec<String> {
    let mut current = Some(trim_trailing_slashes(dir).to_string());
    let mut out = Vec::new();
    while let Some(path) = current {
        current = remote_parent(&path);
        out.push(path);
    }
    out
}

/// True when `path` lies strictly below `root`.
///
/// `root` itself and anything at or above it is outside.
pub fn is_strictly_inside(path: &str, root: &str) -> bool {
    let path = trim_trailing_slashes(path);
    let root = trim_trailing_slashes(root);
    if path == root {
        return false;
    }
    if root == "/" {
        return is_absolute_remote_path(path);
    }
    if root.is_empty() {
        return !is_absolute_remote_path(path);
    }
    path.strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Render a relative local path as a `/`-joined remote fragment.
///
/// `..` and prefix/root components are dropped so a local path can never walk
/// above the remote deployment root.
pub fn local_to_remote_fragment(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
