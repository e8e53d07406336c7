use std::path::PathBuf;

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "FRAMELINK_SOCKET";

const SOCKET_PREFIX: &str = "framelink";

/// Resolve the per-user socket path.
///
/// Order: `$FRAMELINK_SOCKET`, then `$XDG_RUNTIME_DIR/framelink-{uid}.sock` when
/// that directory exists, then `{temp_dir}/framelink-{uid}.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SOCKET_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    let file_name = format!("{SOCKET_PREFIX}-{}.sock", current_uid());
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(std::env::temp_dir)
        .join(file_name)
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_name_contains_uid() {
        // Only meaningful when the override is unset in the test environment.
        if std::env::var_os(SOCKET_ENV).is_some() {
            return;
        }
        let path = default_socket_path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .expect("socket path should have a file name");
        assert_eq!(name, format!("framelink-{}.sock", current_uid()));
    }
}
