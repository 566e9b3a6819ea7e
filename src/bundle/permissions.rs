//! Bundle directory permission policy

use serde_json::Value;

/// Mode of a bundle directory by default
pub const BUNDLE_DIR_MODE: u32 = 0o700;

/// Mode that lets remapped users traverse the bundle directory
pub const RELAXED_BUNDLE_DIR_MODE: u32 = 0o711;

/// Mode of namespace, rootfs and working directories
pub const SHARED_DIR_MODE: u32 = 0o711;

/// Mode the configuration file is created with (before umask)
pub const CONFIG_FILE_MODE: u32 = 0o666;

/// Whether the container described by `config` runs with remapped ids.
///
/// A user-namespaced container runs as a host uid other than ours, so it
/// needs search permission on the bundle directory to reach its rootfs.
/// Payloads that are not JSON get the default policy.
pub fn needs_relaxed_permissions(config: &[u8]) -> bool {
    let spec: Value = match serde_json::from_slice(config) {
        Ok(spec) => spec,
        Err(_) => return false,
    };

    let linux = match spec.get("linux") {
        Some(linux) => linux,
        None => return false,
    };

    let has_mappings = |key: &str| {
        linux
            .get(key)
            .and_then(Value::as_array)
            .map(|mappings| !mappings.is_empty())
            .unwrap_or(false)
    };

    if has_mappings("uidMappings") || has_mappings("gidMappings") {
        return true;
    }

    linux
        .get("namespaces")
        .and_then(Value::as_array)
        .map(|namespaces| {
            namespaces
                .iter()
                .any(|ns| ns.get("type").and_then(Value::as_str) == Some("user"))
        })
        .unwrap_or(false)
}

/// Mode for a bundle directory holding `config`
pub fn bundle_dir_mode(config: &[u8]) -> u32 {
    if needs_relaxed_permissions(config) {
        RELAXED_BUNDLE_DIR_MODE
    } else {
        BUNDLE_DIR_MODE
    }
}
