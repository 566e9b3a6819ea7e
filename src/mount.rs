//! Mount detachment
//!
//! Before a bundle's rootfs directory can be removed, everything mounted at
//! or below it has to be detached. [`HostMounts`] does this on Linux by
//! scanning `/proc/self/mountinfo` and calling `umount2(2)` deepest-first.

use std::io;
use std::path::{Path, PathBuf};

/// Umount flags
pub mod umount_flags {
    /// Force unmount
    pub const MNT_FORCE: i32 = 1;
    /// Lazy unmount
    pub const MNT_DETACH: i32 = 2;
}

/// Detaches mounts under a path
pub trait MountDetacher: Send + Sync {
    /// Unmount everything mounted at or under `target`.
    ///
    /// Already-unmounted and missing targets are success.
    fn unmount_all(&self, target: &Path) -> io::Result<()>;
}

/// Mount table of the running host
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounts {
    flags: i32,
}

impl HostMounts {
    /// Create a detacher passing `flags` to every `umount2` call
    pub fn new(flags: i32) -> Self {
        Self { flags }
    }

    /// Detacher that unmounts lazily
    pub fn lazy() -> Self {
        Self::new(umount_flags::MNT_DETACH)
    }
}

impl MountDetacher for HostMounts {
    fn unmount_all(&self, target: &Path) -> io::Result<()> {
        let Some(target) = resolve_target(target)? else {
            return Ok(());
        };

        for mount_point in mounts_under(&target)? {
            tracing::debug!("unmounting {}", mount_point.display());
            unmount_stack(&mount_point, self.flags)?;
        }

        Ok(())
    }
}

/// `target` with its parent directory canonicalized.
///
/// The last component is kept as given, so a symlink planted there is never
/// followed to a mount tree outside the bundle. `None` when the parent is
/// gone.
fn resolve_target(target: &Path) -> io::Result<Option<PathBuf>> {
    let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no unmount target in {}", target.display()),
        ));
    };

    match std::fs::canonicalize(parent) {
        Ok(parent) => Ok(Some(parent.join(name))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Mount points at or under `target`, deepest first
#[cfg(target_os = "linux")]
fn mounts_under(target: &Path) -> io::Result<Vec<PathBuf>> {
    let mountinfo = std::fs::read_to_string("/proc/self/mountinfo")?;
    let mut points: Vec<PathBuf> = parse_mount_points(&mountinfo)
        .into_iter()
        .filter(|p| p.starts_with(target))
        .collect();

    points.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| b.cmp(a))
    });
    points.dedup();

    Ok(points)
}

#[cfg(not(target_os = "linux"))]
fn mounts_under(_target: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(Vec::new())
}

/// Unmount every mount stacked on `path`
#[cfg(target_os = "linux")]
fn unmount_stack(path: &Path, flags: i32) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    loop {
        let result = unsafe { libc::umount2(c_path.as_ptr(), flags) };
        if result == 0 {
            continue;
        }

        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            // Nothing (more) mounted here
            Some(libc::EINVAL) | Some(libc::ENOENT) => Ok(()),
            _ => Err(err),
        };
    }
}

#[cfg(not(target_os = "linux"))]
fn unmount_stack(_path: &Path, _flags: i32) -> io::Result<()> {
    Ok(())
}

/// Mount points listed in a mountinfo table
fn parse_mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

/// Decode the octal escapes (`\040` and friends) mountinfo uses
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
