//! Bundle lifecycle management
//!
//! Creation builds the bundle tree step by step under a [`Rollback`] guard,
//! so a failed create leaves nothing behind. Deletion is best-effort and
//! idempotent: it may be retried until it returns `Ok`.

use super::permissions::{bundle_dir_mode, BUNDLE_DIR_MODE, CONFIG_FILE_MODE, SHARED_DIR_MODE};
use super::rollback::Rollback;
use super::Bundle;
use crate::config::ManagerConfig;
use crate::error::{BundleError, Result};
use crate::events::{
    BundleCreated, BundleDeleted, LifecycleNotifier, TOPIC_BUNDLE_CREATE, TOPIC_BUNDLE_DELETE,
};
use crate::fs::atomic::is_delete_leftover;
use crate::fs::{atomic_remove, capture_bounded_file, ensure_dir, remove_all, Filesystem, HostFs};
use crate::identifiers;
use crate::mount::{HostMounts, MountDetacher};
use crate::namespaces::Context;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Creates, loads and deletes bundles
pub struct BundleManager {
    config: ManagerConfig,
    fs: Arc<dyn Filesystem>,
    mounts: Arc<dyn MountDetacher>,
    notifier: Option<Arc<dyn LifecycleNotifier>>,
}

impl BundleManager {
    /// Create a manager working on the host filesystem and mount table
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let mounts = if config.lazy_unmount {
            HostMounts::lazy()
        } else {
            HostMounts::default()
        };

        Ok(Self {
            config,
            fs: Arc::new(HostFs),
            mounts: Arc::new(mounts),
            notifier: None,
        })
    }

    /// Replace the filesystem implementation
    pub fn with_filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Replace the mount detacher
    pub fn with_mount_detacher(mut self, mounts: Arc<dyn MountDetacher>) -> Self {
        self.mounts = mounts;
        self
    }

    /// Publish lifecycle events to `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn LifecycleNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Handle for an existing bundle; performs no I/O
    pub fn load(&self, ctx: &Context, id: &str) -> Result<Bundle> {
        Bundle::load(&self.config.primary_root, ctx, id)
    }

    /// Handle for a bundle that must exist on disk
    pub fn open(&self, ctx: &Context, id: &str) -> Result<Bundle> {
        let bundle = self.load(ctx, id)?;
        let present = self
            .fs
            .symlink_metadata(&bundle.path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !present {
            return Err(BundleError::NotFound(format!(
                "{} in namespace {}",
                id, bundle.namespace
            )));
        }
        Ok(bundle)
    }

    /// Create a bundle holding `spec` as its runtime configuration
    pub fn create(&self, ctx: &Context, id: &str, spec: &[u8]) -> Result<Bundle> {
        identifiers::validate(id)?;
        let namespace = ctx.namespace_required()?;

        let bundle = Bundle {
            id: id.to_string(),
            namespace: namespace.to_string(),
            path: self.config.primary_root.join(namespace).join(id),
        };
        let work = bundle.work_path(&self.config.state_root);
        let fs = self.fs.as_ref();
        let mut rollback = Rollback::new(fs);

        let primary_ns = self.config.primary_root.join(namespace);
        ensure_dir(fs, &primary_ns, SHARED_DIR_MODE)?;
        rollback.shared(&primary_ns);

        fs.create_dir(&bundle.path, BUNDLE_DIR_MODE)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => BundleError::AlreadyExists(bundle.path.clone()),
                _ => BundleError::fs("create bundle directory", &bundle.path, e),
            })?;
        rollback.owned(&bundle.path);

        let mode = bundle_dir_mode(spec);
        if mode != BUNDLE_DIR_MODE {
            debug!("relaxing permissions on {} to {:o}", bundle.path.display(), mode);
            fs.set_permissions(&bundle.path, mode)
                .map_err(|e| BundleError::fs("set bundle permissions", &bundle.path, e))?;
        }

        let state_ns = self.config.state_root.join(namespace);
        ensure_dir(fs, &state_ns, SHARED_DIR_MODE)?;
        rollback.shared(&state_ns);

        let rootfs = bundle.rootfs();
        fs.create_dir(&rootfs, SHARED_DIR_MODE)
            .map_err(|e| BundleError::fs("create rootfs", &rootfs, e))?;
        rollback.owned(&rootfs);

        self.create_work_dir(&work)?;
        rollback.owned(&work);

        let link = bundle.work_link();
        fs.symlink(&work, &link)
            .map_err(|e| BundleError::fs("link work directory", &link, e))?;

        let config_path = bundle.config_path();
        fs.write_file(&config_path, spec, CONFIG_FILE_MODE)
            .map_err(|e| BundleError::fs("write bundle config", &config_path, e))?;

        rollback.commit();
        info!("created bundle {} in namespace {}", bundle.id, bundle.namespace);

        self.notify(
            namespace,
            TOPIC_BUNDLE_CREATE,
            &BundleCreated {
                id: bundle.id.clone(),
                bundle: bundle.path.clone(),
            },
        );

        Ok(bundle)
    }

    /// Create the working directory, replacing whatever an earlier run left
    /// at its path
    fn create_work_dir(&self, work: &Path) -> Result<()> {
        match self.fs.create_dir(work, SHARED_DIR_MODE) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!("replacing stale working directory {}", work.display());
                if let Err(e) = remove_all(self.fs.as_ref(), work) {
                    debug!("removing stale {} failed: {}", work.display(), e);
                }
                self.fs
                    .create_dir(work, SHARED_DIR_MODE)
                    .map_err(|e| BundleError::fs("create work directory", work, e))
            }
            Err(e) => Err(BundleError::fs("create work directory", work, e)),
        }
    }

    /// Delete a bundle and its working directory.
    ///
    /// Mounts under the rootfs are detached before anything is removed; if
    /// that fails the bundle is left untouched. Deleting a bundle that is
    /// already gone succeeds.
    pub fn delete(&self, bundle: &Bundle) -> Result<()> {
        let fs = self.fs.as_ref();
        let work = self.resolve_work_dir(bundle);

        self.log_panic_output(bundle);

        self.remove_rootfs(bundle)?;

        let result = match atomic_remove(fs, &bundle.path) {
            Ok(()) => match &work {
                Some(work) => atomic_remove(fs, work),
                None => Ok(()),
            },
            Err(err) => match &work {
                Some(work) => match atomic_remove(fs, work) {
                    Ok(()) => Err(err),
                    Err(work_err) => Err(BundleError::PartialCleanupFailed {
                        bundle: Box::new(err),
                        work: Box::new(work_err),
                    }),
                },
                None => Err(err),
            },
        };

        if result.is_ok() {
            info!("deleted bundle {} in namespace {}", bundle.id, bundle.namespace);
            self.notify(
                &bundle.namespace,
                TOPIC_BUNDLE_DELETE,
                &BundleDeleted {
                    id: bundle.id.clone(),
                },
            );
        }

        result
    }

    /// Detach and remove the rootfs mount point.
    ///
    /// Something other than a directory in its place cannot be a mount
    /// point; it is unlinked without touching the mount table.
    fn remove_rootfs(&self, bundle: &Bundle) -> Result<()> {
        let fs = self.fs.as_ref();
        let rootfs = bundle.rootfs();

        let result = match fs.symlink_metadata(&rootfs) {
            Ok(meta) if !meta.is_dir() => {
                warn!("bundle rootfs {} is not a directory, unlinking it", rootfs.display());
                fs.remove_file(&rootfs)
            }
            _ => {
                self.mounts
                    .unmount_all(&rootfs)
                    .map_err(|source| BundleError::MountDetachFailed {
                        path: rootfs.clone(),
                        source,
                    })?;
                fs.remove_dir(&rootfs)
            }
        };

        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(BundleError::fs("remove bundle rootfs", &rootfs, e))
            }
            _ => Ok(()),
        }
    }

    /// Working directory of a bundle about to be deleted.
    ///
    /// Follows the `work` link; without one, falls back to the configured
    /// location if something is still there.
    fn resolve_work_dir(&self, bundle: &Bundle) -> Option<PathBuf> {
        match self.fs.read_link(&bundle.work_link()) {
            Ok(work) => Some(work),
            Err(e) => {
                let fallback = bundle.work_path(&self.config.state_root);
                if self.fs.symlink_metadata(&fallback).is_ok() {
                    debug!(
                        "work link of {} unreadable ({}), using {}",
                        bundle.id,
                        e,
                        fallback.display()
                    );
                    Some(fallback)
                } else {
                    None
                }
            }
        }
    }

    /// Surface whatever the shim wrote to `panic.log`
    fn log_panic_output(&self, bundle: &Bundle) {
        let path = bundle.panic_log();
        let limit = self.config.diagnostic_limit;

        match capture_bounded_file(&path, limit) {
            Ok(captured) if !captured.is_empty() => {
                if captured.truncated {
                    warn!(
                        "shim panic log file {} is larger than {} bytes, logging only the first {} bytes",
                        path.display(),
                        limit,
                        limit
                    );
                }
                warn!(
                    log = %String::from_utf8_lossy(&captured.bytes),
                    "found shim panic logs during delete"
                );
            }
            Ok(_) => {}
            Err(source) => {
                let err = BundleError::DiagnosticCaptureFailed { path, source };
                warn!("{}", err);
            }
        }
    }

    /// Bundles present in the context's namespace, sorted by id
    pub fn list(&self, ctx: &Context) -> Result<Vec<Bundle>> {
        let namespace = ctx.namespace_required()?;
        let dir = self.config.primary_root.join(namespace);

        let mut bundles: Vec<Bundle> = child_dirs(&dir)?
            .into_iter()
            .filter(|(name, _)| identifiers::validate(name).is_ok())
            .map(|(name, path)| Bundle {
                id: name,
                namespace: namespace.to_string(),
                path,
            })
            .collect();

        bundles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bundles)
    }

    /// Remove what interrupted operations left behind in the namespace.
    ///
    /// This covers renamed trees of interrupted deletes and working
    /// directories whose bundle no longer exists. Returns the removed paths.
    ///
    /// The scan and the removals are not atomic with respect to [`create`]:
    /// a working directory created between the two would be taken for an
    /// orphan. Callers must not run `cleanup` concurrently with `create` in
    /// the same namespace.
    ///
    /// [`create`]: BundleManager::create
    pub fn cleanup(&self, ctx: &Context) -> Result<Vec<PathBuf>> {
        let namespace = ctx.namespace_required()?;
        let primary_ns = self.config.primary_root.join(namespace);
        let state_ns = self.config.state_root.join(namespace);
        let mut removed = Vec::new();

        for dir in [&primary_ns, &state_ns] {
            for (name, path) in child_dirs(dir)? {
                let orphaned = if is_delete_leftover(&name) {
                    true
                } else {
                    dir == &state_ns
                        && self.fs.symlink_metadata(&primary_ns.join(&name)).is_err()
                };
                if !orphaned {
                    continue;
                }

                match remove_all(self.fs.as_ref(), &path) {
                    Ok(()) => {
                        info!("removed orphaned {}", path.display());
                        removed.push(path);
                    }
                    Err(e) => warn!("failed to remove orphaned {}: {}", path.display(), e),
                }
            }
        }

        Ok(removed)
    }

    fn notify<T: Serialize>(&self, namespace: &str, topic: &str, event: &T) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let result = serde_json::to_vec(event)
            .map_err(BundleError::from)
            .and_then(|payload| notifier.publish(namespace, topic, &payload));

        if let Err(e) = result {
            warn!("failed to publish {} event: {}", topic, e);
        }
    }
}

/// Directories directly under `dir` as (name, path) pairs.
///
/// Scans the host filesystem directly rather than through [`Filesystem`].
fn child_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut children = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            BundleError::fs("scan", path, io::Error::from(e))
        })?;

        if !entry.file_type().is_dir() {
            continue;
        }

        children.push((
            entry.file_name().to_string_lossy().into_owned(),
            entry.path().to_path_buf(),
        ));
    }

    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventExchange, TOPIC_BUNDLE_CREATE, TOPIC_BUNDLE_DELETE};
    use crate::fs::fault::{FaultyFs, Op};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    const USERNS_SPEC: &[u8] =
        br#"{"linux":{"uidMappings":[{"containerID":0,"hostID":100000,"size":65536}]}}"#;

    struct Env {
        _temp: TempDir,
        primary: PathBuf,
        state: PathBuf,
        ctx: Context,
    }

    impl Env {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let primary = temp.path().join("var/lib/x");
            let state = temp.path().join("run/x");
            Self {
                _temp: temp,
                primary,
                state,
                ctx: Context::new().with_namespace("default"),
            }
        }

        fn config(&self) -> ManagerConfig {
            ManagerConfig::new(&self.primary, &self.state)
        }

        fn manager(&self) -> BundleManager {
            BundleManager::new(self.config()).unwrap()
        }

        fn faulty(&self, fs: FaultyFs) -> BundleManager {
            self.manager().with_filesystem(Arc::new(fs))
        }

        fn bundle_path(&self, id: &str) -> PathBuf {
            self.primary.join("default").join(id)
        }

        fn work_path(&self, id: &str) -> PathBuf {
            self.state.join("default").join(id)
        }

        fn assert_no_residue(&self, id: &str) {
            assert!(!self.bundle_path(id).exists(), "bundle directory left behind");
            assert!(
                self.work_path(id).symlink_metadata().is_err(),
                "working directory left behind"
            );
            assert!(self.primary.join("default").is_dir());
        }
    }

    /// Detacher that always fails, as with a busy mount
    struct BusyMounts;

    impl MountDetacher for BusyMounts {
        fn unmount_all(&self, _target: &Path) -> io::Result<()> {
            Err(io::Error::from_raw_os_error(libc::EBUSY))
        }
    }

    /// Detacher that records what it was asked to unmount
    #[derive(Default)]
    struct RecordingMounts {
        calls: Mutex<Vec<PathBuf>>,
    }

    impl MountDetacher for RecordingMounts {
        fn unmount_all(&self, target: &Path) -> io::Result<()> {
            self.calls.lock().unwrap().push(target.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_create_builds_layout() {
        let env = Env::new();
        let bundle = env.manager().create(&env.ctx, "c1", b"{}").unwrap();

        assert_eq!(bundle.path, env.bundle_path("c1"));
        assert!(bundle.rootfs().is_dir());
        assert_eq!(fs::read_link(bundle.work_link()).unwrap(), env.work_path("c1"));
        assert!(env.work_path("c1").is_dir());
        assert_eq!(fs::read(bundle.config_path()).unwrap(), b"{}");

        let mode = fs::metadata(&bundle.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_create_then_delete_end_to_end() {
        let env = Env::new();
        let manager = env.manager();
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();

        manager.delete(&bundle).unwrap();

        assert!(!bundle.rootfs().exists());
        assert!(bundle.work_link().symlink_metadata().is_err());
        assert!(!bundle.config_path().exists());
        assert!(!env.work_path("c1").exists());
        assert!(!bundle.path.exists());
    }

    #[test]
    fn test_create_relaxes_permissions_for_user_namespaces() {
        let env = Env::new();
        let bundle = env.manager().create(&env.ctx, "c1", USERNS_SPEC).unwrap();

        let mode = fs::metadata(&bundle.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o711);
        assert_eq!(fs::read(bundle.config_path()).unwrap(), USERNS_SPEC);
    }

    #[test]
    fn test_create_rejects_invalid_id() {
        let env = Env::new();
        for id in ["", "../escape", "a/b"] {
            assert!(matches!(
                env.manager().create(&env.ctx, id, b"{}"),
                Err(BundleError::InvalidIdentifier { .. })
            ));
        }
        assert!(!env.primary.exists());
    }

    #[test]
    fn test_create_requires_namespace() {
        let env = Env::new();
        let result = env.manager().create(&Context::new(), "c1", b"{}");
        assert!(matches!(result, Err(BundleError::InvalidContext(_))));
    }

    #[test]
    fn test_create_collision() {
        let env = Env::new();
        let manager = env.manager();

        manager.create(&env.ctx, "c1", b"{}").unwrap();
        let second = manager.create(&env.ctx, "c1", br#"{"other":true}"#);

        assert!(matches!(second, Err(BundleError::AlreadyExists(_))));
        // The first bundle is untouched by the failed attempt
        assert_eq!(fs::read(env.bundle_path("c1").join("config.json")).unwrap(), b"{}");
        assert!(env.work_path("c1").is_dir());
    }

    #[test]
    fn test_concurrent_create_single_winner() {
        let env = Env::new();
        let manager = Arc::new(env.manager());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let ctx = env.ctx.clone();
                std::thread::spawn(move || manager.create(&ctx, "c1", b"{}"))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let exists = results
            .iter()
            .filter(|r| matches!(r, Err(BundleError::AlreadyExists(_))))
            .count();

        assert_eq!(ok, 1);
        assert_eq!(exists, 7);
    }

    #[test]
    fn test_same_id_in_two_namespaces() {
        let env = Env::new();
        let manager = env.manager();

        let a = manager.create(&env.ctx, "c1", b"{}").unwrap();
        let b = manager
            .create(&Context::new().with_namespace("k8s.io"), "c1", b"{}")
            .unwrap();

        assert_ne!(a.path, b.path);
        assert!(a.path.exists() && b.path.exists());
    }

    #[test]
    fn test_create_rollback_on_permission_failure() {
        let env = Env::new();
        let manager = env.faulty(FaultyFs::new().fail(Op::SetPermissions, &env.primary));

        let err = manager.create(&env.ctx, "c1", USERNS_SPEC).unwrap_err();
        assert!(err.to_string().contains("set bundle permissions"));
        env.assert_no_residue("c1");
    }

    #[test]
    fn test_create_rollback_on_rootfs_failure() {
        let env = Env::new();
        let rootfs = env.bundle_path("c1").join("rootfs");
        let manager = env.faulty(FaultyFs::new().fail(Op::CreateDir, &rootfs));

        assert!(manager.create(&env.ctx, "c1", b"{}").is_err());
        env.assert_no_residue("c1");
        assert!(env.state.join("default").is_dir());
    }

    #[test]
    fn test_create_rollback_on_work_dir_failure() {
        let env = Env::new();
        let manager = env.faulty(FaultyFs::new().fail(Op::CreateDir, &env.state));

        let err = manager.create(&env.ctx, "c1", b"{}").unwrap_err();
        assert!(err.to_string().contains("create work directory"));
        env.assert_no_residue("c1");
    }

    #[test]
    fn test_create_rollback_on_symlink_failure() {
        let env = Env::new();
        let manager = env.faulty(FaultyFs::new().fail(Op::Symlink, &env.primary));

        let err = manager.create(&env.ctx, "c1", b"{}").unwrap_err();
        assert!(err.to_string().contains("link work directory"));
        env.assert_no_residue("c1");
        assert!(env.state.join("default").is_dir());
    }

    #[test]
    fn test_create_rollback_on_config_write_failure() {
        let env = Env::new();
        let manager = env.faulty(FaultyFs::new().fail(Op::WriteFile, &env.primary));

        let err = manager.create(&env.ctx, "c1", b"{}").unwrap_err();
        assert!(err.to_string().contains("write bundle config"));
        env.assert_no_residue("c1");
    }

    #[test]
    fn test_create_after_failed_create_succeeds() {
        let env = Env::new();
        let faulty = Arc::new(FaultyFs::new().fail(Op::WriteFile, &env.primary));
        let manager = env.manager().with_filesystem(faulty.clone());

        assert!(manager.create(&env.ctx, "c1", b"{}").is_err());
        faulty.clear();
        manager.create(&env.ctx, "c1", b"{}").unwrap();
    }

    #[test]
    fn test_create_replaces_stale_work_dir() {
        let env = Env::new();
        let stale = env.work_path("c1");
        fs::create_dir_all(stale.join("leftover")).unwrap();

        env.manager().create(&env.ctx, "c1", b"{}").unwrap();

        assert!(stale.is_dir());
        assert!(!stale.join("leftover").exists());
    }

    #[test]
    fn test_create_replaces_stale_work_file() {
        let env = Env::new();
        let stale = env.work_path("c1");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"stale").unwrap();

        let bundle = env.manager().create(&env.ctx, "c1", b"{}").unwrap();

        assert!(stale.is_dir());
        assert_eq!(fs::read_link(bundle.work_link()).unwrap(), stale);
    }

    #[test]
    fn test_create_replaces_stale_work_symlink() {
        let env = Env::new();
        let elsewhere = env.state.join("elsewhere");
        fs::create_dir_all(elsewhere.join("keep")).unwrap();
        let stale = env.work_path("c1");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&elsewhere, &stale).unwrap();

        env.manager().create(&env.ctx, "c1", b"{}").unwrap();

        assert!(!stale.symlink_metadata().unwrap().file_type().is_symlink());
        assert!(elsewhere.join("keep").is_dir());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let env = Env::new();
        let manager = env.manager();
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();

        manager.delete(&bundle).unwrap();
        manager.delete(&bundle).unwrap();

        let never_created = manager.load(&env.ctx, "ghost").unwrap();
        manager.delete(&never_created).unwrap();
    }

    #[test]
    fn test_delete_stops_when_unmount_fails() {
        let env = Env::new();
        let manager = env.manager().with_mount_detacher(Arc::new(BusyMounts));
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();

        let err = manager.delete(&bundle).unwrap_err();
        assert!(matches!(err, BundleError::MountDetachFailed { .. }));
        assert!(bundle.path.is_dir());
        assert!(bundle.rootfs().is_dir());
        assert!(env.work_path("c1").is_dir());
    }

    #[test]
    fn test_delete_unmounts_rootfs() {
        let env = Env::new();
        let mounts = Arc::new(RecordingMounts::default());
        let manager = env.manager().with_mount_detacher(mounts.clone());
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();

        manager.delete(&bundle).unwrap();
        assert_eq!(*mounts.calls.lock().unwrap(), vec![bundle.rootfs()]);
    }

    #[test]
    fn test_delete_unlinks_symlinked_rootfs() {
        let env = Env::new();
        let mounts = Arc::new(RecordingMounts::default());
        let manager = env.manager().with_mount_detacher(mounts.clone());
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();

        let outside = env.primary.join("outside");
        fs::create_dir_all(outside.join("keep")).unwrap();
        fs::remove_dir(bundle.rootfs()).unwrap();
        std::os::unix::fs::symlink(&outside, bundle.rootfs()).unwrap();

        manager.delete(&bundle).unwrap();

        assert!(!bundle.path.exists());
        assert!(!env.work_path("c1").exists());
        assert!(outside.join("keep").is_dir());
        // A symlink is never handed to the mount table
        assert!(mounts.calls.lock().unwrap().is_empty());

        manager.delete(&bundle).unwrap();
    }

    #[test]
    fn test_delete_unlinks_rootfs_file() {
        let env = Env::new();
        let manager = env.manager();
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();
        fs::remove_dir(bundle.rootfs()).unwrap();
        fs::write(bundle.rootfs(), b"not a directory").unwrap();

        manager.delete(&bundle).unwrap();
        assert!(!bundle.path.exists());
    }

    #[test]
    fn test_delete_reports_primary_failure_after_work_cleanup() {
        let env = Env::new();
        let bundle = env.manager().create(&env.ctx, "c1", b"{}").unwrap();

        let manager = env.faulty(FaultyFs::new().fail(Op::Rename, &bundle.path));

        let err = manager.delete(&bundle).unwrap_err();
        assert!(matches!(err, BundleError::Filesystem { .. }));
        assert!(bundle.path.exists());
        assert!(!env.work_path("c1").exists());

        // A retry with a healthy filesystem finishes the job
        env.manager().delete(&bundle).unwrap();
        assert!(!bundle.path.exists());
    }

    #[test]
    fn test_delete_combines_both_failures() {
        let env = Env::new();
        let bundle = env.manager().create(&env.ctx, "c1", b"{}").unwrap();

        let faulty = FaultyFs::new()
            .fail(Op::Rename, &env.primary)
            .fail(Op::Rename, &env.state);
        let err = env.faulty(faulty).delete(&bundle).unwrap_err();

        assert!(matches!(err, BundleError::PartialCleanupFailed { .. }));
        assert!(bundle.path.exists());
        assert!(env.work_path("c1").exists());
    }

    #[test]
    fn test_delete_work_failure_after_primary_success() {
        let env = Env::new();
        let bundle = env.manager().create(&env.ctx, "c1", b"{}").unwrap();

        let faulty = FaultyFs::new().fail(Op::Rename, &env.state);
        let err = env.faulty(faulty).delete(&bundle).unwrap_err();

        assert!(matches!(err, BundleError::Filesystem { .. }));
        assert!(!bundle.path.exists());
        assert!(env.work_path("c1").exists());

        // Without the link, the retry finds the orphan at its computed path
        env.manager().delete(&bundle).unwrap();
        assert!(!env.work_path("c1").exists());
    }

    #[test]
    fn test_delete_with_panic_log() {
        let env = Env::new();
        let manager = env.manager();
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();
        fs::write(bundle.panic_log(), vec![b'!'; 4096]).unwrap();

        let manager = BundleManager::new(ManagerConfig {
            diagnostic_limit: 1024,
            ..env.config()
        })
        .unwrap();
        manager.delete(&bundle).unwrap();
        assert!(!bundle.path.exists());
    }

    #[test]
    fn test_delete_with_unreadable_panic_log() {
        let env = Env::new();
        let manager = env.manager();
        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();
        // A directory in place of the log makes the capture fail
        fs::create_dir(bundle.panic_log()).unwrap();

        manager.delete(&bundle).unwrap();
        assert!(!bundle.path.exists());
    }

    #[test]
    fn test_open_requires_existing_bundle() {
        let env = Env::new();
        let manager = env.manager();

        let err = manager.open(&env.ctx, "c1").unwrap_err();
        assert!(matches!(err, BundleError::NotFound(_)));
        assert!(err.is_not_found());

        let created = manager.create(&env.ctx, "c1", b"{}").unwrap();
        assert_eq!(manager.open(&env.ctx, "c1").unwrap(), created);
        assert_eq!(manager.load(&env.ctx, "c1").unwrap(), created);
    }

    #[test]
    fn test_list_bundles() {
        let env = Env::new();
        let manager = env.manager();
        assert!(manager.list(&env.ctx).unwrap().is_empty());

        manager.create(&env.ctx, "c2", b"{}").unwrap();
        manager.create(&env.ctx, "c1", b"{}").unwrap();
        manager
            .create(&Context::new().with_namespace("other"), "c3", b"{}")
            .unwrap();
        fs::create_dir(env.primary.join("default/.del-c9-abc")).unwrap();
        fs::write(env.primary.join("default/stray-file"), b"").unwrap();

        let ids: Vec<String> = manager
            .list(&env.ctx)
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_cleanup_removes_orphans() {
        let env = Env::new();
        let manager = env.manager();
        let kept = manager.create(&env.ctx, "c1", b"{}").unwrap();

        let leftover = env.primary.join("default/.del-c2-0123");
        let orphan_work = env.work_path("c3");
        fs::create_dir_all(leftover.join("rootfs")).unwrap();
        fs::create_dir_all(&orphan_work).unwrap();

        let mut removed = manager.cleanup(&env.ctx).unwrap();
        removed.sort();
        let mut expected = vec![leftover.clone(), orphan_work.clone()];
        expected.sort();

        assert_eq!(removed, expected);
        assert!(kept.path.exists());
        assert!(env.work_path("c1").exists());
        assert!(!leftover.exists());
        assert!(!orphan_work.exists());
    }

    #[test]
    fn test_cleanup_keeps_work_dir_of_live_bundle() {
        let env = Env::new();
        let faulty = Arc::new(FaultyFs::new());
        let manager = env.manager().with_filesystem(faulty);
        manager.create(&env.ctx, "c1", b"{}").unwrap();

        assert!(manager.cleanup(&env.ctx).unwrap().is_empty());
        assert!(env.work_path("c1").is_dir());
    }

    #[test]
    fn test_lifecycle_events() {
        let env = Env::new();
        let exchange = Arc::new(EventExchange::new(16));
        let mut sub = exchange
            .subscribe(&["namespace==default".to_string()])
            .unwrap();
        let manager = env.manager().with_notifier(exchange.clone());

        let bundle = manager.create(&env.ctx, "c1", b"{}").unwrap();
        manager.delete(&bundle).unwrap();

        let created = sub.try_recv().unwrap();
        assert_eq!(created.topic, TOPIC_BUNDLE_CREATE);
        let payload: BundleCreated = serde_json::from_slice(&created.event).unwrap();
        assert_eq!(payload.id, "c1");
        assert_eq!(payload.bundle, bundle.path);

        let deleted = sub.try_recv().unwrap();
        assert_eq!(deleted.topic, TOPIC_BUNDLE_DELETE);
        let payload: BundleDeleted = serde_json::from_slice(&deleted.event).unwrap();
        assert_eq!(payload.id, "c1");

        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_failed_create_publishes_nothing() {
        let env = Env::new();
        let exchange = Arc::new(EventExchange::new(16));
        let mut sub = exchange.subscribe(&[]).unwrap();
        let manager = env
            .faulty(FaultyFs::new().fail(Op::WriteFile, &env.primary))
            .with_notifier(exchange.clone());

        assert!(manager.create(&env.ctx, "c1", b"{}").is_err());
        assert!(sub.try_recv().is_none());
    }
}
