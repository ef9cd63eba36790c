//! Scoped filesystem freeze
//!
//! [`quiesce`] freezes a set of mount points, runs one operation and thaws
//! every mount point it froze, whatever the operation returned.

use crate::domain::model::MountTarget;
use crate::error::Result;
use crate::host::HostOps;
use std::future::Future;
use tracing::{debug, error};

/// Run `operation` with the filesystems of `targets` frozen.
///
/// With `enabled` unset nothing is frozen. A failed freeze thaws the mount
/// points frozen so far and skips the operation. When the operation fails
/// its error is returned even if a thaw failed too; otherwise the first
/// thaw failure is.
pub async fn quiesce<T, F, Fut>(
    hosts: &HostOps,
    targets: &[MountTarget],
    enabled: bool,
    operation: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !enabled {
        debug!("Filesystem freeze disabled");
        return operation().await;
    }

    let mut frozen: Vec<&MountTarget> = Vec::with_capacity(targets.len());
    for target in targets {
        if frozen
            .iter()
            .any(|f| f.host == target.host && f.mount_point == target.mount_point)
        {
            continue;
        }
        if let Err(e) = hosts.freeze(&target.host, &target.mount_point).await {
            error!("Freezing {} on {} failed: {}", target.mount_point, target.host, e);
            // thaw logs its own failures
            let _ = thaw(hosts, &frozen).await;
            return Err(e);
        }
        frozen.push(target);
    }

    let result = operation().await;
    let released = thaw(hosts, &frozen).await;

    match (result, released) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(value), Ok(())) => Ok(value),
    }
}

/// Unfreeze in reverse order, attempting every mount point
async fn thaw(hosts: &HostOps, frozen: &[&MountTarget]) -> Result<()> {
    let mut first_error = None;
    for target in frozen.iter().rev() {
        if let Err(e) = hosts.unfreeze(&target.host, &target.mount_point).await {
            error!(
                "Unfreezing {} on {} failed, the filesystem may still be frozen: {}",
                target.mount_point, target.host, e
            );
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::VolumeRole;
    use crate::error::Error;
    use crate::host::HostConfig;
    use crate::testing::FakeShell;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn setup() -> (Arc<FakeShell>, HostOps) {
        let shell = FakeShell::new();
        let hosts = HostOps::new(shell.clone(), &HostConfig::default(), "00");
        (shell, hosts)
    }

    fn targets() -> Vec<MountTarget> {
        vec![
            MountTarget::new("hana01", "/hana/data/mnt00001", VolumeRole::Data),
            MountTarget::new("hana02", "/hana/data/mnt00002", VolumeRole::Data),
            MountTarget::new("hana01", "/hana/log/mnt00001", VolumeRole::Log),
        ]
    }

    fn count(shell: &FakeShell, pattern: &str) -> usize {
        shell.commands_matching(pattern).len()
    }

    #[tokio::test]
    async fn test_every_frozen_volume_is_thawed_once_after_failure() {
        let (shell, hosts) = setup();

        let result: Result<()> = quiesce(&hosts, &targets(), true, || async {
            Err(Error::storage("create_pgroup_snapshot", "array unreachable"))
        })
        .await;

        assert_matches!(result, Err(Error::StorageOperation { .. }));
        for target in targets() {
            assert_eq!(count(&shell, &format!("--freeze {}", target.mount_point)), 1);
            assert_eq!(count(&shell, &format!("--unfreeze {}", target.mount_point)), 1);
        }

        let commands = shell.commands();
        let last_freeze = commands.iter().rposition(|c| c.contains("--freeze")).unwrap();
        let first_thaw = commands.iter().position(|c| c.contains("--unfreeze")).unwrap();
        assert!(last_freeze < first_thaw);
    }

    #[tokio::test]
    async fn test_failed_freeze_thaws_only_frozen() {
        let (shell, hosts) = setup();
        shell.fail_on("--freeze /hana/data/mnt00002");

        let ran = AtomicBool::new(false);
        let flag = &ran;
        let result = quiesce(&hosts, &targets(), true, move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_matches!(result, Err(Error::RemoteExecution { .. }));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(count(&shell, "--unfreeze /hana/data/mnt00001"), 1);
        assert_eq!(count(&shell, "--unfreeze /hana/data/mnt00002"), 0);
        assert_eq!(count(&shell, "/hana/log/mnt00001"), 0);
    }

    #[tokio::test]
    async fn test_thaw_failure_surfaces_after_success() {
        let (shell, hosts) = setup();
        shell.fail_on("--unfreeze /hana/data/mnt00002");

        let result = quiesce(&hosts, &targets(), true, || async { Ok(7) }).await;

        assert_matches!(result, Err(Error::RemoteExecution { host, .. }) if host == "hana02");
        assert_eq!(count(&shell, "--unfreeze"), 3);
    }

    #[tokio::test]
    async fn test_disabled_freeze_runs_operation_only() {
        let (shell, hosts) = setup();
        let value = quiesce(&hosts, &targets(), false, || async { Ok("snap") })
            .await
            .unwrap();
        assert_eq!(value, "snap");
        assert!(shell.commands().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_targets_frozen_once() {
        let (shell, hosts) = setup();
        let mut targets = targets();
        targets.push(targets[0].clone());

        quiesce(&hosts, &targets, true, || async { Ok(()) }).await.unwrap();
        assert_eq!(count(&shell, "--freeze /hana/data/mnt00001"), 1);
        assert_eq!(count(&shell, "--unfreeze /hana/data/mnt00001"), 1);
    }
}
