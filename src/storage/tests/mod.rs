//! Tests for the storage building blocks: path virtualization, quota
//! rounding, sandbox allocation and scope enforcement.

mod fakes {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::RwLock;

    use crate::error::Result;
    use crate::resolver::SecurityResolver;

    pub struct FakeResolver {
        pub root: PathBuf,
        pub quota: RwLock<Option<u64>>,
        pub precomputed_free: Option<u64>,
        pub grant: bool,
        pub increase_calls: AtomicUsize,
    }

    impl FakeResolver {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self {
                root: root.into(),
                quota: RwLock::new(None),
                precomputed_free: None,
                grant: true,
                increase_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_quota(self, quota: u64) -> Self {
            *self.quota.write() = Some(quota);
            self
        }

        pub fn increase_calls(&self) -> usize {
            self.increase_calls.load(Ordering::SeqCst)
        }
    }

    impl SecurityResolver for FakeResolver {
        fn root_user_directory(&self) -> Result<PathBuf> {
            Ok(self.root.clone())
        }

        fn group_and_id(&self) -> Result<(String, String)> {
            Ok(("test-group".to_string(), "test-app".to_string()))
        }

        fn quota(&self, _group: &str) -> Result<Option<u64>> {
            Ok(*self.quota.read())
        }

        fn increase_quota(&self, _group: &str, new_quota: u64, _used_size: u64) -> Result<bool> {
            self.increase_calls.fetch_add(1, Ordering::SeqCst);
            if self.grant {
                *self.quota.write() = Some(new_quota);
            }
            Ok(self.grant)
        }

        fn available_free_space(&self) -> Result<Option<u64>> {
            Ok(self.precomputed_free)
        }
    }
}

#[cfg(test)]
mod path_tests {
    use std::path::Path;

    use crate::storage::path;

    #[test]
    fn strips_leading_separators() {
        let root = Path::new("/sandbox/app1");
        assert_eq!(
            path::resolve(root, "/etc/passwd"),
            Path::new("/sandbox/app1/etc/passwd")
        );
        assert_eq!(
            path::resolve(root, "///deep/file.txt"),
            Path::new("/sandbox/app1/deep/file.txt")
        );
        assert_eq!(
            path::resolve(root, "\\windows\\style"),
            Path::new("/sandbox/app1/windows\\style")
        );
    }

    #[test]
    fn result_stays_prefixed_by_root() {
        let root = Path::new("/sandbox/app1");
        for relative in ["a", "a/b/c", "/a", "x.txt", ""] {
            assert!(path::resolve(root, relative).starts_with(root));
        }
    }
}

#[cfg(test)]
mod quota_tests {
    use std::sync::Arc;

    use super::fakes::FakeResolver;
    use crate::error::StoreError;
    use crate::storage::quota::QuotaModel;

    fn model(resolver: Arc<FakeResolver>) -> QuotaModel {
        QuotaModel::new(1024, "test-group", resolver)
    }

    #[test]
    fn round_up_invariants() {
        let quota = model(Arc::new(FakeResolver::new("/unused")));
        assert_eq!(quota.round_up(0), 1024);
        assert_eq!(quota.round_up(1), 1024);
        assert_eq!(quota.round_up(1024), 1024);
        assert_eq!(quota.round_up(1025), 2048);
        for n in [0u64, 1, 7, 512, 1023, 1024, 1025, 4096, 999_999] {
            let rounded = quota.round_up(n);
            assert_eq!(rounded % 1024, 0);
            assert!(rounded >= n);
        }
    }

    #[test]
    fn round_down_invariants() {
        let quota = model(Arc::new(FakeResolver::new("/unused")));
        assert_eq!(quota.round_down(1023), 0);
        assert_eq!(quota.round_down(2048), 2048);
        for n in [0u64, 1, 512, 1023, 1024, 1025, 4096, 999_999] {
            let rounded = quota.round_down(n);
            assert_eq!(rounded % 1024, 0);
            assert!(rounded <= n);
        }
    }

    #[test]
    fn increase_below_current_is_rejected_locally() {
        let resolver = Arc::new(FakeResolver::new("/unused").with_quota(8192));
        let quota = model(Arc::clone(&resolver));

        let err = quota.increase_quota_to(8192, 0).unwrap_err();
        assert!(matches!(err, StoreError::QuotaRejected(_)));
        let err = quota.increase_quota_to(1024, 0).unwrap_err();
        assert!(matches!(err, StoreError::QuotaRejected(_)));

        // The increase request was never submitted.
        assert_eq!(resolver.increase_calls(), 0);
    }

    #[test]
    fn increase_above_current_contacts_the_resolver() {
        let resolver = Arc::new(FakeResolver::new("/unused").with_quota(4096));
        let quota = model(Arc::clone(&resolver));

        assert!(quota.increase_quota_to(16384, 0).unwrap());
        assert_eq!(resolver.increase_calls(), 1);
        assert_eq!(quota.quota().unwrap(), 16384);
    }

    #[test]
    fn unbounded_quota_rejects_any_increase() {
        let resolver = Arc::new(FakeResolver::new("/unused"));
        let quota = model(Arc::clone(&resolver));
        assert!(quota.increase_quota_to(u64::MAX - 1, 0).is_err());
        assert_eq!(resolver.increase_calls(), 0);
    }

    #[test]
    fn precomputed_free_space_wins() {
        let mut resolver = FakeResolver::new("/unused").with_quota(8192);
        resolver.precomputed_free = Some(555);
        let quota = model(Arc::new(resolver));
        assert_eq!(quota.available_free_space(1024).unwrap(), 555);

        let quota = model(Arc::new(FakeResolver::new("/unused").with_quota(8192)));
        assert_eq!(quota.available_free_space(1024).unwrap(), 7168);
    }
}

#[cfg(test)]
mod alloc_tests {
    use std::collections::HashSet;
    use std::fs;

    use tempfile::TempDir;

    use crate::storage::alloc::{DirectoryAllocator, SEGMENT_LEN};

    #[test]
    fn create_random_allocates_fresh_two_level_pairs() {
        let temp = TempDir::new().unwrap();
        let mut seen = HashSet::new();

        for _ in 0..8 {
            let relative = DirectoryAllocator::create_random(temp.path()).unwrap();
            let components: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            assert_eq!(components.len(), 2);
            assert_eq!(components[0].len(), SEGMENT_LEN);
            assert_eq!(components[1].len(), SEGMENT_LEN);
            assert!(temp.path().join(&relative).is_dir());
            assert!(seen.insert(relative));
        }
    }

    #[test]
    fn find_existing_recovers_an_allocation() {
        let temp = TempDir::new().unwrap();
        assert!(DirectoryAllocator::find_existing(temp.path()).is_none());

        let created = DirectoryAllocator::create_random(temp.path()).unwrap();
        assert_eq!(DirectoryAllocator::find_existing(temp.path()), Some(created));
    }

    #[test]
    fn find_existing_ignores_foreign_directories() {
        let temp = TempDir::new().unwrap();
        // Wrong lengths, and a correctly sized file rather than a directory.
        fs::create_dir_all(temp.path().join("short/alsoshort")).unwrap();
        fs::create_dir(temp.path().join("thirteenchars")).unwrap();
        fs::write(temp.path().join("twelvecharsx"), b"").unwrap();

        assert!(DirectoryAllocator::find_existing(temp.path()).is_none());
    }
}

#[cfg(test)]
mod gate_tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::error::StoreError;
    use crate::storage::gate::PathScope;
    use crate::storage::path;

    #[test]
    fn paths_under_root_are_authorized() {
        let temp = TempDir::new().unwrap();
        let scope = PathScope::new(temp.path()).unwrap();

        let candidate = path::resolve(scope.root(), "sub/file.txt");
        let authorized = scope.authorize(&candidate).unwrap();
        assert!(authorized.starts_with(scope.root()));
    }

    #[test]
    fn ancestor_traversal_is_denied() {
        let temp = TempDir::new().unwrap();
        let scope = PathScope::new(temp.path()).unwrap();

        for escape in ["../outside", "../../etc/passwd", "a/../../b"] {
            let candidate = path::resolve(scope.root(), escape);
            let err = scope.authorize(&candidate).unwrap_err();
            assert!(matches!(err, StoreError::SecurityDenied), "{escape}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_denied() {
        let outer = TempDir::new().unwrap();
        let sandbox = outer.path().join("sandbox");
        fs::create_dir(&sandbox).unwrap();
        fs::write(outer.path().join("secret.txt"), b"outside").unwrap();
        std::os::unix::fs::symlink(
            outer.path().join("secret.txt"),
            sandbox.join("innocent.txt"),
        )
        .unwrap();

        let scope = PathScope::new(&sandbox).unwrap();
        let candidate = path::resolve(scope.root(), "innocent.txt");
        assert!(matches!(
            scope.authorize(&candidate),
            Err(StoreError::SecurityDenied)
        ));
    }

    /// The target itself does not exist yet, but a directory in its prefix
    /// is a symlink out of the sandbox. Creation through it must be denied.
    #[cfg(unix)]
    #[test]
    fn symlink_in_existing_prefix_is_denied() {
        let outer = TempDir::new().unwrap();
        let sandbox = outer.path().join("sandbox");
        let elsewhere = outer.path().join("elsewhere");
        fs::create_dir(&sandbox).unwrap();
        fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, sandbox.join("docs")).unwrap();

        let scope = PathScope::new(&sandbox).unwrap();
        let candidate = path::resolve(scope.root(), "docs/new.txt");
        assert!(matches!(
            scope.authorize(&candidate),
            Err(StoreError::SecurityDenied)
        ));
    }
}
