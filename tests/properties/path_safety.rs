use proptest::prelude::*;

use skillpack::PackError;
use skillpack::pack::archive::{ArchiveBuilder, check_relative_path};
use skillpack::pack::manifest::{MANIFEST_FILE, normalize_path};
use skillpack::test_utils::fixtures::{SkillDirFixture, sample_manifest};

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_][a-z0-9_.-]{0,7}".prop_filter("plain segment", |s| s != "..")
}

fn relative_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..4).prop_map(|parts| parts.join("/"))
}

/// Paths with a `..` segment somewhere, optionally with `./` or backslashes.
fn traversal_path() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(segment(), 0..3),
        prop::collection::vec(segment(), 0..3),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(before, after, dot_prefix, backslashes)| {
            let mut parts = before;
            parts.push("..".to_string());
            parts.extend(after);
            let mut path = parts.join("/");
            if dot_prefix {
                path = format!("./{path}");
            }
            if backslashes {
                path = path.replace('/', "\\");
            }
            path
        })
}

/// Two paths clash when equal or when one would need to be a directory of the other.
fn clashes(a: &str, b: &str) -> bool {
    a == b || a.starts_with(&format!("{b}/")) || b.starts_with(&format!("{a}/"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn traversal_segments_are_always_rejected(path in traversal_path()) {
        prop_assert!(matches!(
            check_relative_path(&path),
            Err(PackError::PathTraversal(_))
        ));
    }

    #[test]
    fn absolute_paths_are_rejected(path in relative_path()) {
        let absolute = format!("/{path}");
        prop_assert!(matches!(
            check_relative_path(&absolute),
            Err(PackError::PathTraversal(_))
        ));
    }

    #[test]
    fn plain_paths_pass_normalized(path in relative_path()) {
        let declared = format!("./{}", path.replace('/', "\\"));
        prop_assert_eq!(check_relative_path(&declared).unwrap(), normalize_path(&declared));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn archive_holds_manifest_plus_every_declared_file(
        extra in prop::collection::btree_set(relative_path(), 0..5)
    ) {
        let mut manifest = sample_manifest();
        for path in extra {
            let taken = clashes(MANIFEST_FILE, &path)
                || manifest.files.iter().any(|f| clashes(f, &path));
            if !taken {
                manifest.files.push(path);
            }
        }

        let fixture = SkillDirFixture::with_manifest(&manifest);
        let archive = ArchiveBuilder::new(fixture.path())
            .with_mtime(0)
            .build(&manifest)
            .unwrap();

        let mut expected = vec![MANIFEST_FILE.to_string()];
        expected.extend(manifest.files.iter().map(|f| normalize_path(f)));
        prop_assert_eq!(&archive.paths, &expected);

        let entries = archive.entries().unwrap();
        for entry in &entries {
            prop_assert!(!entry.path.starts_with('/'));
            prop_assert!(!entry.path.split('/').any(|seg| seg == ".."));
        }
        prop_assert_eq!(entries.len(), expected.len());
    }
}
