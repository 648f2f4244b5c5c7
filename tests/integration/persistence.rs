use std::sync::Arc;
use std::thread;

use skillpack::PackError;
use skillpack::config::RateLimitsConfig;
use skillpack::pack::archive::ArchiveBuilder;
use skillpack::registry::{
    Actor, FsBlobStore, NewSkill, PublishRequest, RateLimit, Registry, RegistrySettings,
    VersionStatus,
};
use skillpack::test_utils::fixtures::{SkillDirFixture, sample_manifest};

fn open_registry(root: &std::path::Path) -> Registry {
    let blobs = Arc::new(FsBlobStore::open(root).unwrap());
    Registry::open(root, blobs, RegistrySettings::default()).unwrap()
}

#[test]
fn packed_artifact_publishes_and_survives_reopen() {
    let root = tempfile::tempdir().unwrap();
    let owner = Actor::new("owner-1");

    let manifest = sample_manifest();
    let fixture = SkillDirFixture::with_manifest(&manifest);
    let archive = ArchiveBuilder::new(fixture.path())
        .with_mtime(0)
        .build(&manifest)
        .unwrap();

    let (skill_id, version_id) = {
        let registry = open_registry(root.path());
        let skill = registry
            .create_skill(
                Some(&owner),
                NewSkill {
                    slug: manifest.slug.clone(),
                    name: manifest.name.clone(),
                    ..NewSkill::default()
                },
            )
            .unwrap();

        let ticket = registry.generate_upload_url(Some(&owner)).unwrap();
        FsBlobStore::open(root.path())
            .unwrap()
            .put_at(&ticket.storage_key, &archive.bytes)
            .unwrap();

        let outcome = registry
            .publish_version(
                Some(&owner),
                PublishRequest {
                    skill_id: skill.id.clone(),
                    version: manifest.version.clone(),
                    storage_key: ticket.storage_key,
                    content_hash: archive.digest.to_uppercase(),
                    size_bytes: archive.size(),
                    manifest_json: Some(manifest.to_json_string().unwrap()),
                    ..PublishRequest::default()
                },
            )
            .unwrap();
        assert_eq!(outcome.status, VersionStatus::Verified);
        assert!(outcome.checks.all_passed());
        (skill.id, outcome.version_id)
    };

    let registry = open_registry(root.path());
    let skill = registry.get_skill_by_slug("pdf-tools").unwrap();
    assert_eq!(skill.id, skill_id);
    assert_eq!(skill.default_version_id.as_deref(), Some(version_id.as_str()));

    let target = registry
        .get_version_download_url(None, &skill_id, None)
        .unwrap();
    assert!(target.url.starts_with("file://"));
    assert_eq!(target.size_bytes, archive.size());
    assert_eq!(registry.verification_history(&version_id).unwrap().len(), 1);
}

#[test]
fn manifest_without_entry_in_files_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let owner = Actor::new("owner-1");
    let registry = open_registry(root.path());
    let skill = registry
        .create_skill(
            Some(&owner),
            NewSkill {
                slug: "broken-manifest".into(),
                name: "Broken".into(),
                ..NewSkill::default()
            },
        )
        .unwrap();

    let blobs = FsBlobStore::open(root.path()).unwrap();
    let key = blobs.put(b"artifact").unwrap();
    let outcome = registry
        .publish_version(
            Some(&owner),
            PublishRequest {
                skill_id: skill.id,
                version: "1.0.0".into(),
                storage_key: key,
                content_hash: skillpack::pack::content_digest(b"artifact"),
                size_bytes: 8,
                manifest_json: Some(r#"{"entry": "SKILL.md", "files": ["README.md"]}"#.into()),
                ..PublishRequest::default()
            },
        )
        .unwrap();

    assert_eq!(outcome.status, VersionStatus::Rejected);
    assert!(outcome.checks.has_stored_artifact);
    assert!(outcome.checks.size_matches);
    assert!(outcome.checks.hash_matches);
    assert!(!outcome.checks.manifest_valid);
    assert_eq!(outcome.errors.len(), 1);
}

#[test]
fn storage_keys_that_cannot_exist_never_strand_a_version() {
    let root = tempfile::tempdir().unwrap();
    let owner = Actor::new("owner-1");
    let registry = open_registry(root.path());
    let skill = registry
        .create_skill(
            Some(&owner),
            NewSkill {
                slug: "odd-keys".into(),
                name: "Odd keys".into(),
                ..NewSkill::default()
            },
        )
        .unwrap();
    let request = |version: &str, key: &str| PublishRequest {
        skill_id: skill.id.clone(),
        version: version.into(),
        storage_key: key.into(),
        content_hash: skillpack::pack::content_digest(b"artifact"),
        size_bytes: 8,
        ..PublishRequest::default()
    };

    let err = registry
        .publish_version(Some(&owner), request("1.0.0", "artifact.tar"))
        .unwrap_err();
    assert!(matches!(err, PackError::Validation(_)), "{err:?}");
    assert!(registry.list_versions(Some(&owner), &skill.id).unwrap().is_empty());

    let outcome = registry
        .publish_version(Some(&owner), request("1.0.0", "never-uploaded"))
        .unwrap();
    assert_eq!(outcome.status, VersionStatus::Rejected);
    assert!(!outcome.checks.has_stored_artifact);

    let report = registry.run_pending_verifications(25).unwrap();
    assert_eq!(report.scanned, 0);
}

#[test]
fn separate_handles_on_one_database_cannot_both_publish() {
    let root = tempfile::tempdir().unwrap();
    let owner = Actor::new("owner-1");
    let settings = RegistrySettings {
        rate_limits: RateLimitsConfig {
            publish_version: RateLimit::new(100, 60_000),
            ..RateLimitsConfig::default()
        },
        ..RegistrySettings::default()
    };
    let blobs = Arc::new(FsBlobStore::open(root.path()).unwrap());
    let handles: Vec<Registry> = (0..6)
        .map(|_| Registry::open(root.path(), blobs.clone(), settings.clone()).unwrap())
        .collect();
    let skill = handles[0]
        .create_skill(
            Some(&owner),
            NewSkill {
                slug: "race".into(),
                name: "Race".into(),
                ..NewSkill::default()
            },
        )
        .unwrap();
    let key = blobs.put(b"artifact").unwrap();
    let request = PublishRequest {
        skill_id: skill.id.clone(),
        version: "2.0.0".into(),
        storage_key: key,
        content_hash: skillpack::pack::content_digest(b"artifact"),
        size_bytes: 8,
        ..PublishRequest::default()
    };

    let results: Vec<_> = thread::scope(|scope| {
        let spawned: Vec<_> = handles
            .iter()
            .map(|registry| {
                let request = request.clone();
                let owner = &owner;
                scope.spawn(move || registry.publish_version(Some(owner), request))
            })
            .collect();
        spawned.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, PackError::DuplicateVersion { .. }), "{err:?}");
        }
    }
    assert_eq!(handles[0].list_versions(Some(&owner), &skill.id).unwrap().len(), 1);
}
