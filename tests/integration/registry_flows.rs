use std::thread;

use skillpack::PackError;
use skillpack::config::RateLimitsConfig;
use skillpack::registry::{
    Actor, BlobMetadata, NewSkill, RateLimit, RegistrySettings, RetryPolicy, StorageMode,
    VersionStatus, Visibility,
};
use skillpack::registry::model::VerificationStatus;

use crate::fixture::RegistryFixture;

#[test]
fn duplicate_publish_fails_and_keeps_one_record() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("dup-check");

    f.registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"first"))
        .unwrap();
    let err = f
        .registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"second"))
        .unwrap_err();
    assert!(matches!(err, PackError::DuplicateVersion { .. }), "{err:?}");

    let versions = f.registry.list_versions(Some(&f.owner), &skill.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].status, VersionStatus::Verified);
}

#[test]
fn size_mismatch_is_rejected_even_with_matching_hash() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("size-check");
    let request = f.upload(&skill, "1.0.0", b"twelve bytes");
    f.blobs.set_metadata(
        &request.storage_key,
        BlobMetadata {
            size: 99,
            integrity_hash: request.content_hash.clone(),
        },
    );

    let outcome = f.registry.publish_version(Some(&f.owner), request).unwrap();
    assert_eq!(outcome.status, VersionStatus::Rejected);
    assert!(!outcome.checks.size_matches);
    assert!(outcome.checks.hash_matches);
    assert!(!outcome.errors.is_empty());
    assert!(!outcome.became_default);

    let skill = f.registry.get_skill(&skill.id).unwrap();
    assert_eq!(skill.default_version_id, None);
}

#[test]
fn set_default_requires_verified_version() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("default-guard");

    let good = f
        .registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"good"))
        .unwrap();

    let mut bad_request = f.upload(&skill, "1.1.0", b"bad");
    bad_request.content_hash = "f".repeat(64);
    let bad = f
        .registry
        .publish_version(Some(&f.owner), bad_request)
        .unwrap();
    assert_eq!(bad.status, VersionStatus::Rejected);

    f.next_window();
    f.blobs.fail_next(1);
    let pending_request = f.upload(&skill, "1.2.0", b"pending");
    let outcome = f
        .registry
        .publish_version(Some(&f.owner), pending_request)
        .unwrap();
    assert_eq!(outcome.status, VersionStatus::Pending);
    let pending = f
        .registry
        .list_versions(Some(&f.owner), &skill.id)
        .unwrap()
        .into_iter()
        .find(|v| v.version == "1.2.0")
        .unwrap();
    assert_eq!(pending.status, VersionStatus::Pending);

    for version_id in [&bad.version_id, &pending.id] {
        let err = f
            .registry
            .set_default_version(Some(&f.owner), &skill.id, version_id)
            .unwrap_err();
        assert!(matches!(err, PackError::NotVerified { .. }), "{err:?}");
    }

    let skill = f.registry.get_skill(&skill.id).unwrap();
    assert_eq!(skill.default_version_id.as_deref(), Some(good.version_id.as_str()));
}

#[test]
fn first_verified_version_becomes_default_and_stays() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("auto-default");

    let first = f
        .registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"one"))
        .unwrap();
    assert!(first.became_default);

    let second = f
        .registry
        .publish_version(Some(&f.owner), f.upload(&skill, "2.0.0", b"two"))
        .unwrap();
    assert_eq!(second.status, VersionStatus::Verified);
    assert!(!second.became_default);

    let skill = f.registry.get_skill(&skill.id).unwrap();
    assert_eq!(skill.default_version_id.as_deref(), Some(first.version_id.as_str()));

    let target = f
        .registry
        .get_version_download_url(None, &skill.id, None)
        .unwrap();
    assert_eq!(target.version, "1.0.0");
}

#[test]
fn explicit_default_wins_over_latest() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("explicit-default");
    f.registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"one"))
        .unwrap();
    let second = f
        .registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.1.0", b"two"))
        .unwrap();

    let updated = f
        .registry
        .set_default_version(Some(&f.owner), &skill.id, &second.version_id)
        .unwrap();
    assert_eq!(
        updated.default_version_id.as_deref(),
        Some(second.version_id.as_str())
    );
}

#[test]
fn download_without_any_verified_version_is_not_found() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("nothing-verified");
    let mut request = f.upload(&skill, "1.0.0", b"payload");
    request.size_bytes += 1;
    let outcome = f.registry.publish_version(Some(&f.owner), request).unwrap();
    assert_eq!(outcome.status, VersionStatus::Rejected);

    for version in [None, Some("1.0.0")] {
        let err = f
            .registry
            .get_version_download_url(None, &skill.id, version)
            .unwrap_err();
        assert!(matches!(err, PackError::NotFound(_)), "{err:?}");
    }
}

#[test]
fn download_resolves_highest_verified_numerically() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("ordering");

    let seed_request = f.upload(&skill, "0.1.0", b"seed");
    let seed_key = seed_request.storage_key.clone();
    let seed = f.registry.publish_version(Some(&f.owner), seed_request).unwrap();
    assert!(seed.became_default);

    for version in ["0.9.0", "1.2.0", "1.10.0"] {
        let outcome = f
            .registry
            .publish_version(Some(&f.owner), f.upload(&skill, version, version.as_bytes()))
            .unwrap();
        assert_eq!(outcome.status, VersionStatus::Verified);
        assert!(!outcome.became_default);
    }

    // Rejecting the default clears the pointer, leaving only the fallback rule.
    f.blobs.remove(&seed_key);
    let rejected = f
        .registry
        .reverify_version(Some(&f.owner), &skill.id, &seed.version_id)
        .unwrap();
    assert_eq!(rejected.status, VersionStatus::Rejected);
    assert_eq!(f.registry.get_skill(&skill.id).unwrap().default_version_id, None);

    let target = f
        .registry
        .get_version_download_url(None, &skill.id, None)
        .unwrap();
    assert_eq!(target.version, "1.10.0");
    let chosen = f.registry.get_version(&target.version_id).unwrap();
    assert!(target.url.ends_with(&chosen.storage_key));

    let explicit = f
        .registry
        .get_version_download_url(None, &skill.id, Some("1.2.0"))
        .unwrap();
    assert_eq!(explicit.version, "1.2.0");

    let err = f
        .registry
        .get_version_download_url(None, &skill.id, Some("0.1.0"))
        .unwrap_err();
    assert!(matches!(err, PackError::NotFound(_)));

    let listed: Vec<String> = f
        .registry
        .list_versions(None, &skill.id)
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(listed, vec!["1.10.0", "1.2.0", "0.9.0", "0.1.0"]);
}

#[test]
fn reverify_appends_history_and_clears_stale_default() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("reverify");
    let request = f.upload(&skill, "1.0.0", b"payload");
    let key = request.storage_key.clone();
    let outcome = f.registry.publish_version(Some(&f.owner), request).unwrap();
    assert!(outcome.became_default);

    f.blobs.remove(&key);
    let rejected = f
        .registry
        .reverify_version(Some(&f.owner), &skill.id, &outcome.version_id)
        .unwrap();
    assert_eq!(rejected.status, VersionStatus::Rejected);
    assert!(!rejected.checks.has_stored_artifact);
    assert_eq!(
        f.registry.get_skill(&skill.id).unwrap().default_version_id,
        None
    );

    f.blobs.put_at(&key, b"payload");
    let restored = f
        .registry
        .reverify_version(Some(&f.owner), &skill.id, &outcome.version_id)
        .unwrap();
    assert_eq!(restored.status, VersionStatus::Verified);
    assert!(restored.became_default);

    let history = f.registry.verification_history(&outcome.version_id).unwrap();
    let statuses: Vec<VerificationStatus> = history.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![
            VerificationStatus::Passed,
            VerificationStatus::Failed,
            VerificationStatus::Passed
        ]
    );
}

#[test]
fn pending_batch_picks_up_interrupted_verifications() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("batch");

    for (i, version) in ["1.0.0", "1.1.0", "1.2.0"].iter().enumerate() {
        f.blobs.fail_next(1);
        let outcome = f
            .registry
            .publish_version(Some(&f.owner), f.upload(&skill, version, &[b'a'; 4][..=i]))
            .unwrap();
        assert_eq!(outcome.status, VersionStatus::Pending);
        assert!(outcome.errors[0].contains("blob lookup failed"));
    }

    let report = f.registry.run_pending_verifications(2).unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.verified, 2);

    let report = f.registry.run_pending_verifications(25).unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.verified, 1);

    let skill = f.registry.get_skill(&skill.id).unwrap();
    let default = f
        .registry
        .get_version(skill.default_version_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(default.version, "1.0.0");

    assert!(f.registry.run_pending_verifications(0).is_err());
}

#[test]
fn private_skills_are_hidden_from_other_actors() {
    let f = RegistryFixture::new();
    let skill = f
        .registry
        .create_skill(
            Some(&f.owner),
            NewSkill {
                slug: "secret".into(),
                name: "Secret".into(),
                visibility: Visibility::Private,
                storage_mode: StorageMode::Hosted,
            },
        )
        .unwrap();
    f.registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"secret"))
        .unwrap();

    assert!(
        f.registry
            .get_version_download_url(Some(&f.owner), &skill.id, None)
            .is_ok()
    );
    for actor in [None, Some(Actor::new("stranger"))] {
        let err = f
            .registry
            .get_version_download_url(actor.as_ref(), &skill.id, None)
            .unwrap_err();
        assert!(matches!(err, PackError::NotFound(_)));
    }
}

#[test]
fn linked_skills_do_not_accept_versions() {
    let f = RegistryFixture::new();
    let skill = f
        .registry
        .create_skill(
            Some(&f.owner),
            NewSkill {
                slug: "linked".into(),
                name: "Linked".into(),
                storage_mode: StorageMode::Linked,
                ..NewSkill::default()
            },
        )
        .unwrap();
    let err = f
        .registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"x"))
        .unwrap_err();
    assert!(matches!(err, PackError::Validation(_)));
}

#[test]
fn delete_removes_versions_and_history() {
    let f = RegistryFixture::new();
    let skill = f.create_skill("doomed");
    let outcome = f
        .registry
        .publish_version(Some(&f.owner), f.upload(&skill, "1.0.0", b"x"))
        .unwrap();

    let err = f
        .registry
        .delete_skill(Some(&Actor::new("intruder")), &skill.id)
        .unwrap_err();
    assert!(matches!(err, PackError::NotAuthorized(_)));

    f.registry.delete_skill(Some(&f.owner), &skill.id).unwrap();
    assert!(matches!(
        f.registry.get_skill(&skill.id),
        Err(PackError::NotFound(_))
    ));
    assert!(matches!(
        f.registry.get_version(&outcome.version_id),
        Err(PackError::NotFound(_))
    ));
    assert!(
        f.registry
            .verification_history(&outcome.version_id)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn concurrent_publishes_of_one_version_have_a_single_winner() {
    let f = RegistryFixture::with_settings(RegistrySettings {
        retry: RetryPolicy::no_retry(),
        rate_limits: RateLimitsConfig {
            publish_version: RateLimit::new(100, 60_000),
            ..RateLimitsConfig::default()
        },
        ..RegistrySettings::default()
    });
    let skill = f.create_skill("race");
    let requests: Vec<_> = (0..8u8)
        .map(|i| f.upload(&skill, "1.0.0", &[b'r', i]))
        .collect();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| scope.spawn(|| f.registry.publish_version(Some(&f.owner), request)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].status, VersionStatus::Verified);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, PackError::DuplicateVersion { .. }), "{err:?}");
        }
    }

    let versions = f.registry.list_versions(Some(&f.owner), &skill.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].id, winners[0].version_id);
}
