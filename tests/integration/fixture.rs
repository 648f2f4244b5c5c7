use std::sync::Arc;

use skillpack::pack::content_digest;
use skillpack::registry::{
    Actor, ManualClock, MemoryBlobStore, NewSkill, PublishRequest, Registry, RegistrySettings,
    RetryPolicy, Skill,
};

pub const START_MS: i64 = 1_700_000_040_000;

/// In-memory registry with a controllable clock and blob store.
pub struct RegistryFixture {
    pub registry: Registry,
    pub blobs: Arc<MemoryBlobStore>,
    pub clock: Arc<ManualClock>,
    pub owner: Actor,
}

impl RegistryFixture {
    pub fn new() -> Self {
        Self::with_settings(RegistrySettings {
            retry: RetryPolicy::no_retry(),
            ..RegistrySettings::default()
        })
    }

    pub fn with_settings(settings: RegistrySettings) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(START_MS));
        let registry = Registry::in_memory(blobs.clone(), clock.clone(), settings).unwrap();
        Self {
            registry,
            blobs,
            clock,
            owner: Actor::new("owner-1"),
        }
    }

    pub fn create_skill(&self, slug: &str) -> Skill {
        self.registry
            .create_skill(
                Some(&self.owner),
                NewSkill {
                    slug: slug.to_string(),
                    name: slug.to_uppercase(),
                    ..NewSkill::default()
                },
            )
            .unwrap()
    }

    /// Store `bytes` and build a publish request that declares them faithfully.
    pub fn upload(&self, skill: &Skill, version: &str, bytes: &[u8]) -> PublishRequest {
        PublishRequest {
            skill_id: skill.id.clone(),
            version: version.to_string(),
            storage_key: self.blobs.put(bytes),
            content_hash: content_digest(bytes),
            size_bytes: bytes.len() as u64,
            ..PublishRequest::default()
        }
    }

    /// Move past the current rate-limit window.
    pub fn next_window(&self) {
        self.clock.advance(60_000);
    }
}
