//! Registry records and status enums.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ValidationError::field(
                        stringify!($name),
                        format!("unknown value '{other}'"),
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

string_enum!(Visibility { Public => "public", Private => "private" });

/// Where a skill's content lives. Only hosted skills accept published versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    #[default]
    Hosted,
    Linked,
}

string_enum!(StorageMode { Hosted => "hosted", Linked => "linked" });

impl StorageMode {
    pub const fn supports_versions(self) -> bool {
        matches!(self, Self::Hosted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Pending,
    Verified,
    Rejected,
}

string_enum!(VersionStatus {
    Pending => "pending",
    Verified => "verified",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Running,
    Passed,
    Failed,
}

string_enum!(VerificationStatus {
    Running => "running",
    Passed => "passed",
    Failed => "failed",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub owner_id: String,
    pub visibility: Visibility,
    pub storage_mode: StorageMode,
    pub default_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillVersion {
    pub id: String,
    pub skill_id: String,
    pub version: String,
    pub changelog: Option<String>,
    pub storage_key: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub manifest_json: Option<String>,
    pub published_by: String,
    pub status: VersionStatus,
    pub verification_id: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Named boolean outcome of each verification check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationChecks {
    pub has_stored_artifact: bool,
    pub size_matches: bool,
    pub hash_matches: bool,
    pub manifest_valid: bool,
}

impl VerificationChecks {
    pub const fn all_passed(&self) -> bool {
        self.has_stored_artifact && self.size_matches && self.hash_matches && self.manifest_valid
    }
}

/// One verification run. Stored as `running`, then completed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub id: String,
    pub version_id: String,
    pub status: VerificationStatus,
    pub checks: VerificationChecks,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Inputs to `Registry::publish_version`.
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub skill_id: String,
    pub version: String,
    pub changelog: Option<String>,
    pub storage_key: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub manifest_json: Option<String>,
}

/// Post-verification state returned by publish and reverify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub version_id: String,
    pub version: String,
    pub status: VersionStatus,
    pub verification_id: String,
    pub checks: VerificationChecks,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// True when this run set the skill's default pointer.
    pub became_default: bool,
}

/// Counts returned by the pending-verification batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub scanned: usize,
    pub processed: usize,
    pub verified: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTarget {
    pub skill_id: String,
    pub version_id: String,
    pub version: String,
    pub url: String,
    pub content_hash: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    pub upload_url: String,
    pub storage_key: String,
}
