use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::pack::manifest::{MANIFEST_FILE, Manifest};

/// A manifest that passes validation and matches [`SkillDirFixture`] contents.
pub fn sample_manifest() -> Manifest {
    Manifest {
        name: "PDF Tools".to_string(),
        slug: "pdf-tools".to_string(),
        version: "1.0.0".to_string(),
        description: "Split, merge and inspect PDF files".to_string(),
        author: "Ada Example".to_string(),
        license: "MIT".to_string(),
        entry: "SKILL.md".to_string(),
        files: vec!["SKILL.md".to_string(), "docs/usage.md".to_string()],
    }
}

/// Same manifest with a different version string.
pub fn manifest_with_version(version: &str) -> Manifest {
    Manifest {
        version: version.to_string(),
        ..sample_manifest()
    }
}

/// Temporary skill directory holding a manifest file and every declared file.
pub struct SkillDirFixture {
    pub temp_dir: TempDir,
}

impl SkillDirFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self { temp_dir }
    }

    /// Write `manifest` as `skill.json` plus placeholder content for each file.
    pub fn with_manifest(manifest: &Manifest) -> Self {
        let fixture = Self::new();
        fixture.write_manifest(manifest);
        for file in &manifest.files {
            if file == MANIFEST_FILE {
                continue;
            }
            fixture.write_file(file, &format!("# {file}\n\ncontent of {file}\n"));
        }
        fixture
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> PathBuf {
        let json = manifest
            .to_json_string()
            .expect("Failed to serialize manifest");
        self.write_file(MANIFEST_FILE, &json)
    }

    pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
        let full_path = self.temp_dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        std::fs::write(&full_path, content).expect("Failed to write file");
        full_path
    }
}

impl Default for SkillDirFixture {
    fn default() -> Self {
        Self::new()
    }
}
