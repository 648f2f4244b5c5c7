use proptest::prelude::*;

use crate::pack::Manifest;

/// Slugs accepted by the slug pattern.
pub fn arb_slug() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9]",
        "[a-z0-9][a-z0-9-]{0,30}[a-z0-9]",
    ]
}

pub fn arb_semver() -> impl Strategy<Value = String> {
    (0u32..50, 0u32..50, 0u32..50, prop::option::of("[a-z]{1,5}(\\.[1-9][0-9]?)?")).prop_map(
        |(major, minor, patch, pre)| match pre {
            Some(pre) => format!("{major}.{minor}.{patch}-{pre}"),
            None => format!("{major}.{minor}.{patch}"),
        },
    )
}

/// Relative paths made of plain segments; never contain `..` or a leading `/`.
pub fn arb_relative_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,11}", 1..4)
        .prop_filter("no dot-dot segments", |segments| {
            segments.iter().all(|s| s != "..")
        })
        .prop_map(|segments| segments.join("/"))
}

/// Manifests that pass validation: unique files with the entry among them.
pub fn arb_valid_manifest() -> impl Strategy<Value = Manifest> {
    (
        arb_slug(),
        arb_semver(),
        prop::collection::btree_set(arb_relative_path(), 1..6),
        ".{1,40}",
    )
        .prop_filter("name must not be blank", |(_, _, _, name)| {
            !name.trim().is_empty()
        })
        .prop_map(|(slug, version, files, name)| {
            let files: Vec<String> = files.into_iter().collect();
            Manifest {
                name,
                slug,
                version,
                description: "generated".to_string(),
                author: "prop".to_string(),
                license: "MIT".to_string(),
                entry: files[0].clone(),
                files,
            }
        })
}
