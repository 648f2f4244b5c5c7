use std::cmp::Ordering;

use proptest::prelude::*;

use skillpack::utils::version::{compare_versions, is_strict_semver};

fn triple() -> impl Strategy<Value = (u64, u64, u64)> {
    (0u64..1_000, 0u64..1_000, 0u64..1_000)
}

fn render((major, minor, patch): (u64, u64, u64)) -> String {
    format!("{major}.{minor}.{patch}")
}

proptest! {
    #[test]
    fn release_versions_order_numerically(a in triple(), b in triple()) {
        prop_assert_eq!(compare_versions(&render(a), &render(b)), a.cmp(&b));
    }

    #[test]
    fn comparison_is_antisymmetric(a in "[0-9a-z.-]{1,12}", b in "[0-9a-z.-]{1,12}") {
        prop_assert_eq!(compare_versions(&a, &b), compare_versions(&b, &a).reverse());
    }

    #[test]
    fn rendered_triples_are_strict_semver(a in triple()) {
        prop_assert!(is_strict_semver(&render(a)));
    }

    #[test]
    fn sorting_picks_numeric_maximum(versions in prop::collection::vec(triple(), 1..8)) {
        let rendered: Vec<String> = versions.iter().copied().map(render).collect();
        let max = rendered
            .iter()
            .max_by(|a, b| compare_versions(a, b))
            .unwrap();
        let expected = versions.iter().max().copied().map(render).unwrap();
        prop_assert_eq!(max, &expected);
    }
}

#[test]
fn ten_sorts_after_two() {
    assert_eq!(compare_versions("1.10.0", "1.2.0"), Ordering::Greater);
    assert_eq!(compare_versions("0.9.0", "1.2.0"), Ordering::Less);
}
