// Property-based tests for version ordering and flag selection

use proptest::prelude::*;
use std::cmp::Ordering;
use vmsmith_vm::{sata_port_count_flag, ToolVersion};

fn segments_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..20, 1..5)
}

fn padded(segments: &[u64], len: usize) -> Vec<u64> {
    let mut padded = segments.to_vec();
    padded.resize(len, 0);
    padded
}

fn render(segments: &[u64]) -> String {
    segments
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

// Ordering agrees with lexicographic comparison of zero-padded segments
proptest! {
    #[test]
    fn test_ordering_matches_padded_segments(a in segments_strategy(), b in segments_strategy()) {
        let len = a.len().max(b.len());
        let expected = padded(&a, len).cmp(&padded(&b, len));

        let va = ToolVersion::new(a);
        let vb = ToolVersion::new(b);
        prop_assert_eq!(va.cmp(&vb), expected);
        prop_assert_eq!(vb.cmp(&va), expected.reverse());
    }
}

proptest! {
    #[test]
    fn test_ordering_is_transitive(
        a in segments_strategy(),
        b in segments_strategy(),
        c in segments_strategy()
    ) {
        let (va, vb, vc) = (ToolVersion::new(a), ToolVersion::new(b), ToolVersion::new(c));
        if va <= vb && vb <= vc {
            prop_assert!(va <= vc);
        }
        if va == vb && vb == vc {
            prop_assert_eq!(va.cmp(&vc), Ordering::Equal);
        }
    }
}

// Parsing a rendered version, with or without a tag, yields the same segments
proptest! {
    #[test]
    fn test_parse_rendered_version(
        segments in segments_strategy(),
        tag in prop_oneof![Just(""), Just("_RC1"), Just("_OSEr7"), Just("r153438")]
    ) {
        let raw = format!("{}{}", render(&segments), tag);
        let parsed: ToolVersion = raw.parse().unwrap();
        prop_assert_eq!(parsed.segments(), segments.as_slice());
    }
}

proptest! {
    #[test]
    fn test_sata_flag_threshold(segments in segments_strategy()) {
        let version = ToolVersion::new(segments);
        let threshold = ToolVersion::new(vec![4, 3]);
        let flag = sata_port_count_flag(&version);

        if version < threshold {
            prop_assert_eq!(flag, "--sataportcount");
        } else {
            prop_assert_eq!(flag, "--portcount");
        }
    }
}
