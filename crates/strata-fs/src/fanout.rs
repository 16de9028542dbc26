//! Directory fan-out.
//!
//! A file named `00042-state.bin` with depth 3 lives at `0/0/0/00042-state.bin`.
//! The directories come from the first ASCII alphanumeric characters of the
//! name, lowercased; names with fewer such characters nest less deeply. The
//! file keeps its full name, so listing recovers names from leaves alone.
//!
//! Ledger files carry 20-digit zero-padded block numbers, so their leading
//! characters are zeros until block numbers grow past `20 - depth` digits.
//! At the default depth of 8 every chunk and snapshot file shares one leaf
//! directory. The layout is part of the on-disk format and stays as is.

use std::path::{Path, PathBuf};

/// Subdirectory components for `name`.
pub fn fanout_dirs(name: &str, max_depth: usize) -> Vec<String> {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .take(max_depth)
        .map(|c| c.to_ascii_lowercase().to_string())
        .collect()
}

/// Full path of `name` under `base`.
pub fn fanout_path(base: &Path, name: &str, max_depth: usize) -> PathBuf {
    let mut path = base.to_path_buf();
    for dir in fanout_dirs(name, max_depth) {
        path.push(dir);
    }
    path.push(name);
    path
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn nests_by_leading_alphanumerics() {
        let path = fanout_path(Path::new("/base"), "Ab-9x.bin", 3);
        assert_eq!(path, Path::new("/base/a/b/9/Ab-9x.bin"));
    }

    #[test]
    fn short_names_nest_less() {
        assert_eq!(fanout_dirs("!-x", 8), vec!["x".to_string()]);
        assert!(fanout_dirs("abc", 0).is_empty());
    }

    #[test]
    fn padded_numbers_fan_out_on_high_digits() {
        let low = fanout_dirs("00000000000000000012-state.bin", 8);
        assert_eq!(low, vec!["0".to_string(); 8]);
        let high = fanout_dirs("00000000012345678901-state.bin", 12);
        assert_eq!(high.concat(), "000000000123");
    }

    proptest! {
        #[test]
        fn distinct_names_get_distinct_paths(
            a in "[0-9a-zA-Z][0-9a-zA-Z!.-]{0,23}",
            b in "[0-9a-zA-Z][0-9a-zA-Z!.-]{0,23}",
            depth in 0usize..10,
        ) {
            let base = Path::new("/base");
            let pa = fanout_path(base, &a, depth);
            let pb = fanout_path(base, &b, depth);
            prop_assert_eq!(a == b, pa == pb);
            prop_assert_eq!(pa.file_name().and_then(|n| n.to_str()), Some(a.as_str()));
        }
    }
}
