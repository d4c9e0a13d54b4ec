//! Mapping of source paths to archive paths

/// Ordered (prefix, replacement) rules applied to relative paths
///
/// The first rule whose prefix matches wins. An empty prefix matches every
/// path and places it under the replacement directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapFile {
    rules: Vec<(String, String)>,
}

impl MapFile {
    /// Mapper from ordered rules
    pub fn new(rules: Vec<(String, String)>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(from, to)| (normalize(&from), normalize(&to)))
                .collect(),
        }
    }

    /// Archive path for `path`; unmatched paths are returned unchanged
    pub fn map(&self, path: &str) -> String {
        let path = normalize(path);

        for (from, to) in &self.rules {
            if from.is_empty() {
                return join(to, &path);
            }
            if let Some(rest) = path.strip_prefix(from.as_str()) {
                // Match whole segments only: "lib" must not map "library/x"
                if rest.is_empty() || rest.starts_with('/') || from.ends_with('/') {
                    return join(to, rest.trim_start_matches('/'));
                }
            }
        }

        path
    }
}

fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.strip_prefix("./").unwrap_or(&unified);
    trimmed.trim_start_matches('/').to_string()
}

fn join(dir: &str, rest: &str) -> String {
    match (dir.trim_end_matches('/'), rest) {
        ("", rest) => rest.to_string(),
        (dir, "") => dir.to_string(),
        (dir, rest) => format!("{dir}/{rest}"),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn map(rules: &[(&str, &str)]) -> MapFile {
        MapFile::new(
            rules
                .iter()
                .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_first_match_wins() {
        let mapper = map(&[("lib", "src"), ("lib/legacy", "old"), ("", "other")]);
        assert_eq!(mapper.map("lib/legacy/A.php"), "src/legacy/A.php");
        assert_eq!(mapper.map("lib"), "src");
        assert_eq!(mapper.map("bin/run"), "other/bin/run");
    }

    #[test]
    fn test_prefix_matches_whole_segments() {
        let mapper = map(&[("lib", "src")]);
        assert_eq!(mapper.map("library/A.php"), "library/A.php");
        assert_eq!(mapper.map("./lib/A.php"), "src/A.php");
    }

    #[test]
    fn test_mapping_to_root() {
        let mapper = map(&[("public/", "")]);
        assert_eq!(mapper.map("public/index.php"), "index.php");
    }

    #[test]
    fn test_windows_separators() {
        let mapper = map(&[("lib\\", "src")]);
        assert_eq!(mapper.map("lib\\Util\\A.php"), "src/Util/A.php");
    }

    proptest! {
        #[test]
        fn empty_mapper_is_identity(path in "[a-z]{1,6}(/[a-z]{1,6}){0,3}") {
            prop_assert_eq!(MapFile::default().map(&path), path);
        }

        #[test]
        fn catch_all_prefixes_every_path(path in "[a-z]{1,6}(/[a-z]{1,6}){0,3}") {
            let mapper = map(&[("", "vendor-bin")]);
            prop_assert_eq!(mapper.map(&path), format!("vendor-bin/{path}"));
        }

        #[test]
        fn unmatched_paths_pass_through(path in "[a-m]{1,6}(/[a-z]{1,6}){0,3}") {
            let mapper = map(&[("zz", "mapped")]);
            prop_assert_eq!(mapper.map(&path), path);
        }
    }
}
