//! Embedded-database location resolution.
//!
//! The server's Spring configuration may override where the H2 database
//! lives; the first matching key below wins. Without an override the
//! database sits at the well-known default under the home directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Property keys that may carry the database URL, in priority order.
const DB_URL_KEYS: [&str; 5] = [
    "spring.datasource.url",
    "database.url",
    "db.url",
    "datasource.url",
    "jdbc.url",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLocation {
    /// Base path the engine fragments into `<base>.mv.db` and friends.
    pub base: PathBuf,
    pub from_override: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseLocator {
    properties_path: PathBuf,
    default_base: PathBuf,
    home: PathBuf,
}

impl DatabaseLocator {
    pub fn new(properties_path: PathBuf, default_base: PathBuf, home: PathBuf) -> Self {
        Self {
            properties_path,
            default_base,
            home,
        }
    }

    /// Resolve the database base path. An unreadable, malformed, or
    /// non-file-backed override falls back to the default quietly; this is
    /// a read-only operation.
    pub fn resolve(&self) -> DatabaseLocation {
        if let Some(url) = self.read_override()
            && let Some(base) = extract_h2_base(&url)
        {
            let base = expand_home(&base, &self.home);
            info!(base = %base.display(), "using database path from configuration override");
            return DatabaseLocation {
                base,
                from_override: true,
            };
        }
        debug!(base = %self.default_base.display(), "using default database path");
        DatabaseLocation {
            base: self.default_base.clone(),
            from_override: false,
        }
    }

    fn read_override(&self) -> Option<String> {
        let text = std::fs::read_to_string(&self.properties_path).ok()?;
        first_db_url(&text)
    }
}

fn first_db_url(text: &str) -> Option<String> {
    let props = parse_properties(text);
    DB_URL_KEYS.iter().find_map(|k| props.get(*k).cloned())
}

fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        // Values may themselves contain '='; only the first one splits.
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}

/// Pull the filesystem base out of a `jdbc:h2:` URL. Returns `None` for
/// URLs pointing at other engines or at non-file H2 modes.
fn extract_h2_base(url: &str) -> Option<String> {
    let rest = url.trim().strip_prefix("jdbc:h2:")?;
    let rest = rest.strip_prefix("file:").unwrap_or(rest);
    if rest.starts_with("tcp:") || rest.starts_with("ssl:") || rest.starts_with("mem:") {
        return None;
    }
    let end = rest.find(';').unwrap_or(rest.len());
    let base = rest[..end].trim();
    (!base.is_empty()).then(|| base.to_string())
}

fn expand_home(base: &str, home: &Path) -> PathBuf {
    if let Some(rest) = base.strip_prefix("~/") {
        return home.join(rest);
    }
    if base == "~" {
        return home.to_path_buf();
    }
    PathBuf::from(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_priority_beats_file_order() {
        let text = concat!(
            "db.url=jdbc:h2:/var/lib/late\n",
            "spring.datasource.url=jdbc:h2:/var/lib/early\n",
        );
        assert_eq!(
            first_db_url(text).as_deref(),
            Some("jdbc:h2:/var/lib/early")
        );
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let text = concat!(
            "# db.url=jdbc:h2:/commented\n",
            "! db.url=jdbc:h2:/also-commented\n",
            "\n",
            "jdbc.url = jdbc:h2:/real/path \n",
        );
        assert_eq!(first_db_url(text).as_deref(), Some("jdbc:h2:/real/path"));
    }

    #[test]
    fn values_keep_their_own_equals_signs() {
        let text = "db.url=jdbc:h2:/data/gw;MODE=MySQL\n";
        assert_eq!(
            first_db_url(text).as_deref(),
            Some("jdbc:h2:/data/gw;MODE=MySQL")
        );
    }

    #[test]
    fn h2_base_extraction_handles_common_shapes() {
        assert_eq!(
            extract_h2_base("jdbc:h2:/home/gw/h2/gw").as_deref(),
            Some("/home/gw/h2/gw")
        );
        assert_eq!(
            extract_h2_base("jdbc:h2:file:/home/gw/h2/gw;DB_CLOSE_DELAY=-1").as_deref(),
            Some("/home/gw/h2/gw")
        );
        assert_eq!(
            extract_h2_base("jdbc:h2:~/h2/gw").as_deref(),
            Some("~/h2/gw")
        );
        assert_eq!(extract_h2_base("jdbc:postgresql://localhost/gw"), None);
        assert_eq!(extract_h2_base("jdbc:h2:tcp://localhost/~/gw"), None);
        assert_eq!(extract_h2_base("jdbc:h2:mem:test"), None);
        assert_eq!(extract_h2_base("jdbc:h2:"), None);
    }

    #[test]
    fn tilde_expands_against_home() {
        assert_eq!(
            expand_home("~/h2/gw", Path::new("/home/gw")),
            PathBuf::from("/home/gw/h2/gw")
        );
        assert_eq!(
            expand_home("/abs/path", Path::new("/home/gw")),
            PathBuf::from("/abs/path")
        );
    }

    #[test]
    fn resolve_prefers_a_valid_override() {
        let dir = tempfile::tempdir().unwrap();
        let props = dir.path().join("application.properties");
        std::fs::write(
            &props,
            "spring.datasource.url=jdbc:h2:file:~/h2/custom;AUTO_SERVER=TRUE\n",
        )
        .unwrap();

        let locator = DatabaseLocator::new(
            props,
            dir.path().join("h2").join("gw"),
            dir.path().to_path_buf(),
        );
        let loc = locator.resolve();
        assert!(loc.from_override);
        assert_eq!(loc.base, dir.path().join("h2").join("custom"));
    }

    #[test]
    fn resolve_falls_back_without_a_properties_file() {
        let dir = tempfile::tempdir().unwrap();
        let locator = DatabaseLocator::new(
            dir.path().join("missing.properties"),
            dir.path().join("h2").join("gw"),
            dir.path().to_path_buf(),
        );
        let loc = locator.resolve();
        assert!(!loc.from_override);
        assert_eq!(loc.base, dir.path().join("h2").join("gw"));
    }

    #[test]
    fn resolve_ignores_non_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let props = dir.path().join("application.properties");
        std::fs::write(&props, "db.url=jdbc:h2:tcp://dbhost/gw\n").unwrap();

        let locator = DatabaseLocator::new(
            props,
            dir.path().join("h2").join("gw"),
            dir.path().to_path_buf(),
        );
        let loc = locator.resolve();
        assert!(!loc.from_override);
    }
}
