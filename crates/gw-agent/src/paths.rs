use std::path::{Path, PathBuf};

/// Directory anchoring all operator paths. `GEOWEAVER_HOME` overrides the
/// platform home directory.
pub fn operator_home() -> PathBuf {
    if let Ok(v) = std::env::var("GEOWEAVER_HOME")
        && !v.trim().is_empty()
    {
        return PathBuf::from(v);
    }

    #[cfg(unix)]
    let home = std::env::var("HOME");
    #[cfg(not(unix))]
    let home = std::env::var("USERPROFILE");

    home.map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

pub fn current_username() -> String {
    #[cfg(unix)]
    let user = std::env::var("USER");
    #[cfg(not(unix))]
    let user = std::env::var("USERNAME");

    user.ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn managed_jar_path(home: &Path) -> PathBuf {
    home.join("geoweaver.jar")
}

/// Server stdout/stderr land here, appended across launches.
pub fn server_log_path(home: &Path) -> PathBuf {
    home.join("geoweaver.log")
}

/// Base path of the embedded database when no override is configured. The
/// engine appends its own suffixes (`.mv.db`, `.trace.db`) to this stem.
pub fn default_db_base(home: &Path) -> PathBuf {
    home.join("h2").join("gw")
}

pub fn properties_path(home: &Path) -> PathBuf {
    home.join("geoweaver").join("application.properties")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_anchor_on_home() {
        let home = Path::new("/home/gw");
        assert_eq!(
            managed_jar_path(home),
            PathBuf::from("/home/gw/geoweaver.jar")
        );
        assert_eq!(default_db_base(home), PathBuf::from("/home/gw/h2/gw"));
        assert_eq!(
            properties_path(home),
            PathBuf::from("/home/gw/geoweaver/application.properties")
        );
    }
}
