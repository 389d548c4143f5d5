//! Output locations and atomic file writes shared by both steps

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;

/// Where the three batch artifacts live
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    /// Product id -> category lookup (JSON)
    pub categories: PathBuf,
    /// Per-user feature table (CSV)
    pub features: PathBuf,
    /// Cluster assignments and definitions (JSON)
    pub clusters: PathBuf,
}

impl ArtifactPaths {
    pub const CATEGORIES_FILE: &'static str = "product_categories.json";
    pub const FEATURES_FILE: &'static str = "user_features.csv";
    pub const CLUSTERS_FILE: &'static str = "user_clusters.json";

    /// Default file names inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            categories: dir.join(Self::CATEGORIES_FILE),
            features: dir.join(Self::FEATURES_FILE),
            clusters: dir.join(Self::CLUSTERS_FILE),
        }
    }
}

/// Write `path` through a temp file in the same directory, then rename it
/// into place. Readers see either the old file or the complete new one.
///
/// On Unix the file gets the same mode a plain `fs::write` would (0666 minus
/// the umask) instead of the owner-only temp file default.
pub fn write_atomically<F>(path: &Path, write: F) -> crate::Result<()>
where
    F: FnOnce(&mut File) -> crate::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut builder = Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as JSON into `path`
pub fn write_json<T: Serialize>(path: &Path, value: &T, pretty: bool) -> crate::Result<()> {
    write_atomically(path, |file| {
        let mut writer = BufWriter::new(file);
        if pretty {
            serde_json::to_writer_pretty(&mut writer, value)?;
        } else {
            serde_json::to_writer(&mut writer, value)?;
        }
        writer.flush()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_in_dir_uses_default_names() {
        let paths = ArtifactPaths::in_dir("out");
        assert_eq!(paths.categories, Path::new("out/product_categories.json"));
        assert_eq!(paths.features, Path::new("out/user_features.csv"));
        assert_eq!(paths.clusters, Path::new("out/user_clusters.json"));
    }

    #[test]
    fn test_write_json_creates_parent_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("map.json");

        let mut first = BTreeMap::new();
        first.insert("p1", "Fruit");
        write_json(&path, &first, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"p1":"Fruit"}"#);

        let second: BTreeMap<&str, &str> = BTreeMap::new();
        write_json(&path, &second, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_failed_write_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        fs::write(&path, "old").unwrap();

        let result = write_atomically(&path, |file| {
            file.write_all(b"partial")?;
            anyhow::bail!("store went away")
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
    }

    #[cfg(unix)]
    #[test]
    fn test_artifact_mode_matches_plain_write() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("user_clusters.json");
        let plain = dir.path().join("plain.json");

        write_json(&artifact, &BTreeMap::<String, usize>::new(), true).unwrap();
        fs::write(&plain, "{}").unwrap();

        let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&artifact), mode(&plain));
    }
}
