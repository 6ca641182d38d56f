//! Dataset catalog
//!
//! Datasets are read once at startup from `datasets.json` in the data
//! directory:
//!
//! ```json
//! [
//!   { "dataset": "climate-1", "address": ["f01234"], "dir": "/mnt/car/climate-1" },
//!   { "dataset": "old", "address": "f05678", "dir": "/mnt/car/old", "ignore": true }
//! ]
//! ```
//!
//! Entries keep their file order; that order is the order the importer
//! walks them in each tick.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Extension of importable files
pub const CAR_EXTENSION: &str = "car";

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A configured source of CAR files
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset name, as known to the broker
    #[serde(rename = "dataset")]
    pub name: String,

    /// Client addresses whose deals belong to this dataset
    #[serde(rename = "address", default, deserialize_with = "one_or_many")]
    pub addresses: Vec<String>,

    /// Directory holding `<piece_cid>.car` files
    pub dir: PathBuf,

    /// Skip this entry entirely
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore: bool,
}

impl Dataset {
    /// Expected location of the CAR file for a piece CID
    ///
    /// Returns `None` when the dataset has no directory or the CID would
    /// escape it.
    pub fn car_file_path(&self, piece_cid: &str) -> Option<PathBuf> {
        if self.dir.as_os_str().is_empty()
            || piece_cid.is_empty()
            || piece_cid.contains(['/', '\\'])
            || piece_cid == ".."
        {
            return None;
        }
        Some(self.dir.join(format!("{piece_cid}.{CAR_EXTENSION}")))
    }

    /// All `*.car` files in the dataset directory, sorted by path
    pub async fn car_file_paths(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_car = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(CAR_EXTENSION));
            if is_car && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }
}

/// The active (non-ignored) datasets, in file order
#[derive(Clone, Debug, Default)]
pub struct DatasetCatalog {
    datasets: Vec<Dataset>,
}

impl DatasetCatalog {
    /// Build a catalog, dropping ignored entries and rejecting duplicate names
    pub fn new(entries: Vec<Dataset>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut datasets = Vec::with_capacity(entries.len());

        for dataset in entries {
            if dataset.ignore {
                tracing::debug!(dataset = %dataset.name, "Ignoring dataset");
                continue;
            }
            if !seen.insert(dataset.name.clone()) {
                return Err(Error::config(
                    format!("duplicate dataset name {:?}", dataset.name),
                    "dataset",
                ));
            }
            datasets.push(dataset);
        }

        Ok(Self { datasets })
    }

    /// Parse a catalog from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<Dataset> = serde_json::from_str(json).map_err(|e| Error::Config {
            message: format!("datasets file is in incorrect format: {e}"),
            key: None,
        })?;
        Self::new(entries)
    }

    /// Read the catalog file
    pub async fn load(path: &Path) -> Result<Self> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Config {
                    message: format!(
                        "can't find the datasets file; it should be located at {}. \
                         Populate it and try again",
                        path.display()
                    ),
                    key: Some("datasets_file".to_string()),
                });
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let catalog = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            datasets = catalog.len(),
            "Loaded dataset catalog"
        );
        Ok(catalog)
    }

    /// Datasets in iteration order
    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// Look up a dataset by name
    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Number of active datasets
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// Whether there are no active datasets
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Piece CIDs of one dataset that are already imported or in flight
///
/// Filled at most once. A later [`populate`](Self::populate) is ignored
/// until [`invalidate`](Self::invalidate) is called, so the set goes stale
/// in a long-running process unless something invalidates it.
#[derive(Clone, Debug, Default)]
pub struct ImportedCidCache {
    cids: HashSet<String>,
    populated: bool,
}

impl ImportedCidCache {
    /// Empty, unpopulated cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `populate` has run since creation or the last invalidation
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Fill the cache; returns `false` (and changes nothing) if already populated
    pub fn populate<I, S>(&mut self, cids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.populated {
            return false;
        }
        self.cids.extend(cids.into_iter().map(Into::into));
        self.populated = true;
        true
    }

    /// Whether the CID is known to be imported or in flight
    pub fn contains(&self, piece_cid: &str) -> bool {
        self.cids.contains(piece_cid)
    }

    /// Forget everything so the next tick repopulates
    pub fn invalidate(&mut self) {
        self.cids.clear();
        self.populated = false;
    }

    /// Number of cached CIDs
    pub fn len(&self) -> usize {
        self.cids.len()
    }

    /// Whether the cache holds no CIDs
    pub fn is_empty(&self) -> bool {
        self.cids.is_empty()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dataset(name: &str, dir: &Path) -> Dataset {
        Dataset {
            name: name.to_string(),
            addresses: vec!["f01000".to_string()],
            dir: dir.to_path_buf(),
            ignore: false,
        }
    }

    #[test]
    fn parses_datasets_in_file_order_and_skips_ignored() {
        let json = r#"[
            {"dataset": "zeta", "address": ["f01", "f02"], "dir": "/z"},
            {"dataset": "skipped", "address": ["f03"], "dir": "/s", "ignore": true},
            {"dataset": "alpha", "address": "f04", "dir": "/a"}
        ]"#;

        let catalog = DatasetCatalog::from_json(json).unwrap();
        let names: Vec<&str> = catalog.datasets().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(catalog.get("zeta").unwrap().addresses, vec!["f01", "f02"]);
        assert_eq!(catalog.get("alpha").unwrap().addresses, vec!["f04"]);
        assert!(catalog.get("skipped").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let json = r#"[
            {"dataset": "a", "address": [], "dir": "/1"},
            {"dataset": "a", "address": [], "dir": "/2"}
        ]"#;
        let err = DatasetCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate dataset name"));
    }

    #[test]
    fn ignored_duplicate_is_not_a_conflict() {
        let json = r#"[
            {"dataset": "a", "address": [], "dir": "/1", "ignore": true},
            {"dataset": "a", "address": [], "dir": "/2"}
        ]"#;
        let catalog = DatasetCatalog::from_json(json).unwrap();
        assert_eq!(catalog.get("a").unwrap().dir, PathBuf::from("/2"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let err = DatasetCatalog::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn missing_file_explains_where_it_should_be() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datasets.json");

        let err = DatasetCatalog::load(&path).await.unwrap_err();
        match err {
            Error::Config { message, key } => {
                assert!(message.contains(&path.display().to_string()));
                assert_eq!(key.as_deref(), Some("datasets_file"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn car_file_path_joins_dir_and_cid() {
        let ds = dataset("a", Path::new("/mnt/a"));
        assert_eq!(
            ds.car_file_path("baga6ea4seaq").unwrap(),
            PathBuf::from("/mnt/a/baga6ea4seaq.car")
        );
        assert!(ds.car_file_path("").is_none());
        assert!(ds.car_file_path("../etc/passwd").is_none());

        let no_dir = dataset("b", Path::new(""));
        assert!(no_dir.car_file_path("baga").is_none());
    }

    #[tokio::test]
    async fn car_file_paths_lists_only_car_files_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["b.car", "a.car", "notes.txt", "c.CAR"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("sub.car")).await.unwrap();

        let ds = dataset("a", dir.path());
        let files = ds.car_file_paths().await.unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.car", "b.car", "c.CAR"]);
    }

    #[test]
    fn cache_populates_once_until_invalidated() {
        let mut cache = ImportedCidCache::new();
        assert!(!cache.is_populated());

        assert!(cache.populate(["a", "b"]));
        assert!(cache.contains("a"));
        assert_eq!(cache.len(), 2);

        assert!(!cache.populate(["c"]), "second populate is ignored");
        assert!(!cache.contains("c"));

        cache.invalidate();
        assert!(!cache.is_populated());
        assert!(cache.is_empty());

        assert!(cache.populate(["c"]));
        assert!(cache.contains("c"));
        assert!(!cache.contains("a"));
    }
}
