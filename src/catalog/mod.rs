pub mod record;

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::info;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    catalog::record::{RecordWriter, parse_record, validate_label},
    embedding::Embedding,
    error::{ForensicsError, Result},
};

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub label: String,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub label: String,
    pub distance: f32,
}

struct CatalogState {
    entries: Vec<Arc<CatalogEntry>>,
    writer: Option<RecordWriter>,
}

/// Append-only archive of labelled embeddings. Entries are never removed, and
/// an entry only becomes visible once its line has reached the durable record.
pub struct EmbeddingCatalog {
    name: String,
    dimension: usize,
    path: Option<PathBuf>,
    state: RwLock<CatalogState>,
}

impl EmbeddingCatalog {
    pub fn in_memory(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            path: None,
            state: RwLock::new(CatalogState {
                entries: Vec::new(),
                writer: None,
            }),
        }
    }

    /// Opens the record at `path`, creating it with a versioned header when it
    /// does not exist yet.
    pub fn open<P: AsRef<Path>>(name: impl Into<String>, path: P, dimension: usize) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref();

        let (entries, writer) = if path.exists() {
            let parsed = parse_record(BufReader::new(File::open(path)?))?;
            if let Some(found) = parsed.dimension {
                if found != dimension {
                    return Err(ForensicsError::DimensionMismatch {
                        expected: dimension,
                        actual: found,
                    });
                }
            }
            let writer = RecordWriter::open_existing(path, parsed.ends_with_newline)?;
            (parsed.entries, writer)
        } else {
            (Vec::new(), RecordWriter::create(path, dimension)?)
        };

        info!(
            "Opened {} catalog at {} with {} entries",
            name,
            path.display(),
            entries.len()
        );

        Ok(Self {
            name,
            dimension,
            path: Some(path.to_path_buf()),
            state: RwLock::new(CatalogState {
                entries: entries.into_iter().map(Arc::new).collect(),
                writer: Some(writer),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check_query(&self, query: &Embedding) -> Result<()> {
        check_dimension(self.dimension, query)
    }

    /// Checks that `append` would accept this entry, without archiving it.
    pub fn check_entry(&self, label: &str, embedding: &Embedding) -> Result<()> {
        check_dimension(self.dimension, embedding)?;
        if embedding.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(ForensicsError::InvalidParameter(format!(
                "embedding for {label:?} has non-finite values"
            )));
        }
        validate_label(label)
    }

    pub fn append(&self, label: &str, embedding: Embedding) -> Result<()> {
        self.check_entry(label, &embedding)?;

        let mut state = self.state.write();
        if let Some(writer) = state.writer.as_mut() {
            writer.append(label, &embedding)?;
        }
        state.entries.push(Arc::new(CatalogEntry {
            label: label.to_string(),
            embedding,
        }));

        Ok(())
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            dimension: self.dimension,
            entries: self.state.read().entries.clone(),
        }
    }

    pub fn nearest(&self, query: &Embedding, threshold: f32) -> Result<Vec<Neighbor>> {
        let state = self.state.read();
        scan(&state.entries, self.dimension, query, threshold)
    }

    pub fn closest(&self, query: &Embedding, threshold: f32) -> Result<Option<Neighbor>> {
        Ok(closest_of(self.nearest(query, threshold)?))
    }
}

/// Frozen view of a catalog taken at one point in time.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    dimension: usize,
    entries: Vec<Arc<CatalogEntry>>,
}

impl CatalogSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn nearest(&self, query: &Embedding, threshold: f32) -> Result<Vec<Neighbor>> {
        scan(&self.entries, self.dimension, query, threshold)
    }

    pub fn closest(&self, query: &Embedding, threshold: f32) -> Result<Option<Neighbor>> {
        Ok(closest_of(self.nearest(query, threshold)?))
    }
}

/// Every entry strictly closer than `threshold`, in storage order.
fn scan(
    entries: &[Arc<CatalogEntry>],
    dimension: usize,
    query: &Embedding,
    threshold: f32,
) -> Result<Vec<Neighbor>> {
    if threshold.is_nan() {
        return Err(ForensicsError::InvalidParameter(
            "lookup threshold must not be NaN".into(),
        ));
    }
    check_dimension(dimension, query)?;

    let mut neighbors = Vec::new();
    for entry in entries {
        let distance = query.euclidean_distance(&entry.embedding)?;
        if distance < threshold {
            neighbors.push(Neighbor {
                label: entry.label.clone(),
                distance,
            });
        }
    }

    Ok(neighbors)
}

fn check_dimension(dimension: usize, embedding: &Embedding) -> Result<()> {
    if embedding.dim() != dimension {
        return Err(ForensicsError::DimensionMismatch {
            expected: dimension,
            actual: embedding.dim(),
        });
    }
    Ok(())
}

fn closest_of(neighbors: Vec<Neighbor>) -> Option<Neighbor> {
    neighbors.into_iter().reduce(|best, candidate| {
        if candidate.distance < best.distance {
            candidate
        } else {
            best
        }
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn unit(angle: f32) -> Embedding {
        Embedding::new(vec![angle.cos(), angle.sin()])
    }

    fn sample_catalog() -> EmbeddingCatalog {
        let catalog = EmbeddingCatalog::in_memory("pre", 2);
        catalog.append("a", unit(0.0)).unwrap();
        catalog.append("b", unit(0.3)).unwrap();
        catalog.append("c", unit(0.1)).unwrap();
        catalog
    }

    #[test]
    fn test_threshold_extremes() {
        let catalog = sample_catalog();

        assert!(catalog.nearest(&unit(0.05), 0.0).unwrap().is_empty());
        assert_eq!(catalog.nearest(&unit(0.05), f32::INFINITY).unwrap().len(), 3);
    }

    #[test]
    fn test_nearest_keeps_storage_order() {
        let catalog = sample_catalog();
        let labels = catalog
            .nearest(&unit(0.2), 0.25)
            .unwrap()
            .into_iter()
            .map(|n| n.label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["a", "b", "c"]);

        let closest = catalog.closest(&unit(0.2), 0.25).unwrap().unwrap();
        assert!(closest.label == "b" || closest.label == "c");
        assert!(catalog.closest(&unit(3.0), 0.1).unwrap().is_none());
    }

    #[test]
    fn test_threshold_is_strict() {
        let catalog = EmbeddingCatalog::in_memory("post", 2);
        catalog.append("origin", Embedding::new(vec![0.0, 0.0])).unwrap();

        let query = Embedding::new(vec![0.0, 0.5]);
        assert!(catalog.nearest(&query, 0.5).unwrap().is_empty());
        assert_eq!(catalog.nearest(&query, 0.5001).unwrap().len(), 1);
    }

    #[test]
    fn test_append_is_monotonic() {
        let catalog = sample_catalog();
        let before = catalog.len();

        for i in 0..5 {
            catalog.append(&format!("extra-{i}"), unit(i as f32)).unwrap();
            catalog.nearest(&unit(0.0), 1.0).unwrap();
        }
        assert_eq!(catalog.len(), before + 5);
    }

    #[test]
    fn test_dimension_checks() {
        let catalog = sample_catalog();
        assert!(matches!(
            catalog.append("bad", Embedding::new(vec![1.0])),
            Err(ForensicsError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            catalog.nearest(&Embedding::new(vec![1.0, 0.0, 0.0]), 1.0),
            Err(ForensicsError::DimensionMismatch { .. })
        ));
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_snapshot_does_not_see_later_appends() {
        let catalog = sample_catalog();
        let snapshot = catalog.snapshot();

        catalog.append("late", unit(0.0)).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.nearest(&unit(0.0), 0.01).unwrap().len(), 1);
        assert_eq!(catalog.nearest(&unit(0.0), 0.01).unwrap().len(), 2);
    }

    #[test]
    fn test_durable_catalog_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pre_values.csv");

        {
            let catalog = EmbeddingCatalog::open("pre", &path, 2).unwrap();
            catalog.append("images/pre/a.jpg", unit(0.0)).unwrap();
            catalog.append("images/pre/b.jpg", unit(1.0)).unwrap();
        }

        let catalog = EmbeddingCatalog::open("pre", &path, 2).unwrap();
        assert_eq!(catalog.len(), 2);
        let hits = catalog.nearest(&unit(1.0), 1e-4).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "images/pre/b.jpg");

        assert!(matches!(
            EmbeddingCatalog::open("pre", &path, 3),
            Err(ForensicsError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_legacy_record_gains_entries_on_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post_values.csv");
        fs::write(&path, "name, v1, v2\nimages/post/old.jpg, 1, 0").unwrap();

        let catalog = EmbeddingCatalog::open("post", &path, 2).unwrap();
        assert_eq!(catalog.len(), 1);
        catalog.append("images/post/new.jpg", unit(0.5)).unwrap();
        drop(catalog);

        let reopened = EmbeddingCatalog::open("post", &path, 2).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_rejected_label_is_not_archived() {
        let catalog = sample_catalog();
        assert!(matches!(
            catalog.append("x\ny", unit(0.0)),
            Err(ForensicsError::InvalidLabel(_))
        ));
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_non_finite_embedding_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pre_values.csv");

        {
            let catalog = EmbeddingCatalog::open("pre", &path, 2).unwrap();
            catalog.append("images/pre/a.jpg", unit(0.0)).unwrap();
            for bad in [f32::NAN, f32::INFINITY] {
                assert!(matches!(
                    catalog.append("images/pre/b.jpg", Embedding::new(vec![bad, 0.0])),
                    Err(ForensicsError::InvalidParameter(_))
                ));
            }
            assert_eq!(catalog.len(), 1);
        }

        let reopened = EmbeddingCatalog::open("pre", &path, 2).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_label_with_comma_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post_values.csv");

        {
            let catalog = EmbeddingCatalog::open("post", &path, 2).unwrap();
            catalog.append("post/IMG, copy.jpg", unit(0.4)).unwrap();
        }

        let catalog = EmbeddingCatalog::open("post", &path, 2).unwrap();
        let hits = catalog.nearest(&unit(0.4), 1e-4).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "post/IMG, copy.jpg");
    }
}
