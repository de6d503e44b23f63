use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::decompose::DecomposedTable;
use crate::sitemap;

/// What to do when two sitemap URLs map to the same identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// The later table replaces the earlier one.
    #[default]
    Overwrite,
    /// The earlier table is kept and the collision is treated as an error.
    Reject,
    /// Key tables by host and full URL path instead of the last segment.
    Namespace,
}

/// Two sitemaps landed on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub identifier: String,
    /// Source URL of the table that survived.
    pub kept: String,
    /// Source URL of the table that was discarded.
    pub dropped: String,
}

#[derive(Debug)]
struct Entry {
    source_url: String,
    table: DecomposedTable,
}

/// Identifier → table for one traversal. Tables are moved in whole and never
/// edited afterwards.
#[derive(Debug, Default)]
pub struct SitemapCollection {
    policy: CollisionPolicy,
    tables: BTreeMap<String, Entry>,
}

impl SitemapCollection {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            tables: BTreeMap::new(),
        }
    }

    /// Storage key of a sitemap URL under this collection's policy.
    pub fn key_for(&self, sitemap_url: &str) -> String {
        match self.policy {
            CollisionPolicy::Namespace => sitemap::namespaced_identifier(sitemap_url),
            CollisionPolicy::Overwrite | CollisionPolicy::Reject => {
                sitemap::identifier(sitemap_url)
            }
        }
    }

    pub fn insert(&mut self, sitemap_url: &str, table: DecomposedTable) -> Option<Collision> {
        let key = self.key_for(sitemap_url);

        let Some(existing) = self.tables.get(&key) else {
            self.tables.insert(
                key,
                Entry {
                    source_url: sitemap_url.to_string(),
                    table,
                },
            );
            return None;
        };

        let collision = match self.policy {
            CollisionPolicy::Reject => Collision {
                identifier: key.clone(),
                kept: existing.source_url.clone(),
                dropped: sitemap_url.to_string(),
            },
            CollisionPolicy::Overwrite | CollisionPolicy::Namespace => {
                let c = Collision {
                    identifier: key.clone(),
                    kept: sitemap_url.to_string(),
                    dropped: existing.source_url.clone(),
                };
                self.tables.insert(
                    key,
                    Entry {
                        source_url: sitemap_url.to_string(),
                        table,
                    },
                );
                c
            }
        };

        warn!(
            "Identifier collision on {}: kept {}, dropped {}",
            collision.identifier, collision.kept, collision.dropped
        );
        Some(collision)
    }

    pub fn get(&self, identifier: &str) -> Option<&DecomposedTable> {
        self.tables.get(identifier).map(|e| &e.table)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Write every table to `{dir}/{identifier}.csv`, creating `dir` if needed.
    ///
    /// Tables are written independently; one failure does not stop the others.
    pub fn export(&self, dir: &Path) -> Result<ExportSummary, ExportError> {
        fs::create_dir_all(dir).map_err(|source| ExportError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let results: Vec<_> = self
            .tables
            .par_iter()
            .map(|(id, entry)| {
                let path = dir.join(format!("{}.csv", id));
                write_csv(&entry.table, &path).map(|()| path)
            })
            .collect();

        let mut summary = ExportSummary::default();
        for result in results {
            match result {
                Ok(path) => summary.written.push(path),
                Err(e) => {
                    warn!("{}", e);
                    summary.failed.push(e);
                }
            }
        }

        info!(
            "Exported {} tables to {} ({} failed)",
            summary.written.len(),
            dir.display(),
            summary.failed.len()
        );
        Ok(summary)
    }
}

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<ExportError>,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Header `Links,subdir1..subdirM`, one record per row, null as an empty field.
pub fn write_csv(table: &DecomposedTable, path: &Path) -> Result<(), ExportError> {
    let wrap = |source: csv::Error| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(wrap)?;
    writer.write_record(table.header()).map_err(wrap)?;
    for row in table.rows() {
        let record = std::iter::once(row.link.as_str())
            .chain(row.subdirs.iter().map(|s| s.as_deref().unwrap_or("")));
        writer.write_record(record).map_err(wrap)?;
    }
    writer
        .flush()
        .map_err(|e| ExportError::Write {
            path: path.to_path_buf(),
            source: e.into(),
        })
}
