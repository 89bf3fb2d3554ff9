//! Core data models used throughout kb-bridge.
//!
//! These types mirror the upstream indexing service's wire format exactly
//! (snake_case field names, nested `inode_path` objects), so they serialize
//! straight onto the REST API without translation layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Indexing status of a resource inside a knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Indexed,
    Failed,
}

/// Whether a storage entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeType {
    File,
    Directory,
}

/// Path wrapper used by the upstream API (`{"inode_path": {"path": "a/b.txt"}}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodePath {
    pub path: String,
}

/// One entry in the storage provider's file tree.
///
/// An immutable snapshot returned per listing call; nothing here is cached
/// across navigation steps except inside the picker's own listing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub resource_id: String,
    pub inode_type: InodeType,
    pub inode_path: InodePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceStatus>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileNode {
    /// Returns the display name: the last segment of the inode path.
    pub fn name(&self) -> &str {
        self.inode_path
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&self.inode_path.path)
    }

    /// True for directory entries.
    pub fn is_directory(&self) -> bool {
        self.inode_type == InodeType::Directory
    }
}

/// A storage-provider connection record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connection_provider: Option<String>,
}

/// The caller's current organization, from `/organizations/me/current`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: String,
}

/// Embedding settings passed through verbatim to the indexing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingParams {
    pub embedding_model: String,
    pub api_key: Option<String>,
}

/// Chunker settings passed through verbatim to the indexing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerParams {
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub chunker: String,
}

/// Full indexing configuration submitted on knowledge-base creation.
///
/// kb-bridge treats these as opaque: they are built from config defaults
/// and relayed, never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingParams {
    pub ocr: bool,
    pub unstructured: bool,
    pub embedding_params: EmbeddingParams,
    pub chunker_params: ChunkerParams,
}

/// A knowledge base as returned by the upstream service.
///
/// List responses omit `indexing_params`, so everything beyond the id is
/// optional here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub knowledge_base_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub connection_source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_params: Option<IndexingParams>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub is_empty: Option<bool>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Envelope returned by the knowledge-base list endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseListing {
    #[serde(default)]
    pub admin: Vec<KnowledgeBase>,
}

/// Result of a sync trigger.
///
/// The upstream trigger endpoint has returned both JSON task envelopes and
/// bare text historically, so the raw body is kept alongside the parsed
/// task handle.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Task handle for the asynchronous indexing run, when the upstream
    /// returned one.
    pub upsert_group_task_id: Option<String>,
    /// The verbatim response body.
    pub raw: String,
}

/// Field to order a file listing by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    ModifiedAt,
}

/// A listing sort order: field plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub ascending: bool,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey {
            field: SortField::Name,
            ascending: true,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self.field {
            SortField::Name => "name",
            SortField::ModifiedAt => "date",
        };
        let dir = if self.ascending { "asc" } else { "desc" };
        write!(f, "{}_{}", field, dir)
    }
}

impl FromStr for SortKey {
    type Err = String;

    /// Parses the wire-style option names: `name_asc`, `name_desc`,
    /// `date_asc`, `date_desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, ascending) = match s {
            "name_asc" => (SortField::Name, true),
            "name_desc" => (SortField::Name, false),
            "date_asc" => (SortField::ModifiedAt, true),
            "date_desc" => (SortField::ModifiedAt, false),
            other => {
                return Err(format!(
                    "unknown sort option '{}' (expected name_asc, name_desc, date_asc, date_desc)",
                    other
                ))
            }
        };
        Ok(SortKey { field, ascending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(path: &str) -> FileNode {
        FileNode {
            resource_id: "r".to_string(),
            inode_type: InodeType::File,
            inode_path: InodePath {
                path: path.to_string(),
            },
            status: None,
            created_at: None,
            updated_at: None,
            size: None,
            mime_type: None,
        }
    }

    #[test]
    fn name_is_last_path_segment() {
        assert_eq!(node("docs/reports/q3.pdf").name(), "q3.pdf");
        assert_eq!(node("top-level.txt").name(), "top-level.txt");
    }

    #[test]
    fn file_node_deserializes_wire_shape() {
        let json = r#"{
            "resource_id": "res-1",
            "inode_type": "directory",
            "inode_path": { "path": "projects/alpha" },
            "status": "indexed",
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-02T11:30:00Z"
        }"#;
        let f: FileNode = serde_json::from_str(json).unwrap();
        assert_eq!(f.resource_id, "res-1");
        assert!(f.is_directory());
        assert_eq!(f.name(), "alpha");
        assert_eq!(f.status, Some(ResourceStatus::Indexed));
    }

    #[test]
    fn kb_listing_tolerates_missing_admin() {
        let listing: KnowledgeBaseListing = serde_json::from_str("{}").unwrap();
        assert!(listing.admin.is_empty());
    }

    #[test]
    fn sort_key_parses_all_wire_options() {
        for opt in ["name_asc", "name_desc", "date_asc", "date_desc"] {
            let key: SortKey = opt.parse().unwrap();
            assert_eq!(key.to_string(), opt);
        }
        assert!("size_asc".parse::<SortKey>().is_err());
    }
}
