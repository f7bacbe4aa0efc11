//! Doc store, index store and their on-disk persistence

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use kbqa_core::{Error, Result, TextNode};

use crate::vector_store::SimpleVectorStore;

pub const DOCSTORE_FILE: &str = "docstore.json";
pub const INDEX_STORE_FILE: &str = "index_store.json";
pub const VECTOR_STORE_FILE: &str = "default__vector_store.json";

/// What the doc store knows about a source document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefDocInfo {
    pub node_ids: Vec<String>,
    pub doc_hash: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Node text and source-document bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocStore {
    nodes: BTreeMap<String, TextNode>,
    ref_doc_info: BTreeMap<String, RefDocInfo>,
}

impl DocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store nodes and record them under their source documents
    pub fn add_nodes(&mut self, nodes: &[TextNode]) {
        for node in nodes {
            if let Some(doc_id) = &node.ref_doc_id {
                let info = self.ref_doc_info.entry(doc_id.clone()).or_default();
                if !info.node_ids.contains(&node.id) {
                    info.node_ids.push(node.id.clone());
                }
                if info.metadata.is_empty() {
                    info.metadata = node.metadata.clone();
                }
            }
            self.nodes.insert(node.id.clone(), node.clone());
        }
    }

    /// Record the content hash of a source document
    pub fn set_document_hash(&mut self, doc_id: &str, hash: &str) {
        self.ref_doc_info.entry(doc_id.to_string()).or_default().doc_hash = hash.to_string();
    }

    pub fn document_hash(&self, doc_id: &str) -> Option<&str> {
        self.ref_doc_info.get(doc_id).map(|info| info.doc_hash.as_str())
    }

    pub fn get_node(&self, node_id: &str) -> Option<&TextNode> {
        self.nodes.get(node_id)
    }

    /// Fetch nodes by id, failing on the first unknown id
    pub fn get_nodes(&self, node_ids: &[String]) -> Result<Vec<TextNode>> {
        node_ids
            .iter()
            .map(|id| {
                self.nodes
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::Storage(format!("Node {} not found in doc store", id)))
            })
            .collect()
    }

    pub fn ref_doc_info(&self, doc_id: &str) -> Option<&RefDocInfo> {
        self.ref_doc_info.get(doc_id)
    }

    pub fn ref_doc_ids(&self) -> impl Iterator<Item = &String> {
        self.ref_doc_info.keys()
    }

    /// Remove a source document and its nodes, returning the removed node ids
    pub fn delete_ref_doc(&mut self, doc_id: &str) -> Vec<String> {
        let Some(info) = self.ref_doc_info.remove(doc_id) else {
            return Vec::new();
        };
        for node_id in &info.node_ids {
            self.nodes.remove(node_id);
        }
        info.node_ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Persistent description of one vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStruct {
    pub index_id: String,
    pub node_ids: Vec<String>,
    pub embed_model: String,
    pub dimensions: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl IndexStruct {
    pub fn new(index_id: impl Into<String>, embed_model: impl Into<String>) -> Self {
        Self {
            index_id: index_id.into(),
            node_ids: Vec::new(),
            embed_model: embed_model.into(),
            dimensions: None,
            created_at: Utc::now(),
        }
    }
}

/// All index structs sharing a storage directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStore {
    indexes: BTreeMap<String, IndexStruct>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, index_struct: IndexStruct) {
        self.indexes.insert(index_struct.index_id.clone(), index_struct);
    }

    pub fn get(&self, index_id: &str) -> Option<&IndexStruct> {
        self.indexes.get(index_id)
    }

    pub fn get_mut(&mut self, index_id: &str) -> Option<&mut IndexStruct> {
        self.indexes.get_mut(index_id)
    }

    /// Resolve an index: by id when given, otherwise the only one stored
    pub fn resolve(&self, index_id: Option<&str>) -> Result<&IndexStruct> {
        match index_id {
            Some(id) => self
                .get(id)
                .ok_or_else(|| Error::Storage(format!("Index {} not found in index store", id))),
            None => {
                let mut all = self.indexes.values();
                match (all.next(), all.next()) {
                    (Some(only), None) => Ok(only),
                    (None, _) => Err(Error::Storage("Index store is empty".to_string())),
                    (Some(_), Some(_)) => Err(Error::Storage(
                        "Index store holds several indexes; specify an index id".to_string(),
                    )),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

/// The three stores an index needs, persisted together in one directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageContext {
    pub docstore: DocStore,
    pub index_store: IndexStore,
    pub vector_store: SimpleVectorStore,
}

impl StorageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every store as JSON under `persist_dir`, creating it if needed
    pub fn persist(&self, persist_dir: impl AsRef<Path>) -> Result<()> {
        let dir = persist_dir.as_ref();
        fs::create_dir_all(dir)?;

        write_json(&dir.join(DOCSTORE_FILE), &self.docstore)?;
        write_json(&dir.join(INDEX_STORE_FILE), &self.index_store)?;
        write_json(&dir.join(VECTOR_STORE_FILE), &self.vector_store)?;

        tracing::info!(
            "Persisted {} nodes to {}",
            self.docstore.node_count(),
            dir.display()
        );
        Ok(())
    }

    /// Load every store from `persist_dir`
    pub fn from_persist_dir(persist_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = persist_dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Storage(format!(
                "Persist directory {} does not exist",
                dir.display()
            )));
        }

        Ok(Self {
            docstore: read_json(&dir.join(DOCSTORE_FILE))?,
            index_store: read_json(&dir.join(INDEX_STORE_FILE))?,
            vector_store: read_json(&dir.join(VECTOR_STORE_FILE))?,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(Error::Storage(format!("Missing storage file {}", path.display())));
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Serialization(format!("{}: {}", path.display(), e)))
}
