//! Tool store (§4.6 "Store"): relational storage of tools with JSON fields,
//! plus a brute-force cosine vector search over embeddings serialized as
//! little-endian float32 arrays. `redb` gives us a single-writer embedded
//! table store without pulling in a server process.

use crate::mcp::tool::MCPTool;
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

const TOOLS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mcp_tools");
const EMBEDDINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mcp_tool_embeddings");

pub fn embedding_to_le_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

pub fn embedding_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub trait ToolStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<MCPTool>>;
    fn upsert(&self, tool: &MCPTool) -> Result<()>;
    /// Brute-force cosine vector search returning `(toolId, similarity)`
    /// sorted descending, since no ANN index is maintained.
    fn vector_search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<(String, f32)>>;
}

pub struct RedbToolStore {
    db: Database,
}

impl RedbToolStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).with_context(|| format!("opening tool store at {path:?}"))?;
        let write = db.begin_write()?;
        {
            write.open_table(TOOLS_TABLE)?;
            write.open_table(EMBEDDINGS_TABLE)?;
        }
        write.commit()?;
        Ok(Self { db })
    }
}

impl ToolStore for RedbToolStore {
    fn load_all(&self) -> Result<Vec<MCPTool>> {
        let read = self.db.begin_read()?;
        let tools_table = read.open_table(TOOLS_TABLE)?;
        let embeddings_table = read.open_table(EMBEDDINGS_TABLE)?;

        let mut out = Vec::new();
        for entry in tools_table.iter()? {
            let (key, value) = entry?;
            let mut tool: MCPTool = serde_json::from_slice(value.value())?;
            if let Some(embedding_bytes) = embeddings_table.get(key.value())? {
                tool.embedding = Some(embedding_from_le_bytes(embedding_bytes.value()));
            }
            out.push(tool);
        }
        Ok(out)
    }

    fn upsert(&self, tool: &MCPTool) -> Result<()> {
        let write = self.db.begin_write()?;
        {
            let mut tools_table = write.open_table(TOOLS_TABLE)?;
            let payload = serde_json::to_vec(tool)?;
            tools_table.insert(tool.id.as_str(), payload.as_slice())?;

            if let Some(embedding) = &tool.embedding {
                let mut embeddings_table = write.open_table(EMBEDDINGS_TABLE)?;
                let bytes = embedding_to_le_bytes(embedding);
                embeddings_table.insert(tool.id.as_str(), bytes.as_slice())?;
            }
        }
        write.commit()?;
        Ok(())
    }

    fn vector_search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<(String, f32)>> {
        let read = self.db.begin_read()?;
        let embeddings_table = read.open_table(EMBEDDINGS_TABLE)?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for entry in embeddings_table.iter()? {
            let (key, value) = entry?;
            let embedding = embedding_from_le_bytes(value.value());
            let sim = cosine_similarity(query_embedding, &embedding);
            scored.push((key.value().to_string(), sim));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tool(id: &str, embedding: Vec<f32>) -> MCPTool {
        MCPTool {
            id: id.to_string(),
            server: "local".to_string(),
            name: id.to_string(),
            description: format!("{id} description"),
            capabilities: vec![],
            categories: vec![],
            domains: vec![],
            shard_affinities: HashMap::new(),
            json_schema: None,
            embedding: Some(embedding),
        }
    }

    #[test]
    fn upsert_then_load_round_trips_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbToolStore::open(&dir.path().join("tools.redb")).unwrap();
        store.upsert(&tool("fs/read", vec![1.0, 0.0, 0.0])).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].embedding.as_deref(), Some([1.0f32, 0.0, 0.0].as_slice()));
    }

    #[test]
    fn vector_search_ranks_by_cosine_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbToolStore::open(&dir.path().join("tools.redb")).unwrap();
        store.upsert(&tool("aligned", vec![1.0, 0.0])).unwrap();
        store.upsert(&tool("orthogonal", vec![0.0, 1.0])).unwrap();

        let results = store.vector_search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].0, "aligned");
        assert!(results[0].1 > results[1].1);
    }
}
