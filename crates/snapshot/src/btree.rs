//! Persistent B-trees over blob storage.
//!
//! Nodes are immutable blobs (`btree-node`), built bottom-up from the full
//! sorted key set and referenced by MAC; a small descriptor blob
//! (`vfs-btree`) names the root. Directories reference children by MAC, so
//! the structure is acyclic by construction.

use crate::error::Result;
use crate::put::put_blob_if_new;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use silo_core::{Mac, ResourceKind};
use silo_repository::{Packer, Repository};
use std::collections::BTreeMap;

/// Keys per node.
const TREE_ORDER: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Node {
    leaf: bool,
    /// For leaves: the keys themselves. For internal nodes: the largest key
    /// reachable through the child at the same position.
    keys: Vec<String>,
    /// Leaf payloads; empty on internal nodes.
    values: Vec<Mac>,
    /// Child node MACs; empty on leaves.
    children: Vec<Mac>,
}

impl Node {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Into::into)
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// The root pointer stored as a `vfs-btree` blob.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TreeDescriptor {
    pub root: Option<Mac>,
    pub count: u64,
}

impl TreeDescriptor {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Build a tree from sorted pairs, emitting node blobs through the packer,
/// then emit the descriptor blob and return its MAC.
pub async fn build_tree(
    repository: &Repository,
    packer: &Packer,
    pairs: &BTreeMap<String, Mac>,
) -> Result<Mac> {
    let descriptor = if pairs.is_empty() {
        TreeDescriptor {
            root: None,
            count: 0,
        }
    } else {
        let mut level: Vec<(String, Mac)> = Vec::new();

        // Leaves: runs of TREE_ORDER sorted pairs.
        let entries: Vec<(&String, &Mac)> = pairs.iter().collect();
        for group in entries.chunks(TREE_ORDER) {
            let node = Node {
                leaf: true,
                keys: group.iter().map(|(k, _)| (*k).clone()).collect(),
                values: group.iter().map(|(_, v)| **v).collect(),
                children: Vec::new(),
            };
            let high_key = node.keys.last().expect("non-empty group").clone();
            let mac = emit_node(repository, packer, &node).await?;
            level.push((high_key, mac));
        }

        // Internal levels until one root remains.
        while level.len() > 1 {
            let mut next = Vec::new();
            for group in level.chunks(TREE_ORDER) {
                let node = Node {
                    leaf: false,
                    keys: group.iter().map(|(k, _)| k.clone()).collect(),
                    values: Vec::new(),
                    children: group.iter().map(|(_, m)| *m).collect(),
                };
                let high_key = node.keys.last().expect("non-empty group").clone();
                let mac = emit_node(repository, packer, &node).await?;
                next.push((high_key, mac));
            }
            level = next;
        }

        TreeDescriptor {
            root: Some(level[0].1),
            count: pairs.len() as u64,
        }
    };

    let bytes = descriptor.to_bytes()?;
    let mac = repository.compute_mac(&bytes);
    put_blob_if_new(
        repository,
        packer,
        ResourceKind::VfsBtree,
        mac,
        Bytes::from(bytes),
    )
    .await?;
    Ok(mac)
}

async fn emit_node(repository: &Repository, packer: &Packer, node: &Node) -> Result<Mac> {
    let bytes = node.to_bytes()?;
    let mac = repository.compute_mac(&bytes);
    put_blob_if_new(
        repository,
        packer,
        ResourceKind::BtreeNode,
        mac,
        Bytes::from(bytes),
    )
    .await?;
    Ok(mac)
}

/// Read-side handle over a stored tree.
pub struct Tree<'a> {
    repository: &'a Repository,
    descriptor: TreeDescriptor,
}

impl<'a> Tree<'a> {
    /// Open a tree by its descriptor blob MAC.
    pub async fn open(repository: &'a Repository, mac: Mac) -> Result<Self> {
        let bytes = repository.get_blob(ResourceKind::VfsBtree, mac).await?;
        Ok(Self {
            repository,
            descriptor: TreeDescriptor::from_bytes(&bytes)?,
        })
    }

    pub fn len(&self) -> u64 {
        self.descriptor.count
    }

    pub fn is_empty(&self) -> bool {
        self.descriptor.count == 0
    }

    async fn load_node(&self, mac: Mac) -> Result<Node> {
        let bytes = self
            .repository
            .get_blob(ResourceKind::BtreeNode, mac)
            .await?;
        Node::from_bytes(&bytes)
    }

    /// Point lookup by exact key.
    pub async fn get(&self, key: &str) -> Result<Option<Mac>> {
        let Some(root) = self.descriptor.root else {
            return Ok(None);
        };
        let mut node = self.load_node(root).await?;
        loop {
            if node.leaf {
                return Ok(match node.keys.binary_search_by(|k| k.as_str().cmp(key)) {
                    Ok(at) => Some(node.values[at]),
                    Err(_) => None,
                });
            }
            // First child whose high key is >= the target covers it.
            let at = node.keys.partition_point(|k| k.as_str() < key);
            if at == node.children.len() {
                return Ok(None);
            }
            node = self.load_node(node.children[at]).await?;
        }
    }

    /// All pairs in key order.
    pub async fn entries(&self) -> Result<Vec<(String, Mac)>> {
        let mut out = Vec::with_capacity(self.descriptor.count as usize);
        let Some(root) = self.descriptor.root else {
            return Ok(out);
        };

        let mut stack = vec![root];
        while let Some(mac) = stack.pop() {
            let node = self.load_node(mac).await?;
            if node.leaf {
                out.extend(node.keys.into_iter().zip(node.values));
            } else {
                // Reverse push keeps in-order traversal with a LIFO stack.
                for child in node.children.into_iter().rev() {
                    stack.push(child);
                }
            }
        }
        Ok(out)
    }

    /// Every node MAC in the tree, root first. Used by check and GC walks.
    pub async fn node_macs(&self) -> Result<Vec<Mac>> {
        let mut out = Vec::new();
        let Some(root) = self.descriptor.root else {
            return Ok(out);
        };
        let mut stack = vec![root];
        while let Some(mac) = stack.pop() {
            out.push(mac);
            let node = self.load_node(mac).await?;
            if !node.leaf {
                stack.extend(node.children);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::RepositoryConfig;
    use silo_repository::CacheManager;
    use silo_storage::{MemoryStore, Store};
    use std::sync::Arc;
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn test_repo() -> (Arc<Repository>, tempfile::TempDir) {
        let store: Arc<dyn Store> =
            Arc::new(MemoryStore::new(format!("memory://{}", Uuid::new_v4())));
        let config = RepositoryConfig::new(Uuid::new_v4(), OffsetDateTime::now_utc());
        Repository::create(&store, config, None).await.unwrap();

        let cache = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(cache.path());
        let repo = Arc::new(Repository::open(store, &manager, None).await.unwrap());
        (repo, cache)
    }

    fn mac(seed: u32) -> Mac {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&seed.to_le_bytes());
        Mac::from_bytes(bytes)
    }

    async fn build(repo: &Arc<Repository>, pairs: &BTreeMap<String, Mac>) -> Mac {
        let packer = repo.start_packer();
        let root = build_tree(repo, &packer, pairs).await.unwrap();
        let delta = packer.wait().await.unwrap();
        repo.commit_delta(delta).await.unwrap();
        root
    }

    #[tokio::test]
    async fn empty_tree() {
        let (repo, _cache) = test_repo().await;
        let root = build(&repo, &BTreeMap::new()).await;
        let tree = Tree::open(&repo, root).await.unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.get("/x").await.unwrap(), None);
        assert!(tree.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn multi_level_lookup_and_iteration() {
        let (repo, _cache) = test_repo().await;

        // Enough keys to force several levels at order 64.
        let pairs: BTreeMap<String, Mac> = (0..5000u32)
            .map(|i| (format!("/dir/file-{i:06}"), mac(i)))
            .collect();
        let root = build(&repo, &pairs).await;
        let tree = Tree::open(&repo, root).await.unwrap();
        assert_eq!(tree.len(), 5000);

        assert_eq!(
            tree.get("/dir/file-000000").await.unwrap(),
            Some(mac(0))
        );
        assert_eq!(
            tree.get("/dir/file-004999").await.unwrap(),
            Some(mac(4999))
        );
        assert_eq!(
            tree.get("/dir/file-002500").await.unwrap(),
            Some(mac(2500))
        );
        assert_eq!(tree.get("/dir/file-005000").await.unwrap(), None);
        assert_eq!(tree.get("/absent").await.unwrap(), None);

        let entries = tree.entries().await.unwrap();
        assert_eq!(entries.len(), 5000);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(entries[0].0, "/dir/file-000000");

        assert!(tree.node_macs().await.unwrap().len() > 64);
    }

    #[tokio::test]
    async fn identical_trees_share_nodes() {
        let (repo, _cache) = test_repo().await;
        let pairs: BTreeMap<String, Mac> =
            (0..100u32).map(|i| (format!("/f{i:03}"), mac(i))).collect();

        let root_a = build(&repo, &pairs).await;
        let root_b = build(&repo, &pairs).await;
        // Same content, same nodes, same descriptor.
        assert_eq!(root_a, root_b);
    }
}
