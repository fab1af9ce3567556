use rayon::prelude::*;

use crate::db::ImageRecord;
use crate::hamming::{DHash, HashLengthMismatch, ParseHashError};

/// 图中的一个节点，对应一张已标记的图片
#[derive(Debug, Clone)]
pub struct Node {
    pub image_id: i64,
    pub case_id: String,
    pub new_name: String,
    pub hash: DHash,
}

impl TryFrom<ImageRecord> for Node {
    type Error = ParseHashError;

    fn try_from(record: ImageRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: record.hash()?,
            image_id: record.id,
            case_id: record.case_id,
            new_name: record.new_name,
        })
    }
}

/// 跨案件相似图
///
/// 节点按传入顺序编号，邻接表保存节点下标，且每个邻接表都按下标升序排列。
#[derive(Debug, Clone)]
pub struct SimilarityGraph {
    pub nodes: Vec<Node>,
    pub adjacency: Vec<Vec<usize>>,
}

/// `n` 个节点两两比较的总次数
pub fn comparison_count(n: usize) -> u64 {
    let n = n as u64;
    n * n.saturating_sub(1) / 2
}

impl SimilarityGraph {
    /// 两两比较所有节点，汉明距离不超过 `threshold` 且案件编号不同的节点之间连一条边
    ///
    /// 每行比较完成后以该行的比较次数调用一次 `on_row`，调用可能来自多个线程。
    pub fn build<F>(nodes: Vec<Node>, threshold: u32, on_row: F) -> Result<Self, HashLengthMismatch>
    where
        F: Fn(u64) + Sync,
    {
        let n = nodes.len();
        let forward = (0..n)
            .into_par_iter()
            .map(|i| -> Result<Vec<usize>, HashLengthMismatch> {
                let a = &nodes[i];
                let mut neighbors = vec![];
                for (j, b) in nodes.iter().enumerate().skip(i + 1) {
                    if a.case_id != b.case_id && a.hash.hamming(&b.hash)? <= threshold {
                        neighbors.push(j);
                    }
                }
                on_row((n - 1 - i) as u64);
                Ok(neighbors)
            })
            .collect::<Result<Vec<_>, _>>()?;

        // 按 i 升序合并，保证每个邻接表都是升序的
        let mut adjacency = vec![vec![]; n];
        for (i, neighbors) in forward.into_iter().enumerate() {
            for j in neighbors {
                adjacency[i].push(j);
                adjacency[j].push(i);
            }
        }

        Ok(Self { nodes, adjacency })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.adjacency[a].binary_search(&b).is_ok()
    }
}
