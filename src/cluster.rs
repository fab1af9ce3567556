use std::collections::HashSet;

use serde::Serialize;

use crate::graph::SimilarityGraph;

/// 找出图中所有连通分量
///
/// 使用显式栈的深度优先遍历，避免递归过深。遍历顺序是确定的：
/// 起点按下标升序选取，邻居按邻接表中的升序入栈，节点入栈时即标记为已访问，
/// 每个分量内的节点按出栈顺序排列。
pub fn connected_components(graph: &SimilarityGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.len()];
    let mut components = vec![];
    let mut stack = vec![];

    for start in 0..graph.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);

        let mut order = vec![];
        while let Some(node) = stack.pop() {
            order.push(node);
            for &next in &graph.adjacency[node] {
                if !visited[next] {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
        components.push(order);
    }

    components
}

/// 只保留跨越两个及以上案件的连通分量
///
/// NOTE: 相似关系不具有传递性，A~B 且 B~C 时 A 和 C 可能并不相似，
/// 但它们仍然会通过 B 被归到同一个分量中
pub fn cross_case_components(graph: &SimilarityGraph) -> Vec<Vec<usize>> {
    connected_components(graph)
        .into_iter()
        .filter(|component| {
            let cases: HashSet<_> =
                component.iter().map(|&i| graph.nodes[i].case_id.as_str()).collect();
            cases.len() >= 2
        })
        .collect()
}

/// 重复组中的一张图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub image_id: i64,
    pub case_id: String,
    pub file_name: String,
    pub hash: String,
}

/// 一组跨案件重复图片，每个案件只保留一张
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub group_id: u64,
    pub members: Vec<GroupMember>,
}

/// 每个案件只保留分量中最先被发现的那张图片，剩下不少于两张时组成一个重复组
///
/// 组号从 1 开始连续编号
pub fn deduplicate(graph: &SimilarityGraph, components: &[Vec<usize>]) -> Vec<DuplicateGroup> {
    let mut groups = vec![];
    for component in components {
        let mut seen = HashSet::new();
        let members = component
            .iter()
            .map(|&i| &graph.nodes[i])
            .filter(|node| seen.insert(node.case_id.as_str()))
            .map(|node| GroupMember {
                image_id: node.image_id,
                case_id: node.case_id.clone(),
                file_name: node.new_name.clone(),
                hash: node.hash.to_string(),
            })
            .collect::<Vec<_>>();
        if members.len() >= 2 {
            groups.push(DuplicateGroup { group_id: groups.len() as u64 + 1, members });
        }
    }
    groups
}

/// 从相似图得到最终的重复组
pub fn find_groups(graph: &SimilarityGraph) -> Vec<DuplicateGroup> {
    deduplicate(graph, &cross_case_components(graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::node;

    fn build(nodes: Vec<crate::graph::Node>) -> SimilarityGraph {
        SimilarityGraph::build(nodes, 5, |_| {}).unwrap()
    }

    #[test]
    fn test_discovery_order() {
        // 只有 0 - 1, 0 - 2, 2 - 3 三条边
        let graph = build(vec![
            node(10, "A", 0),
            node(11, "B", 0b11111),
            node(12, "C", 0b11111 << 5),
            node(13, "D", 0b11111 << 5 | 0b11111 << 10),
            node(14, "E", u64::MAX),
        ]);
        assert_eq!(graph.edge_count(), 3);
        let components = connected_components(&graph);
        // 邻居升序入栈，所以下标大的先出栈
        assert_eq!(components, vec![vec![0, 2, 3, 1], vec![4]]);
    }

    #[test]
    fn test_single_case_component_dropped() {
        let graph = build(vec![node(1, "A", 0), node(2, "A", 0), node(3, "B", u64::MAX)]);
        assert!(cross_case_components(&graph).is_empty());
        assert!(find_groups(&graph).is_empty());
    }

    #[test]
    fn test_one_member_per_case() {
        // 四张图片互相连通，A 案件只保留先被发现的那张
        let graph = build(vec![
            node(1, "A", 0),
            node(2, "B", 0b1),
            node(3, "A", 0b111),
            node(4, "C", 0b10),
        ]);
        let groups = find_groups(&graph);
        assert_eq!(groups.len(), 1);
        let cases: Vec<_> = groups[0].members.iter().map(|m| m.case_id.as_str()).collect();
        assert_eq!(cases, ["A", "C", "B"]);
        assert_eq!(groups[0].members[0].image_id, 1);
    }

    #[test]
    fn test_group_ids_sequential() {
        let graph = build(vec![
            node(1, "A", 0),
            node(2, "B", 0),
            node(3, "A", u64::MAX),
            node(4, "B", u64::MAX),
            node(5, "C", 0xFFFF_0000_0000_0000),
        ]);
        let groups = find_groups(&graph);
        assert_eq!(groups.iter().map(|g| g.group_id).collect::<Vec<_>>(), [1, 2]);
        for group in &groups {
            let cases: HashSet<_> = group.members.iter().map(|m| &m.case_id).collect();
            assert_eq!(cases.len(), group.members.len());
            assert!(group.members.len() >= 2);
        }
    }
}
