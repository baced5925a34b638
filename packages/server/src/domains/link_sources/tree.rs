//! Domain tree: pages from several link sources folded into one hierarchy
//! keyed by URL path.
//!
//! Recomputed from scratch on every read. When two sources hold a page at the
//! same path, the source listed first keeps it.

use serde::Serialize;
use std::collections::HashMap;
use url::Url;

use super::models::{Knowledge, LinkSource};
use crate::common::{KnowledgeId, LinkSourceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainTreeNode {
    pub path: String,
    pub url: String,
    pub title: Option<String>,
    pub knowledge_id: KnowledgeId,
    pub link_source_id: LinkSourceId,
    pub size_bytes: i64,
    pub is_included: bool,
    pub children: Vec<DomainTreeNode>,
}

/// Tree key for a URL: its path without a trailing slash, `/` for the root.
/// Query and fragment are ignored.
pub fn url_path(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let trimmed = url.path().trim_end_matches('/');
    Some(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

fn segment_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Ancestor paths, nearest first: `/a/b/c` -> `/a/b`, `/a`, `/`.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = path;
    std::iter::from_fn(move || {
        if current == "/" {
            return None;
        }
        current = match current.rfind('/') {
            Some(0) | None => "/",
            Some(i) => &current[..i],
        };
        Some(current)
    })
}

struct FlatNode<'a> {
    path: String,
    page: &'a Knowledge,
    parent: Option<usize>,
}

pub fn build_domain_tree(sources: &[LinkSource], pages: &[Knowledge]) -> Vec<DomainTreeNode> {
    let source_rank: HashMap<LinkSourceId, usize> = sources
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id, i))
        .collect();

    // (depth, source rank, original index) keeps the fold deterministic.
    let mut candidates: Vec<(usize, usize, usize, String, &Knowledge)> = pages
        .iter()
        .enumerate()
        .filter_map(|(i, page)| {
            let rank = *source_rank.get(&page.link_source_id)?;
            let path = url_path(&page.source_url)?;
            Some((segment_depth(&path), rank, i, path, page))
        })
        .collect();
    candidates.sort_by_key(|(depth, rank, i, _, _)| (*depth, *rank, *i));

    let mut nodes: Vec<FlatNode> = Vec::with_capacity(candidates.len());
    let mut by_path: HashMap<String, usize> = HashMap::new();

    for (_, _, _, path, page) in candidates {
        if by_path.contains_key(&path) {
            continue;
        }
        let parent = ancestors(&path).find_map(|a| by_path.get(a).copied());
        by_path.insert(path.clone(), nodes.len());
        nodes.push(FlatNode { path, page, parent });
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        match node.parent {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }

    assemble(&roots, &nodes, &children)
}

fn assemble(ids: &[usize], nodes: &[FlatNode], children: &[Vec<usize>]) -> Vec<DomainTreeNode> {
    let mut out: Vec<DomainTreeNode> = ids
        .iter()
        .map(|&i| {
            let node = &nodes[i];
            DomainTreeNode {
                path: node.path.clone(),
                url: node.page.source_url.clone(),
                title: node.page.source_title.clone(),
                knowledge_id: node.page.id,
                link_source_id: node.page.link_source_id,
                size_bytes: node.page.size_bytes,
                is_included: node.page.is_included,
                children: assemble(&children[i], nodes, children),
            }
        })
        .collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}
