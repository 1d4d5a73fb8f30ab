//! Hierarchical grant strings stored in a prefix trie.
//!
//! A grant is a `:`-separated list of levels; each level may list
//! alternatives separated by `,`. `repo:read,write` therefore stores both
//! `repo:read` and `repo:write`. The `*` segment matches any single level,
//! and a stored grant covers everything below it (`repo` covers
//! `repo:read:issues`).

use std::collections::HashMap;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default)]
struct Node {
    children: HashMap<String, Node>,
    terminal: bool,
}

/// Prefix trie of granted permissions.
#[derive(Debug, Clone, Default)]
pub struct GrantTrie {
    root: Node,
}

impl GrantTrie {
    /// Build a trie from grant strings. Empty grants are ignored.
    pub fn new<S: AsRef<str>>(grants: &[S]) -> Self {
        let mut trie = Self::default();
        for grant in grants {
            trie.insert(grant.as_ref());
        }
        trie
    }

    /// Add a single grant string.
    pub fn insert(&mut self, grant: &str) {
        let levels = parse_levels(grant);
        if levels.is_empty() {
            return;
        }

        let mut frontier: Vec<&mut Node> = vec![&mut self.root];
        for alternatives in &levels {
            let mut next = Vec::new();
            for node in frontier {
                for key in alternatives {
                    node.children.entry(key.clone()).or_default();
                }
                next.extend(
                    node.children
                        .iter_mut()
                        .filter(|(k, _)| alternatives.contains(*k))
                        .map(|(_, child)| child),
                );
            }
            frontier = next;
        }

        for node in frontier {
            node.terminal = true;
        }
    }

    /// Whether a single permission string (commas expanded) is covered.
    pub fn check(&self, permission: &str) -> bool {
        let levels = parse_levels(permission);
        if levels.is_empty() {
            return false;
        }
        expand(&levels)
            .iter()
            .all(|path| covers(&self.root, path, true))
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}

/// True if every required permission is covered by the trie.
pub fn check_grants<S: AsRef<str>>(trie: &GrantTrie, required: &[S]) -> bool {
    required.iter().all(|r| trie.check(r.as_ref()))
}

fn parse_levels(grant: &str) -> Vec<Vec<String>> {
    let trimmed = grant.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let levels: Vec<Vec<String>> = trimmed
        .split(':')
        .map(|level| {
            level
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();

    // An empty level would silently widen the grant; reject the whole string.
    if levels.iter().any(Vec::is_empty) {
        return Vec::new();
    }
    levels
}

fn expand(levels: &[Vec<String>]) -> Vec<Vec<&str>> {
    let mut paths: Vec<Vec<&str>> = vec![Vec::new()];
    for alternatives in levels {
        paths = paths
            .into_iter()
            .flat_map(|prefix| {
                alternatives.iter().map(move |alt| {
                    let mut path = prefix.clone();
                    path.push(alt.as_str());
                    path
                })
            })
            .collect();
    }
    paths
}

fn covers(node: &Node, path: &[&str], is_root: bool) -> bool {
    if node.terminal && !is_root {
        return true;
    }

    match path.split_first() {
        None => node
            .children
            .get(WILDCARD)
            .is_some_and(|child| child.terminal),
        Some((head, rest)) => {
            let exact = node
                .children
                .get(*head)
                .is_some_and(|child| covers(child, rest, false));
            exact
                || node
                    .children
                    .get(WILDCARD)
                    .is_some_and(|child| covers(child, rest, false))
        }
    }
}
