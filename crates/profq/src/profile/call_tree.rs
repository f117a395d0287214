use super::Profile;
use std::collections::HashMap;

/// Per-node numbers exposed to the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct CallNodeData {
    pub total: f64,
    pub self_time: f64,
    /// `total` divided by the tree's grand total.
    pub total_relative: f64,
    pub self_relative: f64,
    pub name: String,
    pub library: Option<String>,
    pub func_index: usize,
}

/// Read-only access to a call tree, regular or inverted.
pub trait CallTreeSource {
    /// Roots ordered by descending total.
    fn roots(&self) -> Vec<usize>;
    /// Children ordered by descending total.
    fn children(&self, node: usize) -> Vec<usize>;
    fn node_data(&self, node: usize) -> CallNodeData;
    /// Sum of sample weights over the whole tree.
    fn grand_total(&self) -> f64;
}

#[derive(Debug, Clone)]
struct CallNode {
    func: usize,
    total: f64,
    self_time: f64,
    children: Vec<usize>,
}

/// Arena call tree built from a set of sampled stacks.
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallNode>,
    roots: Vec<usize>,
    total: f64,
    inverted: bool,
    names: Vec<String>,
    libraries: Vec<Option<String>>,
}

impl CallTree {
    /// Build from `(stack, weight)` pairs. Regular trees record self time on
    /// the leaf node, inverted trees on the root (the sampled leaf function).
    pub fn build<I>(profile: &Profile, samples: I, inverted: bool) -> Self
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut nodes: Vec<CallNode> = Vec::new();
        let mut roots = Vec::new();
        let mut index: HashMap<(Option<usize>, usize), usize> = HashMap::new();
        let mut total = 0.0;

        for (stack, weight) in samples {
            let mut funcs = profile.stack_funcs(stack);
            if funcs.is_empty() {
                continue;
            }
            if !inverted {
                funcs.reverse();
            }
            total += weight;

            let mut parent: Option<usize> = None;
            let last = funcs.len() - 1;
            for (depth, func) in funcs.into_iter().enumerate() {
                let node = *index.entry((parent, func)).or_insert_with(|| {
                    nodes.push(CallNode {
                        func,
                        total: 0.0,
                        self_time: 0.0,
                        children: Vec::new(),
                    });
                    let id = nodes.len() - 1;
                    match parent {
                        Some(p) => nodes[p].children.push(id),
                        None => roots.push(id),
                    }
                    id
                });
                nodes[node].total += weight;
                let is_self = if inverted { depth == 0 } else { depth == last };
                if is_self {
                    nodes[node].self_time += weight;
                }
                parent = Some(node);
            }
        }

        let by_total = |nodes: &[CallNode], list: &mut Vec<usize>| {
            list.sort_by(|&a, &b| {
                nodes[b]
                    .total
                    .total_cmp(&nodes[a].total)
                    .then(nodes[a].func.cmp(&nodes[b].func))
            });
        };
        by_total(&nodes, &mut roots);
        for i in 0..nodes.len() {
            let mut children = std::mem::take(&mut nodes[i].children);
            by_total(&nodes, &mut children);
            nodes[i].children = children;
        }

        let names = profile.funcs.iter().map(|f| f.name.clone()).collect();
        let libraries = (0..profile.funcs.len())
            .map(|f| profile.func_lib(f).map(|lib| lib.name.clone()))
            .collect();

        CallTree {
            nodes,
            roots,
            total,
            inverted,
            names,
            libraries,
        }
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn func(&self, node: usize) -> usize {
        self.nodes[node].func
    }

    /// Follow the heaviest child from the heaviest root.
    pub fn heaviest_path(&self) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = self.roots.first().copied();
        while let Some(node) = current {
            path.push(node);
            current = self.nodes[node].children.first().copied();
        }
        path
    }
}

impl CallTreeSource for CallTree {
    fn roots(&self) -> Vec<usize> {
        self.roots.clone()
    }

    fn children(&self, node: usize) -> Vec<usize> {
        self.nodes[node].children.clone()
    }

    fn node_data(&self, node: usize) -> CallNodeData {
        let n = &self.nodes[node];
        let relative = |v: f64| if self.total > 0.0 { v / self.total } else { 0.0 };
        CallNodeData {
            total: n.total,
            self_time: n.self_time,
            total_relative: relative(n.total),
            self_relative: relative(n.self_time),
            name: self
                .names
                .get(n.func)
                .cloned()
                .unwrap_or_else(|| "<unknown>".to_string()),
            library: self.libraries.get(n.func).cloned().flatten(),
            func_index: n.func,
        }
    }

    fn grand_total(&self) -> f64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::fixtures::sample_profile;

    fn main_thread_tree(inverted: bool) -> CallTree {
        let profile = sample_profile();
        let samples: Vec<(usize, f64)> = profile.threads[0]
            .samples
            .stack
            .iter()
            .flatten()
            .map(|&s| (s, 1.0))
            .collect();
        CallTree::build(&profile, samples, inverted)
    }

    #[test]
    fn test_regular_tree_totals() {
        let tree = main_thread_tree(false);
        assert_eq!(tree.grand_total(), 9.0);
        let roots = tree.roots();
        assert_eq!(roots.len(), 1);
        let main = tree.node_data(roots[0]);
        assert_eq!(main.name, "main");
        assert_eq!(main.total, 9.0);
        assert_eq!(main.self_time, 1.0);

        // layout (5 samples) sorts before parse (3 samples)
        let children = tree.children(roots[0]);
        assert_eq!(tree.node_data(children[0]).name, "layout");
        assert_eq!(tree.node_data(children[0]).total, 5.0);
        assert_eq!(tree.node_data(children[1]).name, "parse");
        assert_eq!(tree.node_data(children[1]).total, 3.0);
    }

    #[test]
    fn test_inverted_tree_roots_are_leaf_functions() {
        let tree = main_thread_tree(true);
        let roots = tree.roots();
        let paint = tree.node_data(roots[0]);
        assert_eq!(paint.name, "paint");
        assert_eq!(paint.total, 4.0);
        assert_eq!(paint.self_time, 4.0);
        let callers = tree.children(roots[0]);
        let layout = tree.node_data(callers[0]);
        assert_eq!(layout.name, "layout");
        assert_eq!(layout.self_time, 0.0);
    }

    #[test]
    fn test_heaviest_path() {
        let tree = main_thread_tree(false);
        let names: Vec<String> = tree
            .heaviest_path()
            .into_iter()
            .map(|n| tree.node_data(n).name)
            .collect();
        assert_eq!(names, vec!["main", "layout", "paint"]);
    }
}
