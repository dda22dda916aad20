/// A rooted tree node that owns its children.
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub item: T,
    children: Vec<Node<T>>,
}

impl<T> Node<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            children: Vec::new(),
        }
    }

    /// Appends a child and returns a handle to it.
    pub fn add(&mut self, child: Node<T>) -> &mut Node<T> {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn children(&self) -> &[Node<T>] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Depth-first, pre-order search.
    pub fn find_first_match<F>(&self, matcher: F) -> Option<&Node<T>>
    where
        F: Fn(&T) -> bool,
    {
        self.dfs_iter().find(|node| matcher(&node.item))
    }

    /// Items from the root down to (and including) the first match.
    pub fn path_to<F>(&self, matcher: F) -> Option<Vec<&T>>
    where
        F: Fn(&T) -> bool,
    {
        fn walk<'a, T, F: Fn(&T) -> bool>(
            node: &'a Node<T>,
            matcher: &F,
            path: &mut Vec<&'a T>,
        ) -> bool {
            path.push(&node.item);
            if matcher(&node.item) {
                return true;
            }
            for child in &node.children {
                if walk(child, matcher, path) {
                    return true;
                }
            }
            path.pop();
            false
        }

        let mut path = Vec::new();
        if walk(self, &matcher, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    /// Pre-order iterator over this node and all of its descendants.
    pub fn dfs_iter(&self) -> DfsIter<'_, T> {
        DfsIter { stack: vec![self] }
    }

    /// Renders the subtree, one node per line.
    pub fn pformat<F>(&self, stringify: &F, starting_prefix: &str) -> String
    where
        F: Fn(&Node<T>) -> String,
    {
        let mut lines = vec![format!("{}{}", starting_prefix, stringify(self))];
        self.pformat_children(stringify, starting_prefix, &mut lines);
        lines.join("\n")
    }

    fn pformat_children<F>(&self, stringify: &F, prefix: &str, lines: &mut Vec<String>)
    where
        F: Fn(&Node<T>) -> String,
    {
        for (i, child) in self.children.iter().enumerate() {
            lines.push(format!("{}|__{}", prefix, stringify(child)));
            let next = if i + 1 == self.children.len() {
                format!("{}   ", prefix)
            } else {
                format!("{}|  ", prefix)
            };
            child.pformat_children(stringify, &next, lines);
        }
    }
}

pub struct DfsIter<'a, T> {
    stack: Vec<&'a Node<T>>,
}

impl<'a, T> Iterator for DfsIter<'a, T> {
    type Item = &'a Node<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
