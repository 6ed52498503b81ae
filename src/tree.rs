//! In-memory directory tree: the authoritative name → head index.
//!
//! Parents own their children and nothing points back up, so the parent of
//! a path is found by walking from the root again.

use crate::path::display;
use crate::{Error, FileHead, Result};

#[derive(Debug)]
pub struct Node {
    head: FileHead,
    /// `None` for regular files.
    children: Option<Vec<Node>>,
}

impl Node {
    pub fn new(head: FileHead) -> Self {
        let children = head.is_directory().then(Vec::new);
        Self { head, children }
    }

    pub fn head(&self) -> &FileHead {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut FileHead {
        &mut self.head
    }

    pub fn is_directory(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> &[Node] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children().iter().map(|c| c.head.name.clone()).collect()
    }

    /// Primary addresses of the children, which is what the directory stores on disk.
    pub fn child_addresses(&self) -> Vec<u32> {
        self.children().iter().map(|c| c.head.address).collect()
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.head.name == name)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.as_mut()?.iter_mut().find(|c| c.head.name == name)
    }

    /// Appends a child. Fails on a plain file or if the name is taken.
    pub fn add_child(&mut self, node: Node) -> bool {
        let Some(children) = self.children.as_mut() else {
            return false;
        };
        if children.iter().any(|c| c.head.name == node.head.name) {
            return false;
        }
        children.push(node);
        true
    }
}

#[derive(Debug)]
pub struct Tree {
    root: Node,
}

impl Tree {
    pub fn new(root: FileHead) -> Self {
        Self::from_root(Node::new(root))
    }

    /// Wraps an already-built root node, as recovery produces it.
    pub fn from_root(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Option<&Node> {
        let mut current = &self.root;
        for name in path {
            current = current.child(name.as_ref())?;
        }
        Some(current)
    }

    pub fn resolve_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Node> {
        let mut current = &mut self.root;
        for name in path {
            current = current.child_mut(name.as_ref())?;
        }
        Some(current)
    }

    /// The node that would hold `path`. `None` for the root, which has no parent.
    pub fn resolve_parent<S: AsRef<str>>(&self, path: &[S]) -> Option<&Node> {
        let (_, parent) = path.split_last()?;
        self.resolve(parent)
    }

    pub fn resolve_parent_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Node> {
        let (_, parent) = path.split_last()?;
        self.resolve_mut(parent)
    }

    pub fn exists<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.resolve(path).is_some()
    }

    /// Inserts `head` at `path`. False if the parent is missing, is not a
    /// directory, or already has a child by that name.
    pub fn insert<S: AsRef<str>>(&mut self, path: &[S], head: FileHead) -> bool {
        match self.resolve_parent_mut(path) {
            Some(parent) => parent.add_child(Node::new(head)),
            None => false,
        }
    }

    /// Detaches the node at `path` and returns its head. Directories must be empty.
    pub fn remove<S: AsRef<str>>(&mut self, path: &[S]) -> Result<FileHead> {
        self.detach(path).map(|(_, head)| head)
    }

    /// Like `remove`, also returning the node's position among its siblings
    /// so `reattach` can put it back in the same place.
    pub fn detach<S: AsRef<str>>(&mut self, path: &[S]) -> Result<(usize, FileHead)> {
        let Some((name, _)) = path.split_last() else {
            return Err(Error::InvalidArgument("the root directory cannot be removed".into()));
        };
        let not_found = || Error::NotFound(display(path));
        let children = self
            .resolve_parent_mut(path)
            .and_then(|parent| parent.children.as_mut())
            .ok_or_else(not_found)?;
        let index = children
            .iter()
            .position(|c| c.head.name == name.as_ref())
            .ok_or_else(not_found)?;
        if !children[index].children().is_empty() {
            return Err(Error::DirectoryNotEmpty(display(path)));
        }
        Ok((index, children.remove(index).head))
    }

    /// Inserts `head` at `path` at sibling position `index` (clamped to the end).
    /// False under the same conditions as `insert`.
    pub fn reattach<S: AsRef<str>>(&mut self, path: &[S], index: usize, head: FileHead) -> bool {
        let Some(children) = self
            .resolve_parent_mut(path)
            .and_then(|parent| parent.children.as_mut())
        else {
            return false;
        };
        if children.iter().any(|c| c.head.name == head.name) {
            return false;
        }
        children.insert(index.min(children.len()), Node::new(head));
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::FileKind;

    fn dir(name: &str, address: u32) -> FileHead {
        FileHead::new(name, FileKind::Directory, address)
    }

    fn file(name: &str, address: u32) -> FileHead {
        FileHead::new(name, FileKind::Regular, address)
    }

    #[test]
    fn insert_and_resolve() {
        let mut tree = Tree::new(dir("", 0));
        assert!(tree.insert(&["a"], dir("a", 1)));
        assert!(tree.insert(&["a", "b"], file("b", 2)));
        assert!(!tree.insert(&["a", "b"], file("b", 3)), "duplicate name");
        assert!(!tree.insert(&["missing", "c"], file("c", 4)), "missing parent");
        assert!(!tree.insert(&["a", "b", "c"], file("c", 5)), "parent is a file");

        assert_eq!(tree.resolve(&["a", "b"]).unwrap().head().address(), 2);
        assert_eq!(tree.resolve_parent(&["a", "b"]).unwrap().head().address(), 1);
        assert!(tree.resolve_parent::<&str>(&[]).is_none());
        assert!(tree.resolve(&["a", "b", "c"]).is_none());
        assert_eq!(tree.root().child_addresses(), vec![1]);
    }

    #[test]
    fn remove_checks_emptiness() {
        let mut tree = Tree::new(dir("", 0));
        tree.insert(&["d"], dir("d", 1));
        tree.insert(&["d", "f"], file("f", 2));
        tree.insert(&["g"], file("g", 3));

        assert!(matches!(tree.remove(&["d"]), Err(Error::DirectoryNotEmpty(_))));
        assert!(tree.exists(&["d", "f"]));
        assert_eq!(tree.remove(&["d", "f"]).unwrap().address(), 2);
        assert_eq!(tree.remove(&["d"]).unwrap().address(), 1);
        assert!(matches!(tree.remove(&["d"]), Err(Error::NotFound(_))));
        assert!(matches!(tree.remove::<&str>(&[]), Err(Error::InvalidArgument(_))));
        // Siblings are untouched.
        assert_eq!(tree.root().child_names(), vec!["g"]);
    }

    #[test]
    fn reattach_restores_position() {
        let mut tree = Tree::new(dir("", 0));
        tree.insert(&["a"], file("a", 1));
        tree.insert(&["b"], file("b", 2));
        tree.insert(&["c"], file("c", 3));

        let (index, head) = tree.detach(&["b"]).unwrap();
        assert_eq!(index, 1);
        assert_eq!(tree.root().child_names(), vec!["a", "c"]);
        assert!(tree.reattach(&["b"], index, head));
        assert_eq!(tree.root().child_names(), vec!["a", "b", "c"]);
        assert!(!tree.reattach(&["b"], 0, file("b", 9)), "name taken");
    }
}
