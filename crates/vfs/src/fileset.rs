use crate::error::{ErrorKind, Result};
use crate::{FileAddress, FileNode, NodeHandle};
use std::collections::HashSet;

/// The files a user picked for one operation.
///
/// Members keep their insertion order, and adding an address twice is a
/// no-op. Every member must live on the same backend as the base folder,
/// though it needn't be below it; the base is only used to show members by
/// a short relative path.
///
/// # Examples
///
/// ```
/// use tandem_vfs::FileSet;
/// use tandem_vfs::backend::MemoryBackend;
///
/// let store = MemoryBackend::with_files("t", [("photos/a.jpg", "a"), ("photos/b.jpg", "b")]);
/// let mut selection = FileSet::new(store.node("photos"));
/// assert!(selection.add(store.node("photos/a.jpg")).unwrap());
/// assert!(!selection.add(store.node("photos/a.jpg")).unwrap());
/// assert_eq!(selection.len(), 1);
/// assert_eq!(selection.display_path(&*store.node("photos/a.jpg")), "a.jpg");
/// ```
#[derive(Clone, Debug)]
pub struct FileSet {
    base: NodeHandle,
    members: Vec<NodeHandle>,
    seen: HashSet<FileAddress>,
}
impl FileSet {
    pub fn new(base: NodeHandle) -> Self {
        Self {
            base,
            members: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Build a set from `nodes` in order, dropping duplicates.
    pub fn from_nodes(base: NodeHandle, nodes: impl IntoIterator<Item = NodeHandle>) -> Result<Self> {
        let mut set = Self::new(base);
        for node in nodes {
            set.add(node)?;
        }
        Ok(set)
    }

    /// Append `node`. Returns `false` if its address is already a member.
    pub fn add(&mut self, node: NodeHandle) -> Result<bool> {
        let address = node.address();
        if !self.base.address().same_authority(address) {
            exn::bail!(ErrorKind::OutsideBase(format!("{address} (base {})", self.base.address())));
        }
        if !self.seen.insert(address.clone()) {
            return Ok(false);
        }
        self.members.push(node);
        Ok(true)
    }

    pub fn base(&self) -> &NodeHandle {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, address: &FileAddress) -> bool {
        self.seen.contains(address)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeHandle> {
        self.members.iter()
    }

    /// Where `node` sits relative to the base folder, or its full address
    /// when it isn't below the base.
    pub fn display_path(&self, node: &dyn FileNode) -> String {
        let base = self.base.address();
        let address = node.address();
        if !base.is_ancestor_of(address) {
            return address.to_string();
        }
        match (base.entry_path(), address.entry_path()) {
            (Some(outer), Some(inner)) => inner[outer.len()..].join("/"),
            (None, Some(inner)) => {
                let container = address.path()[base.path().len()..].join("/");
                if container.is_empty() {
                    inner.join("/")
                } else {
                    format!("{container}!/{}", inner.join("/"))
                }
            },
            _ => address.path()[base.path().len()..].join("/"),
        }
    }
}
impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a NodeHandle;
    type IntoIter = std::slice::Iter<'a, NodeHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_keeps_order_and_drops_duplicates() {
        let store = MemoryBackend::with_files("t", [("c.txt", "c"), ("a.txt", "a"), ("b/b.txt", "b")]);
        let set = FileSet::from_nodes(
            store.node(""),
            ["c.txt", "a.txt", "c.txt", "b/b.txt", "./a.txt"].map(|p| store.node(p)),
        )
        .unwrap();
        let names: Vec<String> = set.iter().map(|n| n.name()).collect();
        assert_eq!(names, ["c.txt", "a.txt", "b.txt"]);
        assert!(set.contains(&store.address("b/b.txt")));
    }

    #[test]
    fn test_rejects_other_backends() {
        let here = MemoryBackend::with_files("here", [("a.txt", "a")]);
        let there = MemoryBackend::with_files("there", [("a.txt", "a")]);
        let mut set = FileSet::new(here.node(""));
        let err = set.add(there.node("a.txt")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::OutsideBase(_)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_members_need_not_be_below_base() {
        let store = MemoryBackend::with_files("t", [("left/a.txt", "a"), ("right/b.txt", "b")]);
        let mut set = FileSet::new(store.node("left"));
        set.add(store.node("left/a.txt")).unwrap();
        set.add(store.node("right/b.txt")).unwrap();
        assert_eq!(set.display_path(&*store.node("left/a.txt")), "a.txt");
        assert_eq!(set.display_path(&*store.node("right/b.txt")), "mem://t/right/b.txt");
    }

    #[test]
    fn test_display_path_inside_archives() {
        let store = MemoryBackend::new("t");
        let set = FileSet::new(store.node("downloads"));
        let entry = FileAddress::parse("mem://t/downloads/bundle.zip!/docs/a.txt").unwrap();
        let node = crate::ProxyNode::new(store.node("downloads/bundle.zip")).with_address(entry);
        assert_eq!(set.display_path(&node), "bundle.zip!/docs/a.txt");

        let inside = FileSet::new(store.node("downloads/bundle.zip"));
        assert_eq!(inside.display_path(&node), "docs/a.txt");
    }
}
