//! The mutable tree model and its git-compatible binary codec.
//!
//! A [`Tree`] is an arena holding every entry of one directory snapshot.
//! Entries are addressed by [`EntryRef`] handles and keep an index-based
//! link to their parent, so child-to-parent navigation never forms an
//! ownership cycle. Subtrees with a known id hydrate lazily through a
//! [`TreeReader`] the first time their children are needed.

use std::cmp::Ordering;

use bstr::{BStr, BString, ByteSlice};
use grit_hash::ObjectId;

use crate::mode::parse_octal;
use crate::visit::{TreeVisitor, VisitFlags};
use crate::{FileMode, ObjectError};

/// Source of raw tree payloads, implemented by the repository.
///
/// `Ok(None)` means the object does not exist; the tree turns that into
/// [`ObjectError::MissingObject`] at the point of hydration.
pub trait TreeReader {
    fn read_tree(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, ObjectError>;
}

/// A reader with no backing store: every lookup reports the object absent.
///
/// Useful for trees built purely in memory, where hydration can never be
/// required.
pub struct NoObjects;

impl TreeReader for NoObjects {
    fn read_tree(&self, _id: &ObjectId) -> Result<Option<Vec<u8>>, ObjectError> {
        Ok(None)
    }
}

/// Handle to an entry inside a [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef(u32);

#[derive(Debug)]
enum NodeKind {
    File { executable: bool },
    Symlink,
    /// `children: None` means the subtree is unloaded and will hydrate from
    /// its id on first access.
    Subtree { children: Option<Vec<EntryRef>> },
}

#[derive(Debug)]
struct Node {
    parent: Option<EntryRef>,
    name: BString,
    /// Absent while the entry is dirty; set once the object is stored.
    id: Option<ObjectId>,
    kind: NodeKind,
}

/// A directory snapshot: the root subtree plus every nested entry.
///
/// Children are kept sorted in git tree order at all times. Structural
/// mutation clears the id of the touched subtree and of every ancestor up
/// to the root, so `id(entry).is_none()` doubles as the "modified" flag.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: EntryRef,
}

impl Tree {
    /// Create an empty tree. The root is loaded and modified: empty content
    /// is novel content.
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            name: BString::default(),
            id: None,
            kind: NodeKind::Subtree {
                children: Some(Vec::new()),
            },
        };
        Self {
            nodes: vec![root],
            root: EntryRef(0),
        }
    }

    /// Create a tree bound to a known id whose content has not been read
    /// yet. The root hydrates on first access.
    pub fn with_id(id: ObjectId) -> Self {
        let root = Node {
            parent: None,
            name: BString::default(),
            id: Some(id),
            kind: NodeKind::Subtree { children: None },
        };
        Self {
            nodes: vec![root],
            root: EntryRef(0),
        }
    }

    /// Create a tree from a known id and its raw payload.
    pub fn from_bytes(id: ObjectId, raw: &[u8]) -> Result<Self, ObjectError> {
        let mut tree = Self::with_id(id);
        tree.parse_into(tree.root, raw)?;
        Ok(tree)
    }

    /// The root entry.
    pub fn root(&self) -> EntryRef {
        self.root
    }

    fn node(&self, r: EntryRef) -> &Node {
        &self.nodes[r.0 as usize]
    }

    fn node_mut(&mut self, r: EntryRef) -> &mut Node {
        &mut self.nodes[r.0 as usize]
    }

    /// Entry name, empty for the root.
    pub fn name(&self, r: EntryRef) -> &BStr {
        self.node(r).name.as_bstr()
    }

    /// The `/`-joined path from the root, empty for the root itself.
    pub fn full_name(&self, r: EntryRef) -> BString {
        let mut parts: Vec<&[u8]> = Vec::new();
        let mut cur = r;
        while let Some(parent) = self.node(cur).parent {
            parts.push(&self.node(cur).name);
            cur = parent;
        }
        parts.reverse();
        BString::from(parts.join(&b'/'))
    }

    /// The entry's object id, absent while the entry is dirty.
    pub fn id(&self, r: EntryRef) -> Option<ObjectId> {
        self.node(r).id
    }

    /// The containing subtree, `None` for the root and for detached entries.
    pub fn parent(&self, r: EntryRef) -> Option<EntryRef> {
        self.node(r).parent
    }

    /// Whether this is the root of the arena.
    pub fn is_root(&self, r: EntryRef) -> bool {
        r == self.root
    }

    /// The entry's file mode, derived from its kind.
    pub fn mode(&self, r: EntryRef) -> FileMode {
        match self.node(r).kind {
            NodeKind::File { executable: false } => FileMode::Regular,
            NodeKind::File { executable: true } => FileMode::Executable,
            NodeKind::Symlink => FileMode::Symlink,
            NodeKind::Subtree { .. } => FileMode::Tree,
        }
    }

    /// Whether the entry is a subtree.
    pub fn is_subtree(&self, r: EntryRef) -> bool {
        matches!(self.node(r).kind, NodeKind::Subtree { .. })
    }

    /// Whether the entry is a file blob.
    pub fn is_file(&self, r: EntryRef) -> bool {
        matches!(self.node(r).kind, NodeKind::File { .. })
    }

    /// Whether a file entry carries the executable bit.
    pub fn is_executable(&self, r: EntryRef) -> bool {
        matches!(self.node(r).kind, NodeKind::File { executable: true })
    }

    /// An entry is modified while it has no object id.
    pub fn is_modified(&self, r: EntryRef) -> bool {
        self.node(r).id.is_none()
    }

    /// Whether a subtree's children are in memory. Non-subtree entries have
    /// no load state and report `true`.
    pub fn is_loaded(&self, r: EntryRef) -> bool {
        !matches!(self.node(r).kind, NodeKind::Subtree { children: None })
    }

    /// Record the stored object id for an entry, marking it clean.
    pub fn set_id(&mut self, r: EntryRef, id: ObjectId) {
        self.node_mut(r).id = Some(id);
    }

    /// Clear the id of an entry and of every ancestor up to the root.
    pub fn mark_modified(&mut self, r: EntryRef) {
        let mut cur = Some(r);
        while let Some(c) = cur {
            let node = self.node_mut(c);
            node.id = None;
            cur = node.parent;
        }
    }

    /// Drop a clean subtree's children; they reload from the id on next
    /// access. Handles to the dropped children become stale.
    pub fn unload(&mut self, r: EntryRef) -> Result<(), ObjectError> {
        let node = self.node_mut(r);
        if let NodeKind::Subtree { children } = &mut node.kind {
            if node.id.is_none() {
                return Err(ObjectError::UnloadModified);
            }
            *children = None;
        }
        Ok(())
    }

    fn children_slice(&self, r: EntryRef) -> &[EntryRef] {
        match &self.node(r).kind {
            NodeKind::Subtree {
                children: Some(children),
            } => children,
            _ => &[],
        }
    }

    /// Number of direct members of a subtree, hydrating if necessary.
    pub fn member_count(
        &mut self,
        r: EntryRef,
        reader: &dyn TreeReader,
    ) -> Result<usize, ObjectError> {
        self.ensure_loaded(r, reader)?;
        Ok(self.children_slice(r).len())
    }

    /// The members of a subtree in git tree order, hydrating if necessary.
    pub fn members(
        &mut self,
        r: EntryRef,
        reader: &dyn TreeReader,
    ) -> Result<Vec<EntryRef>, ObjectError> {
        self.ensure_loaded(r, reader)?;
        Ok(self.children_slice(r).to_vec())
    }

    /// Look up a blob or symlink by `/`-separated path.
    pub fn find_blob(
        &mut self,
        path: &BStr,
        reader: &dyn TreeReader,
    ) -> Result<Option<EntryRef>, ObjectError> {
        self.find(path, 0, reader)
    }

    /// Look up a subtree by `/`-separated path.
    pub fn find_tree(
        &mut self,
        path: &BStr,
        reader: &dyn TreeReader,
    ) -> Result<Option<EntryRef>, ObjectError> {
        self.find(path, b'/', reader)
    }

    /// Look up an entry of any kind by `/`-separated path. Blobs and
    /// symlinks are preferred when both a blob and a subtree carry the name.
    pub fn find_member(
        &mut self,
        path: &BStr,
        reader: &dyn TreeReader,
    ) -> Result<Option<EntryRef>, ObjectError> {
        if let Some(found) = self.find(path, 0, reader)? {
            return Ok(Some(found));
        }
        self.find(path, b'/', reader)
    }

    /// Look up a direct subtree child of `parent` by single-component name.
    pub fn subtree_of(
        &mut self,
        parent: EntryRef,
        name: &BStr,
        reader: &dyn TreeReader,
    ) -> Result<Option<EntryRef>, ObjectError> {
        self.ensure_loaded(parent, reader)?;
        Ok(self
            .position(parent, name, b'/')
            .ok()
            .map(|at| self.children_slice(parent)[at]))
    }

    fn find(
        &mut self,
        path: &BStr,
        final_last: u8,
        reader: &dyn TreeReader,
    ) -> Result<Option<EntryRef>, ObjectError> {
        let components: Vec<&[u8]> = path.split(|&b| b == b'/').collect();
        let mut cur = self.root;
        for (i, component) in components.iter().enumerate() {
            if component.is_empty() {
                return Ok(None);
            }
            let is_last = i + 1 == components.len();
            let last = if is_last { final_last } else { b'/' };
            self.ensure_loaded(cur, reader)?;
            match self.position(cur, component, last) {
                Ok(at) => {
                    let hit = self.children_slice(cur)[at];
                    if is_last {
                        return Ok(Some(hit));
                    }
                    // An intermediate hit is necessarily a subtree: only
                    // subtree names tie against a '/'-terminated key.
                    cur = hit;
                }
                Err(_) => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Add a file at a `/`-separated path, creating intermediate subtrees
    /// as needed. The new entry has no id and is dirty. A tie with an
    /// existing blob or symlink is [`ObjectError::EntryExists`].
    pub fn add_file(
        &mut self,
        path: &BStr,
        reader: &dyn TreeReader,
    ) -> Result<EntryRef, ObjectError> {
        let components = split_path(path)?;
        let mut cur = self.root;
        for (i, component) in components.iter().enumerate() {
            let is_last = i + 1 == components.len();
            let last = if is_last { 0 } else { b'/' };
            self.ensure_loaded(cur, reader)?;
            match self.position(cur, component, last) {
                Ok(_) if is_last => {
                    return Err(ObjectError::EntryExists(BString::from(*component)));
                }
                Ok(at) => cur = self.children_slice(cur)[at],
                Err(at) => {
                    let node = if is_last {
                        Node {
                            parent: Some(cur),
                            name: BString::from(*component),
                            id: None,
                            kind: NodeKind::File { executable: false },
                        }
                    } else {
                        Node {
                            parent: Some(cur),
                            name: BString::from(*component),
                            id: None,
                            kind: NodeKind::Subtree {
                                children: Some(Vec::new()),
                            },
                        }
                    };
                    let inserted = self.insert_child(cur, at, node);
                    if is_last {
                        return Ok(inserted);
                    }
                    cur = inserted;
                }
            }
        }
        Err(ObjectError::InvalidEntryName(BString::from(path.as_bytes())))
    }

    /// Add a subtree at a `/`-separated path, creating intermediates as
    /// needed. An existing subtree at any step is reused, so the call is
    /// idempotent for trees.
    pub fn add_tree(
        &mut self,
        path: &BStr,
        reader: &dyn TreeReader,
    ) -> Result<EntryRef, ObjectError> {
        let components = split_path(path)?;
        let mut cur = self.root;
        for (i, component) in components.iter().enumerate() {
            let is_last = i + 1 == components.len();
            self.ensure_loaded(cur, reader)?;
            match self.position(cur, component, b'/') {
                Ok(at) => cur = self.children_slice(cur)[at],
                Err(at) => {
                    let node = Node {
                        parent: Some(cur),
                        name: BString::from(*component),
                        id: None,
                        kind: NodeKind::Subtree {
                            children: Some(Vec::new()),
                        },
                    };
                    cur = self.insert_child(cur, at, node);
                }
            }
            if is_last {
                return Ok(cur);
            }
        }
        Err(ObjectError::InvalidEntryName(BString::from(path.as_bytes())))
    }

    /// Insert a file directly under a loaded subtree, with a known id and
    /// executable bit. Used when materializing trees from index entries.
    pub fn insert_file(
        &mut self,
        parent: EntryRef,
        name: &BStr,
        id: ObjectId,
        executable: bool,
    ) -> Result<EntryRef, ObjectError> {
        check_name(name)?;
        let at = match self.position(parent, name, 0) {
            Ok(_) => return Err(ObjectError::EntryExists(BString::from(name.as_bytes()))),
            Err(at) => at,
        };
        let node = Node {
            parent: Some(parent),
            name: BString::from(name.as_bytes()),
            id: Some(id),
            kind: NodeKind::File { executable },
        };
        Ok(self.insert_child(parent, at, node))
    }

    /// Insert an empty subtree directly under a loaded subtree.
    pub fn insert_tree(
        &mut self,
        parent: EntryRef,
        name: &BStr,
    ) -> Result<EntryRef, ObjectError> {
        check_name(name)?;
        let at = match self.position(parent, name, b'/') {
            Ok(_) => return Err(ObjectError::EntryExists(BString::from(name.as_bytes()))),
            Err(at) => at,
        };
        let node = Node {
            parent: Some(parent),
            name: BString::from(name.as_bytes()),
            id: None,
            kind: NodeKind::Subtree {
                children: Some(Vec::new()),
            },
        };
        Ok(self.insert_child(parent, at, node))
    }

    /// Detach an entry from its parent. The parent chain is marked
    /// modified; the entry's parent link is cleared. Removing the root is a
    /// no-op.
    pub fn remove(&mut self, r: EntryRef) {
        let Some(parent) = self.node(r).parent else {
            return;
        };
        if let NodeKind::Subtree {
            children: Some(children),
        } = &mut self.node_mut(parent).kind
        {
            children.retain(|&c| c != r);
        }
        self.node_mut(r).parent = None;
        self.mark_modified(parent);
    }

    /// Serialize a loaded subtree: `<octal-mode> <name>\0<raw-id>` per
    /// child, in order. Every child must carry an id.
    pub fn encode(&self, r: EntryRef) -> Result<Vec<u8>, ObjectError> {
        let children = match &self.node(r).kind {
            NodeKind::Subtree {
                children: Some(children),
            } => children,
            NodeKind::Subtree { children: None } => return Err(ObjectError::EncodeUnloaded),
            _ => return Err(ObjectError::NotATree),
        };
        let mut out = Vec::new();
        for &child in children {
            let node = self.node(child);
            let id = node
                .id
                .ok_or_else(|| ObjectError::MissingEntryId(node.name.clone()))?;
            out.extend_from_slice(&self.mode(child).as_octal());
            out.push(b' ');
            out.extend_from_slice(&node.name);
            out.push(0);
            out.extend_from_slice(id.as_bytes());
        }
        Ok(out)
    }

    /// Visit a subtree, honoring the traversal flags.
    pub fn accept(
        &mut self,
        r: EntryRef,
        visitor: &mut dyn TreeVisitor,
        flags: VisitFlags,
        reader: &dyn TreeReader,
    ) -> Result<(), ObjectError> {
        match self.node(r).kind {
            NodeKind::File { .. } => {
                if flags.contains(VisitFlags::MODIFIED_ONLY) && !self.is_modified(r) {
                    return Ok(());
                }
                visitor.file(self, r)
            }
            NodeKind::Symlink => {
                if flags.contains(VisitFlags::MODIFIED_ONLY) && !self.is_modified(r) {
                    return Ok(());
                }
                visitor.symlink(self, r)
            }
            NodeKind::Subtree { .. } => {
                if flags.contains(VisitFlags::MODIFIED_ONLY) && !self.is_modified(r) {
                    return Ok(());
                }
                if flags.contains(VisitFlags::LOADED_ONLY) && !self.is_loaded(r) {
                    visitor.start_tree(self, r)?;
                    visitor.end_tree(self, r)?;
                    return Ok(());
                }
                self.ensure_loaded(r, reader)?;
                visitor.start_tree(self, r)?;
                // Iterate a snapshot: with CONCURRENT_MODIFICATION the
                // visitor may queue structural changes that land between
                // callbacks without disturbing the walk.
                let children = self.children_slice(r).to_vec();
                for child in children {
                    self.accept(child, visitor, flags, reader)?;
                }
                visitor.end_tree(self, r)
            }
        }
    }

    /// Binary search a loaded subtree's children for `name` with the given
    /// virtual trailing byte. `Err` carries the insertion position.
    fn position(&self, parent: EntryRef, name: &[u8], last: u8) -> Result<usize, usize> {
        self.children_slice(parent).binary_search_by(|&child| {
            let node = self.node(child);
            let child_last = match node.kind {
                NodeKind::Subtree { .. } => b'/',
                _ => 0,
            };
            compare_names(&node.name, child_last, name, last)
        })
    }

    fn insert_child(&mut self, parent: EntryRef, at: usize, node: Node) -> EntryRef {
        let r = EntryRef(self.nodes.len() as u32);
        self.nodes.push(node);
        if let NodeKind::Subtree {
            children: Some(children),
        } = &mut self.node_mut(parent).kind
        {
            children.insert(at, r);
        }
        self.mark_modified(parent);
        r
    }

    fn ensure_loaded(&mut self, r: EntryRef, reader: &dyn TreeReader) -> Result<(), ObjectError> {
        let id = match &self.node(r).kind {
            NodeKind::Subtree { children: None } => match self.node(r).id {
                Some(id) => id,
                // Unloaded implies clean implies an id; treat the
                // impossible case as empty content.
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        let raw = reader
            .read_tree(&id)?
            .ok_or(ObjectError::MissingObject(id))?;
        self.parse_into(r, &raw)
    }

    /// Decode a raw tree payload into the children of `parent`.
    fn parse_into(&mut self, parent: EntryRef, raw: &[u8]) -> Result<(), ObjectError> {
        let corrupt = |offset: usize, reason: &str| ObjectError::CorruptTree {
            offset,
            reason: reason.into(),
        };

        let mut children = Vec::new();
        let mut pos = 0;
        while pos < raw.len() {
            let entry_start = pos;
            let space = raw[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| corrupt(entry_start, "missing space after mode"))?
                + pos;
            let raw_mode = parse_octal(&raw[pos..space])
                .map_err(|_| corrupt(entry_start, "invalid entry mode"))?;
            let mode = FileMode::from_bits(raw_mode)
                .ok_or_else(|| corrupt(entry_start, "unknown entry mode"))?;

            let name_start = space + 1;
            let nul = raw[name_start..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| corrupt(name_start, "missing NUL after name"))?
                + name_start;
            let name = BString::from(&raw[name_start..nul]);

            let id_start = nul + 1;
            let id_end = id_start + 20;
            if id_end > raw.len() {
                return Err(corrupt(id_start, "truncated object id"));
            }
            let id = ObjectId::from_bytes(&raw[id_start..id_end])?;

            let kind = match mode {
                FileMode::Regular => NodeKind::File { executable: false },
                FileMode::Executable => NodeKind::File { executable: true },
                FileMode::Symlink => NodeKind::Symlink,
                FileMode::Tree => NodeKind::Subtree { children: None },
                FileMode::Missing => return Err(corrupt(entry_start, "unknown entry mode")),
            };

            let child = EntryRef(self.nodes.len() as u32);
            self.nodes.push(Node {
                parent: Some(parent),
                name,
                id: Some(id),
                kind,
            });
            children.push(child);
            pos = id_end;
        }

        if let NodeKind::Subtree {
            children: children_slot,
        } = &mut self.node_mut(parent).kind
        {
            *children_slot = Some(children);
        }
        Ok(())
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

/// Git's tree-order name comparison.
///
/// Names compare as unsigned bytes; on a shared prefix the tie-breaker is a
/// virtual trailing byte, `/` for subtrees and NUL for everything else. A
/// subtree therefore sorts as if its name ended in `/`, and a blob sorts
/// before a subtree with the identical name.
pub fn compare_names(a: &[u8], last_a: u8, b: &[u8], last_b: u8) -> Ordering {
    let min_len = a.len().min(b.len());
    let by_prefix = a[..min_len].cmp(&b[..min_len]);
    if by_prefix != Ordering::Equal {
        return by_prefix;
    }
    let ca = if a.len() > min_len { a[min_len] } else { last_a };
    let cb = if b.len() > min_len { b[min_len] } else { last_b };
    ca.cmp(&cb)
}

fn check_name(name: &BStr) -> Result<(), ObjectError> {
    if name.is_empty() || name.contains(&b'/') || name.contains(&0) {
        return Err(ObjectError::InvalidEntryName(BString::from(name.as_bytes())));
    }
    Ok(())
}

fn split_path(path: &BStr) -> Result<Vec<&[u8]>, ObjectError> {
    let components: Vec<&[u8]> = path.split(|&b| b == b'/').collect();
    if components.iter().any(|c| c.is_empty() || c.contains(&0)) {
        return Err(ObjectError::InvalidEntryName(BString::from(path.as_bytes())));
    }
    Ok(components)
}
