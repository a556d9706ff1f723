//! The in-memory tree that [`super::build_romfs`] serializes.

use std::collections::BTreeMap;

/// A RomFS directory or file. Directory children are kept in a `BTreeMap`
/// so iteration order is always lexicographic-by-name, matching the order
/// the on-disk format requires.
#[derive(Debug, Clone)]
pub enum RomFsEntry {
    Directory(BTreeMap<String, RomFsEntry>),
    File(Vec<u8>),
}

impl RomFsEntry {
    pub fn empty_directory() -> Self {
        RomFsEntry::Directory(BTreeMap::new())
    }

    pub fn as_directory(&self) -> Option<&BTreeMap<String, RomFsEntry>> {
        match self {
            RomFsEntry::Directory(children) => Some(children),
            RomFsEntry::File(_) => None,
        }
    }

    /// Inserts a file at a `/`-separated path, creating intermediate
    /// directories as needed. Panics if a path component already exists as
    /// a file (a builder-usage error, not a data error).
    pub fn insert_file(&mut self, path: &str, data: Vec<u8>) {
        let mut node = self;
        let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let file_name = components.pop().expect("path must have at least one component");
        for component in components {
            let children = match node {
                RomFsEntry::Directory(children) => children,
                RomFsEntry::File(_) => panic!("path component {component:?} is a file, not a directory"),
            };
            node = children
                .entry(component.to_string())
                .or_insert_with(RomFsEntry::empty_directory);
        }
        match node {
            RomFsEntry::Directory(children) => {
                children.insert(file_name.to_string(), RomFsEntry::File(data));
            }
            RomFsEntry::File(_) => panic!("path component is a file, not a directory"),
        }
    }
}
