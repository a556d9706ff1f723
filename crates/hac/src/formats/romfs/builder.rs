//! Two-pass RomFS encoder: a depth-first walk assigns every directory and
//! file an offset into its respective table and links the parent/sibling
//! chains, then a layout pass sizes the hash tables and emits the final
//! image in on-disk order.

use super::entry::RomFsEntry;
use super::hash::{entry_hash, hash_table_count};
use std::collections::{BTreeMap, HashMap};

const INVALID_OFFSET: u32 = u32::MAX;
const DIR_ENTRY_FIXED_SIZE: u32 = 0x18;
const FILE_ENTRY_FIXED_SIZE: u32 = 0x20;
const HEADER_SIZE: u64 = 0x50;
const DATA_PARTITION_OFS: u64 = 0x200;

fn align_up_u32(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

fn align_up_u64(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

struct DirRecord {
    offset: u32,
    parent_offset: u32,
    sibling_offset: u32,
    child_offset: u32,
    file_offset: u32,
    hash_sibling_offset: u32,
    name: String,
}

struct FileRecord {
    offset: u32,
    parent_offset: u32,
    sibling_offset: u32,
    data_offset: u64,
    data_size: u64,
    hash_sibling_offset: u32,
    name: String,
    data: Vec<u8>,
}

struct Builder {
    dirs: Vec<DirRecord>,
    files: Vec<FileRecord>,
    dir_index_by_offset: HashMap<u32, usize>,
    file_index_by_offset: HashMap<u32, usize>,
    cursor_dir: u32,
    cursor_file: u32,
    cursor_data: u64,
}

impl Builder {
    fn push_dir(&mut self, parent_offset: u32, name: String) -> u32 {
        let offset = self.cursor_dir;
        let size = align_up_u32(DIR_ENTRY_FIXED_SIZE + name.len() as u32, 4);
        self.cursor_dir += size;
        self.dir_index_by_offset.insert(offset, self.dirs.len());
        self.dirs.push(DirRecord {
            offset,
            parent_offset,
            sibling_offset: INVALID_OFFSET,
            child_offset: INVALID_OFFSET,
            file_offset: INVALID_OFFSET,
            hash_sibling_offset: INVALID_OFFSET,
            name,
        });
        offset
    }

    fn push_file(&mut self, parent_offset: u32, name: String, data: Vec<u8>) -> u32 {
        let offset = self.cursor_file;
        let size = align_up_u32(FILE_ENTRY_FIXED_SIZE + name.len() as u32, 4);
        self.cursor_file += size;
        let data_offset = self.cursor_data;
        self.cursor_data += align_up_u64(data.len() as u64, 0x10);
        self.file_index_by_offset.insert(offset, self.files.len());
        self.files.push(FileRecord {
            offset,
            parent_offset,
            sibling_offset: INVALID_OFFSET,
            data_offset,
            data_size: data.len() as u64,
            hash_sibling_offset: INVALID_OFFSET,
            name,
            data,
        });
        offset
    }

    fn walk(&mut self, children: &BTreeMap<String, RomFsEntry>, this_offset: u32) {
        let mut last_dir_sibling: Option<u32> = None;
        let mut last_file_sibling: Option<u32> = None;

        for (name, entry) in children {
            match entry {
                RomFsEntry::Directory(sub) => {
                    let child_offset = self.push_dir(this_offset, name.clone());
                    match last_dir_sibling {
                        Some(prev) => {
                            let idx = self.dir_index_by_offset[&prev];
                            self.dirs[idx].sibling_offset = child_offset;
                        }
                        None => {
                            let idx = self.dir_index_by_offset[&this_offset];
                            self.dirs[idx].child_offset = child_offset;
                        }
                    }
                    last_dir_sibling = Some(child_offset);
                    self.walk(sub, child_offset);
                }
                RomFsEntry::File(data) => {
                    let child_offset = self.push_file(this_offset, name.clone(), data.clone());
                    match last_file_sibling {
                        Some(prev) => {
                            let idx = self.file_index_by_offset[&prev];
                            self.files[idx].sibling_offset = child_offset;
                        }
                        None => {
                            let idx = self.dir_index_by_offset[&this_offset];
                            self.dirs[idx].file_offset = child_offset;
                        }
                    }
                    last_file_sibling = Some(child_offset);
                }
            }
        }
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn pad_to(out: &mut Vec<u8>, base: usize, target_offset: u64) {
    let target = base + target_offset as usize;
    if out.len() < target {
        out.resize(target, 0);
    }
}

/// Serializes a RomFS image from an in-memory tree. `root` must be a
/// [`RomFsEntry::Directory`].
pub fn build_romfs(root: &RomFsEntry) -> Vec<u8> {
    let root_children = root.as_directory().expect("romfs root must be a directory");

    let mut builder = Builder {
        dirs: Vec::new(),
        files: Vec::new(),
        dir_index_by_offset: HashMap::new(),
        file_index_by_offset: HashMap::new(),
        cursor_dir: 0,
        cursor_file: 0,
        cursor_data: 0,
    };

    let root_offset = builder.push_dir(0, String::new());
    debug_assert_eq!(root_offset, 0);
    builder.walk(root_children, root_offset);

    let dir_entry_length = builder.cursor_dir as u64;
    let file_entry_length = builder.cursor_file as u64;
    let file_partition_size = match builder.files.last() {
        Some(last) => last.data_offset + last.data_size,
        None => 0,
    };

    let dir_bucket_count = hash_table_count(builder.dirs.len() as u32);
    let file_bucket_count = hash_table_count(builder.files.len() as u32);

    let mut dir_buckets = vec![INVALID_OFFSET; dir_bucket_count as usize];
    for dir in &mut builder.dirs {
        let bucket = entry_hash(dir.parent_offset, dir.name.as_bytes(), dir_bucket_count) as usize;
        dir.hash_sibling_offset = dir_buckets[bucket];
        dir_buckets[bucket] = dir.offset;
    }

    let mut file_buckets = vec![INVALID_OFFSET; file_bucket_count as usize];
    for file in &mut builder.files {
        let bucket = entry_hash(file.parent_offset, file.name.as_bytes(), file_bucket_count) as usize;
        file.hash_sibling_offset = file_buckets[bucket];
        file_buckets[bucket] = file.offset;
    }

    let dir_hash_table_size = 4 * dir_bucket_count as u64;
    let file_hash_table_size = 4 * file_bucket_count as u64;

    let dir_hash_table_ofs = align_up_u64(file_partition_size + DATA_PARTITION_OFS, 4);
    let dir_table_ofs = dir_hash_table_ofs + dir_hash_table_size;
    let file_hash_table_ofs = dir_table_ofs + dir_entry_length;
    let file_table_ofs = file_hash_table_ofs + file_hash_table_size;

    let mut out = Vec::new();

    write_u64(&mut out, HEADER_SIZE);
    write_u64(&mut out, dir_hash_table_ofs);
    write_u64(&mut out, dir_hash_table_size);
    write_u64(&mut out, dir_table_ofs);
    write_u64(&mut out, dir_entry_length);
    write_u64(&mut out, file_hash_table_ofs);
    write_u64(&mut out, file_hash_table_size);
    write_u64(&mut out, file_table_ofs);
    write_u64(&mut out, file_entry_length);
    write_u64(&mut out, DATA_PARTITION_OFS);
    debug_assert_eq!(out.len() as u64, HEADER_SIZE);

    pad_to(&mut out, 0, DATA_PARTITION_OFS);

    let num_files = builder.files.len();
    for (i, file) in builder.files.iter().enumerate() {
        out.extend_from_slice(&file.data);
        if i + 1 != num_files {
            let padded = align_up_u64(file.data_size, 0x10);
            pad_to(&mut out, 0, DATA_PARTITION_OFS + file.data_offset + padded);
        }
    }
    pad_to(&mut out, 0, DATA_PARTITION_OFS + file_partition_size);

    pad_to(&mut out, 0, dir_hash_table_ofs);
    for &b in &dir_buckets {
        write_u32(&mut out, b);
    }
    pad_to(&mut out, 0, dir_table_ofs);
    for dir in &builder.dirs {
        write_u32(&mut out, dir.parent_offset);
        write_u32(&mut out, dir.sibling_offset);
        write_u32(&mut out, dir.child_offset);
        write_u32(&mut out, dir.file_offset);
        write_u32(&mut out, dir.hash_sibling_offset);
        write_u32(&mut out, dir.name.len() as u32);
        out.extend_from_slice(dir.name.as_bytes());
        let entry_start = dir_table_ofs as usize + (dir.offset as usize);
        let entry_end = entry_start + align_up_u32(DIR_ENTRY_FIXED_SIZE + dir.name.len() as u32, 4) as usize;
        pad_to(&mut out, 0, entry_end as u64);
    }
    pad_to(&mut out, 0, file_hash_table_ofs);
    for &b in &file_buckets {
        write_u32(&mut out, b);
    }
    pad_to(&mut out, 0, file_table_ofs);
    for file in &builder.files {
        write_u32(&mut out, file.parent_offset);
        write_u32(&mut out, file.sibling_offset);
        write_u64(&mut out, file.data_offset);
        write_u64(&mut out, file.data_size);
        write_u32(&mut out, file.hash_sibling_offset);
        write_u32(&mut out, file.name.len() as u32);
        out.extend_from_slice(file.name.as_bytes());
        let entry_start = file_table_ofs as usize + (file.offset as usize);
        let entry_end = entry_start + align_up_u32(FILE_ENTRY_FIXED_SIZE + file.name.len() as u32, 4) as usize;
        pad_to(&mut out, 0, entry_end as u64);
    }

    out
}
