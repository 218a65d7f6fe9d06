//! Variable-length directory entries:
//! `(inode, rec_len, name_len, file_type, name)`.

use super::{fs::Ext2, inode::Ext2Inode, *};
use crate::{
    fs::{
        buffer,
        device::DeviceId,
        utils::{DirentVisitor, Inode, InodeMode, InodeType},
    },
    prelude::*,
};

const ENTRY_HEADER: usize = 8;

fn entry_len(name_len: usize) -> usize {
    (ENTRY_HEADER + name_len + 3) & !3
}

#[derive(Debug, Clone)]
struct DirEntry {
    ino: u32,
    rec_len: usize,
    file_type: u8,
    name: String,
    /// Byte offset within the directory file.
    offset: usize,
}

fn for_each_entry(
    dir: &Ext2Inode,
    mut f: impl FnMut(&DirEntry) -> Result<bool>,
) -> Result<()> {
    let size = dir.size();
    let mut block_buf = vec![0u8; BLOCK_SIZE];
    let mut base = 0;
    while base < size {
        dir.do_read(base, &mut block_buf)?;
        let mut pos = 0;
        while pos < BLOCK_SIZE {
            let rec_len = get_u16(&block_buf, pos + 4) as usize;
            if rec_len < ENTRY_HEADER {
                return_errno_with_message!(Errno::EIO, "corrupt ext2 directory");
            }
            let ino = get_u32(&block_buf, pos);
            if ino != 0 {
                let name_len = block_buf[pos + 6] as usize;
                let name = String::from_utf8_lossy(
                    &block_buf[pos + ENTRY_HEADER..pos + ENTRY_HEADER + name_len],
                )
                .into_owned();
                let entry = DirEntry {
                    ino,
                    rec_len,
                    file_type: block_buf[pos + 7],
                    name,
                    offset: base + pos,
                };
                if !f(&entry)? {
                    return Ok(());
                }
            }
            pos += rec_len;
        }
        base += BLOCK_SIZE;
    }
    Ok(())
}

fn find_entry(dir: &Ext2Inode, name: &str) -> Result<Option<DirEntry>> {
    let mut found = None;
    for_each_entry(dir, |entry| {
        if entry.name == name {
            found = Some(entry.clone());
            Ok(false)
        } else {
            Ok(true)
        }
    })?;
    Ok(found)
}

/// Insert `(name, ino)` by reusing slack space inside an existing
/// block, or by appending a fresh block.
fn add_entry(dir: &Ext2Inode, name: &str, ino: u32, file_type: DirFileType) -> Result<()> {
    if name.len() > 255 {
        return_errno!(Errno::ENAMETOOLONG);
    }
    let needed = entry_len(name.len());
    let size = dir.size();
    let fs = dir.fs_arc();
    let mut block_buf = vec![0u8; BLOCK_SIZE];
    let mut base = 0;
    while base < size {
        let file_block = (base / BLOCK_SIZE) as u32;
        let block = dir.map_block(file_block, false)?;
        dir.do_read(base, &mut block_buf)?;
        let mut pos = 0;
        while pos < BLOCK_SIZE {
            let cur_ino = get_u32(&block_buf, pos);
            let rec_len = get_u16(&block_buf, pos + 4) as usize;
            if rec_len < ENTRY_HEADER {
                return_errno_with_message!(Errno::EIO, "corrupt ext2 directory");
            }
            let used = if cur_ino == 0 {
                0
            } else {
                entry_len(block_buf[pos + 6] as usize)
            };
            if rec_len - used >= needed {
                let bh = buffer::bread(fs.dev(), block, BLOCK_SIZE)?;
                bh.with_data(|data| {
                    let (new_pos, new_rec) = if used == 0 {
                        (pos, rec_len)
                    } else {
                        // Shrink the occupant, give it the tail.
                        put_u16(data, pos + 4, used as u16);
                        (pos + used, rec_len - used)
                    };
                    put_u32(data, new_pos, ino);
                    put_u16(data, new_pos + 4, new_rec as u16);
                    data[new_pos + 6] = name.len() as u8;
                    data[new_pos + 7] = file_type as u8;
                    data[new_pos + ENTRY_HEADER..new_pos + ENTRY_HEADER + name.len()]
                        .copy_from_slice(name.as_bytes());
                });
                bh.mark_dirty();
                return Ok(());
            }
            pos += rec_len;
        }
        base += BLOCK_SIZE;
    }
    // No room anywhere: append one block holding just this entry.
    let mut fresh = vec![0u8; BLOCK_SIZE];
    put_u32(&mut fresh, 0, ino);
    put_u16(&mut fresh, 4, BLOCK_SIZE as u16);
    fresh[6] = name.len() as u8;
    fresh[7] = file_type as u8;
    fresh[ENTRY_HEADER..ENTRY_HEADER + name.len()].copy_from_slice(name.as_bytes());
    dir.do_write(size, &fresh)?;
    Ok(())
}

/// Delete `name` by merging its record into the predecessor (or
/// zeroing the inode field when it leads its block).
fn remove_entry(dir: &Ext2Inode, name: &str) -> Result<u32> {
    let entry = find_entry(dir, name)?.ok_or(Error::new(Errno::ENOENT))?;
    let fs = dir.fs_arc();
    let file_block = (entry.offset / BLOCK_SIZE) as u32;
    let in_block = entry.offset % BLOCK_SIZE;
    let block = dir.map_block(file_block, false)?;
    let bh = buffer::bread(fs.dev(), block, BLOCK_SIZE)?;
    bh.with_data(|data| {
        // Find the predecessor within the block.
        let mut pos = 0;
        let mut prev: Option<usize> = None;
        while pos < in_block {
            prev = Some(pos);
            pos += get_u16(data, pos + 4) as usize;
        }
        match prev {
            Some(prev_pos) => {
                let prev_rec = get_u16(data, prev_pos + 4) as usize;
                put_u16(data, prev_pos + 4, (prev_rec + entry.rec_len) as u16);
            }
            None => put_u32(data, in_block, 0),
        }
    });
    bh.mark_dirty();
    Ok(entry.ino)
}

pub(super) fn lookup(dir: &Ext2Inode, name: &str) -> Result<Arc<dyn Inode>> {
    if dir.typ() != InodeType::Dir {
        return_errno!(Errno::ENOTDIR);
    }
    let entry = find_entry(dir, name)?.ok_or(Error::new(Errno::ENOENT))?;
    Ok(dir.fs_arc().get_inode(entry.ino)? as Arc<dyn Inode>)
}

pub(super) fn create(
    dir: &Ext2Inode,
    name: &str,
    type_: InodeType,
    mode: InodeMode,
    rdev: DeviceId,
) -> Result<Arc<dyn Inode>> {
    if dir.typ() != InodeType::Dir {
        return_errno!(Errno::ENOTDIR);
    }
    if find_entry(dir, name)?.is_some() {
        return_errno!(Errno::EEXIST);
    }
    let fs = dir.fs_arc();
    let inode = Ext2Inode::new_on_disk(&fs, type_, mode, rdev)?;
    if type_ == InodeType::Dir {
        add_entry(&inode, ".", inode.ino_raw(), DirFileType::Dir)?;
        add_entry(&inode, "..", dir.ino_raw(), DirFileType::Dir)?;
        inode.inc_links()?; // "." counts
        dir.inc_links()?; // ".." counts
    }
    add_entry(dir, name, inode.ino_raw(), DirFileType::from_inode_type(type_))?;
    Ok(inode)
}

pub(super) fn link(dir: &Ext2Inode, old: &Arc<dyn Inode>, name: &str) -> Result<()> {
    let old = old
        .downcast_ref::<Ext2Inode>()
        .ok_or(Error::new(Errno::EXDEV))?;
    if old.typ() == InodeType::Dir {
        return_errno!(Errno::EPERM);
    }
    if find_entry(dir, name)?.is_some() {
        return_errno!(Errno::EEXIST);
    }
    add_entry(dir, name, old.ino_raw(), DirFileType::from_inode_type(old.typ()))?;
    old.inc_links()
}

pub(super) fn unlink(dir: &Ext2Inode, name: &str) -> Result<()> {
    if name == "." || name == ".." {
        return_errno!(Errno::EISDIR);
    }
    let fs = dir.fs_arc();
    let entry = find_entry(dir, name)?.ok_or(Error::new(Errno::ENOENT))?;
    let target = fs.get_inode(entry.ino)?;
    if target.typ() == InodeType::Dir {
        return_errno!(Errno::EISDIR);
    }
    remove_entry(dir, name)?;
    target.dec_links()
}

pub(super) fn rmdir(dir: &Ext2Inode, name: &str) -> Result<()> {
    let fs = dir.fs_arc();
    let entry = find_entry(dir, name)?.ok_or(Error::new(Errno::ENOENT))?;
    let target = fs.get_inode(entry.ino)?;
    if target.typ() != InodeType::Dir {
        return_errno!(Errno::ENOTDIR);
    }
    if !is_empty(&target)? {
        return_errno!(Errno::ENOTEMPTY);
    }
    remove_entry(dir, name)?;
    target.dec_links()?; // "."
    target.dec_links()?; // the entry itself
    dir.dec_links() // its ".."
}

pub(super) fn rename(
    dir: &Ext2Inode,
    old_name: &str,
    target: &Arc<dyn Inode>,
    new_name: &str,
) -> Result<()> {
    let target_dir = target
        .downcast_ref::<Ext2Inode>()
        .ok_or(Error::new(Errno::EXDEV))?;
    let fs = dir.fs_arc();
    let entry = find_entry(dir, old_name)?.ok_or(Error::new(Errno::ENOENT))?;
    if let Some(existing) = find_entry(target_dir, new_name)? {
        let displaced = fs.get_inode(existing.ino)?;
        remove_entry(target_dir, new_name)?;
        displaced.dec_links()?;
    }
    remove_entry(dir, old_name)?;
    let file_type = DirFileType::from_inode_type(DirFileType::to_inode_type(entry.file_type));
    add_entry(target_dir, new_name, entry.ino, file_type)?;
    let moved = fs.get_inode(entry.ino)?;
    if moved.typ() == InodeType::Dir && dir.ino_raw() != target_dir.ino_raw() {
        remove_entry(&moved, "..")?;
        add_entry(&moved, "..", target_dir.ino_raw(), DirFileType::Dir)?;
        dir.dec_links()?;
        target_dir.inc_links()?;
    }
    Ok(())
}

pub(super) fn readdir_at(
    dir: &Ext2Inode,
    offset: usize,
    visitor: &mut dyn DirentVisitor,
) -> Result<usize> {
    if dir.typ() != InodeType::Dir {
        return_errno!(Errno::ENOTDIR);
    }
    let mut next = offset;
    for_each_entry(dir, |entry| {
        if entry.offset < offset {
            return Ok(true);
        }
        let type_ = DirFileType::to_inode_type(entry.file_type);
        let after = entry.offset + entry.rec_len;
        visitor.visit(&entry.name, entry.ino as u64, type_, after)?;
        next = after;
        Ok(true)
    })?;
    Ok(next)
}

fn is_empty(dir: &Ext2Inode) -> Result<bool> {
    let mut count = 0;
    for_each_entry(dir, |entry| {
        if entry.name != "." && entry.name != ".." {
            count += 1;
        }
        Ok(true)
    })?;
    Ok(count == 0)
}
