//! The process pseudo-filesystem: every leaf renders live kernel
//! state at read time.

mod render;

use core::time::Duration;

use crate::{
    fs::utils::{
        DirentVisitor, FileSystem, FsFlags, FsStats, Inode, InodeMode, InodeType, Metadata,
        NAME_MAX,
    },
    prelude::*,
    process::{table, Pid},
};

pub const PROC_MAGIC: u64 = 0x9fa0;
const BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobalLeaf {
    Cpuinfo,
    Meminfo,
    Uptime,
    Loadavg,
    Filesystems,
    Version,
    Mounts,
}

const GLOBAL_LEAVES: [(&str, GlobalLeaf); 7] = [
    ("cpuinfo", GlobalLeaf::Cpuinfo),
    ("meminfo", GlobalLeaf::Meminfo),
    ("uptime", GlobalLeaf::Uptime),
    ("loadavg", GlobalLeaf::Loadavg),
    ("filesystems", GlobalLeaf::Filesystems),
    ("version", GlobalLeaf::Version),
    ("mounts", GlobalLeaf::Mounts),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PidLeaf {
    Stat,
    Status,
    Cmdline,
    Environ,
    Statm,
}

const PID_LEAVES: [(&str, PidLeaf); 5] = [
    ("stat", PidLeaf::Stat),
    ("status", PidLeaf::Status),
    ("cmdline", PidLeaf::Cmdline),
    ("environ", PidLeaf::Environ),
    ("statm", PidLeaf::Statm),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcNode {
    Root,
    SelfLink,
    Global(GlobalLeaf),
    PidDir(Pid),
    PidLeaf(Pid, PidLeaf),
}

pub struct ProcFS {
    this: Weak<ProcFS>,
}

impl ProcFS {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self { this: this.clone() })
    }

    fn make_inode(&self, node: ProcNode) -> Arc<ProcInode> {
        Arc::new(ProcInode {
            fs: self.this.clone(),
            node,
        })
    }
}

impl FileSystem for ProcFS {
    fn root_inode(&self) -> Arc<dyn Inode> {
        self.make_inode(ProcNode::Root)
    }

    fn stats(&self) -> FsStats {
        FsStats::new(PROC_MAGIC, BLOCK_SIZE, NAME_MAX)
    }

    fn flags(&self) -> FsFlags {
        FsFlags::READ_ONLY
    }
}

struct ProcInode {
    fs: Weak<ProcFS>,
    node: ProcNode,
}

impl ProcInode {
    fn render(&self) -> Result<String> {
        match self.node {
            ProcNode::Root | ProcNode::PidDir(_) => return_errno!(Errno::EISDIR),
            ProcNode::SelfLink => return_errno!(Errno::EINVAL),
            ProcNode::Global(leaf) => Ok(render::global(leaf)),
            ProcNode::PidLeaf(pid, leaf) => {
                let process = table::get(pid).ok_or(Error::new(Errno::ENOENT))?;
                Ok(render::pid_leaf(&process, leaf))
            }
        }
    }

    fn ino_of(node: ProcNode) -> u64 {
        match node {
            ProcNode::Root => 1,
            ProcNode::SelfLink => 2,
            ProcNode::Global(leaf) => 0x100 + leaf as u64,
            ProcNode::PidDir(pid) => (pid as u64) << 16,
            ProcNode::PidLeaf(pid, leaf) => ((pid as u64) << 16) | (1 + leaf as u64),
        }
    }
}

impl Inode for ProcInode {
    fn ino(&self) -> u64 {
        Self::ino_of(self.node)
    }

    fn type_(&self) -> InodeType {
        match self.node {
            ProcNode::Root | ProcNode::PidDir(_) => InodeType::Dir,
            ProcNode::SelfLink => InodeType::SymLink,
            _ => InodeType::File,
        }
    }

    fn size(&self) -> usize {
        0
    }

    fn fs(&self) -> Arc<dyn FileSystem> {
        self.fs.upgrade().unwrap()
    }

    fn metadata(&self) -> Metadata {
        let mode = match self.type_() {
            InodeType::Dir => InodeMode::from_bits_truncate(0o555),
            InodeType::SymLink => InodeMode::from_bits_truncate(0o777),
            _ => InodeMode::from_bits_truncate(0o444),
        };
        let (secs, nanos) = crate::time::wall_clock();
        let now = Duration::new(secs, nanos);
        Metadata {
            dev: 0,
            ino: self.ino(),
            size: 0,
            blk_size: BLOCK_SIZE,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            type_: self.type_(),
            mode,
            nlinks: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
        }
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let content = self.render()?;
        let bytes = content.as_bytes();
        if offset >= bytes.len() {
            return Ok(0);
        }
        let len = buf.len().min(bytes.len() - offset);
        buf[..len].copy_from_slice(&bytes[offset..offset + len]);
        Ok(len)
    }

    fn write_at(&self, _offset: usize, _buf: &[u8]) -> Result<usize> {
        return_errno!(Errno::EPERM)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>> {
        let fs = self.fs.upgrade().unwrap();
        match self.node {
            ProcNode::Root => {
                if name == "self" {
                    return Ok(fs.make_inode(ProcNode::SelfLink));
                }
                if let Some((_, leaf)) = GLOBAL_LEAVES.iter().find(|(n, _)| *n == name) {
                    return Ok(fs.make_inode(ProcNode::Global(*leaf)));
                }
                let pid: Pid = name.parse().map_err(|_| Error::new(Errno::ENOENT))?;
                if table::get(pid).is_none() {
                    return_errno!(Errno::ENOENT);
                }
                Ok(fs.make_inode(ProcNode::PidDir(pid)))
            }
            ProcNode::PidDir(pid) => {
                let (_, leaf) = PID_LEAVES
                    .iter()
                    .find(|(n, _)| *n == name)
                    .ok_or(Error::new(Errno::ENOENT))?;
                Ok(fs.make_inode(ProcNode::PidLeaf(pid, *leaf)))
            }
            _ => return_errno!(Errno::ENOTDIR),
        }
    }

    fn readdir_at(&self, offset: usize, visitor: &mut dyn DirentVisitor) -> Result<usize> {
        let entries: Vec<(String, ProcNode)> = match self.node {
            ProcNode::Root => {
                let mut entries: Vec<(String, ProcNode)> = vec![
                    (String::from("self"), ProcNode::SelfLink),
                ];
                for (name, leaf) in GLOBAL_LEAVES {
                    entries.push((String::from(name), ProcNode::Global(leaf)));
                }
                table::for_each(|process| {
                    entries.push((
                        alloc::format!("{}", process.pid()),
                        ProcNode::PidDir(process.pid()),
                    ));
                });
                entries
            }
            ProcNode::PidDir(pid) => PID_LEAVES
                .iter()
                .map(|(name, leaf)| (String::from(*name), ProcNode::PidLeaf(pid, *leaf)))
                .collect(),
            _ => return_errno!(Errno::ENOTDIR),
        };
        let mut next = offset;
        for (idx, (name, node)) in entries.iter().enumerate() {
            if idx < offset {
                continue;
            }
            let type_ = match node {
                ProcNode::PidDir(_) => InodeType::Dir,
                ProcNode::SelfLink => InodeType::SymLink,
                _ => InodeType::File,
            };
            visitor.visit(name, Self::ino_of(*node), type_, idx + 1)?;
            next = idx + 1;
        }
        Ok(next)
    }

    fn read_link(&self) -> Result<String> {
        match self.node {
            ProcNode::SelfLink => Ok(alloc::format!("{}", current!().pid())),
            _ => return_errno!(Errno::EINVAL),
        }
    }
}
