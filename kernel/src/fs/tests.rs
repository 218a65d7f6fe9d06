//! Whole-VFS tests: path resolution, mounts, symlinks and the
//! open/read/write/unlink round trip over a private mount tree.

use super::{
    fs_resolver::{FsPath, FsResolver, AT_FDCWD},
    path::{MountNode, Path},
    ramfs::RamFS,
    utils::{FileSystem, InodeMode, InodeType},
};
use crate::{fs::file_handle::FileLike, prelude::*};

fn fresh_resolver() -> FsResolver {
    crate::mm::test_util::ensure_mm_init();
    let mount = MountNode::new_root(RamFS::new());
    FsResolver::new_with_root(Path::new_fs_root(mount))
}

fn fs_path(path: &str) -> FsPath<'_> {
    FsPath::new(AT_FDCWD, path).unwrap()
}

const O_CREAT: u32 = 0o100;
const O_RDWR: u32 = 2;
const O_RDONLY: u32 = 0;

#[test]
fn file_round_trip_then_enoent() {
    let resolver = fresh_resolver();
    resolver
        .lookup(&fs_path("/"))
        .unwrap()
        .create("a", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
        .unwrap();

    let file = resolver
        .open(&fs_path("/a/b"), O_CREAT | O_RDWR, 0o644)
        .unwrap();
    assert_eq!(file.write(b"hello\n").unwrap(), 6);
    drop(file);

    let file = resolver.open(&fs_path("/a/b"), O_RDONLY, 0).unwrap();
    let mut buf = [0u8; 6];
    assert_eq!(file.read(&mut buf).unwrap(), 6);
    assert_eq!(&buf, b"hello\n");
    drop(file);

    let (dir, name) = resolver.lookup_dir_and_base(&fs_path("/a/b")).unwrap();
    dir.dentry().unlink(name).unwrap();
    assert_eq!(
        resolver.open(&fs_path("/a/b"), O_RDONLY, 0).unwrap_err().error(),
        Errno::ENOENT
    );
}

#[test]
fn dot_and_dotdot_navigate() {
    let resolver = fresh_resolver();
    let root = resolver.lookup(&fs_path("/")).unwrap();
    root.create("x", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
        .unwrap()
        .create("y", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
        .unwrap();
    let via_dots = resolver.lookup(&fs_path("/x/y/../../x/./y")).unwrap();
    assert_eq!(via_dots.abs_path(), "/x/y");
    // ".." above the root stays at the root.
    let rooted = resolver.lookup(&fs_path("/../../x")).unwrap();
    assert_eq!(rooted.abs_path(), "/x");
}

#[test]
fn mount_redirects_and_umount_restores() {
    let resolver = fresh_resolver();
    let root = resolver.lookup(&fs_path("/")).unwrap();
    root.create("mnt", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
        .unwrap();
    let mnt = resolver.lookup(&fs_path("/mnt")).unwrap();
    mnt.mount(RamFS::new() as Arc<dyn FileSystem>).unwrap();

    // New lookups land in the mounted filesystem's root.
    let inside = resolver.lookup(&fs_path("/mnt")).unwrap();
    inside
        .create("on-sub", InodeType::File, InodeMode::from_bits_truncate(0o644))
        .unwrap();
    assert!(resolver.lookup(&fs_path("/mnt/on-sub")).is_ok());
    // ".." from the mount root crosses back to the parent fs.
    let back = resolver.lookup(&fs_path("/mnt/..")).unwrap();
    assert_eq!(back.abs_path(), "/");

    resolver.lookup(&fs_path("/mnt")).unwrap().umount().unwrap();
    assert_eq!(
        resolver.lookup(&fs_path("/mnt/on-sub")).unwrap_err().error(),
        Errno::ENOENT
    );
}

#[test]
fn symlinks_follow_and_loop_detection() {
    let resolver = fresh_resolver();
    let root = resolver.lookup(&fs_path("/")).unwrap();
    root.create("dir", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
        .unwrap()
        .create("target", InodeType::File, InodeMode::from_bits_truncate(0o644))
        .unwrap();
    resolver
        .lookup(&fs_path("/"))
        .unwrap()
        .symlink("lnk", "/dir/target")
        .unwrap();
    let via_link = resolver.lookup(&fs_path("/lnk")).unwrap();
    assert_eq!(via_link.type_(), InodeType::File);
    // lookup_no_follow stops at the link itself.
    let link_itself = resolver.lookup_no_follow(&fs_path("/lnk")).unwrap();
    assert_eq!(link_itself.type_(), InodeType::SymLink);

    // Two links chasing each other exhaust the depth limit.
    root.create("s1", InodeType::SymLink, InodeMode::from_bits_truncate(0o777))
        .unwrap()
        .inode()
        .write_link("/s2")
        .unwrap();
    root.create("s2", InodeType::SymLink, InodeMode::from_bits_truncate(0o777))
        .unwrap()
        .inode()
        .write_link("/s1")
        .unwrap();
    assert_eq!(
        resolver.lookup(&fs_path("/s1")).unwrap_err().error(),
        Errno::ELOOP
    );
}

#[test]
fn o_excl_and_o_directory_enforced() {
    let resolver = fresh_resolver();
    resolver
        .open(&fs_path("/f"), O_CREAT | O_RDWR, 0o600)
        .unwrap();
    const O_EXCL: u32 = 0o200;
    assert_eq!(
        resolver
            .open(&fs_path("/f"), O_CREAT | O_EXCL | O_RDWR, 0o600)
            .unwrap_err()
            .error(),
        Errno::EEXIST
    );
    const O_DIRECTORY: u32 = 0o200000;
    assert_eq!(
        resolver
            .open(&fs_path("/f"), O_DIRECTORY | O_RDONLY, 0)
            .unwrap_err()
            .error(),
        Errno::ENOTDIR
    );
}

#[test]
fn dentry_cache_returns_one_identity() {
    let resolver = fresh_resolver();
    resolver
        .open(&fs_path("/same"), O_CREAT | O_RDWR, 0o600)
        .unwrap();
    let a = resolver.lookup(&fs_path("/same")).unwrap();
    let b = resolver.lookup(&fs_path("/same")).unwrap();
    assert!(Arc::ptr_eq(a.dentry(), b.dentry()));
    assert!(Arc::ptr_eq(a.inode(), b.inode()));
}
