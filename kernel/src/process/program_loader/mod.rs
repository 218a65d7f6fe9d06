//! Binary-format handling for `execve`: ELF first, `#!` scripts on
//! top, and the transactional address-space swap.

pub mod elf;
mod init_stack;
mod shebang;

pub use init_stack::InitStackLayout;

use crate::{
    arch::UserContext,
    fs::{
        fs_resolver::{FsPath, FsResolver, AT_FDCWD},
        utils::InodeType,
    },
    mm::Vm,
    prelude::*,
};

const MAX_INTERP_DEPTH: usize = 4;

/// The result of loading a program into a fresh address space.
pub struct LoadedProgram {
    pub vm: Arc<Vm>,
    pub entry: Vaddr,
    pub user_sp: Vaddr,
}

impl core::fmt::Debug for LoadedProgram {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoadedProgram")
            .field("entry", &self.entry)
            .field("user_sp", &self.user_sp)
            .finish()
    }
}

/// Resolve, load and stack-build `path` into a new address space.
/// The caller swaps it in only on success, so a failed exec leaves
/// the old image untouched.
pub fn load_program(
    resolver: &FsResolver,
    path: &str,
    argv: Vec<CString>,
    envp: Vec<CString>,
) -> Result<LoadedProgram> {
    load_with_depth(resolver, path, argv, envp, 0)
}

fn load_with_depth(
    resolver: &FsResolver,
    path: &str,
    argv: Vec<CString>,
    envp: Vec<CString>,
    depth: usize,
) -> Result<LoadedProgram> {
    if depth > MAX_INTERP_DEPTH {
        return_errno_with_message!(Errno::ELOOP, "interpreter chain too deep");
    }
    let location = resolver.lookup(&FsPath::new(AT_FDCWD, path)?)?;
    if location.type_() != InodeType::File {
        return_errno!(Errno::EACCES);
    }
    crate::fs::fs_resolver::may_access(&location.inode().metadata(), false, false, true)?;

    let inode = location.inode().clone();
    let size = inode.size();
    let mut image = vec![0u8; size];
    let read = inode.read_at(0, &mut image)?;
    image.truncate(read);

    if let Some((interp, arg)) = shebang::parse(&image) {
        // Re-run with the script interpreter up front.
        let mut new_argv: Vec<CString> = Vec::new();
        new_argv.push(CString::new(interp.clone())?);
        if let Some(arg) = arg {
            new_argv.push(CString::new(arg)?);
        }
        new_argv.push(CString::new(path)?);
        new_argv.extend(argv.into_iter().skip(1));
        return load_with_depth(resolver, &interp, new_argv, envp, depth + 1);
    }

    elf::load(Arc::new(image), argv, envp)
}

/// Perform the whole exec on the current process: build new, swap,
/// release old.
pub fn do_execve(
    path: &str,
    argv: Vec<CString>,
    envp: Vec<CString>,
    ctx: &mut UserContext,
) -> Result<()> {
    let current = current!();
    let loaded = {
        let fs = current.fs();
        let resolver = fs.read();
        load_program(&resolver, path, argv, envp)?
    };

    // Past this point the exec succeeds.
    current.swap_vm(loaded.vm);
    current.file_table().lock().close_cloexec();
    current.sig_dispositions().lock().inherit_for_exec();
    current.sig_frames().lock().clear();

    let comm = path.rsplit('/').next().unwrap_or(path);
    current.set_comm(comm);
    current.set_executable_path(path);

    *ctx = UserContext::default();
    ctx.set_instruction_pointer(loaded.entry as u32);
    ctx.set_stack_pointer(loaded.user_sp as u32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fs::{
            file_table::FdFlags,
            path::{MountNode, Path},
            ramfs::RamFS,
            utils::{InodeMode, InodeType},
        },
        process::{self, ProcessBuilder},
    };

    fn rooted_resolver_with_binary(bytes: &[u8]) -> FsResolver {
        crate::mm::test_util::ensure_mm_init();
        let mount = MountNode::new_root(RamFS::new());
        let resolver = FsResolver::new_with_root(Path::new_fs_root(mount));
        let root = resolver.root().unwrap();
        let bin = root
            .create("bin", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
            .unwrap();
        let file = bin
            .create("true", InodeType::File, InodeMode::from_bits_truncate(0o755))
            .unwrap();
        file.inode().write_at(0, bytes).unwrap();
        resolver
    }

    #[test]
    fn execve_swaps_the_image_and_sweeps_cloexec() {
        let _guard = crate::mm::test_util::serialize_test();
        let image = super::elf::test_image(b"\xcd\x80");
        let resolver = rooted_resolver_with_binary(&image);

        let task = ProcessBuilder::new("pre-exec")
            .vm(crate::mm::Vm::new().unwrap())
            .fs(Arc::new(crate::sync::RwLock::new(resolver)))
            .build()
            .unwrap();
        let old_vm = task.vm().unwrap();
        {
            struct NullFile;
            impl crate::fs::file_handle::FileLike for NullFile {
                fn metadata(&self) -> crate::fs::utils::Metadata {
                    crate::fs::utils::Metadata::new_file(
                        0,
                        InodeMode::from_bits_truncate(0o666),
                        512,
                    )
                }
            }
            let table = task.file_table();
            let mut table = table.lock();
            table.insert(Arc::new(NullFile), FdFlags::empty()).unwrap();
            table.insert(Arc::new(NullFile), FdFlags::CLOEXEC).unwrap();
        }
        process::set_current(Some(task.clone()));

        let mut ctx = UserContext::default();
        ctx.eip = 0xdead;
        do_execve(
            "/bin/true",
            vec![CString::new("true").unwrap()],
            Vec::new(),
            &mut ctx,
        )
        .unwrap();

        // Fresh image: new address space, entry installed, cloexec
        // descriptor gone, the plain one kept.
        let new_vm = task.vm().unwrap();
        assert!(!Arc::ptr_eq(&old_vm, &new_vm));
        assert_ne!(ctx.eip, 0xdead);
        assert_eq!(task.comm(), "true");
        let table = task.file_table();
        let table = table.lock();
        assert!(table.get(0).is_ok());
        assert!(table.get(1).is_err());

        process::set_current(None);
        process::table::remove(task.pid());
    }

    #[test]
    fn execve_of_missing_file_leaves_the_old_image() {
        let _guard = crate::mm::test_util::serialize_test();
        let resolver = rooted_resolver_with_binary(b"unused");
        let task = ProcessBuilder::new("survivor")
            .vm(crate::mm::Vm::new().unwrap())
            .fs(Arc::new(crate::sync::RwLock::new(resolver)))
            .build()
            .unwrap();
        let old_vm = task.vm().unwrap();
        process::set_current(Some(task.clone()));

        let mut ctx = UserContext::default();
        let err = do_execve("/no/such/file", Vec::new(), Vec::new(), &mut ctx).unwrap_err();
        assert_eq!(err.error(), Errno::ENOENT);
        assert!(Arc::ptr_eq(&old_vm, &task.vm().unwrap()));

        process::set_current(None);
        process::table::remove(task.pid());
    }
}
