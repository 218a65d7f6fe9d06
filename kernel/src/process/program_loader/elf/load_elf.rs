//! Map an ELF image into a fresh address space.
//!
//! Segments are copied in eagerly, matching the fork strategy; the
//! final protections are applied after the copy so read-only text
//! still loads. Dynamic executables are loaded at a fixed bias and
//! their interpreter, when requested, above that.

use xmas_elf::{
    header,
    program::{self, ProgramHeader},
    ElfFile,
};

use super::{super::init_stack, *};
use crate::{
    mm::{
        page_align_down, page_align_up, Vm, VmPerms, VmaBacking, VmaFlags, PAGE_SIZE, USER_TOP,
    },
    prelude::*,
    process::program_loader::LoadedProgram,
};

/// Load bias for ET_DYN main executables.
const DYN_BASE: Vaddr = 0x0800_0000;
/// The interpreter lands well above the main image.
const INTERP_BASE: Vaddr = 0x4000_0000;
/// Initial stack allocation; the VMA grows down to the rlimit.
const STACK_INIT_PAGES: usize = 16;

struct LoadedImage {
    entry: Vaddr,
    phdr_addr: Vaddr,
    phnum: u16,
    phent: u16,
    max_end: Vaddr,
    interp: Option<String>,
}

fn parse_perms(flags: program::Flags) -> VmPerms {
    let mut perms = VmPerms::empty();
    if flags.is_read() {
        perms |= VmPerms::READ;
    }
    if flags.is_write() {
        perms |= VmPerms::WRITE;
    }
    if flags.is_execute() {
        perms |= VmPerms::EXEC;
    }
    perms
}

/// Map one parsed ELF file at `bias`.
fn map_image(vm: &Arc<Vm>, image: &[u8], elf: &ElfFile, bias: Vaddr) -> Result<LoadedImage> {
    let pt1 = &elf.header.pt1;
    if pt1.class() != header::Class::ThirtyTwo {
        return_errno_with_message!(Errno::ENOEXEC, "not a 32-bit executable");
    }
    if pt1.data() != header::Data::LittleEndian {
        return_errno_with_message!(Errno::ENOEXEC, "wrong byte order");
    }
    match elf.header.pt2.machine().as_machine() {
        header::Machine::X86 => {}
        _ => return_errno_with_message!(Errno::ENOEXEC, "wrong machine"),
    }
    match elf.header.pt2.type_().as_type() {
        header::Type::Executable | header::Type::SharedObject => {}
        _ => return_errno_with_message!(Errno::ENOEXEC, "not an executable"),
    }

    let phoff = elf.header.pt2.ph_offset() as usize;
    let mut max_end = 0;
    let mut phdr_addr = 0;
    let mut interp = None;

    for ph in elf.program_iter() {
        let ProgramHeader::Ph32(ph) = ph else {
            return_errno!(Errno::ENOEXEC);
        };
        match ph.get_type() {
            Ok(program::Type::Interp) => {
                let start = ph.offset as usize;
                let end = start + ph.file_size as usize;
                let raw = image
                    .get(start..end)
                    .ok_or(Error::new(Errno::ENOEXEC))?;
                let path = core::str::from_utf8(raw)?
                    .trim_end_matches('\0')
                    .to_string();
                interp = Some(path);
            }
            Ok(program::Type::Load) => {
                let va = bias + ph.virtual_addr as usize;
                let offset = ph.offset as usize;
                let filesz = ph.file_size as usize;
                let memsz = ph.mem_size as usize;
                if memsz == 0 {
                    continue;
                }
                let map_start = page_align_down(va);
                let map_end = page_align_up(va + memsz);
                if map_end > USER_TOP {
                    return_errno!(Errno::ENOMEM);
                }
                // Copy in writable first, then drop to the declared
                // protections.
                vm.map_region(
                    map_start,
                    map_end - map_start,
                    VmPerms::READ | VmPerms::WRITE,
                    VmaFlags::empty(),
                    VmaBacking::Anonymous,
                    true,
                )?;
                let bytes = image
                    .get(offset..offset + filesz)
                    .ok_or(Error::new(Errno::ENOEXEC))?;
                vm.write_bytes(va, bytes)?;
                // The fractional page past file data is already zero
                // (fresh anonymous pages), as is the rest of the BSS.
                vm.protect_region(map_start, map_end - map_start, parse_perms(ph.flags))?;
                max_end = max_end.max(map_end);
                // The program headers live inside some loaded segment.
                if phoff >= offset && phoff < offset + filesz {
                    phdr_addr = va + (phoff - offset);
                }
            }
            _ => {}
        }
    }

    Ok(LoadedImage {
        entry: bias + elf.header.pt2.entry_point() as usize,
        phdr_addr,
        phnum: elf.header.pt2.ph_count(),
        phent: elf.header.pt2.ph_entry_size(),
        max_end,
        interp,
    })
}

/// Load `image` (plus its interpreter, if dynamic) into a new address
/// space and build the initial stack.
pub fn load(
    image: Arc<Vec<u8>>,
    argv: Vec<CString>,
    envp: Vec<CString>,
) -> Result<LoadedProgram> {
    let elf = ElfFile::new(&image).map_err(|_| Error::new(Errno::ENOEXEC))?;
    let bias = match elf.header.pt2.type_().as_type() {
        header::Type::SharedObject => DYN_BASE,
        _ => 0,
    };
    let vm = Vm::new()?;
    let main = map_image(&vm, &image, &elf, bias)?;

    // Dynamic binaries enter through their interpreter.
    let (entry, interp_base) = match &main.interp {
        Some(path) => {
            let current = crate::process::current_opt()
                .ok_or(Error::with_message(Errno::ENOENT, "no fs context for interp"))?;
            let fs = current.fs();
            let resolver = fs.read();
            let location = resolver.lookup(&crate::fs::fs_resolver::FsPath::new(
                crate::fs::fs_resolver::AT_FDCWD,
                path,
            )?)?;
            let inode = location.inode().clone();
            let mut interp_image = vec![0u8; inode.size()];
            let read = inode.read_at(0, &mut interp_image)?;
            interp_image.truncate(read);
            let interp_elf =
                ElfFile::new(&interp_image).map_err(|_| Error::new(Errno::ENOEXEC))?;
            let loaded = map_image(&vm, &interp_image, &interp_elf, INTERP_BASE)?;
            (loaded.entry, INTERP_BASE)
        }
        None => (main.entry, 0),
    };

    // The stack sits just below the top of user space.
    let stack_len = STACK_INIT_PAGES * PAGE_SIZE;
    vm.map_region(
        USER_TOP - stack_len,
        stack_len,
        VmPerms::READ | VmPerms::WRITE,
        VmaFlags::GROWS_DOWN,
        VmaBacking::Anonymous,
        true,
    )?;

    // One initial heap page, brk right after the image.
    let start_brk = page_align_up(main.max_end) + PAGE_SIZE;
    vm.map_region(
        start_brk,
        PAGE_SIZE,
        VmPerms::READ | VmPerms::WRITE,
        VmaFlags::empty(),
        VmaBacking::Anonymous,
        true,
    )?;

    let creds_aux = {
        match crate::process::current_opt() {
            Some(current) => {
                let creds = current.creds();
                (creds.uid(), creds.euid(), creds.gid(), creds.egid())
            }
            None => (0, 0, 0, 0),
        }
    };
    let auxv: Vec<(u32, u32)> = vec![
        (AT_PAGESZ, PAGE_SIZE as u32),
        (AT_PHDR, main.phdr_addr as u32),
        (AT_PHENT, main.phent as u32),
        (AT_PHNUM, main.phnum as u32),
        (AT_BASE, interp_base as u32),
        (AT_FLAGS, 0),
        (AT_ENTRY, main.entry as u32),
        (AT_UID, creds_aux.0),
        (AT_EUID, creds_aux.1),
        (AT_GID, creds_aux.2),
        (AT_EGID, creds_aux.3),
    ];
    let stack = init_stack::build(&vm, USER_TOP, &argv, &envp, &auxv)?;

    vm.update_layout(|layout| {
        layout.entry = entry;
        layout.start_brk = start_brk + PAGE_SIZE;
        layout.brk = start_brk + PAGE_SIZE;
        layout.start_stack = stack.user_sp;
        layout.arg_start = stack.arg_start;
        layout.arg_end = stack.arg_end;
        layout.env_start = stack.env_start;
        layout.env_end = stack.env_end;
    });

    Ok(LoadedProgram {
        vm,
        entry,
        user_sp: stack.user_sp,
    })
}

/// A minimal 32-bit x86 ET_EXEC image: one PT_LOAD covering the whole
/// file plus a little BSS. Test scaffolding shared with the exec
/// tests.
#[cfg(test)]
pub(crate) fn test_image(payload: &[u8]) -> Vec<u8> {
    const EHSIZE: usize = 52;
    const PHSIZE: usize = 32;
    let vaddr: u32 = 0x0804_8000;
    let filesz = (EHSIZE + PHSIZE + payload.len()) as u32;
    let mut image = vec![0u8; EHSIZE + PHSIZE];
    image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    image[4] = 1; // 32-bit
    image[5] = 1; // little endian
    image[6] = 1; // version
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    image[18..20].copy_from_slice(&3u16.to_le_bytes()); // EM_386
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..28].copy_from_slice(&(vaddr + (EHSIZE + PHSIZE) as u32).to_le_bytes());
    image[28..32].copy_from_slice(&(EHSIZE as u32).to_le_bytes()); // phoff
    image[40..42].copy_from_slice(&(EHSIZE as u16).to_le_bytes()); // ehsize
    image[42..44].copy_from_slice(&(PHSIZE as u16).to_le_bytes()); // phentsize
    image[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum
    // Program header: PT_LOAD.
    let ph = EHSIZE;
    image[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes());
    image[ph + 4..ph + 8].copy_from_slice(&0u32.to_le_bytes()); // offset
    image[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes());
    image[ph + 12..ph + 16].copy_from_slice(&vaddr.to_le_bytes());
    image[ph + 16..ph + 20].copy_from_slice(&filesz.to_le_bytes());
    image[ph + 20..ph + 24].copy_from_slice(&(filesz + 64).to_le_bytes()); // bss
    image[ph + 24..ph + 28].copy_from_slice(&7u32.to_le_bytes()); // rwx
    image[ph + 28..ph + 32].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
    image.extend_from_slice(payload);
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_segments_stack_and_auxv() {
        let _guard = crate::mm::test_util::serialize_test();
        let image = test_image(b"\xcd\x80payload");
        let argv = vec![CString::new("true").unwrap()];
        let envp = vec![CString::new("TERM=ansi").unwrap()];
        let loaded = load(Arc::new(image), argv, envp).unwrap();

        // Entry points at the payload.
        assert_eq!(loaded.entry, 0x0804_8000 + 52 + 32);
        let mut word = [0u8; 2];
        loaded.vm.read_bytes(loaded.entry, &mut word).unwrap();
        assert_eq!(&word, b"\xcd\x80");

        // BSS beyond the file reads back zero.
        let mut bss = [0xffu8; 8];
        loaded
            .vm
            .read_bytes(0x0804_8000 + 52 + 32 + 9, &mut bss)
            .unwrap();
        assert!(bss.iter().all(|&b| b == 0));

        // Stack: argc, then the argv pointer resolves to "true".
        let argc: u32 = loaded.vm.read_val(loaded.user_sp).unwrap();
        assert_eq!(argc, 1);
        let argv0_ptr: u32 = loaded.vm.read_val(loaded.user_sp + 4).unwrap();
        let argv0 = loaded.vm.read_cstring(argv0_ptr as usize, 64).unwrap();
        assert_eq!(argv0.as_bytes(), b"true");
        let null_after_argv: u32 = loaded.vm.read_val(loaded.user_sp + 8).unwrap();
        assert_eq!(null_after_argv, 0);
    }

    #[test]
    fn rejects_foreign_binaries() {
        let _guard = crate::mm::test_util::serialize_test();
        let mut image = test_image(b"x");
        image[18] = 40; // EM_ARM
        let err = load(
            Arc::new(image),
            vec![CString::new("a").unwrap()],
            Vec::new(),
        )
        .unwrap_err();
        assert_eq!(err.error(), Errno::ENOEXEC);
    }
}
