//! Per-process virtual address spaces.
//!
//! A `Vm` is a page table plus an ordered list of virtual memory
//! areas. VMAs are non-overlapping and sorted by start address; the
//! page table agrees with VMA protections except for pages that have
//! not faulted in yet, which are simply absent.

use core::mem;

use super::{
    frame::{Frame, ZoneId},
    page_align_down, page_align_up,
    page_table::{PageTable, PtFlags},
    Paddr, Vaddr, MMAP_BASE, PAGE_SIZE, USER_STACK_LIMIT, USER_TOP,
};
use crate::prelude::*;

bitflags! {
    pub struct VmPerms: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

bitflags! {
    pub struct VmaFlags: u32 {
        /// Writes are visible to every mapper (and survive fork).
        const SHARED     = 1 << 0;
        /// The area extends downward on faults just below it.
        const GROWS_DOWN = 1 << 1;
        /// Backing file may not be opened for writing meanwhile.
        const DENYWRITE  = 1 << 2;
    }
}

/// Demand-page source for file-backed areas; the VFS side adapts an
/// inode to this so the memory subsystem stays below the filesystem.
pub trait VmaFileBacking: Send + Sync {
    /// Fill `frame` with the page at byte `offset` of the backing
    /// object (short reads zero-fill, which the caller pre-arranges).
    fn read_page(&self, offset: usize, frame: &Frame) -> Result<()>;
}

#[derive(Clone)]
pub enum VmaBacking {
    Anonymous,
    File {
        file: Arc<dyn VmaFileBacking>,
        offset: usize,
    },
    /// Preallocated frames, one per page (System V shared memory).
    Frames(Arc<Vec<Frame>>),
}

impl Debug for VmaBacking {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmaBacking::Anonymous => write!(f, "Anonymous"),
            VmaBacking::File { offset, .. } => write!(f, "File {{ offset: {:#x} }}", offset),
            VmaBacking::Frames(frames) => write!(f, "Frames({})", frames.len()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Vma {
    pub start: Vaddr,
    pub end: Vaddr,
    pub perms: VmPerms,
    pub flags: VmaFlags,
    pub backing: VmaBacking,
}

impl Vma {
    fn contains(&self, addr: Vaddr) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Page source for the page holding `va`.
    fn page_frame(&self, va: Vaddr) -> Result<Frame> {
        let page_off = page_align_down(va) - self.start;
        match &self.backing {
            VmaBacking::Anonymous => Frame::alloc_zeroed(ZoneId::High),
            VmaBacking::File { file, offset } => {
                let frame = Frame::alloc_zeroed(ZoneId::High)?;
                file.read_page(offset + page_off, &frame)?;
                Ok(frame)
            }
            VmaBacking::Frames(frames) => frames
                .get(page_off / PAGE_SIZE)
                .cloned()
                .ok_or(Error::new(Errno::EFAULT)),
        }
    }

    fn pt_flags(&self) -> PtFlags {
        let mut flags = PtFlags::USER;
        if self.perms.contains(VmPerms::WRITE) {
            flags |= PtFlags::WRITABLE;
        }
        flags
    }
}

#[derive(Debug, Default, Clone)]
pub struct VmLayout {
    pub start_code: Vaddr,
    pub end_code: Vaddr,
    pub start_brk: Vaddr,
    pub brk: Vaddr,
    pub start_stack: Vaddr,
    pub arg_start: Vaddr,
    pub arg_end: Vaddr,
    pub env_start: Vaddr,
    pub env_end: Vaddr,
    pub entry: Vaddr,
}

struct VmInner {
    vmas: BTreeMap<Vaddr, Vma>,
    layout: VmLayout,
    rss: usize,
}

/// One task's address space.
pub struct Vm {
    pt: PageTable,
    inner: Mutex<VmInner>,
}

impl Vm {
    pub fn new() -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            pt: PageTable::new_user()?,
            inner: Mutex::new(VmInner {
                vmas: BTreeMap::new(),
                layout: VmLayout::default(),
                rss: 0,
            }),
        }))
    }

    pub fn pgd_paddr(&self) -> Paddr {
        self.pt.pgd_paddr()
    }

    pub fn rss(&self) -> usize {
        self.inner.lock().rss
    }

    pub fn layout(&self) -> VmLayout {
        self.inner.lock().layout.clone()
    }

    pub fn update_layout(&self, f: impl FnOnce(&mut VmLayout)) {
        f(&mut self.inner.lock().layout)
    }

    /// Install a new area. With `fixed`, `addr` is honored exactly and
    /// existing overlap is unmapped first; otherwise `addr` is a hint.
    pub fn map_region(
        &self,
        addr: Vaddr,
        len: usize,
        perms: VmPerms,
        flags: VmaFlags,
        backing: VmaBacking,
        fixed: bool,
    ) -> Result<Vaddr> {
        if len == 0 {
            return_errno_with_message!(Errno::EINVAL, "empty mapping");
        }
        let len = page_align_up(len);
        if fixed {
            if !super::is_page_aligned(addr) || addr + len > USER_TOP {
                return_errno!(Errno::EINVAL);
            }
            self.unmap_region(addr, len)?;
        }
        let mut inner = self.inner.lock();
        let start = if fixed {
            addr
        } else {
            inner.find_free(if addr == 0 { MMAP_BASE } else { addr }, len)?
        };
        let vma = Vma {
            start,
            end: start + len,
            perms,
            flags,
            backing,
        };
        inner.vmas.insert(start, vma);
        Ok(start)
    }

    /// Remove every mapping inside `[addr, addr + len)`, splitting
    /// areas that straddle the boundary.
    pub fn unmap_region(&self, addr: Vaddr, len: usize) -> Result<()> {
        if !super::is_page_aligned(addr) {
            return_errno!(Errno::EINVAL);
        }
        let end = addr + page_align_up(len);
        let mut inner = self.inner.lock();
        let overlapping: Vec<Vaddr> = inner
            .vmas
            .range(..end)
            .filter(|(_, vma)| vma.end > addr)
            .map(|(&start, _)| start)
            .collect();
        for key in overlapping {
            let vma = inner.vmas.remove(&key).unwrap();
            let (before, after) = split_vma(&vma, addr, end);
            if let Some(before) = before {
                inner.vmas.insert(before.start, before);
            }
            if let Some(after) = after {
                inner.vmas.insert(after.start, after);
            }
            let zap_start = vma.start.max(addr);
            let zap_end = vma.end.min(end);
            let dropped = zap_range(&self.pt, zap_start, zap_end);
            inner.rss = inner.rss.saturating_sub(dropped);
        }
        Ok(())
    }

    /// Change protections over `[addr, addr + len)`.
    pub fn protect_region(&self, addr: Vaddr, len: usize, perms: VmPerms) -> Result<()> {
        if !super::is_page_aligned(addr) {
            return_errno!(Errno::EINVAL);
        }
        let end = addr + page_align_up(len);
        let mut inner = self.inner.lock();
        let overlapping: Vec<Vaddr> = inner
            .vmas
            .range(..end)
            .filter(|(_, vma)| vma.end > addr)
            .map(|(&start, _)| start)
            .collect();
        for key in overlapping {
            let vma = inner.vmas.remove(&key).unwrap();
            let (before, after) = split_vma(&vma, addr, end);
            if let Some(before) = before {
                inner.vmas.insert(before.start, before);
            }
            if let Some(after) = after {
                inner.vmas.insert(after.start, after);
            }
            let mut middle = vma.clone();
            middle.start = vma.start.max(addr);
            middle.end = vma.end.min(end);
            middle.perms = perms;
            // Downgrade already-present pages; upgrades fault in later.
            let pt_flags = middle.pt_flags();
            let mut va = middle.start;
            while va < middle.end {
                self.pt.protect(va, pt_flags);
                va += PAGE_SIZE;
            }
            inner.vmas.insert(middle.start, middle);
        }
        Ok(())
    }

    /// Grow or shrink the program break; returns the new break.
    pub fn brk(&self, new_brk: Vaddr) -> Result<Vaddr> {
        let (start_brk, old_brk) = {
            let inner = self.inner.lock();
            (inner.layout.start_brk, inner.layout.brk)
        };
        if new_brk == 0 {
            return Ok(old_brk);
        }
        if new_brk < start_brk || new_brk >= MMAP_BASE {
            return_errno!(Errno::ENOMEM);
        }
        let old_end = page_align_up(old_brk);
        let new_end = page_align_up(new_brk);
        if new_end > old_end {
            self.map_region(
                old_end,
                new_end - old_end,
                VmPerms::READ | VmPerms::WRITE,
                VmaFlags::empty(),
                VmaBacking::Anonymous,
                true,
            )?;
        } else if new_end < old_end {
            self.unmap_region(new_end, old_end - new_end)?;
        }
        self.inner.lock().layout.brk = new_brk;
        Ok(new_brk)
    }

    /// Demand-page or protection-fault service. Returns `EFAULT` when
    /// the access is bad, in which case the trap path raises `SIGSEGV`.
    pub fn handle_page_fault(&self, addr: Vaddr, write: bool) -> Result<()> {
        if addr >= USER_TOP {
            return_errno!(Errno::EFAULT);
        }
        let va = page_align_down(addr);
        let vma = {
            let mut inner = self.inner.lock();
            match inner.vma_covering(addr) {
                Some(vma) => vma,
                None => inner.try_extend_stack(addr)?,
            }
        };
        if write && !vma.perms.contains(VmPerms::WRITE) {
            return_errno!(Errno::EFAULT);
        }
        if !write && !vma.perms.intersects(VmPerms::READ | VmPerms::EXEC) {
            return_errno!(Errno::EFAULT);
        }
        match self.pt.query(va) {
            None => {
                let frame = vma.page_frame(va)?;
                self.pt.map(va, frame, vma.pt_flags())?;
                self.inner.lock().rss += 1;
                Ok(())
            }
            Some((_, flags)) if write && !flags.contains(PtFlags::WRITABLE) => {
                // Write to a read-only page of a writable private area:
                // give the task its own copy.
                let old = self.pt.frame_at(va).unwrap();
                if old.ref_count() > 2 {
                    let fresh = Frame::alloc(ZoneId::High)?;
                    fresh.copy_from(&old);
                    self.pt.map(va, fresh, vma.pt_flags())?;
                } else {
                    self.pt.protect(va, vma.pt_flags());
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Duplicate this address space for fork: private pages are copied
    /// physically, shared areas alias the same frames.
    pub fn fork(&self) -> Result<Arc<Vm>> {
        let child = Vm::new()?;
        let inner = self.inner.lock();
        let mut child_inner = child.inner.lock();
        child_inner.layout = inner.layout.clone();
        for vma in inner.vmas.values() {
            child_inner.vmas.insert(vma.start, vma.clone());
            let shared = vma.flags.contains(VmaFlags::SHARED)
                || matches!(vma.backing, VmaBacking::Frames(_));
            let mut va = vma.start;
            while va < vma.end {
                if let Some(frame) = self.pt.frame_at(va) {
                    let (_, flags) = self.pt.query(va).unwrap();
                    if shared {
                        child.pt.map(va, frame, flags)?;
                    } else {
                        let copy = Frame::alloc(ZoneId::High)?;
                        copy.copy_from(&frame);
                        child.pt.map(va, copy, flags)?;
                    }
                    child_inner.rss += 1;
                }
                va += PAGE_SIZE;
            }
        }
        drop(child_inner);
        drop(inner);
        Ok(child)
    }

    /// Copy out of this address space, faulting pages in as needed.
    pub fn read_bytes(&self, mut va: Vaddr, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let frame = self.frame_for_access(va, false)?;
            let off = va % PAGE_SIZE;
            let chunk = (PAGE_SIZE - off).min(buf.len() - done);
            frame.read_bytes(off, &mut buf[done..done + chunk]);
            done += chunk;
            va += chunk;
        }
        Ok(())
    }

    /// Copy into this address space, faulting pages in as needed.
    pub fn write_bytes(&self, mut va: Vaddr, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let frame = self.frame_for_access(va, true)?;
            let off = va % PAGE_SIZE;
            let chunk = (PAGE_SIZE - off).min(buf.len() - done);
            frame.write_bytes(off, &buf[done..done + chunk]);
            done += chunk;
            va += chunk;
        }
        Ok(())
    }

    pub fn read_val<T: Copy>(&self, va: Vaddr) -> Result<T> {
        let mut val = mem::MaybeUninit::<T>::uninit();
        // SAFETY: the byte view covers exactly one T and every byte is
        // written before assume_init.
        unsafe {
            let buf =
                core::slice::from_raw_parts_mut(val.as_mut_ptr() as *mut u8, mem::size_of::<T>());
            self.read_bytes(va, buf)?;
            Ok(val.assume_init())
        }
    }

    pub fn write_val<T: Copy>(&self, va: Vaddr, val: &T) -> Result<()> {
        // SAFETY: plain byte view of a live T.
        let buf = unsafe {
            core::slice::from_raw_parts(val as *const T as *const u8, mem::size_of::<T>())
        };
        self.write_bytes(va, buf)
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    pub fn read_cstring(&self, va: Vaddr, max: usize) -> Result<CString> {
        let mut bytes = Vec::new();
        for i in 0..max {
            let byte: u8 = self.read_val(va + i)?;
            if byte == 0 {
                return Ok(CString::new(bytes)?);
            }
            bytes.push(byte);
        }
        return_errno_with_message!(Errno::ENAMETOOLONG, "unterminated user string")
    }

    fn frame_for_access(&self, va: Vaddr, write: bool) -> Result<Frame> {
        if va >= USER_TOP {
            return_errno!(Errno::EFAULT);
        }
        let page = page_align_down(va);
        let needs_fault = match self.pt.query(page) {
            None => true,
            Some((_, flags)) => write && !flags.contains(PtFlags::WRITABLE),
        };
        if needs_fault {
            self.handle_page_fault(va, write).map_err(|_| {
                Error::with_message(Errno::EFAULT, "bad user address")
            })?;
        }
        self.pt.frame_at(page).ok_or(Error::new(Errno::EFAULT))
    }

    /// Snapshot of the area list (procfs maps, diagnostics).
    pub fn vma_snapshot(&self) -> Vec<Vma> {
        self.inner.lock().vmas.values().cloned().collect()
    }
}

impl VmInner {
    fn vma_covering(&self, addr: Vaddr) -> Option<Vma> {
        self.vmas
            .range(..=addr)
            .next_back()
            .filter(|(_, vma)| vma.contains(addr))
            .map(|(_, vma)| vma.clone())
    }

    /// A fault just below a grows-down area extends it.
    fn try_extend_stack(&mut self, addr: Vaddr) -> Result<Vma> {
        let above = self
            .vmas
            .range(addr..)
            .next()
            .map(|(&start, _)| start)
            .ok_or(Error::new(Errno::EFAULT))?;
        let vma = self.vmas.get(&above).unwrap();
        if !vma.flags.contains(VmaFlags::GROWS_DOWN) {
            return_errno!(Errno::EFAULT);
        }
        let new_start = page_align_down(addr);
        if vma.end - new_start > USER_STACK_LIMIT {
            return_errno!(Errno::EFAULT);
        }
        // No growing into the neighbour below.
        if let Some((_, below)) = self.vmas.range(..above).next_back() {
            if below.end > new_start {
                return_errno!(Errno::EFAULT);
            }
        }
        let mut vma = self.vmas.remove(&above).unwrap();
        vma.start = new_start;
        self.vmas.insert(new_start, vma.clone());
        Ok(vma)
    }

    fn find_free(&mut self, hint: Vaddr, len: usize) -> Result<Vaddr> {
        let hint = page_align_up(hint.max(MMAP_BASE));
        let mut candidate = hint;
        loop {
            if candidate + len > USER_TOP {
                return_errno_with_message!(Errno::ENOMEM, "address space exhausted");
            }
            let conflict = self
                .vmas
                .range(..candidate + len)
                .next_back()
                .filter(|(_, vma)| vma.end > candidate);
            match conflict {
                None => return Ok(candidate),
                Some((_, vma)) => candidate = page_align_up(vma.end),
            }
        }
    }
}

/// The pieces of `vma` outside `[cut_start, cut_end)`.
fn split_vma(vma: &Vma, cut_start: Vaddr, cut_end: Vaddr) -> (Option<Vma>, Option<Vma>) {
    let before = (vma.start < cut_start).then(|| {
        let mut v = vma.clone();
        v.end = cut_start;
        v
    });
    let after = (vma.end > cut_end).then(|| {
        let mut v = vma.clone();
        let delta = cut_end - v.start;
        if let VmaBacking::File { offset, .. } = &mut v.backing {
            *offset += delta;
        }
        v.start = cut_end;
        v
    });
    (before, after)
}

fn zap_range(pt: &PageTable, start: Vaddr, end: Vaddr) -> usize {
    let mut dropped = 0;
    let mut va = start;
    while va < end {
        if pt.unmap(va).is_some() {
            dropped += 1;
        }
        va += PAGE_SIZE;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_util::ensure_mm_init;

    fn anon_vm() -> Arc<Vm> {
        ensure_mm_init();
        Vm::new().unwrap()
    }

    #[test]
    fn demand_paging_zero_fills() {
        let vm = anon_vm();
        let addr = vm
            .map_region(
                0,
                2 * PAGE_SIZE,
                VmPerms::READ | VmPerms::WRITE,
                VmaFlags::empty(),
                VmaBacking::Anonymous,
                false,
            )
            .unwrap();
        let mut buf = [0xffu8; 16];
        vm.read_bytes(addr + 100, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(vm.rss(), 1);
    }

    #[test]
    fn rw_roundtrip_across_page_boundary() {
        let vm = anon_vm();
        let addr = vm
            .map_region(
                0,
                2 * PAGE_SIZE,
                VmPerms::READ | VmPerms::WRITE,
                VmaFlags::empty(),
                VmaBacking::Anonymous,
                false,
            )
            .unwrap();
        let span = addr + PAGE_SIZE - 3;
        vm.write_bytes(span, b"abcdef").unwrap();
        let mut buf = [0u8; 6];
        vm.read_bytes(span, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn fault_outside_any_vma_is_efault() {
        let vm = anon_vm();
        assert_eq!(
            vm.handle_page_fault(0x7000_0000, false).unwrap_err().error(),
            Errno::EFAULT
        );
    }

    #[test]
    fn write_fault_on_readonly_vma_is_efault() {
        let vm = anon_vm();
        let addr = vm
            .map_region(
                0,
                PAGE_SIZE,
                VmPerms::READ,
                VmaFlags::empty(),
                VmaBacking::Anonymous,
                false,
            )
            .unwrap();
        assert_eq!(
            vm.handle_page_fault(addr, true).unwrap_err().error(),
            Errno::EFAULT
        );
    }

    #[test]
    fn fork_copies_private_pages() {
        let vm = anon_vm();
        let addr = vm
            .map_region(
                0,
                PAGE_SIZE,
                VmPerms::READ | VmPerms::WRITE,
                VmaFlags::empty(),
                VmaBacking::Anonymous,
                false,
            )
            .unwrap();
        vm.write_bytes(addr, b"parent").unwrap();
        let child = vm.fork().unwrap();

        // Byte-equal at the fork instant.
        let mut buf = [0u8; 6];
        child.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        // Writes on either side stay invisible to the other.
        child.write_bytes(addr, b"child!").unwrap();
        vm.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        vm.write_bytes(addr, b"paren2").unwrap();
        child.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"child!");
    }

    #[test]
    fn fork_shares_shared_pages() {
        let vm = anon_vm();
        let addr = vm
            .map_region(
                0,
                PAGE_SIZE,
                VmPerms::READ | VmPerms::WRITE,
                VmaFlags::SHARED,
                VmaBacking::Anonymous,
                false,
            )
            .unwrap();
        vm.write_bytes(addr, b"one").unwrap();
        let child = vm.fork().unwrap();
        child.write_bytes(addr, b"two").unwrap();
        let mut buf = [0u8; 3];
        vm.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"two");
    }

    #[test]
    fn unmap_splits_straddling_vma() {
        let vm = anon_vm();
        let addr = vm
            .map_region(
                0,
                3 * PAGE_SIZE,
                VmPerms::READ | VmPerms::WRITE,
                VmaFlags::empty(),
                VmaBacking::Anonymous,
                false,
            )
            .unwrap();
        vm.write_bytes(addr, b"a").unwrap();
        vm.write_bytes(addr + 2 * PAGE_SIZE, b"c").unwrap();
        vm.unmap_region(addr + PAGE_SIZE, PAGE_SIZE).unwrap();
        // Outer pages still reachable, middle gone.
        let mut buf = [0u8; 1];
        vm.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"a");
        vm.read_bytes(addr + 2 * PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(&buf, b"c");
        assert_eq!(
            vm.handle_page_fault(addr + PAGE_SIZE, false)
                .unwrap_err()
                .error(),
            Errno::EFAULT
        );
    }

    #[test]
    fn grows_down_extends_on_nearby_fault() {
        let vm = anon_vm();
        let top = 0xb000_0000;
        vm.map_region(
            top - 2 * PAGE_SIZE,
            2 * PAGE_SIZE,
            VmPerms::READ | VmPerms::WRITE,
            VmaFlags::GROWS_DOWN,
            VmaBacking::Anonymous,
            true,
        )
        .unwrap();
        let below = top - 3 * PAGE_SIZE + 8;
        vm.write_bytes(below, b"stack").unwrap();
        let mut buf = [0u8; 5];
        vm.read_bytes(below, &mut buf).unwrap();
        assert_eq!(&buf, b"stack");
    }

    #[test]
    fn brk_grows_and_shrinks() {
        let vm = anon_vm();
        vm.update_layout(|l| {
            l.start_brk = 0x0900_0000;
            l.brk = 0x0900_0000;
        });
        let new = vm.brk(0x0900_2000).unwrap();
        assert_eq!(new, 0x0900_2000);
        vm.write_bytes(0x0900_1000, b"heap").unwrap();
        let back = vm.brk(0x0900_0000).unwrap();
        assert_eq!(back, 0x0900_0000);
        assert!(vm.handle_page_fault(0x0900_1000, false).is_err());
    }
}
