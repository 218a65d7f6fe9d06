//! Per-object file page cache.
//!
//! Maps page indices of one backing object (an inode, in practice) to
//! resident frames, serving `mmap` and demand reads. Every cache is
//! registered globally so the frame allocator's reclaim hook can trim
//! clean, unmapped pages when memory runs short.

use core::ops::Range;

use lru::LruCache;

use super::{
    frame::{Frame, ZoneId},
    PAGE_SHIFT, PAGE_SIZE,
};
use crate::prelude::*;

/// The object behind a page cache.
pub trait PageCacheBackend: Send + Sync {
    /// Fill `frame` with page `idx` of the object.
    fn read_page(&self, idx: usize, frame: &Frame) -> Result<()>;
    /// Persist `frame` as page `idx` of the object.
    fn write_page(&self, idx: usize, frame: &Frame) -> Result<()>;
    /// Number of pages the object currently spans.
    fn npages(&self) -> usize;
}

struct CachedPage {
    frame: Frame,
    dirty: bool,
}

pub struct PageCache {
    pages: SpinLock<LruCache<usize, CachedPage>>,
    backend: Weak<dyn PageCacheBackend>,
}

lazy_static! {
    static ref ALL_CACHES: SpinLock<Vec<Weak<PageCache>>> = SpinLock::new(Vec::new());
}

impl PageCache {
    pub fn new(backend: Weak<dyn PageCacheBackend>) -> Arc<Self> {
        let cache = Arc::new(Self {
            pages: SpinLock::new(LruCache::unbounded()),
            backend,
        });
        let mut all = ALL_CACHES.lock_irq_disabled();
        all.retain(|weak| weak.strong_count() > 0);
        all.push(Arc::downgrade(&cache));
        cache
    }

    fn backend(&self) -> Result<Arc<dyn PageCacheBackend>> {
        self.backend
            .upgrade()
            .ok_or(Error::with_message(Errno::EIO, "page cache backend is gone"))
    }

    /// The resident frame for page `idx`, reading it in on a miss.
    pub fn get_page(&self, idx: usize) -> Result<Frame> {
        if let Some(page) = self.pages.lock_irq_disabled().get(&idx) {
            return Ok(page.frame.clone());
        }
        let backend = self.backend()?;
        if idx >= backend.npages() {
            return_errno!(Errno::EINVAL);
        }
        let frame = Frame::alloc_zeroed(ZoneId::High)?;
        backend.read_page(idx, &frame)?;
        self.pages.lock_irq_disabled().put(
            idx,
            CachedPage {
                frame: frame.clone(),
                dirty: false,
            },
        );
        Ok(frame)
    }

    pub fn mark_dirty(&self, idx: usize) {
        if let Some(page) = self.pages.lock_irq_disabled().get_mut(&idx) {
            page.dirty = true;
        }
    }

    /// Write dirty pages in `range` back and drop them from the cache.
    pub fn evict_range(&self, range: Range<usize>) -> Result<()> {
        let page_range = (range.start >> PAGE_SHIFT)..range.end.div_ceil(PAGE_SIZE);
        let backend = self.backend()?;
        for idx in page_range {
            let evicted = self.pages.lock_irq_disabled().pop(&idx);
            if let Some(page) = evicted {
                if page.dirty {
                    backend.write_page(idx, &page.frame)?;
                }
            }
        }
        Ok(())
    }

    /// Drop pages in `range` without writing them back (truncate).
    pub fn discard_range(&self, range: Range<usize>) {
        let page_range = (range.start >> PAGE_SHIFT)..range.end.div_ceil(PAGE_SIZE);
        let mut pages = self.pages.lock_irq_disabled();
        for idx in page_range {
            pages.pop(&idx);
        }
    }

    /// Write every dirty page back, keeping pages resident.
    pub fn sync(&self) -> Result<()> {
        let backend = self.backend()?;
        let mut pages = self.pages.lock_irq_disabled();
        for (idx, page) in pages.iter_mut() {
            if page.dirty {
                backend.write_page(*idx, &page.frame)?;
                page.dirty = false;
            }
        }
        Ok(())
    }

    /// Drop clean pages not mapped anywhere else; returns frames freed.
    fn shrink(&self) -> usize {
        let mut pages = self.pages.lock_irq_disabled();
        let before = pages.len();
        let keep: Vec<(usize, CachedPage)> = {
            let mut kept = Vec::new();
            while let Some((idx, page)) = pages.pop_lru() {
                if page.dirty || page.frame.ref_count() > 1 {
                    kept.push((idx, page));
                }
            }
            kept
        };
        let dropped = before - keep.len();
        for (idx, page) in keep {
            pages.put(idx, page);
        }
        dropped
    }

    pub fn resident_pages(&self) -> usize {
        self.pages.lock_irq_disabled().len()
    }
}

/// Reclaim hook: trim every live cache, LRU-first.
pub fn shrink_caches() -> usize {
    let caches: Vec<Arc<PageCache>> = {
        let mut all = ALL_CACHES.lock_irq_disabled();
        all.retain(|weak| weak.strong_count() > 0);
        all.iter().filter_map(|weak| weak.upgrade()).collect()
    };
    caches.iter().map(|cache| cache.shrink()).sum()
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::mm::test_util::ensure_mm_init;

    struct CountingBackend {
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl PageCacheBackend for CountingBackend {
        fn read_page(&self, idx: usize, frame: &Frame) -> Result<()> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            frame.write_bytes(0, &[idx as u8; 8]);
            Ok(())
        }

        fn write_page(&self, _idx: usize, _frame: &Frame) -> Result<()> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn npages(&self) -> usize {
            4
        }
    }

    fn new_backend() -> Arc<CountingBackend> {
        Arc::new(CountingBackend {
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    #[test]
    fn hit_does_not_reread() {
        ensure_mm_init();
        let backend = new_backend();
        let cache = PageCache::new(Arc::downgrade(&backend) as Weak<dyn PageCacheBackend>);
        let a = cache.get_page(1).unwrap();
        let b = cache.get_page(1).unwrap();
        assert_eq!(a.pfn(), b.pfn());
        assert_eq!(backend.reads.load(Ordering::Relaxed), 1);
        let mut buf = [0u8; 8];
        b.read_bytes(0, &mut buf);
        assert_eq!(buf, [1u8; 8]);
    }

    #[test]
    fn out_of_range_page_is_einval() {
        ensure_mm_init();
        let backend = new_backend();
        let cache = PageCache::new(Arc::downgrade(&backend) as Weak<dyn PageCacheBackend>);
        assert_eq!(cache.get_page(9).unwrap_err().error(), Errno::EINVAL);
    }

    #[test]
    fn sync_writes_only_dirty_pages() {
        ensure_mm_init();
        let backend = new_backend();
        let cache = PageCache::new(Arc::downgrade(&backend) as Weak<dyn PageCacheBackend>);
        let _ = cache.get_page(0).unwrap();
        let _ = cache.get_page(1).unwrap();
        cache.mark_dirty(1);
        cache.sync().unwrap();
        assert_eq!(backend.writes.load(Ordering::Relaxed), 1);
        // A second sync has nothing left to do.
        cache.sync().unwrap();
        assert_eq!(backend.writes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn shrink_keeps_dirty_and_mapped() {
        ensure_mm_init();
        let backend = new_backend();
        let cache = PageCache::new(Arc::downgrade(&backend) as Weak<dyn PageCacheBackend>);
        let held = cache.get_page(0).unwrap();
        let _ = cache.get_page(1).unwrap();
        let _ = cache.get_page(2).unwrap();
        cache.mark_dirty(2);
        let freed = cache.shrink();
        assert_eq!(freed, 1);
        assert_eq!(cache.resident_pages(), 2);
        drop(held);
    }
}
