//! Memory mapping sessions
//!
//! A mapping covers the whole buffer, page offset 0. Pages are handed out
//! on fault, pinned once per session and tagged with the session id.
//! Cloning a mapping models a forked VMA: the clones share one session,
//! and the session ends with the last handle.
//!
//! ```text
//!   map()           usage +1, mmap_count +1
//!   clone()         mmap_count +1
//!   drop (handle)   mmap_count -1
//!   drop (last)     unpin faulted pages, clear owners, usage -1
//! ```

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use msu_core::constants::PAGE_SIZE;
use msu_core::{MscError, MscRegisters, Result};

use crate::msc::Msc;
use crate::window::TraceBuffer;

/// Properties every mapping of the buffer carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags {
    /// Pages are mapped uncached
    pub noncached: bool,
    /// The mapping cannot grow
    pub dontexpand: bool,
    /// The mapping is not inherited on fork
    pub dontcopy: bool,
}

impl MapFlags {
    pub const TRACE: MapFlags = MapFlags {
        noncached: true,
        dontexpand: true,
        dontcopy: true,
    };
}

impl<R: MscRegisters> Msc<R> {
    /// Map the whole buffer.
    ///
    /// `len` must be the buffer size in bytes and `pgoff` must be 0.
    pub fn map(&self, len: usize, pgoff: usize) -> Result<MscMapping<'_, R>> {
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(MscError::InvalidArgument("mapping length must be a multiple of the page size"));
        }
        if pgoff != 0 {
            return Err(MscError::InvalidArgument("mapping must start at page offset 0"));
        }

        self.usage.acquire()?;
        let buffer = match self.checked_map_buffer(len / PAGE_SIZE) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.usage.release();
                return Err(e);
            }
        };

        let id = self.next_map_id.fetch_add(1, Ordering::Relaxed);
        self.mmap_count.fetch_add(1, Ordering::AcqRel);
        log::debug!("mapping {} created over {} page(s)", id, buffer.nr_pages());

        let faulted = (0..buffer.nr_pages()).map(|_| AtomicBool::new(false)).collect();
        Ok(MscMapping {
            session: Arc::new(MapSession {
                msc: self,
                buffer,
                id,
                faulted,
            }),
        })
    }

    fn checked_map_buffer(&self, nr_pages: usize) -> Result<Arc<TraceBuffer>> {
        let buffer = self.buffer().ok_or(MscError::NotReady)?;
        if !buffer.mode().has_buffer() {
            return Err(MscError::Unsupported(buffer.mode().raw()));
        }
        if nr_pages != buffer.nr_pages() {
            return Err(MscError::InvalidArgument("mapping size does not match the buffer"));
        }
        Ok(buffer)
    }
}

struct MapSession<'a, R: MscRegisters> {
    msc: &'a Msc<R>,
    buffer: Arc<TraceBuffer>,
    id: u64,
    /// Pages this session pinned
    faulted: Vec<AtomicBool>,
}

impl<R: MscRegisters> Drop for MapSession<'_, R> {
    fn drop(&mut self) {
        let inner = self.msc.lock();
        for (pgoff, faulted) in self.faulted.iter().enumerate() {
            if faulted.load(Ordering::Acquire) {
                if let Some(page) = self.buffer.get_page(pgoff) {
                    page.unpin();
                }
            }
        }
        for page in self.buffer.iter_pages() {
            page.clear_owner(self.id);
        }
        drop(inner);

        self.msc.usage.release();
        log::debug!("mapping {} closed", self.id);
    }
}

/// Handle to a mapping of the trace buffer
pub struct MscMapping<'a, R: MscRegisters> {
    session: Arc<MapSession<'a, R>>,
}

impl<R: MscRegisters> MscMapping<'_, R> {
    /// Session id stored as the owner of faulted pages
    pub fn id(&self) -> u64 {
        self.session.id
    }

    pub fn flags(&self) -> MapFlags {
        MapFlags::TRACE
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.session.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.buffer.is_empty()
    }

    /// Resolve a page fault at `pgoff`
    pub fn fault(&self, pgoff: usize) -> Result<NonNull<u8>> {
        let session = &self.session;
        let page = session.buffer.get_page(pgoff).ok_or(MscError::Fault(pgoff))?;
        let faulted = session.faulted.get(pgoff).ok_or(MscError::Fault(pgoff))?;

        if !faulted.swap(true, Ordering::AcqRel) {
            page.pin();
        }
        page.set_owner(session.id);
        Ok(page.as_ptr())
    }
}

impl<R: MscRegisters> Clone for MscMapping<'_, R> {
    fn clone(&self) -> Self {
        self.session.msc.mmap_count.fetch_add(1, Ordering::AcqRel);
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<R: MscRegisters> Drop for MscMapping<'_, R> {
    fn drop(&mut self) {
        self.session.msc.mmap_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MscConfig;
    use crate::memory::HeapPages;
    use crate::sim::SimRegisters;
    use msu_core::{Mode, UsageState};

    fn msc(mode: Mode, sizes: &[usize]) -> Msc<SimRegisters> {
        let config = MscConfig::new().mode(mode).nr_pages(sizes.to_vec());
        Msc::with_config(SimRegisters::new(), Arc::new(HeapPages::new()), &config).unwrap()
    }

    #[test]
    fn test_bad_arguments() {
        let m = msc(Mode::Multi, &[2]);
        assert!(matches!(m.map(0, 0), Err(MscError::InvalidArgument(_))));
        assert!(matches!(m.map(100, 0), Err(MscError::InvalidArgument(_))));
        assert!(matches!(m.map(2 * PAGE_SIZE, 1), Err(MscError::InvalidArgument(_))));
        assert!(matches!(m.map(PAGE_SIZE, 0), Err(MscError::InvalidArgument(_))));
        assert_eq!(m.usage(), UsageState::Idle);
        assert_eq!(m.mmap_count(), 0);
    }

    #[test]
    fn test_no_buffer() {
        let m = Msc::new(SimRegisters::new(), Arc::new(HeapPages::new()));
        assert!(matches!(m.map(PAGE_SIZE, 0), Err(MscError::NotReady)));
    }

    #[test]
    fn test_fault_pins_once() {
        let m = msc(Mode::Multi, &[2, 1]);
        let map = m.map(3 * PAGE_SIZE, 0).unwrap();
        assert_eq!(map.flags(), MapFlags::TRACE);
        assert_eq!(map.len(), 3 * PAGE_SIZE);
        assert_eq!(m.usage(), UsageState::InUse(1));

        let buf = m.buffer().unwrap();
        let ptr = map.fault(2).unwrap();
        assert_eq!(ptr, buf.windows()[1].block(0).as_ptr());
        map.fault(2).unwrap();

        let page = buf.get_page(2).unwrap();
        assert_eq!(page.pins(), 1);
        assert_eq!(page.owner(), Some(map.id()));
        assert_eq!(buf.get_page(0).unwrap().owner(), None);

        assert!(matches!(map.fault(3), Err(MscError::Fault(3))));
    }

    #[test]
    fn test_last_handle_ends_session() {
        let m = msc(Mode::Single, &[2]);
        let map = m.map(2 * PAGE_SIZE, 0).unwrap();
        let fork = map.clone();
        assert_eq!(m.mmap_count(), 2);

        fork.fault(0).unwrap();
        fork.fault(1).unwrap();
        assert_eq!(m.free_unless_used(), Err(MscError::Busy));

        drop(map);
        let buf = m.buffer().unwrap();
        assert_eq!(m.mmap_count(), 1);
        assert_eq!(buf.get_page(1).unwrap().owner(), Some(fork.id()));
        assert_eq!(m.usage(), UsageState::InUse(1));

        drop(fork);
        assert_eq!(m.mmap_count(), 0);
        assert_eq!(m.usage(), UsageState::Idle);
        assert!(buf.iter_pages().all(|p| p.owner().is_none() && p.pins() == 0));
    }

    #[test]
    fn test_sessions_keep_their_own_owners() {
        let m = msc(Mode::Multi, &[2]);
        let a = m.map(2 * PAGE_SIZE, 0).unwrap();
        let b = m.map(2 * PAGE_SIZE, 0).unwrap();
        assert_ne!(a.id(), b.id());

        a.fault(0).unwrap();
        b.fault(1).unwrap();
        drop(a);

        let buf = m.buffer().unwrap();
        assert_eq!(buf.get_page(0).unwrap().owner(), None);
        assert_eq!(buf.get_page(1).unwrap().owner(), Some(b.id()));
        assert_eq!(m.usage(), UsageState::InUse(1));
    }

    #[test]
    fn test_capture_while_mapped() {
        let m = msc(Mode::Multi, &[1]);
        let map = m.map(PAGE_SIZE, 0).unwrap();
        m.activate().unwrap();
        assert_eq!(m.usage(), UsageState::InUse(2));
        m.deactivate();
        drop(map);
        m.free_unless_used().unwrap();
    }
}
