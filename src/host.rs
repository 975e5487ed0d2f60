use std::ptr::NonNull;

use crate::utils::align;

/// Boundary through which the pool obtains and returns real memory.
///
/// The pool never calls a general-purpose allocator itself; every page comes
/// from this trait and goes back through it, always at page grain. Supplying
/// the host at construction keeps the platform syscalls out of the engines
/// and lets tests inject doubles that fail on demand or record every page
/// movement.
pub trait HostMemory {
    /// Requests a region of at least `bytes`. Returns the base address or
    /// `None` if the underlying provider fails. The returned memory must be
    /// zero-initialized.
    fn acquire(&mut self, bytes: usize, tag: &str) -> Option<NonNull<u8>>;

    /// Returns the region of `bytes` starting at `addr` back to the provider.
    /// `bytes` is always the same value the region was acquired with.
    fn release(&mut self, addr: NonNull<u8>, bytes: usize);

    /// Pins the region against swapping. Best effort; returns `false` if the
    /// provider cannot pin it.
    fn lock(&mut self, addr: NonNull<u8>, bytes: usize) -> bool;
}

/// Host backed by the operating system's virtual memory interface.
///
/// On Unix this is `mmap`/`munmap`/`mlock`; on Windows it is
/// `VirtualAlloc`/`VirtualFree`/`VirtualLock`. Requests are rounded up to the
/// OS page size on both the acquire and release sides, so the pool can keep
/// accounting in its own exact byte sizes.
pub struct SystemHost {
    page_size: usize,
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            page_size: sys::page_size(),
        }
    }

    /// Virtual memory page size of the machine. Usually 4096.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemory for SystemHost {
    fn acquire(&mut self, bytes: usize, _tag: &str) -> Option<NonNull<u8>> {
        let len = align(bytes, self.page_size);
        unsafe { sys::request_memory(len) }
    }

    fn release(&mut self, addr: NonNull<u8>, bytes: usize) {
        let len = align(bytes, self.page_size);
        unsafe { sys::return_memory(addr.as_ptr(), len) }
    }

    fn lock(&mut self, addr: NonNull<u8>, bytes: usize) -> bool {
        let len = align(bytes, self.page_size);
        unsafe { sys::lock_memory(addr.as_ptr(), len) }
    }
}

#[cfg(unix)]
mod sys {
    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    use libc::{mmap, munmap, off_t, size_t};

    pub unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // mmap parameters.
        const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
        // Read-Write only memory.
        const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
        const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        const FD: c_int = -1;
        const OFFSET: off_t = 0;

        unsafe {
            let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

            match addr {
                libc::MAP_FAILED => None,
                addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
            }
        }
    }

    pub unsafe fn return_memory(addr: *mut u8, len: usize) {
        unsafe {
            munmap(addr as *mut c_void, len as size_t);
        }
    }

    pub unsafe fn lock_memory(addr: *mut u8, len: usize) -> bool {
        unsafe { libc::mlock(addr as *const c_void, len as size_t) == 0 }
    }

    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
    }
}

#[cfg(windows)]
mod sys {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    pub unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;
        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        unsafe {
            let addr = Memory::VirtualAlloc(None, len, flags, protection);

            NonNull::new(addr.cast())
        }
    }

    pub unsafe fn return_memory(addr: *mut u8, _len: usize) {
        unsafe {
            let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
        }
    }

    pub unsafe fn lock_memory(addr: *mut u8, len: usize) -> bool {
        unsafe { Memory::VirtualLock(addr as *const c_void, len).is_ok() }
    }

    pub fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

/// Heap-backed hosts for exercising the pool without touching the platform
/// memory interface.
#[cfg(test)]
pub(crate) mod testing {
    use std::{
        alloc::{Layout, alloc_zeroed, dealloc},
        cell::RefCell,
        ptr::NonNull,
        rc::Rc,
    };

    use super::HostMemory;

    /// Everything a [`TestHost`] has done, shared with the test body.
    #[derive(Default)]
    pub struct HostLog {
        pub acquired: Vec<(usize, usize)>,
        pub released: Vec<(usize, usize)>,
    }

    impl HostLog {
        pub fn live_regions(&self) -> usize {
            self.acquired.len() - self.released.len()
        }
    }

    /// Host double that serves pages from the process heap and records every
    /// acquire and release. `budget` bounds how many acquires succeed and
    /// `lock_ok` decides whether pinning succeeds.
    pub struct TestHost {
        pub log: Rc<RefCell<HostLog>>,
        pub budget: usize,
        pub lock_ok: bool,
    }

    impl TestHost {
        pub fn new() -> (Self, Rc<RefCell<HostLog>>) {
            Self::with_budget(usize::MAX)
        }

        pub fn with_budget(budget: usize) -> (Self, Rc<RefCell<HostLog>>) {
            let log = Rc::new(RefCell::new(HostLog::default()));
            (
                Self {
                    log: Rc::clone(&log),
                    budget,
                    lock_ok: true,
                },
                log,
            )
        }

        fn layout(bytes: usize) -> Layout {
            Layout::from_size_align(bytes.max(1), 16).unwrap()
        }
    }

    impl HostMemory for TestHost {
        fn acquire(&mut self, bytes: usize, _tag: &str) -> Option<NonNull<u8>> {
            if self.budget == 0 {
                return None;
            }
            self.budget -= 1;

            // SAFETY: the layout has non-zero size and a valid alignment.
            let addr = NonNull::new(unsafe { alloc_zeroed(Self::layout(bytes)) })?;
            self.log.borrow_mut().acquired.push((addr.as_ptr() as usize, bytes));
            Some(addr)
        }

        fn release(&mut self, addr: NonNull<u8>, bytes: usize) {
            self.log.borrow_mut().released.push((addr.as_ptr() as usize, bytes));
            // SAFETY: `addr`/`bytes` always match a prior acquire.
            unsafe { dealloc(addr.as_ptr(), Self::layout(bytes)) };
        }

        fn lock(&mut self, _addr: NonNull<u8>, _bytes: usize) -> bool {
            self.lock_ok
        }
    }
}
