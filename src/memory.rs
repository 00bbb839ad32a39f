//! Linear memory.

use crate::{
    memory_units::{Bytes, Pages},
    module::Limits,
    Error,
};
use alloc::{format, rc::Rc, string::String, vec::Vec};
use core::{cell::RefCell, fmt, ops::Range};
use wasmint_core::LittleEndianConvert;

/// Size of a page of linear memory - 64KiB.
///
/// The size of a memory is always an integer multiple of a page size.
pub const LINEAR_MEMORY_PAGE_SIZE: Bytes = Bytes(65536);

/// Maximal number of pages of a linear memory (4 GiB).
pub const LINEAR_MEMORY_MAX_PAGES: Pages = Pages(65536);

/// Reference to a linear memory (see [`MemoryInstance`] for details).
///
/// This reference has reference-counting semantics: an instance that imports
/// a memory and the instance that created it hold the same allocation.
#[derive(Clone, Debug)]
pub struct MemoryRef(Rc<MemoryInstance>);

impl ::core::ops::Deref for MemoryRef {
    type Target = MemoryInstance;
    fn deref(&self) -> &MemoryInstance {
        &self.0
    }
}

/// Runtime representation of a linear memory (or `memory` for short).
///
/// A memory is a contiguous, mutable array of raw bytes. Wasm code can load
/// and store values from/to a linear memory at any byte address; an access
/// outside the bounds of the current size traps.
///
/// A memory is created with an initial size and can be grown dynamically up
/// to its declared maximum and the embedder's pages limit. Wasm provides no
/// way to shrink a memory.
pub struct MemoryInstance {
    limits: Limits,
    buffer: RefCell<Vec<u8>>,
    maximum: Option<Pages>,
    /// Hard cap applied on top of the declared maximum, at most
    /// [`LINEAR_MEMORY_MAX_PAGES`].
    pages_limit: Pages,
}

impl fmt::Debug for MemoryInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryInstance")
            .field("limits", &self.limits)
            .field("buffer.len", &self.buffer.borrow().len())
            .field("maximum", &self.maximum)
            .field("pages_limit", &self.pages_limit)
            .finish()
    }
}

impl MemoryInstance {
    /// Allocates a memory instance with `initial` pages, zero filled.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `initial` is greater than `maximum`, or either is
    /// greater than `65536` pages.
    pub fn alloc(initial: Pages, maximum: Option<Pages>) -> Result<MemoryRef, Error> {
        Self::alloc_with_pages_limit(initial, maximum, LINEAR_MEMORY_MAX_PAGES)
    }

    /// Allocates a memory instance with an embedder-supplied hard cap on
    /// growth.
    ///
    /// The cap behaves exactly like a declared maximum: `memory.grow` beyond
    /// it fails and reports `-1` to the running program.
    pub fn alloc_with_pages_limit(
        initial: Pages,
        maximum: Option<Pages>,
        pages_limit: Pages,
    ) -> Result<MemoryRef, Error> {
        validate_memory(initial, maximum).map_err(Error::Memory)?;
        if pages_limit > LINEAR_MEMORY_MAX_PAGES {
            return Err(Error::Memory(format!(
                "pages limit {} is larger than the 65536 page address space",
                pages_limit.0
            )));
        }

        let limits = Limits::new(initial.0 as u32, maximum.map(|p| p.0 as u32));
        let initial_size: Bytes = initial.into();
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(initial_size.0)
            .map_err(|_| Error::Memory(format!("cannot allocate {} bytes", initial_size.0)))?;
        buffer.resize(initial_size.0, 0u8);

        Ok(MemoryRef(Rc::new(MemoryInstance {
            limits,
            buffer: RefCell::new(buffer),
            maximum,
            pages_limit,
        })))
    }

    /// Returns the linear memory limits declared by the module.
    pub(crate) fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Returns the number of pages this memory was created with.
    pub fn initial(&self) -> Pages {
        Pages(self.limits.initial() as usize)
    }

    /// Returns the maximum number of pages this memory may grow to, if a
    /// maximum was declared.
    pub fn maximum(&self) -> Option<Pages> {
        self.maximum
    }

    /// Returns the embedder's hard cap on growth.
    pub fn pages_limit(&self) -> Pages {
        self.pages_limit
    }

    /// Returns the current size, always a whole number of pages.
    pub fn current_size(&self) -> Pages {
        Pages(self.buffer.borrow().len() / LINEAR_MEMORY_PAGE_SIZE.0)
    }

    /// Reads a little-endian value of type `T` at `offset`.
    pub fn get_value<T: LittleEndianConvert>(&self, offset: u32) -> Result<T, Error> {
        let buffer = self.buffer.borrow();
        let mut bytes = T::Bytes::default();
        let range = self.checked_region(&buffer, offset, bytes.as_ref().len())?;
        bytes.as_mut().copy_from_slice(&buffer[range]);
        Ok(T::from_le_bytes(bytes))
    }

    /// Writes a value of type `T` at `offset` in little-endian byte order.
    pub fn set_value<T: LittleEndianConvert>(&self, offset: u32, value: T) -> Result<(), Error> {
        let mut buffer = self.buffer.borrow_mut();
        let bytes = value.into_le_bytes();
        let range = self.checked_region(&buffer, offset, bytes.as_ref().len())?;
        buffer[range].copy_from_slice(bytes.as_ref());
        Ok(())
    }

    /// Copies `size` bytes starting at `offset` into a fresh buffer.
    pub fn get(&self, offset: u32, size: usize) -> Result<Vec<u8>, Error> {
        let buffer = self.buffer.borrow();
        let range = self.checked_region(&buffer, offset, size)?;
        Ok(buffer[range].to_vec())
    }

    /// Copies bytes starting at `offset` into `target`, filling it entirely.
    pub fn get_into(&self, offset: u32, target: &mut [u8]) -> Result<(), Error> {
        let buffer = self.buffer.borrow();
        let range = self.checked_region(&buffer, offset, target.len())?;
        target.copy_from_slice(&buffer[range]);
        Ok(())
    }

    /// Copies the bytes of `value` into memory starting at `offset`.
    pub fn set(&self, offset: u32, value: &[u8]) -> Result<(), Error> {
        let mut buffer = self.buffer.borrow_mut();
        let range = self.checked_region(&buffer, offset, value.len())?;
        buffer[range].copy_from_slice(value);
        Ok(())
    }

    /// Grows the memory by `additional` pages, zero filling the new bytes.
    ///
    /// Returns the page count from before the grow, which is exactly what
    /// `memory.grow` pushes on success.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the new size would exceed the declared maximum, the
    /// embedder's pages limit, the 4 GiB address space, or if the host
    /// cannot provide the backing allocation. A failed grow leaves the
    /// memory unchanged.
    pub fn grow(&self, additional: Pages) -> Result<Pages, Error> {
        let size_before = self.current_size();
        let new_size = Pages(size_before.0 + additional.0);

        let effective_limit = match self.maximum {
            Some(maximum) if maximum.0 < self.pages_limit.0 => maximum,
            _ => self.pages_limit,
        };
        if new_size.0 > effective_limit.0 {
            return Err(Error::Memory(format!(
                "trying to grow memory by {} pages when already have {}",
                additional.0, size_before.0,
            )));
        }

        let new_bytes: Bytes = new_size.into();
        let mut buffer = self.buffer.borrow_mut();
        let len = buffer.len();
        buffer
            .try_reserve_exact(new_bytes.0 - len)
            .map_err(|_| Error::Memory(format!("cannot allocate {} bytes", new_bytes.0)))?;
        buffer.resize(new_bytes.0, 0u8);
        Ok(size_before)
    }

    // The whole-access bounds predicate. `offset` and `size` both fit in 33
    // bits, so the sum cannot wrap in u64.
    fn checked_region(
        &self,
        buffer: &[u8],
        offset: u32,
        size: usize,
    ) -> Result<Range<usize>, Error> {
        let end = offset as u64 + size as u64;
        if end > buffer.len() as u64 {
            return Err(Error::Memory(format!(
                "trying to access region [{}..{}] in memory [0..{}]",
                offset,
                end,
                buffer.len(),
            )));
        }
        Ok(offset as usize..end as usize)
    }
}

/// Checks that `initial` and `maximum` describe an allocatable memory.
pub fn validate_memory(initial: Pages, maximum: Option<Pages>) -> Result<(), String> {
    if initial > LINEAR_MEMORY_MAX_PAGES {
        return Err(format!(
            "initial memory size must be at most {} pages",
            LINEAR_MEMORY_MAX_PAGES.0
        ));
    }
    if let Some(maximum) = maximum {
        if initial > maximum {
            return Err(format!(
                "maximum limit {} is less than minimum {}",
                maximum.0, initial.0,
            ));
        }
        if maximum > LINEAR_MEMORY_MAX_PAGES {
            return Err(format!(
                "maximum memory size must be at most {} pages",
                LINEAR_MEMORY_MAX_PAGES.0
            ));
        }
    }
    Ok(())
}
