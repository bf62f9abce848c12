use crate::elements::Limits;
use crate::memory_units::{Bytes, Pages, RoundUpTo};
use crate::value::LittleEndianConvert;
use crate::Error;
use core::cell::RefCell;
use core::fmt;
use core::ops::Range;
use std::rc::Rc;

/// Size of a page of [linear memory][`MemoryInstance`] - 64KiB.
///
/// The size of a memory is always an integer multiple of a page size.
pub const LINEAR_MEMORY_PAGE_SIZE: Bytes = Bytes(65536);

/// Maximal number of pages.
const LINEAR_MEMORY_MAX_PAGES: Pages = Pages(65536);

/// Reference to a memory (See [`MemoryInstance`] for details).
///
/// This reference has a reference-counting semantics.
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
/// and store values from/to a linear memory at any byte address. A trap
/// occurs if an access is not within the bounds of the current memory size.
///
/// A memory is created zeroed, with an initial size in whole
/// [pages][`LINEAR_MEMORY_PAGE_SIZE`], and can be grown up to its optional
/// maximum. Wasm doesn't provide any way to shrink a memory.
pub struct MemoryInstance {
    limits: Limits,
    buffer: RefCell<Vec<u8>>,
    initial: Pages,
    maximum: Option<Pages>,
}

impl fmt::Debug for MemoryInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryInstance")
            .field("limits", &self.limits)
            .field("buffer.len", &self.buffer.borrow().len())
            .field("initial", &self.initial)
            .field("maximum", &self.maximum)
            .finish()
    }
}

fn validate_memory(initial: Pages, maximum: Option<Pages>) -> Result<(), String> {
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

impl MemoryInstance {
    /// Allocate a memory instance.
    ///
    /// The memory is allocated with the initial number of pages specified by
    /// `initial`, all bytes zeroed. `maximum`, when given, limits how far
    /// [`grow`][`MemoryInstance::grow`] can take it; without it the memory
    /// can grow up to 4GiB (65536 pages of 64KiB).
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    ///
    /// - `initial` is greater than `maximum`
    /// - either `initial` or `maximum` is greater than `65536`.
    pub fn alloc(initial: Pages, maximum: Option<Pages>) -> Result<MemoryRef, Error> {
        validate_memory(initial, maximum).map_err(Error::Memory)?;

        let memory = MemoryInstance::new(initial, maximum);
        Ok(MemoryRef(Rc::new(memory)))
    }

    fn new(initial: Pages, maximum: Option<Pages>) -> Self {
        let limits = Limits::new(initial.0 as u32, maximum.map(|p| p.0 as u32));

        let initial_size: Bytes = initial.into();
        MemoryInstance {
            limits,
            buffer: RefCell::new(vec![0; initial_size.0]),
            initial,
            maximum,
        }
    }

    /// Return linear memory limits.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Returns number of pages this `MemoryInstance` was created with.
    pub fn initial(&self) -> Pages {
        self.initial
    }

    /// Returns maximum amount of pages this `MemoryInstance` can grow to.
    ///
    /// Returns `None` if there is no limit set.
    pub fn maximum(&self) -> Option<Pages> {
        self.maximum
    }

    /// Returns current linear memory size.
    ///
    /// # Example
    ///
    /// To convert number of pages to number of bytes you can use the
    /// following code:
    ///
    /// ```rust
    /// use wasmite::MemoryInstance;
    /// use wasmite::memory_units::*;
    ///
    /// let memory = MemoryInstance::alloc(Pages(1), None).unwrap();
    /// let byte_size: Bytes = memory.current_size().into();
    /// assert_eq!(byte_size, Bytes(65536));
    /// ```
    pub fn current_size(&self) -> Pages {
        Bytes(self.buffer.borrow().len()).round_up_to()
    }

    /// Get value from memory at given offset.
    pub fn get_value<T: LittleEndianConvert>(&self, offset: u32) -> Result<T, Error> {
        let buffer = self.buffer.borrow();
        let region = self.checked_region(&buffer, offset as usize, core::mem::size_of::<T>())?;
        Ok(T::from_little_endian(&buffer[region]).expect("Slice size is checked"))
    }

    /// Copy data from memory at given offset.
    ///
    /// This will allocate a vector for you. If you can provide a mutable
    /// slice you can use [`get_into`][`MemoryInstance::get_into`].
    pub fn get(&self, offset: u32, size: usize) -> Result<Vec<u8>, Error> {
        let buffer = self.buffer.borrow();
        let region = self.checked_region(&buffer, offset as usize, size)?;

        Ok(buffer[region].to_vec())
    }

    /// Copy data from given offset in the memory into `target` slice.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the specified region is out of bounds.
    pub fn get_into(&self, offset: u32, target: &mut [u8]) -> Result<(), Error> {
        let buffer = self.buffer.borrow();
        let region = self.checked_region(&buffer, offset as usize, target.len())?;

        target.copy_from_slice(&buffer[region]);

        Ok(())
    }

    /// Copy data in the memory at given offset.
    pub fn set(&self, offset: u32, value: &[u8]) -> Result<(), Error> {
        let mut buffer = self.buffer.borrow_mut();
        let range = self.checked_region(&buffer, offset as usize, value.len())?;

        buffer[range].copy_from_slice(value);

        Ok(())
    }

    /// Copy value in the memory at given offset.
    pub fn set_value<T: LittleEndianConvert>(&self, offset: u32, value: T) -> Result<(), Error> {
        let mut buffer = self.buffer.borrow_mut();
        let range = self.checked_region(&buffer, offset as usize, core::mem::size_of::<T>())?;
        value.into_little_endian(&mut buffer[range]);
        Ok(())
    }

    /// Increases the size of the linear memory by given number of pages.
    /// Returns previous memory size if succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Err` if attempted to allocate more memory than permitted by
    /// the limit.
    pub fn grow(&self, additional: Pages) -> Result<Pages, Error> {
        let size_before_grow: Pages = self.current_size();

        if additional == Pages(0) {
            return Ok(size_before_grow);
        }
        if additional > LINEAR_MEMORY_MAX_PAGES {
            return Err(Error::Memory(
                "Trying to grow memory by more than 65536 pages".to_string(),
            ));
        }

        let new_size: Pages = size_before_grow + additional;
        let maximum = self.maximum.unwrap_or(LINEAR_MEMORY_MAX_PAGES);
        if new_size > maximum {
            return Err(Error::Memory(format!(
                "Trying to grow memory by {} pages when already have {}",
                additional.0, size_before_grow.0,
            )));
        }

        let new_buffer_length: Bytes = new_size.into();
        self.buffer.borrow_mut().resize(new_buffer_length.0, 0);
        Ok(size_before_grow)
    }

    fn checked_region(
        &self,
        buffer: &[u8],
        offset: usize,
        size: usize,
    ) -> Result<Range<usize>, Error> {
        let end = offset.checked_add(size).ok_or_else(|| {
            Error::Memory(format!(
                "trying to access memory block of size {} from offset {}",
                size, offset
            ))
        })?;

        if end > buffer.len() {
            return Err(Error::Memory(format!(
                "trying to access region [{}..{}] in memory [0..{}]",
                offset,
                end,
                buffer.len()
            )));
        }

        Ok(offset..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn one_page_is_64ki() {
        let memory = MemoryInstance::alloc(Pages(1), None).unwrap();
        let size: Bytes = memory.current_size().into();
        assert_eq!(size, LINEAR_MEMORY_PAGE_SIZE);
        // Freshly allocated memory is zeroed.
        assert_eq!(memory.get(0, 16).unwrap(), vec![0; 16]);
    }

    #[test]
    fn values_round_trip_little_endian() {
        let memory = MemoryInstance::alloc(Pages(1), None).unwrap();
        memory.set_value(4, 0x11223344u32).unwrap();
        assert_eq!(memory.get(4, 4).unwrap(), vec![0x44, 0x33, 0x22, 0x11]);
        assert_eq!(memory.get_value::<u32>(4).unwrap(), 0x11223344);
    }

    #[test]
    fn access_at_the_boundary() {
        let memory = MemoryInstance::alloc(Pages(1), None).unwrap();
        assert!(memory.get_value::<i32>(65532).is_ok());
        assert_matches!(memory.get_value::<i32>(65533), Err(Error::Memory(_)));
        assert_matches!(memory.set(65535, &[0, 0]), Err(Error::Memory(_)));
    }

    #[test]
    fn grow_respects_maximum() {
        let memory = MemoryInstance::alloc(Pages(1), Some(Pages(2))).unwrap();
        assert_eq!(memory.grow(Pages(1)).unwrap(), Pages(1));
        assert_eq!(memory.current_size(), Pages(2));
        // The grown region is addressable and zeroed.
        assert_eq!(memory.get_value::<u8>(65536).unwrap(), 0);
        assert_matches!(memory.grow(Pages(1)), Err(Error::Memory(_)));
    }

    #[test]
    fn alloc_validates_limits() {
        assert_matches!(
            MemoryInstance::alloc(Pages(2), Some(Pages(1))),
            Err(Error::Memory(_))
        );
        assert_matches!(
            MemoryInstance::alloc(Pages(65537), None),
            Err(Error::Memory(_))
        );
    }
}
