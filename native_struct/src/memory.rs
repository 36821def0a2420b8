/* Memory regions backing bound structs
 *
 * A region is either an allocation this crate made (freed on release or
 * drop) or a view of foreign memory (never freed here). Regions are shared
 * between a struct and its embedded children, so closing the owner makes
 * every view of it fail instead of dangling.
 */

use native_layout::{Address, LayoutError};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::warn;

pub(crate) type SharedRegion = Rc<RefCell<Region>>;

pub(crate) struct Region {
    /* None once released */
    base: Option<NonNull<u8>>,
    len: usize,
    /* Some for allocations owned by this region */
    layout: Option<Layout>,
    /* Regions allocated on behalf of pointer fields, released with this one */
    dependents: Vec<SharedRegion>,
    adopted: bool,
}

impl Region {
    pub(crate) fn allocate(size: usize, alignment: usize) -> Result<Self, LayoutError> {
        let layout = Layout::from_size_align(size.max(1), alignment.max(1))
            .map_err(|_| LayoutError::AllocationFailed { size })?;
        /* SAFETY: layout has a non-zero size */
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(LayoutError::AllocationFailed { size })?;
        Ok(Self {
            base: Some(base),
            len: size,
            layout: Some(layout),
            dependents: Vec::new(),
            adopted: false,
        })
    }

    /// # Safety
    ///
    /// `address` must point to `len` bytes that stay valid and are not
    /// accessed through other aliases while this region is in use.
    pub(crate) unsafe fn foreign(address: Address, len: usize) -> Result<Self, LayoutError> {
        let base = NonNull::new(address.as_ptr()).ok_or(LayoutError::NullAddress)?;
        Ok(Self {
            base: Some(base),
            len,
            layout: None,
            dependents: Vec::new(),
            adopted: false,
        })
    }

    pub(crate) fn shared(self) -> SharedRegion {
        Rc::new(RefCell::new(self))
    }

    pub(crate) fn is_released(&self) -> bool {
        self.base.is_none()
    }

    pub(crate) fn address(&self, offset: usize) -> Option<Address> {
        self.base
            .map(|base| Address::from_ptr(base.as_ptr().wrapping_add(offset)))
    }

    pub(crate) fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let base = self.base?;
        if offset.checked_add(len)? > self.len {
            return None;
        }
        /* SAFETY: in bounds of a live allocation or a foreign view whose
         * validity the binder vouched for */
        Some(unsafe { std::slice::from_raw_parts(base.as_ptr().add(offset), len) })
    }

    pub(crate) fn slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let base = self.base?;
        if offset.checked_add(len)? > self.len {
            return None;
        }
        /* SAFETY: as in `slice`; the RefCell guarantees exclusive access */
        Some(unsafe { std::slice::from_raw_parts_mut(base.as_ptr().add(offset), len) })
    }

    pub(crate) fn adopt(&mut self, dependent: SharedRegion) {
        dependent.borrow_mut().adopted = true;
        self.dependents.push(dependent);
    }

    /// Releases and forgets the dependent starting at `address`. Returns
    /// false if no dependent starts there.
    pub(crate) fn release_dependent(&mut self, address: Address) -> bool {
        let Some(idx) = self
            .dependents
            .iter()
            .position(|d| d.borrow().address(0) == Some(address))
        else {
            return false;
        };
        let dependent = self.dependents.remove(idx);
        dependent.borrow_mut().release();
        true
    }

    /// Frees owned memory (and every dependent) and marks the region dead.
    pub(crate) fn release(&mut self) {
        for dependent in self.dependents.drain(..) {
            dependent.borrow_mut().release();
        }
        if let Some(base) = self.base.take() {
            if let Some(layout) = self.layout {
                /* SAFETY: allocated in `allocate` with this layout */
                unsafe { dealloc(base.as_ptr(), layout) };
            }
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.layout.is_some() && !self.is_released() && !self.adopted {
            warn!(
                "Owned native region of {} bytes dropped without close; freeing",
                self.len
            );
        }
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_zeroed_and_bounded() {
        let region = Region::allocate(12, 4).unwrap();
        assert_eq!(region.slice(0, 12).unwrap(), &[0u8; 12]);
        assert!(region.slice(8, 8).is_none());
        assert!(region.slice(usize::MAX, 2).is_none());
    }

    #[test]
    fn test_release_kills_dependents() {
        let mut parent = Region::allocate(8, 8).unwrap();
        let child = Region::allocate(4, 4).unwrap().shared();
        parent.adopt(Rc::clone(&child));
        parent.release();
        assert!(parent.is_released());
        assert!(child.borrow().is_released());
        assert!(parent.slice(0, 1).is_none());
    }

    #[test]
    fn test_release_dependent_by_address() {
        let mut parent = Region::allocate(8, 8).unwrap();
        let first = Region::allocate(4, 4).unwrap().shared();
        let second = Region::allocate(4, 4).unwrap().shared();
        let first_at = first.borrow().address(0).unwrap();
        parent.adopt(Rc::clone(&first));
        parent.adopt(Rc::clone(&second));

        assert!(parent.release_dependent(first_at));
        assert!(first.borrow().is_released());
        assert!(!second.borrow().is_released());
        assert!(!parent.release_dependent(first_at));
        assert!(!parent.release_dependent(Address::new(0x10)));
        parent.release();
    }

    #[test]
    fn test_foreign_rejects_null() {
        let err = unsafe { Region::foreign(Address::NULL, 4) }.err();
        assert_eq!(err, Some(LayoutError::NullAddress));
    }
}
