//! Type-erased value cell (component B), the universal userdata/result
//! carrier between asynchronous steps.
//!
//! Modeled as a sum of `{Inline(small_buffer), Heap(ptr)}` with a safe,
//! tagged `enum` discriminant rather than a raw union. Moves are cheap;
//! copies are forbidden; a moved-from `Erased` is `Nil` and drops as a
//! no-op.

use std::alloc::{alloc, dealloc, Layout};
use std::mem::{align_of, size_of, ManuallyDrop};
use std::ptr::{self, NonNull};

/// Bytes available inline when `T` needs no destructor. Three machine
/// words is enough to hold most small results (a length-prefixed tuple,
/// a couple of integers) without falling back to the heap.
const INLINE_NO_DTOR: usize = 3 * size_of::<usize>();
/// Bytes available inline when `T` needs a destructor slot. Smaller than
/// `INLINE_NO_DTOR` because one word of the cell is spent on the destructor
/// function pointer.
const INLINE_WITH_DTOR: usize = 2 * size_of::<usize>();

type DropFn = unsafe fn(*mut u8);

unsafe fn drop_in_place_as<T>(ptr: *mut u8) {
    ptr::drop_in_place(ptr.cast::<T>());
}

struct HeapBox {
    drop_fn: Option<DropFn>,
    layout: Layout,
    data: NonNull<u8>,
}

enum Storage {
    Nil,
    InlineNoDtor { buf: [u8; INLINE_NO_DTOR] },
    InlineWithDtor { drop_fn: DropFn, buf: [u8; INLINE_WITH_DTOR] },
    Heap(HeapBox),
}

/// A type-erased, move-only value cell with small-buffer optimization.
///
/// Exactly one of `{inline, dynamic}` holds the value at any time (`Nil`
/// counts as neither and is the state after `take`). If the cell carries a
/// destructor, a function pointer to it is always reachable alongside the
/// bytes, so destruction never needs virtual dispatch through a vtable on
/// the hot completion path.
pub struct Erased {
    storage: Storage,
}

impl std::fmt::Debug for Erased {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.storage {
            Storage::Nil => "nil",
            Storage::InlineNoDtor { .. } => "inline",
            Storage::InlineWithDtor { .. } => "inline+dtor",
            Storage::Heap(_) => "heap",
        };
        f.debug_struct("Erased").field("storage", &kind).finish()
    }
}

impl Default for Erased {
    fn default() -> Self {
        Self::nil()
    }
}

impl Erased {
    /// An empty cell, as produced by `take` or a never-initialized slot.
    #[must_use]
    pub fn nil() -> Self {
        Self { storage: Storage::Nil }
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self.storage, Storage::Nil)
    }

    /// Moves `value` into a new cell, choosing inline or heap storage based
    /// on `size_of::<T>()` and whether `T` needs to run `Drop`.
    pub fn init<T>(value: T) -> Self {
        let needs_dtor = std::mem::needs_drop::<T>();
        if !needs_dtor && size_of::<T>() <= INLINE_NO_DTOR && align_of::<T>() <= align_of::<usize>() {
            let mut buf = [0_u8; INLINE_NO_DTOR];
            // SAFETY: size/align checked above; `value` is forgotten right after.
            unsafe {
                ptr::write(buf.as_mut_ptr().cast::<T>(), value);
            }
            Self { storage: Storage::InlineNoDtor { buf } }
        } else if needs_dtor && size_of::<T>() <= INLINE_WITH_DTOR && align_of::<T>() <= align_of::<usize>() {
            let mut buf = [0_u8; INLINE_WITH_DTOR];
            unsafe {
                ptr::write(buf.as_mut_ptr().cast::<T>(), value);
            }
            Self {
                storage: Storage::InlineWithDtor { drop_fn: drop_in_place_as::<T>, buf },
            }
        } else {
            let layout = Layout::new::<T>();
            // SAFETY: layout has non-zero size for any T worth heap-allocating;
            // zero-sized T always fits inline above.
            let data = unsafe {
                let raw = alloc(layout);
                if raw.is_null() {
                    std::alloc::handle_alloc_error(layout);
                }
                ptr::write(raw.cast::<T>(), value);
                NonNull::new_unchecked(raw)
            };
            Self {
                storage: Storage::Heap(HeapBox {
                    drop_fn: needs_dtor.then_some(drop_in_place_as::<T> as DropFn),
                    layout,
                    data,
                }),
            }
        }
    }

    fn data_ptr(&self) -> *const u8 {
        match &self.storage {
            Storage::Nil => ptr::null(),
            Storage::InlineNoDtor { buf } => buf.as_ptr(),
            Storage::InlineWithDtor { buf, .. } => buf.as_ptr(),
            Storage::Heap(h) => h.data.as_ptr(),
        }
    }

    fn data_ptr_mut(&mut self) -> *mut u8 {
        match &mut self.storage {
            Storage::Nil => ptr::null_mut(),
            Storage::InlineNoDtor { buf } => buf.as_mut_ptr(),
            Storage::InlineWithDtor { buf, .. } => buf.as_mut_ptr(),
            Storage::Heap(h) => h.data.as_ptr(),
        }
    }

    /// Access without consuming. Undefined behavior if `T` is not the type
    /// the cell was `init`-ed with.
    ///
    /// # Safety
    /// Caller must guarantee `T` matches the original stored type.
    #[must_use]
    pub unsafe fn cast<T>(&self) -> &T {
        &*self.data_ptr().cast::<T>()
    }

    /// # Safety
    /// Caller must guarantee `T` matches the original stored type.
    #[must_use]
    pub unsafe fn cast_mut<T>(&mut self) -> &mut T {
        &mut *self.data_ptr_mut().cast::<T>()
    }

    /// Moves the value out; the cell becomes `Nil` and its storage (if any)
    /// is released without running `T`'s destructor (ownership of the value
    /// transfers to the caller).
    ///
    /// # Safety
    /// Caller must guarantee `T` matches the original stored type.
    #[must_use]
    pub unsafe fn take<T>(&mut self) -> T {
        let storage = std::mem::replace(&mut self.storage, Storage::Nil);
        match storage {
            Storage::Nil => panic!("take() on a nil Erased"),
            Storage::InlineNoDtor { buf } => {
                let value = ptr::read(buf.as_ptr().cast::<T>());
                value
            }
            Storage::InlineWithDtor { buf, .. } => {
                let value = ptr::read(buf.as_ptr().cast::<T>());
                value
            }
            Storage::Heap(h) => {
                let h = ManuallyDrop::new(h);
                let value = ptr::read(h.data.as_ptr().cast::<T>());
                dealloc(h.data.as_ptr(), h.layout);
                value
            }
        }
    }
}

impl Drop for Erased {
    fn drop(&mut self) {
        // Destroying a moved-from (Nil) box is a no-op.
        match &mut self.storage {
            Storage::Nil | Storage::InlineNoDtor { .. } => {}
            Storage::InlineWithDtor { drop_fn, buf } => unsafe {
                drop_fn(buf.as_mut_ptr());
            },
            Storage::Heap(h) => unsafe {
                if let Some(drop_fn) = h.drop_fn {
                    drop_fn(h.data.as_ptr());
                }
                dealloc(h.data.as_ptr(), h.layout);
            },
        }
    }
}

// Erased owns its bytes exclusively and never exposes aliased access, so it
// is Send/Sync exactly when a Box<dyn Any + Send + Sync> would be; since we
// don't know T's bounds at the type-erased boundary we leave this unsafe
// opt-in to call sites that know what they stored.
unsafe impl Send for Erased {}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn inline_roundtrip_small_copy_type() {
        let b = Erased::init(42_i32);
        assert!(!b.is_nil());
        unsafe {
            assert_eq!(*b.cast::<i32>(), 42);
        }
    }

    #[test]
    fn heap_roundtrip_large_type() {
        let big = [7_u8; 256];
        let b = Erased::init(big);
        unsafe {
            assert_eq!(*b.cast::<[u8; 256]>(), big);
        }
    }

    #[test]
    fn destructor_runs_exactly_once() {
        let counter = Rc::new(Cell::new(0));
        struct Dropper(Rc<Cell<i32>>);
        impl Drop for Dropper {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }
        let b = Erased::init(Dropper(counter.clone()));
        drop(b);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn take_leaves_box_nil_and_skips_destructor() {
        let counter = Rc::new(Cell::new(0));
        struct Dropper(Rc<Cell<i32>>);
        impl Drop for Dropper {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }
        let mut b = Erased::init(Dropper(counter.clone()));
        let taken = unsafe { b.take::<Dropper>() };
        assert!(b.is_nil());
        assert_eq!(counter.get(), 0);
        drop(taken);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn double_drop_of_nil_is_noop() {
        let mut b = Erased::init(5_i32);
        let _ = unsafe { b.take::<i32>() };
        drop(b); // must not double-free or double-drop
    }
}
