//! Scratch memory for element-local computations.
//!
//! Every per-element operation in this crate borrows a [`Workspace`] from its caller instead of
//! allocating its own temporaries. Buffers are looked up by type, resized at the start of each
//! element step and reused across elements, so after the first few elements no allocation takes
//! place. Parallel callers give each worker its own workspace, see [`ThreadLocalWorkspace`].
use std::any::Any;
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// A workspace that contains type-erased objects.
///
/// The workspace is intended to hold intermediate data used as workspace in computations.
/// It is optimized particularly for the case where the same type is accessed many times in a row.
#[derive(Debug, Default)]
pub struct Workspace {
    workspaces: Vec<Box<dyn Any + Send>>,
}

impl Workspace {
    pub fn get_or_insert_with<W, F>(&mut self, create: F) -> &mut W
    where
        W: 'static + Send,
        F: FnOnce() -> W,
    {
        // Note: We treat the Vec as a stack, so we search from the end of the vector.
        let existing_ws_idx = self.workspaces.iter().rposition(|ws| ws.is::<W>());
        let idx = match existing_ws_idx {
            Some(idx) => idx,
            None => {
                let w = create();
                self.workspaces.push(Box::new(w));
                self.workspaces.len() - 1
            }
        };

        // The same object is likely to be accessed many times in sequence, so we move it to the
        // end where the next lookup finds it immediately
        let last = self.workspaces.len() - 1;
        self.workspaces.swap(idx, last);

        self.workspaces[last]
            .downcast_mut()
            .expect("Internal error: Downcasting can by definition not fail")
    }

    pub fn get_or_default<W>(&mut self) -> &mut W
    where
        W: 'static + Send + Default,
    {
        self.get_or_insert_with(Default::default)
    }

    /// The number of distinct buffer types currently held.
    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}

/// One [`Workspace`] per worker thread.
///
/// Used by the parallel assembly drivers: each rayon worker lazily creates its own workspace the
/// first time it processes an element and keeps it for the remaining elements.
#[derive(Debug, Default)]
pub struct ThreadLocalWorkspace {
    workspaces: ThreadLocal<RefCell<Workspace>>,
}

impl ThreadLocalWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with the workspace of the current thread.
    ///
    /// # Panics
    ///
    /// Panics if called re-entrantly from within `f` on the same thread.
    pub fn with<R>(&self, f: impl FnOnce(&mut Workspace) -> R) -> R {
        let cell = self.workspaces.get_or_default();
        let mut workspace = cell.borrow_mut();
        f(&mut workspace)
    }
}
