use once_cell::sync::OnceCell;

use crate::error::Result;

/// A value loaded on first access and kept afterwards. A failed load is
/// not cached; the next access tries again.
pub struct DeferredValue<'a, T> {
    cell: OnceCell<T>,
    loader: Box<dyn Fn() -> Result<T> + Send + Sync + 'a>,
}

impl<'a, T> DeferredValue<'a, T> {
    pub fn new(loader: impl Fn() -> Result<T> + Send + Sync + 'a) -> Self {
        Self { cell: OnceCell::new(), loader: Box::new(loader) }
    }

    /// Already resolved, no loader call will ever happen.
    pub fn loaded(value: T) -> Self {
        Self { cell: OnceCell::with_value(value), loader: Box::new(|| unreachable_loader()) }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get(&self) -> Result<&T> {
        self.cell.get_or_try_init(|| (self.loader)())
    }

    pub fn into_inner(self) -> Result<T> {
        self.get()?;
        match self.cell.into_inner() {
            Some(value) => Ok(value),
            None => unreachable_loader(),
        }
    }
}

fn unreachable_loader<T>() -> Result<T> {
    Err(crate::error::QueryError::internal("deferred value has no loader"))
}

impl<T: std::fmt::Debug> std::fmt::Debug for DeferredValue<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredValue").field("value", &self.cell.get()).finish()
    }
}
