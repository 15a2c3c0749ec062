use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::error::Result;
use crate::execution::Connection;

/// Reference-counted "use connection" scope. The physical connection opens
/// on the first enter and closes when the last guard drops.
pub struct ConnectionScope<'c, C: Connection + ?Sized> {
    connection: &'c C,
    depth: Mutex<usize>,
}

impl<'c, C: Connection + ?Sized> ConnectionScope<'c, C> {
    pub fn new(connection: &'c C) -> Self {
        Self { connection, depth: Mutex::new(0) }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.depth.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enter(&self) -> Result<ConnectionGuard<'_, 'c, C>> {
        let mut depth = self.lock();
        if *depth == 0 {
            self.connection.open_connection()?;
            trace!("connection opened");
        }
        *depth += 1;
        Ok(ConnectionGuard { scope: self })
    }

    pub fn depth(&self) -> usize {
        *self.lock()
    }

    fn exit(&self) {
        let mut depth = self.lock();
        *depth = depth.saturating_sub(1);
        if *depth == 0 {
            self.connection.close_connection();
            trace!("connection closed");
        }
    }
}

/// Leaves the scope on drop, on every exit path.
pub struct ConnectionGuard<'s, 'c, C: Connection + ?Sized> {
    scope: &'s ConnectionScope<'c, C>,
}

impl<C: Connection + ?Sized> Drop for ConnectionGuard<'_, '_, C> {
    fn drop(&mut self) {
        self.scope.exit();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::QueryError;

    #[derive(Default)]
    struct Counting {
        opened: AtomicUsize,
        closed: AtomicUsize,
        refuse: bool,
    }

    impl Connection for Counting {
        fn open_connection(&self) -> Result<()> {
            if self.refuse {
                return Err(QueryError::lifecycle("connection refused"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close_connection(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn nested_scopes_share_one_connection() {
        let conn = Counting::default();
        let scope = ConnectionScope::new(&conn);
        {
            let _outer = scope.enter().unwrap();
            {
                let _inner = scope.enter().unwrap();
                assert_eq!(scope.depth(), 2);
            }
            assert_eq!(scope.depth(), 1);
            assert_eq!(conn.closed.load(Ordering::SeqCst), 0);
        }
        assert_eq!(scope.depth(), 0);
        assert_eq!(conn.opened.load(Ordering::SeqCst), 1);
        assert_eq!(conn.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_releases_on_early_return() {
        fn work(scope: &ConnectionScope<'_, Counting>) -> Result<()> {
            let _guard = scope.enter()?;
            Err(QueryError::cardinality("boom"))
        }
        let conn = Counting::default();
        let scope = ConnectionScope::new(&conn);
        assert!(work(&scope).is_err());
        assert_eq!(scope.depth(), 0);
        assert_eq!(conn.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_open_leaves_the_scope_closed() {
        let conn = Counting { refuse: true, ..Counting::default() };
        let scope = ConnectionScope::new(&conn);
        assert!(scope.enter().is_err());
        assert_eq!(scope.depth(), 0);
        assert_eq!(conn.closed.load(Ordering::SeqCst), 0);
    }
}
