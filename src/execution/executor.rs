use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::Result;
use crate::execution::Row;
use crate::expr::QueryCommand;

pub type ExecutorFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Physical connection handling shared by both executor flavours. The
/// defaults suit executors that manage connections on their own.
pub trait Connection {
    fn open_connection(&self) -> Result<()> {
        Ok(())
    }

    fn close_connection(&self) {}
}

/// Forward-only stream of rows for one dispatched query.
pub trait RowReader {
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Release the underlying command; called exactly once.
    fn close(&mut self) {}
}

/// The narrow contract the engine needs from a database client. Parameter
/// values arrive in the order of `command.parameters`.
pub trait QueryExecutor: Connection {
    fn execute_query(&self, command: &QueryCommand, values: &[Value]) -> Result<Box<dyn RowReader + '_>>;

    /// Rows affected.
    fn execute_command(&self, command: &QueryCommand, values: &[Value]) -> Result<u64>;

    /// One command over many parameter sets. Clients that can ship several
    /// sets per round trip override this; `batch_size` is the hint.
    fn execute_batch(&self, command: &QueryCommand, sets: &[Vec<Value>], batch_size: usize) -> Result<Vec<u64>> {
        let mut affected = Vec::with_capacity(sets.len());
        for chunk in sets.chunks(batch_size.max(1)) {
            for values in chunk {
                affected.push(self.execute_command(command, values)?);
            }
        }
        Ok(affected)
    }
}

pub trait AsyncRowReader: Send {
    fn next_row(&mut self) -> ExecutorFuture<'_, Result<Option<Row>>>;

    fn close(&mut self) {}
}

/// Non-blocking twin of [`QueryExecutor`]; suspension happens only here.
pub trait AsyncQueryExecutor: Connection + Send + Sync {
    /// `values` only has to live until the reader is returned; the reader
    /// itself may borrow the executor and the command.
    fn execute_query<'a, 'v>(
        &'a self,
        command: &'a QueryCommand,
        values: &'v [Value],
    ) -> ExecutorFuture<'v, Result<Box<dyn AsyncRowReader + 'a>>>
    where
        'a: 'v;

    fn execute_command<'a>(&'a self, command: &'a QueryCommand, values: &'a [Value]) -> ExecutorFuture<'a, Result<u64>>;

    fn execute_batch<'a>(
        &'a self,
        command: &'a QueryCommand,
        sets: &'a [Vec<Value>],
        batch_size: usize,
    ) -> ExecutorFuture<'a, Result<Vec<u64>>> {
        Box::pin(async move {
            let mut affected = Vec::with_capacity(sets.len());
            for chunk in sets.chunks(batch_size.max(1)) {
                for values in chunk {
                    affected.push(self.execute_command(command, values).await?);
                }
            }
            Ok(affected)
        })
    }
}

/// Reader over rows already in memory.
pub struct VecRowReader {
    rows: std::vec::IntoIter<Row>,
}

impl VecRowReader {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into_iter() }
    }
}

impl RowReader for VecRowReader {
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

impl AsyncRowReader for VecRowReader {
    fn next_row(&mut self) -> ExecutorFuture<'_, Result<Option<Row>>> {
        let row = self.rows.next();
        Box::pin(async move { Ok(row) })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;

    struct CountingExecutor {
        calls: RefCell<Vec<Value>>,
    }

    impl Connection for CountingExecutor {}

    impl QueryExecutor for CountingExecutor {
        fn execute_query(&self, _: &QueryCommand, _: &[Value]) -> Result<Box<dyn RowReader + '_>> {
            Ok(Box::new(VecRowReader::new(vec![])))
        }

        fn execute_command(&self, _: &QueryCommand, values: &[Value]) -> Result<u64> {
            self.calls.borrow_mut().push(Value::Array(values.to_vec()));
            Ok(1)
        }
    }

    #[test]
    fn default_batch_runs_every_set() {
        let exec = CountingExecutor { calls: RefCell::new(vec![]) };
        let cmd = QueryCommand::new("DELETE FROM [Customers] WHERE ([Id] = @Id)", vec![]);
        let sets = vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]];
        assert_eq!(exec.execute_batch(&cmd, &sets, 2).unwrap(), vec![1, 1, 1]);
        assert_eq!(*exec.calls.borrow(), vec![json!([1]), json!([2]), json!([3])]);
    }

    #[test]
    fn vec_reader_yields_rows_in_order() {
        let rows = vec![Row::from_json(json!({"Id": 1})).unwrap(), Row::from_json(json!({"Id": 2})).unwrap()];
        let mut reader = VecRowReader::new(rows);
        assert_eq!(RowReader::next_row(&mut reader).unwrap().unwrap().column("Id"), json!(1));
        assert_eq!(RowReader::next_row(&mut reader).unwrap().unwrap().column("Id"), json!(2));
        assert!(RowReader::next_row(&mut reader).unwrap().is_none());
    }
}
