use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{QueryError, Result};
use crate::execution::{AsyncQueryExecutor, AsyncRowReader, QueryExecutor, Row, RowReader};
use crate::expr::QueryCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    NotStarted,
    Executing,
    Streaming,
    Exhausted,
    Disposed,
}

pub(crate) fn log_dispatch(command: &QueryCommand, values: &[Value], log_sql: bool) {
    debug!(sql = %command.text, parameters = values.len(), "dispatching");
    if log_sql {
        info!("{}", command.text);
    }
}

fn reused() -> QueryError {
    QueryError::lifecycle("a row sequence can only be enumerated once")
}

/// Rows of one query, read at most once. The reader is released exactly
/// once: when the rows run out, on `close`, or on drop.
pub struct RowSequence<'e> {
    executor: &'e dyn QueryExecutor,
    command: &'e QueryCommand,
    values: Vec<Value>,
    reader: Option<Box<dyn RowReader + 'e>>,
    state: SequenceState,
    log_sql: bool,
}

impl<'e> RowSequence<'e> {
    pub fn new(executor: &'e dyn QueryExecutor, command: &'e QueryCommand, values: Vec<Value>) -> Self {
        Self { executor, command, values, reader: None, state: SequenceState::NotStarted, log_sql: false }
    }

    pub fn with_sql_logging(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Dispatch the command. A sequence opens once.
    pub fn open(&mut self) -> Result<()> {
        if self.state != SequenceState::NotStarted {
            return Err(reused());
        }
        self.state = SequenceState::Executing;
        log_dispatch(self.command, &self.values, self.log_sql);
        match self.executor.execute_query(self.command, &self.values) {
            Ok(reader) => {
                self.reader = Some(reader);
                self.state = SequenceState::Streaming;
                Ok(())
            }
            Err(e) => {
                self.state = SequenceState::Disposed;
                Err(e)
            }
        }
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        match self.state {
            SequenceState::NotStarted => self.open()?,
            SequenceState::Exhausted => return Ok(None),
            SequenceState::Disposed => return Err(reused()),
            SequenceState::Executing | SequenceState::Streaming => {}
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next_row() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.release();
                self.state = SequenceState::Exhausted;
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// All remaining rows.
    pub fn read_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn close(&mut self) {
        self.release();
        if self.state != SequenceState::Exhausted {
            self.state = SequenceState::Disposed;
        }
    }

    fn release(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
    }
}

impl Iterator for RowSequence<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == SequenceState::Disposed {
            return None;
        }
        self.next_row().transpose()
    }
}

impl Drop for RowSequence<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Async counterpart of [`RowSequence`]. Cancellation is checked before
/// every fetch; a cancelled sequence releases its reader and reports
/// [`QueryError::Cancelled`].
pub struct AsyncRowSequence<'e> {
    executor: &'e dyn AsyncQueryExecutor,
    command: &'e QueryCommand,
    values: Vec<Value>,
    reader: Option<Box<dyn AsyncRowReader + 'e>>,
    state: SequenceState,
    cancel: CancellationToken,
    log_sql: bool,
}

impl<'e> AsyncRowSequence<'e> {
    pub fn new(executor: &'e dyn AsyncQueryExecutor, command: &'e QueryCommand, values: Vec<Value>, cancel: CancellationToken) -> Self {
        Self { executor, command, values, reader: None, state: SequenceState::NotStarted, cancel, log_sql: false }
    }

    pub fn with_sql_logging(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub async fn open(&mut self) -> Result<()> {
        if self.state != SequenceState::NotStarted {
            return Err(reused());
        }
        if self.cancel.is_cancelled() {
            self.state = SequenceState::Disposed;
            return Err(QueryError::Cancelled);
        }
        self.state = SequenceState::Executing;
        let (executor, command) = (self.executor, self.command);
        log_dispatch(command, &self.values, self.log_sql);
        match executor.execute_query(command, &self.values).await {
            Ok(reader) => {
                self.reader = Some(reader);
                self.state = SequenceState::Streaming;
                Ok(())
            }
            Err(e) => {
                self.state = SequenceState::Disposed;
                Err(e)
            }
        }
    }

    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        match self.state {
            SequenceState::NotStarted => self.open().await?,
            SequenceState::Exhausted => return Ok(None),
            SequenceState::Disposed => return Err(reused()),
            SequenceState::Executing | SequenceState::Streaming => {}
        }
        if self.cancel.is_cancelled() {
            self.close();
            return Err(QueryError::Cancelled);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next_row().await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.release();
                self.state = SequenceState::Exhausted;
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    pub async fn read_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn close(&mut self) {
        self.release();
        if self.state != SequenceState::Exhausted {
            self.state = SequenceState::Disposed;
        }
    }

    fn release(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
    }
}

impl Drop for AsyncRowSequence<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
