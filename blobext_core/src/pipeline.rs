use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, ShortenError};
use crate::mapper::{RowMapper, RowRestorer};
use crate::store::{BlobSink, BlobSource};
use crate::value::Row;

/// Cooperative cancellation flag shared between the pipeline and its owner.
///
/// Cloning yields a handle to the same flag. The pipeline checks it once per
/// row, before pulling the next one; work on the current row is never
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A row that could not be processed, with the error that stopped it.
///
/// `row` is the row as decoded (unmodified) when the mapper failed, and
/// `None` when the failure came from upstream or from cancellation.
#[derive(Debug)]
pub struct RowFailure {
    pub row: Option<Row>,
    pub error: ShortenError,
}

impl RowFailure {
    pub fn new(row: Option<Row>, error: ShortenError) -> Self {
        Self { row, error }
    }

    pub fn into_error(self) -> ShortenError {
        self.error
    }
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for RowFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<RowFailure> for ShortenError {
    fn from(f: RowFailure) -> Self {
        f.error
    }
}

/// Item produced by the pipeline drivers.
pub type RowResult = std::result::Result<Row, RowFailure>;

/// Per-row transform applied by a [`Pipeline`].
pub trait RowStage {
    fn apply(&mut self, row: &mut Row) -> Result<()>;
}

impl<S: BlobSink> RowStage for RowMapper<S> {
    fn apply(&mut self, row: &mut Row) -> Result<()> {
        self.map_row(row).map(|_| ())
    }
}

impl<S: BlobSource> RowStage for RowRestorer<S> {
    fn apply(&mut self, row: &mut Row) -> Result<()> {
        self.restore_row(row).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Done,
}

/// Lazily applies a [`RowStage`] to every row of an upstream sequence.
///
/// Rows are handled strictly one at a time and in input order: row `n` is
/// fully processed and handed to the consumer before row `n + 1` is pulled.
/// The sequence ends when upstream is exhausted, when the consumer stops
/// pulling, or right after a single `Cancelled` failure once the token fires.
pub struct Pipeline<I, T> {
    rows: I,
    stage: T,
    cancel: CancellationToken,
    state: State,
}

impl<I, T> Pipeline<I, T>
where
    I: Iterator<Item = Result<Row>>,
    T: RowStage,
{
    pub fn new(rows: I, stage: T, cancel: CancellationToken) -> Self {
        Self {
            rows,
            stage,
            cancel,
            state: State::Running,
        }
    }

    pub fn stage(&self) -> &T {
        &self.stage
    }

    pub fn into_stage(self) -> T {
        self.stage
    }
}

impl<I, T> Iterator for Pipeline<I, T>
where
    I: Iterator<Item = Result<Row>>,
    T: RowStage,
{
    type Item = RowResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.state = State::Done;
            return Some(Err(RowFailure::new(None, ShortenError::Cancelled)));
        }
        let next = match self.rows.next() {
            Some(next) => next,
            None => {
                self.state = State::Done;
                return None;
            }
        };
        Some(match next {
            Err(e) => Err(RowFailure::new(None, e)),
            Ok(mut row) => match self.stage.apply(&mut row) {
                Ok(()) => Ok(row),
                Err(e) => Err(RowFailure::new(Some(row), e)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BlobId;
    use crate::mapper::MapperConfig;
    use crate::store::{BlobInfo, MemoryBlobStore};
    use crate::value::Value;

    fn rows(ids: &[i64]) -> Vec<Result<Row>> {
        ids.iter()
            .map(|i| {
                let mut r = Row::new();
                r.insert("blob".into(), Value::Bytes(vec![*i as u8]));
                r.insert("id".into(), Value::Long(*i));
                Ok(r)
            })
            .collect()
    }

    fn mapper() -> RowMapper<MemoryBlobStore> {
        RowMapper::new(MapperConfig::new("blob", "id").unwrap(), MemoryBlobStore::new())
    }

    #[test]
    fn maps_in_order() {
        let out: Vec<RowResult> =
            Pipeline::new(rows(&[3, 1, 2]).into_iter(), mapper(), CancellationToken::new()).collect();
        let ids: Vec<Value> = out.into_iter().map(|r| r.unwrap()["id"].clone()).collect();
        assert_eq!(ids, vec![Value::Long(3), Value::Long(1), Value::Long(2)]);
    }

    #[test]
    fn upstream_errors_skip_the_mapper() {
        let mut input = rows(&[1]);
        input.push(Err(ShortenError::decode("bad frame")));
        input.extend(rows(&[2]));

        let mut p = Pipeline::new(input.into_iter(), mapper(), CancellationToken::new());
        assert!(p.next().unwrap().is_ok());
        let failure = p.next().unwrap().unwrap_err();
        assert!(failure.row.is_none());
        assert!(matches!(failure.error, ShortenError::Decode(_)));
        assert!(p.next().unwrap().is_ok());
        assert!(p.next().is_none());
        assert_eq!(p.stage().sink().saves(), 2);
    }

    #[test]
    fn mapper_failure_returns_the_row() {
        let mut bad = Row::new();
        bad.insert("id".into(), Value::Long(5));
        let mut p = Pipeline::new(vec![Ok(bad.clone())].into_iter(), mapper(), CancellationToken::new());
        let failure = p.next().unwrap().unwrap_err();
        assert_eq!(failure.row, Some(bad));
        assert!(matches!(failure.error, ShortenError::BlobFieldMissing { .. }));
    }

    #[test]
    fn cancelled_before_start_yields_only_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: Vec<RowResult> = Pipeline::new(rows(&[1, 2]).into_iter(), mapper(), cancel).collect();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(RowFailure { error: ShortenError::Cancelled, .. })));
    }

    /// Cancels the shared token from inside the first save.
    struct CancelAfterFirst {
        store: MemoryBlobStore,
        cancel: CancellationToken,
    }

    impl BlobSink for CancelAfterFirst {
        fn save(&mut self, info: BlobInfo<'_>) -> Result<BlobId> {
            let id = self.store.save(info)?;
            self.cancel.cancel();
            Ok(id)
        }
    }

    #[test]
    fn cancellation_stops_before_the_next_row() {
        let cancel = CancellationToken::new();
        let sink = CancelAfterFirst {
            store: MemoryBlobStore::new(),
            cancel: cancel.clone(),
        };
        let mapper = RowMapper::new(MapperConfig::new("blob", "id").unwrap(), sink);
        let mut p = Pipeline::new(rows(&[1, 2, 3]).into_iter(), mapper, cancel);

        assert!(p.next().unwrap().is_ok());
        assert!(matches!(
            p.next(),
            Some(Err(RowFailure { error: ShortenError::Cancelled, .. }))
        ));
        assert!(p.next().is_none());
        assert_eq!(p.into_stage().into_sink().store.saves(), 1);
    }

    #[test]
    fn consumer_can_stop_early() {
        let mut p = Pipeline::new(rows(&[1, 2, 3]).into_iter(), mapper(), CancellationToken::new());
        let first = p.next();
        assert!(first.is_some());
        assert_eq!(p.stage().sink().saves(), 1);
    }
}
