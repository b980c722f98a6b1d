//! Materialized intermediate results.
//!
//! A [`ResultTable`] is an append-only tuple buffer owned by exactly one
//! producing operator at a time. It carries its column count and which
//! column (if any) it is sorted by.
//!
//! Storage is a tagged enum selected by the column count: widths `1..=5`
//! use a vector of fixed arrays for locality in the join inner loops, wider
//! results fall back to boxed rows. Consumers destructure the enum; there
//! are no pointer casts anywhere.

use trellis_core::Id;

/// Widths up to this use fixed-array storage.
pub const MAX_FIXED_WIDTH: usize = 5;

/// Result lifecycle. Transitions are monotonic and one-way from `Pending`;
/// `Finished` and `Aborted` are terminal.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ResultStatus {
    Pending,
    Computing,
    Finished,
    Aborted,
}

impl ResultStatus {
    fn rank(self) -> u8 {
        match self {
            ResultStatus::Pending => 0,
            ResultStatus::Computing => 1,
            ResultStatus::Finished | ResultStatus::Aborted => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// Width-tagged tuple storage.
#[derive(Clone, Debug, PartialEq)]
pub enum TableStorage {
    Fixed1(Vec<[Id; 1]>),
    Fixed2(Vec<[Id; 2]>),
    Fixed3(Vec<[Id; 3]>),
    Fixed4(Vec<[Id; 4]>),
    Fixed5(Vec<[Id; 5]>),
    Var(Vec<Vec<Id>>),
}

macro_rules! for_each_variant {
    ($self:expr, $rows:ident => $body:expr) => {
        match $self {
            TableStorage::Fixed1($rows) => $body,
            TableStorage::Fixed2($rows) => $body,
            TableStorage::Fixed3($rows) => $body,
            TableStorage::Fixed4($rows) => $body,
            TableStorage::Fixed5($rows) => $body,
            TableStorage::Var($rows) => $body,
        }
    };
}

impl TableStorage {
    /// Empty storage for the given column count: a fixed branch for widths
    /// `1..=MAX_FIXED_WIDTH`, boxed rows beyond.
    pub fn with_width(width: usize) -> Self {
        match width {
            1 => TableStorage::Fixed1(Vec::new()),
            2 => TableStorage::Fixed2(Vec::new()),
            3 => TableStorage::Fixed3(Vec::new()),
            4 => TableStorage::Fixed4(Vec::new()),
            5 => TableStorage::Fixed5(Vec::new()),
            _ => TableStorage::Var(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, rows => rows.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row `i` as a slice, whichever branch holds it.
    pub fn row(&self, i: usize) -> &[Id] {
        for_each_variant!(self, rows => rows[i].as_ref())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Id]> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    /// Append one row; its length must match the storage width.
    pub fn push_row(&mut self, row: &[Id]) {
        match self {
            TableStorage::Fixed1(rows) => rows.push(row.try_into().expect("row width 1")),
            TableStorage::Fixed2(rows) => rows.push(row.try_into().expect("row width 2")),
            TableStorage::Fixed3(rows) => rows.push(row.try_into().expect("row width 3")),
            TableStorage::Fixed4(rows) => rows.push(row.try_into().expect("row width 4")),
            TableStorage::Fixed5(rows) => rows.push(row.try_into().expect("row width 5")),
            TableStorage::Var(rows) => rows.push(row.to_vec()),
        }
    }

    /// Sort rows by one column (stable).
    pub fn sort_by_col(&mut self, col: usize) {
        for_each_variant!(self, rows => rows.sort_by(|a, b| a[col].cmp(&b[col])))
    }

    pub fn as_fixed1(&self) -> Option<&[[Id; 1]]> {
        match self {
            TableStorage::Fixed1(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_fixed2(&self) -> Option<&[[Id; 2]]> {
        match self {
            TableStorage::Fixed2(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_fixed3(&self) -> Option<&[[Id; 3]]> {
        match self {
            TableStorage::Fixed3(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_fixed4(&self) -> Option<&[[Id; 4]]> {
        match self {
            TableStorage::Fixed4(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_fixed5(&self) -> Option<&[[Id; 5]]> {
        match self {
            TableStorage::Fixed5(rows) => Some(rows),
            _ => None,
        }
    }
}

impl From<Vec<[Id; 1]>> for TableStorage {
    fn from(rows: Vec<[Id; 1]>) -> Self {
        TableStorage::Fixed1(rows)
    }
}

impl From<Vec<[Id; 2]>> for TableStorage {
    fn from(rows: Vec<[Id; 2]>) -> Self {
        TableStorage::Fixed2(rows)
    }
}

impl From<Vec<[Id; 3]>> for TableStorage {
    fn from(rows: Vec<[Id; 3]>) -> Self {
        TableStorage::Fixed3(rows)
    }
}

impl From<Vec<[Id; 4]>> for TableStorage {
    fn from(rows: Vec<[Id; 4]>) -> Self {
        TableStorage::Fixed4(rows)
    }
}

impl From<Vec<[Id; 5]>> for TableStorage {
    fn from(rows: Vec<[Id; 5]>) -> Self {
        TableStorage::Fixed5(rows)
    }
}

/// A materialized intermediate result.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultTable {
    status: ResultStatus,
    nof_columns: usize,
    sorted_by: Option<usize>,
    storage: TableStorage,
}

impl ResultTable {
    /// Fresh `Pending` table with empty width-selected storage.
    pub fn new(nof_columns: usize) -> Self {
        Self {
            status: ResultStatus::Pending,
            nof_columns,
            sorted_by: None,
            storage: TableStorage::with_width(nof_columns),
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn nof_columns(&self) -> usize {
        self.nof_columns
    }

    pub fn sorted_by(&self) -> Option<usize> {
        self.sorted_by
    }

    pub fn set_sorted_by(&mut self, col: Option<usize>) {
        debug_assert!(col.map_or(true, |c| c < self.nof_columns));
        self.sorted_by = col;
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn row(&self, i: usize) -> &[Id] {
        self.storage.row(i)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Id]> + '_ {
        self.storage.rows()
    }

    pub fn push_row(&mut self, row: &[Id]) {
        debug_assert_eq!(row.len(), self.nof_columns);
        self.storage.push_row(row);
    }

    pub fn storage(&self) -> &TableStorage {
        &self.storage
    }

    /// Install fully-computed storage. The table must not have been written
    /// to before.
    pub fn replace_storage(&mut self, storage: TableStorage) {
        debug_assert!(self.storage.is_empty(), "storage already populated");
        self.storage = storage;
    }

    fn transition(&mut self, to: ResultStatus) {
        debug_assert!(
            !self.status.is_terminal() && to.rank() > self.status.rank(),
            "invalid status transition {:?} -> {:?}",
            self.status,
            to
        );
        self.status = to;
    }

    pub fn begin_compute(&mut self) {
        self.transition(ResultStatus::Computing);
    }

    pub fn finish(&mut self) {
        self.transition(ResultStatus::Finished);
    }

    pub fn abort(&mut self) {
        self.transition(ResultStatus::Aborted);
    }
}
