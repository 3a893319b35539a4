//! In-memory interaction tables.
//!
//! A [`Table`] is a small column store: named, equally long columns of
//! integers, floats or strings. It is the data contract between the
//! recommender, the evaluation functions and whatever loads the data.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, DataError};

/// Default user column name.
pub const DEFAULT_USER_COL: &str = "userID";
/// Default item column name.
pub const DEFAULT_ITEM_COL: &str = "itemID";
/// Default rating column name.
pub const DEFAULT_RATING_COL: &str = "rating";
/// Default timestamp column name.
pub const DEFAULT_TIMESTAMP_COL: &str = "timestamp";
/// Default prediction column name.
pub const DEFAULT_PREDICTION_COL: &str = "prediction";
/// Default relevance column name.
pub const DEFAULT_RELEVANCE_COL: &str = "relevance";

/// A user or item identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Integer identifier.
    Int(i64),
    /// String identifier.
    Str(String),
}

impl Id {
    fn as_int(&self) -> Option<i64> {
        match self {
            Id::Int(value) => Some(*value),
            Id::Str(_) => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Id::Int(value) => write!(f, "{}", value),
            Id::Str(value) => write!(f, "{}", value),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Int(value)
    }
}

impl<'a> From<&'a str> for Id {
    fn from(value: &'a str) -> Self {
        Id::Str(value.to_owned())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

/// Base type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 64-bit signed integers.
    Int,
    /// 64-bit floats.
    Float,
    /// UTF-8 strings.
    Str,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DType::Int => "int64",
            DType::Float => "float64",
            DType::Str => "str",
        };
        write!(f, "{}", name)
    }
}

/// A single typed column.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// Integer values.
    Int(Vec<i64>),
    /// Float values.
    Float(Vec<f64>),
    /// String values.
    Str(Vec<String>),
}

impl Column {
    /// Build an identifier column. Integer ids produce an integer column
    /// when `dtype` asks for one; anything else is stored as strings.
    pub fn from_ids(ids: Vec<Id>, dtype: DType) -> Column {
        if dtype == DType::Int && ids.iter().all(|id| id.as_int().is_some()) {
            Column::Int(ids.iter().filter_map(Id::as_int).collect())
        } else {
            Column::Str(
                ids.into_iter()
                    .map(|id| match id {
                        Id::Str(value) => value,
                        Id::Int(value) => value.to_string(),
                    })
                    .collect(),
            )
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            Column::Int(values) => values.len(),
            Column::Float(values) => values.len(),
            Column::Str(values) => values.len(),
        }
    }

    /// Whether the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base type of the column.
    pub fn dtype(&self) -> DType {
        match self {
            Column::Int(_) => DType::Int,
            Column::Float(_) => DType::Float,
            Column::Str(_) => DType::Str,
        }
    }

    /// Values as identifiers; `None` for float columns.
    pub fn ids(&self) -> Option<Vec<Id>> {
        match self {
            Column::Int(values) => Some(values.iter().map(|&x| Id::Int(x)).collect()),
            Column::Str(values) => Some(values.iter().map(|x| Id::Str(x.clone())).collect()),
            Column::Float(_) => None,
        }
    }

    /// Values as floats; `None` for string columns.
    pub fn floats(&self) -> Option<Vec<f64>> {
        match self {
            Column::Int(values) => Some(values.iter().map(|&x| x as f64).collect()),
            Column::Float(values) => Some(values.clone()),
            Column::Str(_) => None,
        }
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Int(values) => Column::Int(rows.iter().map(|&row| values[row]).collect()),
            Column::Float(values) => Column::Float(rows.iter().map(|&row| values[row]).collect()),
            Column::Str(values) => {
                Column::Str(rows.iter().map(|&row| values[row].clone()).collect())
            }
        }
    }

    fn cell(&self, row: usize) -> String {
        match self {
            Column::Int(values) => values[row].to_string(),
            Column::Float(values) => values[row].to_string(),
            Column::Str(values) => values[row].clone(),
        }
    }

    fn parse(cells: Vec<String>) -> Column {
        let ints: Result<Vec<i64>, _> = cells.iter().map(|x| x.parse()).collect();
        if let Ok(values) = ints {
            return Column::Int(values);
        }
        let floats: Result<Vec<f64>, _> = cells.iter().map(|x| x.parse()).collect();
        if let Ok(values) = floats {
            return Column::Float(values);
        }
        Column::Str(cells)
    }
}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dtype().hash(state);
        match self {
            Column::Int(values) => values.hash(state),
            Column::Float(values) => {
                values.len().hash(state);
                for value in values {
                    value.to_bits().hash(state);
                }
            }
            Column::Str(values) => values.hash(state),
        }
    }
}

impl From<Vec<i64>> for Column {
    fn from(values: Vec<i64>) -> Self {
        Column::Int(values)
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Column::Float(values)
    }
}

impl From<Vec<String>> for Column {
    fn from(values: Vec<String>) -> Self {
        Column::Str(values)
    }
}

impl<'a> From<Vec<&'a str>> for Column {
    fn from(values: Vec<&'a str>) -> Self {
        Column::Str(values.into_iter().map(str::to_owned).collect())
    }
}

/// Names of the columns holding each field of an interaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    /// User id column.
    pub user: String,
    /// Item id column.
    pub item: String,
    /// Rating (ground truth) column.
    pub rating: String,
    /// Timestamp column, in seconds.
    pub timestamp: String,
    /// Prediction score column.
    pub prediction: String,
    /// Relevance column used by serendipity.
    pub relevance: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            user: DEFAULT_USER_COL.to_owned(),
            item: DEFAULT_ITEM_COL.to_owned(),
            rating: DEFAULT_RATING_COL.to_owned(),
            timestamp: DEFAULT_TIMESTAMP_COL.to_owned(),
            prediction: DEFAULT_PREDICTION_COL.to_owned(),
            relevance: DEFAULT_RELEVANCE_COL.to_owned(),
        }
    }
}

/// Ordered collection of equally long, named columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    /// Build an empty table.
    pub fn new() -> Self {
        Table::default()
    }

    /// Add a column, consuming and returning the table.
    pub fn with_column<S: Into<String>, C: Into<Column>>(
        mut self,
        name: S,
        column: C,
    ) -> Result<Self, DataError> {
        self.push_column(name, column)?;
        Ok(self)
    }

    /// Add a column in place.
    pub fn push_column<S: Into<String>, C: Into<Column>>(
        &mut self,
        name: S,
        column: C,
    ) -> Result<(), DataError> {
        let name = name.into();
        let column = column.into();

        if self.has_column(&name) {
            return Err(DataError::DuplicateColumn { column: name });
        }
        if !self.columns.is_empty() && column.len() != self.len() {
            return Err(DataError::LengthMismatch {
                column: name,
                expected: self.len(),
                found: column.len(),
            });
        }

        self.names.push(name);
        self.columns.push(column);

        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|x| x == name)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|x| x == name)
            .map(|idx| &self.columns[idx])
    }

    /// Base type of a column.
    pub fn dtype(&self, name: &str) -> Option<DType> {
        self.column(name).map(Column::dtype)
    }

    /// Fail unless every column in `names` exists. The error names all
    /// missing columns and the role of the table.
    pub fn require_columns(&self, table: &str, names: &[&str]) -> Result<(), DataError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.has_column(name))
            .map(|name| (*name).to_owned())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DataError::MissingColumns {
                table: table.to_owned(),
                columns: missing,
            })
        }
    }

    fn require(&self, name: &str) -> Result<&Column, DataError> {
        self.column(name).ok_or_else(|| DataError::MissingColumns {
            table: "input".to_owned(),
            columns: vec![name.to_owned()],
        })
    }

    /// Read an integer or string column as identifiers.
    pub fn ids(&self, name: &str) -> Result<Vec<Id>, DataError> {
        let column = self.require(name)?;
        column.ids().ok_or_else(|| DataError::InvalidColumnType {
            column: name.to_owned(),
            found: column.dtype(),
            expected: "int64 or str".to_owned(),
        })
    }

    /// Read a numeric column as floats.
    pub fn floats(&self, name: &str) -> Result<Vec<f64>, DataError> {
        let column = self.require(name)?;
        column.floats().ok_or_else(|| DataError::InvalidColumnType {
            column: name.to_owned(),
            found: column.dtype(),
            expected: "int64 or float64".to_owned(),
        })
    }

    /// Build a new table from a subset of rows, in the given order.
    pub fn select(&self, rows: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|x| x.select(rows)).collect(),
        }
    }

    /// Read a CSV file with a header row. Column types are inferred: a
    /// column is integer if every cell parses as one, float if every cell
    /// parses as a number, and string otherwise.
    pub fn from_reader<R: Read>(reader: R) -> Result<Table, DataError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

        for record in reader.records() {
            let record = record?;
            for (column, value) in cells.iter_mut().zip(record.iter()) {
                column.push(value.to_owned());
            }
        }

        let mut table = Table::new();
        for (name, values) in headers.iter().zip(cells.into_iter()) {
            table.push_column(name, Column::parse(values))?;
        }

        Ok(table)
    }

    /// Read a CSV file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Table, DataError> {
        Table::from_reader(File::open(path)?)
    }

    /// Write the table as CSV with a header row.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), DataError> {
        let mut writer = csv::Writer::from_writer(writer);

        writer.write_record(&self.names)?;
        for row in 0..self.len() {
            writer.write_record(self.columns.iter().map(|column| column.cell(row)))?;
        }
        writer.flush()?;

        Ok(())
    }
}

impl Hash for Table {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.names.hash(state);
        self.columns.hash(state);
    }
}

/// Fail unless `columns` have the same base type in both tables.
pub fn check_same_base_dtype(
    left: &Table,
    right: &Table,
    columns: &[&str],
) -> Result<(), DataError> {
    for &column in columns {
        if let (Some(left_type), Some(right_type)) = (left.dtype(column), right.dtype(column)) {
            if left_type != right_type {
                return Err(DataError::ColumnTypeMismatch {
                    column: column.to_owned(),
                    left: left_type,
                    right: right_type,
                });
            }
        }
    }

    Ok(())
}

fn check_test_fraction(test_fraction: f64) -> Result<f64, ConfigurationError> {
    if (0.0..=1.0).contains(&test_fraction) {
        Ok(test_fraction)
    } else {
        Err(ConfigurationError::InvalidTestFraction(test_fraction))
    }
}

/// Split rows uniformly at random into `(train, test)`.
///
/// Fails unless `test_fraction` lies in `[0, 1]`.
pub fn random_split<R: Rng>(
    table: &Table,
    rng: &mut R,
    test_fraction: f64,
) -> Result<(Table, Table), ConfigurationError> {
    let test_fraction = check_test_fraction(test_fraction)?;

    let mut rows: Vec<usize> = (0..table.len()).collect();
    rows.shuffle(rng);

    let cutoff = (test_fraction * rows.len() as f64) as usize;
    let (test, train) = rows.split_at(cutoff);

    Ok((table.select(train), table.select(test)))
}

/// Split every user's rows into `(train, test)`, sending
/// `floor(n * test_fraction)` of each user's `n` rows to the test table.
/// At least one row per user always stays in training, so every test user
/// is also a training user. Row order is preserved within both tables.
/// Fails unless `test_fraction` lies in `[0, 1]`.
pub fn stratified_split<R: Rng>(
    table: &Table,
    user_col: &str,
    rng: &mut R,
    test_fraction: f64,
) -> Result<(Table, Table), DataError> {
    let test_fraction = check_test_fraction(test_fraction)?;
    table.require_columns("input", &[user_col])?;
    let users = table.ids(user_col)?;

    let mut order: Vec<&Id> = Vec::new();
    let mut rows_by_user: HashMap<&Id, Vec<usize>> = HashMap::new();
    for (row, user) in users.iter().enumerate() {
        rows_by_user
            .entry(user)
            .or_insert_with(|| {
                order.push(user);
                Vec::new()
            })
            .push(row);
    }

    let mut test_rows = HashSet::new();
    for user in order {
        if let Some(rows) = rows_by_user.get_mut(user) {
            rows.shuffle(rng);
            let num_test = ((rows.len() as f64 * test_fraction) as usize).min(rows.len() - 1);
            test_rows.extend(rows[..num_test].iter().cloned());
        }
    }

    let (test, train): (Vec<usize>, Vec<usize>) =
        (0..table.len()).partition(|row| test_rows.contains(row));

    Ok((table.select(&train), table.select(&test)))
}
