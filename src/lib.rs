#![deny(missing_docs)]
//! # sar
//!
//! `sar` implements the Simple Algorithm for Recommendation: given a table of
//! past user-item interactions, it computes an item-item similarity matrix
//! from item co-occurrences and a user-item affinity matrix, and scores
//! unseen items for each user by multiplying the two.
//!
//! The crate also ships the evaluation side of the workflow: rating metrics
//! (RMSE, MAE, R², explained variance, AUC, log loss), ranking metrics
//! (precision, recall, NDCG and MAP at k) and beyond-accuracy metrics
//! (diversity, novelty, serendipity, coverage). The evaluation functions work
//! on any pair of interaction tables, not only on `sar` output.
//!
//! ## Example
//!
//! ```rust
//! use sar::data::Table;
//! use sar::evaluation::{Evaluator, RankingOptions};
//! use sar::models::sar::Hyperparameters;
//! use sar::models::SimilarityType;
//!
//! let train = Table::new()
//!     .with_column("userID", vec![1_i64, 1, 2, 2, 3, 3])?
//!     .with_column("itemID", vec![10_i64, 20, 10, 30, 20, 30])?
//!     .with_column("rating", vec![5.0, 3.0, 4.0, 2.0, 1.0, 4.0])?;
//!
//! let mut model = Hyperparameters::new()
//!     .similarity_type(SimilarityType::Jaccard)
//!     .build()?;
//! model.fit(&train)?;
//!
//! // Every user has seen two of the three items, so one candidate is left.
//! let recommendations = model.recommend_k_items(&train, 2, true, true)?;
//! assert_eq!(recommendations.len(), 3);
//!
//! let test = Table::new()
//!     .with_column("userID", vec![1_i64, 2, 3])?
//!     .with_column("itemID", vec![30_i64, 20, 10])?
//!     .with_column("rating", vec![1.0, 1.0, 1.0])?;
//!
//! let evaluator = Evaluator::default();
//! let options = RankingOptions::default().k(1);
//! let precision = evaluator.precision_at_k(&test, &recommendations, &options)?;
//! assert!((precision - 1.0).abs() < 1e-12);
//! # Ok::<(), failure::Error>(())
//! ```

pub mod data;
pub mod evaluation;
pub mod models;
pub mod sparse;

use failure::Fail;

use data::{ColumnNames, Table};

/// Alias for dense user indices.
pub type UserIdx = usize;
/// Alias for dense item indices.
pub type ItemIdx = usize;
/// Alias for timestamps, in seconds since the epoch.
pub type Timestamp = f64;

/// Errors raised while reading or validating interaction tables.
#[derive(Debug, Fail)]
pub enum DataError {
    /// One or more required columns are absent.
    #[fail(display = "Missing columns in {} table: {:?}", table, columns)]
    MissingColumns {
        /// Role of the table being validated.
        table: String,
        /// Every missing column name.
        columns: Vec<String>,
    },
    /// The same column has different base types in two tables.
    #[fail(
        display = "Column {} has type {} in one table and {} in the other",
        column, left, right
    )]
    ColumnTypeMismatch {
        /// Column name.
        column: String,
        /// Type in the first table.
        left: data::DType,
        /// Type in the second table.
        right: data::DType,
    },
    /// A column has a type the operation cannot use.
    #[fail(display = "Column {} has type {}, expected {}", column, found, expected)]
    InvalidColumnType {
        /// Column name.
        column: String,
        /// The type found.
        found: data::DType,
        /// Description of the accepted types.
        expected: String,
    },
    /// A column's length does not match the table.
    #[fail(
        display = "Column {} has {} rows but the table has {}",
        column, found, expected
    )]
    LengthMismatch {
        /// Column name.
        column: String,
        /// Rows in the table.
        expected: usize,
        /// Rows in the column.
        found: usize,
    },
    /// A column name appears twice.
    #[fail(display = "Duplicate column: {}", column)]
    DuplicateColumn {
        /// Column name.
        column: String,
    },
    /// CSV reading or writing failed.
    #[fail(display = "CSV error: {}", _0)]
    Csv(#[cause] csv::Error),
    /// Underlying I/O failure.
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] std::io::Error),
    /// Invalid configuration of a table operation.
    #[fail(display = "{}", _0)]
    Configuration(#[cause] ConfigurationError),
}

impl From<csv::Error> for DataError {
    fn from(err: csv::Error) -> Self {
        DataError::Csv(err)
    }
}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::Io(err)
    }
}

impl From<ConfigurationError> for DataError {
    fn from(err: ConfigurationError) -> Self {
        DataError::Configuration(err)
    }
}

/// Invalid configuration values or unknown option tags.
#[derive(Debug, Fail)]
pub enum ConfigurationError {
    /// Similarity tag is not one of cooccurrence, jaccard, lift.
    #[fail(display = "Unknown similarity type: {}", _0)]
    UnknownSimilarityType(String),
    /// Relevancy tag is not one of top_k, by_threshold, none.
    #[fail(display = "Unknown relevancy method: {}", _0)]
    UnknownRelevancyMethod(String),
    /// Metric name is not recognised.
    #[fail(display = "Unknown metric: {}", _0)]
    UnknownMetric(String),
    /// Decay combination tag is not one of min, product, indicator.
    #[fail(display = "Unknown decay combination: {}", _0)]
    UnknownDecayCombination(String),
    /// Threshold is negative or not finite.
    #[fail(display = "Threshold must be a finite non-negative number, got {}", _0)]
    NegativeThreshold(f64),
    /// `k` or `top_k` below 1.
    #[fail(display = "top k must be at least 1, got {}", _0)]
    InvalidTopK(usize),
    /// Half-life is zero, negative or not finite.
    #[fail(display = "Time decay half-life must be positive and finite, got {}", _0)]
    InvalidHalfLife(f64),
    /// Reference time is not finite.
    #[fail(display = "time_now must be finite, got {}", _0)]
    InvalidTimeNow(f64),
    /// Relevancy threshold is not finite.
    #[fail(display = "Relevancy threshold must be finite, got {}", _0)]
    InvalidRelevancyThreshold(f64),
    /// Test fraction outside of `[0, 1]` or NaN.
    #[fail(display = "Test fraction must lie in [0, 1], got {}", _0)]
    InvalidTestFraction(f64),
}

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// No interactions were given.
    #[fail(display = "No interactions were supplied.")]
    NoInteractions,
    /// Invalid configuration.
    #[fail(display = "{}", _0)]
    Configuration(#[cause] ConfigurationError),
    /// Invalid input table.
    #[fail(display = "{}", _0)]
    Data(#[cause] DataError),
}

impl From<ConfigurationError> for FittingError {
    fn from(err: ConfigurationError) -> Self {
        FittingError::Configuration(err)
    }
}

impl From<DataError> for FittingError {
    fn from(err: DataError) -> Self {
        FittingError::Data(err)
    }
}

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// The model has not been fitted yet.
    #[fail(display = "Model must be fitted first.")]
    NotFitted,
    /// A user id was not present at fit time.
    #[fail(display = "User {} was not present in the training data.", _0)]
    UnknownUser(data::Id),
    /// An item id was not present at fit time.
    #[fail(display = "Item {} was not present in the training data.", _0)]
    UnknownItem(data::Id),
    /// Invalid configuration.
    #[fail(display = "{}", _0)]
    Configuration(#[cause] ConfigurationError),
    /// Invalid input table.
    #[fail(display = "{}", _0)]
    Data(#[cause] DataError),
}

impl From<ConfigurationError> for PredictionError {
    fn from(err: ConfigurationError) -> Self {
        PredictionError::Configuration(err)
    }
}

impl From<DataError> for PredictionError {
    fn from(err: DataError) -> Self {
        PredictionError::Data(err)
    }
}

/// Evaluation error types.
#[derive(Debug, Fail)]
pub enum EvaluationError {
    /// Invalid input table.
    #[fail(display = "{}", _0)]
    Data(#[cause] DataError),
    /// Invalid configuration.
    #[fail(display = "{}", _0)]
    Configuration(#[cause] ConfigurationError),
    /// Recommendations repeat interactions from the training data.
    #[fail(
        display = "Recommendations contain {} user-item pairs already present in the training data",
        count
    )]
    OverlappingInteractions {
        /// Number of overlapping pairs.
        count: usize,
    },
    /// Ratings used as labels are not all 0 or 1.
    #[fail(display = "Labels must be 0 or 1, found {}", _0)]
    NonBinaryLabels(f64),
    /// The metric has no value for the given input.
    #[fail(display = "{} is undefined: {}", metric, reason)]
    UndefinedMetric {
        /// Metric name.
        metric: String,
        /// Why it is undefined.
        reason: String,
    },
    /// Fitting the evaluated model failed.
    #[fail(display = "{}", _0)]
    Fitting(#[cause] FittingError),
    /// Producing recommendations failed.
    #[fail(display = "{}", _0)]
    Prediction(#[cause] PredictionError),
}

impl From<DataError> for EvaluationError {
    fn from(err: DataError) -> Self {
        EvaluationError::Data(err)
    }
}

impl From<ConfigurationError> for EvaluationError {
    fn from(err: ConfigurationError) -> Self {
        EvaluationError::Configuration(err)
    }
}

impl From<FittingError> for EvaluationError {
    fn from(err: FittingError) -> Self {
        EvaluationError::Fitting(err)
    }
}

impl From<PredictionError> for EvaluationError {
    fn from(err: PredictionError) -> Self {
        EvaluationError::Prediction(err)
    }
}

/// Trait describing models that are fitted on an interaction table and
/// produce ranked recommendation tables.
pub trait Recommender {
    /// Column names the model reads from and writes to.
    fn columns(&self) -> &ColumnNames;
    /// Fit the model, replacing any previously fitted state.
    fn fit(&mut self, interactions: &Table) -> Result<(), FittingError>;
    /// Return up to `top_k` scored items for every user in `test`.
    fn recommend_k_items(
        &self,
        test: &Table,
        top_k: usize,
        sort_top_k: bool,
        remove_seen: bool,
    ) -> Result<Table, PredictionError>;
}

pub(crate) fn check_top_k(top_k: usize) -> Result<usize, ConfigurationError> {
    if top_k == 0 {
        Err(ConfigurationError::InvalidTopK(top_k))
    } else {
        Ok(top_k)
    }
}
