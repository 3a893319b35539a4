//! Evaluation of recommendations against held-out interactions.
//!
//! The [`Evaluator`] computes rating metrics (on the `(user, item)` pairs
//! present in both tables) and ranking metrics at `k`. Merging the two
//! tables is the expensive part of every metric, so the evaluator keeps the
//! most recent merge of each kind and reuses it while the same tables and
//! options are passed in.
//!
//! [`DiversityEvaluation`] covers the beyond-accuracy metrics, and
//! [`evaluate_recommender`] runs a full fit / recommend / evaluate cycle.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher;
use tracing::{debug, info, warn};

use crate::data::{check_same_base_dtype, ColumnNames, Table};
use crate::{ConfigurationError, DataError, EvaluationError, Recommender};

pub mod diversity;
pub mod rating;
pub mod ranking;

pub use self::diversity::DiversityEvaluation;
pub use self::ranking::{RankingOptions, RelevancyMethod};

use self::ranking::RankingMerge;
use self::rating::RatingMerge;

/// Holds the value computed for the most recent key.
#[derive(Debug)]
struct SingleEntryCache<T> {
    entry: RefCell<Option<(u64, Rc<T>)>>,
    hits: Cell<usize>,
}

impl<T> Default for SingleEntryCache<T> {
    fn default() -> Self {
        SingleEntryCache {
            entry: RefCell::new(None),
            hits: Cell::new(0),
        }
    }
}

impl<T> SingleEntryCache<T> {
    fn get_or_try_insert<E, F>(&self, key: u64, func: F) -> Result<Rc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some((cached_key, ref value)) = *self.entry.borrow() {
            if cached_key == key {
                self.hits.set(self.hits.get() + 1);
                debug!(key, "merge cache hit");
                return Ok(Rc::clone(value));
            }
        }

        debug!(key, "merge cache miss");
        let value = Rc::new(func()?);
        *self.entry.borrow_mut() = Some((key, Rc::clone(&value)));

        Ok(value)
    }
}

fn content_key<T: Hash>(value: &T) -> u64 {
    let mut hasher = SipHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// A metric computed by [`Evaluator::evaluate`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Root mean squared error.
    Rmse,
    /// Mean absolute error.
    Mae,
    /// Coefficient of determination.
    Rsquared,
    /// Explained variance.
    ExpVar,
    /// Area under the ROC curve.
    Auc,
    /// Binary cross-entropy.
    Logloss,
    /// Precision at k.
    PrecisionAtK,
    /// Recall at k.
    RecallAtK,
    /// Normalized discounted cumulative gain at k.
    NdcgAtK,
    /// Mean average precision at k.
    MapAtK,
}

impl Metric {
    /// Every metric, rating metrics first.
    pub const ALL: [Metric; 10] = [
        Metric::Rmse,
        Metric::Mae,
        Metric::Rsquared,
        Metric::ExpVar,
        Metric::Auc,
        Metric::Logloss,
        Metric::PrecisionAtK,
        Metric::RecallAtK,
        Metric::NdcgAtK,
        Metric::MapAtK,
    ];

    /// The metric's name.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
            Metric::Rsquared => "rsquared",
            Metric::ExpVar => "exp_var",
            Metric::Auc => "auc",
            Metric::Logloss => "logloss",
            Metric::PrecisionAtK => "precision_at_k",
            Metric::RecallAtK => "recall_at_k",
            Metric::NdcgAtK => "ndcg_at_k",
            Metric::MapAtK => "map_at_k",
        }
    }

    /// Whether the metric works on ranked lists rather than rating pairs.
    pub fn is_ranking(self) -> bool {
        match self {
            Metric::PrecisionAtK | Metric::RecallAtK | Metric::NdcgAtK | Metric::MapAtK => true,
            _ => false,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Metric {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .find(|metric| metric.name() == value)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownMetric(value.to_owned()))
    }
}

/// Computes rating and ranking metrics over pairs of interaction tables.
///
/// The true table needs the user, item and rating columns; the prediction
/// table the user, item and prediction columns. User and item columns must
/// have the same base type in both tables.
///
/// An evaluator is meant for one thread: its merge caches are not
/// synchronized.
#[derive(Debug)]
pub struct Evaluator {
    columns: ColumnNames,
    rating_cache: SingleEntryCache<RatingMerge>,
    ranking_cache: SingleEntryCache<RankingMerge>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new(ColumnNames::default())
    }
}

impl Evaluator {
    /// Build an evaluator reading the given columns.
    pub fn new(columns: ColumnNames) -> Self {
        Evaluator {
            columns,
            rating_cache: SingleEntryCache::default(),
            ranking_cache: SingleEntryCache::default(),
        }
    }

    /// The columns the evaluator reads.
    pub fn columns(&self) -> &ColumnNames {
        &self.columns
    }

    /// Number of metric calls that reused a cached merge.
    pub fn cache_hits(&self) -> usize {
        self.rating_cache.hits.get() + self.ranking_cache.hits.get()
    }

    fn validate(&self, truth: &Table, predictions: &Table) -> Result<(), DataError> {
        let columns = &self.columns;

        truth.require_columns(
            "true",
            &[
                columns.user.as_str(),
                columns.item.as_str(),
                columns.rating.as_str(),
            ],
        )?;
        predictions.require_columns(
            "prediction",
            &[
                columns.user.as_str(),
                columns.item.as_str(),
                columns.prediction.as_str(),
            ],
        )?;
        check_same_base_dtype(
            truth,
            predictions,
            &[columns.user.as_str(), columns.item.as_str()],
        )
    }

    fn rating_merge(
        &self,
        truth: &Table,
        predictions: &Table,
    ) -> Result<Rc<RatingMerge>, EvaluationError> {
        self.validate(truth, predictions)?;

        let key = content_key(&(truth, predictions, &self.columns));
        let merge = self.rating_cache.get_or_try_insert(key, || {
            rating::merge_rating_true_pred(truth, predictions, &self.columns)
        })?;

        if merge.is_empty() {
            warn!("no (user, item) pair is present in both tables");
        }

        Ok(merge)
    }

    fn ranking_merge(
        &self,
        truth: &Table,
        predictions: &Table,
        options: &RankingOptions,
    ) -> Result<Rc<RankingMerge>, EvaluationError> {
        options.validate()?;
        self.validate(truth, predictions)?;

        let key = content_key(&(truth, predictions, &self.columns, options));
        let merge = self.ranking_cache.get_or_try_insert(key, || {
            ranking::merge_ranking_true_pred(truth, predictions, &self.columns, options)
        })?;

        if merge.hits.is_empty() {
            warn!(n_users = merge.n_users, "no recommended item is relevant");
        }

        Ok(merge)
    }

    fn rating_metric<F>(
        &self,
        truth: &Table,
        predictions: &Table,
        func: F,
    ) -> Result<f64, EvaluationError>
    where
        F: FnOnce(&[f64], &[f64]) -> Result<f64, EvaluationError>,
    {
        let merge = self.rating_merge(truth, predictions)?;
        if merge.is_empty() {
            return Ok(0.0);
        }

        func(merge.truth.as_slice(), merge.predictions.as_slice())
    }

    /// Root mean squared error.
    pub fn rmse(&self, truth: &Table, predictions: &Table) -> Result<f64, EvaluationError> {
        self.rating_metric(truth, predictions, |t, p| Ok(rating::rmse(t, p)))
    }

    /// Mean absolute error.
    pub fn mae(&self, truth: &Table, predictions: &Table) -> Result<f64, EvaluationError> {
        self.rating_metric(truth, predictions, |t, p| Ok(rating::mae(t, p)))
    }

    /// Coefficient of determination.
    pub fn rsquared(&self, truth: &Table, predictions: &Table) -> Result<f64, EvaluationError> {
        self.rating_metric(truth, predictions, |t, p| Ok(rating::rsquared(t, p)))
    }

    /// Explained variance.
    pub fn exp_var(&self, truth: &Table, predictions: &Table) -> Result<f64, EvaluationError> {
        self.rating_metric(truth, predictions, |t, p| Ok(rating::exp_var(t, p)))
    }

    /// Area under the ROC curve; true ratings must be 0 or 1.
    pub fn auc(&self, truth: &Table, predictions: &Table) -> Result<f64, EvaluationError> {
        self.rating_metric(truth, predictions, rating::auc)
    }

    /// Log loss; true ratings must be 0 or 1 and predictions probabilities.
    pub fn logloss(&self, truth: &Table, predictions: &Table) -> Result<f64, EvaluationError> {
        self.rating_metric(truth, predictions, rating::logloss)
    }

    /// Precision at k.
    pub fn precision_at_k(
        &self,
        truth: &Table,
        predictions: &Table,
        options: &RankingOptions,
    ) -> Result<f64, EvaluationError> {
        let merge = self.ranking_merge(truth, predictions, options)?;
        Ok(ranking::precision(&merge, options.k))
    }

    /// Recall at k.
    pub fn recall_at_k(
        &self,
        truth: &Table,
        predictions: &Table,
        options: &RankingOptions,
    ) -> Result<f64, EvaluationError> {
        let merge = self.ranking_merge(truth, predictions, options)?;
        Ok(ranking::recall(&merge))
    }

    /// Normalized discounted cumulative gain at k.
    pub fn ndcg_at_k(
        &self,
        truth: &Table,
        predictions: &Table,
        options: &RankingOptions,
    ) -> Result<f64, EvaluationError> {
        let merge = self.ranking_merge(truth, predictions, options)?;
        Ok(ranking::ndcg(&merge, options.k))
    }

    /// Mean average precision at k.
    pub fn map_at_k(
        &self,
        truth: &Table,
        predictions: &Table,
        options: &RankingOptions,
    ) -> Result<f64, EvaluationError> {
        let merge = self.ranking_merge(truth, predictions, options)?;
        Ok(ranking::map(&merge))
    }

    /// Compute any metric. Rating metrics ignore `options`.
    pub fn evaluate(
        &self,
        metric: Metric,
        truth: &Table,
        predictions: &Table,
        options: &RankingOptions,
    ) -> Result<f64, EvaluationError> {
        match metric {
            Metric::Rmse => self.rmse(truth, predictions),
            Metric::Mae => self.mae(truth, predictions),
            Metric::Rsquared => self.rsquared(truth, predictions),
            Metric::ExpVar => self.exp_var(truth, predictions),
            Metric::Auc => self.auc(truth, predictions),
            Metric::Logloss => self.logloss(truth, predictions),
            Metric::PrecisionAtK => self.precision_at_k(truth, predictions, options),
            Metric::RecallAtK => self.recall_at_k(truth, predictions, options),
            Metric::NdcgAtK => self.ndcg_at_k(truth, predictions, options),
            Metric::MapAtK => self.map_at_k(truth, predictions, options),
        }
    }
}

/// Ranking and beyond-accuracy metrics of one recommender run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Report {
    /// Ranking options the metrics were computed with.
    pub options: RankingOptions,
    /// Number of recommendation rows.
    pub num_recommendations: usize,
    /// Precision at k.
    pub precision_at_k: f64,
    /// Recall at k.
    pub recall_at_k: f64,
    /// NDCG at k.
    pub ndcg_at_k: f64,
    /// MAP at k.
    pub map_at_k: f64,
    /// Mean user diversity.
    pub diversity: f64,
    /// Mean novelty.
    pub novelty: f64,
    /// Mean user serendipity.
    pub serendipity: f64,
    /// Catalog coverage.
    pub catalog_coverage: f64,
    /// Distributional coverage.
    pub distributional_coverage: f64,
}

/// Fit `model` on `train`, recommend `options.k` unseen items to every user
/// of `test` and evaluate the recommendations.
pub fn evaluate_recommender<R: Recommender>(
    model: &mut R,
    train: &Table,
    test: &Table,
    options: &RankingOptions,
) -> Result<Report, EvaluationError> {
    options.validate()?;
    model.fit(train)?;

    let recommendations = model.recommend_k_items(test, options.k, true, true)?;
    let columns = model.columns().clone();

    let evaluator = Evaluator::new(columns.clone());
    let diversity = DiversityEvaluation::new(train, &recommendations, &columns, None)?;

    let report = Report {
        options: *options,
        num_recommendations: recommendations.len(),
        precision_at_k: evaluator.precision_at_k(test, &recommendations, options)?,
        recall_at_k: evaluator.recall_at_k(test, &recommendations, options)?,
        ndcg_at_k: evaluator.ndcg_at_k(test, &recommendations, options)?,
        map_at_k: evaluator.map_at_k(test, &recommendations, options)?,
        diversity: diversity.diversity(),
        novelty: diversity.novelty(),
        serendipity: diversity.serendipity(),
        catalog_coverage: diversity.catalog_coverage(),
        distributional_coverage: diversity.distributional_coverage(),
    };

    info!(
        k = options.k,
        precision = report.precision_at_k,
        recall = report.recall_at_k,
        ndcg = report.ndcg_at_k,
        map = report.map_at_k,
        "evaluated recommendations"
    );

    Ok(report)
}
