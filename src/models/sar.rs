//! Simple Algorithm for Recommendation (SAR).
//!
//! SAR estimates three sparse matrices from an interaction table:
//!
//! - the user affinity matrix `A`, where `A[u][i]` accumulates the
//!   (optionally time-decayed) ratings of user `u` for item `i`,
//! - the item co-occurrence matrix `C`, where `C[i][j]` counts the users
//!   who interacted with both `i` and `j`, and
//! - the item similarity matrix `S`, a normalisation of `C`.
//!
//! Recommendation scores for a user are the row `A[u] · S`.
//!
//! With time decay enabled every interaction is weighted by
//! ```text
//! w = 2^(-(time_now - t) / half_life)
//! ```
//! so that interactions one half-life old count half as much as fresh ones.
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{exponential_decay, lift, DecayCombination, SimilarityType};
use crate::data::{Column, ColumnNames, DType, Id, Table};
use crate::sparse::CsrMatrix;
use crate::{
    check_top_k, ConfigurationError, FittingError, ItemIdx, PredictionError, Recommender,
    UserIdx,
};

/// Default time decay half-life: 30 days, in seconds.
pub const DEFAULT_TIME_DECAY_HALF_LIFE: f64 = 30.0 * 24.0 * 60.0 * 60.0;

/// Hyperparameters describing the SAR model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Hyperparameters {
    columns: ColumnNames,
    similarity_type: SimilarityType,
    threshold: f64,
    time_decay: bool,
    time_decay_half_life: f64,
    time_now: Option<f64>,
    decay_combination: DecayCombination,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new()
    }
}

impl Hyperparameters {
    /// Build new hyperparameters with the default settings: Jaccard
    /// similarity, threshold 1, no time decay.
    pub fn new() -> Self {
        Hyperparameters {
            columns: ColumnNames::default(),
            similarity_type: SimilarityType::Jaccard,
            threshold: 1.0,
            time_decay: false,
            time_decay_half_life: DEFAULT_TIME_DECAY_HALF_LIFE,
            time_now: None,
            decay_combination: DecayCombination::Min,
        }
    }

    /// Set the column names.
    pub fn columns(mut self, columns: ColumnNames) -> Self {
        self.columns = columns;
        self
    }

    /// Set the similarity transform.
    pub fn similarity_type(mut self, similarity_type: SimilarityType) -> Self {
        self.similarity_type = similarity_type;
        self
    }

    /// Set the minimum rating for an explicit interaction to be counted.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Enable or disable time decay.
    pub fn time_decay(mut self, time_decay: bool) -> Self {
        self.time_decay = time_decay;
        self
    }

    /// Set the time decay half-life, in seconds.
    pub fn time_decay_half_life(mut self, half_life: f64) -> Self {
        self.time_decay_half_life = half_life;
        self
    }

    /// Set the reference time for decay. Defaults to the latest timestamp
    /// in the fitted data.
    pub fn time_now(mut self, time_now: f64) -> Self {
        self.time_now = Some(time_now);
        self
    }

    /// Set how decayed weights combine into co-occurrences.
    pub fn decay_combination(mut self, decay_combination: DecayCombination) -> Self {
        self.decay_combination = decay_combination;
        self
    }

    /// The column names the model reads and writes.
    pub fn column_names(&self) -> &ColumnNames {
        &self.columns
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.threshold >= 0.0) || !self.threshold.is_finite() {
            return Err(ConfigurationError::NegativeThreshold(self.threshold));
        }
        if !(self.time_decay_half_life > 0.0) || !self.time_decay_half_life.is_finite() {
            return Err(ConfigurationError::InvalidHalfLife(
                self.time_decay_half_life,
            ));
        }
        if let Some(time_now) = self.time_now {
            if !time_now.is_finite() {
                return Err(ConfigurationError::InvalidTimeNow(time_now));
            }
        }

        Ok(())
    }

    /// Validate the hyperparameters and build an unfitted model.
    pub fn build(self) -> Result<SarModel, ConfigurationError> {
        self.validate()?;

        Ok(SarModel {
            hyper: self,
            model: None,
        })
    }
}

/// Bijection between observed ids and dense indices, in order of first
/// appearance.
#[derive(Clone, Debug)]
struct IdDictionary {
    dtype: DType,
    ids: Vec<Id>,
    indices: HashMap<Id, usize>,
}

impl IdDictionary {
    /// Build the dictionary and return it with the index of every id.
    fn encode(ids: &[Id], dtype: DType) -> (Self, Vec<usize>) {
        let mut dictionary = IdDictionary {
            dtype,
            ids: Vec::new(),
            indices: HashMap::new(),
        };

        let encoded = ids
            .iter()
            .map(|id| {
                if let Some(&idx) = dictionary.indices.get(id) {
                    idx
                } else {
                    let idx = dictionary.ids.len();
                    dictionary.ids.push(id.clone());
                    dictionary.indices.insert(id.clone(), idx);
                    idx
                }
            })
            .collect();

        (dictionary, encoded)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn index(&self, id: &Id) -> Option<usize> {
        self.indices.get(id).cloned()
    }

    fn id(&self, idx: usize) -> &Id {
        &self.ids[idx]
    }
}

#[derive(Clone, Debug)]
struct ModelData {
    users: IdDictionary,
    items: IdDictionary,
    user_affinity: CsrMatrix,
    cooccurrence: CsrMatrix,
    item_similarity: CsrMatrix,
    item_frequencies: Vec<f64>,
    seen_items: Vec<HashSet<ItemIdx>>,
}

impl ModelData {
    fn score_user(&self, user: UserIdx) -> Array1<f64> {
        let (items, affinities) = self.user_affinity.row(user);
        self.item_similarity.weighted_row_sum(items, affinities)
    }

    fn user(&self, id: &Id) -> Result<UserIdx, PredictionError> {
        self.users
            .index(id)
            .ok_or_else(|| PredictionError::UnknownUser(id.clone()))
    }

    fn item(&self, id: &Id) -> Result<ItemIdx, PredictionError> {
        self.items
            .index(id)
            .ok_or_else(|| PredictionError::UnknownItem(id.clone()))
    }
}

/// Co-occurrence of items across the rows of a user-item incidence matrix.
///
/// Built one item row at a time through the transposed incidence, so only
/// the non-zero co-occurrences are ever stored.
fn item_cooccurrence(incidence: &CsrMatrix, combination: DecayCombination) -> CsrMatrix {
    let num_items = incidence.num_cols();
    let by_item = incidence.transpose();

    let mut accumulator = vec![0.0; num_items];
    let mut touched = vec![false; num_items];
    let mut columns = Vec::new();
    let mut triplets = Vec::new();

    for first in 0..num_items {
        let (users, first_weights) = by_item.row(first);
        for (&user, &first_weight) in users.iter().zip(first_weights.iter()) {
            let (items, weights) = incidence.row(user);
            for (&second, &second_weight) in items.iter().zip(weights.iter()) {
                if !touched[second] {
                    touched[second] = true;
                    columns.push(second);
                }
                accumulator[second] += combination.combine(first_weight, second_weight);
            }
        }

        columns.sort_unstable();
        for &second in &columns {
            triplets.push((first, second, accumulator[second]));
            accumulator[second] = 0.0;
            touched[second] = false;
        }
        columns.clear();
    }

    CsrMatrix::from_triplets(num_items, num_items, triplets)
}

fn by_score(first: &(usize, f64), second: &(usize, f64)) -> Ordering {
    second
        .1
        .total_cmp(&first.1)
        .then_with(|| first.0.cmp(&second.0))
}

/// The `top_k` best scored indices outside of `excluded`, by descending
/// score with ties broken by ascending index. Unsorted results come back
/// in ascending index order.
fn select_top_k(
    scores: &Array1<f64>,
    excluded: &HashSet<usize>,
    top_k: usize,
    sort_top_k: bool,
) -> Vec<(usize, f64)> {
    let mut candidates: Vec<(usize, f64)> = scores
        .iter()
        .enumerate()
        .filter(|(idx, _)| !excluded.contains(idx))
        .map(|(idx, &score)| (idx, score))
        .collect();

    if candidates.len() > top_k {
        candidates.select_nth_unstable_by(top_k - 1, by_score);
        candidates.truncate(top_k);
    }

    if sort_top_k {
        candidates.sort_by(by_score);
    } else {
        candidates.sort_by_key(|&(idx, _)| idx);
    }

    candidates
}

/// SAR recommender.
#[derive(Clone, Debug)]
pub struct SarModel {
    hyper: Hyperparameters,
    model: Option<ModelData>,
}

impl SarModel {
    /// The hyperparameters the model was built with.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// Whether `fit` has completed successfully.
    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    /// Fit the model on an interaction table.
    ///
    /// The table needs the user and item columns; the rating column is
    /// optional (implicit feedback of weight 1 when absent) and the
    /// timestamp column is required when time decay is enabled. Every fit
    /// recomputes all matrices from scratch.
    pub fn fit(&mut self, interactions: &Table) -> Result<(), FittingError> {
        self.model = None;

        let hyper = &self.hyper;
        let columns = &hyper.columns;

        if interactions.is_empty() {
            return Err(FittingError::NoInteractions);
        }

        let mut required = vec![columns.user.as_str(), columns.item.as_str()];
        if hyper.time_decay {
            required.push(columns.timestamp.as_str());
        }
        interactions.require_columns("interactions", &required)?;

        let (users, user_indices) = IdDictionary::encode(
            &interactions.ids(&columns.user)?,
            interactions.dtype(&columns.user).unwrap_or(DType::Int),
        );
        let (items, item_indices) = IdDictionary::encode(
            &interactions.ids(&columns.item)?,
            interactions.dtype(&columns.item).unwrap_or(DType::Int),
        );
        let (num_users, num_items) = (users.len(), items.len());

        let ratings = if interactions.has_column(&columns.rating) {
            Some(interactions.floats(&columns.rating)?)
        } else {
            debug!("no rating column, treating interactions as implicit");
            None
        };

        let decays = if hyper.time_decay {
            let timestamps = interactions.floats(&columns.timestamp)?;
            let time_now = hyper.time_now.unwrap_or_else(|| {
                timestamps
                    .iter()
                    .cloned()
                    .fold(std::f64::NEG_INFINITY, f64::max)
            });
            debug!(time_now, half_life = hyper.time_decay_half_life, "applying time decay");

            Some(
                timestamps
                    .iter()
                    .map(|&timestamp| {
                        exponential_decay(timestamp, time_now, hyper.time_decay_half_life)
                    })
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };

        let mut seen_items = vec![HashSet::new(); num_users];
        let mut affinity_triplets = Vec::with_capacity(interactions.len());
        let mut incidence_triplets = Vec::with_capacity(interactions.len());
        let mut item_frequencies = vec![0.0; num_items];

        for (row, (&user, &item)) in user_indices.iter().zip(item_indices.iter()).enumerate() {
            seen_items[user].insert(item);

            let rating = match ratings {
                Some(ref ratings) if !(ratings[row] >= hyper.threshold) => continue,
                Some(ref ratings) => ratings[row],
                None => 1.0,
            };
            let decay = decays.as_ref().map_or(1.0, |decays| decays[row]);

            affinity_triplets.push((user, item, rating * decay));
            incidence_triplets.push((user, item, decay));
            item_frequencies[item] += 1.0;
        }

        debug!(
            kept = affinity_triplets.len(),
            dropped = interactions.len() - affinity_triplets.len(),
            threshold = hyper.threshold,
            "filtered interactions"
        );

        let user_affinity = CsrMatrix::from_triplets(num_users, num_items, affinity_triplets);
        let incidence = CsrMatrix::from_triplets(num_users, num_items, incidence_triplets);
        let incidence = if hyper.time_decay {
            incidence
        } else {
            incidence.map_entries(|_, _, _| 1.0)
        };

        let cooccurrence = item_cooccurrence(&incidence, hyper.decay_combination);
        let item_similarity = match hyper.similarity_type {
            // Lift divides by the product of two diagonals and is only
            // bounded by 1 on whole counts.
            SimilarityType::Lift if hyper.time_decay => {
                lift(&item_cooccurrence(&incidence, DecayCombination::Indicator))
            }
            similarity_type => similarity_type.transform(&cooccurrence),
        };

        info!(
            num_users,
            num_items,
            affinity_nnz = user_affinity.nnz(),
            similarity_nnz = item_similarity.nnz(),
            similarity_type = %hyper.similarity_type,
            "fitted SAR model"
        );

        self.model = Some(ModelData {
            users,
            items,
            user_affinity,
            cooccurrence,
            item_similarity,
            item_frequencies,
            seen_items,
        });

        Ok(())
    }

    fn fitted(&self) -> Result<&ModelData, PredictionError> {
        self.model.as_ref().ok_or(PredictionError::NotFitted)
    }

    /// Recommend the `top_k` highest scored items for every distinct user
    /// in `test`, as a `(user, item, prediction)` table.
    ///
    /// Items are ranked by descending score with ties broken by ascending
    /// item index. With `remove_seen`, items the user interacted with at fit
    /// time are never returned. Users with fewer eligible items get fewer
    /// rows.
    pub fn recommend_k_items(
        &self,
        test: &Table,
        top_k: usize,
        sort_top_k: bool,
        remove_seen: bool,
    ) -> Result<Table, PredictionError> {
        let model = self.fitted()?;
        let top_k = check_top_k(top_k)?;
        let columns = &self.hyper.columns;

        test.require_columns("test", &[columns.user.as_str()])?;

        let no_exclusions = HashSet::new();
        let mut user_ids = Vec::new();
        let mut item_ids = Vec::new();
        let mut predictions = Vec::new();

        for user_id in test.ids(&columns.user)?.into_iter().unique() {
            let user = model.user(&user_id)?;
            let scores = model.score_user(user);
            let excluded = if remove_seen {
                &model.seen_items[user]
            } else {
                &no_exclusions
            };

            for (item, score) in select_top_k(&scores, excluded, top_k, sort_top_k) {
                user_ids.push(user_id.clone());
                item_ids.push(model.items.id(item).clone());
                predictions.push(score);
            }
        }

        debug!(rows = predictions.len(), top_k, remove_seen, "recommended items");

        let table = Table::new()
            .with_column(
                columns.user.as_str(),
                Column::from_ids(user_ids, model.users.dtype),
            )?
            .with_column(
                columns.item.as_str(),
                Column::from_ids(item_ids, model.items.dtype),
            )?
            .with_column(columns.prediction.as_str(), predictions)?;

        Ok(table)
    }

    /// Score the `(user, item)` pairs of `test`, row by row.
    pub fn predict(&self, test: &Table) -> Result<Table, PredictionError> {
        let model = self.fitted()?;
        let columns = &self.hyper.columns;

        test.require_columns("test", &[columns.user.as_str(), columns.item.as_str()])?;
        let user_ids = test.ids(&columns.user)?;
        let item_ids = test.ids(&columns.item)?;

        let predictions = user_ids
            .iter()
            .zip(item_ids.iter())
            .map(|(user_id, item_id)| -> Result<f64, PredictionError> {
                let user = model.user(user_id)?;
                let item = model.item(item_id)?;
                let (items, affinities) = model.user_affinity.row(user);

                Ok(items
                    .iter()
                    .zip(affinities.iter())
                    .map(|(&seen, &affinity)| affinity * model.item_similarity.get(seen, item))
                    .sum::<f64>())
            })
            .collect::<Result<Vec<f64>, PredictionError>>()?;

        let table = Table::new()
            .with_column(
                columns.user.as_str(),
                Column::from_ids(user_ids, model.users.dtype),
            )?
            .with_column(
                columns.item.as_str(),
                Column::from_ids(item_ids, model.items.dtype),
            )?
            .with_column(columns.prediction.as_str(), predictions)?;

        Ok(table)
    }

    /// Recommend items similar to a set of seed items.
    ///
    /// `items` needs the item column. When it has a user column, seeds are
    /// grouped per user and `top_k` items are returned for each user;
    /// otherwise all seeds form one group and the output has no user
    /// column. When it has a rating column, each seed's similarities are
    /// weighted by its rating. Seed items are never returned.
    pub fn get_item_based_topk(
        &self,
        items: &Table,
        top_k: usize,
        sort_top_k: bool,
    ) -> Result<Table, PredictionError> {
        let model = self.fitted()?;
        let top_k = check_top_k(top_k)?;
        let columns = &self.hyper.columns;

        items.require_columns("items", &[columns.item.as_str()])?;
        let seeds = items.ids(&columns.item)?;
        let users = if items.has_column(&columns.user) {
            Some(items.ids(&columns.user)?)
        } else {
            None
        };
        let weights = if items.has_column(&columns.rating) {
            items.floats(&columns.rating)?
        } else {
            vec![1.0; items.len()]
        };

        let mut group_order: Vec<Option<Id>> = Vec::new();
        let mut groups: HashMap<Option<Id>, (Vec<ItemIdx>, Vec<f64>)> = HashMap::new();

        for (row, seed) in seeds.iter().enumerate() {
            let item = model.item(seed)?;
            let user = users.as_ref().map(|users| users[row].clone());
            let group = groups.entry(user.clone()).or_insert_with(|| {
                group_order.push(user);
                (Vec::new(), Vec::new())
            });
            group.0.push(item);
            group.1.push(weights[row]);
        }

        let mut user_ids = Vec::new();
        let mut item_ids = Vec::new();
        let mut predictions = Vec::new();

        for user in group_order {
            let (seed_items, seed_weights) = match groups.get(&user) {
                Some(group) => group,
                None => continue,
            };
            let scores = model
                .item_similarity
                .weighted_row_sum(seed_items, seed_weights);
            let excluded: HashSet<ItemIdx> = seed_items.iter().cloned().collect();

            for (item, score) in select_top_k(&scores, &excluded, top_k, sort_top_k) {
                if let Some(ref user) = user {
                    user_ids.push(user.clone());
                }
                item_ids.push(model.items.id(item).clone());
                predictions.push(score);
            }
        }

        let mut table = Table::new();
        if users.is_some() {
            let dtype = items.dtype(&columns.user).unwrap_or(DType::Int);
            table.push_column(columns.user.as_str(), Column::from_ids(user_ids, dtype))?;
        }
        table.push_column(
            columns.item.as_str(),
            Column::from_ids(item_ids, model.items.dtype),
        )?;
        table.push_column(columns.prediction.as_str(), predictions)?;

        Ok(table)
    }

    /// The `top_k` most frequently interacted items, ignoring user
    /// affinity. Useful as a cold-start fallback.
    pub fn get_popularity_based_topk(
        &self,
        top_k: usize,
        sort_top_k: bool,
    ) -> Result<Table, PredictionError> {
        let model = self.fitted()?;
        let top_k = check_top_k(top_k)?;
        let columns = &self.hyper.columns;

        let frequencies = Array1::from(model.item_frequencies.clone());
        let (item_ids, predictions): (Vec<Id>, Vec<f64>) =
            select_top_k(&frequencies, &HashSet::new(), top_k, sort_top_k)
                .into_iter()
                .map(|(item, frequency)| (model.items.id(item).clone(), frequency))
                .unzip();

        let table = Table::new()
            .with_column(
                columns.item.as_str(),
                Column::from_ids(item_ids, model.items.dtype),
            )?
            .with_column(columns.prediction.as_str(), predictions)?;

        Ok(table)
    }

    /// The user-item affinity matrix.
    pub fn user_affinity(&self) -> Option<&CsrMatrix> {
        self.model.as_ref().map(|model| &model.user_affinity)
    }

    /// The item co-occurrence matrix.
    pub fn cooccurrence(&self) -> Option<&CsrMatrix> {
        self.model.as_ref().map(|model| &model.cooccurrence)
    }

    /// The item-item similarity matrix.
    pub fn item_similarity(&self) -> Option<&CsrMatrix> {
        self.model.as_ref().map(|model| &model.item_similarity)
    }

    /// Number of retained interactions per item index.
    pub fn item_frequencies(&self) -> Option<&[f64]> {
        self.model
            .as_ref()
            .map(|model| model.item_frequencies.as_slice())
    }

    /// Dense index of a user id.
    pub fn user_index(&self, id: &Id) -> Option<UserIdx> {
        self.model.as_ref().and_then(|model| model.users.index(id))
    }

    /// Dense index of an item id.
    pub fn item_index(&self, id: &Id) -> Option<ItemIdx> {
        self.model.as_ref().and_then(|model| model.items.index(id))
    }

    /// Number of users seen at fit time.
    pub fn num_users(&self) -> Option<usize> {
        self.model.as_ref().map(|model| model.users.len())
    }

    /// Number of items seen at fit time.
    pub fn num_items(&self) -> Option<usize> {
        self.model.as_ref().map(|model| model.items.len())
    }
}

impl Recommender for SarModel {
    fn columns(&self) -> &ColumnNames {
        &self.hyper.columns
    }

    fn fit(&mut self, interactions: &Table) -> Result<(), FittingError> {
        SarModel::fit(self, interactions)
    }

    fn recommend_k_items(
        &self,
        test: &Table,
        top_k: usize,
        sort_top_k: bool,
        remove_seen: bool,
    ) -> Result<Table, PredictionError> {
        SarModel::recommend_k_items(self, test, top_k, sort_top_k, remove_seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::DataError;

    fn header() -> ColumnNames {
        ColumnNames {
            user: "UserId".to_owned(),
            item: "MovieId".to_owned(),
            rating: "Rating".to_owned(),
            timestamp: "Timestamp".to_owned(),
            ..ColumnNames::default()
        }
    }

    fn table(users: Vec<i64>, items: Vec<i64>, ratings: Option<Vec<f64>>) -> Table {
        let table = Table::new()
            .with_column("UserId", users)
            .unwrap()
            .with_column("MovieId", items)
            .unwrap();

        match ratings {
            Some(ratings) => table.with_column("Rating", ratings).unwrap(),
            None => table,
        }
    }

    fn dummy() -> Table {
        table(
            vec![1, 1, 1, 1, 2, 2, 2, 2, 2, 2],
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            Some(vec![1.0, 2.0, 3.0, 4.0, 5.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
        )
    }

    fn fitted(similarity_type: SimilarityType, train: &Table) -> SarModel {
        let mut model = Hyperparameters::new()
            .columns(header())
            .similarity_type(similarity_type)
            .build()
            .unwrap();
        model.fit(train).unwrap();
        model
    }

    fn ints(table: &Table, name: &str) -> Vec<i64> {
        match table.column(name) {
            Some(Column::Int(values)) => values.clone(),
            other => panic!("expected an integer column, got {:?}", other),
        }
    }

    fn floats(table: &Table, name: &str) -> Vec<f64> {
        table.floats(name).unwrap()
    }

    #[test]
    fn defaults() {
        let hyper = Hyperparameters::new();

        assert_eq!(hyper.similarity_type, SimilarityType::Jaccard);
        assert_eq!(hyper.threshold, 1.0);
        assert_eq!(hyper.time_decay_half_life, 2_592_000.0);
        assert!(!hyper.time_decay);
        assert_eq!(hyper.time_now, None);
        assert_eq!(hyper.columns.prediction, "prediction");
    }

    #[test]
    fn invalid_configuration_fails_at_build() {
        assert!(Hyperparameters::new().threshold(-1.0).build().is_err());
        assert!(Hyperparameters::new()
            .time_decay_half_life(0.0)
            .build()
            .is_err());
        assert!(Hyperparameters::new()
            .time_now(std::f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn configuration_from_json() {
        let hyper: Hyperparameters =
            serde_json::from_str(r#"{"similarity_type": "lift", "threshold": 3.0}"#).unwrap();
        assert_eq!(hyper.similarity_type, SimilarityType::Lift);
        assert_eq!(hyper.threshold, 3.0);
        assert_eq!(hyper.columns, ColumnNames::default());

        let unknown: Result<Hyperparameters, _> =
            serde_json::from_str(r#"{"similarity_type": "cosine"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn empty_interactions_fail() {
        let mut model = Hyperparameters::new().columns(header()).build().unwrap();
        match model.fit(&table(vec![], vec![], None)) {
            Err(FittingError::NoInteractions) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(!model.is_fitted());
    }

    #[test]
    fn missing_timestamp_column_fails_with_decay() {
        let mut model = Hyperparameters::new()
            .columns(header())
            .time_decay(true)
            .build()
            .unwrap();
        match model.fit(&dummy()) {
            Err(FittingError::Data(DataError::MissingColumns { columns, .. })) => {
                assert_eq!(columns, vec!["Timestamp".to_owned()])
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn jaccard_blocks() {
        let model = fitted(SimilarityType::Jaccard, &dummy());
        let similarity = model.item_similarity().unwrap();
        let idx = |id: i64| model.item_index(&Id::Int(id)).unwrap();

        assert_eq!(model.num_users(), Some(2));
        assert_eq!(model.num_items(), Some(10));
        assert_eq!(similarity.get(idx(1), idx(4)), 1.0);
        assert_eq!(similarity.get(idx(5), idx(10)), 1.0);
        assert_eq!(similarity.get(idx(1), idx(5)), 0.0);
        assert_eq!(similarity.get(idx(3), idx(3)), 1.0);
    }

    #[test]
    fn threshold_filters_low_ratings() {
        let mut model = Hyperparameters::new()
            .columns(header())
            .similarity_type(SimilarityType::Cooccurrence)
            .threshold(3.0)
            .build()
            .unwrap();
        model.fit(&dummy()).unwrap();

        let item = model.item_index(&Id::Int(1)).unwrap();
        let cooccurrence = model.cooccurrence().unwrap();
        // Filtered items keep their index but have empty rows.
        assert_eq!(cooccurrence.row(item).0.len(), 0);
        assert_eq!(cooccurrence.get(2, 3), 1.0);
        assert_eq!(model.item_frequencies().unwrap()[item], 0.0);
        assert_eq!(model.user_affinity().unwrap().nnz(), 6);
    }

    #[test]
    fn implicit_feedback_has_unit_affinity() {
        let train = table(vec![1, 1, 2], vec![1, 2, 2], None);
        let model = fitted(SimilarityType::Cooccurrence, &train);
        let affinity = model.user_affinity().unwrap();

        assert_eq!(affinity.get(0, 0), 1.0);
        assert_eq!(affinity.get(0, 1), 1.0);
        assert_eq!(affinity.get(1, 1), 1.0);
        assert_eq!(model.cooccurrence().unwrap().get(1, 1), 2.0);
    }

    #[test]
    fn duplicate_interactions_accumulate() {
        let train = table(vec![1, 1], vec![7, 7], Some(vec![2.0, 3.0]));
        let model = fitted(SimilarityType::Cooccurrence, &train);

        assert_eq!(model.user_affinity().unwrap().get(0, 0), 5.0);
        assert_eq!(model.cooccurrence().unwrap().get(0, 0), 1.0);
    }

    #[test]
    fn time_decay_halves_affinity_per_half_life() {
        let half_life = 100.0;
        let train = table(vec![1, 1, 2], vec![1, 2, 2], Some(vec![4.0, 4.0, 1.0]))
            .with_column("Timestamp", vec![1000.0, 900.0, 800.0])
            .unwrap();

        let combinations = [
            (DecayCombination::Min, 0.5, 0.5 + 0.25),
            (DecayCombination::Product, 0.5, 0.25 + 0.0625),
            (DecayCombination::Indicator, 1.0, 2.0),
        ];

        for &(combination, expected_pair, expected_diagonal) in combinations.iter() {
            let mut model = Hyperparameters::new()
                .columns(header())
                .similarity_type(SimilarityType::Cooccurrence)
                .time_decay(true)
                .time_decay_half_life(half_life)
                .decay_combination(combination)
                .build()
                .unwrap();
            model.fit(&train).unwrap();

            let affinity = model.user_affinity().unwrap();
            assert!((affinity.get(0, 0) - 4.0).abs() < 1e-12);
            assert!((affinity.get(0, 1) - 2.0).abs() < 1e-12);
            assert!((affinity.get(1, 1) - 0.25).abs() < 1e-12);

            let cooccurrence = model.cooccurrence().unwrap();
            assert!((cooccurrence.get(0, 1) - expected_pair).abs() < 1e-12);
            assert!((cooccurrence.get(1, 0) - expected_pair).abs() < 1e-12);
            assert!((cooccurrence.get(1, 1) - expected_diagonal).abs() < 1e-12);
        }
    }

    #[test]
    fn explicit_time_now() {
        let train = table(vec![1], vec![1], Some(vec![1.0]))
            .with_column("Timestamp", vec![0.0])
            .unwrap();
        let mut model = Hyperparameters::new()
            .columns(header())
            .time_decay(true)
            .time_decay_half_life(10.0)
            .time_now(20.0)
            .build()
            .unwrap();
        model.fit(&train).unwrap();

        assert!((model.user_affinity().unwrap().get(0, 0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn lift_with_time_decay_is_bounded() {
        let train = table(vec![1, 1], vec![1, 2], None)
            .with_column("Timestamp", vec![0.0, 0.0])
            .unwrap();
        let mut model = Hyperparameters::new()
            .columns(header())
            .similarity_type(SimilarityType::Lift)
            .time_decay(true)
            .time_decay_half_life(10.0)
            .time_now(20.0)
            .build()
            .unwrap();
        model.fit(&train).unwrap();

        // Co-occurrence keeps the decayed weights, lift uses the counts.
        assert!((model.cooccurrence().unwrap().get(0, 1) - 0.25).abs() < 1e-12);
        let similarity = model.item_similarity().unwrap();
        assert_eq!(similarity.get(0, 1), 1.0);
        assert!(similarity.iter().all(|(_, _, value)| value >= 0.0 && value <= 1.0));
    }

    #[test]
    fn fully_decayed_items_have_zero_similarity() {
        // A weight of 2^-1e6 underflows to zero, leaving zero diagonals.
        let train = table(vec![1, 1, 2], vec![1, 2, 2], None)
            .with_column("Timestamp", vec![0.0, 1e6, 1e6])
            .unwrap();

        for &similarity_type in &[SimilarityType::Jaccard, SimilarityType::Lift] {
            let mut model = Hyperparameters::new()
                .columns(header())
                .similarity_type(similarity_type)
                .time_decay(true)
                .time_decay_half_life(1.0)
                .build()
                .unwrap();
            model.fit(&train).unwrap();

            assert_eq!(model.cooccurrence().unwrap().get(0, 0), 0.0);
            let similarity = model.item_similarity().unwrap();
            assert!(similarity.iter().all(|(_, _, value)| value.is_finite()));
            assert!(similarity.iter().all(|(_, _, value)| value >= 0.0 && value <= 1.0));
            if similarity_type == SimilarityType::Jaccard {
                assert_eq!(similarity.get(0, 0), 0.0);
                assert_eq!(similarity.get(0, 1), 0.0);
                assert_eq!(similarity.get(1, 1), 1.0);
            }

            let recommendations = model
                .recommend_k_items(&table(vec![2], vec![2], None), 1, true, true)
                .unwrap();
            assert!(floats(&recommendations, "prediction")
                .iter()
                .all(|value| value.is_finite()));
        }
    }

    #[test]
    fn recommend_never_returns_seen_items() {
        let train = table(
            vec![1, 1, 2, 2, 2],
            vec![1, 2, 2, 3, 4],
            Some(vec![1.0; 5]),
        );
        let model = fitted(SimilarityType::Jaccard, &train);
        let test = table(vec![1], vec![1], None);

        let recommendations = model.recommend_k_items(&test, 1, true, true).unwrap();

        assert_eq!(recommendations.len(), 1);
        assert_eq!(ints(&recommendations, "UserId"), vec![1]);
        let item = ints(&recommendations, "MovieId")[0];
        assert!(item == 3 || item == 4);
        // Ties resolve to the lower item index.
        assert_eq!(item, 3);
        assert_eq!(
            recommendations.column_names(),
            &["UserId".to_owned(), "MovieId".to_owned(), "prediction".to_owned()]
        );
    }

    #[test]
    fn recommend_scores_and_order() {
        let train = table(
            vec![1, 1, 2, 2, 3, 3],
            vec![1, 2, 1, 3, 1, 2],
            Some(vec![1.0; 6]),
        );
        let model = fitted(SimilarityType::Cooccurrence, &train);
        let test = table(vec![2, 2], vec![0, 0], None);

        // User 2 saw items 1 and 3; item 2 co-occurs with item 1 twice.
        let sorted = model.recommend_k_items(&test, 3, true, false).unwrap();
        assert_eq!(ints(&sorted, "MovieId"), vec![1, 2, 3]);
        assert_eq!(floats(&sorted, "prediction"), vec![4.0, 2.0, 2.0]);

        let unsorted = model.recommend_k_items(&test, 2, false, false).unwrap();
        assert_eq!(ints(&unsorted, "MovieId"), vec![1, 2]);

        let unseen = model.recommend_k_items(&test, 3, true, true).unwrap();
        assert_eq!(ints(&unseen, "MovieId"), vec![2]);
        assert_eq!(floats(&unseen, "prediction"), vec![2.0]);
    }

    #[test]
    fn recommend_errors() {
        let unfitted = Hyperparameters::new().columns(header()).build().unwrap();
        let test = table(vec![1], vec![1], None);
        match unfitted.recommend_k_items(&test, 1, true, true) {
            Err(PredictionError::NotFitted) => {}
            other => panic!("unexpected {:?}", other),
        }

        let model = fitted(SimilarityType::Jaccard, &dummy());
        match model.recommend_k_items(&test, 0, true, true) {
            Err(PredictionError::Configuration(ConfigurationError::InvalidTopK(0))) => {}
            other => panic!("unexpected {:?}", other),
        }
        match model.recommend_k_items(&table(vec![42], vec![1], None), 1, true, true) {
            Err(PredictionError::UnknownUser(Id::Int(42))) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn predict_scores_pairs() {
        let model = fitted(SimilarityType::Jaccard, &dummy());
        let test = table(vec![1, 2, 1], vec![2, 6, 6], None);

        let predictions = model.predict(&test).unwrap();

        assert_eq!(ints(&predictions, "UserId"), vec![1, 2, 1]);
        assert_eq!(ints(&predictions, "MovieId"), vec![2, 6, 6]);
        // Sum of the user's ratings within the item's block.
        assert_eq!(floats(&predictions, "prediction"), vec![10.0, 20.0, 0.0]);

        assert!(model.predict(&table(vec![1], vec![99], None)).is_err());
    }

    #[test]
    fn item_based_topk() {
        let model = fitted(SimilarityType::Jaccard, &dummy());

        let items = Table::new().with_column("MovieId", vec![1_i64, 5, 10]).unwrap();
        let actual = model.get_item_based_topk(&items, 3, true).unwrap();
        assert!(actual.column("UserId").is_none());
        assert_eq!(ints(&actual, "MovieId"), vec![6, 7, 8]);
        assert_eq!(floats(&actual, "prediction"), vec![2.0, 2.0, 2.0]);

        let items = table(vec![100, 100, 1, 100, 1, 1], vec![1, 5, 1, 10, 2, 6], None);
        let actual = model.get_item_based_topk(&items, 3, true).unwrap();
        assert_eq!(ints(&actual, "UserId"), vec![100, 100, 100, 1, 1, 1]);
        assert_eq!(ints(&actual, "MovieId"), vec![6, 7, 8, 3, 4, 5]);
        assert_eq!(
            floats(&actual, "prediction"),
            vec![2.0, 2.0, 2.0, 2.0, 2.0, 1.0]
        );

        let items = table(
            vec![100, 100, 1, 100, 1, 1],
            vec![1, 5, 1, 10, 2, 6],
            Some(vec![5.0, 1.0, 3.0, 1.0, 5.0, 4.0]),
        );
        let actual = model.get_item_based_topk(&items, 3, true).unwrap();
        assert_eq!(ints(&actual, "UserId"), vec![100, 100, 100, 1, 1, 1]);
        assert_eq!(ints(&actual, "MovieId"), vec![2, 3, 4, 3, 4, 5]);
        assert_eq!(
            floats(&actual, "prediction"),
            vec![5.0, 5.0, 5.0, 8.0, 8.0, 4.0]
        );
    }

    #[test]
    fn popularity_based_topk() {
        let train = table(
            vec![1, 1, 1, 2, 2, 2, 3, 3, 3],
            vec![1, 2, 3, 1, 3, 4, 5, 6, 1],
            Some(vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]),
        );
        let model = fitted(SimilarityType::Jaccard, &train);

        let actual = model.get_popularity_based_topk(3, true).unwrap();

        assert!(actual.column("UserId").is_none());
        assert_eq!(ints(&actual, "MovieId"), vec![1, 3, 2]);
        assert_eq!(floats(&actual, "prediction"), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn unsorted_topk_is_in_item_order() {
        let train = table(
            vec![1, 1, 1, 2, 2, 2, 3, 3, 3],
            vec![1, 2, 3, 1, 3, 4, 5, 6, 1],
            None,
        );
        let model = fitted(SimilarityType::Jaccard, &train);

        let popular = model.get_popularity_based_topk(3, false).unwrap();
        assert_eq!(ints(&popular, "MovieId"), vec![1, 2, 3]);
        assert_eq!(floats(&popular, "prediction"), vec![3.0, 1.0, 2.0]);

        let seeds = Table::new().with_column("MovieId", vec![4_i64]).unwrap();

        let sorted = model.get_item_based_topk(&seeds, 2, true).unwrap();
        assert_eq!(ints(&sorted, "MovieId"), vec![3, 1]);

        let unsorted = model.get_item_based_topk(&seeds, 2, false).unwrap();
        assert_eq!(ints(&unsorted, "MovieId"), vec![1, 3]);
        let scores = floats(&unsorted, "prediction");
        assert!((scores[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((scores[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn string_ids_round_trip() {
        let train = Table::new()
            .with_column("UserId", vec!["a", "a", "b"])
            .unwrap()
            .with_column("MovieId", vec!["x", "y", "x"])
            .unwrap();
        let model = fitted(SimilarityType::Lift, &train);

        let recommendations = model.recommend_k_items(&train, 5, true, true).unwrap();

        assert_eq!(
            recommendations.column("MovieId"),
            Some(&Column::Str(vec!["y".to_owned()]))
        );
        assert_eq!(
            recommendations.column("UserId"),
            Some(&Column::Str(vec!["b".to_owned()]))
        );
    }

    #[test]
    fn refit_replaces_state() {
        let mut model = fitted(SimilarityType::Jaccard, &dummy());
        model.fit(&table(vec![7], vec![70], None)).unwrap();

        assert_eq!(model.num_items(), Some(1));
        assert_eq!(model.user_index(&Id::Int(1)), None);
        assert_eq!(model.user_index(&Id::Int(7)), Some(0));
    }
}
