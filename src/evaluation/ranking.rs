//! Ranking metrics at `k`.
//!
//! Every metric goes through [`merge_ranking_true_pred`]: both tables are
//! restricted to their common users, the predictions are turned into a
//! ranked list per user according to the [`RelevancyMethod`], and ranked
//! items present in the true table become hits.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::{Column, ColumnNames, Id, Table};
use crate::{check_top_k, ConfigurationError, DataError};

/// Default number of recommendations per user.
pub const DEFAULT_K: usize = 10;
/// Default score threshold for [`RelevancyMethod::ByThreshold`].
pub const DEFAULT_THRESHOLD: f64 = 10.0;
/// Name of the rank column added by [`get_top_k_items`].
pub const RANK_COL: &str = "rank";

/// How predictions are turned into each user's ranked list.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelevancyMethod {
    /// The `k` highest scored items of each user.
    TopK,
    /// The highest scored items of each user scoring at least `threshold`,
    /// at most `k` of them.
    ByThreshold,
    /// The first `k` predictions of each user, in row order.
    #[serde(rename = "none")]
    PassThrough,
}

impl fmt::Display for RelevancyMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RelevancyMethod::TopK => "top_k",
            RelevancyMethod::ByThreshold => "by_threshold",
            RelevancyMethod::PassThrough => "none",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for RelevancyMethod {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "top_k" => Ok(RelevancyMethod::TopK),
            "by_threshold" => Ok(RelevancyMethod::ByThreshold),
            "none" => Ok(RelevancyMethod::PassThrough),
            other => Err(ConfigurationError::UnknownRelevancyMethod(
                other.to_owned(),
            )),
        }
    }
}

/// Options shared by the ranking metrics.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingOptions {
    /// How each user's ranked list is built.
    pub relevancy_method: RelevancyMethod,
    /// Cut-off of the ranked lists.
    pub k: usize,
    /// Score threshold for [`RelevancyMethod::ByThreshold`].
    pub threshold: f64,
}

impl Default for RankingOptions {
    fn default() -> Self {
        RankingOptions {
            relevancy_method: RelevancyMethod::TopK,
            k: DEFAULT_K,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl RankingOptions {
    /// Set the relevancy method.
    pub fn relevancy_method(mut self, relevancy_method: RelevancyMethod) -> Self {
        self.relevancy_method = relevancy_method;
        self
    }

    /// Set `k`.
    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Set the score threshold.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Fail on `k < 1` or a non-finite threshold.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_top_k(self.k)?;
        if !self.threshold.is_finite() {
            return Err(ConfigurationError::InvalidRelevancyThreshold(
                self.threshold,
            ));
        }

        Ok(())
    }
}

impl Hash for RankingOptions {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.relevancy_method.hash(state);
        self.k.hash(state);
        self.threshold.to_bits().hash(state);
    }
}

/// Row indices of each user, users in ascending id order and rows in
/// ranked order.
fn ranked_rows<'a>(
    users: &'a [Id],
    scores: &[f64],
    method: RelevancyMethod,
    k: usize,
    threshold: f64,
) -> BTreeMap<&'a Id, Vec<usize>> {
    let mut groups: BTreeMap<&Id, Vec<usize>> = BTreeMap::new();
    for (row, user) in users.iter().enumerate() {
        groups.entry(user).or_insert_with(Vec::new).push(row);
    }

    for rows in groups.values_mut() {
        match method {
            RelevancyMethod::TopK => {
                rows.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            }
            RelevancyMethod::ByThreshold => {
                rows.retain(|&row| scores[row] >= threshold);
                rows.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            }
            RelevancyMethod::PassThrough => {}
        }
        // Every ranked list is cut at k, so hits per user never exceed k.
        rows.truncate(k);
    }

    groups
}

/// The `k` highest scored rows of every user, with a 1-based `rank` column.
///
/// Users come out in ascending id order. Ties keep their row order.
pub fn get_top_k_items(
    table: &Table,
    user_col: &str,
    score_col: &str,
    k: usize,
) -> Result<Table, DataError> {
    table.require_columns("input", &[user_col, score_col])?;
    let users = table.ids(user_col)?;
    let scores = table.floats(score_col)?;

    let mut rows = Vec::new();
    let mut ranks = Vec::new();
    for group in ranked_rows(&users, &scores, RelevancyMethod::TopK, k, 0.0).values() {
        rows.extend(group.iter().cloned());
        ranks.extend(1..=group.len() as i64);
    }

    let mut top_k = table.select(&rows);
    top_k.push_column(RANK_COL, Column::Int(ranks))?;

    Ok(top_k)
}

/// Ranked hits of one user.
#[derive(Clone, Debug, PartialEq)]
pub struct UserHits {
    /// The user.
    pub user: Id,
    /// 1-based ranks of the hits, ascending.
    pub ranks: Vec<usize>,
    /// Number of rows of the user in the true table.
    pub actual: usize,
}

/// Hits of every common user with at least one hit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankingMerge {
    /// Users with hits, in ascending id order.
    pub hits: Vec<UserHits>,
    /// Number of users present in both tables.
    pub n_users: usize,
}

impl RankingMerge {
    /// Total number of hits over all users.
    pub fn num_hits(&self) -> usize {
        self.hits.iter().map(|user| user.ranks.len()).sum()
    }
}

/// Restrict both tables to their common users, rank each user's predictions
/// and collect the ranked items present in the true table.
pub fn merge_ranking_true_pred(
    truth: &Table,
    predictions: &Table,
    columns: &ColumnNames,
    options: &RankingOptions,
) -> Result<RankingMerge, DataError> {
    let true_users = truth.ids(&columns.user)?;
    let true_items = truth.ids(&columns.item)?;
    let pred_users = predictions.ids(&columns.user)?;
    let pred_items = predictions.ids(&columns.item)?;
    let pred_scores = predictions.floats(&columns.prediction)?;

    let pred_user_set: HashSet<&Id> = pred_users.iter().collect();
    let mut actual: HashMap<&Id, usize> = HashMap::new();
    let mut relevant: HashSet<(&Id, &Id)> = HashSet::new();
    for (user, item) in true_users.iter().zip(true_items.iter()) {
        if pred_user_set.contains(user) {
            *actual.entry(user).or_insert(0) += 1;
            relevant.insert((user, item));
        }
    }

    let ranked = ranked_rows(
        &pred_users,
        &pred_scores,
        options.relevancy_method,
        options.k,
        options.threshold,
    );

    let mut merge = RankingMerge {
        hits: Vec::new(),
        n_users: actual.len(),
    };

    for (&user, rows) in &ranked {
        let num_actual = match actual.get(user) {
            Some(&num_actual) => num_actual,
            None => continue,
        };

        let ranks: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|&(_, &row)| relevant.contains(&(user, &pred_items[row])))
            .map(|(position, _)| position + 1)
            .collect();

        if !ranks.is_empty() {
            merge.hits.push(UserHits {
                user: user.clone(),
                ranks,
                actual: num_actual,
            });
        }
    }

    Ok(merge)
}

fn per_user_mean<F: Fn(&UserHits) -> f64>(merge: &RankingMerge, func: F) -> f64 {
    if merge.hits.is_empty() {
        return 0.0;
    }

    merge.hits.iter().map(func).sum::<f64>() / merge.n_users as f64
}

fn discount(rank: usize) -> f64 {
    1.0 / (1.0 + rank as f64).ln()
}

/// Precision at `k`: hits per user over `k`, averaged over common users.
pub fn precision(merge: &RankingMerge, k: usize) -> f64 {
    per_user_mean(merge, |user| user.ranks.len() as f64 / k as f64)
}

/// Recall at `k`: hits per user over the user's true items, averaged over
/// common users.
pub fn recall(merge: &RankingMerge) -> f64 {
    per_user_mean(merge, |user| user.ranks.len() as f64 / user.actual as f64)
}

/// Normalized discounted cumulative gain at `k` with binary relevance.
pub fn ndcg(merge: &RankingMerge, k: usize) -> f64 {
    per_user_mean(merge, |user| {
        let dcg: f64 = user.ranks.iter().map(|&rank| discount(rank)).sum();
        let idcg: f64 = (1..=user.actual.min(k)).map(discount).sum();
        dcg / idcg
    })
}

/// Mean average precision at `k`.
pub fn map(merge: &RankingMerge) -> f64 {
    per_user_mean(merge, |user| {
        let precisions: f64 = user
            .ranks
            .iter()
            .enumerate()
            .map(|(idx, &rank)| (idx + 1) as f64 / rank as f64)
            .sum();
        precisions / user.actual as f64
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-6;

    fn truth() -> Table {
        Table::new()
            .with_column("userID", vec![1_i64, 1, 1, 2, 2, 3])
            .unwrap()
            .with_column("itemID", vec![1_i64, 2, 3, 1, 4, 5])
            .unwrap()
            .with_column("rating", vec![5.0, 4.0, 3.0, 5.0, 5.0, 1.0])
            .unwrap()
    }

    fn predictions() -> Table {
        Table::new()
            .with_column("userID", vec![1_i64, 1, 1, 2, 2, 2, 4])
            .unwrap()
            .with_column("itemID", vec![3_i64, 7, 1, 8, 4, 1, 1])
            .unwrap()
            .with_column("prediction", vec![0.9, 0.8, 0.7, 0.9, 0.6, 0.5, 1.0])
            .unwrap()
    }

    fn merged(options: &RankingOptions) -> RankingMerge {
        merge_ranking_true_pred(
            &truth(),
            &predictions(),
            &ColumnNames::default(),
            options,
        )
        .unwrap()
    }

    #[test]
    fn merge_keeps_common_users() {
        let merge = merged(&RankingOptions::default().k(2));

        assert_eq!(merge.n_users, 2);
        assert_eq!(
            merge.hits,
            vec![
                UserHits {
                    user: Id::Int(1),
                    ranks: vec![1],
                    actual: 3,
                },
                UserHits {
                    user: Id::Int(2),
                    ranks: vec![2],
                    actual: 2,
                },
            ]
        );
    }

    #[test]
    fn metrics_at_k() {
        let options = RankingOptions::default().k(3);
        let merge = merged(&options);

        // User 1 hits at ranks 1 and 3, user 2 at ranks 2 and 3.
        assert_eq!(merge.num_hits(), 4);
        assert!((precision(&merge, 3) - (2.0 / 3.0)).abs() < TOL);
        assert!((recall(&merge) - (2.0 / 3.0 + 1.0) / 2.0).abs() < TOL);

        let map_1 = (1.0 + 2.0 / 3.0) / 3.0;
        let map_2 = (1.0 / 2.0 + 2.0 / 3.0) / 2.0;
        assert!((map(&merge) - (map_1 + map_2) / 2.0).abs() < TOL);

        let ndcg_1 = (discount(1) + discount(3)) / (discount(1) + discount(2) + discount(3));
        let ndcg_2 = (discount(2) + discount(3)) / (discount(1) + discount(2));
        assert!((ndcg(&merge, 3) - (ndcg_1 + ndcg_2) / 2.0).abs() < TOL);
    }

    #[test]
    fn by_threshold_keeps_scores_at_or_above() {
        let options = RankingOptions::default()
            .relevancy_method(RelevancyMethod::ByThreshold)
            .threshold(0.7);
        let merge = merged(&options);

        assert_eq!(merge.hits[0].ranks, vec![1, 3]);
        assert_eq!(merge.hits.len(), 1);
    }

    #[test]
    fn pass_through_uses_row_order() {
        let options = RankingOptions::default().relevancy_method(RelevancyMethod::PassThrough);
        let merge = merged(&options);

        assert_eq!(merge.hits[0].ranks, vec![1, 3]);
        assert_eq!(merge.hits[1].ranks, vec![2, 3]);
    }

    #[test]
    fn every_method_is_cut_at_k() {
        let truth = Table::new()
            .with_column("userID", vec![1_i64, 1, 1])
            .unwrap()
            .with_column("itemID", vec![1_i64, 2, 3])
            .unwrap()
            .with_column("rating", vec![5.0, 5.0, 5.0])
            .unwrap();
        let predictions = Table::new()
            .with_column("userID", vec![1_i64, 1, 1])
            .unwrap()
            .with_column("itemID", vec![1_i64, 2, 3])
            .unwrap()
            .with_column("prediction", vec![0.9, 0.8, 0.7])
            .unwrap();

        for &method in &[
            RelevancyMethod::TopK,
            RelevancyMethod::ByThreshold,
            RelevancyMethod::PassThrough,
        ] {
            let options = RankingOptions::default()
                .relevancy_method(method)
                .k(1)
                .threshold(0.5);
            let merge =
                merge_ranking_true_pred(&truth, &predictions, &ColumnNames::default(), &options)
                    .unwrap();

            assert_eq!(merge.hits[0].ranks, vec![1], "{}", method);
            assert!((precision(&merge, 1) - 1.0).abs() < TOL, "{}", method);
            assert!((recall(&merge) - 1.0 / 3.0).abs() < TOL, "{}", method);
        }
    }

    #[test]
    fn serde_tags_match_display() {
        for &method in &[
            RelevancyMethod::TopK,
            RelevancyMethod::ByThreshold,
            RelevancyMethod::PassThrough,
        ] {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method));
            assert_eq!(serde_json::from_str::<RelevancyMethod>(&json).unwrap(), method);
        }
    }

    #[test]
    fn no_hits_is_zero() {
        let merge = RankingMerge {
            hits: Vec::new(),
            n_users: 3,
        };

        assert_eq!(precision(&merge, 10), 0.0);
        assert_eq!(recall(&merge), 0.0);
        assert_eq!(ndcg(&merge, 10), 0.0);
        assert_eq!(map(&merge), 0.0);
    }

    #[test]
    fn top_k_items_are_ranked_per_user() {
        let top_k = get_top_k_items(&predictions(), "userID", "prediction", 2).unwrap();

        assert_eq!(
            top_k.column("itemID"),
            Some(&Column::Int(vec![3, 7, 8, 4, 1]))
        );
        assert_eq!(
            top_k.column(RANK_COL),
            Some(&Column::Int(vec![1, 2, 1, 2, 1]))
        );
    }

    #[test]
    fn options_validation() {
        assert!(RankingOptions::default().validate().is_ok());
        assert!(RankingOptions::default().k(0).validate().is_err());
        assert!(RankingOptions::default()
            .threshold(std::f64::INFINITY)
            .validate()
            .is_err());
        assert_eq!(
            "by_threshold".parse::<RelevancyMethod>().unwrap(),
            RelevancyMethod::ByThreshold
        );
        assert!("top".parse::<RelevancyMethod>().is_err());

        let options: RankingOptions = serde_json::from_str(r#"{"relevancy_method": "none"}"#).unwrap();
        assert_eq!(options.relevancy_method, RelevancyMethod::PassThrough);
        assert_eq!(options.k, DEFAULT_K);
    }
}
