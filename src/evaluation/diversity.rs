//! Beyond-accuracy metrics of a recommendation list: diversity, novelty,
//! serendipity and coverage.
//!
//! Item similarity is the co-occurrence cosine of the training log,
//! `count(i, j) / sqrt(count(i) * count(j))`, where `count(i, j)` is the
//! number of users who interacted with both items.
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use itertools::Itertools;
use tracing::debug;

use crate::data::{check_same_base_dtype, ColumnNames, Id, Table};
use crate::EvaluationError;

fn ordered<'a>(first: &'a Id, second: &'a Id) -> (&'a Id, &'a Id) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| {
        (sum + value, count + 1)
    });

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Diversity evaluation of one recommendation table against the training
/// table it was produced from.
///
/// Intermediate tables are computed on first use and kept for the lifetime
/// of the evaluation.
#[derive(Debug)]
pub struct DiversityEvaluation {
    train: Vec<(Id, Id)>,
    reco: Vec<(Id, Id, f64)>,
    cosine_similarity: OnceCell<HashMap<(Id, Id), f64>>,
    intralist_similarity: OnceCell<Vec<(Id, f64)>>,
    user_diversity: OnceCell<Vec<(Id, f64)>>,
    item_novelty: OnceCell<Vec<(Id, f64)>>,
    user_item_serendipity: OnceCell<Vec<(Id, Id, f64)>>,
    user_serendipity: OnceCell<Vec<(Id, f64)>>,
}

impl DiversityEvaluation {
    /// Build the evaluation.
    ///
    /// Both tables need the user and item columns of `columns`, with the
    /// same base types. With `relevance`, that column of `reco` weighs each
    /// recommendation's serendipity; otherwise every recommendation counts
    /// as relevant. Fails if any `(user, item)` pair of `reco` is also in
    /// `train`.
    pub fn new(
        train: &Table,
        reco: &Table,
        columns: &ColumnNames,
        relevance: Option<&str>,
    ) -> Result<Self, EvaluationError> {
        let user = columns.user.as_str();
        let item = columns.item.as_str();

        train.require_columns("train", &[user, item])?;
        let mut reco_columns = vec![user, item];
        reco_columns.extend(relevance);
        reco.require_columns("reco", &reco_columns)?;
        check_same_base_dtype(train, reco, &[user, item])?;

        let train: Vec<(Id, Id)> = train
            .ids(user)?
            .into_iter()
            .zip(train.ids(item)?)
            .collect();

        let relevances = match relevance {
            Some(name) => reco.floats(name)?,
            None => vec![1.0; reco.len()],
        };
        let reco: Vec<(Id, Id, f64)> = reco
            .ids(user)?
            .into_iter()
            .zip(reco.ids(item)?)
            .zip(relevances)
            .map(|((user, item), relevance)| (user, item, relevance))
            .collect();

        let seen: HashSet<(&Id, &Id)> = train.iter().map(|(user, item)| (user, item)).collect();
        let count = reco
            .iter()
            .filter(|(user, item, _)| seen.contains(&(user, item)))
            .count();
        if count > 0 {
            return Err(EvaluationError::OverlappingInteractions { count });
        }

        Ok(DiversityEvaluation {
            train,
            reco,
            cosine_similarity: OnceCell::new(),
            intralist_similarity: OnceCell::new(),
            user_diversity: OnceCell::new(),
            item_novelty: OnceCell::new(),
            user_item_serendipity: OnceCell::new(),
            user_serendipity: OnceCell::new(),
        })
    }

    fn train_items_by_user(&self) -> BTreeMap<&Id, Vec<&Id>> {
        let mut items: BTreeMap<&Id, Vec<&Id>> = BTreeMap::new();
        for (user, item) in &self.train {
            items.entry(user).or_insert_with(Vec::new).push(item);
        }
        items
    }

    fn train_item_counts(&self) -> HashMap<&Id, usize> {
        let mut counts = HashMap::new();
        for (_, item) in &self.train {
            *counts.entry(item).or_insert(0) += 1;
        }
        counts
    }

    fn reco_item_counts(&self) -> HashMap<&Id, usize> {
        let mut counts = HashMap::new();
        for (_, item, _) in &self.reco {
            *counts.entry(item).or_insert(0) += 1;
        }
        counts
    }

    /// Cosine similarity of every pair of items co-occurring in the
    /// training data, keyed by `(i1, i2)` with `i1 <= i2`.
    pub fn cosine_similarity(&self) -> &HashMap<(Id, Id), f64> {
        self.cosine_similarity.get_or_init(|| {
            let item_counts = self.train_item_counts();
            let mut pair_counts: HashMap<(&Id, &Id), usize> = HashMap::new();

            for items in self.train_items_by_user().values() {
                for (idx, first) in items.iter().enumerate() {
                    for second in &items[idx..] {
                        *pair_counts.entry(ordered(*first, *second)).or_insert(0) += 1;
                    }
                }
            }

            debug!(pairs = pair_counts.len(), "computed item cosine similarity");

            pair_counts
                .into_iter()
                .map(|((first, second), count)| {
                    let norm = (item_counts[first] as f64 * item_counts[second] as f64).sqrt();
                    ((first.clone(), second.clone()), count as f64 / norm)
                })
                .collect()
        })
    }

    /// Similarity of two items; zero for items that never co-occur.
    pub fn similarity(&self, first: &Id, second: &Id) -> f64 {
        let (first, second) = ordered(first, second);
        self.cosine_similarity()
            .get(&(first.clone(), second.clone()))
            .cloned()
            .unwrap_or(0.0)
    }

    /// Mean pairwise similarity of the distinct items recommended to each
    /// user, by ascending user. Users with fewer than two items are absent.
    pub fn intralist_similarity(&self) -> &[(Id, f64)] {
        self.intralist_similarity.get_or_init(|| {
            let mut items: BTreeMap<&Id, BTreeSet<&Id>> = BTreeMap::new();
            for (user, item, _) in &self.reco {
                items.entry(user).or_insert_with(BTreeSet::new).insert(item);
            }

            items
                .into_iter()
                .filter(|(_, items)| items.len() > 1)
                .map(|(user, items)| {
                    let pairs = items
                        .iter()
                        .cloned()
                        .tuple_combinations()
                        .map(|(first, second)| self.similarity(first, second));
                    (user.clone(), mean(pairs))
                })
                .collect()
        })
    }

    /// `1 - intralist similarity` of each user.
    pub fn user_diversity(&self) -> &[(Id, f64)] {
        self.user_diversity.get_or_init(|| {
            self.intralist_similarity()
                .iter()
                .map(|(user, similarity)| (user.clone(), 1.0 - similarity))
                .collect()
        })
    }

    /// Mean user diversity.
    pub fn diversity(&self) -> f64 {
        mean(self.user_diversity().iter().map(|&(_, diversity)| diversity))
    }

    /// `-log2(count(i) / n)` of every training item, by ascending item.
    pub fn historical_item_novelty(&self) -> &[(Id, f64)] {
        self.item_novelty.get_or_init(|| {
            let total = self.train.len() as f64;
            let counts = self.train_item_counts();
            let mut items: Vec<&Id> = counts.keys().cloned().collect();
            items.sort();

            items
                .into_iter()
                .map(|item| (item.clone(), -(counts[item] as f64 / total).log2()))
                .collect()
        })
    }

    /// Mean novelty of the recommended items, weighted by how often each is
    /// recommended. Items absent from training contribute nothing.
    pub fn novelty(&self) -> f64 {
        if self.reco.is_empty() {
            return 0.0;
        }

        let novelty: HashMap<&Id, f64> = self
            .historical_item_novelty()
            .iter()
            .map(|(item, novelty)| (item, *novelty))
            .collect();

        let weighted: f64 = self
            .reco_item_counts()
            .into_iter()
            .filter_map(|(item, count)| novelty.get(item).map(|value| count as f64 * value))
            .sum();

        weighted / self.reco.len() as f64
    }

    /// Serendipity of every recommended `(user, item)`:
    /// `(1 - mean similarity to the user's training items) * relevance`.
    /// Users without training items are absent.
    pub fn user_item_serendipity(&self) -> &[(Id, Id, f64)] {
        self.user_item_serendipity.get_or_init(|| {
            let history = self.train_items_by_user();
            let mut serendipity: Vec<(Id, Id, f64)> = self
                .reco
                .iter()
                .filter_map(|(user, item, relevance)| {
                    let seen = history.get(user)?;
                    let similarity = mean(seen.iter().map(|other| self.similarity(item, other)));
                    Some((user.clone(), item.clone(), (1.0 - similarity) * relevance))
                })
                .collect();

            serendipity.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
            serendipity
        })
    }

    /// Mean serendipity of each user's recommendations, by ascending user.
    pub fn user_serendipity(&self) -> &[(Id, f64)] {
        self.user_serendipity.get_or_init(|| {
            let mut values: BTreeMap<&Id, Vec<f64>> = BTreeMap::new();
            for (user, _, serendipity) in self.user_item_serendipity() {
                values.entry(user).or_insert_with(Vec::new).push(*serendipity);
            }

            values
                .into_iter()
                .map(|(user, values)| (user.clone(), mean(values.into_iter())))
                .collect()
        })
    }

    /// Mean user serendipity.
    pub fn serendipity(&self) -> f64 {
        mean(self.user_serendipity().iter().map(|&(_, value)| value))
    }

    /// Distinct recommended items over distinct training items.
    pub fn catalog_coverage(&self) -> f64 {
        let trained: HashSet<&Id> = self.train.iter().map(|(_, item)| item).collect();
        if trained.is_empty() {
            return 0.0;
        }

        self.reco_item_counts().len() as f64 / trained.len() as f64
    }

    /// Shannon entropy, in bits, of how often each item is recommended.
    pub fn distributional_coverage(&self) -> f64 {
        if self.reco.is_empty() {
            return 0.0;
        }
        let total = self.reco.len() as f64;

        -self
            .reco_item_counts()
            .values()
            .map(|&count| {
                let p = count as f64 / total;
                p * p.log2()
            })
            .sum::<f64>()
    }
}
