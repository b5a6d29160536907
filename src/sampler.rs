//! Category-balanced sampling of aggregated articles.
//!
//! Articles are grouped by category, each group is capped at the sample
//! size, and the union is shuffled so that no category dominates the
//! curator prompt by position.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::models::{Article, Category};

/// How a category group is reduced to the sample size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Keep the first N articles in arrival order.
    #[default]
    First,
    /// Keep a uniform random N articles.
    Random,
}

#[derive(Debug, Clone)]
pub struct Sampler {
    sample_size: usize,
    strategy: SamplingStrategy,
}

impl Sampler {
    pub fn new(sample_size: usize, strategy: SamplingStrategy) -> Self {
        Self {
            sample_size,
            strategy,
        }
    }

    /// Returns a shuffled subset with at most `sample_size` articles per
    /// category.
    pub fn sample<R: Rng + ?Sized>(&self, articles: Vec<Article>, rng: &mut R) -> Vec<Article> {
        let mut groups: BTreeMap<Category, Vec<Article>> = BTreeMap::new();
        for article in articles {
            groups.entry(article.category).or_default().push(article);
        }

        let counts: Vec<(Category, usize)> = groups.iter().map(|(c, g)| (*c, g.len())).collect();
        info!(?counts, "articles per category before sampling");

        let mut sampled = Vec::new();
        for (_, mut group) in groups {
            if self.strategy == SamplingStrategy::Random {
                group.shuffle(rng);
            }
            group.truncate(self.sample_size);
            sampled.extend(group);
        }

        sampled.shuffle(rng);
        sampled
    }
}
