pub mod encoder;
pub mod retriever;
pub mod scaler;

pub use encoder::{AmenityVocabulary, FeatureSchema, ItemEncoder, UserDefaults, UserEncoder};
pub use retriever::{InMemoryRetriever, VectorRetriever};
pub use scaler::Scaler;

use std::collections::HashMap;

use crate::models::Interaction;
use crate::utils::cmp_score_desc;

/// Sums the weights of qualifying interactions per accommodation and returns
/// the `top_n` best, highest score first. Equal scores order by ascending id.
pub fn aggregate_interactions<'a, I>(
    interactions: I,
    positive_label: i64,
    min_weight: f32,
    top_n: usize,
) -> Vec<(i64, f32)>
where
    I: IntoIterator<Item = &'a Interaction>,
{
    let mut scores: HashMap<i64, f32> = HashMap::new();
    for interaction in interactions {
        if interaction.label == positive_label && interaction.interaction_weight >= min_weight {
            *scores.entry(interaction.accommodation_id).or_insert(0.0) += interaction.interaction_weight;
        }
    }

    let mut ranked: Vec<(i64, f32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        cmp_score_desc(a.1, b.1).then(a.0.cmp(&b.0))
    });
    ranked.truncate(top_n);
    ranked
}
