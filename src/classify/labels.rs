use std::collections::BTreeMap;

use super::{Category, LabelScore};

/// Only the best predictions are mapped; the tail is mostly noise.
pub const TOP_PREDICTIONS: usize = 8;

/// Share of an unmatched label's score credited to casual.
pub const UNMATCHED_WEIGHT: f32 = 0.2;

/// Keyword table, checked in order. The first category with a matching keyword wins.
const KEYWORDS: [(Category, &[&str]); 5] = [
    (
        Category::Smart,
        &["suit", "tie", "coat", "blazer", "oxford", "derby", "formal"],
    ),
    (
        Category::Feminine,
        &["dress", "skirt", "gown", "blouse", "lace", "floral"],
    ),
    (
        Category::Casual,
        &["t-shirt", "jersey", "jean", "sneaker", "sweatshirt", "cardigan"],
    ),
    (
        Category::Mode,
        &["hood", "leather", "sunglass", "monochrome", "avant"],
    ),
    (
        Category::Outdoor,
        &["backpack", "boot", "hat", "parka", "hiking", "mountain", "trek", "down"],
    ),
];

pub fn category_for_label(label: &str) -> Option<Category> {
    let label = label.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| label.contains(k)))
        .map(|(category, _)| *category)
}

/// Category scores from raw labels. Every category is present in the result.
pub fn score_categories(predictions: &[LabelScore]) -> BTreeMap<Category, f32> {
    let mut scores: BTreeMap<Category, f32> =
        Category::ALL.into_iter().map(|c| (c, 0.0)).collect();

    for prediction in predictions.iter().take(TOP_PREDICTIONS) {
        let (category, weight) = match category_for_label(&prediction.label) {
            Some(category) => (category, prediction.score),
            None => (Category::Casual, prediction.score * UNMATCHED_WEIGHT),
        };
        *scores.entry(category).or_default() += weight;
    }

    scores
}

/// Highest scoring category; ties go to the earlier category in [`Category::ALL`].
pub fn top_category(scores: &BTreeMap<Category, f32>) -> Category {
    let mut best = (Category::Casual, f32::MIN);
    for category in Category::ALL {
        let score = scores.get(&category).copied().unwrap_or_default();
        if score > best.1 {
            best = (category, score);
        }
    }
    best.0
}
