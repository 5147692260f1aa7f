//! Ranking the catalog against accumulated keywords.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{CarRecord, Catalog};
use crate::taxonomy::{is_in, Category, PriceBand};

const LATEST_TYPE_SCORE: u32 = 100;
const LATEST_FEATURE_SCORE: u32 = 100;
const LATEST_DESCRIPTION_SCORE: u32 = 50;
const OTHER_TYPE_SCORE: u32 = 20;
const OTHER_FEATURE_SCORE: u32 = 15;
const OTHER_DESCRIPTION_SCORE: u32 = 5;

const SAME_TYPE_SIMILARITY: u32 = 3;
const NEAR_PRICE_SIMILARITY: u32 = 2;
const NEAR_PRICE_RATIO: f64 = 0.2;

/// A match result with its transient relevance score. Results from the
/// loose fallback query carry no score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCar {
    #[serde(flatten)]
    pub car: CarRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<u32>,
}

/// Inventory filter for browsing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarFilter {
    #[serde(default)]
    pub in_store: bool,
    #[serde(default, rename = "type")]
    pub car_type: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MatchEngine {
    catalog: Arc<Catalog>,
}

impl MatchEngine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Ranked matches for `keywords`, most relevant first.
    pub fn find_matching_cars<S: AsRef<str>>(&self, keywords: &[S]) -> Vec<CarRecord> {
        self.rank(keywords).into_iter().map(|r| r.car).collect()
    }

    /// Same as [`find_matching_cars`](Self::find_matching_cars) for untyped
    /// input. Anything but an array is logged and treated as no match;
    /// non-string elements are skipped.
    pub fn find_matching_json(&self, keywords: &serde_json::Value) -> Vec<RankedCar> {
        match keywords.as_array() {
            Some(items) => {
                let keywords: Vec<&str> = items.iter().filter_map(|k| k.as_str()).collect();
                self.rank(&keywords)
            }
            None => {
                log::error!("Keywords must be an array, got: {}", keywords);
                Vec::new()
            }
        }
    }

    pub fn rank<S: AsRef<str>>(&self, keywords: &[S]) -> Vec<RankedCar> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let latest = match keywords.last() {
            Some(latest) => latest.as_str(),
            None => return Vec::new(),
        };

        let filtered = self.filter_by_buckets(&keywords);
        if filtered.is_empty() {
            log::debug!("No car passes every filter, loosely matching {:?}", latest);
            return self
                .catalog
                .cars()
                .iter()
                .filter(|car| {
                    car.type_matches(latest)
                        || car.feature_matches(latest)
                        || car.description_matches(latest)
                })
                .map(|car| RankedCar {
                    car: car.clone(),
                    relevance_score: None,
                })
                .collect();
        }

        let mut ranked: Vec<RankedCar> = filtered
            .into_iter()
            .map(|car| RankedCar {
                relevance_score: Some(relevance(car, latest, &keywords)),
                car: car.clone(),
            })
            .collect();
        // Stable: equal scores keep catalog order.
        ranked.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        ranked
    }

    fn filter_by_buckets<'a>(&'a self, keywords: &[String]) -> Vec<&'a CarRecord> {
        let types: Vec<&str> = bucket(keywords, Category::Type);
        let features: Vec<&str> = bucket(keywords, Category::Feature);
        let bands: Vec<PriceBand> = bucket(keywords, Category::Price)
            .into_iter()
            .filter_map(PriceBand::from_keyword)
            .collect();

        self.catalog
            .cars()
            .iter()
            .filter(|car| types.is_empty() || types.iter().any(|t| car.type_matches(t)))
            .filter(|car| {
                features
                    .iter()
                    .all(|f| car.feature_matches(f) || car.description_matches(f))
            })
            .filter(|car| bands.is_empty() || bands.iter().any(|b| b.contains(car.price)))
            .collect()
    }

    /// In-store cars most similar to `car`, best first, excluding `car`.
    pub fn similar_available(&self, car: &CarRecord, limit: usize) -> Vec<CarRecord> {
        let mut scored: Vec<(u32, &CarRecord)> = self
            .catalog
            .cars()
            .iter()
            .filter(|c| c.id != car.id && c.in_store)
            .map(|c| (similarity(car, c), c))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn filter_cars(&self, filter: &CarFilter) -> Vec<CarRecord> {
        let keywords: Vec<String> = filter
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        self.catalog
            .cars()
            .iter()
            .filter(|car| !filter.in_store || car.in_store)
            .filter(|car| filter.car_type.as_ref().map_or(true, |t| car.car_type == *t))
            .filter(|car| filter.min_price.map_or(true, |min| car.price >= min))
            .filter(|car| filter.max_price.map_or(true, |max| car.price <= max))
            .filter(|car| {
                keywords.is_empty()
                    || keywords.iter().any(|k| {
                        car.features.iter().any(|f| f == k)
                            || car.car_type.contains(k.as_str())
                            || car.description_matches(&k.to_lowercase())
                    })
            })
            .cloned()
            .collect()
    }
}

fn bucket(keywords: &[String], category: Category) -> Vec<&str> {
    keywords
        .iter()
        .filter(|k| is_in(k, category))
        .map(String::as_str)
        .collect()
}

/// Recency-weighted relevance: the latest keyword dominates, every other
/// keyword adds a little.
fn relevance(car: &CarRecord, latest: &str, keywords: &[String]) -> u32 {
    let mut score = 0;
    if car.type_matches(latest) {
        score += LATEST_TYPE_SCORE;
    }
    if car.feature_matches(latest) {
        score += LATEST_FEATURE_SCORE;
    }
    if car.description_matches(latest) {
        score += LATEST_DESCRIPTION_SCORE;
    }
    for keyword in keywords.iter().filter(|k| k.as_str() != latest) {
        if car.type_matches(keyword) {
            score += OTHER_TYPE_SCORE;
        }
        if car.feature_matches(keyword) {
            score += OTHER_FEATURE_SCORE;
        }
        if car.description_matches(keyword) {
            score += OTHER_DESCRIPTION_SCORE;
        }
    }
    score
}

fn similarity(target: &CarRecord, candidate: &CarRecord) -> u32 {
    let mut score = 0;
    if candidate.car_type == target.car_type {
        score += SAME_TYPE_SIMILARITY;
    }
    let near_price = if target.price > 0.0 {
        (candidate.price - target.price).abs() / target.price < NEAR_PRICE_RATIO
    } else {
        candidate.price == 0.0
    };
    if near_price {
        score += NEAR_PRICE_SIMILARITY;
    }
    score += target
        .features
        .iter()
        .filter(|f| candidate.features.contains(f))
        .count() as u32;
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{car, catalog};
    use serde_json::json;

    fn engine(cars: Vec<CarRecord>) -> MatchEngine {
        MatchEngine::new(Arc::new(catalog(cars)))
    }

    fn ids(cars: &[CarRecord]) -> Vec<u32> {
        cars.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_empty_keywords_match_nothing() {
        let engine = engine(vec![car(1, "A", "sedan", 20_000.0, &[], "", true)]);
        let none: [&str; 0] = [];
        assert!(engine.find_matching_cars(&none).is_empty());
        assert!(engine.find_matching_cars(&["  "]).is_empty());
    }

    #[test]
    fn test_non_array_input_matches_nothing() {
        let engine = engine(vec![car(1, "A", "sedan", 20_000.0, &[], "", true)]);
        assert!(engine.find_matching_json(&json!(null)).is_empty());
        assert!(engine.find_matching_json(&json!("sedan")).is_empty());
        assert!(engine.find_matching_json(&json!({"keywords": ["sedan"]})).is_empty());
    }

    #[test]
    fn test_json_input_skips_non_strings() {
        let engine = engine(vec![
            car(1, "A", "sedan", 20_000.0, &[], "", true),
            car(2, "B", "suv", 20_000.0, &[], "", true),
        ]);
        let ranked = engine.find_matching_json(&json!([42, "SUV", null]));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].car.id, 2);
        assert_eq!(ranked[0].relevance_score, Some(100));
    }

    #[test]
    fn test_recency_scores_latest_keyword_highest() {
        let electric = car(1, "E", "suv", 50_000.0, &["electric"], "", true);
        let luxury = car(2, "L", "suv", 50_000.0, &["luxury"], "", true);
        let keywords: Vec<String> = ["luxury", "suv", "electric"].map(String::from).to_vec();
        assert!(
            relevance(&electric, "electric", &keywords) > relevance(&luxury, "electric", &keywords)
        );
    }

    #[test]
    fn test_recency_orders_results() {
        let engine = engine(vec![
            car(1, "Sporty", "coupe", 50_000.0, &["sporty"], "", true),
            car(2, "Town", "hatchback", 50_000.0, &["city"], "", true),
        ]);
        assert_eq!(ids(&engine.find_matching_cars(&["sporty", "city"])), vec![2, 1]);
        assert_eq!(ids(&engine.find_matching_cars(&["city", "sporty"])), vec![1, 2]);
    }

    #[test]
    fn test_ties_keep_catalog_order() {
        let engine = engine(vec![
            car(3, "A", "sedan", 20_000.0, &[], "", true),
            car(1, "B", "sedan", 25_000.0, &[], "", true),
            car(2, "C", "sedan", 22_000.0, &[], "", true),
        ]);
        assert_eq!(ids(&engine.find_matching_cars(&["sedan"])), vec![3, 1, 2]);
    }

    #[test]
    fn test_feature_filter_is_conjunctive() {
        let engine = engine(vec![
            car(1, "Both", "suv", 50_000.0, &["family", "electric"], "", true),
            car(2, "Family only", "suv", 50_000.0, &["family"], "", true),
            car(3, "Described", "suv", 50_000.0, &["family"], "A quiet electric cruiser", true),
        ]);
        assert_eq!(ids(&engine.find_matching_cars(&["family", "electric"])), vec![1, 3]);
    }

    #[test]
    fn test_type_filter_is_disjunctive() {
        let engine = engine(vec![
            car(1, "A", "suv", 50_000.0, &[], "", true),
            car(2, "B", "sedan", 50_000.0, &[], "", true),
            car(3, "C", "coupe", 50_000.0, &[], "", true),
        ]);
        let mut found = ids(&engine.find_matching_cars(&["suv", "sedan"]));
        found.sort();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn test_price_band_boundaries() {
        let engine = engine(vec![
            car(1, "A", "sedan", 29_999.0, &[], "", true),
            car(2, "B", "sedan", 30_000.0, &[], "", true),
            car(3, "C", "sedan", 60_000.0, &[], "", true),
            car(4, "D", "sedan", 60_001.0, &[], "", true),
        ]);
        assert_eq!(ids(&engine.find_matching_cars(&["sedan", "cheap"])), vec![1]);
        assert_eq!(ids(&engine.find_matching_cars(&["sedan", "mid-range"])), vec![2, 3]);
        assert_eq!(ids(&engine.find_matching_cars(&["sedan", "expensive"])), vec![4]);
    }

    #[test]
    fn test_price_keywords_are_disjunctive() {
        let engine = engine(vec![
            car(1, "A", "sedan", 10_000.0, &[], "", true),
            car(2, "B", "sedan", 45_000.0, &[], "", true),
            car(3, "C", "sedan", 90_000.0, &[], "", true),
        ]);
        let mut found = ids(&engine.find_matching_cars(&["cheap", "expensive"]));
        found.sort();
        assert_eq!(found, vec![1, 3]);
    }

    #[test]
    fn test_escape_hatch_uses_latest_keyword() {
        let engine = engine(vec![
            car(1, "Drop top", "convertible", 40_000.0, &["fast"], "", true),
            car(2, "Volt", "hatchback", 30_000.0, &[], "A small electric runabout", true),
            car(3, "Plain", "sedan", 30_000.0, &[], "", true),
        ]);
        let ranked = engine.rank(&["convertible", "electric"]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].car.id, 2);
        assert_eq!(ranked[0].relevance_score, None);
    }

    #[test]
    fn test_escape_hatch_can_still_be_empty() {
        let engine = engine(vec![car(1, "A", "sedan", 40_000.0, &[], "", true)]);
        assert!(engine.find_matching_cars(&["truck"]).is_empty());
    }

    #[test]
    fn test_unknown_keywords_only_score() {
        let engine = engine(vec![
            car(1, "A", "sedan", 40_000.0, &[], "", true),
            car(2, "B", "suv", 40_000.0, &["road trip"], "", true),
        ]);
        let ranked = engine.rank(&["road trip"]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].car.id, 2);
        assert_eq!(ranked[0].relevance_score, Some(100));
        assert_eq!(ranked[1].relevance_score, Some(0));
    }

    #[test]
    fn test_similar_available_ranking() {
        let wanted = car(10, "Wanted", "suv", 50_000.0, &["family", "electric"], "", false);
        let engine = engine(vec![
            wanted.clone(),
            car(1, "Price band only", "sedan", 51_000.0, &[], "", true),
            car(2, "Same type near price", "suv", 52_000.0, &[], "", true),
            car(3, "Shared features", "sedan", 20_000.0, &["family"], "", true),
            car(4, "Twin out of stock", "suv", 50_000.0, &["family", "electric"], "", false),
        ]);
        let similar = engine.similar_available(&wanted, 3);
        assert_eq!(ids(&similar), vec![2, 1, 3]);
        assert!(similar.iter().all(|c| c.in_store));
        assert_eq!(ids(&engine.similar_available(&wanted, 1)), vec![2]);
    }

    #[test]
    fn test_similar_available_excludes_self() {
        let own = car(1, "Own", "suv", 50_000.0, &[], "", true);
        let engine = engine(vec![own.clone(), car(2, "Other", "suv", 50_000.0, &[], "", true)]);
        assert_eq!(ids(&engine.similar_available(&own, 3)), vec![2]);
    }

    #[test]
    fn test_filter_cars() {
        let engine = engine(vec![
            car(1, "A", "sedan", 20_000.0, &["electric"], "", true),
            car(2, "B", "suv", 45_000.0, &[], "Great for family holidays", false),
            car(3, "C", "suv", 70_000.0, &["luxury"], "", true),
        ]);
        let in_store = CarFilter {
            in_store: true,
            ..CarFilter::default()
        };
        assert_eq!(ids(&engine.filter_cars(&in_store)), vec![1, 3]);

        let suvs_under_60k = CarFilter {
            car_type: Some("suv".to_string()),
            max_price: Some(60_000.0),
            ..CarFilter::default()
        };
        assert_eq!(ids(&engine.filter_cars(&suvs_under_60k)), vec![2]);

        let by_keyword = CarFilter {
            keywords: vec!["Family".to_string(), "electric".to_string()],
            ..CarFilter::default()
        };
        assert_eq!(ids(&engine.filter_cars(&by_keyword)), vec![1, 2]);
    }
}
