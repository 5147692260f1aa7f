use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::CatalogError;

/// One car from the static catalog file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CarRecord {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub car_type: String,
    pub price: f64,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub description: String,
    // Keys vary per record, values are shown as-is.
    #[serde(default)]
    pub specs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub in_store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CarRecord {
    /// Case-insensitive substring match of `keyword` against the car type.
    /// `keyword` must already be lower-case.
    pub fn type_matches(&self, keyword: &str) -> bool {
        self.car_type.to_lowercase().contains(keyword)
    }

    /// True if `keyword` is a substring of any feature tag.
    pub fn feature_matches(&self, keyword: &str) -> bool {
        self.features
            .iter()
            .any(|f| f.to_lowercase().contains(keyword))
    }

    pub fn description_matches(&self, keyword: &str) -> bool {
        self.description.to_lowercase().contains(keyword)
    }

    /// The model year, when the name starts with a 4-digit token.
    pub fn model_year(&self) -> Option<u16> {
        let first = self.name.split_whitespace().next()?;
        if first.len() == 4 && first.chars().all(|c| c.is_ascii_digit()) {
            first.parse().ok()
        } else {
            None
        }
    }

    /// The name without its leading model year.
    pub fn base_name(&self) -> &str {
        match self.model_year() {
            Some(_) => self.name.trim_start()[4..].trim_start(),
            None => self.name.trim(),
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidRecord {
            id: self.id,
            reason: reason.to_string(),
        };
        if self.id == 0 {
            return Err(invalid("id must be positive"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(invalid("price must be a non-negative number"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        Ok(())
    }
}

/// The immutable in-memory catalog.
///
/// Records are loaded once and never mutated; every query hands back
/// fresh copies.
#[derive(Debug, Clone)]
pub struct Catalog {
    cars: Vec<CarRecord>,
}

impl Catalog {
    pub fn from_records(cars: Vec<CarRecord>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for car in &cars {
            car.validate()?;
            if !seen.insert(car.id) {
                return Err(CatalogError::DuplicateId(car.id));
            }
        }
        Ok(Self { cars })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let cars: Vec<CarRecord> = serde_json::from_str(json)?;
        Self::from_records(cars)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Read-only view in catalog order.
    pub fn cars(&self) -> &[CarRecord] {
        &self.cars
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    /// Copies of the cars currently in store.
    pub fn available(&self) -> Vec<CarRecord> {
        self.cars.iter().filter(|c| c.in_store).cloned().collect()
    }

    pub fn get(&self, id: u32) -> Option<CarRecord> {
        self.cars.iter().find(|c| c.id == id).cloned()
    }

    /// Looks a car up by a routing id such as `"12"`.
    pub fn get_str(&self, id: &str) -> Option<CarRecord> {
        id.trim().parse().ok().and_then(|id| self.get(id))
    }

    /// Finds the car an utterance names, with or without its model year.
    /// The longest matching name wins so "Model X" beats "Model".
    pub fn find_mentioned(&self, utterance: &str) -> Option<CarRecord> {
        let text = utterance.to_lowercase();
        self.cars
            .iter()
            .filter_map(|car| {
                let full = car.name.to_lowercase();
                let base = car.base_name().to_lowercase();
                if !full.is_empty() && text.contains(&full) {
                    Some((full.len(), car))
                } else if !base.is_empty() && text.contains(&base) {
                    Some((base.len(), car))
                } else {
                    None
                }
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, car)| car.clone())
    }
}
