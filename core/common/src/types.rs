//! Health metric types shared across HealthSync.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Date key format used in exported documents and date-range filters.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Render a date as its document key (`YYYY-MM-DD`).
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Parse a document date key.
pub fn parse_date_key(key: &str) -> crate::Result<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), DATE_KEY_FORMAT)
        .map_err(|e| crate::Error::InvalidInput(format!("Invalid date key '{}': {}", key, e)))
}

/// Name of a metric series that can be selected for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataTag {
    Steps,
    Weight,
    BodyFat,
    Calories,
    BasalMetabolicRate,
    Sleep,
    Exercise,
    Nutrition,
}

impl DataTag {
    /// All tags in canonical column order.
    pub const ALL: [DataTag; 8] = [
        DataTag::Steps,
        DataTag::Weight,
        DataTag::BodyFat,
        DataTag::Calories,
        DataTag::BasalMetabolicRate,
        DataTag::Sleep,
        DataTag::Exercise,
        DataTag::Nutrition,
    ];

    /// Serialized name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTag::Steps => "steps",
            DataTag::Weight => "weight",
            DataTag::BodyFat => "bodyFat",
            DataTag::Calories => "calories",
            DataTag::BasalMetabolicRate => "basalMetabolicRate",
            DataTag::Sleep => "sleep",
            DataTag::Exercise => "exercise",
            DataTag::Nutrition => "nutrition",
        }
    }
}

impl fmt::Display for DataTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataTag {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        DataTag::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown data tag: {}", s)))
    }
}

/// Daily step count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsRecord {
    pub date: NaiveDate,
    pub count: u64,
}

/// Body weight measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightRecord {
    pub date: NaiveDate,
    pub kilograms: f64,
}

/// Body fat measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyFatRecord {
    pub date: NaiveDate,
    pub percentage: f64,
}

/// Total energy burned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaloriesRecord {
    pub date: NaiveDate,
    pub kilocalories: f64,
}

/// Basal metabolic rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasalMetabolicRateRecord {
    pub date: NaiveDate,
    pub kilocalories_per_day: f64,
}

/// A sleep session, attributed to the date it ended on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepRecord {
    pub date: NaiveDate,
    pub duration_minutes: u32,
}

/// A single exercise session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRecord {
    pub date: NaiveDate,
    pub exercise_type: String,
    pub duration_minutes: u32,
}

/// A logged meal or nutrition entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionRecord {
    pub date: NaiveDate,
    pub kilocalories: f64,
    #[serde(default)]
    pub protein_grams: f64,
    #[serde(default)]
    pub fat_grams: f64,
    #[serde(default)]
    pub carbohydrate_grams: f64,
}

/// Fetched metric series, read-only once constructed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthData {
    pub steps: Vec<StepsRecord>,
    pub weight: Vec<WeightRecord>,
    pub body_fat: Vec<BodyFatRecord>,
    pub calories: Vec<CaloriesRecord>,
    pub basal_metabolic_rate: Vec<BasalMetabolicRateRecord>,
    pub sleep: Vec<SleepRecord>,
    pub exercise: Vec<ExerciseRecord>,
    pub nutrition: Vec<NutritionRecord>,
}

/// Keep the records whose tag is selected and whose date passes the range filter.
fn keep<T: Clone>(
    records: &[T],
    tag: DataTag,
    tags: &BTreeSet<DataTag>,
    date_keys: Option<&BTreeSet<String>>,
    date_of: impl Fn(&T) -> NaiveDate,
) -> Vec<T> {
    if !tags.contains(&tag) {
        return Vec::new();
    }
    records
        .iter()
        .filter(|record| date_keys.map_or(true, |keys| keys.contains(&date_key(date_of(record)))))
        .cloned()
        .collect()
}

impl HealthData {
    /// Restrict this data to the selected series and, if given, to a set of date keys.
    pub fn filter(&self, tags: &BTreeSet<DataTag>, date_keys: Option<&BTreeSet<String>>) -> Self {
        Self {
            steps: keep(&self.steps, DataTag::Steps, tags, date_keys, |r| r.date),
            weight: keep(&self.weight, DataTag::Weight, tags, date_keys, |r| r.date),
            body_fat: keep(&self.body_fat, DataTag::BodyFat, tags, date_keys, |r| r.date),
            calories: keep(&self.calories, DataTag::Calories, tags, date_keys, |r| r.date),
            basal_metabolic_rate: keep(
                &self.basal_metabolic_rate,
                DataTag::BasalMetabolicRate,
                tags,
                date_keys,
                |r| r.date,
            ),
            sleep: keep(&self.sleep, DataTag::Sleep, tags, date_keys, |r| r.date),
            exercise: keep(&self.exercise, DataTag::Exercise, tags, date_keys, |r| r.date),
            nutrition: keep(&self.nutrition, DataTag::Nutrition, tags, date_keys, |r| r.date),
        }
    }

    /// Total number of records across all series.
    pub fn record_count(&self) -> usize {
        self.steps.len()
            + self.weight.len()
            + self.body_fat.len()
            + self.calories.len()
            + self.basal_metabolic_rate.len()
            + self.sleep.len()
            + self.exercise.len()
            + self.nutrition.len()
    }

    /// Check if there is nothing to export.
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Series that carry at least one record.
    pub fn present_tags(&self) -> BTreeSet<DataTag> {
        let counts = [
            (DataTag::Steps, self.steps.len()),
            (DataTag::Weight, self.weight.len()),
            (DataTag::BodyFat, self.body_fat.len()),
            (DataTag::Calories, self.calories.len()),
            (DataTag::BasalMetabolicRate, self.basal_metabolic_rate.len()),
            (DataTag::Sleep, self.sleep.len()),
            (DataTag::Exercise, self.exercise.len()),
            (DataTag::Nutrition, self.nutrition.len()),
        ];
        counts
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(tag, _)| tag)
            .collect()
    }
}
