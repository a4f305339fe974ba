//! Daily table: one row per calendar date, one column per metric field.

use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};

use healthsync_common::{date_key, parse_date_key, HealthData};

pub const DATE_COLUMN: &str = "Date";
pub const DAY_COLUMN: &str = "Day";

pub const STEPS_COLUMN: &str = "Steps";
pub const WEIGHT_COLUMN: &str = "Weight (kg)";
pub const BODY_FAT_COLUMN: &str = "Body Fat (%)";
pub const CALORIES_COLUMN: &str = "Total Calories (kcal)";
pub const BMR_COLUMN: &str = "Basal Metabolic Rate (kcal)";
pub const SLEEP_COLUMN: &str = "Sleep (min)";
pub const NUTRITION_CALORIES_COLUMN: &str = "Nutrition Calories (kcal)";
pub const PROTEIN_COLUMN: &str = "Protein (g)";
pub const FAT_COLUMN: &str = "Fat (g)";
pub const CARBOHYDRATES_COLUMN: &str = "Carbohydrates (g)";

/// Cell values of one row, keyed by column name.
pub type RowValues = BTreeMap<String, String>;

/// Column holding minutes of one exercise type.
pub fn exercise_column(exercise_type: &str) -> String {
    let name = exercise_type.trim();
    let name = if name.is_empty() { "Other" } else { name };
    format!("Exercise: {} (min)", name)
}

/// English three-letter weekday for a date key; empty if the key is not a date.
pub fn day_of_week(key: &str) -> String {
    parse_date_key(key)
        .map(|date| date.format("%a").to_string())
        .unwrap_or_default()
}

/// Render a number without float noise: integers bare, otherwise at most two decimals.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let fixed = format!("{:.2}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Render a full row: date, weekday, then one cell per column.
pub fn render_row(key: &str, values: &RowValues, columns: &[String]) -> Vec<String> {
    let mut row = Vec::with_capacity(columns.len() + 2);
    row.push(key.to_string());
    row.push(day_of_week(key));
    row.extend(
        columns
            .iter()
            .map(|column| values.get(column).cloned().unwrap_or_default()),
    );
    row
}

/// Header for the given metric columns.
pub fn header_for(columns: &[String]) -> Vec<String> {
    let mut header = vec![DATE_COLUMN.to_string(), DAY_COLUMN.to_string()];
    header.extend(columns.iter().cloned());
    header
}

#[derive(Default)]
struct Accumulator {
    sums: BTreeMap<NaiveDate, BTreeMap<String, f64>>,
    latest: BTreeMap<NaiveDate, BTreeMap<String, f64>>,
}

impl Accumulator {
    fn add(&mut self, date: NaiveDate, column: &str, value: f64) {
        *self
            .sums
            .entry(date)
            .or_default()
            .entry(column.to_string())
            .or_insert(0.0) += value;
    }

    fn set(&mut self, date: NaiveDate, column: &str, value: f64) {
        self.latest
            .entry(date)
            .or_default()
            .insert(column.to_string(), value);
    }

    fn into_rows(self) -> BTreeMap<NaiveDate, RowValues> {
        let mut rows: BTreeMap<NaiveDate, RowValues> = BTreeMap::new();
        for (date, cells) in self.sums.into_iter().chain(self.latest) {
            let row = rows.entry(date).or_default();
            for (column, value) in cells {
                row.insert(column, format_number(value));
            }
        }
        rows
    }
}

/// Health data pivoted into one row per date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyTable {
    columns: Vec<String>,
    rows: BTreeMap<NaiveDate, RowValues>,
}

impl DailyTable {
    /// Pivot health data into daily rows.
    ///
    /// Several records on one date are combined: counts, energy and durations
    /// are summed, while weight, body fat and BMR keep the last record.
    pub fn from_health_data(data: &HealthData) -> Self {
        let mut acc = Accumulator::default();
        let mut columns: Vec<String> = Vec::new();
        let mut use_column = |name: &str| {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        };

        if !data.steps.is_empty() {
            use_column(STEPS_COLUMN);
        }
        for r in &data.steps {
            acc.add(r.date, STEPS_COLUMN, r.count as f64);
        }

        if !data.weight.is_empty() {
            use_column(WEIGHT_COLUMN);
        }
        for r in &data.weight {
            acc.set(r.date, WEIGHT_COLUMN, r.kilograms);
        }

        if !data.body_fat.is_empty() {
            use_column(BODY_FAT_COLUMN);
        }
        for r in &data.body_fat {
            acc.set(r.date, BODY_FAT_COLUMN, r.percentage);
        }

        if !data.calories.is_empty() {
            use_column(CALORIES_COLUMN);
        }
        for r in &data.calories {
            acc.add(r.date, CALORIES_COLUMN, r.kilocalories);
        }

        if !data.basal_metabolic_rate.is_empty() {
            use_column(BMR_COLUMN);
        }
        for r in &data.basal_metabolic_rate {
            acc.set(r.date, BMR_COLUMN, r.kilocalories_per_day);
        }

        if !data.sleep.is_empty() {
            use_column(SLEEP_COLUMN);
        }
        for r in &data.sleep {
            acc.add(r.date, SLEEP_COLUMN, f64::from(r.duration_minutes));
        }

        let exercise_types: BTreeSet<String> = data
            .exercise
            .iter()
            .map(|r| exercise_column(&r.exercise_type))
            .collect();
        for column in &exercise_types {
            use_column(column);
        }
        for r in &data.exercise {
            acc.add(
                r.date,
                &exercise_column(&r.exercise_type),
                f64::from(r.duration_minutes),
            );
        }

        if !data.nutrition.is_empty() {
            for column in [
                NUTRITION_CALORIES_COLUMN,
                PROTEIN_COLUMN,
                FAT_COLUMN,
                CARBOHYDRATES_COLUMN,
            ] {
                use_column(column);
            }
        }
        for r in &data.nutrition {
            acc.add(r.date, NUTRITION_CALORIES_COLUMN, r.kilocalories);
            acc.add(r.date, PROTEIN_COLUMN, r.protein_grams);
            acc.add(r.date, FAT_COLUMN, r.fat_grams);
            acc.add(r.date, CARBOHYDRATES_COLUMN, r.carbohydrate_grams);
        }

        Self {
            columns,
            rows: acc.into_rows(),
        }
    }

    /// Metric columns in canonical order (without Date and Day).
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Full header row.
    pub fn header(&self) -> Vec<String> {
        header_for(&self.columns)
    }

    /// Number of dates.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows keyed by date key, ascending.
    pub fn keyed_rows(&self) -> impl Iterator<Item = (String, &RowValues)> {
        self.rows.iter().map(|(date, values)| (date_key(*date), values))
    }

    /// Split into one table per calendar year.
    ///
    /// Each year keeps only the columns that year actually uses.
    pub fn split_by_year(&self) -> BTreeMap<i32, DailyTable> {
        let mut years: BTreeMap<i32, BTreeMap<NaiveDate, RowValues>> = BTreeMap::new();
        for (date, values) in &self.rows {
            years
                .entry(date.year())
                .or_default()
                .insert(*date, values.clone());
        }

        years
            .into_iter()
            .map(|(year, rows)| {
                let columns = self
                    .columns
                    .iter()
                    .filter(|column| rows.values().any(|row| row.contains_key(*column)))
                    .cloned()
                    .collect();
                (year, DailyTable { columns, rows })
            })
            .collect()
    }
}
