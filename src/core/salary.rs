use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Age bins used by the earnings dataset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AgeBracket {
    #[serde(rename = "15 - 24 years")]
    Under25,
    #[serde(rename = "25 - 29 years")]
    From25To29,
    #[serde(rename = "30 - 39 years")]
    From30To39,
    #[serde(rename = "40 - 49 years")]
    From40To49,
    #[serde(rename = "50 - 59 years")]
    From50To59,
    #[serde(rename = "60 years and over")]
    Over60,
}

impl AgeBracket {
    pub fn from_age(age: u32) -> Self {
        match age {
            0..=24 => AgeBracket::Under25,
            25..=29 => AgeBracket::From25To29,
            30..=39 => AgeBracket::From30To39,
            40..=49 => AgeBracket::From40To49,
            50..=59 => AgeBracket::From50To59,
            _ => AgeBracket::Over60,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgeBracket::Under25 => "15 - 24 years",
            AgeBracket::From25To29 => "25 - 29 years",
            AgeBracket::From30To39 => "30 - 39 years",
            AgeBracket::From40To49 => "40 - 49 years",
            AgeBracket::From50To59 => "50 - 59 years",
            AgeBracket::Over60 => "60 years and over",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryObservation {
    #[serde(rename = "NACE Sector")]
    pub sector: String,
    #[serde(rename = "Age Group")]
    pub age_group: AgeBracket,
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Value")]
    pub value: f64,
}

/// Read-only tabular source of historical salary levels.
pub trait SalaryDataSource {
    fn observations(&self) -> &[SalaryObservation];

    fn sectors(&self) -> Vec<String> {
        let mut sectors: Vec<String> = Vec::new();
        for obs in self.observations() {
            if !sectors.contains(&obs.sector) {
                sectors.push(obs.sector.clone());
            }
        }
        sectors
    }
}

#[derive(Debug, Clone, Default)]
pub struct SalaryTable {
    rows: Vec<SalaryObservation>,
}

impl SalaryTable {
    pub fn new(rows: Vec<SalaryObservation>) -> Self {
        Self {
            rows: rows.into_iter().filter(|r| r.value.is_finite()).collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let rows = serde_json::from_str::<Vec<SalaryObservation>>(json)
            .map_err(|e| format!("Invalid salary dataset JSON: {e}"))?;
        Ok(Self::new(rows))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read salary dataset {}: {e}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl SalaryDataSource for SalaryTable {
    fn observations(&self) -> &[SalaryObservation] {
        &self.rows
    }
}

/// Mean year-over-year growth of the salary level for the user's sector and
/// age bracket. Falls back to `default_rate` with fewer than two points or
/// when every base year is non-positive.
pub fn estimate_salary_growth(
    source: &dyn SalaryDataSource,
    sector: &str,
    age: u32,
    default_rate: f64,
) -> f64 {
    let bracket = AgeBracket::from_age(age);
    let mut points: Vec<(i32, f64)> = source
        .observations()
        .iter()
        .filter(|obs| obs.sector == sector && obs.age_group == bracket)
        .map(|obs| (obs.year, obs.value))
        .collect();

    if points.len() < 2 {
        debug!(
            sector,
            age_group = bracket.label(),
            points = points.len(),
            default_rate,
            "Too few salary observations, using default growth"
        );
        return default_rate;
    }

    points.sort_by_key(|&(year, _)| year);
    // A non-positive base year has no meaningful percentage change.
    let changes: Vec<f64> = points
        .windows(2)
        .filter(|pair| pair[0].1 > 0.0)
        .map(|pair| (pair[1].1 - pair[0].1) / pair[0].1)
        .collect();

    if changes.is_empty() {
        debug!(
            sector,
            age_group = bracket.label(),
            points = points.len(),
            default_rate,
            "No usable salary changes, using default growth"
        );
        return default_rate;
    }
    changes.iter().sum::<f64>() / changes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(sector: &str, bracket: AgeBracket, year: i32, value: f64) -> SalaryObservation {
        SalaryObservation {
            sector: sector.to_string(),
            age_group: bracket,
            year,
            value,
        }
    }

    #[test]
    fn age_brackets_follow_fixed_bins() {
        assert_eq!(AgeBracket::from_age(18), AgeBracket::Under25);
        assert_eq!(AgeBracket::from_age(24), AgeBracket::Under25);
        assert_eq!(AgeBracket::from_age(25), AgeBracket::From25To29);
        assert_eq!(AgeBracket::from_age(29), AgeBracket::From25To29);
        assert_eq!(AgeBracket::from_age(30), AgeBracket::From30To39);
        assert_eq!(AgeBracket::from_age(49), AgeBracket::From40To49);
        assert_eq!(AgeBracket::from_age(59), AgeBracket::From50To59);
        assert_eq!(AgeBracket::from_age(60), AgeBracket::Over60);
    }

    #[test]
    fn growth_is_mean_of_sorted_year_over_year_changes() {
        let table = SalaryTable::new(vec![
            obs("Construction", AgeBracket::From30To39, 2022, 121.0),
            obs("Construction", AgeBracket::From30To39, 2020, 100.0),
            obs("Construction", AgeBracket::From30To39, 2021, 110.0),
            obs("Construction", AgeBracket::From40To49, 2021, 500.0),
            obs("Education", AgeBracket::From30To39, 2021, 1.0),
        ]);
        let growth = estimate_salary_growth(&table, "Construction", 35, 0.025);
        assert!((growth - 0.10).abs() < 1e-12, "got {growth}");
    }

    #[test]
    fn sparse_data_falls_back_to_default() {
        let table = SalaryTable::new(vec![obs("Construction", AgeBracket::From30To39, 2020, 100.0)]);
        assert_eq!(estimate_salary_growth(&table, "Construction", 31, 0.025), 0.025);
        assert_eq!(estimate_salary_growth(&table, "Unknown", 31, 0.025), 0.025);
        assert_eq!(estimate_salary_growth(&SalaryTable::default(), "Any", 31, 0.03), 0.03);
    }

    #[test]
    fn zero_base_years_are_skipped() {
        let zeros = SalaryTable::new(vec![
            obs("Construction", AgeBracket::From30To39, 2020, 0.0),
            obs("Construction", AgeBracket::From30To39, 2021, 0.0),
        ]);
        assert_eq!(estimate_salary_growth(&zeros, "Construction", 33, 0.025), 0.025);

        let mixed = SalaryTable::new(vec![
            obs("Construction", AgeBracket::From30To39, 2019, 0.0),
            obs("Construction", AgeBracket::From30To39, 2020, 100.0),
            obs("Construction", AgeBracket::From30To39, 2021, 105.0),
        ]);
        let growth = estimate_salary_growth(&mixed, "Construction", 33, 0.025);
        assert!(growth.is_finite());
        assert!((growth - 0.05).abs() < 1e-12, "got {growth}");
    }

    #[test]
    fn dataset_parses_source_column_names() {
        let json = r#"[
          {"NACE Sector": "All sectors", "Age Group": "25 - 29 years", "Year": 2020, "Value": 700.5},
          {"NACE Sector": "All sectors", "Age Group": "25 - 29 years", "Year": 2021, "Value": 735.0},
          {"NACE Sector": "Industry", "Age Group": "60 years and over", "Year": 2021, "Value": 900.0}
        ]"#;
        let table = SalaryTable::from_json_str(json).expect("json should parse");
        assert_eq!(table.len(), 3);
        assert_eq!(table.sectors(), vec!["All sectors".to_string(), "Industry".to_string()]);
        let growth = estimate_salary_growth(&table, "All sectors", 27, 0.025);
        assert!((growth - (735.0 - 700.5) / 700.5).abs() < 1e-12);
    }

    #[test]
    fn unknown_age_group_label_is_rejected() {
        let json = r#"[{"NACE Sector": "x", "Age Group": "old", "Year": 2020, "Value": 1.0}]"#;
        let err = SalaryTable::from_json_str(json).expect_err("must reject");
        assert!(err.contains("Invalid salary dataset JSON"));
    }
}
