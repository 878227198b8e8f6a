//! Physiologic plausibility screen.
//!
//! Site extracts carry the occasional impossible value (a creatinine of 7000, a height of
//! 3cm). Those must not win a max-over-stay aggregation, so values outside the configured
//! bounds are demoted to unrecorded before any eligibility logic sees them.

use crate::range::Bounds;
use once_cell::sync::Lazy;
use qu::ick_use::*;
use serde::Deserialize;
use std::collections::BTreeMap;

/// The bounds shipped with the source, keyed by table then measurement category.
const PLAUSIBILITY_TOML: &str = include_str!("../data/plausibility.toml");

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlausibilityScreen {
    #[serde(default)]
    labs: BTreeMap<String, Bounds>,
    #[serde(default)]
    vitals: BTreeMap<String, Bounds>,
    #[serde(default)]
    patient_assessments: BTreeMap<String, Bounds>,
}

impl PlausibilityScreen {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing plausibility bounds")
    }

    /// The screen built from the versioned bounds in `data/`.
    pub fn curated() -> &'static PlausibilityScreen {
        static CURATED: Lazy<PlausibilityScreen> = Lazy::new(|| {
            PlausibilityScreen::from_toml(PLAUSIBILITY_TOML)
                .expect("embedded plausibility bounds parse")
        });
        &CURATED
    }

    pub fn lab(&self, category: &str, value: f64) -> Option<f64> {
        screen(&self.labs, category, value)
    }

    pub fn vital(&self, category: &str, value: f64) -> Option<f64> {
        screen(&self.vitals, category, value)
    }

    pub fn assessment(&self, category: &str, value: f64) -> Option<f64> {
        screen(&self.patient_assessments, category, value)
    }

    /// All configured bounds as `(table, category, bounds)`, for reporting.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str, Bounds)> + '_ {
        let tables = [
            ("labs", &self.labs),
            ("vitals", &self.vitals),
            ("patient_assessments", &self.patient_assessments),
        ];
        tables.into_iter().flat_map(|(table, map)| {
            map.iter()
                .map(move |(category, bounds)| (table, category.as_str(), *bounds))
        })
    }
}

fn screen(map: &BTreeMap<String, Bounds>, category: &str, value: f64) -> Option<f64> {
    match map.get(category) {
        Some(bounds) if !bounds.contains(value) => None,
        _ => Some(value),
    }
}
