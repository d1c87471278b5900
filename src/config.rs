//! Study configuration: outcomes, feature groups, nested feature sets,
//! hyperparameter grids, and holdout settings.
//!
//! A study is normally described in a TOML file, but [`StudyConfig::default_liver_study`]
//! ships a complete chronic-liver-disease study so the binary runs end to
//! end without one. Feature sets must form a strictly nested chain, which
//! is what makes "does adding this group help" readable straight off the
//! ranked sweep output.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::grid::{ParamGrid, ParamValue};
use crate::models::ModelFamily;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config defines no outcomes")]
    NoOutcomes,
    #[error("config defines no feature sets")]
    NoCombos,
    #[error("feature set '{combo}' references unknown feature group '{group}'")]
    UnknownGroup { combo: String, group: String },
    #[error("feature set '{combo}' must strictly extend '{previous}'")]
    NotNested { combo: String, previous: String },
    #[error("{family} grid parameter '{param}' has no candidate values")]
    EmptyGrid { family: ModelFamily, param: String },
    #[error("holdout feature set '{0}' is not defined")]
    UnknownHoldoutCombo(String),
    #[error("holdout horizons are invalid: {0}")]
    InvalidHorizons(String),
}

/// One time-to-event outcome: where to find its follow-up time and its
/// 0/1 event indicator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutcomeSpec {
    pub name: String,
    pub time_column: String,
    pub event_column: String,
}

/// A named bundle of predictor columns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureGroup {
    pub name: String,
    pub columns: Vec<String>,
}

/// A feature set, expressed as the groups it draws on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComboSpec {
    pub name: String,
    pub groups: Vec<String>,
}

/// Candidate hyperparameter values per model family. A missing or empty
/// grid expands to the family's single default assignment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FamilyGrids {
    #[serde(default)]
    pub rsf: ParamGrid,
    #[serde(default)]
    pub gbsa: ParamGrid,
    #[serde(default)]
    pub coxnet: ParamGrid,
}

impl FamilyGrids {
    pub fn for_family(&self, family: ModelFamily) -> &ParamGrid {
        match family {
            ModelFamily::Rsf => &self.rsf,
            ModelFamily::Gbsa => &self.gbsa,
            ModelFamily::Coxnet => &self.coxnet,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldoutConfig {
    /// Feature set evaluated on the held-out split.
    #[serde(default = "default_holdout_combo")]
    pub combo: String,
    /// Evaluation horizons in follow-up time units, strictly increasing.
    #[serde(default = "default_horizons")]
    pub horizons: Vec<f64>,
}

fn default_holdout_combo() -> String {
    "f".to_string()
}

fn default_horizons() -> Vec<f64> {
    vec![1.0, 3.0, 5.0, 8.0, 10.0]
}

impl Default for HoldoutConfig {
    fn default() -> Self {
        HoldoutConfig {
            combo: default_holdout_combo(),
            horizons: default_horizons(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    #[serde(default)]
    pub outcomes: Vec<OutcomeSpec>,
    #[serde(default)]
    pub feature_groups: Vec<FeatureGroup>,
    #[serde(default)]
    pub combos: Vec<ComboSpec>,
    #[serde(default)]
    pub grids: FamilyGrids,
    #[serde(default)]
    pub holdout: HoldoutConfig,
}

impl StudyConfig {
    /// Loads and validates a study from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a study from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StudyConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn group(&self, name: &str) -> Option<&FeatureGroup> {
        self.feature_groups.iter().find(|g| g.name == name)
    }

    pub fn combo(&self, name: &str) -> Option<&ComboSpec> {
        self.combos.iter().find(|c| c.name == name)
    }

    pub fn outcome(&self, name: &str) -> Option<&OutcomeSpec> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Predictor columns of one feature set, deduplicated in group order.
    pub fn combo_columns(&self, combo: &ComboSpec) -> Result<Vec<String>, ConfigError> {
        let mut columns: Vec<String> = Vec::new();
        for group_name in &combo.groups {
            let group = self.group(group_name).ok_or_else(|| ConfigError::UnknownGroup {
                combo: combo.name.clone(),
                group: group_name.clone(),
            })?;
            for column in &group.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        Ok(columns)
    }

    /// Every column the study can touch, for loading the table once.
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        let mut add = |name: &str, columns: &mut Vec<String>| {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        };
        for outcome in &self.outcomes {
            add(&outcome.time_column, &mut columns);
            add(&outcome.event_column, &mut columns);
        }
        for group in &self.feature_groups {
            for column in &group.columns {
                add(column, &mut columns);
            }
        }
        columns
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outcomes.is_empty() {
            return Err(ConfigError::NoOutcomes);
        }
        if self.combos.is_empty() {
            return Err(ConfigError::NoCombos);
        }

        for combo in &self.combos {
            for group in &combo.groups {
                if self.group(group).is_none() {
                    return Err(ConfigError::UnknownGroup {
                        combo: combo.name.clone(),
                        group: group.clone(),
                    });
                }
            }
        }

        // Each feature set's resolved columns must carry everything the
        // previous set's did plus at least one new column. Group names are
        // not enough: a longer group list can resolve to the same columns.
        for pair in self.combos.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            let previous_columns = self.combo_columns(previous)?;
            let current_columns = self.combo_columns(current)?;
            let is_superset = previous_columns
                .iter()
                .all(|column| current_columns.contains(column));
            if !is_superset || current_columns.len() <= previous_columns.len() {
                return Err(ConfigError::NotNested {
                    combo: current.name.clone(),
                    previous: previous.name.clone(),
                });
            }
        }

        for family in ModelFamily::ALL {
            for (param, values) in self.grids.for_family(family).entries() {
                if values.is_empty() {
                    return Err(ConfigError::EmptyGrid {
                        family,
                        param: param.clone(),
                    });
                }
            }
        }

        if self.combo(&self.holdout.combo).is_none() {
            return Err(ConfigError::UnknownHoldoutCombo(self.holdout.combo.clone()));
        }
        let horizons = &self.holdout.horizons;
        if horizons.is_empty() {
            return Err(ConfigError::InvalidHorizons("no horizons given".to_string()));
        }
        if horizons.iter().any(|h| !h.is_finite() || *h <= 0.0) {
            return Err(ConfigError::InvalidHorizons(
                "horizons must be finite and positive".to_string(),
            ));
        }
        if horizons.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidHorizons(
                "horizons must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    /// The built-in HCV liver-disease study: four outcomes, seven feature
    /// groups, and the nested chain a through g.
    pub fn default_liver_study() -> Self {
        let outcome = |name: &str, time: &str, event: &str| OutcomeSpec {
            name: name.to_string(),
            time_column: time.to_string(),
            event_column: event.to_string(),
        };
        let group = |name: &str, columns: &[&str]| FeatureGroup {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        };
        let combo = |name: &str, groups: &[&str]| ComboSpec {
            name: name.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        };

        let mut rsf = ParamGrid::new();
        rsf.push("min_samples_leaf", vec![ParamValue::Int(5), ParamValue::Int(15)]);
        rsf.push("min_samples_split", vec![ParamValue::Int(5), ParamValue::Int(10)]);
        let mut gbsa = ParamGrid::new();
        gbsa.push("learning_rate", vec![ParamValue::Float(0.1)]);
        gbsa.push("n_estimators", vec![ParamValue::Int(300)]);
        gbsa.push("max_depth", vec![ParamValue::Int(3)]);
        let mut coxnet = ParamGrid::new();
        coxnet.push(
            "l1_ratio",
            vec![ParamValue::Float(0.2), ParamValue::Float(0.5), ParamValue::Float(1.0)],
        );

        StudyConfig {
            outcomes: vec![
                outcome("cirrhosis", "years_to_cirrhosis", "has_cirrhosis"),
                outcome("liver_cancer", "years_to_liver_cancer", "has_liver_cancer"),
                outcome("ascites", "years_to_ascites", "has_ascites"),
                outcome("encephalopathy", "years_to_encephalopathy", "has_encephalopathy"),
            ],
            feature_groups: vec![
                group(
                    "dx",
                    &["hypertension", "substance_abuse", "T2D", "GERD", "hyperlipidemia", "obesity"],
                ),
                group(
                    "meds",
                    &[
                        "DAA",
                        "metformin",
                        "insulin",
                        "other_dm_drugs",
                        "antihypertension",
                        "anticholesterol",
                        "antibiotic",
                        "antigerd",
                        "DAA_dexposure",
                    ],
                ),
                group(
                    "demo",
                    &["sex_at_birth_code", "race_code", "ethnicity_code", "age_at_hcv_diagnosis"],
                ),
                group(
                    "labs",
                    &[
                        "hdl_median",
                        "hdl_q1",
                        "hdl_q3",
                        "ldl_median",
                        "ldl_q1",
                        "ldl_q3",
                        "a1c_median",
                        "a1c_q1",
                        "a1c_q3",
                        "tg_median",
                        "tg_q1",
                        "tg_q3",
                        "sbp_median",
                        "sbp_q1",
                        "sbp_q3",
                        "dbp_median",
                        "dbp_q1",
                        "dbp_q3",
                        "albumin_median",
                        "albumin_q1",
                        "albumin_q3",
                        "bilirubin_median",
                        "bilirubin_q1",
                        "bilirubin_q3",
                        "alt_median",
                        "alt_q1",
                        "alt_q3",
                        "ast_median",
                        "ast_q1",
                        "ast_q3",
                        "alp_median",
                        "alp_q1",
                        "alp_q3",
                    ],
                ),
                group("lifestyle", &["nicotine_dependence", "alcohol_use_level_coded"]),
                group("deprivation", &["deprivation_index_scaled"]),
                group("sdoh", &["sdoh_cluster"]),
            ],
            combos: vec![
                combo("a", &["dx"]),
                combo("b", &["dx", "meds"]),
                combo("c", &["dx", "meds", "demo"]),
                combo("d", &["dx", "meds", "demo", "labs"]),
                combo("e", &["dx", "meds", "demo", "labs", "lifestyle"]),
                combo("f", &["dx", "meds", "demo", "labs", "lifestyle", "deprivation"]),
                combo("g", &["dx", "meds", "demo", "labs", "lifestyle", "deprivation", "sdoh"]),
            ],
            grids: FamilyGrids {
                rsf,
                gbsa,
                coxnet,
            },
            holdout: HoldoutConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_study_passes_validation() {
        let config = StudyConfig::default_liver_study();
        config.validate().expect("the built-in study must be valid");
        assert_eq!(config.outcomes.len(), 4);
        assert_eq!(config.combos.len(), 7);
        assert_eq!(config.holdout.combo, "f");
        assert_eq!(config.holdout.horizons, vec![1.0, 3.0, 5.0, 8.0, 10.0]);
    }

    #[test]
    fn default_grids_expand_to_expected_sizes() {
        let config = StudyConfig::default_liver_study();
        assert_eq!(config.grids.for_family(ModelFamily::Rsf).expand().len(), 4);
        assert_eq!(config.grids.for_family(ModelFamily::Gbsa).expand().len(), 1);
        assert_eq!(config.grids.for_family(ModelFamily::Coxnet).expand().len(), 3);
    }

    #[test]
    fn combo_columns_deduplicate_in_group_order() {
        let config = StudyConfig {
            outcomes: vec![OutcomeSpec {
                name: "o".into(),
                time_column: "t".into(),
                event_column: "e".into(),
            }],
            feature_groups: vec![
                FeatureGroup {
                    name: "one".into(),
                    columns: vec!["x".into(), "y".into()],
                },
                FeatureGroup {
                    name: "two".into(),
                    columns: vec!["y".into(), "z".into()],
                },
            ],
            combos: vec![
                ComboSpec {
                    name: "a".into(),
                    groups: vec!["one".into()],
                },
                ComboSpec {
                    name: "b".into(),
                    groups: vec!["one".into(), "two".into()],
                },
            ],
            grids: FamilyGrids::default(),
            holdout: HoldoutConfig {
                combo: "b".into(),
                horizons: vec![1.0, 2.0],
            },
        };
        config.validate().expect("nested chain is valid");
        let combo = config.combo("b").unwrap();
        assert_eq!(config.combo_columns(combo).unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn non_nested_chain_is_rejected() {
        let text = r#"
            [[outcomes]]
            name = "o"
            time_column = "t"
            event_column = "e"

            [[feature_groups]]
            name = "one"
            columns = ["x"]

            [[feature_groups]]
            name = "two"
            columns = ["y"]

            [[combos]]
            name = "a"
            groups = ["one"]

            [[combos]]
            name = "b"
            groups = ["two"]

            [holdout]
            combo = "a"
        "#;
        let err = StudyConfig::from_toml_str(text).expect_err("b does not extend a");
        assert!(matches!(err, ConfigError::NotNested { .. }));
    }

    #[test]
    fn chain_growing_only_by_duplicate_columns_is_rejected() {
        // "b" adds a group, but every column it carries is already in "a".
        let text = r#"
            [[outcomes]]
            name = "o"
            time_column = "t"
            event_column = "e"

            [[feature_groups]]
            name = "labs"
            columns = ["albumin"]

            [[feature_groups]]
            name = "labs_repeat"
            columns = ["albumin"]

            [[combos]]
            name = "a"
            groups = ["labs"]

            [[combos]]
            name = "b"
            groups = ["labs", "labs_repeat"]

            [holdout]
            combo = "a"
        "#;
        let err = StudyConfig::from_toml_str(text).expect_err("b resolves to the same columns as a");
        assert!(matches!(err, ConfigError::NotNested { combo, .. } if combo == "b"));
    }

    #[test]
    fn unknown_holdout_combo_is_rejected() {
        let text = r#"
            [[outcomes]]
            name = "o"
            time_column = "t"
            event_column = "e"

            [[feature_groups]]
            name = "one"
            columns = ["x"]

            [[combos]]
            name = "a"
            groups = ["one"]

            [holdout]
            combo = "zzz"
        "#;
        let err = StudyConfig::from_toml_str(text).expect_err("holdout combo must exist");
        assert!(matches!(err, ConfigError::UnknownHoldoutCombo(name) if name == "zzz"));
    }

    #[test]
    fn horizons_must_increase_strictly() {
        let text = r#"
            [[outcomes]]
            name = "o"
            time_column = "t"
            event_column = "e"

            [[feature_groups]]
            name = "one"
            columns = ["x"]

            [[combos]]
            name = "a"
            groups = ["one"]

            [holdout]
            combo = "a"
            horizons = [1.0, 3.0, 3.0]
        "#;
        let err = StudyConfig::from_toml_str(text).expect_err("tied horizons are invalid");
        assert!(matches!(err, ConfigError::InvalidHorizons(_)));
    }

    #[test]
    fn grid_values_survive_toml_round_trip_in_order() {
        let text = r#"
            [[outcomes]]
            name = "o"
            time_column = "t"
            event_column = "e"

            [[feature_groups]]
            name = "one"
            columns = ["x"]

            [[combos]]
            name = "a"
            groups = ["one"]

            [grids.rsf]
            min_samples_leaf = [5, 15]
            min_samples_split = [5, 10]

            [grids.coxnet]
            l1_ratio = [0.2, 0.5, 1.0]

            [holdout]
            combo = "a"
        "#;
        let config = StudyConfig::from_toml_str(text).expect("valid study");
        let names: Vec<&str> = config
            .grids
            .rsf
            .entries()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, vec!["min_samples_leaf", "min_samples_split"]);
        assert_eq!(config.grids.rsf.expand().len(), 4);
        assert_eq!(config.grids.coxnet.expand().len(), 3);
        assert_eq!(config.grids.gbsa.expand().len(), 1, "missing grid means defaults");
    }
}
