//! Structured hyperparameters per model type, validated from raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ModelType;

pub const MAX_ITERATIONS: i64 = 10_000;
pub const MAX_DEPTH: i64 = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("unrecognized option '{option}' for {model_type}")]
    Unknown { model_type: ModelType, option: String },
    #[error("option '{option}' must be {expected}")]
    WrongKind {
        option: String,
        expected: &'static str,
    },
    #[error("option '{option}' out of range: {constraint}")]
    OutOfRange {
        option: String,
        constraint: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeParams {
    pub alpha: f64,
    pub fit_intercept: bool,
}

impl Default for RidgeParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fit_intercept: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatBoostParams {
    pub iterations: u32,
    pub depth: u32,
    pub learning_rate: f64,
    pub l2_leaf_reg: f64,
}

impl Default for CatBoostParams {
    fn default() -> Self {
        Self {
            iterations: 100,
            depth: 6,
            learning_rate: 0.1,
            l2_leaf_reg: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HyperParameters {
    Ridge(RidgeParams),
    CatBoost(CatBoostParams),
}

impl HyperParameters {
    pub fn defaults(model_type: ModelType) -> Self {
        match model_type {
            ModelType::RidgeClassifier => Self::Ridge(RidgeParams::default()),
            ModelType::CatBoost => Self::CatBoost(CatBoostParams::default()),
        }
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Ridge(_) => ModelType::RidgeClassifier,
            Self::CatBoost(_) => ModelType::CatBoost,
        }
    }

    /// Validate a raw option map against the recognized option set of
    /// `model_type`. Missing options take their defaults.
    pub fn from_json(model_type: ModelType, raw: &Map<String, Value>) -> Result<Self, ParamError> {
        match model_type {
            ModelType::RidgeClassifier => {
                let mut p = RidgeParams::default();
                for (key, value) in raw {
                    match key.as_str() {
                        "alpha" => {
                            p.alpha = number(key, value)?;
                            if !(p.alpha > 0.0 && p.alpha.is_finite()) {
                                return Err(out_of_range(key, "must be > 0"));
                            }
                        }
                        "fit_intercept" => p.fit_intercept = boolean(key, value)?,
                        _ => return Err(unknown(model_type, key)),
                    }
                }
                Ok(Self::Ridge(p))
            }
            ModelType::CatBoost => {
                let mut p = CatBoostParams::default();
                for (key, value) in raw {
                    match key.as_str() {
                        "iterations" => {
                            let n = integer(key, value)?;
                            if !(1..=MAX_ITERATIONS).contains(&n) {
                                return Err(out_of_range(key, "must be in [1, 10000]"));
                            }
                            p.iterations = n as u32;
                        }
                        "depth" => {
                            let n = integer(key, value)?;
                            if !(1..=MAX_DEPTH).contains(&n) {
                                return Err(out_of_range(key, "must be in [1, 16]"));
                            }
                            p.depth = n as u32;
                        }
                        "learning_rate" => {
                            p.learning_rate = number(key, value)?;
                            if !(p.learning_rate > 0.0 && p.learning_rate <= 1.0) {
                                return Err(out_of_range(key, "must be in (0, 1]"));
                            }
                        }
                        "l2_leaf_reg" => {
                            p.l2_leaf_reg = number(key, value)?;
                            if !(p.l2_leaf_reg >= 0.0 && p.l2_leaf_reg.is_finite()) {
                                return Err(out_of_range(key, "must be >= 0"));
                            }
                        }
                        _ => return Err(unknown(model_type, key)),
                    }
                }
                Ok(Self::CatBoost(p))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Ridge(p) => serde_json::json!({
                "alpha": p.alpha,
                "fit_intercept": p.fit_intercept,
            }),
            Self::CatBoost(p) => serde_json::json!({
                "iterations": p.iterations,
                "depth": p.depth,
                "learning_rate": p.learning_rate,
                "l2_leaf_reg": p.l2_leaf_reg,
            }),
        }
    }
}

fn number(key: &str, value: &Value) -> Result<f64, ParamError> {
    value.as_f64().ok_or_else(|| ParamError::WrongKind {
        option: key.into(),
        expected: "a number",
    })
}

fn integer(key: &str, value: &Value) -> Result<i64, ParamError> {
    value.as_i64().ok_or_else(|| ParamError::WrongKind {
        option: key.into(),
        expected: "an integer",
    })
}

fn boolean(key: &str, value: &Value) -> Result<bool, ParamError> {
    value.as_bool().ok_or_else(|| ParamError::WrongKind {
        option: key.into(),
        expected: "a boolean",
    })
}

fn unknown(model_type: ModelType, key: &str) -> ParamError {
    ParamError::Unknown {
        model_type,
        option: key.into(),
    }
}

fn out_of_range(key: &str, constraint: &'static str) -> ParamError {
    ParamError::OutOfRange {
        option: key.into(),
        constraint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn ridge_accepts_alpha() {
        let p = HyperParameters::from_json(ModelType::RidgeClassifier, &map(json!({"alpha": 1.0}))).unwrap();
        assert_eq!(
            p,
            HyperParameters::Ridge(RidgeParams {
                alpha: 1.0,
                fit_intercept: true
            })
        );
        assert_eq!(p.model_type(), ModelType::RidgeClassifier);
    }

    #[test]
    fn integer_alpha_is_a_number() {
        let p = HyperParameters::from_json(ModelType::RidgeClassifier, &map(json!({"alpha": 2}))).unwrap();
        assert_eq!(p.to_json()["alpha"], json!(2.0));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = HyperParameters::from_json(ModelType::RidgeClassifier, &map(json!({"not_a_param": 5})))
            .unwrap_err();
        assert!(matches!(err, ParamError::Unknown { ref option, .. } if option == "not_a_param"));

        // depth belongs to CatBoost only
        let err = HyperParameters::from_json(ModelType::RidgeClassifier, &map(json!({"depth": 4})))
            .unwrap_err();
        assert!(matches!(err, ParamError::Unknown { .. }));
    }

    #[test]
    fn wrong_kinds_are_rejected() {
        let err = HyperParameters::from_json(ModelType::CatBoost, &map(json!({"learning_rate": "fast"})))
            .unwrap_err();
        assert_eq!(
            err,
            ParamError::WrongKind {
                option: "learning_rate".into(),
                expected: "a number"
            }
        );

        let err = HyperParameters::from_json(ModelType::CatBoost, &map(json!({"depth": 2.5}))).unwrap_err();
        assert!(matches!(err, ParamError::WrongKind { .. }));

        let err = HyperParameters::from_json(ModelType::RidgeClassifier, &map(json!({"fit_intercept": 1})))
            .unwrap_err();
        assert!(matches!(err, ParamError::WrongKind { .. }));
    }

    #[test]
    fn ranges_are_enforced() {
        for bad in [
            json!({"depth": 0}),
            json!({"depth": 17}),
            json!({"iterations": 0}),
            json!({"learning_rate": 0.0}),
            json!({"learning_rate": 1.5}),
            json!({"l2_leaf_reg": -1.0}),
        ] {
            let err = HyperParameters::from_json(ModelType::CatBoost, &map(bad.clone())).unwrap_err();
            assert!(matches!(err, ParamError::OutOfRange { .. }), "{bad}: {err}");
        }
        let err = HyperParameters::from_json(ModelType::RidgeClassifier, &map(json!({"alpha": 0})))
            .unwrap_err();
        assert!(matches!(err, ParamError::OutOfRange { .. }));
    }

    #[test]
    fn catboost_defaults_fill_missing_options() {
        let p = HyperParameters::from_json(ModelType::CatBoost, &map(json!({"depth": 4, "learning_rate": 1.0})))
            .unwrap();
        match p {
            HyperParameters::CatBoost(c) => {
                assert_eq!(c.depth, 4);
                assert_eq!(c.iterations, 100);
                assert_eq!(c.learning_rate, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_round_trip_through_validation() {
        let p = HyperParameters::defaults(ModelType::CatBoost);
        let raw = map(p.to_json());
        assert_eq!(HyperParameters::from_json(ModelType::CatBoost, &raw).unwrap(), p);
    }
}
