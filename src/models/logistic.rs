use crate::errors::{EngineError, EngineResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const DEFAULT_VERSION: &str = "1.0.0";
const SATURATION: f64 = 20.0;

#[derive(Debug, Deserialize)]
struct RawModelFile {
    #[serde(default)]
    version: Option<String>,
    symbols: Vec<RawSymbolModel>,
}

#[derive(Debug, Deserialize)]
struct RawSymbolModel {
    symbol: String,
    coefficients: Vec<f64>,
    intercept: f64,
    feature_columns: Vec<String>,
}

/// Validated, owned per-symbol linear model. Deep-copied out of the raw
/// deserialized form at load time; nothing borrows from the source file.
#[derive(Debug, Clone)]
pub struct SymbolModel {
    pub symbol: String,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub feature_columns: Vec<String>,
}

/// Result of one `Model::predict` call.
#[derive(Debug, Clone, Copy)]
pub struct PredictOutput {
    pub probability: f64,
    pub imputed_count: usize,
    pub linear_combination: f64,
}

/// A loaded, validated model: one `SymbolModel` plus one feature-median
/// imputation table per symbol. Treated as immutable after construction.
#[derive(Debug, Clone)]
pub struct Model {
    pub version: String,
    symbols: HashMap<String, SymbolModel>,
    medians: HashMap<String, HashMap<String, f64>>,
}

impl Model {
    pub fn symbol_model(&self, symbol: &str) -> Option<&SymbolModel> {
        self.symbols.get(symbol)
    }

    /// Evaluate the model for `symbol` against `features`. A missing or NaN
    /// feature is imputed from that symbol's median table and counted; a
    /// present `false` boolean (already mapped to 0.0 by the caller) is
    /// never imputed since it is finite.
    pub fn predict(&self, symbol: &str, features: &HashMap<String, f64>) -> EngineResult<PredictOutput> {
        let sm = self
            .symbols
            .get(symbol)
            .ok_or_else(|| EngineError::ModelLoad(format!("no model for symbol {symbol}")))?;
        let medians = self
            .medians
            .get(symbol)
            .ok_or_else(|| EngineError::Imputation(format!("no imputation table for symbol {symbol}")))?;

        let mut z = sm.intercept;
        let mut imputed_count = 0usize;

        for (coef, name) in sm.coefficients.iter().zip(sm.feature_columns.iter()) {
            let raw = features.get(name).copied();
            let value = match raw {
                Some(v) if v.is_finite() => v,
                _ => {
                    imputed_count += 1;
                    *medians.get(name).ok_or_else(|| {
                        EngineError::Imputation(format!(
                            "missing median for feature {name} (symbol {symbol})"
                        ))
                    })?
                }
            };
            z += coef * value;
        }

        let probability = sigmoid(z);
        Ok(PredictOutput {
            probability,
            imputed_count,
            linear_combination: z,
        })
    }
}

/// `z > 20 => 1.0`, `z < -20 => 0.0`, else the standard logistic curve.
#[inline]
pub fn sigmoid(z: f64) -> f64 {
    if z > SATURATION {
        1.0
    } else if z < -SATURATION {
        0.0
    } else {
        1.0 / (1.0 + (-z).exp())
    }
}

pub struct ModelLoader;

impl ModelLoader {
    /// Load and validate the model file and the imputations file, then
    /// combine them into a `Model`. Every error kind here is fatal at
    /// startup per the error taxonomy.
    pub fn load(model_path: &Path, imputations_path: &Path) -> EngineResult<Model> {
        let model_text = std::fs::read_to_string(model_path)
            .map_err(|e| EngineError::ModelLoad(format!("read {}: {e}", model_path.display())))?;
        let imputations_text = std::fs::read_to_string(imputations_path)
            .map_err(|e| EngineError::ModelLoad(format!("read {}: {e}", imputations_path.display())))?;

        let raw_model: RawModelFile = serde_json::from_str(&model_text)
            .map_err(|e| EngineError::ModelLoad(format!("parse model json: {e}")))?;
        let raw_imputations: HashMap<String, HashMap<String, f64>> = serde_json::from_str(&imputations_text)
            .map_err(|e| EngineError::ModelLoad(format!("parse imputations json: {e}")))?;

        Self::build(raw_model, raw_imputations)
    }

    fn build(
        raw_model: RawModelFile,
        raw_imputations: HashMap<String, HashMap<String, f64>>,
    ) -> EngineResult<Model> {
        if raw_model.symbols.is_empty() {
            return Err(EngineError::ModelLoad("model file has no symbols".into()));
        }
        if raw_imputations.is_empty() {
            return Err(EngineError::ModelLoad("imputations file is empty".into()));
        }

        let mut symbols = HashMap::with_capacity(raw_model.symbols.len());
        for raw in &raw_model.symbols {
            if raw.symbol.is_empty() {
                return Err(EngineError::ModelLoad("symbol name must be non-empty".into()));
            }
            if raw.coefficients.len() != raw.feature_columns.len() {
                return Err(EngineError::ModelLoad(format!(
                    "symbol {}: coefficients/feature_columns length mismatch ({} vs {})",
                    raw.symbol,
                    raw.coefficients.len(),
                    raw.feature_columns.len()
                )));
            }
            if !raw.intercept.is_finite() {
                return Err(EngineError::ModelLoad(format!(
                    "symbol {}: intercept is not finite",
                    raw.symbol
                )));
            }
            if raw.coefficients.iter().any(|c| !c.is_finite()) {
                return Err(EngineError::ModelLoad(format!(
                    "symbol {}: coefficient is not finite",
                    raw.symbol
                )));
            }

            symbols.insert(
                raw.symbol.clone(),
                SymbolModel {
                    symbol: raw.symbol.clone(),
                    coefficients: raw.coefficients.clone(),
                    intercept: raw.intercept,
                    feature_columns: raw.feature_columns.clone(),
                },
            );
        }

        for table in raw_imputations.values() {
            if table.is_empty() {
                return Err(EngineError::ModelLoad("imputation table is empty for a symbol".into()));
            }
            if table.values().any(|v| !v.is_finite()) {
                return Err(EngineError::ModelLoad("imputation value is not finite".into()));
            }
        }

        for symbol in symbols.keys() {
            if !raw_imputations.contains_key(symbol) {
                return Err(EngineError::Imputation(format!(
                    "missing imputation entry for symbol {symbol}"
                )));
            }
        }

        let medians = raw_imputations.clone();
        let version = raw_model.version.clone().unwrap_or_else(|| DEFAULT_VERSION.to_string());

        Ok(Model { version, symbols, medians })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> RawModelFile {
        RawModelFile {
            version: None,
            symbols: vec![RawSymbolModel {
                symbol: "BTC".into(),
                coefficients: vec![1.0, -0.5],
                intercept: 3.0,
                feature_columns: vec!["return_1m".into(), "volatility_5m".into()],
            }],
        }
    }

    fn sample_imputations() -> HashMap<String, HashMap<String, f64>> {
        let mut m = HashMap::new();
        let mut table = HashMap::new();
        table.insert("return_1m".into(), 0.0);
        table.insert("volatility_5m".into(), 0.001);
        m.insert("BTC".into(), table);
        m
    }

    #[test]
    fn sigmoid_saturates() {
        assert_eq!(sigmoid(21.0), 1.0);
        assert_eq!(sigmoid(-21.0), 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn default_version_applied_when_absent() {
        let model = ModelLoader::build(sample_model(), sample_imputations()).unwrap();
        assert_eq!(model.version, DEFAULT_VERSION);
    }

    #[test]
    fn empty_symbols_rejected() {
        let raw = RawModelFile { version: None, symbols: vec![] };
        assert!(ModelLoader::build(raw, sample_imputations()).is_err());
    }

    #[test]
    fn mismatched_coefficient_length_rejected() {
        let mut raw = sample_model();
        raw.symbols[0].coefficients.push(9.0);
        assert!(ModelLoader::build(raw, sample_imputations()).is_err());
    }

    #[test]
    fn missing_imputation_for_symbol_is_fatal() {
        let raw = sample_model();
        let imputations = HashMap::new();
        assert!(ModelLoader::build(raw, imputations).is_err());
    }

    #[test]
    fn predict_is_deterministic_and_counts_imputed() {
        let model = ModelLoader::build(sample_model(), sample_imputations()).unwrap();
        let mut features = HashMap::new();
        features.insert("return_1m".into(), 0.01);
        // volatility_5m omitted -> imputed.
        let out1 = model.predict("BTC", &features).unwrap();
        let out2 = model.predict("BTC", &features).unwrap();
        assert_eq!(out1.imputed_count, 1);
        assert_eq!(out1.probability, out2.probability);
        assert_eq!(out1.linear_combination, out2.linear_combination);
    }

    #[test]
    fn nan_feature_is_imputed() {
        let model = ModelLoader::build(sample_model(), sample_imputations()).unwrap();
        let mut features = HashMap::new();
        features.insert("return_1m".into(), f64::NAN);
        features.insert("volatility_5m".into(), 0.002);
        let out = model.predict("BTC", &features).unwrap();
        assert_eq!(out.imputed_count, 1);
    }

    #[test]
    fn unknown_symbol_errors() {
        let model = ModelLoader::build(sample_model(), sample_imputations()).unwrap();
        let features = HashMap::new();
        assert!(model.predict("ETH", &features).is_err());
    }
}
