//! Serializable snapshots of fitted models
//!
//! Live fits are written to the model store so a later process can predict
//! without refitting. Only the production models have a snapshot.

use super::{
    GradientBoosting, HoltWinters, KernelRidge, LinearRegression, ObliviousBoosting,
    RandomForest, Regressor,
};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fitted parameters of one roster model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params")]
pub enum SavedModel {
    LinearRegression(LinearRegression),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    ObliviousBoosting(ObliviousBoosting),
    KernelRidge(KernelRidge),
    HoltWinters(HoltWinters),
}

impl SavedModel {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn into_regressor(self) -> Arc<dyn Regressor> {
        match self {
            SavedModel::LinearRegression(m) => Arc::new(m),
            SavedModel::RandomForest(m) => Arc::new(m),
            SavedModel::GradientBoosting(m) => Arc::new(m),
            SavedModel::ObliviousBoosting(m) => Arc::new(m),
            SavedModel::KernelRidge(m) => Arc::new(m),
            SavedModel::HoltWinters(m) => Arc::new(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::default_roster;
    use crate::ml::test_support::training_set;

    #[test]
    fn test_restored_models_predict_identically() {
        let data = training_set(120);
        for spec in default_roster() {
            let mut model = spec.build();
            model.fit(&data).unwrap();
            let expected = model.predict(data.query.view()).unwrap();

            let payload = model.snapshot().unwrap().to_json().unwrap();
            let restored = SavedModel::from_json(&payload).unwrap().into_regressor();
            let value = restored.predict(data.query.view()).unwrap();
            assert!(
                (value - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "{}: {} vs {}",
                spec.name,
                value,
                expected
            );
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = SavedModel::from_json(r#"{"kind":"Prophet","params":{}}"#).unwrap_err();
        assert!(matches!(err, crate::error::AppError::Serialization(_)));
    }
}
