// =============================================================================
// Inference — running a loaded model against a feature vector
// =============================================================================

use async_trait::async_trait;

use crate::artifact::{LinearModel, LoadedModel, ModelBody};
use crate::error::{CoreError, CoreResult};
use crate::features::FeatureVector;

/// Raw model output. Only finite numeric scores map to BUY/SELL.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Score(f64),
    Raw(serde_json::Value),
}

impl Prediction {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Score(v) if v.is_finite() => Some(*v),
            Self::Score(_) => None,
            Self::Raw(v) => v.as_f64().filter(|x| x.is_finite()),
        }
    }
}

#[async_trait]
pub trait InferenceRunner: Send + Sync {
    async fn predict(&self, model: &LoadedModel, features: &FeatureVector) -> CoreResult<Prediction>;
}

/// Evaluates the built-in artifact kinds in-process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearInferenceRunner;

impl LinearInferenceRunner {
    fn linear(model: &LinearModel, features: &FeatureVector) -> f64 {
        // Missing features contribute zero.
        let z = model.bias
            + model
                .weights
                .iter()
                .map(|(name, w)| w * features.get(name).copied().unwrap_or(0.0))
                .sum::<f64>();
        if model.logistic {
            1.0 / (1.0 + (-z).exp())
        } else {
            z
        }
    }
}

#[async_trait]
impl InferenceRunner for LinearInferenceRunner {
    async fn predict(&self, model: &LoadedModel, features: &FeatureVector) -> CoreResult<Prediction> {
        match &model.body {
            ModelBody::Linear(m) => Ok(Prediction::Score(Self::linear(m, features))),
            ModelBody::Constant(v) => Ok(match v.as_f64() {
                Some(x) => Prediction::Score(x),
                None => Prediction::Raw(v.clone()),
            }),
            ModelBody::Opaque(_) => Err(CoreError::InferenceFailure(format!(
                "no runner for opaque artifact {}",
                model.uri
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn loaded(body: ModelBody) -> LoadedModel {
        LoadedModel {
            uri: "models/test.json".into(),
            loaded_at: Utc::now(),
            body,
        }
    }

    #[tokio::test]
    async fn linear_model_is_logistic_by_default() {
        let model = loaded(ModelBody::Linear(LinearModel {
            weights: BTreeMap::from([("return_1".to_string(), 10.0)]),
            bias: 0.0,
            logistic: true,
        }));
        let features = FeatureVector::from([("return_1".to_string(), 0.0)]);
        let p = LinearInferenceRunner.predict(&model, &features).await.unwrap();
        assert_eq!(p.score(), Some(0.5));

        let features = FeatureVector::from([("return_1".to_string(), 1.0)]);
        let s = LinearInferenceRunner
            .predict(&model, &features)
            .await
            .unwrap()
            .score()
            .unwrap();
        assert!(s > 0.99);
    }

    #[tokio::test]
    async fn raw_linear_ignores_missing_features() {
        let model = loaded(ModelBody::Linear(LinearModel {
            weights: BTreeMap::from([("a".to_string(), 2.0), ("b".to_string(), 5.0)]),
            bias: 0.25,
            logistic: false,
        }));
        let features = FeatureVector::from([("a".to_string(), 0.1)]);
        let p = LinearInferenceRunner.predict(&model, &features).await.unwrap();
        assert!((p.score().unwrap() - 0.45).abs() < 1e-12);
    }

    #[tokio::test]
    async fn constant_models_may_be_non_numeric() {
        let p = LinearInferenceRunner
            .predict(&loaded(ModelBody::Constant(json!("up"))), &FeatureVector::new())
            .await
            .unwrap();
        assert_eq!(p, Prediction::Raw(json!("up")));
        assert_eq!(p.score(), None);
        assert_eq!(Prediction::Score(f64::NAN).score(), None);
    }

    #[tokio::test]
    async fn opaque_models_fail() {
        let err = LinearInferenceRunner
            .predict(&loaded(ModelBody::Opaque(json!({}))), &FeatureVector::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InferenceFailure(_)));
    }
}
