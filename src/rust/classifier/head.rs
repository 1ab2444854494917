use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use super::utils::softmax_rows;

/// A fully connected layer in its serialized form. `weights` is row-major `[inputs, outputs]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl DenseLayer {
    fn from_arrays(weights: &Array2<f32>, bias: &Array1<f32>) -> Self {
        Self {
            inputs: weights.nrows(),
            outputs: weights.ncols(),
            weights: weights.iter().cloned().collect(),
            bias: bias.to_vec(),
        }
    }

    fn to_arrays(&self) -> Result<(Array2<f32>, Array1<f32>), ClassifierError> {
        let weights = Array2::from_shape_vec((self.inputs, self.outputs), self.weights.clone())
            .map_err(|e| ClassifierError::ModelError(format!("Invalid dense weights: {}", e)))?;
        if self.bias.len() != self.outputs {
            return Err(ClassifierError::ModelError(format!(
                "Dense bias has {} values, expected {}",
                self.bias.len(),
                self.outputs
            )));
        }
        if weights.iter().chain(self.bias.iter()).any(|v| !v.is_finite()) {
            return Err(ClassifierError::ModelError("Dense layer holds non-finite weights".into()));
        }
        Ok((weights, Array1::from(self.bias.clone())))
    }
}

/// Serialized head: `dropout -> dense(hidden, relu) -> dense(classes, softmax)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadWeights {
    pub dropout: f32,
    pub hidden: DenseLayer,
    pub output: DenseLayer,
}

/// The trainable part of the network, sitting on top of the pooled backbone features.
#[derive(Debug, Clone)]
pub struct ClassificationHead {
    pub(crate) w1: Array2<f32>,
    pub(crate) b1: Array1<f32>,
    pub(crate) w2: Array2<f32>,
    pub(crate) b2: Array1<f32>,
    dropout: f32,
}

/// Intermediate values of a training forward pass, kept for backpropagation.
pub(crate) struct ForwardCache {
    input: Array2<f32>,
    hidden_pre: Array2<f32>,
    hidden: Array2<f32>,
    pub(crate) probs: Array2<f32>,
}

/// Gradients with the same shapes as the head parameters.
pub(crate) struct HeadGradients {
    pub(crate) w1: Array2<f32>,
    pub(crate) b1: Array1<f32>,
    pub(crate) w2: Array2<f32>,
    pub(crate) b2: Array1<f32>,
}

impl ClassificationHead {
    /// Glorot-uniform weights, zero biases.
    pub fn init<R: Rng>(
        input_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        dropout: f32,
        rng: &mut R,
    ) -> Self {
        let mut glorot = |fan_in: usize, fan_out: usize| {
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..limit))
        };
        let w1 = glorot(input_dim, hidden_dim);
        let w2 = glorot(hidden_dim, num_classes);
        Self {
            w1,
            b1: Array1::zeros(hidden_dim),
            w2,
            b2: Array1::zeros(num_classes),
            dropout,
        }
    }

    pub fn from_weights(weights: &HeadWeights) -> Result<Self, ClassifierError> {
        let (w1, b1) = weights.hidden.to_arrays()?;
        let (w2, b2) = weights.output.to_arrays()?;
        if w1.ncols() != w2.nrows() {
            return Err(ClassifierError::ModelError(format!(
                "Hidden layer emits {} units but output layer expects {}",
                w1.ncols(),
                w2.nrows()
            )));
        }
        if !(0.0..1.0).contains(&weights.dropout) {
            return Err(ClassifierError::ModelError(format!("Invalid dropout rate {}", weights.dropout)));
        }
        Ok(Self { w1, b1, w2, b2, dropout: weights.dropout })
    }

    pub fn to_weights(&self) -> HeadWeights {
        HeadWeights {
            dropout: self.dropout,
            hidden: DenseLayer::from_arrays(&self.w1, &self.b1),
            output: DenseLayer::from_arrays(&self.w2, &self.b2),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w1.nrows()
    }

    pub fn hidden_dim(&self) -> usize {
        self.w1.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.w2.ncols()
    }

    /// Inference-mode probabilities for a batch of feature rows. Dropout is inactive.
    pub fn predict_proba(&self, features: &Array2<f32>) -> Array2<f32> {
        let hidden = (features.dot(&self.w1) + &self.b1).mapv(|v| v.max(0.0));
        softmax_rows(&(hidden.dot(&self.w2) + &self.b2))
    }

    /// Inference-mode probabilities for one feature vector.
    pub fn probabilities(&self, features: &Array1<f32>) -> Array1<f32> {
        let batch = features.view().insert_axis(Axis(0)).to_owned();
        self.predict_proba(&batch).row(0).to_owned()
    }

    /// Training-mode forward pass with inverted dropout on the input features.
    pub(crate) fn forward_train<R: Rng>(&self, features: &Array2<f32>, rng: &mut R) -> ForwardCache {
        let keep = 1.0 - self.dropout;
        let input = if self.dropout > 0.0 {
            features.mapv(|v| if rng.gen::<f32>() < keep { v / keep } else { 0.0 })
        } else {
            features.clone()
        };
        let hidden_pre = input.dot(&self.w1) + &self.b1;
        let hidden = hidden_pre.mapv(|v| v.max(0.0));
        let probs = softmax_rows(&(hidden.dot(&self.w2) + &self.b2));
        ForwardCache { input, hidden_pre, hidden, probs }
    }

    /// Mean sparse categorical cross-entropy of a cached pass and its gradients.
    pub(crate) fn backward(&self, cache: &ForwardCache, labels: &[usize]) -> (f32, HeadGradients) {
        let batch = labels.len().max(1) as f32;
        let loss = cross_entropy(&cache.probs, labels);

        let mut d_logits = cache.probs.clone();
        for (row, &label) in labels.iter().enumerate() {
            d_logits[[row, label]] -= 1.0;
        }
        d_logits.mapv_inplace(|v| v / batch);

        let w2 = cache.hidden.t().dot(&d_logits);
        let b2 = d_logits.sum_axis(Axis(0));
        let mut d_hidden = d_logits.dot(&self.w2.t());
        d_hidden.zip_mut_with(&cache.hidden_pre, |g, &z| {
            if z <= 0.0 {
                *g = 0.0;
            }
        });
        let w1 = cache.input.t().dot(&d_hidden);
        let b1 = d_hidden.sum_axis(Axis(0));

        (loss, HeadGradients { w1, b1, w2, b2 })
    }
}

/// Mean negative log-likelihood of the true labels.
pub(crate) fn cross_entropy(probs: &Array2<f32>, labels: &[usize]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f32 = labels
        .iter()
        .enumerate()
        .map(|(row, &label)| -(probs[[row, label]].max(1e-7)).ln())
        .sum();
    total / labels.len() as f32
}
