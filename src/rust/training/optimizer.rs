use ndarray::{Array, Dimension, Zip};

use crate::classifier::{ClassificationHead, HeadGradients};

/// Adam with the Keras defaults for the moment decay rates and epsilon.
#[derive(Debug, Clone)]
pub(crate) struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    moments: Option<Moments>,
}

#[derive(Debug, Clone)]
struct Moments {
    m: HeadState,
    v: HeadState,
}

#[derive(Debug, Clone)]
struct HeadState {
    w1: Array<f32, ndarray::Ix2>,
    b1: Array<f32, ndarray::Ix1>,
    w2: Array<f32, ndarray::Ix2>,
    b2: Array<f32, ndarray::Ix1>,
}

impl HeadState {
    fn zeros_like(head: &ClassificationHead) -> Self {
        Self {
            w1: Array::zeros(head.w1.raw_dim()),
            b1: Array::zeros(head.b1.raw_dim()),
            w2: Array::zeros(head.w2.raw_dim()),
            b2: Array::zeros(head.b2.raw_dim()),
        }
    }
}

impl Adam {
    pub(crate) fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments: None,
        }
    }

    pub(crate) fn step(&mut self, head: &mut ClassificationHead, grads: &HeadGradients) {
        self.step += 1;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let lr = self.learning_rate * (1.0 - beta2.powi(self.step)).sqrt() / (1.0 - beta1.powi(self.step));

        let moments = self.moments.get_or_insert_with(|| Moments {
            m: HeadState::zeros_like(head),
            v: HeadState::zeros_like(head),
        });

        update(&mut head.w1, &grads.w1, &mut moments.m.w1, &mut moments.v.w1, lr, beta1, beta2, epsilon);
        update(&mut head.b1, &grads.b1, &mut moments.m.b1, &mut moments.v.b1, lr, beta1, beta2, epsilon);
        update(&mut head.w2, &grads.w2, &mut moments.m.w2, &mut moments.v.w2, lr, beta1, beta2, epsilon);
        update(&mut head.b2, &grads.b2, &mut moments.m.b2, &mut moments.v.b2, lr, beta1, beta2, epsilon);
    }
}

#[allow(clippy::too_many_arguments)]
fn update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *p -= lr * *m / (v.sqrt() + epsilon);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_steps_reduce_loss() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut head = ClassificationHead::init(2, 8, 2, 0.0, &mut rng);
        let x = Array2::from_shape_vec((4, 2), vec![1.0, 0.0, 0.9, 0.1, 0.0, 1.0, 0.1, 0.9]).unwrap();
        let labels = [0, 0, 1, 1];
        let mut adam = Adam::new(0.05);

        let (initial, _) = head.backward(&head.forward_train(&x, &mut rng), &labels);
        for _ in 0..100 {
            let cache = head.forward_train(&x, &mut rng);
            let (_, grads) = head.backward(&cache, &labels);
            adam.step(&mut head, &grads);
        }
        let (trained, _) = head.backward(&head.forward_train(&x, &mut rng), &labels);
        assert!(trained < initial * 0.5);
    }
}
