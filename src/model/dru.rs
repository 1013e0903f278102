//! Discretise/Regularise Unit for the learned communication channel

use burn::prelude::*;
use burn::tensor::Distribution;
use burn::tensor::activation::{sigmoid, softmax};

/// Channel regularizer sitting between sender and receiver.
///
/// During training, [`Dru::regularize`] adds Gaussian channel noise and
/// squashes the result so gradients keep flowing through the communication
/// bits. At execution time, [`Dru::discretize`] snaps messages to hard bits.
/// Picking the mode is the caller's job; the network itself never
/// discretizes.
#[derive(Debug, Clone)]
pub struct Dru {
    sigma: f64,
    comm_narrow: bool,
}

impl Dru {
    pub fn new(sigma: f64, comm_narrow: bool) -> Self {
        assert!(sigma >= 0.0, "channel noise sigma must be non-negative");
        Self { sigma, comm_narrow }
    }

    /// Training mode: noisy but differentiable messages
    pub fn regularize<B: Backend>(&self, messages: Tensor<B, 2>) -> Tensor<B, 2> {
        let noisy = if self.sigma > 0.0 {
            let noise = Tensor::random(
                messages.dims(),
                Distribution::Normal(0.0, self.sigma),
                &messages.device(),
            );
            messages + noise
        } else {
            messages
        };

        if self.comm_narrow {
            sigmoid(noisy)
        } else {
            softmax(noisy, 1)
        }
    }

    /// Execution mode: hard bits, pushed through a steep sigmoid so values
    /// land at ~0/1 while staying in the same representation as training
    pub fn discretize<B: Backend>(&self, messages: Tensor<B, 2>) -> Tensor<B, 2> {
        sigmoid((messages.greater_elem(0.5).float() - 0.5) * 20.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    #[test]
    fn test_discretize_lands_on_hard_bits() {
        let dru = Dru::new(2.0, true);
        let messages =
            Tensor::<TestBackend, 2>::from_floats([[0.1, 0.9], [0.49, 0.51]], &Default::default());

        let bits: Vec<f32> = dru.discretize(messages).into_data().to_vec().unwrap();
        let expected = [0.0, 1.0, 0.0, 1.0];
        for (bit, want) in bits.iter().zip(expected.iter()) {
            assert!((bit - want).abs() < 1e-3, "expected ~{want}, got {bit}");
        }
    }

    #[test]
    fn test_narrow_regularize_stays_in_unit_interval() {
        let dru = Dru::new(2.0, true);
        let messages = Tensor::<TestBackend, 2>::random(
            [8, 2],
            Distribution::Uniform(-3.0, 3.0),
            &Default::default(),
        );

        let out: Vec<f32> = dru.regularize(messages).into_data().to_vec().unwrap();
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_wide_regularize_is_a_distribution() {
        let dru = Dru::new(0.0, false);
        let messages =
            Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0]], &Default::default());

        let out: Vec<f32> = dru.regularize(messages).into_data().to_vec().unwrap();
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "softmax rows must sum to 1");
    }

    #[test]
    fn test_zero_sigma_is_deterministic() {
        let dru = Dru::new(0.0, true);
        let messages =
            Tensor::<TestBackend, 2>::from_floats([[0.5, -1.0]], &Default::default());

        let first: Vec<f32> = dru.regularize(messages.clone()).into_data().to_vec().unwrap();
        let second: Vec<f32> = dru.regularize(messages).into_data().to_vec().unwrap();
        assert_eq!(first, second);
    }
}
