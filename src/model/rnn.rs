//! Batch-normalized recurrent core
//!
//! A stacked GRU/LSTM whose input and hidden projections are batch-normalized
//! separately at every time step (recurrent batch normalization). Statistics
//! are kept per time step up to a fixed ceiling; feeding a longer sequence is
//! a usage error and panics.

use burn::module::Ignored;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};

use crate::config::RnnMode;

/// Symmetric uniform range used for all freshly drawn parameters
pub(crate) const INIT_PARAM_RANGE: (f64, f64) = (-0.08, 0.08);

pub(crate) fn uniform_init() -> Initializer {
    Initializer::Uniform {
        min: INIT_PARAM_RANGE.0,
        max: INIT_PARAM_RANGE.1,
    }
}

/// Configuration for [`BnRnn`]
#[derive(Debug, Config)]
pub struct BnRnnConfig {
    /// Width of the per-step input vectors
    pub input_size: usize,
    /// Width of the hidden state
    pub hidden_size: usize,
    /// Number of stacked layers
    #[config(default = 2)]
    pub num_layers: usize,
    /// Recurrent cell kind
    #[config(default = "RnnMode::Gru")]
    pub mode: RnnMode,
    /// Per-time-step batch normalization of both gate projections
    #[config(default = true)]
    pub use_bn: bool,
    /// Maximum number of time steps normalized independently
    #[config(default = 16)]
    pub bn_max_t: usize,
    /// Dropout rate applied between layers
    #[config(default = 0.0)]
    pub dropout_rate: f64,
}

/// Per-layer recurrent state. `cell` is present only for LSTM layers.
#[derive(Debug, Clone)]
pub struct LayerState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Option<Tensor<B, 2>>,
}

/// Recurrent state for the whole stack, bottom layer first
#[derive(Debug, Clone)]
pub struct RnnState<B: Backend> {
    pub layers: Vec<LayerState<B>>,
}

/// One recurrent layer: gate projections plus per-step normalization
#[derive(Module, Debug)]
struct RecurrentLayer<B: Backend> {
    x2h: Linear<B>,
    h2h: Linear<B>,
    bn_x: Option<Vec<BatchNorm<B, 0>>>,
    bn_h: Option<Vec<BatchNorm<B, 0>>>,
    mode: Ignored<RnnMode>,
}

impl<B: Backend> RecurrentLayer<B> {
    /// Advance this layer by one time step. `t` selects the normalization
    /// statistics for this step.
    fn step(&self, input: Tensor<B, 2>, t: usize, state: &LayerState<B>) -> LayerState<B> {
        let mut xh = self.x2h.forward(input);
        let mut hh = self.h2h.forward(state.hidden.clone());
        if let Some(bn) = &self.bn_x {
            xh = bn[t].forward(xh);
        }
        if let Some(bn) = &self.bn_h {
            hh = bn[t].forward(hh);
        }

        match self.mode.0 {
            RnnMode::Gru => {
                let xg = xh.chunk(3, 1);
                let hg = hh.chunk(3, 1);
                let reset = sigmoid(xg[0].clone() + hg[0].clone());
                let update = sigmoid(xg[1].clone() + hg[1].clone());
                let candidate = tanh(xg[2].clone() + reset * hg[2].clone());
                // h' = (1 - z) * n + z * h
                let hidden =
                    candidate.clone() + update * (state.hidden.clone() - candidate);
                LayerState { hidden, cell: None }
            }
            RnnMode::Lstm => {
                let xg = xh.chunk(4, 1);
                let hg = hh.chunk(4, 1);
                let input_gate = sigmoid(xg[0].clone() + hg[0].clone());
                let forget_gate = sigmoid(xg[1].clone() + hg[1].clone());
                let cell_update = tanh(xg[2].clone() + hg[2].clone());
                let output_gate = sigmoid(xg[3].clone() + hg[3].clone());
                let prev_cell = state
                    .cell
                    .clone()
                    .expect("LSTM layer state is missing its cell tensor");
                let cell = forget_gate * prev_cell + input_gate * cell_update;
                let hidden = output_gate * tanh(cell.clone());
                LayerState {
                    hidden,
                    cell: Some(cell),
                }
            }
        }
    }
}

/// Stacked recurrent core with per-time-step batch normalization
#[derive(Module, Debug)]
pub struct BnRnn<B: Backend> {
    layers: Vec<RecurrentLayer<B>>,
    dropout: Option<Dropout>,
    hidden_size: usize,
    use_bn: bool,
    bn_max_t: usize,
}

impl BnRnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> BnRnn<B> {
        assert!(self.num_layers >= 1, "BnRnn needs at least one layer");
        assert!(self.hidden_size > 0, "BnRnn hidden size must be positive");
        assert!(
            !self.use_bn || self.bn_max_t >= 1,
            "bn_max_t must be at least 1 when batch norm is enabled"
        );

        let gates = match self.mode {
            RnnMode::Gru => 3,
            RnnMode::Lstm => 4,
        };
        let initializer = uniform_init();

        let layers = (0..self.num_layers)
            .map(|layer| {
                let input_size = if layer == 0 {
                    self.input_size
                } else {
                    self.hidden_size
                };
                let bn_stack = || {
                    (0..self.bn_max_t)
                        .map(|_| BatchNormConfig::new(gates * self.hidden_size).init(device))
                        .collect::<Vec<BatchNorm<B, 0>>>()
                };
                RecurrentLayer {
                    x2h: LinearConfig::new(input_size, gates * self.hidden_size)
                        .with_initializer(initializer.clone())
                        .init(device),
                    h2h: LinearConfig::new(self.hidden_size, gates * self.hidden_size)
                        .with_initializer(initializer.clone())
                        .init(device),
                    bn_x: self.use_bn.then(bn_stack),
                    bn_h: self.use_bn.then(bn_stack),
                    mode: Ignored(self.mode.clone()),
                }
            })
            .collect();

        BnRnn {
            layers,
            dropout: (self.dropout_rate > 0.0)
                .then(|| DropoutConfig::new(self.dropout_rate).init()),
            hidden_size: self.hidden_size,
            use_bn: self.use_bn,
            bn_max_t: self.bn_max_t,
        }
    }
}

impl<B: Backend> BnRnn<B> {
    /// Fresh all-zeros state for a batch
    pub fn init_state(&self, batch_size: usize, device: &B::Device) -> RnnState<B> {
        let layers = self
            .layers
            .iter()
            .map(|layer| LayerState {
                hidden: Tensor::zeros([batch_size, self.hidden_size], device),
                cell: matches!(layer.mode.0, RnnMode::Lstm)
                    .then(|| Tensor::zeros([batch_size, self.hidden_size], device)),
            })
            .collect();
        RnnState { layers }
    }

    /// Run the stack over a `[batch, steps, input_size]` sequence.
    ///
    /// Returns the top layer's hidden states for every step and the final
    /// state of every layer, so a rollout loop can thread recurrence across
    /// calls. With `state = None` recurrence starts from zeros.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<RnnState<B>>,
    ) -> (Tensor<B, 3>, RnnState<B>) {
        let [batch, steps, _] = input.dims();
        assert!(steps >= 1, "BnRnn input must contain at least one time step");
        if self.use_bn {
            assert!(
                steps <= self.bn_max_t,
                "sequence of {steps} steps exceeds the normalization ceiling of {} steps",
                self.bn_max_t
            );
        }

        let device = input.device();
        let mut state = state.unwrap_or_else(|| self.init_state(batch, &device));
        assert_eq!(
            state.layers.len(),
            self.layers.len(),
            "recurrent state does not match the layer stack"
        );

        let last = self.layers.len() - 1;
        let mut sequence = input;
        for (index, layer) in self.layers.iter().enumerate() {
            let mut outputs = Vec::with_capacity(steps);
            for t in 0..steps {
                let step_input: Tensor<B, 2> = sequence.clone().narrow(1, t, 1).squeeze(1);
                state.layers[index] = layer.step(step_input, t, &state.layers[index]);
                outputs.push(state.layers[index].hidden.clone());
            }
            sequence = Tensor::stack(outputs, 1);
            if index < last {
                if let Some(dropout) = &self.dropout {
                    sequence = dropout.forward(sequence);
                }
            }
        }

        (sequence, state)
    }
}
