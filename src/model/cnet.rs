//! DRQN-based agent network that learns to communicate with its teammates
//! to play the Switch game.
//!
//! Four per-step inputs (agent identity, local observation, previous action,
//! incoming messages) are embedded into a shared hidden size, summed, run
//! through the batch-normalized recurrent core, and the final step's hidden
//! state is decoded into Q-values over the combined action space.

use burn::module::Ignored;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear,
    LinearConfig, Relu,
};
use burn::prelude::*;

use crate::config::CNetConfig;
use crate::model::rnn::{BnRnn, BnRnnConfig, RnnState, uniform_init};

/// Encoder for incoming messages: optional batch norm across the batch, a
/// projection to the hidden size, and a ReLU gate on narrow channels.
#[derive(Module, Debug)]
struct MessageEncoder<B: Backend> {
    norm: Option<BatchNorm<B, 0>>,
    linear: Linear<B>,
    activation: Option<Relu>,
}

impl<B: Backend> MessageEncoder<B> {
    fn forward(&self, messages: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = messages;
        if let Some(norm) = &self.norm {
            x = norm.forward(x);
        }
        x = self.linear.forward(x);
        if let Some(relu) = &self.activation {
            x = relu.forward(x);
        }
        x
    }
}

/// Decoder from the final hidden state to raw action-value scores
#[derive(Module, Debug)]
struct OutputHead<B: Backend> {
    dropout: Option<Dropout>,
    hidden: Linear<B>,
    activation: Relu,
    scores: Linear<B>,
}

impl<B: Backend> OutputHead<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;
        if let Some(dropout) = &self.dropout {
            x = dropout.forward(x);
        }
        x = self.activation.forward(self.hidden.forward(x));
        // No activation after the last layer: raw Q-value estimates
        self.scores.forward(x)
    }
}

/// The Switch communication network
///
/// Optional sub-components are owned as `Option` fields and checked for
/// presence at forward time: the previous-action table exists only with
/// action-awareness on, the message encoder only when communication is
/// enabled. Either way the combined sum simply omits absent terms.
#[derive(Module, Debug)]
pub struct CNet<B: Backend> {
    agent_lookup: Embedding<B>,
    state_lookup: Embedding<B>,
    prev_action_lookup: Option<Embedding<B>>,
    messages_mlp: Option<MessageEncoder<B>>,
    rnn: BnRnn<B>,
    outputs: OutputHead<B>,
    config: Ignored<CNetConfig>,
}

impl<B: Backend> CNet<B> {
    pub fn new(device: &B::Device, config: &CNetConfig) -> Self {
        assert!(config.nagents >= 1, "at least one agent is required");
        assert!(config.rnn_size > 0, "rnn_size must be positive");
        assert!(
            config.action_space_total > 0,
            "action_space_total must be positive"
        );
        assert!(
            (0.0..1.0).contains(&config.dropout_rate),
            "dropout_rate must lie in [0, 1)"
        );

        let initializer = uniform_init();

        let agent_lookup = EmbeddingConfig::new(config.nagents, config.rnn_size)
            .with_initializer(initializer.clone())
            .init(device);
        // Binary observation: the agent is in the interrogation room or not
        let state_lookup = EmbeddingConfig::new(2, config.rnn_size)
            .with_initializer(initializer.clone())
            .init(device);

        let prev_action_lookup = config.action_aware.then(|| {
            EmbeddingConfig::new(config.action_space_total, config.rnn_size)
                .with_initializer(initializer.clone())
                .init(device)
        });

        // While training, the DRU adds noise and squashes messages; at
        // execution time it discretizes them. Either way they arrive here as
        // a continuous vector of comm_bits per step.
        let messages_mlp = config.comm_enabled().then(|| MessageEncoder {
            norm: config
                .batch_norm
                .then(|| BatchNormConfig::new(config.comm_bits).init(device)),
            linear: LinearConfig::new(config.comm_bits, config.rnn_size)
                .with_initializer(initializer.clone())
                .init(device),
            activation: config.comm_narrow.then(Relu::new),
        });

        let rnn = BnRnnConfig::new(config.rnn_size, config.rnn_size)
            .with_mode(config.rnn_mode.clone())
            .with_bn_max_t(config.bn_max_t)
            .with_dropout_rate(config.dropout_rate)
            .init(device);

        let outputs = OutputHead {
            dropout: (config.dropout_rate > 0.0)
                .then(|| DropoutConfig::new(config.dropout_rate).init()),
            hidden: LinearConfig::new(config.rnn_size, config.rnn_size)
                .with_initializer(initializer.clone())
                .init(device),
            activation: Relu::new(),
            scores: LinearConfig::new(config.rnn_size, config.action_space_total)
                .with_initializer(initializer)
                .init(device),
        };

        Self {
            agent_lookup,
            state_lookup,
            prev_action_lookup,
            messages_mlp,
            rnn,
            outputs,
            config: Ignored(config.clone()),
        }
    }

    /// Q-values over the combined action space after consuming the sequence.
    ///
    /// `agent_index`, `observation` and `prev_action` are `[batch, steps]`
    /// index tensors; `messages` is `[batch, steps, comm_bits]`. Recurrence
    /// starts from a zero state; use [`CNet::forward_with_state`] to thread
    /// state across calls in a multi-step rollout.
    pub fn forward(
        &self,
        agent_index: Tensor<B, 2, Int>,
        observation: Tensor<B, 2, Int>,
        prev_action: Option<Tensor<B, 2, Int>>,
        messages: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 2> {
        self.forward_with_state(agent_index, observation, prev_action, messages, None)
            .0
    }

    /// As [`CNet::forward`], but with explicit recurrent state in and out
    pub fn forward_with_state(
        &self,
        agent_index: Tensor<B, 2, Int>,
        observation: Tensor<B, 2, Int>,
        prev_action: Option<Tensor<B, 2, Int>>,
        messages: Option<Tensor<B, 3>>,
        state: Option<RnnState<B>>,
    ) -> (Tensor<B, 2>, RnnState<B>) {
        let [batch, steps] = agent_index.dims();
        assert!(batch >= 1 && steps >= 1, "empty input batch");
        assert_eq!(
            observation.dims(),
            [batch, steps],
            "observation shape must match agent_index"
        );

        let mut z = self.agent_lookup.forward(agent_index) + self.state_lookup.forward(observation);

        if let Some(lookup) = &self.prev_action_lookup {
            let prev_action = prev_action
                .expect("action-awareness is enabled but no previous action was supplied");
            assert_eq!(
                prev_action.dims(),
                [batch, steps],
                "prev_action shape must match agent_index"
            );
            z = z + lookup.forward(prev_action);
        }

        if let Some(mlp) = &self.messages_mlp {
            let messages =
                messages.expect("communication is enabled but no messages were supplied");
            let comm_bits = self.config.comm_bits;
            assert_eq!(
                messages.dims(),
                [batch, steps, comm_bits],
                "messages must be [batch, steps, comm_bits]"
            );
            let encoded = mlp.forward(messages.reshape([batch * steps, comm_bits]));
            z = z + encoded.reshape([batch, steps, self.config.rnn_size]);
        }

        let (rnn_out, state) = self.rnn.forward(z, state);
        let last: Tensor<B, 2> = rnn_out.narrow(1, steps - 1, 1).squeeze(1);
        (self.outputs.forward(last), state)
    }

    /// Redraws every parameter from the uniform init range, discarding any
    /// trained values. Intended for fresh starts, not checkpoint restores.
    pub fn reset_params(self, device: &B::Device) -> Self {
        Self::new(device, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RnnMode;
    use burn::tensor::Distribution;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn zero_indices(batch: usize, steps: usize) -> Tensor<TestBackend, 2, Int> {
        Tensor::zeros([batch, steps], &device())
    }

    fn random_messages(batch: usize, steps: usize, bits: usize) -> Tensor<TestBackend, 3> {
        Tensor::random(
            [batch, steps, bits],
            Distribution::Uniform(0.0, 1.0),
            &device(),
        )
    }

    fn to_vec(output: Tensor<TestBackend, 2>) -> Vec<f32> {
        output.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_output_width_matches_action_space() {
        let config = CNetConfig::new(3, 1, 4).with_rnn_size(32);
        let model = CNet::<TestBackend>::new(&device(), &config);

        for batch in 1..=4 {
            let q = model.forward(
                zero_indices(batch, 2),
                zero_indices(batch, 2),
                Some(zero_indices(batch, 2)),
                Some(random_messages(batch, 2, 1)),
            );
            assert_eq!(q.dims(), [batch, 4]);
        }
    }

    #[test]
    fn test_disabled_comm_ignores_messages() {
        // A single agent has no teammates, so the message term must
        // contribute exactly zero no matter what is supplied.
        let config = CNetConfig::new(1, 1, 4).with_rnn_size(32);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let without = model.forward(
            zero_indices(2, 3),
            zero_indices(2, 3),
            Some(zero_indices(2, 3)),
            None,
        );
        let with = model.forward(
            zero_indices(2, 3),
            zero_indices(2, 3),
            Some(zero_indices(2, 3)),
            Some(random_messages(2, 3, 1)),
        );

        assert_eq!(to_vec(without), to_vec(with));
    }

    #[test]
    fn test_disabled_action_awareness_ignores_prev_action() {
        let config = CNetConfig::new(3, 1, 4)
            .with_rnn_size(32)
            .with_action_aware(false);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let messages = random_messages(2, 2, 1);
        let base = model.forward(
            zero_indices(2, 2),
            zero_indices(2, 2),
            None,
            Some(messages.clone()),
        );
        let varied = model.forward(
            zero_indices(2, 2),
            zero_indices(2, 2),
            Some(Tensor::from_ints([[1, 3], [2, 0]], &device())),
            Some(messages),
        );

        assert_eq!(to_vec(base), to_vec(varied));
    }

    #[test]
    fn test_forward_is_deterministic_without_dropout() {
        let config = CNetConfig::new(3, 2, 7).with_rnn_size(32);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let messages = random_messages(3, 2, 2);
        let args = || {
            (
                Tensor::from_ints([[0, 0], [1, 1], [2, 2]], &device()),
                Tensor::from_ints([[0, 1], [1, 0], [0, 0]], &device()),
                Some(Tensor::from_ints([[0, 4], [1, 5], [2, 6]], &device())),
                Some(messages.clone()),
            )
        };

        let (a, o, p, m) = args();
        let first = model.forward(a, o, p, m);
        let (a, o, p, m) = args();
        let second = model.forward(a, o, p, m);

        assert_eq!(to_vec(first), to_vec(second));
    }

    #[test]
    fn test_reset_params_redraws_weights() {
        let config = CNetConfig::new(3, 1, 4).with_rnn_size(32);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let run = |model: &CNet<TestBackend>| {
            model.forward(
                zero_indices(2, 1),
                zero_indices(2, 1),
                Some(zero_indices(2, 1)),
                Some(random_messages(2, 1, 1).zeros_like()),
            )
        };

        let before = to_vec(run(&model));
        let model = model.reset_params(&device());
        let after = to_vec(run(&model));

        assert_eq!(before.len(), after.len());
        assert_ne!(before, after, "reset_params should redraw parameters");
    }

    #[test]
    #[should_panic(expected = "no messages were supplied")]
    fn test_missing_messages_panics_when_comm_enabled() {
        let config = CNetConfig::new(3, 1, 4).with_rnn_size(32);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let _ = model.forward(
            zero_indices(1, 1),
            zero_indices(1, 1),
            Some(zero_indices(1, 1)),
            None,
        );
    }

    #[test]
    #[should_panic(expected = "no previous action was supplied")]
    fn test_missing_prev_action_panics_when_action_aware() {
        let config = CNetConfig::new(3, 1, 4).with_rnn_size(32);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let _ = model.forward(
            zero_indices(1, 1),
            zero_indices(1, 1),
            None,
            Some(random_messages(1, 1, 1)),
        );
    }

    #[test]
    fn test_lstm_mode_forward() {
        let config = CNetConfig::new(3, 1, 4)
            .with_rnn_size(32)
            .with_rnn_mode(RnnMode::Lstm);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let q = model.forward(
            zero_indices(2, 2),
            zero_indices(2, 2),
            Some(zero_indices(2, 2)),
            Some(random_messages(2, 2, 1)),
        );
        assert_eq!(q.dims(), [2, 4]);
    }

    #[test]
    fn test_state_threading_roundtrip() {
        let config = CNetConfig::new(3, 1, 4).with_rnn_size(32);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let (q, state) = model.forward_with_state(
            zero_indices(2, 1),
            zero_indices(2, 1),
            Some(zero_indices(2, 1)),
            Some(random_messages(2, 1, 1)),
            None,
        );
        assert_eq!(q.dims(), [2, 4]);

        let (q, _) = model.forward_with_state(
            zero_indices(2, 1),
            zero_indices(2, 1),
            Some(zero_indices(2, 1)),
            Some(random_messages(2, 1, 1)),
            Some(state),
        );
        assert_eq!(q.dims(), [2, 4]);
    }

    #[test]
    fn test_switch_scenario_shape_and_finite() {
        // 3 agents, 2 comm bits, 5 game actions + 2 comm actions
        let config = CNetConfig::new(3, 2, 7);
        let model = CNet::<TestBackend>::new(&device(), &config);

        let q = model.forward(
            Tensor::from_ints([[0], [1], [2], [0]], &device()),
            Tensor::from_ints([[1], [0], [1], [0]], &device()),
            Some(Tensor::from_ints([[0], [3], [6], [2]], &device())),
            Some(random_messages(4, 1, 2)),
        );

        assert_eq!(q.dims(), [4, 7]);
        assert!(to_vec(q).iter().all(|v| v.is_finite()));
    }
}
