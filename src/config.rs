//! Hyperparameter configuration for the Switch communication network

use burn::prelude::*;

/// Recurrent cell kind for the network core
#[derive(Config, Debug, PartialEq)]
pub enum RnnMode {
    /// Gated recurrent unit
    Gru,
    /// Long short-term memory
    Lstm,
}

/// Configuration for the Switch communication network
///
/// Supplied once at construction and never mutated afterwards. Defaults
/// match the 3-agent Switch riddle with a one-bit channel.
#[derive(Debug, Config)]
pub struct CNetConfig {
    /// Number of agents in the game
    pub nagents: usize,
    /// Width of the communication vector (bits per message)
    pub comm_bits: usize,
    /// Total action space size (environment actions plus communication actions)
    pub action_space_total: usize,
    /// Hidden size shared by embeddings, message encoder and recurrent core
    #[config(default = 128)]
    pub rnn_size: usize,
    /// Feed each agent's previous action back as input
    #[config(default = true)]
    pub action_aware: bool,
    /// Narrow channel: ReLU gate in the message encoder, sigmoid squash in the DRU
    #[config(default = true)]
    pub comm_narrow: bool,
    /// Batch-normalize incoming messages before projection
    #[config(default = true)]
    pub batch_norm: bool,
    /// Recurrent cell kind
    #[config(default = "RnnMode::Gru")]
    pub rnn_mode: RnnMode,
    /// Dropout rate between recurrent layers and in the output head
    #[config(default = 0.0)]
    pub dropout_rate: f64,
    /// Ceiling on time steps normalized independently by the recurrent core
    #[config(default = 16)]
    pub bn_max_t: usize,
    /// Standard deviation of the DRU's training-time channel noise
    #[config(default = 2.0)]
    pub comm_sigma: f64,
}

impl CNetConfig {
    /// The message encoder exists only when there is a channel to listen on
    /// and a teammate to hear from.
    pub fn comm_enabled(&self) -> bool {
        self.comm_bits > 0 && self.nagents > 1
    }
}
