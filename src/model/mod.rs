//! Neural network for agents that learn a communication protocol while
//! playing the cooperative Switch game.
//!
//! # Architecture
//!
//! ```text
//! agent_index ──► Embedding ─┐
//! observation ──► Embedding ─┤
//! prev_action ──► Embedding ─┼─► sum ──► BnRnn (2 layers) ──► OutputHead
//! messages ─────► MessageEncoder ┘        per-step batch norm    Q-values over
//!                 (BatchNorm + Linear     + dropout              game + comm
//!                  + ReLU when narrow)                           actions
//! ```
//!
//! Messages travel through the [`Dru`] on their way between agents: noisy
//! and continuous while training, discretized at execution time.

pub mod cnet;
pub mod dru;
pub mod rnn;

pub use cnet::CNet;
pub use dru::Dru;
pub use rnn::{BnRnn, BnRnnConfig, LayerState, RnnState};
