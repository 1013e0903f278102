use std::env;

use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::{Distribution, TensorData};
use dotenv::dotenv;
use rand::Rng;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use switchnet::{CNet, CNetConfig, Dru};

type B = NdArray;

fn get_env_var_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|val| val.parse::<usize>().ok())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("switchnet=debug,info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn index_tensor(
    batch: usize,
    steps: usize,
    mut sample: impl FnMut() -> i64,
    device: &<B as Backend>::Device,
) -> Tensor<B, 2, Int> {
    let values: Vec<i64> = (0..batch * steps).map(|_| sample()).collect();
    Tensor::from_data(TensorData::new(values, [batch, steps]), device)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let nagents = get_env_var_usize("SWITCH_NAGENTS").unwrap_or(3);
    let comm_bits = get_env_var_usize("SWITCH_COMM_BITS").unwrap_or(1);
    let action_space_total = get_env_var_usize("SWITCH_ACTION_SPACE_TOTAL").unwrap_or(4);
    let rnn_size = get_env_var_usize("SWITCH_RNN_SIZE").unwrap_or(128);
    let batch = get_env_var_usize("SWITCH_BATCH").unwrap_or(4);
    let steps = get_env_var_usize("SWITCH_STEPS").unwrap_or(4);

    let config = CNetConfig::new(nagents, comm_bits, action_space_total).with_rnn_size(rnn_size);
    tracing::info!("Model config: {}", config);

    let device = Default::default();
    let model = CNet::<B>::new(&device, &config);
    let dru = Dru::new(config.comm_sigma, config.comm_narrow);

    let mut rng = rand::rng();
    let agent_index = index_tensor(
        batch,
        steps,
        || rng.random_range(0..nagents as i64),
        &device,
    );
    let observation = index_tensor(batch, steps, || rng.random_range(0..2), &device);
    let prev_action = index_tensor(
        batch,
        steps,
        || rng.random_range(0..action_space_total as i64),
        &device,
    );

    // Execution mode: run raw channel activations through the DRU so the
    // model sees the same discretized bits its teammates would send
    let messages: Option<Tensor<B, 3>> = config.comm_enabled().then(|| {
        let raw = Tensor::<B, 2>::random(
            [batch * steps, comm_bits],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        dru.discretize(raw).reshape([batch, steps, comm_bits])
    });

    let q_values = model.forward(agent_index, observation, Some(prev_action), messages);
    tracing::debug!("Q-values: {}", q_values);

    let greedy: Vec<i64> = q_values
        .argmax(1)
        .into_data()
        .to_vec()
        .map_err(|err| format!("failed to read greedy actions: {err:?}"))?;
    tracing::info!(
        "Greedy actions for a batch of {} ({} steps each): {:?}",
        batch,
        steps,
        greedy
    );

    Ok(())
}
