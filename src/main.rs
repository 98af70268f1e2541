//! Prints forward values and gradients of MSE loss, GELU and Sigmoid for a few
//! hand-written inputs using the library provided by `gradcheck`
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! cargo run
//! cargo run -- --predictions 1,2,3 --targets 1.5,2,2 --graphviz output/mse.dot
//! ```
//!
//! The MSE gradient is computed in closed form and cross-checked against backprop
//! through the computation graph. Exits with a non-zero code when the inputs are invalid.

use std::{error::Error, path::PathBuf, process::ExitCode};

use gradcheck::{
    graphviz::draw_dot,
    loss::{MSELoss, compute_mse},
    nn::{Activation, GELU, Sigmoid},
    values::Value,
};

use clap::Parser;

// closed-form and backprop gradients are both f64, they should agree to rounding error
const GRAD_TOLERANCE: f64 = 1e-9;

#[derive(Parser)]
struct Args {
    #[clap(
        short,
        long,
        value_delimiter = ',',
        allow_negative_numbers = true,
        default_values_t = [3.0, 4.0, 5.0]
    )]
    predictions: Vec<f64>,
    #[clap(
        short,
        long,
        value_delimiter = ',',
        allow_negative_numbers = true,
        default_values_t = [3.3, 4.2, 5.1]
    )]
    targets: Vec<f64>,
    #[clap(short, long, allow_negative_numbers = true, default_value_t = 1.3)]
    activation_input: f64,
    /// Write the MSE computation graph to this path as a graphviz `.dot` file
    #[clap(long)]
    graphviz: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    let result = run(&args);
    if let Err(e) = &result {
        log::error!("{}", e);
    }
    ExitCode::from(exit_status(&result))
}

/// 0 on success, 1 when the inputs are rejected or the graph can't be written
fn exit_status(result: &Result<(), Box<dyn Error>>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    println!("Inputs: {:?}", args.predictions);
    println!("Targets: {:?}", args.targets);

    let mse = compute_mse(&args.predictions, &args.targets)?;
    println!("MSELoss: {} {:?}", mse.loss, mse.gradient);

    // same loss again, with gradients from backprop
    let y_pred = args
        .predictions
        .iter()
        .map(|&p| Value::new(p))
        .collect::<Vec<_>>();
    let y_true = args
        .targets
        .iter()
        .map(|&t| Value::new(t))
        .collect::<Vec<_>>();
    let loss = MSELoss::call(&y_pred, &y_true)?;
    loss.backward();
    let max_grad_diff = y_pred
        .iter()
        .zip(mse.gradient.iter())
        .map(|(v, g)| (v.grad() - g).abs())
        .fold(0.0, f64::max);
    log::debug!(
        "backprop loss: {}, max gradient difference from closed form: {:e}",
        loss.data(),
        max_grad_diff
    );
    if max_grad_diff > GRAD_TOLERANCE || (loss.data() - mse.loss).abs() > GRAD_TOLERANCE {
        log::warn!(
            "Backprop disagrees with closed form: loss {} vs {}, max gradient difference {:e}",
            loss.data(),
            mse.loss,
            max_grad_diff
        );
    }
    if let Some(path) = &args.graphviz {
        draw_dot(&loss, path)?;
    }

    let activations: [&dyn Activation; 2] = [&GELU::new(), &Sigmoid::new()];
    for activation in activations {
        let input = [Value::new(args.activation_input)];
        let output = activation.forward(&input);
        output[0].backward();
        println!(
            "{}: {} {}",
            activation.name(),
            output[0].data(),
            input[0].grad()
        );
    }

    Ok(())
}
