//! A simple implementation of a neural network for binary classification
//! using the library provided by `grad_rs_scalar`
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! RUST_LOG=info cargo run -- --dataset moon --loss hinge
//! ```
//!
//! Supports a few classic datasets out of the box and allows custom learning rate, momentum,
//! batch size, etc.

use std::{error::Error, fs};

use grad_rs_scalar::{
    dataloader::DataLoader,
    datasets::{Dataset, get_class, load_dataset, margin_target, plot_data, plot_decision_boundary},
    graph::Graph,
    loss::{MSELoss, MaxMarginLoss, accuracy, l2_regularization},
    nn::{MLP, Module, NNError, Softmax, predict_class},
    optim::{Optim, SGD},
    values::Value,
    viz::{GraphSnapshot, draw_dot},
};

use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Objective the model is trained with
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
enum LossKind {
    /// softmax over one output per class followed by mean squared error
    Mse,
    /// single score trained with the max-margin loss
    Hinge,
}

#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = Dataset::Moon)]
    dataset: Dataset,
    #[clap(short, long, default_value_t = 100)]
    class_size: usize,
    #[clap(short, long, default_value_t = 20)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 50)]
    epochs: usize,
    #[clap(short, long, default_value_t = 0.05)]
    lr: f64,
    #[clap(short, long, default_value_t = 0.9)]
    momentum: f64,
    #[clap(short, long, default_value_t = 5)]
    print_epochs: usize,
    #[clap(short, long, default_value_t = format!("output"))]
    output_dir: String,
    // Note that when increasing the hidden size, activation values may explode if
    // the weights are not initialized properly
    #[clap(long, default_value_t = 16)]
    hidden_units: usize,
    #[clap(long, value_enum, default_value_t = LossKind::Hinge)]
    loss: LossKind,
    /// strength of the L2 penalty on the parameters
    #[clap(long, default_value_t = 1e-4)]
    alpha: f64,
    #[clap(short, long, default_value_t = 1337)]
    seed: u64,
    #[clap(long, default_value_t = false)]
    graphviz: bool,
    /// dump a JSON snapshot of the loss graph for the browser visualizer
    #[clap(long, default_value_t = false)]
    snapshot: bool,
}

// An MLP with two hidden layers. With the MSE loss the output is a vector of values representing
// the probability of each class, with the hinge loss it is a single score
struct Model {
    mlp: MLP,
    softmax: Option<Softmax>,
}

impl Model {
    fn new(
        graph: &Graph,
        n_classes: usize,
        hidden_size: usize,
        loss: LossKind,
        rng: &mut impl Rng,
    ) -> Self {
        let (n_outputs, softmax) = match loss {
            LossKind::Mse => (n_classes, Some(Softmax::new())),
            LossKind::Hinge => (1, None),
        };
        Self {
            mlp: MLP::new(graph, 2, &[hidden_size, hidden_size, n_outputs], rng),
            softmax,
        }
    }
}

impl Module for Model {
    fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        let out = self.mlp.forward(inputs)?;
        Ok(match &self.softmax {
            Some(softmax) => softmax.forward(&out),
            None => out,
        })
    }

    fn parameters(&self) -> Vec<Value> {
        self.mlp.parameters()
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    fs::create_dir_all(&args.output_dir)?;
    let mut rng = Pcg64Mcg::seed_from_u64(args.seed);

    let (data, labels) = load_dataset(args.dataset, args.class_size, &mut rng);
    let n_classes = labels.first().map(|l| l.len()).ok_or("empty dataset")?;

    plot_data(
        &data,
        &labels,
        &format!("{}/dataset_{}.png", args.output_dir, args.dataset),
        args.dataset,
    )?;

    let graph = Graph::new();
    let model = Model::new(&graph, n_classes, args.hidden_units, args.loss, &mut rng);
    let params = model.parameters();
    let mut optim = SGD::new(params.clone(), args.lr, args.momentum);
    let data_loader = DataLoader::new(data.clone(), labels.clone(), args.batch_size, true)?;
    log::info!(
        "training {} parameters on {} samples in {} batches",
        params.len(),
        data_loader.len(),
        data_loader.n_batches()
    );

    // every node created after this point is dropped at the end of each step
    let mark = graph.len();
    let epochs = args.epochs;
    let print_every = args.print_epochs.max(1);

    for epoch in 0..epochs {
        // linear learning rate decay
        optim.set_lr(args.lr * (1.0 - 0.9 * epoch as f64 / epochs as f64));
        let report = epoch % print_every == 0 || epoch == epochs - 1;
        let mut epoch_loss = 0.0;
        let mut predicted = vec![];
        let mut expected = vec![];

        for (batch_idx, (batch_data, batch_labels)) in data_loader.iter(&mut rng).enumerate() {
            let mut outputs = Vec::with_capacity(batch_data.len());
            for x in batch_data.iter() {
                outputs.push(model.forward(&graph.leaves(x))?);
            }
            predicted.extend(outputs.iter().map(|o| predict_class(o)));
            expected.extend(batch_labels.iter().map(|l| get_class(l)));

            let data_loss = match args.loss {
                LossKind::Mse => {
                    let losses = outputs
                        .iter()
                        .zip(batch_labels.iter())
                        .map(|(y_pred, label)| {
                            let y_true = label.iter().map(|v| *v as f64).collect::<Vec<_>>();
                            MSELoss::call(y_pred, &y_true)
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    graph.mean(losses)
                }
                LossKind::Hinge => {
                    let scores = outputs.iter().map(|o| o[0].clone()).collect::<Vec<_>>();
                    let targets = batch_labels.iter().map(|l| margin_target(l)).collect::<Vec<_>>();
                    MaxMarginLoss::call(&scores, &targets)?
                }
            };
            let total_loss = &data_loss + &l2_regularization(&params, args.alpha)?;
            total_loss.backward();
            epoch_loss += total_loss.data();

            if report && batch_idx == 0 {
                if args.graphviz {
                    draw_dot(
                        &total_loss,
                        format!(
                            "{}/loss_graph_epoch_{}_{}.dot",
                            args.output_dir,
                            epoch + 1,
                            args.dataset
                        ),
                    )?;
                }
                if args.snapshot {
                    GraphSnapshot::from_root(&total_loss).save_json(format!(
                        "{}/loss_graph_epoch_{}_{}.json",
                        args.output_dir,
                        epoch + 1,
                        args.dataset
                    ))?;
                }
            }

            // take steps in minibatches
            optim.step()?;
            optim.zero_grad();
            graph.truncate(mark);
        }

        let epoch_accuracy = accuracy(&predicted, &expected);
        log::debug!(
            "epoch {}: lr {:.5}, graph size {}",
            epoch + 1,
            optim.lr(),
            graph.len()
        );
        if report {
            log::info!(
                "epoch: {}, epoch_loss: {:.5}, accuracy: {:.1}%",
                epoch + 1,
                epoch_loss / data_loader.n_batches() as f64,
                epoch_accuracy * 100.0
            );
            plot_decision_boundary(
                &model,
                &graph,
                &format!(
                    "{}/decision_boundary_epoch_{}_{}.png",
                    args.output_dir,
                    epoch + 1,
                    args.dataset
                ),
                args.dataset,
                &data,
                &labels,
            )?;
        }
    }
    Ok(())
}
