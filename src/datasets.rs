//! Generates binary classification datasets and utilities for plotting them and decision boundaries
//!
//! By convention class 0 is plotted in red and class 1 is plotted in blue. Generators take the
//! random source explicitly so a run can be reproduced from its seed.

use crate::{
    graph::Graph,
    nn::{Module, predict_class},
};
use std::{
    error::Error,
    f64::consts::PI,
    fmt::{self, Display},
};

use clap::ValueEnum;
use plotters::{
    chart::ChartBuilder,
    prelude::{BitMapBackend, Circle, IntoDrawingArea, Rectangle},
    style::{BLUE, Color, RED, RGBColor, WHITE},
};
use rand::Rng;

/// Toggles between dataset types
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Line,
    Circle,
    XOR,
    Moon,
}

impl Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Line => write!(f, "line"),
            Dataset::Circle => write!(f, "circle"),
            Dataset::XOR => write!(f, "xor"),
            Dataset::Moon => write!(f, "moon"),
        }
    }
}

/// Loads a dataset based on the dataset type
pub fn load_dataset(
    dataset: Dataset,
    class_size: usize,
    rng: &mut impl Rng,
) -> (Vec<Vec<f64>>, Vec<Vec<u8>>) {
    match dataset {
        Dataset::Line => gen_linear_data(class_size, rng),
        Dataset::Circle => gen_circle_data(class_size, rng),
        Dataset::XOR => gen_xor_data(class_size, rng),
        Dataset::Moon => gen_moon_data(class_size, rng),
    }
}

/// Generates a simple linearly separable dataset, labels are one hot encoded vectors
pub fn gen_linear_data(class_size: usize, rng: &mut impl Rng) -> (Vec<Vec<f64>>, Vec<Vec<u8>>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..class_size {
        let x: f64 = rng.random_range(-5.0..5.0);
        let y: f64 = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        labels.push(if x > y { vec![1, 0] } else { vec![0, 1] });
    }

    (data, labels)
}

/// Generates a binary classification dataset of two concentric circles, labels are one hot encoded
/// vectors
pub fn gen_circle_data(class_size: usize, rng: &mut impl Rng) -> (Vec<Vec<f64>>, Vec<Vec<u8>>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for (radius, label) in [(3.0f64, vec![1, 0]), (5.0, vec![0, 1])] {
        for _ in 0..class_size {
            let angle: f64 = rng.random_range(0.0..2.0 * PI);
            let radius_delta = radius * rng.random_range(-0.25f64..0.25);
            let x = (radius + radius_delta) * angle.cos();
            let y = (radius + radius_delta) * angle.sin();
            data.push(vec![x, y]);
            labels.push(label.clone());
        }
    }

    (data, labels)
}

pub fn gen_xor_data(class_size: usize, rng: &mut impl Rng) -> (Vec<Vec<f64>>, Vec<Vec<u8>>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..class_size {
        let x: f64 = rng.random_range(-5.0..5.0);
        let y: f64 = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        if x > 0.0 && y > 0.0 || x < 0.0 && y < 0.0 {
            labels.push(vec![1, 0]);
        } else {
            labels.push(vec![0, 1]);
        }
    }

    (data, labels)
}

/// Generates a moons dataset (two interleaving partial circles) for binary classification
/// The labels are one-hot encoded vectors
pub fn gen_moon_data(class_size: usize, rng: &mut impl Rng) -> (Vec<Vec<f64>>, Vec<Vec<u8>>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();
    let radius: f64 = 3.0;

    // First moon
    for _ in 0..class_size {
        let theta: f64 = rng.random_range(PI * -1.0 / 4.0..PI * 5.0 / 4.0);
        let x = radius * theta.cos();
        let y = radius * theta.sin();
        let noise_x: f64 = rng.random_range(-0.1..0.1);
        let noise_y: f64 = rng.random_range(-0.1..0.1);
        data.push(vec![x + noise_x, y + noise_y]);
        labels.push(vec![1, 0]);
    }

    // Second moon
    for _ in 0..class_size {
        let theta: f64 = rng.random_range(PI * -1.0 / 4.0..PI * 5.0 / 4.0);
        let x = radius * theta.cos() + 2.0;
        let y = -radius * theta.sin() - 0.2;
        let noise_x: f64 = rng.random_range(-0.1..0.1);
        let noise_y: f64 = rng.random_range(-0.1..0.1);
        data.push(vec![x + noise_x, y + noise_y]);
        labels.push(vec![0, 1]);
    }

    (data, labels)
}

/// Plots the data points and labels for a given dataset
pub fn plot_data(
    data: &[Vec<f64>],
    labels: &[Vec<u8>],
    file_name: &str,
    dataset: Dataset,
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(format!("Dataset: {}", dataset), ("sans-serif", 50))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(-6.0f64..6.0f64, -6.0f64..6.0f64)?;

    chart.configure_mesh().draw()?;

    chart.draw_series(data.iter().zip(labels.iter()).map(|(data, label)| {
        let color = if get_class(label) == 0 { RED } else { BLUE };
        Circle::new((data[0], data[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Data plot has been saved to '{}'.", file_name);

    Ok(())
}

/// Plots the decision boundary for a given model on a given dataset by sampling a grid of points
/// and evaluating the model
///
/// Nodes created while evaluating the grid are dropped from `graph` afterwards.
pub fn plot_decision_boundary(
    model: &dyn Module,
    graph: &Graph,
    file_name: &str,
    dataset: Dataset,
    data: &[Vec<f64>],
    labels: &[Vec<u8>],
) -> Result<(), Box<dyn Error>> {
    let grid_min: f64 = -6.0;
    let grid_max: f64 = 6.0;
    let step = 0.20;
    let n_steps = ((grid_max - grid_min) / step).round() as i32;

    let mark = graph.len();
    let mut cells = Vec::with_capacity((n_steps * n_steps) as usize);
    for xi in 0..n_steps {
        let x = grid_min + (xi as f64 * step);
        for yi in 0..n_steps {
            let y = grid_min + (yi as f64 * step);
            let output = model.forward(&graph.leaves(&[x, y]))?;
            cells.push((x, y, predict_class(&output)));
            graph.truncate(mark);
        }
    }

    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(
            format!("Decision Boundary for {}", dataset),
            ("sans-serif", 50),
        )
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(grid_min..grid_max, grid_min..grid_max)?;

    chart.configure_mesh().draw()?;

    let red_bg = RGBColor(255, 200, 200);
    let blue_bg = RGBColor(200, 200, 255);

    chart.draw_series(cells.into_iter().map(|(x, y, class)| {
        let color = if class == 0 { red_bg } else { blue_bg };
        Rectangle::new(
            [
                (x - step / 2.0, y - step / 2.0),
                (x + step / 2.0, y + step / 2.0),
            ],
            color.filled(),
        )
    }))?;

    // plot the data points
    chart.draw_series(data.iter().zip(labels.iter()).map(|(data, label)| {
        let color = if get_class(label) == 0 { RED } else { BLUE };
        Circle::new((data[0], data[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Decision boundary plot saved to '{}'.", file_name);
    Ok(())
}

/// Returns the class of a given label by taking the index of the maximum value
pub fn get_class(label: &[u8]) -> usize {
    label
        .iter()
        .enumerate()
        .max_by_key(|(_, v)| **v)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Maps a one hot label to a max-margin target, class 1 is `1.0` and class 0 is `-1.0`
pub fn margin_target(label: &[u8]) -> f64 {
    if get_class(label) == 1 { 1.0 } else { -1.0 }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;

    #[test]
    fn test_datasets_have_matching_labels() {
        for dataset in [Dataset::Line, Dataset::Circle, Dataset::XOR, Dataset::Moon] {
            let mut rng = Pcg64Mcg::seed_from_u64(3);
            let (data, labels) = load_dataset(dataset, 20, &mut rng);
            assert_eq!(data.len(), labels.len());
            assert!(data.len() >= 20);
            assert!(data.iter().all(|d| d.len() == 2));
            assert!(labels.iter().all(|l| l.iter().sum::<u8>() == 1));
        }
    }

    #[test]
    fn test_xor_labels() {
        let mut rng = Pcg64Mcg::seed_from_u64(9);
        let (data, labels) = gen_xor_data(50, &mut rng);
        for (d, l) in data.iter().zip(labels.iter()) {
            let same_sign = d[0] * d[1] > 0.0;
            assert_eq!(get_class(l), if same_sign { 0 } else { 1 });
        }
    }

    #[test]
    fn test_generation_is_seeded() {
        let gen_data = |seed| gen_moon_data(5, &mut Pcg64Mcg::seed_from_u64(seed)).0;
        assert_eq!(gen_data(11), gen_data(11));
    }

    #[test]
    fn test_class_helpers() {
        assert_eq!(get_class(&[1, 0]), 0);
        assert_eq!(get_class(&[0, 1]), 1);
        assert_eq!(margin_target(&[0, 1]), 1.0);
        assert_eq!(margin_target(&[1, 0]), -1.0);
        assert_eq!(Dataset::XOR.to_string(), "xor");
    }
}
