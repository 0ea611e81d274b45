// projeto: lstmhealthforecast
// file: src/neural/plot.rs
// Training loss curve rendered to a standalone HTML file

use log::info;
use plotly::{Layout, Plot, Scatter};

pub fn save_loss_plot(losses: &[f64], path: &str) {
    let mut plot = Plot::new();
    let epochs: Vec<usize> = (1..=losses.len()).collect();

    let trace = Scatter::new(epochs, losses.to_vec())
        .name("Training Loss")
        .mode(plotly::common::Mode::Lines);
    plot.add_trace(trace);

    let layout = Layout::new()
        .title("LSTM Training Loss")
        .x_axis(plotly::layout::Axis::new().title("Epoch"))
        .y_axis(plotly::layout::Axis::new().title("MSE"));
    plot.set_layout(layout);

    plot.write_html(path);
    info!("📊 Loss curve saved to {}", path);
}
