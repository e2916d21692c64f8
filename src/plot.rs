//! PNG plots of probe training curves and t-SNE embeddings
use std::path::Path;

use plotters::prelude::*;

use crate::probe::History;

/// Bright categorical palette, one colour per class
const PALETTE: [RGBColor; 10] = [
    RGBColor(2, 62, 255),
    RGBColor(255, 124, 0),
    RGBColor(26, 201, 56),
    RGBColor(232, 0, 11),
    RGBColor(139, 43, 226),
    RGBColor(159, 72, 0),
    RGBColor(241, 76, 193),
    RGBColor(163, 163, 163),
    RGBColor(255, 196, 0),
    RGBColor(0, 215, 255),
];

pub fn class_color(index: usize) -> RGBColor {
    PALETTE[index % PALETTE.len()]
}

/// Range covering `values` with 5 % padding on each side
pub fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let span = if hi > lo { hi - lo } else { 1.0 };
    (lo - 0.05 * span, hi + 0.05 * span)
}

/// Train/validation loss and accuracy over epochs
pub fn plot_training(history: &History, title: &str, path: &Path) -> anyhow::Result<()> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let last_epoch = history.epochs.last().map(|r| r.epoch).unwrap_or(1).max(2);
    let (_, y_max) = padded_range(
        history
            .epochs
            .iter()
            .flat_map(|r| [r.loss, r.val_loss, r.accuracy, r.val_accuracy]),
    );

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(1f64..last_epoch as f64, 0f64..y_max.max(1.0))?;

    chart
        .configure_mesh()
        .x_desc("Epoch #")
        .y_desc("Loss/Accuracy")
        .draw()?;

    let curves: [(&str, RGBColor, fn(&crate::probe::EpochRecord) -> f64); 4] = [
        ("train_loss", PALETTE[0], |r| r.loss),
        ("val_loss", PALETTE[1], |r| r.val_loss),
        ("train_acc", PALETTE[2], |r| r.accuracy),
        ("val_acc", PALETTE[3], |r| r.val_accuracy),
    ];
    for (label, color, value) in curves {
        let points: Vec<(f64, f64)> = history
            .epochs
            .iter()
            .map(|r| (r.epoch as f64, value(r)))
            .collect();
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::LowerLeft)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Scatter plot of 2-D points coloured by class
pub fn plot_embedding<S: AsRef<str>>(
    points: &[[f32; 2]],
    labels: &[u32],
    class_names: &[S],
    title: &str,
    path: &Path,
) -> anyhow::Result<()> {
    if points.len() != labels.len() {
        anyhow::bail!("{} points but {} labels", points.len(), labels.len());
    }

    let root = BitMapBackend::new(path, (1000, 1000)).into_drawing_area();
    root.fill(&RGBColor(234, 234, 242))?;

    let x_range = padded_range(points.iter().map(|p| p[0] as f64));
    let y_range = padded_range(points.iter().map(|p| p[1] as f64));

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)?;

    chart
        .configure_mesh()
        .light_line_style(WHITE)
        .bold_line_style(WHITE)
        .draw()?;

    for (class, name) in class_names.iter().enumerate() {
        let color = class_color(class);
        let members = points
            .iter()
            .zip(labels)
            .filter(|(_, l)| **l as usize == class)
            .map(|(p, _)| Circle::new((p[0] as f64, p[1] as f64), 3, color.filled()));
        chart
            .draw_series(members)?
            .label(name.as_ref())
            .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(())
}
