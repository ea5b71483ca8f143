//! Confusion matrix heatmap rendered to PNG
//!
//! Cells are shaded on the Blues color scale with their counts printed on top.
//! Ticks are numbered by position, matching the CSV header; a colorbar on the
//! right maps shades back to counts.

use std::path::Path;

use image::imageops;
use image::{Rgb, RgbImage};
use tracing::debug;

use super::font::{draw_text, text_height, text_width};
use crate::error::Result;
use crate::training::ConfusionMatrix;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const TITLE: &str = "Confusion Matrix";
const X_LABEL: &str = "Predicted label";
const Y_LABEL: &str = "True label";

const GRID_EXTENT: u32 = 560;
const TITLE_SCALE: u32 = 2;
const AXIS_SCALE: u32 = 2;
const COLORBAR_WIDTH: u32 = 18;
const GAP: u32 = 12;

/// ColorBrewer Blues, light to dark
const BLUES: [[u8; 3]; 9] = [
    [247, 251, 255],
    [222, 235, 247],
    [198, 219, 239],
    [158, 202, 225],
    [107, 174, 214],
    [66, 146, 198],
    [33, 113, 181],
    [8, 81, 156],
    [8, 48, 107],
];

/// Blues color at `t` in `[0, 1]`
pub fn blues(t: f64) -> Rgb<u8> {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let position = t * (BLUES.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(BLUES.len() - 1);
    let frac = position - lower as f64;

    let mut rgb = [0u8; 3];
    for (channel, value) in rgb.iter_mut().enumerate() {
        let a = BLUES[lower][channel] as f64;
        let b = BLUES[upper][channel] as f64;
        *value = (a + (b - a) * frac).round() as u8;
    }
    Rgb(rgb)
}

struct Layout {
    cell: u32,
    tick_scale: u32,
    grid_x: u32,
    grid_y: u32,
    grid: u32,
    colorbar_x: u32,
    width: u32,
    height: u32,
}

impl Layout {
    fn new(matrix: &ConfusionMatrix) -> Self {
        let n = matrix.size().max(1) as u32;
        let cell = (GRID_EXTENT / n).clamp(16, 80);
        let grid = cell * n;
        let tick_scale = if cell >= 24 { 2 } else { 1 };

        let widest_tick = text_width(&n.saturating_sub(1).to_string(), tick_scale);
        let grid_x = GAP + text_height(AXIS_SCALE) + GAP + widest_tick + GAP;
        let grid_y = GAP + text_height(TITLE_SCALE) + 2 * GAP;

        let colorbar_x = grid_x + grid + 2 * GAP;
        let colorbar_ticks = text_width(&matrix.max_count().to_string(), tick_scale);
        let width = colorbar_x + COLORBAR_WIDTH + GAP / 2 + colorbar_ticks + 2 * GAP;
        let below_grid = GAP + text_height(tick_scale) + GAP + text_height(AXIS_SCALE);
        let height = grid_y + grid + below_grid + 2 * GAP;

        Self {
            cell,
            tick_scale,
            grid_x,
            grid_y,
            grid,
            colorbar_x,
            width,
            height,
        }
    }
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(image.width());
    let y_end = (y + h).min(image.height());
    for py in y..y_end {
        for px in x..x_end {
            image.put_pixel(px, py, color);
        }
    }
}

fn draw_frame(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32) {
    fill_rect(image, x, y, w, 1, BLACK);
    fill_rect(image, x, y + h.saturating_sub(1), w, 1, BLACK);
    fill_rect(image, x, y, 1, h, BLACK);
    fill_rect(image, x + w.saturating_sub(1), y, 1, h, BLACK);
}

fn draw_centered(
    image: &mut RgbImage,
    center_x: u32,
    center_y: u32,
    text: &str,
    scale: u32,
    color: Rgb<u8>,
) {
    let x = center_x as i64 - text_width(text, scale) as i64 / 2;
    let y = center_y as i64 - text_height(scale) as i64 / 2;
    draw_text(image, x, y, text, scale, color);
}

/// Render the heatmap
pub fn render_confusion_matrix(matrix: &ConfusionMatrix) -> RgbImage {
    let layout = Layout::new(matrix);
    let mut image = RgbImage::from_pixel(layout.width, layout.height, WHITE);
    let max = matrix.max_count();
    let n = matrix.size() as u32;

    // Title
    draw_centered(
        &mut image,
        layout.grid_x + layout.grid / 2,
        GAP + text_height(TITLE_SCALE) / 2,
        TITLE,
        TITLE_SCALE,
        BLACK,
    );

    // Cells and counts
    for (i, row) in matrix.counts().iter().enumerate() {
        for (j, &count) in row.iter().enumerate() {
            let t = if max == 0 { 0.0 } else { count as f64 / max as f64 };
            let x = layout.grid_x + j as u32 * layout.cell;
            let y = layout.grid_y + i as u32 * layout.cell;
            fill_rect(&mut image, x, y, layout.cell, layout.cell, blues(t));

            let text = count.to_string();
            let scale = if text_width(&text, 2) + 4 <= layout.cell { 2 } else { 1 };
            if text_width(&text, scale) + 2 <= layout.cell {
                let color = if t > 0.5 { WHITE } else { BLACK };
                let (center_x, center_y) = (x + layout.cell / 2, y + layout.cell / 2);
                draw_centered(&mut image, center_x, center_y, &text, scale, color);
            }
        }
    }
    draw_frame(&mut image, layout.grid_x, layout.grid_y, layout.grid, layout.grid);

    // Ticks
    let tick_y = layout.grid_y + layout.grid;
    for k in 0..n {
        let center = k * layout.cell + layout.cell / 2;
        let text = k.to_string();

        fill_rect(&mut image, layout.grid_x + center, tick_y, 1, GAP / 2, BLACK);
        draw_text(
            &mut image,
            (layout.grid_x + center) as i64 - text_width(&text, layout.tick_scale) as i64 / 2,
            (tick_y + GAP) as i64,
            &text,
            layout.tick_scale,
            BLACK,
        );

        fill_rect(&mut image, layout.grid_x - GAP / 2, layout.grid_y + center, GAP / 2, 1, BLACK);
        draw_text(
            &mut image,
            (layout.grid_x - GAP) as i64 - text_width(&text, layout.tick_scale) as i64,
            (layout.grid_y + center) as i64 - text_height(layout.tick_scale) as i64 / 2,
            &text,
            layout.tick_scale,
            BLACK,
        );
    }

    // Axis labels
    draw_centered(
        &mut image,
        layout.grid_x + layout.grid / 2,
        tick_y + GAP + text_height(layout.tick_scale) + GAP + text_height(AXIS_SCALE) / 2,
        X_LABEL,
        AXIS_SCALE,
        BLACK,
    );
    let mut y_label =
        RgbImage::from_pixel(text_width(Y_LABEL, AXIS_SCALE), text_height(AXIS_SCALE), WHITE);
    draw_text(&mut y_label, 0, 0, Y_LABEL, AXIS_SCALE, BLACK);
    let y_label = imageops::rotate270(&y_label);
    let y_offset = layout.grid_y as i64 + (layout.grid as i64 - y_label.height() as i64) / 2;
    imageops::overlay(&mut image, &y_label, GAP as i64, y_offset);

    // Colorbar, dark at the top
    for offset in 0..layout.grid {
        let t = 1.0 - offset as f64 / (layout.grid.max(2) - 1) as f64;
        let y = layout.grid_y + offset;
        fill_rect(&mut image, layout.colorbar_x, y, COLORBAR_WIDTH, 1, blues(t));
    }
    draw_frame(&mut image, layout.colorbar_x, layout.grid_y, COLORBAR_WIDTH, layout.grid);
    for value in colorbar_ticks(max) {
        let fraction = if max == 0 { 0.0 } else { value as f64 / max as f64 };
        let span = layout.grid.saturating_sub(1);
        let y = layout.grid_y + span - (fraction * span as f64) as u32;
        let x = layout.colorbar_x + COLORBAR_WIDTH;
        fill_rect(&mut image, x, y, GAP / 3, 1, BLACK);
        draw_text(
            &mut image,
            (x + GAP / 2) as i64,
            y as i64 - text_height(layout.tick_scale) as i64 / 2,
            &value.to_string(),
            layout.tick_scale,
            BLACK,
        );
    }

    debug!("Rendered {}x{} heatmap for {} labels", layout.width, layout.height, n);
    image
}

/// Up to five evenly spaced integer ticks from 0 to `max`
fn colorbar_ticks(max: u64) -> Vec<u64> {
    let mut ticks: Vec<u64> = (0..=4).map(|k| max * k / 4).collect();
    ticks.dedup();
    ticks
}

/// Render and save the heatmap as PNG
pub fn write_confusion_png(matrix: &ConfusionMatrix, path: &Path) -> Result<()> {
    let image = render_confusion_matrix(matrix);
    image.save_with_format(path, image::ImageFormat::Png)?;
    debug!("Saved confusion matrix plot to {}", path.display());
    Ok(())
}
