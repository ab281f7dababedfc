//! Plotting of tracking runs using gnuplot
//!
//! Series are collected first and drawn onto a single set of axes when the
//! figure is saved, so reference, prediction and driven path share one frame.

use gnuplot::{AutoOption, AxesCommon, Caption, Color, Figure, LineWidth, PointSize, PointSymbol};

use crate::common::{MpcError, MpcResult, Path2D, Pose2D, TickOutput};
use crate::path_tracking::transform::vehicle_to_world;

/// Color palette for consistent styling
pub mod colors {
    pub const BLACK: &str = "#000000";
    pub const RED: &str = "#FF0000";
    pub const GREEN: &str = "#00AA00";
    pub const BLUE: &str = "#0000FF";
    pub const GRAY: &str = "#808080";
    pub const YELLOW: &str = "#E0C000";

    pub const REFERENCE: &str = YELLOW;
    pub const PREDICTED: &str = GREEN;
    pub const DRIVEN: &str = BLUE;
    pub const WAYPOINT: &str = GRAY;
    pub const VEHICLE: &str = RED;
    pub const TRACK: &str = BLACK;
}

/// Style for path rendering
#[derive(Debug, Clone)]
pub struct PathStyle {
    pub color: String,
    pub line_width: f64,
    pub caption: String,
}

impl PathStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            line_width: 2.0,
            caption: caption.to_string(),
        }
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = width;
        self
    }
}

/// Style for point rendering
#[derive(Debug, Clone)]
pub struct PointStyle {
    pub color: String,
    pub size: f64,
    pub symbol: char,
    pub caption: String,
}

impl PointStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            size: 1.0,
            symbol: 'O',
            caption: caption.to_string(),
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_symbol(mut self, symbol: char) -> Self {
        self.symbol = symbol;
        self
    }
}

#[derive(Debug, Clone)]
enum Series {
    Lines { x: Vec<f64>, y: Vec<f64>, style: PathStyle },
    Points { x: Vec<f64>, y: Vec<f64>, style: PointStyle },
}

/// Collects series and renders them with gnuplot
#[derive(Debug, Clone)]
pub struct Visualizer {
    series: Vec<Series>,
    title: String,
    x_label: String,
    y_label: String,
    aspect_ratio: Option<f64>,
}

impl Visualizer {
    pub fn new() -> Self {
        Self {
            series: Vec::new(),
            title: String::new(),
            x_label: "X [m]".to_string(),
            y_label: "Y [m]".to_string(),
            aspect_ratio: Some(1.0),
        }
    }

    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    /// Set aspect ratio (None for auto)
    pub fn set_aspect_ratio(&mut self, ratio: Option<f64>) -> &mut Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Number of series added so far
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Plot a path from x,y vectors; empty or mismatched input is skipped
    pub fn plot_path_xy(&mut self, x: &[f64], y: &[f64], style: &PathStyle) -> &mut Self {
        if !x.is_empty() && x.len() == y.len() {
            self.series.push(Series::Lines { x: x.to_vec(), y: y.to_vec(), style: style.clone() });
        }
        self
    }

    pub fn plot_path(&mut self, path: &Path2D, style: &PathStyle) -> &mut Self {
        self.plot_path_xy(&path.x_coords(), &path.y_coords(), style)
    }

    /// Plot points from x,y vectors; empty or mismatched input is skipped
    pub fn plot_points_xy(&mut self, x: &[f64], y: &[f64], style: &PointStyle) -> &mut Self {
        if !x.is_empty() && x.len() == y.len() {
            self.series.push(Series::Points { x: x.to_vec(), y: y.to_vec(), style: style.clone() });
        }
        self
    }

    /// Plot vehicle pose with a heading indicator
    pub fn plot_vehicle(&mut self, pose: &Pose2D, size: f64) -> &mut Self {
        self.plot_points_xy(
            &[pose.x],
            &[pose.y],
            &PointStyle::new(colors::VEHICLE, "Vehicle").with_size(size),
        );

        let arrow_len = size * 2.0;
        let end_x = pose.x + arrow_len * pose.yaw.cos();
        let end_y = pose.y + arrow_len * pose.yaw.sin();
        self.series.push(Series::Lines {
            x: vec![pose.x, end_x],
            y: vec![pose.y, end_y],
            style: PathStyle::new(colors::VEHICLE, ""),
        });
        self
    }

    /// Plot one tick's reference and prediction in the world frame
    ///
    /// `pose` is the vehicle pose the tick was computed from. Held ticks carry
    /// no display paths and only draw the vehicle.
    pub fn plot_tick(&mut self, output: &TickOutput, pose: &Pose2D) -> MpcResult<&mut Self> {
        if !output.reference.is_empty() {
            let (x, y) = vehicle_to_world(pose, &output.reference.x_coords(), &output.reference.y_coords())?;
            self.plot_path_xy(&x, &y, &PathStyle::new(colors::REFERENCE, "Reference"));
        }
        if !output.predicted.is_empty() {
            let (x, y) = vehicle_to_world(pose, &output.predicted.x_coords(), &output.predicted.y_coords())?;
            self.plot_path_xy(&x, &y, &PathStyle::new(colors::PREDICTED, "MPC prediction"));
        }
        self.plot_vehicle(pose, 1.0);
        Ok(self)
    }

    /// Save plot to SVG file
    pub fn save_svg(&mut self, path: &str, width: u32, height: u32) -> MpcResult<()> {
        let mut figure = self.render();
        figure
            .save_to_svg(path, width, height)
            .map_err(|e| MpcError::VisualizationError(e.to_string()))
    }

    /// Save plot to PNG file
    pub fn save_png(&mut self, path: &str, width: u32, height: u32) -> MpcResult<()> {
        let mut figure = self.render();
        figure
            .save_to_png(path, width, height)
            .map_err(|e| MpcError::VisualizationError(e.to_string()))
    }

    fn render(&self) -> Figure {
        let mut figure = Figure::new();
        let axes = figure.axes2d();

        for series in &self.series {
            match series {
                Series::Lines { x, y, style } => {
                    axes.lines(x, y, &[
                        Caption(&style.caption),
                        Color(&style.color),
                        LineWidth(style.line_width),
                    ]);
                }
                Series::Points { x, y, style } => {
                    axes.points(x, y, &[
                        Caption(&style.caption),
                        Color(&style.color),
                        PointSymbol(style.symbol),
                        PointSize(style.size),
                    ]);
                }
            }
        }

        if !self.title.is_empty() {
            axes.set_title(&self.title, &[]);
        }
        axes.set_x_label(&self.x_label, &[]);
        axes.set_y_label(&self.y_label, &[]);
        if let Some(ratio) = self.aspect_ratio {
            axes.set_aspect_ratio(AutoOption::Fix(ratio));
        }
        figure
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Actuation, TickStatus};

    #[test]
    fn test_visualizer_creation() {
        let vis = Visualizer::new();
        assert!(vis.aspect_ratio.is_some());
        assert_eq!(vis.series_count(), 0);
    }

    #[test]
    fn test_path_style() {
        let style = PathStyle::new(colors::RED, "Test Path").with_line_width(3.0);
        assert_eq!(style.line_width, 3.0);
        assert_eq!(style.color, colors::RED);
    }

    #[test]
    fn test_mismatched_series_skipped() {
        let mut vis = Visualizer::new();
        vis.plot_path_xy(&[0.0, 1.0], &[0.0], &PathStyle::new(colors::DRIVEN, "Driven"));
        vis.plot_points_xy(&[], &[], &PointStyle::new(colors::WAYPOINT, "Waypoints"));
        assert_eq!(vis.series_count(), 0);
    }

    #[test]
    fn test_plot_tick_adds_paths_and_vehicle() {
        let output = TickOutput {
            command: Actuation::zero(),
            reference: Path2D::from_xy(&[0.0, 10.0], &[0.0, 0.0]),
            predicted: Path2D::from_xy(&[0.0, 1.0, 2.0], &[0.0, 0.0, 0.0]),
            status: TickStatus::Optimal,
        };
        let mut vis = Visualizer::new();
        vis.plot_tick(&output, &Pose2D::new(5.0, 5.0, 1.0)).unwrap();
        // reference, prediction, vehicle point, heading line
        assert_eq!(vis.series_count(), 4);
    }

    #[test]
    fn test_plot_held_tick_only_vehicle() {
        let mut vis = Visualizer::new();
        vis.plot_tick(&TickOutput::held(Actuation::zero()), &Pose2D::origin()).unwrap();
        assert_eq!(vis.series_count(), 2);
    }
}
