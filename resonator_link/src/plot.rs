//! Pure mappings between resonator values and plot-space shapes. The
//! rendering layer draws these shapes; the sync layer inverts them when
//! deriving the current value of an edited resonator, so the round trip
//! must hold to floating-point tolerance.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Plot extent and the value domain of each axis. The frequency axis is
/// log-mapped; gain and decay are linear with zero at the bottom edge.
/// The decay axis is in the control domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotBounds {
    pub width: f64,
    pub height: f64,
    pub freq_axis: Range,
    pub gain_axis: Range,
    pub decay_axis: Range,
    pub handle_size: f64,
}

impl Default for PlotBounds {
    fn default() -> Self {
        Self {
            width: 640.0,
            height: 480.0,
            freq_axis: Range::new(20.0, 20_000.0),
            gain_axis: Range::new(0.0, 0.3),
            decay_axis: Range::new(0.995, 1.0),
            handle_size: 15.0,
        }
    }
}

/// Frequency marker: a vertical line across the full plot height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreqLine {
    pub x: f64,
    pub y_top: f64,
    pub y_bottom: f64,
}

/// Draggable square for a gain or decay value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Handle {
    pub x: f64,
    pub y: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResonatorShape {
    pub freq_line: FreqLine,
    pub gain: Handle,
    pub decay: Handle,
}

fn map_range(v: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    out_min + (out_max - out_min) * (v - in_min) / (in_max - in_min)
}

impl PlotBounds {
    /// Linear axis value to on-plot y (zero at the bottom edge).
    pub fn map_to_y(&self, value: f64, axis: Range) -> f64 {
        self.height - map_range(value, axis.min, axis.max, 0.0, self.height)
    }

    pub fn unmap_from_y(&self, y: f64, axis: Range) -> f64 {
        map_range(y - self.height, 0.0, -self.height, axis.min, axis.max)
    }

    /// Frequency to on-plot x along the log axis.
    pub fn map_freq_x(&self, freq: f64) -> f64 {
        let lo = self.freq_axis.min.log10();
        let hi = self.freq_axis.max.log10();
        map_range(freq.log10(), lo, hi, 0.0, self.width)
    }

    pub fn unmap_freq_x(&self, x: f64) -> f64 {
        let lo = self.freq_axis.min.log10();
        let hi = self.freq_axis.max.log10();
        10f64.powf(map_range(x, 0.0, self.width, lo, hi))
    }

    pub fn resonator_to_shape(&self, freq: f64, gain: f64, decay: f64) -> ResonatorShape {
        let x = self.map_freq_x(freq);
        ResonatorShape {
            freq_line: FreqLine {
                x,
                y_top: 0.0,
                y_bottom: self.height,
            },
            gain: Handle {
                x,
                y: self.map_to_y(gain, self.gain_axis),
                size: self.handle_size,
            },
            decay: Handle {
                x,
                y: self.map_to_y(decay, self.decay_axis),
                size: self.handle_size,
            },
        }
    }

    /// Inverse of [`resonator_to_shape`]: `(freq, gain, decay)` derived
    /// from the shape's current position.
    ///
    /// [`resonator_to_shape`]: Self::resonator_to_shape
    pub fn shape_to_params(&self, shape: &ResonatorShape) -> (f64, f64, f64) {
        (
            self.unmap_freq_x(shape.freq_line.x),
            self.unmap_from_y(shape.gain.y, self.gain_axis),
            self.unmap_from_y(shape.decay.y, self.decay_axis),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        let scale = b.abs().max(1e-12);
        assert!(
            ((a - b) / scale).abs() < 1e-6,
            "expected {b}, got {a}"
        );
    }

    #[test]
    fn linear_round_trip() {
        let plot = PlotBounds::default();
        for v in [0.0, 0.01, 0.15, 0.29, 0.3] {
            assert_close(plot.unmap_from_y(plot.map_to_y(v, plot.gain_axis), plot.gain_axis), v);
        }
        for v in [0.995, 0.9951, 0.9987, 1.0] {
            assert_close(
                plot.unmap_from_y(plot.map_to_y(v, plot.decay_axis), plot.decay_axis),
                v,
            );
        }
    }

    #[test]
    fn log_round_trip() {
        let plot = PlotBounds::default();
        for freq in [20.0, 55.0, 440.0, 1000.0, 12_345.6, 20_000.0] {
            assert_close(plot.unmap_freq_x(plot.map_freq_x(freq)), freq);
        }
    }

    #[test]
    fn gain_axis_draws_zero_at_the_bottom() {
        let plot = PlotBounds::default();
        assert_close(plot.map_to_y(plot.gain_axis.min, plot.gain_axis), plot.height);
        assert_close(plot.map_to_y(plot.gain_axis.max, plot.gain_axis), 0.0);
    }

    #[test]
    fn shape_round_trip() {
        let plot = PlotBounds::default();
        let shape = plot.resonator_to_shape(440.0, 0.12, 0.998);
        let (freq, gain, decay) = plot.shape_to_params(&shape);
        assert_close(freq, 440.0);
        assert_close(gain, 0.12);
        assert_close(decay, 0.998);

        // Handles share the frequency marker's x position.
        assert_eq!(shape.gain.x, shape.freq_line.x);
        assert_eq!(shape.decay.x, shape.freq_line.x);
        assert_eq!(shape.gain.size, plot.handle_size);
    }
}
