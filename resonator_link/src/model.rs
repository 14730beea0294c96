use crate::plot::{PlotBounds, ResonatorShape};
use resonator_protocol::WireResonator;
use std::collections::{BTreeMap, BTreeSet};

/// The audio engine runs at a fixed rate; the decay conversion is defined
/// against it.
pub const SAMPLE_RATE: f64 = 44_100.0;

/// Device-domain decay coefficient to the normalized control-domain value.
pub fn device_to_control(device: f64) -> f64 {
    (-device / SAMPLE_RATE).exp()
}

/// Exact inverse of [`device_to_control`] up to float rounding.
pub fn control_to_device(control: f64) -> f64 {
    -control.ln() * SAMPLE_RATE
}

/// One voice of the bank. `decay` is stored in the control domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resonator {
    pub index: usize,
    pub freq: f64,
    pub gain: f64,
    pub decay: f64,
}

/// Authoritative local copy of the resonator bank, its derived plot shapes,
/// and the dirty set of indices edited since the last push. Resonators are
/// created on first mention and never deleted in-session.
pub struct ModelStore {
    plot: PlotBounds,
    bank: BTreeMap<usize, Resonator>,
    shapes: BTreeMap<usize, ResonatorShape>,
    dirty: BTreeSet<usize>,
}

impl ModelStore {
    pub fn new(plot: PlotBounds) -> Self {
        Self {
            plot,
            bank: BTreeMap::new(),
            shapes: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn plot(&self) -> &PlotBounds {
        &self.plot
    }

    /// Replaces the plot bounds (window resize) and recomputes every shape.
    pub fn set_plot(&mut self, plot: PlotBounds) {
        self.plot = plot;
        for (index, res) in &self.bank {
            self.shapes
                .insert(*index, plot.resonator_to_shape(res.freq, res.gain, res.decay));
        }
    }

    pub fn len(&self) -> usize {
        self.bank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bank.is_empty()
    }

    pub fn resonator(&self, index: usize) -> Option<Resonator> {
        self.bank.get(&index).copied()
    }

    pub fn resonators(&self) -> impl Iterator<Item = &Resonator> {
        self.bank.values()
    }

    pub fn shape(&self, index: usize) -> Option<&ResonatorShape> {
        self.shapes.get(&index)
    }

    /// Moves a resonator's shape (the interaction layer dragging a handle).
    /// Unknown indices are refused; the bank value stays as-is until the
    /// next diff derives it back from the shape.
    pub fn set_shape(&mut self, index: usize, shape: ResonatorShape) -> bool {
        if !self.bank.contains_key(&index) {
            return false;
        }
        self.shapes.insert(index, shape);
        true
    }

    /// Upserts one resonator and recomputes its shape. Does not mark it
    /// dirty; dirtying is the interaction layer's call.
    pub fn set_resonator(&mut self, res: Resonator) {
        self.shapes.insert(
            res.index,
            self.plot.resonator_to_shape(res.freq, res.gain, res.decay),
        );
        self.bank.insert(res.index, res);
    }

    /// Applies a full snapshot given as parallel arrays. Decay arrives in
    /// the device domain and is converted before storage. Positions beyond
    /// the shortest array are ignored.
    pub fn apply_snapshot(&mut self, index: &[usize], freq: &[f64], gain: &[f64], decay: &[f64]) {
        let len = index.len().min(freq.len()).min(gain.len()).min(decay.len());
        for i in 0..len {
            self.set_resonator(Resonator {
                index: index[i],
                freq: freq[i],
                gain: gain[i],
                decay: device_to_control(decay[i]),
            });
        }
    }

    /// Applies a sparse diff from the peer: present slots upsert, `None`
    /// slots are skipped. Values arrive in the control domain.
    pub fn apply_diff(&mut self, entries: &[Option<WireResonator>]) {
        for entry in entries.iter().flatten() {
            self.set_resonator(Resonator {
                index: entry.index,
                freq: entry.freq,
                gain: entry.gain,
                decay: entry.decay,
            });
        }
    }

    /// Flags an index for the next push. Refused for indices with no
    /// resonator, keeping the dirty set inside the bank.
    pub fn mark_dirty(&mut self, index: usize) -> bool {
        if !self.bank.contains_key(&index) {
            return false;
        }
        self.dirty.insert(index);
        true
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.contains(&index)
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Drains the dirty set in index order, deriving each entry's current
    /// value from its shape (edits move shapes first). Flags are cleared;
    /// a caller whose push is dropped re-marks via [`restore_dirty`].
    ///
    /// [`restore_dirty`]: Self::restore_dirty
    pub fn drain_diff(&mut self) -> Vec<Resonator> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut diff = Vec::with_capacity(dirty.len());
        for index in dirty {
            let Some(shape) = self.shapes.get(&index) else { continue };
            let (freq, gain, decay) = self.plot.shape_to_params(shape);
            diff.push(Resonator {
                index,
                freq,
                gain,
                decay,
            });
        }
        diff
    }

    pub fn restore_dirty(&mut self, indices: impl IntoIterator<Item = usize>) {
        for index in indices {
            self.mark_dirty(index);
        }
    }
}
