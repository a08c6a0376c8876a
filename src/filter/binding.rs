//! Per-source input slots and frame-cycle gating.

use crate::graph::SourceId;
use crate::texture::{CameraFacing, TextureFrame};
use std::time::Duration;

/// One declared input of a filter: the upstream id and the frame it
/// delivered in the current cycle.
pub(crate) struct SourceBinding {
    pub(crate) source: SourceId,
    pub(crate) slot: Option<TextureFrame>,
}

/// Result of storing a delivery into the binding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The sender is not a declared input
    Foreign,
    /// Some other input has not delivered yet this cycle
    Incomplete,
    /// Every input holds a frame
    Complete,
}

/// Store `frame` into every binding of `source` and report whether the
/// cycle's input set is complete.
pub(crate) fn store(bindings: &mut [SourceBinding], frame: &TextureFrame, source: SourceId) -> Delivery {
    let mut found = false;
    let mut empty = false;
    for binding in bindings.iter_mut() {
        if binding.source == source {
            binding.slot = Some(frame.clone());
            found = true;
        } else if binding.slot.is_none() {
            if found {
                return Delivery::Incomplete;
            }
            empty = true;
        }
    }

    match (found, empty) {
        (false, _) => Delivery::Foreign,
        (true, true) => Delivery::Incomplete,
        (true, false) => Delivery::Complete,
    }
}

pub(crate) fn clear(bindings: &mut [SourceBinding]) {
    for binding in bindings.iter_mut() {
        binding.slot = None;
    }
}

/// Provenance shared by every output of one frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Provenance {
    pub sample_time: Option<Duration>,
    pub facing: Option<CameraFacing>,
    pub is_photo: bool,
}

/// Resolve cycle provenance from filled bindings.
///
/// The binding at `authoritative` wins the sample time when it has one;
/// otherwise the first binding with a sample time does. The first known
/// facing wins, and the cycle is a photo if any input is.
pub(crate) fn resolve_provenance(bindings: &[SourceBinding], authoritative: Option<usize>) -> Provenance {
    let mut provenance = Provenance {
        sample_time: authoritative
            .and_then(|i| bindings.get(i))
            .and_then(|b| b.slot.as_ref())
            .and_then(|f| f.sample_time),
        ..Default::default()
    };

    for frame in bindings.iter().filter_map(|b| b.slot.as_ref()) {
        if provenance.sample_time.is_none() {
            provenance.sample_time = frame.sample_time;
        }
        if provenance.facing.is_none() {
            provenance.facing = frame.facing;
        }
        provenance.is_photo |= frame.is_photo;
    }
    provenance
}
