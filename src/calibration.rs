use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::Quaternion;

/// Runtime recentering of incoming orientations.
///
/// Holds the conjugate of the orientation captured at the last trigger and
/// composes it in front of every raw orientation. Clones share the same
/// reference, so the session and the source thread see one value.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    reference: Arc<Mutex<Option<Quaternion>>>,
}

impl Calibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// On a trigger edge, snapshot `raw.conjugate()` as the new reference.
    ///
    /// Returns whether the reference was replaced. A `false` trigger never
    /// touches the stored reference.
    pub fn maybe_recalibrate(&self, trigger: bool, raw: Quaternion) -> bool {
        if !trigger {
            return false;
        }
        let conj = raw.conjugate();
        *self.lock() = Some(conj);
        log::info!(
            "Recentered: reference = [{:+.4}, {:+.4}, {:+.4}, {:+.4}]",
            conj.w,
            conj.x,
            conj.y,
            conj.z
        );
        true
    }

    /// `reference ⊗ raw`, or `raw` unchanged before the first trigger.
    pub fn apply(&self, raw: Quaternion) -> Quaternion {
        match *self.lock() {
            Some(reference) => reference.hamilton(&raw),
            None => raw,
        }
    }

    /// The current reference, if any trigger has fired.
    pub fn reference(&self) -> Option<Quaternion> {
        *self.lock()
    }

    // A poisoned lock still holds a whole quaternion; keep using it.
    fn lock(&self) -> MutexGuard<'_, Option<Quaternion>> {
        self.reference.lock().unwrap_or_else(|e| e.into_inner())
    }
}
