//! The single-flight state machine from spec §4.8: `{running, pending}`
//! under one mutex, with trivial critical sections the caller is expected
//! to never hold across an engine call.

#[derive(Debug, Default)]
pub struct SingleFlightGate {
    pub running: bool,
    pub pending: bool,
}

impl SingleFlightGate {
    /// A trigger arrived. Returns `true` if the caller should run a pass
    /// now; `false` if a pass is already running, in which case the
    /// trigger is coalesced into the pending re-run flag.
    pub fn request(&mut self) -> bool {
        if self.running {
            self.pending = true;
            false
        } else {
            self.running = true;
            true
        }
    }

    /// A pass just completed. Returns `true` if another pass should run
    /// immediately (a trigger was coalesced while this one ran); `false`
    /// if the gate is now idle.
    pub fn finish(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            self.running = false;
            false
        }
    }
}
