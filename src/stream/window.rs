//! Send-window credit accounting for one stream direction.

use crate::{config::MAX_WINDOW, error::StreamError};

/// Signed credit counter plus the write side's closed/error state.
///
/// Guarded by the stream's write monitor; all mutation happens with the
/// monitor's lock held and waiters are signalled after release.
pub(crate) struct SendWindow {
    credit: i32,
    closed: bool,
    err: Option<StreamError>,
}

impl SendWindow {
    pub(crate) fn new(credit: i32) -> Self {
        Self {
            credit,
            closed: false,
            err: None,
        }
    }

    pub(crate) fn credit(&self) -> i32 { self.credit }

    pub(crate) fn is_closed(&self) -> bool { self.closed }

    /// Terminal error for callers hitting the closed write side.
    pub(crate) fn error(&self) -> StreamError {
        self.err.clone().unwrap_or(StreamError::Closed)
    }

    /// Record closure with `err`; returns false when already closed.
    pub(crate) fn close(&mut self, err: StreamError) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.err = Some(err);
        true
    }

    /// Reserve up to `want` bytes of credit, or `None` when exhausted.
    ///
    /// The debit happens before the corresponding DATA frame is framed, so
    /// a second writer observing the window cannot commit the same credit.
    pub(crate) fn debit(&mut self, want: usize) -> Option<usize> {
        let available = usize::try_from(self.credit).unwrap_or_default();
        let take = available.min(want);
        if take == 0 {
            return None;
        }
        let delta = u32::try_from(take).unwrap_or_default();
        self.credit = self.credit.saturating_sub_unsigned(delta);
        Some(take)
    }

    /// Apply a WINDOW_UPDATE delta.
    ///
    /// Returns false for deltas outside `[1, 2^31 - 1]` or deltas that
    /// would overflow the counter; the session resets the stream with a
    /// flow-control error in that case and the credit is left untouched.
    pub(crate) fn apply_update(&mut self, delta: u32) -> bool {
        if delta == 0 || delta > MAX_WINDOW {
            return false;
        }
        match self.credit.checked_add_unsigned(delta) {
            Some(next) => {
                self.credit = next;
                true
            }
            None => false,
        }
    }
}
