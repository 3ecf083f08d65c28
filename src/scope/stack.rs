//! Scope Stack
//!
//! The ordered list of open scope frames; the top frame is the innermost
//! active scope and is what the interceptor consults. A frame carries what
//! its exit needs: the state to restore, the state it expects to find, and
//! the shared-cache entries it set aside.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::warn;

use super::context::{ScopeContext, SessionId};
use super::error::RestoreAnomaly;
use super::patch::Snapshot;
use crate::host::Host;
use crate::modules::{Identifier, UnitHandle};

/// Identifier for one pushed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FrameId(pub u64);

/// One open scope.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) id: FrameId,
    pub(crate) ctx: Rc<ScopeContext>,
    /// State immediately before entry.
    pub(crate) restore: Snapshot,
    /// State the frame expects at exit. In-scope writes update it.
    pub(crate) applied: Snapshot,
    /// Shared-cache entries displaced by isolated loads; `None` means absent.
    pub(crate) set_aside: HashMap<Identifier, Option<UnitHandle>>,
}

impl Frame {
    pub(crate) fn new(id: FrameId, ctx: Rc<ScopeContext>, restore: Snapshot, applied: Snapshot) -> Self {
        Self {
            id,
            ctx,
            restore,
            applied,
            set_aside: HashMap::new(),
        }
    }

    /// Remember the pre-isolation cache entry for `ident`. Only the first
    /// displacement is kept.
    pub(crate) fn set_aside(&mut self, ident: &Identifier, previous: Option<UnitHandle>) {
        self.set_aside.entry(ident.clone()).or_insert(previous);
    }
}

/// Stack of open frames, innermost last.
#[derive(Debug, Default)]
pub(crate) struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Remove the frame `id` and every frame above it, innermost first.
    ///
    /// Returns `None` if `id` is not on the stack.
    pub(crate) fn pop_through(&mut self, id: FrameId) -> Option<Vec<Frame>> {
        let index = self.frames.iter().position(|frame| frame.id == id)?;
        let mut popped = self.frames.split_off(index);
        popped.reverse();
        Some(popped)
    }
}

/// Exits a pushed frame when dropped, logging anomalies.
pub(crate) struct FrameGuard<'h> {
    host: &'h Host,
    id: FrameId,
    session: SessionId,
    exited: bool,
}

impl<'h> FrameGuard<'h> {
    pub(crate) fn new(host: &'h Host, id: FrameId, session: SessionId) -> Self {
        Self {
            host,
            id,
            session,
            exited: false,
        }
    }

    /// Exit now and return the anomalies instead of logging them.
    pub(crate) fn exit(mut self) -> Vec<RestoreAnomaly> {
        self.exited = true;
        self.host.exit_frame(self.id, self.session)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.exited {
            self.exited = true;
            log_anomalies(&self.host.exit_frame(self.id, self.session));
        }
    }
}

pub(crate) fn log_anomalies(anomalies: &[RestoreAnomaly]) {
    for anomaly in anomalies {
        warn!(target: "subsession::scope", %anomaly, "scope restoration anomaly");
    }
}
