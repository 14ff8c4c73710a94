//! Host signals: focus, connectivity and refresh dependencies.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::orchestrator::Inner;
use super::{Data, Params};

pub(super) struct Signals {
    pub(super) focused: bool,
    online: bool,
    last_focus_refresh: Option<Instant>,
    deps: Option<u64>,
}

impl Default for Signals {
    fn default() -> Self {
        Self {
            focused: true,
            online: true,
            last_focus_refresh: None,
            deps: None,
        }
    }
}

impl<P: Params, T: Data> Inner<P, T> {
    pub(super) fn focus_changed(self: &Arc<Self>, focused: bool) {
        let refresh = {
            let mut signals = self.signals.lock();
            let regained = focused && !signals.focused;
            signals.focused = focused;
            if regained && self.options.refresh_on_focus && self.accepts_signals() {
                let now = self.scheduler.now();
                let due = signals.last_focus_refresh.map_or(true, |last| {
                    now.duration_since(last) >= self.options.focus_timespan
                });
                if due {
                    signals.last_focus_refresh = Some(now);
                } else {
                    tracing::trace!(orchestrator = %self.id, "focus refresh throttled");
                }
                due
            } else {
                false
            }
        };
        if refresh {
            self.refresh_in_background("focus");
        }
        self.sync_polling();
    }

    pub(super) fn connectivity_changed(self: &Arc<Self>, online: bool) {
        let reconnected = {
            let mut signals = self.signals.lock();
            let reconnected = online && !signals.online;
            signals.online = online;
            reconnected
        };
        if reconnected && self.options.refresh_on_reconnect && self.accepts_signals() {
            self.refresh_in_background("reconnect");
        }
    }

    pub(super) fn deps_changed<D: Hash + ?Sized>(self: &Arc<Self>, deps: &D) {
        let mut hasher = DefaultHasher::new();
        deps.hash(&mut hasher);
        let hash = hasher.finish();

        let changed = {
            let mut signals = self.signals.lock();
            signals.deps.replace(hash).is_some_and(|previous| previous != hash)
        };
        if !changed || self.options.manual || !self.accepts_signals() {
            return;
        }
        if self.refresh_target().is_ok() {
            self.refresh_in_background("deps_refresh");
        } else {
            self.run_default();
        }
    }

    pub(super) fn watch_signal<S>(
        this: &Arc<Self>,
        events: S,
        apply: fn(&Arc<Self>, bool),
    ) -> JoinHandle<()>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        let weak = Arc::downgrade(this);
        let lifecycle = this.lifecycle.clone();
        let mut events = Box::pin(events);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = lifecycle.cancelled() => break,
                    next = events.next() => {
                        let Some(value) = next else { break };
                        let Some(inner) = weak.upgrade() else { break };
                        apply(&inner, value);
                    }
                }
            }
        })
    }

    fn accepts_signals(&self) -> bool {
        !self.is_disposed() && self.is_ready()
    }

    fn refresh_in_background(self: &Arc<Self>, operation: &'static str) {
        match self.refresh_target() {
            Ok((key, params)) => {
                let future = self.dispatch(key, params, false);
                self.spawn_detached(future, operation);
            }
            Err(_) => tracing::trace!(operation, "nothing to refresh yet"),
        }
    }
}
