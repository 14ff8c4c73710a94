//! Polling integration: builds the controller and applies the rule
//! "poll only while ready, with params, after a first run".

use std::sync::Arc;

use super::options::PollingOptions;
use super::orchestrator::Inner;
use super::{Data, Params};
use crate::error::RequestError;
use crate::scheduler::{
    rejected, FetchFuture, PollAction, PollingController, PollingHooks, PollingState, TimerHandle,
};

/// Why a controller is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PauseReason {
    /// `pause_polling`; only `resume_polling` lifts it.
    User,
    /// A failed tick with `pause_on_error`.
    Error,
    /// Not ready, or hidden without `when_hidden`.
    Rule,
}

pub(super) struct PollingSlot<T> {
    options: Option<PollingOptions>,
    controller: Option<PollingController<T>>,
    paused_by: Option<PauseReason>,
    retry_timer: Option<TimerHandle>,
}

impl<T> Default for PollingSlot<T> {
    fn default() -> Self {
        Self {
            options: None,
            controller: None,
            paused_by: None,
            retry_timer: None,
        }
    }
}

impl<P: Params, T: Data> Inner<P, T> {
    /// Replace the controller, disposing the previous one.
    pub(super) fn install_polling(self: &Arc<Self>, options: Option<PollingOptions>) {
        let controller = options.as_ref().map(|o| self.build_controller(o));
        let previous = {
            let mut slot = self.polling.lock();
            slot.retry_timer = None;
            slot.paused_by = None;
            slot.options = options;
            std::mem::replace(&mut slot.controller, controller)
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    fn build_controller(self: &Arc<Self>, options: &PollingOptions) -> PollingController<T> {
        let weak = Arc::downgrade(self);
        let action: PollAction<T> = Arc::new(move || match weak.upgrade() {
            Some(inner) => inner.poll_once(),
            None => rejected(RequestError::Cancelled),
        });

        let weak = Arc::downgrade(self);
        let when_hidden = options.when_hidden;
        let should_poll: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(move || {
            weak.upgrade()
                .is_some_and(|inner| inner.polling_allowed(when_hidden))
        });

        let weak = Arc::downgrade(self);
        let on_error: Arc<dyn Fn(&RequestError) + Send + Sync> = Arc::new(move |err: &RequestError| {
            if let Some(inner) = weak.upgrade() {
                inner.on_poll_error(err);
            }
        });

        PollingController::new(
            options.interval,
            Arc::clone(&self.scheduler),
            action,
            PollingHooks {
                should_poll: Some(should_poll),
                on_success: None,
                on_error: Some(on_error),
            },
        )
    }

    /// One polling tick: refetch the active key, bypassing rate limiters.
    fn poll_once(self: &Arc<Self>) -> FetchFuture<T> {
        let active = self.book.lock().active_params();
        match active {
            Some((key, params)) => self.fetch(key, params, false),
            None => rejected(RequestError::NoPreviousParams),
        }
    }

    pub(super) fn polling_allowed(&self, when_hidden: bool) -> bool {
        if self.is_disposed() || !self.is_ready() {
            return false;
        }
        {
            let book = self.book.lock();
            if book.active_params().is_none() || (self.options.manual && !book.has_completed) {
                return false;
            }
        }
        when_hidden || self.signals.lock().focused
    }

    fn on_poll_error(self: &Arc<Self>, err: &RequestError) {
        if self.is_cancellation(err) {
            return;
        }
        let mut slot = self.polling.lock();
        let Some(options) = slot.options.clone() else {
            return;
        };
        let Some(controller) = slot.controller.clone() else {
            return;
        };
        if !options.pause_on_error {
            return;
        }
        controller.pause();
        slot.paused_by = Some(PauseReason::Error);
        tracing::debug!(orchestrator = %self.id, error = %err, "polling paused after error");

        if let Some(delay) = options.retry_interval {
            let weak = Arc::downgrade(self);
            slot.retry_timer = Some(self.scheduler.schedule(
                delay,
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.retry_polling();
                    }
                }),
            ));
        }
    }

    fn retry_polling(&self) {
        let mut slot = self.polling.lock();
        slot.retry_timer = None;
        let (Some(controller), Some(options)) = (slot.controller.clone(), slot.options.as_ref())
        else {
            return;
        };
        if slot.paused_by == Some(PauseReason::User) || !self.polling_allowed(options.when_hidden) {
            return;
        }
        match controller.state() {
            PollingState::Paused => controller.resume(),
            PollingState::Stopped => controller.start(),
            PollingState::Running => {}
        }
        slot.paused_by = None;
        tracing::debug!(orchestrator = %self.id, "polling resumed after error delay");
    }

    /// Bring the controller in line with the polling rule.
    pub(super) fn sync_polling(&self) {
        let mut slot = self.polling.lock();
        let (Some(controller), Some(options)) = (slot.controller.clone(), slot.options.as_ref())
        else {
            return;
        };
        let allowed = self.polling_allowed(options.when_hidden);
        match (allowed, controller.state()) {
            (true, PollingState::Stopped) if slot.paused_by != Some(PauseReason::User) => {
                controller.start();
                slot.paused_by = None;
            }
            (true, PollingState::Paused) if slot.paused_by != Some(PauseReason::User) => {
                controller.resume();
                slot.paused_by = None;
                slot.retry_timer = None;
            }
            (false, PollingState::Running) => {
                controller.pause();
                slot.paused_by = Some(PauseReason::Rule);
            }
            _ => {}
        }
    }

    pub(super) fn pause_polling(&self) {
        let mut slot = self.polling.lock();
        slot.retry_timer = None;
        slot.paused_by = Some(PauseReason::User);
        if let Some(controller) = &slot.controller {
            controller.pause();
        }
    }

    pub(super) fn resume_polling(&self) {
        {
            let mut slot = self.polling.lock();
            if slot.paused_by == Some(PauseReason::User) {
                slot.paused_by = None;
            }
        }
        self.sync_polling();
    }

    pub(super) fn dispose_polling(&self) {
        let mut slot = self.polling.lock();
        slot.retry_timer = None;
        if let Some(controller) = slot.controller.take() {
            controller.dispose();
        }
    }

    pub(super) fn polling_state(&self) -> Option<PollingState> {
        self.polling.lock().controller.as_ref().map(PollingController::state)
    }
}
