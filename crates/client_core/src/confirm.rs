use shared::action::{ActionEvent, ActionParams};
use tracing::warn;

use crate::page::PageHost;

/// Suffix of the companion control whose value travels as `req_cprm`.
pub const CONFIRM_PARAM_SUFFIX: &str = "_a";

#[derive(Debug, Clone)]
pub struct PendingConfirmation<H> {
    pub handler: H,
    pub event: ActionEvent,
}

#[derive(Debug)]
pub enum Interception<H> {
    /// No confirmation needed; run `handler` with the event now.
    PassThrough(H, ActionEvent),
    /// The action was parked; post these params to render the confirmation instead.
    Redirect(ActionParams),
}

/// Holds at most one action waiting for the user to confirm it.
#[derive(Debug)]
pub struct ConfirmationInterceptor<H> {
    pending: Option<PendingConfirmation<H>>,
}

impl<H> Default for ConfirmationInterceptor<H> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<H> ConfirmationInterceptor<H> {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn intercept(
        &mut self,
        handler: H,
        event: ActionEvent,
        page: &dyn PageHost,
    ) -> Interception<H> {
        let Some(confirmation) = event.params.confirm.clone() else {
            return Interception::PassThrough(handler, event);
        };

        let mut params = ActionParams::new(confirmation.url);
        params.confirm_message = Some(confirmation.message);
        params.confirm_icon = confirmation.icon_index;
        params.viewer = event.params.viewer.clone();
        params.busy = true;
        params.confirm_param = event
            .target
            .as_deref()
            .and_then(|target| page.control(&format!("{target}{CONFIRM_PARAM_SUFFIX}")))
            .and_then(|control| control.value.scalar().map(str::to_string));

        if self.pending.is_some() {
            warn!(
                target_id = event.target.as_deref().unwrap_or_default(),
                "confirm: replacing an unresolved pending confirmation"
            );
        }
        self.pending = Some(PendingConfirmation { handler, event });
        Interception::Redirect(params)
    }

    /// Clears the slot. Returns the parked action only when the server said to fire it.
    pub fn resolve(&mut self, fire: bool) -> Option<PendingConfirmation<H>> {
        let pending = self.pending.take();
        if fire {
            pending
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
