//! Applies a decoded response envelope to the page.
//!
//! Effects run in phases over the whole batch: markup and state changes in list order, then
//! render hooks for every region that received markup, then embedded scripts in list order,
//! then focus on the last widget any item asked for. Operations that need the runtime (posting
//! a path, resolving a parked confirmation, timers) come back as [`FollowUp`]s.

use std::sync::Arc;

use shared::{
    domain::RenderedRegion,
    error::ProtocolError,
    protocol::{decode_item, Fragment, ResponseEnvelope, ResponseOperation},
};
use tracing::{debug, warn};

use crate::{
    guard::SubmissionGuard,
    page::{PageHost, RenderHook, ScriptContext},
    params::{AliasTable, DocumentContext},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    PostPath(String),
    ResolveConfirmation { fire: bool },
    ClearShortcuts,
    ClearHint { panel_id: String },
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub applied: usize,
    pub skipped: Vec<ProtocolError>,
    pub follow_ups: Vec<FollowUp>,
}

pub struct ApplyContext<'a> {
    pub page: &'a dyn PageHost,
    pub document: &'a DocumentContext,
    pub hooks: &'a [Arc<dyn RenderHook>],
    pub guard: &'a mut SubmissionGuard,
    pub aliases: &'a mut AliasTable,
    pub save_list: &'a mut Vec<String>,
    pub hint_panel_id: Option<&'a str>,
    pub tab_close_id: Option<&'a str>,
    pub now_millis: i64,
}

pub fn apply_envelope(envelope: ResponseEnvelope, cx: ApplyContext<'_>) -> BatchReport {
    let ApplyContext {
        page,
        document,
        hooks,
        guard,
        aliases,
        save_list,
        hint_panel_id,
        tab_close_id,
        now_millis,
    } = cx;
    let script_cx = ScriptContext {
        remote_view: envelope.remote_view,
    };

    let mut report = BatchReport::default();
    let mut rendered: Vec<(String, RenderedRegion)> = Vec::new();
    let mut scripts: Vec<String> = Vec::new();
    let mut focus: Option<String> = None;

    for (index, item) in envelope.json_resp.into_iter().enumerate() {
        let decoded = match decode_item(index, item) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(index, error = %err, "interpreter: skipping response item");
                report.skipped.push(err);
                continue;
            }
        };
        debug!(
            index,
            handler = %decoded.handler,
            operations = decoded.operations.len(),
            "interpreter: applying item"
        );

        for operation in decoded.operations {
            if let Some(script) = operation.script().filter(|s| !s.trim().is_empty()) {
                scripts.push(script.to_string());
            }
            match operation {
                ResponseOperation::ReplacePanel(fragment) => {
                    if replace_markup(page, &fragment) {
                        rendered.push((fragment.target, RenderedRegion::Panel));
                    }
                }
                ResponseOperation::ReplaceSection(fragment) => {
                    if replace_markup(page, &fragment) {
                        rendered.push((fragment.target, RenderedRegion::Section));
                    }
                }
                ResponseOperation::ShowPopup { slot, html, .. } => {
                    page.show_popup(slot, &html);
                    let target = document.popup_target(slot).to_string();
                    rendered.push((target, RenderedRegion::Popup(slot)));
                }
                ResponseOperation::HidePopup { slot } => page.hide_popup(slot),
                ResponseOperation::Redirect { url } => page.navigate(&url),
                ResponseOperation::OpenWindow { url } => page.open_window(&url),
                ResponseOperation::Download { url } => page.download(&url),
                ResponseOperation::HintUser { html } => {
                    if let Some(panel_id) = hint_panel_id {
                        if page.set_inner_html(panel_id, &html) {
                            report.follow_ups.push(FollowUp::ClearHint {
                                panel_id: panel_id.to_string(),
                            });
                        }
                    }
                }
                ResponseOperation::ValidationErrors { items } => {
                    for notice in items {
                        if !page.contains(&notice.control_id) {
                            continue;
                        }
                        if notice.set_focus {
                            page.focus(&notice.control_id);
                        }
                        page.show_validation(&notice);
                    }
                }
                ResponseOperation::RegisterDebounce { ids, clear } => {
                    guard.register_debounce(&ids, clear, now_millis);
                }
                ResponseOperation::SetPageAliases { entries } => aliases.extend(entries),
                ResponseOperation::SetSaveList { ids } => *save_list = ids,
                ResponseOperation::ClearShortcuts => {
                    report.follow_ups.push(FollowUp::ClearShortcuts);
                }
                ResponseOperation::SetBusyIndicator { id } => guard.set_indicator_id(id),
                ResponseOperation::ScrollToTop => page.scroll_to_top(),
                ResponseOperation::Forward { path } => {
                    report.follow_ups.push(FollowUp::PostPath(path));
                }
                ResponseOperation::FirePreConfirm { fire } => {
                    report
                        .follow_ups
                        .push(FollowUp::ResolveConfirmation { fire });
                }
                ResponseOperation::CloseRemoteTab => match tab_close_id {
                    Some(id) => page.click(id),
                    None => debug!("interpreter: no tab close control to fire"),
                },
            }
        }

        if decoded.focus.is_some() {
            focus = decoded.focus;
        }
        report.applied += 1;
    }

    for (target, region) in &rendered {
        for hook in hooks {
            hook.on_rendered(target, *region, &script_cx);
        }
    }
    for script in &scripts {
        page.run_script(script, &script_cx);
    }
    if let Some(id) = focus {
        page.focus(&id);
    }

    report
}

fn replace_markup(page: &dyn PageHost, fragment: &Fragment) -> bool {
    let Some(html) = fragment.html.as_deref().filter(|html| !html.is_empty()) else {
        return false;
    };
    let replaced = page.set_inner_html(&fragment.target, html);
    if !replaced {
        debug!(target_id = %fragment.target, "interpreter: markup target not on page");
    }
    replaced
}

#[cfg(test)]
#[path = "tests/interpreter_tests.rs"]
mod tests;
