use serde::Deserialize;
use std::future::Future;
use std::rc::Rc;
use url::Url;

use crate::config::DockConfig;
use crate::error::{DockError, Result};
use crate::icon::{backfill_icons, bounded, html_title, IconFetcher, IconResolver, TabInventory};
use crate::model::{
    self, collapse_whitespace, item_at, normalize_url, AddOutcome, AppItem, AppList, ItemEdit,
    Location,
};
use crate::relay::{HostRelay, InboundMessage, OutboundMessage};
use crate::reorder::{DragSession, DropOutcome, RowGeometry};
use crate::shortcut::KeyEvent;
use crate::store::{
    AppStore, ChangeDebouncer, DockContext, KeyValueStore, LoadingGuard, APPS_KEY, SHORTCUT_KEY,
};
use crate::visibility::{DeadZone, VisibilityEffect, VisibilityMachine, VisibilityTimings};

/// Pointer, keyboard and UI-state signals from the rendering layer.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DockInput {
    PointerEnterTrigger,
    PointerLeaveTrigger,
    PointerEnterDock,
    PointerLeaveDock { x: f64 },
    Key(KeyEvent),
    DeadZone { zone: Option<(f64, f64)> },
    ModalOpen { open: bool },
    MenuOpen { open: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum DockEvent {
    Visibility(VisibilityEffect),
    /// The persisted list changed or the dock was shown; re-render.
    ListChanged,
    /// The key event was the dock shortcut and should not reach the page.
    ShortcutConsumed,
    /// An add was a duplicate; draw attention to the existing entry.
    Highlight(Location),
    PreviewMoved { position: usize },
}

/// The single object a host entry point constructs; owns every piece of
/// dock state.
pub struct DockController<S, T, F, R> {
    config: DockConfig,
    context: Rc<DockContext>,
    store: Rc<AppStore<S>>,
    resolver: Rc<IconResolver<T, F>>,
    relay: R,
    visibility: VisibilityMachine,
    debouncer: ChangeDebouncer,
    drag: Option<DragSession>,
    /// Bumped each time a drag begins; reload results from an older epoch
    /// are stale.
    drag_epoch: u64,
}

impl<S, T, F, R> DockController<S, T, F, R>
where
    S: KeyValueStore + 'static,
    T: TabInventory + 'static,
    F: IconFetcher + 'static,
    R: HostRelay,
{
    pub fn new(config: DockConfig, kv: S, tabs: T, fetcher: F, relay: R) -> Self {
        let resolver = IconResolver::new(tabs, fetcher, &config);
        Self::with_resolver(config, kv, resolver, relay)
    }

    pub fn with_resolver(config: DockConfig, kv: S, resolver: IconResolver<T, F>, relay: R) -> Self {
        let context = DockContext::new();
        let store = AppStore::new(kv);
        let shortcut = store.load_shortcut();
        let visibility = VisibilityMachine::new(
            VisibilityTimings::from(&config),
            shortcut,
            Rc::clone(&context),
        );
        let debouncer = ChangeDebouncer::new(config.change_debounce_ms);
        Self {
            config,
            context,
            store: Rc::new(store),
            resolver: Rc::new(resolver),
            relay,
            visibility,
            debouncer,
            drag: None,
            drag_epoch: 0,
        }
    }

    pub fn config(&self) -> &DockConfig {
        &self.config
    }

    pub fn context(&self) -> &Rc<DockContext> {
        &self.context
    }

    pub fn store(&self) -> &AppStore<S> {
        &self.store
    }

    pub fn visibility(&self) -> &VisibilityMachine {
        &self.visibility
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn drag_epoch(&self) -> u64 {
        self.drag_epoch
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match (self.visibility.next_deadline(), self.debouncer.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn handle_input(&mut self, now_ms: u64, input: DockInput) -> Vec<DockEvent> {
        let effects = match input {
            DockInput::PointerEnterTrigger => self.visibility.pointer_enter_trigger(now_ms),
            DockInput::PointerLeaveTrigger => self.visibility.pointer_leave_trigger(now_ms),
            DockInput::PointerEnterDock => self.visibility.pointer_enter_dock(now_ms),
            DockInput::PointerLeaveDock { x } => self.visibility.pointer_leave_dock(now_ms, x),
            DockInput::Key(event) => match self.visibility.key(now_ms, &event) {
                Some(effects) => {
                    let mut events = vec![DockEvent::ShortcutConsumed];
                    events.extend(self.effects_to_events(effects));
                    return events;
                }
                None => Vec::new(),
            },
            DockInput::DeadZone { zone } => {
                self.visibility.set_dead_zone(zone.map(|(dock_edge, screen_edge)| DeadZone {
                    dock_edge,
                    screen_edge,
                }));
                Vec::new()
            }
            DockInput::ModalOpen { open } => {
                self.context.set_modal_open(open);
                Vec::new()
            }
            DockInput::MenuOpen { open } => {
                self.context.set_menu_open(open);
                Vec::new()
            }
        };
        self.effects_to_events(effects)
    }

    pub fn handle_message(&mut self, now_ms: u64, message: InboundMessage) -> Vec<DockEvent> {
        match message {
            InboundMessage::Toggle => {
                let effects = self.visibility.toggle(now_ms);
                self.effects_to_events(effects)
            }
            InboundMessage::UpdateShortcut(shortcut) => {
                log::info!("dock shortcut updated to {:?}", shortcut);
                self.visibility.set_shortcut(shortcut);
                Vec::new()
            }
            InboundMessage::TabsChanged => {
                self.resolver.clear_cache();
                self.notify_list_change(now_ms);
                Vec::new()
            }
        }
    }

    /// Pulls store change notifications; a changed list arms the debounce
    /// window, a changed shortcut applies immediately.
    pub fn poll_store(&mut self, now_ms: u64) -> Vec<DockEvent> {
        for key in self.store.poll_changes() {
            match key.as_str() {
                APPS_KEY => self.notify_list_change(now_ms),
                SHORTCUT_KEY => {
                    let shortcut = self.store.load_shortcut();
                    self.visibility.set_shortcut(shortcut);
                }
                _ => {}
            }
        }
        Vec::new()
    }

    fn notify_list_change(&mut self, now_ms: u64) {
        if self.context.is_dragging() {
            log::debug!("list change during drag ignored");
            return;
        }
        self.debouncer.notify(now_ms);
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<DockEvent> {
        let effects = self.visibility.tick(now_ms);
        let mut events = self.effects_to_events(effects);
        if self.debouncer.poll(now_ms, &self.context) {
            events.push(DockEvent::ListChanged);
        }
        events
    }

    fn effects_to_events(&self, effects: Vec<VisibilityEffect>) -> Vec<DockEvent> {
        let mut events = Vec::with_capacity(effects.len() + 1);
        for effect in effects {
            events.push(DockEvent::Visibility(effect));
            if effect == VisibilityEffect::ShowDock {
                events.push(DockEvent::ListChanged);
            }
        }
        events
    }

    /// Claims the render slot, or `None` while another pass is in flight.
    pub fn begin_reload(&self) -> Option<ReloadPass<S, T, F>> {
        let guard = self.context.try_begin_load()?;
        Some(ReloadPass {
            _guard: guard,
            epoch: self.drag_epoch,
            store: Rc::clone(&self.store),
            resolver: Rc::clone(&self.resolver),
        })
    }

    pub async fn reload(&self) -> Option<AppList> {
        match self.begin_reload() {
            Some(pass) => Some(pass.run().await),
            None => {
                log::debug!("reload dropped; another pass is in flight");
                None
            }
        }
    }

    /// Builds the add flow as a detached task so the host can keep handling
    /// events while the page and icon are fetched.
    pub fn add_app(&self, title: &str, url: &str) -> impl Future<Output = Result<AddOutcome>> + 'static {
        let store = Rc::clone(&self.store);
        let resolver = Rc::clone(&self.resolver);
        let timeout = self.config.fetch_timeout();
        let title = collapse_whitespace(title);
        let url = url.to_string();
        async move {
            let normalized = normalize_url(&url)?;
            let url = normalized.to_string();
            if let Some(existing) = model::find_url(&store.get_all(), &url) {
                return Ok(AddOutcome::Existing(existing));
            }

            let title = if title.is_empty() {
                page_title(resolver.fetcher(), &normalized, timeout).await
            } else {
                title
            };
            let favicon = resolver.resolve(&url, &title).await;

            let mut list = store.get_all();
            let outcome = model::add_item(&mut list, AppItem::new(title, url, favicon));
            if let AddOutcome::Inserted(_) = outcome {
                if !store.save_all(&list) {
                    return Err(DockError::Unavailable("app list could not be saved".to_string()));
                }
            }
            Ok(outcome)
        }
    }

    /// Read, mutate, save. Rendering follows from the change notification.
    fn mutate<O>(&self, operation: &str, apply: impl FnOnce(&mut AppList) -> Result<O>) -> Option<O> {
        let mut list = self.store.get_all();
        match apply(&mut list) {
            Ok(output) => {
                if self.store.save_all(&list) {
                    Some(output)
                } else {
                    None
                }
            }
            Err(err) => {
                log::warn!("{} ignored: {}", operation, err);
                None
            }
        }
    }

    pub fn edit_app(&self, location: Location, mut edit: ItemEdit) -> bool {
        self.mutate("edit", |list| {
            let current = item_at(list, location)
                .ok_or_else(|| DockError::InvalidTarget(format!("no item at {:?}", location)))?;
            if let Some(url) = edit.url.as_deref() {
                let changed = normalize_url(url)?.as_str() != current.url;
                if changed && edit.favicon.is_none() {
                    edit.favicon = Some(String::new());
                }
            }
            model::edit_item(list, location, edit)
        })
        .is_some()
    }

    pub fn delete_app(&self, location: Location) -> bool {
        self.mutate("delete", |list| model::delete_item(list, location)).is_some()
    }

    pub fn ungroup(&self, index: usize) -> bool {
        self.mutate("ungroup", |list| model::ungroup(list, index)).is_some()
    }

    pub fn remove_from_group(&self, group: usize, child: usize) -> Option<usize> {
        self.mutate("remove from group", |list| model::remove_from_group(list, group, child))
    }

    pub fn toggle_collapsed(&self, index: usize) -> Option<bool> {
        self.mutate("toggle collapse", |list| model::toggle_collapsed(list, index))
    }

    /// Opens (or switches to) a plain entry; a group toggles its collapse
    /// state instead.
    pub fn activate(&self, location: Location) -> bool {
        let list = self.store.get_all();
        match item_at(&list, location) {
            Some(item) if item.is_group => match location {
                Location::Top { index } => self.toggle_collapsed(index).is_some(),
                Location::Child { .. } => false,
            },
            Some(item) => {
                self.relay.send(OutboundMessage::SwitchOrOpenUrl {
                    url: item.url.clone(),
                });
                true
            }
            None => {
                log::warn!("activate ignored: no item at {:?}", location);
                false
            }
        }
    }

    /// Starts a drag of the top-level entry at `index`, anchored to a fresh
    /// read of the store.
    pub fn begin_drag(&mut self, index: usize) -> bool {
        match DragSession::begin(self.store.get_all(), index) {
            Ok(session) => {
                self.drag = Some(session);
                self.drag_epoch += 1;
                self.context.set_dragging(true);
                true
            }
            Err(err) => {
                log::warn!("drag ignored: {}", err);
                false
            }
        }
    }

    pub fn drag_move(&mut self, rows: &[RowGeometry], pointer_y: f64) -> Vec<DockEvent> {
        self.drag
            .as_mut()
            .and_then(|session| session.preview(rows, pointer_y))
            .map(|position| vec![DockEvent::PreviewMoved { position }])
            .unwrap_or_default()
    }

    /// Completes the drag. Consistency failures are logged and nothing is
    /// written. `None` also covers a result that could not be saved.
    pub fn drop_on(&mut self, target_url: Option<&str>, displayed: Option<&[String]>) -> Option<DropOutcome> {
        let session = self.drag.take()?;
        let result = session.finish(target_url, displayed);
        let outcome = match result {
            Ok(outcome) => {
                let saved = outcome.list().map_or(true, |list| self.store.save_all(list));
                saved.then_some(outcome)
            }
            Err(err) => {
                log::error!("drop aborted, persisted list left untouched: {}", err);
                None
            }
        };
        self.context.set_dragging(false);
        outcome
    }

    pub fn cancel_drag(&mut self) {
        self.drag = None;
        self.context.set_dragging(false);
    }
}

async fn page_title<F: IconFetcher>(fetcher: &F, url: &Url, timeout: std::time::Duration) -> String {
    let fallback = || url.host_str().unwrap_or(url.as_str()).to_string();
    match bounded(timeout, "title fetch", fetcher.fetch_page(url)).await {
        Ok(Some(page)) => html_title(&page.html).unwrap_or_else(fallback),
        Ok(None) => fallback(),
        Err(err) => {
            log::debug!("title fetch failed for {}: {}", url, err);
            fallback()
        }
    }
}

/// One guarded render pass: read the list, fill missing icons.
pub struct ReloadPass<S, T, F> {
    _guard: LoadingGuard,
    epoch: u64,
    store: Rc<AppStore<S>>,
    resolver: Rc<IconResolver<T, F>>,
}

impl<S, T, F> ReloadPass<S, T, F>
where
    S: KeyValueStore,
    T: TabInventory,
    F: IconFetcher,
{
    /// Drag epoch at the time the pass started.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub async fn run(self) -> AppList {
        let list = self.store.get_all();
        backfill_icons(&self.store, &self.resolver, list).await
    }
}
