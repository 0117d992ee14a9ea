//! Event loop that drives a [`DockController`] from a host shell.
//!
//! The host feeds [`HostEvent`]s through an unbounded channel and receives
//! rendering work through a [`Renderer`]. Everything runs on one thread inside
//! a [`LocalSet`]; reload passes and add flows are spawned locally so timers
//! and pointer input keep being served while icons resolve.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{spawn_local, LocalSet};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::config::{config_path, db_path, DockConfig};
use crate::controller::{DockController, DockEvent, DockInput};
use crate::error::Result;
use crate::icon::{IconFetcher, TabInventory};
use crate::model::{AddOutcome, AppList, ItemEdit, Location};
use crate::relay::{HostRelay, InboundMessage};
use crate::reorder::RowGeometry;
use crate::store::{KeyValueStore, SqliteStore};

#[derive(Clone, Debug)]
pub enum HostEvent {
    Input(DockInput),
    /// Raw relay broadcast, `{ "action": ..., "payload": ... }`.
    Message(Value),
    Add { title: String, url: String },
    Edit { location: Location, edit: ItemEdit },
    Delete(Location),
    Ungroup(usize),
    RemoveFromGroup { group: usize, child: usize },
    ToggleCollapsed(usize),
    Activate(Location),
    BeginDrag(usize),
    DragMove { rows: Vec<RowGeometry>, pointer_y: f64 },
    Drop { target_url: Option<String>, displayed: Option<Vec<String>> },
    CancelDrag,
    Reload,
    Shutdown,
}

pub trait Renderer {
    /// Replaces the rendered list.
    fn render(&mut self, list: &AppList);
    fn apply(&mut self, event: &DockEvent);
}

enum TaskOutput {
    Reloaded { epoch: u64, list: AppList },
    Added(Result<AddOutcome>),
}

pub fn load_default_config() -> Result<DockConfig> {
    Ok(DockConfig::load(&config_path()?))
}

pub fn open_default_store() -> Result<SqliteStore> {
    let path = db_path()?;
    log::info!("opening dock store at {}", path.display());
    SqliteStore::open(&path)
}

/// Runs until `Shutdown` arrives or every sender is dropped, then hands the
/// renderer back.
pub async fn run_host<S, T, F, R, V>(
    controller: DockController<S, T, F, R>,
    events: mpsc::UnboundedReceiver<HostEvent>,
    renderer: V,
) -> V
where
    S: KeyValueStore + 'static,
    T: TabInventory + 'static,
    F: IconFetcher + 'static,
    R: HostRelay + 'static,
    V: Renderer,
{
    LocalSet::new()
        .run_until(host_loop(controller, events, renderer))
        .await
}

async fn host_loop<S, T, F, R, V>(
    mut controller: DockController<S, T, F, R>,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
    mut renderer: V,
) -> V
where
    S: KeyValueStore + 'static,
    T: TabInventory + 'static,
    F: IconFetcher + 'static,
    R: HostRelay + 'static,
    V: Renderer,
{
    let start = Instant::now();
    let clock = move || u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (outputs_tx, mut outputs_rx) = mpsc::unbounded_channel();
    let mut store_poll = interval(Duration::from_millis(controller.config().store_poll_ms.max(1)));
    store_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    spawn_reload(&controller, &outputs_tx);
    // A reload result was withheld during a drag and nothing re-rendered yet.
    let mut render_owed = false;

    loop {
        let deadline = controller
            .next_deadline()
            .map(|deadline_ms| start + Duration::from_millis(deadline_ms));
        let timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let mut dock_events = tokio::select! {
            event = events.recv() => match event {
                None | Some(HostEvent::Shutdown) => break,
                Some(event) => handle_event(&mut controller, clock(), event, &outputs_tx),
            },
            Some(output) = outputs_rx.recv() => match output {
                TaskOutput::Reloaded { epoch, list } => {
                    if controller.is_dragging() {
                        log::debug!("reload result withheld; drag in progress");
                        render_owed = true;
                    } else if epoch != controller.drag_epoch() {
                        log::debug!("reload result predates the last drag; reading again");
                        spawn_reload(&controller, &outputs_tx);
                    } else {
                        render_owed = false;
                        renderer.render(&list);
                    }
                    Vec::new()
                }
                TaskOutput::Added(Ok(AddOutcome::Existing(location))) => {
                    vec![DockEvent::Highlight(location)]
                }
                TaskOutput::Added(Ok(AddOutcome::Inserted(index))) => {
                    log::info!("pinned new entry at {}", index);
                    Vec::new()
                }
                TaskOutput::Added(Err(err)) => {
                    log::warn!("add failed: {}", err);
                    Vec::new()
                }
            },
            _ = store_poll.tick() => controller.poll_store(clock()),
            _ = timer => controller.tick(clock()),
        };

        if render_owed && !controller.is_dragging() {
            render_owed = false;
            if !dock_events.contains(&DockEvent::ListChanged) {
                dock_events.push(DockEvent::ListChanged);
            }
        }
        for event in &dock_events {
            renderer.apply(event);
            if *event == DockEvent::ListChanged {
                spawn_reload(&controller, &outputs_tx);
            }
        }
    }

    log::info!("dock host stopped");
    renderer
}

fn handle_event<S, T, F, R>(
    controller: &mut DockController<S, T, F, R>,
    now_ms: u64,
    event: HostEvent,
    outputs: &mpsc::UnboundedSender<TaskOutput>,
) -> Vec<DockEvent>
where
    S: KeyValueStore + 'static,
    T: TabInventory + 'static,
    F: IconFetcher + 'static,
    R: HostRelay,
{
    match event {
        HostEvent::Input(input) => controller.handle_input(now_ms, input),
        HostEvent::Message(value) => match InboundMessage::from_value(&value) {
            Some(message) => controller.handle_message(now_ms, message),
            None => Vec::new(),
        },
        HostEvent::Add { title, url } => {
            let task = controller.add_app(&title, &url);
            let outputs = outputs.clone();
            spawn_local(async move {
                let _ = outputs.send(TaskOutput::Added(task.await));
            });
            Vec::new()
        }
        HostEvent::Edit { location, edit } => {
            controller.edit_app(location, edit);
            Vec::new()
        }
        HostEvent::Delete(location) => {
            controller.delete_app(location);
            Vec::new()
        }
        HostEvent::Ungroup(index) => {
            controller.ungroup(index);
            Vec::new()
        }
        HostEvent::RemoveFromGroup { group, child } => {
            controller.remove_from_group(group, child);
            Vec::new()
        }
        HostEvent::ToggleCollapsed(index) => {
            controller.toggle_collapsed(index);
            Vec::new()
        }
        HostEvent::Activate(location) => {
            controller.activate(location);
            Vec::new()
        }
        HostEvent::BeginDrag(index) => {
            controller.begin_drag(index);
            Vec::new()
        }
        HostEvent::DragMove { rows, pointer_y } => controller.drag_move(&rows, pointer_y),
        // A saved drop re-renders through the store notification; anything
        // else leaves a preview order on screen that must be reset.
        HostEvent::Drop {
            target_url,
            displayed,
        } => match controller.drop_on(target_url.as_deref(), displayed.as_deref()) {
            Some(outcome) if outcome.list().is_some() => Vec::new(),
            _ => vec![DockEvent::ListChanged],
        },
        HostEvent::CancelDrag => {
            controller.cancel_drag();
            vec![DockEvent::ListChanged]
        }
        HostEvent::Reload => vec![DockEvent::ListChanged],
        HostEvent::Shutdown => Vec::new(),
    }
}

fn spawn_reload<S, T, F, R>(
    controller: &DockController<S, T, F, R>,
    outputs: &mpsc::UnboundedSender<TaskOutput>,
) where
    S: KeyValueStore + 'static,
    T: TabInventory + 'static,
    F: IconFetcher + 'static,
    R: HostRelay,
{
    let Some(pass) = controller.begin_reload() else {
        log::debug!("reload skipped; a pass is already running");
        return;
    };
    let outputs = outputs.clone();
    let epoch = pass.epoch();
    spawn_local(async move {
        let list = pass.run().await;
        let _ = outputs.send(TaskOutput::Reloaded { epoch, list });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{controller_with, controller_with_fetcher};
    use crate::icon::default_icon;
    use crate::icon::testing::FakeFetcher;
    use crate::model::AppItem;
    use crate::visibility::VisibilityEffect;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingRenderer {
        renders: Vec<AppList>,
        applied: Vec<DockEvent>,
    }

    impl Renderer for RecordingRenderer {
        fn render(&mut self, list: &AppList) {
            self.renders.push(list.clone());
        }

        fn apply(&mut self, event: &DockEvent) {
            self.applied.push(event.clone());
        }
    }

    fn item(name: &str) -> AppItem {
        AppItem::new(
            name,
            format!("https://{}.example/", name.to_lowercase()),
            "https://cdn.example/icon.png",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn initial_render_then_show_and_auto_hide() {
        let (controller, _, _) = controller_with(&[item("A")]);
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = async {
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::Input(DockInput::PointerEnterTrigger)).unwrap();
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::Input(DockInput::PointerLeaveDock { x: 500.0 })).unwrap();
            sleep(Duration::from_millis(400)).await;
            tx.send(HostEvent::Shutdown).unwrap();
        };
        let (renderer, ()) = tokio::join!(
            run_host(controller, rx, RecordingRenderer::default()),
            driver
        );

        assert_eq!(renderer.renders.first(), Some(&vec![item("A")]));
        assert!(renderer.renders.len() >= 2);
        let show = renderer
            .applied
            .iter()
            .position(|e| *e == DockEvent::Visibility(VisibilityEffect::ShowDock))
            .expect("dock shown");
        let hide = renderer
            .applied
            .iter()
            .position(|e| *e == DockEvent::Visibility(VisibilityEffect::HideDock))
            .expect("dock hidden after delay");
        assert!(show < hide);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_add_highlights_and_new_add_rerenders() {
        let (controller, kv, _) = controller_with(&[item("A")]);
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = async {
            tx.send(HostEvent::Add {
                title: "Again".to_string(),
                url: "https://a.example/".to_string(),
            })
            .unwrap();
            sleep(Duration::from_millis(50)).await;
            tx.send(HostEvent::Add {
                title: "Bee".to_string(),
                url: "b.example".to_string(),
            })
            .unwrap();
            sleep(Duration::from_millis(1000)).await;
            tx.send(HostEvent::Message(json!({ "action": "toggle" }))).unwrap();
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::Shutdown).unwrap();
        };
        let (renderer, ()) = tokio::join!(
            run_host(controller, rx, RecordingRenderer::default()),
            driver
        );

        assert!(renderer
            .applied
            .contains(&DockEvent::Highlight(Location::Top { index: 0 })));
        let last = renderer.renders.last().expect("rendered");
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].title, "Bee");
        assert!(renderer
            .applied
            .contains(&DockEvent::Visibility(VisibilityEffect::ShowDock)));

        let stored: Vec<AppItem> =
            serde_json::from_value(kv.get(crate::store::APPS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
    }

    fn hanging() -> FakeFetcher {
        FakeFetcher {
            hang: true,
            ..FakeFetcher::default()
        }
    }

    fn bare_a_then_b() -> Vec<AppItem> {
        vec![AppItem::new("A", "https://a.example/", ""), item("B")]
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reload_finishing_mid_drag_is_not_rendered() {
        let (controller, _, _) = controller_with_fetcher(&bare_a_then_b(), hanging());
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = async {
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::BeginDrag(1)).unwrap();
            sleep(Duration::from_millis(8000)).await;
            tx.send(HostEvent::Shutdown).unwrap();
        };
        let (renderer, ()) = tokio::join!(
            run_host(controller, rx, RecordingRenderer::default()),
            driver
        );

        assert!(renderer.renders.is_empty(), "rendered mid-drag: {:?}", renderer.renders);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_started_before_drop_is_replaced_by_fresh_read() {
        let (controller, _, _) = controller_with_fetcher(&bare_a_then_b(), hanging());
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = async {
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::BeginDrag(1)).unwrap();
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::Drop {
                target_url: None,
                displayed: Some(vec![
                    "https://b.example/".to_string(),
                    "https://a.example/".to_string(),
                ]),
            })
            .unwrap();
            sleep(Duration::from_millis(8000)).await;
            tx.send(HostEvent::Shutdown).unwrap();
        };
        let (renderer, ()) = tokio::join!(
            run_host(controller, rx, RecordingRenderer::default()),
            driver
        );

        assert!(!renderer.renders.is_empty());
        for list in &renderer.renders {
            assert_eq!(list[0].url, "https://b.example/", "pre-drop order rendered: {:?}", list);
        }
        let last = renderer.renders.last().expect("rendered");
        assert_eq!(last[1].favicon, default_icon("A", "a.example", 64));
    }

    #[tokio::test(start_paused = true)]
    async fn saved_drop_renders_once_through_store_notification() {
        let (controller, _, _) = controller_with(&[item("A"), item("B")]);
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = async {
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::BeginDrag(0)).unwrap();
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::Drop {
                target_url: Some("https://b.example/".to_string()),
                displayed: None,
            })
            .unwrap();
            sleep(Duration::from_millis(1000)).await;
            tx.send(HostEvent::Shutdown).unwrap();
        };
        let (renderer, ()) = tokio::join!(
            run_host(controller, rx, RecordingRenderer::default()),
            driver
        );

        let list_changes = renderer
            .applied
            .iter()
            .filter(|event| **event == DockEvent::ListChanged)
            .count();
        assert_eq!(list_changes, 1);
        assert_eq!(renderer.renders.len(), 2);
        assert_eq!(renderer.renders[1][0].title, "Group B");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_drag_resets_preview_from_store() {
        let (controller, _, _) = controller_with(&[item("A"), item("B")]);
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = async {
            sleep(Duration::from_millis(10)).await;
            tx.send(HostEvent::BeginDrag(0)).unwrap();
            tx.send(HostEvent::CancelDrag).unwrap();
            sleep(Duration::from_millis(100)).await;
            tx.send(HostEvent::Shutdown).unwrap();
        };
        let (renderer, ()) = tokio::join!(
            run_host(controller, rx, RecordingRenderer::default()),
            driver
        );

        assert_eq!(renderer.renders.len(), 2);
        assert_eq!(renderer.renders[1], vec![item("A"), item("B")]);
    }
}
