use std::rc::Rc;

use crate::config::DockConfig;
use crate::shortcut::{KeyEvent, Shortcut};
use crate::store::DockContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DockState {
    /// Dock hidden, trigger indicator dim.
    HiddenIdle,
    /// Dock hidden, trigger indicator bright.
    HiddenActive,
    Visible,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Dim,
    Bright,
    Hidden,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisibilityEffect {
    ShowDock,
    HideDock,
    Indicator(Indicator),
    /// Indicator shown again at bright level, replaying its entry animation.
    IndicatorReveal,
}

/// The gap between the dock and the screen edge. Leaving the dock into it
/// does not hide the dock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeadZone {
    pub dock_edge: f64,
    pub screen_edge: f64,
}

impl DeadZone {
    pub fn contains(&self, x: f64) -> bool {
        let (low, high) = if self.dock_edge <= self.screen_edge {
            (self.dock_edge, self.screen_edge)
        } else {
            (self.screen_edge, self.dock_edge)
        };
        x > low && x < high
    }
}

/// A single-shot deadline. Arming replaces any pending deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Timer {
    deadline: Option<u64>,
}

impl Timer {
    fn arm(&mut self, now_ms: u64, delay_ms: u64) {
        self.deadline = Some(now_ms + delay_ms);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    Hide,
    Reveal,
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibilityTimings {
    pub idle_dim_ms: u64,
    pub hide_delay_ms: u64,
    pub reentry_debounce_ms: u64,
    pub indicator_reveal_ms: u64,
}

impl From<&DockConfig> for VisibilityTimings {
    fn from(config: &DockConfig) -> Self {
        Self {
            idle_dim_ms: config.idle_dim_ms,
            hide_delay_ms: config.hide_delay_ms,
            reentry_debounce_ms: config.reentry_debounce_ms,
            indicator_reveal_ms: config.indicator_reveal_ms,
        }
    }
}

pub struct VisibilityMachine {
    state: DockState,
    indicator: Indicator,
    timings: VisibilityTimings,
    shortcut: Shortcut,
    dead_zone: Option<DeadZone>,
    context: Rc<DockContext>,
    hide_timer: Timer,
    reveal_timer: Timer,
    idle_timer: Timer,
    last_shown_at: Option<u64>,
}

impl VisibilityMachine {
    pub fn new(timings: VisibilityTimings, shortcut: Shortcut, context: Rc<DockContext>) -> Self {
        Self {
            state: DockState::HiddenIdle,
            indicator: Indicator::Dim,
            timings,
            shortcut,
            dead_zone: None,
            context,
            hide_timer: Timer::default(),
            reveal_timer: Timer::default(),
            idle_timer: Timer::default(),
            last_shown_at: None,
        }
    }

    pub fn state(&self) -> DockState {
        self.state
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    pub fn is_visible(&self) -> bool {
        self.state == DockState::Visible
    }

    pub fn shortcut(&self) -> &Shortcut {
        &self.shortcut
    }

    pub fn set_shortcut(&mut self, shortcut: Shortcut) {
        self.shortcut = shortcut;
    }

    pub fn set_dead_zone(&mut self, dead_zone: Option<DeadZone>) {
        self.dead_zone = dead_zone;
    }

    pub fn is_hide_pending(&self) -> bool {
        self.hide_timer.is_armed()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        [self.hide_timer, self.reveal_timer, self.idle_timer]
            .iter()
            .filter_map(|timer| timer.deadline)
            .min()
    }

    pub fn pointer_enter_trigger(&mut self, now_ms: u64) -> Vec<VisibilityEffect> {
        let mut effects = Vec::new();
        if self.is_visible() {
            return effects;
        }

        self.idle_timer.cancel();
        self.state = DockState::HiddenActive;
        self.set_indicator(Indicator::Bright, &mut effects);

        if let Some(shown_at) = self.last_shown_at {
            if now_ms.saturating_sub(shown_at) < self.timings.reentry_debounce_ms {
                log::debug!("trigger re-entry within debounce window ignored");
                return effects;
            }
        }
        self.show(now_ms, &mut effects);
        effects
    }

    pub fn pointer_leave_trigger(&mut self, now_ms: u64) -> Vec<VisibilityEffect> {
        if !self.is_visible() {
            self.idle_timer.arm(now_ms, self.timings.idle_dim_ms);
        }
        Vec::new()
    }

    pub fn pointer_enter_dock(&mut self, _now_ms: u64) -> Vec<VisibilityEffect> {
        self.hide_timer.cancel();
        Vec::new()
    }

    pub fn pointer_leave_dock(&mut self, now_ms: u64, exit_x: f64) -> Vec<VisibilityEffect> {
        if !self.is_visible() {
            return Vec::new();
        }
        if self.dead_zone.is_some_and(|zone| zone.contains(exit_x)) {
            log::debug!("dock exit at x={} is inside the dead zone", exit_x);
            return Vec::new();
        }
        if self.hide_blocked() {
            return Vec::new();
        }
        self.hide_timer.arm(now_ms, self.timings.hide_delay_ms);
        Vec::new()
    }

    /// `None` when the event is not the configured shortcut.
    pub fn key(&mut self, now_ms: u64, event: &KeyEvent) -> Option<Vec<VisibilityEffect>> {
        if !self.shortcut.matches(event) {
            return None;
        }
        Some(self.toggle(now_ms))
    }

    /// Host-initiated toggle; hides immediately when visible.
    pub fn toggle(&mut self, now_ms: u64) -> Vec<VisibilityEffect> {
        let mut effects = Vec::new();
        if self.is_visible() {
            if self.context.is_dragging() {
                return effects;
            }
            self.hide(now_ms, &mut effects);
        } else {
            self.show(now_ms, &mut effects);
        }
        effects
    }

    /// Fires every timer due at or before `now_ms`, earliest first.
    pub fn tick(&mut self, now_ms: u64) -> Vec<VisibilityEffect> {
        let mut effects = Vec::new();
        while let Some((kind, deadline)) = self.earliest_due(now_ms) {
            match kind {
                TimerKind::Hide => {
                    self.hide_timer.cancel();
                    if self.is_visible() && !self.hide_blocked() {
                        self.hide(deadline, &mut effects);
                    }
                }
                TimerKind::Reveal => {
                    self.reveal_timer.cancel();
                    if !self.is_visible() {
                        self.state = DockState::HiddenActive;
                        self.indicator = Indicator::Bright;
                        effects.push(VisibilityEffect::IndicatorReveal);
                        self.idle_timer.arm(deadline, self.timings.idle_dim_ms);
                    }
                }
                TimerKind::Idle => {
                    self.idle_timer.cancel();
                    if !self.is_visible() {
                        self.state = DockState::HiddenIdle;
                        self.set_indicator(Indicator::Dim, &mut effects);
                    }
                }
            }
        }
        effects
    }

    fn earliest_due(&self, now_ms: u64) -> Option<(TimerKind, u64)> {
        [
            (TimerKind::Hide, self.hide_timer),
            (TimerKind::Reveal, self.reveal_timer),
            (TimerKind::Idle, self.idle_timer),
        ]
        .into_iter()
        .filter_map(|(kind, timer)| timer.deadline.map(|deadline| (kind, deadline)))
        .filter(|(_, deadline)| *deadline <= now_ms)
        .min_by_key(|(_, deadline)| *deadline)
    }

    fn hide_blocked(&self) -> bool {
        self.context.is_modal_open() || self.context.is_menu_open() || self.context.is_dragging()
    }

    fn set_indicator(&mut self, indicator: Indicator, effects: &mut Vec<VisibilityEffect>) {
        if self.indicator != indicator {
            self.indicator = indicator;
            effects.push(VisibilityEffect::Indicator(indicator));
        }
    }

    fn show(&mut self, now_ms: u64, effects: &mut Vec<VisibilityEffect>) {
        self.state = DockState::Visible;
        self.idle_timer.cancel();
        self.reveal_timer.cancel();
        self.hide_timer.cancel();
        self.last_shown_at = Some(now_ms);
        effects.push(VisibilityEffect::ShowDock);
        self.set_indicator(Indicator::Hidden, effects);
    }

    fn hide(&mut self, now_ms: u64, effects: &mut Vec<VisibilityEffect>) {
        self.state = DockState::HiddenActive;
        self.hide_timer.cancel();
        self.reveal_timer.arm(now_ms, self.timings.indicator_reveal_ms);
        effects.push(VisibilityEffect::HideDock);
    }
}
