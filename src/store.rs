//! Redux-style state container.
//!
//! An [`ActionStore`] owns the one authoritative [`State`]. Each dispatched
//! [`Action`] runs through [`reduce`] to completion before the next one starts,
//! and the result is published to subscribers only when it differs from the
//! state they last saw.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::warn;

use crate::config::{Config, GraphConfig, Metric};
use crate::diagnostics::{self, DEFAULT_SLOW_REDUCTION_THRESHOLD};
use crate::domain::LatLong;
use crate::history::{History, HistoryError};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddEntry {
        activity: String,
        note: Option<String>,
        lat_long: Option<LatLong>,
    },
    EditEntry {
        old_start_time: i64,
        new_start_time: String,
        activity: String,
        note: String,
    },
    RemoveEntries(BTreeSet<i64>),
    SetConfigFromText(String),
    SetConfigFromFile(Config),
    SetGraphGrouping(bool),
    SetGraphIncludeSleep(bool),
    SetGraphMetric(Metric),
    SetGraphRangeStart(i64),
    SetGraphRangeEnd(i64),
    SetHistory(History),
}

/// Immutable snapshot handed to subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub config: Option<Config>,
    pub history: Option<History>,
    pub graph_config: GraphConfig,
}

/// Side-channel message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Failure(String),
}

impl Notice {
    pub fn is_failure(&self) -> bool {
        matches!(self, Notice::Failure(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Notice::Info(message) | Notice::Failure(message) => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub state: State,
    pub notices: Vec<Notice>,
}

impl Reduction {
    fn new(state: State) -> Self {
        Self {
            state,
            notices: Vec::new(),
        }
    }

    fn unchanged(state: &State) -> Self {
        Self::new(state.clone())
    }

    fn with_notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }
}

/// Computes the state that follows `action`.
///
/// Never fails: errors leave the state as it was and surface as a
/// [`Notice::Failure`]. History actions write the log file before returning.
pub fn reduce(state: &State, action: &Action, now: i64) -> Reduction {
    match action {
        Action::AddEntry {
            activity,
            note,
            lat_long,
        } => update_history(state, |history| {
            history.append_at(activity, note.clone(), *lat_long, now)
        }),
        Action::EditEntry {
            old_start_time,
            new_start_time,
            activity,
            note,
        } => update_history(state, |history| {
            history.edit(*old_start_time, new_start_time, activity, note)
        }),
        Action::RemoveEntries(start_times) => update_history(state, |history| {
            history.remove(start_times).map(|_| ())
        }),
        Action::SetConfigFromText(text) => match Config::from_text(text) {
            Ok(config) => Reduction::new(State {
                config: Some(config),
                ..state.clone()
            })
            .with_notice(Notice::Info("Saved config".to_string())),
            Err(err) => Reduction::unchanged(state).with_notice(Notice::Failure(format!(
                "Failed to save invalid config: {err}"
            ))),
        },
        Action::SetConfigFromFile(config) => Reduction::new(State {
            config: Some(config.clone()),
            ..state.clone()
        }),
        &Action::SetGraphGrouping(grouped) => update_graph(state, |graph| graph.grouped = grouped),
        &Action::SetGraphIncludeSleep(include_sleep) => {
            update_graph(state, |graph| graph.include_sleep = include_sleep)
        }
        &Action::SetGraphMetric(metric) => update_graph(state, |graph| graph.metric = metric),
        &Action::SetGraphRangeStart(timestamp) => update_graph(state, |graph| {
            if graph.end_time.is_none_or(|end| timestamp <= end) {
                graph.start_time = Some(timestamp);
            } else {
                graph.start_time = Some(timestamp);
                graph.end_time = Some(timestamp);
            }
        }),
        &Action::SetGraphRangeEnd(timestamp) => update_graph(state, |graph| {
            if graph.start_time.is_none_or(|start| timestamp >= start) {
                graph.end_time = Some(timestamp);
            } else {
                graph.start_time = Some(timestamp);
                graph.end_time = Some(timestamp);
            }
        }),
        Action::SetHistory(history) => Reduction::new(State {
            history: Some(history.clone()),
            ..state.clone()
        }),
    }
}

fn update_history(
    state: &State,
    apply: impl FnOnce(&mut History) -> Result<(), HistoryError>,
) -> Reduction {
    let Some(history) = &state.history else {
        return Reduction::unchanged(state)
            .with_notice(Notice::Failure("History is not loaded".to_string()));
    };

    let mut next = history.clone();
    match apply(&mut next) {
        Ok(()) => Reduction::new(State {
            history: Some(next),
            ..state.clone()
        }),
        Err(err) => Reduction::unchanged(state).with_notice(Notice::Failure(err.to_string())),
    }
}

fn update_graph(state: &State, apply: impl FnOnce(&mut GraphConfig)) -> Reduction {
    let mut graph_config = state.graph_config.clone();
    apply(&mut graph_config);
    Reduction::new(State {
        graph_config,
        ..state.clone()
    })
}

/// Receiving end of a store stream.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: Receiver<T>,
}

impl<T> Subscription<T> {
    /// Returns the next pending value without blocking.
    pub fn try_next(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Takes every pending value.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }
}

type Clock = Box<dyn Fn() -> i64 + Send>;

pub struct ActionStore {
    state: State,
    state_subscribers: Vec<Sender<State>>,
    notice_subscribers: Vec<Sender<Notice>>,
    clock: Clock,
    slow_reduction_threshold: Duration,
}

impl ActionStore {
    pub fn new() -> Self {
        Self::with_clock(|| Utc::now().timestamp())
    }

    /// Builds a store that reads "now" from `clock` instead of the system time.
    pub fn with_clock(clock: impl Fn() -> i64 + Send + 'static) -> Self {
        Self {
            state: State::default(),
            state_subscribers: Vec::new(),
            notice_subscribers: Vec::new(),
            clock: Box::new(clock),
            slow_reduction_threshold: DEFAULT_SLOW_REDUCTION_THRESHOLD,
        }
    }

    pub fn with_slow_reduction_threshold(mut self, threshold: Duration) -> Self {
        self.slow_reduction_threshold = threshold;
        self
    }

    pub fn current_state(&self) -> &State {
        &self.state
    }

    /// Registers a state subscriber. The current state is waiting in the
    /// subscription before this returns.
    pub fn subscribe(&mut self) -> Subscription<State> {
        let (sender, receiver) = mpsc::channel();
        // The receiver is alive, so this send cannot fail.
        let _ = sender.send(self.state.clone());
        self.state_subscribers.push(sender);
        Subscription { receiver }
    }

    /// Registers a subscriber for user-visible notices emitted from now on.
    pub fn notices(&mut self) -> Subscription<Notice> {
        let (sender, receiver) = mpsc::channel();
        self.notice_subscribers.push(sender);
        Subscription { receiver }
    }

    /// Applies `action` and publishes the outcome.
    pub fn dispatch(&mut self, action: Action) {
        let now = (self.clock)();

        let started = Instant::now();
        let Reduction { state, notices } = reduce(&self.state, &action, now);
        let elapsed = started.elapsed();

        diagnostics::log_reduction(
            &action,
            elapsed,
            &self.state,
            &state,
            self.slow_reduction_threshold,
        );

        for notice in notices {
            if notice.is_failure() {
                warn!("{}", notice.message());
            }
            self.notice_subscribers
                .retain(|subscriber| subscriber.send(notice.clone()).is_ok());
        }

        if state != self.state {
            self.state = state;
            let state = &self.state;
            self.state_subscribers
                .retain(|subscriber| subscriber.send(state.clone()).is_ok());
        }
    }
}

impl Default for ActionStore {
    fn default() -> Self {
        Self::new()
    }
}
