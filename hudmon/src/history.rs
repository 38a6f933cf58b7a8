//! Client-side rolling buffer rebuilt from the agent's message stream.

use std::collections::VecDeque;

use crate::types::{ServerMessage, Snapshot};

/// Push to the back, dropping from the front to stay within `cap`.
pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while dq.len() >= cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// What applying one message did to the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Buffer replaced by a backlog; holds how many entries were kept.
    Backlog(usize),
    Live,
    Error(String),
    Ignored,
}

pub struct Timeline {
    points: VecDeque<Snapshot>,
    cap: usize,
}

impl Timeline {
    pub fn new(cap: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    pub fn apply(&mut self, msg: ServerMessage) -> Applied {
        match msg {
            ServerMessage::History { data } => {
                // a backlog always starts the buffer afresh, even after a reconnect
                self.points.clear();
                let skip = data.len().saturating_sub(self.cap);
                for s in data.into_iter().skip(skip) {
                    push_capped(&mut self.points, s, self.cap);
                }
                Applied::Backlog(self.points.len())
            }
            ServerMessage::Update(s) => {
                push_capped(&mut self.points, s, self.cap);
                Applied::Live
            }
            ServerMessage::Error { message } => Applied::Error(message),
            ServerMessage::Unknown => Applied::Ignored,
        }
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.points.iter()
    }

    /// Mean CPU load over the samples that carried one.
    pub fn mean_cpu_load(&self) -> Option<f64> {
        let loads: Vec<f64> = self.points.iter().filter_map(|s| s.cpu.load.as_f64()).collect();
        if loads.is_empty() {
            return None;
        }
        Some(loads.iter().sum::<f64>() / loads.len() as f64)
    }
}
