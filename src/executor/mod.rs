//! Query executors
//!
//! An `Executor` drives one in-flight query over the fleet. It owns a slot per
//! worker holding that worker's buffered items and its request state, and it
//! enforces the round discipline every distributed algorithm relies on:
//!
//! - at most one outstanding request per worker
//! - no requests to a finished worker
//! - a round ends when no live worker has a request outstanding
//!
//! Responses, protocol violations and disconnects all arrive on the fleet's
//! event channel. A violating or vanished worker is marked finished with an
//! empty buffer and the query carries on with the rest.

pub mod average;
pub mod freq;
pub mod median;
pub mod sort;

use crate::distributed::fleet::{EventKind, Fleet};
use crate::distributed::protocol::{Command, Response};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a query could not produce a result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("no workers available")]
    NoWorkers,
    #[error("worker {worker}: {reason}")]
    Discipline { worker: usize, reason: &'static str },
    #[error("unexpected response from worker {worker}: {response}")]
    UnexpectedResponse { worker: usize, response: String },
}

impl QueryError {
    pub(crate) fn unexpected(worker: usize, response: &Response) -> Self {
        let mut response = response.encode();
        if response.len() > 64 {
            response.truncate(64);
            response.push_str("...");
        }
        QueryError::UnexpectedResponse { worker, response }
    }
}

/// Items carried by one response
#[derive(Debug)]
pub struct Decoded<T> {
    pub items: Vec<T>,
    /// Last response of the worker's stream
    pub end: bool,
}

impl<T> Decoded<T> {
    pub fn one(item: T) -> Self {
        Self { items: vec![item], end: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    RequestSent,
}

#[derive(Debug)]
struct Slot<T> {
    buffer: VecDeque<T>,
    finished: bool,
    state: SlotState,
    /// Requests sent and not yet answered
    outstanding: usize,
}

/// Controller for one query
pub struct Executor<'f, T> {
    fleet: &'f mut Fleet,
    slots: Vec<Slot<T>>,
}

impl<'f, T> Executor<'f, T> {
    /// Take the fleet for one query
    ///
    /// Events left over from earlier queries are discarded first; workers
    /// whose links are already closed start out finished.
    pub fn bind(fleet: &'f mut Fleet) -> Result<Self, QueryError> {
        while let Some(event) = fleet.try_next_event() {
            match event.kind {
                EventKind::Disconnected => fleet.mark_disconnected(event.worker),
                _ => debug!(worker = event.worker, "discarding stale event"),
            }
        }
        if fleet.open_count() == 0 {
            return Err(QueryError::NoWorkers);
        }

        let slots = (0..fleet.len())
            .map(|worker| Slot {
                buffer: VecDeque::new(),
                finished: !fleet.is_open(worker),
                state: SlotState::Idle,
                outstanding: 0,
            })
            .collect();
        Ok(Self { fleet, slots })
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    pub fn worker_id(&self, worker: usize) -> &str {
        self.fleet.worker_id(worker)
    }

    pub fn is_finished(&self, worker: usize) -> bool {
        self.slots.get(worker).map_or(true, |s| s.finished)
    }

    /// Workers that have not finished, in fleet order
    pub fn live_workers(&self) -> Vec<usize> {
        (0..self.slots.len()).filter(|&w| !self.slots[w].finished).collect()
    }

    /// Send a request that expects a reply
    pub fn request(&mut self, worker: usize, command: Command) -> Result<(), QueryError> {
        let slot = self
            .slots
            .get_mut(worker)
            .ok_or(QueryError::Discipline { worker, reason: "no such worker" })?;
        if slot.finished {
            return Err(QueryError::Discipline { worker, reason: "request to a finished worker" });
        }
        if slot.state == SlotState::RequestSent {
            return Err(QueryError::Discipline { worker, reason: "request already outstanding" });
        }

        if self.fleet.send(worker, command) {
            slot.state = SlotState::RequestSent;
            slot.outstanding += 1;
            self.fleet.note_outstanding(slot.outstanding);
        } else {
            warn!(worker = %self.fleet.worker_id(worker), "link closed; dropping worker from query");
            slot.finished = true;
            slot.buffer.clear();
        }
        Ok(())
    }

    /// Send a notification; false if the link is closed
    pub fn notify(&mut self, worker: usize, command: Command) -> bool {
        let sent = self.fleet.send(worker, command);
        if !sent {
            warn!(worker = %self.fleet.worker_id(worker), "notification not delivered");
        }
        sent
    }

    /// Request `command` from every idle live worker
    pub fn broadcast(&mut self, command: &Command) -> Result<(), QueryError> {
        for worker in 0..self.slots.len() {
            let slot = &self.slots[worker];
            if !slot.finished && slot.state == SlotState::Idle {
                self.request(worker, command.clone())?;
            }
        }
        Ok(())
    }

    /// Notify every worker whose link is still open
    pub fn notify_all(&mut self, command: &Command) {
        for worker in 0..self.slots.len() {
            if self.fleet.is_open(worker) {
                self.notify(worker, command.clone());
            }
        }
    }

    /// Issue continuation requests to live idle workers running low
    pub fn refill(&mut self, batch: usize, command: &Command) -> Result<(), QueryError> {
        let threshold = (batch / 2).max(1);
        for worker in 0..self.slots.len() {
            let slot = &self.slots[worker];
            if !slot.finished && slot.state == SlotState::Idle && slot.buffer.len() < threshold {
                self.request(worker, command.clone())?;
            }
        }
        Ok(())
    }

    fn outstanding(&self) -> bool {
        self.slots.iter().any(|s| !s.finished && s.state == SlotState::RequestSent)
    }

    /// Wait until no live worker has a request outstanding
    pub async fn await_round<F>(&mut self, mut decode: F)
    where
        F: FnMut(usize, Response) -> Result<Decoded<T>, QueryError>,
    {
        while self.outstanding() {
            let Some(event) = self.fleet.next_event().await else {
                // Every sender is gone; nothing more can arrive
                for worker in 0..self.slots.len() {
                    self.drop_worker(worker);
                }
                return;
            };
            let worker = event.worker;
            let Some((finished, idle)) = self.slots.get(worker).map(|s| (s.finished, s.state == SlotState::Idle)) else {
                continue;
            };

            match event.kind {
                EventKind::Disconnected => {
                    self.fleet.mark_disconnected(worker);
                    // A worker that already ended its stream keeps what it delivered
                    if !finished {
                        self.drop_worker(worker);
                    }
                }
                EventKind::Malformed(line) => {
                    self.violation(worker, format!("undecodable response '{}'", line));
                }
                EventKind::Response(_) if finished => {
                    debug!(worker, "ignoring response from finished worker");
                }
                EventKind::Response(response) if idle => {
                    let reason = QueryError::unexpected(worker, &response).to_string();
                    self.violation(worker, format!("unsolicited: {}", reason));
                }
                EventKind::Response(response) => match decode(worker, response) {
                    Ok(decoded) => {
                        let slot = &mut self.slots[worker];
                        slot.state = SlotState::Idle;
                        slot.outstanding -= 1;
                        slot.buffer.extend(decoded.items);
                        if decoded.end {
                            slot.finished = true;
                        }
                    }
                    Err(e) => self.violation(worker, e.to_string()),
                },
            }
        }
    }

    /// Request `command` from every live worker and collect one item each
    pub async fn collect<F>(&mut self, command: Command, decode: F) -> Result<Vec<(usize, T)>, QueryError>
    where
        F: FnMut(usize, Response) -> Result<Decoded<T>, QueryError>,
    {
        self.broadcast(&command)?;
        self.await_round(decode).await;

        let mut replies = Vec::new();
        for worker in 0..self.slots.len() {
            if let Some(item) = self.pop(worker) {
                replies.push((worker, item));
            }
        }
        if self.live_workers().is_empty() && replies.is_empty() {
            return Err(QueryError::NoWorkers);
        }
        Ok(replies)
    }

    fn drop_worker(&mut self, worker: usize) {
        if let Some(slot) = self.slots.get_mut(worker) {
            slot.finished = true;
            slot.state = SlotState::Idle;
            slot.outstanding = 0;
            slot.buffer.clear();
        }
    }

    fn violation(&mut self, worker: usize, reason: String) {
        warn!(worker = %self.fleet.worker_id(worker), %reason, "protocol violation; closing link");
        self.fleet.close(worker);
        self.drop_worker(worker);
    }

    pub fn head(&self, worker: usize) -> Option<&T> {
        self.slots.get(worker).and_then(|s| s.buffer.front())
    }

    pub fn pop(&mut self, worker: usize) -> Option<T> {
        self.slots.get_mut(worker).and_then(|s| s.buffer.pop_front())
    }

    /// Worker holding the smallest buffered head
    ///
    /// `None` when a live worker has an empty buffer, since its next item
    /// could be smaller than anything buffered, or when every buffer is empty.
    pub fn min_head_by<K, F>(&self, key: F) -> Option<usize>
    where
        K: Ord,
        F: Fn(&T) -> K,
    {
        let mut best: Option<(usize, K)> = None;
        for (worker, slot) in self.slots.iter().enumerate() {
            match slot.buffer.front() {
                None if !slot.finished => return None,
                None => {}
                Some(item) => {
                    let k = key(item);
                    if best.as_ref().map_or(true, |(_, b)| k < *b) {
                        best = Some((worker, k));
                    }
                }
            }
        }
        best.map(|(worker, _)| worker)
    }

    /// Every worker finished and every buffer consumed
    pub fn is_drained(&self) -> bool {
        self.slots.iter().all(|s| s.finished && s.buffer.is_empty())
    }
}
