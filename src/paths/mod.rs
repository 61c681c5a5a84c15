//! Path Generation
//! Explores the snapshots reachable from an initial snapshot by applying
//! candidate events. Snapshots are compared by fingerprint (active
//! configuration plus context).

#[cfg(test)]
mod tests;

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::machine::{Event, MachineError, MachineLogic, Snapshot};

#[derive(Error, Debug)]
pub enum PathError {
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Event '{event}' is not accepted in {configuration:?}")]
    EventNotAccepted {
        event: String,
        configuration: Vec<String>,
    },
    #[error("Cannot join paths: head ends in {head} but tail starts in {tail}")]
    Disjoint { head: String, tail: String },
}

pub type PathResult<T> = Result<T, PathError>;

/// One step: the snapshot the event was sent in, and the event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub state: Snapshot,
    pub event: Event,
}

/// A replayable route ending in `state`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePath {
    pub state: Snapshot,
    pub steps: Vec<PathStep>,
    pub weight: usize,
    /// Fingerprint of the snapshot the path starts from
    pub origin_fingerprint: String,
    /// Fingerprint of `state`
    pub fingerprint: String,
}

impl StatePath {
    fn start(state: Snapshot, key: String) -> Self {
        Self {
            state,
            steps: Vec::new(),
            weight: 0,
            origin_fingerprint: key.clone(),
            fingerprint: key,
        }
    }

    fn extend(&self, event: Event, next: Snapshot, key: String) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep {
            state: self.state.clone(),
            event,
        });
        Self {
            state: next,
            weight: steps.len(),
            steps,
            origin_fingerprint: self.origin_fingerprint.clone(),
            fingerprint: key,
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.steps.iter().map(|s| &s.event)
    }

    /// Snapshot the path starts from
    pub fn origin(&self) -> &Snapshot {
        self.steps.first().map(|s| &s.state).unwrap_or(&self.state)
    }
}

/// Outgoing edges of one reachable snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjacencyEntry {
    pub state: Snapshot,
    /// Serialized event to the fingerprint it leads to
    pub transitions: IndexMap<String, AdjacencyTransition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjacencyTransition {
    pub event: Event,
    pub target: String,
}

pub type AdjacencyMap = IndexMap<String, AdjacencyEntry>;

// ============================================================================
// OPTIONS
// ============================================================================

pub type EventGenerator = Box<dyn Fn(&Snapshot) -> Vec<Event>>;
pub type SnapshotFilter = Box<dyn Fn(&Snapshot) -> bool>;

/// Where candidate events come from
pub enum EventCandidates {
    /// Events enabled by the active configuration
    NextEvents,
    /// Same list for every snapshot
    Fixed(Vec<Event>),
    Generator(EventGenerator),
}

/// Traversal parameters. Candidates must come in a deterministic order for
/// reproducible results.
pub struct TraversalOptions {
    pub events: EventCandidates,
    /// Longest path, in steps
    pub max_depth: Option<usize>,
    /// Stop after this many paths (simple paths only)
    pub max_paths: Option<usize>,
    /// Snapshots failing the filter are neither recorded nor explored
    pub filter: Option<SnapshotFilter>,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            events: EventCandidates::NextEvents,
            max_depth: None,
            max_paths: None,
            filter: None,
        }
    }
}

impl TraversalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = EventCandidates::Fixed(events);
        self
    }

    pub fn with_event_generator(mut self, generator: impl Fn(&Snapshot) -> Vec<Event> + 'static) -> Self {
        self.events = EventCandidates::Generator(Box::new(generator));
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_paths(mut self, paths: usize) -> Self {
        self.max_paths = Some(paths);
        self
    }

    pub fn with_filter(mut self, filter: impl Fn(&Snapshot) -> bool + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    fn candidates<L: MachineLogic + ?Sized>(&self, logic: &L, snapshot: &Snapshot) -> Vec<Event> {
        match &self.events {
            EventCandidates::NextEvents => logic.next_events(snapshot).into_iter().map(Event::new).collect(),
            EventCandidates::Fixed(events) => events.clone(),
            EventCandidates::Generator(generate) => generate(snapshot),
        }
    }

    fn accepts(&self, snapshot: &Snapshot) -> bool {
        self.filter.as_ref().map_or(true, |f| f(snapshot))
    }

    fn can_extend(&self, path: &StatePath) -> bool {
        self.max_depth.map_or(true, |d| path.steps.len() < d)
    }
}

// ============================================================================
// SERIALIZATION
// ============================================================================

pub fn serialize_event(event: &Event) -> PathResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Structural key of a snapshot: configuration and context
pub fn fingerprint(snapshot: &Snapshot) -> PathResult<String> {
    Ok(serde_json::to_string(&json!({
        "configuration": snapshot.configuration,
        "context": snapshot.context,
    }))?)
}

// ============================================================================
// TRAVERSALS
// ============================================================================

/// Breadth-first: the first path found to each fingerprint, in discovery order
pub fn shortest_paths<L: MachineLogic + ?Sized>(
    logic: &L,
    initial: &Snapshot,
    options: &TraversalOptions,
) -> PathResult<Vec<StatePath>> {
    let mut found: IndexMap<String, StatePath> = IndexMap::new();
    let mut queue = VecDeque::new();

    let start = fingerprint(initial)?;
    found.insert(start.clone(), StatePath::start(initial.clone(), start.clone()));
    queue.push_back(start);

    while let Some(key) = queue.pop_front() {
        let Some(path) = found.get(&key).cloned() else { continue };
        if !options.can_extend(&path) {
            continue;
        }

        for event in options.candidates(logic, &path.state) {
            let next = logic.transition(&path.state, &event)?;
            if !options.accepts(&next) {
                continue;
            }
            let next_key = fingerprint(&next)?;
            if found.contains_key(&next_key) {
                continue;
            }
            found.insert(next_key.clone(), path.extend(event, next, next_key.clone()));
            queue.push_back(next_key);
        }
    }

    log::debug!("shortest paths: {} reachable snapshots", found.len());
    Ok(found.into_values().collect())
}

/// Depth-first: every path that never revisits a fingerprint within itself.
/// The zero-step path to the initial snapshot comes first.
pub fn simple_paths<L: MachineLogic + ?Sized>(
    logic: &L,
    initial: &Snapshot,
    options: &TraversalOptions,
) -> PathResult<Vec<StatePath>> {
    let mut paths = Vec::new();
    if options.max_paths == Some(0) {
        return Ok(paths);
    }

    let start = fingerprint(initial)?;
    let mut on_path = HashSet::new();
    on_path.insert(start.clone());
    walk_simple(logic, options, StatePath::start(initial.clone(), start), &mut on_path, &mut paths)?;

    log::debug!("simple paths: {}", paths.len());
    Ok(paths)
}

/// Returns `true` once the path budget is spent
fn walk_simple<L: MachineLogic + ?Sized>(
    logic: &L,
    options: &TraversalOptions,
    path: StatePath,
    on_path: &mut HashSet<String>,
    paths: &mut Vec<StatePath>,
) -> PathResult<bool> {
    paths.push(path.clone());
    if options.max_paths.map_or(false, |max| paths.len() >= max) {
        return Ok(true);
    }
    if !options.can_extend(&path) {
        return Ok(false);
    }

    for event in options.candidates(logic, &path.state) {
        let next = logic.transition(&path.state, &event)?;
        if !options.accepts(&next) {
            continue;
        }
        let key = fingerprint(&next)?;
        if on_path.contains(&key) {
            continue;
        }

        on_path.insert(key.clone());
        let done = walk_simple(logic, options, path.extend(event, next, key.clone()), on_path, paths)?;
        on_path.remove(&key);
        if done {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Replay `events` from `initial`; every event must be accepted where it is sent
pub fn path_from_events<L: MachineLogic + ?Sized>(
    logic: &L,
    initial: &Snapshot,
    events: &[Event],
) -> PathResult<StatePath> {
    let mut path = StatePath::start(initial.clone(), fingerprint(initial)?);

    for event in events {
        if !logic.accepts(&path.state, event) {
            return Err(PathError::EventNotAccepted {
                event: event.kind.clone(),
                configuration: path.state.configuration.clone(),
            });
        }
        let next = logic.transition(&path.state, event)?;
        let key = fingerprint(&next)?;
        path = path.extend(event.clone(), next, key);
    }
    Ok(path)
}

/// Every reachable snapshot with its outgoing transitions
pub fn adjacency_map<L: MachineLogic + ?Sized>(
    logic: &L,
    initial: &Snapshot,
    options: &TraversalOptions,
) -> PathResult<AdjacencyMap> {
    let mut map = AdjacencyMap::new();
    let mut depth: IndexMap<String, usize> = IndexMap::new();
    let mut queue = VecDeque::new();

    let start = fingerprint(initial)?;
    depth.insert(start.clone(), 0);
    queue.push_back((start, initial.clone()));

    while let Some((key, state)) = queue.pop_front() {
        let level = depth.get(&key).copied().unwrap_or(0);
        let mut transitions = IndexMap::new();

        if options.max_depth.map_or(true, |d| level < d) {
            for event in options.candidates(logic, &state) {
                let next = logic.transition(&state, &event)?;
                if !options.accepts(&next) {
                    continue;
                }
                let target = fingerprint(&next)?;
                if !depth.contains_key(&target) {
                    depth.insert(target.clone(), level + 1);
                    queue.push_back((target.clone(), next));
                }
                transitions.insert(serialize_event(&event)?, AdjacencyTransition { event, target });
            }
        }
        map.insert(key, AdjacencyEntry { state, transitions });
    }
    Ok(map)
}

/// Concatenate two paths; `tail` must start where `head` ends
pub fn join_paths(head: &StatePath, tail: &StatePath) -> PathResult<StatePath> {
    if head.fingerprint != tail.origin_fingerprint {
        return Err(PathError::Disjoint {
            head: head.fingerprint.clone(),
            tail: tail.origin_fingerprint.clone(),
        });
    }

    let mut steps = head.steps.clone();
    steps.extend(tail.steps.iter().cloned());
    Ok(StatePath {
        state: tail.state.clone(),
        weight: head.weight + tail.weight,
        steps,
        origin_fingerprint: head.origin_fingerprint.clone(),
        fingerprint: tail.fingerprint.clone(),
    })
}
