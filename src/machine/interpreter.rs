//! Reference statechart interpreter (simplified SCXML semantics)

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{
    descriptor_matches, Event, MachineError, MachineLogic, MachineResult, Snapshot, SnapshotStatus,
    DONE_STATE_PREFIX, INIT_EVENT, MAX_MICROSTEPS,
};
use crate::statechart::{ActionDef, NodeKind, StatechartDefinition, TransitionDef, EVENTLESS};

/// Guard predicate over the current context and event
pub type GuardFn = Arc<dyn Fn(&Value, &Event) -> bool + Send + Sync>;

/// Interprets a [`StatechartDefinition`]
#[derive(Clone)]
pub struct Interpreter {
    definition: Arc<StatechartDefinition>,
    /// Named guard predicates
    guards: HashMap<String, GuardFn>,
    /// Unknown guards pass instead of failing the step
    permissive: bool,
}

/// Working state of one macrostep
struct Step {
    config: BTreeSet<usize>,
    context: Value,
    internal: VecDeque<Event>,
}

impl Interpreter {
    pub fn new(definition: Arc<StatechartDefinition>) -> Self {
        Self {
            definition,
            guards: HashMap::new(),
            permissive: true,
        }
    }

    /// Register a named guard
    pub fn with_guard(
        mut self,
        name: impl Into<String>,
        guard: impl Fn(&Value, &Event) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.guards.insert(name.into(), Arc::new(guard));
        self
    }

    /// Fail on guards missing from the table instead of passing them
    pub fn strict(mut self) -> Self {
        self.permissive = false;
        self
    }

    /// Same guards and strictness, different definition
    pub fn for_definition(&self, definition: Arc<StatechartDefinition>) -> Self {
        Self {
            definition,
            guards: self.guards.clone(),
            permissive: self.permissive,
        }
    }

    /// Reject definitions with dangling transition targets
    pub fn check_targets(&self) -> MachineResult<()> {
        for node in self.definition.nodes() {
            for transition in node.all_transitions() {
                for target in &transition.targets {
                    if self.definition.index_of(target).is_none() {
                        return Err(MachineError::UnknownTarget {
                            source_id: node.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // CONFIGURATION HELPERS
    // ========================================================================

    fn resolve_id(&self, id: &str) -> MachineResult<usize> {
        self.definition
            .index_of(id)
            .or_else(|| self.definition.index_of(&format!("{}.{}", self.definition.id, id)))
            .ok_or_else(|| MachineError::UnknownState(id.to_string()))
    }

    /// Children entered by default when `idx` is entered without an explicit target
    fn default_children(&self, idx: usize) -> Vec<usize> {
        let node = self.definition.node(idx);
        let regular = node
            .children
            .iter()
            .copied()
            .filter(|&c| !self.definition.node(c).is_history());

        match node.kind {
            NodeKind::Parallel => regular.collect(),
            _ => match node.initial {
                Some(initial) if !self.definition.node(initial).is_history() => vec![initial],
                _ => regular.take(1).collect(),
            },
        }
    }

    fn add_descendants(&self, idx: usize, enter: &mut BTreeSet<usize>) {
        let node = self.definition.node(idx);
        if node.is_history() {
            // No history is recorded; fall back to the parent's default entry
            if let Some(parent) = node.parent {
                for child in self.default_children(parent) {
                    self.add_descendants(child, enter);
                }
            }
            return;
        }

        enter.insert(idx);
        for child in self.default_children(idx) {
            self.add_descendants(child, enter);
        }
    }

    fn has_active_descendant(&self, idx: usize, states: &BTreeSet<usize>) -> bool {
        states
            .iter()
            .any(|&s| self.definition.is_descendant_or_self(s, idx))
    }

    fn is_in_final_state(&self, idx: usize, config: &BTreeSet<usize>) -> bool {
        let node = self.definition.node(idx);
        match node.kind {
            NodeKind::Parallel => node
                .children
                .iter()
                .filter(|&&c| !self.definition.node(c).is_history())
                .all(|&c| self.is_in_final_state(c, config)),
            _ => node
                .children
                .iter()
                .any(|&c| config.contains(&c) && self.definition.node(c).is_final()),
        }
    }

    fn snapshot_from(&self, step: Step, event: &Event) -> Snapshot {
        let status = if self.is_in_final_state(0, &step.config) {
            SnapshotStatus::Done
        } else {
            SnapshotStatus::Active
        };

        Snapshot {
            configuration: step
                .config
                .iter()
                .map(|&i| self.definition.node(i).id.clone())
                .collect(),
            context: step.context,
            status,
            event: Some(event.clone()),
        }
    }

    fn step_from(&self, snapshot: &Snapshot) -> MachineResult<Step> {
        let config = snapshot
            .configuration
            .iter()
            .map(|id| self.resolve_id(id))
            .collect::<MachineResult<BTreeSet<usize>>>()?;
        Ok(Step {
            config,
            context: snapshot.context.clone(),
            internal: VecDeque::new(),
        })
    }

    // ========================================================================
    // TRANSITION SELECTION
    // ========================================================================

    fn guard_passes(&self, transition: &TransitionDef, context: &Value, event: &Event) -> MachineResult<bool> {
        let Some(guard) = &transition.guard else {
            return Ok(true);
        };
        match self.guards.get(&guard.kind) {
            Some(predicate) => Ok(predicate(context, event)),
            None if self.permissive => {
                log::trace!("guard '{}' not registered, passing", guard.kind);
                Ok(true)
            }
            None => Err(MachineError::UnknownGuard(guard.kind.clone())),
        }
    }

    fn select_transitions<'d>(
        &'d self,
        step: &Step,
        event: Option<&Event>,
    ) -> MachineResult<Vec<&'d TransitionDef>> {
        let guard_event = event.cloned().unwrap_or_else(|| Event::new(EVENTLESS));
        let mut selected: Vec<&TransitionDef> = Vec::new();

        let atomic = step
            .config
            .iter()
            .copied()
            .filter(|&s| self.definition.node(s).is_atomic());

        for leaf in atomic {
            let mut chain = vec![leaf];
            chain.extend(self.definition.ancestors(leaf));

            'chain: for state in chain {
                for (descriptor, candidates) in &self.definition.node(state).transitions {
                    if !descriptor_matches(descriptor, event) {
                        continue;
                    }
                    for candidate in candidates {
                        if self.guard_passes(candidate, &step.context, &guard_event)? {
                            if !selected.iter().any(|t| std::ptr::eq(*t, candidate)) {
                                selected.push(candidate);
                            }
                            break 'chain;
                        }
                    }
                }
            }
        }

        // Drop selections whose exit sets overlap an earlier one
        let mut kept: Vec<&TransitionDef> = Vec::new();
        let mut exited: BTreeSet<usize> = BTreeSet::new();
        for transition in selected {
            let exits = self.exit_set(transition, &step.config)?;
            if exits.is_disjoint(&exited) {
                exited.extend(exits);
                kept.push(transition);
            } else {
                log::debug!(
                    "dropping conflicting transition '{}' from '{}'",
                    transition.event,
                    transition.source
                );
            }
        }
        Ok(kept)
    }

    fn targets_of(&self, transition: &TransitionDef) -> MachineResult<Vec<usize>> {
        transition
            .targets
            .iter()
            .map(|t| {
                self.definition.index_of(t).ok_or_else(|| MachineError::UnknownTarget {
                    source_id: transition.source.clone(),
                    target: t.clone(),
                })
            })
            .collect()
    }

    /// State whose proper descendants are exited and re-entered
    fn transition_domain(&self, transition: &TransitionDef) -> MachineResult<Option<usize>> {
        let targets = self.targets_of(transition)?;
        if targets.is_empty() {
            return Ok(None);
        }
        let source = self.resolve_id(&transition.source)?;
        let def = &self.definition;
        let proper = |t: usize, anc: usize| t != anc && def.is_descendant_or_self(t, anc);

        if !transition.reenter
            && def.node(source).is_compound()
            && targets.iter().all(|&t| proper(t, source))
        {
            return Ok(Some(source));
        }

        for ancestor in def.ancestors(source) {
            let eligible = ancestor == 0 || def.node(ancestor).kind != NodeKind::Parallel;
            if eligible && targets.iter().all(|&t| proper(t, ancestor)) {
                return Ok(Some(ancestor));
            }
        }
        Ok(Some(0))
    }

    fn exit_set(&self, transition: &TransitionDef, config: &BTreeSet<usize>) -> MachineResult<BTreeSet<usize>> {
        let Some(domain) = self.transition_domain(transition)? else {
            return Ok(BTreeSet::new());
        };
        Ok(config
            .iter()
            .copied()
            .filter(|&s| s != domain && self.definition.is_descendant_or_self(s, domain))
            .collect())
    }

    // ========================================================================
    // MICROSTEP / MACROSTEP
    // ========================================================================

    fn execute(&self, actions: &[ActionDef], step: &mut Step) {
        for action in actions {
            match action.kind.as_str() {
                "assign" => match &action.params {
                    Value::Object(updates) => {
                        let mut context = match std::mem::take(&mut step.context) {
                            Value::Object(map) => map,
                            _ => Map::new(),
                        };
                        for (key, value) in updates {
                            context.insert(key.clone(), value.clone());
                        }
                        step.context = Value::Object(context);
                    }
                    other => log::warn!("assign expects object params, got {}", other),
                },
                "raise" => {
                    let kind = match &action.params {
                        Value::String(kind) => Some(kind.clone()),
                        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(String::from),
                        Value::Object(map) => map.get("type").and_then(|v| v.as_str()).map(String::from),
                        _ => None,
                    };
                    match kind {
                        Some(kind) => step.internal.push_back(Event::new(kind)),
                        None => log::warn!("raise action without an event type"),
                    }
                }
                other => log::trace!("action '{}' has no built-in effect", other),
            }
        }
    }

    fn microstep(&self, transitions: &[&TransitionDef], step: &mut Step) -> MachineResult<()> {
        let mut exits: BTreeSet<usize> = BTreeSet::new();
        let mut domains = Vec::new();
        for transition in transitions {
            exits.extend(self.exit_set(transition, &step.config)?);
            domains.push(self.transition_domain(transition)?);
        }

        // Exit deepest first
        for &state in exits.iter().rev() {
            let node = self.definition.node(state);
            self.execute(&node.exit, step);
            step.config.remove(&state);
        }

        for transition in transitions {
            self.execute(&transition.actions, step);
        }

        let mut enter: BTreeSet<usize> = BTreeSet::new();
        for (transition, domain) in transitions.iter().zip(&domains) {
            let Some(domain) = *domain else { continue };
            let targets = self.targets_of(transition)?;
            for &target in &targets {
                self.add_descendants(target, &mut enter);
            }
            for &target in &targets {
                for ancestor in self.definition.ancestors(target) {
                    if ancestor == domain {
                        break;
                    }
                    enter.insert(ancestor);
                    if self.definition.node(ancestor).is_parallel() {
                        for child in self.default_children(ancestor) {
                            let combined: BTreeSet<usize> = step.config.union(&enter).copied().collect();
                            if !self.has_active_descendant(child, &combined) {
                                self.add_descendants(child, &mut enter);
                            }
                        }
                    }
                }
            }
        }

        // Enter in document order
        for &state in &enter {
            if !step.config.insert(state) {
                continue;
            }
            let node = self.definition.node(state);
            self.execute(&node.entry, step);

            if node.is_final() {
                if let Some(parent) = node.parent.filter(|&p| p != 0) {
                    let parent_id = &self.definition.node(parent).id;
                    step.internal
                        .push_back(Event::new(format!("{}{}", DONE_STATE_PREFIX, parent_id)));

                    if let Some(grand) = self.definition.node(parent).parent {
                        let grand_node = self.definition.node(grand);
                        if grand_node.is_parallel() && self.is_in_final_state(grand, &step.config) {
                            step.internal
                                .push_back(Event::new(format!("{}{}", DONE_STATE_PREFIX, grand_node.id)));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Run eventless transitions and internal events to exhaustion
    fn macrostep(&self, step: &mut Step) -> MachineResult<()> {
        for _ in 0..MAX_MICROSTEPS {
            let eventless = self.select_transitions(step, None)?;
            if !eventless.is_empty() {
                self.microstep(&eventless, step)?;
                continue;
            }

            let Some(internal) = step.internal.pop_front() else {
                return Ok(());
            };
            let enabled = self.select_transitions(step, Some(&internal))?;
            if !enabled.is_empty() {
                self.microstep(&enabled, step)?;
            }
        }
        Err(MachineError::Livelock(MAX_MICROSTEPS))
    }
}

impl MachineLogic for Interpreter {
    fn definition(&self) -> &StatechartDefinition {
        &self.definition
    }

    fn initial_snapshot(&self) -> MachineResult<Snapshot> {
        let mut step = Step {
            config: BTreeSet::new(),
            context: self.definition.context.clone(),
            internal: VecDeque::new(),
        };

        let mut enter = BTreeSet::new();
        self.add_descendants(0, &mut enter);
        for &state in &enter {
            step.config.insert(state);
            self.execute(&self.definition.node(state).entry, &mut step);
        }

        self.macrostep(&mut step)?;
        Ok(self.snapshot_from(step, &Event::new(INIT_EVENT)))
    }

    fn transition(&self, snapshot: &Snapshot, event: &Event) -> MachineResult<Snapshot> {
        if snapshot.status != SnapshotStatus::Active {
            log::debug!("ignoring {} on a {:?} snapshot", event.kind, snapshot.status);
            return Ok(snapshot.clone());
        }

        let mut step = self.step_from(snapshot)?;
        let enabled = self.select_transitions(&step, Some(event))?;
        if !enabled.is_empty() {
            self.microstep(&enabled, &mut step)?;
            self.macrostep(&mut step)?;
        }
        Ok(self.snapshot_from(step, event))
    }

    fn resolve_snapshot(&self, snapshot: &Snapshot) -> MachineResult<Snapshot> {
        let mut config = BTreeSet::new();
        for id in &snapshot.configuration {
            let idx = self.resolve_id(id)?;
            if self.definition.node(idx).is_history() {
                continue;
            }
            config.insert(idx);
            config.extend(self.definition.ancestors(idx));
        }
        if config.is_empty() {
            self.add_descendants(0, &mut config);
        }

        // Complete partially specified compound and parallel states
        let listed: Vec<usize> = config.iter().copied().collect();
        for idx in listed {
            for child in self.default_children(idx) {
                let node = self.definition.node(idx);
                let needs_child = match node.kind {
                    NodeKind::Parallel => !config.contains(&child),
                    _ => !node.children.iter().any(|c| config.contains(c)),
                };
                if needs_child {
                    self.add_descendants(child, &mut config);
                }
            }
        }

        let status = match snapshot.status {
            SnapshotStatus::Stopped => SnapshotStatus::Stopped,
            _ if self.is_in_final_state(0, &config) => SnapshotStatus::Done,
            _ => SnapshotStatus::Active,
        };

        Ok(Snapshot {
            configuration: config
                .iter()
                .map(|&i| self.definition.node(i).id.clone())
                .collect(),
            context: snapshot.context.clone(),
            status,
            event: snapshot.event.clone(),
        })
    }

    fn next_events(&self, snapshot: &Snapshot) -> Vec<String> {
        let mut events: Vec<String> = Vec::new();
        if snapshot.status != SnapshotStatus::Active {
            return events;
        }

        for id in &snapshot.configuration {
            let Some(node) = self.definition.get(id) else { continue };
            for descriptor in node.transitions.keys() {
                let sendable = descriptor != EVENTLESS && !descriptor.ends_with('*');
                if sendable && !events.contains(descriptor) {
                    events.push(descriptor.clone());
                }
            }
        }
        events
    }
}
