//! Process definitions: the ordered phases of a workflow and how each one runs.
//!
//! A [`ProcessDefinition`] is built in code with the builder methods below or
//! loaded from a process file (see `process_file`). Phase order is fixed at
//! construction. [`ProcessDefinition::validate`] rejects definitions that could
//! observe state from a phase that has not run yet.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::errors::DefinitionError;
use crate::fanout::JoinPolicy;
use crate::gate::GateSpec;
use crate::invoker::UnitOfWork;
use crate::predicate::{Predicate, is_valid_pointer, phase_in_pointer};
use crate::score::{VerdictTable, weight_mismatch};
use crate::state::RunSnapshot;

type DeriveFn = dyn Fn(&RunSnapshot) -> Value + Send + Sync;

/// Template a phase turns into a [`UnitOfWork`] when it runs.
///
/// The unit input is built from the snapshot at dispatch time, in this order:
/// static `input`, then the `derive` closure's object (if any), then `bind`
/// entries that copy snapshot values (JSON pointers) under input keys.
#[derive(Clone)]
pub struct UnitTemplate {
    pub name: String,
    pub input: Value,
    pub bind: BTreeMap<String, String>,
    pub output_shape: Option<Value>,
    derive: Option<Arc<DeriveFn>>,
}

impl std::fmt::Debug for UnitTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitTemplate")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("bind", &self.bind)
            .field("output_shape", &self.output_shape)
            .field("derive", &self.derive.is_some())
            .finish()
    }
}

impl UnitTemplate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            input: Value::Null,
            bind: BTreeMap::new(),
            output_shape: None,
            derive: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Copy the snapshot value at `pointer` into the input under `key`.
    pub fn bind(mut self, key: &str, pointer: &str) -> Self {
        self.bind.insert(key.to_string(), pointer.to_string());
        self
    }

    pub fn with_output_shape(mut self, shape: Value) -> Self {
        self.output_shape = Some(shape);
        self
    }

    /// Compute part of the input from the snapshot in code.
    pub fn derive<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunSnapshot) -> Value + Send + Sync + 'static,
    {
        self.derive = Some(Arc::new(f));
        self
    }

    /// Build the owned unit of work for `phase` from `snapshot`.
    pub fn materialize(&self, snapshot: &RunSnapshot, phase: &str) -> UnitOfWork {
        let mut input = self.input.clone();

        if let Some(derive) = &self.derive {
            let derived = derive(snapshot);
            match (&mut input, derived) {
                (Value::Object(base), Value::Object(extra)) => base.extend(extra),
                (_, Value::Null) => {}
                (slot, derived) => *slot = derived,
            }
        }

        if !self.bind.is_empty() {
            let view = snapshot.view();
            let mut object = into_object(input);
            for (key, pointer) in &self.bind {
                let value = view.pointer(pointer).cloned().unwrap_or(Value::Null);
                object.insert(key.clone(), value);
            }
            input = Value::Object(object);
        }

        let unit = UnitOfWork::new(phase, &self.name, input);
        match &self.output_shape {
            Some(shape) => unit.with_output_shape(shape.clone()),
            None => unit,
        }
    }
}

/// Turn `input` into an object so bound keys can be added to it.
/// A non-object, non-null input is kept under `value`.
fn into_object(input: Value) -> Map<String, Value> {
    match input {
        Value::Object(object) => object,
        Value::Null => Map::new(),
        other => {
            let mut object = Map::new();
            object.insert("value".to_string(), other);
            object
        }
    }
}

/// How a phase's work is dispatched.
#[derive(Debug, Clone)]
pub enum PhaseWork {
    Single(UnitTemplate),
    FanOut {
        units: Vec<UnitTemplate>,
        policy: JoinPolicy,
    },
}

impl PhaseWork {
    pub fn units(&self) -> &[UnitTemplate] {
        match self {
            PhaseWork::Single(unit) => std::slice::from_ref(unit),
            PhaseWork::FanOut { units, .. } => units,
        }
    }

    pub fn is_fan_out(&self) -> bool {
        matches!(self, PhaseWork::FanOut { .. })
    }

    pub fn policy(&self) -> JoinPolicy {
        match self {
            PhaseWork::Single(_) => JoinPolicy::All,
            PhaseWork::FanOut { policy, .. } => *policy,
        }
    }
}

/// Registers a score component from a value in the phase output.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScoreBinding {
    pub component: String,
    /// JSON pointer into the phase output. Empty means the whole output.
    #[serde(default)]
    pub pointer: String,
}

#[derive(Debug, Clone)]
pub struct PhaseSpec {
    pub name: String,
    pub description: String,
    /// A failure in a required phase aborts the run.
    pub required: bool,
    pub activation: Predicate,
    pub work: PhaseWork,
    pub gates: Vec<GateSpec>,
    pub scores: Vec<ScoreBinding>,
}

impl PhaseSpec {
    pub fn single(name: &str, unit: UnitTemplate) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            required: true,
            activation: Predicate::Always,
            work: PhaseWork::Single(unit),
            gates: Vec::new(),
            scores: Vec::new(),
        }
    }

    pub fn fan_out(name: &str, units: Vec<UnitTemplate>) -> Self {
        Self {
            work: PhaseWork::FanOut {
                units,
                policy: JoinPolicy::All,
            },
            ..Self::single(name, UnitTemplate::new(name))
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn when(mut self, activation: Predicate) -> Self {
        self.activation = activation;
        self
    }

    /// Set the join policy. No effect on single-unit phases.
    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        if let PhaseWork::FanOut { policy: current, .. } = &mut self.work {
            *current = policy;
        }
        self
    }

    pub fn with_gate(mut self, gate: GateSpec) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn with_score(mut self, component: &str, pointer: &str) -> Self {
        self.scores.push(ScoreBinding {
            component: component.to_string(),
            pointer: pointer.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    pub name: String,
    pub description: String,
    pub phases: Vec<PhaseSpec>,
    pub score_weights: BTreeMap<String, f64>,
    pub verdicts: VerdictTable,
}

impl ProcessDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            phases: Vec::new(),
            score_weights: BTreeMap::new(),
            verdicts: VerdictTable::default(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_phase(mut self, phase: PhaseSpec) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn with_weight(mut self, component: &str, weight: f64) -> Self {
        self.score_weights.insert(component.to_string(), weight);
        self
    }

    pub fn with_verdicts(mut self, verdicts: VerdictTable) -> Self {
        self.verdicts = verdicts;
        self
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn weight(&self, component: &str) -> Option<f64> {
        self.score_weights.get(component).copied()
    }

    /// Warn (never fail) when the weight table does not sum to 1.0.
    pub fn weight_warning(&self, tolerance: f64) -> Option<String> {
        if self.score_weights.is_empty() {
            return None;
        }
        weight_mismatch(self.score_weights.values().sum(), tolerance)
    }

    /// Static checks run before any phase executes.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut all = HashSet::new();
        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(DefinitionError::EmptyPhaseName);
            }
            if !all.insert(phase.name.as_str()) {
                return Err(DefinitionError::DuplicatePhase {
                    phase: phase.name.clone(),
                });
            }
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for phase in &self.phases {
            self.validate_phase(phase, &all, &earlier)?;
            earlier.insert(phase.name.as_str());
        }
        Ok(())
    }

    fn validate_phase(
        &self,
        phase: &PhaseSpec,
        all: &HashSet<&str>,
        earlier: &HashSet<&str>,
    ) -> Result<(), DefinitionError> {
        let units = phase.work.units();
        if phase.work.is_fan_out() && units.is_empty() {
            return Err(DefinitionError::EmptyFanOut {
                phase: phase.name.clone(),
            });
        }

        let mut unit_names = HashSet::new();
        for unit in units {
            if !unit_names.insert(unit.name.as_str()) {
                return Err(DefinitionError::DuplicateUnit {
                    phase: phase.name.clone(),
                    unit: unit.name.clone(),
                });
            }
            for pointer in unit.bind.values() {
                check_pointer(&phase.name, pointer)?;
                if let Some(referenced) = phase_in_pointer(pointer) {
                    check_reference(&phase.name, &referenced, all, earlier, false)?;
                }
            }
        }

        check_predicate(&phase.name, &phase.activation, all, earlier, false)?;

        let mut gate_names = HashSet::new();
        for gate in &phase.gates {
            if !gate_names.insert(gate.name.as_str()) {
                return Err(DefinitionError::DuplicateGate {
                    phase: phase.name.clone(),
                    gate: gate.name.clone(),
                });
            }
            check_predicate(&phase.name, &gate.trigger, all, earlier, true)?;
        }

        for binding in &phase.scores {
            if !self.score_weights.contains_key(&binding.component) {
                return Err(DefinitionError::UnknownScoreComponent {
                    phase: phase.name.clone(),
                    component: binding.component.clone(),
                });
            }
            check_pointer(&phase.name, &binding.pointer)?;
        }
        Ok(())
    }
}

fn check_pointer(phase: &str, pointer: &str) -> Result<(), DefinitionError> {
    if is_valid_pointer(pointer) {
        Ok(())
    } else {
        Err(DefinitionError::InvalidPointer {
            phase: phase.to_string(),
            pointer: pointer.to_string(),
        })
    }
}

fn check_predicate(
    phase: &str,
    predicate: &Predicate,
    all: &HashSet<&str>,
    earlier: &HashSet<&str>,
    allow_self: bool,
) -> Result<(), DefinitionError> {
    for pointer in predicate.pointers() {
        check_pointer(phase, pointer)?;
    }
    for referenced in predicate.referenced_phases() {
        check_reference(phase, &referenced, all, earlier, allow_self)?;
    }
    Ok(())
}

fn check_reference(
    phase: &str,
    referenced: &str,
    all: &HashSet<&str>,
    earlier: &HashSet<&str>,
    allow_self: bool,
) -> Result<(), DefinitionError> {
    if earlier.contains(referenced) || (allow_self && referenced == phase) {
        return Ok(());
    }
    if all.contains(referenced) {
        Err(DefinitionError::ForwardReference {
            phase: phase.to_string(),
            referenced: referenced.to_string(),
        })
    } else {
        Err(DefinitionError::UnknownPhase {
            phase: phase.to_string(),
            referenced: referenced.to_string(),
        })
    }
}
