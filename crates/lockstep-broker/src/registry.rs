//! Simulator registry and subscription matching.
//!
//! Holds one record per admitted simulator. A record's position in the
//! registration order is its **ordinal**, stable for the process lifetime;
//! iteration always follows ordinal order so broadcasts and publish fan-out
//! are deterministic. A name index gives O(1) identity lookup alongside.

use std::collections::{BTreeSet, HashMap};

use lockstep_types::{SimId, SimTime};
use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("simulator '{0}' already connected")]
    DuplicateSimulator(SimId),

    #[error("simulator '{0}' is not connected")]
    UnknownSimulator(SimId),

    #[error("registration is closed ({0} simulators already admitted)")]
    RegistrationClosed(usize),
}

/// Per-simulator coordination state.
#[derive(Debug, Clone)]
pub struct SimulatorState {
    /// Identity string; matches the transport sender frame.
    pub name: SimId,
    /// The simulator's intrinsic tick. Strictly positive.
    pub time_delta: SimTime,
    /// The time the simulator last asked to advance to. `SimTime::MAX`
    /// after BYE.
    pub time_requested: SimTime,
    /// The most recent simulated time the simulator actually stepped to.
    /// Always a multiple of `time_delta`.
    pub time_last_processed: SimTime,
    /// True while a grant is outstanding.
    pub processing: bool,
    /// True iff at least one publish has been forwarded here since the
    /// simulator last stepped.
    pub messages_pending: bool,
    /// Exact-match subscription topics.
    pub subscriptions: BTreeSet<String>,
}

impl SimulatorState {
    fn new(name: SimId, time_delta: SimTime, subscriptions: BTreeSet<String>) -> SimulatorState {
        SimulatorState {
            name,
            time_delta,
            time_requested: SimTime::ZERO,
            time_last_processed: SimTime::ZERO,
            processing: false,
            messages_pending: false,
            subscriptions,
        }
    }
}

/// Ordinal-ordered simulator records plus a name index.
#[derive(Debug)]
pub struct Registry {
    capacity: usize,
    sims: Vec<SimulatorState>,
    index: HashMap<SimId, usize>,
}

impl Registry {
    /// `capacity` is the fixed number of simulators admitted before
    /// registration closes.
    pub fn new(capacity: usize) -> Registry {
        Registry {
            capacity,
            sims: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Admit a simulator and return its ordinal.
    pub fn register(
        &mut self,
        name: SimId,
        time_delta: SimTime,
        subscriptions: BTreeSet<String>,
    ) -> Result<usize, RegistryError> {
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateSimulator(name));
        }
        if self.sims.len() == self.capacity {
            return Err(RegistryError::RegistrationClosed(self.capacity));
        }
        let ordinal = self.sims.len();
        self.index.insert(name.clone(), ordinal);
        self.sims
            .push(SimulatorState::new(name, time_delta, subscriptions));
        Ok(ordinal)
    }

    pub fn get(&self, name: &SimId) -> Result<&SimulatorState, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.sims[i])
            .ok_or_else(|| RegistryError::UnknownSimulator(name.clone()))
    }

    pub fn get_mut(&mut self, name: &SimId) -> Result<&mut SimulatorState, RegistryError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.sims[i]),
            None => Err(RegistryError::UnknownSimulator(name.clone())),
        }
    }

    pub fn contains(&self, name: &SimId) -> bool {
        self.index.contains_key(name)
    }

    /// Update a simulator's tick in place.
    pub fn set_delta(&mut self, name: &SimId, delta: SimTime) -> Result<(), RegistryError> {
        self.get_mut(name)?.time_delta = delta;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sims.is_empty()
    }

    /// Whether registration has closed.
    pub fn is_full(&self) -> bool {
        self.sims.len() == self.capacity
    }

    /// Records in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &SimulatorState> {
        self.sims.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SimulatorState> {
        self.sims.iter_mut()
    }

    /// Registered names in ordinal order.
    pub fn names(&self) -> impl Iterator<Item = &SimId> {
        self.sims.iter().map(|s| &s.name)
    }

    /// Subscription matcher: records whose subscription set contains
    /// `topic`, in ordinal order. Exact match only, no wildcards.
    pub fn subscribers_mut<'a>(
        &'a mut self,
        topic: &'a str,
    ) -> impl Iterator<Item = &'a mut SimulatorState> + 'a {
        self.sims
            .iter_mut()
            .filter(move |s| s.subscriptions.contains(topic))
    }
}
