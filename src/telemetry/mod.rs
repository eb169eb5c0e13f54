//! Transition notifications for circuit breakers and instance health.
//!
//! Observers are a side channel only: they are invoked synchronously right after a
//! transition has been committed (and after internal locks are released), and nothing
//! they do can influence the breaker or the registry.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResilienceObserver`] | Trait for transition destinations |
//! | [`NoopObserver`] | Default, ignores everything |
//! | [`TracingObserver`] | Emits structured `tracing` events |
//! | [`RecordingObserver`] | Bounded in-memory log, handy in tests |
//! | [`CompositeObserver`] | Fans out to several observers |

use crate::registry::InstanceStatus;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub trait ResilienceObserver: Send + Sync {
    fn on_circuit_open(&self, _service: &str, _consecutive_failures: u32) {}

    fn on_circuit_half_open(&self, _service: &str) {}

    fn on_circuit_close(&self, _service: &str) {}

    fn on_instance_status_change(
        &self,
        _service: &str,
        _instance_id: &str,
        _previous: InstanceStatus,
        _current: InstanceStatus,
    ) {
    }
}

pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {}

pub fn noop_observer() -> Arc<dyn ResilienceObserver> {
    Arc::new(NoopObserver)
}

/// Logs every transition with structured fields.
pub struct TracingObserver;

impl ResilienceObserver for TracingObserver {
    fn on_circuit_open(&self, service: &str, consecutive_failures: u32) {
        warn!(service, consecutive_failures, "circuit breaker opened");
    }

    fn on_circuit_half_open(&self, service: &str) {
        info!(service, "circuit breaker half-open, admitting trial request");
    }

    fn on_circuit_close(&self, service: &str) {
        info!(service, "circuit breaker closed");
    }

    fn on_instance_status_change(
        &self,
        service: &str,
        instance_id: &str,
        previous: InstanceStatus,
        current: InstanceStatus,
    ) {
        if current == InstanceStatus::Inactive {
            warn!(service, instance_id, %previous, %current, "instance became inactive");
        } else {
            info!(service, instance_id, %previous, %current, "instance status changed");
        }
    }
}

/// A recorded transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    CircuitOpen {
        service: String,
        consecutive_failures: u32,
    },
    CircuitHalfOpen {
        service: String,
    },
    CircuitClose {
        service: String,
    },
    InstanceStatus {
        service: String,
        instance_id: String,
        previous: InstanceStatus,
        current: InstanceStatus,
    },
}

/// In-memory observer for testing.
pub struct RecordingObserver {
    events: Mutex<Vec<TransitionEvent>>,
    max_events: usize,
}

impl RecordingObserver {
    pub fn new(max: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_events: max,
        }
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, event: TransitionEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event);
        if events.len() > self.max_events {
            events.remove(0);
        }
    }
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ResilienceObserver for RecordingObserver {
    fn on_circuit_open(&self, service: &str, consecutive_failures: u32) {
        self.push(TransitionEvent::CircuitOpen {
            service: service.to_string(),
            consecutive_failures,
        });
    }

    fn on_circuit_half_open(&self, service: &str) {
        self.push(TransitionEvent::CircuitHalfOpen {
            service: service.to_string(),
        });
    }

    fn on_circuit_close(&self, service: &str) {
        self.push(TransitionEvent::CircuitClose {
            service: service.to_string(),
        });
    }

    fn on_instance_status_change(
        &self,
        service: &str,
        instance_id: &str,
        previous: InstanceStatus,
        current: InstanceStatus,
    ) {
        self.push(TransitionEvent::InstanceStatus {
            service: service.to_string(),
            instance_id: instance_id.to_string(),
            previous,
            current,
        });
    }
}

/// Composite observer for multiple destinations.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ResilienceObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ResilienceObserver for CompositeObserver {
    fn on_circuit_open(&self, service: &str, consecutive_failures: u32) {
        for o in &self.observers {
            o.on_circuit_open(service, consecutive_failures);
        }
    }

    fn on_circuit_half_open(&self, service: &str) {
        for o in &self.observers {
            o.on_circuit_half_open(service);
        }
    }

    fn on_circuit_close(&self, service: &str) {
        for o in &self.observers {
            o.on_circuit_close(service);
        }
    }

    fn on_instance_status_change(
        &self,
        service: &str,
        instance_id: &str,
        previous: InstanceStatus,
        current: InstanceStatus,
    ) {
        for o in &self.observers {
            o.on_instance_status_change(service, instance_id, previous, current);
        }
    }
}
