//! # Procedure Registration
//!
//! A [`ProcedureMap`] is the worker side's table of callable names, selecting
//! a procedure body by name the same way a transport factory selects a
//! mechanism by name. Procedure bodies never see wire [`Value`]s; the
//! dispatcher unmarshals into [`Arg`] before invoking one and marshals its
//! result before replying.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::BridgeError;
use crate::value::Arg;

/// A single callable exposed by a worker. Procedure bodies are explicitly
/// out of scope for the bridge itself; this trait is the seam callers
/// implement their own domain logic against.
#[async_trait]
pub trait Procedure: Send + Sync {
    async fn call(&self, args: Vec<Arg>) -> Result<Arg, BridgeError>;
}

struct FnProcedure<F>(F);

#[async_trait]
impl<F, Fut> Procedure for FnProcedure<F>
where
    F: Fn(Vec<Arg>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arg, BridgeError>> + Send,
{
    async fn call(&self, args: Vec<Arg>) -> Result<Arg, BridgeError> {
        (self.0)(args).await
    }
}

/// The worker side's table of procedure names to bodies, looked up by the
/// dispatcher on every incoming `Function` envelope.
#[derive(Clone, Default)]
pub struct ProcedureMap {
    procedures: HashMap<String, Arc<dyn Procedure>>,
}

impl ProcedureMap {
    pub fn builder() -> ProcedureMapBuilder {
        ProcedureMapBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Procedure>> {
        self.procedures.get(name).cloned()
    }
}

/// Ergonomic closure-based registration for a [`ProcedureMap`]: a default
/// builder assembled field by field, here via chained `.on(..)` calls.
#[derive(Default)]
pub struct ProcedureMapBuilder {
    procedures: HashMap<String, Arc<dyn Procedure>>,
}

impl ProcedureMapBuilder {
    pub fn new() -> Self {
        ProcedureMapBuilder {
            procedures: HashMap::new(),
        }
    }

    /// Register a procedure body under `name`. Registering the same name
    /// twice replaces the earlier body; there is no conflict detection,
    /// matching the wire protocol's "unknown procedure is ignored, not
    /// rejected at registration time" posture.
    pub fn on<F, Fut>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arg, BridgeError>> + Send + 'static,
    {
        self.procedures
            .insert(name.into(), Arc::new(FnProcedure(body)));
        self
    }

    pub fn build(self) -> ProcedureMap {
        ProcedureMap {
            procedures: self.procedures,
        }
    }
}
