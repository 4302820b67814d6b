use crate::core::Value;

/// Who is making the current change.
pub trait ActorProvider: Send + Sync {
    /// `None` outside an interactive context (scripts, background jobs).
    fn current_actor(&self) -> Option<Value>;
}

/// Non-interactive execution: changes are never attributed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActor;

impl ActorProvider for NoActor {
    fn current_actor(&self) -> Option<Value> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct FixedActor(pub Value);

impl ActorProvider for FixedActor {
    fn current_actor(&self) -> Option<Value> {
        Some(self.0.clone())
    }
}

impl<F> ActorProvider for F
where
    F: Fn() -> Option<Value> + Send + Sync,
{
    fn current_actor(&self) -> Option<Value> {
        self()
    }
}
