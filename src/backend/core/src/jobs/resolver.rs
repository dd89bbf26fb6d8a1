//! Handler resolution.
//!
//! A job names its handler by class; the [`HandlerResolver`] turns that name
//! into a fresh [`JobHandler`] instance which the job owns for the duration
//! of one invocation. [`HandlerRegistry`] is the stock resolver: a concurrent
//! map of class names to factories.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::job::{Job, JobError};
use super::payload::DEFAULT_METHOD;
use crate::error::{QueueError, Result};

/// Result type returned by handlers.
pub type HandlerResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// User code that performs a job's work.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run `method` for this job.
    ///
    /// The handler may call [`Job::delete`] or [`Job::release`] to decide how
    /// the message is finalized. Methods the handler does not know should be
    /// answered with [`JobError::unknown_method`].
    async fn handle(&self, method: &str, job: &mut Job, data: Value) -> HandlerResult;

    /// Whether the worker should delete the job after a successful run.
    fn auto_delete(&self) -> bool {
        false
    }
}

/// Turns a handler class name into a handler instance.
pub trait HandlerResolver: Send + Sync {
    /// # Errors
    ///
    /// `ResolutionFailed` when the class is unknown or cannot be built.
    fn resolve(&self, class: &str) -> Result<Box<dyn JobHandler>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Registry
// ═══════════════════════════════════════════════════════════════════════════════

type HandlerFactory = Arc<dyn Fn() -> Result<Box<dyn JobHandler>> + Send + Sync>;

/// Registry of handler factories keyed by class name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: Arc<DashMap<String, HandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler type built with `Default` for every job.
    pub fn register<H>(&self, class: impl Into<String>) -> &Self
    where
        H: JobHandler + Default + 'static,
    {
        self.register_factory(class, || Ok(Box::new(H::default()) as Box<dyn JobHandler>))
    }

    /// Register a handler that is cloned for every job.
    pub fn register_instance<H>(&self, class: impl Into<String>, handler: H) -> &Self
    where
        H: JobHandler + Clone + 'static,
    {
        self.register_factory(class, move || Ok(Box::new(handler.clone()) as Box<dyn JobHandler>))
    }

    /// Register a fallible factory.
    pub fn register_factory<F>(&self, class: impl Into<String>, factory: F) -> &Self
    where
        F: Fn() -> Result<Box<dyn JobHandler>> + Send + Sync + 'static,
    {
        let class = class.into();
        if self.factories.insert(class.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(handler = %class, "Replaced existing job handler registration");
        }
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, class: &str) -> Result<Box<dyn JobHandler>> {
        // Clone the factory out so the map shard is not locked while it runs.
        let factory = self
            .factories
            .get(class)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                QueueError::resolution_failed(class, "no handler registered under this name")
            })?;

        factory().map_err(|e| QueueError::resolution_failed(class, e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Closure Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// Adapts an async closure into a handler answering the default `fire` method.
///
/// ```rust,ignore
/// let handler = FnHandler::new(|job, _data| Box::pin(async move {
///     job.delete().await?;
///     Ok(())
/// }));
/// ```
pub struct FnHandler<F> {
    f: Arc<F>,
    auto_delete: bool,
}

impl<F> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Job, Value) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            auto_delete: false,
        }
    }

    /// Opt into deletion after a successful run.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }
}

impl<F> Clone for FnHandler<F> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
            auto_delete: self.auto_delete,
        }
    }
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Job, Value) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn handle(&self, method: &str, job: &mut Job, data: Value) -> HandlerResult {
        if method != DEFAULT_METHOD {
            return Err(JobError::unknown_method(method));
        }
        (self.f)(job, data).await
    }

    fn auto_delete(&self) -> bool {
        self.auto_delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[derive(Default, Clone)]
    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _method: &str, _job: &mut Job, _data: Value) -> HandlerResult {
            Ok(())
        }

        fn auto_delete(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_registry_resolves_registered_handler() {
        let registry = HandlerRegistry::new();
        registry.register::<Noop>("Noop");

        assert!(registry.contains("Noop"));
        let handler = registry.resolve("Noop").unwrap();
        assert!(handler.auto_delete());
    }

    #[test]
    fn test_registry_unknown_class() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve("Missing").err().unwrap();
        assert_eq!(err.code(), ErrorCode::ResolutionFailed);
        assert_eq!(err.details().handler.as_deref(), Some("Missing"));
    }

    #[test]
    fn test_registry_factory_failure_is_resolution_error() {
        let registry = HandlerRegistry::new();
        registry.register_factory("Broken", || Err(QueueError::internal("no database")));

        let err = registry.resolve("Broken").err().unwrap();
        assert_eq!(err.code(), ErrorCode::ResolutionFailed);
    }

    #[test]
    fn test_registry_names_sorted() {
        let registry = HandlerRegistry::new();
        registry
            .register::<Noop>("b")
            .register_instance("a", Noop)
            .register::<Noop>("c");

        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        assert_eq!(registry.len(), 3);
        assert!(!registry.is_empty());
    }
}
