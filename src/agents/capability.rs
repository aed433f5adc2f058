//! Capabilities (tools) and the lazily resolving proxy agents hold for them
//!
//! An agent is built with one [`CapabilityProxy`] per configured tool name.
//! The proxy does not touch the underlying capability until first use, then
//! resolves it through a resolver closure with bounded exponential backoff
//! and caches the handle for the life of the instance.

use crate::error::{HubError, HubResult};
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// A callable tool or external dependency
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, args: Value) -> HubResult<Value>;
}

/// Where capabilities come from.
///
/// `resolve` returns [`HubError::DependencyNotReady`] while a capability is
/// still initializing elsewhere; the proxy retries on that error only.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    async fn resolve(&self, name: &str) -> HubResult<Arc<dyn Capability>>;
}

/// Bounded exponential backoff for capability resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Tool description handed to the model collaborator
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

type ResolveFuture = Pin<Box<dyn Future<Output = HubResult<Arc<dyn Capability>>> + Send>>;
type Resolver = Arc<dyn Fn() -> ResolveFuture + Send + Sync>;

/// Lazy handle to a capability: resolver closure plus cached result.
/// Clones share the cache.
#[derive(Clone)]
pub struct CapabilityProxy {
    name: String,
    resolver: Resolver,
    cached: Arc<OnceCell<Arc<dyn Capability>>>,
    retry: RetryPolicy,
}

impl CapabilityProxy {
    pub fn new<F, Fut>(name: &str, retry: RetryPolicy, resolver: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HubResult<Arc<dyn Capability>>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            resolver: Arc::new(move || Box::pin(resolver()) as ResolveFuture),
            cached: Arc::new(OnceCell::new()),
            retry,
        }
    }

    /// Proxy that resolves `name` from `source` on first use
    pub fn from_source(name: &str, source: Arc<dyn CapabilitySource>, retry: RetryPolicy) -> Self {
        let target = name.to_string();
        Self::new(name, retry, move || {
            let source = source.clone();
            let target = target.clone();
            async move { source.resolve(&target).await }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_resolved(&self) -> bool {
        self.cached.initialized()
    }

    /// Resolve (once) and return the underlying capability
    pub async fn handle(&self) -> HubResult<Arc<dyn Capability>> {
        self.cached
            .get_or_try_init(|| self.resolve_with_retry())
            .await
            .map(Arc::clone)
    }

    pub async fn invoke(&self, args: Value) -> HubResult<Value> {
        let capability = self.handle().await?;
        capability.invoke(args).await
    }

    pub async fn descriptor(&self) -> HubResult<ToolDescriptor> {
        let capability = self.handle().await?;
        Ok(ToolDescriptor {
            name: capability.name().to_string(),
            description: capability.description().to_string(),
            parameters: capability.parameters(),
        })
    }

    async fn resolve_with_retry(&self) -> HubResult<Arc<dyn Capability>> {
        let mut last_reason = String::new();
        for attempt in 1..=self.retry.attempts {
            match (self.resolver)().await {
                Ok(capability) => {
                    if attempt > 1 {
                        log::info!(
                            "[Capability] {} resolved on attempt {}",
                            self.name,
                            attempt
                        );
                    }
                    return Ok(capability);
                }
                Err(HubError::DependencyNotReady { reason, .. }) => {
                    last_reason = reason;
                }
                Err(other) => return Err(other),
            }

            if attempt < self.retry.attempts {
                let delay = self.retry.backoff_after(attempt);
                log::debug!(
                    "[Capability] {} not ready (attempt {}), retrying in {:?}",
                    self.name,
                    attempt,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(HubError::DependencyNotReady {
            name: self.name.clone(),
            attempts: self.retry.attempts,
            reason: last_reason,
        })
    }
}

impl std::fmt::Debug for CapabilityProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProxy")
            .field("name", &self.name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

enum Slot {
    Pending,
    Ready(Arc<dyn Capability>),
}

/// In-process capability source. Names may be declared before the
/// capability behind them is ready.
pub struct CapabilityRegistry {
    slots: DashMap<String, Slot>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Registry preloaded with the builtin tools
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(CurrentDateTool));
        registry
    }

    /// Register (or fulfil a pending) capability under its own name
    pub fn register(&self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        log::debug!("[Capability] registered {}", name);
        self.slots.insert(name, Slot::Ready(capability));
    }

    /// Announce a name whose capability is still initializing
    pub fn declare_pending(&self, name: &str) {
        self.slots
            .entry(name.to_string())
            .or_insert(Slot::Pending);
    }

    pub fn is_ready(&self, name: &str) -> bool {
        matches!(self.slots.get(name).as_deref(), Some(Slot::Ready(_)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilitySource for CapabilityRegistry {
    fn exists(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    async fn resolve(&self, name: &str) -> HubResult<Arc<dyn Capability>> {
        match self.slots.get(name).as_deref() {
            Some(Slot::Ready(capability)) => Ok(capability.clone()),
            Some(Slot::Pending) => Err(HubError::DependencyNotReady {
                name: name.to_string(),
                attempts: 1,
                reason: "still initializing".to_string(),
            }),
            None => Err(HubError::NotFound(format!("Capability not found: {}", name))),
        }
    }
}

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Builtin tool returning the current local date and time
pub struct CurrentDateTool;

#[async_trait]
impl Capability for CurrentDateTool {
    fn name(&self) -> &str {
        "current_date"
    }

    fn description(&self) -> &str {
        "Get the current local date and time"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": { "type": "string", "description": "strftime format string" }
            }
        })
    }

    async fn invoke(&self, args: Value) -> HubResult<Value> {
        let requested = args.get("format").and_then(|f| f.as_str());
        let format = match requested {
            Some(f) if !StrftimeItems::new(f).any(|item| matches!(item, Item::Error)) => f,
            Some(f) => {
                log::debug!("[Capability] invalid date format {:?}, using default", f);
                DEFAULT_DATE_FORMAT
            }
            None => DEFAULT_DATE_FORMAT,
        };
        Ok(Value::String(chrono::Local::now().format(format).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo args"
        }
        async fn invoke(&self, args: Value) -> HubResult<Value> {
            Ok(args)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_proxy_is_lazy_and_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let proxy = CapabilityProxy::new("echo", fast_retry(), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(Arc::new(Echo) as Arc<dyn Capability>) }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!proxy.is_resolved());

        let out = proxy.invoke(json!({ "x": 1 })).await.unwrap();
        assert_eq!(out, json!({ "x": 1 }));
        proxy.invoke(json!({})).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(proxy.is_resolved());
    }

    #[tokio::test]
    async fn test_proxy_retries_until_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let proxy = CapabilityProxy::new("echo", fast_retry(), move || {
            let n = counted.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HubError::DependencyNotReady {
                        name: "echo".into(),
                        attempts: 1,
                        reason: "warming up".into(),
                    })
                } else {
                    Ok(Arc::new(Echo) as Arc<dyn Capability>)
                }
            }
        });

        assert!(proxy.handle().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_proxy_gives_up_after_attempts() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.declare_pending("slow");
        let proxy = CapabilityProxy::from_source("slow", registry, fast_retry());

        match proxy.handle().await {
            Err(HubError::DependencyNotReady { attempts, reason, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, "still initializing");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(!proxy.is_resolved());
    }

    #[tokio::test]
    async fn test_pending_then_fulfilled() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.declare_pending("echo");
        let proxy = CapabilityProxy::from_source(
            "echo",
            registry.clone(),
            RetryPolicy::new(5, Duration::from_millis(20)),
        );

        let fulfil = {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(25)).await;
                registry.register(Arc::new(Echo));
            })
        };

        assert!(proxy.handle().await.is_ok());
        fulfil.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_capability_fails_without_retry() {
        let registry = Arc::new(CapabilityRegistry::new());
        assert!(!registry.exists("nope"));
        let proxy = CapabilityProxy::from_source("nope", registry, fast_retry());
        assert!(proxy.handle().await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_current_date_tool() {
        let registry = CapabilityRegistry::with_builtins();
        assert!(registry.is_ready("current_date"));
        let tool = registry.resolve("current_date").await.unwrap();

        let year = tool.invoke(json!({ "format": "%Y" })).await.unwrap();
        assert_eq!(year.as_str().unwrap().len(), 4);

        let fallback = tool.invoke(json!({ "format": "%Q" })).await.unwrap();
        assert_eq!(fallback.as_str().unwrap().len(), 19);
    }
}
