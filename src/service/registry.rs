//! Service registry: the one string-keyed locator for pluggable units.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::controller::completion::CompletionController;
use crate::controller::dice::DiceController;
use crate::controller::echo::EchoController;
use crate::controller::session::SessionController;
use crate::controller::token::TokenController;
use crate::controller::user::UserController;
use crate::error::{Error, NotFoundError, Result, TimeoutError};
use crate::filter::command::CommandFilter;
use crate::filter::message::MessageFilter;
use crate::filter::shell::ShellFilter;
use crate::filter::user::UserFilter;
use crate::listener::cli::CliListener;
use crate::listener::loopback::LoopbackListener;
use crate::parser::args::ArgsParser;
use crate::parser::echo::EchoParser;
use crate::parser::json::JsonParser;
use crate::parser::regex::RegexParser;
use crate::parser::split::SplitParser;
use crate::service::{ServiceDefinition, ServiceDeps, ServiceEvent, ServiceHandle, ServiceLookup};
use crate::transform::flatten::FlattenTransform;
use crate::transform::shell::ShellTransform;
use crate::transform::template::TemplateTransform;

/// Builds one service from its definition.
pub type ServiceFactory = Arc<
    dyn Fn(ServiceDefinition, ServiceDeps) -> BoxFuture<'static, Result<ServiceHandle>>
        + Send
        + Sync,
>;

/// Wrap an async constructor as a [`ServiceFactory`].
pub fn factory<F, Fut>(build: F) -> ServiceFactory
where
    F: Fn(ServiceDefinition, ServiceDeps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceHandle>> + Send + 'static,
{
    Arc::new(move |def, deps| Box::pin(build(def, deps)))
}

/// Factories for every built-in kind.
pub fn builtin_factories() -> HashMap<String, ServiceFactory> {
    let entries: Vec<(&str, ServiceFactory)> = vec![
        // parsers
        ("echo-parser", factory(|def, deps| async move {
            Ok(ServiceHandle::Parser(Arc::new(EchoParser::new(&def, &deps)?)))
        })),
        ("split-parser", factory(|def, deps| async move {
            Ok(ServiceHandle::Parser(Arc::new(SplitParser::new(&def, &deps)?)))
        })),
        ("args-parser", factory(|def, deps| async move {
            Ok(ServiceHandle::Parser(Arc::new(ArgsParser::new(&def, &deps)?)))
        })),
        ("json-parser", factory(|def, deps| async move {
            Ok(ServiceHandle::Parser(Arc::new(JsonParser::new(&def, &deps)?)))
        })),
        ("regex-parser", factory(|def, deps| async move {
            Ok(ServiceHandle::Parser(Arc::new(RegexParser::new(&def, &deps)?)))
        })),
        // filters
        ("command-filter", factory(|def, _deps| async move {
            Ok(ServiceHandle::Filter(Arc::new(CommandFilter::new(&def)?)))
        })),
        ("message-filter", factory(|def, _deps| async move {
            Ok(ServiceHandle::Filter(Arc::new(MessageFilter::new(&def)?)))
        })),
        ("user-filter", factory(|def, _deps| async move {
            Ok(ServiceHandle::Filter(Arc::new(UserFilter::new(&def)?)))
        })),
        ("shell-filter", factory(|def, _deps| async move {
            Ok(ServiceHandle::Filter(Arc::new(ShellFilter::new(&def)?)))
        })),
        // transforms
        ("flatten-transform", factory(|def, deps| async move {
            Ok(ServiceHandle::Transform(Arc::new(FlattenTransform::new(&def, &deps).await?)))
        })),
        ("template-transform", factory(|def, deps| async move {
            Ok(ServiceHandle::Transform(Arc::new(TemplateTransform::new(&def, &deps).await?)))
        })),
        ("shell-transform", factory(|def, deps| async move {
            Ok(ServiceHandle::Transform(Arc::new(ShellTransform::new(&def, &deps).await?)))
        })),
        // controllers
        ("dice-controller", factory(|def, deps| async move {
            Ok(ServiceHandle::Controller(Arc::new(DiceController::new(&def, &deps).await?)))
        })),
        ("echo-controller", factory(|def, deps| async move {
            Ok(ServiceHandle::Controller(Arc::new(EchoController::new(&def, &deps).await?)))
        })),
        ("completion-controller", factory(|def, deps| async move {
            Ok(ServiceHandle::Controller(Arc::new(CompletionController::new(&def, &deps).await?)))
        })),
        ("token-controller", factory(|def, deps| async move {
            Ok(ServiceHandle::Controller(Arc::new(TokenController::new(&def, &deps).await?)))
        })),
        ("session-controller", factory(|def, deps| async move {
            Ok(ServiceHandle::Controller(Arc::new(SessionController::new(&def, &deps).await?)))
        })),
        ("user-controller", factory(|def, deps| async move {
            Ok(ServiceHandle::Controller(Arc::new(UserController::new(&def, &deps).await?)))
        })),
        // listeners
        ("loopback-listener", factory(|def, deps| async move {
            Ok(ServiceHandle::Listener(Arc::new(LoopbackListener::new(&def, &deps)?)))
        })),
        ("cli-listener", factory(|def, deps| async move {
            Ok(ServiceHandle::Listener(Arc::new(CliListener::new(&def, &deps)?)))
        })),
    ];

    entries
        .into_iter()
        .map(|(kind, factory)| (kind.to_string(), factory))
        .collect()
}

/// Registry of live services keyed by `kind:name`.
///
/// At most one instance exists per tag: concurrent `create_service` calls
/// for the same tag share a single construction.
pub struct ServiceRegistry {
    deps: ServiceDeps,
    factories: RwLock<HashMap<String, ServiceFactory>>,
    services: Mutex<HashMap<String, Arc<OnceCell<ServiceHandle>>>>,
    timeout: Duration,
    stopped: AtomicBool,
}

impl ServiceRegistry {
    /// Create a registry. `deps.registry` is replaced with a back-reference
    /// to the new registry.
    pub fn new(
        deps: ServiceDeps,
        factories: HashMap<String, ServiceFactory>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|registry| Self {
            deps: ServiceDeps {
                registry: registry.clone(),
                ..deps
            },
            factories: RwLock::new(factories),
            services: Mutex::new(HashMap::new()),
            timeout,
            stopped: AtomicBool::new(false),
        })
    }

    /// Registry with every built-in kind.
    pub fn with_builtins(deps: ServiceDeps, timeout: Duration) -> Arc<Self> {
        Self::new(deps, builtin_factories(), timeout)
    }

    /// Add or replace the factory for `kind`.
    pub async fn register_factory(&self, kind: impl Into<String>, factory: ServiceFactory) {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "Registered service factory");
        self.factories.write().await.insert(kind, factory);
    }

    pub fn deps(&self) -> &ServiceDeps {
        &self.deps
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Create the service for `def`, or return the live instance with the
    /// same tag.
    pub async fn create_service(&self, def: ServiceDefinition) -> Result<ServiceHandle> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }

        let tag = def.tag();
        let factory = self
            .factories
            .read()
            .await
            .get(&def.kind)
            .cloned()
            .ok_or_else(|| NotFoundError::new("service kind", &def.kind))?;

        let cell = Arc::clone(self.services.lock().await.entry(tag.clone()).or_default());

        let deps = self.deps.clone();
        let timeout = self.timeout;
        let init_tag = tag.clone();
        let result = cell
            .get_or_try_init(|| async move {
                tracing::debug!(tag = %init_tag, "Creating service");
                match tokio::time::timeout(timeout, factory(def, deps)).await {
                    Ok(result) => result,
                    Err(_) => Err(TimeoutError {
                        operation: format!("create service {init_tag}"),
                        timeout,
                    }
                    .into()),
                }
            })
            .await;

        match result {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                tracing::warn!(tag = %tag, error = %e, "Service creation failed");
                let mut services = self.services.lock().await;
                if let Some(existing) = services.get(&tag)
                    && Arc::ptr_eq(existing, &cell)
                    && !cell.initialized()
                {
                    services.remove(&tag);
                }
                Err(e)
            }
        }
    }

    /// Find a live service by id or tag.
    pub async fn get_service(
        &self,
        lookup: &ServiceLookup,
    ) -> std::result::Result<ServiceHandle, NotFoundError> {
        let services = self.services.lock().await;
        let found = match lookup {
            ServiceLookup::Tag { kind, name } => services
                .get(&super::service_tag(kind, name))
                .and_then(|cell| cell.get())
                .cloned(),
            ServiceLookup::Id(id) => services
                .values()
                .filter_map(|cell| cell.get())
                .find(|handle| handle.metadata().id == *id)
                .cloned(),
        };
        found.ok_or_else(|| NotFoundError::new("service", lookup))
    }

    /// All live services.
    pub async fn services(&self) -> Vec<ServiceHandle> {
        self.services
            .lock()
            .await
            .values()
            .filter_map(|cell| cell.get())
            .cloned()
            .collect()
    }

    /// Broadcast a lifecycle event. Failures are logged, never propagated.
    pub async fn notify(&self, event: ServiceEvent) {
        for handle in self.services().await {
            if let Err(e) = handle.notify(event).await {
                tracing::warn!(
                    tag = %handle.metadata().tag(),
                    event = %event,
                    error = %e,
                    "Service failed to handle event"
                );
            }
        }
    }

    /// Notify every service to stop and drop them. Later creation fails
    /// with `Error::Stopped`.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify(ServiceEvent::Stop).await;
        let count = {
            let mut services = self.services.lock().await;
            let count = services.len();
            services.clear();
            count
        };
        tracing::info!(services = count, "Service registry stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::filter::{Filter, FilterBehavior, FilterValue};
    use crate::service::{Service, ServiceMetadata};

    struct StaticFilter {
        metadata: ServiceMetadata,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for StaticFilter {
        fn metadata(&self) -> &ServiceMetadata {
            &self.metadata
        }

        async fn notify(&self, event: ServiceEvent) -> Result<()> {
            if event == ServiceEvent::Stop {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Filter for StaticFilter {
        async fn check(&self, _value: FilterValue<'_>) -> Result<FilterBehavior> {
            Ok(FilterBehavior::Allow)
        }
    }

    fn counting_registry(
        timeout: Duration,
    ) -> (Arc<ServiceRegistry>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let mut factories = HashMap::new();
        let counter = Arc::clone(&builds);
        let stop_counter = Arc::clone(&stops);
        factories.insert(
            "static-filter".to_string(),
            factory(move |def, _deps| {
                let counter = Arc::clone(&counter);
                let stops = Arc::clone(&stop_counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(ServiceHandle::Filter(Arc::new(StaticFilter {
                        metadata: ServiceMetadata::from_definition(&def),
                        stops,
                    })))
                }
            }),
        );
        factories.insert(
            "slow-filter".to_string(),
            factory(|_def, _deps| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(Error::Stopped)
            }),
        );
        let registry = ServiceRegistry::new(ServiceDeps::in_memory(), factories, timeout);
        (registry, builds, stops)
    }

    fn def(kind: &str, name: &str) -> ServiceDefinition {
        ServiceDefinition::new(kind, name, json!({}))
    }

    #[tokio::test]
    async fn same_tag_returns_same_instance() {
        let (registry, builds, _) = counting_registry(Duration::from_secs(5));

        let (a, b) = tokio::join!(
            registry.create_service(def("static-filter", "one")),
            registry.create_service(def("static-filter", "one")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.ptr_eq(&b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let c = registry
            .create_service(def("static-filter", "one"))
            .await
            .unwrap();
        assert!(a.ptr_eq(&c));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let other = registry
            .create_service(def("static-filter", "two"))
            .await
            .unwrap();
        assert!(!a.ptr_eq(&other));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_kind_is_not_found() {
        let (registry, _, _) = counting_registry(Duration::from_secs(5));
        let err = registry
            .create_service(def("mystery", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(registry.services().await.is_empty());
    }

    #[tokio::test]
    async fn slow_construction_times_out() {
        let (registry, _, _) = counting_registry(Duration::from_millis(20));
        let err = registry
            .create_service(def("slow-filter", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(registry.services().await.is_empty());
    }

    #[tokio::test]
    async fn lookup_by_id_and_tag() {
        let (registry, _, _) = counting_registry(Duration::from_secs(5));
        let handle = registry
            .create_service(def("static-filter", "one"))
            .await
            .unwrap();

        let by_id = registry
            .get_service(&ServiceLookup::Id(handle.metadata().id))
            .await
            .unwrap();
        assert!(by_id.ptr_eq(&handle));

        let by_tag = registry
            .get_service(&ServiceLookup::Tag {
                kind: "static-filter".into(),
                name: "one".into(),
            })
            .await
            .unwrap();
        assert!(by_tag.ptr_eq(&handle));
        assert!(by_tag.as_filter().is_some());
        assert!(by_tag.as_parser().is_none());

        assert!(
            registry
                .get_service(&ServiceLookup::Id(uuid::Uuid::new_v4()))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn stop_notifies_and_rejects_new_services() {
        let (registry, _, stops) = counting_registry(Duration::from_secs(5));
        registry
            .create_service(def("static-filter", "one"))
            .await
            .unwrap();
        registry
            .create_service(def("static-filter", "two"))
            .await
            .unwrap();

        registry.stop().await;
        assert_eq!(stops.load(Ordering::SeqCst), 2);
        assert!(registry.services().await.is_empty());
        assert!(matches!(
            registry.create_service(def("static-filter", "one")).await,
            Err(Error::Stopped)
        ));
    }

    #[tokio::test]
    async fn builtins_cover_every_kind() {
        let factories = builtin_factories();
        for kind in [
            "echo-parser",
            "split-parser",
            "args-parser",
            "json-parser",
            "regex-parser",
            "command-filter",
            "message-filter",
            "user-filter",
            "shell-filter",
            "flatten-transform",
            "template-transform",
            "shell-transform",
            "dice-controller",
            "echo-controller",
            "completion-controller",
            "token-controller",
            "session-controller",
            "user-controller",
            "loopback-listener",
            "cli-listener",
        ] {
            assert!(factories.contains_key(kind), "missing {kind}");
        }
    }

    #[tokio::test]
    async fn deps_point_back_at_registry() {
        let registry =
            ServiceRegistry::with_builtins(ServiceDeps::in_memory(), Duration::from_secs(5));
        let back = registry.deps().registry().unwrap();
        assert!(Arc::ptr_eq(&back, &registry));
    }
}
