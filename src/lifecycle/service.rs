//! Service root.
//!
//! # Responsibilities
//! - Own the route table, cache coordinator, component factory and refresh scheduler
//! - Run one request: route → assemble → consult cache → execute → store
//! - Swap configuration atomically on reload
//!
//! # Design Decisions
//! - The coordinator is injected, never looked up by name at request time
//! - Route table and config sit behind `ArcSwap`; requests see one consistent snapshot
//! - Cache failures degrade to recompute, never to a failed request
//! - A failed stage aborts the request and nothing is stored

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::coordinator::{CacheCoordinator, FreshValidity, InMemoryCoordinator, Resolution, RevalidationError};
use crate::cache::key::CacheKey;
use crate::cache::refresh::{Producer, ProducerError, RefreshError, RefreshScheduler};
use crate::cache::store::Artifact;
use crate::cache::validity::ValidityDescriptor;
use crate::config::loader::ConfigError;
use crate::config::schema::CoreConfig;
use crate::config::validation::validate_config;
use crate::config::watcher::ConfigWatcher;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::pipeline::assembler::{PipelineError, ProcessingPipeline};
use crate::pipeline::component::ProcessingContext;
use crate::pipeline::factory::{build_pipeline, ComponentFactory};
use crate::routing::router::{PatternError, Route, Router};

/// An inbound request: a normalized URI plus request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub uri: String,
    pub params: BTreeMap<String, String>,
}

impl Request {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// How the cache took part in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Caching disabled for the route, or a stage was uncacheable.
    Bypass,
}

/// Metadata about a written response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub route: String,
    pub mime_type: String,
    pub content_length: Option<u64>,
    pub bytes_written: u64,
    pub cache: CacheStatus,
    pub request_id: Uuid,
}

/// Errors surfaced by the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("output failed: {0}")]
    Io(#[from] io::Error),

    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("no route matches '{0}'")]
    NoRoute(String),

    #[error("response for '{0}' is not cacheable")]
    NotCacheable(String),

    #[error("pipeline service is shut down")]
    ShutDown,
}

/// A request resolved to a ready-to-run pipeline.
struct Prepared {
    route: Arc<Route>,
    ctx: ProcessingContext,
    pipeline: ProcessingPipeline,
    key: Option<CacheKey>,
}

/// The request-processing core.
pub struct PipelineService {
    router: ArcSwap<Router>,
    config: ArcSwap<CoreConfig>,
    cache: Arc<dyn CacheCoordinator>,
    factory: Arc<dyn ComponentFactory>,
    refresh: RefreshScheduler,
    shutdown: Arc<Shutdown>,
}

impl PipelineService {
    /// Build a service around an existing coordinator.
    pub fn new(
        config: CoreConfig,
        factory: Arc<dyn ComponentFactory>,
        cache: Arc<dyn CacheCoordinator>,
    ) -> Result<Self, ServiceError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let router = Router::new(&config.routes)?;
        let shutdown = Arc::new(Shutdown::new());
        let refresh = RefreshScheduler::new(Arc::clone(&cache), Arc::clone(&shutdown), config.refresh.jitter_ratio);

        Ok(Self {
            router: ArcSwap::from_pointee(router),
            config: ArcSwap::from_pointee(config),
            cache,
            factory,
            refresh,
            shutdown,
        })
    }

    /// Build the service with an in-memory coordinator and start metrics export
    /// when enabled.
    pub fn start(config: CoreConfig, factory: Arc<dyn ComponentFactory>) -> Result<Arc<Self>, ServiceError> {
        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse::<SocketAddr>() {
                Ok(addr) => {
                    if let Err(e) = metrics::init_metrics(addr) {
                        tracing::error!(error = %e, "Failed to start metrics exporter");
                    }
                }
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        let cache: Arc<dyn CacheCoordinator> = Arc::new(InMemoryCoordinator::new(&config.cache));
        let service = Self::new(config, factory, cache)?;

        let router = service.router.load();
        tracing::info!(routes = router.len(), "Pipeline service started");
        drop(router);
        Ok(Arc::new(service))
    }

    pub fn cache(&self) -> &Arc<dyn CacheCoordinator> {
        &self.cache
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.load_full()
    }

    pub fn config(&self) -> Arc<CoreConfig> {
        self.config.load_full()
    }

    pub fn refresh_scheduler(&self) -> &RefreshScheduler {
        &self.refresh
    }

    /// Process one request into `out`. `Ok(None)` when no route matches.
    pub fn handle(&self, request: &Request, out: &mut dyn Write) -> Result<Option<ResponseInfo>, ServiceError> {
        let span = tracing::info_span!("request", uri = %request.uri, request_id = tracing::field::Empty);
        let _enter = span.enter();
        let started = Instant::now();

        let Some(prepared) = self.prepare(request)? else {
            tracing::debug!("No route matched");
            return Ok(None);
        };
        let Prepared {
            route,
            ctx,
            mut pipeline,
            key,
        } = prepared;
        span.record("request_id", tracing::field::display(ctx.request_id()));

        let mime_type = pipeline.mime_type().unwrap_or("application/octet-stream").to_string();
        let mut info = ResponseInfo {
            route: route.name().to_string(),
            mime_type,
            content_length: None,
            bytes_written: 0,
            cache: CacheStatus::Bypass,
            request_id: ctx.request_id(),
        };

        match key {
            None => {
                let outcome = pipeline.process(&ctx, out)?;
                info.content_length = outcome.content_length;
                info.bytes_written = outcome.bytes_written;
            }
            Some(key) => {
                let resolution = {
                    let provider = || -> Result<ValidityDescriptor, RevalidationError> {
                        pipeline.validity().ok_or(RevalidationError::NotCacheable)
                    };
                    self.cache.resolve(&key, &provider)
                };

                match resolution {
                    Resolution::UseCached(artifact) => {
                        out.write_all(artifact.content())?;
                        out.flush()?;
                        info.mime_type = artifact.mime_type().to_string();
                        info.content_length = Some(artifact.len() as u64);
                        info.bytes_written = artifact.len() as u64;
                        info.cache = CacheStatus::Hit;
                    }
                    Resolution::Recompute(fresh) => {
                        let mut tee = TeeWriter::new(out);
                        let outcome = pipeline.process(&ctx, &mut tee)?;
                        info.content_length = outcome.content_length;
                        info.bytes_written = outcome.bytes_written;
                        info.cache = CacheStatus::Miss;

                        let validity = match fresh {
                            FreshValidity::Fetched(validity) => Some(validity),
                            FreshValidity::NotFetched | FreshValidity::Unavailable => pipeline.validity(),
                        };
                        if let Some(validity) = validity {
                            let artifact = Artifact::new(tee.into_captured(), info.mime_type.clone());
                            if let Err(e) = self.cache.store(key, validity, artifact) {
                                tracing::warn!(error = %e, "Response served but not cached");
                            }
                        }
                    }
                }
            }
        }

        metrics::record_execution(route.name(), started.elapsed());
        tracing::debug!(
            route = %info.route,
            cache = ?info.cache,
            bytes = info.bytes_written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request processed"
        );
        Ok(Some(info))
    }

    fn prepare(&self, request: &Request) -> Result<Option<Prepared>, ServiceError> {
        let router = self.router.load();
        let Some(matched) = router.route(&request.uri) else {
            return Ok(None);
        };
        let route = Arc::clone(&matched.route);
        let config = route.config();

        let branch = config
            .branches
            .iter()
            .find(|b| request.params.get(&b.parameter) == Some(&b.equals));
        let pipeline_config = match branch {
            Some(branch) => config.pipeline.overlay(&branch.pipeline),
            None => config.pipeline.clone(),
        };

        let ctx = ProcessingContext::new(request.uri.clone(), matched.captures.clone(), request.params.clone());
        let mut pipeline = build_pipeline(self.factory.as_ref(), &pipeline_config, &ctx, config.output)?;
        if !config.branches.is_empty() {
            pipeline.inform_branch_point();
        }
        pipeline.setup(&ctx)?;

        let cacheable = config.cacheable && self.config.load().cache.enabled;
        let key = if cacheable && pipeline.validity().is_some() {
            let mut builder = CacheKey::builder(route.name())
                .captures(&matched.captures)
                .params(&config.cache_params, &request.params)
                .components(pipeline.cache_key_material());
            if pipeline.is_branch_sensitive() {
                builder = builder.branch(branch.map(|b| b.label()).unwrap_or_else(|| "default".to_string()));
            }
            Some(builder.build())
        } else {
            None
        };

        Ok(Some(Prepared {
            route,
            ctx,
            pipeline,
            key,
        }))
    }

    /// Run a request to completion in memory, for refresh jobs.
    fn produce(&self, request: &Request) -> Result<(ValidityDescriptor, Artifact), ProducerError> {
        let Prepared { ctx, mut pipeline, .. } = self
            .prepare(request)?
            .ok_or_else(|| ServiceError::NoRoute(request.uri.clone()))?;
        let validity = pipeline
            .validity()
            .ok_or_else(|| ServiceError::NotCacheable(request.uri.clone()))?;
        let mime_type = pipeline.mime_type().unwrap_or("application/octet-stream").to_string();
        let body = pipeline.process_to_bytes(&ctx)?;
        Ok((validity, Artifact::new(body, mime_type)))
    }

    /// Keep the cached response for `request` fresh by recomputing it every `ttl`.
    ///
    /// Returns the key being refreshed. Must be called within a tokio runtime.
    pub fn schedule_refresh(self: &Arc<Self>, request: Request, ttl: Duration) -> Result<CacheKey, ServiceError> {
        let prepared = self
            .prepare(&request)?
            .ok_or_else(|| ServiceError::NoRoute(request.uri.clone()))?;
        let key = prepared
            .key
            .ok_or_else(|| ServiceError::NotCacheable(request.uri.clone()))?;

        let service = Arc::downgrade(self);
        let producer: Producer = Arc::new(move || -> Result<(ValidityDescriptor, Artifact), ProducerError> {
            let service = service.upgrade().ok_or("pipeline service stopped")?;
            service.produce(&request)
        });

        self.refresh.schedule(key.clone(), producer, ttl)?;
        Ok(key)
    }

    /// Replace the running configuration.
    ///
    /// Clears the cache and cancels every scheduled refresh: keys derived
    /// under the old route table no longer name what the new one renders.
    pub fn apply_config(&self, config: CoreConfig) -> Result<(), ServiceError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let router = Router::new(&config.routes)?;
        let routes = router.len();

        self.router.store(Arc::new(router));
        self.config.store(Arc::new(config));
        let cancelled = self.refresh.cancel_all();
        let cleared = self.cache.clear();

        tracing::info!(routes, cleared, cancelled, "Configuration applied");
        Ok(())
    }

    /// Watch a config file and apply every valid change until shutdown.
    ///
    /// The returned watcher must be kept alive.
    pub fn watch_config(self: &Arc<Self>, path: &Path) -> Result<RecommendedWatcher, ServiceError> {
        let mut shutdown = self.shutdown.subscribe();
        if self.shutdown.is_triggered() {
            return Err(ServiceError::ShutDown);
        }

        let (watcher, mut updates) = ConfigWatcher::new(path);
        let handle = watcher.run()?;

        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => {
                        let Some(config) = update else { break };
                        let Some(service) = service.upgrade() else { break };
                        if let Err(e) = service.apply_config(config) {
                            tracing::error!(error = %e, "Reloaded config rejected, keeping current configuration");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!("Config reload task stopped");
        });

        Ok(handle)
    }

    /// Stop refresh jobs and the reload task.
    pub fn shutdown(&self) {
        tracing::info!(refresh_jobs = self.refresh.active_jobs(), "Pipeline service shutting down");
        self.shutdown.trigger();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("routes", &self.router.load().names())
            .field("cache_entries", &self.cache.len())
            .field("shut_down", &self.shutdown.is_triggered())
            .finish()
    }
}

/// Writes through to the response while keeping a copy for the cache.
struct TeeWriter<'a> {
    out: &'a mut dyn Write,
    captured: Vec<u8>,
}

impl<'a> TeeWriter<'a> {
    fn new(out: &'a mut dyn Write) -> Self {
        Self {
            out,
            captured: Vec::new(),
        }
    }

    fn into_captured(self) -> Vec<u8> {
        self.captured
    }
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        self.captured.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
