//! The platform: collaborators, the engine session and single-flight
//! construction of the filter engine.
//!
//! # Construction
//!
//! The first request moves the platform from `NotRequested` to
//! `Constructing` under the construction mutex and dispatches one
//! construction job to the executor. The job evaluates every bootstrap
//! source that has not been evaluated yet, then calls the script factory
//! with the filter engine parameters and a completion callback. Whichever
//! of "factory reported back" and "construction timed out" happens first
//! resolves the shared outcome; every requester observes that outcome.
//!
//! A failed construction stays failed until
//! [`Platform::reset_failed_filter_engine`] is called.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use blinder_engine::{EngineSession, EngineValue, WeakEngineSession};
use parking_lot::Mutex;
use scopeguard::ScopeGuard;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn};

use crate::bindings::{self, HostServices};
use crate::collaborators::{
    DefaultFileSystem, DefaultTimer, DefaultWebRequest, DirectoryResources, FileSystem,
    ResourceReader, Timer, WebRequest,
};
use crate::config::{AppInfo, FilterEngineParams, PlatformConfig};
use crate::error::{PlatformError, PlatformResult};
use crate::executor::{Executor, Rejected, ThreadPoolExecutor};
use crate::filter_engine::FilterEngine;
use crate::shared::{Outcome, SharedOutcome};

/// Called once with the result of filter engine construction.
pub type FilterEngineCallback = Box<dyn FnOnce(PlatformResult<Arc<FilterEngine>>) + Send + 'static>;

/// Where filter engine construction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterEngineState {
    NotRequested,
    Constructing,
    Ready,
    Failed,
}

enum ConstructionState {
    NotRequested,
    Requested(Arc<SharedOutcome<Arc<FilterEngine>>>),
}

/// Builder for [`Platform`]
///
/// Every collaborator left unset gets its default backend.
#[derive(Default)]
pub struct PlatformBuilder {
    config: PlatformConfig,
    executor: Option<Arc<dyn Executor>>,
    file_system: Option<Arc<dyn FileSystem>>,
    web_request: Option<Arc<dyn WebRequest>>,
    timer: Option<Arc<dyn Timer>>,
    resources: Option<Arc<dyn ResourceReader>>,
}

impl PlatformBuilder {
    pub fn config(mut self, config: PlatformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(file_system);
        self
    }

    pub fn web_request(mut self, web_request: Arc<dyn WebRequest>) -> Self {
        self.web_request = Some(web_request);
        self
    }

    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Where bootstrap sources are read from.
    ///
    /// Defaults to files under the configured base path.
    pub fn resources(mut self, resources: Arc<dyn ResourceReader>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Build the platform; the engine session is created lazily.
    pub fn build(self) -> PlatformResult<Platform> {
        let config = self.config;
        let executor: Arc<dyn Executor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(
                ThreadPoolExecutor::builder()
                    .threads(config.executor_threads)
                    .build()?,
            ),
        };
        let file_system = self.file_system.unwrap_or_else(|| {
            Arc::new(DefaultFileSystem::new(executor.clone(), config.base_path.clone()))
        });
        let web_request = self
            .web_request
            .unwrap_or_else(|| Arc::new(DefaultWebRequest::new(executor.clone())));
        let timer: Arc<dyn Timer> = match self.timer {
            Some(timer) => timer,
            None => Arc::new(DefaultTimer::new()?),
        };
        let resources = self
            .resources
            .unwrap_or_else(|| Arc::new(DirectoryResources::new(config.base_path.clone())));

        debug!(
            threads = config.executor_threads,
            factory = %config.factory_function,
            "platform created"
        );
        Ok(Platform {
            inner: Arc::new(PlatformInner {
                config,
                executor,
                file_system,
                web_request,
                timer,
                resources,
                set_up_lock: Mutex::new(()),
                host: OnceLock::new(),
                construction: Mutex::new(ConstructionState::NotRequested),
                ready: OnceLock::new(),
                evaluated_sources: Mutex::new(HashSet::new()),
            }),
        })
    }
}

/// The script engine session as set up by the platform.
struct ScriptHost {
    session: EngineSession,
    app_info: AppInfo,
}

struct PlatformInner {
    config: PlatformConfig,
    executor: Arc<dyn Executor>,
    file_system: Arc<dyn FileSystem>,
    web_request: Arc<dyn WebRequest>,
    timer: Arc<dyn Timer>,
    resources: Arc<dyn ResourceReader>,
    set_up_lock: Mutex<()>,
    host: OnceLock<ScriptHost>,
    construction: Mutex<ConstructionState>,
    /// Set once construction succeeded; read without locking.
    ready: OnceLock<Arc<FilterEngine>>,
    evaluated_sources: Mutex<HashSet<String>>,
}

/// Owner of the engine session, its collaborators and the filter engine.
///
/// Dropping the platform stops the executor and disposes the session.
pub struct Platform {
    inner: Arc<PlatformInner>,
}

impl Platform {
    /// A platform with default collaborators.
    pub fn new(config: PlatformConfig) -> PlatformResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        self.inner.executor.clone()
    }

    /// Create the engine session and install the host objects.
    ///
    /// Only the first call has an effect; later calls return the existing
    /// session.
    pub fn set_up(&self, app_info: AppInfo) -> PlatformResult<EngineSession> {
        self.inner.set_up(app_info)
    }

    /// The engine session, set up with default [`AppInfo`] if needed.
    pub fn js_engine(&self) -> PlatformResult<EngineSession> {
        self.inner.js_engine()
    }

    /// Evaluate a bootstrap resource unless it was evaluated before.
    ///
    /// Returns whether the source was evaluated by this call.
    pub fn evaluate_resource(&self, name: &str) -> PlatformResult<bool> {
        let session = self.inner.js_engine()?;
        self.inner.evaluate_resource(&session, name)
    }

    /// Request construction and return at once.
    ///
    /// `on_created` fires exactly once, through the executor. Parameters of
    /// a request made after the first one are ignored.
    pub fn create_filter_engine_async(
        &self,
        params: FilterEngineParams,
        on_created: Option<FilterEngineCallback>,
    ) {
        let outcome = self.inner.request(params);
        if let Some(on_created) = on_created {
            outcome.on_resolved(Box::new(move |outcome| on_created(into_result(outcome))));
        }
    }

    /// The filter engine, blocking while it is being constructed.
    ///
    /// Requests construction with default parameters if nobody has yet.
    /// Must not be called from an executor task when the executor has a
    /// single worker.
    pub fn filter_engine(&self) -> PlatformResult<Arc<FilterEngine>> {
        if let Some(engine) = self.inner.ready.get() {
            return Ok(engine.clone());
        }
        let outcome = self.inner.request(FilterEngineParams::default());
        into_result(outcome.wait())
    }

    /// Like [`filter_engine`](Self::filter_engine) without blocking the
    /// calling thread.
    pub async fn wait_filter_engine(&self) -> PlatformResult<Arc<FilterEngine>> {
        if let Some(engine) = self.inner.ready.get() {
            return Ok(engine.clone());
        }
        let outcome = self.inner.request(FilterEngineParams::default());
        let (tx, rx) = oneshot::channel();
        outcome.on_resolved(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        let outcome = rx.await.map_err(|_| PlatformError::ExecutorStopped)?;
        into_result(outcome)
    }

    /// Clear a failed construction so the next request starts over.
    ///
    /// Returns whether anything was reset. Bootstrap sources that were
    /// evaluated successfully stay evaluated.
    pub fn reset_failed_filter_engine(&self) -> bool {
        let mut construction = self.inner.construction.lock();
        match &*construction {
            ConstructionState::Requested(outcome) if outcome.is_failed() => {
                info!("resetting failed filter engine construction");
                *construction = ConstructionState::NotRequested;
                true
            }
            _ => false,
        }
    }

    pub fn filter_engine_state(&self) -> FilterEngineState {
        if self.inner.ready.get().is_some() {
            return FilterEngineState::Ready;
        }
        match &*self.inner.construction.lock() {
            ConstructionState::NotRequested => FilterEngineState::NotRequested,
            ConstructionState::Requested(outcome) => match outcome.get() {
                None => FilterEngineState::Constructing,
                Some(Ok(_)) => FilterEngineState::Ready,
                Some(Err(_)) => FilterEngineState::Failed,
            },
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("state", &self.filter_engine_state())
            .field("set_up", &self.inner.host.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        self.inner.executor.stop();
        if let Some(host) = self.inner.host.get() {
            if let Err(error) = host.session.dispose() {
                warn!(%error, "engine session not disposed with the platform");
            }
        }
        debug!("platform shut down");
    }
}

fn into_result(outcome: Outcome<Arc<FilterEngine>>) -> PlatformResult<Arc<FilterEngine>> {
    outcome.map_err(PlatformError::SubsystemConstruction)
}

impl PlatformInner {
    fn set_up(&self, app_info: AppInfo) -> PlatformResult<EngineSession> {
        let _guard = self.set_up_lock.lock();
        if let Some(host) = self.host.get() {
            debug!("platform already set up");
            return Ok(host.session.clone());
        }

        let session = EngineSession::with_options(self.config.session.clone())?;
        let services = Arc::new(HostServices {
            session: session.downgrade(),
            executor: self.executor.clone(),
            file_system: self.file_system.clone(),
            web_request: self.web_request.clone(),
            timer: self.timer.clone(),
        });
        if let Err(error) = bindings::install(&services, &session, &app_info) {
            let _ = session.dispose();
            return Err(error.into());
        }
        info!(session = session.id(), application = %app_info.application, "platform set up");

        let host = ScriptHost {
            session: session.clone(),
            app_info,
        };
        if self.host.set(host).is_err() {
            return Err(PlatformError::Bridge(blinder_engine::BridgeError::internal(
                "platform set up twice",
            )));
        }
        Ok(session)
    }

    fn js_engine(&self) -> PlatformResult<EngineSession> {
        match self.host.get() {
            Some(host) => Ok(host.session.clone()),
            None => self.set_up(AppInfo::default()),
        }
    }

    fn app_info(&self) -> AppInfo {
        self.host
            .get()
            .map(|host| host.app_info.clone())
            .unwrap_or_default()
    }

    /// Claims `name` before evaluating; the claim is dropped again if
    /// reading or evaluation fails.
    fn evaluate_resource(&self, session: &EngineSession, name: &str) -> PlatformResult<bool> {
        if !self.evaluated_sources.lock().insert(name.to_owned()) {
            debug!(resource = name, "resource already evaluated");
            return Ok(false);
        }
        let claim = scopeguard::guard(name, |name| {
            self.evaluated_sources.lock().remove(name);
        });

        let source = self.resources.read_resource(name)?;
        session.evaluate(&source, name)?;
        ScopeGuard::into_inner(claim);
        debug!(resource = name, "resource evaluated");
        Ok(true)
    }

    /// The current outcome, starting construction if nothing was requested.
    fn request(self: &Arc<Self>, params: FilterEngineParams) -> Arc<SharedOutcome<Arc<FilterEngine>>> {
        let outcome = {
            let mut construction = self.construction.lock();
            if let ConstructionState::Requested(outcome) = &*construction {
                return outcome.clone();
            }
            let outcome = SharedOutcome::new(self.executor.clone());
            *construction = ConstructionState::Requested(outcome.clone());
            outcome
        };

        info!("filter engine construction requested");
        let platform = self.clone();
        // Resolves the outcome if the executor drops the job without running it.
        let job = scopeguard::guard(outcome.clone(), |job| {
            if job.resolve(Err(Arc::new(PlatformError::ExecutorStopped))) {
                warn!("executor stopped; filter engine cannot be constructed");
            }
        });
        let task = Box::new(move || platform.construct(params, ScopeGuard::into_inner(job)));
        if let Err(Rejected(task)) = self.executor.dispatch(task) {
            drop(task);
        }
        outcome
    }

    fn construct(self: &Arc<Self>, params: FilterEngineParams, outcome: Arc<SharedOutcome<Arc<FilterEngine>>>) {
        let _span = info_span!("construct_filter_engine").entered();

        let timeout_ms = self.config.construction_timeout_ms;
        let timed_out = outcome.clone();
        self.timer.set_timer(
            self.config.construction_timeout(),
            Box::new(move || {
                if timed_out.resolve(Err(Arc::new(PlatformError::ConstructionTimeout(timeout_ms)))) {
                    error!(timeout_ms, "filter engine construction timed out");
                }
            }),
        );

        if let Err(error) = self.bootstrap_and_call_factory(params, &outcome) {
            error!(%error, "filter engine construction failed");
            outcome.resolve(Err(Arc::new(error)));
        }
    }

    fn bootstrap_and_call_factory(
        self: &Arc<Self>,
        params: FilterEngineParams,
        outcome: &Arc<SharedOutcome<Arc<FilterEngine>>>,
    ) -> PlatformResult<()> {
        let session = self.js_engine()?;
        for name in &self.config.bootstrap_sources {
            self.evaluate_resource(&session, name)?;
        }

        let name = &self.config.factory_function;
        let factory = session.global()?.get_property(name)?;
        if !factory.is_function() {
            return Err(PlatformError::factory(format!("global `{name}` is not a function")));
        }
        let params = session.from_json(&params.to_json(&self.app_info()))?;
        let on_done = self.completion_callback(&session, outcome.clone())?;
        factory.call(&[params, on_done])?;
        Ok(())
    }

    /// The node-style `onDone(error, engine)` handed to the factory.
    fn completion_callback(
        self: &Arc<Self>,
        session: &EngineSession,
        outcome: Arc<SharedOutcome<Arc<FilterEngine>>>,
    ) -> PlatformResult<EngineValue> {
        let platform: Weak<PlatformInner> = Arc::downgrade(self);
        let session_ref = session.downgrade();
        let callback = session.new_callback(move |args| {
            let result = engine_from_completion(&session_ref, &args);
            match result {
                Ok(engine) => {
                    if outcome.resolve(Ok(engine.clone())) {
                        if let Some(platform) = platform.upgrade() {
                            let _ = platform.ready.set(engine);
                        }
                        info!("filter engine ready");
                    }
                }
                Err(error) => {
                    let message = error.to_string();
                    if outcome.resolve(Err(Arc::new(error))) {
                        error!(error = %message, "filter engine factory failed");
                    }
                }
            }
            Ok(None)
        })?;
        Ok(callback)
    }
}

fn engine_from_completion(
    session: &WeakEngineSession,
    args: &[EngineValue],
) -> PlatformResult<Arc<FilterEngine>> {
    if let Some(error) = args.first() {
        if !error.is_undefined() && !error.is_null() {
            return Err(PlatformError::factory(error.as_string()?));
        }
    }
    let session = session
        .upgrade()
        .ok_or(PlatformError::Bridge(blinder_engine::BridgeError::EngineGone))?;
    let object = args
        .get(1)
        .cloned()
        .ok_or_else(|| PlatformError::factory("factory completed without an engine"))?;
    Ok(Arc::new(FilterEngine::new(session, object)?))
}
