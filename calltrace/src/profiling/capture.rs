//! Live capture
//!
//! A [`Capture`] owns one session's builder, clock and optional memory
//! sampler. Nothing is global: independent captures can run side by side.
//!
//! ```no_run
//! use calltrace::domain::FunctionIdentity;
//! use calltrace::config::TraceConfig;
//! use calltrace::profiling::Capture;
//!
//! let capture = Capture::start(TraceConfig::default(), None)?;
//! {
//!     let _main = capture.scope(FunctionIdentity::new("main", "src/main.rs", 1));
//!     // traced work
//! }
//! let session = capture.stop();
//! # Ok::<(), calltrace::domain::CaptureError>(())
//! ```

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::call_graph::CallGraphBuilder;
use crate::config::TraceConfig;
use crate::domain::{CaptureError, Clock, FunctionIdentity, Tid, Timestamp};
use crate::memory::{LeakReport, MemorySampler, MemorySource, SamplerConfig, SamplerHandle};
use crate::trace_data::TraceSession;

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_TID: Tid = Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed));
}

/// Process-unique id of the calling thread, assigned on first use
#[must_use]
pub fn current_tid() -> Tid {
    CURRENT_TID.with(|tid| *tid)
}

/// Cloneable entry point for traced threads
#[derive(Debug, Clone)]
pub struct Tracer {
    builder: Arc<CallGraphBuilder>,
    clock: Clock,
}

impl Tracer {
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn enter(&self, identity: &FunctionIdentity, args: Option<&str>) {
        self.builder.on_enter(identity, self.clock.now(), current_tid(), args);
    }

    pub fn exit(&self, identity: &FunctionIdentity) {
        self.builder.on_exit(identity, self.clock.now(), current_tid());
    }

    /// Enter `identity` now and exit it when the guard drops
    #[must_use = "the scope ends when the guard is dropped"]
    pub fn scope(&self, identity: FunctionIdentity) -> ScopeGuard<'_> {
        self.enter(&identity, None);
        ScopeGuard { tracer: self, identity }
    }

    #[must_use = "the scope ends when the guard is dropped"]
    pub fn scope_with_args(&self, identity: FunctionIdentity, args: &str) -> ScopeGuard<'_> {
        self.enter(&identity, Some(args));
        ScopeGuard { tracer: self, identity }
    }

    #[must_use]
    pub fn builder(&self) -> &CallGraphBuilder {
        &self.builder
    }
}

/// Emits the exit event of a traced scope on drop
///
/// The exit is recorded on the dropping thread, so a guard should not be
/// moved across threads.
#[derive(Debug)]
pub struct ScopeGuard<'a> {
    tracer: &'a Tracer,
    identity: FunctionIdentity,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.tracer.exit(&self.identity);
    }
}

/// One running capture
pub struct Capture {
    tracer: Tracer,
    sampler: Option<SamplerHandle>,
}

impl Capture {
    /// Start an untitled capture
    ///
    /// # Errors
    /// Invalid configuration, or a sampler thread that cannot be spawned.
    pub fn start(
        config: TraceConfig,
        memory: Option<Box<dyn MemorySource>>,
    ) -> Result<Self, CaptureError> {
        Self::start_named(config, "", "", memory)
    }

    /// Start a capture whose session carries `title` and `source`
    ///
    /// When `memory` is given, a sampler reads it every
    /// `config.sample_interval` until [`stop`](Self::stop).
    ///
    /// # Errors
    /// Invalid configuration, or a sampler thread that cannot be spawned.
    pub fn start_named(
        config: TraceConfig,
        title: impl Into<String>,
        source: impl Into<String>,
        memory: Option<Box<dyn MemorySource>>,
    ) -> Result<Self, CaptureError> {
        config.validate()?;

        let clock = Clock::start();
        let sampler_config = SamplerConfig::from(&config);
        let builder = CallGraphBuilder::new(config, clock.now()).with_metadata(title, source);
        let sampler = memory
            .map(|reader| MemorySampler::start(reader, sampler_config, clock))
            .transpose()?;

        info!("Capture started{}", if sampler.is_some() { " with memory sampling" } else { "" });
        Ok(Self { tracer: Tracer { builder: Arc::new(builder), clock }, sampler })
    }

    /// Handle for traced threads
    #[must_use]
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.tracer.now()
    }

    /// Trace a scope on the calling thread
    #[must_use = "the scope ends when the guard is dropped"]
    pub fn scope(&self, identity: FunctionIdentity) -> ScopeGuard<'_> {
        self.tracer.scope(identity)
    }

    /// Stop sampling, seal the session and merge the memory series into it
    ///
    /// Frames still open are force-closed at the stop timestamp.
    #[must_use]
    pub fn stop(self) -> TraceSession {
        self.stop_with_report().0
    }

    /// Like [`stop`](Self::stop), also returning the sampler's leak report
    ///
    /// The report ranks consumers over every site delta of the session,
    /// including deltas the stored samples no longer carry. `None` without a
    /// memory source.
    #[must_use]
    pub fn stop_with_report(self) -> (TraceSession, Option<LeakReport>) {
        let memory = self.sampler.map(SamplerHandle::stop);
        let mut session = self.tracer.builder.finalize(self.tracer.clock.now());
        let report = memory.map(|output| {
            session.attach_memory(output.samples, output.warnings);
            output.report
        });
        (session, report)
    }
}
