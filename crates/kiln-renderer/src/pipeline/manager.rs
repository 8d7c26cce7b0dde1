//! Asynchronous pipeline build and hot-reload engine.
//!
//! Registrations are cheap: they record a descriptor and a deduplicated list
//! of shader sources under the state lock and return immediately. A single
//! background worker then, once per poll interval:
//!
//! 1. asks the change detector which sources are newer than the version last
//!    compiled,
//! 2. recompiles those in parallel on rayon, without holding the state lock,
//! 3. builds every pipeline whose sources are all compiled and which is either
//!    unbuilt or uses a source recompiled in this cycle,
//! 4. stages the results in an outbox that the render thread adopts with
//!    [`PipelineManager::update`].
//!
//! A failure on the first build of a pipeline is fatal and reported by
//! [`PipelineManager::wait_ready`]. A failure on a rebuild is logged, the last
//! good pipeline stays bound, and the source stamp still advances so the same
//! broken version is not compiled again.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;

use super::{is_compute, PipelineDesc, PipelineDevice, PipelineHandle};
use crate::shader::watch::{self, ChangeDetector, SourceChange, SourceId, WatchedSource};
use crate::shader::{self, CompiledArtifact, ShaderCompiler, ShaderSource};
use kiln_common::{KilnConfig, KilnError, KilnResult};

/// Counters for diagnostics overlays and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Distinct shader sources tracked.
    pub shaders: usize,
    /// Registered pipelines.
    pub pipelines: usize,
    /// Pipelines that have completed at least one successful build.
    pub ready: usize,
    pub compiles: u64,
    pub compile_failures: u64,
    pub builds: u64,
    pub build_failures: u64,
}

struct ShaderEntry {
    source: ShaderSource,
    /// Last successfully compiled version.
    artifact: Option<Arc<CompiledArtifact>>,
    /// Modification time of the last version a compile was attempted for.
    last_seen: Option<std::time::SystemTime>,
    /// Error of the last attempt, cleared on success.
    error: Option<KilnError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Unbuilt,
    Built,
    /// First build failed. A later change to one of its sources retries.
    Failed,
}

struct Record {
    desc: PipelineDesc,
    sources: Vec<SourceId>,
    state: BuildState,
    last_error: Option<KilnError>,
}

struct BuildJob {
    handle: PipelineHandle,
    desc: PipelineDesc,
    compute: bool,
    artifacts: Vec<Arc<CompiledArtifact>>,
}

struct State<P> {
    shaders: Vec<ShaderEntry>,
    source_ids: HashMap<ShaderSource, SourceId>,
    records: Vec<Record>,
    outbox: HashMap<PipelineHandle, KilnResult<P>>,
    stats: PipelineStats,
}

impl<P> State<P> {
    fn new() -> Self {
        Self {
            shaders: Vec::new(),
            source_ids: HashMap::new(),
            records: Vec::new(),
            outbox: HashMap::new(),
            stats: PipelineStats::default(),
        }
    }

    fn source_id(&mut self, source: ShaderSource) -> SourceId {
        if let Some(&id) = self.source_ids.get(&source) {
            return id;
        }
        let id = self.shaders.len();
        self.source_ids.insert(source.clone(), id);
        self.shaders.push(ShaderEntry {
            source,
            artifact: None,
            last_seen: None,
            error: None,
        });
        id
    }

    fn register(&mut self, desc: PipelineDesc, sources: Vec<ShaderSource>) -> PipelineHandle {
        let ids: Vec<SourceId> = sources.into_iter().map(|s| self.source_id(s)).collect();

        // A source whose first compile already failed will not be retried
        // until it changes, so the record fails now instead of waiting forever.
        let inherited = ids.iter().find_map(|&id| {
            let entry = &self.shaders[id];
            match (&entry.artifact, &entry.error) {
                (None, Some(err)) => Some(err.clone()),
                _ => None,
            }
        });

        let handle = PipelineHandle(self.records.len() as u32);
        log::debug!(
            "registered pipeline '{}' ({:?}) with {} source(s)",
            desc.label,
            handle,
            ids.len()
        );
        self.records.push(Record {
            desc,
            sources: ids,
            state: if inherited.is_some() {
                BuildState::Failed
            } else {
                BuildState::Unbuilt
            },
            last_error: inherited,
        });
        handle
    }

    fn watched(&self) -> Vec<WatchedSource> {
        self.shaders
            .iter()
            .enumerate()
            .map(|(id, entry)| WatchedSource {
                id,
                path: entry.source.path.clone(),
                last_seen: entry.last_seen,
            })
            .collect()
    }

    /// Record compile results and return the ids that produced a new artifact.
    fn apply_compiles(
        &mut self,
        results: Vec<(SourceChange, KilnResult<CompiledArtifact>)>,
    ) -> HashSet<SourceId> {
        let mut rebuilt = HashSet::new();

        for (change, result) in results {
            self.stats.compiles += 1;
            let entry = &mut self.shaders[change.id];
            entry.last_seen = Some(change.stamp);

            match result {
                Ok(artifact) => {
                    entry.artifact = Some(Arc::new(artifact));
                    entry.error = None;
                    rebuilt.insert(change.id);
                }
                Err(err) => {
                    self.stats.compile_failures += 1;
                    entry.error = Some(err.clone());
                    let first = entry.artifact.is_none();
                    if first {
                        log::error!("{}", err);
                    } else {
                        log::warn!("{}; keeping the previous version", err);
                    }

                    for (index, record) in self.records.iter_mut().enumerate() {
                        if !record.sources.contains(&change.id) {
                            continue;
                        }
                        record.last_error = Some(err.clone());
                        match record.state {
                            BuildState::Unbuilt => record.state = BuildState::Failed,
                            BuildState::Failed => {}
                            BuildState::Built => {
                                let handle = PipelineHandle(index as u32);
                                if !matches!(self.outbox.get(&handle), Some(Ok(_))) {
                                    self.outbox.insert(handle, Err(err.clone()));
                                }
                            }
                        }
                    }
                }
            }
        }

        rebuilt
    }

    fn collect_jobs(&self, rebuilt: &HashSet<SourceId>) -> Vec<BuildJob> {
        let mut jobs = Vec::new();

        for (index, record) in self.records.iter().enumerate() {
            let artifacts: Option<Vec<Arc<CompiledArtifact>>> = record
                .sources
                .iter()
                .map(|&id| self.shaders[id].artifact.clone())
                .collect();
            let Some(artifacts) = artifacts else {
                continue;
            };

            let touched = record.sources.iter().any(|id| rebuilt.contains(id));
            if record.state == BuildState::Unbuilt || touched {
                let compute = {
                    let sources: Vec<ShaderSource> = record
                        .sources
                        .iter()
                        .map(|&id| self.shaders[id].source.clone())
                        .collect();
                    is_compute(&sources)
                };
                jobs.push(BuildJob {
                    handle: PipelineHandle(index as u32),
                    desc: record.desc.clone(),
                    compute,
                    artifacts,
                });
            }
        }

        jobs
    }

    fn record_build<D>(&mut self, device: &D, handle: PipelineHandle, result: KilnResult<P>)
    where
        D: PipelineDevice<Pipeline = P>,
    {
        self.stats.builds += 1;
        let record = &mut self.records[handle.index()];

        match result {
            Ok(pipeline) => {
                match record.state {
                    BuildState::Built => log::info!("rebuilt pipeline '{}'", record.desc.label),
                    BuildState::Unbuilt => log::debug!("built pipeline '{}'", record.desc.label),
                    BuildState::Failed => log::info!("pipeline '{}' recovered", record.desc.label),
                }
                record.state = BuildState::Built;
                record.last_error = None;
                if let Some(Ok(displaced)) = self.outbox.insert(handle, Ok(pipeline)) {
                    device.queue_deferred_deletion(displaced);
                }
            }
            Err(err) => {
                self.stats.build_failures += 1;
                match record.state {
                    BuildState::Unbuilt => {
                        log::error!("pipeline '{}' failed its first build: {}", record.desc.label, err);
                        record.state = BuildState::Failed;
                    }
                    BuildState::Failed => {
                        log::warn!("pipeline '{}' still failing: {}", record.desc.label, err);
                    }
                    BuildState::Built => {
                        log::warn!(
                            "rebuild of pipeline '{}' failed, keeping the previous one: {}",
                            record.desc.label,
                            err
                        );
                        // A staged good pipeline is newer than the bound one; keep it.
                        if !matches!(self.outbox.get(&handle), Some(Ok(_))) {
                            self.outbox.insert(handle, Err(err.clone()));
                        }
                    }
                }
                record.last_error = Some(err);
            }
        }
    }

    fn pending(&self) -> bool {
        self.records.iter().any(|r| r.state == BuildState::Unbuilt)
    }

    fn any_failed(&self) -> bool {
        self.records.iter().any(|r| r.state == BuildState::Failed)
    }

    fn first_build_errors(&self) -> Vec<KilnError> {
        self.records
            .iter()
            .filter(|r| r.state == BuildState::Failed)
            .filter_map(|r| r.last_error.clone())
            .collect()
    }
}

struct Shared<D: PipelineDevice> {
    device: Arc<D>,
    compiler: Arc<dyn ShaderCompiler>,
    layout: D::Layout,
    state: Mutex<State<D::Pipeline>>,
    ready: Condvar,
    /// Held for a whole cycle; serializes compiles and builds so a source is
    /// never compiled twice at once.
    detector: Mutex<Box<dyn ChangeDetector>>,
    stop: Mutex<bool>,
    wake: Condvar,
}

impl<D: PipelineDevice> Shared<D> {
    fn compile_one(&self, source: &ShaderSource) -> KilnResult<CompiledArtifact> {
        let path = shader::resolve(self.compiler.base_dir(), source);
        fs::metadata(&path).map_err(|e| KilnError::io(&path, e))?;
        self.compiler
            .compile(source)
            .map_err(|diagnostic| KilnError::Compile { path, diagnostic })
    }

    fn build(&self, job: &BuildJob) -> KilnResult<D::Pipeline> {
        let artifacts: Vec<&CompiledArtifact> = job.artifacts.iter().map(Arc::as_ref).collect();
        if job.compute {
            self.device
                .build_compute_pipeline(&job.desc, artifacts[0], &self.layout)
        } else {
            self.device
                .build_graphics_pipeline(&job.desc, &artifacts, &self.layout)
        }
    }

    fn run_cycle(&self) {
        let mut detector = self.detector.lock();

        let watched = self.state.lock().watched();
        let changes = if watched.is_empty() {
            Vec::new()
        } else {
            detector.changed_since(self.compiler.base_dir(), &watched)
        };

        let to_compile: Vec<(SourceChange, ShaderSource)> = {
            let state = self.state.lock();
            changes
                .into_iter()
                .map(|change| (change, state.shaders[change.id].source.clone()))
                .collect()
        };

        if !to_compile.is_empty() {
            log::debug!("compiling {} changed shader source(s)", to_compile.len());
        }
        let results: Vec<_> = to_compile
            .par_iter()
            .map(|(change, source)| (*change, self.compile_one(source)))
            .collect();

        let jobs = {
            let mut state = self.state.lock();
            let rebuilt = state.apply_compiles(results);
            state.collect_jobs(&rebuilt)
        };

        for job in &jobs {
            let result = self.build(job);
            self.state
                .lock()
                .record_build(self.device.as_ref(), job.handle, result);
        }

        self.ready.notify_all();
    }
}

/// Hot-reloading pipeline registry.
///
/// `register` may be called from any thread. `update`, `get` and `wait_ready`
/// belong to the render thread; `get` reads a table only the `&mut self`
/// methods touch, so it takes no lock.
///
/// Dropping the manager stops and joins the worker, then drops the adopted
/// pipelines directly. Callers wait for the device to go idle first.
pub struct PipelineManager<D: PipelineDevice> {
    shared: Arc<Shared<D>>,
    pipelines: Vec<Option<D::Pipeline>>,
    worker: Option<JoinHandle<()>>,
}

impl<D: PipelineDevice> PipelineManager<D> {
    /// Create the manager and spawn its rebuild worker.
    pub fn new(
        device: Arc<D>,
        compiler: Arc<dyn ShaderCompiler>,
        layout: D::Layout,
        config: &KilnConfig,
    ) -> KilnResult<Self> {
        let mut manager = Self::without_worker(device, compiler, layout, config)?;

        let shared = Arc::clone(&manager.shared);
        let interval = config.poll_interval();
        let worker = thread::Builder::new()
            .name("kiln-pipeline-worker".to_string())
            .spawn(move || worker_loop(shared, interval))
            .map_err(|e| KilnError::Config(format!("failed to spawn pipeline worker: {}", e)))?;
        manager.worker = Some(worker);

        Ok(manager)
    }

    /// Create the manager without a background worker. Cycles run only
    /// through [`rebuild_now`](Self::rebuild_now), `register_now` and `wait_ready`.
    pub fn without_worker(
        device: Arc<D>,
        compiler: Arc<dyn ShaderCompiler>,
        layout: D::Layout,
        config: &KilnConfig,
    ) -> KilnResult<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                device,
                compiler,
                layout,
                state: Mutex::new(State::new()),
                ready: Condvar::new(),
                detector: Mutex::new(watch::detector_for(config.watch_backend)),
                stop: Mutex::new(false),
                wake: Condvar::new(),
            }),
            pipelines: Vec::new(),
            worker: None,
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.shared.device
    }

    /// Register a pipeline. Never compiles or builds; the next cycle does.
    pub fn register(&self, desc: PipelineDesc, sources: Vec<ShaderSource>) -> PipelineHandle {
        self.shared.state.lock().register(desc, sources)
    }

    /// Register, then compile and build synchronously.
    ///
    /// A first-build failure is returned here and also reported by later
    /// `wait_ready` calls.
    pub fn register_now(
        &mut self,
        desc: PipelineDesc,
        sources: Vec<ShaderSource>,
    ) -> KilnResult<PipelineHandle> {
        let handle = self.register(desc, sources);
        self.shared.run_cycle();

        let failure = {
            let state = self.shared.state.lock();
            let record = &state.records[handle.index()];
            match record.state {
                BuildState::Built => None,
                _ => Some(record.last_error.clone().unwrap_or(KilnError::Stopped)),
            }
        };
        if let Some(err) = failure {
            return Err(err);
        }

        self.update();
        Ok(handle)
    }

    /// Run one detect, compile and build cycle on the calling thread.
    pub fn rebuild_now(&self) {
        self.shared.run_cycle();
    }

    /// Adopt staged pipelines. The replaced pipeline goes to deferred
    /// deletion; a staged failure keeps the current one.
    pub fn update(&mut self) {
        let staged: Vec<(PipelineHandle, String, KilnResult<D::Pipeline>)> = {
            let mut state = self.shared.state.lock();
            if state.outbox.is_empty() {
                return;
            }
            let drained: Vec<_> = state.outbox.drain().collect();
            drained
                .into_iter()
                .map(|(handle, result)| {
                    let label = state.records[handle.index()].desc.label.clone();
                    (handle, label, result)
                })
                .collect()
        };

        for (handle, label, result) in staged {
            match result {
                Ok(pipeline) => {
                    if self.pipelines.len() <= handle.index() {
                        self.pipelines.resize_with(handle.index() + 1, || None);
                    }
                    if let Some(old) = self.pipelines[handle.index()].replace(pipeline) {
                        self.shared.device.queue_deferred_deletion(old);
                    }
                }
                Err(err) => log::warn!("pipeline '{}' keeps its previous build: {}", label, err),
            }
        }
    }

    /// Current pipeline for `handle`, `None` until its first build is adopted.
    pub fn get(&self, handle: PipelineHandle) -> Option<&D::Pipeline> {
        self.pipelines.get(handle.index()).and_then(Option::as_ref)
    }

    /// Block until every registered pipeline has built or any pipeline has
    /// failed its first build, then adopt staged results.
    ///
    /// Without a worker one cycle runs inline; pipelines still unbuilt after
    /// it yield [`KilnError::Stopped`].
    pub fn wait_ready(&mut self) -> KilnResult<()> {
        if self.worker.is_none() {
            self.shared.run_cycle();
        }

        {
            let mut state = self.shared.state.lock();
            while state.pending() && !state.any_failed() {
                let alive = self.worker.as_ref().is_some_and(|w| !w.is_finished());
                if !alive {
                    return Err(KilnError::Stopped);
                }
                self.shared
                    .ready
                    .wait_for(&mut state, Duration::from_millis(100));
            }

            let errors = state.first_build_errors();
            if !errors.is_empty() {
                return Err(KilnError::FirstBuild(errors));
            }
        }

        self.update();
        Ok(())
    }

    /// Last error recorded for `handle`: the first-build failure, or the
    /// most recent swallowed rebuild failure. Cleared by a successful build.
    pub fn last_error(&self, handle: PipelineHandle) -> Option<KilnError> {
        let state = self.shared.state.lock();
        state
            .records
            .get(handle.index())
            .and_then(|r| r.last_error.clone())
    }

    pub fn stats(&self) -> PipelineStats {
        let state = self.shared.state.lock();
        PipelineStats {
            shaders: state.shaders.len(),
            pipelines: state.records.len(),
            ready: state
                .records
                .iter()
                .filter(|r| r.state == BuildState::Built)
                .count(),
            ..state.stats
        }
    }
}

impl<D: PipelineDevice> Drop for PipelineManager<D> {
    fn drop(&mut self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("pipeline worker panicked");
            }
        }
    }
}

fn worker_loop<D: PipelineDevice>(shared: Arc<Shared<D>>, interval: Duration) {
    log::debug!("pipeline worker started, polling every {:?}", interval);

    loop {
        if *shared.stop.lock() {
            break;
        }

        shared.run_cycle();

        let mut stop = shared.stop.lock();
        if !*stop {
            shared.wake.wait_for(&mut stop, interval);
        }
        if *stop {
            break;
        }
    }

    log::debug!("pipeline worker stopped");
}
