use crate::dispatch::{InlineDispatcher, OwnerDispatcher};
use crate::error::MetadataError;
use crate::events::{EventBus, WorkingSetEvent};
use crate::exif_reader::ExifMetadataReader;
use crate::metadata::{build_context, MetadataEntry, MetadataReader};
use crate::normalizer::{is_supported_image, MetadataNormalizer};
use crate::record::FileRecord;
use crate::template::{CompileError, LiquidEngine, TemplateEngine};
use futures::future::{BoxFuture, FutureExt, Shared};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    TemplateInvalid(CompileError),
    Superseded,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppendStats {
    pub requested: usize,
    pub unsupported: usize,
    pub duplicates: usize,
    pub unreadable: usize,
    pub added: usize,
}

type PassFuture = Shared<BoxFuture<'static, PassOutcome>>;

struct State {
    records: Vec<FileRecord>,
    template: String,
    active: Option<CancellationToken>,
    latest_pass: Option<PassFuture>,
}

struct Inner {
    state: Mutex<State>,
    engine: Arc<dyn TemplateEngine>,
    normalizer: MetadataNormalizer,
    dispatcher: Arc<dyn OwnerDispatcher>,
    events: EventBus,
    runtime: Handle,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

pub struct SchedulerBuilder {
    engine: Arc<dyn TemplateEngine>,
    reader: Arc<dyn MetadataReader>,
    dispatcher: Arc<dyn OwnerDispatcher>,
    event_capacity: usize,
}

impl SchedulerBuilder {
    pub fn engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn reader(mut self, reader: Arc<dyn MetadataReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn OwnerDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self, runtime: Handle) -> RenameScheduler {
        RenameScheduler {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    records: Vec::new(),
                    template: String::new(),
                    active: None,
                    latest_pass: None,
                }),
                engine: self.engine,
                normalizer: MetadataNormalizer::new(self.reader),
                dispatcher: self.dispatcher,
                events: EventBus::new(self.event_capacity),
                runtime,
                run_lock: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }
}

#[derive(Clone)]
pub struct RenameScheduler {
    inner: Arc<Inner>,
}

impl RenameScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder {
            engine: Arc::new(LiquidEngine),
            reader: Arc::new(ExifMetadataReader),
            dispatcher: Arc::new(InlineDispatcher),
            event_capacity: 1024,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkingSetEvent> {
        self.inner.events.subscribe()
    }

    pub fn template(&self) -> String {
        self.inner.lock().template.clone()
    }

    pub fn set_template(&self, source: impl Into<String>) {
        self.inner.lock().template = source.into();
        let _ = self.start_pass();
    }

    pub fn append_files<I, P>(&self, paths: I) -> AppendStats
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut stats = AppendStats::default();
        let existing: HashSet<PathBuf> = self
            .inner
            .lock()
            .records
            .iter()
            .map(|r| r.path().to_path_buf())
            .collect();

        let mut batch = HashSet::<PathBuf>::new();
        let mut candidates = Vec::new();
        for path in paths {
            stats.requested += 1;
            let path = path.as_ref();
            if !is_supported_image(path) {
                stats.unsupported += 1;
                continue;
            }
            let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            if existing.contains(&absolute) || !batch.insert(absolute.clone()) {
                stats.duplicates += 1;
                continue;
            }
            candidates.push(absolute);
        }

        let normalizer = &self.inner.normalizer;
        let loaded: Vec<Result<FileRecord, MetadataError>> = candidates
            .par_iter()
            .map(|path| normalizer.normalize(path))
            .collect();

        let mut fresh = Vec::with_capacity(loaded.len());
        for result in loaded {
            match result {
                Ok(record) => fresh.push(record),
                Err(err) => {
                    stats.unreadable += 1;
                    warn!(error = %err, "メタデータを読めないファイルを除外しました");
                }
            }
        }

        {
            let mut state = self.inner.lock();
            let start = state.records.len();
            for record in fresh {
                if state.records.iter().any(|r| r.path() == record.path()) {
                    stats.duplicates += 1;
                    continue;
                }
                state.records.push(record);
            }
            stats.added = state.records.len() - start;
            if stats.added > 0 {
                self.inner.notify(WorkingSetEvent::Appended {
                    start,
                    count: stats.added,
                });
            }
        }

        debug!(?stats, "ファイルを追加しました");
        let _ = self.start_pass();
        stats
    }

    pub fn remove_at(&self, index: usize) -> Option<FileRecord> {
        let mut state = self.inner.lock();
        if index >= state.records.len() {
            return None;
        }
        let record = state.records.remove(index);
        self.inner.notify(WorkingSetEvent::Removed {
            index,
            path: record.path().to_path_buf(),
        });
        Some(record)
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.records.clear();
        self.inner.notify(WorkingSetEvent::Cleared);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<FileRecord> {
        self.inner.lock().records.clone()
    }

    pub fn record(&self, index: usize) -> Option<FileRecord> {
        self.inner.lock().records.get(index).cloned()
    }

    pub async fn recompute_all(&self) -> PassOutcome {
        self.start_pass().await
    }

    pub async fn wait_idle(&self) -> PassOutcome {
        let latest = self.inner.lock().latest_pass.clone();
        match latest {
            Some(pass) => pass.await,
            None => PassOutcome::Completed,
        }
    }

    pub(crate) fn try_lock_run(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.inner.run_lock).try_lock_owned().ok()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub(crate) fn rename_plan(&self) -> Vec<(PathBuf, String)> {
        self.inner
            .lock()
            .records
            .iter()
            .map(|r| (r.path().to_path_buf(), r.new_name().to_string()))
            .collect()
    }

    pub(crate) async fn remove_paths(&self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run_on_owner_async(Box::new(move || inner.remove_paths_now(&paths)))
            .await;
    }

    fn start_pass(&self) -> PassFuture {
        let token = CancellationToken::new();
        let mut state = self.inner.lock();
        if let Some(previous) = state.active.replace(token.clone()) {
            previous.cancel();
        }

        let source = state.template.clone();
        let snapshot: Vec<(PathBuf, Arc<[MetadataEntry]>)> = state
            .records
            .iter()
            .map(|r| (r.path().to_path_buf(), r.shared_metadata()))
            .collect();

        let inner = Arc::clone(&self.inner);
        let task = self
            .inner
            .runtime
            .spawn_blocking(move || inner.run_pass(&source, &snapshot, &token));
        let pass = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(error = %err, "再計算タスクが異常終了しました");
                    PassOutcome::Aborted
                }
            }
        }
        .boxed()
        .shared();

        state.latest_pass = Some(pass.clone());
        pass
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: WorkingSetEvent) {
        let events = self.events.clone();
        self.dispatcher
            .run_on_owner(Box::new(move || events.emit(event)));
    }

    fn run_pass(
        &self,
        source: &str,
        snapshot: &[(PathBuf, Arc<[MetadataEntry]>)],
        token: &CancellationToken,
    ) -> PassOutcome {
        let started = Instant::now();
        let template = match self.engine.compile(source) {
            Ok(template) => template,
            Err(err) => {
                debug!(error = %err, "テンプレートをコンパイルできませんでした");
                return PassOutcome::TemplateInvalid(err);
            }
        };

        for (position, (path, metadata)) in snapshot.iter().enumerate() {
            if token.is_cancelled() {
                return PassOutcome::Superseded;
            }

            let new_name = template
                .render(&build_context(metadata))
                .unwrap_or_else(|err| {
                    debug!(path = %path.display(), error = %err, "ファイル名を生成できませんでした");
                    String::new()
                });

            // start_pass cancels under this lock, so no write follows a newer pass.
            let mut state = self.lock();
            if token.is_cancelled() {
                return PassOutcome::Superseded;
            }
            let Some(index) = locate(&state.records, position, path) else {
                continue;
            };
            if state.records[index].set_new_name(new_name.clone()) {
                self.notify(WorkingSetEvent::NewName {
                    index,
                    path: path.clone(),
                    new_name,
                });
            }
        }

        debug!(
            records = snapshot.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "再計算が完了しました"
        );
        PassOutcome::Completed
    }

    fn remove_paths_now(&self, paths: &[PathBuf]) {
        let mut state = self.lock();
        for path in paths {
            if let Some(index) = state.records.iter().position(|r| r.path() == path) {
                state.records.remove(index);
                self.notify(WorkingSetEvent::Removed {
                    index,
                    path: path.clone(),
                });
            }
        }
    }
}

fn locate(records: &[FileRecord], position: usize, path: &Path) -> Option<usize> {
    if records.get(position).is_some_and(|r| r.path() == path) {
        return Some(position);
    }
    records.iter().position(|r| r.path() == path)
}
