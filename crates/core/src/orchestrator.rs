use crate::error::{MoveError, RenameError};
use crate::mover::{is_plain_file_name, CollisionSafeMover};
use crate::scheduler::{PassOutcome, RenameScheduler};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Completed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenamedFile {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub renamed: Vec<RenamedFile>,
    pub remaining: usize,
}

pub struct RenameOrchestrator {
    scheduler: RenameScheduler,
    mover: CollisionSafeMover,
}

impl RenameOrchestrator {
    pub fn new(scheduler: RenameScheduler) -> Self {
        Self {
            scheduler,
            mover: CollisionSafeMover::default(),
        }
    }

    pub fn with_mover(mut self, mover: CollisionSafeMover) -> Self {
        self.mover = mover;
        self
    }

    pub async fn run<F>(
        &self,
        mut on_progress: F,
        cancel: CancellationToken,
    ) -> Result<RunReport, RenameError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let Some(_run_guard) = self.scheduler.try_lock_run() else {
            return Err(RenameError::Busy);
        };

        loop {
            match self.scheduler.recompute_all().await {
                PassOutcome::Completed => break,
                PassOutcome::Superseded => continue,
                PassOutcome::TemplateInvalid(err) => return Err(RenameError::InvalidTemplate(err)),
                PassOutcome::Aborted => {
                    return Err(RenameError::Worker(
                        "ファイル名の再計算に失敗しました".to_string(),
                    ))
                }
            }
        }

        let plan = self.scheduler.rename_plan();
        let blank = plan
            .iter()
            .filter(|(_, name)| name.trim().is_empty())
            .count();
        if blank > 0 {
            return Err(RenameError::IncompleteNames { count: blank });
        }
        if let Some((path, name)) = plan.iter().find(|(_, name)| !is_plain_file_name(name)) {
            return Err(RenameError::Move(MoveError::InvalidName {
                path: path.clone(),
                name: name.clone(),
            }));
        }

        let total = plan.len();
        info!(total, "リネームを開始します");
        let mut renamed = Vec::<RenamedFile>::with_capacity(total);
        let mut state = RunState::Completed;

        for (path, new_name) in plan {
            if cancel.is_cancelled() {
                state = RunState::Canceled;
                break;
            }

            match self.move_one(&path, new_name).await {
                Ok(destination) => {
                    debug!(from = %path.display(), to = %destination.display(), "リネームしました");
                    renamed.push(RenamedFile {
                        from: path,
                        to: destination,
                    });
                    on_progress(renamed.len(), total);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, done = renamed.len(), "リネームを中断しました");
                    self.scheduler.remove_paths(processed_paths(&renamed)).await;
                    return Err(err);
                }
            }
        }

        self.scheduler.remove_paths(processed_paths(&renamed)).await;
        let remaining = self.scheduler.len();
        info!(renamed = renamed.len(), remaining, ?state, "リネームが終了しました");

        Ok(RunReport {
            state,
            renamed,
            remaining,
        })
    }

    async fn move_one(&self, path: &Path, new_name: String) -> Result<PathBuf, RenameError> {
        let mover = self.mover;
        let original = path.to_path_buf();
        self.scheduler
            .runtime()
            .spawn_blocking(move || mover.move_file(&original, &new_name))
            .await
            .map_err(|err| RenameError::Worker(err.to_string()))?
            .map_err(RenameError::from)
    }
}

fn processed_paths(renamed: &[RenamedFile]) -> Vec<PathBuf> {
    renamed.iter().map(|r| r.from.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::owner_queue;
    use crate::error::MetadataError;
    use crate::events::WorkingSetEvent;
    use crate::metadata::RawTag;
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tokio::runtime::Handle;

    fn stem_reader(path: &Path) -> Result<Vec<RawTag>, MetadataError> {
        let stem = path
            .file_stem()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut tags = vec![RawTag::new("Test", "Stem", stem.clone())];
        if stem != "b" {
            tags.push(RawTag::new("Test", "NotB", "ok"));
        }
        Ok(tags)
    }

    fn setup(template: &str) -> (TempDir, RenameScheduler, Vec<PathBuf>) {
        let temp = tempdir().expect("tempdir");
        let paths: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|stem| {
                let path = temp.path().join(format!("{stem}.jpg"));
                fs::write(&path, stem.as_bytes()).expect("write fixture");
                path
            })
            .collect();
        let scheduler = RenameScheduler::builder()
            .reader(Arc::new(stem_reader))
            .build(Handle::current());
        scheduler.set_template(template);
        scheduler.append_files(&paths);
        (temp, scheduler, paths)
    }

    fn remaining_names(scheduler: &RenameScheduler) -> Vec<String> {
        scheduler
            .records()
            .iter()
            .map(|r| r.original_name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn run_renames_every_record_and_empties_the_set() {
        let (temp, scheduler, paths) = setup("new_{{Test.Stem}}.{{File.Extension}}");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        let mut calls = Vec::new();
        let report = orchestrator
            .run(|done, total| calls.push((done, total)), CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.renamed.len(), 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);
        assert!(scheduler.is_empty());
        for (path, stem) in paths.iter().zip(["a", "b", "c"]) {
            assert!(!path.exists());
            let renamed = temp.path().join(format!("new_{stem}.jpg"));
            assert_eq!(fs::read(renamed).expect("read"), stem.as_bytes());
        }
    }

    #[tokio::test]
    async fn blank_names_abort_before_touching_the_filesystem() {
        let (_temp, scheduler, paths) = setup("{{Test.NotB}}");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        let err = orchestrator
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect_err("b has no name");

        assert!(matches!(err, RenameError::IncompleteNames { count: 1 }));
        assert!(paths.iter().all(|p| p.exists()));
        assert_eq!(scheduler.len(), 3);
    }

    #[tokio::test]
    async fn whitespace_only_names_count_as_blank() {
        let (_temp, scheduler, paths) = setup("{{ Test.NotB | default: '  ' }}");
        scheduler.wait_idle().await;
        assert_eq!(scheduler.records()[1].new_name(), "  ");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        let err = orchestrator
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect_err("b renders only spaces");

        assert!(matches!(err, RenameError::IncompleteNames { count: 1 }));
        assert!(paths.iter().all(|p| p.exists()));
        assert_eq!(scheduler.len(), 3);
    }

    #[tokio::test]
    async fn names_with_separators_abort_before_touching_the_filesystem() {
        let (temp, scheduler, paths) = setup("{{Test.Stem}}/f.jpg");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        let err = orchestrator
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect_err("name leaves the directory");

        assert!(matches!(
            err,
            RenameError::Move(MoveError::InvalidName { .. })
        ));
        assert_eq!(err.path(), Some(paths[0].as_path()));
        assert!(paths.iter().all(|p| p.exists()));
        assert!(!temp.path().join("a").exists());
        assert_eq!(scheduler.len(), 3);
    }

    #[tokio::test]
    async fn second_run_on_the_same_set_is_refused() {
        let (temp, scheduler, paths) = setup("n_{{Test.Stem}}.jpg");
        let first = RenameOrchestrator::new(scheduler.clone());
        let second = RenameOrchestrator::new(scheduler.clone());

        let (a, b) = tokio::join!(
            first.run(|_, _| {}, CancellationToken::new()),
            second.run(|_, _| {}, CancellationToken::new()),
        );

        assert_eq!(a.expect("first run").renamed.len(), 3);
        assert!(matches!(b, Err(RenameError::Busy)));
        for (path, stem) in paths.iter().zip(["a", "b", "c"]) {
            assert!(!path.exists());
            assert!(temp.path().join(format!("n_{stem}.jpg")).exists());
        }

        let again = RenameOrchestrator::new(scheduler.clone())
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect("lock is released after a run");
        assert!(again.renamed.is_empty());
    }

    #[tokio::test]
    async fn held_run_lock_leaves_files_untouched() {
        let (_temp, scheduler, paths) = setup("m_{{Test.Stem}}.jpg");
        let guard = scheduler.try_lock_run().expect("lock is free");

        let err = RenameOrchestrator::new(scheduler.clone())
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect_err("busy");

        assert!(matches!(err, RenameError::Busy));
        assert!(paths.iter().all(|p| p.exists()));
        drop(guard);
        assert!(scheduler.try_lock_run().is_some());
    }

    #[tokio::test]
    async fn invalid_template_aborts_before_touching_the_filesystem() {
        let (_temp, scheduler, paths) = setup("{{Test.Stem}}.jpg");
        scheduler.wait_idle().await;
        scheduler.set_template("{{ Test.Stem | shout }}");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        let err = orchestrator
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect_err("template does not compile");

        assert!(matches!(err, RenameError::InvalidTemplate(_)));
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn failure_stops_the_run_and_keeps_unprocessed_records() {
        let (temp, scheduler, paths) = setup("x_{{Test.Stem}}.jpg");
        fs::write(temp.path().join("x_b.jpg"), b"taken").expect("write blocker");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        let mut calls = Vec::new();
        let err = orchestrator
            .run(|done, total| calls.push((done, total)), CancellationToken::new())
            .await
            .expect_err("b collides");

        assert!(matches!(
            err,
            RenameError::Move(MoveError::AlreadyExists { .. })
        ));
        assert_eq!(err.path(), Some(paths[1].as_path()));
        assert_eq!(calls, vec![(1, 3)]);
        assert!(temp.path().join("x_a.jpg").exists());
        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert!(paths[2].exists());
        assert_eq!(remaining_names(&scheduler), vec!["b.jpg", "c.jpg"]);
    }

    #[tokio::test]
    async fn cancel_between_records_keeps_the_rest() {
        let (temp, scheduler, paths) = setup("y_{{Test.Stem}}.jpg");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        let token = CancellationToken::new();
        let trigger = token.clone();
        let mut calls = Vec::new();
        let calls_ref = &mut calls;
        let report = orchestrator
            .run(
                move |done, total| {
                    calls_ref.push((done, total));
                    if done == 1 {
                        trigger.cancel();
                    }
                },
                token,
            )
            .await
            .expect("cancel is not an error");

        assert_eq!(report.state, RunState::Canceled);
        assert_eq!(report.renamed.len(), 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(calls, vec![(1, 3)]);
        assert!(temp.path().join("y_a.jpg").exists());
        assert!(paths[1].exists() && paths[2].exists());
        assert_eq!(remaining_names(&scheduler), vec!["b.jpg", "c.jpg"]);
    }

    #[tokio::test]
    async fn shared_placeholder_pattern_numbers_each_file() {
        let (temp, scheduler, _paths) = setup("shot_##.jpg");
        let orchestrator = RenameOrchestrator::new(scheduler.clone());

        orchestrator
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect("run");

        for (n, stem) in ["a", "b", "c"].iter().enumerate() {
            let path = temp.path().join(format!("shot_{:02}.jpg", n + 1));
            assert_eq!(fs::read(path).expect("read"), stem.as_bytes());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removals_are_marshalled_through_the_owner_queue() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("a.jpg");
        fs::write(&path, b"a").expect("write fixture");

        let (dispatcher, mut queue) = owner_queue();
        let owner = tokio::spawn(async move { while queue.run_next().await {} });

        let scheduler = RenameScheduler::builder()
            .reader(Arc::new(stem_reader))
            .dispatcher(Arc::new(dispatcher))
            .build(Handle::current());
        let mut rx = scheduler.subscribe();
        scheduler.set_template("z_{{Test.Stem}}.jpg");
        scheduler.append_files([&path]);

        let report = RenameOrchestrator::new(scheduler.clone())
            .run(|_, _| {}, CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(report.renamed.len(), 1);
        assert!(scheduler.is_empty());

        let mut saw_removed = false;
        while let Ok(event) = rx.recv().await {
            if let WorkingSetEvent::Removed { index, .. } = event {
                assert_eq!(index, 0);
                saw_removed = true;
                break;
            }
        }
        assert!(saw_removed);
        owner.abort();
    }
}
