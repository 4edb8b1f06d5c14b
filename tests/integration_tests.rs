//! Integration tests for tree-importer
//!
//! These tests run whole imports against the in-memory repository and, for
//! the end-to-end case, a SQLite repository in a temporary directory.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use tree_importer::config::ImportConfig;
use tree_importer::error::{FilterError, ImportError, SetupError, SourceError, SourceResult, TaskError};
use tree_importer::import::{
    Authenticator, DefaultThreadingPolicy, ImportState, Importer, ImporterFilter, LoginContext,
    PerfBuffer, PerfLogger, ProgressSnapshot, SplitContext, ThreadingPolicy, PERF_HEADERS,
};
use tree_importer::repository::schema::keys;
use tree_importer::repository::{DocKind, MemoryRepository, SqliteRepository};
use tree_importer::source::{
    count_leaves, FileSourceNode, NodeRef, Payload, SourceFilter, SourceNode, SyntheticNode,
};

fn test_config(workers: usize, queue: usize, batch: usize) -> ImportConfig {
    ImportConfig {
        worker_count: workers,
        queue_capacity: queue,
        batch_size: batch,
        poll_interval: Duration::from_millis(5),
        warmup: Duration::ZERO,
        ..ImportConfig::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behavior {
    Normal,
    FailChildren,
    PanicPayload,
}

/// Hand-built source node with injectable misbehavior
#[derive(Debug, Clone)]
struct FakeNode {
    name: String,
    path: String,
    children: Option<Vec<FakeNode>>,
    delay: Duration,
    behavior: Behavior,
}

impl FakeNode {
    fn leaf(name: &str) -> Self {
        Self {
            name: name.into(),
            path: format!("/{}", name),
            children: None,
            delay: Duration::ZERO,
            behavior: Behavior::Normal,
        }
    }

    fn folder(name: &str, children: Vec<FakeNode>) -> Self {
        let mut node = Self {
            children: Some(children),
            ..Self::leaf(name)
        };
        node.rebase("");
        node
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn rebase(&mut self, parent: &str) {
        self.path = format!("{}/{}", parent, self.name);
        let path = self.path.clone();
        if let Some(children) = self.children.as_mut() {
            for child in children {
                child.rebase(&path);
            }
        }
    }
}

impl SourceNode for FakeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn children(&self) -> SourceResult<Vec<NodeRef>> {
        if self.behavior == Behavior::FailChildren {
            return Err(SourceError::ListFailed {
                path: self.path.clone(),
                reason: "listing refused".into(),
            });
        }
        Ok(self
            .children
            .iter()
            .flatten()
            .map(|c| Arc::new(c.clone()) as NodeRef)
            .collect())
    }

    fn payload(&self) -> SourceResult<Payload> {
        if self.behavior == Behavior::PanicPayload {
            panic!("payload of {} exploded", self.path);
        }
        thread::sleep(self.delay);
        Ok(Payload::new(self.name.as_bytes().to_vec()))
    }
}

/// Root with `folders` folders of `leaves` slow leaves each
fn slow_tree(folders: usize, leaves: usize, delay: Duration) -> FakeNode {
    FakeNode::folder(
        "root",
        (0..folders)
            .map(|f| {
                FakeNode::folder(
                    &format!("f{}", f),
                    (0..leaves)
                        .map(|l| FakeNode::leaf(&format!("l{}", l)).slow(delay))
                        .collect(),
                )
            })
            .collect(),
    )
}

struct AlwaysSplit;

impl ThreadingPolicy for AlwaysSplit {
    fn should_split(&self, ctx: &SplitContext<'_>) -> bool {
        !ctx.node.is_leaf()
    }

    fn name(&self) -> &'static str {
        "always"
    }
}

/// Records the depth of every approved split
struct RecordingPolicy {
    inner: DefaultThreadingPolicy,
    splits: Arc<Mutex<Vec<u32>>>,
}

impl ThreadingPolicy for RecordingPolicy {
    fn should_split(&self, ctx: &SplitContext<'_>) -> bool {
        let split = self.inner.should_split(ctx);
        if split {
            self.splits.lock().push(ctx.depth);
        }
        split
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct RecordingFilter {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    refuse: bool,
}

impl ImporterFilter for RecordingFilter {
    fn name(&self) -> &str {
        self.name
    }

    fn before_import(&self) -> Result<(), FilterError> {
        self.log.lock().push(format!("before:{}", self.name));
        if self.refuse {
            return Err(FilterError::Rejected {
                filter: self.name.into(),
                reason: "maintenance window".into(),
            });
        }
        Ok(())
    }

    fn after_import(&self, failure: Option<&ImportError>) -> Result<(), FilterError> {
        self.log
            .lock()
            .push(format!("after:{}:{}", self.name, failure.is_some()));
        Ok(())
    }
}

struct Denied;

impl Authenticator for Denied {
    fn login(&self) -> Result<Box<dyn LoginContext>, SetupError> {
        Err(SetupError::Authentication {
            reason: "bad credentials".into(),
        })
    }
}

#[test]
fn test_three_leaves_two_workers() {
    let repo = MemoryRepository::new();
    let source: NodeRef = Arc::new(SyntheticNode::root(1, 3));
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(repo.clone())).unwrap();

    let report = importer.run().unwrap();

    assert_eq!(report.state, ImportState::Done);
    assert_eq!(report.documents, 3);
    assert_eq!(importer.counters().total(), 3);
    assert_eq!(report.node_errors, 0);
    assert!(report.is_success());
    assert_eq!(repo.count(DocKind::File), 3);
    // One full batch, then the partial batch on close
    assert_eq!(repo.commit_sizes(), vec![2, 1]);
}

#[test]
fn test_failing_leaf_is_skipped() {
    let repo = MemoryRepository::new();
    repo.fail_on("doc-00001.txt");
    let source: NodeRef = Arc::new(SyntheticNode::root(2, 3));
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(repo.clone())).unwrap();

    let report = importer.run().unwrap();

    // doc-00001.txt exists once per folder
    assert_eq!(report.state, ImportState::Done);
    assert_eq!(report.documents, 9 - 3);
    assert_eq!(report.node_errors, 3);
    assert!(report.task_failures.is_empty());
    assert_eq!(repo.count(DocKind::File), 6);
}

#[test]
fn test_single_failing_leaf() {
    let repo = MemoryRepository::new();
    repo.fail_on("doc-00001.txt");
    let source: NodeRef = Arc::new(SyntheticNode::root(1, 3));
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(repo.clone())).unwrap();

    let report = importer.run().unwrap();

    assert_eq!(report.state, ImportState::Done);
    assert_eq!(report.documents, 2);
    assert_eq!(report.node_errors, 1);
}

#[test]
fn test_failing_folder_skips_subtree() {
    let repo = MemoryRepository::new();
    repo.fail_on("folder-001");
    let source: NodeRef = Arc::new(SyntheticNode::root(3, 3));
    let mut importer = Importer::new(test_config(3, 10, 5), source, Arc::new(repo.clone())).unwrap();

    let report = importer.run().unwrap();

    // folder-001 fails once at the first level and once below each sibling
    // folder-000 and folder-002: 9 + 3 + 3 leaves lost
    assert_eq!(report.node_errors, 3);
    assert_eq!(report.documents, 27 - 15);
}

#[test]
fn test_before_filter_failure_aborts_scheduling() {
    let repo = MemoryRepository::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let source: NodeRef = Arc::new(SyntheticNode::root(2, 3));
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(repo.clone())).unwrap();
    importer.add_filter(RecordingFilter {
        name: "gate",
        log: Arc::clone(&log),
        refuse: true,
    });
    importer.add_filter(RecordingFilter {
        name: "audit",
        log: Arc::clone(&log),
        refuse: false,
    });

    let report = importer.run().unwrap();

    assert_eq!(report.state, ImportState::Done);
    assert_eq!(report.documents, 0);
    assert_eq!(report.scheduler.enqueued, 0);
    assert_eq!(repo.count(DocKind::File), 0);
    match &report.failure {
        Some(ImportError::Filter(e)) => assert_eq!(
            e,
            &FilterError::Rejected {
                filter: "gate".into(),
                reason: "maintenance window".into(),
            }
        ),
        other => panic!("unexpected failure: {:?}", other),
    }
    // Later before-filters are skipped, every after-filter runs
    assert_eq!(
        *log.lock(),
        vec!["before:gate", "after:gate:true", "after:audit:true"]
    );
}

#[test]
fn test_missing_target_fails_setup() {
    let repo = MemoryRepository::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = ImportConfig {
        target_path: "/missing".into(),
        ..test_config(2, 10, 2)
    };
    let source: NodeRef = Arc::new(SyntheticNode::root(1, 3));
    let mut importer = Importer::new(config, source, Arc::new(repo.clone()))
        .unwrap()
        .with_job_history(Arc::new(repo.clone()));
    importer.add_filter(RecordingFilter {
        name: "audit",
        log: Arc::clone(&log),
        refuse: false,
    });

    let result = importer.run();

    assert!(matches!(
        result,
        Err(ImportError::Setup(SetupError::TargetNotFound { ref path })) if path == "/missing"
    ));
    assert_eq!(importer.state(), ImportState::Failed);
    assert_eq!(*log.lock(), vec!["after:audit:true"]);
    assert_eq!(repo.jobs(), vec!["started:tree-import", "ended:tree-import:failed"]);
    assert_eq!(repo.count(DocKind::File), 0);
}

#[test]
fn test_existing_target_receives_tree() {
    let repo = MemoryRepository::new();
    let target = repo.ensure_container("/imports/2024");
    let config = ImportConfig {
        target_path: "/imports/2024".into(),
        ..test_config(2, 10, 4)
    };
    let source: NodeRef = Arc::new(SyntheticNode::root(2, 2));
    let mut importer = Importer::new(config, source, Arc::new(repo.clone())).unwrap();

    let report = importer.run().unwrap();

    assert_eq!(report.documents, 4);
    let docs = repo.documents();
    assert!(docs
        .iter()
        .any(|d| d.path == "/imports/2024/folder-000" && d.parent_id == target.id));
    assert!(docs
        .iter()
        .any(|d| d.path == "/imports/2024/folder-001/doc-00001.txt"));
}

#[test]
fn test_authentication_failure() {
    let repo = MemoryRepository::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let source: NodeRef = Arc::new(SyntheticNode::root(1, 3));
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(repo.clone()))
        .unwrap()
        .with_authenticator(Denied)
        .with_job_history(Arc::new(repo.clone()));
    importer.add_filter(RecordingFilter {
        name: "audit",
        log: Arc::clone(&log),
        refuse: false,
    });

    let result = importer.run();

    assert!(matches!(
        result,
        Err(ImportError::Setup(SetupError::Authentication { .. }))
    ));
    assert_eq!(importer.state(), ImportState::Failed);
    assert_eq!(*log.lock(), vec!["after:audit:true"]);
    assert!(repo.jobs().is_empty());
    assert_eq!(repo.sessions_opened(), 0);
}

#[test]
fn test_refused_session_fails_setup() {
    let repo = MemoryRepository::new();
    repo.refuse_sessions();
    let source: NodeRef = Arc::new(SyntheticNode::root(1, 3));
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(repo)).unwrap();

    let result = importer.run();

    assert!(matches!(result, Err(ImportError::Setup(SetupError::Session(_)))));
    assert_eq!(importer.state(), ImportState::Failed);
}

#[test]
fn test_queue_capacity_one_wide_tree() {
    let repo = MemoryRepository::new();
    // Folder tasks take milliseconds, the root submits all 50 at once
    let source: NodeRef = Arc::new(slow_tree(50, 4, Duration::from_millis(1)));
    let mut importer = Importer::new(test_config(2, 1, 10), source, Arc::new(repo.clone()))
        .unwrap()
        .with_policy(AlwaysSplit);

    let report = importer.run().unwrap();

    assert_eq!(report.documents, 200);
    assert_eq!(repo.count(DocKind::File), 200);
    assert!(report.scheduler.caller_runs > 0);
    // Root plus one task per folder, either queued or run by the submitter
    assert_eq!(report.scheduler.enqueued + report.scheduler.caller_runs, 51);
    assert_eq!(report.scheduler.completed, 51);
}

#[test]
fn test_split_depth_is_bounded() {
    let splits = Arc::new(Mutex::new(Vec::new()));
    let source: NodeRef = Arc::new(SyntheticNode::root(4, 3));
    let mut importer = Importer::new(test_config(4, 100, 5), source, Arc::new(MemoryRepository::new()))
        .unwrap()
        .with_policy(RecordingPolicy {
            inner: DefaultThreadingPolicy::new(1),
            splits: Arc::clone(&splits),
        });

    let report = importer.run().unwrap();

    assert_eq!(report.documents, 81);
    let splits = splits.lock();
    assert!(splits.iter().all(|&depth| depth < 1));
    assert_eq!(report.scheduler.enqueued + report.scheduler.caller_runs, splits.len() as u64 + 1);
}

#[test]
fn test_rerun_yields_same_total() {
    let repo = MemoryRepository::new();
    let source: NodeRef = Arc::new(SyntheticNode::root(3, 3));
    let mut importer = Importer::new(test_config(3, 4, 7), source, Arc::new(repo.clone())).unwrap();

    let first = importer.run().unwrap();
    repo.clear();
    let second = importer.run().unwrap();

    assert_eq!(first.documents, 27);
    assert_eq!(second.documents, 27);
    assert_eq!(repo.count(DocKind::File), 27);
}

#[test]
fn test_rerun_without_clearing_reports_duplicates() {
    let repo = MemoryRepository::new();
    let source: NodeRef = Arc::new(SyntheticNode::root(1, 4));
    let mut importer = Importer::new(test_config(2, 4, 2), source, Arc::new(repo.clone())).unwrap();

    importer.run().unwrap();
    let second = importer.run().unwrap();

    assert_eq!(second.documents, 0);
    assert_eq!(second.node_errors, 4);
}

#[test]
fn test_every_task_accounted_for() {
    let source: NodeRef = Arc::new(SyntheticNode::root(3, 5));
    let mut importer = Importer::new(test_config(3, 2, 3), source, Arc::new(MemoryRepository::new()))
        .unwrap()
        .with_policy(AlwaysSplit);

    let report = importer.run().unwrap();

    let stats = report.scheduler;
    assert_eq!(report.documents, 125);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.cancelled, 0);
    // 1 root + 5 + 25 folders
    assert_eq!(stats.enqueued + stats.caller_runs, 31);
    assert_eq!(stats.completed, 31);
    let per_worker: u64 = report.per_worker.iter().map(|(_, n)| n).sum();
    assert_eq!(per_worker, 125);
}

#[test]
fn test_stop_from_another_thread() {
    let source: NodeRef = Arc::new(slow_tree(10, 50, Duration::from_millis(2)));
    let mut importer = Importer::new(test_config(2, 10, 10), source, Arc::new(MemoryRepository::new()))
        .unwrap()
        .with_policy(AlwaysSplit);

    let stop = importer.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stop.stop();
    });

    let report = importer.run().unwrap();
    stopper.join().unwrap();

    assert_eq!(report.state, ImportState::Done);
    assert!(report.interrupted);
    assert!(report.documents < 500);
    assert!(!report.is_success());
}

#[test]
fn test_source_failure_recorded_against_task() {
    let tree = FakeNode::folder(
        "root",
        vec![
            FakeNode::leaf("readme"),
            FakeNode::folder("broken", vec![FakeNode::leaf("never")])
                .behaving(Behavior::FailChildren),
        ],
    );
    let source: NodeRef = Arc::new(tree);
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(MemoryRepository::new()))
        .unwrap()
        .with_policy(AlwaysSplit);

    let report = importer.run().unwrap();

    assert_eq!(report.state, ImportState::Done);
    assert_eq!(report.documents, 1);
    assert_eq!(report.task_failures.len(), 1);
    assert!(matches!(
        report.task_failures[0],
        TaskError::Source {
            source: SourceError::ListFailed { .. },
            ..
        }
    ));
    assert_eq!(report.scheduler.failed, 1);
}

#[test]
fn test_panicking_task_is_contained() {
    let tree = FakeNode::folder(
        "root",
        vec![
            FakeNode::leaf("fine"),
            FakeNode::folder(
                "boom",
                vec![FakeNode::leaf("bad").behaving(Behavior::PanicPayload)],
            ),
            FakeNode::leaf("also-fine"),
        ],
    );
    let repo = MemoryRepository::new();
    let source: NodeRef = Arc::new(tree);
    let mut importer = Importer::new(test_config(2, 10, 2), source, Arc::new(repo.clone()))
        .unwrap()
        .with_policy(AlwaysSplit);

    let report = importer.run().unwrap();

    assert_eq!(report.documents, 2);
    assert_eq!(repo.count(DocKind::File), report.documents);
    assert_eq!(report.scheduler.panicked, 1);
    assert!(matches!(report.task_failures[0], TaskError::Panicked { .. }));
}

#[test]
fn test_panicking_leaf_keeps_counted_batch() {
    let tree = FakeNode::folder(
        "root",
        vec![
            FakeNode::leaf("a"),
            FakeNode::leaf("b"),
            FakeNode::leaf("c").behaving(Behavior::PanicPayload),
        ],
    );
    let repo = MemoryRepository::new();
    let source: NodeRef = Arc::new(tree);
    let mut importer = Importer::new(test_config(2, 10, 10), source, Arc::new(repo.clone())).unwrap();

    let report = importer.run().unwrap();

    assert_eq!(report.state, ImportState::Done);
    assert_eq!(report.documents, 2);
    assert_eq!(repo.count(DocKind::File), 2);
    assert_eq!(repo.commit_sizes(), vec![2]);
    assert_eq!(report.scheduler.panicked, 1);
}

#[test]
fn test_perf_log_written() {
    let buffer = PerfBuffer::new();
    let perf_log = PerfLogger::new(buffer.clone()).unwrap();
    let config = ImportConfig {
        sample_interval: Duration::ZERO,
        ..test_config(2, 10, 5)
    };
    let source: NodeRef = Arc::new(slow_tree(2, 20, Duration::from_millis(2)));
    let mut importer = Importer::new(config, source, Arc::new(MemoryRepository::new()))
        .unwrap()
        .with_perf_log(perf_log);

    let report = importer.run().unwrap();

    assert_eq!(report.documents, 40);
    assert!(!report.samples.is_empty());
    let lines = buffer.lines();
    assert_eq!(lines[0], PERF_HEADERS.join("\t"));
    assert_eq!(lines.len(), report.samples.len() + 1);
    let last: Vec<&str> = lines[lines.len() - 1].split('\t').collect();
    assert_eq!(last.len(), 3);
    assert!(last[0].parse::<u64>().unwrap() <= 40);
}

#[test]
fn test_progress_observer_called() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let source: NodeRef = Arc::new(slow_tree(2, 10, Duration::from_millis(2)));
    let mut importer = Importer::new(test_config(2, 10, 5), source, Arc::new(MemoryRepository::new()))
        .unwrap()
        .with_progress(Arc::new(move |snapshot: &ProgressSnapshot| {
            recorder.lock().push(snapshot.documents)
        }));

    let report = importer.run().unwrap();

    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert!(seen.iter().all(|&n| n <= report.documents));
}

#[test]
fn test_sqlite_end_to_end() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree");
    std::fs::create_dir_all(tree.join("a/b")).unwrap();
    std::fs::write(tree.join("a/1.txt"), b"one").unwrap();
    std::fs::write(tree.join("a/b/2.txt"), b"two").unwrap();
    std::fs::write(tree.join("3.txt"), b"three").unwrap();
    std::fs::write(tree.join("3.txt.properties"), b"dc:title=Three").unwrap();

    let db_path = dir.path().join("repo.db");
    let repo = SqliteRepository::open(&db_path).unwrap();
    repo.ensure_container("/imports").unwrap();

    let node = FileSourceNode::open(&tree, SourceFilter::default()).unwrap();
    assert_eq!(count_leaves(&node).unwrap(), 3);

    let config = ImportConfig {
        target_path: "/imports".into(),
        job_name: "e2e".into(),
        ..test_config(2, 10, 2)
    };
    let mut importer = Importer::new(config, Arc::new(node), Arc::new(repo.clone()))
        .unwrap()
        .with_job_history(Arc::new(repo.clone()));

    let report = importer.run().unwrap();

    assert_eq!(report.documents, 3);
    assert_eq!(repo.count(DocKind::File).unwrap(), 3);
    // imports, a, a/b
    assert_eq!(repo.count(DocKind::Folder).unwrap(), 3);
    assert_eq!(repo.import_info(keys::STATUS).unwrap().as_deref(), Some("done"));
    assert_eq!(repo.import_info(keys::JOB_NAME).unwrap().as_deref(), Some("e2e"));
    assert_eq!(repo.import_info(keys::TOTAL_DOCUMENTS).unwrap().as_deref(), Some("3"));

    repo.finalize().unwrap();
    assert!(repo.file_size().unwrap() > 0);
}

#[test]
fn test_exclude_patterns_respected() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
    std::fs::write(dir.path().join(".git/objects/x"), b"x").unwrap();
    std::fs::write(dir.path().join("keep.txt"), b"keep").unwrap();

    let filter = SourceFilter::new(vec![regex::Regex::new(r"/\.git").unwrap()]);
    let node = FileSourceNode::open(dir.path(), filter).unwrap();
    let repo = MemoryRepository::new();
    let mut importer =
        Importer::new(test_config(2, 10, 2), Arc::new(node), Arc::new(repo.clone())).unwrap();

    let report = importer.run().unwrap();

    assert_eq!(report.documents, 1);
    assert_eq!(repo.count(DocKind::Folder), 0);
}
