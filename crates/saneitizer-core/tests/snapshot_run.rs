//! Full runs over a snapshot file: load, scan, coordinate, queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use saneitizer_core::checker::{Checker, CheckerConfig, PageStore};
use saneitizer_core::coordinator::{AllClustersRemediator, ClusterCoordinator};
use saneitizer_core::index_layout::{IndexLayout, IndexLayoutConfig};
use saneitizer_core::metrics::{CounterRegistry, SANITIZATION_COUNTER};
use saneitizer_core::remediator::{
    ChannelJobQueue, Job, JobQueue, JobReceiver, PrintingRemediator, QueueingRemediator,
};
use saneitizer_core::scan::{PauseReason, SaneitizeRun, ScanLimits, ScanRange};
use saneitizer_core::snapshot::Snapshot;
use tempfile::TempDir;

// Page 3 is a redirect still indexed on both clusters, page 5 is missing
// from codfw only, doc 120 is a ghost past the highest page id.
const SNAPSHOT: &str = r#"{
    "pages": [
        {"id": 1, "title": {"namespace": 0, "text": "Alpha"}, "latest_revision": 10},
        {"id": 2, "title": {"namespace": 0, "text": "Beta"}, "latest_revision": 20},
        {"id": 3, "title": {"namespace": 0, "text": "Gamma"}, "latest_revision": 30,
         "is_redirect": true, "content_redirect": true},
        {"id": 5, "title": {"namespace": 0, "text": "Epsilon"}, "latest_revision": 50}
    ],
    "clusters": {
        "eqiad": [
            {"doc_id": "1", "index": "enwiki_content_1", "namespace": 0, "title": "Alpha", "version": 10},
            {"doc_id": "2", "index": "enwiki_content_1", "namespace": 0, "title": "Beta", "version": 20},
            {"doc_id": "3", "index": "enwiki_content_1", "namespace": 0, "title": "Gamma", "version": 30},
            {"doc_id": "5", "index": "enwiki_content_1", "namespace": 0, "title": "Epsilon", "version": 50},
            {"doc_id": "120", "index": "enwiki_general_1", "namespace": 2, "title": "Ghost", "version": 1}
        ],
        "codfw": [
            {"doc_id": "1", "index": "enwiki_content_1", "namespace": 0, "title": "Alpha", "version": 10},
            {"doc_id": "2", "index": "enwiki_content_1", "namespace": 0, "title": "Beta", "version": 20},
            {"doc_id": "3", "index": "enwiki_content_1", "namespace": 0, "title": "Gamma", "version": 30},
            {"doc_id": "120", "index": "enwiki_general_1", "namespace": 2, "title": "Ghost", "version": 1}
        ]
    }
}"#;

type Broadcast = AllClustersRemediator<PrintingRemediator<QueueingRemediator, Vec<u8>>>;

struct Setup {
    run: SaneitizeRun<QueueingRemediator, Broadcast>,
    store: Arc<dyn PageStore>,
    metrics: Arc<CounterRegistry>,
    per_cluster: BTreeMap<String, JobReceiver>,
    broadcast: JobReceiver,
    broadcast_queue: Arc<dyn JobQueue>,
}

fn setup(batch_size: usize) -> (TempDir, Setup) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("snapshot.json");
    std::fs::write(&path, SNAPSHOT).unwrap();
    let (store, indexes) = Snapshot::load(&path).unwrap().into_backends();
    let store: Arc<dyn PageStore> = store;

    let layout = Arc::new(
        IndexLayout::new(IndexLayoutConfig {
            wiki_id: "enwiki".to_string(),
            ..IndexLayoutConfig::default()
        })
        .unwrap(),
    );
    let metrics = Arc::new(CounterRegistry::new());
    let config = CheckerConfig {
        log_sane: true,
        fast_redirect_check: false,
    };

    let mut checkers = Vec::new();
    let mut remediators = BTreeMap::new();
    let mut per_cluster = BTreeMap::new();
    for (cluster, index) in indexes {
        checkers.push(
            Checker::new(
                Arc::clone(&store),
                index,
                Arc::clone(&layout),
                Arc::clone(&metrics),
            )
            .with_config(config),
        );
        let (queue, rx) = ChannelJobQueue::bounded(64);
        remediators.insert(
            cluster.clone(),
            QueueingRemediator::new(Some(cluster.clone()), Arc::new(queue)),
        );
        per_cluster.insert(cluster, rx);
    }

    let (queue, broadcast) = ChannelJobQueue::bounded(64);
    let broadcast_queue: Arc<dyn JobQueue> = Arc::new(queue);
    let all = AllClustersRemediator::from_parts(
        remediators.keys().cloned().collect(),
        PrintingRemediator::new(
            QueueingRemediator::new(None, Arc::clone(&broadcast_queue)),
            Vec::new(),
        ),
    );
    let coordinator = ClusterCoordinator::with_fresh_recorders(remediators, all).unwrap();
    let run = SaneitizeRun::new(checkers, coordinator, batch_size).unwrap();
    (
        tmp,
        Setup {
            run,
            store,
            metrics,
            per_cluster,
            broadcast,
            broadcast_queue,
        },
    )
}

#[test]
fn full_run_routes_shared_and_divergent_fixes() {
    let (_tmp, mut s) = setup(200);
    let range = ScanRange::resolve(None, None, s.store.as_ref()).unwrap();
    assert_eq!(range, ScanRange::new(0, 105));

    // 120 is past the default range; scan it explicitly.
    let progress = s.run.run(ScanRange::new(range.from_id, 120)).unwrap();
    assert!(progress.caught_up);
    assert_eq!(progress.batches, 1);
    assert_eq!(progress.pages_scanned, 121);

    // The two clusters disagree on page 5, so nothing is broadcast.
    assert_eq!(progress.optimized_batches, 0);
    assert!(s.broadcast.is_empty());

    let eqiad = s.per_cluster["eqiad"].drain();
    let codfw = s.per_cluster["codfw"].drain();
    // eqiad: redirect (delete + resync), ghost (delete).
    assert_eq!(eqiad.len(), 3);
    // codfw: redirect (delete + resync), page 5 (resync), ghost (delete).
    assert_eq!(codfw.len(), 4);
    assert!(codfw.iter().all(|job| job.cluster() == Some("codfw")));
    assert!(
        codfw
            .iter()
            .any(|job| matches!(job, Job::Resync(r) if r.title.text == "Epsilon"))
    );

    assert_eq!(progress.clusters["eqiad"].fixed, 2);
    assert_eq!(progress.clusters["codfw"].fixed, 3);
    assert_eq!(
        s.metrics.value(
            SANITIZATION_COUNTER,
            &[
                ("problem", "redirect_in_index"),
                ("search_cluster", "codfw"),
                ("action", "fixed"),
            ],
        ),
        1
    );
}

#[test]
fn agreeing_batches_are_broadcast_and_printed() {
    let (_tmp, mut s) = setup(2);
    // Batch 3..=4 holds only the redirect, which both clusters share.
    let progress = s.run.run(ScanRange::new(3, 4)).unwrap();
    assert_eq!(progress.optimized_batches, 1);

    let jobs = s.broadcast.drain();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|job| job.cluster().is_none()));
    assert!(s.per_cluster.values().all(JobReceiver::is_empty));

    let coordinator = s.run.into_coordinator();
    let printed = String::from_utf8(coordinator.broadcast().inner().sink().clone()).unwrap();
    assert!(printed.contains("Redirect in index"));
    assert!(printed.contains("Gamma"));
    assert!(printed.contains("[content]"));
}

#[test]
fn backed_up_queue_pauses_the_run() {
    let (_tmp, s) = setup(2);
    let broadcast_queue = Arc::clone(&s.broadcast_queue);
    let mut run = s
        .run
        .with_pressure_source(Arc::clone(&broadcast_queue))
        .with_limits(ScanLimits {
            max_pressure: Some(1),
            ..ScanLimits::default()
        });

    // The broadcast jobs for the redirect stay unconsumed and push depth to 2.
    let progress = run.run(ScanRange::new(3, 8)).unwrap();
    assert_eq!(progress.batches, 1);
    let pause = progress.paused.unwrap();
    assert_eq!(pause.resume_from, 5);
    assert_eq!(pause.reason, PauseReason::Pressure { depth: 2, max: 1 });

    s.broadcast.drain();
    let resumed = run.run(ScanRange::new(pause.resume_from, 8)).unwrap();
    assert!(resumed.caught_up);
}
