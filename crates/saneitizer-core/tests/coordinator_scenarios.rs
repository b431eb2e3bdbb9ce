//! End-to-end coordinator scenarios against real job queues.
//!
//! Every per-cluster remediator and the broadcast remediator get their own
//! bounded queue, so the tests can tell exactly where each job landed.

use std::collections::BTreeMap;
use std::sync::Arc;

use saneitizer_core::assignment::{ClusterAssignment, ClusterConfig, MultiClusterAssignment};
use saneitizer_core::coordinator::{
    AllClustersQueueingRemediator, AllClustersRemediator, ClusterCoordinator,
};
use saneitizer_core::error::{CoordinatorError, RemediationError, TransportError};
use saneitizer_core::model::{Page, Title};
use saneitizer_core::remediator::{
    ChannelJobQueue, Job, JobQueue, JobReceiver, QueueingRemediator, RecordingRemediator,
    Remediator,
};

// =============================================================================
// Fixture
// =============================================================================

struct Harness {
    coordinator: ClusterCoordinator<QueueingRemediator, AllClustersQueueingRemediator>,
    per_cluster: BTreeMap<String, JobReceiver>,
    broadcast: JobReceiver,
}

impl Harness {
    fn new(managed: &[&str], writable: &[&str]) -> Self {
        let mut remediators = BTreeMap::new();
        let mut per_cluster = BTreeMap::new();
        for cluster in managed {
            let (queue, rx) = ChannelJobQueue::bounded(32);
            remediators.insert(
                (*cluster).to_string(),
                QueueingRemediator::new(Some((*cluster).to_string()), Arc::new(queue))
                    .with_clock(Arc::new(|| 1_700_000_000)),
            );
            per_cluster.insert((*cluster).to_string(), rx);
        }
        let (queue, broadcast) = ChannelJobQueue::bounded(32);
        let all = AllClustersRemediator::from_parts(
            writable.iter().map(|c| (*c).to_string()).collect(),
            QueueingRemediator::new(None, Arc::new(queue)).with_clock(Arc::new(|| 1_700_000_000)),
        );
        let coordinator = ClusterCoordinator::with_fresh_recorders(remediators, all)
            .expect("coordinator should build");
        Self {
            coordinator,
            per_cluster,
            broadcast,
        }
    }

    fn record(&mut self, cluster: &str) -> &mut RecordingRemediator {
        self.coordinator
            .recorder_mut(cluster)
            .expect("cluster should be managed")
    }

    fn jobs(&self, cluster: &str) -> Vec<Job> {
        self.per_cluster[cluster].drain()
    }
}

fn page() -> Page {
    Page::new(42, Title::new(0, "Answer"), 7)
}

fn job_shape(jobs: &[Job]) -> Vec<(&'static str, Option<String>)> {
    jobs.iter()
        .map(|job| {
            let kind = if job.is_delete() { "delete_doc" } else { "resync" };
            (kind, job.cluster().map(str::to_string))
        })
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn identical_redirects_on_all_writable_clusters_are_broadcast_once() {
    let mut h = Harness::new(&["c1", "c2"], &["c1", "c2"]);
    for cluster in ["c1", "c2"] {
        h.record(cluster)
            .redirect_in_index("42", &page(), "content")
            .unwrap();
    }

    let report = h.coordinator.send_batch().unwrap();
    assert!(report.optimized);
    assert_eq!(report.broadcast_actions, 1);

    let broadcast = h.broadcast.drain();
    assert_eq!(
        job_shape(&broadcast),
        vec![("delete_doc", None), ("resync", None)]
    );
    match &broadcast[0] {
        Job::DeleteDoc(job) => {
            assert_eq!(job.doc_id, "42");
            assert_eq!(job.index_suffix.as_deref(), Some("content"));
        }
        other => panic!("expected delete first, got {other:?}"),
    }
    assert!(h.jobs("c1").is_empty());
    assert!(h.jobs("c2").is_empty());
}

#[test]
fn divergent_fixes_go_to_each_cluster() {
    let mut h = Harness::new(&["c1", "c2"], &["c1", "c2"]);
    h.record("c1")
        .redirect_in_index("42", &page(), "content")
        .unwrap();
    h.record("c2").page_not_in_index(&page()).unwrap();

    let report = h.coordinator.send_batch().unwrap();
    assert!(!report.optimized);
    assert!(h.broadcast.is_empty());
    assert_eq!(
        job_shape(&h.jobs("c1")),
        vec![
            ("delete_doc", Some("c1".to_string())),
            ("resync", Some("c1".to_string()))
        ]
    );
    assert_eq!(
        job_shape(&h.jobs("c2")),
        vec![("resync", Some("c2".to_string()))]
    );
}

#[test]
fn single_managed_cluster_of_two_writable_is_not_broadcast() {
    let mut h = Harness::new(&["c1"], &["c1", "c2"]);
    h.record("c1")
        .ghost_page_in_index("42", &Title::new(0, "Gone"))
        .unwrap();

    h.coordinator.send_batch().unwrap();
    assert!(h.broadcast.is_empty());
    assert_eq!(
        job_shape(&h.jobs("c1")),
        vec![("delete_doc", Some("c1".to_string()))]
    );
}

#[test]
fn one_cluster_needing_nothing_blocks_broadcast() {
    let mut h = Harness::new(&["c1", "c2", "c3"], &["c1", "c2", "c3"]);
    for cluster in ["c1", "c2"] {
        h.record(cluster).old_document(&page()).unwrap();
    }

    h.coordinator.send_batch().unwrap();
    assert!(h.broadcast.is_empty());
    assert_eq!(h.jobs("c1").len(), 1);
    assert_eq!(h.jobs("c2").len(), 1);
    assert!(h.jobs("c3").is_empty());
}

#[test]
fn wrong_index_queues_delete_before_resync() {
    let mut h = Harness::new(&["c1"], &["c1"]);
    h.record("c1")
        .page_in_wrong_index("42", &page(), "general")
        .unwrap();

    h.coordinator.send_batch().unwrap();
    let jobs = h.broadcast.drain();
    assert_eq!(
        job_shape(&jobs),
        vec![("delete_doc", None), ("resync", None)]
    );
    match &jobs[0] {
        Job::DeleteDoc(job) => assert_eq!(job.index_suffix.as_deref(), Some("general")),
        other => panic!("expected delete first, got {other:?}"),
    }
    match &jobs[1] {
        Job::Resync(job) => {
            assert_eq!(job.update_kind, "saneitizer");
            assert!(!job.priority);
            assert_eq!(job.root_event_time, 1_700_000_000);
        }
        other => panic!("expected resync second, got {other:?}"),
    }
}

#[test]
fn mismatched_keys_fail_before_any_call() {
    let (queue, _rx) = ChannelJobQueue::bounded(4);
    let queue: Arc<dyn JobQueue> = Arc::new(queue);
    let remediators = BTreeMap::from([
        (
            "c1".to_string(),
            QueueingRemediator::new(Some("c1".to_string()), Arc::clone(&queue)),
        ),
        (
            "c2".to_string(),
            QueueingRemediator::new(Some("c2".to_string()), Arc::clone(&queue)),
        ),
    ]);
    let recorders = BTreeMap::from([
        ("c1".to_string(), RecordingRemediator::new()),
        ("c3".to_string(), RecordingRemediator::new()),
    ]);
    let all = AllClustersRemediator::from_parts(
        ["c1", "c2", "c3"].iter().map(|c| (*c).to_string()).collect(),
        QueueingRemediator::new(None, queue),
    );

    let err = ClusterCoordinator::new(remediators, recorders, all)
        .err()
        .expect("construction should fail");
    assert!(matches!(err, CoordinatorError::ClusterMismatch { .. }));
}

#[test]
fn full_queue_surfaces_as_transport_error_and_keeps_logs() {
    let (queue, _rx) = ChannelJobQueue::bounded(1);
    let remediators = BTreeMap::from([(
        "c1".to_string(),
        QueueingRemediator::new(Some("c1".to_string()), Arc::new(queue)),
    )]);
    let (bq, _brx) = ChannelJobQueue::bounded(1);
    let all = AllClustersRemediator::from_parts(
        ["c1", "c2"].iter().map(|c| (*c).to_string()).collect(),
        QueueingRemediator::new(None, Arc::new(bq)),
    );
    let mut coordinator = ClusterCoordinator::with_fresh_recorders(remediators, all).unwrap();
    coordinator
        .recorder_mut("c1")
        .unwrap()
        .redirect_in_index("42", &page(), "content")
        .unwrap();

    let err = coordinator.send_batch().unwrap_err();
    assert!(matches!(
        err,
        RemediationError::Transport(TransportError::QueueFull { capacity: 1 })
    ));
    assert_eq!(coordinator.recorder("c1").unwrap().actions().len(), 1);
}

#[test]
fn broadcast_uses_assignment_writable_set() {
    let config: ClusterConfig = toml::from_str(
        r#"
        wiki_id = "enwiki"
        default_cluster = "eqiad"
        write_clusters = ["eqiad", "codfw"]

        [clusters.eqiad]
        [clusters.codfw]
        "#,
    )
    .unwrap();
    let assignment = MultiClusterAssignment::new(config).unwrap();
    assert!(assignment.can_write_to_cluster(
        "codfw",
        saneitizer_core::assignment::UpdateGroup::Saneitizer
    ));

    let (queue, rx) = ChannelJobQueue::bounded(8);
    let queue: Arc<dyn JobQueue> = Arc::new(queue);
    let remediators: BTreeMap<String, QueueingRemediator> = ["codfw", "eqiad"]
        .iter()
        .map(|c| {
            (
                (*c).to_string(),
                QueueingRemediator::new(Some((*c).to_string()), Arc::clone(&queue)),
            )
        })
        .collect();
    let all = AllClustersQueueingRemediator::new(&assignment, Arc::clone(&queue));
    let mut coordinator = ClusterCoordinator::with_fresh_recorders(remediators, all).unwrap();
    for cluster in ["codfw", "eqiad"] {
        coordinator
            .recorder_mut(cluster)
            .unwrap()
            .page_not_in_index(&page())
            .unwrap();
    }

    assert!(coordinator.send_batch().unwrap().optimized);
    let jobs = rx.drain();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].cluster(), None);
}
