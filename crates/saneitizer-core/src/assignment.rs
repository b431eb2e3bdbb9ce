//! Cluster assignment: which clusters exist and which accept writes.
//!
//! The checker and coordinator only ever ask for the writable set of the
//! sanitizer update group. Everything else here exists so a deployment can
//! describe its clusters in configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AssignmentError;
use crate::index_layout::DEFAULT_WIKI_ID;

/// Group name used when a cluster or write table does not name one.
pub const DEFAULT_GROUP: &str = "default";

/// Kind of update a write belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateGroup {
    Page,
    Archive,
    Saneitizer,
}

impl UpdateGroup {
    pub const ALL: [Self; 3] = [Self::Page, Self::Archive, Self::Saneitizer];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Archive => "archive",
            Self::Saneitizer => "saneitizer",
        }
    }
}

impl fmt::Display for UpdateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrow query interface over cluster topology.
pub trait ClusterAssignment: Send + Sync {
    /// Clusters that accept writes for `group`.
    fn writable_clusters(&self, group: UpdateGroup) -> BTreeSet<String>;

    fn can_write_to_cluster(&self, cluster: &str, group: UpdateGroup) -> bool {
        self.writable_clusters(group).contains(cluster)
    }

    fn has_cluster(&self, cluster: &str) -> bool;

    /// Cluster serving default search traffic.
    fn search_cluster(&self) -> &str;

    /// Clusters this deployment maintains indexes on.
    fn managed_clusters(&self) -> BTreeSet<String>;
}

/// A single cluster that is writable for every update group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantAssignment {
    cluster: String,
}

impl ConstantAssignment {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }
}

impl ClusterAssignment for ConstantAssignment {
    fn writable_clusters(&self, _group: UpdateGroup) -> BTreeSet<String> {
        BTreeSet::from([self.cluster.clone()])
    }

    fn has_cluster(&self, cluster: &str) -> bool {
        self.cluster == cluster
    }

    fn search_cluster(&self) -> &str {
        &self.cluster
    }

    fn managed_clusters(&self) -> BTreeSet<String> {
        self.writable_clusters(UpdateGroup::Saneitizer)
    }
}

/// One configured cluster. `replica` defaults to the cluster's own name and
/// `group` to [`DEFAULT_GROUP`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDefinition {
    pub replica: Option<String>,
    pub group: Option<String>,
}

/// Write cluster configuration: a plain list or a table keyed by update group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteClusters {
    List(Vec<String>),
    PerGroup(BTreeMap<String, Vec<String>>),
}

/// How this wiki picks its replica group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicaGroupStrategy {
    Constant { group: String },
    #[serde(rename = "roundrobin")]
    RoundRobin { groups: Vec<String> },
}

impl Default for ReplicaGroupStrategy {
    fn default() -> Self {
        Self::Constant {
            group: DEFAULT_GROUP.to_string(),
        }
    }
}

/// `[clusters]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub wiki_id: String,
    /// Cluster name to definition.
    pub clusters: BTreeMap<String, ClusterDefinition>,
    /// `None` writes to every known replica.
    pub write_clusters: Option<WriteClusters>,
    pub replica_group: ReplicaGroupStrategy,
    /// `None` manages every known replica.
    pub managed_clusters: Option<Vec<String>>,
    pub default_cluster: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            wiki_id: DEFAULT_WIKI_ID.to_string(),
            clusters: BTreeMap::from([(DEFAULT_GROUP.to_string(), ClusterDefinition::default())]),
            write_clusters: None,
            replica_group: ReplicaGroupStrategy::default(),
            managed_clusters: None,
            default_cluster: DEFAULT_GROUP.to_string(),
        }
    }
}

impl ClusterConfig {
    /// One plain replica per name, all writable and managed. The name that
    /// sorts first becomes the default search cluster.
    pub fn for_replicas<I, S>(wiki_id: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let clusters: BTreeMap<String, ClusterDefinition> = names
            .into_iter()
            .map(|name| (name.into(), ClusterDefinition::default()))
            .collect();
        let default_cluster = clusters
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());
        Self {
            wiki_id: wiki_id.into(),
            clusters,
            default_cluster,
            ..Self::default()
        }
    }
}

/// Assignment over several replicas, each possibly split into groups.
#[derive(Debug, Clone)]
pub struct MultiClusterAssignment {
    config: ClusterConfig,
    group: String,
    /// replica -> group -> configured cluster name
    replicas: BTreeMap<String, BTreeMap<String, String>>,
}

impl MultiClusterAssignment {
    pub fn new(config: ClusterConfig) -> Result<Self, AssignmentError> {
        let group = select_group(&config.replica_group, &config.wiki_id)?;

        let mut replicas: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (name, definition) in &config.clusters {
            let replica = definition.replica.clone().unwrap_or_else(|| name.clone());
            let cluster_group = definition
                .group
                .clone()
                .unwrap_or_else(|| DEFAULT_GROUP.to_string());
            let groups = replicas.entry(replica.clone()).or_default();
            if groups.contains_key(&cluster_group) {
                return Err(AssignmentError::DuplicateReplicaGroup {
                    replica,
                    group: cluster_group,
                });
            }
            groups.insert(cluster_group, name.clone());
        }

        if let Some(WriteClusters::PerGroup(table)) = &config.write_clusters {
            let missing = UpdateGroup::ALL
                .iter()
                .find(|g| !table.contains_key(g.as_str()) && !table.contains_key(DEFAULT_GROUP));
            if let Some(missing) = missing {
                return Err(AssignmentError::NoWriteClustersForGroup {
                    group: missing.as_str().to_string(),
                });
            }
        }

        tracing::debug!(
            group = %group,
            replicas = replicas.len(),
            "cluster assignment resolved"
        );

        Ok(Self {
            config,
            group,
            replicas,
        })
    }

    /// Replica group this wiki was assigned to.
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn can_manage_cluster(&self, cluster: &str) -> bool {
        self.managed_clusters().contains(cluster)
    }

    /// Configured cluster that serves `replica` for this wiki's group.
    ///
    /// A replica with a single cluster serves every group.
    pub fn resolve_cluster(&self, replica: Option<&str>) -> Result<&str, AssignmentError> {
        let replica = replica.unwrap_or(&self.config.default_cluster);
        let Some(groups) = self.replicas.get(replica) else {
            return Err(AssignmentError::UnknownReplica {
                replica: replica.to_string(),
                available: self.replicas.keys().cloned().collect::<Vec<_>>().join(","),
            });
        };
        if let Some(name) = groups.get(&self.group) {
            return Ok(name);
        }
        match groups.values().next() {
            Some(name) if groups.len() == 1 => Ok(name),
            _ => Err(AssignmentError::MissingReplicaGroup {
                replica: replica.to_string(),
                group: self.group.clone(),
            }),
        }
    }

    fn known_replicas(&self) -> BTreeSet<String> {
        self.replicas.keys().cloned().collect()
    }
}

impl ClusterAssignment for MultiClusterAssignment {
    fn writable_clusters(&self, group: UpdateGroup) -> BTreeSet<String> {
        match &self.config.write_clusters {
            None => self.known_replicas(),
            Some(WriteClusters::List(list)) => list.iter().cloned().collect(),
            Some(WriteClusters::PerGroup(table)) => table
                .get(group.as_str())
                .or_else(|| table.get(DEFAULT_GROUP))
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    fn has_cluster(&self, cluster: &str) -> bool {
        self.replicas.contains_key(cluster)
    }

    fn search_cluster(&self) -> &str {
        &self.config.default_cluster
    }

    fn managed_clusters(&self) -> BTreeSet<String> {
        match &self.config.managed_clusters {
            Some(list) => list.iter().cloned().collect(),
            None => self.known_replicas(),
        }
    }
}

fn select_group(strategy: &ReplicaGroupStrategy, wiki_id: &str) -> Result<String, AssignmentError> {
    match strategy {
        ReplicaGroupStrategy::Constant { group } => Ok(group.clone()),
        ReplicaGroupStrategy::RoundRobin { groups } => {
            if groups.is_empty() {
                return Err(AssignmentError::NoReplicaGroups);
            }
            let idx = usize::try_from(stable_hash(wiki_id) % groups.len() as u64)
                .map_err(|_| AssignmentError::NoReplicaGroups)?;
            groups.get(idx).cloned().ok_or(AssignmentError::NoReplicaGroups)
        }
    }
}

/// First eight bytes of the SHA-256 of `value`, big endian.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
