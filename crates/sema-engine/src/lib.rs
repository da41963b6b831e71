//! sema-engine: orchestration over the component crates.
//!
//! Owns the atom store, anchor registry, spatial index, and algorithm
//! suite as first-class components and exposes the two external
//! boundaries:
//!
//! ```text
//! ingest(content) ──▶ AtomStore::put ──▶ Embedder (external, timeout+retry)
//!                                   │
//!                        commit embedding ──▶ project ──▶ stage entry
//!                                                           │
//!                               GenerationBuilder::seal ◀───┘
//!                                      │ atomic swap + snapshot
//!                                      ▼
//! search / path / cluster ──▶ immutable IndexGeneration + AtomStore
//! ```
//!
//! Ingestion failures never roll back the atom: an atom whose embedding
//! call fails stays durable, is retried with bounded backoff by the
//! maintenance loop, and lands in the dead-letter list when the budget is
//! exhausted. Queries run against immutable generation snapshots and never
//! block on ingestion.
//!
//! # Ordering
//!
//! Within one atom's lifecycle: atom creation strictly precedes the
//! embedding commit, which precedes projection, which precedes the entry
//! becoming visible — enforced structurally (entries are only staged from
//! committed embeddings projected under the generation's anchor-set
//! version), not by timing.

pub mod config;
pub mod embedder;
pub mod error;
pub mod ingest;
pub mod jobs;

pub use config::{EmbedConfig, EngineConfig, MaintenanceConfig, PartitionConfig};
pub use embedder::{EmbedError, Embedder};
pub use error::{Error, Result};
pub use ingest::DeadLetter;
pub use jobs::{JobId, JobStatus};

// The domain vocabulary, re-exported for engine consumers
pub use sema_anchor::{Confidence, Projection};
pub use sema_atom::{AtomRecord, AtomRelation, ContentHash, Modality};
pub use sema_geo::{
    CancelToken, ClusterOutcome, DbscanParams, PathParams, PathResult, SearchOutcome, SearchStatus,
};
pub use sema_observe::{Meter, NoopMeter};
pub use sema_spatial::{CurveKind, IndexGeneration, VoronoiCell};
pub use sema_vector::{AtomId, Metric, Neighbor};

use ingest::IngestQueue;
use jobs::JobRegistry;
use parking_lot::{Mutex, RwLock};
use sema_anchor::AnchorRegistry;
use sema_atom::AtomStore;
use sema_geo::{EmbeddingSource, RelationSource, SearchParams};
use sema_observe::{
    EngineEvent, IndexEvt, IndexKind, IngestEvt, IngestKind, MaintEvt, MaintKind, QueryEvt,
    QueryKind,
};
use sema_spatial::{snapshot, GenerationBuilder, GenerationHandle, PartitionTable, SpatialError};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Search routing mode, selected explicitly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Exact linear scan over every committed embedding.
    Brute,
    /// Coarse spatial filter with over-fetch, then exact rerank.
    Hybrid,
    /// Hybrid restricted to the query's Voronoi cell(s).
    Voronoi,
}

/// Which atoms a clustering job covers.
#[derive(Debug, Clone)]
pub enum ClusterScope {
    All,
    Atoms(Vec<AtomId>),
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub atom: AtomId,
    /// False means the content deduplicated onto an existing atom.
    pub created: bool,
    /// True once the atom is visible to spatial queries. False while the
    /// embedding is pending retry or the projection is low-confidence.
    pub indexed: bool,
}

/// Per-version reprojection backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagReport {
    pub current_version: u32,
    /// Stale anchor-set version -> atoms still projected under it.
    pub lagging: BTreeMap<u32, u64>,
    /// Embedded atoms with no projection at all.
    pub unprojected: u64,
}

/// Result of an index integrity sweep.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Indexed atoms whose embedding no longer exists.
    pub orphaned: Vec<AtomId>,
    /// Atoms eligible for the current generation but absent from it.
    pub missing: Vec<AtomId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.missing.is_empty()
    }
}

/// The engine. Construct with [`Engine::open`].
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    store: Arc<AtomStore>,
    registry: AnchorRegistry,
    index: GenerationHandle,
    partition: RwLock<Option<Arc<PartitionTable>>>,
    projections: RwLock<HashMap<AtomId, Projection>>,
    /// Pending index mutations: Some(coord) = upsert, None = remove.
    staged: Mutex<HashMap<AtomId, Option<[f64; 3]>>>,
    /// Single writer per generation build.
    publish_lock: Mutex<()>,
    next_generation: AtomicU64,
    queue: IngestQueue,
    embedder: Arc<dyn Embedder>,
    meter: Arc<dyn Meter>,
    jobs: JobRegistry,
    shutdown: AtomicBool,
}

/// Adapter exposing the atom store to the algorithm suite.
#[derive(Clone)]
struct StoreSource {
    store: Arc<AtomStore>,
}

impl EmbeddingSource for StoreSource {
    fn embedding(&self, atom: AtomId) -> Option<Vec<f32>> {
        self.store.embedding(atom).map(|e| e.vector.clone())
    }

    fn embedded_atoms(&self) -> Vec<AtomId> {
        self.store.embedded_atoms()
    }

    fn embedded_len(&self) -> usize {
        self.store.embedded_len()
    }
}

impl RelationSource for StoreSource {
    fn neighbors(&self, atom: AtomId) -> Vec<(AtomId, f32)> {
        self.store
            .relations_of(atom)
            .into_iter()
            .map(|r| (r.target, r.weight))
            .collect()
    }
}

impl Engine {
    /// Open the engine with a no-op meter.
    pub async fn open(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::open_with_meter(config, embedder, Arc::new(NoopMeter)).await
    }

    /// Open the engine.
    ///
    /// # Steps
    /// 1. Open the atom store (replays the atom log)
    /// 2. Reload published anchor sets
    /// 3. Recompute projections for every embedded atom (deterministic)
    /// 4. Install the index snapshot if present and current; otherwise
    ///    rebuild the generation from the stores — snapshot corruption or
    ///    loss is recoverable by construction
    /// 5. Spawn the maintenance loop (embed retries, reprojection catch-up)
    pub async fn open_with_meter(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(AtomStore::open(&config.data_dir)?);

        let registry = AnchorRegistry::new();
        load_anchor_sets(&config, &registry)?;

        let inner = Arc::new(Inner {
            index: GenerationHandle::new(),
            partition: RwLock::new(None),
            projections: RwLock::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            publish_lock: Mutex::new(()),
            next_generation: AtomicU64::new(1),
            queue: IngestQueue::new(config.embed.queue_depth),
            jobs: JobRegistry::new(),
            shutdown: AtomicBool::new(false),
            config,
            store,
            registry,
            embedder,
            meter,
        });

        // Projections are derived deterministically; recompute them all
        if inner.registry.current_version() > 0 {
            let set = inner.registry.current()?;
            let mut projections = inner.projections.write();
            for atom in inner.store.embedded_atoms() {
                if let Some(embedding) = inner.store.embedding(atom) {
                    let projection =
                        sema_anchor::project(&embedding.vector, &set, inner.config.metric)?;
                    projections.insert(atom, projection);
                }
            }
        }

        // Snapshot if valid and current, full rebuild otherwise
        match snapshot::load_current(&inner.index_dir()) {
            Ok(generation)
                if generation.anchor_set_version == inner.registry.current_version() =>
            {
                inner
                    .next_generation
                    .store(generation.generation_id + 1, Ordering::SeqCst);
                inner.index.swap(Arc::new(generation));
            }
            Ok(stale) => {
                tracing::info!(
                    snapshot_version = stale.anchor_set_version,
                    current_version = inner.registry.current_version(),
                    "index snapshot is from an old anchor set, rebuilding"
                );
                inner.meter.emit(EngineEvent::Index(IndexEvt {
                    generation: stale.generation_id,
                    kind: IndexKind::SnapshotDiscarded,
                }));
                inner.rebuild_from_stores()?;
            }
            Err(SpatialError::SnapshotMissing(_)) => {
                inner.rebuild_from_stores()?;
            }
            Err(e) => {
                tracing::warn!("index snapshot unusable ({}), rebuilding", e);
                inner.meter.emit(EngineEvent::Index(IndexEvt {
                    generation: 0,
                    kind: IndexKind::SnapshotDiscarded,
                }));
                inner.rebuild_from_stores()?;
            }
        }

        // Maintenance loop holds only a weak handle so dropping the engine
        // ends the task
        let weak = Arc::downgrade(&inner);
        tokio::spawn(maintenance_loop(weak));

        Ok(Self { inner })
    }

    /// Ingest raw content.
    ///
    /// The atom is durable when this returns, whatever the embedder did.
    /// `indexed = false` means the embedding is pending retry (or the
    /// projection came back low-confidence); the atom is retrievable by id
    /// and by brute-force search over committed embeddings, just absent
    /// from the spatial index.
    pub async fn ingest(&self, content: &[u8], modality: Modality) -> Result<IngestReceipt> {
        let inner = &self.inner;

        if content.is_empty() {
            return Err(Error::ContentValidation("empty content".into()));
        }
        if content.len() > inner.config.max_payload_bytes {
            return Err(Error::ContentValidation(format!(
                "payload of {} bytes exceeds limit {}",
                content.len(),
                inner.config.max_payload_bytes
            )));
        }

        let (atom, created) = inner.store.put(content, modality)?;
        inner.meter.emit(EngineEvent::Ingest(IngestEvt {
            atom: atom.0,
            kind: if created {
                IngestKind::Created
            } else {
                IngestKind::Deduplicated {
                    ref_count: inner.store.ref_count(atom)?,
                }
            },
        }));

        // Re-delivery of already-embedded content is a no-op apart from
        // making sure the index entry is in place
        if inner.store.embedding(atom).is_some() {
            let indexed = inner.index_atom(atom)?;
            return Ok(IngestReceipt {
                atom,
                created,
                indexed,
            });
        }

        match inner.embed_once(content, modality).await {
            Ok(vector) => {
                inner
                    .store
                    .commit_embedding(atom, inner.embedder.model_id(), vector)?;
                let indexed = inner.index_atom(atom)?;
                if indexed {
                    inner.meter.emit(EngineEvent::Ingest(IngestEvt {
                        atom: atom.0,
                        kind: IngestKind::Indexed {
                            generation: inner.index.snapshot().generation_id,
                        },
                    }));
                }
                Ok(IngestReceipt {
                    atom,
                    created,
                    indexed,
                })
            }
            Err(reason) => {
                tracing::warn!(%atom, %reason, "embedding failed, scheduling retry");
                let delay = Duration::from_millis(inner.config.backoff_ms(1));
                if !inner.queue.schedule(atom, 1, delay) {
                    inner.queue.dead_letter(atom, 1, reason);
                    inner.meter.emit(EngineEvent::Ingest(IngestEvt {
                        atom: atom.0,
                        kind: IngestKind::DeadLettered,
                    }));
                }
                Ok(IngestReceipt {
                    atom,
                    created,
                    indexed: false,
                })
            }
        }
    }

    /// Fetch an atom's payload.
    pub fn get(&self, atom: AtomId) -> Result<bytes::Bytes> {
        Ok(self.inner.store.get(atom)?)
    }

    /// Fetch an atom's full record.
    pub fn get_record(&self, atom: AtomId) -> Option<AtomRecord> {
        self.inner.store.get_record(atom)
    }

    /// Look up an atom by content hash.
    pub fn get_by_hash(&self, hash: &ContentHash) -> Option<AtomId> {
        self.inner.store.get_by_hash(hash)
    }

    /// Release one reference. At zero the embedding is dropped and the
    /// atom leaves the spatial index.
    pub fn release(&self, atom: AtomId) -> Result<u64> {
        let remaining = self.inner.store.release(atom)?;
        if remaining == 0 {
            self.inner.projections.write().remove(&atom);
            self.inner.staged.lock().insert(atom, None);
            self.inner.publish_index()?;
        }
        Ok(remaining)
    }

    /// Record a typed relation between two atoms.
    pub fn relate(
        &self,
        source: AtomId,
        target: AtomId,
        relation_type: &str,
        weight: f32,
    ) -> Result<()> {
        Ok(self.inner.store.relate(source, target, relation_type, weight)?)
    }

    /// Publish a new anchor set. Starts a new index generation that
    /// immediately excludes every atom still projected under an older
    /// version; the maintenance loop (or [`Engine::reproject_all`])
    /// re-includes them as reprojection catches up.
    pub fn register_anchor_set(&self, anchors: Vec<Vec<f32>>) -> Result<u32> {
        let inner = &self.inner;
        let version = inner
            .registry
            .register_with_region(anchors.clone(), inner.config.region)?;
        persist_anchor_set(&inner.config, version, &anchors)?;

        {
            let _guard = inner.publish_lock.lock();
            // Staged coordinates belong to the previous version
            inner.staged.lock().clear();
            let generation_id = inner.next_generation.fetch_add(1, Ordering::SeqCst);
            let builder = GenerationBuilder::new(
                generation_id,
                version,
                inner.config.curve,
                inner.config.region,
            );
            let generation = Arc::new(builder.seal());
            inner.index.swap(Arc::clone(&generation));
            inner.save_snapshot(&generation);
        }

        Ok(version)
    }

    /// Recompute one atom's projection under the current anchor set.
    pub fn reproject(&self, atom: AtomId) -> Result<bool> {
        let indexed = self.inner.index_atom(atom)?;
        self.inner.publish_index()?;
        Ok(indexed)
    }

    /// Recompute every stale or missing projection, then publish.
    /// Returns the number of atoms reprojected.
    pub fn reproject_all(&self) -> Result<u64> {
        let inner = &self.inner;
        let mut reprojected = 0u64;
        for atom in inner.store.embedded_atoms() {
            if inner.is_stale(atom) {
                inner.index_atom(atom)?;
                reprojected += 1;
            }
        }
        inner.publish_index()?;
        if reprojected > 0 {
            inner.meter.emit(EngineEvent::Maintenance(MaintEvt {
                kind: MaintKind::ReprojectionFinished { reprojected },
            }));
        }
        Ok(reprojected)
    }

    /// Per-version reprojection backlog — the epoch-lag maintenance signal.
    pub fn projection_lag(&self) -> LagReport {
        let inner = &self.inner;
        let current_version = inner.registry.current_version();
        let projections = inner.projections.read();

        let mut lagging: BTreeMap<u32, u64> = BTreeMap::new();
        let mut unprojected = 0u64;
        for atom in inner.store.embedded_atoms() {
            match projections.get(&atom) {
                Some(p) if p.anchor_set_version == current_version => {}
                Some(p) => *lagging.entry(p.anchor_set_version).or_insert(0) += 1,
                None => unprojected += 1,
            }
        }

        let total: u64 = lagging.values().sum::<u64>() + unprojected;
        inner
            .meter
            .gauge("projection_lag_atoms", &[])
            .set(total as i64);

        LagReport {
            current_version,
            lagging,
            unprojected,
        }
    }

    /// Flush staged index mutations into a new published generation.
    pub fn publish_index(&self) -> Result<()> {
        self.inner.publish_index()
    }

    /// Nearest-neighbor search in an explicit mode.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
        mode: SearchMode,
    ) -> Result<SearchOutcome> {
        let inner = &self.inner;
        let source = inner.source();

        let outcome = match mode {
            SearchMode::Brute => sema_geo::brute_force_search(query, k, metric, &source)?,
            SearchMode::Hybrid => {
                let (coord, params) = inner.query_setup(query, k, metric)?;
                let generation = inner.index.snapshot();
                let mut outcome =
                    sema_geo::hybrid_search(query, coord, &params, &generation, &source)?;
                inner.degrade_for_exclusions(&generation, &mut outcome);
                outcome
            }
            SearchMode::Voronoi => {
                let partition = inner
                    .partition
                    .read()
                    .clone()
                    .ok_or(Error::NoPartitionTable)?;
                let (coord, params) = inner.query_setup(query, k, metric)?;
                let generation = inner.index.snapshot();
                let mut outcome = sema_geo::voronoi_search(
                    query,
                    coord,
                    &params,
                    &generation,
                    &partition,
                    &source,
                )?;
                inner.degrade_for_exclusions(&generation, &mut outcome);
                outcome
            }
        };

        inner.meter.emit(EngineEvent::Query(QueryEvt {
            kind: QueryKind::Search {
                mode: match mode {
                    SearchMode::Brute => "brute",
                    SearchMode::Hybrid => "hybrid",
                    SearchMode::Voronoi => "voronoi",
                },
                k,
                candidates: outcome.hits.len(),
            },
        }));
        Ok(outcome)
    }

    /// KNN with automatic routing: exact scan below the size threshold,
    /// hybrid above it.
    pub fn knn(&self, query: &[f32], k: usize, metric: Metric) -> Result<SearchOutcome> {
        if self.inner.store.embedded_len() <= self.inner.config.brute_force_threshold {
            self.search(query, k, metric, SearchMode::Brute)
        } else {
            self.search(query, k, metric, SearchMode::Hybrid)
        }
    }

    /// Semantic A* pathfinding between two atoms.
    pub fn path(
        &self,
        start: AtomId,
        goal: AtomId,
        params: &PathParams,
        cancel: &CancelToken,
    ) -> Result<PathResult> {
        let source = self.inner.source();
        let result = sema_geo::semantic_path(start, goal, params, &source, &source, cancel)?;
        if let PathResult::BudgetExceeded { .. } = result {
            self.inner.meter.emit(EngineEvent::Query(QueryEvt {
                kind: QueryKind::PathBudgetExceeded,
            }));
        }
        Ok(result)
    }

    /// Submit an asynchronous clustering job; poll with
    /// [`Engine::cluster_result`].
    pub fn cluster(&self, params: DbscanParams, scope: ClusterScope) -> JobId {
        let inner = &self.inner;
        let atoms = match scope {
            ClusterScope::All => inner.store.embedded_atoms(),
            ClusterScope::Atoms(atoms) => atoms,
        };

        let (id, cancel) = inner.jobs.begin();
        let source = inner.source();
        let inner_for_job = Arc::clone(inner);

        tokio::task::spawn_blocking(move || {
            let status = match sema_geo::cluster_dbscan(&atoms, &params, &source, &cancel) {
                Ok(outcome) => {
                    let noise = outcome
                        .labels
                        .values()
                        .filter(|&&l| l == sema_geo::dbscan::NOISE)
                        .count();
                    inner_for_job.meter.emit(EngineEvent::Query(QueryEvt {
                        kind: if outcome.truncated {
                            QueryKind::ClusterTruncated
                        } else {
                            QueryKind::ClusterFinished {
                                clusters: outcome.clusters,
                                noise,
                            }
                        },
                    }));
                    JobStatus::Finished(outcome)
                }
                Err(sema_geo::GeoError::Cancelled) => JobStatus::Cancelled,
                Err(e) => JobStatus::Failed(e.to_string()),
            };
            inner_for_job.jobs.finish(id, status);
        });

        id
    }

    /// Poll a clustering job.
    pub fn cluster_result(&self, id: JobId) -> Result<JobStatus> {
        self.inner.jobs.poll(id).ok_or(Error::UnknownJob(id))
    }

    /// Request cancellation of a running clustering job.
    pub fn cancel_cluster(&self, id: JobId) -> bool {
        self.inner.jobs.cancel(id)
    }

    /// Build (or rebuild) the Voronoi partition table over the current
    /// generation. Returns the number of cells.
    pub fn build_partitions(&self) -> Result<usize> {
        let inner = &self.inner;
        let generation = inner.index.snapshot();
        let points: Vec<[f64; 3]> = generation.entries().iter().map(|e| e.coord).collect();
        let table = PartitionTable::build(
            &points,
            inner.config.partitions.cells,
            inner.config.partitions.seed,
        )?;
        let cells = table.len();
        *inner.partition.write() = Some(Arc::new(table));
        Ok(cells)
    }

    /// Assign a projected query vector to its Voronoi cell.
    pub fn voronoi_membership(&self, query: &[f32]) -> Result<VoronoiCell> {
        let inner = &self.inner;
        let partition = inner
            .partition
            .read()
            .clone()
            .ok_or(Error::NoPartitionTable)?;
        let set = inner.registry.current()?;
        let projection = sema_anchor::project(query, &set, inner.config.metric)?;
        Ok(partition.membership(projection.coord))
    }

    /// Diff the live generation against the stores.
    ///
    /// A clean report means: every indexed atom still has a committed
    /// embedding, and every atom eligible for the current generation is in
    /// it (outside an in-flight publish window).
    pub fn validate_index(&self) -> IntegrityReport {
        let inner = &self.inner;
        let generation = inner.index.snapshot();
        let projections = inner.projections.read();
        let staged = inner.staged.lock();

        let mut report = IntegrityReport::default();

        for entry in generation.entries() {
            if inner.store.embedding(entry.atom).is_none() {
                report.orphaned.push(entry.atom);
            }
        }

        for atom in inner.store.embedded_atoms() {
            let eligible = projections
                .get(&atom)
                .map(|p| {
                    p.anchor_set_version == generation.anchor_set_version && p.indexable()
                })
                .unwrap_or(false);
            if eligible && !generation.contains(atom) && !staged.contains_key(&atom) {
                report.missing.push(atom);
            }
        }

        report
    }

    /// Validate and repair: orphans are dropped, missing entries restored,
    /// and a fresh generation published. Returns what was repaired.
    pub fn repair_index(&self) -> Result<IntegrityReport> {
        let inner = &self.inner;
        let report = self.validate_index();
        if report.is_clean() {
            return Ok(report);
        }

        tracing::warn!(
            orphaned = report.orphaned.len(),
            missing = report.missing.len(),
            "index inconsistency detected, repairing"
        );

        {
            let projections = inner.projections.read();
            let mut staged = inner.staged.lock();
            for &atom in &report.orphaned {
                staged.insert(atom, None);
            }
            for &atom in &report.missing {
                if let Some(projection) = projections.get(&atom) {
                    staged.insert(atom, Some(projection.coord));
                }
            }
        }
        inner.publish_index()?;

        inner.meter.emit(EngineEvent::Maintenance(MaintEvt {
            kind: MaintKind::IntegrityRepair {
                orphaned: report.orphaned.len() as u64,
                missing: report.missing.len() as u64,
            },
        }));
        Ok(report)
    }

    /// Discard the live index and rebuild it from the atom store,
    /// embeddings, and current anchor set.
    pub fn rebuild_index(&self) -> Result<()> {
        self.inner.rebuild_from_stores()
    }

    /// The current index generation snapshot.
    pub fn generation(&self) -> Arc<IndexGeneration> {
        self.inner.index.snapshot()
    }

    /// Current anchor-set version (0 = none published).
    pub fn anchor_set_version(&self) -> u32 {
        self.inner.registry.current_version()
    }

    /// Ingestion events parked after exhausting their retry budget.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.queue.dead_letters()
    }

    /// Embedding retries currently waiting for backoff.
    pub fn pending_retries(&self) -> usize {
        self.inner.queue.pending_len()
    }

    /// Number of stored atoms.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// True if the store holds no atoms.
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Stop the maintenance loop. Queries and the store remain usable.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Inner {
    fn index_dir(&self) -> PathBuf {
        self.config.data_dir.join("index")
    }

    fn source(&self) -> StoreSource {
        StoreSource {
            store: Arc::clone(&self.store),
        }
    }

    /// One embedder call under the configured timeout.
    async fn embed_once(
        &self,
        content: &[u8],
        modality: Modality,
    ) -> std::result::Result<Vec<f32>, String> {
        let timeout = Duration::from_millis(self.config.embed.timeout_ms);
        match tokio::time::timeout(timeout, self.embedder.embed(content, modality)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", timeout)),
        }
    }

    /// Project an atom under the current anchor set and stage the index
    /// mutation. Returns whether the atom is (or will be) indexed.
    fn index_atom(&self, atom: AtomId) -> Result<bool> {
        let set = match self.registry.current() {
            Ok(set) => set,
            // No anchor set yet: the atom waits for the first rotation
            Err(_) => return Ok(false),
        };
        let embedding = match self.store.embedding(atom) {
            Some(embedding) => embedding,
            None => return Ok(false),
        };

        let projection = sema_anchor::project(&embedding.vector, &set, self.config.metric)?;
        let indexable = projection.indexable();

        self.projections.write().insert(atom, projection);
        self.staged
            .lock()
            .insert(atom, if indexable { Some(projection.coord) } else { None });
        self.maybe_publish()?;

        Ok(indexable)
    }

    fn is_stale(&self, atom: AtomId) -> bool {
        let current = self.registry.current_version();
        match self.projections.read().get(&atom) {
            Some(p) => p.anchor_set_version != current,
            None => true,
        }
    }

    fn maybe_publish(&self) -> Result<()> {
        if self.staged.lock().len() >= self.config.publish_threshold {
            self.publish_index()?;
        }
        Ok(())
    }

    /// Seal staged mutations into a new generation and swap it in.
    ///
    /// Single-writer (publish_lock); the swap itself is one pointer write.
    fn publish_index(&self) -> Result<()> {
        let _guard = self.publish_lock.lock();

        let drained: Vec<(AtomId, Option<[f64; 3]>)> = {
            let mut staged = self.staged.lock();
            if staged.is_empty() {
                return Ok(());
            }
            staged.drain().collect()
        };

        let current = self.index.snapshot();
        let version = self.registry.current_version();
        let generation_id = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let mut builder = if current.anchor_set_version == version {
            GenerationBuilder::from_generation(&current, generation_id)
        } else {
            GenerationBuilder::new(generation_id, version, self.config.curve, self.config.region)
        };

        for (atom, mutation) in drained {
            match mutation {
                Some(coord) => builder.insert(atom, coord),
                None => {
                    builder.remove(atom);
                }
            }
        }

        let generation = Arc::new(builder.seal());
        self.index.swap(Arc::clone(&generation));
        self.meter.emit(EngineEvent::Index(IndexEvt {
            generation: generation.generation_id,
            kind: IndexKind::GenerationSwapped {
                entries: generation.len() as u64,
                anchor_set_version: generation.anchor_set_version,
            },
        }));
        self.save_snapshot(&generation);

        Ok(())
    }

    /// Write the snapshot; failure degrades durability of a derived cache,
    /// not correctness, so it is logged rather than propagated.
    fn save_snapshot(&self, generation: &Arc<IndexGeneration>) {
        match snapshot::save(generation, &self.index_dir()) {
            Ok(path) => {
                let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                self.meter.emit(EngineEvent::Index(IndexEvt {
                    generation: generation.generation_id,
                    kind: IndexKind::SnapshotWritten { bytes },
                }));
            }
            Err(e) => {
                tracing::warn!("snapshot write failed: {}", e);
            }
        }
    }

    /// Full rebuild from atom store + embeddings + current anchor set.
    fn rebuild_from_stores(&self) -> Result<()> {
        let _guard = self.publish_lock.lock();
        self.staged.lock().clear();

        let version = self.registry.current_version();
        let generation_id = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.meter.emit(EngineEvent::Index(IndexEvt {
            generation: generation_id,
            kind: IndexKind::RebuildStarted,
        }));

        let mut builder =
            GenerationBuilder::new(generation_id, version, self.config.curve, self.config.region);

        if version > 0 {
            let set = self.registry.current()?;
            let mut projections = self.projections.write();
            for atom in self.store.embedded_atoms() {
                let embedding = match self.store.embedding(atom) {
                    Some(embedding) => embedding,
                    None => continue,
                };
                let projection =
                    sema_anchor::project(&embedding.vector, &set, self.config.metric)?;
                if projection.indexable() {
                    builder.insert(atom, projection.coord);
                }
                projections.insert(atom, projection);
            }
        }

        let generation = Arc::new(builder.seal());
        let entries = generation.len() as u64;
        self.index.swap(Arc::clone(&generation));
        self.save_snapshot(&generation);
        self.meter.emit(EngineEvent::Index(IndexEvt {
            generation: generation.generation_id,
            kind: IndexKind::RebuildFinished { entries },
        }));

        Ok(())
    }

    /// Project the query and assemble search params for the coarse path.
    fn query_setup(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<([f64; 3], SearchParams)> {
        let set = self.registry.current()?;
        let projection = sema_anchor::project(query, &set, self.config.metric)?;
        Ok((
            projection.coord,
            SearchParams {
                k,
                metric,
                over_fetch_factor: self.config.over_fetch_factor,
                boundary_margin: self.config.partitions.boundary_margin,
            },
        ))
    }

    /// Mark the outcome degraded when atoms with committed embeddings are
    /// invisible to the indexed path (pending reprojection, low
    /// confidence, or still awaiting their first projection).
    fn degrade_for_exclusions(
        &self,
        generation: &IndexGeneration,
        outcome: &mut SearchOutcome,
    ) {
        let embedded = self.store.embedded_len();
        let indexed = generation.len();
        if embedded > indexed {
            outcome.status = SearchStatus::Degraded {
                reason: format!(
                    "{} of {} embedded atoms not in the current index generation",
                    embedded - indexed,
                    embedded
                ),
            };
        }
    }
}

/// Background loop: embed retries and reprojection catch-up.
///
/// Holds only a weak reference; the task ends when the engine is dropped
/// or shut down.
async fn maintenance_loop(weak: Weak<Inner>) {
    loop {
        let interval = match weak.upgrade() {
            Some(inner) => Duration::from_millis(inner.config.maintenance.interval_ms),
            None => break,
        };
        tokio::time::sleep(interval).await;

        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        if inner.shutdown.load(Ordering::Relaxed) {
            break;
        }

        // 1. Retry due embedding attempts
        for entry in inner.queue.take_due() {
            let record = match inner.store.get_record(entry.atom) {
                Some(record) => record,
                None => continue,
            };

            inner.meter.emit(EngineEvent::Ingest(IngestEvt {
                atom: entry.atom.0,
                kind: IngestKind::EmbeddingRetry {
                    attempt: entry.attempts + 1,
                },
            }));

            match inner.embed_once(&record.payload, record.modality).await {
                Ok(vector) => {
                    match inner
                        .store
                        .commit_embedding(entry.atom, inner.embedder.model_id(), vector)
                    {
                        Ok(()) => {
                            if let Err(e) = inner.index_atom(entry.atom) {
                                tracing::warn!(atom = %entry.atom, "retry indexing failed: {}", e);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(atom = %entry.atom, "retry commit failed: {}", e);
                        }
                    }
                }
                Err(reason) => {
                    let attempts = entry.attempts + 1;
                    if attempts >= inner.config.embed.max_attempts {
                        inner.queue.dead_letter(entry.atom, attempts, reason);
                        inner.meter.emit(EngineEvent::Ingest(IngestEvt {
                            atom: entry.atom.0,
                            kind: IngestKind::DeadLettered,
                        }));
                    } else {
                        let delay = Duration::from_millis(inner.config.backoff_ms(attempts));
                        if !inner.queue.schedule(entry.atom, attempts, delay) {
                            inner.queue.dead_letter(entry.atom, attempts, reason);
                        }
                    }
                }
            }
        }

        // 2. Reprojection catch-up, one bounded batch per tick
        let current = inner.registry.current_version();
        if current > 0 {
            let mut reprojected = 0usize;
            for atom in inner.store.embedded_atoms() {
                if reprojected >= inner.config.maintenance.reproject_batch {
                    break;
                }
                if inner.is_stale(atom) {
                    if let Err(e) = inner.index_atom(atom) {
                        tracing::warn!(%atom, "reprojection failed: {}", e);
                    }
                    reprojected += 1;
                }
            }
            if reprojected > 0 {
                tracing::debug!(reprojected, "maintenance reprojection batch");
            }
        }

        // 3. Publish whatever is staged so sub-threshold batches still land
        if let Err(e) = inner.publish_index() {
            tracing::warn!("maintenance publish failed: {}", e);
        }

        drop(inner);
    }
    tracing::debug!("maintenance loop stopped");
}

fn anchors_dir(config: &EngineConfig) -> PathBuf {
    config.data_dir.join("anchors")
}

/// Reload published anchor sets in version order. Determinism of the set
/// build makes re-registration reproduce the original versions exactly.
fn load_anchor_sets(config: &EngineConfig, registry: &AnchorRegistry) -> Result<()> {
    let dir = anchors_dir(config);
    if !dir.exists() {
        return Ok(());
    }

    let mut files: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        let name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if let Some(version) = name.strip_prefix('v').and_then(|v| v.parse::<u32>().ok()) {
            files.push((version, path));
        }
    }
    files.sort_by_key(|(version, _)| *version);

    for (version, path) in files {
        let bytes = std::fs::read(&path)?;
        let anchors: Vec<Vec<f32>> = bincode::deserialize(&bytes)
            .map_err(|e| Error::Internal(format!("anchor set v{} unreadable: {}", version, e)))?;
        let registered = registry.register_with_region(anchors, config.region)?;
        if registered != version {
            return Err(Error::Internal(format!(
                "anchor set files out of sequence: expected v{}, found v{}",
                registered, version
            )));
        }
    }
    Ok(())
}

fn persist_anchor_set(config: &EngineConfig, version: u32, anchors: &[Vec<f32>]) -> Result<()> {
    let dir = anchors_dir(config);
    std::fs::create_dir_all(&dir)?;
    let bytes = bincode::serialize(anchors)
        .map_err(|e| Error::Internal(format!("anchor set encode failed: {}", e)))?;
    std::fs::write(dir.join(format!("v{}.set", version)), bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_integrity_report_clean() {
        let report = IntegrityReport::default();
        assert!(report.is_clean());

        let dirty = IntegrityReport {
            orphaned: vec![AtomId(1)],
            missing: vec![],
        };
        assert!(!dirty.is_clean());
    }
}
