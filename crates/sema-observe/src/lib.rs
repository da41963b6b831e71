//! sema-observe: vendor-neutral observability ABI.
//!
//! Core crates depend only on these traits and event types. Backends live elsewhere.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        _buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: EngineEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
struct NoopH;
impl Histogram for NoopH {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoopH)
    }
    fn emit(&self, _e: EngineEvent) {}
}

/// Typed events for live visualization (payload contents never included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Ingest(IngestEvt),
    Index(IndexEvt),
    Query(QueryEvt),
    Maintenance(MaintEvt),
}

#[derive(Clone, Debug)]
pub struct IngestEvt {
    pub atom: u64,
    pub kind: IngestKind,
}
#[derive(Clone, Debug)]
pub enum IngestKind {
    Created,
    Deduplicated { ref_count: u64 },
    EmbeddingRetry { attempt: u32 },
    DeadLettered,
    Indexed { generation: u64 },
}

#[derive(Clone, Debug)]
pub struct IndexEvt {
    pub generation: u64,
    pub kind: IndexKind,
}
#[derive(Clone, Debug)]
pub enum IndexKind {
    GenerationSwapped { entries: u64, anchor_set_version: u32 },
    SnapshotWritten { bytes: u64 },
    SnapshotDiscarded,
    RebuildStarted,
    RebuildFinished { entries: u64 },
}

#[derive(Clone, Debug)]
pub struct QueryEvt {
    pub kind: QueryKind,
}
#[derive(Clone, Debug)]
pub enum QueryKind {
    Search { mode: &'static str, k: usize, candidates: usize },
    PathExpanded { expansions: u32 },
    PathBudgetExceeded,
    ClusterFinished { clusters: usize, noise: usize },
    ClusterTruncated,
}

#[derive(Clone, Debug)]
pub struct MaintEvt {
    pub kind: MaintKind,
}
#[derive(Clone, Debug)]
pub enum MaintKind {
    /// Atoms still projected under an older anchor set.
    ProjectionLag { anchor_set_version: u32, lagging: u64 },
    ReprojectionFinished { reprojected: u64 },
    IntegrityRepair { orphaned: u64, missing: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_meter_accepts_everything() {
        let meter = NoopMeter;
        meter.counter("ingest_total", &[]).inc(1);
        meter.gauge("projection_lag", &[]).set(5);
        meter.histo("search_ms", &[1.0, 10.0], &[]).observe(3.2);
        meter.emit(EngineEvent::Maintenance(MaintEvt {
            kind: MaintKind::ProjectionLag {
                anchor_set_version: 1,
                lagging: 10,
            },
        }));
    }
}
