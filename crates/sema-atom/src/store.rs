//! The atom store.
//!
//! In-memory maps fronted by the durable edit log. Every public mutation
//! appends its record before applying it, so replaying the log on open
//! reconstructs exactly this state.

use crate::hash::{content_hash, ContentHash};
use crate::log::{AtomLog, LogRecord};
use crate::{AtomError, Modality, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sema_vector::AtomId;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lock stripes for the per-hash insert-or-increment critical section.
const STRIPES: usize = 64;

/// A stored atom.
#[derive(Debug, Clone)]
pub struct AtomRecord {
    pub atom: AtomId,
    pub hash: ContentHash,
    pub modality: Modality,
    pub payload: Bytes,
    pub ref_count: u64,
    pub created_at_ms: u64,
}

/// An atom's committed embedding. 1:1 per atom per model; replaced
/// wholesale on re-embedding, never patched in place.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub atom: AtomId,
    pub model_id: String,
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A typed, weighted edge between two atoms. Cycles are valid data.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomRelation {
    pub source: AtomId,
    pub target: AtomId,
    pub relation_type: String,
    pub weight: f32,
}

/// Content-addressable, deduplicated atom store.
pub struct AtomStore {
    stripes: Vec<Mutex<()>>,
    atoms: RwLock<HashMap<AtomId, AtomRecord>>,
    by_hash: RwLock<HashMap<ContentHash, AtomId>>,
    embeddings: RwLock<HashMap<AtomId, Arc<Embedding>>>,
    relations: RwLock<HashMap<AtomId, Vec<AtomRelation>>>,
    log: Mutex<AtomLog>,
    next_atom: AtomicU64,
}

impl AtomStore {
    /// Open the store in `dir`, replaying `atoms.log` if present.
    pub fn open(dir: &Path) -> Result<Self> {
        let (log, records) = AtomLog::open(&dir.join("atoms.log"))?;

        let mut atoms: HashMap<AtomId, AtomRecord> = HashMap::new();
        let mut by_hash: HashMap<ContentHash, AtomId> = HashMap::new();
        let mut embeddings: HashMap<AtomId, Arc<Embedding>> = HashMap::new();
        let mut relations: HashMap<AtomId, Vec<AtomRelation>> = HashMap::new();
        let mut max_atom = 0u64;

        for record in records {
            match record {
                LogRecord::AtomCreated {
                    atom,
                    hash,
                    modality,
                    payload,
                    created_at_ms,
                } => {
                    max_atom = max_atom.max(atom.0);
                    by_hash.insert(hash, atom);
                    atoms.insert(
                        atom,
                        AtomRecord {
                            atom,
                            hash,
                            modality,
                            payload: Bytes::from(payload),
                            ref_count: 1,
                            created_at_ms,
                        },
                    );
                }
                LogRecord::RefIncremented { atom } => {
                    if let Some(record) = atoms.get_mut(&atom) {
                        record.ref_count += 1;
                    }
                }
                LogRecord::Released { atom } => {
                    if let Some(record) = atoms.get_mut(&atom) {
                        record.ref_count = record.ref_count.saturating_sub(1);
                        if record.ref_count == 0 {
                            embeddings.remove(&atom);
                        }
                    }
                }
                LogRecord::EmbeddingCommitted {
                    atom,
                    model_id,
                    vector,
                } => {
                    embeddings.insert(
                        atom,
                        Arc::new(Embedding {
                            atom,
                            model_id,
                            vector,
                        }),
                    );
                }
                LogRecord::RelationAdded {
                    source,
                    target,
                    relation_type,
                    weight,
                } => {
                    relations.entry(source).or_default().push(AtomRelation {
                        source,
                        target,
                        relation_type,
                        weight,
                    });
                }
            }
        }

        tracing::info!(
            atoms = atoms.len(),
            embeddings = embeddings.len(),
            "opened atom store"
        );

        Ok(Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
            atoms: RwLock::new(atoms),
            by_hash: RwLock::new(by_hash),
            embeddings: RwLock::new(embeddings),
            relations: RwLock::new(relations),
            log: Mutex::new(log),
            next_atom: AtomicU64::new(max_atom + 1),
        })
    }

    /// Insert content, deduplicating on canonical hash.
    ///
    /// Returns `(atom_id, created)`. `created = false` means the content
    /// already existed and its reference count was incremented — the
    /// dedup success path. The insert-or-increment step is atomic under
    /// concurrent identical inserts: the per-hash stripe lock serializes
    /// them, so N concurrent `put`s of the same bytes yield one atom with
    /// `ref_count == N`.
    pub fn put(&self, content: &[u8], modality: Modality) -> Result<(AtomId, bool)> {
        let hash = content_hash(content, modality);
        let _stripe = self.stripes[hash.stripe(STRIPES)].lock();

        let existing = self.by_hash.read().get(&hash).copied();
        if let Some(atom) = existing {
            self.log
                .lock()
                .append(&LogRecord::RefIncremented { atom })?;
            let mut atoms = self.atoms.write();
            let record = atoms.get_mut(&atom).expect("hash map and atom map agree");
            record.ref_count += 1;
            tracing::debug!(%atom, ref_count = record.ref_count, "deduplicated content");
            return Ok((atom, false));
        }

        let atom = AtomId(self.next_atom.fetch_add(1, Ordering::SeqCst));
        let created_at_ms = now_ms();

        self.log.lock().append(&LogRecord::AtomCreated {
            atom,
            hash,
            modality,
            payload: content.to_vec(),
            created_at_ms,
        })?;

        self.by_hash.write().insert(hash, atom);
        self.atoms.write().insert(
            atom,
            AtomRecord {
                atom,
                hash,
                modality,
                payload: Bytes::copy_from_slice(content),
                ref_count: 1,
                created_at_ms,
            },
        );

        tracing::debug!(%atom, "created atom");
        Ok((atom, true))
    }

    /// Fetch an atom's payload.
    pub fn get(&self, atom: AtomId) -> Result<Bytes> {
        self.atoms
            .read()
            .get(&atom)
            .map(|record| record.payload.clone())
            .ok_or(AtomError::UnknownAtom(atom))
    }

    /// Fetch the full record for an atom.
    pub fn get_record(&self, atom: AtomId) -> Option<AtomRecord> {
        self.atoms.read().get(&atom).cloned()
    }

    /// Look up an atom by content hash.
    pub fn get_by_hash(&self, hash: &ContentHash) -> Option<AtomId> {
        self.by_hash.read().get(hash).copied()
    }

    /// Decrement an atom's reference count, returning the remaining count.
    ///
    /// At zero the embedding is dropped (it is owned by the references);
    /// the atom record itself stays for the external garbage-collection
    /// policy to deal with.
    pub fn release(&self, atom: AtomId) -> Result<u64> {
        let hash = self
            .atoms
            .read()
            .get(&atom)
            .map(|record| record.hash)
            .ok_or(AtomError::UnknownAtom(atom))?;

        let _stripe = self.stripes[hash.stripe(STRIPES)].lock();

        {
            let atoms = self.atoms.read();
            let record = atoms.get(&atom).ok_or(AtomError::UnknownAtom(atom))?;
            if record.ref_count == 0 {
                return Err(AtomError::NoReferences(atom));
            }
        }

        self.log.lock().append(&LogRecord::Released { atom })?;

        let mut atoms = self.atoms.write();
        let record = atoms.get_mut(&atom).expect("checked above");
        record.ref_count -= 1;
        let remaining = record.ref_count;
        drop(atoms);

        if remaining == 0 {
            self.embeddings.write().remove(&atom);
            tracing::debug!(%atom, "released last reference, dropped embedding");
        }

        Ok(remaining)
    }

    /// Current reference count.
    pub fn ref_count(&self, atom: AtomId) -> Result<u64> {
        self.atoms
            .read()
            .get(&atom)
            .map(|record| record.ref_count)
            .ok_or(AtomError::UnknownAtom(atom))
    }

    /// Commit (or wholesale replace) an atom's embedding.
    pub fn commit_embedding(
        &self,
        atom: AtomId,
        model_id: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        if !self.atoms.read().contains_key(&atom) {
            return Err(AtomError::UnknownAtom(atom));
        }
        if vector.is_empty() {
            return Err(AtomError::InvalidEmbedding("empty vector".into()));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(AtomError::InvalidEmbedding("non-finite component".into()));
        }

        self.log.lock().append(&LogRecord::EmbeddingCommitted {
            atom,
            model_id: model_id.to_string(),
            vector: vector.clone(),
        })?;

        self.embeddings.write().insert(
            atom,
            Arc::new(Embedding {
                atom,
                model_id: model_id.to_string(),
                vector,
            }),
        );
        Ok(())
    }

    /// An atom's committed embedding, if any.
    pub fn embedding(&self, atom: AtomId) -> Option<Arc<Embedding>> {
        self.embeddings.read().get(&atom).cloned()
    }

    /// All atoms with a committed embedding.
    pub fn embedded_atoms(&self) -> Vec<AtomId> {
        let mut ids: Vec<AtomId> = self.embeddings.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of atoms with a committed embedding.
    pub fn embedded_len(&self) -> usize {
        self.embeddings.read().len()
    }

    /// Record a typed edge between two existing atoms.
    pub fn relate(
        &self,
        source: AtomId,
        target: AtomId,
        relation_type: &str,
        weight: f32,
    ) -> Result<()> {
        {
            let atoms = self.atoms.read();
            if !atoms.contains_key(&source) {
                return Err(AtomError::UnknownAtom(source));
            }
            if !atoms.contains_key(&target) {
                return Err(AtomError::UnknownAtom(target));
            }
        }

        self.log.lock().append(&LogRecord::RelationAdded {
            source,
            target,
            relation_type: relation_type.to_string(),
            weight,
        })?;

        self.relations.write().entry(source).or_default().push(AtomRelation {
            source,
            target,
            relation_type: relation_type.to_string(),
            weight,
        });
        Ok(())
    }

    /// Outgoing relations of an atom.
    pub fn relations_of(&self, source: AtomId) -> Vec<AtomRelation> {
        self.relations
            .read()
            .get(&source)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of stored atoms.
    pub fn len(&self) -> usize {
        self.atoms.read().len()
    }

    /// True if no atoms are stored.
    pub fn is_empty(&self) -> bool {
        self.atoms.read().is_empty()
    }

    /// All atom ids, ascending.
    pub fn atom_ids(&self) -> Vec<AtomId> {
        let mut ids: Vec<AtomId> = self.atoms.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// fsync the log.
    pub fn sync(&self) -> Result<()> {
        self.log.lock().sync()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
