//! Fetch scheduling: missing set, per-peer claimed chunks, and per-pass assignment.
//!
//! Each pass assigns every missing chunk to the first peer (discovery order) that claims it.
//! Every attempted chunk leaves that peer's claimed set whatever the outcome, so the
//! claimed sets only shrink and a download either completes or stalls.

use std::collections::{HashMap, HashSet};

use crate::manifest::FileManifest;
use crate::peers::PeerRecord;

/// Peer -> chunk hashes it was asked for this pass, in piece order.
pub type PassPlan = Vec<(PeerRecord, Vec<String>)>;

pub struct FetchState {
    /// Pieces in the manifest, counting repeated contents once per index.
    total: usize,
    /// Hash -> lowest piece index using it.
    order: HashMap<String, u32>,
    /// Hash -> number of pieces with that content.
    uses: HashMap<String, usize>,
    /// Still absent locally, in piece order.
    missing: Vec<String>,
    /// Claimed-available sets, in peer discovery order.
    claims: Vec<(PeerRecord, Vec<String>)>,
}

impl FetchState {
    /// Missing set = manifest piece hashes minus `present`.
    pub fn new(manifest: &FileManifest, present: &[String]) -> Self {
        let present: HashSet<&str> = present.iter().map(String::as_str).collect();
        let mut order = HashMap::new();
        let mut uses: HashMap<String, usize> = HashMap::new();
        let mut missing = Vec::new();
        for (&index, hash) in &manifest.info.pieces {
            *uses.entry(hash.clone()).or_default() += 1;
            if order.contains_key(hash) {
                continue;
            }
            order.insert(hash.clone(), index);
            if !present.contains(hash.as_str()) {
                missing.push(hash.clone());
            }
        }
        Self {
            total: manifest.info.pieces.len(),
            order,
            uses,
            missing,
            claims: Vec::new(),
        }
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Record what `peer` claims to hold. Hashes outside the manifest are ignored;
    /// the rest are kept in piece order.
    pub fn set_claims(&mut self, peer: PeerRecord, claimed: Vec<String>) {
        let mut seen = HashSet::new();
        let mut relevant: Vec<String> = claimed
            .into_iter()
            .filter(|h| self.order.contains_key(h) && seen.insert(h.clone()))
            .collect();
        relevant.sort_by_key(|h| self.order[h]);
        match self.claims.iter_mut().find(|(p, _)| *p == peer) {
            Some((_, set)) => *set = relevant,
            None => self.claims.push((peer, relevant)),
        }
    }

    pub fn claims(&self, peer: &PeerRecord) -> Option<&[String]> {
        self.claims
            .iter()
            .find(|(p, _)| p == peer)
            .map(|(_, s)| s.as_slice())
    }

    /// Assign each missing chunk to the first peer claiming it. Empty if nothing can progress.
    pub fn plan_pass(&mut self) -> PassPlan {
        let missing: HashSet<&String> = self.missing.iter().collect();
        for (_, set) in &mut self.claims {
            set.retain(|h| missing.contains(h));
        }
        let mut assigned: HashSet<&str> = HashSet::new();
        let mut plan = Vec::new();
        for (peer, set) in &self.claims {
            let batch: Vec<String> = set
                .iter()
                .filter(|h| assigned.insert(h.as_str()))
                .cloned()
                .collect();
            if !batch.is_empty() {
                plan.push((peer.clone(), batch));
            }
        }
        plan
    }

    /// No peer claims any missing chunk while some are still missing.
    pub fn is_stalled(&self) -> bool {
        if self.is_complete() {
            return false;
        }
        let missing: HashSet<&String> = self.missing.iter().collect();
        !self
            .claims
            .iter()
            .any(|(_, set)| set.iter().any(|h| missing.contains(h)))
    }

    /// Outcome of asking `peer` for `hash`. The hash leaves the peer's claims either way.
    pub fn record_attempt(&mut self, peer: &PeerRecord, hash: &str, stored: bool) {
        if let Some((_, set)) = self.claims.iter_mut().find(|(p, _)| p == peer) {
            set.retain(|h| h != hash);
        }
        if stored {
            self.missing.retain(|h| h != hash);
        }
    }

    /// `1 - missing pieces / total pieces`. A missing hash counts once for every
    /// piece index it fills. A manifest with no pieces is complete.
    pub fn completed_fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        let missing: usize = self.missing.iter().map(|h| self.uses.get(h).copied().unwrap_or(1)).sum();
        1.0 - missing as f64 / self.total as f64
    }

    /// Forget everything `peer` claimed. Used once a peer stops answering, so its
    /// chunks go to the next claimant.
    pub fn drop_peer(&mut self, peer: &PeerRecord) {
        if let Some((_, set)) = self.claims.iter_mut().find(|(p, _)| p == peer) {
            set.clear();
        }
    }

    /// Whole-percent progress for observers.
    pub fn percent(&self) -> u8 {
        (self.completed_fraction() * 100.0).floor().clamp(0.0, 100.0) as u8
    }
}
