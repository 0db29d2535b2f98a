//! Blind task sharding.
//!
//! A high-risk intent is cut into semantic units (sentences and clauses),
//! the units are shuffled and dealt into `k` disjoint fragments, and every
//! fragment is sealed under its own random key.  Each fragment goes to a
//! distinct agent together with an [`AgentHandle`] holding the only copy of
//! that key.
//!
//! Reconstruction needs all `k` opened fragments *and* the orchestrator's
//! [`MasterPlan`], which records where every unit originally sat.  No
//! [`Shard`] carries a reference to a sibling or to the plan.
//!
//! # Sealing
//!
//! Fragment bytes are XORed with a SHA-256 counter-mode keystream:
//! block `i` is `SHA-256(key ‖ shard_id ‖ i as u64 LE)`.  Keys are fresh per
//! shard, so two shards never share keystream even when their plaintext
//! overlaps.

use std::collections::BTreeSet;
use std::fmt;

use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use warden_types::{Intent, Shard, WardenError};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Separator between units inside one fragment.
const UNIT_SEPARATOR: &str = "\n";

// ────────────────────────────────────────────────────────────────────────────
// Keys and handles
// ────────────────────────────────────────────────────────────────────────────

/// 32-byte fragment key.  Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FragmentKey([u8; 32]);

impl FragmentKey {
    fn generate() -> Self {
        Self(rand::random::<[u8; 32]>())
    }
}

impl fmt::Debug for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FragmentKey(<redacted>)")
    }
}

/// What a sub-agent receives alongside its shard: its identity and the key
/// for exactly one shard.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    agent_id: String,
    shard_id: Uuid,
    key: FragmentKey,
}

impl AgentHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn shard_id(&self) -> Uuid {
        self.shard_id
    }

    /// Unseal `shard` and return the fragment text.
    ///
    /// # Errors
    ///
    /// [`WardenError::Agent`] when the shard was not issued to this handle
    /// or does not decode as UTF-8.
    pub fn open(&self, shard: &Shard) -> Result<String, WardenError> {
        if shard.id != self.shard_id || shard.agent_id != self.agent_id {
            return Err(WardenError::Agent(format!(
                "handle for shard {} cannot open shard {}",
                self.shard_id, shard.id
            )));
        }
        let plain = apply_keystream(&self.key, shard.id, &shard.sealed);
        String::from_utf8(plain)
            .map_err(|e| WardenError::Agent(format!("shard {} is corrupt: {e}", shard.id)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Plan
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Layout {
    /// `fragments[i]` lists the original unit indices dealt to fragment `i`,
    /// in the order they appear inside it.
    Split(Vec<Vec<usize>>),
    /// Every fragment carries the whole payload.
    Replicated,
}

/// Orchestrator-only ordering needed to rebuild the payload.
#[derive(Debug, Clone)]
pub struct MasterPlan {
    run_id: Uuid,
    layout: Layout,
}

impl MasterPlan {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of fragments the plan expects.
    pub fn fragment_count(&self) -> Option<usize> {
        match &self.layout {
            Layout::Split(f) => Some(f.len()),
            Layout::Replicated => None,
        }
    }

    /// Rebuild the original unit sequence from opened fragments, given in
    /// shard order.
    ///
    /// # Errors
    ///
    /// [`WardenError::UnshardableIntent`] when a fragment is missing or does
    /// not match the recorded layout.
    pub fn reassemble(&self, fragments: &[String]) -> Result<Vec<String>, WardenError> {
        match &self.layout {
            Layout::Replicated => {
                let first = fragments.first().ok_or_else(|| {
                    WardenError::UnshardableIntent("no fragments supplied".to_string())
                })?;
                if fragments.iter().any(|f| f != first) {
                    return Err(WardenError::UnshardableIntent(
                        "replicated fragments disagree".to_string(),
                    ));
                }
                Ok(vec![first.clone()])
            }
            Layout::Split(layout) => {
                if fragments.len() != layout.len() {
                    return Err(WardenError::UnshardableIntent(format!(
                        "{} of {} fragments supplied",
                        fragments.len(),
                        layout.len()
                    )));
                }
                let total: usize = layout.iter().map(Vec::len).sum();
                let mut units: Vec<Option<String>> = vec![None; total];
                for (fragment, indices) in fragments.iter().zip(layout) {
                    let parts: Vec<&str> = fragment.split(UNIT_SEPARATOR).collect();
                    if parts.len() != indices.len() {
                        return Err(WardenError::UnshardableIntent(
                            "fragment does not match plan".to_string(),
                        ));
                    }
                    for (part, &idx) in parts.into_iter().zip(indices) {
                        units[idx] = Some(part.to_string());
                    }
                }
                units
                    .into_iter()
                    .map(|u| {
                        u.ok_or_else(|| {
                            WardenError::UnshardableIntent("plan has a gap".to_string())
                        })
                    })
                    .collect()
            }
        }
    }
}

/// Output of the sharding engine.  `shards[i]` pairs with `handles[i]`.
#[derive(Debug)]
pub struct ShardPlan {
    pub shards: Vec<Shard>,
    pub handles: Vec<AgentHandle>,
    pub master: MasterPlan,
}

impl ShardPlan {
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Split into per-agent work items and the orchestrator's plan.
    pub fn into_parts(self) -> (Vec<(Shard, AgentHandle)>, MasterPlan) {
        (self.shards.into_iter().zip(self.handles).collect(), self.master)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

/// Split `payload` into semantic units: sentences and clauses ending in
/// `.`, `!`, `?`, `;` or a line break.  Units without any alphanumeric
/// character are dropped.
pub fn split_units(payload: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();
    let mut flush = |current: &mut String| {
        let unit = current.trim();
        if unit.chars().any(char::is_alphanumeric) {
            units.push(unit.to_string());
        }
        current.clear();
    };
    for ch in payload.chars() {
        match ch {
            '\n' | '\r' => flush(&mut current),
            '.' | '!' | '?' | ';' => {
                current.push(ch);
                flush(&mut current);
            }
            _ => current.push(ch),
        }
    }
    flush(&mut current);
    units
}

/// Cut `intent` into `k` sealed fragments assigned to distinct agents drawn
/// from `pool`.
///
/// `k` is clamped to the number of semantic units.
///
/// # Errors
///
/// [`WardenError::UnshardableIntent`] when `k < 2`, the payload has fewer
/// than two units, or the pool has fewer distinct agents than fragments.
pub fn shard(intent: &Intent, k: usize, pool: &[String]) -> Result<ShardPlan, WardenError> {
    if k < 2 {
        return Err(WardenError::UnshardableIntent(format!(
            "shard count must be at least 2, got {k}"
        )));
    }
    let units = split_units(intent.payload());
    if units.len() < 2 {
        return Err(WardenError::UnshardableIntent(
            "payload has fewer than two semantic units".to_string(),
        ));
    }
    let k = k.min(units.len());
    let mut rng = rand::thread_rng();
    let agents = draw_agents(pool, k, &mut rng)?;

    let mut order: Vec<usize> = (0..units.len()).collect();
    order.shuffle(&mut rng);
    let mut layout: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (slot, idx) in order.into_iter().enumerate() {
        layout[slot % k].push(idx);
    }

    let mut shards = Vec::with_capacity(k);
    let mut handles = Vec::with_capacity(k);
    for (indices, agent_id) in layout.iter().zip(agents) {
        let text = indices
            .iter()
            .map(|&i| units[i].as_str())
            .collect::<Vec<_>>()
            .join(UNIT_SEPARATOR);
        let (shard, handle) = seal(intent.id(), agent_id, &text);
        shards.push(shard);
        handles.push(handle);
    }

    Ok(ShardPlan {
        shards,
        handles,
        master: MasterPlan {
            run_id: intent.id(),
            layout: Layout::Split(layout),
        },
    })
}

/// Dispatch the whole payload to `n` distinct agents.  Used for runs that do
/// not require sharding.
///
/// # Errors
///
/// [`WardenError::UnshardableIntent`] when `n` is zero or the pool is too
/// small.
pub fn replicate(intent: &Intent, n: usize, pool: &[String]) -> Result<ShardPlan, WardenError> {
    if n == 0 {
        return Err(WardenError::UnshardableIntent(
            "replica count must be positive".to_string(),
        ));
    }
    let agents = draw_agents(pool, n, &mut rand::thread_rng())?;
    let (shards, handles): (Vec<Shard>, Vec<AgentHandle>) = agents
        .into_iter()
        .map(|agent_id| seal(intent.id(), agent_id, intent.payload()))
        .unzip();
    Ok(ShardPlan {
        shards,
        handles,
        master: MasterPlan {
            run_id: intent.id(),
            layout: Layout::Replicated,
        },
    })
}

fn draw_agents<R: rand::Rng + ?Sized>(
    pool: &[String],
    k: usize,
    rng: &mut R,
) -> Result<Vec<String>, WardenError> {
    let distinct: Vec<&String> = pool.iter().collect::<BTreeSet<_>>().into_iter().collect();
    if distinct.len() < k {
        return Err(WardenError::UnshardableIntent(format!(
            "agent pool has {} eligible agent(s), {k} required",
            distinct.len()
        )));
    }
    Ok(distinct
        .choose_multiple(rng, k)
        .map(|id| (*id).clone())
        .collect())
}

fn seal(run_id: Uuid, agent_id: String, text: &str) -> (Shard, AgentHandle) {
    let shard_id = Uuid::new_v4();
    let key = FragmentKey::generate();
    let sealed = apply_keystream(&key, shard_id, text.as_bytes());
    let shard = Shard {
        id: shard_id,
        run_id,
        agent_id: agent_id.clone(),
        sealed,
    };
    let handle = AgentHandle {
        agent_id,
        shard_id,
        key,
    };
    (shard, handle)
}

fn apply_keystream(key: &FragmentKey, shard_id: Uuid, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (block, chunk) in data.chunks(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(&key.0);
        hasher.update(shard_id.as_bytes());
        hasher.update((block as u64).to_le_bytes());
        let stream = hasher.finalize();
        out.extend(chunk.iter().zip(stream.iter()).map(|(b, s)| b ^ s));
    }
    out
}
