//! Handle bookkeeping.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Category of a device object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandleKind {
    Swapchain,
    Buffer,
    Image,
    ImageView,
    Sampler,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Every handle a device handed out and has not yet taken back.
#[derive(Debug, Default)]
pub struct Ledger {
    next: u64,
    live: HashMap<u64, HandleKind>,
    created: BTreeMap<HandleKind, usize>,
    destroyed: BTreeMap<HandleKind, usize>,
}

impl Ledger {
    /// Hand out a fresh raw handle of `kind`.
    pub fn create(&mut self, kind: HandleKind) -> u64 {
        self.next += 1;
        let raw = self.next;
        self.live.insert(raw, kind);
        *self.created.entry(kind).or_default() += 1;
        raw
    }

    /// Take a handle back. Fails if it is unknown, already gone or of
    /// another kind.
    pub fn destroy(&mut self, raw: u64, kind: HandleKind) -> Result<(), String> {
        match self.live.get(&raw) {
            Some(&live_kind) if live_kind == kind => {
                self.live.remove(&raw);
                *self.destroyed.entry(kind).or_default() += 1;
                Ok(())
            }
            Some(&live_kind) => Err(format!(
                "destroy of {kind} #{raw} which is a live {live_kind}"
            )),
            None => Err(format!("destroy of dead or unknown {kind} #{raw}")),
        }
    }

    /// Advance the counter without registering an owned handle. Used for
    /// objects owned by another handle, such as swapchain images.
    pub fn reserve(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    /// Whether `raw` is live as any kind.
    pub fn contains(&self, raw: u64) -> bool {
        self.live.contains_key(&raw)
    }

    pub fn is_live(&self, raw: u64, kind: HandleKind) -> bool {
        self.live.get(&raw) == Some(&kind)
    }

    /// Number of live handles.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Live handles per kind; kinds with none are omitted.
    pub fn live_by_kind(&self) -> BTreeMap<HandleKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.live.values() {
            *counts.entry(*kind).or_default() += 1;
        }
        counts
    }

    pub fn created(&self, kind: HandleKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: HandleKind) -> usize {
        self.destroyed.get(&kind).copied().unwrap_or(0)
    }

    pub fn live_of(&self, kind: HandleKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }
}
