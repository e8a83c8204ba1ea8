//! Test doubles for the Vireo rendering runtime.
//!
//! [`MockDevice`] implements [`vireo_gpu::RenderDevice`] without a GPU. It
//! counts every handle it hands out, executes submitted work only when the
//! caller waits for it and records protocol misuse such as resetting an
//! in-flight command buffer or rebinding a destroyed texture.

pub mod ledger;
pub mod mock;
pub mod script;

pub use ledger::{HandleKind, Ledger};
pub use mock::{MockBuffer, MockDevice, MockImage, Recorded};
pub use script::{AcquireScript, FaultPoint, Op};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Stable-within-a-process hash of a byte slice, for comparing uploaded
/// contents without keeping copies around.
pub fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
