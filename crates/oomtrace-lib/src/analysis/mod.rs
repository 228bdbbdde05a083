//! Termination classification and memory report extraction

mod classifier;
mod memory;

pub use classifier::{classify, eviction_lines, oom_kill_lines, Evidence, KernelSource, Verdict};
pub use memory::{extract, format_kb, oom_region, PAGE_SIZE_KB};
