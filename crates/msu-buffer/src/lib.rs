//! # msu-buffer
//!
//! Trace buffer manager for one Memory Storage Controller (MSC).
//!
//! This crate provides:
//! - Page allocation (mmap-backed and heap-backed allocators)
//! - Single and multi-window buffers with the hardware block ring
//! - Capture enable/disable through the MSC registers
//! - Streaming readout, oldest data first
//! - Whole-buffer mappings with per-session page ownership
//! - A register and device simulator for running without hardware
//!
//! ```text
//!   MscConfig ──► Msc<R> ──► TraceBuffer ──► Window ──► PageSlot
//!                  │  │
//!                  │  └─► MscReader  (MscIter over the window ring)
//!                  └────► MscMapping (fault, pin, owner)
//! ```

pub mod config;
pub mod memory;
pub mod window;
pub mod topology;
pub mod locate;
pub mod iter;
pub mod sink;
pub mod msc;
pub mod reader;
pub mod mapping;
pub mod mmio;
pub mod sim;

// Re-exports
pub use config::MscConfig;
pub use memory::{HeapPages, IovaSpace};
pub use window::{PageSlot, TraceBuffer, Window};
pub use locate::BlockPos;
pub use iter::{IterPhase, MscIter};
pub use sink::{ChunkSink, FnSink, SliceSink, WriteSink};
pub use msc::Msc;
pub use reader::MscReader;
pub use mapping::{MapFlags, MscMapping};
pub use mmio::MmioRegisters;
pub use sim::{SimRegisters, SimWriter};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub use memory::MmapPages;
    }
}
