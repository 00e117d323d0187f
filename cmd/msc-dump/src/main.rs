//! MSC capture and dump against the simulated device
//!
//! Allocates a buffer from the MSU_* environment, captures a generated
//! record stream, then reads it back oldest first and maps it.
//!
//! Usage: msc-dump [BYTES] [OUTPUT]

use std::error::Error;
use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use msu_buffer::{Msc, MscConfig, SimRegisters, SimWriter};
use msu_core::{Mode, PageAllocator};

fn allocator() -> Arc<dyn PageAllocator> {
    #[cfg(unix)]
    {
        Arc::new(msu_buffer::MmapPages::new())
    }
    #[cfg(not(unix))]
    {
        Arc::new(msu_buffer::HeapPages::new())
    }
}

/// Text records, numbered, so a dump shows where it starts
fn records(total: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(total + 32);
    let mut seq = 0u64;
    while out.len() < total {
        out.extend_from_slice(format!("msc-dump record {:08}\n", seq).as_bytes());
        seq += 1;
    }
    out.truncate(total);
    out
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let total: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(64 * 1024);
    let output = args.next();

    let config = MscConfig::from_env();
    config.validate()?;
    config.log();

    let alloc = allocator();
    let msc = Msc::with_config(SimRegisters::new(), Arc::clone(&alloc), &config)?;
    let buffer = msc.buffer().ok_or("no buffer after configuration")?;
    println!("Buffer: {:?}", buffer);

    // Capture
    let data = records(total);
    let start = Instant::now();
    msc.activate()?;
    let mut writer = SimWriter::attach(msc.regs(), Arc::clone(&buffer))?;
    let accepted = writer.write(&data);
    if msc.mode() == Mode::Multi {
        println!("Current window: {:?}, {} byte(s)", msc.current_window(), msc.current_window_bytes()?);
        println!("Oldest window blocks: {}", msc.oldest_window_blocks()?.len());
    }
    writer.finish();
    if !msc.wait_pipeline_empty() {
        log::warn!("pipeline did not drain");
    }
    msc.deactivate();
    println!("Captured {}/{} byte(s) in {:?}", accepted, total, start.elapsed());

    // Read back
    let mut reader = msc.open()?;
    let read = match &output {
        Some(path) => reader.copy_to(File::create(path)?)?,
        None => reader.copy_to(io::sink())?,
    };
    drop(reader);
    println!("Read {} byte(s){}", read, output.map(|p| format!(" into {}", p)).unwrap_or_default());

    // Map and touch every page
    let mapping = msc.map(buffer.len(), 0)?;
    for pgoff in 0..buffer.nr_pages() {
        mapping.fault(pgoff)?;
    }
    let pinned = buffer.iter_pages().filter(|p| p.pins() > 0).count();
    println!("Mapped {} page(s), {} pinned", buffer.nr_pages(), pinned);
    drop(mapping);
    drop(buffer);

    msc.free_unless_used()?;
    println!("Pages still held by {}: {}", alloc.name(), alloc.pages_in_use());
    Ok(())
}

fn main() {
    env_logger::init();
    println!("=== MSC Dump ===\n");

    if let Err(e) = run() {
        eprintln!("msc-dump: {}", e);
        std::process::exit(1);
    }
}
