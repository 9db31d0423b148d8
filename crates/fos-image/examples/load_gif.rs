//! Example: load a GIF file and play it once
//!
//! Usage: `load_gif <path> [config.json]`

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use fos_image::{AnimationFrame, ImageConfig, ImageLoader, LoadEvent};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().context("usage: load_gif <path> [config.json]")?;
    let config = match args.next() {
        Some(file) => {
            let json = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file))?;
            ImageConfig::from_json(&json)?
        }
        None => ImageConfig::default(),
    };

    let loader = ImageLoader::with_config(config)?;
    let result = Rc::new(RefCell::new(None));
    let slot = result.clone();
    let name = path.clone();
    loader.decode_file(&path, None, 0, 0, move |delivery| match delivery.event {
        LoadEvent::Placeholder => println!("Loading {}...", name),
        event => *slot.borrow_mut() = Some(event),
    });
    smol::block_on(loader.run_until_idle());

    let entry = match result.borrow_mut().take() {
        Some(LoadEvent::Ready(entry)) => entry,
        Some(LoadEvent::Failed(error)) => return Err(anyhow!("load failed ({:?}): {}", error.category(), error)),
        _ => return Err(anyhow!("load did not complete")),
    };
    println!(
        "{} {}x{} (source {}x{}, sample {}), animated: {}",
        entry.format(),
        entry.width(),
        entry.height(),
        entry.source_size().0,
        entry.source_size().1,
        entry.sample_size(),
        entry.is_animated()
    );

    if entry.is_animated() {
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        let handle = loader.animate(&entry, "example", move |frame: AnimationFrame<'_>| {
            counter.fetch_add(1, Ordering::Relaxed);
            if frame.frame_count.is_some() && frame.index == 0 {
                println!("Pass complete: {:?} frames per pass", frame.frame_count);
            }
        })?;
        if !handle.wait(Duration::from_secs(10)) {
            handle.cancel();
        }
        println!("Played {} frames", frames.load(Ordering::Relaxed));
    }

    let stats = loader.cache_stats();
    println!("Memory cache: {} entries, {} / {} KiB", stats.entries, stats.size_kb, stats.capacity_kb);
    Ok(())
}
