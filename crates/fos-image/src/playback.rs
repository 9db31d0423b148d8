//! Animation playback
//!
//! Playback replays an animated source frame by frame on a dedicated worker,
//! sleeping each frame's delay when pacing is enabled. Frames are scaled to
//! the sample size of the entry being animated and handed to a sink on the
//! playback thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use fos_gif::{Bitmap, CancelToken, Step};

use crate::context::ImageContext;
use crate::fetch::Fetched;
use crate::sample::subsample_reuse;
use crate::worker::{open_fetched, panic_message};
use crate::{CacheKey, ImageSource, LoadError};

/// One composited frame of a running animation
#[derive(Debug, Clone, Copy)]
pub struct AnimationFrame<'a> {
    /// Index within the current pass
    pub index: usize,
    /// Frames per pass, once the first pass has completed
    pub frame_count: Option<usize>,
    pub delay: Duration,
    pub bitmap: &'a Bitmap,
}

/// Receives frames on the playback thread
pub type FrameSink = Box<dyn FnMut(AnimationFrame<'_>) + Send>;

#[derive(Debug, Default)]
struct PlaybackDone {
    done: Mutex<bool>,
    wake: Condvar,
}

/// Control over a running animation
#[derive(Debug, Clone)]
pub struct AnimationHandle {
    cancel: CancelToken,
    finished: Arc<PlaybackDone>,
}

impl AnimationHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            finished: Arc::new(PlaybackDone::default()),
        }
    }

    /// Stop playback. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Whether the playback worker is done with this animation
    pub fn is_finished(&self) -> bool {
        *self.finished.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until playback ends or `timeout` passes.
    ///
    /// Returns `true` if playback ended.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.finished.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = self
                .finished
                .wake
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn finish(&self) {
        let mut done = self.finished.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.finished.wake.notify_all();
    }
}

/// A unit of work for the playback queue
pub(crate) struct PlaybackJob {
    pub key: CacheKey,
    pub source: ImageSource,
    pub sample_size: u32,
    pub handle: AnimationHandle,
    pub sink: FrameSink,
}

/// Play one animation to completion or cancellation
pub(crate) fn run_playback_job(ctx: &ImageContext, job: PlaybackJob) {
    let PlaybackJob {
        key,
        source,
        sample_size,
        handle,
        mut sink,
    } = job;

    tracing::debug!("Starting animation {}", key);
    let result = catch_unwind(AssertUnwindSafe(|| {
        play(ctx, &key, &source, sample_size, &handle.cancel, &mut sink)
    }));
    match result {
        Ok(Ok(frames)) => tracing::debug!("Animation {} stopped after {} frames", key, frames),
        Ok(Err(e)) => tracing::warn!("Animation {} failed: {}", key, e),
        Err(panic) => tracing::error!("Playback of {} panicked: {}", key, panic_message(panic.as_ref())),
    }
    handle.finish();
}

fn play(
    ctx: &ImageContext,
    key: &CacheKey,
    source: &ImageSource,
    sample_size: u32,
    cancel: &CancelToken,
    sink: &mut FrameSink,
) -> Result<usize, LoadError> {
    if cancel.is_canceled() {
        return Ok(0);
    }
    let fetched = match ctx.blobs().get(key) {
        Some(bytes) => Fetched::Bytes(bytes),
        None => ctx.fetcher().fetch(source, cancel)?,
    };
    let opened = open_fetched(fetched)?;
    let options = ctx.decode_options(cancel.clone(), ctx.config().frame_pacing);
    let mut stream = ctx.codecs().open(opened.format, opened.reader, options)?;

    let mut scaled = Bitmap::default();
    let mut delivered = 0;
    loop {
        let frame = match stream.next_frame()? {
            Step::Frame(frame) => frame,
            Step::Finished | Step::Canceled => break,
        };
        let bitmap = if sample_size > 1 {
            subsample_reuse(frame.bitmap, sample_size, &mut scaled);
            &scaled
        } else {
            frame.bitmap
        };
        sink(AnimationFrame {
            index: frame.index,
            frame_count: frame.frame_count,
            delay: frame.delay,
            bitmap,
        });
        delivered += 1;
    }
    Ok(delivered)
}
