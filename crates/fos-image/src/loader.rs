//! Request Coordinator
//!
//! [`ImageLoader`] turns requests into at most one in-flight load per cache
//! key and delivers results in batches. It lives on a single owner thread
//! (it is neither `Send` nor `Sync`) and every listener runs on that thread.
//!
//! A request is answered synchronously when the memory cache has the image.
//! Otherwise the listener gets an immediate placeholder and either joins an
//! existing load for the same key or starts a new one. Finished loads are
//! parked in a batch; one flush timer, scheduled when the first batch
//! appears, delivers every parked result together. The host drives the
//! coordinator with [`ImageLoader::tick`], [`ImageLoader::pump`] or
//! [`ImageLoader::run_until_idle`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use fos_gif::CancelToken;
use smol::channel::Receiver;

use crate::cache::{CacheStats, MemoryCache};
use crate::context::ImageContext;
use crate::playback::{run_playback_job, AnimationFrame, AnimationHandle, PlaybackJob};
use crate::pool::PoolStats;
use crate::queue::DecodeQueue;
use crate::worker::{run_decode_job, Completion, DecodeJob, JobOutcome, WorkerSet};
use crate::{CacheKey, ImageConfig, ImageEntry, ImageSource, LoadError, SourceKey};

/// What a listener is told
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// The image is loading; show a placeholder
    Placeholder,
    Ready(Arc<ImageEntry>),
    /// Every waiter of a failed load receives the same error
    Failed(Arc<LoadError>),
    /// The request was canceled before a result was delivered
    Canceled,
}

/// A listener callback invocation
#[derive(Debug, Clone)]
pub struct Delivery {
    /// `true` when delivered synchronously from the call that caused it
    pub immediate: bool,
    pub event: LoadEvent,
}

impl Delivery {
    fn immediate(event: LoadEvent) -> Self {
        Self { immediate: true, event }
    }

    fn batched(event: LoadEvent) -> Self {
        Self { immediate: false, event }
    }
}

type Listener = Box<dyn FnMut(Delivery)>;

struct Waiter {
    id: u64,
    tag: Option<String>,
    listener: Listener,
}

struct InFlight {
    job_id: u64,
    cancel: CancelToken,
    source: ImageSource,
    waiters: Vec<Waiter>,
}

enum Resolution {
    Ready(Arc<ImageEntry>),
    Failed(Arc<LoadError>),
}

impl Resolution {
    fn event(&self) -> LoadEvent {
        match self {
            Self::Ready(entry) => LoadEvent::Ready(entry.clone()),
            Self::Failed(error) => LoadEvent::Failed(error.clone()),
        }
    }
}

/// A resolved load waiting for the flush
struct Batch {
    key: CacheKey,
    resolution: Resolution,
    waiters: Vec<Waiter>,
}

struct Animation {
    key: CacheKey,
    handle: AnimationHandle,
}

/// Coordinator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub requests: u64,
    /// Requests answered from the memory cache
    pub memory_hits: u64,
    /// Requests that joined an existing in-flight load
    pub joined: u64,
    /// Loads handed to the workers
    pub loads_started: u64,
    pub flushes: u64,
    /// Batched deliveries
    pub delivered: u64,
    pub canceled: u64,
}

struct LoaderState {
    cache: MemoryCache,
    in_flight: HashMap<CacheKey, InFlight>,
    batches: Vec<Batch>,
    /// Tag to the id of its pending request
    tags: HashMap<String, u64>,
    flush_at: Option<Instant>,
    next_id: u64,
    animations: HashMap<String, Animation>,
    stats: LoaderStats,
    shut_down: bool,
}

impl LoaderState {
    fn new(config: &ImageConfig) -> Self {
        Self {
            cache: MemoryCache::new(config.memory_cache_kb),
            in_flight: HashMap::new(),
            batches: Vec::new(),
            tags: HashMap::new(),
            flush_at: None,
            next_id: 1,
            animations: HashMap::new(),
            stats: LoaderStats::default(),
            shut_down: false,
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Key of the load a pending request waits on
    fn pending_key(&self, id: u64) -> Option<CacheKey> {
        let waits = |waiters: &[Waiter]| waiters.iter().any(|w| w.id == id);
        self.in_flight
            .iter()
            .find(|(_, f)| waits(&f.waiters))
            .map(|(k, _)| k.clone())
            .or_else(|| self.batches.iter().find(|b| waits(&b.waiters)).map(|b| b.key.clone()))
    }

    fn forget_tag(&mut self, waiter: &Waiter) {
        if let Some(tag) = &waiter.tag {
            if self.tags.get(tag) == Some(&waiter.id) {
                self.tags.remove(tag);
            }
        }
    }

    /// Detach a pending waiter. The last waiter of an in-flight load cancels it.
    fn remove_waiter(&mut self, key: &CacheKey, id: u64) -> Option<Waiter> {
        let waiter = self.take_in_flight_waiter(key, id).or_else(|| self.take_batched_waiter(key, id))?;
        self.forget_tag(&waiter);
        self.stats.canceled += 1;
        Some(waiter)
    }

    /// Detach a pending waiter whose load a new request for the same key takes over.
    /// The load keeps running even with no waiters left.
    fn hand_over_waiter(&mut self, key: &CacheKey, id: u64) -> Option<Waiter> {
        let in_flight = self.in_flight.get_mut(key).and_then(|flight| {
            let pos = flight.waiters.iter().position(|w| w.id == id)?;
            Some(flight.waiters.remove(pos))
        });
        let waiter = in_flight.or_else(|| self.take_batched_waiter(key, id))?;
        self.forget_tag(&waiter);
        self.stats.canceled += 1;
        Some(waiter)
    }

    fn take_in_flight_waiter(&mut self, key: &CacheKey, id: u64) -> Option<Waiter> {
        let flight = self.in_flight.get_mut(key)?;
        let pos = flight.waiters.iter().position(|w| w.id == id)?;
        let waiter = flight.waiters.remove(pos);
        if flight.waiters.is_empty() {
            flight.cancel.cancel();
            self.in_flight.remove(key);
            tracing::debug!("Canceled load of {}: no waiters left", key);
        }
        Some(waiter)
    }

    fn take_batched_waiter(&mut self, key: &CacheKey, id: u64) -> Option<Waiter> {
        for i in 0..self.batches.len() {
            let batch = &mut self.batches[i];
            if batch.key != *key {
                continue;
            }
            let Some(pos) = batch.waiters.iter().position(|w| w.id == id) else {
                continue;
            };
            let waiter = batch.waiters.remove(pos);
            if batch.waiters.is_empty() {
                self.batches.remove(i);
                if self.batches.is_empty() {
                    self.flush_at = None;
                }
            }
            return Some(waiter);
        }
        None
    }

    fn schedule_flush(&mut self, delay: std::time::Duration) {
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + delay);
        }
    }
}

/// Handle to one request, used to cancel it
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: u64,
    key: CacheKey,
    state: Weak<RefCell<LoaderState>>,
}

impl RequestHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Cancel the request if it is still pending. Idempotent.
    ///
    /// The listener receives [`LoadEvent::Canceled`] instead of its result,
    /// even when the result is already waiting for the flush.
    pub fn cancel(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let waiter = state.borrow_mut().remove_waiter(&self.key, self.id);
        if let Some(mut waiter) = waiter {
            tracing::trace!("Request {} for {} canceled", self.id, self.key);
            (waiter.listener)(Delivery::immediate(LoadEvent::Canceled));
        }
    }

    /// Whether the request is still waiting for its result
    pub fn is_pending(&self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let state = state.borrow();
        let waiting = |waiters: &[Waiter]| waiters.iter().any(|w| w.id == self.id);
        state.in_flight.get(&self.key).is_some_and(|f| waiting(&f.waiters))
            || state.batches.iter().any(|b| b.key == self.key && waiting(&b.waiters))
    }
}

/// Single-flight image loader with batched delivery
pub struct ImageLoader {
    ctx: Arc<ImageContext>,
    state: Rc<RefCell<LoaderState>>,
    decode_queue: DecodeQueue<DecodeJob>,
    playback_queue: DecodeQueue<PlaybackJob>,
    completions: Receiver<Completion>,
    workers: RefCell<Vec<WorkerSet>>,
}

impl ImageLoader {
    /// Start a loader and its workers over `ctx`
    pub fn new(ctx: Arc<ImageContext>) -> Result<Self, LoadError> {
        let config = ctx.config();
        let decode_queue = DecodeQueue::new(config.decode_queue_capacity);
        let playback_queue = DecodeQueue::new(config.decode_queue_capacity);
        let (reply, completions) = smol::channel::unbounded();

        let decoders = {
            let ctx = ctx.clone();
            WorkerSet::spawn("fos-image-decode", config.decode_workers, decode_queue.receiver(), move |job| {
                run_decode_job(&ctx, job, &reply)
            })?
        };
        let players = {
            let ctx = ctx.clone();
            WorkerSet::spawn("fos-image-playback", 1, playback_queue.receiver(), move |job| {
                run_playback_job(&ctx, job)
            })?
        };

        tracing::info!(
            "Image loader started: {} KiB memory cache, {} ms flush delay",
            config.memory_cache_kb,
            config.flush_delay_ms
        );
        Ok(Self {
            state: Rc::new(RefCell::new(LoaderState::new(config))),
            ctx,
            decode_queue,
            playback_queue,
            completions,
            workers: RefCell::new(vec![decoders, players]),
        })
    }

    /// Loader over a default context for `config`
    pub fn with_config(config: ImageConfig) -> Result<Self, LoadError> {
        Self::new(ImageContext::new(config))
    }

    pub fn context(&self) -> &Arc<ImageContext> {
        &self.ctx
    }

    /// Request an image bounded by `max_width` x `max_height` (0 = unbounded).
    ///
    /// A newer request with the same `tag` cancels the older one. When both
    /// ask for the same key the newer one takes over the running load.
    pub fn request(
        &self,
        source: ImageSource,
        tag: Option<&str>,
        max_width: u32,
        max_height: u32,
        listener: impl FnMut(Delivery) + 'static,
    ) -> RequestHandle {
        let mut listener: Listener = Box::new(listener);
        let key = SourceKey::new(source.clone(), max_width, max_height).cache_key();

        let (id, superseded, hit) = {
            let mut state = self.state.borrow_mut();
            state.stats.requests += 1;
            let id = state.alloc_id();
            if state.shut_down {
                drop(state);
                listener(Delivery::immediate(LoadEvent::Failed(Arc::new(LoadError::Shutdown))));
                return self.handle(id, key);
            }

            let superseded = match tag.and_then(|tag| state.tags.remove(tag)) {
                Some(old) => match state.pending_key(old) {
                    Some(pending) if pending == key => state.hand_over_waiter(&key, old),
                    Some(pending) => state.remove_waiter(&pending, old),
                    None => None,
                },
                None => None,
            };

            let hit = state.cache.get(&key);
            if hit.is_some() {
                state.stats.memory_hits += 1;
            }
            (id, superseded, hit)
        };

        if let Some(mut old) = superseded {
            tracing::debug!("Request {} superseded by {}", old.id, id);
            (old.listener)(Delivery::immediate(LoadEvent::Canceled));
        }

        if let Some(entry) = hit {
            tracing::trace!("Memory hit for {}", key);
            listener(Delivery::immediate(LoadEvent::Ready(entry)));
            return self.handle(id, key);
        }

        listener(Delivery::immediate(LoadEvent::Placeholder));

        let waiter = Waiter {
            id,
            tag: tag.map(str::to_string),
            listener,
        };
        let mut state = self.state.borrow_mut();
        if let Some(tag) = tag {
            state.tags.insert(tag.to_string(), id);
        }

        if let Some(flight) = state.in_flight.get_mut(&key) {
            tracing::trace!("Joining in-flight load of {}", key);
            flight.waiters.push(waiter);
            state.stats.joined += 1;
            return self.handle(id, key);
        }

        let cancel = CancelToken::new();
        let job = DecodeJob {
            id,
            key: key.clone(),
            source: source.clone(),
            max_width,
            max_height,
            cancel: cancel.clone(),
        };
        match self.decode_queue.submit(job) {
            Ok(()) => {
                tracing::debug!("Started load {} of {}", id, key);
                state.stats.loads_started += 1;
                state.in_flight.insert(
                    key.clone(),
                    InFlight {
                        job_id: id,
                        cancel,
                        source,
                        waiters: vec![waiter],
                    },
                );
            }
            Err(e) => {
                tracing::warn!("Could not queue load of {}: {}", key, e);
                state.batches.push(Batch {
                    key: key.clone(),
                    resolution: Resolution::Failed(Arc::new(e)),
                    waiters: vec![waiter],
                });
                state.schedule_flush(self.ctx.config().flush_delay());
            }
        }
        self.handle(id, key)
    }

    /// Request a local file
    pub fn decode_file(
        &self,
        path: impl Into<PathBuf>,
        tag: Option<&str>,
        max_width: u32,
        max_height: u32,
        listener: impl FnMut(Delivery) + 'static,
    ) -> RequestHandle {
        self.request(ImageSource::file(path), tag, max_width, max_height, listener)
    }

    /// Request a bundled resource
    pub fn decode_resource(
        &self,
        name: impl Into<String>,
        tag: Option<&str>,
        max_width: u32,
        max_height: u32,
        listener: impl FnMut(Delivery) + 'static,
    ) -> RequestHandle {
        self.request(ImageSource::resource(name), tag, max_width, max_height, listener)
    }

    fn handle(&self, id: u64, key: CacheKey) -> RequestHandle {
        RequestHandle {
            id,
            key,
            state: Rc::downgrade(&self.state),
        }
    }

    /// Process finished loads and run the flush if it is due.
    ///
    /// Returns the number of completions handled.
    pub fn pump(&self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.complete(completion);
            handled += 1;
        }
        let due = self.state.borrow().flush_at.is_some_and(|at| at <= Instant::now());
        if due {
            self.flush();
        }
        handled
    }

    /// Wait for the next completion or the flush deadline, then pump
    pub async fn tick(&self) {
        let deadline = self.state.borrow().flush_at;
        let completion = match deadline {
            Some(at) => {
                smol::future::or(async { self.completions.recv().await.ok() }, async {
                    smol::Timer::at(at).await;
                    None
                })
                .await
            }
            None => self.completions.recv().await.ok(),
        };
        if let Some(completion) = completion {
            self.complete(completion);
        }
        self.pump();
    }

    /// Drive the loader until nothing is in flight or awaiting delivery
    pub async fn run_until_idle(&self) {
        while !self.is_idle() {
            if self.state.borrow().shut_down {
                break;
            }
            self.tick().await;
        }
    }

    /// No load in flight and no batch awaiting its flush
    pub fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.in_flight.is_empty() && state.batches.is_empty()
    }

    /// Number of loads currently in flight
    pub fn in_flight(&self) -> usize {
        self.state.borrow().in_flight.len()
    }

    fn complete(&self, completion: Completion) {
        let Completion { id, key, outcome } = completion;
        let canceled = {
            let mut state = self.state.borrow_mut();
            if state.in_flight.get(&key).is_none_or(|f| f.job_id != id) {
                tracing::trace!("Dropping result of abandoned load {} for {}", id, key);
                return;
            }
            let Some(flight) = state.in_flight.remove(&key) else {
                return;
            };

            let resolution = match outcome {
                JobOutcome::Ready(image) => {
                    let entry = Arc::new(ImageEntry::new(key.clone(), flight.source, image, self.ctx.pool()));
                    state.cache.put(key.clone(), entry.clone());
                    Some(Resolution::Ready(entry))
                }
                JobOutcome::Failed(e) => {
                    tracing::warn!("Failed to load {}: {}", key, e);
                    Some(Resolution::Failed(Arc::new(e)))
                }
                JobOutcome::Canceled => None,
            };
            match resolution {
                Some(resolution) => {
                    state.batches.push(Batch {
                        key,
                        resolution,
                        waiters: flight.waiters,
                    });
                    state.schedule_flush(self.ctx.config().flush_delay());
                    Vec::new()
                }
                // Waiters still attached, so the worker saw a shutdown
                None => {
                    for waiter in &flight.waiters {
                        state.forget_tag(waiter);
                    }
                    state.stats.canceled += flight.waiters.len() as u64;
                    flight.waiters
                }
            }
        };

        for mut waiter in canceled {
            (waiter.listener)(Delivery::immediate(LoadEvent::Canceled));
        }
    }

    /// Deliver every parked result now
    pub fn flush(&self) -> usize {
        let batches = {
            let mut state = self.state.borrow_mut();
            state.flush_at = None;
            if state.batches.is_empty() {
                return 0;
            }
            let batches = std::mem::take(&mut state.batches);
            let mut count = 0;
            for batch in &batches {
                for waiter in &batch.waiters {
                    state.forget_tag(waiter);
                    count += 1;
                }
            }
            state.stats.flushes += 1;
            state.stats.delivered += count;
            batches
        };

        let mut delivered = 0;
        for batch in batches {
            tracing::trace!("Delivering {} to {} waiter(s)", batch.key, batch.waiters.len());
            for mut waiter in batch.waiters {
                (waiter.listener)(Delivery::batched(batch.resolution.event()));
                delivered += 1;
            }
        }
        delivered
    }

    /// Play `entry` on the playback worker, replacing whatever `tag` was playing.
    ///
    /// Asking again for the same entry under the same tag while it still
    /// plays returns the running handle.
    pub fn animate(
        &self,
        entry: &ImageEntry,
        tag: &str,
        sink: impl FnMut(AnimationFrame<'_>) + Send + 'static,
    ) -> Result<AnimationHandle, LoadError> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(LoadError::Shutdown);
        }
        if let Some(running) = state.animations.get(tag) {
            if running.key == *entry.key() && !running.handle.is_canceled() && !running.handle.is_finished() {
                return Ok(running.handle.clone());
            }
            running.handle.cancel();
        }

        let handle = AnimationHandle::new();
        self.playback_queue.submit(PlaybackJob {
            key: entry.key().clone(),
            source: entry.source().clone(),
            sample_size: entry.sample_size(),
            handle: handle.clone(),
            sink: Box::new(sink),
        })?;
        tracing::debug!("Animating {} as {}", entry.key(), tag);
        state.animations.insert(
            tag.to_string(),
            Animation {
                key: entry.key().clone(),
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Stop the animation playing under `tag`
    pub fn stop_animation(&self, tag: &str) -> bool {
        match self.state.borrow_mut().animations.remove(tag) {
            Some(animation) => {
                animation.handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get_from_memory_cache(&self, key: &CacheKey) -> Option<Arc<ImageEntry>> {
        self.state.borrow_mut().cache.get(key)
    }

    pub fn add_to_memory_cache(&self, entry: Arc<ImageEntry>) {
        let key = entry.key().clone();
        self.state.borrow_mut().cache.put(key, entry);
    }

    pub fn remove_from_memory_cache(&self, key: &CacheKey) -> Option<Arc<ImageEntry>> {
        self.state.borrow_mut().cache.remove(key)
    }

    /// Empty the memory cache; the persistent tiers are left alone
    pub fn clear_memory_cache(&self) {
        self.state.borrow_mut().cache.clear();
        tracing::debug!("Memory cache cleared");
    }

    /// Drop everything held by the persistent stores
    pub fn clear_persistent_cache(&self) {
        self.ctx.persistent().clear();
        self.ctx.blobs().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.state.borrow().cache.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.ctx.pool().stats()
    }

    pub fn stats(&self) -> LoaderStats {
        self.state.borrow().stats
    }

    /// Cancel every pending request and animation and stop the workers.
    ///
    /// Results already parked for the flush are delivered first. Blocks until
    /// the worker threads exit. Idempotent.
    pub fn shutdown(&self) {
        let canceled = {
            let mut state = self.state.borrow_mut();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            for animation in state.animations.values() {
                animation.handle.cancel();
            }
            state.animations.clear();
            let flights: Vec<InFlight> = state.in_flight.drain().map(|(_, f)| f).collect();
            let mut waiters = Vec::new();
            for flight in flights {
                flight.cancel.cancel();
                waiters.extend(flight.waiters);
            }
            state.stats.canceled += waiters.len() as u64;
            waiters
        };

        self.flush();
        for mut waiter in canceled {
            (waiter.listener)(Delivery::immediate(LoadEvent::Canceled));
        }
        self.state.borrow_mut().tags.clear();

        self.decode_queue.close();
        self.playback_queue.close();
        for workers in self.workers.borrow_mut().drain(..) {
            workers.join();
        }
        while self.completions.try_recv().is_ok() {}
        tracing::info!("Image loader shut down");
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ImageLoader")
            .field("in_flight", &state.in_flight.len())
            .field("batches", &state.batches.len())
            .field("cache", &state.cache.stats())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}
