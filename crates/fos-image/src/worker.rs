//! Decode workers
//!
//! Each worker thread pulls jobs from a [`DecodeQueue`](crate::DecodeQueue)
//! until it is closed. A load consults the persistent tier, then fetches,
//! sniffs, decodes the first frame and subsamples it. Results go back to the
//! coordinator over an unbounded channel. A panicking job is reported as
//! [`LoadError::WorkerPanic`] and the worker keeps running.

use std::any::Any;
use std::fs::File;
use std::io::{self, Cursor};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fos_gif::{CancelToken, GifError, Step};
use smol::channel::{Receiver, Sender};

use crate::codec::ReadSeek;
use crate::context::ImageContext;
use crate::fetch::Fetched;
use crate::format::{decode_format, decode_format_file};
use crate::sample::{sample_size, subsample};
use crate::store::BitmapRecord;
use crate::{CacheKey, DecodedImage, ImageFormat, ImageSource, LoadError};

/// A unit of work for the load queue
pub(crate) struct DecodeJob {
    pub id: u64,
    pub key: CacheKey,
    pub source: ImageSource,
    pub max_width: u32,
    pub max_height: u32,
    pub cancel: CancelToken,
}

pub(crate) enum JobOutcome {
    Ready(DecodedImage),
    Failed(LoadError),
    Canceled,
}

/// Result of a [`DecodeJob`], matched back to its in-flight task by `id`
pub(crate) struct Completion {
    pub id: u64,
    pub key: CacheKey,
    pub outcome: JobOutcome,
}

/// Threads draining one queue
pub(crate) struct WorkerSet {
    name: String,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerSet {
    /// Spawn `count` threads running `handler` for every job on `jobs`
    pub fn spawn<J, F>(name: &str, count: usize, jobs: Receiver<J>, handler: F) -> io::Result<Self>
    where
        J: Send + 'static,
        F: Fn(J) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(count);
        for i in 0..count.max(1) {
            let jobs = jobs.clone();
            let handler = handler.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    while let Ok(job) = jobs.recv_blocking() {
                        handler(job);
                    }
                    tracing::trace!("Worker {} exiting", thread::current().name().unwrap_or("?"));
                })?;
            handles.push(handle);
        }
        tracing::debug!("Started {} {} worker(s)", handles.len(), name);
        Ok(Self {
            name: name.to_string(),
            handles,
        })
    }

    /// Wait for every thread to exit. The queue must be closed first.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("A {} worker terminated abnormally", self.name);
            }
        }
    }
}

/// Run one load and report its completion
pub(crate) fn run_decode_job(ctx: &ImageContext, job: DecodeJob, reply: &Sender<Completion>) {
    tracing::debug!("Loading {}", job.key);
    let outcome = match catch_unwind(AssertUnwindSafe(|| load(ctx, &job))) {
        Ok(Ok(Some(image))) => JobOutcome::Ready(image),
        Ok(Ok(None)) => {
            tracing::debug!("Load of {} canceled", job.key);
            JobOutcome::Canceled
        }
        Ok(Err(e)) => {
            tracing::debug!("Load of {} failed: {}", job.key, e);
            JobOutcome::Failed(e)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("Worker panicked loading {}: {}", job.key, message);
            JobOutcome::Failed(LoadError::WorkerPanic(message))
        }
    };

    let completion = Completion {
        id: job.id,
        key: job.key,
        outcome,
    };
    if reply.try_send(completion).is_err() {
        tracing::trace!("Coordinator gone, dropping completion");
    }
}

/// `Ok(None)` means the job was canceled
fn load(ctx: &ImageContext, job: &DecodeJob) -> Result<Option<DecodedImage>, LoadError> {
    if job.cancel.is_canceled() {
        return Ok(None);
    }

    if let Some(bytes) = ctx.persistent().get(&job.key) {
        match BitmapRecord::decode(&bytes) {
            Some(record) => {
                tracing::debug!("Persistent hit for {}", job.key);
                return Ok(Some(decoded_from_record(record)));
            }
            None => {
                tracing::warn!("Discarding corrupt persistent record for {}", job.key);
                ctx.persistent().remove(&job.key);
            }
        }
    }

    let fetched = match ctx.fetcher().fetch(&job.source, &job.cancel) {
        Ok(fetched) => fetched,
        Err(_) if job.cancel.is_canceled() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if job.cancel.is_canceled() {
        return Ok(None);
    }
    let opened = open_fetched(fetched)?;
    let mut stream = ctx
        .codecs()
        .open(opened.format, opened.reader, ctx.decode_options(job.cancel.clone(), false))?;

    let (width, height) = stream.dimensions();
    let sample = sample_size(width, height, job.max_width, job.max_height);
    let bitmap = match stream.next_frame()? {
        Step::Frame(frame) => subsample(frame.bitmap, sample, ctx.pool())?,
        Step::Canceled => return Ok(None),
        Step::Finished => return Err(GifError::Truncated { frames: 0 }.into()),
    };

    // A second frame is what makes an image animated
    let animated = match stream.next_frame()? {
        Step::Frame(_) => true,
        Step::Finished => false,
        Step::Canceled => {
            release(ctx, bitmap);
            return Ok(None);
        }
    };
    let frame_count = if animated { stream.frame_count() } else { Some(1) };
    let loop_count = stream.loop_count();
    drop(stream);

    if animated {
        if let Some(bytes) = opened.bytes {
            ctx.blobs().put(&job.key, bytes);
        }
    }

    let image = DecodedImage {
        bitmap,
        format: opened.format,
        source_width: width,
        source_height: height,
        sample_size: sample,
        frame_count,
        loop_count,
        animated,
    };
    let record = record_from_decoded(&image);
    ctx.persistent().put(&job.key, Arc::from(record.encode()));

    if job.cancel.is_canceled() {
        release(ctx, image.bitmap);
        return Ok(None);
    }
    Ok(Some(image))
}

pub(crate) struct OpenedSource {
    pub format: ImageFormat,
    pub reader: Box<dyn ReadSeek>,
    /// In-memory payload, when there is one
    pub bytes: Option<Arc<[u8]>>,
}

/// Sniff the format of fetched data and open it for reading
pub(crate) fn open_fetched(fetched: Fetched) -> Result<OpenedSource, LoadError> {
    match fetched {
        Fetched::Bytes(bytes) => Ok(OpenedSource {
            format: decode_format(&bytes),
            reader: Box::new(Cursor::new(bytes.clone())),
            bytes: Some(bytes),
        }),
        Fetched::File(path) => {
            let format = decode_format_file(&path)?;
            let file = File::open(&path)?;
            Ok(OpenedSource {
                format,
                reader: Box::new(file),
                bytes: None,
            })
        }
    }
}

fn release(ctx: &ImageContext, bitmap: fos_gif::Bitmap) {
    let (width, height) = (bitmap.width(), bitmap.height());
    ctx.pool().release(width, height, bitmap.into_pixels());
}

fn decoded_from_record(record: BitmapRecord) -> DecodedImage {
    DecodedImage {
        bitmap: record.bitmap,
        format: record.format,
        source_width: record.source_width,
        source_height: record.source_height,
        sample_size: record.sample_size,
        frame_count: (record.frame_count > 0).then_some(record.frame_count as usize),
        loop_count: record.loop_count,
        animated: record.animated,
    }
}

fn record_from_decoded(image: &DecodedImage) -> BitmapRecord {
    BitmapRecord {
        bitmap: image.bitmap.clone(),
        format: image.format,
        source_width: image.source_width,
        source_height: image.source_height,
        sample_size: image.sample_size,
        frame_count: image.frame_count.map_or(0, |n| n as u32),
        animated: image.animated,
        loop_count: image.loop_count,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Fetcher;
    use crate::{FetchError, ImageConfig, SourceKey};
    use fos_gif::encoder::{FrameSpec, GifEncoder};

    struct BytesFetcher(Arc<[u8]>);

    impl Fetcher for BytesFetcher {
        fn fetch(&self, _source: &ImageSource, _cancel: &CancelToken) -> Result<Fetched, FetchError> {
            Ok(Fetched::Bytes(self.0.clone()))
        }
    }

    fn context(bytes: Vec<u8>) -> Arc<ImageContext> {
        ImageContext::builder(ImageConfig::default())
            .fetcher(Arc::new(BytesFetcher(Arc::from(bytes))))
            .build()
    }

    fn job(max: u32) -> DecodeJob {
        let source = ImageSource::network("https://example.com/a.gif");
        DecodeJob {
            id: 1,
            key: SourceKey::new(source.clone(), max, max).cache_key(),
            source,
            max_width: max,
            max_height: max,
            cancel: CancelToken::new(),
        }
    }

    fn palette() -> Vec<[u8; 3]> {
        vec![[0, 0, 0], [255, 0, 0], [0, 0, 255]]
    }

    #[test]
    fn test_static_load_subsamples() {
        let gif = GifEncoder::new(8, 8, palette()).frame(FrameSpec::solid(8, 8, 1)).encode();
        let ctx = context(gif);
        let image = load(&ctx, &job(4)).unwrap().unwrap();
        assert_eq!(image.sample_size, 2);
        assert_eq!((image.bitmap.width(), image.bitmap.height()), (4, 4));
        assert_eq!((image.source_width, image.source_height), (8, 8));
        assert_eq!(image.frame_count, Some(1));
        assert!(!image.animated);
        assert_eq!(image.format, ImageFormat::Gif);
    }

    #[test]
    fn test_animated_keeps_source_blob() {
        let gif = GifEncoder::new(2, 2, palette())
            .looping(0)
            .frame(FrameSpec::solid(2, 2, 1))
            .frame(FrameSpec::solid(2, 2, 2))
            .encode();
        let ctx = context(gif);
        let job = job(0);
        let image = load(&ctx, &job).unwrap().unwrap();
        assert!(image.animated);
        assert_eq!(image.loop_count, Some(0));
        assert!(ctx.blobs().get(&job.key).is_some());
    }

    #[test]
    fn test_persistent_hit_skips_fetch() {
        let gif = GifEncoder::new(2, 2, palette()).frame(FrameSpec::solid(2, 2, 2)).encode();
        let ctx = context(gif);
        let job = job(0);
        let first = load(&ctx, &job).unwrap().unwrap();

        let stored = ImageContext::builder(ImageConfig::default())
            .fetcher(Arc::new(BytesFetcher(Arc::from(&b"not an image"[..]))))
            .persistent_store(ctx.persistent().clone())
            .build();
        let second = load(&stored, &job).unwrap().unwrap();
        assert_eq!(second.bitmap, first.bitmap);
        assert_eq!(second.frame_count, Some(1));
    }

    #[test]
    fn test_unknown_format_fails() {
        let ctx = context(b"definitely not an image".to_vec());
        let err = load(&ctx, &job(0)).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(ImageFormat::Unknown)));
    }

    #[test]
    fn test_canceled_before_start() {
        let gif = GifEncoder::new(1, 1, palette()).frame(FrameSpec::solid(1, 1, 1)).encode();
        let ctx = context(gif);
        let job = job(0);
        job.cancel.cancel();
        assert!(load(&ctx, &job).unwrap().is_none());
    }

    #[test]
    fn test_completion_is_sent() {
        let gif = GifEncoder::new(1, 1, palette()).frame(FrameSpec::solid(1, 1, 1)).encode();
        let ctx = context(gif);
        let (tx, rx) = smol::channel::unbounded();
        run_decode_job(&ctx, job(0), &tx);
        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.id, 1);
        assert!(matches!(completion.outcome, JobOutcome::Ready(_)));
    }

    #[test]
    fn test_panic_message() {
        let caught = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");
        let caught = catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "formatted 1");
    }
}
