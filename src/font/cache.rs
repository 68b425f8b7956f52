//! Font resolution cache
//!
//! One entry per distinct font reference. The first request starts the
//! load; requests arriving while it is in flight wait for the same result.
//! Entries move once from `Loading` to `Ready` or `Failed` and then stay.
//! A load dropped before it settles removes its entry instead.
//!
//! Failed entries are answered from the cache without re-fetching until
//! the owner calls `forget_failed`.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::face::{FaceHandle, FontdueFace};
use super::fontconfig::FontFinder;
use super::identifier::{FontIdentifier, FontSource};
use crate::error::{AtlasError, Result};

/// Fetches and parses font faces
pub trait FontLoader: Send + Sync {
    /// Load the font file at `url`
    fn load_url(&self, url: &str, face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>>;

    /// Load an installed face by family name
    fn load_face(&self, family: &str, face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>>;
}

type Waiter = oneshot::Sender<Result<FaceHandle>>;

/// Cache entry state
enum FontCacheEntry {
    Loading { waiters: Vec<Waiter> },
    Ready(FaceHandle),
    Failed(AtlasError),
}

/// Process-wide font cache shared across atlas builds
pub struct FontCache {
    loader: Box<dyn FontLoader>,
    entries: Mutex<HashMap<(FontSource, String), FontCacheEntry>>,
    face_serial: AtomicU64,
}

/// What a request has to do after inspecting the cache
enum Lookup {
    Done(Result<FaceHandle>),
    Wait(oneshot::Receiver<Result<FaceHandle>>),
    Load,
}

impl FontCache {
    pub fn new(loader: Box<dyn FontLoader>) -> Self {
        Self {
            loader,
            entries: Mutex::new(HashMap::new()),
            face_serial: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(FontSource, String), FontCacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inspect the entry for `key`, claiming the load if there is none
    fn lookup(&self, key: &(FontSource, String)) -> Lookup {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(FontCacheEntry::Ready(face)) => Lookup::Done(Ok(face.clone())),
            Some(FontCacheEntry::Failed(err)) => Lookup::Done(Err(err.clone())),
            Some(FontCacheEntry::Loading { waiters }) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Lookup::Wait(rx)
            }
            None => {
                entries.insert(key.clone(), FontCacheEntry::Loading { waiters: Vec::new() });
                Lookup::Load
            }
        }
    }

    /// Resolve a font identifier to a loaded face
    ///
    /// The size part of the identifier does not take part in caching: one
    /// face serves every size. A waiter whose load was abandoned looks the
    /// entry up again and may start the load itself.
    pub async fn resolve(&self, id: &FontIdentifier) -> Result<FaceHandle> {
        let key = (id.source(), id.reference().to_string());

        loop {
            match self.lookup(&key) {
                Lookup::Done(result) => return result,
                Lookup::Wait(rx) => {
                    debug!("Waiting for in-flight font load: {}", id.reference());
                    if let Ok(result) = rx.await {
                        return result;
                    }
                }
                Lookup::Load => return self.load(id, key).await,
            }
        }
    }

    async fn load(&self, id: &FontIdentifier, key: (FontSource, String)) -> Result<FaceHandle> {
        let pending = PendingLoad {
            cache: self,
            key: Some(key),
        };
        let face_name = format!("FontFace{}", self.face_serial.fetch_add(1, Ordering::Relaxed) + 1);
        let load = match id.source() {
            FontSource::Url => self.loader.load_url(id.reference(), face_name),
            FontSource::Face => self.loader.load_face(id.reference(), face_name),
        };
        let outcome = load.await.map_err(|e| AtlasError::FontResolution {
            url: id.reference().to_string(),
            reason: format!("{:#}", e),
        });
        pending.settle(&outcome);
        outcome
    }

    /// One-shot transition out of `Loading`, releasing every waiter
    fn settle(&self, key: (FontSource, String), outcome: &Result<FaceHandle>) {
        let entry = match outcome {
            Ok(face) => {
                info!("Font ready: {} as {}", key.1, face.name());
                FontCacheEntry::Ready(face.clone())
            }
            Err(err) => {
                warn!("{}", err);
                FontCacheEntry::Failed(err.clone())
            }
        };

        let previous = self.lock().insert(key, entry);
        if let Some(FontCacheEntry::Loading { waiters }) = previous {
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    /// Forget a load whose future was dropped before it finished
    ///
    /// The entry is removed so the next request starts a fresh load. Queued
    /// waiters see their sender dropped and retry.
    fn abandon(&self, key: &(FontSource, String)) {
        let mut entries = self.lock();
        if matches!(entries.get(key), Some(FontCacheEntry::Loading { .. })) {
            debug!("Font load abandoned: {}", key.1);
            entries.remove(key);
        }
    }

    /// Drop failed entries so the next request loads again; returns how many
    pub fn forget_failed(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !matches!(entry, FontCacheEntry::Failed(_)));
        before - entries.len()
    }

    /// Number of cached entries (any state)
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// In-flight load owned by the request that started it
///
/// Settles the entry on completion; if dropped first, abandons it.
struct PendingLoad<'a> {
    cache: &'a FontCache,
    key: Option<(FontSource, String)>,
}

impl PendingLoad<'_> {
    fn settle(mut self, outcome: &Result<FaceHandle>) {
        if let Some(key) = self.key.take() {
            self.cache.settle(key, outcome);
        }
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.abandon(&key);
        }
    }
}

/// Loads font files from disk and installed faces through fontconfig
pub struct SystemFontLoader {
    search_dirs: Vec<PathBuf>,
    finder: Option<Arc<FontFinder>>,
}

impl SystemFontLoader {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        let finder = match FontFinder::new() {
            Ok(finder) => Some(Arc::new(finder)),
            Err(e) => {
                warn!("{:#}; face fonts are unavailable", e);
                None
            }
        };
        Self { search_dirs, finder }
    }

    /// Map a URL to a file path: `file://` URLs, absolute paths, then
    /// paths relative to the search directories
    fn locate(&self, url: &str) -> anyhow::Result<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if url.contains("://") {
            anyhow::bail!("unsupported URL scheme: {}", url);
        }
        let path = Path::new(url);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.exists())
            .or_else(|| path.exists().then(|| path.to_path_buf()))
            .ok_or_else(|| anyhow::anyhow!("font file not found: {}", url))
    }
}

impl FontLoader for SystemFontLoader {
    fn load_url(&self, url: &str, face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>> {
        let located = self.locate(url);
        async move {
            let path = located?;
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read font file: {} ({})", path.display(), e))?;
            let face: FaceHandle = Arc::new(FontdueFace::from_bytes(face_name, &data)?);
            Ok(face)
        }
        .boxed()
    }

    fn load_face(&self, family: &str, face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>> {
        let family = family.to_string();
        let finder = self.finder.clone();
        async move {
            let finder = finder.ok_or_else(|| anyhow::anyhow!("fontconfig is not available"))?;
            // fontconfig queries block; keep them off the runtime thread
            let font_match = tokio::task::spawn_blocking(move || finder.resolve(&family))
                .await
                .map_err(|e| anyhow::anyhow!("fontconfig lookup failed: {}", e))??;
            let data = tokio::fs::read(&font_match.path).await.map_err(|e| {
                anyhow::anyhow!("Failed to read font file: {} ({})", font_match.path.display(), e)
            })?;
            let face: FaceHandle = Arc::new(FontdueFace::from_bytes(face_name, &data)?);
            Ok(face)
        }
        .boxed()
    }
}
