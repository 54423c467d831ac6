//! Asynchronous, deduplicating loader from file names to parsed files.
//!
//! Fetching is injected: the loader only decides *which* candidate paths a
//! name may live under and guarantees that a name is fetched and parsed at
//! most once for a successful outcome, no matter how many concurrent callers
//! ask for it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use log::{debug, trace};
use parking_lot::Mutex;

use crate::ldraw::error::{Error, FetchError};
use crate::ldraw::{normalize_name, LdrawFile};

/// Outcome of a [`FileLoader::load`] call, shared between all callers.
pub type LoadResult = Result<Arc<LdrawFile>, Arc<Error>>;

type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Fetch transport for file contents.
///
/// The loader hands the implementation the logical name and the candidate
/// paths the name may resolve to. The returned future completes with the
/// contents of the first candidate that succeeds; implementations are free to
/// race the candidates. It rejects only once every candidate has failed.
pub trait FetchContents: Send + Sync + 'static {
    fn fetch(&self, name: &str, candidates: &[String]) -> BoxFuture<'static, Result<String, FetchError>>;
}

/// Persistent key/value store consulted before the fetch transport.
///
/// The backing store is external. The loader writes fetched contents through
/// on success and never stores failures.
pub trait ContentsCache: Send + Sync + 'static {
    fn get(&self, name: &str) -> BoxFuture<'static, Option<String>>;
    fn set(&self, name: &str, contents: &str) -> BoxFuture<'static, ()>;
}

struct LoaderInner {
    fetcher: Arc<dyn FetchContents>,
    cache: Option<Arc<dyn ContentsCache>>,
    /// Successfully parsed files, memoized for the lifetime of the loader.
    parsed: Mutex<HashMap<String, Arc<LdrawFile>>>,
    /// Loads that have started but not finished. Concurrent callers for the
    /// same name all poll the same shared future.
    in_flight: Mutex<HashMap<String, SharedLoad>>,
}

/// Async loader from a logical file name to a parsed [`LdrawFile`].
///
/// Cheap to clone; clones share the same caches.
#[derive(Clone)]
pub struct FileLoader {
    inner: Arc<LoaderInner>,
}

impl FileLoader {
    pub fn new(fetcher: Arc<dyn FetchContents>, cache: Option<Arc<dyn ContentsCache>>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                cache,
                parsed: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Load and parse a file, reusing a previous or in-flight load for the
    /// same name.
    ///
    /// Failed loads are not memoized. The next call for the same name starts
    /// over.
    pub fn load(&self, name: &str) -> BoxFuture<'static, LoadResult> {
        let name = normalize_name(name);

        let mut in_flight = self.inner.in_flight.lock();

        // The parsed map is checked under the in-flight lock so a load
        // completing in between cannot slip past both checks and get
        // fetched twice.
        if let Some(file) = self.inner.parsed.lock().get(&name).cloned() {
            return future::ready(Ok(file)).boxed();
        }

        if let Some(pending) = in_flight.get(&name) {
            trace!("Joining in-flight load: {name}");
            return pending.clone().boxed();
        }

        let pending = Self::fetch_and_parse(self.inner.clone(), name.clone())
            .boxed()
            .shared();
        in_flight.insert(name, pending.clone());
        pending.boxed()
    }

    /// Returns an already loaded file without initiating a load.
    pub fn get(&self, name: &str) -> Option<Arc<LdrawFile>> {
        self.inner.parsed.lock().get(&normalize_name(name)).cloned()
    }

    async fn fetch_and_parse(inner: Arc<LoaderInner>, name: String) -> LoadResult {
        let result = Self::fetch_parse_uncached(&inner, &name).await;

        // Publish before retiring the in-flight entry so there is no window
        // where a new caller sees neither.
        if let Ok(file) = &result {
            inner.parsed.lock().insert(name.clone(), file.clone());
        }
        inner.in_flight.lock().remove(&name);

        result
    }

    async fn fetch_parse_uncached(inner: &Arc<LoaderInner>, name: &str) -> LoadResult {
        debug!("Loading {name}");

        let cached = match &inner.cache {
            Some(cache) => cache.get(name).await,
            None => None,
        };

        let contents = match cached {
            Some(contents) => {
                trace!("Contents cache hit: {name}");
                contents
            }
            None => {
                let candidates = candidate_paths(name);
                let contents = inner
                    .fetcher
                    .fetch(name, &candidates)
                    .await
                    .map_err(|e| Arc::new(Error::Fetch(e)))?;
                if let Some(cache) = &inner.cache {
                    cache.set(name, &contents).await;
                }
                contents
            }
        };

        let file = LdrawFile::parse(name, &contents).map_err(Arc::new)?;
        Ok(Arc::new(file))
    }
}

/// Candidate paths a file name may resolve to, in priority order.
///
/// Sub-parts (`s\`) live under the parts catalog, low- and high-resolution
/// primitives (`8\`, `48\`) under the primitives catalog, models under their
/// own directory, and the numeric part files under the parts catalog.
/// Anything else could be a primitive, a part or a model.
pub fn candidate_paths(name: &str) -> Vec<String> {
    let slashed = name.replace('\\', "/");

    let dirs: &[&str] = if slashed.starts_with("s/") {
        &["ldraw/parts"]
    } else if slashed.starts_with("8/") || slashed.starts_with("48/") {
        &["ldraw/p"]
    } else if slashed.ends_with(".ldr") || slashed.ends_with(".mpd") {
        &["ldraw/models"]
    } else if slashed.len() >= 3 && slashed.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        &["ldraw/parts"]
    } else {
        &["ldraw/p", "ldraw/parts", "ldraw/models"]
    };

    dirs.iter().map(|dir| format!("{dir}/{slashed}")).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    /// In-memory fetcher counting how many fetches were issued per name.
    pub(crate) struct MapFetcher {
        pub files: Mutex<HashMap<String, String>>,
        pub fetch_count: AtomicUsize,
    }

    impl MapFetcher {
        pub fn new(files: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                files: Mutex::new(
                    files
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                fetch_count: AtomicUsize::new(0),
            })
        }
    }

    impl FetchContents for MapFetcher {
        fn fetch(
            &self,
            name: &str,
            candidates: &[String],
        ) -> BoxFuture<'static, Result<String, FetchError>> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            let result = self
                .files
                .lock()
                .get(name)
                .cloned()
                .ok_or_else(|| FetchError::new_raw(name, candidates.to_vec()));
            future::ready(result).boxed()
        }
    }

    /// Contents cache backed by a shared map.
    struct MapCache {
        entries: Mutex<HashMap<String, String>>,
    }

    impl ContentsCache for MapCache {
        fn get(&self, name: &str) -> BoxFuture<'static, Option<String>> {
            future::ready(self.entries.lock().get(name).cloned()).boxed()
        }

        fn set(&self, name: &str, contents: &str) -> BoxFuture<'static, ()> {
            self.entries.lock().insert(name.to_string(), contents.to_string());
            future::ready(()).boxed()
        }
    }

    #[test]
    fn test_candidate_paths() {
        assert_eq!(
            vec!["ldraw/parts/s/3001s01.dat".to_string()],
            candidate_paths("s\\3001s01.dat")
        );
        assert_eq!(
            vec!["ldraw/p/8/4-4cyli.dat".to_string()],
            candidate_paths("8\\4-4cyli.dat")
        );
        assert_eq!(
            vec!["ldraw/p/48/1-4edge.dat".to_string()],
            candidate_paths("48\\1-4edge.dat")
        );
        assert_eq!(
            vec!["ldraw/models/car.ldr".to_string()],
            candidate_paths("car.ldr")
        );
        assert_eq!(
            vec!["ldraw/models/house.mpd".to_string()],
            candidate_paths("house.mpd")
        );
        assert_eq!(
            vec!["ldraw/parts/3001.dat".to_string()],
            candidate_paths("3001.dat")
        );
        assert_eq!(
            vec![
                "ldraw/p/stud.dat".to_string(),
                "ldraw/parts/stud.dat".to_string(),
                "ldraw/models/stud.dat".to_string(),
            ],
            candidate_paths("stud.dat")
        );
    }

    #[test]
    fn test_load_memoizes() {
        let fetcher = MapFetcher::new(&[("3001.dat", "3 16 0 0 0 1 0 0 0 1 0")]);
        let loader = FileLoader::new(fetcher.clone(), None);

        let first = pollster::block_on(loader.load("3001.dat")).unwrap();
        let second = pollster::block_on(loader.load("3001.DAT")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, fetcher.fetch_count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_loads_share_one_fetch() {
        let fetcher = MapFetcher::new(&[("3001.dat", "3 16 0 0 0 1 0 0 0 1 0")]);
        let loader = FileLoader::new(fetcher.clone(), None);

        // Create both futures before polling either so they overlap.
        let a = loader.load("3001.dat");
        let b = loader.load("3001.dat");
        let (a, b) = pollster::block_on(future::join(a, b));

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(1, fetcher.fetch_count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_loads_retry() {
        let fetcher = MapFetcher::new(&[]);
        let loader = FileLoader::new(fetcher.clone(), None);

        let missing = pollster::block_on(loader.load("3001.dat"));
        assert!(matches!(missing.unwrap_err().as_ref(), Error::Fetch(_)));

        // The failure is not memoized. Once the file becomes available the
        // next load succeeds.
        fetcher.files.lock().insert(
            "3001.dat".to_string(),
            "3 16 0 0 0 1 0 0 0 1 0".to_string(),
        );
        let found = pollster::block_on(loader.load("3001.dat"));
        assert!(found.is_ok());
        assert_eq!(2, fetcher.fetch_count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cache_consulted_before_fetch() {
        let fetcher = MapFetcher::new(&[]);
        let cache = Arc::new(MapCache {
            entries: Mutex::new(
                [("3001.dat".to_string(), "3 16 0 0 0 1 0 0 0 1 0".to_string())]
                    .into_iter()
                    .collect(),
            ),
        });
        let loader = FileLoader::new(fetcher.clone(), Some(cache));

        let file = pollster::block_on(loader.load("3001.dat")).unwrap();
        assert_eq!(1, file.commands.len());
        assert_eq!(0, fetcher.fetch_count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fetch_writes_through_to_cache() {
        let fetcher = MapFetcher::new(&[("3001.dat", "3 16 0 0 0 1 0 0 0 1 0")]);
        let cache = Arc::new(MapCache {
            entries: Mutex::new(HashMap::new()),
        });
        let loader = FileLoader::new(fetcher, Some(cache.clone()));

        pollster::block_on(loader.load("3001.dat")).unwrap();
        assert!(cache.entries.lock().contains_key("3001.dat"));
    }

    #[test]
    fn test_parse_failures_reject() {
        let fetcher = MapFetcher::new(&[("bad.dat", "1 16 0 0 0 1 0 0 0 1 0 0 0 1")]);
        let loader = FileLoader::new(fetcher, None);

        let result = pollster::block_on(loader.load("bad.dat"));
        assert!(matches!(result.unwrap_err().as_ref(), Error::Parse(_)));
    }
}
