//! Request/response facade over the background loading worker.
//!
//! The worker thread owns the file loader, the part assembler, the geometry
//! flattener and the color table; the foreground only ever sees finished,
//! owned results. Requests for the same part name are answered from the
//! worker's memo, so a name is fetched, assembled and flattened once.

use std::collections::HashMap;
use std::sync::Arc;

use brick_render::ldraw::normalize_name;
use brick_render::{
    assemble, candidate_paths, flatten, ColorTable, ContentsCache, Error, FetchContents,
    FileLoader, FlattenSettings, Geometry,
};
use futures::channel::oneshot;
use log::debug;
use thiserror::Error;

/// A fully assembled and flattened part, ready for upload.
#[derive(Debug)]
pub struct LoadedPart {
    pub name: String,
    pub geometry: Geometry,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("the loader worker is gone")]
    WorkerGone,
    #[error("{0}")]
    Load(Arc<Error>),
}

impl From<Arc<Error>> for LoadError {
    fn from(e: Arc<Error>) -> Self {
        LoadError::Load(e)
    }
}

enum Request {
    LoadColors {
        reply: oneshot::Sender<Result<Arc<ColorTable>, LoadError>>,
    },
    LoadPart {
        name: String,
        reply: oneshot::Sender<Result<Arc<LoadedPart>, LoadError>>,
    },
}

/// Handle to the background loader. Cheap to clone.
#[derive(Clone)]
pub struct Loader {
    requests: flume::Sender<Request>,
}

impl Loader {
    /// Spawn the worker thread.
    ///
    /// `color_config_name` names the color configuration file the worker
    /// loads once (for example `LDCfg.ldr`).
    pub fn spawn(
        fetcher: Arc<dyn FetchContents>,
        cache: Option<Arc<dyn ContentsCache>>,
        color_config_name: &str,
    ) -> Self {
        let (requests, receiver) = flume::unbounded();
        let color_config_name = color_config_name.to_string();
        std::thread::Builder::new()
            .name("brick-loader".to_string())
            .spawn(move || {
                Worker::new(fetcher, cache, color_config_name).run(receiver);
            })
            .expect("failed to spawn the loader worker thread");

        Self { requests }
    }

    /// The color table, loaded exactly once.
    pub async fn load_colors(&self) -> Result<Arc<ColorTable>, LoadError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::LoadColors { reply })
            .map_err(|_| LoadError::WorkerGone)?;
        response.await.map_err(|_| LoadError::WorkerGone)?
    }

    /// Load, assemble and flatten a part.
    ///
    /// Results are memoized by name; failures are not, so a later call
    /// retries.
    pub async fn load_part(&self, name: &str) -> Result<Arc<LoadedPart>, LoadError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::LoadPart {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| LoadError::WorkerGone)?;
        response.await.map_err(|_| LoadError::WorkerGone)?
    }
}

struct Worker {
    loader: FileLoader,
    fetcher: Arc<dyn FetchContents>,
    color_config_name: String,
    flatten_settings: FlattenSettings,
    colors: Option<Arc<ColorTable>>,
    parts: HashMap<String, Arc<LoadedPart>>,
}

impl Worker {
    fn new(
        fetcher: Arc<dyn FetchContents>,
        cache: Option<Arc<dyn ContentsCache>>,
        color_config_name: String,
    ) -> Self {
        Self {
            loader: FileLoader::new(fetcher.clone(), cache),
            fetcher,
            color_config_name,
            flatten_settings: FlattenSettings::default(),
            colors: None,
            parts: HashMap::new(),
        }
    }

    fn run(mut self, receiver: flume::Receiver<Request>) {
        while let Ok(request) = receiver.recv() {
            match request {
                Request::LoadColors { reply } => {
                    // A dropped receiver just discards the result.
                    let _ = reply.send(self.ensure_colors());
                }
                Request::LoadPart { name, reply } => {
                    let _ = reply.send(self.load_part(&name));
                }
            }
        }
        debug!("Loader worker shutting down");
    }

    fn ensure_colors(&mut self) -> Result<Arc<ColorTable>, LoadError> {
        if let Some(colors) = &self.colors {
            return Ok(colors.clone());
        }

        let name = normalize_name(&self.color_config_name);
        // The configuration file sits at the catalog root rather than in the
        // part directories.
        let mut candidates = vec![format!("ldraw/{name}")];
        candidates.extend(candidate_paths(&name));

        let contents = pollster::block_on(self.fetcher.fetch(&name, &candidates))
            .map_err(|e| Arc::new(Error::Fetch(e)))?;
        let table = Arc::new(ColorTable::parse(&name, &contents).map_err(Arc::new)?);

        self.colors = Some(table.clone());
        Ok(table)
    }

    fn load_part(&mut self, name: &str) -> Result<Arc<LoadedPart>, LoadError> {
        let colors = self.ensure_colors()?;

        if let Some(part) = self.parts.get(name) {
            return Ok(part.clone());
        }

        let part = pollster::block_on(assemble(&self.loader, name))?;
        let geometry = flatten(&part, &colors, &self.flatten_settings);
        let loaded = Arc::new(LoadedPart {
            name: name.to_string(),
            geometry,
        });
        self.parts.insert(name.to_string(), loaded.clone());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use brick_render::ldraw::error::FetchError;
    use futures::future::{self, BoxFuture, FutureExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TestFetcher {
        files: Mutex<HashMap<String, String>>,
        fetch_count: AtomicUsize,
    }

    impl TestFetcher {
        fn new(files: &[(&str, &str)]) -> Arc<Self> {
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

        fn insert(&self, name: &str, contents: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(name.to_string(), contents.to_string());
        }
    }

    impl FetchContents for TestFetcher {
        fn fetch(
            &self,
            name: &str,
            candidates: &[String],
        ) -> BoxFuture<'static, Result<String, FetchError>> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            let result = self
                .files
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| FetchError::new_raw(name, candidates.to_vec()));
            future::ready(result).boxed()
        }
    }

    const LDCFG: &str = "0 !COLOUR Red CODE 4 VALUE #C91A09 EDGE #333333";

    #[test]
    fn test_load_part_end_to_end() {
        let fetcher = TestFetcher::new(&[
            ("ldcfg.ldr", LDCFG),
            ("brick.dat", "1 4 0 0 0 1 0 0 0 1 0 0 0 1 tri.dat"),
            ("tri.dat", "3 16 0 0 0 1 0 0 0 1 0"),
        ]);
        let loader = Loader::spawn(fetcher, None, "LDCfg.ldr");

        let part = pollster::block_on(loader.load_part("brick.dat")).unwrap();
        assert_eq!("brick.dat", part.name);
        assert_eq!(12, part.geometry.main.opaque_triangles.len());
        assert_eq!(4.0, part.geometry.main.opaque_triangles[3]);
    }

    #[test]
    fn test_colors_load_once() {
        let fetcher = TestFetcher::new(&[("ldcfg.ldr", LDCFG)]);
        let loader = Loader::spawn(fetcher.clone(), None, "LDCfg.ldr");

        let first = pollster::block_on(loader.load_colors()).unwrap();
        let second = pollster::block_on(loader.load_colors()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, fetcher.fetch_count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_repeated_part_requests_are_memoized() {
        let fetcher = TestFetcher::new(&[
            ("ldcfg.ldr", LDCFG),
            ("tri.dat", "3 16 0 0 0 1 0 0 0 1 0"),
        ]);
        let loader = Loader::spawn(fetcher, None, "LDCfg.ldr");

        let first = pollster::block_on(loader.load_part("tri.dat")).unwrap();
        let second = pollster::block_on(loader.load_part("tri.dat")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failed_part_loads_are_not_memoized() {
        let fetcher = TestFetcher::new(&[("ldcfg.ldr", LDCFG)]);
        let loader = Loader::spawn(fetcher.clone(), None, "LDCfg.ldr");

        let missing = pollster::block_on(loader.load_part("late.dat"));
        assert!(matches!(missing, Err(LoadError::Load(_))));

        fetcher.insert("late.dat", "3 16 0 0 0 1 0 0 0 1 0");
        let found = pollster::block_on(loader.load_part("late.dat"));
        assert!(found.is_ok());
    }

    #[test]
    fn test_missing_color_config_fails_loads() {
        let fetcher = TestFetcher::new(&[("tri.dat", "3 16 0 0 0 1 0 0 0 1 0")]);
        let loader = Loader::spawn(fetcher, None, "LDCfg.ldr");

        let result = pollster::block_on(loader.load_part("tri.dat"));
        assert!(matches!(result, Err(LoadError::Load(_))));
    }
}
