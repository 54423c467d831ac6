//! Recursive part assembly.
//!
//! A part is a file plus every sub-part it references, resolved. Sub-parts
//! are interned by normalized name, so the assembled tree is a DAG: a
//! primitive referenced a thousand times is loaded, parsed and linked once.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future;
use log::debug;

use crate::ldraw::error::{CycleError, Error, MissingSubPartError};
use crate::ldraw::{normalize_name, LdrawFile};
use crate::loader::FileLoader;

/// A file and its resolved sub-parts. Read-only once assembled.
#[derive(Debug)]
pub struct Part {
    pub file: Arc<LdrawFile>,
    /// Every name in `file.sub_file_names` is a key in this map.
    pub sub_parts: HashMap<String, Arc<Part>>,
}

/// Load `root` and everything it references and link the result into a
/// [`Part`] tree.
///
/// Loads for distinct names run concurrently, one worklist level at a time.
/// The returned future only resolves once the tree is fully populated.
#[tracing::instrument(skip(loader))]
pub async fn assemble(loader: &FileLoader, root: &str) -> Result<Arc<Part>, Arc<Error>> {
    let root = normalize_name(root);

    // Load the file closure breadth-first.
    let mut files: HashMap<String, Arc<LdrawFile>> = HashMap::new();
    let mut queue = vec![root.clone()];
    while !queue.is_empty() {
        let mut batch: Vec<String> = Vec::new();
        for name in queue.drain(..) {
            if !files.contains_key(&name) && !batch.contains(&name) {
                batch.push(name);
            }
        }

        let loaded = future::join_all(batch.iter().map(|name| loader.load(name))).await;
        for (name, result) in batch.into_iter().zip(loaded) {
            let file = match result {
                Ok(file) => file,
                // The root's own failure surfaces as-is; a sub-file failure
                // names the reference that could not be satisfied.
                Err(e) if name == root => return Err(e),
                Err(e) => return Err(Arc::new(MissingSubPartError::new(&name, e).into())),
            };
            queue.extend(file.sub_file_names.iter().cloned());
            files.insert(name, file);
        }
    }

    debug!("Assembled {} files for {root}", files.len());
    link(&root, &files)
}

// Link parts bottom-up. A part can be built once all of its sub-parts are
// built, so a pass that builds nothing means the remaining references form a
// cycle.
fn link(root: &str, files: &HashMap<String, Arc<LdrawFile>>) -> Result<Arc<Part>, Arc<Error>> {
    let mut built: HashMap<String, Arc<Part>> = HashMap::new();

    while !built.contains_key(root) {
        let mut progressed = false;
        for (name, file) in files {
            if built.contains_key(name) {
                continue;
            }
            if !file.sub_file_names.iter().all(|n| built.contains_key(n)) {
                continue;
            }
            let sub_parts = file
                .sub_file_names
                .iter()
                .map(|n| (n.clone(), built[n].clone()))
                .collect();
            built.insert(
                name.clone(),
                Arc::new(Part {
                    file: file.clone(),
                    sub_parts,
                }),
            );
            progressed = true;
        }

        if !progressed {
            let stuck = files
                .keys()
                .filter(|name| !built.contains_key(*name))
                .min()
                .expect("an unbuilt file must remain when linking stalls");
            return Err(Arc::new(
                CycleError {
                    filename: stuck.clone(),
                }
                .into(),
            ));
        }
    }

    Ok(built[root].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ldraw::DrawCommand;
    use crate::loader::tests::MapFetcher;
    use indoc::indoc;

    fn assemble_with(files: &[(&str, &str)], root: &str) -> Result<Arc<Part>, Arc<Error>> {
        let loader = FileLoader::new(MapFetcher::new(files), None);
        pollster::block_on(assemble(&loader, root))
    }

    #[test]
    fn test_assemble_interns_shared_sub_parts() {
        let root = indoc! {"
            1 16 0 0 0 1 0 0 0 1 0 0 0 1 left.dat
            1 16 10 0 0 1 0 0 0 1 0 0 0 1 right.dat
        "};
        let leaf = "3 16 0 0 0 1 0 0 0 1 0";
        let wing = "1 16 0 0 0 1 0 0 0 1 0 0 0 1 leaf.dat";

        let part = assemble_with(
            &[
                ("root.ldr", root),
                ("left.dat", wing),
                ("right.dat", wing),
                ("leaf.dat", leaf),
            ],
            "root.ldr",
        )
        .unwrap();

        assert_eq!(2, part.sub_parts.len());
        let left = &part.sub_parts["left.dat"];
        let right = &part.sub_parts["right.dat"];
        // The shared leaf is linked once and referenced from both wings.
        assert!(Arc::ptr_eq(
            &left.sub_parts["leaf.dat"],
            &right.sub_parts["leaf.dat"]
        ));
    }

    #[test]
    fn test_assemble_repeated_loads_share_parts() {
        let files = [
            ("root.ldr", "1 16 0 0 0 1 0 0 0 1 0 0 0 1 leaf.dat"),
            ("leaf.dat", "3 16 0 0 0 1 0 0 0 1 0"),
        ];
        let loader = FileLoader::new(MapFetcher::new(&files), None);

        let first = pollster::block_on(assemble(&loader, "root.ldr")).unwrap();
        let second = pollster::block_on(assemble(&loader, "root.ldr")).unwrap();
        // Files are loaded once; both assemblies see the same parsed file.
        assert!(Arc::ptr_eq(&first.file, &second.file));
    }

    #[test]
    fn test_assemble_missing_sub_part() {
        let result = assemble_with(
            &[("root.ldr", "1 16 0 0 0 1 0 0 0 1 0 0 0 1 gone.dat")],
            "root.ldr",
        );
        match result.unwrap_err().as_ref() {
            Error::MissingSubPart(e) => assert_eq!("gone.dat", e.filename),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_assemble_missing_root_surfaces_fetch_error() {
        let result = assemble_with(&[], "root.ldr");
        assert!(matches!(result.unwrap_err().as_ref(), Error::Fetch(_)));
    }

    #[test]
    fn test_assemble_detects_cycles() {
        let result = assemble_with(
            &[
                ("a.dat", "1 16 0 0 0 1 0 0 0 1 0 0 0 1 b.dat"),
                ("b.dat", "1 16 0 0 0 1 0 0 0 1 0 0 0 1 a.dat"),
            ],
            "a.dat",
        );
        assert!(matches!(result.unwrap_err().as_ref(), Error::Cycle(_)));
    }

    #[test]
    fn test_assembled_tree_is_fully_populated() {
        let part = assemble_with(
            &[
                ("root.ldr", "1 4 0 0 0 1 0 0 0 1 0 0 0 1 brick.dat"),
                ("brick.dat", "4 16 0 0 0 1 0 0 1 1 0 0 1 0"),
            ],
            "root.ldr",
        )
        .unwrap();

        for name in &part.file.sub_file_names {
            assert!(part.sub_parts.contains_key(name));
        }
        let brick = &part.sub_parts["brick.dat"];
        assert!(matches!(
            brick.file.commands[0],
            DrawCommand::Triangle(_)
        ));
    }
}
