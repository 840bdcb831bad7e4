//! Test package loader.
//!
//! A package is a directory with suite files at its top level and optional
//! fragment directories:
//!
//! ```text
//! echo/
//! ├── echo-suite.yaml
//! ├── inputs/hello.yaml          # `ref: hello` from an input
//! ├── expectations/hello.yaml    # `ref: hello` from an expectation
//! └── seed/users.yaml            # dispatched at the start of every case using its service
//! ```
//!
//! [`PackageLoader::load_root`] walks a directory tree and loads every
//! package it finds. Any parse error aborts the whole load.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use systest_core::error::{Location, ParseError, ParseErrorKind};
use systest_core::model::TestSuite;

use crate::suite::{self, FragmentUsage, Fragments, Located, MAX_DOCUMENT_SIZE, SuiteParser};

const INPUTS_DIR: &str = "inputs";
const EXPECTATIONS_DIR: &str = "expectations";
const SEED_DIR: &str = "seed";

/// Upper bound on directories visited by one walk.
const MAX_DIRECTORIES: usize = 10_000;

/// Suites loaded from one package directory.
#[derive(Debug, Clone)]
pub struct TestPackage {
    pub dir: PathBuf,
    pub suites: Vec<TestSuite>,
    /// Fragment files no suite in the package used, as `<dir>/<id>`.
    pub unused: Vec<String>,
}

/// Loads test packages from disk.
#[derive(Debug, Clone, Default)]
pub struct PackageLoader {
    parser: SuiteParser,
    filter: Option<String>,
}

impl PackageLoader {
    pub fn new(parser: SuiteParser) -> Self {
        Self {
            parser,
            filter: None,
        }
    }

    /// Only loads suite files whose path contains `filter`. Empty disables filtering.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    /// Walks `root` and loads every package below it, in path order.
    ///
    /// # Errors
    /// - `root` cannot be read
    /// - any suite or fragment fails to parse
    /// - two suites share a name
    pub async fn load_root(&self, root: impl AsRef<Path>) -> Result<Vec<TestPackage>, ParseError> {
        let root = root.as_ref();
        let mut pending = vec![root.to_path_buf()];
        let mut visited = 0_usize;
        let mut packages = Vec::new();

        while let Some(dir) = pending.pop() {
            visited += 1;
            if visited > MAX_DIRECTORIES {
                return Err(read_error(
                    root,
                    format!("more than {MAX_DIRECTORIES} directories below root"),
                ));
            }

            let listing = list_dir(&dir).await?;
            for sub in listing.dirs.iter().rev() {
                if !is_fragment_dir(sub) {
                    pending.push(sub.clone());
                }
            }
            if let Some(package) = self.load_listing(&dir, &listing).await? {
                packages.push(package);
            }
        }

        packages.sort_by(|a, b| a.dir.cmp(&b.dir));

        let mut names = BTreeMap::new();
        for package in &packages {
            for suite in &package.suites {
                if let Some(previous) = names.insert(suite.name.clone(), suite.location.source.clone())
                {
                    return Err(ParseError::new(
                        suite.location.at("name"),
                        ParseErrorKind::Duplicate {
                            what: "suite".to_owned(),
                            name: format!("{} (also in {previous})", suite.name),
                        },
                    ));
                }
            }
        }

        tracing::info!(
            root = %root.display(),
            packages = packages.len(),
            suites = packages.iter().map(|p| p.suites.len()).sum::<usize>(),
            "loaded test packages"
        );
        Ok(packages)
    }

    /// Loads a single package directory. Returns `None` when it holds no (matching) suites.
    pub async fn load_package(&self, dir: impl AsRef<Path>) -> Result<Option<TestPackage>, ParseError> {
        let dir = dir.as_ref();
        let listing = list_dir(dir).await?;
        self.load_listing(dir, &listing).await
    }

    async fn load_listing(
        &self,
        dir: &Path,
        listing: &Listing,
    ) -> Result<Option<TestPackage>, ParseError> {
        let suite_files: Vec<&PathBuf> = listing
            .files
            .iter()
            .filter(|p| is_yaml(p))
            .filter(|p| match &self.filter {
                Some(filter) => p.to_string_lossy().contains(filter.as_str()),
                None => true,
            })
            .collect();
        if suite_files.is_empty() {
            return Ok(None);
        }

        let fragments = load_fragments(dir).await?;
        let mut usage = FragmentUsage::default();
        let mut suites = Vec::with_capacity(suite_files.len());
        for path in suite_files {
            let source = path.display().to_string();
            let yaml = read_document(path).await?;
            let (suite, used) = self.parser.parse_with(&source, &yaml, &fragments)?;
            tracing::debug!(
                suite = %suite.name,
                path = %source,
                cases = suite.cases.len(),
                "parsed suite"
            );
            usage.merge(used);
            suites.push(suite);
        }

        let unused = unused_fragments(&fragments, &usage);
        for id in &unused {
            tracing::warn!(
                package = %dir.display(),
                fragment = %id,
                "fragment is not used by any suite in the package"
            );
        }

        Ok(Some(TestPackage {
            dir: dir.to_path_buf(),
            suites,
            unused,
        }))
    }
}

fn unused_fragments(fragments: &Fragments, usage: &FragmentUsage) -> Vec<String> {
    let mut unused = unused_in(INPUTS_DIR, fragments.inputs.keys(), &usage.inputs);
    unused.extend(unused_in(
        EXPECTATIONS_DIR,
        fragments.expectations.keys(),
        &usage.expectations,
    ));
    unused.extend(unused_in(SEED_DIR, fragments.seed.keys(), &usage.seed));
    unused
}

fn unused_in<'a>(
    dir: &str,
    ids: impl Iterator<Item = &'a String>,
    used: &BTreeSet<String>,
) -> Vec<String> {
    ids.filter(|id| !used.contains(*id))
        .map(|id| format!("{dir}/{id}"))
        .collect()
}

async fn load_fragments(dir: &Path) -> Result<Fragments, ParseError> {
    Ok(Fragments {
        inputs: load_fragment_dir(&dir.join(INPUTS_DIR)).await?,
        expectations: load_fragment_dir(&dir.join(EXPECTATIONS_DIR)).await?,
        seed: load_fragment_dir(&dir.join(SEED_DIR)).await?,
    })
}

/// Reads every YAML file in `dir`, keyed by file stem. A missing directory is empty.
async fn load_fragment_dir<T: serde::de::DeserializeOwned>(
    dir: &Path,
) -> Result<BTreeMap<String, Located<T>>, ParseError> {
    let mut out = BTreeMap::new();
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(out);
    }
    let listing = list_dir(dir).await?;
    for path in listing.files.iter().filter(|p| is_yaml(p)) {
        let Some(id) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let source = path.display().to_string();
        if out.contains_key(&id) {
            return Err(ParseError::new(
                Location::new(&source),
                ParseErrorKind::Duplicate {
                    what: "fragment".to_owned(),
                    name: id,
                },
            ));
        }
        let yaml = read_document(path).await?;
        let document: T = suite::deserialize(&Location::new(&source), &yaml)?;
        out.insert(id, Located { source, document });
    }
    Ok(out)
}

async fn read_document(path: &Path) -> Result<String, ParseError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| read_error(path, format!("failed to read file metadata: {e}")))?;
    if metadata.len() > MAX_DOCUMENT_SIZE {
        return Err(ParseError::new(
            Location::new(path.display().to_string()),
            ParseErrorKind::TooLarge {
                size: metadata.len(),
                max: MAX_DOCUMENT_SIZE,
            },
        ));
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| read_error(path, format!("failed to read file: {e}")))
}

struct Listing {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// Lists a directory, sorted, skipping hidden entries.
async fn list_dir(dir: &Path) -> Result<Listing, ParseError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| read_error(dir, format!("failed to read directory: {e}")))?;

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| read_error(dir, format!("failed to read directory entry: {e}")))?
    {
        let path = entry.path();
        let hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if hidden {
            continue;
        }
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| read_error(&path, format!("failed to read file type: {e}")))?;
        if file_type.is_dir() {
            dirs.push(path);
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    files.sort();
    dirs.sort();
    Ok(Listing { files, dirs })
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yml" || ext == "yaml")
}

fn is_fragment_dir(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n == INPUTS_DIR || n == EXPECTATIONS_DIR || n == SEED_DIR)
}

fn read_error(path: &Path, reason: String) -> ParseError {
    ParseError::new(
        Location::new(path.display().to_string()),
        ParseErrorKind::Read(reason),
    )
}
