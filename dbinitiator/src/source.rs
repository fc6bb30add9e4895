//!
//! # Migration sources
//!
//! A [MigrationSource] is an ordered set of versioned script pairs addressed by a URL.
//!
//! Two schemes are supported:
//! - `file://<dir>`: a directory of `<version>_<title>.up.<ext>` and
//!   `<version>_<title>.down.<ext>` files. Relative paths resolve against the working directory.
//! - `embedded://<name>`: scripts compiled into the test binary, built with
//!   [MigrationSource::embedded].
//!
//! ```
//! use dbinitiator::{MigrationSource, Script};
//!
//! let source = MigrationSource::embedded(
//!     "users",
//!     vec![
//!         Script::new(1, "create_users")
//!             .with_up("CREATE TABLE users (id BIGINT PRIMARY KEY)")
//!             .with_down("DROP TABLE users"),
//!         Script::new(2, "add_email").with_up("ALTER TABLE users ADD COLUMN email TEXT"),
//!     ],
//! )
//! .unwrap();
//! assert_eq!(source.url(), "embedded://users");
//! assert_eq!(source.first(), Some(1));
//! assert_eq!(source.next(1), Some(2));
//! assert_eq!(source.prev(1), None);
//! ```

use crate::error::Error;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const FILE_SCHEME: &str = "file";
const EMBEDDED_SCHEME: &str = "embedded";

/// One version of a migration source: an optional up script and an optional down script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    version: u64,
    name: String,
    up: Option<String>,
    down: Option<String>,
}

impl Script {
    pub fn new(version: u64, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            up: None,
            down: None,
        }
    }

    pub fn with_up(mut self, sql: impl Into<String>) -> Self {
        self.up = Some(sql.into());
        self
    }

    pub fn with_down(mut self, sql: impl Into<String>) -> Self {
        self.down = Some(sql.into());
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn up(&self) -> Option<&str> {
        self.up.as_deref()
    }

    pub fn down(&self) -> Option<&str> {
        self.down.as_deref()
    }
}

/// An addressable, ordered set of versioned scripts.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    url: String,
    scripts: BTreeMap<u64, Script>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    Up,
    Down,
}

impl MigrationSource {
    /// Open a source from its URL. Only `file://` URLs can be opened this way.
    pub fn open(url: &str) -> Result<Self, Error> {
        let (scheme, location) = url.split_once("://").ok_or_else(|| Error::Source {
            url: url.to_string(),
            reason: "missing scheme, expected <scheme>://<location>".to_string(),
        })?;

        match scheme {
            FILE_SCHEME => Self::open_dir(url, PathBuf::from(location)),
            EMBEDDED_SCHEME => Err(Error::Source {
                url: url.to_string(),
                reason: "embedded sources are built with MigrationSource::embedded".to_string(),
            }),
            other => Err(Error::Source {
                url: url.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }

    /// Build an in-memory source. Versions must be unique and greater than zero.
    pub fn embedded(
        name: &str,
        scripts: impl IntoIterator<Item = Script>,
    ) -> Result<Self, Error> {
        let url = format!("{EMBEDDED_SCHEME}://{name}");
        let mut by_version = BTreeMap::new();
        for script in scripts {
            if script.version == 0 {
                return Err(Error::Source {
                    url,
                    reason: "migration version must be greater than 0".to_string(),
                });
            }
            if by_version.contains_key(&script.version) {
                return Err(Error::Source {
                    url,
                    reason: format!("duplicate migration version {}", script.version),
                });
            }
            by_version.insert(script.version, script);
        }

        Ok(Self {
            url,
            scripts: by_version,
        })
    }

    fn open_dir(url: &str, dir: PathBuf) -> Result<Self, Error> {
        let entries = fs::read_dir(&dir).map_err(|e| Error::Source {
            url: url.to_string(),
            reason: format!("reading {}: {e}", dir.display()),
        })?;

        let mut scripts: BTreeMap<u64, Script> = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Source {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            if !entry.path().is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some((version, name, direction)) =
                file_name.to_str().and_then(parse_file_name)
            else {
                continue;
            };

            let body = fs::read_to_string(entry.path()).map_err(|e| Error::Source {
                url: url.to_string(),
                reason: format!("reading {}: {e}", entry.path().display()),
            })?;

            let script = scripts
                .entry(version)
                .or_insert_with(|| Script::new(version, name));
            let slot = match direction {
                Direction::Up => &mut script.up,
                Direction::Down => &mut script.down,
            };
            if slot.is_some() {
                return Err(Error::Source {
                    url: url.to_string(),
                    reason: format!(
                        "duplicate {} migration for version {version}",
                        if direction == Direction::Up { "up" } else { "down" }
                    ),
                });
            }
            *slot = Some(body);
        }

        Ok(Self {
            url: url.to_string(),
            scripts,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// All versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.scripts.keys().copied()
    }

    pub fn contains(&self, version: u64) -> bool {
        self.scripts.contains_key(&version)
    }

    pub fn first(&self) -> Option<u64> {
        self.scripts.keys().next().copied()
    }

    /// The smallest version strictly greater than `version`.
    pub fn next(&self, version: u64) -> Option<u64> {
        self.scripts
            .range(version.saturating_add(1)..)
            .next()
            .map(|(v, _)| *v)
    }

    /// The largest version strictly less than `version`.
    pub fn prev(&self, version: u64) -> Option<u64> {
        self.scripts.range(..version).next_back().map(|(v, _)| *v)
    }

    pub fn script(&self, version: u64) -> Option<&Script> {
        self.scripts.get(&version)
    }

    pub fn up_script(&self, version: u64) -> Option<&str> {
        self.script(version).and_then(Script::up)
    }

    pub fn down_script(&self, version: u64) -> Option<&str> {
        self.script(version).and_then(Script::down)
    }
}

/// Parse `<version>_<title>.<up|down>.<ext>`.
fn parse_file_name(file_name: &str) -> Option<(u64, String, Direction)> {
    let (version, rest) = file_name.split_once('_')?;
    let version: u64 = version.parse().ok()?;
    if version == 0 {
        return None;
    }

    let (stem, _ext) = rest.rsplit_once('.')?;
    let (title, direction) = stem.rsplit_once('.')?;
    let direction = match direction {
        "up" => Direction::Up,
        "down" => Direction::Down,
        _ => return None,
    };

    Some((version, title.to_string(), direction))
}
