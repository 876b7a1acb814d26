//! Geometry definition files.
//!
//! A geometry file is a small INI document:
//!
//! ```ini
//! [geometry]
//! count=4
//! id=2
//! [fiducial0]
//! x=0.000000
//! y=0.000000
//! z=0.000000
//! ; ... one [fiducialN] section per fiducial
//! ```

use crate::types::MAX_FIDUCIALS;
use crate::{Result, TrackerError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the directory searched after the given path.
pub const GEOMETRY_DIR_ENV: &str = "ATRACSYS_GEOMETRY_DIR";

/// Minimum fiducials needed to register a pose.
pub const MIN_FIDUCIALS: usize = 3;

/// A marker pattern: its numeric ID and fiducial positions in millimeters.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub id: u32,
    pub fiducials: Vec<[f32; 3]>,
}

/// Where a geometry file was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometrySource {
    /// The path as given (absolute or relative to the working directory).
    Given(PathBuf),
    /// Found in one of the installation directories.
    InstallDir(PathBuf),
}

impl GeometrySource {
    pub fn path(&self) -> &Path {
        match self {
            GeometrySource::Given(p) | GeometrySource::InstallDir(p) => p,
        }
    }
}

/// Resolves and parses geometry files.
#[derive(Debug, Clone, Default)]
pub struct GeometryLoader {
    search_dirs: Vec<PathBuf>,
}

impl GeometryLoader {
    /// Loader searching only `ATRACSYS_GEOMETRY_DIR` (when set) after the given path.
    pub fn from_env() -> GeometryLoader {
        let mut loader = GeometryLoader::default();
        if let Some(dir) = std::env::var_os(GEOMETRY_DIR_ENV) {
            loader.search_dirs.push(PathBuf::from(dir));
        }
        loader
    }

    /// Append an installation directory to the search list.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> GeometryLoader {
        self.search_dirs.push(dir.into());
        self
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Find the file: the path as given first, then each search directory.
    pub fn resolve(&self, path: &Path) -> Option<GeometrySource> {
        if path.is_file() {
            return Some(GeometrySource::Given(path.to_path_buf()));
        }
        if path.is_absolute() {
            return None;
        }

        let file_name = path.file_name().map(Path::new);
        for dir in &self.search_dirs {
            let candidate = dir.join(path);
            if candidate.is_file() {
                return Some(GeometrySource::InstallDir(candidate));
            }
            if let Some(name) = file_name {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(GeometrySource::InstallDir(candidate));
                }
            }
        }
        None
    }

    /// Resolve, read and parse a geometry file.
    pub fn load(&self, path: &Path) -> Result<(Geometry, GeometrySource)> {
        let source = self.resolve(path).ok_or_else(|| TrackerError::Geometry {
            path: path.to_path_buf(),
            reason: "file not found".into(),
        })?;

        let text = std::fs::read_to_string(source.path()).map_err(|e| TrackerError::Geometry {
            path: source.path().to_path_buf(),
            reason: e.to_string(),
        })?;

        let geometry = parse_geometry(&text).map_err(|reason| TrackerError::Geometry {
            path: source.path().to_path_buf(),
            reason,
        })?;

        log::debug!(
            "Loaded geometry {} ({} fiducials) from {}",
            geometry.id,
            geometry.fiducials.len(),
            source.path().display()
        );

        Ok((geometry, source))
    }
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

fn parse_ini(text: &str) -> std::result::Result<Sections, String> {
    let mut sections = Sections::new();
    let mut current: Option<String> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .ok_or_else(|| format!("line {}: unterminated section header", lineno + 1))?;
            let name = name.trim().to_ascii_lowercase();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected key=value", lineno + 1))?;
        let section = current
            .as_ref()
            .ok_or_else(|| format!("line {}: key outside of a section", lineno + 1))?;
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(sections)
}

fn field<T: std::str::FromStr>(sections: &Sections, section: &str, key: &str) -> std::result::Result<T, String> {
    let value = sections
        .get(section)
        .ok_or_else(|| format!("missing [{}] section", section))?
        .get(key)
        .ok_or_else(|| format!("missing '{}' in [{}]", key, section))?;
    value
        .parse()
        .map_err(|_| format!("invalid '{}' in [{}]: '{}'", key, section, value))
}

/// Parse the text of a geometry file.
pub fn parse_geometry(text: &str) -> std::result::Result<Geometry, String> {
    let sections = parse_ini(text)?;

    let count: usize = field(&sections, "geometry", "count")?;
    let id: u32 = field(&sections, "geometry", "id")?;

    if !(MIN_FIDUCIALS..=MAX_FIDUCIALS).contains(&count) {
        return Err(format!(
            "fiducial count {} outside {}..={}",
            count, MIN_FIDUCIALS, MAX_FIDUCIALS
        ));
    }

    let fiducials = (0..count)
        .map(|i| -> std::result::Result<[f32; 3], String> {
            let section = format!("fiducial{}", i);
            Ok([
                field(&sections, &section, "x")?,
                field(&sections, &section, "y")?,
                field(&sections, &section, "z")?,
            ])
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Geometry { id, fiducials })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GEOMETRY_002: &str = "\
; pointer
[geometry]
count=4
id=2

[fiducial0]
x=0.000000
y=0.000000
z=0.000000
[fiducial1]
x=78.736931
y=0.000000
z=0.000000
[fiducial2]
x=28.127506
y=-56.169399
z=0.000000
[fiducial3]
x=122.696411
y=-38.521461
z=0.000000
";

    #[test]
    fn test_parse_geometry() {
        let geometry = parse_geometry(GEOMETRY_002).unwrap();
        assert_eq!(geometry.id, 2);
        assert_eq!(geometry.fiducials.len(), 4);
        assert!((geometry.fiducials[1][0] - 78.736931).abs() < 1e-4);
        assert!((geometry.fiducials[2][1] + 56.169399).abs() < 1e-4);
    }

    #[test]
    fn test_parse_rejects_missing_fiducial() {
        let text = GEOMETRY_002.replace("[fiducial3]", "[other]");
        let err = parse_geometry(&text).unwrap_err();
        assert!(err.contains("fiducial3"), "{}", err);
    }

    #[test]
    fn test_parse_rejects_bad_count() {
        let text = GEOMETRY_002.replace("count=4", "count=2");
        assert!(parse_geometry(&text).is_err());
        let text = GEOMETRY_002.replace("count=4", "count=many");
        assert!(parse_geometry(&text).unwrap_err().contains("count"));
    }

    #[test]
    fn test_parse_rejects_key_outside_section() {
        assert!(parse_geometry("id=3\n[geometry]\ncount=3\n").is_err());
    }

    #[test]
    fn test_load_searches_install_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("geometry002.ini")).unwrap();
        file.write_all(GEOMETRY_002.as_bytes()).unwrap();

        let loader = GeometryLoader::default().with_dir(dir.path());
        let (geometry, source) = loader
            .load(Path::new("no/such/place/geometry002.ini"))
            .unwrap();
        assert_eq!(geometry.id, 2);
        assert_eq!(
            source,
            GeometrySource::InstallDir(dir.path().join("geometry002.ini"))
        );
    }

    #[test]
    fn test_load_prefers_given_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ini");
        std::fs::write(&path, GEOMETRY_002).unwrap();

        let (_, source) = GeometryLoader::default().load(&path).unwrap();
        assert_eq!(source, GeometrySource::Given(path));
    }

    #[test]
    fn test_load_missing_file() {
        let err = GeometryLoader::default()
            .load(Path::new("missing-geometry.ini"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Geometry { .. }));
    }
}
