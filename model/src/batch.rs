// Per-file bookkeeping shared by every phase. One bad file never stops the batch.

use std::path::{Path, PathBuf};

use anyhow::Result;
use rayon::prelude::*;
use regex::Regex;

use crate::Config;

/// What happened to one file (or one vehicle)
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(String),
}

impl<T> Outcome<T> {
    pub fn skip<S: Into<String>>(reason: S) -> Self {
        Outcome::Skipped(reason.into())
    }

    /// An error becomes a skip, keeping the whole error chain as the reason.
    pub fn from_result(result: Result<Outcome<T>>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Skipped(format!("{err:#}")),
        }
    }

    pub fn done(&self) -> Option<&T> {
        match self {
            Outcome::Done(x) => Some(x),
            Outcome::Skipped(_) => None,
        }
    }
}

pub struct BatchReport<T> {
    /// Sorted by path
    pub files: Vec<(PathBuf, Outcome<T>)>,
}

impl<T> BatchReport<T> {
    pub fn done(&self) -> impl Iterator<Item = (&Path, &T)> {
        self.files
            .iter()
            .filter_map(|(path, outcome)| outcome.done().map(|x| (path.as_path(), x)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files.iter().filter_map(|(path, outcome)| match outcome {
            Outcome::Skipped(reason) => Some((path.as_path(), reason.as_str())),
            Outcome::Done(_) => None,
        })
    }

    pub fn log_summary(&self, phase: &str) {
        for (path, reason) in self.skipped() {
            warn!("{phase}: skipped {}: {reason}", path.display());
        }
        info!(
            "{phase}: {} files done, {} skipped",
            self.done().count(),
            self.skipped().count()
        );
    }
}

/// A glob over file names in one directory. Only `*` and `?` are special.
#[derive(Clone, Debug)]
pub struct FilePattern {
    glob: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(glob: &str) -> Result<Self> {
        if glob.is_empty() || glob.contains('/') {
            bail!("File pattern {glob:?} must be a non-empty file name");
        }
        let mut pattern = String::from("^");
        let mut literal = String::new();
        for c in glob.chars() {
            if c == '*' || c == '?' {
                pattern.push_str(&regex::escape(&literal));
                literal.clear();
                pattern.push_str(if c == '*' { ".*" } else { "." });
            } else {
                literal.push(c);
            }
        }
        pattern.push_str(&regex::escape(&literal));
        pattern.push('$');
        Ok(Self {
            glob: glob.to_string(),
            regex: Regex::new(&pattern)?,
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    /// Matching regular files directly inside `dir`, sorted.
    pub fn find_in(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut results = Vec::new();
        for entry in fs_err::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|x| x.to_str()) {
                if self.matches(name) {
                    results.push(path);
                }
            }
        }
        results.sort();
        debug!(
            "{} files in {} match {}",
            results.len(),
            dir.display(),
            self.glob
        );
        Ok(results)
    }
}

/// Runs `process` over every file on a worker pool. Errors and skips are recorded per file.
pub fn process_files<T, F>(
    config: &Config,
    files: Vec<PathBuf>,
    process: F,
) -> Result<BatchReport<T>>
where
    T: Send,
    F: Fn(&Path) -> Result<Outcome<T>> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.unwrap_or(0))
        .build()?;
    let mut results: Vec<(PathBuf, Outcome<T>)> = pool.install(|| {
        files
            .into_par_iter()
            .map(|path| {
                let outcome = Outcome::from_result(process(&path));
                (path, outcome)
            })
            .collect()
    });
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(BatchReport { files: results })
}

/// Writes next to the target, then renames, so a crash never leaves a half-written file behind.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} isn't a file path", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs_err::write(&tmp, contents)?;
    if let Err(err) = fs_err::rename(&tmp, path) {
        let _ = fs_err::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        let pattern = FilePattern::new("anonymized_raw_2025-04-*.csv").unwrap();
        assert!(pattern.matches("anonymized_raw_2025-04-01.csv"));
        assert!(pattern.matches("anonymized_raw_2025-04-.csv"));
        assert!(!pattern.matches("anonymized_raw_2025-05-01.csv"));
        assert!(!pattern.matches("anonymized_raw_2025-04-01.csv.tmp"));
        // Dots are literal
        assert!(!pattern.matches("anonymized_raw_2025-04-01xcsv"));

        let pattern = FilePattern::new("day?.csv").unwrap();
        assert!(pattern.matches("day1.csv"));
        assert!(!pattern.matches("day10.csv"));

        assert!(FilePattern::new("").is_err());
        assert!(FilePattern::new("a/*.csv").is_err());
    }

    #[test]
    fn errors_become_skips() {
        let ok: Outcome<usize> = Outcome::from_result(Ok(Outcome::Done(3)));
        assert_eq!(ok.done(), Some(&3));

        let err: Outcome<usize> =
            Outcome::from_result(Err(anyhow!("inner").context("reading foo.csv")));
        assert_eq!(err, Outcome::Skipped("reading foo.csv: inner".to_string()));
    }

    #[test]
    fn failures_are_isolated() {
        let files = vec![
            PathBuf::from("c.csv"),
            PathBuf::from("a.csv"),
            PathBuf::from("b.csv"),
        ];
        let config = Config {
            threads: Some(2),
            ..Config::default()
        };
        let report = process_files(&config, files, |path| {
            if path == Path::new("b.csv") {
                bail!("corrupt");
            }
            Ok(Outcome::Done(path.display().to_string()))
        })
        .unwrap();

        let names: Vec<&Path> = report.files.iter().map(|(p, _)| p.as_path()).collect();
        assert_eq!(
            names,
            vec![Path::new("a.csv"), Path::new("b.csv"), Path::new("c.csv")]
        );
        assert_eq!(report.done().count(), 2);
        let skipped: Vec<(&Path, &str)> = report.skipped().collect();
        assert_eq!(skipped, vec![(Path::new("b.csv"), "corrupt")]);
    }

    #[test]
    fn atomic_write_replaces() {
        let dir = std::env::temp_dir().join(format!("model-atomic-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.csv");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.join("out.csv.tmp").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
