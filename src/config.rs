//! Configuration types for fimwatch
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - The monitored-directory table and the path resolver operations built
//!   on it: longest-prefix directory lookup, recursion depth accounting and
//!   symlink-aware real paths

use crate::error::ConfigError;
use crate::types::Checks;
use clap::Parser;
use parking_lot::Mutex;
use regex::Regex;
use std::fs;
use std::path::PathBuf;

/// Maximum supported recursion level
pub const MAX_RECURSION_LEVEL: u32 = 320;

/// Minimum sensible entry limit when capacity is enabled
const MIN_ENTRY_LIMIT: usize = 100;

/// Default entry limit when capacity is enabled
const DEFAULT_ENTRY_LIMIT: usize = 100_000;

/// Default hash cap: files over this size keep the empty-input digests
const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// File integrity monitor with a SQLite entry database
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fimwatch",
    version,
    about = "File integrity monitor with a SQLite entry database",
    long_about = "Monitors directory trees for added, modified and deleted files.\n\n\
                  Keeps an authoritative database of entry attributes (size, ownership,\n\
                  permissions, timestamps, content hashes) and emits a JSON event for\n\
                  every change observed between scans.",
    after_help = "EXAMPLES:\n    \
        fimwatch /etc /usr/bin --db baseline.db\n    \
        fimwatch /etc --interval 300 -o events.jsonl\n    \
        fimwatch /srv/data --ignore /srv/data/tmp --file-limit 500000\n    \
        fimwatch / --skip-fs nfs --skip-fs proc --skip-fs sys -r 8"
)]
pub struct CliArgs {
    /// Directories to monitor
    #[arg(value_name = "DIR", required = true)]
    pub directories: Vec<String>,

    /// Entry database file (":memory:" for a throwaway database)
    #[arg(long, default_value = "fim.db", value_name = "FILE")]
    pub db: String,

    /// Event output file, JSON lines ("-" for stdout)
    #[arg(short, long, default_value = "-", value_name = "FILE")]
    pub output: String,

    /// Seconds between scheduled scans (0 = scan once and exit)
    #[arg(short, long, default_value = "0", value_name = "SECS")]
    pub interval: u64,

    /// Maximum directory depth below each monitored root
    #[arg(short = 'r', long, default_value = "256", value_name = "NUM")]
    pub recursion_level: u32,

    /// Ignore paths starting with this prefix (case-insensitive, repeatable)
    #[arg(long = "ignore", value_name = "PREFIX", action = clap::ArgAction::Append)]
    pub ignore_paths: Vec<String>,

    /// Ignore paths matching this regex (repeatable)
    #[arg(long = "ignore-regex", value_name = "REGEX", action = clap::ArgAction::Append)]
    pub ignore_regex: Vec<String>,

    /// Only report files matching this regex
    #[arg(long, value_name = "REGEX")]
    pub restrict: Option<String>,

    /// Tag string attached to every emitted event
    #[arg(long, value_name = "TAGS")]
    pub tags: Option<String>,

    /// Maximum number of database entries (0 = unlimited)
    #[arg(long, default_value = "0", value_name = "NUM")]
    pub file_limit: usize,

    /// Maximum events per second during scans (0 = unlimited)
    #[arg(long, default_value = "0", value_name = "NUM")]
    pub max_eps: u32,

    /// Milliseconds to wait before processing a watcher event
    #[arg(long, default_value = "10", value_name = "MS")]
    pub rt_delay: u64,

    /// Skip hashing for files larger than this many bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE, value_name = "BYTES")]
    pub max_file_size: u64,

    /// Command to pipe files through before hashing (e.g. "prelink -y")
    #[arg(long, value_name = "CMD")]
    pub prefilter_cmd: Option<String>,

    /// Skip entries on this filesystem type: nfs, dev, sys or proc (repeatable)
    #[arg(long = "skip-fs", value_name = "FS", action = clap::ArgAction::Append)]
    pub skip_fs: Vec<String>,

    /// Follow monitored roots that are symbolic links
    #[arg(long)]
    pub follow: bool,

    /// Skip content hashing entirely
    #[arg(long)]
    pub no_hashes: bool,

    /// Quiet mode - suppress the scan summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// One configured monitored directory
#[derive(Debug)]
pub struct MonitoredDir {
    /// Configured path, normalized without a trailing separator
    pub path: String,

    /// Attribute and behavior mask
    pub checks: Checks,

    /// Maximum depth below this root
    pub recursion_level: u32,

    /// Only report files matching this pattern
    pub restrict: Option<Regex>,

    /// Tag string attached to events from this directory
    pub tags: Option<String>,
}

impl MonitoredDir {
    pub fn new(path: impl Into<String>, checks: Checks) -> Self {
        Self {
            path: normalize_root(&path.into()),
            checks,
            recursion_level: 256,
            restrict: None,
            tags: None,
        }
    }

    pub fn with_recursion_level(mut self, level: u32) -> Self {
        self.recursion_level = level;
        self
    }

    pub fn with_restrict(mut self, restrict: Regex) -> Self {
        self.restrict = Some(restrict);
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Which watcher mode this directory is configured for
    pub fn mode(&self) -> crate::types::ScanMode {
        use crate::types::ScanMode;
        if self.checks.contains(Checks::WHODATA) {
            ScanMode::Whodata
        } else if self.checks.contains(Checks::REALTIME) {
            ScanMode::Realtime
        } else {
            ScanMode::Scheduled
        }
    }
}

/// Filesystem types the scanner refuses to descend into
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipFs {
    pub nfs: bool,
    pub dev: bool,
    pub sys: bool,
    pub proc: bool,
}

impl SkipFs {
    pub fn any(&self) -> bool {
        self.nfs || self.dev || self.sys || self.proc
    }
}

/// Validated runtime configuration
#[derive(Debug)]
pub struct MonitorConfig {
    /// Monitored directory table, index-stable for the lifetime of the run
    pub dirs: Vec<MonitoredDir>,

    /// Resolved symlink targets for roots with the FOLLOW bit; the lock
    /// also serializes resolution itself
    link_targets: Mutex<Vec<Option<String>>>,

    /// Literal path prefixes to ignore (case-insensitive)
    pub ignore_paths: Vec<String>,

    /// Compiled ignore patterns
    pub ignore_regex: Vec<Regex>,

    /// Filesystem types to skip
    pub skip_fs: SkipFs,

    /// Refuse inserts past this entry count
    pub file_limit: usize,

    /// Whether the entry limit is enforced at all
    pub file_limit_enabled: bool,

    /// Events-per-second ceiling for scans (0 = unlimited)
    pub max_eps: u32,

    /// Watcher settle delay in milliseconds
    pub rt_delay_ms: u64,

    /// Hash cap in bytes
    pub max_file_size: u64,

    /// Optional prefilter command for hashing
    pub prefilter_cmd: Option<String>,

    /// Entry database location
    pub db_path: String,

    /// Event output location ("-" for stdout)
    pub output_path: String,

    /// Seconds between scans (0 = single scan)
    pub interval: u64,

    /// Print the scan summary
    pub show_summary: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl MonitorConfig {
    /// Create a minimal configuration for the given directories.
    ///
    /// Capacity, throttling and filters are all off; fields are public and
    /// may be adjusted before the engine is constructed.
    pub fn new(dirs: Vec<MonitoredDir>) -> Self {
        let targets = vec![None; dirs.len()];
        Self {
            dirs,
            link_targets: Mutex::new(targets),
            ignore_paths: Vec::new(),
            ignore_regex: Vec::new(),
            skip_fs: SkipFs::default(),
            file_limit: DEFAULT_ENTRY_LIMIT,
            file_limit_enabled: false,
            max_eps: 0,
            rt_delay_ms: 0,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            prefilter_cmd: None,
            db_path: ":memory:".to_string(),
            output_path: "-".to_string(),
            interval: 0,
            show_summary: false,
            verbose: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.directories.is_empty() {
            return Err(ConfigError::NoDirectories);
        }

        if args.recursion_level > MAX_RECURSION_LEVEL {
            return Err(ConfigError::InvalidRecursionLevel {
                level: args.recursion_level,
                max: MAX_RECURSION_LEVEL,
            });
        }

        if args.file_limit > 0 && args.file_limit < MIN_ENTRY_LIMIT {
            return Err(ConfigError::InvalidEntryLimit {
                limit: args.file_limit,
                min: MIN_ENTRY_LIMIT,
            });
        }

        let restrict = args
            .restrict
            .as_deref()
            .map(|p| compile_pattern(p))
            .transpose()?;

        let mut checks = Checks::DEFAULT;
        if args.no_hashes {
            checks = checks
                .without(Checks::MD5)
                .without(Checks::SHA1)
                .without(Checks::SHA256);
        }
        if args.follow {
            checks = checks.with(Checks::FOLLOW);
        }

        let dirs = args
            .directories
            .iter()
            .map(|d| {
                let mut dir = MonitoredDir::new(d.as_str(), checks)
                    .with_recursion_level(args.recursion_level);
                dir.restrict = restrict.clone();
                dir.tags = args.tags.clone();
                dir
            })
            .collect::<Vec<_>>();

        let ignore_regex = args
            .ignore_regex
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut skip_fs = SkipFs::default();
        for name in &args.skip_fs {
            match name.as_str() {
                "nfs" => skip_fs.nfs = true,
                "dev" => skip_fs.dev = true,
                "sys" => skip_fs.sys = true,
                "proc" => skip_fs.proc = true,
                other => return Err(ConfigError::UnknownFilesystem(other.to_string())),
            }
        }

        if args.output != "-" {
            let parent = PathBuf::from(&args.output);
            if let Some(parent) = parent.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidOutputPath {
                        path: args.output.clone(),
                        reason: format!("parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        let targets = vec![None; dirs.len()];
        Ok(Self {
            dirs,
            link_targets: Mutex::new(targets),
            ignore_paths: args.ignore_paths,
            ignore_regex,
            skip_fs,
            file_limit: if args.file_limit > 0 {
                args.file_limit
            } else {
                DEFAULT_ENTRY_LIMIT
            },
            file_limit_enabled: args.file_limit > 0,
            max_eps: args.max_eps,
            rt_delay_ms: args.rt_delay,
            max_file_size: args.max_file_size,
            prefilter_cmd: args.prefilter_cmd,
            db_path: args.db,
            output_path: args.output,
            interval: args.interval,
            show_summary: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Current real path of a monitored root.
    ///
    /// Without the FOLLOW bit this is the configured path. With it, a root
    /// that is a symlink resolves to its current target; a broken link
    /// yields `None` and the root is skipped until the link heals.
    pub fn real_path(&self, index: usize) -> Option<String> {
        let dir = &self.dirs[index];
        if !dir.checks.contains(Checks::FOLLOW) {
            return Some(dir.path.clone());
        }

        let mut targets = self.link_targets.lock();
        let meta = match fs::symlink_metadata(&dir.path) {
            Ok(m) => m,
            Err(_) => {
                targets[index] = None;
                return Some(dir.path.clone());
            }
        };

        if !meta.file_type().is_symlink() {
            targets[index] = None;
            return Some(dir.path.clone());
        }

        match fs::canonicalize(&dir.path) {
            Ok(target) => {
                let resolved = normalize_root(&target.to_string_lossy());
                targets[index] = Some(resolved.clone());
                Some(resolved)
            }
            Err(_) => {
                // Broken link: remember nothing and skip the root
                targets[index] = None;
                None
            }
        }
    }

    /// Index of the monitored directory whose real path is the longest
    /// prefix of `path` ending on a separator. `None` when the path is not
    /// under any configured root.
    pub fn directory_index(&self, path: &str) -> Option<usize> {
        if path.is_empty() {
            return None;
        }

        let full = with_trailing_sep(path);
        let mut best: Option<(usize, usize)> = None;

        for index in 0..self.dirs.len() {
            let Some(root) = self.real_path(index) else {
                continue;
            };
            let root_full = with_trailing_sep(&root);
            if full.starts_with(root_full.as_str())
                && best.map_or(true, |(len, _)| root_full.len() > len)
            {
                best = Some((root_full.len(), index));
            }
        }

        best.map(|(_, index)| index)
    }

    /// Number of path separators below the monitored root at `index`.
    ///
    /// The root itself sits below depth 0 (internally -1), its direct
    /// children are depth 0, and so on; monitoring the filesystem root
    /// (`/`) starts at depth 0. `None` when the path cannot lie under the
    /// root.
    pub fn recursion_depth(&self, path: &str, index: usize) -> Option<i64> {
        let root = self.real_path(index)?;
        let rest = path.get(root.len()..)?;

        let mut depth: i64 = if root == "/" { 0 } else { -1 };
        depth += rest.matches('/').count() as i64;
        Some(depth)
    }

    /// Check the ignore lists: literal prefixes first (case-insensitive),
    /// then the compiled patterns.
    pub fn is_ignored(&self, path: &str) -> bool {
        for prefix in &self.ignore_paths {
            match path.get(..prefix.len()) {
                Some(head) if head.eq_ignore_ascii_case(prefix) => {
                    tracing::trace!(path, prefix = prefix.as_str(), "ignoring entry");
                    return true;
                }
                _ => {}
            }
        }

        for pattern in &self.ignore_regex {
            if pattern.is_match(path) {
                tracing::trace!(path, pattern = pattern.as_str(), "ignoring entry");
                return true;
            }
        }

        false
    }

    /// Apply the per-directory restrict pattern; paths that do not match
    /// are not reported.
    pub fn restrict_allows(&self, path: &str, index: usize) -> bool {
        match &self.dirs[index].restrict {
            Some(pattern) if !pattern.is_match(path) => {
                tracing::trace!(path, pattern = pattern.as_str(), "restricted entry");
                false
            }
            _ => true,
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Strip trailing separators, keeping "/" itself intact
fn normalize_root(path: &str) -> String {
    if path == "/" {
        return path.to_string();
    }
    path.trim_end_matches('/').to_string()
}

fn with_trailing_sep(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(paths: &[&str]) -> MonitorConfig {
        MonitorConfig::new(
            paths
                .iter()
                .map(|p| MonitoredDir::new(*p, Checks::DEFAULT))
                .collect(),
        )
    }

    #[test]
    fn test_directory_index_longest_prefix() {
        let cfg = config(&["/etc", "/etc/ssh", "/var/log"]);

        assert_eq!(cfg.directory_index("/etc/passwd"), Some(0));
        assert_eq!(cfg.directory_index("/etc/ssh/sshd_config"), Some(1));
        assert_eq!(cfg.directory_index("/var/log/syslog"), Some(2));
        assert_eq!(cfg.directory_index("/usr/bin/env"), None);
        assert_eq!(cfg.directory_index(""), None);
    }

    #[test]
    fn test_directory_index_separator_boundary() {
        let cfg = config(&["/etc"]);

        // "/etcetera" shares bytes but not a path component
        assert_eq!(cfg.directory_index("/etcetera/file"), None);
        assert_eq!(cfg.directory_index("/etc"), Some(0));
    }

    #[test]
    fn test_directory_index_filesystem_root() {
        let cfg = config(&["/"]);
        assert_eq!(cfg.directory_index("/anything/at/all"), Some(0));
    }

    #[test]
    fn test_recursion_depth() {
        let cfg = config(&["/m"]);

        // The root itself sits below depth 0
        assert_eq!(cfg.recursion_depth("/m", 0), Some(-1));
        assert_eq!(cfg.recursion_depth("/m/a", 0), Some(0));
        assert_eq!(cfg.recursion_depth("/m/d/a", 0), Some(1));
        assert_eq!(cfg.recursion_depth("/m/d/e/a", 0), Some(2));
        assert_eq!(cfg.recursion_depth("/", 0), None);
    }

    #[test]
    fn test_recursion_depth_at_filesystem_root() {
        let cfg = config(&["/"]);

        assert_eq!(cfg.recursion_depth("/", 0), Some(0));
        assert_eq!(cfg.recursion_depth("/etc", 0), Some(0));
        assert_eq!(cfg.recursion_depth("/etc/passwd", 0), Some(1));
    }

    #[test]
    fn test_ignore_prefix_case_insensitive() {
        let mut cfg = config(&["/data"]);
        cfg.ignore_paths = vec!["/data/Cache".to_string()];

        assert!(cfg.is_ignored("/data/cache/blob"));
        assert!(cfg.is_ignored("/data/CACHE"));
        assert!(!cfg.is_ignored("/data/real"));
    }

    #[test]
    fn test_ignore_regex() {
        let mut cfg = config(&["/data"]);
        cfg.ignore_regex = vec![Regex::new(r"\.swp$").unwrap()];

        assert!(cfg.is_ignored("/data/file.swp"));
        assert!(!cfg.is_ignored("/data/file.txt"));
    }

    #[test]
    fn test_restrict_pattern() {
        let mut cfg = config(&["/data"]);
        cfg.dirs[0].restrict = Some(Regex::new(r"\.conf$").unwrap());

        assert!(cfg.restrict_allows("/data/app.conf", 0));
        assert!(!cfg.restrict_allows("/data/app.log", 0));
    }

    #[test]
    fn test_from_args_validation() {
        let args = CliArgs::parse_from(["fimwatch", "/etc", "--skip-fs", "bogus"]);
        assert!(matches!(
            MonitorConfig::from_args(args),
            Err(ConfigError::UnknownFilesystem(_))
        ));

        let args = CliArgs::parse_from(["fimwatch", "/etc", "--ignore-regex", "(unclosed"]);
        assert!(matches!(
            MonitorConfig::from_args(args),
            Err(ConfigError::InvalidPattern { .. })
        ));

        let args = CliArgs::parse_from([
            "fimwatch",
            "/etc",
            "--file-limit",
            "1000",
            "--skip-fs",
            "proc",
            "--no-hashes",
        ]);
        let cfg = MonitorConfig::from_args(args).unwrap();
        assert!(cfg.file_limit_enabled);
        assert_eq!(cfg.file_limit, 1000);
        assert!(cfg.skip_fs.proc);
        assert!(!cfg.dirs[0].checks.wants_hashes());
    }

    #[test]
    fn test_monitored_dir_mode() {
        use crate::types::ScanMode;

        let scheduled = MonitoredDir::new("/a", Checks::DEFAULT);
        assert_eq!(scheduled.mode(), ScanMode::Scheduled);

        let realtime = MonitoredDir::new("/a", Checks::DEFAULT.with(Checks::REALTIME));
        assert_eq!(realtime.mode(), ScanMode::Realtime);

        let whodata = MonitoredDir::new(
            "/a",
            Checks::DEFAULT.with(Checks::REALTIME).with(Checks::WHODATA),
        );
        assert_eq!(whodata.mode(), ScanMode::Whodata);
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root("/etc/"), "/etc");
        assert_eq!(normalize_root("/etc"), "/etc");
        assert_eq!(normalize_root("/"), "/");
    }
}
