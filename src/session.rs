//! Run identity and on-disk layout.
//!
//! A [`RunSession`] is established once per controller, before any hardware is touched.
//! Three modes exist:
//!
//! - **Command mode**: one shared tree under the configuration's `smurf_cmd_dir`, reused
//!   by every invocation. Used for short command-line actions; always logs to
//!   `outputs/smurf_cmd.log`.
//! - **Named run**: `<base>/<YYYYMMDD>/<name>/{outputs,outputs/tune,plots}`. The name
//!   defaults to the start timestamp.
//! - **No directories**: nothing is created and no logfile is bound. Anything that
//!   later writes tune files or plots will fail; this is an escape hatch, not a
//!   supported way to take data.
//!
//! Directory creation is idempotent. Failures are fatal and not retried.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ConfigView, ControllerOptions};
use crate::error::{AppResult, SmurfError};
use crate::logging::LogSink;

/// Run name and logfile stem used in command mode.
pub const SMURF_CMD_NAME: &str = "smurf_cmd";

/// Session layout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionMode {
    /// Shared command directory and `smurf_cmd.log`.
    Command,
    /// Dated directory named after the run.
    NamedRun,
    /// Nothing is written to disk.
    NoDir,
}

impl SessionMode {
    /// `no_dir` wins over `smurf_cmd_mode`.
    pub fn from_options(options: &ControllerOptions) -> Self {
        if options.no_dir {
            SessionMode::NoDir
        } else if options.smurf_cmd_mode {
            SessionMode::Command
        } else {
            SessionMode::NamedRun
        }
    }
}

/// Directory tree of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionLayout {
    /// Run directory, or the command directory.
    pub base_dir: PathBuf,
    /// `outputs/` under the base.
    pub output_dir: PathBuf,
    /// `outputs/tune/`.
    pub tune_dir: PathBuf,
    /// `plots/`.
    pub plot_dir: PathBuf,
}

impl SessionLayout {
    /// Shared command-mode tree rooted at `base_dir`.
    pub fn command(base_dir: PathBuf) -> Self {
        let output_dir = base_dir.join("outputs");
        Self {
            tune_dir: output_dir.join("tune"),
            plot_dir: base_dir.join("plots"),
            output_dir,
            base_dir,
        }
    }

    /// Dated per-run tree.
    pub fn named_run(base_dir: PathBuf, date: &str, name: &str) -> Self {
        let run_dir = base_dir.join(date).join(name);
        let output_dir = run_dir.join("outputs");
        Self {
            tune_dir: output_dir.join("tune"),
            plot_dir: run_dir.join("plots"),
            output_dir,
            base_dir,
        }
    }

    /// Create every directory of the layout.
    pub fn create(&self) -> AppResult<()> {
        make_dir(&self.output_dir)?;
        make_dir(&self.tune_dir)?;
        make_dir(&self.plot_dir)
    }
}

/// Identity and filesystem state of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSession {
    /// Unix seconds at session start.
    pub start_time: i64,
    /// Run name; the start timestamp when none was given.
    pub name: String,
    /// Layout mode.
    pub mode: SessionMode,
    /// `YYYYMMDD` of a named run.
    pub date: Option<String>,
    /// Absent in no-dir mode.
    pub layout: Option<SessionLayout>,
    logfile: Option<PathBuf>,
}

impl RunSession {
    /// Logfile currently bound, if any.
    pub fn logfile(&self) -> Option<&Path> {
        self.logfile.as_deref()
    }

    /// Output directory, absent in no-dir mode.
    pub fn output_dir(&self) -> Option<&Path> {
        self.layout.as_ref().map(|l| l.output_dir.as_path())
    }

    /// Tune directory, absent in no-dir mode.
    pub fn tune_dir(&self) -> Option<&Path> {
        self.layout.as_ref().map(|l| l.tune_dir.as_path())
    }

    /// Plot directory, absent in no-dir mode.
    pub fn plot_dir(&self) -> Option<&Path> {
        self.layout.as_ref().map(|l| l.plot_dir.as_path())
    }

    /// Point the log sink at a different file, or at none.
    pub fn rebind_logfile(&mut self, path: Option<PathBuf>, sink: &LogSink) -> AppResult<()> {
        sink.set_logfile(path.as_deref())?;
        self.logfile = path;
        Ok(())
    }
}

/// Establishes a [`RunSession`] from options and configuration.
pub struct SessionManager<'a> {
    options: &'a ControllerOptions,
    config: &'a ConfigView,
}

impl<'a> SessionManager<'a> {
    /// Borrow the options and configuration.
    pub fn new(options: &'a ControllerOptions, config: &'a ConfigView) -> Self {
        Self { options, config }
    }

    /// Create the session's directories and bind its logfile.
    pub fn establish(&self, sink: &LogSink) -> AppResult<RunSession> {
        self.establish_at(Local::now(), sink)
    }

    /// Establish a session as if started at `now`.
    pub fn establish_at(&self, now: DateTime<Local>, sink: &LogSink) -> AppResult<RunSession> {
        let start_time = now.timestamp();
        let mode = SessionMode::from_options(self.options);

        let session = match mode {
            SessionMode::NoDir => {
                warn!("Not making output directories! This will break many things!");
                RunSession {
                    start_time,
                    name: self
                        .options
                        .name
                        .clone()
                        .unwrap_or_else(|| get_timestamp(&now)),
                    mode,
                    date: None,
                    layout: None,
                    logfile: None,
                }
            }
            SessionMode::Command => {
                let base_dir = absolute(Path::new(self.config.string("smurf_cmd_dir")?))?;
                let layout = SessionLayout::command(base_dir);
                layout.create()?;

                let logfile = layout.output_dir.join(format!("{SMURF_CMD_NAME}.log"));
                sink.set_logfile(Some(&logfile))?;
                RunSession {
                    start_time,
                    name: SMURF_CMD_NAME.to_string(),
                    mode,
                    date: None,
                    layout: Some(layout),
                    logfile: Some(logfile),
                }
            }
            SessionMode::NamedRun => {
                let data_dir = match &self.options.data_dir {
                    Some(dir) => dir.clone(),
                    None => PathBuf::from(self.config.string("default_data_dir")?),
                };
                let base_dir = absolute(&data_dir)?;
                let date = now.format("%Y%m%d").to_string();
                let name = self
                    .options
                    .name
                    .clone()
                    .unwrap_or_else(|| get_timestamp(&now));

                let layout = SessionLayout::named_run(base_dir, &date, &name);
                layout.create()?;

                let logfile = if self.options.make_logfile {
                    let path = layout.output_dir.join(format!("{name}.log"));
                    sink.set_logfile(Some(&path))?;
                    Some(path)
                } else {
                    sink.set_logfile(None)?;
                    None
                };
                RunSession {
                    start_time,
                    name,
                    mode,
                    date: Some(date),
                    layout: Some(layout),
                    logfile,
                }
            }
        };

        info!(
            name = %session.name,
            mode = ?session.mode,
            output_dir = ?session.output_dir(),
            "Run session established"
        );
        Ok(session)
    }
}

/// Unix seconds of `now`, right-aligned to ten characters.
pub fn get_timestamp(now: &DateTime<Local>) -> String {
    format!("{:10}", now.timestamp())
}

/// Create `dir` and its parents; an existing directory is not an error.
pub fn make_dir(dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| SmurfError::filesystem(dir, e))
}

fn absolute(path: &Path) -> AppResult<PathBuf> {
    std::path::absolute(path).map_err(|e| SmurfError::filesystem(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap()
    }

    fn config_with_dirs(data: &Path, cmd: &Path) -> ConfigView {
        ConfigView::from_value(json!({
            "default_data_dir": data.to_str().unwrap(),
            "smurf_cmd_dir": cmd.to_str().unwrap(),
        }))
        .unwrap()
    }

    fn count_dirs(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn test_named_run_defaults_name_to_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_dirs(tmp.path(), &tmp.path().join("cmd"));
        let options = ControllerOptions::default();
        let sink = LogSink::new();

        let session = SessionManager::new(&options, &config)
            .establish_at(fixed_now(), &sink)
            .unwrap();

        let stamp = fixed_now().timestamp();
        assert_eq!(session.start_time, stamp);
        assert_eq!(session.name, stamp.to_string());
        assert_eq!(session.date.as_deref(), Some("20240309"));

        let layout = session.layout.as_ref().unwrap();
        let expected = tmp.path().join("20240309").join(&session.name).join("outputs");
        assert_eq!(layout.output_dir, expected);
        assert_eq!(layout.tune_dir, expected.join("tune"));
        assert_eq!(
            layout.plot_dir,
            tmp.path().join("20240309").join(&session.name).join("plots")
        );
        assert!(layout.tune_dir.is_dir());
        assert!(layout.plot_dir.is_dir());

        let logfile = expected.join(format!("{}.log", session.name));
        assert_eq!(session.logfile(), Some(logfile.as_path()));
        assert_eq!(sink.logfile(), Some(logfile));
    }

    #[test]
    fn test_named_run_with_data_dir_override_and_no_logfile() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_dirs(&tmp.path().join("unused"), &tmp.path().join("cmd"));
        let options = ControllerOptions {
            data_dir: Some(tmp.path().join("override")),
            name: Some("cooldown_12".into()),
            make_logfile: false,
            ..ControllerOptions::default()
        };
        let sink = LogSink::new();
        sink.set_logfile(Some(&tmp.path().join("previous.log"))).unwrap();

        let session = SessionManager::new(&options, &config)
            .establish_at(fixed_now(), &sink)
            .unwrap();

        assert_eq!(
            session.output_dir().unwrap(),
            tmp.path().join("override/20240309/cooldown_12/outputs")
        );
        assert!(session.logfile().is_none());
        assert!(sink.logfile().is_none(), "sink must be explicitly unbound");
        assert!(!tmp.path().join("unused").exists());
    }

    #[test]
    fn test_command_mode_reuses_shared_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = tmp.path().join("smurf_cmd");
        let config = config_with_dirs(&tmp.path().join("data"), &cmd);
        let options = ControllerOptions {
            smurf_cmd_mode: true,
            make_logfile: false,
            ..ControllerOptions::default()
        };
        let sink = LogSink::new();
        let manager = SessionManager::new(&options, &config);

        let first = manager.establish_at(fixed_now(), &sink).unwrap();
        let second = manager.establish(&sink).unwrap();

        assert_eq!(first.layout, second.layout);
        assert_eq!(first.output_dir().unwrap(), cmd.join("outputs"));
        assert_eq!(first.plot_dir().unwrap(), cmd.join("plots"));
        assert_eq!(
            first.logfile().unwrap(),
            cmd.join("outputs").join("smurf_cmd.log")
        );
        assert_eq!(first.name, SMURF_CMD_NAME);
        assert!(second.start_time >= first.start_time);
    }

    #[test]
    fn test_no_dir_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_dirs(tmp.path(), &tmp.path().join("cmd"));
        let options = ControllerOptions {
            no_dir: true,
            smurf_cmd_mode: true,
            ..ControllerOptions::default()
        };
        let sink = LogSink::new();

        let session = SessionManager::new(&options, &config)
            .establish_at(fixed_now(), &sink)
            .unwrap();

        assert_eq!(session.mode, SessionMode::NoDir);
        assert!(session.layout.is_none());
        assert!(session.logfile().is_none());
        assert!(sink.logfile().is_none());
        assert_eq!(count_dirs(tmp.path()), 0);
    }

    #[test]
    fn test_no_dir_needs_no_directory_config() {
        let config = ConfigView::from_value(json!({})).unwrap();
        let options = ControllerOptions {
            no_dir: true,
            ..ControllerOptions::default()
        };
        let session = SessionManager::new(&options, &config)
            .establish_at(fixed_now(), &LogSink::new())
            .unwrap();
        assert_eq!(session.name, fixed_now().timestamp().to_string());
    }

    #[test]
    fn test_make_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b/c");
        make_dir(&dir).unwrap();
        make_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_directory_creation_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = config_with_dirs(&blocker, &tmp.path().join("cmd"));
        let options = ControllerOptions::default();

        let err = SessionManager::new(&options, &config)
            .establish_at(fixed_now(), &LogSink::new())
            .unwrap_err();
        assert!(matches!(err, SmurfError::Filesystem { .. }));
    }

    #[test]
    fn test_rebind_logfile() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_dirs(tmp.path(), &tmp.path().join("cmd"));
        let options = ControllerOptions::default();
        let sink = LogSink::new();
        let mut session = SessionManager::new(&options, &config)
            .establish_at(fixed_now(), &sink)
            .unwrap();

        let other = tmp.path().join("other.log");
        session.rebind_logfile(Some(other.clone()), &sink).unwrap();
        assert_eq!(session.logfile(), Some(other.as_path()));
        assert_eq!(sink.logfile(), Some(other));

        session.rebind_logfile(None, &sink).unwrap();
        assert!(session.logfile().is_none());
    }

    #[test]
    fn test_timestamp_width() {
        assert_eq!(get_timestamp(&fixed_now()).len(), 10);
    }
}
