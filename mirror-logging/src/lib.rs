//! Process-wide tracing setup for the feed mirror.
//!
//! Output, format and level are driven by environment variables so the same
//! binary can log to a terminal during development and to rolling files in
//! production:
//!
//! | variable        | values                       | default                    |
//! |-----------------|------------------------------|----------------------------|
//! | `RUST_LOG`      | any `EnvFilter` directive    | unset                      |
//! | `LOG_LEVEL`     | `trace` .. `error`           | `info`                     |
//! | `LOG_OUTPUT`    | `console`, `file`, `both`    | `console`                  |
//! | `LOG_FORMAT`    | `human`, `json`              | `human`                    |
//! | `LOG_FILE_PATH` | path of the rolling log file | `/tmp/mirror-server.log`   |

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const DEFAULT_LOG_FILE: &str = "/tmp/mirror-server.log";

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    /// Anything unrecognised: install the filter only, emit nothing.
    Silent,
}

impl LogOutput {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => LogOutput::Console,
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Silent,
        }
    }

    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

/// Resolved logging settings, read once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub json: bool,
    pub file_path: PathBuf,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let output = LogOutput::parse(&lookup("LOG_OUTPUT").unwrap_or_else(|| "console".into()));
        let json = lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));
        let file_path = lookup("LOG_FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));

        Self {
            level,
            output,
            json,
            file_path,
        }
    }

    fn filter(&self) -> EnvFilter {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        ["hyper=warn", "reqwest=warn", "h2=warn"]
            .into_iter()
            .filter_map(|d| d.parse().ok())
            .fold(filter, |f, directive| f.add_directive(directive))
    }

    fn file_parts(&self) -> (&Path, &Path) {
        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/tmp"));
        let name = self
            .file_path
            .file_name()
            .map(Path::new)
            .unwrap_or_else(|| Path::new("mirror-server.log"));
        (dir, name)
    }
}

// Writes every line to both sinks; used for LOG_OUTPUT=both.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

/// Installs the global subscriber described by [`LogSettings::from_env`].
///
/// The returned guard flushes the background file writer when dropped, so
/// the caller keeps it alive for the lifetime of the process. Calling this
/// twice is harmless; the second installation is ignored.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let subscriber = registry().with(settings.filter());

    let (file_writer, guard) = if settings.output.file() {
        let (dir, name) = settings.file_parts();
        let appender = tracing_appender::rolling::daily(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(writer), Some(guard))
    } else {
        (None, None)
    };

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let installed = match (settings.output.console(), file_writer) {
        (true, Some(file)) => {
            let writer = MakeTee {
                make_a: io::stdout,
                make_b: file,
            };
            if settings.json {
                subscriber.with(fmt_layer.json().with_writer(writer)).try_init()
            } else {
                subscriber.with(fmt_layer.with_writer(writer)).try_init()
            }
        }
        (true, None) => {
            if settings.json {
                subscriber.with(fmt_layer.json().with_writer(io::stdout)).try_init()
            } else {
                subscriber.with(fmt_layer.with_writer(io::stdout)).try_init()
            }
        }
        (false, Some(file)) => {
            if settings.json {
                subscriber
                    .with(fmt_layer.json().with_ansi(false).with_writer(file))
                    .try_init()
            } else {
                subscriber
                    .with(fmt_layer.with_ansi(false).with_writer(file))
                    .try_init()
            }
        }
        (false, None) => subscriber.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }

    guard
}
