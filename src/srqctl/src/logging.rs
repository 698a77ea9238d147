use std::fmt;

use ansi_term::{Colour, Style};
use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

use crate::config::Config;

const LOG_ENV: &str = "SRQ_LOG";

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> fmt::Display for FmtLevel<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, colour) = match *self.level {
            Level::TRACE => ("TRACE", Colour::Purple),
            Level::DEBUG => ("DEBUG", Colour::Blue),
            Level::INFO => (" INFO", Colour::Green),
            Level::WARN => (" WARN", Colour::Yellow),
            Level::ERROR => ("ERROR", Colour::Red),
        };
        if self.ansi {
            write!(f, "{}", colour.paint(label))
        } else {
            f.pad(label)
        }
    }
}

/// `HH:MM:SS.micros LEVEL [thread] target: message`
///
/// Worker threads are named after their role, so the thread column tells
/// posters, poppers and the refiller apart.
struct SrqctlFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for SrqctlFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let ansi = self.ansi && writer.has_ansi_escapes();
        let metadata = event.metadata();
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");
        let target = if ansi {
            Style::new().dimmed().paint(metadata.target()).to_string()
        } else {
            metadata.target().to_owned()
        };

        write!(
            writer,
            "{} {} [{}] {}: ",
            Local::now().format("%H:%M:%S%.6f"),
            FmtLevel {
                level: metadata.level(),
                ansi,
            },
            thread_name,
            target,
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Logs to stdout. `SRQ_LOG` overrides the level from the config file.
pub fn init_log(config: &Config, ansi: bool) -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;

    let env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level.parse()?)
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .event_format(SrqctlFormatter { ansi })
        .with_filter(env_filter);

    tracing_subscriber::registry().with(fmt_layer).try_init()?;
    tracing::info!("tracing-log initialized");
    Ok(())
}
