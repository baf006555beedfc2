//! Provide tracing, tailored to this crate.
//!
//! Binaries call [`init_stdout`] once at startup to install a subscriber.
//! Library code includes `use crate::tracing::prelude::*` for the `trace!()`,
//! `debug!()`, `info!()`, `warn!()` and `error!()` macros.
//!
//! Register-level traffic is logged at TRACE, so
//! `RUST_LOG=pmu_pwrdev=trace` shows every bus and MMIO access.

use std::fmt;

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{
        format::{DefaultFields, Writer as FmtWriter},
        time::FormatTime,
        FmtContext, FormatEvent, FormatFields,
    },
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

const CRATE_PREFIX: &str = "pmu_pwrdev::";

/// Log to stdout, filtering according to RUST_LOG with INFO as the default.
pub fn init_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .fmt_fields(DefaultFields::new())
                .event_format(CompactFormatter),
        )
        .init();
}

/// Event formatter: time, colored level, short target, message, then any
/// structured fields dimmed on a second line.
struct CompactFormatter;

/// Collects the message and fields of one event.
#[derive(Default)]
struct FieldCollector {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(formatted);
        } else {
            self.fields.push((field.name().to_string(), formatted));
        }
    }
}

impl<S, N> FormatEvent<S, N> for CompactFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: FmtWriter<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;
        write!(writer, " ")?;

        let (level_color, level_text) = match *event.metadata().level() {
            Level::ERROR => ("\x1b[31m", "ERROR"),
            Level::WARN => ("\x1b[33m", "WARN "),
            Level::INFO => ("\x1b[32m", "INFO "),
            Level::DEBUG => ("\x1b[34m", "DEBUG"),
            Level::TRACE => ("\x1b[35m", "TRACE"),
        };
        write!(writer, "{}{}\x1b[0m ", level_color, level_text)?;

        let target = event.metadata().target();
        let short_target = target.strip_prefix(CRATE_PREFIX).unwrap_or(target);
        write!(writer, "{}: ", short_target)?;

        if let Some(ref msg) = visitor.message {
            write!(writer, "{}", msg.trim_matches('"'))?;
        }

        if !visitor.fields.is_empty() {
            writeln!(writer)?;
            // Timestamp (8) + space + level (5) + space
            write!(writer, "\x1b[90m               ")?;
            for (i, (key, value)) in visitor.fields.iter().enumerate() {
                if i > 0 {
                    write!(writer, ", ")?;
                }
                write!(writer, "{}={}", key, value.trim_matches('"'))?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

/// Local wall-clock time to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut FmtWriter<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
