use colored::Colorize;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Formatter for the user-facing stdout layer.
///
/// Handshake progress reads as plain status lines; only trouble gets
/// tinted, so a failed or canceled authentication stands out in a stream
/// of `Authentication (1) status: ...` output. No timestamps or level
/// tags: the detailed file log carries those.
pub struct StatusLineFormatter;

impl<S, N> FormatEvent<S, N> for StatusLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Failures are rendered into a buffer first so the tint covers
        // the whole line; everything else goes straight through.
        match *event.metadata().level() {
            Level::ERROR => {
                let mut line = String::new();
                ctx.format_fields(Writer::new(&mut line).by_ref(), event)?;
                writeln!(writer, "{}", line.red())
            }
            Level::WARN => {
                let mut line = String::new();
                ctx.format_fields(Writer::new(&mut line).by_ref(), event)?;
                writeln!(writer, "{}", line.yellow())
            }
            _ => {
                ctx.format_fields(writer.by_ref(), event)?;
                writeln!(writer)
            }
        }
    }
}
