//! Terminal output for new messages.

use std::io::Write;

use crate::config::DisplayMode;
use crate::normalize::html_to_text;
use crate::poll::Renderer;
use crate::{Address, NormalizedMessage};

const RULE_WIDTH: usize = 60;

/// Writes messages to any [`Write`] sink (stdout in the binary).
#[derive(Debug)]
pub struct Terminal<W> {
    out: W,
}

impl<W: Write> Terminal<W> {
    /// Render to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Consume the renderer, returning the sink.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_message(
        &mut self,
        message: &NormalizedMessage,
        mode: DisplayMode,
    ) -> std::io::Result<()> {
        let from = if message.from.trim().is_empty() {
            "(unknown)"
        } else {
            message.from.as_str()
        };
        let subject = if message.subject.trim().is_empty() {
            "(no subject)"
        } else {
            message.subject.as_str()
        };
        let date = message.received_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let body = display_body(message);

        match mode {
            DisplayMode::Plain => {
                writeln!(self.out, "{}", "─".repeat(RULE_WIDTH))?;
                writeln!(self.out, "[{}] New Email", message.provider)?;
                writeln!(self.out, "From:    {from}")?;
                writeln!(self.out, "Subject: {subject}")?;
                writeln!(self.out, "Date:    {date}")?;
                writeln!(self.out)?;
                writeln!(self.out, "{body}")?;
                writeln!(self.out)?;
            }
            DisplayMode::Rich => {
                let title = format!(" New Email [{}] ", message.provider);
                let fill = RULE_WIDTH.saturating_sub(title.chars().count() + 1);
                writeln!(self.out, "╭─{title}{}╮", "─".repeat(fill))?;
                writeln!(self.out, "│ From:    {from}")?;
                writeln!(self.out, "│ Subject: {subject}")?;
                writeln!(self.out, "│ Date:    {date}")?;
                writeln!(self.out, "│")?;
                for line in body.lines() {
                    writeln!(self.out, "│ {line}")?;
                }
                writeln!(self.out, "╰{}╯", "─".repeat(RULE_WIDTH))?;
            }
        }
        self.out.flush()
    }
}

impl<W: Write + Send> Renderer for Terminal<W> {
    fn address_ready(&mut self, address: &Address) {
        let result = writeln!(
            self.out,
            "✓ Email address ready: {address}\n  Provider: {} · press Ctrl+C to stop\n",
            address.provider()
        );
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to write to terminal");
        }
    }

    fn render(&mut self, messages: &[NormalizedMessage], mode: DisplayMode) {
        for message in messages {
            if let Err(e) = self.write_message(message, mode) {
                tracing::warn!(error = %e, "failed to write to terminal");
                return;
            }
        }
    }
}

/// Text body, else the HTML body stripped of markup, else a placeholder.
pub fn display_body(message: &NormalizedMessage) -> String {
    if let Some(text) = message.body_text.as_deref().filter(|t| !t.trim().is_empty()) {
        return text.trim().to_string();
    }
    match message.body_html.as_deref().map(html_to_text) {
        Some(text) if !text.is_empty() => text,
        _ => "(no body)".to_string(),
    }
}
