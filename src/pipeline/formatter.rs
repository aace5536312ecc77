//! Transcript rendering for prompt templates.

use crate::history::TranscriptLine;

/// `"{role}: {content}"`
pub fn format_line(line: &TranscriptLine) -> String {
    format!("{}: {}", line.role, line.content)
}

/// One formatted string per line, order preserved.
pub fn format_transcript(lines: &[TranscriptLine]) -> Vec<String> {
    lines.iter().map(format_line).collect()
}

/// Flattens a history into a single newline-separated block.
pub fn render_history(lines: &[TranscriptLine]) -> String {
    format_transcript(lines).join("\n")
}
