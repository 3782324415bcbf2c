//! Script segmentation.
//!
//! [`segment`] turns raw script text into a flat, ordered list of
//! [`Segment`]s: speakable text interleaved with pause markers.  The rules are
//! applied in a fixed precedence:
//!
//! 1. `[break]` splits the script into sections; a
//!    [`SegmentKind::SectionBreakPause`] separates consecutive non-empty
//!    sections.
//! 2. Newlines split a section into lines; a [`SegmentKind::LineBreakPause`]
//!    separates consecutive non-blank lines.  Blank lines never produce a
//!    pause of their own.
//! 3. A line starting with `###` is a heading: its remaining text is spoken
//!    and followed by the heading pause.  Otherwise a line containing `...`
//!    is split on every occurrence, with a [`SegmentKind::EllipsisPause`]
//!    between consecutive non-empty parts.
//!
//! Segmentation is pure: the same input always yields the same output.

use std::time::Duration;

const SECTION_BREAK_MARKER: &str = "[break]";
const HEADING_PREFIX: &str = "###";
const ELLIPSIS: &str = "...";

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// What a segment contributes to the narration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Text handed to the synthesis backend.  A heading is still spoken but
    /// triggers the heading pause after its audio.
    Speech { text: String, heading: bool },
    /// Silence between two non-blank lines.
    LineBreakPause,
    /// Silence between the parts of a line split on `...`.
    EllipsisPause,
    /// Silence for an author-inserted `[break]`.
    SectionBreakPause,
}

impl SegmentKind {
    fn speech(text: &str, heading: bool) -> Self {
        SegmentKind::Speech {
            text: text.to_string(),
            heading,
        }
    }

    /// `true` for segments that need the synthesis backend.
    pub fn is_speech(&self) -> bool {
        matches!(self, SegmentKind::Speech { .. })
    }

    /// Text to synthesise, if this is a speech segment.
    pub fn text(&self) -> Option<&str> {
        match self {
            SegmentKind::Speech { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The pause carried by this segment itself (not the trailing heading
    /// pause of a speech segment).
    pub fn pause(&self) -> Option<PauseKind> {
        match self {
            SegmentKind::Speech { .. } => None,
            SegmentKind::LineBreakPause => Some(PauseKind::LineBreak),
            SegmentKind::EllipsisPause => Some(PauseKind::Ellipsis),
            SegmentKind::SectionBreakPause => Some(PauseKind::SectionBreak),
        }
    }

    /// The pause appended after this segment's audio, if any.
    pub fn trailing_pause(&self) -> Option<PauseKind> {
        match self {
            SegmentKind::Speech { heading: true, .. } => Some(PauseKind::Heading),
            _ => None,
        }
    }
}

/// One unit of work.  `sequence_index` is assigned once here and is the only
/// ordering key used when the narration is reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sequence_index: usize,
    pub kind: SegmentKind,
}

// ---------------------------------------------------------------------------
// Pauses
// ---------------------------------------------------------------------------

/// The four configurable silences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseKind {
    Heading,
    Ellipsis,
    LineBreak,
    SectionBreak,
}

/// Snapshot of the pause lengths, captured once per run and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseDurations {
    pub heading: Duration,
    pub ellipsis: Duration,
    pub line_break: Duration,
    pub section_break: Duration,
}

impl PauseDurations {
    pub fn get(&self, kind: PauseKind) -> Duration {
        match kind {
            PauseKind::Heading => self.heading,
            PauseKind::Ellipsis => self.ellipsis,
            PauseKind::LineBreak => self.line_break,
            PauseKind::SectionBreak => self.section_break,
        }
    }
}

impl Default for PauseDurations {
    fn default() -> Self {
        crate::config::PauseConfig::default().durations()
    }
}

// ---------------------------------------------------------------------------
// segment
// ---------------------------------------------------------------------------

/// Decompose `text` into ordered segments with indices `0..n`.
///
/// ```
/// use script_narrator::segment::{segment, SegmentKind};
///
/// let segs = segment("Before...After");
/// assert_eq!(segs.len(), 3);
/// assert_eq!(segs[1].kind, SegmentKind::EllipsisPause);
/// ```
pub fn segment(text: &str) -> Vec<Segment> {
    let sections: Vec<Vec<SegmentKind>> = text
        .split(SECTION_BREAK_MARKER)
        .map(segment_section)
        .filter(|kinds| !kinds.is_empty())
        .collect();

    join(sections, SegmentKind::SectionBreakPause)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, kind)| Segment {
            sequence_index,
            kind,
        })
        .collect()
}

/// Count of speech segments in `segments`.
pub fn speech_count(segments: &[Segment]) -> usize {
    segments.iter().filter(|s| s.kind.is_speech()).count()
}

fn segment_section(section: &str) -> Vec<SegmentKind> {
    if section.trim().is_empty() {
        return Vec::new();
    }
    let lines: Vec<Vec<SegmentKind>> = section
        .split('\n')
        .map(segment_line)
        .filter(|kinds| !kinds.is_empty())
        .collect();
    join(lines, SegmentKind::LineBreakPause)
}

fn segment_line(line: &str) -> Vec<SegmentKind> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    if let Some(heading) = line.strip_prefix(HEADING_PREFIX) {
        let heading = heading.trim();
        if heading.is_empty() {
            return Vec::new();
        }
        return vec![SegmentKind::speech(heading, true)];
    }

    if line.contains(ELLIPSIS) {
        let parts: Vec<Vec<SegmentKind>> = line
            .split(ELLIPSIS)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| vec![SegmentKind::speech(part, false)])
            .collect();
        return join(parts, SegmentKind::EllipsisPause);
    }

    vec![SegmentKind::speech(line, false)]
}

/// Flatten `groups`, placing `separator` between neighbours only.
fn join(groups: Vec<Vec<SegmentKind>>, separator: SegmentKind) -> Vec<SegmentKind> {
    let mut out = Vec::new();
    for (i, group) in groups.into_iter().enumerate() {
        if i > 0 {
            out.push(separator.clone());
        }
        out.extend(group);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
