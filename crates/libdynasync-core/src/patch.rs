//! Line-based patch codec
//!
//! A patch is the textual difference between two versions of a byte
//! sequence. Lines keep their `\n` terminator, so a missing newline at end of
//! file is preserved exactly. Patch text format:
//!
//! ```text
//! dynasync-patch 1
//! size <old_len> <new_len>
//! @@ -<old_start>,<old_count> +<new_start>,<new_count> @@
//!  <context line>
//! -<removed line>
//! +<added line>
//! ```
//!
//! Line starts are 0-based line indexes. Line payloads are percent-escaped:
//! `%`, control characters (including the line terminator) and bytes that
//! are not valid UTF-8 become `%XX`.
//!
//! Applying is strict. The base must have the recorded size, every context
//! and removed line must match at its exact position, and the result must
//! have the recorded size. Anything else is a [`PatchError::Mismatch`]; a
//! patch never produces bytes from a base it was not made against.

use std::fmt;

use similar::{capture_diff_slices, Algorithm, DiffOp};
use thiserror::Error;

/// First line of every patch
pub const PATCH_HEADER: &str = "dynasync-patch 1";

/// Unchanged lines kept around each change
pub const CONTEXT_LINES: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Malformed(String),

    #[error("patch does not apply: {0}")]
    Mismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOp {
    Context,
    Remove,
    Add,
}

impl LineOp {
    fn prefix(self) -> char {
        match self {
            LineOp::Context => ' ',
            LineOp::Remove => '-',
            LineOp::Add => '+',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLine {
    pub op: LineOp,
    pub content: Vec<u8>,
}

/// A contiguous block of changes with surrounding context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<PatchLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Size in bytes of the content the patch was made against
    pub old_len: usize,
    /// Size in bytes of the content the patch produces
    pub new_len: usize,
    pub hunks: Vec<Hunk>,
}

/// Line counts for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStats {
    pub additions: usize,
    pub deletions: usize,
}

/// Produce the patch text that turns `old` into `new`
pub fn diff(old: &[u8], new: &[u8]) -> String {
    Patch::compute(old, new).to_string()
}

/// Apply patch text to `old`, returning the patched content
pub fn apply(patch: &str, old: &[u8]) -> Result<Vec<u8>, PatchError> {
    Patch::parse(patch)?.apply(old)
}

impl Patch {
    /// Compute the patch between two versions
    pub fn compute(old: &[u8], new: &[u8]) -> Self {
        let old_lines = split_lines(old);
        let new_lines = split_lines(new);

        let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);

        // Flatten into one entry per line, remembering where each edit sits
        // in both versions
        let mut edits: Vec<(LineOp, usize, usize)> = Vec::new();
        for op in ops {
            match op {
                DiffOp::Equal {
                    old_index,
                    new_index,
                    len,
                } => {
                    for i in 0..len {
                        edits.push((LineOp::Context, old_index + i, new_index + i));
                    }
                }
                DiffOp::Delete {
                    old_index,
                    old_len,
                    new_index,
                } => {
                    for i in 0..old_len {
                        edits.push((LineOp::Remove, old_index + i, new_index));
                    }
                }
                DiffOp::Insert {
                    old_index,
                    new_index,
                    new_len,
                } => {
                    for i in 0..new_len {
                        edits.push((LineOp::Add, old_index, new_index + i));
                    }
                }
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => {
                    for i in 0..old_len {
                        edits.push((LineOp::Remove, old_index + i, new_index));
                    }
                    for i in 0..new_len {
                        edits.push((LineOp::Add, old_index + old_len, new_index + i));
                    }
                }
            }
        }

        let hunks = group_into_hunks(&edits, &old_lines, &new_lines);

        Self {
            old_len: old.len(),
            new_len: new.len(),
            hunks,
        }
    }

    /// Apply to `old`, failing unless every hunk matches exactly
    pub fn apply(&self, old: &[u8]) -> Result<Vec<u8>, PatchError> {
        if old.len() != self.old_len {
            return Err(PatchError::Mismatch(format!(
                "base is {} bytes, patch was made against {} bytes",
                old.len(),
                self.old_len
            )));
        }

        // The recorded result size must agree with the hunks before anything
        // is sized from it
        let (added, removed) = self.payload_bytes();
        if old.len().checked_add(added).and_then(|n| n.checked_sub(removed)) != Some(self.new_len) {
            return Err(PatchError::Mismatch(format!(
                "patch expects {} bytes but its hunks produce a different size",
                self.new_len
            )));
        }

        let lines = split_lines(old);
        let mut out = Vec::with_capacity(self.new_len);
        let mut cursor = 0usize;

        for (n, hunk) in self.hunks.iter().enumerate() {
            if hunk.old_start < cursor || hunk.old_start > lines.len() {
                return Err(PatchError::Mismatch(format!(
                    "hunk {} starts at line {} which is out of order or past the end ({} lines)",
                    n + 1,
                    hunk.old_start,
                    lines.len()
                )));
            }

            for line in &lines[cursor..hunk.old_start] {
                out.extend_from_slice(line);
            }

            let mut pos = hunk.old_start;
            for line in &hunk.lines {
                match line.op {
                    LineOp::Context | LineOp::Remove => {
                        match lines.get(pos) {
                            Some(actual) if *actual == line.content.as_slice() => {}
                            _ => {
                                return Err(PatchError::Mismatch(format!(
                                    "hunk {} does not match the base at line {}",
                                    n + 1,
                                    pos
                                )))
                            }
                        }
                        if line.op == LineOp::Context {
                            out.extend_from_slice(&line.content);
                        }
                        pos += 1;
                    }
                    LineOp::Add => out.extend_from_slice(&line.content),
                }
            }
            cursor = pos;
        }

        for line in &lines[cursor..] {
            out.extend_from_slice(line);
        }

        if out.len() != self.new_len {
            return Err(PatchError::Mismatch(format!(
                "result is {} bytes, patch expects {} bytes",
                out.len(),
                self.new_len
            )));
        }

        Ok(out)
    }

    /// Parse patch text
    pub fn parse(text: &str) -> Result<Self, PatchError> {
        let mut lines: Vec<&str> = text.split('\n').collect();
        // Text ends with a newline, leaving one empty trailing piece
        if lines.last() == Some(&"") {
            lines.pop();
        }
        let mut iter = lines.into_iter().peekable();

        match iter.next() {
            Some(PATCH_HEADER) => {}
            Some(other) => {
                return Err(PatchError::Malformed(format!(
                    "unknown header {:?}",
                    truncate(other)
                )))
            }
            None => return Err(PatchError::Malformed("empty patch".to_string())),
        }

        let size_line = iter
            .next()
            .ok_or_else(|| PatchError::Malformed("missing size line".to_string()))?;
        let (old_len, new_len) = parse_size_line(size_line)?;

        let mut hunks = Vec::new();
        while let Some(header) = iter.next() {
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(header)?;

            let mut body = Vec::new();
            while let Some(line) = iter.peek() {
                if line.starts_with("@@") {
                    break;
                }
                let line = iter.next().unwrap_or_default();
                let mut chars = line.chars();
                let op = match chars.next() {
                    Some(' ') => LineOp::Context,
                    Some('-') => LineOp::Remove,
                    Some('+') => LineOp::Add,
                    _ => {
                        return Err(PatchError::Malformed(format!(
                            "bad hunk line {:?}",
                            truncate(line)
                        )))
                    }
                };
                body.push(PatchLine {
                    op,
                    content: unescape(chars.as_str())?,
                });
            }

            let olds = body.iter().filter(|l| l.op != LineOp::Add).count();
            let news = body.iter().filter(|l| l.op != LineOp::Remove).count();
            if olds != old_count || news != new_count {
                return Err(PatchError::Malformed(format!(
                    "hunk {:?} declares {}/{} lines but has {}/{}",
                    header, old_count, new_count, olds, news
                )));
            }

            hunks.push(Hunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines: body,
            });
        }

        Ok(Self {
            old_len,
            new_len,
            hunks,
        })
    }

    /// Number of added and removed lines
    pub fn stats(&self) -> PatchStats {
        let mut stats = PatchStats::default();
        for line in self.hunks.iter().flat_map(|h| h.lines.iter()) {
            match line.op {
                LineOp::Add => stats.additions += 1,
                LineOp::Remove => stats.deletions += 1,
                LineOp::Context => {}
            }
        }
        stats
    }

    /// Bytes carried by added and removed lines
    fn payload_bytes(&self) -> (usize, usize) {
        let mut added = 0usize;
        let mut removed = 0usize;
        for line in self.hunks.iter().flat_map(|h| h.lines.iter()) {
            match line.op {
                LineOp::Add => added = added.saturating_add(line.content.len()),
                LineOp::Remove => removed = removed.saturating_add(line.content.len()),
                LineOp::Context => {}
            }
        }
        (added, removed)
    }

    /// True when applying the patch leaves content unchanged
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty() && self.old_len == self.new_len
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", PATCH_HEADER)?;
        writeln!(f, "size {} {}", self.old_len, self.new_len)?;
        for hunk in &self.hunks {
            writeln!(
                f,
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            )?;
            for line in &hunk.lines {
                let mut escaped = String::with_capacity(line.content.len() + 1);
                escaped.push(line.op.prefix());
                escape_into(&mut escaped, &line.content);
                writeln!(f, "{}", escaped)?;
            }
        }
        Ok(())
    }
}

/// Split content into lines, each keeping its `\n`
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    data.split_inclusive(|b| *b == b'\n').collect()
}

/// Group per-line edits into hunks with context
fn group_into_hunks(
    edits: &[(LineOp, usize, usize)],
    old_lines: &[&[u8]],
    new_lines: &[&[u8]],
) -> Vec<Hunk> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (i, (op, _, _)) in edits.iter().enumerate() {
        if *op == LineOp::Context {
            continue;
        }
        let start = i.saturating_sub(CONTEXT_LINES);
        let end = (i + CONTEXT_LINES + 1).min(edits.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            let (_, old_start, new_start) = edits[start];
            let mut hunk = Hunk {
                old_start,
                old_count: 0,
                new_start,
                new_count: 0,
                lines: Vec::with_capacity(end - start),
            };
            for &(op, old_idx, new_idx) in &edits[start..end] {
                let content = match op {
                    LineOp::Context | LineOp::Remove => old_lines[old_idx],
                    LineOp::Add => new_lines[new_idx],
                };
                if op != LineOp::Add {
                    hunk.old_count += 1;
                }
                if op != LineOp::Remove {
                    hunk.new_count += 1;
                }
                hunk.lines.push(PatchLine {
                    op,
                    content: content.to_vec(),
                });
            }
            hunk
        })
        .collect()
}

fn parse_size_line(line: &str) -> Result<(usize, usize), PatchError> {
    let rest = line
        .strip_prefix("size ")
        .ok_or_else(|| PatchError::Malformed(format!("bad size line {:?}", truncate(line))))?;
    let mut parts = rest.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => Ok((parse_num(a)?, parse_num(b)?)),
        _ => Err(PatchError::Malformed(format!(
            "bad size line {:?}",
            truncate(line)
        ))),
    }
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize), PatchError> {
    let bad = || PatchError::Malformed(format!("bad hunk header {:?}", truncate(line)));
    let inner = line
        .strip_prefix("@@ -")
        .and_then(|s| s.strip_suffix(" @@"))
        .ok_or_else(bad)?;
    let (old, new) = inner.split_once(" +").ok_or_else(bad)?;
    let (old_start, old_count) = old.split_once(',').ok_or_else(bad)?;
    let (new_start, new_count) = new.split_once(',').ok_or_else(bad)?;
    Ok((
        parse_num(old_start)?,
        parse_num(old_count)?,
        parse_num(new_start)?,
        parse_num(new_count)?,
    ))
}

fn parse_num(s: &str) -> Result<usize, PatchError> {
    s.parse()
        .map_err(|_| PatchError::Malformed(format!("bad number {:?}", truncate(s))))
}

fn truncate(s: &str) -> String {
    s.chars().take(40).collect()
}

fn escape_into(out: &mut String, bytes: &[u8]) {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                escape_str(out, s);
                return;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                if let Ok(s) = std::str::from_utf8(valid) {
                    escape_str(out, s);
                }
                let bad_len = e.error_len().unwrap_or(after.len());
                for b in &after[..bad_len] {
                    out.push_str(&format!("%{:02X}", b));
                }
                rest = &after[bad_len..];
            }
        }
    }
}

fn escape_str(out: &mut String, s: &str) {
    for c in s.chars() {
        if c == '%' || c.is_control() {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        } else {
            out.push(c);
        }
    }
}

fn unescape(s: &str) -> Result<Vec<u8>, PatchError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let pair = bytes
                .get(i + 1..i + 3)
                .filter(|p| p.iter().all(u8::is_ascii_hexdigit))
                .ok_or_else(|| {
                    PatchError::Malformed(format!("bad escape in line {:?}", truncate(s)))
                })?;
            let hex = std::str::from_utf8(pair)
                .map_err(|_| PatchError::Malformed("bad escape".to_string()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| PatchError::Malformed("bad escape".to_string()))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}
