//! Format-tagged content patches
//!
//! Text pairs (valid UTF-8, no NUL) get a line-based patch; anything else is
//! carried as a whole-content replacement. A patch names the hash of the
//! content it applies to and the hash of the result, and both are checked on
//! apply.

use crate::error::SyncError;
use crate::hash::{hash_bytes, validate_hash};
use crate::sync::protocol::base64_bytes;
use serde::{Deserialize, Serialize};

/// Above this many LCS table cells the line diff degrades to replacing the
/// whole changed region.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Text,
    Binary,
}

impl ContentFormat {
    pub fn detect(content: &[u8]) -> Self {
        match std::str::from_utf8(content) {
            Ok(text) if !text.contains('\0') => ContentFormat::Text,
            _ => ContentFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LineOp {
    Keep { count: usize },
    Delete { count: usize },
    Insert { lines: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PatchBody {
    Lines {
        ops: Vec<LineOp>,
    },
    Replace {
        #[serde(with = "base64_bytes")]
        content: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub format: ContentFormat,
    pub base_hash: String,
    pub target_hash: String,
    pub body: PatchBody,
}

impl Patch {
    /// Whole-content replacement applying on top of `base_hash`.
    pub fn replacement(base_hash: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            format: ContentFormat::detect(&content),
            base_hash: base_hash.into().to_ascii_lowercase(),
            target_hash: hash_bytes(&content),
            body: PatchBody::Replace { content },
        }
    }
}

/// Patch turning `old` into `new`.
pub fn generate_diff(old: &[u8], new: &[u8]) -> Patch {
    let base_hash = hash_bytes(old);
    let (old_text, new_text) = match (std::str::from_utf8(old), std::str::from_utf8(new)) {
        (Ok(a), Ok(b))
            if ContentFormat::detect(old) == ContentFormat::Text
                && ContentFormat::detect(new) == ContentFormat::Text =>
        {
            (a, b)
        }
        _ => {
            return Patch {
                format: ContentFormat::Binary,
                base_hash,
                target_hash: hash_bytes(new),
                body: PatchBody::Replace {
                    content: new.to_vec(),
                },
            };
        }
    };

    let a: Vec<&str> = old_text.split_inclusive('\n').collect();
    let b: Vec<&str> = new_text.split_inclusive('\n').collect();

    Patch {
        format: ContentFormat::Text,
        base_hash,
        target_hash: hash_bytes(new),
        body: PatchBody::Lines {
            ops: line_ops(&a, &b),
        },
    }
}

fn line_ops(a: &[&str], b: &[&str]) -> Vec<LineOp> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut ops = OpBuilder::default();
    ops.keep(prefix);

    if a_mid.len().saturating_mul(b_mid.len()) > MAX_LCS_CELLS {
        ops.delete(a_mid.len());
        for line in b_mid {
            ops.insert(line);
        }
    } else {
        lcs_ops(a_mid, b_mid, &mut ops);
    }

    ops.keep(suffix);
    ops.finish()
}

/// Classic LCS table over line slices, walked from the front.
fn lcs_ops(a: &[&str], b: &[&str], ops: &mut OpBuilder) {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of a[i..] and b[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.keep(1);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.delete(1);
            i += 1;
        } else {
            ops.insert(b[j]);
            j += 1;
        }
    }
    ops.delete(n - i);
    for line in &b[j..] {
        ops.insert(line);
    }
}

/// Accumulates ops, merging runs of the same kind.
#[derive(Default)]
struct OpBuilder {
    ops: Vec<LineOp>,
}

impl OpBuilder {
    fn keep(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        match self.ops.last_mut() {
            Some(LineOp::Keep { count: c }) => *c += count,
            _ => self.ops.push(LineOp::Keep { count }),
        }
    }

    fn delete(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        match self.ops.last_mut() {
            Some(LineOp::Delete { count: c }) => *c += count,
            _ => self.ops.push(LineOp::Delete { count }),
        }
    }

    fn insert(&mut self, line: &str) {
        match self.ops.last_mut() {
            Some(LineOp::Insert { lines }) => lines.push(line.to_string()),
            _ => self.ops.push(LineOp::Insert {
                lines: vec![line.to_string()],
            }),
        }
    }

    fn finish(self) -> Vec<LineOp> {
        self.ops
    }
}

/// Apply `patch` to `content`, checking the base hash first and the target
/// hash on the result.
pub fn apply_diff(content: &[u8], patch: &Patch) -> Result<Vec<u8>, SyncError> {
    if !validate_hash(content, &patch.base_hash) {
        return Err(SyncError::Validation(format!(
            "patch base {} does not match current content",
            patch.base_hash
        )));
    }

    let result = match &patch.body {
        PatchBody::Replace { content } => content.clone(),
        PatchBody::Lines { ops } => {
            if patch.format == ContentFormat::Binary {
                return Err(SyncError::Validation(
                    "binary patch cannot carry line operations".to_string(),
                ));
            }
            let text = std::str::from_utf8(content)
                .map_err(|e| SyncError::Decode(format!("content is not UTF-8: {e}")))?;
            apply_line_ops(text, ops)?.into_bytes()
        }
    };

    if !validate_hash(&result, &patch.target_hash) {
        return Err(SyncError::Decode(
            "patch result does not match target hash".to_string(),
        ));
    }
    Ok(result)
}

fn advance(cursor: usize, count: usize) -> Result<usize, SyncError> {
    cursor
        .checked_add(count)
        .ok_or_else(|| SyncError::Decode(format!("line count {count} overflows")))
}

fn apply_line_ops(text: &str, ops: &[LineOp]) -> Result<String, SyncError> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut cursor = 0usize;
    let mut out = String::with_capacity(text.len());

    for op in ops {
        match op {
            LineOp::Keep { count } => {
                let end = advance(cursor, *count)?;
                let kept = lines
                    .get(cursor..end)
                    .ok_or_else(|| SyncError::Decode("keep runs past end of content".to_string()))?;
                kept.iter().for_each(|line| out.push_str(line));
                cursor = end;
            }
            LineOp::Delete { count } => {
                let end = advance(cursor, *count)?;
                if end > lines.len() {
                    return Err(SyncError::Decode(
                        "delete runs past end of content".to_string(),
                    ));
                }
                cursor = end;
            }
            LineOp::Insert { lines: inserted } => {
                inserted.iter().for_each(|line| out.push_str(line));
            }
        }
    }

    if cursor != lines.len() {
        return Err(SyncError::Decode(
            "patch does not cover the whole content".to_string(),
        ));
    }
    Ok(out)
}
