//! Canonical strings, fingerprints and cache entry paths.
//!
//! An identifier tree renders to exactly one canonical string; the SHA-1 of
//! that string is the fingerprint a cache entry is addressed by. Entry paths
//! combine a sanitised function name segment with a fingerprint prefix so the
//! on-disk layout stays human-navigable.

use std::fmt;
use std::path::PathBuf;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::ident::Identifier;

/// Number of fingerprint hex digits used as the entry subdirectory name.
pub const FP_DIR_PREFIX_LEN: usize = 16;

/// Hex digits appended to an over-long sanitised name to keep it unique.
const TRUNCATION_DIGEST_LEN: usize = 8;

//─────────────────────────────
//  Canonical string rendering
//─────────────────────────────

/// Render an identifier tree to its canonical textual form.
///
/// Map entries arrive pre-sorted, sequences keep their order, and every
/// primitive has a single fixed spelling, so equal identifiers always render
/// to equal strings.
pub fn canonical_string(id: &Identifier) -> String {
    let mut out = String::new();
    write_ident(&mut out, id);
    out
}

fn write_ident(out: &mut String, id: &Identifier) {
    match id {
        Identifier::Nil => out.push_str("nil"),
        Identifier::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Identifier::Int(n) => out.push_str(&n.to_string()),
        Identifier::Float(bits) => out.push_str(&float_spelling(*bits)),
        Identifier::Str(s) => out.push_str(&format!("{s:?}")),
        Identifier::Keyword(k) => out.push_str(k),
        Identifier::Name(n) => out.push_str(n),
        Identifier::Seq(items) => write_delimited(out, "[", items, "]"),
        Identifier::Entries(pairs) => {
            out.push('{');
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_ident(out, k);
                out.push(' ');
                write_ident(out, v);
            }
            out.push('}');
        }
        Identifier::SortedSet(items) => write_delimited(out, "#{", items, "}"),
        Identifier::Call { callee, args } => {
            out.push('(');
            write_ident(out, callee);
            for arg in args {
                out.push(' ');
                write_ident(out, arg);
            }
            out.push(')');
        }
        Identifier::Tagged { tag, body } => {
            out.push('#');
            out.push_str(tag);
            out.push(' ');
            write_ident(out, body);
        }
    }
}

fn write_delimited(out: &mut String, open: &str, items: &[Identifier], close: &str) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_ident(out, item);
    }
    out.push_str(close);
}

/// Fixed spelling for a float bit pattern, always distinct from an integer
/// spelling of the same magnitude.
fn float_spelling(bits: u64) -> String {
    let x = f64::from_bits(bits);
    if x.is_nan() {
        return "##NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "##Inf" } else { "##-Inf" }.to_string();
    }
    let s = format!("{x}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

//─────────────────────────────
//  Fingerprints
//─────────────────────────────

/// SHA-1 digest of the canonical string form of a call's identifier tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    /// Fingerprint an identifier tree.
    pub fn of(id: &Identifier) -> Self {
        Self::from_canonical(&canonical_string(id))
    }

    /// Fingerprint a pre-rendered canonical string.
    pub fn from_canonical(canonical: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        Self(hasher.finalize().into())
    }

    /// The full lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The first `n` hex digits, used for entry directories and diagnostics.
    pub fn prefix(&self, n: usize) -> String {
        let mut s = self.to_hex();
        s.truncate(n);
        s
    }

    /// Parse a full hex rendering back into a fingerprint.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.prefix(12))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::parse_hex(&s)
            .ok_or_else(|| D::Error::custom(format!("invalid fingerprint hex: {s}")))
    }
}

//─────────────────────────────
//  Entry paths
//─────────────────────────────

/// Replace filesystem-unsafe characters and cap the segment length.
///
/// Over-long names keep a digest suffix of the original so two functions
/// whose names collide after truncation still land in distinct directories.
pub fn sanitize_fn_name(name: &str, limit: usize) -> String {
    let mut sanitised: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if sanitised.len() > limit {
        let digest = Fingerprint::from_canonical(name).prefix(TRUNCATION_DIGEST_LEN);
        sanitised.truncate(limit.saturating_sub(TRUNCATION_DIGEST_LEN + 1));
        sanitised.push('-');
        sanitised.push_str(&digest);
    }
    sanitised
}

/// Relative location of a cache entry under the base cache directory.
///
/// Derived once per handle and stable across runs: equal fingerprints always
/// map to the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPath {
    fn_dir: String,
    fp_dir: String,
}

impl EntryPath {
    /// Derive the entry path for a callable name and fingerprint.
    pub fn for_call(fn_name: &str, fingerprint: &Fingerprint, name_limit: usize) -> Self {
        Self {
            fn_dir: sanitize_fn_name(fn_name, name_limit),
            fp_dir: fingerprint.prefix(FP_DIR_PREFIX_LEN),
        }
    }

    /// Rebuild an entry path from its two directory segments.
    pub fn from_segments(fn_dir: impl Into<String>, fp_dir: impl Into<String>) -> Self {
        Self { fn_dir: fn_dir.into(), fp_dir: fp_dir.into() }
    }

    /// The sanitised function-name directory segment.
    pub fn fn_dir(&self) -> &str {
        &self.fn_dir
    }

    /// The fingerprint-prefix directory segment.
    pub fn fp_dir(&self) -> &str {
        &self.fp_dir
    }

    /// The path relative to the base cache directory.
    pub fn relative(&self) -> PathBuf {
        PathBuf::from(&self.fn_dir).join(&self.fp_dir)
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fn_dir, self.fp_dir)
    }
}
