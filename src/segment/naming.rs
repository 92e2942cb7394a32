//! Segment filename extension schemes (spec §6.2) and discovery of an
//! existing chain's files on disk (component A, filename-pool half).

use std::path::{Path, PathBuf};

use crate::error::{EwfError, EwfResult};

/// Which extension family a chain of segment files uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingScheme {
    /// `.E01` … `.E99`, `.EAA` … `.EZZ`, `.FAA` …
    Standard,
    /// `.s01` … `.s99`, `.sAA` …
    Smart,
    /// `.L01` …
    Logical,
    /// `.Ex01` …
    EwfX,
    /// `.d01` … — delta chain overlay, never mixed with the above.
    Delta,
}

impl NamingScheme {
    fn letter_prefix(self) -> &'static str {
        match self {
            NamingScheme::Standard => "E",
            NamingScheme::Smart => "s",
            NamingScheme::Logical => "L",
            NamingScheme::EwfX => "Ex",
            NamingScheme::Delta => "d",
        }
    }

    /// `glob` pattern (relative to the basename) that matches every segment
    /// in this chain, used for discovery of an existing image.
    fn glob_suffix(self) -> &'static str {
        match self {
            NamingScheme::EwfX => ".Ex??",
            _ => ".???",
        }
    }
}

/// Computes the 2-3 character extension suffix for 1-based segment index
/// `n` under `scheme`, per spec §6.2: numeric `01`..`99` first, then
/// alphabetic rollover `AA`..`ZZ` advancing the leading letter on overflow.
pub fn extension_for(scheme: NamingScheme, n: u64) -> EwfResult<String> {
    if n == 0 {
        return Err(EwfError::ArgumentOutOfRange(
            "segment numbers are 1-based".into(),
        ));
    }
    let prefix = scheme.letter_prefix();
    if n <= 99 {
        return Ok(format!("{prefix}{n:02}"));
    }

    // n = 100 maps to AA, 101 to AB, ... 125 to AZ, 126 to BA, ...
    let offset = n - 100;
    let max_pairs = 26u64 * 26;
    if offset >= max_pairs * 25 {
        // 25 leading letters (A..Y) before exhausting the scheme; Z is
        // reserved to signal overflow, matching libewf's documented cap.
        return Err(EwfError::ResourceExhausted(format!(
            "segment number {n} exceeds the {scheme:?} naming scheme's capacity"
        )));
    }
    let block = offset / max_pairs;
    let within_block = offset % max_pairs;
    let leading = (b'A' + block as u8) as char;
    let second = (b'A' + (within_block / 26) as u8) as char;
    let third = (b'A' + (within_block % 26) as u8) as char;

    match scheme {
        NamingScheme::EwfX => Ok(format!("Ex{leading}{second}{third}")),
        _ => {
            // Standard/Smart/Logical: single leading letter derived from
            // the chain prefix ("E".."Z" then "F".."Z" per spec), two
            // trailing letters.
            let base = prefix.chars().next().unwrap_or('E') as u8;
            let leading = (base + block as u8) as char;
            Ok(format!("{leading}{second}{third}"))
        }
    }
}

/// Builds the full segment path for `basename` (the path with its
/// extension stripped) at 1-based index `n`.
pub fn segment_path(basename: &Path, scheme: NamingScheme, n: u64) -> EwfResult<PathBuf> {
    let ext = extension_for(scheme, n)?;
    Ok(basename.with_extension(ext))
}

/// Strips a known segment extension (`.E01`, `.s01`, …) to recover the
/// basename a whole chain shares.
pub fn basename_of(path: &Path) -> EwfResult<PathBuf> {
    let filename = path
        .file_stem()
        .ok_or_else(|| EwfError::ArgumentInvalid("path has no file name".into()))?;
    Ok(path.with_file_name(filename))
}

/// Finds every file on disk belonging to the same chain as `path`,
/// sorted by segment order. Mirrors the teacher's `find_files`, generalized
/// to every naming scheme via a glob built from the basename.
pub fn find_chain_files(path: &Path, scheme: NamingScheme) -> EwfResult<Vec<PathBuf>> {
    let path = path
        .canonicalize()
        .map_err(|e| EwfError::io_read(e))?;
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| EwfError::ArgumentInvalid("invalid file name".into()))?;

    if filename.len() < 2 {
        return Err(EwfError::ArgumentInvalid("file name too short".into()));
    }

    let stem_len = filename.len() - scheme.glob_suffix().len().min(filename.len());
    let base = &filename[..stem_len.max(filename.len().saturating_sub(4))];
    let parent = path
        .parent()
        .ok_or_else(|| EwfError::ArgumentInvalid("no parent directory".into()))?;

    let mut pattern_path = PathBuf::from(parent);
    pattern_path.push(format!("{base}{}", scheme.glob_suffix()));
    let pattern = pattern_path
        .to_str()
        .ok_or_else(|| EwfError::ArgumentInvalid("invalid glob pattern".into()))?
        .to_string();

    let files = glob::glob(&pattern)
        .map_err(|e| EwfError::format_invalid(format!("invalid glob pattern: {e}")))?;
    let mut paths: Vec<PathBuf> = files.filter_map(Result::ok).collect();
    paths.sort();
    Ok(paths)
}
