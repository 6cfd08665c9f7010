use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::foundation::error::{WeaveError, WeaveResult};

/// List the files matched by an image-sequence pattern such as `frames/shot_*.png`.
///
/// Wildcards (`*`, `?`) are honored in the file-name component only. Matches are returned in
/// natural order so `frame2.png` sorts before `frame10.png`.
pub fn list_sequence(pattern: &str, base_dir: &Path) -> WeaveResult<Vec<PathBuf>> {
    let full = {
        let p = super::expand_tilde(pattern);
        if p.is_absolute() { p } else { base_dir.join(p) }
    };
    let name = full
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| WeaveError::resource(None, format!("invalid sequence pattern '{pattern}'")))?
        .to_owned();
    let dir = full
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let entries = std::fs::read_dir(&dir).map_err(|e| {
        WeaveError::resource(
            None,
            format!("cannot read sequence directory '{}': {e}", dir.display()),
        )
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            WeaveError::resource(None, format!("cannot list '{}': {e}", dir.display()))
        })?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(file) = entry.file_name().to_str()
            && wildcard_match(&name, file)
        {
            names.push(file.to_owned());
        }
    }

    if names.is_empty() {
        return Err(WeaveError::resource(
            None,
            format!("no files match sequence pattern '{}'", full.display()),
        ));
    }
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Compare strings treating embedded digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let na = take_digits(&mut a);
                let nb = take_digits(&mut b);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = it.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        out.push(c);
        it.next();
    }
    out
}
