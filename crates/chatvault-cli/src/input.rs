//! Locating the HTML export to ingest.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use console::{Term, style};

/// Resolve the input document.
///
/// An explicit argument is used as given when it exists, otherwise it is
/// looked up inside `html_dir`. Without an argument `html_dir` is scanned;
/// several candidates are offered as a numbered choice on `term`.
pub fn locate(arg: Option<&Path>, html_dir: &Path, term: &Term) -> Result<PathBuf> {
    match arg {
        Some(path) => resolve_explicit(path, html_dir),
        None => {
            let files = scan_html_dir(html_dir)?;
            match files.as_slice() {
                [] => bail!("No .html files found in {}", html_dir.display()),
                [only] => Ok(only.clone()),
                _ => choose(&files, term),
            }
        }
    }
}

fn resolve_explicit(path: &Path, html_dir: &Path) -> Result<PathBuf> {
    if !is_html(path) {
        bail!("{} is not an .html file", path.display());
    }
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let in_dir = html_dir.join(path);
    if in_dir.is_file() {
        return Ok(in_dir);
    }
    bail!(
        "{} not found (also looked in {})",
        path.display(),
        html_dir.display()
    )
}

/// `.html` files directly inside `dir`, sorted by name.
pub fn scan_html_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("HTML directory {} does not exist", dir.display());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_html(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
}

fn choose(files: &[PathBuf], term: &Term) -> Result<PathBuf> {
    term.write_line(&format!("{}", style("Available exports:").bold()))?;
    for (index, file) in files.iter().enumerate() {
        let name = file
            .file_name()
            .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
        term.write_line(&format!("  {} {name}", style(format!("{}.", index + 1)).cyan()))?;
    }

    loop {
        term.write_str(&format!("Choose a file [1-{}]: ", files.len()))?;
        let answer = term.read_line()?;
        match parse_choice(&answer, files.len()) {
            Some(index) => return Ok(files[index].clone()),
            None => term.write_line(&format!("{}", style("Invalid choice").red()))?,
        }
    }
}

/// One-based answer to a zero-based index.
fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    let number: usize = answer.trim().parse().ok()?;
    (1..=count).contains(&number).then(|| number - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_must_be_html() {
        let dir = tempfile::tempdir().expect("tempdir");
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "x").expect("write");
        assert!(resolve_explicit(&txt, dir.path()).is_err());
    }

    #[test]
    fn explicit_name_is_found_in_html_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let export = dir.path().join("export.html");
        std::fs::write(&export, "<table></table>").expect("write");

        let resolved = resolve_explicit(Path::new("export.html"), dir.path()).expect("resolve");
        assert_eq!(resolved, export);
        assert!(resolve_explicit(Path::new("missing.html"), dir.path()).is_err());
    }

    #[test]
    fn scan_keeps_only_html_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.html", "a.HTML", "c.htm", "d.txt"] {
            std::fs::write(dir.path().join(name), "").expect("write");
        }
        std::fs::create_dir(dir.path().join("nested.html")).expect("mkdir");

        let files = scan_html_dir(dir.path()).expect("scan");
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.HTML", "b.html"]);
    }

    #[test]
    fn single_candidate_needs_no_prompt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let export = dir.path().join("only.html");
        std::fs::write(&export, "").expect("write");
        let located = locate(None, dir.path(), &Term::stdout()).expect("locate");
        assert_eq!(located, export);
    }

    #[test]
    fn empty_dir_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(locate(None, dir.path(), &Term::stdout()).is_err());
    }

    #[test]
    fn choice_parsing() {
        assert_eq!(parse_choice("2\n", 3), Some(1));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("x", 3), None);
    }
}
