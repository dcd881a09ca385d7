use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use nda_compliance::{
    check_deps, enumerate_pdfs, extract_pages, install_help_for, EnumerateError, ExtractError,
};

fn fake_bin(dir: &std::path::Path, name: &str) {
    let bin = dir.join(name);
    fs::write(&bin, "#!/bin/sh\nexit 0\n").unwrap();
    let mut perms = fs::metadata(&bin).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&bin, perms).unwrap();
}

// Single test mutates PATH so parallel test threads cannot race on it.
#[test]
fn check_deps_tracks_path_contents() {
    let with = tempfile::tempdir().unwrap();
    fake_bin(with.path(), "pdftotext");
    let without = tempfile::tempdir().unwrap();

    std::env::set_var("PATH", without.path().display().to_string());
    let res = check_deps();
    assert!(!res.ok, "missing pdftotext should not be ok");
    assert!(res.missing.iter().any(|m| m == "pdftotext"));
    assert!(install_help_for(&res.missing).contains("poppler-utils"));

    std::env::set_var("PATH", with.path().display().to_string());
    let res = check_deps();
    assert!(res.ok, "pdftotext present should yield ok");
    // pdfinfo stays optional, so it only shows up in the missing list
    assert!(res.missing.iter().any(|m| m == "pdfinfo"));
}

#[test]
fn install_help_is_empty_without_poppler_gaps() {
    assert_eq!(install_help_for(&[]), "");
}

#[test]
fn enumerate_finds_nested_pdfs_sorted() {
    let td = tempfile::tempdir().unwrap();
    let inbox = td.path().join("inbox/acme");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(inbox.join("mutual-nda.pdf"), b"%PDF-1.4\n").unwrap();
    fs::write(inbox.join("addendum.pdf"), b"%PDF-1.4\n").unwrap();

    let pattern = format!("{}/inbox/**/*.pdf", td.path().display());
    let files = enumerate_pdfs(&pattern).expect("should find files");
    let names: Vec<String> = files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect();
    assert_eq!(names, ["addendum.pdf", "mutual-nda.pdf"]);
}

#[test]
fn enumerate_empty_is_an_error_with_guidance() {
    let td = tempfile::tempdir().unwrap();
    let pattern = format!("{}/inbox/**/*.pdf", td.path().display());
    let err = enumerate_pdfs(&pattern).err().expect("should be error");
    assert_eq!(err.to_string(), "NoFilesFound");
    let EnumerateError::NoFilesFound { guidance } = err;
    assert!(guidance.contains("inbox"));
}

#[test]
fn extract_missing_file_is_file_not_found() {
    let p = PathBuf::from("./this/does/not/exist.pdf");
    match extract_pages(&p) {
        Err(ExtractError::FileNotFound(_)) => {}
        other => panic!("expected FileNotFound, got {:?}", other),
    }
}
