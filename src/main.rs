use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use nda_compliance::{
    check_deps, detect_clauses, emit_report, enumerate_pdfs, extract_pages, has_extractable_text,
    install_help_for, load_policy, meta_fingerprint, normalize_pages, render_report, ClauseRegistry,
    DepsResult, DocumentIdentity, EnumerateError, ExtractError, ReportConfig,
};

// Exit codes: 1 no documents, 2 missing dependency, 3 invalid policy,
// 4 extraction failure, 5 document(s) blocked for no extractable text,
// 6 emit failure, 7 access denied.

/// Filesystem-safe doc id from a file stem: lowercase alphanumerics with
/// single dashes between runs.
fn slugify(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    let mut prev_dash = true; // swallows leading separators
    for ch in base.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "document".to_string()
    } else {
        out
    }
}

fn unique_slug(slug: String, used: &mut HashSet<String>) -> String {
    if used.insert(slug.clone()) {
        return slug;
    }
    let mut i = 1;
    loop {
        let candidate = format!("{}-{}", slug, i);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        i += 1;
    }
}

fn main() {
    // Simple CLI flags parsing
    let args: Vec<String> = std::env::args().collect();
    let allow_empty = args.iter().any(|a| a == "--allow-empty");
    let mut policy_path = String::from("policy.yaml");
    if let Some(pos) = args.iter().position(|a| a == "--policy") {
        if let Some(val) = args.get(pos + 1) {
            if !val.starts_with("--") {
                policy_path = val.clone();
            }
        }
    }
    let mut passphrase: Option<String> = None;
    if let Some(pos) = args.iter().position(|a| a == "--passphrase") {
        if let Some(val) = args.get(pos + 1) {
            if !val.starts_with("--") {
                passphrase = Some(val.clone());
            }
        }
    }
    if passphrase.is_none() {
        passphrase = std::env::var("NDACHECK_PASSPHRASE").ok();
    }
    let mut per_doc_dir_on = true; // default on
    if let Some(val) = args.iter().find(|a| a.starts_with("--per-doc-dir")) {
        if let Some(eqpos) = val.find('=') {
            per_doc_dir_on = &val[eqpos + 1..] != "off";
        }
    }

    // 1) Read and validate policy.yaml
    let policy = match load_policy(Path::new(&policy_path)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "load_policy",
                    "file": policy_path,
                    "error": e.to_string(),
                    "error_code": 3
                })
            );
            std::process::exit(3);
        }
    };

    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"load_policy",
            "file": policy_path,
            "status":"ok",
            "input_glob": policy.input_glob(),
            "output_dir": policy.output_dir()
        })
    );

    // 2) Access gate, before any document is touched
    let gated = policy
        .access
        .as_ref()
        .and_then(|a| a.passphrase_sha256.as_ref())
        .is_some();
    if !policy.grants_access(passphrase.as_deref()) {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"verify_access",
                "error":"AccessDenied",
                "error_code": 7
            })
        );
        std::process::exit(7);
    }
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"verify_access",
            "status":"ok",
            "gated": gated
        })
    );

    // 3) check_deps
    let deps: DepsResult = check_deps();
    if !deps.ok {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"check_deps",
                "missing": deps.missing,
                "error_code": 2
            })
        );
        let help = install_help_for(&deps.missing);
        if !help.is_empty() {
            eprintln!("{}", help);
        }
        std::process::exit(2);
    }
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"check_deps",
            "status":"ok",
            "missing": deps.missing
        })
    );

    // 4) enumerate_pdfs on the configured glob
    let files = match enumerate_pdfs(&policy.input_glob()) {
        Ok(files) => files,
        Err(EnumerateError::NoFilesFound { guidance }) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"enumerate_pdfs",
                    "error":"NoFilesFound",
                    "error_code": 1
                })
            );
            eprintln!("{}", guidance);
            std::process::exit(1);
        }
    };
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"enumerate_pdfs",
            "count": files.len()
        })
    );

    // Process each file: fingerprint -> extract -> no-text branch -> normalize
    // -> detect -> render -> emit
    let registry = ClauseRegistry::standard();
    let report_config = ReportConfig::default();
    let mut used_doc_ids: HashSet<String> = HashSet::new();
    let mut blocked = 0usize;

    for file in files {
        let fname = file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("document.pdf")
            .to_string();
        let doc_id = unique_slug(slugify(fname.trim_end_matches(".pdf")), &mut used_doc_ids);
        let base_output = policy.output_dir();
        let doc_outdir = if per_doc_dir_on {
            format!("{}/{}", base_output, doc_id)
        } else {
            base_output.clone()
        };

        // Fingerprint comes from the raw bytes, before extraction is attempted
        let bytes = match std::fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "tool":"read_document",
                        "file": file,
                        "error": e.to_string(),
                        "error_code": 4
                    })
                );
                std::process::exit(4);
            }
        };
        let identity = DocumentIdentity::from_bytes(&fname, &bytes);
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"identify_document",
                "file": file,
                "fingerprint": identity.fingerprint
            })
        );

        let pages = match extract_pages(&file) {
            Ok(pages) => pages,
            Err(err) => {
                let label = match err {
                    ExtractError::FileNotFound(_) => "FileNotFound",
                    ExtractError::EncryptedPdf(_) => "EncryptedPdf",
                    ExtractError::Malformed(_) => "Malformed",
                };
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "tool":"extract_pages",
                        "file": file,
                        "fingerprint": identity.fingerprint,
                        "error": label,
                        "error_code": 4
                    })
                );
                std::process::exit(4);
            }
        };
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"extract_pages",
                "file": file,
                "pages": pages.len()
            })
        );

        // Scanned-image documents with no text layer are blocked rather than
        // reported as all-missing; --allow-empty opts into the empty report.
        let textless = !has_extractable_text(&pages);
        if textless && !allow_empty {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"detect_clauses",
                    "file": file,
                    "fingerprint": identity.fingerprint,
                    "warning":"NoExtractableText",
                    "skipped": true
                })
            );
            blocked += 1;
            continue;
        }

        let normalized = normalize_pages(&pages);
        let results = detect_clauses(&normalized, registry);
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"detect_clauses",
                "file": file,
                "present": results.present_count(),
                "categories": registry.len(),
                "no_extractable_text": textless
            })
        );

        let generated_at = Utc::now();
        let report = render_report(&identity, &results, registry, generated_at, &report_config);

        let mut meta = serde_json::json!({
            "doc_id": doc_id,
            "document": {"name": identity.name, "fingerprint": identity.fingerprint},
            "engine": "poppler",
            "page_count": pages.len(),
            "no_extractable_text": textless,
            "clauses": results.clauses,
            "present_count": results.present_count(),
            "tool_version": report_config.tool_version,
            "generated_at": generated_at.to_rfc3339(),
        });
        let digest = meta_fingerprint(&meta);
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("meta_fingerprint".to_string(), serde_json::json!(digest));
        }

        match emit_report(&report, &meta, &doc_outdir, &doc_id) {
            Ok(paths) => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "tool":"emit_report",
                        "file": file,
                        "report_path": paths.report_path,
                        "meta_path": paths.meta_path
                    })
                );
            }
            Err(e) => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "tool":"emit_report",
                        "file": file,
                        "error": e.to_string(),
                        "error_code": 6
                    })
                );
                std::process::exit(6);
            }
        }
    }

    if blocked > 0 {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"summary",
                "blocked": blocked,
                "error_code": 5
            })
        );
        std::process::exit(5);
    }
}
