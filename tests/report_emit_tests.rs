use std::collections::BTreeMap;
use std::fs;

use chrono::{DateTime, TimeZone, Utc};
use nda_compliance::{
    detect_clauses, emit_report, meta_fingerprint, render_report, ClauseRegistry, DetectionResult,
    DocumentIdentity, ReportConfig,
};
use serde_json::json;

fn fixed_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
}

#[test]
fn clause_lines_follow_registry_order() {
    let registry = ClauseRegistry::standard();
    let identity = DocumentIdentity::from_bytes("acme-nda.pdf", b"acme");
    let results = detect_clauses("confidential information, governing law of delaware", registry);
    let report = render_report(
        &identity,
        &results,
        registry,
        fixed_timestamp(),
        &ReportConfig::default(),
    );

    let positions: Vec<usize> = registry
        .names()
        .map(|name| report.find(&format!("{}:", name)).expect("clause line present"))
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted, "clause lines out of registry order");

    assert!(report.contains("Confidentiality: PRESENT"));
    assert!(report.contains("Non-Compete: MISSING"));
    assert!(report.contains("Governing Law: PRESENT"));
    assert!(report.contains("Clauses found: 2 of 5"));
    assert!(report.contains("Document: acme-nda.pdf"));
    assert!(report.contains(&format!("Fingerprint: {}", identity.fingerprint)));
    assert!(report.contains("Generated: 2026-08-07 12:00:00 UTC"));
}

#[test]
fn report_ignores_result_construction_order() {
    let registry = ClauseRegistry::standard();
    let identity = DocumentIdentity::from_bytes("acme-nda.pdf", b"acme");
    let names: Vec<&str> = registry.names().collect();

    let mut forward = BTreeMap::new();
    for name in &names {
        forward.insert(name.to_string(), true);
    }
    let mut reverse = BTreeMap::new();
    for name in names.iter().rev() {
        reverse.insert(name.to_string(), true);
    }

    let ts = fixed_timestamp();
    let config = ReportConfig::default();
    let a = render_report(
        &identity,
        &DetectionResult { clauses: forward },
        registry,
        ts,
        &config,
    );
    let b = render_report(
        &identity,
        &DetectionResult { clauses: reverse },
        registry,
        ts,
        &config,
    );
    assert_eq!(a, b);
}

#[test]
fn identical_inputs_render_byte_identical_reports() {
    let registry = ClauseRegistry::standard();
    let identity = DocumentIdentity::from_bytes("acme-nda.pdf", b"acme");
    let results = detect_clauses("trade secret", registry);
    let ts = fixed_timestamp();
    let config = ReportConfig::default();

    let first = render_report(&identity, &results, registry, ts, &config);
    let second = render_report(&identity, &results, registry, ts, &config);
    assert_eq!(first, second);
}

#[test]
fn emit_writes_report_and_sidecar() {
    let registry = ClauseRegistry::standard();
    let identity = DocumentIdentity::from_bytes("acme-nda.pdf", b"acme");
    let results = detect_clauses("confidential", registry);
    let report = render_report(
        &identity,
        &results,
        registry,
        fixed_timestamp(),
        &ReportConfig::default(),
    );

    let meta = json!({
        "doc_id": "acme-nda",
        "document": {"name": identity.name, "fingerprint": identity.fingerprint},
        "clauses": results.clauses,
        "generated_at": fixed_timestamp().to_rfc3339(),
        "meta_fingerprint": meta_fingerprint(&json!({"doc_id": "acme-nda"})),
    });

    let td = tempfile::tempdir().unwrap();
    let outdir = td.path().join("reports");
    let paths =
        emit_report(&report, &meta, outdir.to_str().unwrap(), "acme-nda").expect("emit ok");

    let written_report = fs::read_to_string(paths.report_path).unwrap();
    assert_eq!(written_report, report);

    let written_meta = fs::read_to_string(paths.meta_path).unwrap();
    assert!(written_meta.contains("\"doc_id\""));
    assert!(written_meta.contains(&identity.fingerprint));
    assert!(written_meta.contains("meta_fingerprint"));
}

#[test]
fn meta_fingerprint_ignores_volatile_fields() {
    let a = json!({"doc_id": "x", "present_count": 2, "generated_at": "2026-08-07T12:00:00Z"});
    let b = json!({"doc_id": "x", "present_count": 2, "generated_at": "2027-01-01T00:00:00Z"});
    assert_eq!(meta_fingerprint(&a), meta_fingerprint(&b));

    let c = json!({"doc_id": "y", "present_count": 2, "generated_at": "2026-08-07T12:00:00Z"});
    assert_ne!(meta_fingerprint(&a), meta_fingerprint(&c));
}
