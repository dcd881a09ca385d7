use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use globwalk::GlobWalkerBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepsResult {
    pub ok: bool,
    pub missing: Vec<String>,
}

/// Check Poppler CLI dependencies.
/// - Required: pdftotext
/// - Optional: pdfinfo (page-accurate extraction)
/// Returns a DepsResult. `ok` is true iff required deps are present.
pub fn check_deps() -> DepsResult {
    let mut missing = Vec::new();

    // required
    let has_pdftotext = which::which("pdftotext").is_ok();
    if !has_pdftotext {
        missing.push("pdftotext".to_string());
    }

    // optional
    if which::which("pdfinfo").is_err() {
        missing.push("pdfinfo".to_string());
    }

    DepsResult { ok: has_pdftotext, missing }
}

/// Render installation help for missing deps.
pub fn install_help_for(missing: &[String]) -> String {
    if missing.iter().any(|m| m == "pdftotext" || m == "pdfinfo") {
        "Dependency missing. Install via apt:\n  sudo apt install poppler-utils".to_string()
    } else {
        String::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub datasources: Option<Vec<PolicyDatasource>>,
    #[serde(default)]
    pub outputs: Option<PolicyOutputs>,
    #[serde(default)]
    pub access: Option<PolicyAccess>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDatasource {
    pub name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutputs {
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAccess {
    pub passphrase_sha256: Option<String>,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy.yaml: {0}")]
    Read(String),
    #[error("Failed to parse policy.yaml: {0}")]
    Parse(String),
    #[error("Invalid policy: {0}")]
    Invalid(String),
}

/// Minimal validation for policy.yaml: an id, a datasource glob, an output dir.
pub fn load_policy(path: &Path) -> Result<Policy, PolicyError> {
    let raw = std::fs::read_to_string(path).map_err(|e| PolicyError::Read(e.to_string()))?;
    let policy: Policy = serde_yaml::from_str(&raw).map_err(|e| PolicyError::Parse(e.to_string()))?;

    if policy.id.trim().is_empty() {
        return Err(PolicyError::Invalid("missing id".into()));
    }
    let has_glob = policy
        .datasources
        .as_ref()
        .and_then(|ds| ds.first())
        .and_then(|d| d.path.clone())
        .is_some();
    let has_out_dir = policy.outputs.as_ref().and_then(|o| o.dir.clone()).is_some();
    if !has_glob || !has_out_dir {
        return Err(PolicyError::Invalid("missing datasources.path or outputs.dir".into()));
    }

    Ok(policy)
}

impl Policy {
    pub fn input_glob(&self) -> String {
        self.datasources
            .as_ref()
            .and_then(|d| d.first())
            .and_then(|d| d.path.clone())
            .unwrap_or_else(|| "./inbox/**/*.pdf".to_string())
    }

    pub fn output_dir(&self) -> String {
        self.outputs
            .as_ref()
            .and_then(|o| o.dir.clone())
            .unwrap_or_else(|| "./reports".to_string())
    }

    /// Capability check gating a run. A policy without a configured digest is
    /// open; a gated policy requires a passphrase hashing to the stored value.
    /// Checked once per invocation, before any document is touched.
    pub fn grants_access(&self, passphrase: Option<&str>) -> bool {
        match self.access.as_ref().and_then(|a| a.passphrase_sha256.as_deref()) {
            None => true,
            Some(want) => passphrase
                .map(|p| sha256_hex(p.as_bytes()).eq_ignore_ascii_case(want))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("NoFilesFound")]
    NoFilesFound { guidance: String },
}

/// Enumerate candidate documents using a glob pattern (e.g., "./inbox/**/*.pdf").
/// Returns a sorted list of paths.
pub fn enumerate_pdfs(glob_pattern: &str) -> Result<Vec<PathBuf>, EnumerateError> {
    let root = if Path::new(glob_pattern).is_absolute() { "/" } else { "." };
    let mut pat = glob_pattern.to_string();
    if pat.starts_with("./") {
        pat = pat.trim_start_matches("./").to_string();
    }
    let mut paths: Vec<PathBuf> = GlobWalkerBuilder::from_patterns(root, &[pat.as_str()])
        .case_insensitive(false)
        .follow_links(false)
        .max_depth(std::usize::MAX)
        .build()
        .map_err(|_| EnumerateError::NoFilesFound { guidance: folder_guidance() })?
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .collect();

    paths.sort();
    paths.retain(|p| p.is_file());

    if paths.is_empty() {
        return Err(EnumerateError::NoFilesFound { guidance: folder_guidance() });
    }

    Ok(paths)
}

fn folder_guidance() -> String {
    let guide = r#"No PDF matched the pattern ./inbox/**/*.pdf
Suggested layout:
  ./inbox/<counterparty>/...
Example: place uploaded agreements at ./inbox/acme/mutual-nda.pdf"#;
    guide.to_string()
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("FileNotFound: {0}")]
    FileNotFound(String),
    #[error("EncryptedPdf: {0}")]
    EncryptedPdf(String),
    #[error("Malformed: {0}")]
    Malformed(String),
}

/// Page count via pdfinfo when available. Encrypted documents surface as an
/// error; any other pdfinfo problem falls back to None.
fn probe_page_count(path: &Path) -> Result<Option<usize>, ExtractError> {
    if which::which("pdfinfo").is_err() {
        return Ok(None);
    }
    let out = match Command::new("pdfinfo").arg(path).output() {
        Ok(out) => out,
        Err(_) => return Ok(None),
    };
    if !out.status.success() {
        let err = String::from_utf8_lossy(&out.stderr).to_lowercase();
        if err.contains("encrypt") || err.contains("password") {
            return Err(ExtractError::EncryptedPdf(path.display().to_string()));
        }
        return Ok(None);
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    Ok(stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse::<usize>().ok()))
}

fn run_pdftotext(path: &Path, page: Option<usize>) -> Result<String, ExtractError> {
    let mut cmd = Command::new("pdftotext");
    cmd.arg("-q");
    if let Some(n) = page {
        cmd.arg("-nopgbrk");
        cmd.arg("-f").arg(n.to_string());
        cmd.arg("-l").arg(n.to_string());
    }
    cmd.arg(path);
    cmd.arg("-"); // write to stdout

    let out = cmd.output().map_err(|e| ExtractError::Malformed(e.to_string()))?;
    if !out.status.success() {
        let err = String::from_utf8_lossy(&out.stderr).to_lowercase();
        if err.contains("encrypt") || err.contains("password") {
            return Err(ExtractError::EncryptedPdf(path.display().to_string()));
        }
        return Err(ExtractError::Malformed(match page {
            Some(n) => format!("pdftotext failed on page {}", n),
            None => "pdftotext failed".to_string(),
        }));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Extract per-page text using Poppler's pdftotext.
/// Runs one pass per page when pdfinfo can report a page count, otherwise a
/// single pass split on form feeds. Pages without a text layer (scanned
/// images) come back as empty strings, not as errors.
pub fn extract_pages(path: &Path) -> Result<Vec<String>, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::FileNotFound(path.display().to_string()));
    }

    match probe_page_count(path)? {
        Some(n_pages) => (1..=n_pages).map(|i| run_pdftotext(path, Some(i))).collect(),
        None => {
            let text = run_pdftotext(path, None)?;
            let mut pages: Vec<String> = text.split('\u{000C}').map(str::to_string).collect();
            // drop trailing empty page if any
            while matches!(pages.last(), Some(last) if last.trim().is_empty()) {
                pages.pop();
            }
            Ok(pages)
        }
    }
}

/// Characters of the sha256 digest kept as the document fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentIdentity {
    pub name: String,
    pub fingerprint: String,
}

impl DocumentIdentity {
    /// Identify a document by display name plus a truncated digest of its raw
    /// bytes. Computed before extraction is attempted, so documents that fail
    /// to decode are still addressable in logs.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Self {
        let mut fingerprint = sha256_hex(bytes);
        fingerprint.truncate(FINGERPRINT_LEN);
        DocumentIdentity { name: name.to_string(), fingerprint }
    }
}

/// Fold extracted pages into a single lowercase haystack. Pages keep their
/// order and are separated by a line break; empty pages contribute nothing
/// but do not block matching on their neighbours.
pub fn normalize_pages(pages: &[String]) -> String {
    pages.join("\n").to_lowercase()
}

/// True when at least one page carries a non-whitespace character. An
/// all-empty extraction is a distinct outcome the caller must surface, not an
/// all-clauses-missing verdict.
pub fn has_extractable_text(pages: &[String]) -> bool {
    pages.iter().any(|p| p.chars().any(|c| !c.is_whitespace()))
}

/// One clause category: a display name and the patterns that signal it.
#[derive(Debug)]
pub struct ClauseRule {
    name: &'static str,
    patterns: Vec<Regex>,
}

impl ClauseRule {
    fn new(name: &'static str, patterns: &[&str]) -> Self {
        let patterns = patterns.iter().map(|p| Regex::new(p).unwrap()).collect();
        ClauseRule { name, patterns }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, haystack: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(haystack))
    }
}

/// Ordered, immutable table of the clause categories screened for. Order here
/// is report order.
#[derive(Debug)]
pub struct ClauseRegistry {
    rules: Vec<ClauseRule>,
}

// Patterns run against normalize_pages output, so they are written lowercase.
static STANDARD_REGISTRY: Lazy<ClauseRegistry> = Lazy::new(|| ClauseRegistry {
    rules: vec![
        ClauseRule::new(
            "Confidentiality",
            &["confidential", "non.?disclosure", "trade secret"],
        ),
        ClauseRule::new("Non-Compete", &["non.compete", "restraint.*trade"]),
        ClauseRule::new("Governing Law", &["governing law", "jurisdiction"]),
        ClauseRule::new("Injunctive Relief", &["injunctive relief", "irreparable harm"]),
        ClauseRule::new("Attorney Fees", &["attorney.*fees", "legal.*costs"]),
    ],
});

impl ClauseRegistry {
    /// The five-category standard registry, compiled once per process.
    pub fn standard() -> &'static ClauseRegistry {
        &STANDARD_REGISTRY
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|r| r.name())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Presence verdict per clause category. Keys are exactly the registry's
/// category names, no more, no fewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionResult {
    pub clauses: BTreeMap<String, bool>,
}

impl DetectionResult {
    pub fn is_present(&self, category: &str) -> bool {
        self.clauses.get(category).copied().unwrap_or(false)
    }

    pub fn present_count(&self) -> usize {
        self.clauses.values().filter(|present| **present).count()
    }
}

/// Screen normalized text against every category in the registry. Unanchored
/// search; a category is present when any of its patterns hits. Total over
/// any input: empty text yields all-absent.
pub fn detect_clauses(normalized: &str, registry: &ClauseRegistry) -> DetectionResult {
    let clauses = registry
        .rules
        .iter()
        .map(|rule| (rule.name().to_string(), rule.matches(normalized)))
        .collect();
    DetectionResult { clauses }
}

/// Accuracy disclosure included in every report.
pub const ACCURACY_DISCLOSURE: &str = "\
This screening relies on keyword and pattern matching against the extracted \
document text. It has not been validated against a labeled agreement corpus \
and reports only whether common boilerplate language appears; it does not \
assess the wording, scope, or enforceability of any clause.";

/// Safeguards block closing every report.
pub const LEGAL_SAFEGUARDS: &str = "\
This report is generated automatically and is not legal advice; no \
attorney-client relationship arises from its use. Liability in connection \
with this tool is capped at the amount paid for access. Any dispute about \
the tool is settled by binding individual arbitration. Have qualified \
counsel review every agreement before signing.";

/// Static text blocks and version string stamped into every report.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub tool_version: String,
    pub disclosure: String,
    pub safeguards: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            tool_version: format!("nda-compliance v{}", env!("CARGO_PKG_VERSION")),
            disclosure: ACCURACY_DISCLOSURE.to_string(),
            safeguards: LEGAL_SAFEGUARDS.to_string(),
        }
    }
}

/// Assemble the plaintext compliance report. Clause lines follow registry
/// order, never result insertion order; identical inputs render byte-identical
/// output.
pub fn render_report(
    identity: &DocumentIdentity,
    results: &DetectionResult,
    registry: &ClauseRegistry,
    generated_at: DateTime<Utc>,
    config: &ReportConfig,
) -> String {
    let rule = "=".repeat(44);
    let mut out = String::new();
    out.push_str(&rule);
    out.push('\n');
    out.push_str("NDA COMPLIANCE REPORT\n");
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!("Tool: {}\n", config.tool_version));
    out.push_str(&format!("Document: {}\n", identity.name));
    out.push_str(&format!("Fingerprint: {}\n", identity.fingerprint));
    out.push_str(&format!(
        "Generated: {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push('\n');
    out.push_str("[Accuracy Disclosure]\n");
    out.push_str(&config.disclosure);
    out.push_str("\n\n");
    out.push_str("[Clause Check]\n");
    for name in registry.names() {
        let verdict = if results.is_present(name) { "PRESENT" } else { "MISSING" };
        out.push_str(&format!("{}: {}\n", name, verdict));
    }
    out.push('\n');
    out.push_str(&format!(
        "Clauses found: {} of {}\n",
        results.present_count(),
        registry.len()
    ));
    out.push('\n');
    out.push_str("[Legal Safeguards]\n");
    out.push_str(&config.safeguards);
    out.push('\n');
    out
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("WriteFailed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitPaths {
    pub report_path: String,
    pub meta_path: String,
}

/// Atomically write the report and its audit sidecar into outdir with the
/// doc_id stem.
pub fn emit_report(
    report: &str,
    meta: &serde_json::Value,
    outdir: &str,
    doc_id: &str,
) -> Result<EmitPaths, EmitError> {
    std::fs::create_dir_all(outdir).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    let report_path = Path::new(outdir).join(format!("{}.report.txt", doc_id));
    let meta_path = Path::new(outdir).join(format!("{}.meta.json", doc_id));

    // Write temp files then rename
    let pid = std::process::id();
    let report_tmp = report_path.with_extension(format!("txt.tmp.{}", pid));
    let meta_tmp = meta_path.with_extension(format!("json.tmp.{}", pid));

    std::fs::write(&report_tmp, report).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    let meta_bytes =
        serde_json::to_vec_pretty(meta).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    std::fs::write(&meta_tmp, meta_bytes).map_err(|e| EmitError::WriteFailed(e.to_string()))?;

    std::fs::rename(&report_tmp, &report_path)
        .map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    std::fs::rename(&meta_tmp, &meta_path).map_err(|e| EmitError::WriteFailed(e.to_string()))?;

    Ok(EmitPaths {
        report_path: report_path.to_string_lossy().to_string(),
        meta_path: meta_path.to_string_lossy().to_string(),
    })
}

/// Digest of the audit sidecar with volatile fields removed, so reruns over
/// identical content produce an identical trail entry.
pub fn meta_fingerprint(meta: &serde_json::Value) -> String {
    let mut normalized = meta.clone();
    if let Some(obj) = normalized.as_object_mut() {
        obj.remove("generated_at");
        obj.remove("meta_fingerprint");
    }
    let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
    sha256_hex(&bytes)
}

// Utility to compute sha256 hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    out.iter().map(|b| format!("{:02x}", b)).collect()
}
