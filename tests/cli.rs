//! CLI integration tests: drive the `docrag` binary against a temporary
//! database.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docrag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();

    fs::write(
        files_dir.join("handbook.txt"),
        "Refund policy. Customers may request a refund within thirty days of purchase.\n\n\
         Shipping. Orders ship within two business days and shipping is free over fifty dollars.\n\n\
         Warranty. Hardware carries a one year warranty against manufacturing defects.",
    )
    .unwrap();
    fs::write(files_dir.join("photo.png"), [0x89u8, b'P', b'N', b'G', 0, 1, 2, 3]).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/docrag.sqlite"

[chunking]
chunk_size = 120
overlap = 30

[retrieval]
max_chunks = 2
max_chars = 1000
"#,
        root.display()
    );
    let config_path = root.join("config").join("docrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn file_arg(tmp: &TempDir, name: &str) -> String {
    tmp.path().join("files").join(name).display().to_string()
}

/// Document id from `docrag ingest` output.
fn document_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("document: "))
        .unwrap_or_else(|| panic!("no document id in output: {}", stdout))
        .to_string()
}

fn ingest(tmp: &TempDir, config_path: &Path, name: &str, conversation: &str) -> String {
    let file = file_arg(tmp, name);
    let (stdout, stderr, success) =
        run_docrag(config_path, &["ingest", &file, "--conversation", conversation]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status: chunked"));
    assert!(stdout.contains("ok"));
    document_id(&stdout)
}

/// Minimal valid PDF containing the text "pdf test phrase".
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 43 >> stream\nBT /F1 12 Tf 100 700 Td (pdf test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docrag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_docrag(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docrag(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_ingest_status_and_chunks() {
    let (tmp, config_path) = setup_test_env();
    let id = ingest(&tmp, &config_path, "handbook.txt", "support");

    let (stdout, _, success) = run_docrag(&config_path, &["status", &id, "--json"]);
    assert!(success);
    let doc: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(doc["status"], "chunked");
    assert_eq!(doc["conversation_id"], "support");
    assert_eq!(doc["filename"], "handbook.txt");
    assert!(doc["chunk_count"].as_u64().unwrap() >= 2);

    let (stdout, _, success) = run_docrag(&config_path, &["chunks", &id, "--json"]);
    assert!(success);
    let chunks: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(chunks.len() as u64, doc["chunk_count"].as_u64().unwrap());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk["ordinal"].as_u64().unwrap(), i as u64);
        assert_eq!(chunk["document_id"], id.as_str());
    }

    let (stdout, _, success) = run_docrag(&config_path, &["documents", "--conversation", "support"]);
    assert!(success);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("handbook.txt"));
}

#[test]
fn test_query_rag_uses_context() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path, "handbook.txt", "support");

    let (stdout, stderr, success) = run_docrag(
        &config_path,
        &["query", "Can I get a refund?", "--conversation", "support"],
    );
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("--- Context"));
    assert!(stdout.contains("CONTEXT:\n[1]"));
    assert!(stdout.contains("refund within thirty days"));
    assert!(stdout.contains("QUESTION:\nCan I get a refund?"));

    let (stdout, _, success) = run_docrag(
        &config_path,
        &["query", "Can I get a refund?", "--conversation", "support", "--json"],
    );
    assert!(success);
    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let used = answer["used_chunk_ids"].as_array().unwrap();
    assert!(!used.is_empty() && used.len() <= 2);
}

#[test]
fn test_query_open_mode_and_other_conversation() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path, "handbook.txt", "support");

    let (stdout, _, success) = run_docrag(
        &config_path,
        &["query", "refund?", "--conversation", "support", "--mode", "open"],
    );
    assert!(success);
    assert!(stdout.contains("No context."));
    assert!(!stdout.contains("CONTEXT:"));

    let (stdout, _, success) = run_docrag(
        &config_path,
        &["query", "refund?", "--conversation", "elsewhere"],
    );
    assert!(success);
    assert!(stdout.contains("No context."));

    let (_, stderr, success) = run_docrag(
        &config_path,
        &["query", "refund?", "--conversation", "support", "--mode", "bogus"],
    );
    assert!(!success);
    assert!(stderr.contains("mode must be"));
}

#[test]
fn test_query_with_history_file() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path, "handbook.txt", "support");

    let history = tmp.path().join("history.json");
    fs::write(
        &history,
        r#"[{"role": "user", "content": "I ordered a lamp."},
            {"role": "assistant", "content": "How can I help with the lamp?"}]"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_docrag(
        &config_path,
        &[
            "query",
            "Does the warranty cover it?",
            "--conversation",
            "support",
            "--history",
            history.to_str().unwrap(),
        ],
    );
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("user: I ordered a lamp."));
    assert!(stdout.contains("assistant: How can I help with the lamp?"));
}

#[test]
fn test_unsupported_file_marks_failed() {
    let (tmp, config_path) = setup_test_env();
    let file = file_arg(&tmp, "photo.png");

    let (_, stderr, success) = run_docrag(
        &config_path,
        &["ingest", &file, "--conversation", "support", "--media-type", "image/png"],
    );
    assert!(!success);
    assert!(stderr.contains("unsupported format"));

    let (stdout, _, success) = run_docrag(&config_path, &["documents", "--conversation", "support"]);
    assert!(success);
    assert!(stdout.contains("failed"));
    assert!(stdout.contains("photo.png"));
}

#[test]
fn test_unknown_extension_needs_media_type() {
    let (tmp, config_path) = setup_test_env();
    let file = file_arg(&tmp, "photo.png");

    let (_, stderr, success) =
        run_docrag(&config_path, &["ingest", &file, "--conversation", "support"]);
    assert!(!success);
    assert!(stderr.contains("--media-type"));
}

#[test]
fn test_ingest_pdf_and_docx() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("files").join("sample.pdf"), minimal_pdf_with_phrase()).unwrap();
    fs::write(
        tmp.path().join("files").join("sample.docx"),
        minimal_docx_with_text("office test phrase about invoices"),
    )
    .unwrap();

    let pdf_id = ingest(&tmp, &config_path, "sample.pdf", "formats");
    let (stdout, _, success) = run_docrag(&config_path, &["chunks", &pdf_id]);
    assert!(success);
    assert!(stdout.contains("pdf test phrase"));

    let docx_id = ingest(&tmp, &config_path, "sample.docx", "formats");
    let (stdout, _, success) = run_docrag(&config_path, &["status", &docx_id]);
    assert!(success);
    assert!(stdout.contains("wordprocessingml"));

    let (stdout, _, success) = run_docrag(
        &config_path,
        &["query", "invoices", "--conversation", "formats"],
    );
    assert!(success);
    assert!(stdout.contains("office test phrase about invoices"));
}

#[test]
fn test_delete_document_and_conversation() {
    let (tmp, config_path) = setup_test_env();
    let first = ingest(&tmp, &config_path, "handbook.txt", "support");
    let second = ingest(&tmp, &config_path, "handbook.txt", "support");

    let (stdout, _, success) = run_docrag(&config_path, &["delete-document", &first]);
    assert!(success);
    assert!(stdout.contains("deleted document"));

    let (_, stderr, success) = run_docrag(&config_path, &["status", &first]);
    assert!(!success);
    assert!(stderr.contains("document not found"));

    let (stdout, _, success) =
        run_docrag(&config_path, &["delete-conversation", "--conversation", "support"]);
    assert!(success);
    assert!(stdout.contains("deleted 1 document(s)"));

    let (_, _, success) = run_docrag(&config_path, &["status", &second]);
    assert!(!success);
}

#[test]
fn test_chunk_preview_writes_nothing() {
    let (tmp, config_path) = setup_test_env();
    let file = file_arg(&tmp, "handbook.txt");

    let (stdout, stderr, success) = run_docrag(&config_path, &["chunk", &file]);
    assert!(success, "chunk failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("[0] 0.."));
    assert!(!tmp.path().join("data").join("docrag.sqlite").exists());
}
