//! Repository Analyzer - best-effort scan of a public GitHub repository
//!
//! Fetches the repo tree, samples up to 30 source files and guesses which
//! ones perform document-database operations by substring and regex
//! matching over their raw contents. This is a heuristic hint, not static
//! analysis: matches in comments or strings count too, and that is fine
//! for the teaching diagram it feeds. Per-file fetch failures are
//! swallowed (the file is simply excluded); URL and top-level fetch
//! failures propagate to the caller.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ServerError;

/// Fan-out cap: how many files are fetched and scanned per repository
pub const MAX_ANALYZED_FILES: usize = 30;

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_RAW_BASE: &str = "https://raw.githubusercontent.com";

lazy_static! {
    static ref REPO_URL_RE: Regex =
        Regex::new(r"github\.com/([^/\s]+)/([^/\s?#]+)").unwrap();
    static ref SOURCE_FILE_RE: Regex =
        Regex::new(r"\.(js|ts|jsx|tsx|py|go|rb|php|java|cs)$").unwrap();
    static ref COLLECTION_RE: Regex = Regex::new(
        r#"(?:db\.collection|mongoose\.model|collection)\(['"]([^'"]+)['"]"#
    )
    .unwrap();
}

/// One analyzed file that showed database activity
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub name: String,
    pub path: String,
    #[serde(rename = "mongoOperations")]
    pub operations: Vec<String>,
}

/// Per-category counts: each file counts at most once per category
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationCounts {
    pub inserts: u64,
    pub finds: u64,
    pub updates: u64,
    pub deletes: u64,
    pub aggregates: u64,
}

/// One node of the synthesized 3-4 node flow diagram
#[derive(Debug, Clone, Serialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub operations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub files: Vec<FileReport>,
    pub total_files: u64,
    pub mongo_files: u64,
    pub operations: OperationCounts,
    pub collections: Vec<String>,
    pub flow_diagram: Vec<FlowNode>,
}

/// What one fetched file contributed
struct FileScan {
    report: Option<FileReport>,
    collections: Vec<String>,
}

pub struct RepoAnalyzer {
    agent: ureq::Agent,
    api_base: String,
    raw_base: String,
    token: Option<String>,
}

impl RepoAnalyzer {
    pub fn new(token: Option<String>) -> Self {
        Self::with_bases(GITHUB_API_BASE, GITHUB_RAW_BASE, token)
    }

    /// Explicit endpoints, used by tests to point at a mock server
    pub fn with_bases(api_base: &str, raw_base: &str, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build();
        RepoAnalyzer {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            raw_base: raw_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Analyze a repository URL of the form `github.com/{owner}/{repo}`
    pub fn analyze(&self, url: &str) -> Result<AnalysisResult, ServerError> {
        let (owner, repo) = parse_repo_url(url)?;
        debug!(owner = %owner, repo = %repo, "analyzing repository");

        // Repository info gives us the default branch
        let repo_info = self.get_json(&format!("{}/repos/{}/{}", self.api_base, owner, repo))?;
        let branch = repo_info["default_branch"]
            .as_str()
            .unwrap_or("main")
            .to_string();

        // Recursive tree listing
        let tree = self.get_json(&format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, owner, repo, branch
        ))?;
        let blobs: Vec<String> = tree["tree"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e["type"] == Value::String("blob".to_string()))
                    .filter_map(|e| e["path"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let total_files = blobs.len() as u64;
        let sample: Vec<String> = blobs
            .iter()
            .filter(|path| SOURCE_FILE_RE.is_match(path))
            .take(MAX_ANALYZED_FILES)
            .cloned()
            .collect();

        // Bounded parallel fetch: one scoped thread per sampled file (at
        // most MAX_ANALYZED_FILES), each failure isolated to its own file
        let mut scans: Vec<FileScan> = Vec::with_capacity(sample.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = sample
                .iter()
                .map(|path| {
                    let path = path.as_str();
                    let owner = owner.as_str();
                    let repo = repo.as_str();
                    let branch = branch.as_str();
                    scope.spawn(move || self.scan_file(owner, repo, branch, path))
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(Some(scan)) => scans.push(scan),
                    Ok(None) => {}
                    Err(_) => warn!("file scan thread panicked; file skipped"),
                }
            }
        });

        let mut files = Vec::new();
        let mut operations = OperationCounts::default();
        let mut collections: Vec<String> = Vec::new();
        for scan in scans {
            for name in scan.collections {
                if !collections.contains(&name) {
                    collections.push(name);
                }
            }
            if let Some(report) = scan.report {
                for op in &report.operations {
                    match op.as_str() {
                        "insert" => operations.inserts += 1,
                        "find" => operations.finds += 1,
                        "update" => operations.updates += 1,
                        "delete" => operations.deletes += 1,
                        "aggregate" => operations.aggregates += 1,
                        _ => {}
                    }
                }
                files.push(report);
            }
        }

        // No collections detected: guess from common names in file paths
        if collections.is_empty() {
            for candidate in [
                "users", "products", "orders", "posts", "comments", "sessions", "accounts",
            ] {
                if blobs.iter().any(|p| p.to_lowercase().contains(candidate)) {
                    collections.push(candidate.to_string());
                }
            }
        }

        let flow_diagram = build_flow_diagram(&files);
        let mongo_files = files.len() as u64;

        Ok(AnalysisResult {
            files,
            total_files,
            mongo_files,
            operations,
            collections,
            flow_diagram,
        })
    }

    /// Fetch and scan one file. Any failure yields None - the file is
    /// excluded, never the whole analysis.
    fn scan_file(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Option<FileScan> {
        let url = format!("{}/{}/{}/{}/{}", self.raw_base, owner, repo, branch, path);
        let content = self.get_text(&url)?;

        let mut found_ops: Vec<String> = Vec::new();
        if content.contains("insertOne") || content.contains("insertMany") {
            found_ops.push("insert".to_string());
        }
        if content.contains(".find(") || content.contains(".findOne(") {
            found_ops.push("find".to_string());
        }
        if content.contains("updateOne") || content.contains("updateMany") {
            found_ops.push("update".to_string());
        }
        if content.contains("deleteOne") || content.contains("deleteMany") {
            found_ops.push("delete".to_string());
        }
        if content.contains("aggregate(") {
            found_ops.push("aggregate".to_string());
        }

        let looks_mongo = !found_ops.is_empty()
            || content.contains("mongodb")
            || content.contains("mongoose")
            || content.contains("MongoClient");
        if !looks_mongo {
            return Some(FileScan {
                report: None,
                collections: Vec::new(),
            });
        }

        let collections = COLLECTION_RE
            .captures_iter(&content)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
            .collect();

        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Some(FileScan {
            report: Some(FileReport {
                name,
                path: path.to_string(),
                operations: found_ops,
            }),
            collections,
        })
    }

    fn get_json(&self, url: &str) -> Result<Value, ServerError> {
        let response = self
            .request(url)
            .call()
            .map_err(|e| ServerError::ExternalAnalysis(format!("Failed to fetch {}: {}", url, e)))?;
        response
            .into_json()
            .map_err(|e| ServerError::ExternalAnalysis(format!("Invalid JSON from {}: {}", url, e)))
    }

    fn get_text(&self, url: &str) -> Option<String> {
        self.request(url).call().ok()?.into_string().ok()
    }

    fn request(&self, url: &str) -> ureq::Request {
        let mut request = self
            .agent
            .get(url)
            .set("Accept", "application/vnd.github.v3+json")
            .set("User-Agent", "FlowBase-Studio");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("token {}", token));
        }
        request
    }
}

/// Extract `(owner, repo)` from a GitHub URL, stripping a `.git` suffix
fn parse_repo_url(url: &str) -> Result<(String, String), ServerError> {
    let captures = REPO_URL_RE
        .captures(url)
        .ok_or_else(|| ServerError::RequestShape("Invalid GitHub URL format".to_string()))?;
    let owner = captures[1].to_string();
    let repo = captures[2].trim_end_matches(".git").to_string();
    Ok((owner, repo))
}

/// Synthesize the static flow diagram: controller -> service -> model ->
/// database, each chosen by path heuristics; the database node is always
/// present.
fn build_flow_diagram(files: &[FileReport]) -> Vec<FlowNode> {
    let mut diagram = Vec::new();

    let by_path = |needles: &[&str]| {
        files.iter().find(|f| {
            let lower = f.path.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
    };

    match by_path(&["controller", "api/", "handlers/"]) {
        Some(file) => diagram.push(FlowNode {
            id: "1".to_string(),
            node_type: "controller".to_string(),
            label: strip_extension(&file.name),
            file: Some(file.path.clone()),
            operations: if file.operations.is_empty() {
                vec!["API Handlers".to_string()]
            } else {
                file.operations.clone()
            },
        }),
        None => diagram.push(FlowNode {
            id: "1".to_string(),
            node_type: "controller".to_string(),
            label: "API Gateway".to_string(),
            file: None,
            operations: vec!["Route Handling".to_string()],
        }),
    }

    if let Some(file) = by_path(&["service", "lib/", "utils/"]) {
        diagram.push(FlowNode {
            id: "2".to_string(),
            node_type: "service".to_string(),
            label: strip_extension(&file.name),
            file: Some(file.path.clone()),
            operations: file.operations.clone(),
        });
    }

    if let Some(file) = by_path(&["model", "schemas", "entities"]) {
        diagram.push(FlowNode {
            id: "3".to_string(),
            node_type: "model".to_string(),
            label: strip_extension(&file.name),
            file: Some(file.path.clone()),
            operations: Vec::new(),
        });
    }

    diagram.push(FlowNode {
        id: "4".to_string(),
        node_type: "database".to_string(),
        label: "MongoDB".to_string(),
        file: None,
        operations: vec!["CRUD".to_string()],
    });

    diagram
}

fn strip_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name.to_string(),
    }
}
