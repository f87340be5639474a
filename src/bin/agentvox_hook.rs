//! agentvox-hook: delivers coding-agent events to the voice hub.
//!
//! Codex calls it with a notification JSON as `argv[1]`; Claude Code pipes
//! hook event JSON on stdin. Either way one message is posted to
//! `/api/message`. Every outcome lands in
//! ~/.agentvox-hook-history/YYYY-MM-DD.jsonl and the process always exits 0.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};

use agentvox::hub::transcript::extract_last_assistant_text;

const DEFAULT_PORT: &str = "9876";
const MAX_CONTEXT_CHARS: usize = 2000;
const MAX_NOTIFICATION_CHARS: usize = 1000;

// --- Codex notification (argv[1]) ---

#[derive(Deserialize)]
struct CodexNotification {
    #[serde(rename = "type")]
    kind: Option<String>,
    cwd: Option<String>,
    #[serde(rename = "thread-id")]
    thread_id: Option<String>,
    #[serde(rename = "turn-id")]
    turn_id: Option<String>,
    #[serde(rename = "last-assistant-message")]
    last_assistant_message: Option<String>,
}

// --- Claude Code hook event (stdin) ---

#[derive(Deserialize)]
struct HookEvent {
    hook_event_name: Option<String>,
    session_id: Option<String>,
    transcript_path: Option<String>,
    cwd: Option<String>,
    message: Option<String>,
}

// --- Hub request ---

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct MessageRequest {
    source: String,
    project: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    branch: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    worktree: String,
    session_id: String,
    priority: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

// --- History record ---

#[derive(Serialize)]
struct HistoryRecord {
    timestamp: String,
    event: String,
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    attempts: usize,
    duration_ms: u64,
}

fn history_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentvox-hook-history")
}

fn save_record(record: &HistoryRecord) {
    let dir = history_dir();
    let _ = fs::create_dir_all(&dir);

    let date = &record.timestamp[..10];
    let path = dir.join(format!("{date}.jsonl"));

    if let Ok(json) = serde_json::to_string(record) {
        if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{json}");
        }
    }
}

fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Outcome of one hook invocation, before it is written to history.
struct Outcome {
    event: String,
    action: &'static str,
    detail: Option<String>,
    request: Option<MessageRequest>,
}

impl Outcome {
    fn skipped(event: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            action: "skipped",
            detail: Some(detail.into()),
            request: None,
        }
    }

    fn deliver(event: impl Into<String>, request: MessageRequest) -> Self {
        Self {
            event: event.into(),
            action: "deliver",
            detail: None,
            request: Some(request),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let t0 = Instant::now();

    let outcome = match std::env::args().nth(1) {
        Some(arg) => codex_outcome(&arg),
        None => {
            let mut input = String::new();
            if std::io::stdin().read_to_string(&mut input).is_err() {
                return;
            }
            claude_outcome(&input)
        }
    };

    let Outcome {
        event,
        action,
        detail,
        request,
    } = outcome;

    let Some(request) = request else {
        save_record(&HistoryRecord {
            timestamp: now_timestamp(),
            event,
            action: action.into(),
            detail,
            session_id: None,
            project: None,
            url: None,
            attempts: 0,
            duration_ms: elapsed_ms(t0),
        });
        return;
    };

    let client = Client::builder()
        .connect_timeout(Duration::from_millis(1500))
        .timeout(Duration::from_secs(3))
        .build()
        .unwrap_or_else(|_| Client::new());

    let urls = hub_urls(|key| std::env::var(key).ok());
    let mut attempts = 0;
    let mut delivered_to = None;
    let mut last_error = None;
    for url in &urls {
        attempts += 1;
        let target = format!("{url}/api/message");
        match client.post(&target).json(&request).send().await {
            Ok(resp) if resp.status().is_success() => {
                delivered_to = Some(target);
                break;
            }
            Ok(resp) => last_error = Some(format!("{target}: HTTP {}", resp.status())),
            Err(e) => last_error = Some(format!("{target}: {e}")),
        }
    }

    let (action, detail) = match &delivered_to {
        Some(_) => ("delivered", None),
        None => ("delivery-failed", last_error),
    };
    save_record(&HistoryRecord {
        timestamp: now_timestamp(),
        event,
        action: action.into(),
        detail,
        session_id: Some(request.session_id),
        project: Some(request.project),
        url: delivered_to,
        attempts,
        duration_ms: elapsed_ms(t0),
    });
}

fn elapsed_ms(t0: Instant) -> u64 {
    u64::try_from(t0.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn codex_outcome(arg: &str) -> Outcome {
    let Ok(notification) = serde_json::from_str::<CodexNotification>(arg) else {
        return Outcome::skipped("codex", "invalid-json-argv");
    };
    match notification.kind.as_deref() {
        Some("agent-turn-complete") => {}
        other => {
            return Outcome::skipped("codex", format!("unsupported-type: {}", other.unwrap_or("none")))
        }
    }
    let last_message = match notification.last_assistant_message {
        Some(m) if !m.trim().is_empty() => m,
        _ => return Outcome::skipped("agent-turn-complete", "missing-last-assistant-message"),
    };

    let cwd = notification.cwd.unwrap_or_else(current_dir);
    let (project, branch, worktree) = project_info(Path::new(&cwd));
    let session = notification
        .thread_id
        .filter(|id| !id.is_empty())
        .or(notification.turn_id)
        .unwrap_or_default();

    Outcome::deliver(
        "agent-turn-complete",
        MessageRequest {
            source: "codex".into(),
            project,
            branch,
            worktree,
            session_id: format!("codex-{session}"),
            priority: "normal".into(),
            kind: "stop".into(),
            context: Some(truncate_chars(&last_message, MAX_CONTEXT_CHARS)),
            ..Default::default()
        },
    )
}

fn claude_outcome(input: &str) -> Outcome {
    let Ok(event) = serde_json::from_str::<HookEvent>(input) else {
        return Outcome::skipped("claude", "invalid-json-stdin");
    };
    let Some(name) = event.hook_event_name.clone() else {
        return Outcome::skipped("claude", "missing hook_event_name");
    };

    let cwd = event.cwd.clone().unwrap_or_else(current_dir);
    let (project, branch, worktree) = project_info(Path::new(&cwd));
    let session_id = format!("claude-{}", event.session_id.as_deref().unwrap_or(&project));
    let base = MessageRequest {
        source: "claude-code".into(),
        project,
        branch,
        worktree,
        session_id,
        ..Default::default()
    };

    match name.clone().as_str() {
        "Stop" => {
            let transcript = match &event.transcript_path {
                Some(p) if !p.is_empty() => PathBuf::from(p),
                _ => return Outcome::skipped(name, "no transcript path"),
            };
            let Some(text) = extract_last_assistant_text(&transcript, MAX_CONTEXT_CHARS) else {
                return Outcome::skipped(name, "no assistant text found");
            };
            Outcome::deliver(
                name,
                MessageRequest {
                    priority: "normal".into(),
                    kind: "stop".into(),
                    context: Some(text),
                    ..base
                },
            )
        }
        "Notification" => {
            let message = match &event.message {
                Some(m) if !m.trim().is_empty() => m,
                _ => return Outcome::skipped(name, "no notification message"),
            };
            Outcome::deliver(
                name,
                MessageRequest {
                    priority: "high".into(),
                    kind: "info".into(),
                    summary: Some(truncate_chars(message, MAX_NOTIFICATION_CHARS)),
                    ..base
                },
            )
        }
        _ => Outcome {
            event: name,
            action: "ignored",
            detail: None,
            request: None,
        },
    }
}

fn current_dir() -> String {
    std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".into())
}

fn git_output(cwd: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// (project, branch, worktree) for a working directory.
fn project_info(cwd: &Path) -> (String, String, String) {
    let root = git_output(cwd, &["rev-parse", "--show-toplevel"])
        .unwrap_or_else(|| cwd.to_string_lossy().into_owned());
    let branch = git_output(cwd, &["branch", "--show-current"]).unwrap_or_default();
    let project = Path::new(&root)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".into());
    (project, branch, root)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn as_url(host_or_url: &str, port: &str) -> Option<String> {
    let raw = host_or_url.trim().trim_end_matches('/');
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        Some(raw.to_string())
    } else {
        Some(format!("http://{raw}:{port}"))
    }
}

/// Candidate hub base URLs in delivery order, without duplicates.
fn hub_urls(env: impl Fn(&str) -> Option<String>) -> Vec<String> {
    if let Some(url) = env("AGENTVOX_URL").and_then(|u| as_url(&u, DEFAULT_PORT)) {
        return vec![url];
    }

    let port = env("AGENTVOX_PORT")
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PORT.into());
    let mut candidates = Vec::new();
    if let Some(url) = env("AGENTVOX_HOST").and_then(|h| as_url(&h, &port)) {
        candidates.push(url);
    }
    for host in ["localhost", "127.0.0.1", "host.docker.internal"] {
        candidates.push(format!("http://{host}:{port}"));
    }
    if let Some(extra) = env("AGENTVOX_URL_FALLBACKS") {
        candidates.extend(extra.split(',').filter_map(|item| as_url(item, &port)));
    }

    let mut urls: Vec<String> = Vec::with_capacity(candidates.len());
    for url in candidates {
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}
