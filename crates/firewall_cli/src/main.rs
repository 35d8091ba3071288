use clap::{Parser, Subcommand};
use firewall_guard::IdentityResolver;
use firewall_pipeline::{FirewallCore, PostResultOutcome, PreCallOutcome, SizeGuardAction, SizeGuardConfig};
use firewall_ratelimit::{parse_rules, RateLimiter, RawRateLimitEntry};
use firewall_spec::{ApprovalScope, ToolCall};
use firewall_store::ApprovalStoreHandle;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] firewall_store::StoreError),
    #[error("unrecognized approval scope `{0}`, expected once|session")]
    BadScope(String),
    #[error("unrecognized size guard action `{0}`, expected truncate|block")]
    BadSizeGuardAction(String),
}

#[derive(Parser)]
#[command(name = "firewall-ctl", version, about = "Tool-call firewall control-plane utility")]
struct Args {
    /// Directory holding approvals.json, approvals.history.jsonl, receipts.jsonl, etc.
    #[arg(long, env = "FIREWALL_STATE_DIR", default_value = "./runtime/firewall")]
    state_dir: PathBuf,

    /// Named preset to overlay on the built-in default policy.
    #[arg(long)]
    preset: Option<String>,

    /// YAML override policy file, merged over the preset.
    #[arg(long)]
    policy_file: Option<PathBuf>,

    /// JSON array of rate-limit entries (toolName/maxCalls/windowSec/action/scope).
    #[arg(long)]
    rate_limits_file: Option<PathBuf>,

    /// Size guard threshold; 0 disables the guard.
    #[arg(long, default_value_t = 0)]
    max_result_chars: usize,

    /// Size guard action when the threshold is exceeded.
    #[arg(long, default_value = "truncate")]
    max_result_action: String,

    /// Logical clock value (ms) used for receipts/rate-limit windows/approval timestamps.
    #[arg(long, default_value_t = 0)]
    now: u64,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pre-call pipeline over a `{toolName, params, context}` JSON file.
    Precall {
        #[arg(long)]
        input: PathBuf,
    },
    /// Run the post-result pipeline over a raw tool-result message JSON file.
    PostResult {
        #[arg(long)]
        tool_name: String,
        #[arg(long)]
        tool_call_id: Option<String>,
        #[arg(long)]
        session_key: Option<String>,
        #[arg(long)]
        agent_id: Option<String>,
        #[arg(long)]
        input: PathBuf,
    },
    /// Chat command: approve <id> [once|session].
    Approve {
        id: String,
        #[arg(default_value = "once")]
        scope: String,
    },
    /// Chat command: deny <id>.
    Deny { id: String },
    /// Chat command: status — list pending approval requests.
    Status,
    /// Chat command: explain — show the last-decision receipt snapshot.
    Explain,
    /// Validate that every line in receipts.jsonl parses as a well-formed receipt.
    VerifyReceipts,
}

fn build_core(args: &Args) -> Result<FirewallCore, CliError> {
    let override_yaml = args
        .policy_file
        .as_ref()
        .map(fs::read_to_string)
        .transpose()?;
    let loaded = firewall_policy::load_policy(args.preset.as_deref(), override_yaml.as_deref());
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }

    let rate_rules = match &args.rate_limits_file {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let entries: Vec<RawRateLimitEntry> = serde_json::from_str(&raw)?;
            parse_rules(&entries)
        }
        None => Vec::new(),
    };

    let size_guard_action = match args.max_result_action.as_str() {
        "truncate" => SizeGuardAction::Truncate,
        "block" => SizeGuardAction::Block,
        other => return Err(CliError::BadSizeGuardAction(other.to_string())),
    };

    let store = ApprovalStoreHandle::open(&args.state_dir);
    let limiter = RateLimiter::new(rate_rules);
    let resolver = Box::new(IdentityResolver);
    let size_guard = SizeGuardConfig { max_result_chars: args.max_result_chars, action: size_guard_action };

    Ok(FirewallCore::new(loaded.policy, limiter, store, resolver, size_guard))
}

fn run(args: Args) -> Result<Value, CliError> {
    match &args.cmd {
        Command::Precall { input } => {
            let core = build_core(&args)?;
            let raw = fs::read_to_string(input)?;
            let tool_call: ToolCall = serde_json::from_str(&raw)?;
            match core.before_tool_call(&tool_call, args.now) {
                PreCallOutcome::Passthrough { params } => Ok(json!({"params": params})),
                PreCallOutcome::Block { block_reason } => Ok(json!({"block": true, "blockReason": block_reason})),
            }
        }
        Command::PostResult { tool_name, tool_call_id, session_key, agent_id, input } => {
            let core = build_core(&args)?;
            let raw = fs::read_to_string(input)?;
            let message: Value = serde_json::from_str(&raw)?;
            let (outcome, _receipt) = core.tool_result_persist(
                tool_name,
                tool_call_id.as_deref(),
                &message,
                session_key.as_deref(),
                agent_id.as_deref(),
                args.now,
            );
            match outcome {
                PostResultOutcome::Unchanged => Ok(json!({})),
                PostResultOutcome::Replaced { message } => Ok(json!({"message": message})),
            }
        }
        Command::Approve { id, scope } => {
            let core = build_core(&args)?;
            let scope = match scope.as_str() {
                "once" => ApprovalScope::Once,
                "session" => ApprovalScope::Session,
                other => return Err(CliError::BadScope(other.to_string())),
            };
            let transitioned = core.approve(id, scope, args.now)?;
            Ok(json!({"id": id, "approved": true, "transitioned": transitioned}))
        }
        Command::Deny { id } => {
            let core = build_core(&args)?;
            let found = core.deny(id, args.now)?;
            Ok(json!({"id": id, "denied": found}))
        }
        Command::Status => {
            let core = build_core(&args)?;
            Ok(json!({"pending": core.list_pending()}))
        }
        Command::Explain => {
            let core = build_core(&args)?;
            Ok(json!({"lastDecision": core.last_decision()}))
        }
        Command::VerifyReceipts => {
            let path = args.state_dir.join("receipts.jsonl");
            let contents = fs::read_to_string(&path).unwrap_or_default();
            let mut total = 0usize;
            let mut bad_lines = Vec::new();
            for (i, line) in contents.lines().enumerate() {
                total += 1;
                if serde_json::from_str::<firewall_spec::Receipt>(line).is_err() {
                    bad_lines.push(i);
                }
            }
            Ok(json!({"total": total, "malformed": bad_lines}))
        }
    }
}

fn main() {
    let _ = dotenvy::dotenv();
    firewall_common::init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).expect("serialize result")),
        Err(e) => {
            eprintln!("firewall-ctl: {e}");
            std::process::exit(1);
        }
    }
}
