use anyhow::{anyhow, Context, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_PROJECT_NAME: &str = "Sprint 🏃‍♀️";

/// How a reviewer is chosen for a newly opened pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentMode {
    /// Least-loaded reviewer, credited with the PR's score.
    #[default]
    Balanced,
    /// Uniformly random reviewer, nothing credited.
    Random,
}

impl FromStr for AssignmentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(AssignmentMode::Balanced),
            "random" => Ok(AssignmentMode::Random),
            other => Err(anyhow!(
                "unknown assignment mode '{}', expected 'balanced' or 'random'",
                other
            )),
        }
    }
}

impl fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentMode::Balanced => write!(f, "balanced"),
            AssignmentMode::Random => write!(f, "random"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub github_owner: String,
    pub github_repo: String,
    pub github_webhook_secret: String,
    pub github_api_url: String,
    pub chat_webhook_url: String,
    /// Team slug requested alongside the balanced reviewer, if any.
    pub team_reviewer: Option<String>,
    pub assignment_mode: AssignmentMode,
    /// Name of the classic project used as the task board.
    pub project_name: String,
    /// Post to chat whenever the star count is a multiple of this.
    pub star_milestone: u64,
    pub port: u16,
    /// Directory holding `reviewers.db`. Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Bearer token for the reviewer API.
    /// If not set, the reviewer API is disabled (returns 503).
    pub admin_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_token =
            env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable is required")?;

        let github_owner =
            env::var("GITHUB_OWNER").context("GITHUB_OWNER environment variable is required")?;

        let github_repo =
            env::var("GITHUB_REPO").context("GITHUB_REPO environment variable is required")?;

        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let chat_webhook_url = env::var("CHAT_WEBHOOK_URL")
            .context("CHAT_WEBHOOK_URL environment variable is required")?;

        let github_api_url = env::var("GITHUB_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_GITHUB_API_URL.to_string());

        let team_reviewer = parse_optional(env::var("TEAM_REVIEWER").ok());

        let assignment_mode = match env::var("ASSIGNMENT_MODE") {
            Ok(mode) => mode.parse().context("ASSIGNMENT_MODE is invalid")?,
            Err(_) => AssignmentMode::default(),
        };

        let project_name =
            env::var("PROJECT_NAME").unwrap_or_else(|_| DEFAULT_PROJECT_NAME.to_string());

        let star_milestone = env::var("STAR_MILESTONE")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<u64>()
            .context("STAR_MILESTONE must be a valid number")?;
        if star_milestone == 0 {
            return Err(anyhow!("STAR_MILESTONE must be greater than zero"));
        }

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let admin_auth_token = parse_optional(env::var("ADMIN_AUTH_TOKEN").ok());

        Ok(Config {
            github_token,
            github_owner,
            github_repo,
            github_webhook_secret,
            github_api_url,
            chat_webhook_url,
            team_reviewer,
            assignment_mode,
            project_name,
            star_milestone,
            port,
            state_dir,
            admin_auth_token,
        })
    }

    pub fn reviewer_db_path(&self) -> PathBuf {
        self.state_dir.join("reviewers.db")
    }
}

/// Treat a missing, empty or whitespace-only value as unset.
///
/// An empty `ADMIN_AUTH_TOKEN` must never enable unauthenticated access.
pub fn parse_optional(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
