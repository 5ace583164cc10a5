//! Task board handling: keeps every opened pull request on the "In review"
//! column of the team's classic project.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use crate::github::{GitHubClient, ProjectCard, ProjectColumn};

pub const BACKLOG: &str = "Backlog";
pub const IN_PROGRESS: &str = "In progress";
pub const IN_REVIEW: &str = "In review";
pub const PENDING_RELEASE: &str = "Pending release";

pub const REQUIRED_COLUMNS: [&str; 4] = [BACKLOG, IN_PROGRESS, IN_REVIEW, PENDING_RELEASE];

const CARD_CONTENT_TYPE: &str = "PullRequest";
const CARD_POSITION: &str = "bottom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAction {
    Created,
    Moved,
}

/// The fields of a pull request the board needs.
#[derive(Debug, Clone)]
pub struct BoardItem<'a> {
    pub id: u64,
    pub number: u64,
    pub issue_url: &'a str,
}

/// Map each required column name to its column, failing on the first one missing.
pub fn resolve_columns(columns: &[ProjectColumn]) -> Result<HashMap<&'static str, u64>> {
    let mut resolved = HashMap::new();
    for name in REQUIRED_COLUMNS {
        let column = columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow!("column {} does not exist", name))?;
        resolved.insert(name, column.id);
    }
    Ok(resolved)
}

pub fn find_pr_card<'a>(cards: &'a [ProjectCard], issue_url: &str) -> Option<&'a ProjectCard> {
    cards
        .iter()
        .find(|card| card.content_url.as_deref() == Some(issue_url))
}

pub async fn place_in_review(
    github: &GitHubClient,
    correlation_id: Option<&str>,
    project_name: &str,
    item: &BoardItem<'_>,
) -> Result<CardAction> {
    let projects = github
        .list_projects(correlation_id)
        .await
        .context("Failed to list projects")?;
    let project = projects
        .iter()
        .find(|p| p.name == project_name)
        .ok_or_else(|| anyhow!("project {} not found", project_name))?;

    let columns = github
        .list_project_columns(correlation_id, project.id)
        .await
        .context("Failed to list project columns")?;
    let columns = resolve_columns(&columns)?;

    let mut cards = Vec::new();
    for name in REQUIRED_COLUMNS {
        let column_cards = github
            .list_project_cards(correlation_id, columns[name])
            .await
            .with_context(|| format!("Failed to list cards in column {}", name))?;
        cards.extend(column_cards);
    }

    let in_review = columns[IN_REVIEW];
    match find_pr_card(&cards, item.issue_url) {
        Some(card) => {
            github
                .move_project_card(correlation_id, card.id, in_review, CARD_POSITION)
                .await
                .context("Failed to move project card")?;
            info!("Moved card for PR #{} to {}", item.number, IN_REVIEW);
            Ok(CardAction::Moved)
        }
        None => {
            github
                .create_project_card(correlation_id, in_review, item.id, CARD_CONTENT_TYPE)
                .await
                .context("Failed to create project card")?;
            info!("Created card for PR #{} in {}", item.number, IN_REVIEW);
            Ok(CardAction::Created)
        }
    }
}
