use anyhow::{anyhow, Context, Result};
use reqwest::Method;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::outbound::{create_client, ServiceType, CORRELATION_ID_HEADER};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: u32 = 100;

/// REST client for a single repository, authenticated with a token.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_url: String,
    token: String,
    owner: String,
    repo: String,
}

#[derive(Debug, Serialize)]
struct AddLabelsRequest<'a> {
    labels: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct ReviewersRequest<'a> {
    reviewers: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    team_reviewers: &'a [String],
}

#[derive(Debug, Serialize)]
struct CreateCardRequest<'a> {
    content_id: u64,
    content_type: &'a str,
}

#[derive(Debug, Serialize)]
struct MoveCardRequest<'a> {
    position: &'a str,
    column_id: u64,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    stargazers_count: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProjectColumn {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProjectCard {
    pub id: u64,
    /// API URL of the issue or pull request the card refers to; absent for notes.
    pub content_url: Option<String>,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: create_client(ServiceType::GitHub)?,
            api_url: api_url.into(),
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, self.owner, self.repo, path)
    }

    fn request(&self, method: Method, url: &str, correlation_id: Option<&str>) -> RequestBuilder {
        let mut request_builder = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);

        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }

        request_builder
    }

    /// Send a request and turn any non-2xx status into an error.
    async fn send(&self, request_builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request_builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error ({}): {} - {}", what, status, error_text);
            return Err(anyhow!(
                "GitHub API error ({}): {} - {}",
                what,
                status,
                error_text
            ));
        }

        Ok(response)
    }

    pub async fn add_labels(
        &self,
        correlation_id: Option<&str>,
        issue_number: u64,
        labels: &[&str],
    ) -> Result<()> {
        let url = self.repo_url(&format!("/issues/{}/labels", issue_number));

        info!(
            "Adding labels {:?} to #{} in {}",
            labels,
            issue_number,
            self.full_name()
        );

        let request_builder = self
            .request(Method::POST, &url, correlation_id)
            .json(&AddLabelsRequest { labels });
        self.send(request_builder, "add labels").await?;

        Ok(())
    }

    pub async fn request_reviewers(
        &self,
        correlation_id: Option<&str>,
        pr_number: u64,
        reviewers: &[String],
        team_reviewers: &[String],
    ) -> Result<()> {
        let url = self.repo_url(&format!("/pulls/{}/requested_reviewers", pr_number));

        info!(
            "Requesting review on PR #{} from {:?} (teams: {:?})",
            pr_number, reviewers, team_reviewers
        );

        let request_builder = self
            .request(Method::POST, &url, correlation_id)
            .json(&ReviewersRequest {
                reviewers,
                team_reviewers,
            });
        self.send(request_builder, "request reviewers").await?;

        Ok(())
    }

    pub async fn get_stargazers_count(&self, correlation_id: Option<&str>) -> Result<u64> {
        let url = self.repo_url("");
        let request_builder = self.request(Method::GET, &url, correlation_id);
        let response = self.send(request_builder, "get repository").await?;

        let repository: RepositoryResponse = response
            .json()
            .await
            .context("Failed to parse repository response")?;
        Ok(repository.stargazers_count)
    }

    pub async fn list_projects(&self, correlation_id: Option<&str>) -> Result<Vec<Project>> {
        let url = self.repo_url(&format!("/projects?state=open&per_page={}", PAGE_SIZE));
        let request_builder = self.request(Method::GET, &url, correlation_id);
        let response = self.send(request_builder, "list projects").await?;

        response
            .json()
            .await
            .context("Failed to parse projects response")
    }

    pub async fn list_project_columns(
        &self,
        correlation_id: Option<&str>,
        project_id: u64,
    ) -> Result<Vec<ProjectColumn>> {
        let url = format!(
            "{}/projects/{}/columns?per_page={}",
            self.api_url, project_id, PAGE_SIZE
        );
        let request_builder = self.request(Method::GET, &url, correlation_id);
        let response = self.send(request_builder, "list project columns").await?;

        response
            .json()
            .await
            .context("Failed to parse project columns response")
    }

    pub async fn list_project_cards(
        &self,
        correlation_id: Option<&str>,
        column_id: u64,
    ) -> Result<Vec<ProjectCard>> {
        let mut cards = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/projects/columns/{}/cards?per_page={}&page={}",
                self.api_url, column_id, PAGE_SIZE, page
            );
            let request_builder = self.request(Method::GET, &url, correlation_id);
            let response = self.send(request_builder, "list project cards").await?;

            let batch: Vec<ProjectCard> = response
                .json()
                .await
                .context("Failed to parse project cards response")?;
            let done = batch.len() < PAGE_SIZE as usize;
            cards.extend(batch);

            if done {
                return Ok(cards);
            }
            page += 1;
        }
    }

    pub async fn create_project_card(
        &self,
        correlation_id: Option<&str>,
        column_id: u64,
        content_id: u64,
        content_type: &str,
    ) -> Result<ProjectCard> {
        let url = format!("{}/projects/columns/{}/cards", self.api_url, column_id);

        let request_builder = self
            .request(Method::POST, &url, correlation_id)
            .json(&CreateCardRequest {
                content_id,
                content_type,
            });
        let response = self.send(request_builder, "create project card").await?;

        let card: ProjectCard = response
            .json()
            .await
            .context("Failed to parse project card response")?;
        info!("Created project card {} in column {}", card.id, column_id);
        Ok(card)
    }

    pub async fn move_project_card(
        &self,
        correlation_id: Option<&str>,
        card_id: u64,
        column_id: u64,
        position: &str,
    ) -> Result<()> {
        let url = format!("{}/projects/columns/cards/{}/moves", self.api_url, card_id);

        let request_builder = self
            .request(Method::POST, &url, correlation_id)
            .json(&MoveCardRequest {
                position,
                column_id,
            });
        self.send(request_builder, "move project card").await?;

        info!("Moved project card {} to column {}", card_id, column_id);
        Ok(())
    }
}
