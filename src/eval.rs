//! Replay a fixed query set against a running server and score the answers.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conversation::ChatMessage;
use crate::inference::{QueryRequest, QueryResponse};
use crate::prompt::EVAL_SYSTEM_CONTEXT;

/// One line of an evaluation case file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalCase {
    pub query: String,
    /// Any of these substrings must appear in the command. `null` means
    /// the model should answer in text.
    #[serde(default)]
    pub expect: Option<Vec<String>>,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "general".to_string()
}

/// What came back for one case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observed {
    pub command: Option<String>,
    pub text: Option<String>,
    pub error: Option<String>,
}

impl From<QueryResponse> for Observed {
    fn from(resp: QueryResponse) -> Self {
        if !resp.success {
            return Observed {
                error: resp.error.or(resp.error_kind),
                ..Default::default()
            };
        }
        Observed {
            command: resp.command,
            text: resp.response,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalResult {
    pub query: String,
    pub category: String,
    pub expect: Option<Vec<String>>,
    pub observed: Observed,
    pub correct: bool,
}

pub fn score(case: &EvalCase, observed: &Observed) -> bool {
    match &case.expect {
        Some(patterns) => observed.command.as_deref().is_some_and(|cmd| {
            let cmd = cmd.to_lowercase();
            patterns.iter().any(|p| cmd.contains(&p.to_lowercase()))
        }),
        None => {
            observed.command.is_none()
                && observed.text.as_deref().is_some_and(|t| !t.trim().is_empty())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub total: usize,
    pub correct: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Share of command-expecting cases answered with a matching command.
    pub command_accuracy: f64,
    /// Share of all cases answered with a command.
    pub command_rate: f64,
    /// Share of text-expecting cases answered with text.
    pub text_rate: f64,
    pub per_category: BTreeMap<String, CategoryScore>,
    pub failures: Vec<EvalResult>,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl EvalSummary {
    pub fn from_results(results: &[EvalResult]) -> Self {
        let mut per_category: BTreeMap<String, CategoryScore> = BTreeMap::new();
        let (mut cmd_expected, mut cmd_correct) = (0, 0);
        let (mut text_expected, mut text_got) = (0, 0);
        let mut commands = 0;

        for r in results {
            let entry = per_category.entry(r.category.clone()).or_default();
            entry.total += 1;
            if r.correct {
                entry.correct += 1;
            }
            if r.observed.command.is_some() {
                commands += 1;
            }
            if r.expect.is_some() {
                cmd_expected += 1;
                if r.correct {
                    cmd_correct += 1;
                }
            } else {
                text_expected += 1;
                if r.observed.command.is_none() && r.observed.text.is_some() {
                    text_got += 1;
                }
            }
        }

        let correct = results.iter().filter(|r| r.correct).count();
        Self {
            total: results.len(),
            correct,
            accuracy: ratio(correct, results.len()),
            command_accuracy: ratio(cmd_correct, cmd_expected),
            command_rate: ratio(commands, results.len()),
            text_rate: ratio(text_got, text_expected),
            per_category,
            failures: results.iter().filter(|r| !r.correct).cloned().collect(),
        }
    }
}

/// Written to disk after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub server: String,
    pub cases_file: String,
    pub finished_at: DateTime<Utc>,
    pub summary: EvalSummary,
    pub results: Vec<EvalResult>,
}

pub async fn load_cases(path: &Path) -> anyhow::Result<Vec<EvalCase>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading eval cases {}", path.display()))?;
    let mut cases = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let case: EvalCase = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid eval case", path.display(), idx + 1))?;
        cases.push(case);
    }
    if cases.is_empty() {
        anyhow::bail!("no eval cases in {}", path.display());
    }
    Ok(cases)
}

/// HTTP client for a running query server.
pub struct EvalClient {
    endpoint: String,
    client: reqwest::Client,
}

impl EvalClient {
    pub fn new(server: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            endpoint: format!("{}/query", server.trim_end_matches('/')),
            client,
        })
    }

    /// Failures are reported in the observation, never as an error, so one
    /// bad case does not end the run.
    pub async fn ask(&self, query: &str) -> Observed {
        let request = QueryRequest {
            messages: vec![ChatMessage::new("user", query)],
            max_tokens: None,
            system_context: Some(EVAL_SYSTEM_CONTEXT.to_string()),
        };
        let resp = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                return Observed {
                    error: Some(format!("request failed: {e}")),
                    ..Default::default()
                }
            }
        };
        match resp.json::<QueryResponse>().await {
            Ok(body) => body.into(),
            Err(e) => Observed {
                error: Some(format!("unreadable response: {e}")),
                ..Default::default()
            },
        }
    }

    pub async fn run(&self, cases: &[EvalCase]) -> Vec<EvalResult> {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            let observed = self.ask(&case.query).await;
            if let Some(err) = &observed.error {
                warn!(query = %case.query, error = %err, "eval case failed");
            }
            let correct = score(case, &observed);
            debug!(query = %case.query, correct, "eval case scored");
            results.push(EvalResult {
                query: case.query.clone(),
                category: case.category.clone(),
                expect: case.expect.clone(),
                observed,
                correct,
            });
        }
        results
    }
}

pub async fn write_report(path: &Path, report: &EvalReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing eval report {}", path.display()))?;
    info!(
        path = %path.display(),
        accuracy = report.summary.accuracy,
        "eval report written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(query: &str, expect: Option<&[&str]>) -> EvalCase {
        EvalCase {
            query: query.into(),
            expect: expect.map(|p| p.iter().map(|s| s.to_string()).collect()),
            category: "test".into(),
        }
    }

    fn command(c: &str) -> Observed {
        Observed {
            command: Some(c.into()),
            ..Default::default()
        }
    }

    fn text(t: &str) -> Observed {
        Observed {
            text: Some(t.into()),
            ..Default::default()
        }
    }

    #[test]
    fn command_cases_match_any_pattern_case_insensitively() {
        let c = case("partition the ssd", Some(&["sgdisk", "PARTED"]));
        assert!(score(&c, &command("parted /dev/sda mklabel gpt")));
        assert!(!score(&c, &command("lsblk")));
        assert!(!score(&c, &text("which disk?")));
    }

    #[test]
    fn text_cases_reject_commands() {
        let c = case("hello", None);
        assert!(score(&c, &text("Hi! Ready to install?")));
        assert!(!score(&c, &command("lsblk")));
        assert!(!score(&c, &text("   ")));
        assert!(!score(&c, &Observed::default()));
    }

    #[test]
    fn summary_rates() {
        let results = vec![
            EvalResult {
                query: "list disks".into(),
                category: "disk".into(),
                expect: Some(vec!["lsblk".into()]),
                observed: command("lsblk"),
                correct: true,
            },
            EvalResult {
                query: "hi".into(),
                category: "chat".into(),
                expect: None,
                observed: command("lsblk"),
                correct: false,
            },
        ];
        let s = EvalSummary::from_results(&results);
        assert_eq!(s.total, 2);
        assert_eq!(s.correct, 1);
        assert_eq!(s.accuracy, 0.5);
        assert_eq!(s.command_accuracy, 1.0);
        assert_eq!(s.command_rate, 1.0);
        assert_eq!(s.text_rate, 0.0);
        assert_eq!(s.failures.len(), 1);
        assert_eq!(s.per_category["disk"].correct, 1);
    }

    #[test]
    fn case_category_defaults() {
        let c: EvalCase = serde_json::from_str(r#"{"query":"hi","expect":null}"#).unwrap();
        assert_eq!(c.category, "general");
        assert!(c.expect.is_none());
    }
}
