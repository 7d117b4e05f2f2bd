use crate::model::Commit;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommitType {
    Feature,
    Fix,
    Documentation,
    Performance,
    Refactor,
    Test,
    Build,
    CI,
    Chore,
    Style,
    Other,
}

impl CommitType {
    fn from_keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "feat" | "feature" | "add" | "adds" | "added" => CommitType::Feature,
            "fix" | "fixes" | "fixed" | "bugfix" | "hotfix" => CommitType::Fix,
            "docs" | "doc" | "documentation" => CommitType::Documentation,
            "perf" | "performance" => CommitType::Performance,
            "refactor" => CommitType::Refactor,
            "test" | "tests" => CommitType::Test,
            "build" | "deps" => CommitType::Build,
            "ci" | "cd" => CommitType::CI,
            "chore" => CommitType::Chore,
            "style" => CommitType::Style,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitType::Feature => write!(f, "✨ Features"),
            CommitType::Fix => write!(f, "🐛 Bug Fixes"),
            CommitType::Documentation => write!(f, "📚 Documentation"),
            CommitType::Performance => write!(f, "⚡ Performance"),
            CommitType::Refactor => write!(f, "♻️ Refactoring"),
            CommitType::Test => write!(f, "✅ Tests"),
            CommitType::Build => write!(f, "📦 Build System"),
            CommitType::CI => write!(f, "👷 CI/CD"),
            CommitType::Chore => write!(f, "🔧 Chores"),
            CommitType::Style => write!(f, "💄 Style"),
            CommitType::Other => write!(f, "📝 Other Changes"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedCommit {
    pub hash: String,
    /// Subject with any conventional prefix removed, first letter capitalized.
    pub message: String,
    pub author: String,
    pub date: chrono::DateTime<chrono::Utc>,
    pub commit_type: CommitType,
    pub scope: Option<String>,
    pub breaking: bool,
    pub pr_number: Option<u64>,
    pub issues: Vec<u64>,
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn conventional() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"^(\w+)(\(([^)]*)\))?(!)?:\s*(.+)$")
}

fn issue_reference() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &RE,
        r"(?i)(?:(?:fix|fixes|fixed|close|closes|closed|resolve|resolves|resolved)\s+)?#(\d+)",
    )
}

fn pr_reference() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"\(#(\d+)\)")
}

pub struct CommitAnalyzer;

impl CommitAnalyzer {
    pub fn analyze_commits(commits: &[Commit]) -> Vec<EnrichedCommit> {
        commits.iter().map(Self::analyze_single_commit).collect()
    }

    pub fn analyze_single_commit(commit: &Commit) -> EnrichedCommit {
        let parsed = Self::parse_subject(&commit.subject);
        let breaking = parsed.breaking || commit.body.contains("BREAKING CHANGE");
        let full_message = format!("{}\n{}", commit.subject, commit.body);
        let pr_number = Self::extract_pr_number(&commit.subject);

        EnrichedCommit {
            hash: commit.hash.clone(),
            message: capitalize(&parsed.description),
            author: commit
                .author_login
                .clone()
                .unwrap_or_else(|| commit.author.clone()),
            date: commit.committed_at,
            commit_type: parsed.commit_type,
            scope: parsed.scope,
            breaking,
            pr_number,
            issues: Self::extract_issues(&full_message)
                .into_iter()
                .filter(|n| Some(*n) != pr_number)
                .collect(),
        }
    }

    /// Conventional prefix when present, otherwise a keyword match on the
    /// first word ("Fix crash on startup" is a fix).
    pub fn classify(subject: &str) -> CommitType {
        Self::parse_subject(subject).commit_type
    }

    fn parse_subject(subject: &str) -> ParsedSubject {
        let subject = subject.trim();
        if let Some(caps) = conventional().and_then(|re| re.captures(subject)) {
            let keyword = caps[1].to_lowercase();
            return ParsedSubject {
                commit_type: CommitType::from_keyword(&keyword).unwrap_or(CommitType::Other),
                scope: caps.get(3).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()),
                breaking: caps.get(4).is_some(),
                description: caps[5].trim().to_string(),
            };
        }

        let first_word = subject
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        ParsedSubject {
            commit_type: CommitType::from_keyword(&first_word).unwrap_or(CommitType::Other),
            scope: None,
            breaking: subject.to_lowercase().contains("breaking"),
            description: subject.to_string(),
        }
    }

    fn extract_issues(message: &str) -> Vec<u64> {
        let Some(re) = issue_reference() else {
            return Vec::new();
        };
        let mut issues: Vec<u64> = re
            .captures_iter(message)
            .filter_map(|cap| cap.get(1)?.as_str().parse().ok())
            .collect();
        issues.sort_unstable();
        issues.dedup();
        issues
    }

    fn extract_pr_number(message: &str) -> Option<u64> {
        // squash merges end the subject with "(#123)"
        pr_reference()?
            .captures(message)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    }

    pub fn group_commits_by_type(
        commits: &[EnrichedCommit],
    ) -> BTreeMap<CommitType, Vec<&EnrichedCommit>> {
        let mut grouped: BTreeMap<CommitType, Vec<&EnrichedCommit>> = BTreeMap::new();
        for commit in commits {
            grouped.entry(commit.commit_type).or_default().push(commit);
        }
        grouped
    }
}

struct ParsedSubject {
    commit_type: CommitType,
    scope: Option<String>,
    breaking: bool,
    description: String,
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn commit(subject: &str, body: &str) -> Commit {
        Commit {
            hash: "abc1234".into(),
            full_hash: "abc1234def".into(),
            author: "Ada Lovelace".into(),
            subject: subject.into(),
            body: body.into(),
            authored_at: Utc::now(),
            committed_at: Utc::now(),
            url: None,
            author_login: None,
        }
    }

    #[test]
    fn conventional_prefixes_classify() {
        assert_eq!(CommitAnalyzer::classify("feat(api): add export"), CommitType::Feature);
        assert_eq!(CommitAnalyzer::classify("fix: null deref"), CommitType::Fix);
        assert_eq!(CommitAnalyzer::classify("docs: readme"), CommitType::Documentation);
        assert_eq!(CommitAnalyzer::classify("wip: whatever"), CommitType::Other);
    }

    #[test]
    fn plain_subjects_fall_back_to_first_word() {
        assert_eq!(CommitAnalyzer::classify("Fix crash on startup"), CommitType::Fix);
        assert_eq!(CommitAnalyzer::classify("Added dark mode"), CommitType::Feature);
        assert_eq!(CommitAnalyzer::classify("Bump version"), CommitType::Other);
    }

    #[test]
    fn enrichment_extracts_scope_breaking_and_references() {
        let enriched = CommitAnalyzer::analyze_single_commit(&commit(
            "feat(cli)!: drop legacy flags (#42)",
            "Closes #7 and fixes #9",
        ));
        assert_eq!(enriched.commit_type, CommitType::Feature);
        assert_eq!(enriched.scope.as_deref(), Some("cli"));
        assert!(enriched.breaking);
        assert_eq!(enriched.pr_number, Some(42));
        assert_eq!(enriched.issues, vec![7, 9]);
        assert_eq!(enriched.message, "Drop legacy flags (#42)");
        assert_eq!(enriched.author, "Ada Lovelace");
    }

    #[test]
    fn breaking_change_footer_is_detected() {
        let enriched = CommitAnalyzer::analyze_single_commit(&commit(
            "refactor: rename config keys",
            "BREAKING CHANGE: `timeout` is now `timeout_secs`",
        ));
        assert!(enriched.breaking);
    }

    #[test]
    fn groups_by_type() {
        let commits = CommitAnalyzer::analyze_commits(&[
            commit("feat: one", ""),
            commit("fix: two", ""),
            commit("feat: three", ""),
        ]);
        let grouped = CommitAnalyzer::group_commits_by_type(&commits);
        assert_eq!(grouped[&CommitType::Feature].len(), 2);
        assert_eq!(grouped[&CommitType::Fix].len(), 1);
    }
}
