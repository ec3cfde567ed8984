use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinSet;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[\s\S]*?```").expect("static regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));

const WAIT_NOTICE: &str = "Please wait let me check our knowledgebase.\n\n";

#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub content: String,
    pub source: Option<String>,
    pub score: f32,
}

/// Vector search over an assistant's uploaded documents.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<Snippet>>;
}

/// Removes fenced code and HTML tags, then caps to `cap` characters.
pub fn sanitize_and_cap(text: &str, cap: usize) -> String {
    let stripped = CODE_FENCE.replace_all(text, "");
    let stripped = HTML_TAG.replace_all(&stripped, "");
    let stripped = stripped.trim();
    if stripped.chars().count() <= cap {
        return stripped.to_string();
    }
    let mut capped: String = stripped.chars().take(cap).collect();
    capped.push('…');
    capped
}

fn with_source(content: &str, source: Option<&str>) -> String {
    match source.filter(|s| !s.is_empty()) {
        Some(source) => format!("{content} (Source: {source})"),
        None => content.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KnowledgeLimits {
    pub query_timeout: Duration,
    pub detailed_timeout: Duration,
    pub top_k: usize,
    pub query_cap: usize,
    pub detailed_context: usize,
    pub detailed_cap: usize,
}

impl Default for KnowledgeLimits {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(8),
            detailed_timeout: Duration::from_secs(10),
            top_k: 5,
            query_cap: 2000,
            detailed_context: 6000,
            detailed_cap: 3000,
        }
    }
}

/// The two knowledge tools bound to one assistant's knowledge base.
pub struct KnowledgeTools {
    backend: Arc<dyn KnowledgeBase>,
    knowledge_base_id: String,
    limits: KnowledgeLimits,
}

impl KnowledgeTools {
    pub fn new(backend: Arc<dyn KnowledgeBase>, knowledge_base_id: String) -> Self {
        Self {
            backend,
            knowledge_base_id,
            limits: KnowledgeLimits::default(),
        }
    }

    pub async fn query(&self, query: &str) -> String {
        let search = self
            .backend
            .search(&self.knowledge_base_id, query, self.limits.top_k);
        let snippets = match tokio::time::timeout(self.limits.query_timeout, search).await {
            Ok(Ok(snippets)) => snippets,
            Ok(Err(e)) => {
                tracing::error!(query, error = %e, "knowledge search failed");
                return format!("{WAIT_NOTICE}I encountered an issue searching our knowledge base.");
            }
            Err(_) => {
                tracing::warn!(query, "knowledge search timed out");
                return format!(
                    "{WAIT_NOTICE}The knowledge base search is taking longer than expected. Please try again."
                );
            }
        };

        if snippets.is_empty() {
            return format!(
                "{WAIT_NOTICE}I couldn't find specific information about that in our knowledge base."
            );
        }

        let formatted: Vec<String> = snippets
            .iter()
            .take(self.limits.top_k)
            .filter(|s| !s.content.trim().is_empty())
            .map(|s| with_source(s.content.trim(), s.source.as_deref()))
            .collect();
        let body = sanitize_and_cap(&formatted.join("\n\n"), self.limits.query_cap);
        if body.is_empty() {
            return format!("{WAIT_NOTICE}No specific info found.");
        }
        format!("{WAIT_NOTICE}{body}")
    }

    pub async fn detailed(&self, topic: &str) -> String {
        let queries = [
            topic.to_string(),
            format!("what is {topic}"),
            format!("information about {topic}"),
            format!("details on {topic}"),
            format!("explanation of {topic}"),
        ];

        match tokio::time::timeout(self.limits.detailed_timeout, self.gather(&queries)).await {
            Ok(Some(context)) => {
                let body = sanitize_and_cap(&context, self.limits.detailed_cap);
                if body.is_empty() {
                    format!("{WAIT_NOTICE}No detailed info on {topic}.")
                } else {
                    format!("{WAIT_NOTICE}{body}")
                }
            }
            Ok(None) => format!(
                "{WAIT_NOTICE}I couldn't find detailed information about {topic} in our knowledge base."
            ),
            Err(_) => {
                tracing::warn!(topic, "detailed knowledge search timed out");
                format!("{WAIT_NOTICE}I found some information about {topic}, but let me give you a quick summary.")
            }
        }
    }

    /// Runs every query concurrently, dedupes by content and keeps the best
    /// scored snippets within the context budget.
    async fn gather(&self, queries: &[String]) -> Option<String> {
        let mut set = JoinSet::new();
        let mut seen_queries = HashSet::new();
        for query in queries.iter().filter(|q| !q.trim().is_empty()) {
            if !seen_queries.insert(query.clone()) {
                continue;
            }
            let backend = Arc::clone(&self.backend);
            let kb = self.knowledge_base_id.clone();
            let query = query.clone();
            set.spawn(async move { backend.search(&kb, &query, 8).await });
        }
        let query_count = seen_queries.len();

        let mut snippets = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(found)) => snippets.extend(found),
                Ok(Err(e)) => tracing::warn!(error = %e, "one knowledge query failed"),
                Err(e) => tracing::warn!(error = %e, "knowledge query task failed"),
            }
        }

        let mut seen = HashSet::new();
        snippets.retain(|s| {
            let key = s.content.trim().to_lowercase();
            !key.is_empty() && seen.insert(key)
        });
        snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
        if snippets.is_empty() {
            return None;
        }

        let mut parts = Vec::new();
        let mut used = 0;
        for (i, snippet) in snippets.iter().enumerate() {
            let text = with_source(
                &format!("[Context {}] {}", i + 1, snippet.content.trim()),
                snippet.source.as_deref(),
            );
            if used + text.len() > self.limits.detailed_context {
                break;
            }
            used += text.len();
            parts.push(text);
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!(
            "{}\n\n[Knowledge Base Context: {} unique snippets across {query_count} queries]",
            parts.join("\n\n"),
            snippets.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticKb(Vec<Snippet>);

    #[async_trait]
    impl KnowledgeBase for StaticKb {
        async fn search(&self, _kb: &str, query: &str, _top_k: usize) -> anyhow::Result<Vec<Snippet>> {
            if query.contains("fail") {
                anyhow::bail!("index offline");
            }
            Ok(self.0.clone())
        }
    }

    struct SlowKb;

    #[async_trait]
    impl KnowledgeBase for SlowKb {
        async fn search(&self, _kb: &str, _query: &str, _top_k: usize) -> anyhow::Result<Vec<Snippet>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    fn snippet(content: &str, source: Option<&str>, score: f32) -> Snippet {
        Snippet {
            content: content.to_string(),
            source: source.map(str::to_string),
            score,
        }
    }

    #[test]
    fn test_sanitize_and_cap() {
        let text = "Intro <b>bold</b>\n```\ncode\n```\nend";
        assert_eq!(sanitize_and_cap(text, 100), "Intro bold\n\nend");
        assert_eq!(sanitize_and_cap("abcdef", 3), "abc…");
    }

    #[tokio::test]
    async fn test_query_formats_sources() {
        let kb = StaticKb(vec![
            snippet("Open 9 to 5.", Some("hours.pdf"), 0.9),
            snippet("Parking is free.", None, 0.5),
        ]);
        let tools = KnowledgeTools::new(Arc::new(kb), "kb1".to_string());
        let reply = tools.query("hours").await;
        assert!(reply.starts_with(WAIT_NOTICE));
        assert!(reply.contains("Open 9 to 5. (Source: hours.pdf)"));
        assert!(reply.contains("Parking is free."));
    }

    #[tokio::test]
    async fn test_query_error_degrades() {
        let tools = KnowledgeTools::new(Arc::new(StaticKb(vec![])), "kb1".to_string());
        assert!(tools.query("fail please").await.contains("encountered an issue"));
        assert!(tools.query("anything").await.contains("couldn't find specific information"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_degrades() {
        let tools = KnowledgeTools::new(Arc::new(SlowKb), "kb1".to_string());
        assert!(tools.query("hours").await.contains("taking longer than expected"));
    }

    #[tokio::test]
    async fn test_detailed_dedupes_and_ranks() {
        let kb = StaticKb(vec![
            snippet("Low score", None, 0.1),
            snippet("High score", Some("faq.md"), 0.9),
            snippet("high SCORE ", None, 0.2),
        ]);
        let tools = KnowledgeTools::new(Arc::new(kb), "kb1".to_string());
        let reply = tools.detailed("pricing").await;
        assert!(reply.contains("[Context 1] High score (Source: faq.md)"));
        assert!(reply.contains("[Context 2] Low score"));
        assert!(reply.contains("2 unique snippets across 5 queries"));
    }
}
