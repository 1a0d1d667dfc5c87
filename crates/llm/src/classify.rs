/// How much context a question needs beyond the base system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryScope {
    DomainOnly,
    DomainPlusContext,
}

/// Strategy deciding whether repository context is attached to a request.
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, text: &str) -> QueryScope;
}

/// Never attaches extra context.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainOnlyClassifier;

impl QueryClassifier for DomainOnlyClassifier {
    fn classify(&self, _text: &str) -> QueryScope {
        QueryScope::DomainOnly
    }
}

pub const DEFAULT_CONTEXT_KEYWORDS: &[&str] = &[
    "code",
    "function",
    "implementation",
    "module",
    "repo",
    "repository",
    "source",
    "struct",
    "trait",
];

/// Whole-word keyword match, case-insensitive.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_KEYWORDS.iter().copied())
    }
}

impl KeywordClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|keyword| keyword.into().trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }
}

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> QueryScope {
        let lowered = text.to_lowercase();
        let hit = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .any(|word| self.keywords.iter().any(|keyword| keyword == word));

        if hit {
            QueryScope::DomainPlusContext
        } else {
            QueryScope::DomainOnly
        }
    }
}

/// Assembles the system message from the base prompt and optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    pub base: String,
    pub repository_context: Option<String>,
}

impl SystemPrompt {
    pub fn render(&self, scope: QueryScope) -> String {
        match (scope, self.repository_context.as_deref()) {
            (QueryScope::DomainPlusContext, Some(context)) if !context.trim().is_empty() => {
                format!("{}\n\n{}", self.base.trim_end(), context.trim())
            }
            _ => self.base.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_classifier_matches_whole_words_only() {
        let classifier = KeywordClassifier::default();
        assert_eq!(
            classifier.classify("Where is the retry Function defined?"),
            QueryScope::DomainPlusContext
        );
        assert_eq!(
            classifier.classify("What's a good recipe for codeine-free cough syrup?"),
            QueryScope::DomainOnly
        );
    }

    #[test]
    fn context_is_only_rendered_for_context_scope() {
        let prompt = SystemPrompt {
            base: "You are helpful.".to_string(),
            repository_context: Some("Repo: parley".to_string()),
        };
        assert_eq!(prompt.render(QueryScope::DomainOnly), "You are helpful.");
        assert_eq!(
            prompt.render(QueryScope::DomainPlusContext),
            "You are helpful.\n\nRepo: parley"
        );
    }
}
