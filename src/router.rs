//! Question classification and partition selection.

use crate::config::Config;
use crate::model::{Partition, ValidationError};
use serde::{Deserialize, Serialize};

const VISUAL_TERMS: &[&str] = &[
    "chart",
    "image",
    "picture",
    "diagram",
    "photo",
    "figure",
    "graph",
    "plot",
    "screenshot",
    "table",
    "visual",
    "shown",
    "looks like",
];

const EXPLORATORY_TERMS: &[&str] = &[
    "summarize",
    "summary",
    "overview",
    "what is this document about",
    "what's in",
    "what is in",
    "key findings",
    "high level",
    "overall",
];

/// Retrieval intent inferred from a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Answer from text and OCR fragments.
    Textual,
    /// Answer from image fragments.
    Visual,
    /// Broad question; search both partitions.
    Exploratory,
}

impl Intent {
    /// Partitions searched for this intent, in merge order.
    pub fn partitions(self) -> &'static [Partition] {
        match self {
            Self::Textual => &[Partition::Text],
            Self::Visual => &[Partition::Image],
            Self::Exploratory => &Partition::ALL,
        }
    }
}

/// Keyword lists driving classification. Entries containing whitespace are matched as
/// phrases; single words are matched on token boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterKeywords {
    visual: Vec<String>,
    exploratory: Vec<String>,
}

impl Default for RouterKeywords {
    fn default() -> Self {
        Self {
            visual: VISUAL_TERMS.iter().map(|term| term.to_string()).collect(),
            exploratory: EXPLORATORY_TERMS.iter().map(|term| term.to_string()).collect(),
        }
    }
}

impl RouterKeywords {
    /// Defaults extended with extra terms.
    pub fn with_extra(visual: &[String], exploratory: &[String]) -> Self {
        let mut keywords = Self::default();
        keywords.visual.extend(visual.iter().map(|term| normalize(term)));
        keywords
            .exploratory
            .extend(exploratory.iter().map(|term| normalize(term)));
        keywords
    }
}

/// Output of [`QueryRouter::route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    /// Inferred intent.
    pub intent: Intent,
    /// Partitions to search, in merge order.
    pub partitions: Vec<Partition>,
    /// Results requested per partition.
    pub top_k: usize,
}

/// Pure classifier mapping a question to a [`RoutePlan`].
#[derive(Debug, Clone)]
pub struct QueryRouter {
    keywords: RouterKeywords,
    top_k_default: usize,
    top_k_exploratory: usize,
}

impl QueryRouter {
    /// Create a router with explicit keyword lists and per-intent defaults.
    pub fn new(keywords: RouterKeywords, top_k_default: usize, top_k_exploratory: usize) -> Self {
        Self {
            keywords,
            top_k_default: top_k_default.max(1),
            top_k_exploratory: top_k_exploratory.max(1),
        }
    }

    /// Router configured from `TOP_K_*` and `ROUTER_*_TERMS`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RouterKeywords::with_extra(&config.router_visual_terms, &config.router_exploratory_terms),
            config.top_k_default,
            config.top_k_exploratory,
        )
    }

    /// Classify `question`. Visual vocabulary wins over exploratory vocabulary.
    pub fn classify(&self, question: &str) -> Intent {
        let normalized = normalize(question);
        let tokens = tokenize(&normalized);

        if matches_any(&self.keywords.visual, &tokens) {
            Intent::Visual
        } else if matches_any(&self.keywords.exploratory, &tokens) {
            Intent::Exploratory
        } else {
            Intent::Textual
        }
    }

    /// Validate and route `question`. `top_k` overrides the per-intent default.
    pub fn route(&self, question: &str, top_k: Option<usize>) -> Result<RoutePlan, ValidationError> {
        if question.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let intent = self.classify(question);
        let default_k = match intent {
            Intent::Exploratory => self.top_k_exploratory,
            Intent::Textual | Intent::Visual => self.top_k_default,
        };
        Ok(RoutePlan {
            intent,
            partitions: intent.partitions().to_vec(),
            top_k: top_k.unwrap_or(default_k).max(1),
        })
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace('\u{2019}', "'")
}

/// Words of `text`; apostrophes stay inside words so "what's" is one token.
fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|token| !token.is_empty())
        .collect()
}

/// A term matches a run of whole tokens. Its last word may also appear with a plural "s".
fn matches_any(terms: &[String], tokens: &[&str]) -> bool {
    terms.iter().any(|term| {
        let words = tokenize(term);
        !words.is_empty()
            && tokens.windows(words.len()).any(|window| {
                window.iter().zip(&words).enumerate().all(|(index, (token, word))| {
                    token == word
                        || (index + 1 == words.len() && token.strip_suffix('s') == Some(*word))
                })
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> QueryRouter {
        QueryRouter::new(RouterKeywords::default(), 1, 5)
    }

    #[test]
    fn visual_terms_route_to_image_partition_only() {
        let plan = router().route("Show me the chart", None).expect("plan");
        assert_eq!(plan.intent, Intent::Visual);
        assert_eq!(plan.partitions, vec![Partition::Image]);
        assert_eq!(plan.top_k, 1);
    }

    #[test]
    fn exploratory_terms_search_both_partitions() {
        let plan = router().route("Please SUMMARIZE this", None).expect("plan");
        assert_eq!(plan.intent, Intent::Exploratory);
        assert_eq!(plan.partitions, vec![Partition::Text, Partition::Image]);
        assert_eq!(plan.top_k, 5);
    }

    #[test]
    fn plain_questions_are_textual() {
        let plan = router().route("What color is the sky?", Some(3)).expect("plan");
        assert_eq!(plan.intent, Intent::Textual);
        assert_eq!(plan.partitions, vec![Partition::Text]);
        assert_eq!(plan.top_k, 3);
    }

    #[test]
    fn words_match_on_boundaries_only() {
        // "graphic" and "plotting" must not trigger the visual vocabulary.
        assert_eq!(router().classify("graphic design plotting history"), Intent::Textual);
        assert_eq!(router().classify("Compare the two graphs"), Intent::Visual);
    }

    #[test]
    fn phrases_match_across_whitespace_runs() {
        assert_eq!(router().classify("What are the  KEY\nfindings?"), Intent::Exploratory);
        assert_eq!(router().classify("What it looks like"), Intent::Visual);
    }

    #[test]
    fn visual_wins_over_exploratory() {
        assert_eq!(router().classify("Summarize the chart"), Intent::Visual);
    }

    #[test]
    fn empty_questions_are_rejected() {
        assert_eq!(router().route("   \n", None), Err(ValidationError::EmptyQuery));
    }

    #[test]
    fn extra_terms_extend_defaults() {
        let keywords =
            RouterKeywords::with_extra(&["Infographic".to_string()], &["gist".to_string()]);
        let router = QueryRouter::new(keywords, 1, 5);
        assert_eq!(router.classify("which infographic lists costs"), Intent::Visual);
        assert_eq!(router.classify("give me the gist"), Intent::Exploratory);
        assert_eq!(router.classify("chart"), Intent::Visual);
    }

    #[test]
    fn tables_and_contents_questions_are_recognised() {
        assert_eq!(router().classify("Which table lists regional costs?"), Intent::Visual);
        assert_eq!(router().classify("What's in this report?"), Intent::Exploratory);
        assert_eq!(router().classify("What\u{2019}s in the appendix"), Intent::Exploratory);
        assert_eq!(router().classify("what is in the deck"), Intent::Exploratory);
        assert_eq!(router().classify("What is inflation?"), Intent::Textual);
        assert_eq!(router().classify("What is insurance coverage?"), Intent::Textual);
    }
}
