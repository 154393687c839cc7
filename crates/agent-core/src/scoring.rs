//! Progress scoring policy.
//!
//! Task intent is read from keywords in the task description and the
//! current page classification maps to a score inside that intent's band.
//! The keyword sets and the ladder values are policy data, not contract:
//! swap the table, keep the engine.

use serde::{Deserialize, Serialize};

use pagecrew_core_types::{ActionResult, PageType};

/// Coarse intent classes the default policy distinguishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskIntent {
    /// Buy / order / add-to-cart style tasks.
    Acquisition,
    /// Find / search style tasks.
    Search,
    /// Go-to / open style tasks.
    Navigation,
    Unknown,
}

/// Replaceable scoring table. Defaults carry the bilingual keyword sets and
/// the acquisition ladder the system shipped with.
#[derive(Clone, Debug)]
pub struct ScorePolicy {
    pub acquisition_keywords: Vec<String>,
    pub search_keywords: Vec<String>,
    pub navigation_keywords: Vec<String>,
    /// Page-type ladder for acquisition tasks.
    pub acquisition_ladder: Vec<(PageType, f32)>,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            acquisition_keywords: owned(&["купи", "закажи", "добавь", "buy", "order", "add"]),
            search_keywords: owned(&["найди", "поиск", "search", "find"]),
            navigation_keywords: owned(&["зайди", "открой", "go to", "open", "visit"]),
            acquisition_ladder: vec![
                (PageType::Catalog, 0.2),
                (PageType::Product, 0.4),
                (PageType::Cart, 0.6),
                (PageType::Checkout, 0.8),
                (PageType::Confirmation, 1.0),
            ],
        }
    }
}

impl ScorePolicy {
    /// Classify the task description by keyword presence. First matching
    /// intent wins, in acquisition > search > navigation order.
    pub fn classify_intent(&self, task: &str) -> TaskIntent {
        let task = task.to_lowercase();
        if self.acquisition_keywords.iter().any(|kw| task.contains(kw)) {
            TaskIntent::Acquisition
        } else if self.search_keywords.iter().any(|kw| task.contains(kw)) {
            TaskIntent::Search
        } else if self.navigation_keywords.iter().any(|kw| task.contains(kw)) {
            TaskIntent::Navigation
        } else {
            TaskIntent::Unknown
        }
    }

    /// Map (intent, page classification, last result) to a score in [0, 1].
    /// Deterministic for a given (task, page-type) pair.
    pub fn score(
        &self,
        intent: TaskIntent,
        page_type: PageType,
        elements_present: bool,
        previous_result: Option<&ActionResult>,
    ) -> f32 {
        let score = match intent {
            TaskIntent::Acquisition => self
                .acquisition_ladder
                .iter()
                .find(|(pt, _)| *pt == page_type)
                .map(|(_, s)| *s)
                .unwrap_or(0.0),
            TaskIntent::Search => {
                let mut score = 0.0;
                if elements_present {
                    score = 0.5;
                }
                if previous_result.map(|r| r.success).unwrap_or(false) {
                    score = 0.8;
                }
                score
            }
            TaskIntent::Navigation => {
                if page_type.is_known() {
                    0.7
                } else {
                    0.3
                }
            }
            TaskIntent::Unknown => 0.0,
        };
        score.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_classification_handles_both_languages() {
        let policy = ScorePolicy::default();
        assert_eq!(policy.classify_intent("купи пиццу"), TaskIntent::Acquisition);
        assert_eq!(policy.classify_intent("Buy a phone"), TaskIntent::Acquisition);
        assert_eq!(policy.classify_intent("найди отзывы"), TaskIntent::Search);
        assert_eq!(policy.classify_intent("open the blog"), TaskIntent::Navigation);
        assert_eq!(policy.classify_intent("сделай что-нибудь"), TaskIntent::Unknown);
    }

    #[test]
    fn acquisition_ladder_is_monotone() {
        let policy = ScorePolicy::default();
        let pages = [
            PageType::Catalog,
            PageType::Product,
            PageType::Cart,
            PageType::Checkout,
            PageType::Confirmation,
        ];
        let mut last = -1.0f32;
        for page in pages {
            let score = policy.score(TaskIntent::Acquisition, page, true, None);
            assert!(score > last, "{page} should score above {last}");
            last = score;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn same_inputs_same_score() {
        let policy = ScorePolicy::default();
        let a = policy.score(TaskIntent::Acquisition, PageType::Cart, true, None);
        let b = policy.score(TaskIntent::Acquisition, PageType::Cart, true, None);
        assert_eq!(a, b);
        assert_eq!(a, 0.6);
    }

    #[test]
    fn search_scores_step_with_result_success() {
        let policy = ScorePolicy::default();
        assert_eq!(
            policy.score(TaskIntent::Search, PageType::Unknown, false, None),
            0.0
        );
        assert_eq!(
            policy.score(TaskIntent::Search, PageType::Unknown, true, None),
            0.5
        );
        let ok = ActionResult::ok("click result");
        assert_eq!(
            policy.score(TaskIntent::Search, PageType::Unknown, true, Some(&ok)),
            0.8
        );
    }

    #[test]
    fn navigation_rewards_a_recognized_page() {
        let policy = ScorePolicy::default();
        assert_eq!(
            policy.score(TaskIntent::Navigation, PageType::Profile, false, None),
            0.7
        );
        assert_eq!(
            policy.score(TaskIntent::Navigation, PageType::Unknown, false, None),
            0.3
        );
    }
}
