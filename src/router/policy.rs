//! Request classification policy
//!
//! Classification is advisory. An explicit declared type always wins; the
//! policy only decides unspecified requests.

use regex::Regex;
use std::sync::LazyLock;

use super::types::{Request, RequestKind};

/// Requests estimated at more features than this are big
pub const DEFAULT_BIG_THRESHOLD: usize = 5;

static BUG_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(fix|fixes|broken|error|errors|bug|bugs|crash|crashes|crashing|doesn'?t work|not working|fails|failing|issue|problem|wrong|incorrect|unexpected)\b",
    )
    .expect("valid regex")
});

const FEATURE_KEYWORDS: &[&str] = &[
    "authentication",
    "oauth",
    "profile",
    "password",
    "two-factor",
    "session",
    "dashboard",
    "admin",
    "settings",
    "notifications",
    "database",
    "api",
    "integration",
    "multi-tenant",
    "real-time",
    "search",
    "filter",
    "pagination",
    "upload",
    "export",
];

/// Heuristics behind request classification
pub trait ClassificationPolicy: Send + Sync {
    /// Whether the text reads like a defect report
    fn is_bug(&self, text: &str) -> bool;

    /// Rough number of features the request will become
    fn estimate_feature_count(&self, text: &str) -> usize;
}

/// Keyword and length based policy
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordPolicy;

impl ClassificationPolicy for KeywordPolicy {
    fn is_bug(&self, text: &str) -> bool {
        BUG_LANGUAGE.is_match(text)
    }

    fn estimate_feature_count(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        let words = text.split_whitespace().count();

        let base = match words {
            0..10 => 1,
            10..20 => 2,
            20..30 => 3,
            _ => 4,
        };
        let conjunctions = lower.matches(" and ").count() + lower.matches(" with ").count();
        let keywords = FEATURE_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
        let commas = text.matches(',').count();
        let list_items = if commas > 0 { commas + 1 } else { 0 };

        base + conjunctions + keywords + list_items / 2
    }
}

/// Pick the pipeline for a request
pub fn classify(request: &Request, policy: &dyn ClassificationPolicy, big_threshold: usize) -> RequestKind {
    if let Some(kind) = request.declared_type.as_kind() {
        return kind;
    }
    if policy.is_bug(&request.description) {
        return RequestKind::Bug;
    }
    let estimate = policy.estimate_feature_count(&request.description);
    let kind = if estimate > big_threshold {
        RequestKind::Big
    } else {
        RequestKind::Small
    };
    tracing::debug!(estimate, big_threshold, %kind, "Classified request");
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::types::DeclaredType;

    struct Fixed(usize);

    impl ClassificationPolicy for Fixed {
        fn is_bug(&self, _: &str) -> bool {
            false
        }
        fn estimate_feature_count(&self, _: &str) -> usize {
            self.0
        }
    }

    fn auto(text: &str) -> Request {
        Request::new(text, DeclaredType::Unspecified)
    }

    #[test]
    fn eight_estimated_features_is_big() {
        assert_eq!(classify(&auto("anything"), &Fixed(8), 5), RequestKind::Big);
        assert_eq!(classify(&auto("anything"), &Fixed(5), 5), RequestKind::Small);
    }

    #[test]
    fn declared_type_wins() {
        let req = Request::new("the login button is broken", DeclaredType::Small);
        assert_eq!(classify(&req, &KeywordPolicy, 5), RequestKind::Small);
    }

    #[test]
    fn defect_language_is_bug() {
        assert_eq!(
            classify(&auto("Login doesn't work after password reset"), &KeywordPolicy, 5),
            RequestKind::Bug
        );
        // Word boundaries: "prefix" is not "fix"
        assert!(!KeywordPolicy.is_bug("add a prefix option to slugs"));
    }

    #[test]
    fn broad_requests_estimate_high() {
        let small = "Add a dark mode toggle";
        let big = "Build user authentication with OAuth and two-factor, a profile page, \
                   admin dashboard, notifications, search and pagination for the API";
        assert_eq!(KeywordPolicy.estimate_feature_count(small), 1);
        assert!(KeywordPolicy.estimate_feature_count(big) > DEFAULT_BIG_THRESHOLD);
        assert_eq!(classify(&auto(big), &KeywordPolicy, 5), RequestKind::Big);
    }
}
