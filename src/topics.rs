//! Topic extraction and duplicate detection for generated cards.
//!
//! Cards are expected to look like `Concept：Explanation`. The concept part
//! is the card's topic; two cards collide when one topic contains the other,
//! ignoring case.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

static LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:topic|主题|知识点)\s*[:：]\s*").expect("label prefix pattern is valid")
});

fn is_colon(c: char) -> bool {
    c == ':' || c == '：'
}

fn clean(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '*' || c == '#')
}

/// Canonical topic of a card's raw content. Never fails; content without the
/// expected structure yields the whole trimmed input.
pub fn extract_topic(content: &str) -> String {
    let trimmed = content.trim();
    let body = match LABEL_PREFIX.find(trimmed) {
        Some(label) => &trimmed[label.end()..],
        None => trimmed,
    };

    let head = match body.find(is_colon) {
        Some(idx) => clean(&body[..idx]),
        None => clean(body),
    };

    if !head.is_empty() {
        head.to_string()
    } else if !body.trim().is_empty() {
        body.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Case-insensitive bidirectional containment against every excluded topic.
pub fn is_duplicate<I, S>(candidate: &str, excluded: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let candidate = candidate.trim().to_lowercase();
    if candidate.is_empty() {
        return false;
    }

    excluded.into_iter().any(|topic| {
        let topic = topic.as_ref().trim().to_lowercase();
        !topic.is_empty()
            && (topic == candidate || topic.contains(&candidate) || candidate.contains(&topic))
    })
}

/// Topics a generation must avoid, most recent first.
///
/// The set is a plain value: the orchestrator threads it through each
/// generation call and extends it with [`ExclusionSet::with_topic`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionSet {
    topics: VecDeque<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from card contents ordered most recent first.
    pub fn from_history<I, S>(contents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topics = contents
            .into_iter()
            .map(|content| extract_topic(content.as_ref()))
            .filter(|topic| !topic.is_empty())
            .collect();
        Self { topics }
    }

    /// Returns the set with `topic` recorded as the most recent entry.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        if !topic.trim().is_empty() {
            self.topics.push_front(topic);
        }
        self
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    /// The `limit` most recent topics.
    pub fn most_recent(&self, limit: usize) -> Vec<&str> {
        self.topics().take(limit).collect()
    }

    pub fn is_duplicate(&self, candidate: &str) -> bool {
        is_duplicate(candidate, self.topics())
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_full_width_colon() {
        assert_eq!(extract_topic("勾股定理：内容"), "勾股定理");
    }

    #[test]
    fn test_extract_strips_label_prefix() {
        assert_eq!(extract_topic("Topic: Newton's Law: details"), "Newton's Law");
        assert_eq!(extract_topic("topic：Inertia：objects resist change"), "Inertia");
        assert_eq!(extract_topic("主题：光合作用：植物利用光能"), "光合作用");
        assert_eq!(extract_topic("知识点: 分数: 表示部分与整体"), "分数");
    }

    #[test]
    fn test_extract_without_colon_returns_whole_input() {
        assert_eq!(extract_topic("no colon here"), "no colon here");
        assert_eq!(extract_topic("   padded text  "), "padded text");
    }

    #[test]
    fn test_extract_uses_first_colon_of_either_width() {
        assert_eq!(extract_topic("Ratio: a:b compares quantities"), "Ratio");
        assert_eq!(extract_topic("比例：a:b 表示两个量的关系"), "比例");
    }

    #[test]
    fn test_extract_trims_markdown_emphasis() {
        assert_eq!(extract_topic("**勾股定理**：直角三角形"), "勾股定理");
    }

    #[test]
    fn test_extract_degrades_on_empty_concept() {
        assert_eq!(extract_topic("：只有解释"), "：只有解释");
        assert_eq!(extract_topic(""), "");
        assert_eq!(extract_topic("Topic:"), "Topic:");
    }

    #[test]
    fn test_duplicate_by_containment() {
        assert!(is_duplicate("勾股定理的应用", ["勾股定理"]));
        assert!(is_duplicate("勾股定理", ["勾股定理的逆定理"]));
        assert!(is_duplicate(
            "applications of the Pythagorean theorem",
            ["Pythagorean theorem"]
        ));
    }

    #[test]
    fn test_duplicate_is_case_insensitive() {
        assert!(is_duplicate("ABC", ["abc"]));
    }

    #[test]
    fn test_empty_exclusions_never_duplicate() {
        assert!(!is_duplicate("光合作用", Vec::<String>::new()));
        assert!(!is_duplicate("光合作用", ["", "  "]));
        assert!(!is_duplicate("", ["光合作用"]));
    }

    #[test]
    fn test_distinct_topics_are_not_duplicates() {
        assert!(!is_duplicate("光合作用", ["勾股定理", "牛顿第一定律"]));
    }

    #[test]
    fn test_exclusion_set_keeps_most_recent_first() {
        let set = ExclusionSet::from_history(["圆周率：π", "勾股定理：a²+b²=c²"]);
        assert_eq!(set.most_recent(10), vec!["圆周率", "勾股定理"]);

        let set = set.with_topic("光合作用");
        assert_eq!(set.len(), 3);
        assert_eq!(set.most_recent(2), vec!["光合作用", "圆周率"]);
        assert!(set.is_duplicate("光合作用的条件"));
    }

    #[test]
    fn test_exclusion_set_ignores_blank_topics() {
        let set = ExclusionSet::new().with_topic("   ");
        assert!(set.is_empty());
        assert!(!set.is_duplicate("任何主题"));
    }
}
