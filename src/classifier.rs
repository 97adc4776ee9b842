// 🏷️ Link Classifier - Rules as Data
// Conservative, case-insensitive tagging of ingested links and handles.
// Group vs channel needs a remote lookup, so those stay `unknown`.

use serde::{Deserialize, Serialize};

// ============================================================================
// LINK KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Could be a user, bot, group or channel
    #[serde(rename = "unknown")]
    Unclassified,

    /// Public bot link
    Bot,

    /// Private invitation link
    GroupInvite,
}

impl LinkKind {
    pub const ALL: [LinkKind; 3] = [LinkKind::Unclassified, LinkKind::Bot, LinkKind::GroupInvite];

    /// Stored text form
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Unclassified => "unknown",
            LinkKind::Bot => "bot",
            LinkKind::GroupInvite => "group_invite",
        }
    }

    /// Total: anything unrecognised reads back as `Unclassified`
    pub fn parse(raw: &str) -> Self {
        match raw {
            "bot" => LinkKind::Bot,
            "group_invite" => LinkKind::GroupInvite,
            _ => LinkKind::Unclassified,
        }
    }
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRule {
    /// Rule ID for tracking
    pub id: String,

    /// Patterns that must ALL match (supports wildcards with *)
    pub patterns: Vec<String>,

    /// Kind to assign
    pub kind: LinkKind,

    /// Priority (higher = applied first)
    #[serde(default)]
    pub priority: i32,
}

impl LinkRule {
    fn new(id: &str, patterns: &[&str], kind: LinkKind, priority: i32) -> Self {
        LinkRule {
            id: id.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            kind,
            priority,
        }
    }

    /// Check if every pattern matches the given (already lowercased) text
    pub fn matches(&self, text_lower: &str) -> bool {
        !self.patterns.is_empty()
            && self
                .patterns
                .iter()
                .all(|p| pattern_matches(&p.to_lowercase(), text_lower))
    }
}

/// `*` wildcards anchor at both ends; without `*` the pattern is a substring test
fn pattern_matches(pattern_lower: &str, text_lower: &str) -> bool {
    if !pattern_lower.contains('*') {
        return text_lower.contains(pattern_lower);
    }

    let parts: Vec<&str> = pattern_lower.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];

    if !text_lower.starts_with(first) {
        return false;
    }
    if text_lower.len() < first.len() + last.len() || !text_lower.ends_with(last) {
        return false;
    }

    // Middle parts must appear in order between the anchors
    let mut current_pos = first.len();
    let end_limit = text_lower.len() - last.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text_lower[current_pos..end_limit].find(part) {
            Some(pos) => current_pos += pos + part.len(),
            None => return false,
        }
    }

    true
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct LinkClassifier {
    rules: Vec<LinkRule>,
}

impl LinkClassifier {
    /// Create engine from a list of rules
    pub fn from_rules(mut rules: Vec<LinkRule>) -> Self {
        // Sort by priority (higher first); stable, so ties keep declaration order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        LinkClassifier { rules }
    }

    /// Built-in rule table for the known link host
    pub fn builtin() -> Self {
        LinkClassifier::from_rules(vec![
            LinkRule::new("mention", &["@*"], LinkKind::Unclassified, 30),
            LinkRule::new("joinchat-path", &["t.me/joinchat"], LinkKind::GroupInvite, 20),
            LinkRule::new("plus-segment", &["/+/"], LinkKind::GroupInvite, 20),
            LinkRule::new("plus-token", &["t.me/+"], LinkKind::GroupInvite, 20),
            LinkRule::new("joinchat", &["joinchat"], LinkKind::GroupInvite, 20),
            LinkRule::new("bot", &["t.me/", "bot"], LinkKind::Bot, 10),
        ])
    }

    /// First matching rule wins; no match means `Unclassified`
    pub fn classify(&self, identifier: &str) -> LinkKind {
        let text_lower = identifier.trim().to_lowercase();

        self.rules
            .iter()
            .find(|rule| rule.matches(&text_lower))
            .map(|rule| rule.kind)
            .unwrap_or(LinkKind::Unclassified)
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for LinkClassifier {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Classify with the built-in rules
pub fn classify(identifier: &str) -> LinkKind {
    LinkClassifier::builtin().classify(identifier)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_links() {
        assert_eq!(classify("https://t.me/+AbCd1234"), LinkKind::GroupInvite);
        assert_eq!(classify("https://t.me/joinchat/AAAA"), LinkKind::GroupInvite);
        assert_eq!(classify("tg://join?invite=x&joinchat"), LinkKind::GroupInvite);
    }

    #[test]
    fn test_mention_sigil_fires_first() {
        assert_eq!(classify("@somebot"), LinkKind::Unclassified);
        assert_eq!(classify("@joinchat"), LinkKind::Unclassified);
    }

    #[test]
    fn test_bot_links() {
        assert_eq!(classify("https://t.me/examplebot"), LinkKind::Bot);
        assert_eq!(classify("https://t.me/Bot_Father_Helper"), LinkKind::Bot);
        // Host marker without "bot"
        assert_eq!(classify("https://t.me/somechannel"), LinkKind::Unclassified);
        // "bot" without the host marker
        assert_eq!(classify("https://example.com/robot"), LinkKind::Unclassified);
    }

    #[test]
    fn test_invite_beats_bot() {
        assert_eq!(classify("https://t.me/+botinvite"), LinkKind::GroupInvite);
    }

    #[test]
    fn test_case_insensitive_and_deterministic() {
        for raw in ["HTTPS://T.ME/+ABCD", "https://T.me/ExampleBOT", "@SomeBot", ""] {
            let lower = classify(&raw.to_lowercase());
            assert_eq!(classify(raw), lower);
            assert_eq!(classify(raw), classify(raw));
        }
    }

    #[test]
    fn test_wildcard_pattern() {
        assert!(pattern_matches("@*", "@name"));
        assert!(!pattern_matches("@*", "name@"));
        assert!(pattern_matches("https://*/+*", "https://t.me/+x"));
        assert!(!pattern_matches("a*a", "a"));
    }

    #[test]
    fn test_kind_text_round_trip() {
        for kind in LinkKind::ALL {
            assert_eq!(LinkKind::parse(kind.as_str()), kind);
        }
        assert_eq!(LinkKind::parse("channel"), LinkKind::Unclassified);
    }

    #[test]
    fn test_rule_priority_order() {
        let classifier = LinkClassifier::builtin();
        assert_eq!(classifier.rule_count(), 6);
        assert_eq!(classifier.rules[0].id, "mention");
        assert_eq!(classifier.rules.last().unwrap().id, "bot");
    }
}
