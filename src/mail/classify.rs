//! Inbound Mail Classification
//!
//! Pure keyword heuristics over subject and body: urgency decides the
//! priority, a category map tags the mail, and a spam score accumulates
//! from phrase hits, shouting, and link density.

use crate::executor::types::Priority;

const URGENT_KEYWORDS: [&str; 6] = [
    "urgent",
    "asap",
    "immediately",
    "critical",
    "emergency",
    "deadline",
];

const SPAM_PHRASES: [&str; 8] = [
    "free money",
    "click here",
    "act now",
    "limited time offer",
    "winner",
    "no obligation",
    "risk free",
    "unsubscribe now",
];

const CATEGORY_KEYWORDS: [(&str, &[&str]); 5] = [
    ("billing", &["invoice", "payment", "receipt", "refund", "billing"]),
    ("support", &["help", "issue", "problem", "error", "broken", "support"]),
    ("marketing", &["offer", "sale", "discount", "promotion", "newsletter"]),
    ("scheduling", &["meeting", "calendar", "schedule", "appointment", "invite"]),
    ("account", &["password", "login", "account", "verification", "security"]),
];

/// Spam score above which a mail is demoted to low priority.
const SPAM_DEMOTION_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub priority: Priority,
    pub categories: Vec<String>,
    pub spam_score: f32,
}

pub fn classify(subject: &str, body: &str) -> Classification {
    let subject_lower = subject.to_lowercase();
    let combined = format!("{} {}", subject_lower, body.to_lowercase());

    let spam_score = spam_score(subject, &combined);
    let urgent = URGENT_KEYWORDS
        .iter()
        .any(|keyword| subject_lower.contains(keyword));

    let priority = if spam_score > SPAM_DEMOTION_THRESHOLD {
        Priority::Low
    } else if urgent {
        Priority::High
    } else {
        Priority::Normal
    };

    let mut categories: Vec<String> = CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| combined.contains(k)))
        .map(|(category, _)| category.to_string())
        .collect();
    if categories.is_empty() {
        categories.push("general".to_string());
    }

    Classification {
        priority,
        categories,
        spam_score,
    }
}

fn spam_score(subject: &str, combined_lower: &str) -> f32 {
    let mut score = 0.0f32;

    for phrase in SPAM_PHRASES {
        if combined_lower.contains(phrase) {
            score += 0.25;
        }
    }

    if caps_ratio(subject) > 0.5 {
        score += 0.2;
    }
    let links = combined_lower.matches("http://").count()
        + combined_lower.matches("https://").count();
    if links > 3 {
        score += 0.2;
    }

    score.min(1.0)
}

/// Share of uppercase letters among the alphabetic chars of the subject.
fn caps_ratio(subject: &str) -> f32 {
    let letters: Vec<char> = subject.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return 0.0;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f32 / letters.len() as f32
}
