/// Qualitative grade for a student's teach-back explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackCategory {
    Excellent,
    Good,
    NeedsWork,
}

impl FeedbackCategory {
    /// Parses a category case-insensitively. Anything unrecognized is `Good`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "excellent" => FeedbackCategory::Excellent,
            "needs_work" => FeedbackCategory::NeedsWork,
            _ => FeedbackCategory::Good,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            FeedbackCategory::Excellent => {
                "Excellent explanation! You really understand this concept. You explained it clearly and included good examples. Well done!"
            }
            FeedbackCategory::Good => {
                "Good job! You got the main idea across. Let me just add a couple of points to make it even stronger..."
            }
            FeedbackCategory::NeedsWork => {
                "I can see you're on the right track. Let me help clarify a few points, and then maybe you'd like to try again or switch to Learn mode for a refresher?"
            }
        }
    }
}

/// Encouragement text for a feedback label.
pub fn feedback_message(label: &str) -> &'static str {
    FeedbackCategory::from_label(label).message()
}
