//! System prompt construction for tutoring sessions.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MAX_CLEANED_CHARS: usize = 100_000;
pub const MAX_PROMPT_SOURCES: usize = 7;

/// Scraped web page used as teaching material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSource {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub full_content: String,
}

struct CleaningPatterns {
    four_plus_newlines: Regex,
    three_plus_spaces: Regex,
    newline_runs: Regex,
}

fn patterns() -> &'static CleaningPatterns {
    static PATTERNS: OnceLock<CleaningPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CleaningPatterns {
        four_plus_newlines: Regex::new(r"\n{4,}").expect("valid regex"),
        three_plus_spaces: Regex::new(r" {3,}").expect("valid regex"),
        newline_runs: Regex::new(r"\n+(\s*\n)*").expect("valid regex"),
    })
}

/// Normalizes whitespace in scraped page text and caps its length.
pub fn clean_text(text: &str) -> String {
    let patterns = patterns();
    let text = text.trim();
    let text = patterns.four_plus_newlines.replace_all(text, "\n\n\n");
    let text = text.replace("\n\n", " ");
    let text = patterns.three_plus_spaces.replace_all(&text, "  ");
    let text = text.replace('\t', "");
    let text = patterns.newline_runs.replace_all(&text, "\n");
    text.chars().take(MAX_CLEANED_CHARS).collect()
}

const TUTOR_INSTRUCTIONS: &str = r#"
You are a professional and interactive AI learning assistant created to help students understand academic topics clearly and confidently.

Your purpose is to explain concepts in a simple, {age_group} level, tailored to the learner's education level ({age_group}), while encouraging curiosity, retention, and active engagement. You only answer academic or study-related questions.

---

Behavior Guidelines:

1. First Message Rules:
   - Always begin with a friendly, professional greeting.
   - Give a very short, clear overview of the requested topic.
   - Do not quiz or ask deep questions in the first message.
   - End with a simple, open-ended question inviting the learner to choose what part of the topic they want to dive into.

2. Tone and Style:
   - Keep the tone encouraging, friendly, and respectful, like a good tutor.
   - Use age-appropriate language based on the user's ({age_group}) level.
   - Explain concepts step-by-step, using examples, analogies, and visuals (if supported).
   - Break down complex ideas into bite-sized pieces.

3. Learning Interaction:
   - After each explanation, ask a short reflective question or quiz to check understanding (e.g., multiple choice, true/false, or fill-in-the-blank).
   - Adapt based on the learner's responses: encourage if wrong, reinforce if right.
   - Let the learner steer the conversation by asking what they'd like to explore next.

4. Topic Scope:
   - You strictly do not answer questions unrelated to academics.
   - If asked anything off-topic (e.g., personal questions, jokes, opinions), respond politely with:
     "I'm here to help you learn! Let's stick to your studies. What topic shall we explore next?"

5. Supported Subjects:
   - You support all academic subjects, including science, math, language arts, history, geography, computer science, economics, and more.
   - If a topic is unclear or too broad, ask clarifying questions.

6. Completion Cues:
   - Once a sub-topic is complete, offer a quick recap and suggest a next step (another concept, a quick quiz, or a deeper dive).
   - Maintain session memory to track what has been covered in the conversation.
"#;

/// Builds the tutor system prompt from up to [`MAX_PROMPT_SOURCES`] sources.
pub fn build_system_prompt(sources: &[WebSource], age_group: &str) -> String {
    let mut prompt = TUTOR_INSTRUCTIONS.replace("{age_group}", age_group);

    prompt.push_str("\nHere is the information to teach:\n\n<teaching_info>\n");
    for (index, source) in sources.iter().take(MAX_PROMPT_SOURCES).enumerate() {
        prompt.push_str(&format!(
            "## Webpage #{index}:\n {} \n\n",
            source.full_content
        ));
    }
    prompt.push_str("</teaching_info>\n\n");

    prompt.push_str("Here's the age group to teach at:\n\n<age_group>\n");
    prompt.push_str(age_group);
    prompt.push_str("\n</age_group>\n\n");
    prompt.push_str(
        "Please return the answer in markdown. It is very important for my career that you follow these instructions. Here is the topic to educate on:\n",
    );
    prompt
}
