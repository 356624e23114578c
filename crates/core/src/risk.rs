//! Recognises a student message that asks about suicidal ideation or
//! self-harm. The persona's disclosure gate and the grade aggregator's risk
//! ceiling both use it, so a question that unlocks the disclosure also counts
//! as having explored risk.

/// Phrases matched at the start of a word.
const RISK_PHRASES: &[&str] = &[
    "suicid",
    "self-harm",
    "self harm",
    "selfharm",
    "self-injur",
    "want to die",
    "wanting to die",
    "wanted to die",
    "wish you were dead",
    "wished you were dead",
    "wish you weren't alive",
    "rather be dead",
    "better off dead",
    "better off without you",
    "ending it",
    "end it all",
    "end your life",
    "ending your life",
    "end your own life",
    "take your own life",
    "taking your own life",
    "not being here",
    "not wanting to be here",
    "thoughts of death",
    "thoughts about death",
    "thinking about death",
    "worth living",
    "no reason to live",
];

/// Verb stems that form a self-harm question when "yourself" follows closely.
const HARM_STEMS: &[&str] = &["hurt", "harm", "kill", "injur", "cut"];

/// How far (in bytes) "yourself" may trail a harm stem.
const HARM_WINDOW: usize = 24;

fn normalize(message: &str) -> String {
    message.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Positions where `stem` occurs at the start of a word.
fn word_starts<'a>(text: &'a str, stem: &'a str) -> impl Iterator<Item = usize> + 'a {
    text.match_indices(stem)
        .map(|(at, _)| at)
        .filter(move |&at| text[..at].chars().next_back().is_none_or(|c| !c.is_alphanumeric()))
}

/// True when the message asks about suicidal thoughts or harming oneself.
pub fn is_risk_question(message: &str) -> bool {
    let text = normalize(message);
    if RISK_PHRASES.iter().any(|phrase| word_starts(&text, phrase).next().is_some()) {
        return true;
    }
    HARM_STEMS.iter().any(|stem| {
        word_starts(&text, stem).any(|at| {
            text[at + stem.len()..]
                .find("yourself")
                .is_some_and(|gap| gap <= HARM_WINDOW)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_risk_questions() {
        for question in [
            "Have you had any thoughts of hurting yourself?",
            "Do you ever feel like you want to die?",
            "Have you thought about ending it all?",
            "Do you ever wish you were dead?",
            "Have you had thoughts of suicide?",
            "Have you ever thought about killing yourself?",
            "Do you ever harm yourself when it gets too much?",
            "Have you ever cut yourself?",
            "Do you self-harm?",
            "Does life ever feel not worth living?",
            "Have you wished you were dead?",
            "Do you ever think about not being here anymore?",
        ] {
            assert!(is_risk_question(question), "missed: {question}");
        }
    }

    #[test]
    fn test_unrelated_questions() {
        for question in [
            "How is your sleep?",
            "Do you take painkillers for the cracked skin?",
            "Are you pretending it's fine at university?",
            "How often do you wash your hands?",
            "Tell me about yourself.",
            "Have you cut down on lectures?",
        ] {
            assert!(!is_risk_question(question), "false positive: {question}");
        }
    }

    #[test]
    fn test_curly_apostrophes_are_normalized() {
        assert!(is_risk_question("Do you wish you weren\u{2019}t alive?"));
    }
}
