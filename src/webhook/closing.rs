//! Classifies a final remote transcript received while a call is in
//! `closing_said`, deciding whether the caller is continuing the
//! conversation, saying goodbye, or neither.

const CONTINUATION_PHRASES: &[&str] = &[
    "wait",
    "actually",
    "one more thing",
    "hold on",
    "before you go",
    "can you also",
    "i also need",
    "i have another",
    "quick question",
    "also",
    "oh wait",
    "sorry",
    "one second",
];

const FAREWELL_PHRASES: &[&str] = &[
    "bye",
    "goodbye",
    "good bye",
    "talk to you later",
    "have a good day",
    "have a good one",
    "thanks bye",
    "thank you bye",
    "ok bye",
    "okay bye",
    "alright bye",
    "take care",
    "see you",
    "later",
    "that's all",
    "appreciate it bye",
    "thanks so much bye",
    "you too bye",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingClassification {
    Continuation,
    Farewell,
    Ambiguous,
}

/// True when `text` contains one of the canonical farewell phrases. Used to
/// detect the agent's own farewell (which opens the closing protocol),
/// independent of `classify`'s continuation-vs-farewell logic for the
/// remote party's reply once the protocol is already open.
pub fn is_farewell(text: &str) -> bool {
    let lower = text.to_lowercase();
    FAREWELL_PHRASES.iter().any(|p| lower.contains(p))
}

/// Continuation is checked before farewell: phrases like "one second, bye"
/// must land as continuation, not farewell.
pub fn classify(transcript: &str) -> ClosingClassification {
    let lower = transcript.to_lowercase();

    if lower.contains('?') || CONTINUATION_PHRASES.iter().any(|p| lower.contains(p)) {
        return ClosingClassification::Continuation;
    }
    if FAREWELL_PHRASES.iter().any(|p| lower.contains(p)) {
        return ClosingClassification::Farewell;
    }
    ClosingClassification::Ambiguous
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn continuation_beats_farewell_when_both_present() {
        assert_eq!(
            classify("one second, bye"),
            ClosingClassification::Continuation
        );
    }

    #[test]
    fn plain_farewell_classifies_as_farewell() {
        assert_eq!(classify("ok bye thanks"), ClosingClassification::Farewell);
        assert_eq!(classify("Alright, BYE!"), ClosingClassification::Farewell);
    }

    #[test]
    fn question_is_continuation_even_without_keyword() {
        assert_eq!(
            classify("does that cover everything?"),
            ClosingClassification::Continuation
        );
    }

    #[test]
    fn unrelated_text_is_ambiguous() {
        assert_eq!(classify("sounds good"), ClosingClassification::Ambiguous);
    }

    #[test]
    fn is_farewell_matches_agent_sign_off() {
        assert!(is_farewell("Alright, have a good day!"));
        assert!(!is_farewell("Sure, I can help with that."));
    }

    #[test]
    fn case_insensitive_match() {
        assert_eq!(
            classify("WAIT, one more thing"),
            ClosingClassification::Continuation
        );
    }

    proptest! {
        #[test]
        fn any_text_containing_a_continuation_phrase_classifies_as_continuation(
            idx in 0..CONTINUATION_PHRASES.len(),
            prefix in "[a-z ]{0,10}",
            suffix in "[a-z ]{0,10}",
        ) {
            let phrase = CONTINUATION_PHRASES[idx];
            let text = format!("{prefix}{phrase}{suffix}");
            prop_assert_eq!(classify(&text), ClosingClassification::Continuation);
        }
    }
}
