/// Fixed phrase list tested with case-insensitive substring containment
/// against each final (non-partial) transcript, from either side of the
/// call. Deliberately short: these are explicit sign-offs, not general
/// sentiment — a caller saying "well, I have to go now and get the kids"
/// is exactly the case this is meant to catch.
const GOODBYE_PHRASES: &[&str] = &[
    "goodbye now",
    "bye bye",
    "talk to you later",
    "gotta go",
    "have to go now",
    "need to go",
    "end the call",
    "hang up now",
];

/// True if `transcript` contains any configured goodbye phrase.
pub fn is_goodbye(transcript: &str) -> bool {
    let lower = transcript.to_lowercase();
    GOODBYE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_phrase_anywhere_in_sentence() {
        assert!(is_goodbye("Alright, talk to you later!"));
        assert!(is_goodbye("I GOTTA GO, bye"));
        assert!(is_goodbye("ok let's end the call now"));
    }

    #[test]
    fn passes_ordinary_speech() {
        assert!(!is_goodbye("Can you tell me more about the pricing?"));
        assert!(!is_goodbye(""));
        assert!(!is_goodbye("I went to the store yesterday"));
    }
}
