//! Yes/no classification of proposal replies

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Affirmative,
    Negative,
    Unrecognized,
}

pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Response;
}

lazy_static! {
    static ref AFFIRMATIVE: Regex =
        Regex::new(r"(?i)i do|yes|of course|definitely|absolutely|yeah|yea|sure")
            .expect("affirmative pattern is valid");
    static ref NEGATIVE: Regex =
        Regex::new(r"(?i)i don't|i dont|no|to think|i'm sorry|im sorry")
            .expect("negative pattern is valid");
}

/// Keyword matcher; a negative match wins over an affirmative one
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternClassifier;

impl ResponseClassifier for PatternClassifier {
    fn classify(&self, text: &str) -> Response {
        if NEGATIVE.is_match(text) {
            Response::Negative
        } else if AFFIRMATIVE.is_match(text) {
            Response::Affirmative
        } else {
            Response::Unrecognized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affirmative_replies() {
        for reply in ["I do!", "yes", "Of course <3", "YEAH", "sure thing"] {
            assert_eq!(PatternClassifier.classify(reply), Response::Affirmative, "{}", reply);
        }
    }

    #[test]
    fn test_negative_wins_over_affirmative() {
        // "i don't" also contains "i do"
        assert_eq!(PatternClassifier.classify("I don't"), Response::Negative);
        assert_eq!(PatternClassifier.classify("yes... no, wait"), Response::Negative);
        assert_eq!(PatternClassifier.classify("I'm sorry"), Response::Negative);
    }

    #[test]
    fn test_unrelated_chatter_is_unrecognized() {
        assert_eq!(PatternClassifier.classify("what's for lunch"), Response::Unrecognized);
        assert_eq!(PatternClassifier.classify(""), Response::Unrecognized);
    }
}
