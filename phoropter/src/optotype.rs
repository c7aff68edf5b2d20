//! Optotype stimulus generation and response scoring.
//!
//! Generates letter lines for acuity testing, sizes them for the calibrated
//! display, and scores the patient's spoken read-back against the shown
//! line. Everything here is stateless; the staircase controller owns the
//! adaptive behavior.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Chart alphabet: nine letters of roughly equal legibility.
///
/// Responses containing characters outside this set are discarded during
/// parsing rather than scored as wrong letters.
pub const ALPHABET: [char; 9] = ['C', 'D', 'E', 'F', 'L', 'O', 'P', 'T', 'Z'];

/// Smallest letter height we will ever ask the display to render.
pub const MIN_LETTER_PX: u32 = 10;

/// Draw a line of `count` letters uniformly at random from [`ALPHABET`].
pub fn generate_line(count: usize) -> Vec<char> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect()
}

/// On-screen letter height in pixels for an acuity level.
///
/// A standard optotype subtends 5 arcminutes at its threshold distance, so
/// the angular size is `5 * 10^logMAR` arcminutes. The small-angle relation
/// converts that to a physical height at the calibrated viewing distance,
/// and the calibrated scale converts to pixels, rounded to the nearest
/// pixel with a [`MIN_LETTER_PX`] floor.
pub fn letter_size_pixels(logmar: f64, viewing_distance_cm: f64, pixels_per_cm: f64) -> u32 {
    let arcmin = 5.0 * 10f64.powf(logmar);
    let radians = arcmin * std::f64::consts::PI / (180.0 * 60.0);
    let height_cm = viewing_distance_cm * radians;
    let px = (height_cm * pixels_per_cm).round() as u32;
    px.max(MIN_LETTER_PX)
}

/// Extract chart letters from a raw speech transcript.
///
/// Uppercases, splits on whitespace, strips non-alphabetic characters from
/// each token, and keeps single-letter tokens that belong to [`ALPHABET`],
/// in order. Fails open: anything unparseable yields an empty sequence,
/// never an error.
pub fn parse_spoken_letters(raw: &str) -> Vec<char> {
    raw.to_uppercase()
        .split_whitespace()
        .filter_map(|token| {
            let cleaned: Vec<char> = token.chars().filter(char::is_ascii_alphabetic).collect();
            match cleaned.as_slice() {
                [c] if ALPHABET.contains(c) => Some(*c),
                _ => None,
            }
        })
        .collect()
}

/// Outcome of comparing a spoken response against a shown line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineScore {
    /// Whether the line counts as read.
    pub correct: bool,
    /// Letters matched at their shown position.
    pub matches: usize,
    /// Letters shown.
    pub total: usize,
}

/// Score a spoken response against the shown line.
///
/// Letters are compared position by position up to the shorter of the two
/// sequences; `total` is the number of letters shown. The line passes when
/// at least 60% of the shown letters were read back correctly, boundary
/// inclusive. An empty shown line never passes.
pub fn score_line(shown: &[char], spoken: &[char]) -> LineScore {
    let total = shown.len();
    let matches = shown
        .iter()
        .zip(spoken.iter())
        .filter(|(a, b)| a == b)
        .count();
    // matches >= ceil(0.6 * total), kept in integer arithmetic
    let correct = total > 0 && matches * 5 >= total * 3;
    LineScore {
        correct,
        matches,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_line_draws_from_alphabet() {
        let line = generate_line(50);
        assert_eq!(line.len(), 50);
        assert!(line.iter().all(|c| ALPHABET.contains(c)));
    }

    #[test]
    fn test_generate_line_empty() {
        assert!(generate_line(0).is_empty());
    }

    #[test]
    fn test_letter_size_large_line() {
        // logMAR 1.0 -> 50 arcmin -> ~1.454 cm at 1 m -> ~55 px at 96 dpi
        let px = letter_size_pixels(1.0, 100.0, 37.8);
        assert_eq!(px, 55);
    }

    #[test]
    fn test_letter_size_floor() {
        // logMAR 0.0 at 1 m is ~5.5 px, below the render floor
        assert_eq!(letter_size_pixels(0.0, 100.0, 37.8), MIN_LETTER_PX);
        assert_eq!(letter_size_pixels(-0.1, 100.0, 37.8), MIN_LETTER_PX);
    }

    #[test]
    fn test_letter_size_scales_with_distance() {
        let near = letter_size_pixels(0.5, 50.0, 40.0);
        let far = letter_size_pixels(0.5, 200.0, 40.0);
        assert!(far > near);
    }

    #[test]
    fn test_parse_clean_transcript() {
        assert_eq!(parse_spoken_letters("C D E"), vec!['C', 'D', 'E']);
        assert_eq!(parse_spoken_letters("c d e"), vec!['C', 'D', 'E']);
    }

    #[test]
    fn test_parse_strips_punctuation_and_fillers() {
        // Punctuated letters survive, multi-letter words and non-chart
        // letters are dropped.
        assert_eq!(parse_spoken_letters("C, D... e!"), vec!['C', 'D', 'E']);
        assert_eq!(parse_spoken_letters("um, C then D"), vec!['C', 'D']);
        assert_eq!(parse_spoken_letters("A B C"), vec!['C']);
    }

    #[test]
    fn test_parse_fails_open() {
        assert!(parse_spoken_letters("").is_empty());
        assert!(parse_spoken_letters("   ").is_empty());
        assert!(parse_spoken_letters("I couldn't see anything").is_empty());
        assert!(parse_spoken_letters("123 !?").is_empty());
    }

    #[test]
    fn test_score_threshold_boundary() {
        let shown = ['C', 'D', 'E', 'F', 'L'];
        // 3/5 = 60%, inclusive boundary: passes
        let score = score_line(&shown, &['C', 'D', 'E', 'X', 'X']);
        assert_eq!(score.matches, 3);
        assert_eq!(score.total, 5);
        assert!(score.correct);
        // 2/5: fails
        let score = score_line(&shown, &['C', 'D', 'X', 'X', 'X']);
        assert_eq!(score.matches, 2);
        assert!(!score.correct);
    }

    #[test]
    fn test_score_position_sensitive() {
        // Right letters in the wrong order do not match
        let score = score_line(&['C', 'D', 'E'], &['E', 'C', 'D']);
        assert_eq!(score.matches, 0);
        assert!(!score.correct);
    }

    #[test]
    fn test_score_short_response() {
        // Comparison stops at the shorter sequence; total stays at the
        // shown length, so a truncated read-back can still fail.
        let score = score_line(&['C', 'D', 'E', 'F', 'L'], &['C', 'D']);
        assert_eq!(score.matches, 2);
        assert_eq!(score.total, 5);
        assert!(!score.correct);
    }

    #[test]
    fn test_score_empty_response_incorrect() {
        let score = score_line(&['C', 'D', 'E', 'F', 'L'], &[]);
        assert_eq!(score.matches, 0);
        assert!(!score.correct);
    }

    #[test]
    fn test_score_empty_line_never_passes() {
        let score = score_line(&[], &[]);
        assert!(!score.correct);
        assert_eq!(score.total, 0);
    }
}
