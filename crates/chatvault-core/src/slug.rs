//! Identifier-safe slugs for conversation names.
//!
//! Names are NFKD-normalized, lowercased, transliterated from Cyrillic, reduced
//! to `[a-z0-9 ]` and the first `max_words` words joined with underscores.
//! Names that reduce to nothing fall back to `chat_<sha1 prefix>`.

use std::collections::HashSet;

use sha1::{Digest, Sha1};
use unicode_normalization::UnicodeNormalization;

/// Number of hex characters taken from the SHA-1 digest.
const HASH_CHARS: usize = 6;

/// Generate a slug for `text`, registering it in `used` when given.
///
/// A candidate already present in `used` gets `_<sha1 prefix>` appended. Two
/// identical names produce the same suffix, so a numeric counter is appended
/// after that until the slug is free.
pub fn slugify(text: &str, max_words: usize, used: Option<&mut HashSet<String>>) -> String {
    let candidate = base_slug(text, max_words);
    let Some(used) = used else {
        return candidate;
    };

    let slug = if used.contains(&candidate) {
        let hashed = format!("{candidate}_{}", short_hash(text));
        let mut slug = hashed.clone();
        let mut counter = 2usize;
        while used.contains(&slug) {
            slug = format!("{hashed}_{counter}");
            counter += 1;
        }
        tracing::debug!("Slug '{candidate}' taken, using '{slug}'");
        slug
    } else {
        candidate
    };

    used.insert(slug.clone());
    slug
}

/// Slug generator holding the used-slug set for one run.
#[derive(Debug, Clone)]
pub struct SlugGenerator {
    max_words: usize,
    used: HashSet<String>,
}

impl SlugGenerator {
    pub fn new(max_words: usize) -> Self {
        Self {
            max_words,
            used: HashSet::new(),
        }
    }

    /// Generate and register a unique slug.
    pub fn generate(&mut self, text: &str) -> String {
        slugify(text, self.max_words, Some(&mut self.used))
    }

    pub fn is_used(&self, slug: &str) -> bool {
        self.used.contains(slug)
    }
}

impl Default for SlugGenerator {
    fn default() -> Self {
        Self::new(3)
    }
}

fn base_slug(text: &str, max_words: usize) -> String {
    let mut folded = String::with_capacity(text.len());
    for ch in text.nfkd().flat_map(char::to_lowercase) {
        match transliterate(ch) {
            Some(latin) => folded.push_str(latin),
            None => folded.push(ch),
        }
    }

    let cleaned: String = folded
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect();

    let slug = cleaned
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join("_");

    if slug.chars().any(|c| c.is_ascii_alphanumeric()) {
        slug
    } else {
        format!("chat_{}", short_hash(text))
    }
}

fn short_hash(text: &str) -> String {
    let digest = Sha1::digest(text.as_bytes());
    let mut output = String::with_capacity(HASH_CHARS);
    for byte in digest.iter().take(HASH_CHARS / 2) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Ukrainian-style Cyrillic to Latin table (lowercase only).
fn transliterate(ch: char) -> Option<&'static str> {
    let latin = match ch {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "h",
        'ґ' => "g",
        'д' => "d",
        'е' => "e",
        'є' => "ie",
        'ж' => "zh",
        'з' => "z",
        'и' => "y",
        'і' => "i",
        'ї' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ь' => "",
        'ю' => "iu",
        'я' => "ia",
        _ => return None,
    };
    Some(latin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transliterates_cyrillic_name() {
        assert_eq!(slugify("Проєкт Х", 3, None), "proiekt_kh");
    }

    #[test]
    fn keeps_first_words_only() {
        assert_eq!(
            slugify("Rust Users Group Kyiv Chapter", 3, None),
            "rust_users_group"
        );
        assert_eq!(slugify("Rust Users Group", 1, None), "rust");
    }

    #[test]
    fn strips_punctuation_and_accents() {
        assert_eq!(slugify("Café & Crème: 2024!", 3, None), "cafe_creme_2024");
    }

    #[test]
    fn decomposed_cyrillic_letters_fold_to_base() {
        // й and ї decompose under NFKD; the combining marks are dropped.
        assert_eq!(slugify("Київ Йога", 3, None), "kyiv_yoha");
    }

    #[test]
    fn empty_result_falls_back_to_hash() {
        let slug = slugify("!!! ???", 3, None);
        assert!(slug.starts_with("chat_"));
        assert_eq!(slug.len(), "chat_".len() + HASH_CHARS);
        assert_eq!(slug, slugify("!!! ???", 3, None));
    }

    #[test]
    fn emoji_only_name_falls_back_to_hash() {
        assert!(slugify("🔥🔥", 3, None).starts_with("chat_"));
        assert_ne!(slugify("🔥🔥", 3, None), slugify("🔥", 3, None));
    }

    #[test]
    fn deterministic_with_same_prior_state() {
        let mut first = HashSet::from(["team_chat".to_string()]);
        let mut second = first.clone();
        assert_eq!(
            slugify("Team chat!", 3, Some(&mut first)),
            slugify("Team chat!", 3, Some(&mut second))
        );
    }

    #[test]
    fn colliding_names_get_distinct_slugs() {
        let mut generator = SlugGenerator::new(3);
        let a = generator.generate("Team Chat");
        let b = generator.generate("team chat!!");
        assert_eq!(a, "team_chat");
        assert_ne!(a, b);
        assert!(b.starts_with("team_chat_"));
        assert_eq!(b.len(), "team_chat_".len() + HASH_CHARS);
        assert!(generator.is_used(&a));
        assert!(generator.is_used(&b));
    }

    #[test]
    fn identical_names_still_unique() {
        let mut generator = SlugGenerator::new(3);
        let a = generator.generate("Same");
        let b = generator.generate("Same");
        let c = generator.generate("Same");
        assert_eq!(a, "same");
        assert_eq!(c, format!("{b}_2"));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_prefix_is_sha1() {
        // sha1("abc") = a9993e36...
        assert_eq!(short_hash("abc"), "a9993e");
    }
}
