//! Trigram generation and edit-distance rescoring for fuzzy name search
//! (§3 Trigram table, §4.2 `search_fuzzy`).

/// Lowercased, padded 3-character substrings of `name`. Padding with a
/// sentinel on both ends lets short names (and prefixes/suffixes) still
/// produce matchable trigrams.
pub fn trigrams(name: &str) -> Vec<String> {
    let padded = format!("  {}  ", name.to_ascii_lowercase());
    let chars: Vec<char> = padded.chars().collect();
    if chars.len() < 3 {
        return Vec::new();
    }
    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Classic Levenshtein distance, used to rescore trigram candidates.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigrams_of_short_name() {
        assert_eq!(trigrams("go"), vec!["  g", " go", "go "]);
    }

    #[test]
    fn edit_distance_identical_strings_is_zero() {
        assert_eq!(edit_distance("greet", "greet"), 0);
    }

    #[test]
    fn edit_distance_single_substitution() {
        assert_eq!(edit_distance("greet", "great"), 1);
    }
}
