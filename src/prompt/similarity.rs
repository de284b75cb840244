use std::collections::HashSet;

pub const CONTAINMENT_SCORE: f64 = 0.8;

fn tokens(value: &str) -> HashSet<&str> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .collect()
}

pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return CONTAINMENT_SCORE;
    }

    let a_tokens = tokens(&a);
    let b_tokens = tokens(&b);
    let shared = a_tokens.intersection(&b_tokens).count();
    if shared == 0 {
        return 0.0;
    }
    shared as f64 / a_tokens.len().max(b_tokens.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_scores_fixed_value() {
        assert_eq!(similarity("85mm lens", "85mm lens, portrait lens"), 0.8);
        assert_eq!(similarity("Portrait Lens, 85MM LENS", "portrait lens"), 0.8);
    }

    #[test]
    fn word_overlap_uses_larger_token_count() {
        let score = similarity("soft golden light", "golden hour lighting, warm sunlight");
        assert!((score - 0.2).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn disjoint_or_empty_strings_score_zero() {
        assert_eq!(similarity("castle", "neon lights"), 0.0);
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("anything", "   "), 0.0);
    }
}
