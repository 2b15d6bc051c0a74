pub mod validation;

use std::cmp::Ordering;

/// Total descending order on scores. NaN sorts after every number and
/// `-0.0` ties with `0.0`.
pub fn cmp_score_desc(a: f32, b: f32) -> Ordering {
    fn key(x: f32) -> f32 {
        if x.is_nan() {
            f32::NEG_INFINITY
        } else {
            x + 0.0
        }
    }
    key(b).total_cmp(&key(a))
}

/// Indices of the `k` highest scores, best first. Ties keep input order.
pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indexed_scores: Vec<(usize, f32)> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| (i, score))
        .collect();

    indexed_scores.sort_by(|a, b| cmp_score_desc(a.1, b.1));

    indexed_scores
        .into_iter()
        .take(k)
        .map(|(i, _)| i)
        .collect()
}

/// Cuts `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Rounds to `decimals` places, ties to even.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// `1250000.0` -> `"1,250,000 VND"`; unknown prices render as `"N/A"`.
pub fn format_price_display(price: Option<f64>, currency_suffix: &str) -> String {
    let price = match price {
        Some(p) if p.is_finite() => p,
        _ => return "N/A".to_string(),
    };

    let rounded = price.round_ties_even();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{}{} {}", sign, grouped, currency_suffix)
}
